//! Language-model backends for the insight stage.
//!
//! This module provides the inference boundary and its Ollama implementation.

pub mod inference;

pub use inference::{Inference, InferenceConfig, OllamaInference};
