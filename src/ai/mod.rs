//! Image description through a remote multimodal model

pub mod gemini;
pub mod http_client;
pub mod prompts;

pub use gemini::*;

use crate::error::PipelineResult;
use async_trait::async_trait;

/// Raw image handed to a [`Describer`]
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Anything that can turn an image into a short description
#[async_trait]
pub trait Describer: Send + Sync {
    /// Returns the trimmed description text, never an empty string
    async fn describe(&self, image: &ImagePayload) -> PipelineResult<String>;
}
