//! Image provider abstraction
//!
//! Defines the `ImageProvider` trait that decouples the key pool from the
//! transport used to reach the image-generation API. `HttpProvider` speaks the
//! SiliconFlow images endpoint; `MockProvider` replays scripted outcomes for
//! tests.
//!
//! One provider call generates exactly one unit (one image). Fanning a batch
//! out across credentials is the caller's job.

pub mod http;
pub mod mock;

pub use http::HttpProvider;
pub use mock::{MockCall, MockProvider, MockReply};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A user generation request, already validated by the HTTP layer.
///
/// Immutable once handed to the pool; subunits share it through an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u8,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
    /// Classifier-free guidance, only honoured by Qwen models.
    #[serde(default)]
    pub cfg: Option<f32>,
    /// Base64 reference image.
    #[serde(default)]
    pub image: Option<String>,
}

fn default_model() -> String {
    "Kwai-Kolors/Kolors".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_batch_size() -> u8 {
    1
}

fn default_steps() -> u32 {
    20
}

fn default_guidance_scale() -> f32 {
    7.5
}

impl GenerationRequest {
    /// Request with the default model and parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            model: default_model(),
            image_size: default_image_size(),
            batch_size: default_batch_size(),
            seed: None,
            num_inference_steps: default_steps(),
            guidance_scale: default_guidance_scale(),
            cfg: None,
            image: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u8) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// One subunit of a batch: the shared request plus its own index and seed.
///
/// Subunit `i` uses seed `base + i` so a batch yields distinct images.
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub index: usize,
    pub seed: u64,
    pub request: Arc<GenerationRequest>,
}

impl UnitRequest {
    pub fn new(request: Arc<GenerationRequest>, index: usize) -> Self {
        let seed = request.seed.unwrap_or(0).saturating_add(index as u64);
        Self {
            index,
            seed,
            request,
        }
    }
}

/// A generated image as referenced by the provider. URLs expire on the
/// provider's schedule; nothing here tracks that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Successful result of one unit call.
#[derive(Debug, Clone, Default)]
pub struct UnitOutput {
    pub images: Vec<ImageRef>,
    pub seed: Option<u64>,
    /// Provider-reported inference time in seconds.
    pub inference_time: Option<f64>,
}

/// Failure of one provider call.
///
/// Response bodies are kept for logging only; callers must not forward them
/// to end users.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned status {status}")]
    Status { status: u16, body: String },

    /// The connection was never established, so the provider cannot have
    /// counted the call.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the provider may have received (and billed) the request.
    pub fn reached_provider(&self) -> bool {
        !matches!(self, ProviderError::Connect(_))
    }
}

/// Result alias for provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Transport for a single unit of image generation.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn ImageProvider>`).
pub trait ImageProvider: Send + Sync {
    /// Identifier for logging (e.g. "siliconflow", "mock").
    fn id(&self) -> &str;

    /// Generate one unit using the given API key.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        unit: &'a UnitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UnitOutput>> + Send + 'a>>;
}
