//! Generation API: request validation, model catalogue and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use key_pool::{Engine, Generation, MAX_BATCH_SIZE};
use provider::GenerationRequest;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::ApiError;
use crate::metrics;

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MAX_SEED: u64 = 9_999_999_999;

const KOLORS: &str = "Kwai-Kolors/Kolors";
const QWEN: &str = "Qwen/Qwen-Image";
const MODELS: &[&str] = &[KOLORS, QWEN];

const SIZE_RATIOS: &[&str] = &["1:1", "1:2", "3:2", "3:4", "16:9", "9:16"];
const PIXEL_SIZES: &[&str] = &[
    "1024x1024",
    "1328x1328",
    "1664x928",
    "928x1664",
    "1280x720",
    "720x1280",
    "1536x640",
    "640x1536",
];

/// State for the generation routes.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    /// Deadline applied to each generation request.
    pub request_timeout: Duration,
}

/// Check a request against the ranges the provider accepts.
pub fn validate(request: &GenerationRequest) -> Result<(), ApiError> {
    let invalid = |msg: String| Err(ApiError::InvalidRequest(msg));

    let prompt_len = request.prompt.chars().count();
    if prompt_len == 0 || prompt_len > MAX_PROMPT_CHARS {
        return invalid(format!(
            "prompt must be 1 to {MAX_PROMPT_CHARS} characters, got {prompt_len}"
        ));
    }
    if let Some(negative) = &request.negative_prompt
        && negative.chars().count() > MAX_PROMPT_CHARS
    {
        return invalid(format!(
            "negative_prompt must be at most {MAX_PROMPT_CHARS} characters"
        ));
    }
    if !MODELS.contains(&request.model.as_str()) {
        return invalid(format!("model must be one of {MODELS:?}"));
    }
    if !SIZE_RATIOS.contains(&request.image_size.as_str())
        && !PIXEL_SIZES.contains(&request.image_size.as_str())
    {
        return invalid(format!(
            "image_size must be one of {SIZE_RATIOS:?} or {PIXEL_SIZES:?}"
        ));
    }
    if request.batch_size == 0 || request.batch_size > MAX_BATCH_SIZE {
        return invalid(format!("batch_size must be 1 to {MAX_BATCH_SIZE}"));
    }
    if request.seed.is_some_and(|seed| seed > MAX_SEED) {
        return invalid(format!("seed must be 0 to {MAX_SEED}"));
    }
    if !(1..=100).contains(&request.num_inference_steps) {
        return invalid("num_inference_steps must be 1 to 100".into());
    }
    if !(0.0..=20.0).contains(&request.guidance_scale) {
        return invalid("guidance_scale must be 0 to 20".into());
    }
    if let Some(cfg) = request.cfg {
        if !(0.1..=20.0).contains(&cfg) {
            return invalid("cfg must be 0.1 to 20".into());
        }
        if !request.model.starts_with("Qwen/") {
            return invalid("cfg is only available for Qwen models".into());
        }
    }
    Ok(())
}

/// Request parameters echoed back with the result.
#[derive(Debug, Serialize)]
struct Parameters {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    image_size: String,
    batch_size: u8,
    num_inference_steps: u32,
    guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    images: Vec<provider::ImageRef>,
    seed: u64,
    inference_time: f64,
    model: String,
    parameters: Parameters,
    request_id: String,
}

impl GenerateResponse {
    fn new(generation: Generation, request: GenerationRequest, request_id: String) -> Self {
        Self {
            images: generation.images,
            seed: generation.seed,
            inference_time: generation.inference_time,
            model: request.model,
            parameters: Parameters {
                prompt: request.prompt,
                negative_prompt: request.negative_prompt,
                image_size: request.image_size,
                batch_size: request.batch_size,
                num_inference_steps: request.num_inference_steps,
                guidance_scale: request.guidance_scale,
                cfg: request.cfg,
            },
            request_id,
        }
    }
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// `POST /api/v1/generate`: all images of the batch, or one error.
pub async fn generate_handler(
    State(state): State<ApiState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Response {
    let request_id = new_request_id();
    let started = std::time::Instant::now();

    let response = generate(&state, payload, &request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        "generate",
        started.elapsed().as_secs_f64(),
    );
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn generate(
    state: &ApiState,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
    request_id: &str,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::InvalidRequest(rejection.body_text()).into_response_with_id(request_id);
        }
    };
    if let Err(e) = validate(&request) {
        return e.into_response_with_id(request_id);
    }

    info!(
        model = %request.model,
        batch_size = request.batch_size,
        image_size = %request.image_size,
        "generation requested"
    );

    let deadline = tokio::time::Instant::now() + state.request_timeout;
    match state.engine.generate(request.clone(), deadline).await {
        Ok(generation) => {
            let body = GenerateResponse::new(generation, request, request_id.to_string());
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "generation failed");
            ApiError::from(e).into_response_with_id(request_id)
        }
    }
}

/// `POST /api/v1/validate`: check a request without generating anything.
pub async fn validate_handler(payload: Result<Json<GenerationRequest>, JsonRejection>) -> Response {
    let request_id = new_request_id();
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::InvalidRequest(rejection.body_text()).into_response_with_id(&request_id);
        }
    };
    match validate(&request) {
        Ok(()) => Json(serde_json::json!({
            "status": "valid",
            "request": request,
        }))
        .into_response(),
        Err(e) => e.into_response_with_id(&request_id),
    }
}

/// `GET /api/v1/models`: the models this gateway accepts.
pub async fn models_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "models": [
            {
                "id": KOLORS,
                "name": "Kolors",
                "description": "High-quality image generation model",
                "supported_sizes": ["1024x1024", "1328x1328", "1664x928", "928x1664"],
            },
            {
                "id": QWEN,
                "name": "Qwen Image",
                "description": "Advanced image generation with CFG support",
                "supported_sizes": ["1328x1328", "1664x928", "928x1664", "1280x720", "720x1280"],
                "supports_cfg": true,
            }
        ]
    }))
}

/// `GET /api/v1/stats`: redacted pool snapshot.
pub async fn stats_handler(State(state): State<ApiState>) -> Response {
    let snapshot = state.engine.pool().snapshot(tokio::time::Instant::now());
    Json(snapshot).into_response()
}
