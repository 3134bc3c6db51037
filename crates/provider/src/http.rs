//! SiliconFlow images API client
//!
//! Builds the simplified request body the endpoint accepts, sends it with the
//! credential as a Bearer token, and maps transport failures onto
//! `ProviderError` so the dispatcher can tell "never sent" from "maybe billed".

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{ImageProvider, ImageRef, ProviderError, Result, UnitOutput, UnitRequest};

/// Path of the generation endpoint relative to `base_url`.
const GENERATIONS_PATH: &str = "/v1/images/generations";

/// Aspect-ratio shorthands accepted from users, mapped to provider pixel sizes.
const RATIO_SIZES: &[(&str, &str)] = &[
    ("1:1", "1024x1024"),
    ("1:2", "640x1536"),
    ("3:2", "1664x928"),
    ("3:4", "928x1664"),
    ("16:9", "1280x720"),
    ("9:16", "720x1280"),
];

/// Map a ratio shorthand to its pixel size; pixel sizes pass through.
pub fn to_pixel_size(size: &str) -> &str {
    RATIO_SIZES
        .iter()
        .find(|(ratio, _)| *ratio == size)
        .map(|(_, pixels)| *pixels)
        .unwrap_or(size)
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    images: Vec<ImageRef>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    timings: Option<Timings>,
}

#[derive(Debug, Deserialize)]
struct Timings {
    #[serde(default)]
    inference: Option<f64>,
}

/// reqwest-backed provider for the SiliconFlow images API.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{GENERATIONS_PATH}", self.base_url.trim_end_matches('/'))
    }
}

/// Request body for one unit. Optional parameters are omitted when unset.
pub fn build_body(unit: &UnitRequest) -> serde_json::Value {
    let request = &unit.request;
    let mut body = serde_json::json!({
        "model": request.model,
        "prompt": request.prompt,
        "size": to_pixel_size(&request.image_size),
        "step": request.num_inference_steps,
        "seed": unit.seed,
        "guidance_scale": request.guidance_scale,
    });

    if let Some(negative) = request.negative_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["negative_prompt"] = serde_json::json!(negative);
    }
    if let Some(cfg) = request.cfg {
        body["cfg"] = serde_json::json!(cfg);
    }
    if let Some(image) = request.image.as_deref() {
        body["image"] = serde_json::json!(image);
    }
    body
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_connect() {
        ProviderError::Connect(e.to_string())
    } else if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_decode() {
        ProviderError::Decode(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

impl ImageProvider for HttpProvider {
    fn id(&self) -> &str {
        "siliconflow"
    }

    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        unit: &'a UnitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let body = build_body(unit);
            debug!(
                subunit = unit.index,
                seed = unit.seed,
                model = %unit.request.model,
                "sending generation request"
            );

            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(api_key)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(map_send_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed: GenerationResponse = response.json().await.map_err(map_send_error)?;
            if parsed.images.is_empty() {
                return Err(ProviderError::Decode(format!(
                    "status {} without images",
                    status.as_u16()
                )));
            }
            Ok(UnitOutput {
                images: parsed.images,
                seed: parsed.seed,
                inference_time: parsed.timings.and_then(|t| t.inference),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerationRequest;
    use axum::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// What the fake provider saw: authorization header and JSON body.
    type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    /// Start a fake provider that records requests and answers with `status`
    /// and `reply` after `delay`.
    async fn start_fake_provider(
        status: StatusCode,
        reply: serde_json::Value,
        delay: Duration,
    ) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));

        let recorder = seen.clone();
        let app = axum::Router::new().route(
            GENERATIONS_PATH,
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let recorder = recorder.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    recorder.lock().unwrap().push((auth, body));
                    tokio::time::sleep(delay).await;
                    (status, Json(reply)).into_response()
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (url, seen)
    }

    fn unit(request: GenerationRequest, index: usize) -> UnitRequest {
        UnitRequest::new(Arc::new(request), index)
    }

    #[test]
    fn ratio_sizes_map_to_pixels() {
        assert_eq!(to_pixel_size("1:1"), "1024x1024");
        assert_eq!(to_pixel_size("16:9"), "1280x720");
        assert_eq!(to_pixel_size("9:16"), "720x1280");
        assert_eq!(to_pixel_size("1328x1328"), "1328x1328");
    }

    #[test]
    fn body_omits_unset_optionals() {
        let body = build_body(&unit(GenerationRequest::new("a cat"), 0));
        assert_eq!(body["model"], "Kwai-Kolors/Kolors");
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["step"], 20);
        assert_eq!(body["seed"], 0);
        assert!(body.get("negative_prompt").is_none());
        assert!(body.get("cfg").is_none());
        assert!(body.get("image").is_none());
    }

    #[test]
    fn body_carries_optionals_and_unit_seed() {
        let mut request = GenerationRequest::new("a cat").with_seed(100);
        request.model = "Qwen/Qwen-Image".into();
        request.image_size = "3:4".into();
        request.negative_prompt = Some("blurry".into());
        request.cfg = Some(4.0);

        let body = build_body(&unit(request, 2));
        assert_eq!(body["size"], "928x1664");
        assert_eq!(body["seed"], 102);
        assert_eq!(body["negative_prompt"], "blurry");
        assert_eq!(body["cfg"], 4.0);
    }

    #[tokio::test]
    async fn success_parses_images_and_sends_bearer() {
        let (url, seen) = start_fake_provider(
            StatusCode::OK,
            serde_json::json!({
                "images": [{"url": "https://cdn.example/img-1.png"}],
                "seed": 7,
                "timings": {"inference": 1.25}
            }),
            Duration::ZERO,
        )
        .await;

        let provider = HttpProvider::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let output = provider
            .generate("sk-test-key", &unit(GenerationRequest::new("a cat"), 0))
            .await
            .unwrap();

        assert_eq!(output.images.len(), 1);
        assert_eq!(output.images[0].url, "https://cdn.example/img-1.png");
        assert_eq!(output.seed, Some(7));
        assert_eq!(output.inference_time, Some(1.25));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "Bearer sk-test-key");
        assert_eq!(seen[0].1["prompt"], "a cat");
    }

    #[tokio::test]
    async fn success_without_images_is_a_decode_error() {
        let (url, _seen) = start_fake_provider(
            StatusCode::OK,
            serde_json::json!({"images": [], "seed": 7}),
            Duration::ZERO,
        )
        .await;

        let provider = HttpProvider::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let err = provider
            .generate("sk-test-key", &unit(GenerationRequest::new("a cat"), 0))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Decode(_)), "got: {err:?}");
        assert!(err.reached_provider());
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let (url, _seen) = start_fake_provider(
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({"message": "IPM limit reached"}),
            Duration::ZERO,
        )
        .await;

        let provider = HttpProvider::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let err = provider
            .generate("sk-test-key", &unit(GenerationRequest::new("a cat"), 0))
            .await
            .unwrap_err();

        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("IPM limit"), "body: {body}");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let (url, _seen) = start_fake_provider(
            StatusCode::OK,
            serde_json::json!({"images": []}),
            Duration::from_millis(500),
        )
        .await;

        let provider = HttpProvider::new(reqwest::Client::new(), url, Duration::from_millis(50));
        let err = provider
            .generate("sk-test-key", &unit(GenerationRequest::new("a cat"), 0))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Timeout(_)), "got: {err:?}");
        assert!(err.reached_provider());
    }

    #[tokio::test]
    async fn refused_connection_never_reaches_provider() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let provider = HttpProvider::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let err = provider
            .generate("sk-test-key", &unit(GenerationRequest::new("a cat"), 0))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Connect(_)), "got: {err:?}");
        assert!(!err.reached_provider());
    }
}
