//! Request-level errors and their HTTP rendering
//!
//! Every failure a caller sees is one JSON body of the form
//! `{"error": {"type", "message", "request_id"}}`. Provider bodies and
//! credential labels never reach it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or out-of-range request body.
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pool(#[from] key_pool::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use key_pool::Error as Pool;
        match self {
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Pool(e) => match e {
                Pool::UpstreamRejected => StatusCode::BAD_REQUEST,
                Pool::InvalidBatchSize(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Pool::PoolExhausted(_) | Pool::NoCredentials => StatusCode::SERVICE_UNAVAILABLE,
                Pool::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                Pool::RetryCeilingExceeded { .. }
                | Pool::CredentialInvalid
                | Pool::UpstreamRateLimited
                | Pool::UpstreamTransient => StatusCode::BAD_GATEWAY,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Pool(e) => e.kind(),
        }
    }

    /// Render with the request id attached.
    pub fn into_response_with_id(self, request_id: &str) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });

        // Exhaustion carries pool counts; surface them without the prose
        if let ApiError::Pool(key_pool::Error::PoolExhausted(summary)) = &self {
            body["error"]["message"] =
                serde_json::json!("No eligible credential available, retry later");
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(summary)
                && let Some(pool) = parsed["error"].get("pool")
            {
                body["error"]["pool"] = pool.clone();
            }
        }

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
