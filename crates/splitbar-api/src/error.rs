//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("batch of {size} events exceeds the maximum of {max}")]
  BatchTooLarge { size: usize, max: usize },

  #[error("malformed batch: {0}")]
  MalformedBatch(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<splitbar_core::Error> for ApiError {
  fn from(e: splitbar_core::Error) -> Self {
    use splitbar_core::Error as Core;
    match e {
      Core::ExperimentNotFound(id) => ApiError::NotFound(format!("experiment {id} not found")),
      Core::BatchTooLarge { size, max } => ApiError::BatchTooLarge { size, max },
      Core::InvalidEvent(m) | Core::InvalidExperiment(m) => ApiError::BadRequest(m),
      Core::NoTrafficConfigured => ApiError::BadRequest(e.to_string()),
      Core::Store(inner) => ApiError::Store(inner),
      Core::Serialization(inner) => ApiError::Store(Box::new(inner)),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let message = self.to_string();
    match self {
      ApiError::NotFound(_) => (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response(),
      ApiError::BadRequest(_) => {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
      }
      ApiError::Unauthorized => {
        let mut res =
          (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"splitbar\""),
        );
        res
      }
      // Rejected batches still report counts so tracking clients can log them.
      ApiError::BatchTooLarge { size, .. } => (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({ "error": message, "recorded": 0, "failed": size, "duplicates": 0 })),
      )
        .into_response(),
      ApiError::MalformedBatch(_) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "recorded": 0, "failed": 0, "duplicates": 0 })),
      )
        .into_response(),
      ApiError::Store(_) => {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
      }
    }
  }
}
