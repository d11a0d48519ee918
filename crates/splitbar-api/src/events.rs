//! `POST /events/batch`: the public tracking endpoint.
//!
//! The body must be a JSON array of at most `max_batch_size` events. An item
//! that is not a well-formed event counts as `failed` without affecting the
//! rest of the batch.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
};
use serde::Serialize;
use serde_json::Value;
use splitbar_core::{event::RawEvent, store::ExperimentStore};

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct BatchReply {
  /// Stored events plus impressions suppressed as reloads.
  pub recorded:   usize,
  pub failed:     usize,
  pub duplicates: usize,
}

/// `POST /events/batch`
pub async fn handler<S>(
  State(state): State<AppState<S>>,
  body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BatchReply>, ApiError>
where
  S: ExperimentStore + 'static,
{
  let Json(body) = body.map_err(|e| ApiError::MalformedBatch(e.body_text()))?;
  let Value::Array(items) = body else {
    return Err(ApiError::MalformedBatch("expected a JSON array of events".into()));
  };

  let max = state.service.policy().max_batch_size;
  if items.len() > max {
    return Err(ApiError::BatchTooLarge { size: items.len(), max });
  }

  let events = items
    .into_iter()
    .map(|item| serde_json::from_value::<RawEvent>(item).unwrap_or_default())
    .collect();

  let outcome = state.service.record_batch(events).await?;
  Ok(Json(BatchReply {
    recorded:   outcome.accepted,
    failed:     outcome.rejected,
    duplicates: outcome.duplicates,
  }))
}
