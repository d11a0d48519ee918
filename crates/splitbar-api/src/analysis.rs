//! Read-only analysis endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/stats/{experiment_id}` | [`ExperimentStats`], control first |
//! | `GET`  | `/winner/{experiment_id}` | [`WinnerReport`] |

use axum::{
  Json,
  extract::{Path, State},
};
use splitbar_core::{stats::ExperimentStats, store::ExperimentStore, winner::WinnerReport};

use crate::{AppState, auth::Admin, error::ApiError};

/// `GET /stats/{experiment_id}`
pub async fn stats<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
  Path(experiment_id): Path<String>,
) -> Result<Json<ExperimentStats>, ApiError>
where
  S: ExperimentStore + 'static,
{
  Ok(Json(state.service.compute_stats(&experiment_id).await?))
}

/// `GET /winner/{experiment_id}`
pub async fn winner<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
  Path(experiment_id): Path<String>,
) -> Result<Json<WinnerReport>, ApiError>
where
  S: ExperimentStore + 'static,
{
  Ok(Json(state.service.determine_winner(&experiment_id).await?))
}
