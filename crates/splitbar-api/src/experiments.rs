//! Admin endpoints for the experiment registry and assignment read-back.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/experiments` | All experiments, ordered by id |
//! | `GET`  | `/experiments/{id}` | Single experiment |
//! | `PUT`  | `/experiments/{id}` | Body: [`ExperimentBody`]; insert or replace |
//! | `GET`  | `/assignments/{experiment_id}/{visitor_kind}/{visitor_id}` | Stored [`Assignment`] |

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use splitbar_core::{
  assignment::{Assignment, AssignmentKey},
  experiment::{Experiment, Variant},
  flag,
  identity::VisitorKind,
  store::ExperimentStore,
};
use tracing::info;

use crate::{AppState, auth::Admin, error::ApiError};

// ─── Experiments ─────────────────────────────────────────────────────────────

/// Request body for `PUT /experiments/{id}`; the id comes from the path.
#[derive(Debug, Deserialize)]
pub struct ExperimentBody {
  #[serde(default = "enabled_default", deserialize_with = "flag::deserialize_truthy")]
  pub enabled:  bool,
  #[serde(default)]
  pub variants: Vec<Variant>,
}

fn enabled_default() -> bool { true }

/// `GET /experiments`
pub async fn list<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<Experiment>>, ApiError>
where
  S: ExperimentStore + 'static,
{
  Ok(Json(state.service.list_experiments().await?))
}

/// `GET /experiments/{id}`
pub async fn get_one<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Experiment>, ApiError>
where
  S: ExperimentStore + 'static,
{
  state
    .service
    .get_experiment(&id)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("experiment {id} not found")))
}

/// `PUT /experiments/{id}`
pub async fn put_one<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  Json(body): Json<ExperimentBody>,
) -> Result<Json<Experiment>, ApiError>
where
  S: ExperimentStore + 'static,
{
  let experiment = Experiment { experiment_id: id, enabled: body.enabled, variants: body.variants };
  let stored = state.service.put_experiment(experiment).await?;
  info!(
    experiment_id = %stored.experiment_id,
    enabled = stored.enabled,
    variants = stored.variants.len(),
    "experiment saved"
  );
  Ok(Json(stored))
}

// ─── Assignments ─────────────────────────────────────────────────────────────

/// `GET /assignments/{experiment_id}/{visitor_kind}/{visitor_id}`
pub async fn get_assignment<S>(
  _admin: Admin,
  State(state): State<AppState<S>>,
  Path((experiment_id, kind, visitor_id)): Path<(String, String, String)>,
) -> Result<Json<Assignment>, ApiError>
where
  S: ExperimentStore + 'static,
{
  let visitor_kind = VisitorKind::parse(&kind)
    .ok_or_else(|| ApiError::BadRequest(format!("unknown visitor kind {kind:?}")))?;
  let key = AssignmentKey { experiment_id, visitor_id, visitor_kind };

  state
    .service
    .get_assignment(&key)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("assignment not found".into()))
}
