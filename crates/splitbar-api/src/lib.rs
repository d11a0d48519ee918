//! JSON HTTP API for Splitbar.
//!
//! Exposes an axum [`Router`] backed by any [`ExperimentStore`]. The
//! assignment and event endpoints are public; the registry, read-back and
//! analysis endpoints sit behind [`auth::Admin`] when admin credentials are
//! configured. TLS and request tracing are the caller's responsibility.
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | `POST` | `/assign` | public |
//! | `POST` | `/events/batch` | public |
//! | `GET`  | `/stats/{experiment_id}` | admin |
//! | `GET`  | `/winner/{experiment_id}` | admin |
//! | `GET`  | `/experiments` | admin |
//! | `GET`/`PUT` | `/experiments/{id}` | admin |
//! | `GET`  | `/assignments/{experiment_id}/{visitor_kind}/{visitor_id}` | admin |
//! | `GET`  | `/health` | public |

pub mod analysis;
pub mod assign;
pub mod auth;
pub mod error;
pub mod events;
pub mod experiments;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use serde_json::{Value, json};
use splitbar_core::{ExperimentService, store::ExperimentStore};

pub use auth::AdminAuth;
pub use error::ApiError;

/// Default name of the anonymous-token cookie.
pub const DEFAULT_COOKIE_NAME: &str = "splitbar_vid";

// ─── Configuration ────────────────────────────────────────────────────────────

/// HTTP-level settings that the engine itself does not care about.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub cookie_name: String,
}

impl Default for ApiConfig {
  fn default() -> Self { Self { cookie_name: DEFAULT_COOKIE_NAME.to_owned() } }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub service: Arc<ExperimentService<S>>,
  pub config:  Arc<ApiConfig>,
  /// `None` leaves the admin routes open.
  pub admin:   Option<Arc<AdminAuth>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      service: Arc::clone(&self.service),
      config:  Arc::clone(&self.config),
      admin:   self.admin.clone(),
    }
  }
}

impl<S: ExperimentStore> AppState<S> {
  pub fn new(service: ExperimentService<S>, config: ApiConfig, admin: Option<AdminAuth>) -> Self {
    Self {
      service: Arc::new(service),
      config:  Arc::new(config),
      admin:   admin.map(Arc::new),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn router<S>(state: AppState<S>) -> Router<()>
where
  S: ExperimentStore + 'static,
{
  Router::new()
    // Public
    .route("/assign", post(assign::handler::<S>))
    .route("/events/batch", post(events::handler::<S>))
    .route("/health", get(health))
    // Analysis
    .route("/stats/{experiment_id}", get(analysis::stats::<S>))
    .route("/winner/{experiment_id}", get(analysis::winner::<S>))
    // Registry
    .route("/experiments", get(experiments::list::<S>))
    .route("/experiments/{id}", get(experiments::get_one::<S>).put(experiments::put_one::<S>))
    .route(
      "/assignments/{experiment_id}/{visitor_kind}/{visitor_id}",
      get(experiments::get_assignment::<S>),
    )
    .with_state(state)
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
