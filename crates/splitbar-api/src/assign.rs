//! `POST /assign`: resolve the visitor and return their sticky variant.
//!
//! The visitor's anonymous token is read from the configured cookie (or the
//! body, for clients that manage it themselves). When a new token is minted
//! the response carries a `Set-Cookie` for it.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
  http::{HeaderMap, HeaderValue, header},
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use splitbar_core::{
  event::loose_id,
  identity::{IssuedToken, RequestContext, VisitorKind},
  store::ExperimentStore,
};
use tracing::warn;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AssignBody {
  #[serde(default, alias = "experimentId", deserialize_with = "loose_id")]
  pub experiment_id:   Option<String>,
  #[serde(default, alias = "userId", deserialize_with = "loose_id")]
  pub user_id:         Option<String>,
  #[serde(default, alias = "anonymousToken")]
  pub anonymous_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AssignReply {
  /// `null` means "render the default experience".
  pub variant_id:   Option<String>,
  pub visitor_id:   String,
  pub visitor_kind: VisitorKind,
  pub sticky:       bool,
}

/// `POST /assign`
pub async fn handler<S>(
  State(state): State<AppState<S>>,
  headers: HeaderMap,
  body: Result<Json<AssignBody>, JsonRejection>,
) -> Result<Response, ApiError>
where
  S: ExperimentStore + 'static,
{
  let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
  let experiment_id = body
    .experiment_id
    .map(|id| id.trim().to_owned())
    .filter(|id| !id.is_empty())
    .ok_or_else(|| ApiError::BadRequest("missing experiment_id".into()))?;

  let ctx = RequestContext {
    user_id:         body.user_id,
    anonymous_token: body
      .anonymous_token
      .or_else(|| cookie_value(&headers, &state.config.cookie_name)),
    client_ip:       client_ip(&headers),
    user_agent:      header_str(&headers, header::USER_AGENT.as_str()),
  };

  let resp = state.service.assign(&experiment_id, &ctx).await;
  let reply = AssignReply {
    variant_id:   resp.variant_id,
    visitor_id:   resp.visitor.id,
    visitor_kind: resp.visitor.kind,
    sticky:       resp.sticky,
  };

  let mut response = Json(reply).into_response();
  if let Some(token) = resp.issued {
    match set_cookie(&state.config.cookie_name, &token) {
      Some(value) => {
        response.headers_mut().insert(header::SET_COOKIE, value);
      }
      None => warn!(cookie = %state.config.cookie_name, "cookie name is not a valid header value"),
    }
  }
  Ok(response)
}

// ─── Header helpers ──────────────────────────────────────────────────────────

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_owned)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
  header_str(headers, "x-forwarded-for")
    .and_then(|xff| {
      xff
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_owned)
    })
    .or_else(|| header_str(headers, "x-real-ip"))
}

/// Value of cookie `name` across every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get_all(header::COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(k, _)| *k == name)
    .map(|(_, v)| v.trim().to_owned())
    .filter(|v| !v.is_empty())
}

fn set_cookie(name: &str, token: &IssuedToken) -> Option<HeaderValue> {
  let value = format!(
    "{name}={}; Max-Age={}; Path=/; SameSite=Lax",
    token.value,
    token.max_age.num_seconds()
  );
  HeaderValue::from_str(&value).ok()
}
