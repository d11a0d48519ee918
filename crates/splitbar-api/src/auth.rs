//! HTTP Basic-auth guard for admin routes.
//!
//! When no [`AdminAuth`] is configured the guard admits everyone; access
//! policy is then the deployer's responsibility (e.g. a reverse proxy).

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use splitbar_core::store::ExperimentStore;

use crate::{AppState, error::ApiError};

/// Admin credentials accepted by this server instance.
#[derive(Clone)]
pub struct AdminAuth {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

/// Zero-size marker: present in a handler means the caller may see admin data.
pub struct Admin;

impl AdminAuth {
  /// Whether `username` / `password` match these credentials.
  pub fn accepts(&self, username: &str, password: &str) -> bool {
    username == self.username
      && PasswordHash::new(&self.password_hash)
        .is_ok_and(|hash| Argon2::default().verify_password(password.as_bytes(), &hash).is_ok())
  }

  /// Admit a request whose `Authorization: Basic` header these credentials
  /// accept.
  pub fn admit(&self, headers: &HeaderMap) -> Result<(), ApiError> {
    match basic_credentials(headers) {
      Some((username, password)) if self.accepts(&username, &password) => Ok(()),
      _ => Err(ApiError::Unauthorized),
    }
  }
}

/// Decode the `user:password` pair of a Basic `Authorization` header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  let encoded = headers
    .get(header::AUTHORIZATION)?
    .to_str()
    .ok()?
    .strip_prefix("Basic ")?;
  let decoded = String::from_utf8(B64.decode(encoded.trim()).ok()?).ok()?;
  let (username, password) = decoded.split_once(':')?;
  Some((username.to_owned(), password.to_owned()))
}

impl<S> FromRequestParts<AppState<S>> for Admin
where
  S: ExperimentStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    match &state.admin {
      Some(auth) => auth.admit(&parts.headers).map(|()| Admin),
      None => Ok(Admin),
    }
  }
}
