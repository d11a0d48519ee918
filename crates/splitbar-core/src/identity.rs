//! Visitor Identity Resolver.
//!
//! Takes an explicit [`RequestContext`] rather than reading ambient request
//! state. Authenticated users keep their user id; everyone else gets an
//! anonymous token which the caller is asked to persist (typically as a
//! one-year cookie).

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifetime requested for a freshly issued anonymous token.
pub const TOKEN_MAX_AGE_DAYS: i64 = 365;

const TOKEN_LEN: usize = 32;

/// How a visitor was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitorKind {
  StableUser,
  AnonymousToken,
}

impl VisitorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::StableUser => "stable_user",
      Self::AnonymousToken => "anonymous_token",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "stable_user" => Some(Self::StableUser),
      "anonymous_token" => Some(Self::AnonymousToken),
      _ => None,
    }
  }
}

impl fmt::Display for VisitorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A resolved visitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitorIdentity {
  pub id:   String,
  pub kind: VisitorKind,
}

impl VisitorIdentity {
  pub fn stable_user(id: impl Into<String>) -> Self {
    Self { id: id.into(), kind: VisitorKind::StableUser }
  }

  pub fn anonymous(token: impl Into<String>) -> Self {
    Self { id: token.into(), kind: VisitorKind::AnonymousToken }
  }
}

/// Everything the resolver may look at, gathered by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  /// Verified user id from the host's authentication layer.
  pub user_id:         Option<String>,
  /// A previously issued anonymous token (e.g. read from a cookie).
  pub anonymous_token: Option<String>,
  pub client_ip:       Option<String>,
  pub user_agent:      Option<String>,
}

/// A newly minted anonymous token the caller should persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
  pub value:   String,
  pub max_age: Duration,
}

/// The outcome of [`resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
  pub identity: VisitorIdentity,
  /// `Some` only when a new anonymous token was minted.
  pub issued:   Option<IssuedToken>,
}

/// Whether a caller-supplied token looks like one we could have issued.
pub fn is_well_formed_token(token: &str) -> bool {
  (8..=64).contains(&token.len())
    && token
      .bytes()
      .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Resolve the visitor behind `ctx`.
///
/// Blank user ids and malformed tokens are ignored.
pub fn resolve(ctx: &RequestContext, now: DateTime<Utc>) -> Resolution {
  if let Some(user_id) = ctx.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
    return Resolution { identity: VisitorIdentity::stable_user(user_id), issued: None };
  }

  if let Some(token) = ctx.anonymous_token.as_deref().filter(|t| is_well_formed_token(t)) {
    return Resolution { identity: VisitorIdentity::anonymous(token), issued: None };
  }

  let token = mint_token(ctx, now);
  Resolution {
    identity: VisitorIdentity::anonymous(token.clone()),
    issued:   Some(IssuedToken {
      value:   token,
      max_age: Duration::days(TOKEN_MAX_AGE_DAYS),
    }),
  }
}

/// Hash client entropy and a random nonce into a hex token.
fn mint_token(ctx: &RequestContext, now: DateTime<Utc>) -> String {
  let mut nonce = [0u8; 16];
  OsRng.fill_bytes(&mut nonce);

  let mut hasher = Sha256::new();
  hasher.update(ctx.client_ip.as_deref().unwrap_or_default().as_bytes());
  hasher.update([0]);
  hasher.update(ctx.user_agent.as_deref().unwrap_or_default().as_bytes());
  hasher.update([0]);
  hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hasher.update(nonce);

  let mut token = hex::encode(hasher.finalize());
  token.truncate(TOKEN_LEN);
  token
}
