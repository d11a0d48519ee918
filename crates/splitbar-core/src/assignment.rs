//! Assignment records: the sticky `(experiment, visitor) → variant` mapping.
//!
//! At most one assignment exists per [`AssignmentKey`]; the store enforces
//! this with a uniqueness constraint. Once written, only `last_seen_at` and
//! `seen_count` ever change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{VisitorIdentity, VisitorKind};

/// The uniqueness key for an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
  pub experiment_id: String,
  pub visitor_id:    String,
  pub visitor_kind:  VisitorKind,
}

impl AssignmentKey {
  pub fn new(experiment_id: impl Into<String>, visitor: &VisitorIdentity) -> Self {
    Self {
      experiment_id: experiment_id.into(),
      visitor_id:    visitor.id.clone(),
      visitor_kind:  visitor.kind,
    }
  }
}

/// A persisted assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
  pub key:          AssignmentKey,
  pub variant_id:   String,
  /// Set once by the first writer; never changes.
  pub assigned_at:  DateTime<Utc>,
  /// Monotonically non-decreasing.
  pub last_seen_at: DateTime<Utc>,
  /// Number of times this assignment was written or touched.
  pub seen_count:   u64,
}

/// Input to [`crate::store::ExperimentStore::upsert_assignment`].
///
/// If a row for `key` already exists, only its `last_seen_at` is refreshed
/// (to `at`) and its stored `variant_id` wins.
#[derive(Debug, Clone)]
pub struct NewAssignment {
  pub key:        AssignmentKey,
  pub variant_id: String,
  pub at:         DateTime<Utc>,
}

/// What the service hands back to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentOutcome {
  pub variant_id: String,
  /// `false` when the store could not be reached and the variant was
  /// computed without being persisted.
  pub sticky:     bool,
}
