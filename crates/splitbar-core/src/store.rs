//! The `ExperimentStore` trait: the storage contract of the engine.
//!
//! The trait is implemented by storage backends (e.g. `splitbar-store-sqlite`).
//! [`crate::ExperimentService`] and the HTTP layer depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  assignment::{Assignment, AssignmentKey, NewAssignment},
  event::{Event, Recorded},
  experiment::Experiment,
  stats::ExperimentTally,
};

/// Abstraction over a Splitbar store backend.
///
/// Assignments are unique per [`AssignmentKey`] and first-write-wins; events
/// are append-only.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ExperimentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Experiments ───────────────────────────────────────────────────────

  /// Insert or replace an experiment's configuration.
  fn put_experiment(
    &self,
    experiment: Experiment,
  ) -> impl Future<Output = Result<Experiment, Self::Error>> + Send + '_;

  fn get_experiment<'a>(
    &'a self,
    experiment_id: &'a str,
  ) -> impl Future<Output = Result<Option<Experiment>, Self::Error>> + Send + 'a;

  fn list_experiments(
    &self,
  ) -> impl Future<Output = Result<Vec<Experiment>, Self::Error>> + Send + '_;

  // ── Assignments ───────────────────────────────────────────────────────

  /// Read path: if an assignment exists for `key`, advance its
  /// `last_seen_at` to `seen_at` (never backwards), bump `seen_count`, and
  /// return it. Returns `None` on a miss without writing anything.
  fn touch_assignment<'a>(
    &'a self,
    key: &'a AssignmentKey,
    seen_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + 'a;

  /// Write path: atomically insert `assignment`, or, if a row for the key
  /// already exists, touch it as [`touch_assignment`](Self::touch_assignment)
  /// does without altering its `variant_id`. Returns the row as stored.
  fn upsert_assignment(
    &self,
    assignment: NewAssignment,
  ) -> impl Future<Output = Result<Assignment, Self::Error>> + Send + '_;

  /// Plain read with no side effects.
  fn get_assignment<'a>(
    &'a self,
    key: &'a AssignmentKey,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + 'a;

  // ── Events ────────────────────────────────────────────────────────────

  /// Append a single event row unconditionally.
  fn append_event(
    &self,
    event: Event,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Apply both dedup rules and append `event` as one atomic step.
  ///
  /// An impression is [`Recorded::Suppressed`] when an impression for the
  /// same experiment, variant and visitor was stored at or after
  /// `impressions_since`. Any event carrying a session is
  /// [`Recorded::Duplicate`] when one with the same experiment, visitor,
  /// type and session is already stored. Otherwise it is appended.
  fn record_event(
    &self,
    event: Event,
    impressions_since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Recorded, Self::Error>> + Send + '_;

  // ── Aggregates ────────────────────────────────────────────────────────

  /// Per-variant unique-visitor and event counts for one experiment.
  fn tally<'a>(
    &'a self,
    experiment_id: &'a str,
  ) -> impl Future<Output = Result<ExperimentTally, Self::Error>> + Send + 'a;
}
