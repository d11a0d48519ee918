//! [`ExperimentService`]: the stateless service object tying identity,
//! bucketing, the assignment store, the event recorder and the statistics
//! engine together over an injected [`ExperimentStore`].

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  assignment::{Assignment, AssignmentKey, AssignmentOutcome, NewAssignment},
  bucket,
  event::{BatchOutcome, EventPolicy, RawEvent, Recorded},
  experiment::Experiment,
  identity::{self, IssuedToken, RequestContext, VisitorIdentity},
  stats::{self, ExperimentStats},
  store::ExperimentStore,
  winner::{self, WinnerReport},
};

/// Result of [`ExperimentService::assign`].
#[derive(Debug, Clone)]
pub struct AssignResponse {
  pub visitor:    VisitorIdentity,
  /// A new anonymous token the caller should persist.
  pub issued:     Option<IssuedToken>,
  /// `None` means "render the default experience".
  pub variant_id: Option<String>,
  pub sticky:     bool,
}

/// The engine's service object. Holds no per-request state.
pub struct ExperimentService<S> {
  store:  S,
  policy: EventPolicy,
}

impl<S: ExperimentStore> ExperimentService<S> {
  pub fn new(store: S, policy: EventPolicy) -> Self { Self { store, policy } }

  pub fn store(&self) -> &S { &self.store }

  pub fn policy(&self) -> &EventPolicy { &self.policy }

  // ── Experiments ───────────────────────────────────────────────────────────

  /// Validate and persist an experiment definition.
  pub async fn put_experiment(&self, experiment: Experiment) -> Result<Experiment> {
    experiment.validate()?;
    self.store.put_experiment(experiment).await.map_err(Error::store)
  }

  pub async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>> {
    self.store.get_experiment(experiment_id).await.map_err(Error::store)
  }

  pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
    self.store.list_experiments().await.map_err(Error::store)
  }

  // ── Assignment ────────────────────────────────────────────────────────────

  /// Resolve the visitor and return their sticky variant for
  /// `experiment_id`.
  ///
  /// Never fails: a missing or disabled experiment, an empty variant list,
  /// zero traffic or an unreachable store all yield a response the renderer
  /// can act on.
  pub async fn assign(&self, experiment_id: &str, ctx: &RequestContext) -> AssignResponse {
    let resolution = identity::resolve(ctx, Utc::now());
    let mut response = AssignResponse {
      visitor:    resolution.identity,
      issued:     resolution.issued,
      variant_id: None,
      sticky:     false,
    };

    let experiment = match self.store.get_experiment(experiment_id).await {
      Ok(Some(e)) if e.enabled => e,
      Ok(_) => {
        debug!(experiment_id, "experiment missing or disabled; no variant");
        return response;
      }
      Err(e) => {
        warn!(experiment_id, error = %e, "could not load experiment; no variant");
        return response;
      }
    };

    match self.get_or_create(&experiment, &response.visitor).await {
      Ok(Some(outcome)) => {
        response.variant_id = Some(outcome.variant_id);
        response.sticky = outcome.sticky;
      }
      Ok(None) => debug!(experiment_id, "experiment has no variants"),
      Err(e) => warn!(experiment_id, error = %e, "assignment refused"),
    }
    response
  }

  /// Return the visitor's stored variant, creating the assignment on first
  /// sight.
  ///
  /// A stored assignment is returned as-is even if the variant weights have
  /// since changed. When the store is unavailable the freshly computed
  /// variant is returned with `sticky = false`.
  pub async fn get_or_create(
    &self,
    experiment: &Experiment,
    visitor: &VisitorIdentity,
  ) -> Result<Option<AssignmentOutcome>> {
    let now = Utc::now();
    let key = AssignmentKey::new(&experiment.experiment_id, visitor);

    let mut store_ok = true;
    match self.store.touch_assignment(&key, now).await {
      Ok(Some(existing)) => {
        return Ok(Some(AssignmentOutcome { variant_id: existing.variant_id, sticky: true }));
      }
      Ok(None) => {}
      Err(e) => {
        warn!(
          experiment_id = %key.experiment_id,
          error = %e,
          "assignment lookup failed; stickiness not guaranteed for this request"
        );
        store_ok = false;
      }
    }

    let Some(variant) = bucket::assign(&experiment.experiment_id, &visitor.id, &experiment.variants)?
    else {
      return Ok(None);
    };
    let computed = variant.id.clone();

    if !store_ok {
      return Ok(Some(AssignmentOutcome { variant_id: computed, sticky: false }));
    }

    let new = NewAssignment { key, variant_id: computed.clone(), at: now };
    match self.store.upsert_assignment(new).await {
      Ok(stored) => {
        debug!(
          experiment_id = %stored.key.experiment_id,
          variant_id = %stored.variant_id,
          "assignment stored"
        );
        Ok(Some(AssignmentOutcome { variant_id: stored.variant_id, sticky: true }))
      }
      Err(e) => {
        warn!(
          experiment_id = %experiment.experiment_id,
          error = %e,
          "assignment write failed; stickiness not guaranteed for this request"
        );
        Ok(Some(AssignmentOutcome { variant_id: computed, sticky: false }))
      }
    }
  }

  pub async fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<Assignment>> {
    self.store.get_assignment(key).await.map_err(Error::store)
  }

  // ── Events ────────────────────────────────────────────────────────────────

  pub async fn record_batch(&self, events: Vec<RawEvent>) -> Result<BatchOutcome> {
    self.record_batch_at(events, Utc::now()).await
  }

  /// Validate, de-duplicate and append a batch received at `received_at`.
  ///
  /// Only an oversized batch fails as a whole; every other problem rejects
  /// the offending event alone.
  pub async fn record_batch_at(
    &self,
    events: Vec<RawEvent>,
    received_at: DateTime<Utc>,
  ) -> Result<BatchOutcome> {
    if events.len() > self.policy.max_batch_size {
      return Err(Error::BatchTooLarge { size: events.len(), max: self.policy.max_batch_size });
    }

    let window_start = received_at - self.policy.impression_window;
    let mut outcome = BatchOutcome::default();

    for raw in events {
      let event = match raw.validate(&self.policy, received_at) {
        Ok(e) => e,
        Err(e) => {
          debug!(error = %e, "event rejected");
          outcome.rejected += 1;
          continue;
        }
      };

      match self.store.record_event(event, window_start).await {
        Ok(Recorded::Stored) => outcome.accepted += 1,
        Ok(Recorded::Suppressed) => {
          outcome.accepted += 1;
          outcome.suppressed += 1;
        }
        Ok(Recorded::Duplicate) => outcome.duplicates += 1,
        Err(e) => {
          warn!(error = %e, "event write failed; event rejected");
          outcome.rejected += 1;
        }
      }
    }

    debug!(
      accepted = outcome.accepted,
      suppressed = outcome.suppressed,
      rejected = outcome.rejected,
      duplicates = outcome.duplicates,
      "event batch recorded"
    );
    Ok(outcome)
  }

  // ── Analysis ──────────────────────────────────────────────────────────────

  pub async fn compute_stats(&self, experiment_id: &str) -> Result<ExperimentStats> {
    let experiment = self
      .get_experiment(experiment_id)
      .await?
      .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_owned()))?;
    let tally = self.store.tally(experiment_id).await.map_err(Error::store)?;
    Ok(stats::compute_stats(&experiment, tally))
  }

  pub async fn determine_winner(&self, experiment_id: &str) -> Result<WinnerReport> {
    let stats = self.compute_stats(experiment_id).await?;
    Ok(winner::determine_winner(&stats))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Duration;

  use super::*;
  use crate::{
    experiment::Variant,
    identity::VisitorKind,
    testing::{FailingStore, MemoryStore},
  };

  fn service() -> ExperimentService<MemoryStore> {
    ExperimentService::new(MemoryStore::default(), EventPolicy::default())
  }

  fn ab(a: f64, b: f64) -> Experiment {
    Experiment::new("bar-42", vec![Variant::new("A", a), Variant::new("B", b)])
  }

  fn raw(json: &str) -> RawEvent { serde_json::from_str(json).unwrap() }

  fn impression(visitor: &str) -> RawEvent {
    raw(&format!(
      r#"{{"experiment_id":"bar-42","variant_id":"A","visitor_id":"{visitor}","event_type":"impression"}}"#
    ))
  }

  // ── Assignment ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn assignment_is_sticky_across_weight_edits() {
    let svc = service();
    let visitor = VisitorIdentity::anonymous("visitor-token-1");

    let first = svc.get_or_create(&ab(100.0, 0.0), &visitor).await.unwrap().unwrap();
    assert_eq!(first.variant_id, "A");
    assert!(first.sticky);

    let second = svc.get_or_create(&ab(0.0, 100.0), &visitor).await.unwrap().unwrap();
    assert_eq!(second.variant_id, "A");
  }

  #[tokio::test]
  async fn visitor_kinds_are_distinct_keys() {
    let svc = service();
    svc.get_or_create(&ab(100.0, 0.0), &VisitorIdentity::stable_user("7")).await.unwrap();
    let anon = svc
      .get_or_create(&ab(0.0, 100.0), &VisitorIdentity::anonymous("7"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(anon.variant_id, "B");
  }

  #[tokio::test]
  async fn concurrent_first_requests_converge() {
    let svc = Arc::new(service());
    let visitor = VisitorIdentity::stable_user("tabby");

    let mut handles = Vec::new();
    for i in 0..16 {
      let svc = svc.clone();
      let visitor = visitor.clone();
      // Alternate weights so a naive last-write-wins store would disagree.
      let exp = if i % 2 == 0 { ab(100.0, 0.0) } else { ab(0.0, 100.0) };
      handles.push(tokio::spawn(async move {
        svc.get_or_create(&exp, &visitor).await.unwrap().unwrap().variant_id
      }));
    }

    let mut seen = Vec::new();
    for h in handles {
      seen.push(h.await.unwrap());
    }
    seen.dedup();
    assert_eq!(seen.len(), 1, "all requests saw the same variant");

    let key = AssignmentKey::new("bar-42", &visitor);
    let stored = svc.get_assignment(&key).await.unwrap().unwrap();
    assert_eq!(stored.variant_id, seen[0]);
    assert_eq!(stored.seen_count, 16);
  }

  #[tokio::test]
  async fn store_outage_degrades_to_computed_variant() {
    let svc = ExperimentService::new(FailingStore::new(ab(0.0, 100.0)), EventPolicy::default());
    let outcome = svc
      .get_or_create(&ab(0.0, 100.0), &VisitorIdentity::anonymous("abcdefgh"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(outcome.variant_id, "B");
    assert!(!outcome.sticky);

    let r = svc.assign("bar-42", &RequestContext::default()).await;
    assert_eq!(r.variant_id.as_deref(), Some("B"));
    assert!(!r.sticky);
  }

  #[tokio::test]
  async fn assign_handles_missing_disabled_and_zero_traffic() {
    let svc = service();
    let ctx = RequestContext { user_id: Some("u1".into()), ..RequestContext::default() };

    assert!(svc.assign("nope", &ctx).await.variant_id.is_none());

    let mut disabled = ab(50.0, 50.0);
    disabled.enabled = false;
    svc.put_experiment(disabled).await.unwrap();
    assert!(svc.assign("bar-42", &ctx).await.variant_id.is_none());

    svc.put_experiment(ab(0.0, 0.0)).await.unwrap();
    assert!(svc.assign("bar-42", &ctx).await.variant_id.is_none());

    svc.put_experiment(Experiment::new("bar-42", vec![])).await.unwrap();
    assert!(svc.assign("bar-42", &ctx).await.variant_id.is_none());
  }

  #[tokio::test]
  async fn assign_issues_token_for_new_anonymous_visitors() {
    let svc = service();
    svc.put_experiment(ab(50.0, 50.0)).await.unwrap();

    let r = svc.assign("bar-42", &RequestContext::default()).await;
    let token = r.issued.expect("token issued");
    assert_eq!(r.visitor.kind, VisitorKind::AnonymousToken);
    assert!(r.sticky);

    let again = svc
      .assign(
        "bar-42",
        &RequestContext { anonymous_token: Some(token.value), ..RequestContext::default() },
      )
      .await;
    assert!(again.issued.is_none());
    assert_eq!(again.variant_id, r.variant_id);
  }

  #[tokio::test]
  async fn put_experiment_validates() {
    let svc = service();
    let err = svc.put_experiment(ab(150.0, 0.0)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidExperiment(_)));
  }

  #[tokio::test]
  async fn lots_of_visitors_split_evenly() {
    let svc = service();
    let exp = ab(50.0, 50.0);
    svc.put_experiment(exp.clone()).await.unwrap();
    for i in 0..1000 {
      svc
        .get_or_create(&exp, &VisitorIdentity::anonymous(format!("visitor-{i}")))
        .await
        .unwrap();
    }
    let stats = svc.compute_stats("bar-42").await.unwrap();
    assert_eq!(stats.total_visitors, 1000);
    for v in &stats.variants {
      assert!((475..=525).contains(&v.unique_visitors), "{}: {}", v.variant_id, v.unique_visitors);
    }
  }

  // ── Events ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn oversized_batch_is_rejected_whole() {
    let svc = service();
    let batch = (0..51).map(|i| impression(&format!("v{i}"))).collect();
    let err = svc.record_batch(batch).await.unwrap_err();
    assert!(matches!(err, Error::BatchTooLarge { size: 51, max: 50 }));
    assert!(svc.store().events().is_empty());
  }

  #[tokio::test]
  async fn malformed_events_are_rejected_individually() {
    let svc = service();
    let batch = vec![
      impression("v1"),
      raw(r#"{"event_type":"click"}"#),
      raw(r#"{"experiment_id":"bar-42","event_type":"wiggle"}"#),
      raw(r#"{"experiment_id":"bar-42","visitor_id":"v1","event_type":"cta"}"#),
    ];
    let o = svc.record_batch(batch).await.unwrap();
    assert_eq!(o.accepted, 2);
    assert_eq!(o.rejected, 2);
    assert_eq!(svc.store().events().len(), 2);
  }

  #[tokio::test]
  async fn repeat_impressions_within_window_are_suppressed() {
    let svc = service();
    let t0 = Utc::now();

    let o = svc.record_batch_at(vec![impression("v1")], t0).await.unwrap();
    assert_eq!(o.stored(), 1);

    let o = svc
      .record_batch_at(vec![impression("v1")], t0 + Duration::minutes(4))
      .await
      .unwrap();
    assert_eq!(o.accepted, 1);
    assert_eq!(o.suppressed, 1);
    assert_eq!(svc.store().events().len(), 1);

    let o = svc
      .record_batch_at(vec![impression("v1")], t0 + Duration::minutes(6))
      .await
      .unwrap();
    assert_eq!(o.stored(), 1);
    assert_eq!(svc.store().events().len(), 2);
  }

  #[tokio::test]
  async fn duplicate_impressions_in_one_batch_store_one_row() {
    let svc = service();
    let o = svc.record_batch(vec![impression("v1"), impression("v1")]).await.unwrap();
    assert_eq!(o.accepted, 2);
    assert_eq!(o.suppressed, 1);
    assert_eq!(svc.store().events().len(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_batches_store_one_impression() {
    let svc = Arc::new(service());
    let t0 = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..16 {
      let svc = svc.clone();
      handles.push(tokio::spawn(async move {
        svc.record_batch_at(vec![impression("tab")], t0).await.unwrap()
      }));
    }
    for h in handles {
      assert_eq!(h.await.unwrap().accepted, 1);
    }
    assert_eq!(svc.store().events().len(), 1);
  }

  #[tokio::test]
  async fn session_cap_drops_repeat_events() {
    let svc = service();
    let click = |session: &str| {
      raw(&format!(
        r#"{{"experiment_id":"bar-42","variant_id":"A","visitor_id":"v1","event_type":"click","session_id":"{session}"}}"#
      ))
    };
    let o = svc.record_batch(vec![click("s1"), click("s1"), click("s2")]).await.unwrap();
    assert_eq!(o.accepted, 2);
    assert_eq!(o.duplicates, 1);
  }

  // ── Analysis ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn stats_for_unknown_experiment_is_not_found() {
    let svc = service();
    assert!(matches!(
      svc.compute_stats("ghost").await,
      Err(Error::ExperimentNotFound(_))
    ));
  }

  #[tokio::test]
  async fn end_to_end_winner() {
    let svc = service();
    svc
      .put_experiment(Experiment::new(
        "bar-42",
        vec![Variant::new("control", 50.0), Variant::new("B", 50.0)],
      ))
      .await
      .unwrap();

    let t0 = Utc::now();
    let event = |variant: &str, visitor: usize, kind: &str| {
      raw(&format!(
        r#"{{"experiment_id":"bar-42","variant_id":"{variant}","visitor_id":"u{visitor}","event_type":"{kind}"}}"#
      ))
    };
    for (variant, conversions) in [("control", 100), ("B", 140)] {
      let mut all = Vec::new();
      for i in 0..1000 {
        all.push(event(variant, i, "impression"));
        if i < conversions {
          all.push(event(variant, i, "conversion"));
        }
      }
      for batch in all.chunks(50) {
        svc.record_batch_at(batch.to_vec(), t0).await.unwrap();
      }
    }

    let stats = svc.compute_stats("bar-42").await.unwrap();
    assert_eq!(stats.variants[0].variant_id, "control");
    assert_eq!(stats.variants[0].impressions, 1000);
    assert_eq!(stats.variants[0].conversion_rate, 10.0);
    assert_eq!(stats.variants[1].conversion_rate, 14.0);

    let report = svc.determine_winner("bar-42").await.unwrap();
    assert_eq!(report.winner.as_deref(), Some("B"));
    assert_eq!(report.improvement, 40.0);
  }
}
