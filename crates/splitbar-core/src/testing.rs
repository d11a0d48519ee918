//! In-memory test doubles for [`ExperimentStore`].

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  convert::Infallible,
  sync::Mutex,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
  assignment::{Assignment, AssignmentKey, NewAssignment},
  event::{Event, EventType, Recorded},
  experiment::Experiment,
  identity::VisitorKind,
  stats::{ExperimentTally, VariantTally},
  store::ExperimentStore,
};

#[derive(Default)]
struct Inner {
  experiments: BTreeMap<String, Experiment>,
  assignments: HashMap<AssignmentKey, Assignment>,
  events:      Vec<Event>,
}

/// A mutex-guarded store whose every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn events(&self) -> Vec<Event> { self.inner.lock().unwrap().events.clone() }
}

fn touch(a: &mut Assignment, at: DateTime<Utc>) {
  a.last_seen_at = a.last_seen_at.max(at);
  a.seen_count += 1;
}

impl ExperimentStore for MemoryStore {
  type Error = Infallible;

  async fn put_experiment(&self, experiment: Experiment) -> Result<Experiment, Infallible> {
    let mut inner = self.inner.lock().unwrap();
    inner.experiments.insert(experiment.experiment_id.clone(), experiment.clone());
    Ok(experiment)
  }

  async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>, Infallible> {
    Ok(self.inner.lock().unwrap().experiments.get(experiment_id).cloned())
  }

  async fn list_experiments(&self) -> Result<Vec<Experiment>, Infallible> {
    Ok(self.inner.lock().unwrap().experiments.values().cloned().collect())
  }

  async fn touch_assignment(
    &self,
    key: &AssignmentKey,
    seen_at: DateTime<Utc>,
  ) -> Result<Option<Assignment>, Infallible> {
    let mut inner = self.inner.lock().unwrap();
    Ok(inner.assignments.get_mut(key).map(|a| {
      touch(a, seen_at);
      a.clone()
    }))
  }

  async fn upsert_assignment(&self, new: NewAssignment) -> Result<Assignment, Infallible> {
    let mut inner = self.inner.lock().unwrap();
    let row = inner
      .assignments
      .entry(new.key.clone())
      .and_modify(|a| touch(a, new.at))
      .or_insert_with(|| Assignment {
        key:          new.key,
        variant_id:   new.variant_id,
        assigned_at:  new.at,
        last_seen_at: new.at,
        seen_count:   1,
      });
    Ok(row.clone())
  }

  async fn get_assignment(&self, key: &AssignmentKey) -> Result<Option<Assignment>, Infallible> {
    Ok(self.inner.lock().unwrap().assignments.get(key).cloned())
  }

  async fn append_event(&self, event: Event) -> Result<(), Infallible> {
    self.inner.lock().unwrap().events.push(event);
    Ok(())
  }

  async fn record_event(
    &self,
    event: Event,
    impressions_since: DateTime<Utc>,
  ) -> Result<Recorded, Infallible> {
    let mut inner = self.inner.lock().unwrap();
    let same = |e: &&Event| e.experiment_id == event.experiment_id && e.visitor_id == event.visitor_id;

    if event.event_type == EventType::Impression
      && inner.events.iter().filter(same).any(|e| {
        e.event_type == EventType::Impression
          && e.variant_id == event.variant_id
          && e.recorded_at >= impressions_since
      })
    {
      return Ok(Recorded::Suppressed);
    }
    if event.session_id.is_some()
      && inner
        .events
        .iter()
        .filter(same)
        .any(|e| e.event_type == event.event_type && e.session_id == event.session_id)
    {
      return Ok(Recorded::Duplicate);
    }

    inner.events.push(event);
    Ok(Recorded::Stored)
  }

  async fn tally(&self, experiment_id: &str) -> Result<ExperimentTally, Infallible> {
    let inner = self.inner.lock().unwrap();
    let mut per_variant: BTreeMap<String, (HashSet<(VisitorKind, &str)>, VariantTally)> =
      BTreeMap::new();
    let mut everyone = HashSet::new();

    for a in inner.assignments.values().filter(|a| a.key.experiment_id == experiment_id) {
      let entry = per_variant.entry(a.variant_id.clone()).or_default();
      let visitor = (a.key.visitor_kind, a.key.visitor_id.as_str());
      entry.0.insert(visitor);
      everyone.insert(visitor);
    }
    for e in inner.events.iter().filter(|e| e.experiment_id == experiment_id) {
      let t = &mut per_variant.entry(e.variant_id.clone()).or_default().1;
      match e.event_type {
        EventType::Impression => t.impressions += 1,
        EventType::Click => t.clicks += 1,
        EventType::Conversion => {
          t.conversions += 1;
          t.conversion_value += e.value.unwrap_or(0.0);
        }
      }
    }

    let variants = per_variant
      .into_iter()
      .map(|(id, (visitors, t))| VariantTally {
        variant_id: id,
        unique_visitors: visitors.len() as u64,
        ..t
      })
      .collect();
    Ok(ExperimentTally { variants, total_visitors: everyone.len() as u64 })
  }
}

// ─── FailingStore ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("store offline")]
pub struct Offline;

/// Serves one experiment definition and fails everything else.
pub struct FailingStore {
  experiment: Experiment,
}

impl FailingStore {
  pub fn new(experiment: Experiment) -> Self { Self { experiment } }
}

impl ExperimentStore for FailingStore {
  type Error = Offline;

  async fn put_experiment(&self, _: Experiment) -> Result<Experiment, Offline> { Err(Offline) }

  async fn get_experiment(&self, experiment_id: &str) -> Result<Option<Experiment>, Offline> {
    Ok((self.experiment.experiment_id == experiment_id).then(|| self.experiment.clone()))
  }

  async fn list_experiments(&self) -> Result<Vec<Experiment>, Offline> { Err(Offline) }

  async fn touch_assignment(
    &self,
    _: &AssignmentKey,
    _: DateTime<Utc>,
  ) -> Result<Option<Assignment>, Offline> {
    Err(Offline)
  }

  async fn upsert_assignment(&self, _: NewAssignment) -> Result<Assignment, Offline> { Err(Offline) }

  async fn get_assignment(&self, _: &AssignmentKey) -> Result<Option<Assignment>, Offline> {
    Err(Offline)
  }

  async fn append_event(&self, _: Event) -> Result<(), Offline> { Err(Offline) }

  async fn record_event(&self, _: Event, _: DateTime<Utc>) -> Result<Recorded, Offline> {
    Err(Offline)
  }

  async fn tally(&self, _: &str) -> Result<ExperimentTally, Offline> { Err(Offline) }
}
