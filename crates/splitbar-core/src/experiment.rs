//! Experiment configuration, owned by an external admin workflow and
//! read-only to the assignment and analysis paths.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, flag};

/// Variant keys that denote the control arm.
pub const CONTROL_KEYS: [&str; 2] = ["", "control"];

/// Whether `variant_id` names the control arm.
pub fn is_control(variant_id: &str) -> bool { CONTROL_KEYS.contains(&variant_id) }

// ─── Variant ─────────────────────────────────────────────────────────────────

/// One configured alternative within an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
  pub id:             String,
  /// Intended share of traffic, `0..=100`. Weights need not sum to 100;
  /// bucketing rescales them.
  pub traffic_weight: f64,
  /// Display name for admin screens; never used for bucketing.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label:          Option<String>,
}

impl Variant {
  pub fn new(id: impl Into<String>, traffic_weight: f64) -> Self {
    Self { id: id.into(), traffic_weight, label: None }
  }
}

// ─── Experiment ──────────────────────────────────────────────────────────────

/// An A/B test attached to a bar or popup. Variant order is significant:
/// bucketing walks variants in exactly this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
  pub experiment_id: String,
  #[serde(deserialize_with = "flag::deserialize_truthy", default = "enabled_default")]
  pub enabled:       bool,
  pub variants:      Vec<Variant>,
}

fn enabled_default() -> bool { true }

impl Experiment {
  pub fn new(experiment_id: impl Into<String>, variants: Vec<Variant>) -> Self {
    Self { experiment_id: experiment_id.into(), enabled: true, variants }
  }

  /// Check the invariants the admin workflow must uphold before an
  /// experiment is persisted.
  pub fn validate(&self) -> Result<()> {
    if self.experiment_id.trim().is_empty() {
      return Err(Error::InvalidExperiment("experiment id is empty".into()));
    }

    let mut seen = HashSet::new();
    for v in &self.variants {
      if !seen.insert(v.id.as_str()) {
        return Err(Error::InvalidExperiment(format!(
          "duplicate variant id {:?}",
          v.id
        )));
      }
      if !v.traffic_weight.is_finite() || !(0.0..=100.0).contains(&v.traffic_weight) {
        return Err(Error::InvalidExperiment(format!(
          "variant {:?} has traffic weight {} outside 0..=100",
          v.id, v.traffic_weight
        )));
      }
    }

    if self.variants.iter().filter(|v| is_control(&v.id)).count() > 1 {
      return Err(Error::InvalidExperiment(format!(
        "at most one control variant ({CONTROL_KEYS:?}) may be configured"
      )));
    }
    Ok(())
  }

  pub fn variant(&self, id: &str) -> Option<&Variant> {
    self.variants.iter().find(|v| v.id == id)
  }

  /// The configured control variant, if any.
  pub fn control(&self) -> Option<&Variant> {
    self.variants.iter().find(|v| is_control(&v.id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn valid_experiment_passes() {
    let e = Experiment::new("bar-12", vec![Variant::new("a", 50.0), Variant::new("b", 50.0)]);
    assert!(e.validate().is_ok());
  }

  #[test]
  fn duplicate_variant_ids_rejected() {
    let e = Experiment::new("bar-12", vec![Variant::new("a", 50.0), Variant::new("a", 50.0)]);
    assert!(matches!(e.validate(), Err(Error::InvalidExperiment(_))));
  }

  #[test]
  fn out_of_range_weight_rejected() {
    let e = Experiment::new("bar-12", vec![Variant::new("a", 120.0)]);
    assert!(matches!(e.validate(), Err(Error::InvalidExperiment(_))));

    let e = Experiment::new("bar-12", vec![Variant::new("a", -1.0)]);
    assert!(matches!(e.validate(), Err(Error::InvalidExperiment(_))));
  }

  #[test]
  fn two_control_arms_rejected() {
    let e = Experiment::new(
      "bar-12",
      vec![Variant::new("", 30.0), Variant::new("control", 30.0), Variant::new("b", 40.0)],
    );
    assert!(matches!(e.validate(), Err(Error::InvalidExperiment(_))));
  }

  #[test]
  fn empty_id_rejected() {
    let e = Experiment::new("  ", vec![]);
    assert!(matches!(e.validate(), Err(Error::InvalidExperiment(_))));
  }

  #[test]
  fn enabled_accepts_legacy_strings() {
    let e: Experiment = serde_json::from_str(
      r#"{"experiment_id":"p-3","enabled":"0","variants":[{"id":"a","traffic_weight":100}]}"#,
    )
    .unwrap();
    assert!(!e.enabled);

    let e: Experiment =
      serde_json::from_str(r#"{"experiment_id":"p-3","variants":[]}"#).unwrap();
    assert!(e.enabled);
  }

  #[test]
  fn control_detection() {
    assert!(is_control(""));
    assert!(is_control("control"));
    assert!(!is_control("b"));

    let e = Experiment::new("x", vec![Variant::new("b", 50.0), Variant::new("control", 50.0)]);
    assert_eq!(e.control().map(|v| v.id.as_str()), Some("control"));
  }
}
