//! Winner Selector.
//!
//! Every non-control variant is tested against the control arm. Comparisons
//! are oriented variant-over-control, so a positive z-score means the variant
//! converts better than control.

use serde::{Deserialize, Serialize};

use crate::{
  bucket::round2,
  stats::{ExperimentStats, Significance, VariantStats, significance},
};

/// One variant measured against control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
  pub variant:      VariantStats,
  pub significance: Significance,
  /// Relative conversion-rate lift over control, percent.
  pub improvement:  f64,
}

impl Comparison {
  /// Significant and strictly better than control.
  pub fn beats_control(&self) -> bool {
    self.significance.significant && self.significance.z_score > 0.0
  }
}

/// Outcome of [`determine_winner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerReport {
  pub experiment_id:    String,
  pub winner:           Option<String>,
  pub significant:      bool,
  /// Improvement of the winner over control; `0` when there is no winner.
  pub improvement:      f64,
  pub confidence_level: f64,
  pub control:          Option<VariantStats>,
  pub comparisons:      Vec<Comparison>,
  pub message:          String,
}

impl WinnerReport {
  fn not_enough_data(experiment_id: &str) -> Self {
    Self {
      experiment_id:    experiment_id.to_owned(),
      winner:           None,
      significant:      false,
      improvement:      0.0,
      confidence_level: 0.0,
      control:          None,
      comparisons:      Vec::new(),
      message:          "not enough data: at least two variants with stats are required".into(),
    }
  }
}

/// Relative lift of `variant` over `control`, in percent.
pub fn improvement(control: &VariantStats, variant: &VariantStats) -> f64 {
  if control.conversion_rate > 0.0 {
    round2((variant.conversion_rate - control.conversion_rate) / control.conversion_rate * 100.0)
  } else if variant.conversion_rate > 0.0 {
    100.0
  } else {
    0.0
  }
}

/// Pick the significant variant with the highest improvement over control.
pub fn determine_winner(stats: &ExperimentStats) -> WinnerReport {
  if stats.variants.len() < 2 {
    return WinnerReport::not_enough_data(&stats.experiment_id);
  }

  let control = stats.control().cloned().unwrap_or_else(|| VariantStats::empty(""));

  let comparisons: Vec<Comparison> = stats
    .variants
    .iter()
    .filter(|v| !v.is_control())
    .map(|v| Comparison {
      variant:      v.clone(),
      significance: significance(v, &control),
      improvement:  improvement(&control, v),
    })
    .collect();

  let best = comparisons
    .iter()
    .filter(|c| c.beats_control())
    .max_by(|a, b| a.improvement.total_cmp(&b.improvement));

  let (winner, improvement, confidence_level, message) = match best {
    Some(c) => (
      Some(c.variant.variant_id.clone()),
      c.improvement,
      c.significance.confidence_level,
      format!(
        "variant {:?} beats control by {:.2}% at {:.2}% confidence",
        c.variant.variant_id, c.improvement, c.significance.confidence_level
      ),
    ),
    None => (
      None,
      0.0,
      0.0,
      "no statistically significant winner yet; continue testing".to_owned(),
    ),
  };

  WinnerReport {
    experiment_id: stats.experiment_id.clone(),
    significant: winner.is_some(),
    winner,
    improvement,
    confidence_level,
    control: Some(control),
    comparisons,
    message,
  }
}
