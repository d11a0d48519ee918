//! Statistics Engine: per-variant metrics and the two-proportion z-test.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
  bucket::round2,
  experiment::{Experiment, is_control},
};

/// Minimum impressions per arm before significance is evaluated.
pub const MIN_SAMPLE_SIZE: u64 = 30;

/// Significance threshold on the two-tailed p-value.
pub const ALPHA: f64 = 0.05;

// ─── Raw aggregates ──────────────────────────────────────────────────────────

/// Raw counts for one variant, as aggregated by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantTally {
  pub variant_id:       String,
  /// Distinct visitors assigned to this variant.
  pub unique_visitors:  u64,
  pub impressions:      u64,
  pub clicks:           u64,
  pub conversions:      u64,
  /// Sum of `value` over conversion events.
  pub conversion_value: f64,
}

/// Everything the store knows about one experiment, in no particular order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentTally {
  pub variants:       Vec<VariantTally>,
  /// Distinct visitors assigned across all variants.
  pub total_visitors: u64,
}

impl VariantTally {
  fn has_activity(&self) -> bool {
    self.unique_visitors + self.impressions + self.clicks + self.conversions > 0
  }
}

// ─── Derived metrics ─────────────────────────────────────────────────────────

/// Derived metrics for one variant. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
  pub variant_id:      String,
  pub unique_visitors: u64,
  pub impressions:     u64,
  pub clicks:          u64,
  pub conversions:     u64,
  /// Percent, two decimals.
  pub ctr:             f64,
  /// Percent, two decimals.
  pub conversion_rate: f64,
  pub total_value:     f64,
}

impl VariantStats {
  /// All-zero stats for `variant_id`.
  pub fn empty(variant_id: impl Into<String>) -> Self {
    Self::from_tally(VariantTally { variant_id: variant_id.into(), ..VariantTally::default() })
  }

  pub fn from_tally(t: VariantTally) -> Self {
    let ctr = percent(t.clicks, t.impressions);
    let conversion_rate = percent(t.conversions, t.impressions);
    Self {
      variant_id: t.variant_id,
      unique_visitors: t.unique_visitors,
      impressions: t.impressions,
      clicks: t.clicks,
      conversions: t.conversions,
      ctr,
      conversion_rate,
      total_value: round2(t.conversion_value),
    }
  }

  pub fn is_control(&self) -> bool { is_control(&self.variant_id) }
}

fn percent(numerator: u64, denominator: u64) -> f64 {
  if denominator == 0 {
    0.0
  } else {
    round2(numerator as f64 / denominator as f64 * 100.0)
  }
}

/// Stats for a whole experiment; the control arm, when present, comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStats {
  pub experiment_id:  String,
  pub variants:       Vec<VariantStats>,
  pub total_visitors: u64,
}

impl ExperimentStats {
  pub fn control(&self) -> Option<&VariantStats> { self.variants.iter().find(|v| v.is_control()) }
}

/// Join the store's raw tally with the configured variant list.
///
/// Configured variants appear in configuration order. A control arm is placed
/// first: the configured one (zeroed if it has no activity), or else an
/// unconfigured `""`/`"control"` arm that has recorded activity. Other
/// unconfigured variants are ignored.
pub fn compute_stats(experiment: &Experiment, tally: ExperimentTally) -> ExperimentStats {
  let ExperimentTally { mut variants, total_visitors } = tally;

  let mut take = |id: &str| -> Option<VariantTally> {
    variants.iter().position(|t| t.variant_id == id).map(|i| variants.swap_remove(i))
  };

  let mut out = Vec::with_capacity(experiment.variants.len() + 1);

  match experiment.control() {
    Some(c) => out.push(take(&c.id).map_or_else(|| VariantStats::empty(&c.id), VariantStats::from_tally)),
    None => {
      let implicit = crate::experiment::CONTROL_KEYS
        .iter()
        .filter_map(|k| take(*k))
        .find(VariantTally::has_activity);
      if let Some(t) = implicit {
        out.push(VariantStats::from_tally(t));
      }
    }
  }

  for v in experiment.variants.iter().filter(|v| !is_control(&v.id)) {
    out.push(take(&v.id).map_or_else(|| VariantStats::empty(&v.id), VariantStats::from_tally));
  }

  ExperimentStats {
    experiment_id: experiment.experiment_id.clone(),
    variants: out,
    total_visitors,
  }
}

// ─── Significance ────────────────────────────────────────────────────────────

/// Why a comparison could not reach significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inconclusive {
  InsufficientSampleSize,
  /// An arm reports more conversions than impressions.
  ConversionsExceedImpressions,
  ZeroStandardError,
}

impl fmt::Display for Inconclusive {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InsufficientSampleSize => {
        write!(f, "insufficient sample size (need {MIN_SAMPLE_SIZE} impressions per variant)")
      }
      Self::ConversionsExceedImpressions => f.write_str("more conversions than impressions"),
      Self::ZeroStandardError => f.write_str("zero standard error"),
    }
  }
}

/// Result of a two-proportion z-test on conversion rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Significance {
  /// `(p_a - p_b) / se`.
  pub z_score:          f64,
  /// Two-tailed.
  pub p_value:          f64,
  pub significant:      bool,
  /// `(1 - p_value) * 100`, two decimals.
  pub confidence_level: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub inconclusive:     Option<Inconclusive>,
}

impl Significance {
  fn inconclusive(reason: Inconclusive) -> Self {
    Self {
      z_score:          0.0,
      p_value:          1.0,
      significant:      false,
      confidence_level: 0.0,
      inconclusive:     Some(reason),
    }
  }
}

/// Compare the conversion proportions of `a` and `b` (conversions over
/// impressions).
pub fn significance(a: &VariantStats, b: &VariantStats) -> Significance {
  if a.impressions < MIN_SAMPLE_SIZE || b.impressions < MIN_SAMPLE_SIZE {
    return Significance::inconclusive(Inconclusive::InsufficientSampleSize);
  }
  if a.conversions > a.impressions || b.conversions > b.impressions {
    return Significance::inconclusive(Inconclusive::ConversionsExceedImpressions);
  }

  let (n_a, n_b) = (a.impressions as f64, b.impressions as f64);
  let (c_a, c_b) = (a.conversions as f64, b.conversions as f64);

  let pooled = (c_a + c_b) / (n_a + n_b);
  let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();
  if se == 0.0 || !se.is_finite() {
    return Significance::inconclusive(Inconclusive::ZeroStandardError);
  }

  let z = (c_a / n_a - c_b / n_b) / se;
  let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);

  Significance {
    z_score: z,
    p_value,
    significant: p_value < ALPHA,
    confidence_level: round2((1.0 - p_value) * 100.0),
    inconclusive: None,
  }
}

/// Standard normal CDF via the Abramowitz–Stegun erf approximation (7.1.26).
pub fn normal_cdf(x: f64) -> f64 {
  const A1: f64 = 0.254829592;
  const A2: f64 = -0.284496736;
  const A3: f64 = 1.421413741;
  const A4: f64 = -1.453152027;
  const A5: f64 = 1.061405429;
  const P: f64 = 0.3275911;

  let sign = if x < 0.0 { -1.0 } else { 1.0 };
  let x = x.abs() / std::f64::consts::SQRT_2;

  let t = 1.0 / (1.0 + P * x);
  let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
  let erf = 1.0 - poly * (-x * x).exp();

  0.5 * (1.0 + sign * erf)
}
