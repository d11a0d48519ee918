//! Bucket Assignment Engine: a pure, deterministic mapping from
//! `(experiment, visitor)` to a variant.
//!
//! The hash is CRC32 (IEEE) over `"{experiment_id}_{visitor_id}"`, reduced to
//! a percentile in `[0, 100)`. Keeping CRC32 means assignments computed here
//! match those already issued for running experiments, and any lost
//! assignment row can be recomputed losslessly.

use crate::{Error, Result, experiment::Variant};

/// Round to two decimal places.
pub(crate) fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

/// Rescale weights so they span exactly `0..100`.
///
/// Weights that already sum to 100 are returned unchanged; otherwise each is
/// rescaled to `weight / sum * 100`, rounded to two decimals. Negative weights
/// count as zero.
pub fn normalize_weights(variants: &[Variant]) -> Result<Vec<f64>> {
  let weights: Vec<f64> = variants.iter().map(|v| v.traffic_weight.max(0.0)).collect();
  let sum: f64 = weights.iter().sum();

  if sum <= 0.0 {
    return Err(Error::NoTrafficConfigured);
  }
  if (sum - 100.0).abs() < 1e-9 {
    return Ok(weights);
  }
  Ok(weights.into_iter().map(|w| round2(w / sum * 100.0)).collect())
}

/// The raw 32-bit bucketing hash for a visitor in an experiment.
pub fn bucket_hash(experiment_id: &str, visitor_id: &str) -> u32 {
  crc32fast::hash(format!("{experiment_id}_{visitor_id}").as_bytes())
}

/// The visitor's percentile in `[0, 100)`.
pub fn percentile(experiment_id: &str, visitor_id: &str) -> u32 {
  bucket_hash(experiment_id, visitor_id) % 100
}

/// Pick the variant for `visitor_id`.
///
/// Returns `Ok(None)` for an empty variant list and
/// [`Error::NoTrafficConfigured`] when every weight is zero. If rounding
/// leaves the percentile beyond the last cumulative bound, the first variant
/// is chosen.
pub fn assign<'a>(
  experiment_id: &str,
  visitor_id: &str,
  variants: &'a [Variant],
) -> Result<Option<&'a Variant>> {
  if variants.is_empty() {
    return Ok(None);
  }

  let weights = normalize_weights(variants)?;
  let point = f64::from(percentile(experiment_id, visitor_id));

  let mut cumulative = 0.0;
  for (variant, weight) in variants.iter().zip(weights) {
    cumulative += weight;
    if point < cumulative {
      return Ok(Some(variant));
    }
  }

  Ok(variants.first())
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn variants(weights: &[f64]) -> Vec<Variant> {
    weights
      .iter()
      .enumerate()
      .map(|(i, w)| Variant::new(format!("v{i}"), *w))
      .collect()
  }

  #[test]
  fn hash_is_crc32_of_joined_key() {
    // crc32("exp_visitor") as computed by any IEEE CRC32 implementation.
    assert_eq!(bucket_hash("exp", "visitor"), crc32fast::hash(b"exp_visitor"));
    assert_eq!(bucket_hash("12", "abc"), 0xfc0e_1969);
    assert_eq!(percentile("12", "abc"), 41);
  }

  #[test]
  fn weights_summing_to_100_are_untouched() {
    let w = normalize_weights(&variants(&[30.0, 70.0])).unwrap();
    assert_eq!(w, vec![30.0, 70.0]);
  }

  #[test]
  fn weights_are_rescaled() {
    let w = normalize_weights(&variants(&[1.0, 1.0, 1.0])).unwrap();
    assert_eq!(w, vec![33.33, 33.33, 33.33]);

    let w = normalize_weights(&variants(&[10.0, 30.0])).unwrap();
    assert_eq!(w, vec![25.0, 75.0]);
  }

  #[test]
  fn zero_sum_is_no_traffic() {
    assert!(matches!(
      normalize_weights(&variants(&[0.0, 0.0])),
      Err(Error::NoTrafficConfigured)
    ));
    assert!(matches!(
      assign("e", "v", &variants(&[0.0])),
      Err(Error::NoTrafficConfigured)
    ));
  }

  #[test]
  fn empty_variant_list_assigns_nothing() {
    assert!(assign("e", "v", &[]).unwrap().is_none());
  }

  #[test]
  fn full_weight_variant_always_wins() {
    let vs = variants(&[0.0, 100.0, 0.0]);
    for i in 0..200 {
      let v = assign("exp", &format!("visitor-{i}"), &vs).unwrap().unwrap();
      assert_eq!(v.id, "v1");
    }
  }

  #[test]
  fn percentile_on_a_boundary_goes_to_the_next_variant() {
    let p = percentile("exp", "visitor-7");
    assert_eq!(p, 52);

    // Upper bounds are exclusive: A covers [0, 52), so 52 falls through to B.
    let vs = vec![Variant::new("A", 52.0), Variant::new("B", 48.0)];
    assert_eq!(assign("exp", "visitor-7", &vs).unwrap().unwrap().id, "B");

    let vs = vec![Variant::new("A", 53.0), Variant::new("B", 47.0)];
    assert_eq!(assign("exp", "visitor-7", &vs).unwrap().unwrap().id, "A");
  }

  #[test]
  fn split_is_close_to_configured_weights() {
    let vs = vec![Variant::new("A", 50.0), Variant::new("B", 50.0)];
    let mut a = 0;
    let mut b = 0;
    for i in 0..1000 {
      match assign("bar-42", &format!("visitor-{i}"), &vs).unwrap().unwrap().id.as_str() {
        "A" => a += 1,
        _ => b += 1,
      }
    }
    assert!((475..=525).contains(&a), "A got {a}");
    assert!((475..=525).contains(&b), "B got {b}");
  }

  proptest! {
    #[test]
    fn assignment_is_deterministic(
      exp in "[a-z0-9-]{1,16}",
      visitor in "[a-zA-Z0-9]{1,40}",
      weights in prop::collection::vec(0.0f64..=100.0, 1..6),
    ) {
      let vs = variants(&weights);
      let first = assign(&exp, &visitor, &vs).map(|v| v.map(|v| v.id.clone()));
      let second = assign(&exp, &visitor, &vs).map(|v| v.map(|v| v.id.clone()));
      match (first, second) {
        (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
        (Err(Error::NoTrafficConfigured), Err(Error::NoTrafficConfigured)) => {}
        _ => prop_assert!(false, "non-deterministic outcome"),
      }
    }

    #[test]
    fn normalized_weights_sum_to_100(
      weights in prop::collection::vec(0.0f64..=100.0, 1..8),
    ) {
      let vs = variants(&weights);
      if weights.iter().sum::<f64>() > 0.0 {
        let normalized = normalize_weights(&vs).unwrap();
        let total: f64 = normalized.iter().sum();
        // Each weight carries at most 0.005 of rounding error.
        prop_assert!((total - 100.0).abs() <= 0.005 * weights.len() as f64 + 1e-9);
      }
    }

    #[test]
    fn percentile_is_in_range(exp in ".{0,20}", visitor in ".{0,40}") {
      prop_assert!(percentile(&exp, &visitor) < 100);
    }
  }
}
