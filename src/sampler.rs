//! Random sampling of grid fields.
//!
//! Draws are uniform with replacement from a seedable SplitMix64 stream, so
//! a run with a fixed `--seed` is reproducible regardless of how many
//! evaluation tasks run in parallel.

use crate::constants::MIN_VALID_FRACTION;
use crate::models::{GridField, SampleSize};
use tracing::warn;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;

fn splitmix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(MIX_CONST1);
    z = (z ^ (z >> 27)).wrapping_mul(MIX_CONST2);
    z ^ (z >> 31)
}

/// Counter-based SplitMix64 generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    /// Independent stream for the `ordinal`-th task of a run
    #[must_use]
    pub fn for_task(run_seed: u64, ordinal: u64) -> Self {
        Self::new(splitmix64(run_seed ^ ordinal.wrapping_mul(GOLDEN_GAMMA)))
    }

    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }

    /// Uniform integer in `0..upper_bound`; `upper_bound` must be non-zero
    pub fn bounded(&mut self, upper_bound: usize) -> usize {
        let upper_bound = upper_bound as u64;
        let threshold = u64::MAX - u64::MAX % upper_bound;

        loop {
            let candidate = self.next_u64();
            if candidate < threshold {
                return (candidate % upper_bound) as usize;
            }
        }
    }
}

/// How masked grid points are treated when drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Draw from valid values only
    Remove,
    /// Draw from all values; masked draws stay masked
    Keep,
}

/// Per-field sampling result
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Drawn(GridField),
    Refused { parameter: String, reason: String },
}

/// Draw a sample from every field
pub fn sample(
    fields: Vec<GridField>,
    size: SampleSize,
    policy: MissingPolicy,
    rng: &mut DeterministicRng,
) -> Vec<SampleOutcome> {
    fields
        .into_iter()
        .map(|field| sample_field(field, size, policy, rng))
        .collect()
}

fn sample_field(
    field: GridField,
    size: SampleSize,
    policy: MissingPolicy,
    rng: &mut DeterministicRng,
) -> SampleOutcome {
    let pool: Vec<Option<f64>> = match policy {
        MissingPolicy::Remove => {
            if field.is_empty() {
                return refuse(field, "All elements of grid are missing".to_string());
            }
            let valid: Vec<Option<f64>> = field.valid_values().map(Some).collect();
            let fraction = valid.len() as f64 / field.len() as f64;
            if valid.is_empty() || fraction < MIN_VALID_FRACTION {
                return refuse(
                    field,
                    format!(
                        "{:.1}% of grid elements are missing, cannot generate a sample",
                        100.0 * (1.0 - fraction)
                    ),
                );
            }
            valid
        }
        MissingPolicy::Keep => field.values.clone(),
    };

    let count = size.resolve(pool.len());
    if count == 0 || pool.is_empty() {
        return refuse(field, "Sample size resolves to zero elements".to_string());
    }

    let values = (0..count).map(|_| pool[rng.bounded(pool.len())]).collect();
    SampleOutcome::Drawn(GridField { values, ..field })
}

fn refuse(field: GridField, reason: String) -> SampleOutcome {
    warn!("{}: {}", field.parameter, reason);
    SampleOutcome::Refused {
        parameter: field.parameter,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn field(values: Vec<Option<f64>>) -> GridField {
        let time = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        GridField {
            parameter: "t2".to_string(),
            values,
            analysis_time: time,
            forecast_time: time,
        }
    }

    fn drawn(outcome: &SampleOutcome) -> &GridField {
        match outcome {
            SampleOutcome::Drawn(field) => field,
            SampleOutcome::Refused { reason, .. } => panic!("refused: {reason}"),
        }
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert_ne!(
            DeterministicRng::for_task(42, 0).next_u64(),
            DeterministicRng::for_task(42, 1).next_u64()
        );
    }

    #[test]
    fn test_bounded_stays_in_range() {
        let mut rng = DeterministicRng::new(7);
        for _ in 0..1000 {
            assert!(rng.bounded(3) < 3);
        }
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut rng = DeterministicRng::new(1);
        assert!(sample(vec![], SampleSize::Absolute(10), MissingPolicy::Remove, &mut rng).is_empty());
    }

    #[test]
    fn test_remove_missing_draws_only_valid_values() {
        let mut rng = DeterministicRng::new(1);
        let values = vec![Some(1.0), None, Some(2.0), Some(3.0)];
        let out = sample(vec![field(values)], SampleSize::Absolute(50), MissingPolicy::Remove, &mut rng);

        let sampled = drawn(&out[0]);
        assert_eq!(sampled.len(), 50);
        assert_eq!(sampled.valid_count(), 50);
    }

    #[test]
    fn test_remove_missing_refuses_sparse_field() {
        let mut rng = DeterministicRng::new(1);
        let values = vec![Some(1.0), None, None, None, None];
        let out = sample(vec![field(values)], SampleSize::Absolute(5), MissingPolicy::Remove, &mut rng);
        assert!(matches!(out[0], SampleOutcome::Refused { .. }));

        let out = sample(vec![field(vec![])], SampleSize::Absolute(5), MissingPolicy::Remove, &mut rng);
        assert!(matches!(out[0], SampleOutcome::Refused { .. }));
    }

    #[test]
    fn test_remove_missing_accepts_exactly_forty_percent() {
        let mut rng = DeterministicRng::new(1);
        let values = vec![Some(1.0), Some(2.0), None, None, None];
        let out = sample(vec![field(values)], SampleSize::Absolute(5), MissingPolicy::Remove, &mut rng);
        assert!(matches!(out[0], SampleOutcome::Drawn(_)));
    }

    #[test]
    fn test_keep_missing_preserves_mask() {
        let mut rng = DeterministicRng::new(3);
        let values = vec![None, None, None, None];
        let out = sample(vec![field(values)], SampleSize::Absolute(20), MissingPolicy::Keep, &mut rng);
        let sampled = drawn(&out[0]);
        assert_eq!(sampled.len(), 20);
        assert_eq!(sampled.valid_count(), 0);
    }

    #[test]
    fn test_percentage_size_uses_policy_denominator() {
        let mut rng = DeterministicRng::new(3);
        let mut values = vec![Some(1.0); 60];
        values.extend(vec![None; 40]);

        let out = sample(
            vec![field(values.clone())],
            SampleSize::Percentage(10.0),
            MissingPolicy::Remove,
            &mut rng,
        );
        assert_eq!(drawn(&out[0]).len(), 6);

        let out = sample(vec![field(values)], SampleSize::Percentage(10.0), MissingPolicy::Keep, &mut rng);
        assert_eq!(drawn(&out[0]).len(), 10);
    }

    #[test]
    fn test_zero_size_is_refused() {
        let mut rng = DeterministicRng::new(3);
        let out = sample(
            vec![field(vec![Some(1.0); 5])],
            SampleSize::Percentage(10.0),
            MissingPolicy::Remove,
            &mut rng,
        );
        assert!(matches!(out[0], SampleOutcome::Refused { .. }));
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let values: Vec<Option<f64>> = (0..100).map(|v| Some(v as f64)).collect();
        let run = |seed| {
            let mut rng = DeterministicRng::new(seed);
            sample(vec![field(values.clone())], SampleSize::Absolute(10), MissingPolicy::Remove, &mut rng)
        };
        assert_eq!(run(9), run(9));
    }
}
