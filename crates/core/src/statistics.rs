//! Reduction of many stage timings into minimum, mean, median and maximum.
//!
//! Every statistic is computed independently per stage: the synthetic
//! "minimum" timing can combine the fastest registration of one run with the
//! fastest unit completion of another. It is a trend indicator, not a
//! claim that any single run achieved all of its values at once.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::stages::{Stage, StageTiming};

/// Statistical summary over a batch of stage timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    /// What was measured, e.g. `"buildrun"` or `"build"`.
    pub entity_type: String,
    /// Number of timings the summary was computed from.
    pub count: usize,
    pub minimum: StageTiming,
    pub maximum: StageTiming,
    pub mean: StageTiming,
    pub median: StageTiming,
}

/// One [`ResultSet`] per tested parallelism level, in ascending level order.
pub type SeriesResult = Vec<ResultSet>;

/// Aggregate `timings` into a [`ResultSet`].
///
/// Inputs that lack a stage are skipped for that stage only. An empty input
/// is rejected with [`CoreError::EmptyAggregation`].
pub fn aggregate(timings: &[StageTiming], entity_type: &str) -> Result<ResultSet, CoreError> {
    if timings.is_empty() {
        return Err(CoreError::EmptyAggregation {
            entity_type: entity_type.to_string(),
        });
    }

    let mut per_stage: BTreeMap<Stage, Vec<Duration>> = BTreeMap::new();
    for timing in timings {
        for (stage, duration) in timing.iter() {
            per_stage.entry(stage).or_default().push(duration);
        }
    }

    let mut result = ResultSet {
        entity_type: entity_type.to_string(),
        count: timings.len(),
        minimum: StageTiming::new(),
        maximum: StageTiming::new(),
        mean: StageTiming::new(),
        median: StageTiming::new(),
    };

    for (stage, mut values) in per_stage {
        values.sort_unstable();

        let (Some(min), Some(max)) = (values.first().copied(), values.last().copied()) else {
            continue;
        };

        result.minimum.insert(stage, min);
        result.maximum.insert(stage, max);
        result.mean.insert(stage, mean(&values));
        result.median.insert(stage, median(&values));
    }

    Ok(result)
}

/// Arithmetic mean of a non-empty slice, summed in nanoseconds so neither the
/// total nor the count can overflow.
fn mean(values: &[Duration]) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let total: u128 = values.iter().map(Duration::as_nanos).sum();
    let mean = total / values.len() as u128;
    // The mean never exceeds the largest value, so the seconds fit.
    let secs = u64::try_from(mean / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (mean % NANOS_PER_SEC) as u32)
}

/// Median of a non-empty, ascending slice.
///
/// Odd length picks the middle element, even length averages the two
/// middle elements.
fn median(sorted: &[Duration]) -> Duration {
    let len = sorted.len();
    if len % 2 == 0 {
        let (low, high) = (sorted[len / 2 - 1], sorted[len / 2]);
        low + (high - low) / 2
    } else {
        sorted[len / 2]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    /// One timing per factor, stages scaled by 1, 10 and 100.
    fn scaled(factors: &[u64]) -> Vec<StageTiming> {
        factors
            .iter()
            .map(|f| {
                [
                    (Stage::RegistrationTime, secs(*f)),
                    (Stage::RunCompletionTime, secs(f * 10)),
                    (Stage::UnitCompletionTime, secs(f * 100)),
                ]
                .into_iter()
                .collect()
            })
            .collect()
    }

    #[test]
    fn odd_length_input() {
        let rs = aggregate(&scaled(&[1, 5, 12]), "buildrun").unwrap();

        assert_eq!(rs.entity_type, "buildrun");
        assert_eq!(rs.count, 3);
        assert_eq!(rs.minimum.get(Stage::RegistrationTime), Some(secs(1)));
        assert_eq!(rs.maximum.get(Stage::RegistrationTime), Some(secs(12)));
        assert_eq!(rs.mean.get(Stage::RegistrationTime), Some(secs(6)));
        assert_eq!(rs.median.get(Stage::RegistrationTime), Some(secs(5)));
        assert_eq!(rs.median.get(Stage::RunCompletionTime), Some(secs(50)));
        assert_eq!(rs.median.get(Stage::UnitCompletionTime), Some(secs(500)));
    }

    #[test]
    fn even_length_input_averages_middle_values() {
        let rs = aggregate(&scaled(&[1, 2, 4, 9]), "buildrun").unwrap();

        assert_eq!(rs.count, 4);
        assert_eq!(rs.minimum.get(Stage::RegistrationTime), Some(secs(1)));
        assert_eq!(rs.maximum.get(Stage::RegistrationTime), Some(secs(9)));
        assert_eq!(rs.mean.get(Stage::RegistrationTime), Some(secs(4)));
        assert_eq!(rs.median.get(Stage::RegistrationTime), Some(secs(3)));
        assert_eq!(rs.median.get(Stage::UnitCompletionTime), Some(secs(300)));
    }

    /// Durations whose sum overflows `Duration` still average correctly.
    #[test]
    fn huge_durations_do_not_overflow() {
        let input: Vec<StageTiming> = [Duration::MAX, Duration::MAX - secs(2)]
            .into_iter()
            .map(|d| [(Stage::RunCompletionTime, d)].into_iter().collect())
            .collect();

        let rs = aggregate(&input, "buildrun").unwrap();

        assert_eq!(rs.mean.get(Stage::RunCompletionTime), Some(Duration::MAX - secs(1)));
        assert_eq!(rs.median.get(Stage::RunCompletionTime), Some(Duration::MAX - secs(1)));
    }

    #[test]
    fn mean_keeps_sub_second_precision() {
        let input: Vec<StageTiming> = [1, 2]
            .into_iter()
            .map(|ms| {
                [(Stage::RegistrationTime, Duration::from_millis(ms))]
                    .into_iter()
                    .collect()
            })
            .collect();

        let rs = aggregate(&input, "build").unwrap();

        assert_eq!(rs.mean.get(Stage::RegistrationTime), Some(Duration::from_micros(1500)));
        assert_eq!(rs.median.get(Stage::RegistrationTime), Some(Duration::from_micros(1500)));
    }

    #[test]
    fn single_input_is_its_own_summary() {
        let input = scaled(&[7]);
        let rs = aggregate(&input, "build").unwrap();
        assert_eq!(rs.minimum, input[0]);
        assert_eq!(rs.maximum, input[0]);
        assert_eq!(rs.mean, input[0]);
        assert_eq!(rs.median, input[0]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_matches!(
            aggregate(&[], "buildrun"),
            Err(CoreError::EmptyAggregation { entity_type }) if entity_type == "buildrun"
        );
    }

    #[test]
    fn input_order_does_not_matter() {
        let forward = scaled(&[3, 1, 8, 5, 2]);
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(2);

        let expected = aggregate(&forward, "buildrun").unwrap();
        assert_eq!(aggregate(&reversed, "buildrun").unwrap(), expected);
        assert_eq!(aggregate(&rotated, "buildrun").unwrap(), expected);
    }

    #[test]
    fn stages_are_reduced_independently() {
        let a: StageTiming = [
            (Stage::RegistrationTime, secs(1)),
            (Stage::UnitCompletionTime, secs(90)),
        ]
        .into_iter()
        .collect();
        let b: StageTiming = [
            (Stage::RegistrationTime, secs(4)),
            (Stage::UnitCompletionTime, secs(30)),
        ]
        .into_iter()
        .collect();

        let rs = aggregate(&[a, b], "buildrun").unwrap();
        assert_eq!(rs.minimum.get(Stage::RegistrationTime), Some(secs(1)));
        assert_eq!(rs.minimum.get(Stage::UnitCompletionTime), Some(secs(30)));
    }

    #[test]
    fn missing_stage_is_skipped_for_that_stage_only() {
        let mut timings = scaled(&[2, 4, 6]);
        let partial: StageTiming = [(Stage::RegistrationTime, secs(100))].into_iter().collect();
        timings.push(partial);

        let rs = aggregate(&timings, "buildrun").unwrap();
        assert_eq!(rs.count, 4);

        // Present in all four inputs.
        assert_eq!(rs.median.get(Stage::RegistrationTime), Some(secs(5)));
        assert_eq!(rs.maximum.get(Stage::RegistrationTime), Some(secs(100)));

        // Present in three inputs only.
        assert_eq!(rs.mean.get(Stage::UnitCompletionTime), Some(secs(400)));
        assert_eq!(rs.median.get(Stage::UnitCompletionTime), Some(secs(400)));
        assert_eq!(rs.minimum.get(Stage::UnitCompletionTime), Some(secs(200)));
    }

    #[test]
    fn summary_values_stay_within_bounds() {
        let timings = scaled(&[13, 2, 2, 40, 7, 1, 19, 3]);
        let rs = aggregate(&timings, "buildrun").unwrap();

        for stage in rs.minimum.stages() {
            let min = rs.minimum.get(stage).unwrap();
            let max = rs.maximum.get(stage).unwrap();
            let mean = rs.mean.get(stage).unwrap();
            let median = rs.median.get(stage).unwrap();
            assert!(min <= median && median <= max, "{stage}: median out of bounds");
            assert!(min <= mean && mean <= max, "{stage}: mean out of bounds");
        }
    }

    #[test]
    fn sub_second_median_is_exact() {
        let timings: Vec<StageTiming> = [100u64, 300]
            .iter()
            .map(|ms| [(Stage::RunControlTime, Duration::from_millis(*ms))].into_iter().collect())
            .collect();
        let rs = aggregate(&timings, "buildrun").unwrap();
        assert_eq!(rs.median.get(Stage::RunControlTime), Some(Duration::from_millis(200)));
    }
}
