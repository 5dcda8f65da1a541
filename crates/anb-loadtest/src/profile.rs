//! Staged concurrency ramp
//!
//! A [`LoadProfile`] is an ordered list of [`LoadStage`]s whose target
//! concurrency never decreases. Concurrency starts at zero and jumps to each
//! stage's target when the stage begins.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};

/// A window during which the runner holds a fixed number of virtual users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStage {
    /// How long the stage lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Concurrent virtual users during the stage
    pub target_concurrency: u64,
}

/// Monotonic ramp of load stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProfile {
    stages: Vec<LoadStage>,
}

impl LoadProfile {
    /// Build the staircase ramp: stage `i` (1-indexed) targets `i * vus_increment`.
    ///
    /// `total_steps == 0` yields an empty profile that generates no load.
    pub fn staged(total_steps: u64, vus_increment: u64, step_duration: Duration) -> Result<Self> {
        if vus_increment == 0 {
            return Err(LoadTestError::InvalidProfile(
                "concurrency increment must be a positive integer".to_string(),
            ));
        }
        if total_steps > 0 && step_duration.is_zero() {
            return Err(LoadTestError::InvalidProfile(
                "step duration must be greater than zero".to_string(),
            ));
        }

        let stages = (1..=total_steps)
            .map(|step| {
                step.checked_mul(vus_increment)
                    .map(|target_concurrency| LoadStage {
                        duration: step_duration,
                        target_concurrency,
                    })
                    .ok_or_else(|| {
                        LoadTestError::InvalidProfile(format!(
                            "stage {} overflows: {} x {}",
                            step, step, vus_increment
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[LoadStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest concurrency the profile reaches (0 for an empty profile)
    pub fn peak_concurrency(&self) -> u64 {
        self.stages
            .last()
            .map(|s| s.target_concurrency)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_staged_profile_shape() {
        let profile = LoadProfile::staged(3, 5, Duration::from_secs(10)).unwrap();
        let targets: Vec<u64> = profile.stages().iter().map(|s| s.target_concurrency).collect();
        assert_eq!(targets, vec![5, 10, 15]);
        assert_eq!(profile.total_duration(), Duration::from_secs(30));
        assert_eq!(profile.peak_concurrency(), 15);
    }

    #[test]
    fn test_zero_steps_is_empty_not_error() {
        let profile = LoadProfile::staged(0, 5, Duration::from_secs(10)).unwrap();
        assert!(profile.is_empty());
        assert_eq!(profile.peak_concurrency(), 0);
        assert_eq!(profile.total_duration(), Duration::ZERO);
    }

    #[test]
    fn test_zero_increment_fails_fast() {
        let result = LoadProfile::staged(3, 0, Duration::from_secs(10));
        assert!(matches!(result, Err(LoadTestError::InvalidProfile(_))));
        assert!(result.unwrap_err().is_fatal());
    }

    #[test]
    fn test_zero_step_duration_rejected() {
        assert!(LoadProfile::staged(2, 5, Duration::ZERO).is_err());
    }

    #[test]
    fn test_overflow_rejected() {
        assert!(LoadProfile::staged(3, u64::MAX, Duration::from_secs(1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_staged_profile_is_exact_and_monotonic(
            steps in 0u64..200,
            increment in 1u64..10_000,
            secs in 1u64..600,
        ) {
            let step_duration = Duration::from_secs(secs);
            let profile = LoadProfile::staged(steps, increment, step_duration).unwrap();

            prop_assert_eq!(profile.len() as u64, steps);
            for (i, stage) in profile.stages().iter().enumerate() {
                prop_assert_eq!(stage.duration, step_duration);
                prop_assert_eq!(stage.target_concurrency, (i as u64 + 1) * increment);
            }
            for pair in profile.stages().windows(2) {
                prop_assert!(pair[0].target_concurrency <= pair[1].target_concurrency);
            }
        }
    }
}
