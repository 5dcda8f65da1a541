//! Weighted scenario dispatch
//!
//! Scenarios get contiguous probability intervals in declaration order. One
//! uniform draw `r ∈ [0, 1)` selects the first interval containing `r`.

use std::collections::HashSet;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::scenarios::ScenarioKind;

/// Allowed deviation of the weight sum from 1.0
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Probability of a scenario being picked for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWeight {
    pub scenario: ScenarioKind,
    pub probability: f64,
}

impl ScenarioWeight {
    pub fn new(scenario: ScenarioKind, probability: f64) -> Self {
        Self {
            scenario,
            probability,
        }
    }
}

impl FromStr for ScenarioWeight {
    type Err = LoadTestError;

    /// Parses `scenario=probability`, e.g. `voter=0.4`
    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s.split_once('=').ok_or_else(|| {
            LoadTestError::InvalidWeights(format!("expected scenario=probability, got {:?}", s))
        })?;
        let scenario = name.trim().parse::<ScenarioKind>()?;
        let probability = value.trim().parse::<f64>().map_err(|e| {
            LoadTestError::InvalidWeights(format!("{:?} is not a probability: {}", value, e))
        })?;
        Ok(Self::new(scenario, probability))
    }
}

/// Parse a comma separated weight table such as `voter=0.4,uploader=0.3,new-registrant=0.3`
pub fn parse_weights(s: &str) -> Result<Vec<ScenarioWeight>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Reject empty tables, negative or non-finite weights, duplicates and sums other than 1
pub fn validate_weights(weights: &[ScenarioWeight]) -> Result<()> {
    let mut seen = HashSet::new();
    for weight in weights {
        if !seen.insert(weight.scenario) {
            return Err(LoadTestError::InvalidWeights(format!(
                "scenario {} listed more than once",
                weight.scenario
            )));
        }
    }
    check_probabilities(weights.iter().map(|w| (w.scenario.to_string(), w.probability)))
}

fn check_probabilities(entries: impl Iterator<Item = (String, f64)>) -> Result<()> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (label, p) in entries {
        if !p.is_finite() || p < 0.0 {
            return Err(LoadTestError::InvalidWeights(format!(
                "{} has invalid probability {}",
                label, p
            )));
        }
        sum += p;
        count += 1;
    }
    if count == 0 {
        return Err(LoadTestError::InvalidWeights(
            "weight table is empty".to_string(),
        ));
    }
    if (sum - 1.0).abs() > WEIGHT_EPSILON {
        return Err(LoadTestError::InvalidWeights(format!(
            "probabilities sum to {}, expected 1.0",
            sum
        )));
    }
    Ok(())
}

/// Maps a uniform draw onto weighted handles
#[derive(Debug, Clone)]
pub struct WeightedDispatcher<T> {
    /// Handles with the cumulative upper bound of their interval
    entries: Vec<(T, f64)>,
    /// Index returned when rounding leaves `r` past the last bound
    fallback: usize,
}

impl<T> WeightedDispatcher<T> {
    /// Build from `(handle, probability)` pairs in declaration order
    pub fn new(weighted: Vec<(T, f64)>) -> Result<Self> {
        check_probabilities(
            weighted
                .iter()
                .enumerate()
                .map(|(i, (_, p))| (format!("entry {}", i), *p)),
        )?;

        let fallback = weighted
            .iter()
            .rposition(|(_, p)| *p > 0.0)
            .unwrap_or(weighted.len() - 1);

        let mut cumulative = 0.0;
        let entries = weighted
            .into_iter()
            .map(|(handle, p)| {
                cumulative += p;
                (handle, cumulative)
            })
            .collect();

        Ok(Self { entries, fallback })
    }

    /// Handle whose interval contains `r`
    pub fn pick(&self, r: f64) -> &T {
        self.entries
            .iter()
            .find(|(_, upper)| r < *upper)
            .map(|(handle, _)| handle)
            .unwrap_or(&self.entries[self.fallback].0)
    }

    /// Draw `r` from `rng` and pick
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        self.pick(rng.gen::<f64>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
