//! Scenario library
//!
//! A scenario is a short, self-contained sequence of API calls that models
//! one kind of user. Scenarios never fail upward: every call outcome is
//! recorded in the metrics sink and the scenario either moves on or returns.

pub mod baseline;
pub mod download;
pub mod registrant;
pub mod uploader;
pub mod voter;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::config::{IdentitySettings, LoadTestConfig, ScenarioSettings};
use crate::dispatcher::{ScenarioWeight, WeightedDispatcher};
use crate::error::{LoadTestError, Result};
use crate::fixtures::FixtureSet;
use crate::identity::Session;
use crate::metrics::MetricsSink;

pub use download::DownloadProbe;
pub use registrant::NewRegistrantScenario;
pub use uploader::UploaderScenario;
pub use voter::VoterScenario;

/// Registered scenario kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Browses rankings and public videos, sometimes votes
    Voter,
    /// Sometimes uploads a fixture video, always lists own videos
    Uploader,
    /// Registers a brand-new account and browses as it
    NewRegistrant,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voter => "voter",
            Self::Uploader => "uploader",
            Self::NewRegistrant => "new-registrant",
        }
    }

    /// Handle for this kind
    pub fn build(&self) -> Arc<dyn Scenario> {
        match self {
            Self::Voter => Arc::new(VoterScenario),
            Self::Uploader => Arc::new(UploaderScenario),
            Self::NewRegistrant => Arc::new(NewRegistrantScenario),
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "voter" => Ok(Self::Voter),
            "uploader" | "basketball-player" => Ok(Self::Uploader),
            "new-registrant" | "registrant" | "new-user" => Ok(Self::NewRegistrant),
            other => Err(LoadTestError::InvalidWeights(format!(
                "unknown scenario {:?}; use voter, uploader or new-registrant",
                other
            ))),
        }
    }
}

/// Shared, read-only state every scenario runs against
pub struct ScenarioEnv {
    pub client: ApiClient,
    pub metrics: Arc<MetricsSink>,
    pub fixtures: Arc<FixtureSet>,
    pub settings: ScenarioSettings,
    pub identity: IdentitySettings,
    pub asset_base_url: String,
}

impl ScenarioEnv {
    pub fn new(
        config: &LoadTestConfig,
        client: ApiClient,
        metrics: Arc<MetricsSink>,
        fixtures: Arc<FixtureSet>,
    ) -> Self {
        Self {
            client,
            metrics,
            fixtures,
            settings: config.scenarios.clone(),
            identity: config.identity.clone(),
            asset_base_url: config.asset_base_url().to_string(),
        }
    }
}

/// A weighted behavior unit
#[async_trait]
pub trait Scenario: Send + Sync {
    fn kind(&self) -> ScenarioKind;

    /// Scenario name used in tags and logs
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Whether the scenario needs the cycle's pooled session
    fn requires_session(&self) -> bool {
        true
    }

    /// Run once. `session` is `None` when identity acquisition failed.
    async fn execute(&self, env: &ScenarioEnv, session: Option<&Session>, rng: &mut StdRng);
}

/// Dispatcher over the configured weight table
pub fn build_dispatcher(weights: &[ScenarioWeight]) -> Result<WeightedDispatcher<Arc<dyn Scenario>>> {
    crate::dispatcher::validate_weights(weights)?;
    WeightedDispatcher::new(
        weights
            .iter()
            .map(|w| (w.scenario.build(), w.probability))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_names() {
        for kind in [ScenarioKind::Voter, ScenarioKind::Uploader, ScenarioKind::NewRegistrant] {
            assert_eq!(kind.as_str().parse::<ScenarioKind>().unwrap(), kind);
            assert_eq!(kind.build().kind(), kind);
        }
        assert_eq!("new_user".parse::<ScenarioKind>().unwrap(), ScenarioKind::NewRegistrant);
    }

    #[test]
    fn test_only_registrant_runs_without_session() {
        assert!(ScenarioKind::Voter.build().requires_session());
        assert!(ScenarioKind::Uploader.build().requires_session());
        assert!(!ScenarioKind::NewRegistrant.build().requires_session());
    }

    #[test]
    fn test_build_dispatcher_from_reference_weights() {
        let config = LoadTestConfig::default();
        let dispatcher = build_dispatcher(&config.scenarios.weights).unwrap();
        assert_eq!(dispatcher.len(), 3);
        assert_eq!(dispatcher.pick(0.1).kind(), ScenarioKind::Voter);
        assert_eq!(dispatcher.pick(0.5).kind(), ScenarioKind::Uploader);
        assert_eq!(dispatcher.pick(0.8).kind(), ScenarioKind::NewRegistrant);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ScenarioKind::NewRegistrant).unwrap();
        assert_eq!(json, "\"new-registrant\"");
    }
}
