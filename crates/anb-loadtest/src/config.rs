//! Load test configuration
//!
//! Configuration is layered: a built-in [`Preset`], then an optional TOML
//! file, then CLI flags and operator environment variables (applied by the
//! binary). Everything that can make a run meaningless is rejected by
//! [`LoadTestConfig::validate`] before any traffic is sent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{validate_weights, ScenarioWeight};
use crate::error::{LoadTestError, Result};
use crate::identity::IdentityKind;
use crate::profile::LoadProfile;
use crate::report::Threshold;
use crate::scenarios::ScenarioKind;

/// Complete load test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Target service
    #[serde(default)]
    pub target: TargetSettings,

    /// Staged concurrency ramp
    #[serde(default)]
    pub ramp: RampSettings,

    /// Virtual user identities
    #[serde(default)]
    pub identity: IdentitySettings,

    /// Scenario weights and behavior knobs
    #[serde(default)]
    pub scenarios: ScenarioSettings,

    /// Upload fixtures
    #[serde(default)]
    pub fixtures: FixtureSettings,

    /// Metric naming
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Pass/fail criteria evaluated at the end of the run
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<Threshold>,

    /// Seed for reproducible dispatch and random choices
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            target: TargetSettings::default(),
            ramp: RampSettings::default(),
            identity: IdentitySettings::default(),
            scenarios: ScenarioSettings::default(),
            fixtures: FixtureSettings::default(),
            metrics: MetricsSettings::default(),
            thresholds: default_thresholds(),
            seed: None,
        }
    }
}

fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold::below("http_req_duration", crate::report::ThresholdStat::P95, 2000.0),
        Threshold::below("http_req_failed", crate::report::ThresholdStat::Rate, 0.01),
    ]
}

/// Named configurations for the traffic shapes operators run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Capacity planning: occasional download probe, 100 reusable identities
    #[default]
    Capacity,
    /// Stress: download probe every cycle, processed URLs resolved against the asset host
    Stress,
}

/// Target service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Base URL of the API under test
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Host prepended to relative processed-video URLs (defaults to `base_url`)
    #[serde(default)]
    pub asset_base_url: Option<String>,

    /// Timeout for ordinary API calls
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Timeout for uploads and downloads
    #[serde(default = "default_transfer_timeout", with = "humantime_serde")]
    pub transfer_timeout: Duration,

    /// Idle keep-alive connections kept per host
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_idle_per_host() -> usize {
    100
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            asset_base_url: None,
            request_timeout: default_request_timeout(),
            transfer_timeout: default_transfer_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

/// Ramp settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampSettings {
    /// Number of stages
    #[serde(default = "default_total_steps")]
    pub total_steps: u64,

    /// Virtual users added per stage
    #[serde(default = "default_vus_increment")]
    pub vus_increment: u64,

    /// Duration of each stage
    #[serde(default = "default_step_duration", with = "humantime_serde")]
    pub step_duration: Duration,

    /// How long in-flight cycles may run after the last stage ends
    #[serde(default = "default_graceful_stop", with = "humantime_serde")]
    pub graceful_stop: Duration,

    /// Pause at the end of every cycle
    #[serde(default = "default_iteration_pause", with = "humantime_serde")]
    pub iteration_pause: Duration,
}

fn default_total_steps() -> u64 {
    100
}

fn default_vus_increment() -> u64 {
    500
}

fn default_step_duration() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_graceful_stop() -> Duration {
    Duration::from_secs(30)
}

fn default_iteration_pause() -> Duration {
    Duration::from_secs(1)
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            total_steps: default_total_steps(),
            vus_increment: default_vus_increment(),
            step_duration: default_step_duration(),
            graceful_stop: default_graceful_stop(),
            iteration_pause: default_iteration_pause(),
        }
    }
}

/// Identity pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Size of the reusable identity space; 0 means one identity per VU
    #[serde(default = "default_slots")]
    pub slots: u64,

    #[serde(default = "default_email_prefix")]
    pub email_prefix: String,

    #[serde(default = "default_email_domain")]
    pub email_domain: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_first_name")]
    pub first_name: String,

    #[serde(default = "default_city")]
    pub city: String,

    #[serde(default = "default_country")]
    pub country: String,

    /// Account type of pooled identities
    #[serde(default = "default_pool_kind")]
    pub kind: IdentityKind,

    /// Email prefix of one-off identities created by the registrant scenario
    #[serde(default = "default_registrant_prefix")]
    pub registrant_prefix: String,

    /// Account type of one-off identities
    #[serde(default = "default_registrant_kind")]
    pub registrant_kind: IdentityKind,

    /// Log duplicate-email signup failures at warn instead of debug
    #[serde(default)]
    pub log_signup_conflicts: bool,
}

fn default_slots() -> u64 {
    100
}

fn default_email_prefix() -> String {
    "loadtest".to_string()
}

fn default_email_domain() -> String {
    "example.com".to_string()
}

fn default_password() -> String {
    "1234".to_string()
}

fn default_first_name() -> String {
    "LoadTest".to_string()
}

fn default_city() -> String {
    "Cali".to_string()
}

fn default_country() -> String {
    "Colombia".to_string()
}

fn default_pool_kind() -> IdentityKind {
    IdentityKind::Player
}

fn default_registrant_prefix() -> String {
    "newuser".to_string()
}

fn default_registrant_kind() -> IdentityKind {
    IdentityKind::Voter
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            email_prefix: default_email_prefix(),
            email_domain: default_email_domain(),
            password: default_password(),
            first_name: default_first_name(),
            city: default_city(),
            country: default_country(),
            kind: default_pool_kind(),
            registrant_prefix: default_registrant_prefix(),
            registrant_kind: default_registrant_kind(),
            log_signup_conflicts: false,
        }
    }
}

/// Scenario settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSettings {
    /// Ordered weight table; probabilities must sum to 1
    #[serde(default = "default_weights")]
    pub weights: Vec<ScenarioWeight>,

    /// Chance a voter casts a vote after browsing
    #[serde(default = "default_half")]
    pub vote_probability: f64,

    /// Chance an uploader submits a video
    #[serde(default = "default_half")]
    pub upload_probability: f64,

    /// Chance a cycle runs the download probe
    #[serde(default = "default_download_probability")]
    pub download_probability: f64,

    /// Titles uploads are named after
    #[serde(default = "default_video_titles")]
    pub video_titles: Vec<String>,

    /// Delete each uploaded video once it shows up in the owner's listing
    #[serde(default)]
    pub delete_after_upload: bool,
}

fn default_weights() -> Vec<ScenarioWeight> {
    vec![
        ScenarioWeight::new(ScenarioKind::Voter, 0.4),
        ScenarioWeight::new(ScenarioKind::Uploader, 0.3),
        ScenarioWeight::new(ScenarioKind::NewRegistrant, 0.3),
    ]
}

fn default_half() -> f64 {
    0.5
}

fn default_download_probability() -> f64 {
    0.1
}

fn default_video_titles() -> Vec<String> {
    [
        "Basketball Dunk Compilation",
        "Streetball Highlights",
        "Three Point Contest",
        "Game Winning Shot",
        "Training Drills",
        "CrossOver Moves",
        "Alley Oop Moments",
        "Defensive Plays",
        "Fast Break Action",
        "Free Throw Practice",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            vote_probability: default_half(),
            upload_probability: default_half(),
            download_probability: default_download_probability(),
            video_titles: default_video_titles(),
            delete_after_upload: false,
        }
    }
}

impl ScenarioSettings {
    /// Configured weight of a scenario, 0 when absent
    pub fn weight_of(&self, kind: ScenarioKind) -> f64 {
        self.weights
            .iter()
            .filter(|w| w.scenario == kind)
            .map(|w| w.probability)
            .sum()
    }
}

/// Fixture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureSettings {
    /// Directory holding the video files
    #[serde(default = "default_fixture_dir")]
    pub directory: PathBuf,

    /// Files loaded from `directory`
    #[serde(default = "default_fixture_files")]
    pub files: Vec<String>,
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("./videos")
}

fn default_fixture_files() -> Vec<String> {
    vec!["video1.mp4".to_string(), "video2.mp4".to_string()]
}

impl Default for FixtureSettings {
    fn default() -> Self {
        Self {
            directory: default_fixture_dir(),
            files: default_fixture_files(),
        }
    }
}

/// Metric naming settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Prefix applied to every exported metric name
    #[serde(default)]
    pub prefix: Option<String>,
}

impl LoadTestConfig {
    /// Built-in configuration for a preset
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Capacity => Self::default(),
            Preset::Stress => Self {
                ramp: RampSettings {
                    total_steps: 10,
                    vus_increment: 1000,
                    ..Default::default()
                },
                scenarios: ScenarioSettings {
                    download_probability: 1.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    /// Load configuration from a TOML file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = read_config_file(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file on top of `base`: keys present in the file win,
    /// everything else keeps the value from `base`
    pub fn load_over(base: &Self, path: &Path) -> Result<Self> {
        let content = read_config_file(path)?;
        Self::layered(base, &content)
    }

    pub fn layered(base: &Self, content: &str) -> Result<Self> {
        let mut merged = toml::Value::try_from(base)
            .map_err(|e| LoadTestError::InvalidConfig(format!("cannot encode base config: {}", e)))?;
        let overlay: toml::Value = toml::from_str(content)?;
        merge_toml(&mut merged, overlay);
        Ok(merged.try_into()?)
    }

    /// Host used to resolve relative processed-video URLs
    pub fn asset_base_url(&self) -> &str {
        self.target
            .asset_base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.target.base_url)
    }

    /// The staged ramp this configuration describes
    pub fn profile(&self) -> Result<LoadProfile> {
        LoadProfile::staged(
            self.ramp.total_steps,
            self.ramp.vus_increment,
            self.ramp.step_duration,
        )
    }

    /// Run every configuration-time check. Any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        self.profile()?;
        validate_weights(&self.scenarios.weights)?;

        reqwest::Url::parse(&self.target.base_url).map_err(|e| {
            LoadTestError::InvalidConfig(format!("base_url {:?}: {}", self.target.base_url, e))
        })?;
        if let Some(asset) = self.target.asset_base_url.as_deref().filter(|u| !u.is_empty()) {
            reqwest::Url::parse(asset).map_err(|e| {
                LoadTestError::InvalidConfig(format!("asset_base_url {:?}: {}", asset, e))
            })?;
        }

        for (name, p) in [
            ("vote_probability", self.scenarios.vote_probability),
            ("upload_probability", self.scenarios.upload_probability),
            ("download_probability", self.scenarios.download_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(LoadTestError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }

        let uploader_weight = self.scenarios.weight_of(ScenarioKind::Uploader);
        if uploader_weight > 0.0 {
            if self.fixtures.files.is_empty() {
                return Err(LoadTestError::MissingFixtures {
                    weight: uploader_weight,
                });
            }
            if self.scenarios.video_titles.is_empty() {
                return Err(LoadTestError::InvalidConfig(
                    "video_titles must not be empty when uploads are weighted".to_string(),
                ));
            }
        }

        let identity = &self.identity;
        if identity.email_prefix.is_empty() || identity.email_domain.is_empty() {
            return Err(LoadTestError::InvalidConfig(
                "identity email prefix and domain must not be empty".to_string(),
            ));
        }
        // One-off emails must never spell a pooled slot's email
        let (pooled, fresh) = (identity.email_prefix.as_str(), identity.registrant_prefix.as_str());
        if fresh.is_empty() || pooled.starts_with(fresh) || fresh.starts_with(pooled) {
            return Err(LoadTestError::InvalidConfig(format!(
                "registrant_prefix {:?} overlaps email_prefix {:?}",
                fresh, pooled
            )));
        }

        for threshold in &self.thresholds {
            threshold.validate()?;
        }

        if self.target.request_timeout.is_zero() || self.target.transfer_timeout.is_zero() {
            return Err(LoadTestError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        LoadTestError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Recursively overlay tables; any non-table value (arrays included) replaces the base value
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoadTestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scenarios.weights.len(), 3);
        assert_eq!(config.identity.slots, 100);
        assert_eq!(config.target.transfer_timeout, Duration::from_secs(60));
        assert_eq!(config.asset_base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_presets_differ_only_in_data() {
        let capacity = LoadTestConfig::preset(Preset::Capacity);
        let stress = LoadTestConfig::preset(Preset::Stress);
        assert!((capacity.scenarios.download_probability - 0.1).abs() < f64::EPSILON);
        assert!((stress.scenarios.download_probability - 1.0).abs() < f64::EPSILON);
        assert_eq!(stress.ramp.vus_increment, 1000);
        stress.validate().unwrap();
    }

    #[test]
    fn test_toml_partial_override() {
        let config = LoadTestConfig::from_toml(
            r#"
            seed = 7

            [target]
            base_url = "http://backend:8080"
            asset_base_url = "http://assets"

            [ramp]
            total_steps = 3
            vus_increment = 5
            step_duration = "30s"

            [[scenarios.weights]]
            scenario = "voter"
            probability = 0.5

            [[scenarios.weights]]
            scenario = "new-registrant"
            probability = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.seed, Some(7));
        assert_eq!(config.ramp.step_duration, Duration::from_secs(30));
        assert_eq!(config.ramp.iteration_pause, Duration::from_secs(1));
        assert_eq!(config.asset_base_url(), "http://assets");
        assert_eq!(config.scenarios.weight_of(ScenarioKind::Uploader), 0.0);
        assert_eq!(config.profile().unwrap().peak_concurrency(), 15);
        config.validate().unwrap();
    }

    #[test]
    fn test_file_layers_over_preset() {
        let stress = LoadTestConfig::preset(Preset::Stress);
        let config = LoadTestConfig::layered(
            &stress,
            r#"
            [ramp]
            step_duration = "45s"

            [target]
            asset_base_url = "http://assets:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.ramp.step_duration, Duration::from_secs(45));
        assert_eq!(config.ramp.vus_increment, 1000);
        assert!((config.scenarios.download_probability - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.asset_base_url(), "http://assets:9000");
        assert_eq!(config.thresholds.len(), 2);
    }

    #[test]
    fn test_load_over_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[identity]\nslots = 0\nlog_signup_conflicts = true\n",
        )
        .unwrap();

        let config = LoadTestConfig::load_over(&LoadTestConfig::default(), file.path()).unwrap();
        assert_eq!(config.identity.slots, 0);
        assert!(config.identity.log_signup_conflicts);
        assert_eq!(config.identity.email_prefix, "loadtest");

        let missing = LoadTestConfig::load_over(&config, Path::new("/nonexistent/anb.toml"));
        assert!(missing.unwrap_err().is_fatal());
    }

    #[test]
    fn test_zero_increment_is_fatal() {
        let mut config = LoadTestConfig::default();
        config.ramp.vus_increment = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_zero_steps_is_valid() {
        let mut config = LoadTestConfig::default();
        config.ramp.total_steps = 0;
        config.validate().unwrap();
        assert!(config.profile().unwrap().is_empty());
    }

    #[test]
    fn test_bad_weights_are_fatal() {
        let mut config = LoadTestConfig::default();
        config.scenarios.weights[0].probability = 0.9;
        assert!(matches!(config.validate(), Err(LoadTestError::InvalidWeights(_))));
    }

    #[test]
    fn test_uploads_without_fixtures_are_fatal() {
        let mut config = LoadTestConfig::default();
        config.fixtures.files.clear();
        assert!(matches!(config.validate(), Err(LoadTestError::MissingFixtures { .. })));

        config.scenarios.weights = vec![ScenarioWeight::new(ScenarioKind::Voter, 1.0)];
        config.validate().unwrap();
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut config = LoadTestConfig::default();
        config.scenarios.download_probability = 1.5;
        assert!(matches!(config.validate(), Err(LoadTestError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = LoadTestConfig::default();
        config.target.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_identity_prefixes_are_fatal() {
        for (pooled, fresh) in [("loadtest", "load"), ("load", "loadtest"), ("new-", "new"), ("loadtest", "")] {
            let mut config = LoadTestConfig::default();
            config.identity.email_prefix = pooled.to_string();
            config.identity.registrant_prefix = fresh.to_string();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, LoadTestError::InvalidConfig(_)), "{} / {}", pooled, fresh);
            assert!(err.is_fatal());
        }

        let mut config = LoadTestConfig::default();
        config.identity.registrant_prefix = "signup".to_string();
        config.validate().unwrap();
    }
}
