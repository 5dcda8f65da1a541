//! # ANB Video API Load Testing
//!
//! Synthetic traffic generator for capacity planning of the video upload and
//! voting API. A staged concurrency ramp drives virtual users; every cycle
//! authenticates a pooled identity and runs one weighted scenario, and all
//! call outcomes are aggregated into counters, rates and latency trends.
//!
//! ## Cycle
//!
//! ```text
//!   public videos + rankings ──► download probe (p) ──► login / signup
//!                                                           │
//!        ┌──────────────────────────────────────────────────┘
//!        ▼
//!   my videos ──► dispatch ──┬── voter          (40%)
//!                            ├── uploader       (30%)
//!                            └── new-registrant (30%) ──► pause
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Capacity ramp: 100 steps of +500 VUs, 5 minutes each
//! anb-loadtest --base-url http://backend:8080
//!
//! # Stress preset with a separate asset host
//! anb-loadtest --preset stress --video-assets-url http://assets:9000
//!
//! # One functional pass over every endpoint
//! anb-loadtest smoke --base-url http://backend:8080
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fixtures;
pub mod identity;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod smoke;

pub use config::{LoadTestConfig, Preset};
pub use error::{LoadTestError, Result};
pub use metrics::{MetricKind, MetricSample, MetricsSink, MetricsSnapshot};
pub use profile::{LoadProfile, LoadStage};
pub use report::{RunSummary, Threshold, ThresholdStat};
pub use runner::LoadTestRunner;
pub use smoke::{run_smoke, SmokeReport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{ApiClient, HttpOutcome};
    pub use crate::config::{LoadTestConfig, Preset};
    pub use crate::dispatcher::{ScenarioWeight, WeightedDispatcher};
    pub use crate::error::{LoadTestError, Result};
    pub use crate::identity::{AuthOutcome, IdentityPool, Session};
    pub use crate::metrics::{names, MetricsSink};
    pub use crate::profile::LoadProfile;
    pub use crate::report::{RunSummary, Threshold};
    pub use crate::runner::LoadTestRunner;
    pub use crate::scenarios::{Scenario, ScenarioKind};
}
