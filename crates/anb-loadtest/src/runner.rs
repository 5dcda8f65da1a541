//! Load test runner
//!
//! Walks the load profile stage by stage. Entering a stage spawns virtual
//! users until the stage target is reached; each virtual user loops over
//! execution cycles until the run is stopped. When the last stage ends the
//! runner signals stop, lets in-flight cycles finish within the graceful stop
//! window and aborts whatever is left.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::client::ApiClient;
use crate::config::LoadTestConfig;
use crate::dispatcher::WeightedDispatcher;
use crate::error::Result;
use crate::fixtures::FixtureSet;
use crate::identity::IdentityPool;
use crate::metrics::{names, MetricsSink};
use crate::profile::LoadProfile;
use crate::report::{evaluate_thresholds, RunSummary};
use crate::scenarios::{baseline, build_dispatcher, DownloadProbe, Scenario, ScenarioEnv, ScenarioKind};

type Dispatcher = WeightedDispatcher<Arc<dyn Scenario>>;

/// Main load test runner
pub struct LoadTestRunner {
    config: LoadTestConfig,
    profile: LoadProfile,
    env: Arc<ScenarioEnv>,
    pool: Arc<IdentityPool>,
    dispatcher: Arc<Dispatcher>,
}

impl LoadTestRunner {
    /// Validate the configuration and prepare everything a run needs.
    ///
    /// Every error returned here is a configuration error: no traffic has
    /// been sent yet.
    pub fn new(config: LoadTestConfig) -> Result<Self> {
        config.validate()?;
        let profile = config.profile()?;
        let dispatcher = build_dispatcher(&config.scenarios.weights)?;

        let fixtures = if config.scenarios.weight_of(ScenarioKind::Uploader) > 0.0 {
            let fixtures = FixtureSet::load(&config.fixtures)?;
            info!("{} fixtures ready ({} bytes)", fixtures.len(), fixtures.total_size());
            fixtures
        } else {
            FixtureSet::default()
        };

        let client = ApiClient::new(
            &config.target.base_url,
            config.target.request_timeout,
            config.target.transfer_timeout,
            config.target.max_idle_per_host,
        )?;
        let metrics = Arc::new(MetricsSink::with_prefix(config.metrics.prefix.clone()));
        let env = ScenarioEnv::new(&config, client, metrics, Arc::new(fixtures));

        Ok(Self {
            pool: Arc::new(IdentityPool::new(config.identity.clone())),
            profile,
            env: Arc::new(env),
            dispatcher: Arc::new(dispatcher),
            config,
        })
    }

    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        self.env.metrics.clone()
    }

    /// Run the whole profile and evaluate thresholds
    pub async fn run(&self) -> RunSummary {
        info!(
            "Starting load test against {}: {} stages, peak {} VUs, {:?} total",
            self.config.target.base_url,
            self.profile.len(),
            self.profile.peak_concurrency(),
            self.profile.total_duration()
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        for (i, stage) in self.profile.stages().iter().enumerate() {
            info!(
                "Stage {}/{}: {} VUs for {:?}",
                i + 1,
                self.profile.len(),
                stage.target_concurrency,
                stage.duration
            );
            self.top_up(&mut handles, stage.target_concurrency, &stop_rx);
            sleep(stage.duration).await;
        }

        let _ = stop_tx.send(true);
        let aborted_vus = self.drain(handles, self.config.ramp.graceful_stop).await;
        info!("Load test complete");

        let metrics = self.env.metrics.snapshot();
        RunSummary {
            base_url: self.config.target.base_url.clone(),
            stages: self.profile.stages().to_vec(),
            peak_vus: self.profile.peak_concurrency(),
            aborted_vus,
            thresholds: evaluate_thresholds(&self.config.thresholds, &metrics),
            metrics,
        }
    }

    /// Spawn VUs until `target` are alive. A VU whose task ended early (a
    /// panic) is replaced under a fresh index. Returns how many were spawned.
    fn top_up(&self, handles: &mut Vec<JoinHandle<()>>, target: u64, stop: &watch::Receiver<bool>) -> u64 {
        let live = handles.iter().filter(|h| !h.is_finished()).count() as u64;
        if live < handles.len() as u64 {
            warn!("{} VUs ended early, replacing them", handles.len() as u64 - live);
        }
        let missing = target.saturating_sub(live);
        for _ in 0..missing {
            let vu = self.virtual_user(handles.len() as u64);
            handles.push(tokio::spawn(vu.run(stop.clone())));
        }
        missing
    }

    fn virtual_user(&self, vu: u64) -> VirtualUser {
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(vu)),
            None => StdRng::from_entropy(),
        };
        VirtualUser {
            vu,
            env: self.env.clone(),
            pool: self.pool.clone(),
            dispatcher: self.dispatcher.clone(),
            probe: DownloadProbe,
            pause: self.config.ramp.iteration_pause,
            rng,
        }
    }

    /// Wait up to `grace` for every VU, then abort the rest. Returns how many were aborted.
    async fn drain(&self, mut handles: Vec<JoinHandle<()>>, grace: Duration) -> u64 {
        if handles.is_empty() {
            return 0;
        }
        info!("Draining {} VUs (graceful stop {:?})", handles.len(), grace);

        if let Ok(results) = timeout(grace, join_all(handles.iter_mut())).await {
            for e in results.into_iter().filter_map(|r| r.err()) {
                warn!("Virtual user task failed: {}", e);
            }
            return 0;
        }
        let mut aborted = 0;
        for handle in handles.iter().filter(|h| !h.is_finished()) {
            handle.abort();
            aborted += 1;
        }
        warn!("Graceful stop expired, aborted {} VUs", aborted);
        aborted
    }
}

/// One simulated client
struct VirtualUser {
    vu: u64,
    env: Arc<ScenarioEnv>,
    pool: Arc<IdentityPool>,
    dispatcher: Arc<Dispatcher>,
    probe: DownloadProbe,
    pause: Duration,
    rng: StdRng,
}

impl VirtualUser {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        debug!(vu = self.vu, "Virtual user started");
        loop {
            if *stop.borrow() {
                break;
            }
            self.cycle().await;

            tokio::select! {
                _ = sleep(self.pause) => {}
                _ = stop.changed() => break,
            }
        }
        debug!(vu = self.vu, "Virtual user stopped");
    }

    /// One execution cycle: baseline, download probe, identity, dispatched scenario
    async fn cycle(&mut self) {
        let env = self.env.as_ref();

        baseline::public(env).await;
        self.probe.maybe_run(env, &mut self.rng).await;

        let slot = self.pool.slot_for(self.vu);
        let auth = self.pool.acquire(slot, &env.client, &env.metrics).await;
        if let Some(session) = auth.session() {
            baseline::authenticated(env, session).await;
        }

        let scenario = self.dispatcher.select(&mut self.rng).clone();
        let tags = [("scenario", scenario.name())];
        if scenario.requires_session() && !auth.is_authenticated() {
            debug!(vu = self.vu, scenario = scenario.name(), "Skipping scenario without a session");
            env.metrics.add(names::SCENARIO_SKIPPED, 1.0, &tags);
        } else {
            scenario.execute(env, auth.session(), &mut self.rng).await;
            env.metrics.add(names::SCENARIO_COUNT, 1.0, &tags);
        }

        env.metrics.add(names::ITERATIONS, 1.0, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config_before_traffic() {
        let mut config = LoadTestConfig::default();
        config.ramp.vus_increment = 0;
        let err = LoadTestRunner::new(config).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_new_requires_fixtures_for_uploads() {
        let mut config = LoadTestConfig::default();
        config.fixtures.directory = "/nonexistent/videos".into();
        let err = LoadTestRunner::new(config).err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_empty_profile_generates_no_load() {
        let mut config = LoadTestConfig::default();
        config.ramp.total_steps = 0;
        config.fixtures.files.clear();
        config.scenarios.weights = vec![crate::dispatcher::ScenarioWeight::new(ScenarioKind::Voter, 1.0)];

        let runner = LoadTestRunner::new(config).unwrap();
        let summary = runner.run().await;
        assert!(summary.stages.is_empty());
        assert_eq!(summary.metrics.counter_total(names::ITERATIONS), 0.0);
        assert!(summary.passed());
    }

    #[tokio::test]
    async fn test_crashed_vu_is_replaced() {
        let mut config = LoadTestConfig::default();
        config.fixtures.files.clear();
        config.scenarios.weights = vec![crate::dispatcher::ScenarioWeight::new(ScenarioKind::Voter, 1.0)];
        let runner = LoadTestRunner::new(config).unwrap();

        let crashed: JoinHandle<()> = tokio::spawn(async { panic!("virtual user crashed") });
        while !crashed.is_finished() {
            tokio::task::yield_now().await;
        }
        let mut handles = vec![crashed];

        // Stopped before spawning, so replacements exit without traffic
        let (stop_tx, stop_rx) = watch::channel(false);
        let _ = stop_tx.send(true);

        assert_eq!(runner.top_up(&mut handles, 2, &stop_rx), 2);
        assert_eq!(handles.len(), 3);
        assert_eq!(runner.top_up(&mut handles, 2, &stop_rx), 0);
        assert_eq!(runner.drain(handles, Duration::from_secs(5)).await, 0);
    }
}
