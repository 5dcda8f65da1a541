//! Sequential functional check of the target API
//!
//! One pass over every endpoint the load test drives, with each step
//! reported as pass or fail. Useful before a long ramp to confirm the target
//! and the fixtures are in order.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{ApiClient, HttpOutcome};
use crate::config::LoadTestConfig;
use crate::error::Result;
use crate::fixtures::{FixtureSet, VideoFixture};
use crate::identity::{random_suffix, Identity, IdentityPool, Session, SessionOrigin};
use crate::scenarios::uploader::{listing_contains, upload_for};

/// One checked step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeStep {
    pub name: String,
    pub passed: bool,
    /// Status code or transport error
    pub status: String,
    pub latency_ms: u64,
}

/// Result of a smoke pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmokeReport {
    pub steps: Vec<SmokeStep>,
}

impl SmokeReport {
    fn step(&mut self, name: &str, passed: bool, outcome: &HttpOutcome) -> bool {
        if passed {
            info!("✅ {} ({})", name, outcome.describe());
        } else {
            warn!("❌ {} ({})", name, outcome.describe());
        }
        self.steps.push(SmokeStep {
            name: name.to_string(),
            passed,
            status: outcome.describe(),
            latency_ms: outcome.latency.as_millis() as u64,
        });
        passed
    }

    fn skipped(&mut self, name: &str, reason: &str) {
        warn!("❌ {} (skipped: {})", name, reason);
        self.steps.push(SmokeStep {
            name: name.to_string(),
            passed: false,
            status: format!("skipped: {}", reason),
            latency_ms: 0,
        });
    }

    pub fn passed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.passed)
    }

    pub fn print_report(&self) {
        println!("\n═══════════════════════════════════════════════════════════════");
        println!("                    SMOKE CHECK RESULTS");
        println!("═══════════════════════════════════════════════════════════════");
        for step in &self.steps {
            let status = if step.passed { "✅ PASS" } else { "❌ FAIL" };
            println!("  {} - {}", step.name, status);
            println!("    Status:  {}", step.status);
            println!("    Latency: {}ms", step.latency_ms);
        }
        println!("═══════════════════════════════════════════════════════════════");
        if self.passed() {
            println!("  OVERALL: ✅ ALL STEPS PASS");
        } else {
            println!("  OVERALL: ❌ SOME STEPS FAILED");
        }
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}

/// Run the smoke pass against the configured target
pub async fn run_smoke(config: &LoadTestConfig) -> Result<SmokeReport> {
    let client = ApiClient::new(
        &config.target.base_url,
        config.target.request_timeout,
        config.target.transfer_timeout,
        config.target.max_idle_per_host,
    )?;
    let fixture = match FixtureSet::load(&config.fixtures) {
        Ok(set) => set.iter().next().cloned(),
        Err(e) => {
            warn!("{}; uploading a minimal MP4 instead", e);
            None
        }
    }
    .unwrap_or_else(VideoFixture::minimal_mp4);

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut report = SmokeReport::default();
    info!("Running smoke check against {}", client.base_url());

    // Register a fresh account, or log in as the first pooled identity
    let suffix = random_suffix(&mut rng, 8);
    let identity = Identity::one_off(&config.identity, &suffix);
    let signup = client.signup(&identity.signup_request(&config.identity)).await;
    let mut session = signup
        .is_success()
        .then(|| Session::from_outcome(&signup, SessionOrigin::Signup))
        .flatten();
    let mut auth = signup;

    if session.is_none() {
        let existing = IdentityPool::new(config.identity.clone()).identity(0);
        warn!("Signup failed ({}), logging in as {}", auth.describe(), existing.email);
        let login = client.login(&existing.email, &existing.password).await;
        session = login
            .status_is(200)
            .then(|| Session::from_outcome(&login, SessionOrigin::Login))
            .flatten();
        auth = login;
    }
    report.step("obtain session", session.is_some(), &auth);

    let public = client.public_videos(None).await;
    report.step("public videos status 200", public.status_is(200), &public);
    let rankings = client.rankings().await;
    report.step("rankings status 200", rankings.status_is(200), &rankings);

    let Some(session) = session else {
        for step in ["upload video", "my videos lists upload", "delete video"] {
            report.skipped(step, "no session");
        }
        return Ok(report);
    };

    let title = config
        .scenarios
        .video_titles
        .first()
        .map(String::as_str)
        .unwrap_or("Smoke Test");
    let mut upload = client
        .create_video(&session, upload_for(&fixture, title, &suffix))
        .await;
    if !upload.is_success() {
        warn!("Upload failed ({}), retrying with a minimal MP4", upload.describe());
        upload = client
            .create_video(&session, upload_for(&VideoFixture::minimal_mp4(), title, &suffix))
            .await;
    }
    let video_id = upload.video_id();
    let uploaded = upload.is_success() && upload.task_id().is_some() && video_id.is_some();
    report.step("upload video", uploaded, &upload);

    let mine = client.my_videos(&session).await;
    let listed = match &video_id {
        Some(id) => mine.data().map(|d| listing_contains(d, id)).unwrap_or(false),
        None => mine.status_is(200),
    };
    report.step("my videos lists upload", mine.status_is(200) && listed, &mine);

    match video_id {
        Some(id) => {
            let delete = client.delete_video(&session, &id).await;
            report.step("delete video", delete.is_success(), &delete);
        }
        None => report.skipped("delete video", "no uploaded video"),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_does_not_pass() {
        assert!(!SmokeReport::default().passed());
    }

    #[test]
    fn test_skipped_step_fails_report() {
        let mut report = SmokeReport::default();
        report.skipped("upload video", "no session");
        assert!(!report.passed());
        assert!(report.steps[0].status.starts_with("skipped"));
    }
}
