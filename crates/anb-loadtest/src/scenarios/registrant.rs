//! New-registrant scenario

use async_trait::async_trait;
use rand::rngs::StdRng;

use super::{Scenario, ScenarioEnv, ScenarioKind};
use crate::identity::{random_suffix, Identity, Session, SessionOrigin};
use crate::metrics::names;

const SUFFIX_LEN: usize = 8;

/// Registers a never-before-used account, then browses the public list
/// anonymously. Runs whether or not the cycle holds a pooled session.
pub struct NewRegistrantScenario;

#[async_trait]
impl Scenario for NewRegistrantScenario {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::NewRegistrant
    }

    fn requires_session(&self) -> bool {
        false
    }

    async fn execute(&self, env: &ScenarioEnv, _session: Option<&Session>, rng: &mut StdRng) {
        let scenario = self.name();
        let tags = [("scenario", scenario)];

        let identity = Identity::one_off(&env.identity, &random_suffix(rng, SUFFIX_LEN));
        let signup = env.client.signup(&identity.signup_request(&env.identity)).await;
        let session = signup
            .is_success()
            .then(|| Session::from_outcome(&signup, SessionOrigin::Signup))
            .flatten();
        let ok = session.is_some();

        env.metrics
            .record_http_as(names::NEW_USER_RESPONSE_TIME, &signup, ok, &tags);
        env.metrics.rate(names::NEW_USER_SUCCESS_RATE, ok, &tags);
        env.metrics
            .check(scenario, "signup returns token", ok, &signup);
        if ok {
            env.metrics
                .add(names::USERS_CREATED, 1.0, &[("source", "registrant")]);
        }

        let videos = env.client.public_videos(None).await;
        env.metrics.record_http(&videos, videos.status_is(200), &tags);
        env.metrics
            .check(scenario, "public videos status 200", videos.status_is(200), &videos);
    }
}
