//! Voter scenario

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use super::{Scenario, ScenarioEnv, ScenarioKind};
use crate::client::json_id;
use crate::identity::Session;
use crate::metrics::names;

/// Browses rankings and public videos, then sometimes votes for one of them
pub struct VoterScenario;

#[async_trait]
impl Scenario for VoterScenario {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Voter
    }

    async fn execute(&self, env: &ScenarioEnv, session: Option<&Session>, rng: &mut StdRng) {
        let Some(session) = session else {
            return;
        };
        let scenario = self.name();
        let tags = [("scenario", scenario)];

        let rankings = env.client.rankings().await;
        env.metrics.record_http(&rankings, rankings.status_is(200), &tags);
        env.metrics
            .check(scenario, "rankings status 200", rankings.status_is(200), &rankings);

        let videos = env.client.public_videos(Some(session)).await;
        env.metrics.record_http(&videos, videos.status_is(200), &tags);
        env.metrics
            .check(scenario, "public videos status 200", videos.status_is(200), &videos);

        if !rng.gen_bool(env.settings.vote_probability) {
            return;
        }

        let ids: Vec<String> = videos
            .data()
            .map(|data| {
                data.iter()
                    .filter_map(|video| video.get("id").and_then(json_id))
                    .collect()
            })
            .unwrap_or_default();
        let Some(video_id) = ids.choose(rng) else {
            return;
        };

        let vote = env.client.vote(session, video_id).await;
        let cast = vote.status_is(201) || vote.status_is(200);
        let duplicate = vote.status_is(409);
        let ok = cast || duplicate;

        env.metrics.record_http(&vote, ok, &tags);
        env.metrics.rate(names::VOTE_SUCCESS_RATE, ok, &tags);
        env.metrics
            .check(scenario, "vote accepted or already cast", ok, &vote);

        if cast {
            env.metrics.add(names::VOTES_CAST, 1.0, &tags);
        } else if duplicate {
            info!(video_id = %video_id, "Vote already cast for this identity");
            env.metrics.add(names::VOTES_DUPLICATE, 1.0, &tags);
        }
    }
}
