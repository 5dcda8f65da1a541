//! Per-cycle baseline checks run before the dispatched scenario

use crate::identity::Session;

use super::ScenarioEnv;

const NAME: &str = "baseline";

/// Public endpoints every cycle hits first
pub async fn public(env: &ScenarioEnv) {
    let tags = [("scenario", NAME)];

    let videos = env.client.public_videos(None).await;
    env.metrics.record_http(&videos, videos.status_is(200), &tags);
    env.metrics
        .check(NAME, "public videos status 200", videos.status_is(200), &videos);

    let rankings = env.client.rankings().await;
    env.metrics.record_http(&rankings, rankings.status_is(200), &tags);
    env.metrics
        .check(NAME, "rankings status 200", rankings.status_is(200), &rankings);
}

/// Own-videos listing once the cycle holds a session
pub async fn authenticated(env: &ScenarioEnv, session: &Session) {
    let tags = [("scenario", NAME)];

    let listing = env.client.my_videos(session).await;
    env.metrics.record_http(&listing, listing.status_is(200), &tags);
    env.metrics
        .check(NAME, "my videos status 200", listing.status_is(200), &listing);
}
