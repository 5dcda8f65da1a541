//! Uploader scenario
//!
//! Submits a fixture video under a randomized title and then lists the
//! owner's videos. The listing runs whether or not the upload was attempted
//! or succeeded.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use super::{Scenario, ScenarioEnv, ScenarioKind};
use crate::client::{json_id, VideoUpload};
use crate::fixtures::VideoFixture;
use crate::identity::{random_suffix, Session};
use crate::metrics::names;

/// Length of the random suffix appended to titles and file names
const SUFFIX_LEN: usize = 6;

pub struct UploaderScenario;

/// Build the upload payload for `fixture`: `{stem}_{suffix}.mp4` titled `{title} {suffix}`
pub fn upload_for(fixture: &VideoFixture, title: &str, suffix: &str) -> VideoUpload {
    VideoUpload {
        file_name: format!("{}_{}.mp4", fixture.stem(), suffix),
        title: format!("{} {}", title, suffix),
        content: fixture.content.clone(),
    }
}

/// Whether `listing` contains a video with `video_id` under `video_id` or `id`
pub fn listing_contains(listing: &[Value], video_id: &str) -> bool {
    listing.iter().any(|video| {
        ["video_id", "id"]
            .iter()
            .filter_map(|key| video.get(*key).and_then(json_id))
            .any(|id| id == video_id)
    })
}

#[async_trait]
impl Scenario for UploaderScenario {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Uploader
    }

    async fn execute(&self, env: &ScenarioEnv, session: Option<&Session>, rng: &mut StdRng) {
        let Some(session) = session else {
            return;
        };
        let scenario = self.name();
        let tags = [("scenario", scenario)];

        let mut uploaded_id = None;
        if rng.gen_bool(env.settings.upload_probability) {
            let fixture = env.fixtures.choose(rng).cloned();
            let title = env.settings.video_titles.choose(rng).cloned();
            if let (Some(fixture), Some(title)) = (fixture, title) {
                let suffix = random_suffix(rng, SUFFIX_LEN);
                let upload = upload_for(&fixture, &title, &suffix);
                debug!(file = %upload.file_name, bytes = fixture.size(), "Uploading video");

                let response = env.client.create_video(session, upload).await;
                let video_id = response.video_id();
                let has_task = response.task_id().is_some();
                let ok = response.is_success() && has_task && video_id.is_some();

                env.metrics.record_http(&response, ok, &tags);
                env.metrics.rate(names::VIDEO_UPLOAD_SUCCESS_RATE, ok, &tags);
                env.metrics.check(
                    scenario,
                    "upload status 2xx",
                    response.is_success(),
                    &response,
                );
                env.metrics.check(
                    scenario,
                    "upload returns task_id",
                    has_task,
                    &response,
                );
                env.metrics.check(
                    scenario,
                    "upload returns video id",
                    video_id.is_some(),
                    &response,
                );
                if ok {
                    env.metrics.add(names::VIDEOS_UPLOADED, 1.0, &tags);
                    uploaded_id = video_id;
                }
            }
        }

        let listing = env.client.my_videos(session).await;
        env.metrics.record_http(&listing, listing.status_is(200), &tags);
        env.metrics
            .check(scenario, "my videos status 200", listing.status_is(200), &listing);

        let Some(video_id) = uploaded_id else {
            return;
        };
        let listed = listing
            .data()
            .map(|data| listing_contains(data, &video_id))
            .unwrap_or(false);
        env.metrics
            .check(scenario, "uploaded video is listed", listed, &listing);

        if env.settings.delete_after_upload {
            let delete = env.client.delete_video(session, &video_id).await;
            let ok = delete.is_success();
            env.metrics.record_http(&delete, ok, &tags);
            env.metrics.check(scenario, "delete status 2xx", ok, &delete);
            if ok {
                env.metrics.add(names::VIDEOS_DELETED, 1.0, &tags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_naming() {
        let fixture = VideoFixture::minimal_mp4();
        let upload = upload_for(&fixture, "Game Winning Shot", "a1B2c3");
        assert_eq!(upload.file_name, "small_test_a1B2c3.mp4");
        assert_eq!(upload.title, "Game Winning Shot a1B2c3");
        assert_eq!(upload.content.as_ptr(), fixture.content.as_ptr());
    }

    #[test]
    fn test_listing_matches_either_id_field() {
        let listing = vec![json!({"video_id": 7}), json!({"id": "12"})];
        assert!(listing_contains(&listing, "7"));
        assert!(listing_contains(&listing, "12"));
        assert!(!listing_contains(&listing, "3"));
    }
}
