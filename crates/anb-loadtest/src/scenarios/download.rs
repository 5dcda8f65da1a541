//! Opportunistic download probe
//!
//! Runs independently of the dispatched scenario. It lists public videos,
//! keeps the processed ones and fetches one processed asset. An empty
//! candidate list is a no-op.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use super::ScenarioEnv;
use crate::metrics::names;

/// Status a video must have before its asset is downloadable
pub const PROCESSED_STATUS: &str = "processed";

/// Processed-asset URLs in a public listing
pub fn processed_urls(listing: &[Value]) -> Vec<&str> {
    listing
        .iter()
        .filter(|video| video.get("status").and_then(Value::as_str) == Some(PROCESSED_STATUS))
        .filter_map(|video| video.get("processedUrl").and_then(Value::as_str))
        .filter(|url| !url.is_empty())
        .collect()
}

/// Absolute URLs pass through; relative ones are joined onto `asset_base`
pub fn resolve_asset_url(asset_base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            asset_base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

/// The per-cycle download check
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadProbe;

impl DownloadProbe {
    const NAME: &'static str = "download";

    /// Roll the configured probability and, on a hit, probe one asset.
    /// Returns whether a download was attempted.
    pub async fn maybe_run(&self, env: &ScenarioEnv, rng: &mut StdRng) -> bool {
        if !rng.gen_bool(env.settings.download_probability) {
            return false;
        }
        self.run(env, rng).await
    }

    /// Probe unconditionally. Returns whether a download was attempted.
    pub async fn run(&self, env: &ScenarioEnv, rng: &mut StdRng) -> bool {
        let tags = [("scenario", Self::NAME)];

        let videos = env.client.public_videos(None).await;
        env.metrics.record_http(&videos, videos.status_is(200), &tags);
        env.metrics
            .check(Self::NAME, "public videos status 200", videos.status_is(200), &videos);

        let url = {
            let candidates = videos.data().map(|d| processed_urls(d)).unwrap_or_default();
            match candidates.choose(rng) {
                Some(url) => resolve_asset_url(&env.asset_base_url, url),
                None => {
                    debug!("No processed videos to download");
                    return false;
                }
            }
        };

        let download = env.client.download(&url).await;
        let ok = download.status_is(200);
        env.metrics.record_http(&download, ok, &tags);
        env.metrics.rate(names::VIDEO_DOWNLOAD_SUCCESS_RATE, ok, &tags);
        env.metrics
            .check(Self::NAME, "download status 200", ok, &download);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_processed_with_url() {
        let listing = vec![
            json!({"id": 1, "status": "processed", "processedUrl": "/media/1.mp4"}),
            json!({"id": 2, "status": "uploaded", "processedUrl": "/media/2.mp4"}),
            json!({"id": 3, "status": "processed", "processedUrl": ""}),
            json!({"id": 4, "status": "processed"}),
            json!({"id": 5, "status": "processed", "processedUrl": null}),
        ];
        assert_eq!(processed_urls(&listing), vec!["/media/1.mp4"]);
    }

    #[test]
    fn test_resolve_asset_url() {
        assert_eq!(
            resolve_asset_url("http://assets:9000/", "/media/1.mp4"),
            "http://assets:9000/media/1.mp4"
        );
        assert_eq!(
            resolve_asset_url("http://assets:9000", "media/1.mp4"),
            "http://assets:9000/media/1.mp4"
        );
        assert_eq!(
            resolve_asset_url("http://assets:9000", "https://cdn.example.com/1.mp4"),
            "https://cdn.example.com/1.mp4"
        );
    }
}
