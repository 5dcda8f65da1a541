//! HTTP client for the target REST API
//!
//! Every call returns an [`HttpOutcome`] instead of an error: transport
//! failures, timeouts and unexpected statuses are data for the metrics sink,
//! not reasons to abort a cycle.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::identity::{Session, SignupRequest};
use crate::metrics::names;

/// Endpoints of the target API the generator exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Login,
    Signup,
    PublicVideos,
    Rankings,
    Vote,
    MyVideos,
    CreateVideo,
    DeleteVideo,
    Download,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "POST /api/auth/login",
            Self::Signup => "POST /api/auth/signup",
            Self::PublicVideos => "GET /api/public/videos",
            Self::Rankings => "GET /api/public/rankings",
            Self::Vote => "POST /api/public/videos/{id}/vote",
            Self::MyVideos => "GET /api/videos",
            Self::CreateVideo => "POST /api/create_video",
            Self::DeleteVideo => "DELETE /api/videos/{id}",
            Self::Download => "GET {processedUrl}",
        }
    }

    /// Latency trend the endpoint reports into
    pub fn trend_name(&self) -> &'static str {
        match self {
            Self::Login => names::AUTH_RESPONSE_TIME,
            Self::Signup => names::AUTH_RESPONSE_TIME,
            Self::PublicVideos => names::PUBLIC_VIDEOS_RESPONSE_TIME,
            Self::Rankings => names::RANKINGS_RESPONSE_TIME,
            Self::Vote => names::VOTE_RESPONSE_TIME,
            Self::MyVideos => names::MY_VIDEOS_RESPONSE_TIME,
            Self::CreateVideo => names::VIDEO_UPLOAD_RESPONSE_TIME,
            Self::DeleteVideo => names::DELETE_VIDEO_RESPONSE_TIME,
            Self::Download => names::VIDEO_DOWNLOAD_RESPONSE_TIME,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one HTTP call
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    pub endpoint: Endpoint,
    /// Response status, `None` when no response arrived
    pub status: Option<u16>,
    pub latency: Duration,
    /// Parsed JSON body, when the endpoint returns JSON and it parsed
    pub body: Option<Value>,
    pub bytes_received: u64,
    /// Transport error text (timeout, connection refused, ...)
    pub error: Option<String>,
}

impl HttpOutcome {
    fn failed(endpoint: Endpoint, latency: Duration, error: String) -> Self {
        Self {
            endpoint,
            status: None,
            latency,
            body: None,
            bytes_received: 0,
            error: Some(error),
        }
    }

    pub fn status_is(&self, code: u16) -> bool {
        self.status == Some(code)
    }

    /// 2xx response
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }

    /// JSON value at an RFC 6901 pointer such as `/video/id`
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.body
            .as_ref()
            .and_then(|b| b.pointer(pointer))
            .filter(|v| !v.is_null())
    }

    /// Non-empty `task_id` of an upload response
    pub fn task_id(&self) -> Option<String> {
        self.field("/task_id").and_then(json_id)
    }

    /// Id of the created video in an upload response
    pub fn video_id(&self) -> Option<String> {
        self.field("/video/id").and_then(json_id)
    }

    /// Bearer token from an auth response
    pub fn token(&self) -> Option<String> {
        self.field("/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// `data` array of a listing response
    pub fn data(&self) -> Option<&Vec<Value>> {
        self.field("/data").and_then(Value::as_array)
    }

    /// Status code or transport error, for log lines
    pub fn describe(&self) -> String {
        match (self.status, &self.error) {
            (Some(status), _) => status.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Render a JSON id (number or string) for use in a URL path
pub fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Multipart upload payload. `content` is shared with the fixture, not copied.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub file_name: String,
    pub title: String,
    pub content: Bytes,
}

/// Thin typed wrapper over the target API
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    transfer_timeout: Duration,
}

impl ApiClient {
    /// `request_timeout` applies to ordinary calls, `transfer_timeout` to
    /// uploads and downloads.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        transfer_timeout: Duration,
        max_idle_per_host: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            transfer_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, email: &str, password: &str) -> HttpOutcome {
        let request = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&LoginRequest { email, password });
        self.execute(Endpoint::Login, request, true).await
    }

    pub async fn signup(&self, signup: &SignupRequest) -> HttpOutcome {
        let request = self.http.post(self.url("/api/auth/signup")).json(signup);
        self.execute(Endpoint::Signup, request, true).await
    }

    /// Public listing; a session is attached when the caller has one
    pub async fn public_videos(&self, session: Option<&Session>) -> HttpOutcome {
        let mut request = self.http.get(self.url("/api/public/videos"));
        if let Some(session) = session {
            request = request.bearer_auth(&session.token);
        }
        self.execute(Endpoint::PublicVideos, request, true).await
    }

    pub async fn rankings(&self) -> HttpOutcome {
        let request = self.http.get(self.url("/api/public/rankings"));
        self.execute(Endpoint::Rankings, request, true).await
    }

    pub async fn vote(&self, session: &Session, video_id: &str) -> HttpOutcome {
        let request = self
            .http
            .post(self.url(&format!("/api/public/videos/{}/vote", video_id)))
            .bearer_auth(&session.token);
        self.execute(Endpoint::Vote, request, true).await
    }

    pub async fn my_videos(&self, session: &Session) -> HttpOutcome {
        let request = self
            .http
            .get(self.url("/api/videos"))
            .bearer_auth(&session.token);
        self.execute(Endpoint::MyVideos, request, true).await
    }

    pub async fn create_video(&self, session: &Session, upload: VideoUpload) -> HttpOutcome {
        let length = upload.content.len() as u64;
        let part = match Part::stream_with_length(Body::from(upload.content), length)
            .file_name(upload.file_name)
            .mime_str("video/mp4")
        {
            Ok(part) => part,
            Err(e) => return HttpOutcome::failed(Endpoint::CreateVideo, Duration::ZERO, e.to_string()),
        };
        let form = Form::new().text("title", upload.title).part("video_file", part);

        let request = self
            .http
            .post(self.url("/api/create_video"))
            .bearer_auth(&session.token)
            .timeout(self.transfer_timeout)
            .multipart(form);
        self.execute(Endpoint::CreateVideo, request, true).await
    }

    pub async fn delete_video(&self, session: &Session, video_id: &str) -> HttpOutcome {
        let request = self
            .http
            .delete(self.url(&format!("/api/videos/{}", video_id)))
            .bearer_auth(&session.token);
        self.execute(Endpoint::DeleteVideo, request, true).await
    }

    /// Fetch a processed asset; the body is counted and discarded
    pub async fn download(&self, url: &str) -> HttpOutcome {
        let request = self.http.get(url).timeout(self.transfer_timeout);
        self.execute(Endpoint::Download, request, false).await
    }

    async fn execute(&self, endpoint: Endpoint, request: RequestBuilder, parse_json: bool) -> HttpOutcome {
        let start = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let latency = start.elapsed();
                debug!(%endpoint, "Request failed: {}", e);
                return HttpOutcome::failed(endpoint, latency, classify(&e));
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(bytes) => {
                let latency = start.elapsed();
                let body = if parse_json && !bytes.is_empty() {
                    serde_json::from_slice(&bytes).ok()
                } else {
                    None
                };
                HttpOutcome {
                    endpoint,
                    status: Some(status),
                    latency,
                    body,
                    bytes_received: bytes.len() as u64,
                    error: None,
                }
            }
            Err(e) => HttpOutcome {
                endpoint,
                status: Some(status),
                latency: start.elapsed(),
                body: None,
                bytes_received: 0,
                error: Some(classify(&e)),
            },
        }
    }
}

fn classify(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timeout: {}", error)
    } else if error.is_connect() {
        format!("connect: {}", error)
    } else {
        format!("request: {}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(status: u16, body: Value) -> HttpOutcome {
        HttpOutcome {
            endpoint: Endpoint::CreateVideo,
            status: Some(status),
            latency: Duration::from_millis(5),
            body: Some(body),
            bytes_received: 0,
            error: None,
        }
    }

    #[test]
    fn test_field_pointers() {
        let o = outcome(200, json!({"task_id": "abc", "video": {"id": 42, "status": "uploaded"}}));
        assert_eq!(o.task_id(), Some("abc".to_string()));
        assert_eq!(o.video_id(), Some("42".to_string()));
        assert!(o.field("/video/processedUrl").is_none());
    }

    #[test]
    fn test_task_id_requires_non_empty_value() {
        assert_eq!(outcome(201, json!({"task_id": "", "video": {"id": 1}})).task_id(), None);
        assert_eq!(outcome(201, json!({"task_id": null})).task_id(), None);
        assert_eq!(outcome(201, json!({"task_id": 17})).task_id(), Some("17".to_string()));
    }

    #[test]
    fn test_token_requires_non_empty_string() {
        assert_eq!(outcome(200, json!({"token": "t0k"})).token(), Some("t0k".to_string()));
        assert_eq!(outcome(200, json!({"token": ""})).token(), None);
        assert_eq!(outcome(200, json!({"token": null})).token(), None);
    }

    #[test]
    fn test_status_helpers() {
        assert!(outcome(201, json!({})).is_success());
        assert!(!outcome(409, json!({})).is_success());
        assert!(outcome(409, json!({})).status_is(409));

        let failed = HttpOutcome::failed(Endpoint::Login, Duration::ZERO, "timeout: deadline".into());
        assert!(!failed.is_success());
        assert_eq!(failed.describe(), "timeout: deadline");
    }

    #[test]
    fn test_trend_names() {
        assert_eq!(Endpoint::Login.trend_name(), names::AUTH_RESPONSE_TIME);
        assert_eq!(Endpoint::Signup.trend_name(), names::AUTH_RESPONSE_TIME);
        assert_eq!(Endpoint::Download.trend_name(), names::VIDEO_DOWNLOAD_RESPONSE_TIME);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new(
            "http://localhost:8080/",
            Duration::from_secs(5),
            Duration::from_secs(60),
            10,
        )
        .unwrap();
        assert_eq!(client.url("/api/videos"), "http://localhost:8080/api/videos");
    }
}
