//! The sink's resumable-upload HTTP conventions (§4.F.2–§4.F.4, §6).
//!
//! Kept in scope deliberately: only the bus transport and credential
//! refresh are external collaborators (§1); the sink's own wire
//! conventions are exactly what this module implements, the way the
//! teacher's `download/client.rs` implements the download side of an
//! HTTP transfer protocol.

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::json;
use thiserror::Error;
use url::Url;

const NO_308_HEADER: &str = "X-Guploader-No-308";
const OVERRIDE_STATUS_HEADER: &str = "X-Http-Status-Code-Override";
const MTIME_ATTR_NAME: &str = "goog-reserved-file-mtime";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, #[source] source: reqwest::Error },
    #[error("sink returned malformed JSON for {url}: {source}")]
    MalformedResponse { url: String, #[source] source: serde_json::Error },
    #[error("sink response for {url} is missing field {field}")]
    MissingField { url: String, field: &'static str },
    #[error("resumable upload handle for {url} is gone (410)")]
    ResumableIdGone { url: String },
    #[error("sink returned precondition-failed (412) for {url}")]
    PreconditionFailed { url: String },
    #[error("sink returned {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("a final chunk response indicated resume-incomplete, which is an internal error")]
    FinalChunkResumeIncomplete,
}

impl SinkError {
    #[must_use]
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Request { url: url.into(), source }
    }

    /// Whether a PUT-chunk failure is retryable per §4.F.4: 5xx, 408, 429,
    /// or a tagged-transient network error. 410 is fatal, handled by the
    /// dedicated variant above.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT || *status == StatusCode::TOO_MANY_REQUESTS,
            Self::Request { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

/// Description of an object as the sink reports it after a write.
#[derive(Debug, Clone, Default)]
pub struct SinkObject {
    pub size: u64,
    pub crc32c: u32,
    pub md5_base64: String,
    pub mtime_unix: i64,
}

fn decode_base64_crc32c(value: &str) -> u32 {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .ok()
        .filter(|bytes| bytes.len() == 4)
        .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .unwrap_or(0)
}

fn parse_sink_object(url: &str, body: &[u8]) -> Result<SinkObject, SinkError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|source| SinkError::MalformedResponse { url: url.to_string(), source })?;

    let size = value.get("size").and_then(|v| v.as_str()).and_then(|s| s.parse::<u64>().ok()).ok_or(SinkError::MissingField { url: url.to_string(), field: "size" })?;
    let crc32c_b64 = value.get("crc32c").and_then(|v| v.as_str()).ok_or(SinkError::MissingField { url: url.to_string(), field: "crc32c" })?;
    let md5_base64 = value.get("md5Hash").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let mtime_unix = value
        .get("metadata")
        .and_then(|m| m.get(MTIME_ATTR_NAME))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    Ok(SinkObject {
        size,
        crc32c: decode_base64_crc32c(crc32c_b64),
        md5_base64,
        mtime_unix,
    })
}

/// Thin wrapper over `reqwest::Client` carrying the sink's base URL and the
/// agent's User-Agent string (swapped for internal testing, §6).
pub struct SinkClient {
    http: Client,
    base_url: String,
    user_agent: String,
}

impl SinkClient {
    #[must_use]
    pub fn new(http: Client, base_url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Builds a sink URL with `segments` as percent-encoded path components,
    /// so a bucket/object name containing `&`, `#`, `%`, or whitespace can't
    /// spill into the query string or truncate the path.
    fn build_url(&self, segments: &[&str]) -> Url {
        let mut url = Url::parse(&self.base_url).expect("configured sink base URL must be a valid URL");
        url.path_segments_mut().expect("sink base URL cannot be a cannot-be-a-base URL").extend(segments);
        url
    }

    /// §4.F.3: initiates a resumable upload, returning the handle URL from
    /// the `Location` header.
    pub async fn prepare_resumable_upload(&self, bucket: &str, object: &str, generation_match: i64, source_size: u64, content_type: &str, mtime_unix: i64) -> Result<String, SinkError> {
        let mut url = self.build_url(&["b", bucket, "o"]);
        url.query_pairs_mut().append_pair("uploadType", "resumable").append_pair("alt", "json").append_pair("ifGenerationMatch", &generation_match.to_string());
        let url = url.to_string();

        let body = json!({
            "name": object,
            "bucket": bucket,
            "metadata": { MTIME_ATTR_NAME: mtime_unix.to_string() },
        });

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("X-Upload-Content-Length", source_size.to_string())
            .header("X-Upload-Content-Type", content_type)
            .header("User-Agent", &self.user_agent)
            .json(&body)
            .send()
            .await
            .map_err(|source| SinkError::request(&url, source))?;

        classify_status(&url, response.status())?;

        response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(SinkError::MissingField { url, field: "Location" })
    }

    /// §4.F.4: sends one chunk. `is_final` tells the caller whether to
    /// expect a final object description or a resume-incomplete signal.
    pub async fn send_chunk(&self, handle_url: &str, body: reqwest::Body, start: u64, bytes_to_copy: u64, total: Option<u64>, is_final: bool) -> Result<ChunkOutcome, SinkError> {
        let end = start + bytes_to_copy;
        let content_range = match (is_final, total) {
            (true, Some(0)) => format!("bytes */{}", start),
            (true, Some(total)) => format!("bytes {start}-{}/{total}", end.saturating_sub(1)),
            _ => format!("bytes {start}-{}/*", end.saturating_sub(1)),
        };

        let response = self
            .http
            .put(handle_url)
            .header("Content-Length", bytes_to_copy.to_string())
            .header("Content-Range", content_range)
            .header(NO_308_HEADER, "yes")
            .body(body)
            .send()
            .await
            .map_err(|source| SinkError::request(handle_url, source))?;

        if response.status() == StatusCode::GONE {
            return Err(SinkError::ResumableIdGone { url: handle_url.to_string() });
        }
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(SinkError::PreconditionFailed { url: handle_url.to_string() });
        }

        let resume_incomplete = response.headers().get(OVERRIDE_STATUS_HEADER).and_then(|v| v.to_str().ok()) == Some("308");

        if resume_incomplete {
            if is_final {
                return Err(SinkError::FinalChunkResumeIncomplete);
            }
            return Ok(ChunkOutcome::ResumeIncomplete);
        }

        classify_status(handle_url, response.status())?;

        let body_bytes = response.bytes().await.map_err(|source| SinkError::request(handle_url, source))?;
        Ok(ChunkOutcome::Final(parse_sink_object(handle_url, &body_bytes)?))
    }

    /// §4.F.2: whole-file upload in a single request.
    pub async fn upload_entire_file(&self, bucket: &str, object: &str, generation_match: i64, body: reqwest::Body, content_type: &str, mtime_unix: i64) -> Result<SinkObject, SinkError> {
        let mut url = self.build_url(&["b", bucket, "o"]);
        url.query_pairs_mut().append_pair("uploadType", "media").append_pair("name", object).append_pair("ifGenerationMatch", &generation_match.to_string());
        let url = url.to_string();

        let response = self
            .http
            .post(&url)
            .header("Content-Type", content_type)
            .header("X-Goog-Meta-Mtime", mtime_unix.to_string())
            .header("User-Agent", &self.user_agent)
            .body(body)
            .send()
            .await
            .map_err(|source| SinkError::request(&url, source))?;

        classify_status(&url, response.status())?;
        let body_bytes = response.bytes().await.map_err(|source| SinkError::request(&url, source))?;
        parse_sink_object(&url, &body_bytes)
    }

    /// Object delete, §4.G. Callers normalize 404 to success.
    pub async fn delete_object(&self, bucket: &str, object: &str, generation_match: i64) -> Result<(), SinkError> {
        let mut url = self.build_url(&["b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("ifGenerationMatch", &generation_match.to_string());
        let url = url.to_string();
        let response = self.http.delete(&url).header("User-Agent", &self.user_agent).send().await.map_err(|source| SinkError::request(&url, source))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        classify_status(&url, response.status())
    }
}

fn classify_status(url: &str, status: StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::PRECONDITION_FAILED {
        return Err(SinkError::PreconditionFailed { url: url.to_string() });
    }
    if status == StatusCode::GONE {
        return Err(SinkError::ResumableIdGone { url: url.to_string() });
    }
    Err(SinkError::Status { url: url.to_string(), status })
}

/// Outcome of one chunk PUT.
#[derive(Debug)]
pub enum ChunkOutcome {
    ResumeIncomplete,
    Final(SinkObject),
}
