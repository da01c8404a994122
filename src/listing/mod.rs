//! Depth-first directory enumeration producing a sorted, framed artifact
//! (§4.E).

pub mod frame;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::dirstore::DirInfoStore;
use crate::task::failure::FailureClassification;
use crate::task::list_spec::ListSpec;
use crate::task::response::ListLog;

use crate::copy::{SinkClient, SinkError};
use frame::ListingRecord;

#[derive(Debug, Error)]
pub enum ListError {
    #[error("entry name contains a newline: {0:?}")]
    InvalidFileName(String),
    #[error("filesystem error walking {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("publishing the listing artifact failed: {source}")]
    Sink { source: SinkError },
}

impl ListError {
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    #[must_use]
    pub fn sink(source: SinkError) -> Self {
        Self::Sink { source }
    }
}

/// Maps a listing failure onto the closed failure-tag set (§7). Mirrors
/// `copy::engine::classify_sink_error`'s precondition/permission mapping
/// since both engines write artifacts to the same sink.
#[must_use]
pub fn classify_list_error(error: &ListError) -> FailureClassification {
    match error {
        ListError::InvalidFileName(_) => FailureClassification::InvalidFileName,
        ListError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => FailureClassification::SourceDirNotFound,
        ListError::Io { .. } => FailureClassification::Unknown,
        ListError::Sink { source: SinkError::PreconditionFailed { .. } } => FailureClassification::PreconditionFailed,
        ListError::Sink { source: SinkError::Status { status, .. } } if status.as_u16() == 403 => FailureClassification::ServicePermission,
        ListError::Sink { .. } => FailureClassification::Unknown,
    }
}

/// Output of a completed listing walk: the two framed artifacts plus the
/// summary log (§4.E step 5).
#[derive(Debug)]
pub struct ListingResult {
    pub listing_bytes: Vec<u8>,
    pub unexplored_bytes: Vec<u8>,
    pub log: ListLog,
}

/// Runs the bounded depth-first walk discipline of §4.E steps 1-5.
///
/// `list_file_size_threshold` bounds "files emitted + directories still
/// queued"; `allowed_dir_bytes` bounds the directory store's memory
/// footprint. At least one directory is always processed, guaranteeing
/// forward progress even when the initial seed alone exceeds both bounds
/// (B3).
#[instrument(skip(source_dirs, root_dir))]
pub async fn walk(source_dirs: &[String], root_dir: &str, list_file_size_threshold: u64, allowed_dir_bytes: usize) -> Result<ListingResult, ListError> {
    let mut store = DirInfoStore::new();
    for dir in source_dirs {
        // Empty seed entries are simply skipped; the store itself rejects
        // them and an empty seed set degenerates to an empty listing.
        let _ = store.add(dir.clone());
    }

    let mut listing_bytes = Vec::new();
    let mut files_emitted: u64 = 0;
    let mut bytes_found: u64 = 0;
    let mut dirs_discovered: u64 = 0;
    let mut dirs_walked: u64 = 0;

    loop {
        let over_count_bound = files_emitted + store.len() as u64 >= list_file_size_threshold;
        let over_memory_bound = store.size() >= allowed_dir_bytes;
        if (over_count_bound || over_memory_bound) && dirs_walked >= 1 {
            break;
        }

        let Some(dir_path) = store.remove_first() else {
            break;
        };

        let mut entries = tokio::fs::read_dir(&dir_path).await.map_err(|e| ListError::io(dir_path.clone(), e))?;
        let mut files: Vec<(String, i64, u64)> = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| ListError::io(dir_path.clone(), e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains('\n') {
                return Err(ListError::InvalidFileName(name));
            }

            let metadata = entry.metadata().await.map_err(|e| ListError::io(dir_path.clone(), e))?;
            let full_path = entry.path();
            let relative = relativize(&full_path, root_dir);

            if metadata.is_dir() {
                let _ = store.add(relative);
                dirs_discovered += 1;
            } else {
                let mtime_unix = metadata.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
                files.push((relative, mtime_unix, metadata.len()));
            }
        }

        files.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        for (path, mtime_unix, size) in &files {
            ListingRecord::FileInfo {
                path: path.clone(),
                mtime_unix: *mtime_unix,
                size: *size,
            }
            .write_framed(&mut listing_bytes);
            bytes_found += size;
        }
        files_emitted += files.len() as u64;

        ListingRecord::DirectoryHeader {
            path: dir_path.clone(),
            num_entries: files.len() as u64,
        }
        .write_framed(&mut listing_bytes);

        dirs_walked += 1;
        debug!(dir = %dir_path, files = files.len(), "directory walked");
    }

    let mut unexplored_bytes = Vec::new();
    for path in store.drain_remaining() {
        ListingRecord::DirectoryInfo { path }.write_framed(&mut unexplored_bytes);
    }

    Ok(ListingResult {
        listing_bytes,
        unexplored_bytes,
        log: ListLog {
            files_emitted,
            bytes_found,
            dirs_discovered,
            dirs_walked,
        },
    })
}

/// Tunables a handler threads through the engine; mirrors the relevant
/// slice of `AgentConfig` without coupling the engine to the whole config
/// struct, the way `copy::engine::CopyEngineConfig` does.
#[derive(Debug, Clone, Copy)]
pub struct ListEngineConfig {
    pub list_file_size_threshold: u64,
    pub allowed_dir_bytes: usize,
}

impl Default for ListEngineConfig {
    fn default() -> Self {
        Self {
            list_file_size_threshold: 1_000_000,
            allowed_dir_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Runs the walk of §4.E steps 1-5 and publishes both resulting artifacts
/// to the sink under the spec's generation-match preconditions (§4.E step
/// 6, §7's `precondition-failed` mapping).
pub struct ListEngine {
    sink: Arc<SinkClient>,
    config: ListEngineConfig,
}

impl ListEngine {
    #[must_use]
    pub fn new(sink: Arc<SinkClient>, config: ListEngineConfig) -> Self {
        Self { sink, config }
    }

    #[instrument(skip(self, spec), fields(dst = %spec.dst_list_object))]
    pub async fn run(&self, spec: &ListSpec) -> Result<ListLog, ListError> {
        let result = walk(&spec.source_dirs, &spec.root_dir, self.config.list_file_size_threshold, self.config.allowed_dir_bytes).await?;

        self.sink
            .upload_entire_file(&spec.dst_bucket, &spec.dst_list_object, spec.list_generation_match, reqwest::Body::from(result.listing_bytes), "application/octet-stream", 0)
            .await
            .map_err(ListError::sink)?;

        self.sink
            .upload_entire_file(
                &spec.dst_bucket,
                &spec.dst_unexplored_object,
                spec.unexplored_generation_match,
                reqwest::Body::from(result.unexplored_bytes),
                "application/octet-stream",
                0,
            )
            .await
            .map_err(ListError::sink)?;

        debug!(files = result.log.files_emitted, dirs_walked = result.log.dirs_walked, "listing artifacts published");
        Ok(result.log)
    }
}

fn relativize(path: &Path, root_dir: &str) -> String {
    path.strip_prefix(root_dir).map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn walks_single_directory_sorted_alphabetically() {
        let root = tempdir().unwrap();
        for name in ["d", "b", "c", "a"] {
            tokio::fs::write(root.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(root.path().join("y")).await.unwrap();
        tokio::fs::create_dir(root.path().join("x")).await.unwrap();

        let result = walk(&[root.path().to_string_lossy().into_owned()], root.path().to_str().unwrap(), 1_000_000, 1_000_000).await.unwrap();

        assert_eq!(result.log.files_emitted, 4);
        assert_eq!(result.log.dirs_discovered, 2);
        assert_eq!(result.log.dirs_walked, 1);

        let records = frame::read_all(&result.listing_bytes).unwrap();
        let names: Vec<String> = records
            .iter()
            .filter_map(|r| match r {
                ListingRecord::FileInfo { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()]);

        let unexplored = frame::read_all(&result.unexplored_bytes).unwrap();
        let unexplored_names: Vec<String> = unexplored
            .iter()
            .map(|r| match r {
                ListingRecord::DirectoryInfo { path } => path.clone(),
                _ => panic!("unexpected record"),
            })
            .collect();
        assert_eq!(unexplored_names, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn newline_in_name_is_rejected() {
        let root = tempdir().unwrap();
        tokio::fs::write(root.path().join("bad\nname"), b"x").await.unwrap();

        let err = walk(&[root.path().to_string_lossy().into_owned()], root.path().to_str().unwrap(), 1_000_000, 1_000_000).await.unwrap_err();
        assert!(matches!(err, ListError::InvalidFileName(_)));
    }

    #[tokio::test]
    async fn at_least_one_directory_is_processed_despite_memory_pressure() {
        let root = tempdir().unwrap();
        tokio::fs::write(root.path().join("a"), b"x").await.unwrap();

        // allowed_dir_bytes of 0 would otherwise stop the walk before any
        // directory is processed; B3 requires forward progress regardless.
        let result = walk(&[root.path().to_string_lossy().into_owned()], root.path().to_str().unwrap(), 0, 0).await.unwrap();
        assert_eq!(result.log.dirs_walked, 1);
    }

    #[tokio::test]
    async fn engine_publishes_both_artifacts_to_the_sink() {
        use base64::Engine as _;
        use reqwest::Client;
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let root = tempdir().unwrap();
        tokio::fs::write(root.path().join("a"), b"x").await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/b/bucket/o$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": "0",
                "crc32c": base64::engine::general_purpose::STANDARD.encode(0u32.to_be_bytes()),
            })))
            .expect(2)
            .mount(&server)
            .await;

        let sink = Arc::new(SinkClient::new(Client::new(), server.uri(), "test-ua/1.0"));
        let engine = ListEngine::new(sink, ListEngineConfig::default());

        let spec = ListSpec {
            dst_bucket: "bucket".into(),
            dst_list_object: "list.bin".into(),
            dst_unexplored_object: "unexplored.bin".into(),
            list_generation_match: 0,
            unexplored_generation_match: 0,
            source_dirs: vec![root.path().to_string_lossy().into_owned()],
            root_dir: root.path().to_string_lossy().into_owned(),
        };

        let log = engine.run(&spec).await.unwrap();
        assert_eq!(log.files_emitted, 1);
    }

    #[test]
    fn precondition_failed_from_the_sink_maps_to_the_closed_tag() {
        let err = ListError::sink(SinkError::PreconditionFailed { url: "u".into() });
        assert_eq!(classify_list_error(&err), FailureClassification::PreconditionFailed);
    }

    #[test]
    fn newline_in_name_classifies_as_invalid_file_name() {
        let err = ListError::InvalidFileName("bad\nname".into());
        assert_eq!(classify_list_error(&err), FailureClassification::InvalidFileName);
    }
}
