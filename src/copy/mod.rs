//! The copy engine: single-file and bundle upload orchestration against the
//! sink's resumable-upload HTTP conventions (§4.F).

pub mod engine;
pub mod pipeline;
pub mod sink_client;

pub use engine::{is_download, BundleCopyEngine, CopyEngine, CopyEngineConfig, CopyEngineError, CopyOutcome};
pub use sink_client::{ChunkOutcome, SinkClient, SinkError, SinkObject};
