//! The task data model: requests, specs, responses, and the fixed-shape
//! pulse counters threaded through every engine (§3).

pub mod copy_spec;
pub mod delete_spec;
pub mod failure;
pub mod list_spec;
pub mod pulse;
pub mod request;
pub mod response;

pub use copy_spec::{CopyBundleEntry, CopyBundleSpec, CopySpec, EntryStatus, ResumeState};
pub use delete_spec::{DeleteBundleEntry, DeleteBundleSpec};
pub use failure::FailureClassification;
pub use list_spec::ListSpec;
pub use pulse::PulseStats;
pub use request::{TaskRequest, TaskSpec};
pub use response::{CopyBundleLog, CopyLog, DeleteBundleLog, DeleteEntryLog, ListLog, ResponseTimestamps, TaskLog, TaskResponse, TaskStatus};
