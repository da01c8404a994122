//! The statistics tracker (§4.C): a single-writer collector plus the
//! fixed-format periodic log line it emits.

pub mod collector;
pub mod periodic_log;

pub use collector::{spawn, StatsHandle, TaskKind};
pub use periodic_log::{format_periodic_log, parse_periodic_log, PeriodicSnapshot, TaskKindSnapshot};
