//! CLI flags recognized by the core (§6), parsed with `clap::Parser` the
//! way the teacher's `cli.rs` parses the downloader's flags.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "ingest-agent", about = "On-premises file-ingest agent")]
pub struct Args {
    /// Swap the User-Agent string sent to the sink; no other behavior change.
    #[arg(long)]
    pub internal_testing: bool,

    /// Default copy-concurrency multiplier, applied against the number of
    /// logical CPUs when `copy_files` is not set.
    #[arg(long, default_value_t = 8)]
    pub copy_files_per_cpu: usize,

    /// Overrides copy concurrency outright; any value `> 0` wins over the
    /// per-CPU multiplier.
    #[arg(long, default_value_t = 0)]
    pub copy_files: usize,

    /// Buffered-reader size for each concurrent copy, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub file_read_buf: usize,

    /// Target chunk size for resumable uploads, in bytes.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub copy_chunk_size: u64,

    /// Threshold below which the entire-file path is taken instead of a
    /// resumable upload.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub copy_entire_file_limit: u64,

    /// Per-task wall-time budget, in seconds, for time-aware progress.
    #[arg(long, default_value_t = 60)]
    pub copy_work_duration_secs: u64,

    /// Delete concurrency.
    #[arg(long, default_value_t = 10)]
    pub concurrent_delete_max: usize,

    /// Outbound bandwidth limit in bytes/sec; use `0` for unlimited.
    #[arg(long, default_value_t = 0)]
    pub bandwidth_limit_bytes_per_sec: i64,

    /// Listing walk bound: cumulative files emitted plus directories still
    /// queued at which the walk stops (at least one directory is always
    /// processed regardless, B3).
    #[arg(long, default_value_t = 1_000_000)]
    pub list_file_size_threshold: u64,

    /// Listing walk bound: the pending-directory store's memory footprint,
    /// in bytes, at which the walk stops.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub allowed_dir_bytes: usize,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but error-level logs.
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_flag_table() {
        let args = Args::parse_from(["ingest-agent"]);
        assert!(!args.internal_testing);
        assert_eq!(args.copy_files_per_cpu, 8);
        assert_eq!(args.copy_files, 0);
        assert_eq!(args.concurrent_delete_max, 10);
    }

    #[test]
    fn copy_files_override_is_parsed() {
        let args = Args::parse_from(["ingest-agent", "--copy-files", "4"]);
        assert_eq!(args.copy_files, 4);
    }
}
