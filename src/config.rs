//! `AgentConfig`: the resolved runtime configuration the core's engines are
//! built from (§3.1, §6). Built from [`crate::cli::Args`] the way the
//! teacher's `main.rs` turns `cli::Args` into `RetryPolicy`/`RateLimiter`
//! construction parameters.

use std::time::Duration;

use crate::cli::Args;
use crate::copy::CopyEngineConfig;
use crate::listing::ListEngineConfig;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub internal_testing: bool,
    pub copy_concurrency: usize,
    pub file_read_buf: usize,
    pub copy_chunk_size: u64,
    pub copy_entire_file_limit: u64,
    pub copy_work_duration: Duration,
    pub concurrent_delete_max: usize,
    pub bandwidth_limit_bytes_per_sec: i64,
    pub list_file_size_threshold: u64,
    pub allowed_dir_bytes: usize,
}

impl AgentConfig {
    #[must_use]
    pub fn from_args(args: &Args, logical_cpus: usize) -> Self {
        let copy_concurrency = if args.copy_files > 0 { args.copy_files } else { args.copy_files_per_cpu.max(1) * logical_cpus.max(1) };

        Self {
            internal_testing: args.internal_testing,
            copy_concurrency,
            file_read_buf: args.file_read_buf,
            copy_chunk_size: args.copy_chunk_size,
            copy_entire_file_limit: args.copy_entire_file_limit,
            copy_work_duration: Duration::from_secs(args.copy_work_duration_secs),
            concurrent_delete_max: args.concurrent_delete_max.max(crate::delete::MIN_CONCURRENCY),
            bandwidth_limit_bytes_per_sec: args.bandwidth_limit_bytes_per_sec,
            list_file_size_threshold: args.list_file_size_threshold,
            allowed_dir_bytes: args.allowed_dir_bytes,
        }
    }

    #[must_use]
    pub fn copy_engine_config(&self) -> CopyEngineConfig {
        CopyEngineConfig {
            copy_entire_file_limit: self.copy_entire_file_limit,
            chunk_size: self.copy_chunk_size,
            copy_work_duration: self.copy_work_duration,
            buffer_capacity: self.file_read_buf,
        }
    }

    #[must_use]
    pub fn list_engine_config(&self) -> ListEngineConfig {
        ListEngineConfig {
            list_file_size_threshold: self.list_file_size_threshold,
            allowed_dir_bytes: self.allowed_dir_bytes,
        }
    }

    #[must_use]
    pub fn user_agent(&self, product_ua: &str, internal_ua: &str) -> String {
        if self.internal_testing {
            internal_ua.to_string()
        } else {
            product_ua.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn explicit_copy_files_overrides_per_cpu_multiplier() {
        let args = Args::parse_from(["ingest-agent", "--copy-files", "3"]);
        let config = AgentConfig::from_args(&args, 16);
        assert_eq!(config.copy_concurrency, 3);
    }

    #[test]
    fn per_cpu_multiplier_applies_when_copy_files_unset() {
        let args = Args::parse_from(["ingest-agent", "--copy-files-per-cpu", "2"]);
        let config = AgentConfig::from_args(&args, 4);
        assert_eq!(config.copy_concurrency, 8);
    }

    #[test]
    fn internal_testing_flag_swaps_user_agent() {
        let args = Args::parse_from(["ingest-agent", "--internal-testing"]);
        let config = AgentConfig::from_args(&args, 4);
        assert_eq!(config.user_agent("prod-ua/1.0", "internal-ua/1.0"), "internal-ua/1.0");
    }
}
