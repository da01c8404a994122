//! Fixed-shape pulse statistics: additive counters diffed by the stats
//! collector to produce the "since last pulse" view (§3, §4.C).

use serde::{Deserialize, Serialize};

/// A snapshot of the agent's lifetime (or delta) counters.
///
/// `add`/`sub` are component-wise and are each other's inverse: for any `a`
/// and `b`, `(a.add(&b)).sub(&b) == a` (round-trip law L3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseStats {
    pub copy_bytes: u64,
    pub list_bytes: u64,

    pub copy_open_ms: u64,
    pub copy_stat_ms: u64,
    pub copy_seek_ms: u64,
    pub copy_read_ms: u64,
    pub copy_write_ms: u64,

    pub list_open_ms: u64,
    pub list_read_ms: u64,
    pub list_write_ms: u64,

    pub copy_retries: u64,
    pub delete_retries: u64,
}

impl PulseStats {
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Component-wise addition.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            copy_bytes: self.copy_bytes + other.copy_bytes,
            list_bytes: self.list_bytes + other.list_bytes,
            copy_open_ms: self.copy_open_ms + other.copy_open_ms,
            copy_stat_ms: self.copy_stat_ms + other.copy_stat_ms,
            copy_seek_ms: self.copy_seek_ms + other.copy_seek_ms,
            copy_read_ms: self.copy_read_ms + other.copy_read_ms,
            copy_write_ms: self.copy_write_ms + other.copy_write_ms,
            list_open_ms: self.list_open_ms + other.list_open_ms,
            list_read_ms: self.list_read_ms + other.list_read_ms,
            list_write_ms: self.list_write_ms + other.list_write_ms,
            copy_retries: self.copy_retries + other.copy_retries,
            delete_retries: self.delete_retries + other.delete_retries,
        }
    }

    /// Component-wise subtraction, saturating at zero per field so a stale
    /// snapshot diff never wraps.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            copy_bytes: self.copy_bytes.saturating_sub(other.copy_bytes),
            list_bytes: self.list_bytes.saturating_sub(other.list_bytes),
            copy_open_ms: self.copy_open_ms.saturating_sub(other.copy_open_ms),
            copy_stat_ms: self.copy_stat_ms.saturating_sub(other.copy_stat_ms),
            copy_seek_ms: self.copy_seek_ms.saturating_sub(other.copy_seek_ms),
            copy_read_ms: self.copy_read_ms.saturating_sub(other.copy_read_ms),
            copy_write_ms: self.copy_write_ms.saturating_sub(other.copy_write_ms),
            list_open_ms: self.list_open_ms.saturating_sub(other.list_open_ms),
            list_read_ms: self.list_read_ms.saturating_sub(other.list_read_ms),
            list_write_ms: self.list_write_ms.saturating_sub(other.list_write_ms),
            copy_retries: self.copy_retries.saturating_sub(other.copy_retries),
            delete_retries: self.delete_retries.saturating_sub(other.delete_retries),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_are_inverses() {
        let a = PulseStats {
            copy_bytes: 10,
            copy_retries: 2,
            ..PulseStats::zero()
        };
        let b = PulseStats {
            copy_bytes: 5,
            list_bytes: 7,
            ..PulseStats::zero()
        };

        assert_eq!(a.add(&b).sub(&b), a);
    }

    #[test]
    fn zero_is_additive_identity() {
        let a = PulseStats {
            copy_bytes: 42,
            copy_write_ms: 3,
            ..PulseStats::zero()
        };
        assert_eq!(a.add(&PulseStats::zero()), a);
    }
}
