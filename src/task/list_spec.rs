//! Directory-listing task specification (§3, §4.E).

use serde::{Deserialize, Serialize};

/// A directory-listing task: which directories to walk and where the two
/// resulting artifacts (the sorted listing, and the unexplored-directory
/// set) land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSpec {
    pub dst_bucket: String,
    pub dst_list_object: String,
    pub dst_unexplored_object: String,
    pub list_generation_match: i64,
    pub unexplored_generation_match: i64,
    pub source_dirs: Vec<String>,
    pub root_dir: String,
}

impl ListSpec {
    #[must_use]
    pub fn is_seed_empty(&self) -> bool {
        self.source_dirs.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn detects_empty_seed() {
        let spec = ListSpec {
            dst_bucket: "b".into(),
            dst_list_object: "list.bin".into(),
            dst_unexplored_object: "unexplored.bin".into(),
            list_generation_match: 0,
            unexplored_generation_match: 0,
            source_dirs: vec![],
            root_dir: "/data".into(),
        };
        assert!(spec.is_seed_empty());
    }
}
