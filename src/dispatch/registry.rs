//! Versioned handler registry (§4.I): routes a task to the engine that
//! implements its job-run's major version.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::task::{FailureClassification, TaskRequest, TaskResponse};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler registry has a gap at major version {0}: every version from the lowest to the highest registered must have a handler")]
    Gap(u32),
    #[error("handler registry has no entries")]
    Empty,
}

/// One task-kind engine, addressable by the job-run's major version.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, request: TaskRequest, cancel: CancellationToken) -> TaskResponse;
}

/// Outcome of resolving a job-run version string against the registry.
pub enum Resolution {
    Handler(Arc<dyn TaskHandler>),
    /// The version string itself could not be parsed as `major.minor.patch`.
    MalformedVersion,
    /// The version parsed fine but no handler covers its major version.
    UnsupportedVersion,
}

/// `major_version -> handler`, validated at construction to have no gaps
/// between the lowest and highest registered major version.
pub struct HandlerRegistry {
    handlers: BTreeMap<u32, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("versions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new(handlers: BTreeMap<u32, Arc<dyn TaskHandler>>) -> Result<Self, RegistryError> {
        let (min, max) = match (handlers.keys().min(), handlers.keys().max()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => return Err(RegistryError::Empty),
        };
        for major in min..=max {
            if !handlers.contains_key(&major) {
                return Err(RegistryError::Gap(major));
            }
        }
        Ok(Self { handlers })
    }

    /// Parses `job_run_version` as `major.minor.patch` and resolves the
    /// handler for its major component (§4.I).
    #[must_use]
    pub fn resolve(&self, job_run_version: &str) -> Resolution {
        let Some(major) = parse_major_version(job_run_version) else {
            return Resolution::MalformedVersion;
        };
        match self.handlers.get(&major) {
            Some(handler) => Resolution::Handler(handler.clone()),
            None => Resolution::UnsupportedVersion,
        }
    }
}

fn parse_major_version(version: &str) -> Option<u32> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next()?;
    let patch = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    minor.parse::<u32>().ok()?;
    patch.parse::<u32>().ok()?;
    Some(major)
}

impl Resolution {
    #[must_use]
    pub fn failure_tag(&self) -> Option<FailureClassification> {
        match self {
            Self::Handler(_) => None,
            Self::MalformedVersion => Some(FailureClassification::Unknown),
            Self::UnsupportedVersion => Some(FailureClassification::AgentUnsupportedVersion),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct StubHandler;

    #[async_trait]
    impl TaskHandler for StubHandler {
        async fn handle(&self, _request: TaskRequest, _cancel: CancellationToken) -> TaskResponse {
            unreachable!("not exercised by these tests")
        }
    }

    #[test]
    fn detects_a_gap_between_the_lowest_and_highest_major_version() {
        let mut handlers: BTreeMap<u32, Arc<dyn TaskHandler>> = BTreeMap::new();
        handlers.insert(1, Arc::new(StubHandler));
        handlers.insert(3, Arc::new(StubHandler));
        let err = HandlerRegistry::new(handlers).unwrap_err();
        assert!(matches!(err, RegistryError::Gap(2)));
    }

    #[test]
    fn malformed_version_string_is_unknown_not_unsupported() {
        let mut handlers: BTreeMap<u32, Arc<dyn TaskHandler>> = BTreeMap::new();
        handlers.insert(1, Arc::new(StubHandler));
        let registry = HandlerRegistry::new(handlers).unwrap();
        assert!(matches!(registry.resolve("not-a-version"), Resolution::MalformedVersion));
    }

    #[test]
    fn well_formed_version_with_missing_major_is_unsupported() {
        let mut handlers: BTreeMap<u32, Arc<dyn TaskHandler>> = BTreeMap::new();
        handlers.insert(1, Arc::new(StubHandler));
        let registry = HandlerRegistry::new(handlers).unwrap();
        assert!(matches!(registry.resolve("2.0.0"), Resolution::UnsupportedVersion));
    }

    #[test]
    fn well_formed_version_resolves_its_handler() {
        let mut handlers: BTreeMap<u32, Arc<dyn TaskHandler>> = BTreeMap::new();
        handlers.insert(1, Arc::new(StubHandler));
        let registry = HandlerRegistry::new(handlers).unwrap();
        assert!(matches!(registry.resolve("1.4.2"), Resolution::Handler(_)));
    }
}
