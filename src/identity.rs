//! Agent identity fields carried on each pulse (§6). Out of scope for
//! computation logic; modeled as a plain struct so the stats tracker and
//! dispatch loop can embed it without constructing it themselves.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub host_name: String,
    pub process_id: u32,
    pub user_prefix: Option<String>,
    pub container_id: Option<String>,
}

impl AgentIdentity {
    /// Builds an identity from the running process's own view of itself.
    /// Callers on an actual deployment pass a real `user_prefix`/
    /// `container_id`; both are `None` when the agent runs bare.
    #[must_use]
    pub fn current(user_prefix: Option<String>, container_id: Option<String>) -> Self {
        Self {
            host_name: hostname(),
            process_id: std::process::id(),
            user_prefix,
            container_id,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()).unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn current_identity_carries_this_process_id() {
        let identity = AgentIdentity::current(None, None);
        assert_eq!(identity.process_id, std::process::id());
        assert!(identity.user_prefix.is_none());
    }
}
