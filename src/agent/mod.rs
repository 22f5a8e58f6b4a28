//! The watch/log/filter topology. [Activity](activity::Activity) records are
//! produced by watchers, fan out to subscribed loggers, and may pass through
//! filters that transform or drop them along the way.

use anyhow::Result;
use async_trait::async_trait;

pub mod activity;
pub mod topology;

/// Which part an agent plays in the topology. Set explicitly at construction
/// instead of being inferred from the concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Watcher,
    Logger,
    Filter,
}

impl AgentKind {
    /// An agent that both emits and accepts activities is a filter.
    pub fn from_capabilities(emits: bool, accepts: bool) -> Option<AgentKind> {
        match (emits, accepts) {
            (true, true) => Some(AgentKind::Filter),
            (true, false) => Some(AgentKind::Watcher),
            (false, true) => Some(AgentKind::Logger),
            (false, false) => None,
        }
    }

    /// Root-level settings key holding every agent of this kind.
    pub fn namespace(&self) -> &'static str {
        match self {
            AgentKind::Watcher => "watchers",
            AgentKind::Logger => "loggers",
            AgentKind::Filter => "filters",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            AgentKind::Watcher => "Watcher",
            AgentKind::Logger => "Logger",
            AgentKind::Filter => "Filter",
        }
    }
}

/// A schedulable unit participating in the topology. Each agent runs as its
/// own long-lived task; `run` is expected to block until the daemon's stop
/// signal fires.
#[async_trait]
pub trait Agent: Send {
    /// Type-derived name, for example `FocusWatcher`.
    fn name(&self) -> &'static str;

    fn kind(&self) -> AgentKind;

    /// Settings lookup key: the name with its kind suffix stripped,
    /// lower-cased.
    fn identifier(&self) -> String {
        let name = self.name();
        name.strip_suffix(self.kind().suffix())
            .unwrap_or(name)
            .to_ascii_lowercase()
    }

    async fn run(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::{Agent, AgentKind};

    struct FocusWatcher;

    #[async_trait]
    impl Agent for FocusWatcher {
        fn name(&self) -> &'static str {
            "FocusWatcher"
        }

        fn kind(&self) -> AgentKind {
            AgentKind::Watcher
        }

        async fn run(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_identifier_strips_kind_suffix() {
        assert_eq!(FocusWatcher.identifier(), "focus");
    }

    #[test]
    fn test_both_capabilities_resolve_to_filter() {
        assert_eq!(
            AgentKind::from_capabilities(true, true),
            Some(AgentKind::Filter)
        );
        assert_eq!(
            AgentKind::from_capabilities(true, false),
            Some(AgentKind::Watcher)
        );
        assert_eq!(
            AgentKind::from_capabilities(false, true),
            Some(AgentKind::Logger)
        );
        assert_eq!(AgentKind::from_capabilities(false, false), None);
    }
}
