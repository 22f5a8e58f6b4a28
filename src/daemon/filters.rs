use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::{
    activity::Activity,
    topology::{ActivitySink, Logger, SubscriberSet, UpstreamSet, Watcher},
    Agent, AgentKind,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MinDurationFilterSettings {
    /// Activities shorter than this never reach downstream subscribers.
    /// Zero forwards everything, including zero-duration sessions.
    #[serde(default)]
    pub min_duration_ms: u64,
}

/// Transformation half of the filter. Lives behind an [Arc] because watchers
/// hold it as their delivery handle while the filter agent itself keeps the
/// downstream side reachable for wiring.
struct MinDurationSink {
    min_duration: Duration,
    subscribers: SubscriberSet,
}

impl ActivitySink for MinDurationSink {
    fn add_activity(&self, activity: Activity) -> Result<()> {
        if activity.duration() < self.min_duration {
            debug!(
                "Dropping {:?} lasting only {}",
                activity.tags(),
                activity.duration()
            );
            return Ok(());
        }
        self.subscribers.emit(&activity);
        Ok(())
    }
}

/// Filter that drops activities below a configured duration and re-emits the
/// rest to its own subscribers.
///
/// The focus watcher deliberately reports even zero-length sessions; keeping
/// or dropping them is policy, and policy belongs here.
pub struct MinDurationFilter {
    watchers: UpstreamSet,
    sink: Arc<MinDurationSink>,
    shutdown: CancellationToken,
}

impl MinDurationFilter {
    pub fn new(settings: MinDurationFilterSettings, shutdown: CancellationToken) -> Self {
        Self {
            watchers: UpstreamSet::new(),
            sink: Arc::new(MinDurationSink {
                min_duration: Duration::milliseconds(settings.min_duration_ms as i64),
                subscribers: SubscriberSet::new(),
            }),
            shutdown,
        }
    }
}

#[async_trait]
impl Agent for MinDurationFilter {
    fn name(&self) -> &'static str {
        "MinDurationFilter"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Filter
    }

    /// Transformation happens inline on delivery; the task only has to stay
    /// alive until the daemon stops.
    async fn run(self: Box<Self>) -> Result<()> {
        self.shutdown.cancelled().await;
        Ok(())
    }
}

impl Watcher for MinDurationFilter {
    fn subscribers(&self) -> &SubscriberSet {
        &self.sink.subscribers
    }
}

impl Logger for MinDurationFilter {
    fn watchers(&self) -> &UpstreamSet {
        &self.watchers
    }

    fn sink(&self) -> Arc<dyn ActivitySink> {
        self.sink.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use tokio_util::sync::CancellationToken;

    use crate::agent::{
        activity::Activity,
        topology::{ActivityBuffer, ActivitySink, Logger, Watcher},
        Agent, AgentKind,
    };

    use super::{MinDurationFilter, MinDurationFilterSettings};

    fn activity_lasting(ms: i64) -> Activity {
        let start = Utc::now();
        Activity::new(
            vec!["editor".into()],
            start,
            start + Duration::milliseconds(ms),
        )
        .unwrap()
    }

    fn filter_with_min(min_duration_ms: u64) -> (MinDurationFilter, Arc<ActivityBuffer>) {
        let filter = MinDurationFilter::new(
            MinDurationFilterSettings { min_duration_ms },
            CancellationToken::new(),
        );
        let downstream = Arc::new(ActivityBuffer::new());
        filter.subscribers().add("downstream", downstream.clone());
        (filter, downstream)
    }

    #[test]
    fn test_reports_filter_kind_and_identifier() {
        let (filter, _) = filter_with_min(0);
        assert_eq!(filter.kind(), AgentKind::Filter);
        assert_eq!(filter.identifier(), "minduration");
    }

    #[test]
    fn test_short_activity_is_dropped() {
        let (filter, downstream) = filter_with_min(500);

        filter.sink().add_activity(activity_lasting(499)).unwrap();

        assert!(downstream.is_empty());
    }

    #[test]
    fn test_activity_at_threshold_passes() {
        let (filter, downstream) = filter_with_min(500);

        filter.sink().add_activity(activity_lasting(500)).unwrap();

        assert_eq!(downstream.len(), 1);
    }

    #[test]
    fn test_zero_threshold_passes_zero_duration() {
        let (filter, downstream) = filter_with_min(0);

        filter.sink().add_activity(activity_lasting(0)).unwrap();

        assert_eq!(downstream.len(), 1);
    }
}
