//! Subscription plumbing between watchers and loggers.
//!
//! A watcher holds the sinks of every subscribed logger; a logger holds the
//! names of every watcher feeding it. [subscribe] registers both directions of
//! the edge and is idempotent. Delivery failures are isolated per subscriber
//! so one misbehaving logger cannot starve the rest or kill the watcher.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, RwLock},
};

use anyhow::Result;
use tracing::error;

use super::{activity::Activity, Agent};

/// Anything that can take delivery of an activity. Implementations must be
/// safe to call from the emitting watcher's task.
pub trait ActivitySink: Send + Sync {
    fn add_activity(&self, activity: Activity) -> Result<()>;
}

/// Thread-safe activity accumulator backing a logger.
///
/// `drain` swaps the buffer out under the same lock `add_activity` appends
/// under, so concurrent producers can neither lose nor duplicate entries.
#[derive(Default)]
pub struct ActivityBuffer {
    activities: Mutex<Vec<Activity>>,
}

impl ActivityBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, activity: Activity) {
        self.lock().push(activity);
    }

    /// Atomically takes the buffered activities, preserving insertion order.
    /// A second immediate drain returns nothing.
    pub fn drain(&self) -> Vec<Activity> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Activity>> {
        self.activities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActivitySink for ActivityBuffer {
    fn add_activity(&self, activity: Activity) -> Result<()> {
        self.push(activity);
        Ok(())
    }
}

/// A watcher's downstream edges, keyed by subscriber name.
///
/// Guarded by its own lock, separate from any buffer lock: wiring happens at
/// setup, fan-out only reads.
#[derive(Default)]
pub struct SubscriberSet {
    sinks: RwLock<BTreeMap<String, Arc<dyn ActivitySink>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Re-adding an existing name keeps the edge
    /// unique.
    pub fn add(&self, name: &str, sink: Arc<dyn ActivitySink>) {
        self.read_write()
            .entry(name.to_string())
            .or_insert(sink);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Delivers the activity to every subscriber. A failing subscriber is
    /// logged and skipped; remaining subscribers still receive the activity.
    pub fn emit(&self, activity: &Activity) {
        for (name, sink) in self.read().iter() {
            if let Err(e) = sink.add_activity(activity.clone()) {
                error!("Failed to deliver activity to subscriber '{name}': {e:?}");
            }
        }
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<dyn ActivitySink>>> {
        self.sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn ActivitySink>>> {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Names of the watchers feeding a logger. The reverse side of
/// [SubscriberSet].
#[derive(Default)]
pub struct UpstreamSet {
    watchers: Mutex<BTreeSet<String>>,
}

impl UpstreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str) {
        self.lock().insert(name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An agent that originates activities and fans them out to subscribers.
pub trait Watcher: Agent {
    fn subscribers(&self) -> &SubscriberSet;

    /// Synchronous fan-out to every currently subscribed logger, in
    /// unspecified order.
    fn emit(&self, activity: &Activity) {
        self.subscribers().emit(activity);
    }
}

/// An agent that accumulates activities delivered by watchers.
pub trait Logger: Agent {
    fn watchers(&self) -> &UpstreamSet;

    /// The handle watchers deliver into.
    fn sink(&self) -> Arc<dyn ActivitySink>;
}

/// Wires both directions of the edge. Calling it twice leaves exactly one
/// edge each way.
pub fn subscribe(watcher: &(impl Watcher + ?Sized), logger: &(impl Logger + ?Sized)) {
    watcher.subscribers().add(logger.name(), logger.sink());
    logger.watchers().add(watcher.name());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::agent::{activity::Activity, Agent, AgentKind};

    use super::{
        subscribe, ActivityBuffer, ActivitySink, Logger, SubscriberSet, UpstreamSet, Watcher,
    };

    fn test_activity(tag: &str) -> Activity {
        let now = Utc::now();
        Activity::new(vec![tag.into()], now, now).unwrap()
    }

    struct StubWatcher {
        subscribers: SubscriberSet,
    }

    impl StubWatcher {
        fn new() -> Self {
            Self {
                subscribers: SubscriberSet::new(),
            }
        }
    }

    #[async_trait]
    impl Agent for StubWatcher {
        fn name(&self) -> &'static str {
            "StubWatcher"
        }

        fn kind(&self) -> AgentKind {
            AgentKind::Watcher
        }

        async fn run(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl Watcher for StubWatcher {
        fn subscribers(&self) -> &SubscriberSet {
            &self.subscribers
        }
    }

    struct StubLogger {
        watchers: UpstreamSet,
        buffer: Arc<ActivityBuffer>,
    }

    impl StubLogger {
        fn new() -> Self {
            Self {
                watchers: UpstreamSet::new(),
                buffer: Arc::new(ActivityBuffer::new()),
            }
        }
    }

    #[async_trait]
    impl Agent for StubLogger {
        fn name(&self) -> &'static str {
            "StubLogger"
        }

        fn kind(&self) -> AgentKind {
            AgentKind::Logger
        }

        async fn run(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl Logger for StubLogger {
        fn watchers(&self) -> &UpstreamSet {
            &self.watchers
        }

        fn sink(&self) -> Arc<dyn ActivitySink> {
            self.buffer.clone()
        }
    }

    struct FailingSink;

    impl ActivitySink for FailingSink {
        fn add_activity(&self, _activity: Activity) -> Result<()> {
            Err(anyhow!("sink is broken"))
        }
    }

    #[test]
    fn test_subscribe_is_idempotent_and_symmetric() {
        let watcher = StubWatcher::new();
        let logger = StubLogger::new();

        subscribe(&watcher, &logger);
        subscribe(&watcher, &logger);

        assert_eq!(watcher.subscribers().len(), 1);
        assert!(watcher.subscribers().contains("StubLogger"));
        assert_eq!(logger.watchers().len(), 1);
        assert!(logger.watchers().contains("StubWatcher"));
    }

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let watcher = StubWatcher::new();
        let first = StubLogger::new();
        let second = StubLogger::new();

        subscribe(&watcher, &first);
        watcher.subscribers().add("other", second.sink());

        watcher.emit(&test_activity("editor"));

        assert_eq!(first.buffer.len(), 1);
        assert_eq!(second.buffer.len(), 1);
    }

    #[test]
    fn test_failing_subscriber_does_not_stop_fan_out() {
        let watcher = StubWatcher::new();
        let healthy = StubLogger::new();

        // BTreeMap order puts the failing sink first.
        watcher.subscribers().add("a-broken", Arc::new(FailingSink));
        subscribe(&watcher, &healthy);

        watcher.emit(&test_activity("editor"));

        assert_eq!(healthy.buffer.len(), 1);
    }

    #[test]
    fn test_drain_returns_in_insertion_order_then_empties() {
        let buffer = ActivityBuffer::new();
        buffer.push(test_activity("first"));
        buffer.push(test_activity("second"));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].tags(), ["first".to_string()]);
        assert_eq!(drained[1].tags(), ["second".to_string()]);

        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_concurrent_appends_survive_drains_without_loss() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let buffer = Arc::new(ActivityBuffer::new());

        let handles = (0..PRODUCERS)
            .map(|producer| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        buffer.push(test_activity(&format!("producer-{producer}")));
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut collected = buffer.drain();
        for handle in handles {
            handle.join().unwrap();
            collected.extend(buffer.drain());
        }
        collected.extend(buffer.drain());

        assert_eq!(collected.len(), PRODUCERS * PER_PRODUCER);
        assert!(buffer.is_empty());
    }
}
