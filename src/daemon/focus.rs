use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    agent::{
        activity::Activity,
        topology::{SubscriberSet, Watcher},
        Agent, AgentKind,
    },
    utils::clock::Clock,
    window_api::{ProcessLookup, WindowHandle, WindowSystem},
};

/// Tag used when the window system cannot name the outgoing window.
const UNKNOWN_CLASS: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusWatcherSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for FocusWatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// The window currently holding focus and when it got it.
struct FocusSession {
    window: WindowHandle,
    selected_at: DateTime<Utc>,
}

/// Polls the window system at a fixed cadence and emits one [Activity] per
/// completed focus session.
///
/// Windows are compared by handle, never by title. A session closes on the
/// tick that observes a different handle; the session's activity is tagged
/// with the outgoing window's class and attributed to its process when that
/// process still exists.
pub struct FocusWatcher {
    subscribers: SubscriberSet,
    windows: Box<dyn WindowSystem>,
    processes: Box<dyn ProcessLookup>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
    current: Option<FocusSession>,
}

impl FocusWatcher {
    pub fn new(
        windows: Box<dyn WindowSystem>,
        processes: Box<dyn ProcessLookup>,
        settings: FocusWatcherSettings,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            subscribers: SubscriberSet::new(),
            windows,
            processes,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            shutdown,
            clock,
            current: None,
        }
    }

    /// One polling step. Returns the activity of the just-ended session when
    /// this sample observed a focus transition.
    fn observe(&mut self) -> Result<Option<Activity>> {
        let focused = self.windows.focused_window()?;
        let now = self.clock.time();

        match self.current.take() {
            None => {
                debug!("First focus is {focused:?}");
                self.current = Some(FocusSession {
                    window: focused,
                    selected_at: now,
                });
                Ok(None)
            }
            Some(session) if session.window == focused => {
                self.current = Some(session);
                Ok(None)
            }
            Some(previous) => {
                let activity = self.close_session(previous, now);
                self.current = Some(FocusSession {
                    window: focused,
                    selected_at: now,
                });
                Ok(activity)
            }
        }
    }

    /// Builds the activity for a finished session. Attribution failures
    /// degrade the record instead of failing it: an unreadable class becomes
    /// [UNKNOWN_CLASS], a vanished process leaves the command absent.
    fn close_session(&mut self, session: FocusSession, end: DateTime<Utc>) -> Option<Activity> {
        let class = match self.windows.window_class(session.window) {
            Ok(class) => class,
            Err(e) => {
                warn!(
                    "Failed to resolve class of window {:?}: {e:?}",
                    session.window
                );
                UNKNOWN_CLASS.to_string()
            }
        };

        let activity = match Activity::new(vec![class], session.selected_at, end) {
            Ok(activity) => activity,
            Err(e) => {
                // Only possible when the wall clock jumped backwards between
                // ticks; the session cannot be represented then.
                warn!("Discarding focus session: {e}");
                return None;
            }
        };

        Some(match self.command_of(session.window) {
            Some(command) => activity.with_command(command),
            None => activity,
        })
    }

    fn command_of(&mut self, window: WindowHandle) -> Option<Vec<String>> {
        let pid = match self.windows.window_pid(window) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!("Window {window:?} exposes no owner PID");
                return None;
            }
            Err(e) => {
                warn!("Failed to read PID of window {window:?}: {e:?}");
                return None;
            }
        };
        match self.processes.command_line(pid) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("Could not attribute window {window:?}: {e}");
                None
            }
        }
    }

    /// Closes the in-progress session on shutdown, best effort.
    fn flush_current(&mut self) {
        if let Some(session) = self.current.take() {
            let end = self.clock.time();
            if let Some(activity) = self.close_session(session, end) {
                self.emit(&activity);
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut collection_point = self.clock.instant();
        loop {
            collection_point += self.poll_interval;

            match self.observe() {
                Ok(Some(activity)) => {
                    debug!("Focus transition produced {activity:?}");
                    self.emit(&activity);
                }
                Ok(None) => {}
                Err(e) => {
                    // The next tick is the natural retry.
                    error!("Encountered an error during focus sampling {:?}", e)
                }
            }

            let cancelled = tokio::select! {
                _ = self.shutdown.cancelled() => true,
                _ = self.clock.sleep_until(collection_point) => false,
            };
            if cancelled {
                self.flush_current();
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Agent for FocusWatcher {
    fn name(&self) -> &'static str {
        "FocusWatcher"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Watcher
    }

    async fn run(mut self: Box<Self>) -> Result<()> {
        self.run_loop().await
    }
}

impl Watcher for FocusWatcher {
    fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }
}
