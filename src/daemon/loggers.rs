use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    agent::{
        activity::ExportEvent,
        topology::{ActivityBuffer, ActivitySink, Logger, UpstreamSet},
        Agent, AgentKind,
    },
    utils::clock::Clock,
};

use super::store::ActivityStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLoggerSettings {
    #[serde(default = "default_store_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_store_flush_interval_ms() -> u64 {
    30_000
}

impl Default for StoreLoggerSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_store_flush_interval_ms(),
        }
    }
}

/// Terminal logger that periodically drains its buffer into the local
/// [ActivityStore]. The buffer is drained one final time on shutdown so a
/// flushed partial session is not lost.
pub struct StoreLogger {
    watchers: UpstreamSet,
    buffer: Arc<ActivityBuffer>,
    store: ActivityStore,
    flush_interval: Duration,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl StoreLogger {
    pub fn new(
        store: ActivityStore,
        settings: StoreLoggerSettings,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            watchers: UpstreamSet::new(),
            buffer: Arc::new(ActivityBuffer::new()),
            store,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            shutdown,
            clock,
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(());
        }
        let date = self.clock.time().date_naive();
        self.store.append(date, &batch).await?;
        info!("Persisted {} activities", batch.len());
        Ok(())
    }
}

#[async_trait]
impl Agent for StoreLogger {
    fn name(&self) -> &'static str {
        "StoreLogger"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Logger
    }

    async fn run(mut self: Box<Self>) -> Result<()> {
        loop {
            let cancelled = tokio::select! {
                _ = self.shutdown.cancelled() => true,
                _ = self.clock.sleep(self.flush_interval) => false,
            };
            if cancelled {
                return self.flush().await;
            }
            if let Err(e) = self.flush().await {
                error!("Failed to persist activities {e:?}");
            }
        }
    }
}

impl Logger for StoreLogger {
    fn watchers(&self) -> &UpstreamSet {
        &self.watchers
    }

    fn sink(&self) -> Arc<dyn ActivitySink> {
        self.buffer.clone()
    }
}

/// Where exported events end up. The daemon's obligation stops at handing
/// over the export shape; transport to the remote service lives behind this.
#[async_trait]
pub trait EventSink: Send {
    async fn append(&mut self, events: Vec<ExportEvent>) -> Result<()>;
}

/// [EventSink] writing events to a local JSON-lines spool file for a later
/// upload pass.
pub struct SpoolSink {
    path: PathBuf,
}

impl SpoolSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl EventSink for SpoolSink {
    async fn append(&mut self, events: Vec<ExportEvent>) -> Result<()> {
        let mut file = File::options()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;

        file.lock_exclusive()?;
        let mut buffer = Vec::<u8>::new();
        for event in &events {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }
        let result = async {
            file.write_all(&buffer).await?;
            file.flush().await
        }
        .await;
        file.unlock_async().await?;
        result?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLoggerSettings {
    #[serde(default = "default_export_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_export_flush_interval_ms() -> u64 {
    60_000
}

impl Default for ExportLoggerSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_export_flush_interval_ms(),
        }
    }
}

/// Terminal logger converting drained activities to the quantified-self
/// event shape and handing batches to an [EventSink].
pub struct ExportLogger {
    watchers: UpstreamSet,
    buffer: Arc<ActivityBuffer>,
    sink: Box<dyn EventSink>,
    flush_interval: Duration,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl ExportLogger {
    pub fn new(
        sink: Box<dyn EventSink>,
        settings: ExportLoggerSettings,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            watchers: UpstreamSet::new(),
            buffer: Arc::new(ActivityBuffer::new()),
            sink,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            shutdown,
            clock,
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(());
        }
        let events = batch
            .iter()
            .map(|activity| activity.to_export_event())
            .collect::<Vec<_>>();
        let count = events.len();
        self.sink.append(events).await?;
        info!("Exported {count} events");
        Ok(())
    }
}

#[async_trait]
impl Agent for ExportLogger {
    fn name(&self) -> &'static str {
        "ExportLogger"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Logger
    }

    async fn run(mut self: Box<Self>) -> Result<()> {
        loop {
            let cancelled = tokio::select! {
                _ = self.shutdown.cancelled() => true,
                _ = self.clock.sleep(self.flush_interval) => false,
            };
            if cancelled {
                return self.flush().await;
            }
            if let Err(e) = self.flush().await {
                error!("Failed to export events {e:?}");
            }
        }
    }
}

impl Logger for ExportLogger {
    fn watchers(&self) -> &UpstreamSet {
        &self.watchers
    }

    fn sink(&self) -> Arc<dyn ActivitySink> {
        self.buffer.clone()
    }
}
