use std::path::PathBuf;

use anyhow::Result;
use filters::{MinDurationFilter, MinDurationFilterSettings};
use focus::{FocusWatcher, FocusWatcherSettings};
use loggers::{ExportLogger, ExportLoggerSettings, SpoolSink, StoreLogger, StoreLoggerSettings};
use store::ActivityStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    agent::{topology::subscribe, Agent, AgentKind},
    settings::Settings,
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowSystem, ProcessLookup, SysinfoProcessLookup, WindowSystem},
};

pub mod args;
pub mod filters;
pub mod focus;
pub mod loggers;
pub mod shutdown;
pub mod store;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, settings_path: Option<PathBuf>) -> Result<()> {
    std::env::set_current_dir("/")?;

    let settings_path = settings_path.unwrap_or_else(|| dir.join("settings.json"));
    let mut settings = match Settings::load(&settings_path) {
        Ok(settings) => settings,
        Err(e) if e.is_not_found() => {
            warn!("No settings file at {settings_path:?}, continuing with defaults");
            Settings::default()
        }
        Err(e) => return Err(e.into()),
    };

    let shutdown_token = CancellationToken::new();
    let manager = GenericWindowSystem::new()?;

    let agents = create_agents(
        &mut settings,
        &dir,
        manager,
        SysinfoProcessLookup,
        &shutdown_token,
        DefaultClock,
    )?;

    let names = agents.iter().map(|agent| agent.name()).collect::<Vec<_>>();
    let (_, results) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        futures::future::join_all(agents.into_iter().map(|agent| agent.run())),
    );

    for (name, result) in names.into_iter().zip(results) {
        if let Err(e) = result {
            error!("Agent {name} got an error {:?}", e);
        }
    }

    Ok(())
}

/// Builds the session's agents with their settings and wires the topology:
/// raw activities go straight to the local store, while the export path runs
/// through the duration filter.
fn create_agents(
    settings: &mut Settings,
    dir: &std::path::Path,
    manager: impl WindowSystem + 'static,
    processes: impl ProcessLookup + 'static,
    shutdown_token: &CancellationToken,
    clock: impl Clock + Clone,
) -> Result<Vec<Box<dyn Agent>>> {
    let focus_settings: FocusWatcherSettings =
        settings.agent_settings(AgentKind::Watcher, "focus")?;
    let focus = FocusWatcher::new(
        Box::new(manager),
        Box::new(processes),
        focus_settings,
        shutdown_token.clone(),
        Box::new(clock.clone()),
    );

    let filter_settings: MinDurationFilterSettings =
        settings.agent_settings(AgentKind::Filter, "minduration")?;
    let filter = MinDurationFilter::new(filter_settings, shutdown_token.clone());

    let store_settings: StoreLoggerSettings = settings.agent_settings(AgentKind::Logger, "store")?;
    let store = StoreLogger::new(
        ActivityStore::new(dir.join("records"))?,
        store_settings,
        shutdown_token.clone(),
        Box::new(clock.clone()),
    );

    let export_settings: ExportLoggerSettings =
        settings.agent_settings(AgentKind::Logger, "export")?;
    let export = ExportLogger::new(
        Box::new(SpoolSink::new(dir.join("export-spool"))),
        export_settings,
        shutdown_token.clone(),
        Box::new(clock),
    );

    subscribe(&focus, &store);
    subscribe(&focus, &filter);
    subscribe(&filter, &export);

    Ok(vec![
        Box::new(focus),
        Box::new(filter),
        Box::new(store),
        Box::new(export),
    ])
}
