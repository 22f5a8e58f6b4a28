//! Startup configuration. A single JSON document is loaded once and injected
//! into agents during wiring; there is no global settings instance.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::agent::AgentKind;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings appear to be corrupt, root-level key '{namespace}' not found")]
    MissingNamespace { namespace: &'static str },
    #[error("settings entry '{namespace}.{identifier}' is malformed")]
    MalformedEntry {
        namespace: &'static str,
        identifier: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SettingsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SettingsError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// The settings document: session-level annotations plus one namespace per
/// agent kind, each mapping an agent identifier to that agent's settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    namespaces: Map<String, Value>,
}

impl Default for Settings {
    /// Empty but structurally complete: all three namespaces present.
    fn default() -> Self {
        let mut namespaces = Map::new();
        for kind in [AgentKind::Watcher, AgentKind::Logger, AgentKind::Filter] {
            namespaces.insert(kind.namespace().to_string(), Value::Object(Map::new()));
        }
        Self {
            location: String::new(),
            tags: vec![],
            namespaces,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_owned(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_owned(),
                source,
            })?;
        info!(
            "Loaded settings: location '{}', tags {:?}",
            settings.location, settings.tags
        );
        Ok(settings)
    }

    /// Typed settings for one agent.
    ///
    /// A missing namespace is structural corruption and fails. A missing
    /// per-agent entry is not: the agent's defaults are written back into the
    /// document and returned, so repeated lookups agree.
    pub fn agent_settings<S>(
        &mut self,
        kind: AgentKind,
        identifier: &str,
    ) -> Result<S, SettingsError>
    where
        S: DeserializeOwned + Serialize + Default,
    {
        let namespace = kind.namespace();
        let entries = self
            .namespaces
            .get_mut(namespace)
            .and_then(Value::as_object_mut)
            .ok_or(SettingsError::MissingNamespace { namespace })?;

        match entries.get(identifier) {
            Some(entry) => serde_json::from_value(entry.clone()).map_err(|source| {
                SettingsError::MalformedEntry {
                    namespace,
                    identifier: identifier.to_string(),
                    source,
                }
            }),
            None => {
                warn!("Settings for agent '{identifier}' missing, creating entry with defaults");
                let defaults = S::default();
                let value = serde_json::to_value(&defaults).map_err(|source| {
                    SettingsError::MalformedEntry {
                        namespace,
                        identifier: identifier.to_string(),
                        source,
                    }
                })?;
                entries.insert(identifier.to_string(), value);
                Ok(defaults)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde::{Deserialize, Serialize};

    use crate::agent::AgentKind;

    use super::{Settings, SettingsError};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct PollSettings {
        poll_interval_ms: u64,
    }

    impl Default for PollSettings {
        fn default() -> Self {
            Self {
                poll_interval_ms: 1000,
            }
        }
    }

    fn settings_from(doc: &str) -> Settings {
        serde_json::from_str(doc).unwrap()
    }

    #[test]
    fn test_existing_entry_is_deserialized() {
        let mut settings = settings_from(
            r#"{
                "location": "home",
                "tags": ["desktop"],
                "watchers": {"focus": {"poll_interval_ms": 250}},
                "loggers": {},
                "filters": {}
            }"#,
        );

        let parsed: PollSettings = settings
            .agent_settings(AgentKind::Watcher, "focus")
            .unwrap();
        assert_eq!(parsed.poll_interval_ms, 250);
    }

    #[test]
    fn test_missing_entry_returns_defaults_and_populates_store() {
        let mut settings = settings_from(
            r#"{"location": "", "tags": [], "watchers": {}, "loggers": {}, "filters": {}}"#,
        );

        let first: PollSettings = settings
            .agent_settings(AgentKind::Watcher, "focus")
            .unwrap();
        assert_eq!(first, PollSettings::default());

        // The defaults were written back, so a repeated lookup reads them.
        let second: PollSettings = settings
            .agent_settings(AgentKind::Watcher, "focus")
            .unwrap();
        assert_eq!(second, PollSettings::default());

        let serialized = serde_json::to_value(&settings).unwrap();
        assert_eq!(serialized["watchers"]["focus"]["poll_interval_ms"], 1000);
    }

    #[test]
    fn test_missing_namespace_is_structural_corruption() {
        let mut settings =
            settings_from(r#"{"location": "", "tags": [], "watchers": {}, "loggers": {}}"#);

        let result: Result<PollSettings, _> =
            settings.agent_settings(AgentKind::Filter, "minduration");
        assert!(matches!(
            result,
            Err(SettingsError::MissingNamespace {
                namespace: "filters"
            })
        ));
    }

    #[test]
    fn test_malformed_entry_is_distinct_from_missing() {
        let mut settings = settings_from(
            r#"{
                "location": "",
                "tags": [],
                "watchers": {"focus": {"poll_interval_ms": "soon"}},
                "loggers": {},
                "filters": {}
            }"#,
        );

        let result: Result<PollSettings, _> = settings.agent_settings(AgentKind::Watcher, "focus");
        assert!(matches!(
            result,
            Err(SettingsError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn test_load_reads_document_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"location": "office", "tags": ["work"], "watchers": {{}}, "loggers": {{}}, "filters": {{}}}}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.location, "office");
        assert_eq!(settings.tags, vec!["work".to_string()]);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("settings.json")).unwrap_err();
        assert!(err.is_not_found());
    }
}
