use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("activity ends at {end} before it starts at {start}")]
    InvalidInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("activity requires at least one tag")]
    EmptyTags,
}

/// A closed focus session: a tagged time interval, optionally attributed to
/// the command line of the process that owned the window.
///
/// The interval and tags are fixed at construction. Extra context goes into
/// the open-ended metadata map, which is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActivityRepr")]
pub struct Activity {
    tags: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(rename = "cmd", skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(flatten)]
    metadata: BTreeMap<String, Value>,
}

impl Activity {
    /// Fails if `end` precedes `start` or no tags are given. Intervals are
    /// never clamped.
    pub fn new(
        tags: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, ActivityError> {
        if end < start {
            return Err(ActivityError::InvalidInterval { start, end });
        }
        if tags.is_empty() {
            return Err(ActivityError::EmptyTags);
        }
        let activity = Self {
            tags,
            start,
            end,
            command: None,
            metadata: BTreeMap::new(),
        };
        debug!(
            "Logged activity {:?}: started {}, ended {}, duration {}",
            activity.tags,
            activity.start,
            activity.end,
            activity.duration()
        );
        Ok(activity)
    }

    /// Attaches the owning process's invocation. Flag-like tokens (leading
    /// `-`) are stripped before storage.
    pub fn with_command(mut self, command: impl IntoIterator<Item = String>) -> Self {
        let command = command
            .into_iter()
            .filter(|token| !token.starts_with('-'))
            .collect::<Vec<_>>();
        debug!("Activity {:?} command: {:?}", self.tags, command);
        self.command = Some(command);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Never negative.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Canonical form with `start`/`end` as ISO-8601 strings. Parsing it back
    /// revalidates the interval.
    pub fn to_canonical_json(&self) -> Value {
        serde_json::to_value(self).expect("activity serialization is infallible")
    }

    /// The shape the remote quantified-self service ingests.
    pub fn to_export_event(&self) -> ExportEvent {
        ExportEvent {
            tag: self.tags.clone(),
            timestamp: self.start,
            duration_ms: self.duration().num_milliseconds(),
        }
    }
}

/// Mirror of [Activity] without the interval invariant, used to validate
/// deserialized documents.
#[derive(Deserialize)]
struct ActivityRepr {
    tags: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(rename = "cmd", default)]
    command: Option<Vec<String>>,
    #[serde(flatten)]
    metadata: BTreeMap<String, Value>,
}

impl TryFrom<ActivityRepr> for Activity {
    type Error = ActivityError;

    fn try_from(repr: ActivityRepr) -> Result<Self, Self::Error> {
        let mut activity = Activity::new(repr.tags, repr.start, repr.end)?;
        // Stored commands already had their flags stripped.
        activity.command = repr.command;
        activity.metadata = repr.metadata;
        Ok(activity)
    }
}

/// Event accepted by the remote sink. Durations are integral milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEvent {
    pub tag: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use serde_json::json;

    use super::{Activity, ActivityError};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn start() -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE)
    }

    #[test]
    fn test_duration_is_end_minus_start() {
        let activity = Activity::new(
            vec!["editor".into()],
            start(),
            start() + chrono::Duration::seconds(42),
        )
        .unwrap();

        assert_eq!(activity.duration(), chrono::Duration::seconds(42));
    }

    #[test]
    fn test_zero_duration_is_valid() {
        let activity = Activity::new(vec!["editor".into()], start(), start()).unwrap();
        assert_eq!(activity.duration(), chrono::Duration::zero());
    }

    #[test]
    fn test_inverted_interval_is_rejected() {
        let result = Activity::new(
            vec!["editor".into()],
            start(),
            start() - chrono::Duration::seconds(1),
        );

        assert!(matches!(
            result,
            Err(ActivityError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_empty_tags_are_rejected() {
        let result = Activity::new(vec![], start(), start());
        assert_eq!(result.unwrap_err(), ActivityError::EmptyTags);
    }

    #[test]
    fn test_command_flags_are_stripped() {
        let activity = Activity::new(vec!["terminal".into()], start(), start())
            .unwrap()
            .with_command(
                ["nvim", "-u", "--clean", "notes.md"]
                    .map(String::from),
            );

        assert_eq!(
            activity.command(),
            Some(["nvim", "notes.md"].map(String::from).as_slice())
        );
    }

    #[test]
    fn test_canonical_json_round_trip() {
        let activity = Activity::new(
            vec!["browser".into()],
            start(),
            start() + chrono::Duration::milliseconds(1500),
        )
        .unwrap()
        .with_command(["firefox"].map(String::from))
        .with_metadata("screen", json!(1));

        let value = activity.to_canonical_json();
        assert!(value["start"].is_string());
        assert!(value["end"].is_string());

        let parsed: Activity = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, activity);
    }

    #[test]
    fn test_canonical_json_rejects_inverted_interval() {
        let doc = json!({
            "tags": ["browser"],
            "start": "2018-07-04T00:00:10Z",
            "end": "2018-07-04T00:00:00Z",
        });

        assert!(serde_json::from_value::<Activity>(doc).is_err());
    }

    #[test]
    fn test_export_event_shape() {
        let activity = Activity::new(
            vec!["browser".into()],
            start(),
            start() + chrono::Duration::milliseconds(2500),
        )
        .unwrap();

        let event = activity.to_export_event();
        assert_eq!(event.tag, vec!["browser".to_string()]);
        assert_eq!(event.timestamp, activity.start());
        assert_eq!(event.duration_ms, 2500);
    }
}
