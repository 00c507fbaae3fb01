//! Queue identity, location and settings
//!
//! A queue is identified by a [`QueueId`] and physically located by a
//! [`QueueTableLocation`]. Its behavior is governed by [`QueueSettings`],
//! an aggregate of independently hot-swappable groups; registration turns
//! the aggregate into [`DynamicQueueSettings`] whose groups live inside
//! [`DynamicSetting`] holders for the process lifetime.

mod dynamic;
mod ext;
mod failure;
mod poll;
mod processing;
mod reenqueue;

pub use dynamic::{DynamicSetting, DynamicValue, ObserverVeto, SettingObserver};
pub use ext::ExtSettings;
pub use failure::{FailureRetryType, FailureSettings};
pub use poll::PollSettings;
pub use processing::{ProcessingMode, ProcessingSettings};
pub use reenqueue::ReenqueueSettings;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Settings construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Identifier contains characters that are unsafe to interpolate into
    /// SQL statements.
    #[error("invalid identifier `{0}`: only letters, digits, `_` and `.` are allowed")]
    InvalidIdentifier(String),

    /// Sequential reenqueue plans need at least one entry.
    #[error("sequential reenqueue plan must not be empty")]
    EmptySequentialPlan,

    /// Geometric reenqueue ratios below one shrink forever.
    #[error("geometric reenqueue ratio must be at least 1, got {0}")]
    InvalidRatio(u32),
}

/// Logical queue name, unique within one queue service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where a queue's rows live: table name, queue name within the table and
/// an optional id sequence.
///
/// Identifiers are validated at construction because backends interpolate
/// the table and sequence names into SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTableLocation {
    queue_id: QueueId,
    table_name: String,
    id_sequence: Option<String>,
}

impl QueueTableLocation {
    pub fn new(
        queue_id: QueueId,
        table_name: impl Into<String>,
    ) -> Result<Self, SettingsError> {
        let table_name = table_name.into();
        validate_identifier(&table_name)?;
        Ok(Self {
            queue_id,
            table_name,
            id_sequence: None,
        })
    }

    /// Use an explicit sequence for id generation instead of the table
    /// default.
    pub fn with_id_sequence(mut self, sequence: impl Into<String>) -> Result<Self, SettingsError> {
        let sequence = sequence.into();
        validate_identifier(&sequence)?;
        self.id_sequence = Some(sequence);
        Ok(self)
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_sequence(&self) -> Option<&str> {
        self.id_sequence.as_deref()
    }
}

impl std::fmt::Display for QueueTableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.table_name, self.queue_id)
    }
}

/// Validate a name for interpolation into SQL text, the same rule
/// [`QueueTableLocation`] applies to table and sequence names.
pub fn validate_identifier(identifier: &str) -> Result<(), SettingsError> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(SettingsError::InvalidIdentifier(identifier.to_string()))
    }
}

/// Plain aggregate of all settings groups for one queue.
///
/// This is what configuration parsing produces and what
/// [`update`](DynamicQueueSettings::apply) operations consume; the live,
/// observable form is [`DynamicQueueSettings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub processing: ProcessingSettings,
    pub poll: PollSettings,
    pub failure: FailureSettings,
    pub reenqueue: ReenqueueSettings,
    #[serde(default)]
    pub ext: ExtSettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            processing: ProcessingSettings::default(),
            poll: PollSettings::default(),
            failure: FailureSettings::default(),
            reenqueue: ReenqueueSettings::manual(),
            ext: ExtSettings::default(),
        }
    }
}

impl QueueSettings {
    /// Set the processing group
    pub fn with_processing(mut self, processing: ProcessingSettings) -> Self {
        self.processing = processing;
        self
    }

    /// Set the poll group
    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Set the failure group
    pub fn with_failure(mut self, failure: FailureSettings) -> Self {
        self.failure = failure;
        self
    }

    /// Set the reenqueue group
    pub fn with_reenqueue(mut self, reenqueue: ReenqueueSettings) -> Self {
        self.reenqueue = reenqueue;
        self
    }

    /// Set the extension group
    pub fn with_ext(mut self, ext: ExtSettings) -> Self {
        self.ext = ext;
        self
    }
}

/// Registration-time configuration for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub location: QueueTableLocation,
    pub settings: QueueSettings,
}

impl QueueConfig {
    pub fn new(location: QueueTableLocation, settings: QueueSettings) -> Self {
        Self { location, settings }
    }

    pub fn queue_id(&self) -> &QueueId {
        self.location.queue_id()
    }
}

/// Live settings of a registered queue.
///
/// Each group is an independently observable [`DynamicSetting`]; the holder
/// identities stay stable while values change, so workers always read the
/// current value without restarts.
#[derive(Debug, Clone)]
pub struct DynamicQueueSettings {
    processing: Arc<DynamicSetting<ProcessingSettings>>,
    poll: Arc<DynamicSetting<PollSettings>>,
    failure: Arc<DynamicSetting<FailureSettings>>,
    reenqueue: Arc<DynamicSetting<ReenqueueSettings>>,
    ext: Arc<DynamicSetting<ExtSettings>>,
}

impl DynamicQueueSettings {
    pub fn new(queue_id: &QueueId, settings: QueueSettings) -> Self {
        Self {
            processing: Arc::new(DynamicSetting::new(
                format!("{queue_id}.processing"),
                settings.processing,
            )),
            poll: Arc::new(DynamicSetting::new(format!("{queue_id}.poll"), settings.poll)),
            failure: Arc::new(DynamicSetting::new(
                format!("{queue_id}.failure"),
                settings.failure,
            )),
            reenqueue: Arc::new(DynamicSetting::new(
                format!("{queue_id}.reenqueue"),
                settings.reenqueue,
            )),
            ext: Arc::new(DynamicSetting::new(format!("{queue_id}.ext"), settings.ext)),
        }
    }

    pub fn processing(&self) -> &Arc<DynamicSetting<ProcessingSettings>> {
        &self.processing
    }

    pub fn poll(&self) -> &Arc<DynamicSetting<PollSettings>> {
        &self.poll
    }

    pub fn failure(&self) -> &Arc<DynamicSetting<FailureSettings>> {
        &self.failure
    }

    pub fn reenqueue(&self) -> &Arc<DynamicSetting<ReenqueueSettings>> {
        &self.reenqueue
    }

    pub fn ext(&self) -> &Arc<DynamicSetting<ExtSettings>> {
        &self.ext
    }

    /// Snapshot all groups as a plain aggregate.
    pub fn snapshot(&self) -> QueueSettings {
        QueueSettings {
            processing: self.processing.get(),
            poll: self.poll.get(),
            failure: self.failure.get(),
            reenqueue: self.reenqueue.get(),
            ext: self.ext.get(),
        }
    }

    /// Apply a new aggregate group by group and join the diffs.
    ///
    /// Atomicity is per group: a vetoed group keeps its old value and
    /// produces no diff while the other groups still apply.
    pub fn apply(&self, new_settings: &QueueSettings) -> Option<String> {
        let mut diffs = Vec::new();
        if let Some(diff) = self.processing.set_value(new_settings.processing.clone()) {
            diffs.push(diff);
        }
        if let Some(diff) = self.poll.set_value(new_settings.poll.clone()) {
            diffs.push(diff);
        }
        if let Some(diff) = self.failure.set_value(new_settings.failure.clone()) {
            diffs.push(diff);
        }
        if let Some(diff) = self.reenqueue.set_value(new_settings.reenqueue.clone()) {
            diffs.push(diff);
        }
        if let Some(diff) = self.ext.set_value(new_settings.ext.clone()) {
            diffs.push(diff);
        }
        if diffs.is_empty() {
            None
        } else {
            Some(diffs.join(", "))
        }
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Vec<Duration> as milliseconds
pub(crate) mod duration_millis_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        durations
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Vec::<u64>::deserialize(deserializer)?;
        Ok(millis.into_iter().map(Duration::from_millis).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn location_rejects_injection_characters() {
        let queue_id = QueueId::new("example");
        assert!(QueueTableLocation::new(queue_id.clone(), "task_queue").is_ok());
        assert!(QueueTableLocation::new(queue_id.clone(), "schema.task_queue").is_ok());
        assert!(matches!(
            QueueTableLocation::new(queue_id.clone(), "tasks; DROP TABLE users"),
            Err(SettingsError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            QueueTableLocation::new(queue_id.clone(), ""),
            Err(SettingsError::InvalidIdentifier(_))
        ));
        assert!(QueueTableLocation::new(queue_id, "task_queue")
            .unwrap()
            .with_id_sequence("tasks'--")
            .is_err());
    }

    #[test]
    fn apply_joins_group_diffs() {
        let settings = DynamicQueueSettings::new(&QueueId::new("q"), QueueSettings::default());
        let updated = QueueSettings::default()
            .with_processing(ProcessingSettings::default().with_count(4))
            .with_poll(PollSettings::default().with_no_task_timeout(Duration::from_secs(3)));

        let diff = settings.apply(&updated).unwrap();
        assert!(diff.contains("processing(count=4<-1)"));
        assert!(diff.contains("poll(no_task_timeout=3s<-1s)"));

        // applying the same aggregate again is a silent no-op
        assert_eq!(settings.apply(&updated), None);
    }
}
