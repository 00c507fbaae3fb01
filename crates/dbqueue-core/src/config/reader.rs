//! Property-file configuration reader
//!
//! Queues are configured as `prefix.queueId.setting = value` lines; the
//! pseudo-queue `default` supplies shared values that per-queue lines
//! override. All problems in one file are collected, sorted and reported
//! together; a file with any invalid line configures nothing.
//!
//! ```text
//! dbqueue.default.thread-count = 1
//! dbqueue.default.no-task-timeout = 1s
//!
//! dbqueue.email.table = task_queue
//! dbqueue.email.thread-count = 3
//! dbqueue.email.retry-type = geometric
//! dbqueue.email.retry-interval = 1s
//! dbqueue.email.reenqueue-retry-type = fixed
//! dbqueue.email.reenqueue-retry-delay = 10s
//! dbqueue.email.extra.owner = notifications
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::settings::{
    ExtSettings, FailureSettings, PollSettings, ProcessingSettings, QueueConfig, QueueId,
    QueueSettings, QueueTableLocation, ReenqueueSettings,
};

const DEFAULT_QUEUE: &str = "default";

const SETTING_TABLE: &str = "table";
const SETTING_ID_SEQUENCE: &str = "id-sequence";
const SETTING_THREAD_COUNT: &str = "thread-count";
const SETTING_PROCESSING_MODE: &str = "processing-mode";
const SETTING_BETWEEN_TASK_TIMEOUT: &str = "between-task-timeout";
const SETTING_NO_TASK_TIMEOUT: &str = "no-task-timeout";
const SETTING_FATAL_CRASH_TIMEOUT: &str = "fatal-crash-timeout";
const SETTING_RETRY_TYPE: &str = "retry-type";
const SETTING_RETRY_INTERVAL: &str = "retry-interval";
const SETTING_REENQUEUE_TYPE: &str = "reenqueue-retry-type";
const SETTING_REENQUEUE_DELAY: &str = "reenqueue-retry-delay";
const SETTING_REENQUEUE_PLAN: &str = "reenqueue-retry-plan";
const SETTING_REENQUEUE_INITIAL_DELAY: &str = "reenqueue-retry-initial-delay";
const SETTING_REENQUEUE_STEP: &str = "reenqueue-retry-step";
const SETTING_REENQUEUE_RATIO: &str = "reenqueue-retry-ratio";
const EXTRA_PREFIX: &str = "extra.";

/// Configuration reading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read at all.
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more invalid lines or settings, sorted.
    #[error("invalid queue configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// Reads queue configurations from property files.
#[derive(Debug, Clone)]
pub struct QueueConfigsReader {
    prefix: String,
}

impl QueueConfigsReader {
    /// Reader for lines starting with `prefix.`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Parse a property file into queue configurations.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<QueueConfig>, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_str(&text)
    }

    /// Parse property text into queue configurations.
    ///
    /// All problems are collected; any problem at all means nothing is
    /// returned, so a reload can never apply a half-valid file.
    pub fn parse_str(&self, text: &str) -> Result<Vec<QueueConfig>, ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let mut raw: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        let line_prefix = format!("{}.", self.prefix);
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                errors.push(format!("line {}: missing `=` in `{line}`", index + 1));
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            let Some(rest) = key.strip_prefix(&line_prefix) else {
                errors.push(format!(
                    "line {}: key `{key}` does not start with `{line_prefix}`",
                    index + 1
                ));
                continue;
            };
            let Some((queue_id, setting)) = rest.split_once('.') else {
                errors.push(format!(
                    "line {}: key `{key}` has no setting name after the queue id",
                    index + 1
                ));
                continue;
            };
            if queue_id.is_empty() || setting.is_empty() {
                errors.push(format!("line {}: empty queue id or setting in `{key}`", index + 1));
                continue;
            }
            raw.entry(queue_id.to_string())
                .or_default()
                .insert(setting.to_string(), value.to_string());
        }

        let defaults = raw.remove(DEFAULT_QUEUE).unwrap_or_default();
        if raw.is_empty() && errors.is_empty() {
            errors.push("no queues configured".to_string());
        }

        let mut configs = Vec::new();
        for (queue_id, mut settings) in raw {
            // queue-specific values win over defaults
            for (key, value) in &defaults {
                settings.entry(key.clone()).or_insert_with(|| value.clone());
            }
            match build_queue_config(&queue_id, settings) {
                Ok(config) => configs.push(config),
                Err(mut queue_errors) => errors.append(&mut queue_errors),
            }
        }

        if errors.is_empty() {
            Ok(configs)
        } else {
            errors.sort();
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn build_queue_config(
    queue_id: &str,
    mut settings: BTreeMap<String, String>,
) -> Result<QueueConfig, Vec<String>> {
    let mut errors = Vec::new();
    let mut take = |name: &str| settings.remove(name);

    let location = match take(SETTING_TABLE) {
        Some(table) => {
            let location = QueueTableLocation::new(QueueId::new(queue_id), table)
                .and_then(|location| match take(SETTING_ID_SEQUENCE) {
                    Some(sequence) => location.with_id_sequence(sequence),
                    None => Ok(location),
                });
            match location {
                Ok(location) => Some(location),
                Err(error) => {
                    errors.push(format!("queue `{queue_id}`: {error}"));
                    None
                }
            }
        }
        None => {
            errors.push(format!(
                "queue `{queue_id}`: required setting `{SETTING_TABLE}` is missing"
            ));
            None
        }
    };

    let mut processing = ProcessingSettings::default();
    if let Some(value) = take(SETTING_THREAD_COUNT) {
        match value.parse::<usize>() {
            Ok(count) => processing.count = count,
            Err(_) => errors.push(format!(
                "queue `{queue_id}`: `{SETTING_THREAD_COUNT}` must be a non-negative integer, got `{value}`"
            )),
        }
    }
    if let Some(value) = take(SETTING_PROCESSING_MODE) {
        match value.parse() {
            Ok(mode) => processing.mode = mode,
            Err(error) => errors.push(format!("queue `{queue_id}`: {error}")),
        }
    }

    let mut poll = PollSettings::default();
    for (name, slot) in [
        (SETTING_BETWEEN_TASK_TIMEOUT, &mut poll.between_task_timeout),
        (SETTING_NO_TASK_TIMEOUT, &mut poll.no_task_timeout),
        (SETTING_FATAL_CRASH_TIMEOUT, &mut poll.fatal_crash_timeout),
    ] {
        if let Some(value) = take(name) {
            match parse_duration(&value) {
                Ok(duration) => *slot = duration,
                Err(error) => errors.push(format!("queue `{queue_id}`: `{name}`: {error}")),
            }
        }
    }

    let mut failure = FailureSettings::default();
    if let Some(value) = take(SETTING_RETRY_TYPE) {
        match value.parse() {
            Ok(retry_type) => failure.retry_type = retry_type,
            Err(error) => errors.push(format!("queue `{queue_id}`: {error}")),
        }
    }
    if let Some(value) = take(SETTING_RETRY_INTERVAL) {
        match parse_duration(&value) {
            Ok(duration) => failure.retry_interval = duration,
            Err(error) => {
                errors.push(format!("queue `{queue_id}`: `{SETTING_RETRY_INTERVAL}`: {error}"))
            }
        }
    }

    let reenqueue = build_reenqueue(queue_id, &mut take, &mut errors);

    let mut ext = ExtSettings::default();
    let leftover: Vec<(String, String)> = settings.into_iter().collect();
    for (key, value) in leftover {
        if let Some(ext_key) = key.strip_prefix(EXTRA_PREFIX) {
            ext = ext.with(ext_key, value);
        } else {
            errors.push(format!("queue `{queue_id}`: unknown setting `{key}`"));
        }
    }

    match location {
        Some(location) if errors.is_empty() => Ok(QueueConfig::new(
            location,
            QueueSettings {
                processing,
                poll,
                failure,
                reenqueue,
                ext,
            },
        )),
        _ => Err(errors),
    }
}

fn build_reenqueue(
    queue_id: &str,
    take: &mut impl FnMut(&str) -> Option<String>,
    errors: &mut Vec<String>,
) -> ReenqueueSettings {
    let retry_type = take(SETTING_REENQUEUE_TYPE);
    let delay = take(SETTING_REENQUEUE_DELAY);
    let plan = take(SETTING_REENQUEUE_PLAN);
    let initial_delay = take(SETTING_REENQUEUE_INITIAL_DELAY);
    let step = take(SETTING_REENQUEUE_STEP);
    let ratio = take(SETTING_REENQUEUE_RATIO);

    let mut require = |name: &str, value: Option<String>| match value {
        Some(value) => Some((name.to_string(), value)),
        None => {
            errors.push(format!(
                "queue `{queue_id}`: reenqueue strategy requires setting `{name}`"
            ));
            None
        }
    };

    let fallback = ReenqueueSettings::manual();
    match retry_type.as_deref() {
        None | Some("manual") => fallback,
        Some("fixed") => {
            let Some((name, value)) = require(SETTING_REENQUEUE_DELAY, delay) else {
                return fallback;
            };
            match parse_duration(&value) {
                Ok(delay) => ReenqueueSettings::fixed(delay),
                Err(error) => {
                    errors.push(format!("queue `{queue_id}`: `{name}`: {error}"));
                    fallback
                }
            }
        }
        Some("sequential") => {
            let Some((name, value)) = require(SETTING_REENQUEUE_PLAN, plan) else {
                return fallback;
            };
            let mut plan = Vec::new();
            for part in value.split(',') {
                match parse_duration(part.trim()) {
                    Ok(delay) => plan.push(delay),
                    Err(error) => {
                        errors.push(format!("queue `{queue_id}`: `{name}`: {error}"));
                        return fallback;
                    }
                }
            }
            match ReenqueueSettings::sequential(plan) {
                Ok(settings) => settings,
                Err(error) => {
                    errors.push(format!("queue `{queue_id}`: {error}"));
                    fallback
                }
            }
        }
        Some("arithmetic") => {
            let initial = require(SETTING_REENQUEUE_INITIAL_DELAY, initial_delay);
            let step = require(SETTING_REENQUEUE_STEP, step);
            let (Some((initial_name, initial)), Some((step_name, step))) = (initial, step) else {
                return fallback;
            };
            match (parse_duration(&initial), parse_duration(&step)) {
                (Ok(initial), Ok(step)) => ReenqueueSettings::arithmetic(initial, step),
                (initial_result, step_result) => {
                    if let Err(error) = initial_result {
                        errors.push(format!("queue `{queue_id}`: `{initial_name}`: {error}"));
                    }
                    if let Err(error) = step_result {
                        errors.push(format!("queue `{queue_id}`: `{step_name}`: {error}"));
                    }
                    fallback
                }
            }
        }
        Some("geometric") => {
            let initial = require(SETTING_REENQUEUE_INITIAL_DELAY, initial_delay);
            let ratio = require(SETTING_REENQUEUE_RATIO, ratio);
            let (Some((initial_name, initial)), Some((_, ratio))) = (initial, ratio) else {
                return fallback;
            };
            let parsed_initial = match parse_duration(&initial) {
                Ok(initial) => initial,
                Err(error) => {
                    errors.push(format!("queue `{queue_id}`: `{initial_name}`: {error}"));
                    return fallback;
                }
            };
            let parsed_ratio = match ratio.parse::<u32>() {
                Ok(ratio) => ratio,
                Err(_) => {
                    errors.push(format!(
                        "queue `{queue_id}`: `{SETTING_REENQUEUE_RATIO}` must be a positive integer, got `{ratio}`"
                    ));
                    return fallback;
                }
            };
            match ReenqueueSettings::geometric(parsed_initial, parsed_ratio) {
                Ok(settings) => settings,
                Err(error) => {
                    errors.push(format!("queue `{queue_id}`: {error}"));
                    fallback
                }
            }
        }
        Some(other) => {
            errors.push(format!(
                "queue `{queue_id}`: unknown reenqueue strategy `{other}`"
            ));
            fallback
        }
    }
}

/// Parse `150ms`, `10s`, `2m`, `1h` or a bare millisecond count.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let (number, unit) = match value.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => value.split_at(split),
        None => (value, "ms"),
    };
    let amount: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration `{value}`"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        other => Err(format!("unknown duration unit `{other}` in `{value}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{FailureRetryType, ProcessingMode};

    fn reader() -> QueueConfigsReader {
        QueueConfigsReader::new("dbqueue")
    }

    #[test]
    fn parses_a_full_queue_definition() {
        let configs = reader()
            .parse_str(
                r"
                # example queue
                dbqueue.email.table = task_queue
                dbqueue.email.thread-count = 3
                dbqueue.email.processing-mode = wrap-in-transaction
                dbqueue.email.between-task-timeout = 50ms
                dbqueue.email.no-task-timeout = 2s
                dbqueue.email.fatal-crash-timeout = 5s
                dbqueue.email.retry-type = arithmetic
                dbqueue.email.retry-interval = 500ms
                dbqueue.email.reenqueue-retry-type = sequential
                dbqueue.email.reenqueue-retry-plan = 1s, 2s, 3s
                dbqueue.email.extra.owner = notifications
                ",
            )
            .unwrap();

        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.queue_id(), &QueueId::new("email"));
        assert_eq!(config.location.table_name(), "task_queue");
        assert_eq!(config.settings.processing.count, 3);
        assert_eq!(config.settings.processing.mode, ProcessingMode::WrapInTransaction);
        assert_eq!(config.settings.poll.between_task_timeout, Duration::from_millis(50));
        assert_eq!(config.settings.poll.no_task_timeout, Duration::from_secs(2));
        assert_eq!(config.settings.failure.retry_type, FailureRetryType::Arithmetic);
        assert_eq!(config.settings.failure.retry_interval, Duration::from_millis(500));
        assert_eq!(
            config.settings.reenqueue,
            ReenqueueSettings::sequential(vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ])
            .unwrap()
        );
        assert_eq!(config.settings.ext.get("owner"), Some("notifications"));
    }

    #[test]
    fn defaults_apply_and_queue_values_win() {
        let configs = reader()
            .parse_str(
                r"
                dbqueue.default.thread-count = 2
                dbqueue.default.no-task-timeout = 7s
                dbqueue.first.table = task_queue
                dbqueue.second.table = task_queue
                dbqueue.second.thread-count = 9
                ",
            )
            .unwrap();

        let first = configs.iter().find(|c| c.queue_id().as_str() == "first").unwrap();
        let second = configs.iter().find(|c| c.queue_id().as_str() == "second").unwrap();
        assert_eq!(first.settings.processing.count, 2);
        assert_eq!(first.settings.poll.no_task_timeout, Duration::from_secs(7));
        assert_eq!(second.settings.processing.count, 9);
        assert_eq!(second.settings.poll.no_task_timeout, Duration::from_secs(7));
    }

    #[test]
    fn all_problems_are_collected_and_sorted() {
        let outcome = reader().parse_str(
            r"
            dbqueue.zeta.thread-count = nope
            dbqueue.alpha.table = task_queue
            dbqueue.alpha.unknown-setting = 1
            badline
            ",
        );

        match outcome {
            Err(ConfigError::Invalid(errors)) => {
                assert!(errors.len() >= 3);
                let mut sorted = errors.clone();
                sorted.sort();
                assert_eq!(errors, sorted, "errors must be sorted");
                assert!(errors.iter().any(|e| e.contains("unknown setting")));
                assert!(errors.iter().any(|e| e.contains("`table` is missing")));
                assert!(errors.iter().any(|e| e.contains("missing `=`")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn reenqueue_strategies_validate_their_parameters() {
        let outcome = reader().parse_str(
            r"
            dbqueue.q.table = task_queue
            dbqueue.q.reenqueue-retry-type = fixed
            ",
        );
        match outcome {
            Err(ConfigError::Invalid(errors)) => {
                assert!(errors
                    .iter()
                    .any(|e| e.contains("requires setting `reenqueue-retry-delay`")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }

        let configs = reader()
            .parse_str(
                r"
                dbqueue.q.table = task_queue
                dbqueue.q.reenqueue-retry-type = geometric
                dbqueue.q.reenqueue-retry-initial-delay = 1s
                dbqueue.q.reenqueue-retry-ratio = 2
                ",
            )
            .unwrap();
        assert_eq!(
            configs[0].settings.reenqueue,
            ReenqueueSettings::geometric(Duration::from_secs(1), 2).unwrap()
        );
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            reader().parse_str("\n# nothing here\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn duration_formats() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5d").is_err());
    }
}
