//! Free-form extension settings

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicValue};

/// Caller-defined string key/value tuning for one queue.
///
/// The engine never interprets these; consumers read them through
/// [`ExtSettings::get`] for application-specific switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtSettings(BTreeMap<String, String>);

impl ExtSettings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Add one key, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl FromIterator<(String, String)> for ExtSettings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl DynamicValue for ExtSettings {
    fn group() -> &'static str {
        "ext"
    }

    fn diff(old: &Self, new: &Self) -> String {
        let mut parts = Vec::new();
        for (key, new_value) in &new.0 {
            match old.0.get(key) {
                Some(old_value) if old_value != new_value => {
                    diff_field(&mut parts, key, old_value, new_value);
                }
                None => parts.push(format!("{key}={new_value}<-")),
                _ => {}
            }
        }
        for key in old.0.keys() {
            if !new.0.contains_key(key) {
                parts.push(format!("{key}=<-{}", old.0[key]));
            }
        }
        format!("{}({})", Self::group(), parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_covers_added_changed_and_removed_keys() {
        let old = ExtSettings::default().with("keep", "1").with("gone", "x").with("edit", "a");
        let new = ExtSettings::default().with("keep", "1").with("edit", "b").with("fresh", "y");
        let diff = ExtSettings::diff(&old, &new);
        assert!(diff.contains("edit=b<-a"));
        assert!(diff.contains("fresh=y<-"));
        assert!(diff.contains("gone=<-x"));
        assert!(!diff.contains("keep"));
    }
}
