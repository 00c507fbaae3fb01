//! Observable setting holders with atomic hot updates
//!
//! Every queue settings group lives inside a [`DynamicSetting`] so operators
//! can change it while workers are running. Observers are evaluated against
//! the prospective value before the update commits, and any observer can veto
//! the whole update.

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// A settings value that can be hot-swapped at runtime.
///
/// Implementations report a human-readable, field-level diff used in reload
/// logs and returned from update operations.
pub trait DynamicValue: Clone + PartialEq + Send + Sync + 'static {
    /// Settings group name, e.g. `"processing"`.
    fn group() -> &'static str;

    /// Render the changed fields as `group(field=new<-old,...)`.
    ///
    /// Only called when `old != new`; must mention every changed field and
    /// no unchanged ones.
    fn diff(old: &Self, new: &Self) -> String;
}

/// Rejection raised by a setting observer to abort an update.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ObserverVeto(pub String);

impl ObserverVeto {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Observer invoked with `(old, new)` before an update commits.
pub type SettingObserver<T> = Box<dyn Fn(&T, &T) -> Result<(), ObserverVeto> + Send + Sync>;

/// Mutable-value holder with change observers and all-or-nothing updates.
///
/// The holder's identity is stable for the process lifetime; only the value
/// inside changes. Updates to one setting are serialized; updates to
/// different settings may interleave.
///
/// # Example
///
/// ```
/// use dbqueue_core::settings::{DynamicSetting, PollSettings};
/// use std::time::Duration;
///
/// let setting = DynamicSetting::new("example.poll", PollSettings::default());
/// let diff = setting.set_value(
///     PollSettings::default().with_no_task_timeout(Duration::from_secs(5)),
/// );
/// assert!(diff.unwrap().contains("no_task_timeout"));
/// ```
pub struct DynamicSetting<T: DynamicValue> {
    name: String,
    value: RwLock<T>,
    observers: RwLock<Vec<SettingObserver<T>>>,
    update_lock: Mutex<()>,
}

impl<T: DynamicValue> DynamicSetting<T> {
    /// Create a holder around an initial value.
    ///
    /// `name` is only used for log context, typically `"<queue>.<group>"`.
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(value),
            observers: RwLock::new(Vec::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Register an observer called with `(old, new)` before every commit.
    ///
    /// Returning an error from the observer aborts the update and keeps the
    /// old value. Observers must not register further observers from inside
    /// the callback.
    pub fn register_observer(
        &self,
        observer: impl Fn(&T, &T) -> Result<(), ObserverVeto> + Send + Sync + 'static,
    ) {
        self.observers.write().push(Box::new(observer));
    }

    /// Replace the value, returning the field-level diff.
    ///
    /// Semantics:
    /// - equal value: no observer calls, returns `None`;
    /// - any observer veto: the update is logged and discarded wholesale,
    ///   the old value stays, returns `None`;
    /// - otherwise the value is replaced only after every observer accepted
    ///   the prospective `(old, new)` pair.
    pub fn set_value(&self, new_value: T) -> Option<String> {
        let _serialize = self.update_lock.lock();

        let old_value = self.value.read().clone();
        if old_value == new_value {
            return None;
        }

        {
            let observers = self.observers.read();
            for observer in observers.iter() {
                if let Err(veto) = observer(&old_value, &new_value) {
                    warn!(
                        setting = %self.name,
                        %veto,
                        "setting update vetoed by observer, keeping old value"
                    );
                    return None;
                }
            }
        }

        let diff = T::diff(&old_value, &new_value);
        *self.value.write() = new_value;
        debug!(setting = %self.name, %diff, "setting updated");
        Some(diff)
    }

    /// Log-context name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: DynamicValue + std::fmt::Debug> std::fmt::Debug for DynamicSetting<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSetting")
            .field("name", &self.name)
            .field("value", &*self.value.read())
            .finish_non_exhaustive()
    }
}

/// Render one changed field for a diff string.
pub(crate) fn diff_field<V: std::fmt::Display>(
    parts: &mut Vec<String>,
    name: &str,
    old: &V,
    new: &V,
) {
    parts.push(format!("{name}={new}<-{old}"));
}
