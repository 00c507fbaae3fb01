//! Property-file configuration and hot reload

mod reader;
mod reload;

pub use reader::{ConfigError, QueueConfigsReader};
pub use reload::ConfigReloader;
