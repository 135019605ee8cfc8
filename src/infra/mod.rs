pub mod config;
pub mod logging;
pub mod rw_config;

pub use config::Settings;
pub use rw_config::{ConfigError, RwConfig};
