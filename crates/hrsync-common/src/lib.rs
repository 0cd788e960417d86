pub mod config;
pub mod logging;

pub const APP_NAME: &str = "hrsync";

pub use config::{
    ConfigError, HrSyncConfig, ModelConfig, ModelProvider, SheetsConfig, SweepConfig, SyncConfig,
};
