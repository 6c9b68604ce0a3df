//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Shared primitives and utilities for the update agent."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Shared primitives for the R-OTA workspace: module and agent configuration,
//! and the production tracing subscriber.

pub mod config;
pub mod logging;

pub use config::{
    AgentConfig, ConfigError, LoggingConfig, MetricsConfig, ModuleConfig, StorageConfig,
    DEFAULT_TIMEOUT,
};
pub use logging::{init_tracing, LogFormat};
