//! Configuration for the keel runtime.
//!
//! [`KeelConfig`] is layered from defaults, TOML/YAML files, `KEEL_*`
//! environment variables and programmatic overrides by [`ConfigLoader`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, DispatchConfig, KeelConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, SpanEventConfig,
};
pub use validation::validate_config;
