//! Configuration loading and management.
//!
//! - [`types`]: config structs, TOML loading and credential resolution
//! - [`env`]: environment-variable overrides layered on top of the file
//! - [`validation`]: startup checks
//! - [`defaults`]: serde default functions

mod defaults;
mod env;
mod types;
mod validation;

pub use types::{
    BackendConfig, BackendKind, Config, ConfigError, Credentials, GatewayConfig, ListenConfig,
    ReconnectConfig, Secret, UploadConfig,
};
pub use validation::{ValidationError, validate};
