//! Configuration for the spatial anchor bookkeeping core.
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working setup that uses the
//! standard persisted key layout (`numUuids` / `uuid{i}`).

pub mod config;

pub use config::{
    AppConfig, CorruptRecordPolicy, LoggingConfig, NamingConfig, StoreConfig, CONFIG_ENV_VAR,
    DEFAULT_CONFIG_FILE,
};
