//! Gantry Core - configuration and shared error types
//!
//! This crate provides the configuration model, the config file loader and
//! the error types shared by the Gantry engine and CLI.

pub mod config;
pub mod error;

pub use config::{CacheConfig, Config, ExecutorConfig, TaskConfig};
pub use error::{ConfigError, GantryError, Result};
