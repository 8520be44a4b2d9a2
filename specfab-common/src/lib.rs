//! # specfab Common Library
//!
//! Shared code for the specfab crates:
//! - Error type used across crates
//! - Configuration loading (TOML bootstrap file, environment overrides)
//! - Logging initialization
//! - Run event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
