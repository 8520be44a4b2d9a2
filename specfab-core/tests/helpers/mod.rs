//! Test Helper Utilities
//!
//! Shared builders and scripted collaborators for the specfab-core
//! integration tests.

#![allow(dead_code)]

pub mod builders;
pub mod fetchers;

pub use builders::{
    mouse_table, orchestrator, source, target, test_settings, BatchBuilder, MOUSE_RULES,
};
pub use fetchers::{EndlessFetcher, SlowFetcher};
