//! RidgeFS Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, configuration
//! structures, and the periodic task scheduler used across all RidgeFS
//! components.

pub mod config;
pub mod error;
pub mod tasks;
pub mod types;

pub use config::NameserverConfig;
pub use error::{Error, Result};
pub use tasks::{PeriodicTask, TaskScheduler};
pub use types::*;
