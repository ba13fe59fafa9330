//! Wacast Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, and the
//! status enums shared across all Wacast components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
