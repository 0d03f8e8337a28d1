//! Petrel Common - Shared types and utilities
//!
//! This crate provides the configuration, error and wire-level types
//! shared by the Petrel protocol engines and storage layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
