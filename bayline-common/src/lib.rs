//! # Bayline Common Library
//!
//! Shared code for the Bayline shop-management workspace:
//! - Error and result types
//! - Configuration loading and data directory resolution
//! - SQLite pool initialization and schema creation
//! - Persisted entity models (shops, customers, vehicles, jobs)

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
