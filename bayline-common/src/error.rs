//! Errors shared across the Bayline crates
//!
//! Parse failures live with the importer; this enum covers the concerns
//! both crates touch: the database, the filesystem, and configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure, including unique-index conflicts when two imports
    /// race the same identity
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure reading estimate files or creating the database
    /// directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before any write, such as an estimate carrying no
    /// usable identity
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored value failed to decode; the database holds something the
    /// codecs cannot represent
    #[error("Internal error: {0}")]
    Internal(String),
}
