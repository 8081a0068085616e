//! Error types for bayline-ei
//!
//! Structural failures abort a file's import; everything recoverable is
//! accumulated into the payload's unknown-tag list instead of erroring.

use thiserror::Error;

/// Unrecoverable structural failure while parsing one estimate file
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML is not well-formed
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Document structure broken in a way the tree builder cannot repair
    #[error("malformed document: {0}")]
    Structure(String),

    /// Well-formed XML, but none of the known estimate roots are present
    #[error("no recognized estimate root element")]
    NoRecognizedRoot,

    /// EMS text with zero recognizable records
    #[error("no recognizable EMS records")]
    NoRecognizedRecords,
}

/// Import pipeline error covering parse, I/O, and merge failures
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// bayline-common error (database, config)
    #[error(transparent)]
    Common(#[from] bayline_common::Error),
}

impl ImportError {
    /// Database failures roll back the merge transaction and may be retried
    /// by the caller; everything else is terminal for the file.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportError::Common(bayline_common::Error::Database(_)))
    }
}
