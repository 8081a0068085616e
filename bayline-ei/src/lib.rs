//! bayline-ei library interface
//!
//! Estimate import pipeline: wire-format detection, the BMS and EMS
//! parsers, and the idempotent merge engine. Exposed as a library for
//! integration testing and for embedding the pipeline outside the CLI.

pub mod batch;
pub mod db;
pub mod detect;
pub mod error;
pub mod merge;
pub mod model;
pub mod parsers;

pub use batch::{BatchConfig, BatchRunner, BatchSummary};
pub use detect::{detect_format, FileFormat};
pub use error::{ImportError, ParseError};
pub use merge::{ImportAction, MergeEngine, MergeOutcome};
pub use model::NormalizedPayload;
pub use parsers::{parse_bms, parse_ems};
