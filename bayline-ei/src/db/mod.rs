//! Estimate persistence operations
//!
//! Fn-style operations over the shared schema. Writers that take part in a
//! merge accept an open transaction so one file's import commits or rolls
//! back as a unit; pool-based readers serve lookups, reporting, and tests.
//!
//! Money, hours, dates, and guids are stored as TEXT. The codec helpers
//! here are the single place those encodings are defined.

pub mod customers;
pub mod jobs;
pub mod shops;
pub mod vehicles;

use bayline_common::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

/// Currency amounts are rounded to cents at rest.
pub(crate) fn money_to_db(value: Decimal) -> String {
    value.round_dp(2).to_string()
}

/// Quantities, hours, and rates keep their native precision.
pub(crate) fn decimal_to_db(value: Decimal) -> String {
    value.to_string()
}

pub(crate) fn decimal_from_db(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| Error::Internal(format!("invalid decimal '{}' in database: {}", raw, e)))
}

pub(crate) fn opt_decimal_from_db(raw: Option<String>) -> Result<Option<Decimal>> {
    match raw {
        Some(s) => decimal_from_db(&s).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn parse_guid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("invalid guid '{}' in database: {}", raw, e)))
}

pub(crate) fn opt_parse_guid(raw: Option<String>) -> Result<Option<Uuid>> {
    match raw {
        Some(s) => parse_guid(&s).map(Some),
        None => Ok(None),
    }
}

/// Dates are stored as `YYYY-MM-DD`.
pub(crate) fn date_from_db(raw: Option<String>) -> Result<Option<NaiveDate>> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| Error::Internal(format!("invalid date '{}' in database: {}", s, e))),
        None => Ok(None),
    }
}

/// Timestamps are stored as RFC 3339.
pub(crate) fn timestamp_from_db(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| Error::Internal(format!("invalid timestamp '{}' in database: {}", s, e))),
        None => Ok(None),
    }
}
