//! Wire-format parsers producing the canonical payload
//!
//! Both parsers share the field-cleaning helpers here: sentinel handling,
//! exact-decimal money parsing, calendar-checked dates, and North American
//! phone normalization.

pub mod bms;
pub mod ems;
pub mod xmltree;

pub use bms::parse_bms;
pub use ems::parse_ems;

use crate::model::{
    CustomerParty, EstimateLine, ImportMeta, LaborInfo, LineDetail, LineKind, OtherChargesInfo,
    PartInfo, RepairFlags, SourceSystem, UnknownRecord,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

/// Per-parse accumulator for unrecognized structure.
///
/// Local mutable state threaded through one parse call; concurrent parses
/// each carry their own session.
pub(crate) struct ParseSession {
    unknown_tags: Vec<String>,
    unknown_records: Vec<UnknownRecord>,
}

impl ParseSession {
    pub(crate) fn new() -> Self {
        Self {
            unknown_tags: Vec::new(),
            unknown_records: Vec::new(),
        }
    }

    /// Record an unrecognized element or record tag, once per distinct path
    pub(crate) fn record_unknown(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.unknown_tags.contains(&path) {
            debug!(tag = %path, "unrecognized structure retained for observability");
            self.unknown_tags.push(path);
        }
    }

    /// Record an unrecognized record and keep its raw fields verbatim.
    /// The tag list deduplicates; every occurrence keeps its own fields.
    pub(crate) fn record_unknown_fields(&mut self, tag: impl Into<String>, fields: Vec<String>) {
        let tag = tag.into();
        self.record_unknown(tag.clone());
        self.unknown_records.push(UnknownRecord { tag, fields });
    }

    pub(crate) fn into_meta(self, source_system: SourceSystem) -> ImportMeta {
        ImportMeta {
            source_system,
            import_timestamp: Utc::now(),
            unknown_tags: self.unknown_tags,
            unknown_records: self.unknown_records,
        }
    }
}

/// Trim a raw field and resolve sentinels.
///
/// Vendors emit "N/A" for fields their UI left blank; it must never be
/// treated as data (and never participate in dedup matching).
pub(crate) fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn opt_clean(raw: Option<&str>) -> Option<String> {
    raw.and_then(clean_text)
}

/// Parse a money or hours field into an exact decimal.
///
/// Tolerates currency symbols, thousands separators, and accounting-style
/// parenthesized negatives.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    // "(-27.35)" is already negative after cleaning; never flip it back
    Some(if negative && value.is_sign_positive() {
        -value
    } else {
        value
    })
}

pub(crate) fn parse_i64(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
    cleaned.parse().ok()
}

pub(crate) fn parse_i32(raw: &str) -> Option<i32> {
    parse_i64(raw).and_then(|n| i32::try_from(n).ok())
}

pub(crate) fn parse_u32(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Parse `YYYYMMDD` or ISO `YYYY-MM-DD` into a calendar-checked date.
///
/// Invalid component triples (day 31 in April, month 13) resolve to
/// `None`, never to a wrapped or shifted date.
pub(crate) fn parse_estimate_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    let (year, month, day) = if trimmed.len() == 8 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        (
            trimmed[0..4].parse().ok()?,
            trimmed[4..6].parse().ok()?,
            trimmed[6..8].parse().ok()?,
        )
    } else {
        let mut parts = trimmed.splitn(3, '-');
        (
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        )
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Display-normalize a phone number when it matches a 10/11-digit North
/// American pattern; otherwise preserve the raw value.
pub(crate) fn normalize_phone(raw: &str) -> String {
    let digits = phone_digits(raw);
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10])
    } else {
        raw.trim().to_string()
    }
}

/// Digits-only form used for dedup matching; a leading country code 1 on
/// an 11-digit number is dropped
pub(crate) fn phone_digits(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Y/N-style indicator fields
pub(crate) fn parse_bool_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_uppercase().as_str(), "Y" | "YES" | "TRUE" | "T" | "1")
}

/// Classify a customer from its name fields. A company name wins over
/// person names; the person, when also present, becomes the contact.
pub(crate) fn classify_party(
    first_name: Option<String>,
    last_name: Option<String>,
    company_name: Option<String>,
) -> Option<CustomerParty> {
    if let Some(company_name) = company_name {
        let contact_name = match (first_name, last_name) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(f), None) => Some(f),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        };
        Some(CustomerParty::Organization {
            company_name,
            contact_name,
        })
    } else if first_name.is_some() || last_name.is_some() {
        Some(CustomerParty::Person {
            first_name: first_name.unwrap_or_default(),
            last_name: last_name.unwrap_or_default(),
        })
    } else {
        None
    }
}

/// Per-row fields shared by every wire format before detail records attach.
pub(crate) struct LineSeed {
    pub line_number: u32,
    pub parent_line: Option<u32>,
    pub description: String,
    pub taxable: bool,
    pub declared_kind: Option<LineKind>,
}

/// Maps a vendor line-type label onto the canonical kind.
pub(crate) fn line_kind_from(raw: &str) -> LineKind {
    match raw.trim().to_ascii_uppercase().as_str() {
        "PART" | "PARTS" | "PRT" | "BODY PART" => LineKind::Part,
        "LABOR" | "LABOUR" | "LAB" => LineKind::Labor,
        "MATERIAL" | "MATERIALS" | "MTL" | "PAINT MATERIALS" => LineKind::Material,
        "SUBLET" | "SUB" => LineKind::Sublet,
        _ => LineKind::Other,
    }
}

fn looks_like_material(charge_type: Option<&str>) -> bool {
    match charge_type {
        Some(t) => {
            let upper = t.to_ascii_uppercase();
            upper == "MTL" || upper.contains("MATERIAL") || upper.contains("SUPPLIES")
        }
        None => false,
    }
}

/// Turns one vendor row plus its detail records into canonical lines.
///
/// A row carrying both a part and labor becomes two lines, with the labor
/// line pointing back at the part line through `parent_line`. Material-only
/// rows become pseudo-parts flagged `is_material` so part totals stay
/// complete. A row with no detail records is kept as a bare line.
pub(crate) fn push_joined_line(
    lines: &mut Vec<EstimateLine>,
    seed: LineSeed,
    part: Option<PartInfo>,
    labor: Option<LaborInfo>,
    other: Option<OtherChargesInfo>,
) {
    let LineSeed {
        line_number,
        parent_line,
        description,
        taxable,
        declared_kind,
    } = seed;
    let mut primary_emitted = false;

    if let Some(part) = part {
        let kind = if part.is_material {
            LineKind::Material
        } else {
            LineKind::Part
        };
        lines.push(EstimateLine {
            line_number,
            parent_line,
            description: description.clone(),
            kind,
            taxable,
            amount: part.extended_price(),
            detail: Some(LineDetail::Part(part)),
        });
        primary_emitted = true;
    }

    if let Some(labor) = labor {
        lines.push(EstimateLine {
            line_number,
            parent_line: if primary_emitted {
                Some(line_number)
            } else {
                parent_line
            },
            description: description.clone(),
            kind: LineKind::Labor,
            taxable,
            amount: labor.extended_price(),
            detail: Some(LineDetail::Labor(labor)),
        });
        primary_emitted = true;
    }

    if let Some(other) = other {
        let child_parent = if primary_emitted {
            Some(line_number)
        } else {
            parent_line
        };
        if declared_kind == Some(LineKind::Material) || looks_like_material(other.charge_type.as_deref()) {
            let pseudo = PartInfo {
                part_number: None,
                quantity: Decimal::ONE,
                unit_price: other.price,
                part_type: other.charge_type.clone(),
                is_material: true,
            };
            lines.push(EstimateLine {
                line_number,
                parent_line: child_parent,
                description: description.clone(),
                kind: LineKind::Material,
                taxable,
                amount: other.price,
                detail: Some(LineDetail::Part(pseudo)),
            });
        } else {
            let kind = if declared_kind == Some(LineKind::Sublet) {
                LineKind::Sublet
            } else {
                LineKind::Other
            };
            lines.push(EstimateLine {
                line_number,
                parent_line: child_parent,
                description: description.clone(),
                kind,
                taxable,
                amount: other.price,
                detail: Some(LineDetail::Other(other)),
            });
        }
        primary_emitted = true;
    }

    if !primary_emitted {
        lines.push(EstimateLine {
            line_number,
            parent_line,
            description,
            kind: declared_kind.unwrap_or(LineKind::Other),
            taxable,
            amount: Decimal::ZERO,
            detail: None,
        });
    }
}

/// Repair-operation keywords that imply calibration, scan, or alignment work.
pub(crate) fn apply_description_flags(flags: &mut RepairFlags, description: &str) {
    let upper = description.to_ascii_uppercase();
    if upper.contains("ADAS") || upper.contains("CALIBRAT") {
        flags.adas_calibration = true;
    }
    if upper.contains("SCAN")
        && (upper.contains("POST") || upper.contains("DIAG") || upper.contains("HEALTH"))
    {
        flags.post_repair_scan = true;
    }
    if upper.contains("ALIGNMENT") || upper.contains("4 WHEEL") || upper.contains("FOUR WHEEL") {
        flags.wheel_alignment = true;
    }
}
