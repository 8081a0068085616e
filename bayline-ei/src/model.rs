//! Canonical estimate payload
//!
//! The format-independent representation every parser produces and the
//! merge engine consumes. A payload is a value object: it has no identity
//! in the store, is immutable once produced, and is consumed exactly once.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Best-effort keys used by the merge engine for deduplication.
///
/// Sentinel values ("N/A", empty) are resolved to `None` during parsing,
/// so a present value here is always usable for matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobIdentities {
    pub ro_number: Option<String>,
    pub claim_number: Option<String>,
    pub vin: Option<String>,
}

impl JobIdentities {
    /// True when no identity at all was extractable from the file
    pub fn is_empty(&self) -> bool {
        self.ro_number.is_none() && self.claim_number.is_none() && self.vin.is_none()
    }
}

/// Person/organization discrimination for a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerParty {
    Person {
        first_name: String,
        last_name: String,
    },
    Organization {
        company_name: String,
        /// Contact person, when the export names one alongside the company
        contact_name: Option<String>,
    },
}

impl CustomerParty {
    pub fn is_organization(&self) -> bool {
        matches!(self, CustomerParty::Organization { .. })
    }

    /// Human-readable name for audit descriptions
    pub fn display_name(&self) -> String {
        match self {
            CustomerParty::Person { first_name, last_name } => {
                format!("{} {}", first_name, last_name).trim().to_string()
            }
            CustomerParty::Organization { company_name, .. } => company_name.clone(),
        }
    }
}

/// Phone numbers bucketed by the wire format's type qualifier.
///
/// Values are display-normalized to `(NNN) NNN-NNNN` when they match a
/// 10/11-digit North American pattern; anything else is preserved raw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhoneSet {
    pub home: Option<String>,
    pub work: Option<String>,
    pub cell: Option<String>,
    pub fax: Option<String>,
}

impl PhoneSet {
    /// All present numbers, in bucket order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [&self.home, &self.work, &self.cell, &self.fax]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostalAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub party: CustomerParty,
    pub email: Option<String>,
    pub phones: PhoneSet,
    pub address: PostalAddress,
    /// Organizations are billed GST by default; individuals are often
    /// exempt. Documented business rule, inferred from customer type when
    /// the export carries no explicit flag.
    pub gst_payable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub color: Option<String>,
    pub odometer: Option<i64>,
    pub engine: Option<String>,
    pub transmission: Option<String>,
    pub fuel_type: Option<String>,
    pub license_plate: Option<String>,
}

impl VehicleInfo {
    /// True when no field that could identify the vehicle is present.
    pub fn is_vacant(&self) -> bool {
        self.vin.is_none()
            && self.year.is_none()
            && self.make.is_none()
            && self.model.is_none()
            && self.license_plate.is_none()
    }
}

/// Vendor line classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Part,
    Labor,
    Material,
    Sublet,
    Other,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Part => "part",
            LineKind::Labor => "labor",
            LineKind::Material => "material",
            LineKind::Sublet => "sublet",
            LineKind::Other => "other",
        }
    }
}

/// Line detail; a line carries at most one of these.
///
/// Combined part+labor vendor rows are split by the parsers into a part
/// line plus a labor line carrying `parent_line`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineDetail {
    Part(PartInfo),
    Labor(LaborInfo),
    Other(OtherChargesInfo),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub part_type: Option<String>,
    /// Material-only rows are emitted as pseudo-parts with this flag so
    /// downstream totals stay complete
    pub is_material: bool,
}

impl PartInfo {
    pub fn extended_price(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaborInfo {
    pub labor_type: Option<String>,
    pub hours: Decimal,
    pub rate: Decimal,
}

impl LaborInfo {
    pub fn extended_price(&self) -> Decimal {
        self.hours * self.rate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherChargesInfo {
    pub charge_type: Option<String>,
    pub price: Decimal,
}

/// One estimate line in the vendor's printed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateLine {
    pub line_number: u32,
    /// Set on lines synthesized from a combined vendor row; points at the
    /// vendor line number the row was split from
    pub parent_line: Option<u32>,
    pub description: String,
    pub kind: LineKind,
    pub taxable: bool,
    /// Extended amount for this line (part price x quantity, labor hours x
    /// rate, or charge price)
    pub amount: Decimal,
    pub detail: Option<LineDetail>,
}

impl EstimateLine {
    pub fn part(&self) -> Option<&PartInfo> {
        match &self.detail {
            Some(LineDetail::Part(part)) => Some(part),
            _ => None,
        }
    }

    pub fn labor(&self) -> Option<&LaborInfo> {
        match &self.detail {
            Some(LineDetail::Labor(labor)) => Some(labor),
            _ => None,
        }
    }
}

/// Vendor-reported totals, captured as-is.
///
/// The merge engine recomputes the authoritative totals from line detail;
/// these figures serve as tax passthrough and display fallback only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimateTotals {
    pub gross: Option<Decimal>,
    pub net: Option<Decimal>,
    pub gst: Option<Decimal>,
    pub pst: Option<Decimal>,
}

impl EstimateTotals {
    /// The vendor's grand total, preferring net over gross
    pub fn vendor_total(&self) -> Option<Decimal> {
        self.net.or(self.gross)
    }
}

/// Special repair requirements detected from explicit flags or line
/// description keywords
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RepairFlags {
    pub adas_calibration: bool,
    pub post_repair_scan: bool,
    pub wheel_alignment: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsuranceInfo {
    pub insurer: Option<String>,
    pub policy_number: Option<String>,
    pub deductible: Option<Decimal>,
}

/// Estimating system that produced the export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Mitchell,
    CccOne,
    Audatex,
    Unknown,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Mitchell => "Mitchell",
            SourceSystem::CccOne => "CCC ONE",
            SourceSystem::Audatex => "Audatex",
            SourceSystem::Unknown => "Unknown",
        }
    }

    /// Classify a vendor application name from a document header
    pub fn from_application_name(name: &str) -> SourceSystem {
        let upper = name.to_uppercase();
        if upper.contains("MITCHELL") {
            SourceSystem::Mitchell
        } else if upper.contains("CCC") {
            SourceSystem::CccOne
        } else if upper.contains("AUDATEX") || upper.contains("QAPTER") {
            SourceSystem::Audatex
        } else {
            SourceSystem::Unknown
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record the parser did not recognize, kept verbatim.
///
/// Unknown records never influence the merge; they ride along so an
/// operator can see exactly what the vendor sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRecord {
    pub tag: String,
    pub fields: Vec<String>,
}

/// Provenance for one parse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportMeta {
    pub source_system: SourceSystem,
    pub import_timestamp: DateTime<Utc>,
    /// Every unrecognized structural element seen during the parse, in
    /// encounter order, deduplicated
    pub unknown_tags: Vec<String>,
    /// Raw fields of unrecognized records, one entry per occurrence
    pub unknown_records: Vec<UnknownRecord>,
}

/// The parser's sole output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPayload {
    pub identities: JobIdentities,
    pub customer: Option<CustomerInfo>,
    pub vehicle: Option<VehicleInfo>,
    pub estimate_date: Option<NaiveDate>,
    pub lines: Vec<EstimateLine>,
    pub totals: EstimateTotals,
    pub flags: RepairFlags,
    pub insurance: InsuranceInfo,
    pub meta: ImportMeta,
}

impl NormalizedPayload {
    /// Flattened view of all lines carrying part detail (materials
    /// included), for callers that only care about parts
    pub fn parts(&self) -> impl Iterator<Item = &PartInfo> {
        self.lines.iter().filter_map(|line| line.part())
    }
}
