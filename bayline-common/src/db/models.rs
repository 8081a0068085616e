//! Persisted entity models
//!
//! Plain data structs mirroring the table rows the import pipeline reads
//! and writes. Money and hour columns are stored as canonical decimal TEXT
//! and surface here as `rust_decimal::Decimal`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant root; a single default row in this deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub guid: Uuid,
    pub name: String,
}

/// Customer classification persisted in `customers.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerKind {
    Person,
    Organization,
}

impl CustomerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerKind::Person => "person",
            CustomerKind::Organization => "organization",
        }
    }

    pub fn from_db(value: &str) -> CustomerKind {
        match value {
            "organization" => CustomerKind::Organization,
            _ => CustomerKind::Person,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub guid: Uuid,
    pub shop_id: Uuid,
    pub customer_number: i64,
    pub kind: CustomerKind,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub phone_home: Option<String>,
    pub phone_work: Option<String>,
    pub phone_cell: Option<String>,
    pub phone_fax: Option<String>,
    pub gst_payable: bool,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub guid: Uuid,
    pub shop_id: Uuid,
    /// Owning customer; vehicles can arrive before any customer is known
    pub customer_id: Option<Uuid>,
    pub vin: Option<String>,
    pub year: Option<i64>,
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

/// The repair order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub guid: Uuid,
    pub shop_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub job_number: String,
    pub claim_number: Option<String>,
    pub ro_number: Option<String>,
    pub status: String,
    pub source_system: Option<String>,
    pub insurer: Option<String>,
    pub policy_number: Option<String>,
    pub deductible: Option<Decimal>,
    pub estimate_date: Option<NaiveDate>,
    pub parts_total: Decimal,
    pub labor_total: Decimal,
    pub other_total: Decimal,
    pub subtotal: Decimal,
    pub gst_amount: Decimal,
    pub pst_amount: Decimal,
    pub grand_total: Decimal,
    pub vendor_total: Option<Decimal>,
    pub adas_calibration: bool,
    pub post_repair_scan: bool,
    pub wheel_alignment: bool,
    pub user_modified: bool,
    pub history: Vec<HistoryEntry>,
    pub last_import_at: Option<DateTime<Utc>>,
}

/// Persisted line-item detail, one row per estimate line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLine {
    pub guid: Uuid,
    pub job_id: Uuid,
    pub position: i64,
    pub line_number: i64,
    pub parent_line: Option<i64>,
    pub line_type: String,
    pub description: String,
    pub taxable: bool,
    pub amount: Decimal,
    pub detail_kind: Option<String>,
    pub part_number: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub is_material: bool,
    pub labor_type: Option<String>,
    pub labor_hours: Option<Decimal>,
    pub labor_rate: Option<Decimal>,
    pub charge_type: Option<String>,
    pub user_edited: bool,
}

/// One element of `Job.history`, appended on every import attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub description: String,
    pub source: String,
    pub metadata: HistoryMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMetadata {
    #[serde(rename = "unknownTags")]
    pub unknown_tags: Vec<String>,
    #[serde(rename = "importTimestamp")]
    pub import_timestamp: DateTime<Utc>,
}
