//! Idempotent estimate merge
//!
//! One parsed payload becomes exactly one database transaction: resolve the
//! job's identity, honor the user-modification guard, dedupe the customer
//! and vehicle, write the job and its lines, append a history entry, commit.
//! Re-importing the same file converges on the same rows instead of
//! multiplying them.
//!
//! Identity resolution order is claim number, then RO number, then VIN. The
//! VIN fallback only fires when the file carries neither number, so a new
//! claim on a previously repaired vehicle opens a new job rather than
//! overwriting the finished one.

pub mod totals;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bayline_common::db::{
    Customer, CustomerKind, HistoryEntry, HistoryMetadata, Job, JobLine, Vehicle,
};
use bayline_common::Error;

use crate::db::{customers, jobs, shops, vehicles};
use crate::error::ImportError;
use crate::model::{
    CustomerInfo, CustomerParty, LineDetail, NormalizedPayload, SourceSystem, VehicleInfo,
};
use crate::parsers::phone_digits;

/// What the merge did with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    Created,
    Updated,
    /// Rejected by the user-modification guard; only history was touched
    Skipped,
}

impl ImportAction {
    pub fn as_history_str(&self) -> &'static str {
        match self {
            ImportAction::Created => "created",
            ImportAction::Updated => "updated",
            ImportAction::Skipped => "import_skipped",
        }
    }
}

/// Merge result handed back to the batch layer
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub action: ImportAction,
    pub job_id: Uuid,
    pub job_number: String,
}

/// Applies normalized payloads to one shop's database.
#[derive(Clone)]
pub struct MergeEngine {
    pool: SqlitePool,
    shop_name: String,
}

impl MergeEngine {
    pub fn new(pool: SqlitePool, shop_name: impl Into<String>) -> Self {
        Self {
            pool,
            shop_name: shop_name.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Merge one payload inside a single transaction.
    ///
    /// Payloads with no claim number, RO number, or VIN are rejected before
    /// any database work: without an identity every re-import would open a
    /// fresh job.
    pub async fn upsert_job(&self, payload: &NormalizedPayload) -> Result<MergeOutcome, ImportError> {
        if payload.identities.is_empty() {
            return Err(ImportError::Common(Error::InvalidInput(
                "estimate carries no claim number, RO number, or VIN".to_string(),
            )));
        }

        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        let shop = shops::ensure_shop(&mut tx, &self.shop_name).await?;
        let existing = resolve_existing_job(&mut tx, shop.guid, payload).await?;

        if let Some(job) = &existing {
            if job.user_modified {
                let mut history = job.history.clone();
                history.push(history_entry(
                    ImportAction::Skipped,
                    payload,
                    "Import ignored, job has user modifications".to_string(),
                ));
                jobs::save_history(&mut tx, job.guid, &history).await?;
                tx.commit().await.map_err(Error::from)?;
                warn!(job_number = %job.job_number, "import skipped, job is user-modified");
                return Ok(MergeOutcome {
                    action: ImportAction::Skipped,
                    job_id: job.guid,
                    job_number: job.job_number.clone(),
                });
            }
        }

        let prior_customer = existing.as_ref().and_then(|job| job.customer_id);
        let prior_vehicle = existing.as_ref().and_then(|job| job.vehicle_id);

        let customer_id =
            upsert_customer(&mut tx, shop.guid, payload.customer.as_ref(), prior_customer).await?;
        let vehicle_id = upsert_vehicle(
            &mut tx,
            shop.guid,
            customer_id,
            payload.vehicle.as_ref(),
            prior_vehicle,
        )
        .await?;

        let computed = totals::compute_totals(payload);
        let now = Utc::now();

        let (mut job, action) = match existing {
            Some(job) => (job, ImportAction::Updated),
            None => {
                let prefix = format!("J{}", now.format("%Y%m%d"));
                let job_number = jobs::next_job_number(&mut tx, shop.guid, &prefix).await?;
                (blank_job(shop.guid, job_number), ImportAction::Created)
            }
        };

        apply_payload(&mut job, payload, &computed, customer_id, vehicle_id, now);
        job.history.push(history_entry(
            action,
            payload,
            match action {
                ImportAction::Created => format!(
                    "Job created from {} estimate",
                    payload.meta.source_system.as_str()
                ),
                _ => format!(
                    "Job updated from {} estimate",
                    payload.meta.source_system.as_str()
                ),
            },
        ));

        match action {
            ImportAction::Created => jobs::insert_job(&mut tx, &job).await?,
            _ => jobs::update_job(&mut tx, &job).await?,
        }

        let lines = job_lines_for(job.guid, payload);
        jobs::replace_imported_lines(&mut tx, job.guid, &lines).await?;

        tx.commit().await.map_err(Error::from)?;

        info!(
            action = action.as_history_str(),
            job_number = %job.job_number,
            lines = lines.len(),
            "merged estimate"
        );
        Ok(MergeOutcome {
            action,
            job_id: job.guid,
            job_number: job.job_number,
        })
    }
}

/// Find the job this payload belongs to, if any.
async fn resolve_existing_job(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    payload: &NormalizedPayload,
) -> bayline_common::Result<Option<Job>> {
    let ids = &payload.identities;

    if let Some(claim) = &ids.claim_number {
        if let Some(job) = jobs::find_by_claim(tx, shop_id, claim).await? {
            debug!(claim_number = %claim, "matched existing job by claim number");
            return Ok(Some(job));
        }
    }
    if let Some(ro) = &ids.ro_number {
        if let Some(job) = jobs::find_by_ro(tx, shop_id, ro).await? {
            debug!(ro_number = %ro, "matched existing job by RO number");
            return Ok(Some(job));
        }
    }
    // VIN only identifies a job when the file carries no number at all
    if ids.claim_number.is_none() && ids.ro_number.is_none() {
        if let Some(vin) = &ids.vin {
            if let Some(job) = jobs::find_by_vehicle_vin(tx, shop_id, vin).await? {
                debug!(vin = %vin, "matched existing job by VIN");
                return Ok(Some(job));
            }
        }
    }
    Ok(None)
}

/// Dedupe and write the payload's customer.
///
/// Match precedence: email, then any phone number (digits only), then
/// company name for organizations. A payload that matches nothing but
/// belongs to a job that already has a customer updates that customer in
/// place, so key-less records stay idempotent across re-imports.
async fn upsert_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    info: Option<&CustomerInfo>,
    prior: Option<Uuid>,
) -> bayline_common::Result<Option<Uuid>> {
    let info = match info {
        Some(info) => info,
        None => return Ok(prior),
    };

    let mut matched = find_existing_customer(tx, shop_id, info).await?;
    if matched.is_none() {
        if let Some(guid) = prior {
            matched = customers::find_by_guid(tx, guid).await?;
        }
    }

    match matched {
        Some(mut customer) => {
            overlay_customer(&mut customer, info);
            customers::update_customer(tx, &customer).await?;
            Ok(Some(customer.guid))
        }
        None => {
            let customer_number = customers::next_customer_number(tx, shop_id).await?;
            let mut customer = blank_customer(shop_id, customer_number);
            overlay_customer(&mut customer, info);
            customers::insert_customer(tx, &customer).await?;
            debug!(customer_number, "created customer");
            Ok(Some(customer.guid))
        }
    }
}

async fn find_existing_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    info: &CustomerInfo,
) -> bayline_common::Result<Option<Customer>> {
    if let Some(email) = &info.email {
        if let Some(customer) = customers::find_by_email(tx, shop_id, email).await? {
            return Ok(Some(customer));
        }
    }
    for phone in info.phones.iter() {
        let digits = phone_digits(phone);
        if digits.is_empty() {
            continue;
        }
        if let Some(customer) = customers::find_by_phone(tx, shop_id, &digits).await? {
            return Ok(Some(customer));
        }
    }
    if let CustomerParty::Organization { company_name, .. } = &info.party {
        if let Some(customer) = customers::find_by_company(tx, shop_id, company_name).await? {
            return Ok(Some(customer));
        }
    }
    Ok(None)
}

/// Dedupe and write the payload's vehicle.
///
/// VIN is the only cross-file match key. A VIN-less payload reuses the
/// job's existing vehicle when there is one; a payload whose VIN matches
/// nothing always gets a fresh row, even if the job pointed at a different
/// vehicle before, because a different VIN is a different vehicle.
async fn upsert_vehicle(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    customer_id: Option<Uuid>,
    info: Option<&VehicleInfo>,
    prior: Option<Uuid>,
) -> bayline_common::Result<Option<Uuid>> {
    let info = match info {
        Some(info) if !info.is_vacant() => info,
        _ => return Ok(prior),
    };

    let mut matched = match &info.vin {
        Some(vin) => vehicles::find_by_vin(tx, shop_id, vin).await?,
        None => None,
    };
    if matched.is_none() && info.vin.is_none() {
        if let Some(guid) = prior {
            matched = vehicles::find_by_guid(tx, guid).await?;
        }
    }

    match matched {
        Some(mut vehicle) => {
            overlay_vehicle(&mut vehicle, info);
            // Re-import can hand the vehicle to a newly identified owner
            if customer_id.is_some() {
                vehicle.customer_id = customer_id;
            }
            vehicles::update_vehicle(tx, &vehicle).await?;
            Ok(Some(vehicle.guid))
        }
        None => {
            let mut vehicle = blank_vehicle(shop_id, customer_id);
            overlay_vehicle(&mut vehicle, info);
            vehicles::insert_vehicle(tx, &vehicle).await?;
            if let Some(vin) = &vehicle.vin {
                debug!(vin = %vin, "created vehicle");
            }
            Ok(Some(vehicle.guid))
        }
    }
}

fn blank_customer(shop_id: Uuid, customer_number: i64) -> Customer {
    Customer {
        guid: Uuid::new_v4(),
        shop_id,
        customer_number,
        kind: CustomerKind::Person,
        first_name: None,
        last_name: None,
        company_name: None,
        email: None,
        phone_home: None,
        phone_work: None,
        phone_cell: None,
        phone_fax: None,
        gst_payable: false,
        address_line1: None,
        address_line2: None,
        city: None,
        province: None,
        postal_code: None,
        country: None,
    }
}

fn blank_vehicle(shop_id: Uuid, customer_id: Option<Uuid>) -> Vehicle {
    Vehicle {
        guid: Uuid::new_v4(),
        shop_id,
        customer_id,
        vin: None,
        year: None,
        make: None,
        model: None,
        trim: None,
        body_style: None,
        color: None,
        odometer: None,
        engine: None,
        transmission: None,
        fuel_type: None,
        license_plate: None,
    }
}

fn blank_job(shop_id: Uuid, job_number: String) -> Job {
    Job {
        guid: Uuid::new_v4(),
        shop_id,
        customer_id: None,
        vehicle_id: None,
        job_number,
        claim_number: None,
        ro_number: None,
        status: "estimate".to_string(),
        source_system: None,
        insurer: None,
        policy_number: None,
        deductible: None,
        estimate_date: None,
        parts_total: rust_decimal::Decimal::ZERO,
        labor_total: rust_decimal::Decimal::ZERO,
        other_total: rust_decimal::Decimal::ZERO,
        subtotal: rust_decimal::Decimal::ZERO,
        gst_amount: rust_decimal::Decimal::ZERO,
        pst_amount: rust_decimal::Decimal::ZERO,
        grand_total: rust_decimal::Decimal::ZERO,
        vendor_total: None,
        adas_calibration: false,
        post_repair_scan: false,
        wheel_alignment: false,
        user_modified: false,
        history: Vec::new(),
        last_import_at: None,
    }
}

/// Overlay present payload fields onto a customer row. Absent fields leave
/// the stored value alone, so a sparse re-export cannot erase data.
fn overlay_customer(customer: &mut Customer, info: &CustomerInfo) {
    match &info.party {
        CustomerParty::Person {
            first_name,
            last_name,
        } => {
            if !first_name.is_empty() {
                customer.first_name = Some(first_name.clone());
            }
            if !last_name.is_empty() {
                customer.last_name = Some(last_name.clone());
            }
            // A person record never demotes an established organization
            if customer.company_name.is_none() {
                customer.kind = CustomerKind::Person;
            }
        }
        CustomerParty::Organization {
            company_name,
            contact_name,
        } => {
            customer.kind = CustomerKind::Organization;
            customer.company_name = Some(company_name.clone());
            if let Some(contact) = contact_name {
                let (first, last) = split_contact(contact);
                customer.first_name = Some(first);
                if let Some(last) = last {
                    customer.last_name = Some(last);
                }
            }
        }
    }

    if let Some(email) = &info.email {
        customer.email = Some(email.clone());
    }
    if let Some(phone) = &info.phones.home {
        customer.phone_home = Some(phone.clone());
    }
    if let Some(phone) = &info.phones.work {
        customer.phone_work = Some(phone.clone());
    }
    if let Some(phone) = &info.phones.cell {
        customer.phone_cell = Some(phone.clone());
    }
    if let Some(phone) = &info.phones.fax {
        customer.phone_fax = Some(phone.clone());
    }
    if let Some(value) = &info.address.line1 {
        customer.address_line1 = Some(value.clone());
    }
    if let Some(value) = &info.address.line2 {
        customer.address_line2 = Some(value.clone());
    }
    if let Some(value) = &info.address.city {
        customer.city = Some(value.clone());
    }
    if let Some(value) = &info.address.province {
        customer.province = Some(value.clone());
    }
    if let Some(value) = &info.address.postal_code {
        customer.postal_code = Some(value.clone());
    }
    if let Some(value) = &info.address.country {
        customer.country = Some(value.clone());
    }

    // GST liability sticks once established
    customer.gst_payable = customer.gst_payable || info.gst_payable;
}

fn overlay_vehicle(vehicle: &mut Vehicle, info: &VehicleInfo) {
    if let Some(vin) = &info.vin {
        vehicle.vin = Some(vin.clone());
    }
    if let Some(year) = info.year {
        vehicle.year = Some(i64::from(year));
    }
    if let Some(value) = &info.make {
        vehicle.make = Some(value.clone());
    }
    if let Some(value) = &info.model {
        vehicle.model = Some(value.clone());
    }
    if let Some(value) = &info.trim {
        vehicle.trim = Some(value.clone());
    }
    if let Some(value) = &info.body_style {
        vehicle.body_style = Some(value.clone());
    }
    if let Some(value) = &info.color {
        vehicle.color = Some(value.clone());
    }
    if let Some(odometer) = info.odometer {
        vehicle.odometer = Some(odometer);
    }
    if let Some(value) = &info.engine {
        vehicle.engine = Some(value.clone());
    }
    if let Some(value) = &info.transmission {
        vehicle.transmission = Some(value.clone());
    }
    if let Some(value) = &info.fuel_type {
        vehicle.fuel_type = Some(value.clone());
    }
    if let Some(value) = &info.license_plate {
        vehicle.license_plate = Some(value.clone());
    }
}

/// Overlay payload fields onto a job. Identities only accumulate, so a
/// later file that lacks an RO number cannot strip the one already stored.
/// Totals and repair flags follow the latest import wholesale because the
/// newest estimate supersedes the line detail behind them.
fn apply_payload(
    job: &mut Job,
    payload: &NormalizedPayload,
    computed: &totals::ComputedTotals,
    customer_id: Option<Uuid>,
    vehicle_id: Option<Uuid>,
    now: DateTime<Utc>,
) {
    if customer_id.is_some() {
        job.customer_id = customer_id;
    }
    if vehicle_id.is_some() {
        job.vehicle_id = vehicle_id;
    }
    if payload.identities.claim_number.is_some() {
        job.claim_number = payload.identities.claim_number.clone();
    }
    if payload.identities.ro_number.is_some() {
        job.ro_number = payload.identities.ro_number.clone();
    }
    if payload.meta.source_system != SourceSystem::Unknown {
        job.source_system = Some(payload.meta.source_system.as_str().to_string());
    }
    if payload.insurance.insurer.is_some() {
        job.insurer = payload.insurance.insurer.clone();
    }
    if payload.insurance.policy_number.is_some() {
        job.policy_number = payload.insurance.policy_number.clone();
    }
    if payload.insurance.deductible.is_some() {
        job.deductible = payload.insurance.deductible;
    }
    if payload.estimate_date.is_some() {
        job.estimate_date = payload.estimate_date;
    }

    job.parts_total = computed.parts_total;
    job.labor_total = computed.labor_total;
    job.other_total = computed.other_total;
    job.subtotal = computed.subtotal;
    job.gst_amount = computed.gst_amount;
    job.pst_amount = computed.pst_amount;
    job.grand_total = computed.grand_total;
    job.vendor_total = payload.totals.vendor_total();

    job.adas_calibration = payload.flags.adas_calibration;
    job.post_repair_scan = payload.flags.post_repair_scan;
    job.wheel_alignment = payload.flags.wheel_alignment;

    job.last_import_at = Some(now);
}

fn history_entry(action: ImportAction, payload: &NormalizedPayload, description: String) -> HistoryEntry {
    HistoryEntry {
        timestamp: Utc::now(),
        action: action.as_history_str().to_string(),
        description,
        source: payload.meta.source_system.as_str().to_string(),
        metadata: HistoryMetadata {
            unknown_tags: payload.meta.unknown_tags.clone(),
            import_timestamp: payload.meta.import_timestamp,
        },
    }
}

/// Flatten payload lines into persistable rows, in printed order.
fn job_lines_for(job_id: Uuid, payload: &NormalizedPayload) -> Vec<JobLine> {
    payload
        .lines
        .iter()
        .enumerate()
        .map(|(position, line)| {
            let mut row = JobLine {
                guid: Uuid::new_v4(),
                job_id,
                position: position as i64,
                line_number: i64::from(line.line_number),
                parent_line: line.parent_line.map(i64::from),
                line_type: line.kind.as_str().to_string(),
                description: line.description.clone(),
                taxable: line.taxable,
                amount: line.amount,
                detail_kind: None,
                part_number: None,
                quantity: None,
                unit_price: None,
                is_material: false,
                labor_type: None,
                labor_hours: None,
                labor_rate: None,
                charge_type: None,
                user_edited: false,
            };
            match &line.detail {
                Some(LineDetail::Part(part)) => {
                    row.detail_kind = Some("part".to_string());
                    row.part_number = part.part_number.clone();
                    row.quantity = Some(part.quantity);
                    row.unit_price = Some(part.unit_price);
                    row.is_material = part.is_material;
                }
                Some(LineDetail::Labor(labor)) => {
                    row.detail_kind = Some("labor".to_string());
                    row.labor_type = labor.labor_type.clone();
                    row.labor_hours = Some(labor.hours);
                    row.labor_rate = Some(labor.rate);
                }
                Some(LineDetail::Other(other)) => {
                    row.detail_kind = Some("other".to_string());
                    row.charge_type = other.charge_type.clone();
                }
                None => {}
            }
            row
        })
        .collect()
}

fn split_contact(contact: &str) -> (String, Option<String>) {
    match contact.split_once(' ') {
        Some((first, last)) => (first.to_string(), Some(last.trim().to_string())),
        None => (contact.to_string(), None),
    }
}
