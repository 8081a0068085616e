//! Job and job-line persistence
//!
//! Jobs carry the imported estimate plus an append-only `history` JSON
//! column. Imported lines are replaced wholesale on re-import; rows a user
//! has edited (`user_edited = 1`) are never touched.

use super::{
    date_from_db, decimal_from_db, decimal_to_db, money_to_db, opt_decimal_from_db,
    opt_parse_guid, parse_guid, timestamp_from_db,
};
use bayline_common::db::{HistoryEntry, Job, JobLine};
use bayline_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const JOB_COLUMNS: &str = "guid, shop_id, customer_id, vehicle_id, job_number, claim_number, \
     ro_number, status, source_system, insurer, policy_number, deductible, estimate_date, \
     parts_total, labor_total, other_total, subtotal, gst_amount, pst_amount, grand_total, \
     vendor_total, adas_calibration, post_repair_scan, wheel_alignment, user_modified, \
     history, last_import_at";

const LINE_COLUMNS: &str = "guid, job_id, position, line_number, parent_line, line_type, \
     description, taxable, amount, detail_kind, part_number, quantity, unit_price, is_material, \
     labor_type, labor_hours, labor_rate, charge_type, user_edited";

pub async fn find_by_claim(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    claim_number: &str,
) -> Result<Option<Job>> {
    let query = format!(
        "SELECT {} FROM jobs WHERE shop_id = ? AND claim_number = ?",
        JOB_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(claim_number)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn find_by_ro(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    ro_number: &str,
) -> Result<Option<Job>> {
    let query = format!(
        "SELECT {} FROM jobs WHERE shop_id = ? AND ro_number = ?",
        JOB_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(ro_number)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Most recently updated job attached to the vehicle with this VIN.
pub async fn find_by_vehicle_vin(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    vin: &str,
) -> Result<Option<Job>> {
    let query = format!(
        "SELECT {} FROM jobs j \
         JOIN vehicles v ON j.vehicle_id = v.guid \
         WHERE j.shop_id = ? AND v.vin = ? \
         ORDER BY j.updated_at DESC, j.created_at DESC LIMIT 1",
        qualified_job_columns()
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(vin)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

fn qualified_job_columns() -> String {
    JOB_COLUMNS
        .split(',')
        .map(|c| format!("j.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Next job number under a date prefix: `J20240816-001`, `J20240816-002`,
/// and so on. The suffix restarts for each prefix.
pub async fn next_job_number(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    prefix: &str,
) -> Result<String> {
    let max: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(CAST(substr(job_number, length(?) + 2) AS INTEGER)), 0)
        FROM jobs
        WHERE shop_id = ? AND job_number LIKE ? || '-%'
        "#,
    )
    .bind(prefix)
    .bind(shop_id.to_string())
    .bind(prefix)
    .fetch_one(&mut **tx)
    .await?;

    Ok(format!("{}-{:03}", prefix, max + 1))
}

pub async fn insert_job(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (
            guid, shop_id, customer_id, vehicle_id, job_number, claim_number,
            ro_number, status, source_system, insurer, policy_number,
            deductible, estimate_date, parts_total, labor_total, other_total,
            subtotal, gst_amount, pst_amount, grand_total, vendor_total,
            adas_calibration, post_repair_scan, wheel_alignment,
            user_modified, history, last_import_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.guid.to_string())
    .bind(job.shop_id.to_string())
    .bind(job.customer_id.map(|id| id.to_string()))
    .bind(job.vehicle_id.map(|id| id.to_string()))
    .bind(&job.job_number)
    .bind(&job.claim_number)
    .bind(&job.ro_number)
    .bind(&job.status)
    .bind(&job.source_system)
    .bind(&job.insurer)
    .bind(&job.policy_number)
    .bind(job.deductible.map(money_to_db))
    .bind(job.estimate_date.map(|d| d.to_string()))
    .bind(money_to_db(job.parts_total))
    .bind(money_to_db(job.labor_total))
    .bind(money_to_db(job.other_total))
    .bind(money_to_db(job.subtotal))
    .bind(money_to_db(job.gst_amount))
    .bind(money_to_db(job.pst_amount))
    .bind(money_to_db(job.grand_total))
    .bind(job.vendor_total.map(money_to_db))
    .bind(job.adas_calibration)
    .bind(job.post_repair_scan)
    .bind(job.wheel_alignment)
    .bind(job.user_modified)
    .bind(history_to_db(&job.history)?)
    .bind(job.last_import_at.map(|t| t.to_rfc3339()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Rewrite every import-owned field. `job_number`, `status`, and
/// `user_modified` belong to the shop and are left alone.
pub async fn update_job(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, job: &Job) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            customer_id = ?, vehicle_id = ?, claim_number = ?, ro_number = ?,
            source_system = ?, insurer = ?, policy_number = ?, deductible = ?,
            estimate_date = ?, parts_total = ?, labor_total = ?,
            other_total = ?, subtotal = ?, gst_amount = ?, pst_amount = ?,
            grand_total = ?, vendor_total = ?, adas_calibration = ?,
            post_repair_scan = ?, wheel_alignment = ?, history = ?,
            last_import_at = ?, updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(job.customer_id.map(|id| id.to_string()))
    .bind(job.vehicle_id.map(|id| id.to_string()))
    .bind(&job.claim_number)
    .bind(&job.ro_number)
    .bind(&job.source_system)
    .bind(&job.insurer)
    .bind(&job.policy_number)
    .bind(job.deductible.map(money_to_db))
    .bind(job.estimate_date.map(|d| d.to_string()))
    .bind(money_to_db(job.parts_total))
    .bind(money_to_db(job.labor_total))
    .bind(money_to_db(job.other_total))
    .bind(money_to_db(job.subtotal))
    .bind(money_to_db(job.gst_amount))
    .bind(money_to_db(job.pst_amount))
    .bind(money_to_db(job.grand_total))
    .bind(job.vendor_total.map(money_to_db))
    .bind(job.adas_calibration)
    .bind(job.post_repair_scan)
    .bind(job.wheel_alignment)
    .bind(history_to_db(&job.history)?)
    .bind(job.last_import_at.map(|t| t.to_rfc3339()))
    .bind(job.guid.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append-only history write used when nothing else on the job may change.
pub async fn save_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: Uuid,
    history: &[HistoryEntry],
) -> Result<()> {
    sqlx::query("UPDATE jobs SET history = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?")
        .bind(history_to_db(history)?)
        .bind(job_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Delete the job's imported lines and insert the new set. User-edited
/// rows survive.
pub async fn replace_imported_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: Uuid,
    lines: &[JobLine],
) -> Result<()> {
    sqlx::query("DELETE FROM job_lines WHERE job_id = ? AND user_edited = 0")
        .bind(job_id.to_string())
        .execute(&mut **tx)
        .await?;

    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO job_lines (
                guid, job_id, position, line_number, parent_line, line_type,
                description, taxable, amount, detail_kind, part_number,
                quantity, unit_price, is_material, labor_type, labor_hours,
                labor_rate, charge_type, user_edited
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(line.guid.to_string())
        .bind(job_id.to_string())
        .bind(line.position)
        .bind(line.line_number)
        .bind(line.parent_line)
        .bind(&line.line_type)
        .bind(&line.description)
        .bind(line.taxable)
        .bind(money_to_db(line.amount))
        .bind(&line.detail_kind)
        .bind(&line.part_number)
        .bind(line.quantity.map(decimal_to_db))
        .bind(line.unit_price.map(decimal_to_db))
        .bind(line.is_material)
        .bind(&line.labor_type)
        .bind(line.labor_hours.map(decimal_to_db))
        .bind(line.labor_rate.map(decimal_to_db))
        .bind(&line.charge_type)
        .bind(line.user_edited)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Pool-based read for reporting and tests.
pub async fn load_job(pool: &sqlx::SqlitePool, guid: Uuid) -> Result<Option<Job>> {
    let query = format!("SELECT {} FROM jobs WHERE guid = ?", JOB_COLUMNS);
    let row = sqlx::query(&query)
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// All lines for a job in display order.
pub async fn load_job_lines(pool: &sqlx::SqlitePool, job_id: Uuid) -> Result<Vec<JobLine>> {
    let query = format!(
        "SELECT {} FROM job_lines WHERE job_id = ? ORDER BY position",
        LINE_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(job_id.to_string())
        .fetch_all(pool)
        .await?;
    rows.iter().map(line_from_row).collect()
}

fn history_to_db(history: &[HistoryEntry]) -> Result<String> {
    serde_json::to_string(history)
        .map_err(|e| Error::Internal(format!("failed to serialize job history: {}", e)))
}

fn history_from_db(raw: &str) -> Result<Vec<HistoryEntry>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("invalid job history JSON: {}", e)))
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let guid: String = row.get("guid");
    let shop_id: String = row.get("shop_id");
    let customer_id: Option<String> = row.get("customer_id");
    let vehicle_id: Option<String> = row.get("vehicle_id");
    let deductible: Option<String> = row.get("deductible");
    let estimate_date: Option<String> = row.get("estimate_date");
    let vendor_total: Option<String> = row.get("vendor_total");
    let history: String = row.get("history");
    let last_import_at: Option<String> = row.get("last_import_at");

    Ok(Job {
        guid: parse_guid(&guid)?,
        shop_id: parse_guid(&shop_id)?,
        customer_id: opt_parse_guid(customer_id)?,
        vehicle_id: opt_parse_guid(vehicle_id)?,
        job_number: row.get("job_number"),
        claim_number: row.get("claim_number"),
        ro_number: row.get("ro_number"),
        status: row.get("status"),
        source_system: row.get("source_system"),
        insurer: row.get("insurer"),
        policy_number: row.get("policy_number"),
        deductible: opt_decimal_from_db(deductible)?,
        estimate_date: date_from_db(estimate_date)?,
        parts_total: decimal_from_db(row.get("parts_total"))?,
        labor_total: decimal_from_db(row.get("labor_total"))?,
        other_total: decimal_from_db(row.get("other_total"))?,
        subtotal: decimal_from_db(row.get("subtotal"))?,
        gst_amount: decimal_from_db(row.get("gst_amount"))?,
        pst_amount: decimal_from_db(row.get("pst_amount"))?,
        grand_total: decimal_from_db(row.get("grand_total"))?,
        vendor_total: opt_decimal_from_db(vendor_total)?,
        adas_calibration: row.get("adas_calibration"),
        post_repair_scan: row.get("post_repair_scan"),
        wheel_alignment: row.get("wheel_alignment"),
        user_modified: row.get("user_modified"),
        history: history_from_db(&history)?,
        last_import_at: timestamp_from_db(last_import_at)?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<JobLine> {
    let guid: String = row.get("guid");
    let job_id: String = row.get("job_id");
    let quantity: Option<String> = row.get("quantity");
    let unit_price: Option<String> = row.get("unit_price");
    let labor_hours: Option<String> = row.get("labor_hours");
    let labor_rate: Option<String> = row.get("labor_rate");

    Ok(JobLine {
        guid: parse_guid(&guid)?,
        job_id: parse_guid(&job_id)?,
        position: row.get("position"),
        line_number: row.get("line_number"),
        parent_line: row.get("parent_line"),
        line_type: row.get("line_type"),
        description: row.get("description"),
        taxable: row.get("taxable"),
        amount: decimal_from_db(row.get("amount"))?,
        detail_kind: row.get("detail_kind"),
        part_number: row.get("part_number"),
        quantity: opt_decimal_from_db(quantity)?,
        unit_price: opt_decimal_from_db(unit_price)?,
        is_material: row.get("is_material"),
        labor_type: row.get("labor_type"),
        labor_hours: opt_decimal_from_db(labor_hours)?,
        labor_rate: opt_decimal_from_db(labor_rate)?,
        charge_type: row.get("charge_type"),
        user_edited: row.get("user_edited"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::shops::ensure_shop;
    use bayline_common::db::memory_pool;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn sample_job(shop_id: Uuid, job_number: &str) -> Job {
        Job {
            guid: Uuid::new_v4(),
            shop_id,
            customer_id: None,
            vehicle_id: None,
            job_number: job_number.to_string(),
            claim_number: Some("CLM-1".to_string()),
            ro_number: Some("4521".to_string()),
            status: "estimate".to_string(),
            source_system: Some("Mitchell".to_string()),
            insurer: Some("ICBC".to_string()),
            policy_number: None,
            deductible: Some(Decimal::new(30000, 2)),
            estimate_date: NaiveDate::from_ymd_opt(2024, 8, 15),
            parts_total: Decimal::new(45000, 2),
            labor_total: Decimal::new(16250, 2),
            other_total: Decimal::ZERO,
            subtotal: Decimal::new(61250, 2),
            gst_amount: Decimal::new(3063, 2),
            pst_amount: Decimal::ZERO,
            grand_total: Decimal::new(64313, 2),
            vendor_total: Some(Decimal::new(64313, 2)),
            adas_calibration: false,
            post_repair_scan: true,
            wheel_alignment: false,
            user_modified: false,
            history: Vec::new(),
            last_import_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn job_round_trips_with_exact_decimals() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();
        let job = sample_job(shop.guid, "J20240816-001");
        insert_job(&mut tx, &job).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = load_job(&pool, job.guid).await.unwrap().expect("job");
        assert_eq!(loaded.job_number, "J20240816-001");
        assert_eq!(loaded.subtotal, Decimal::new(61250, 2));
        assert_eq!(loaded.grand_total, Decimal::new(64313, 2));
        assert_eq!(loaded.deductible, Some(Decimal::new(30000, 2)));
        assert_eq!(loaded.estimate_date, NaiveDate::from_ymd_opt(2024, 8, 15));
        assert!(loaded.post_repair_scan);
        assert!(loaded.history.is_empty());
    }

    #[tokio::test]
    async fn identity_lookups_find_the_job() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();
        let job = sample_job(shop.guid, "J20240816-001");
        insert_job(&mut tx, &job).await.unwrap();

        let by_claim = find_by_claim(&mut tx, shop.guid, "CLM-1").await.unwrap();
        assert_eq!(by_claim.map(|j| j.guid), Some(job.guid));

        let by_ro = find_by_ro(&mut tx, shop.guid, "4521").await.unwrap();
        assert_eq!(by_ro.map(|j| j.guid), Some(job.guid));

        let miss = find_by_claim(&mut tx, shop.guid, "CLM-2").await.unwrap();
        assert!(miss.is_none());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn job_numbers_increment_within_a_prefix() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();

        let first = next_job_number(&mut tx, shop.guid, "J20240816").await.unwrap();
        assert_eq!(first, "J20240816-001");

        let mut job = sample_job(shop.guid, &first);
        job.claim_number = None;
        job.ro_number = None;
        insert_job(&mut tx, &job).await.unwrap();

        let second = next_job_number(&mut tx, shop.guid, "J20240816").await.unwrap();
        assert_eq!(second, "J20240816-002");

        // A different day restarts the sequence
        let other_day = next_job_number(&mut tx, shop.guid, "J20240817").await.unwrap();
        assert_eq!(other_day, "J20240817-001");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn replacing_lines_spares_user_edited_rows() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();
        let mut job = sample_job(shop.guid, "J20240816-001");
        job.claim_number = None;
        job.ro_number = None;
        insert_job(&mut tx, &job).await.unwrap();

        let imported = JobLine {
            guid: Uuid::new_v4(),
            job_id: job.guid,
            position: 0,
            line_number: 1,
            parent_line: None,
            line_type: "part".to_string(),
            description: "Bumper".to_string(),
            taxable: true,
            amount: Decimal::new(45000, 2),
            detail_kind: Some("part".to_string()),
            part_number: Some("52119-02180".to_string()),
            quantity: Some(Decimal::ONE),
            unit_price: Some(Decimal::new(45000, 2)),
            is_material: false,
            labor_type: None,
            labor_hours: None,
            labor_rate: None,
            charge_type: None,
            user_edited: false,
        };
        let mut manual = imported.clone();
        manual.guid = Uuid::new_v4();
        manual.position = 1;
        manual.line_number = 99;
        manual.description = "Hand-added courtesy wash".to_string();
        manual.user_edited = true;

        replace_imported_lines(&mut tx, job.guid, std::slice::from_ref(&imported))
            .await
            .unwrap();
        // Manual row added outside the import path
        sqlx::query(
            "INSERT INTO job_lines (guid, job_id, position, line_number, line_type, description, amount, user_edited) \
             VALUES (?, ?, ?, ?, 'other', ?, '0', 1)",
        )
        .bind(manual.guid.to_string())
        .bind(job.guid.to_string())
        .bind(manual.position)
        .bind(manual.line_number)
        .bind(&manual.description)
        .execute(&mut *tx)
        .await
        .unwrap();

        // Re-import with a different line set
        let replacement = JobLine {
            guid: Uuid::new_v4(),
            description: "Bumper, repriced".to_string(),
            ..imported.clone()
        };
        replace_imported_lines(&mut tx, job.guid, std::slice::from_ref(&replacement))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let lines = load_job_lines(&pool, job.guid).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].description, "Bumper, repriced");
        assert!(lines[1].user_edited);
        assert_eq!(lines[1].description, "Hand-added courtesy wash");
    }

    #[tokio::test]
    async fn history_appends_through_save_history() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();
        let mut job = sample_job(shop.guid, "J20240816-001");
        job.claim_number = None;
        job.ro_number = None;
        insert_job(&mut tx, &job).await.unwrap();

        job.history.push(HistoryEntry {
            timestamp: Utc::now(),
            action: "import_skipped".to_string(),
            description: "Job was modified by a user".to_string(),
            source: "Mitchell".to_string(),
            metadata: bayline_common::db::HistoryMetadata {
                unknown_tags: Vec::new(),
                import_timestamp: Utc::now(),
            },
        });
        save_history(&mut tx, job.guid, &job.history).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = load_job(&pool, job.guid).await.unwrap().expect("job");
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].action, "import_skipped");
    }
}
