//! Schema creation
//!
//! Every function is idempotent (`CREATE TABLE IF NOT EXISTS`) so startup
//! can run the full sequence unconditionally against new and existing
//! databases alike.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Create all tables and indexes, then record the schema version.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_shops_table(pool).await?;
    create_customers_table(pool).await?;
    create_vehicles_table(pool).await?;
    create_jobs_table(pool).await?;
    create_job_lines_table(pool).await?;

    ensure_setting(pool, "schema_version", "1").await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application key-value pairs (currently the schema version).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_shops_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shops (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_customers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            guid TEXT PRIMARY KEY,
            shop_id TEXT NOT NULL REFERENCES shops(guid) ON DELETE CASCADE,
            customer_number INTEGER NOT NULL,
            kind TEXT NOT NULL DEFAULT 'person' CHECK (kind IN ('person', 'organization')),
            first_name TEXT,
            last_name TEXT,
            company_name TEXT,
            email TEXT,
            phone_home TEXT,
            phone_work TEXT,
            phone_cell TEXT,
            phone_fax TEXT,
            phone_lookup TEXT NOT NULL DEFAULT '',
            gst_payable INTEGER NOT NULL DEFAULT 0,
            address_line1 TEXT,
            address_line2 TEXT,
            city TEXT,
            province TEXT,
            postal_code TEXT,
            country TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (shop_id, customer_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_customers_shop_email ON customers(shop_id, email)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_customers_shop_company ON customers(shop_id, company_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_vehicles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            guid TEXT PRIMARY KEY,
            shop_id TEXT NOT NULL REFERENCES shops(guid) ON DELETE CASCADE,
            customer_id TEXT REFERENCES customers(guid) ON DELETE SET NULL,
            vin TEXT,
            year INTEGER,
            make TEXT,
            model TEXT,
            trim TEXT,
            body_style TEXT,
            color TEXT,
            odometer INTEGER,
            engine TEXT,
            transmission TEXT,
            fuel_type TEXT,
            license_plate TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // VIN uniqueness per shop; rows without a VIN are exempt
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_vehicles_shop_vin
        ON vehicles(shop_id, vin)
        WHERE vin IS NOT NULL AND vin != ''
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            guid TEXT PRIMARY KEY,
            shop_id TEXT NOT NULL REFERENCES shops(guid) ON DELETE CASCADE,
            customer_id TEXT REFERENCES customers(guid) ON DELETE SET NULL,
            vehicle_id TEXT REFERENCES vehicles(guid) ON DELETE SET NULL,
            job_number TEXT NOT NULL,
            claim_number TEXT,
            ro_number TEXT,
            status TEXT NOT NULL DEFAULT 'estimate',
            source_system TEXT,
            insurer TEXT,
            policy_number TEXT,
            deductible TEXT,
            estimate_date TEXT,
            parts_total TEXT NOT NULL DEFAULT '0',
            labor_total TEXT NOT NULL DEFAULT '0',
            other_total TEXT NOT NULL DEFAULT '0',
            subtotal TEXT NOT NULL DEFAULT '0',
            gst_amount TEXT NOT NULL DEFAULT '0',
            pst_amount TEXT NOT NULL DEFAULT '0',
            grand_total TEXT NOT NULL DEFAULT '0',
            vendor_total TEXT,
            adas_calibration INTEGER NOT NULL DEFAULT 0,
            post_repair_scan INTEGER NOT NULL DEFAULT 0,
            wheel_alignment INTEGER NOT NULL DEFAULT 0,
            user_modified INTEGER NOT NULL DEFAULT 0,
            history TEXT NOT NULL DEFAULT '[]',
            last_import_at TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (shop_id, job_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Identity uniqueness: at most one job per claim number / RO number per
    // shop. Racing imports of the same identity serialize here; the loser
    // sees a constraint violation, which callers treat as retryable.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_shop_claim
        ON jobs(shop_id, claim_number)
        WHERE claim_number IS NOT NULL AND claim_number != ''
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_shop_ro
        ON jobs(shop_id, ro_number)
        WHERE ro_number IS NOT NULL AND ro_number != ''
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_job_lines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_lines (
            guid TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(guid) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            line_number INTEGER NOT NULL,
            parent_line INTEGER,
            line_type TEXT NOT NULL DEFAULT 'other',
            description TEXT NOT NULL DEFAULT '',
            taxable INTEGER NOT NULL DEFAULT 0,
            amount TEXT NOT NULL DEFAULT '0',
            detail_kind TEXT CHECK (detail_kind IN ('part', 'labor', 'other')),
            part_number TEXT,
            quantity TEXT,
            unit_price TEXT,
            is_material INTEGER NOT NULL DEFAULT 0,
            labor_type TEXT,
            labor_hours TEXT,
            labor_rate TEXT,
            charge_type TEXT,
            user_edited INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_lines_job_id ON job_lines(job_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ensure a setting exists with the specified default value.
///
/// If the setting doesn't exist, it is created with the default. If it
/// exists but holds NULL, it is reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE covers concurrent initializers racing past the
        // exists check
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let pool = memory_pool().await.unwrap();

        // memory_pool already ran init_schema once; a second run must not fail
        init_schema(&pool).await.unwrap();

        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'schema_version'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn ensure_setting_preserves_existing_value() {
        let pool = memory_pool().await.unwrap();

        sqlx::query("INSERT INTO settings (key, value) VALUES ('custom', 'kept')")
            .execute(&pool)
            .await
            .unwrap();

        ensure_setting(&pool, "custom", "default").await.unwrap();

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'custom'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(value.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn duplicate_claim_number_rejected_per_shop() {
        let pool = memory_pool().await.unwrap();

        sqlx::query("INSERT INTO shops (guid, name) VALUES ('s1', 'Shop One')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO jobs (guid, shop_id, job_number, claim_number) VALUES ('j1', 's1', 'J1', 'CLM-1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let dup = sqlx::query(
            "INSERT INTO jobs (guid, shop_id, job_number, claim_number) VALUES ('j2', 's1', 'J2', 'CLM-1')",
        )
        .execute(&pool)
        .await;
        assert!(dup.is_err(), "second job with same claim number must hit the unique index");

        // Jobs without a claim number are exempt from the partial index
        sqlx::query("INSERT INTO jobs (guid, shop_id, job_number) VALUES ('j3', 's1', 'J3')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO jobs (guid, shop_id, job_number) VALUES ('j4', 's1', 'J4')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
