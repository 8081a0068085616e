//! Customer persistence and duplicate lookup
//!
//! Duplicate detection runs in precedence order: email, then any phone
//! number, then company name. Phone matching goes through `phone_lookup`,
//! a comma-joined column of bare digit strings maintained on every write.

use super::parse_guid;
use crate::parsers::phone_digits;
use bayline_common::db::{Customer, CustomerKind};
use bayline_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const CUSTOMER_COLUMNS: &str = "guid, shop_id, customer_number, kind, first_name, last_name, \
     company_name, email, phone_home, phone_work, phone_cell, phone_fax, gst_payable, \
     address_line1, address_line2, city, province, postal_code, country";

/// Digit-only phone index value for a customer, deduplicated, in bucket
/// order.
pub(crate) fn phone_lookup_value(customer: &Customer) -> String {
    let mut digits: Vec<String> = Vec::new();
    for phone in [
        &customer.phone_home,
        &customer.phone_work,
        &customer.phone_cell,
        &customer.phone_fax,
    ]
    .into_iter()
    .flatten()
    {
        let d = phone_digits(phone);
        if !d.is_empty() && !digits.contains(&d) {
            digits.push(d);
        }
    }
    digits.join(",")
}

pub async fn find_by_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    email: &str,
) -> Result<Option<Customer>> {
    let query = format!(
        "SELECT {} FROM customers WHERE shop_id = ? AND email = ? COLLATE NOCASE \
         ORDER BY customer_number LIMIT 1",
        CUSTOMER_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(email)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(customer_from_row).transpose()
}

/// Match any stored phone number by its bare digits.
pub async fn find_by_phone(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    digits: &str,
) -> Result<Option<Customer>> {
    let query = format!(
        "SELECT {} FROM customers WHERE shop_id = ? \
         AND (',' || phone_lookup || ',') LIKE '%,' || ? || ',%' \
         ORDER BY customer_number LIMIT 1",
        CUSTOMER_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(digits)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(customer_from_row).transpose()
}

pub async fn find_by_company(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    company_name: &str,
) -> Result<Option<Customer>> {
    let query = format!(
        "SELECT {} FROM customers WHERE shop_id = ? AND kind = 'organization' \
         AND company_name = ? COLLATE NOCASE ORDER BY customer_number LIMIT 1",
        CUSTOMER_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(company_name)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(customer_from_row).transpose()
}

pub async fn find_by_guid(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    guid: Uuid,
) -> Result<Option<Customer>> {
    let query = format!("SELECT {} FROM customers WHERE guid = ?", CUSTOMER_COLUMNS);
    let row = sqlx::query(&query)
        .bind(guid.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(customer_from_row).transpose()
}

/// Next per-shop customer number (MAX+1, starting at 1).
pub async fn next_customer_number(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
) -> Result<i64> {
    let max: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(customer_number), 0) FROM customers WHERE shop_id = ?")
            .bind(shop_id.to_string())
            .fetch_one(&mut **tx)
            .await?;
    Ok(max + 1)
}

pub async fn insert_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    customer: &Customer,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO customers (
            guid, shop_id, customer_number, kind, first_name, last_name,
            company_name, email, phone_home, phone_work, phone_cell, phone_fax,
            phone_lookup, gst_payable, address_line1, address_line2, city,
            province, postal_code, country
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(customer.guid.to_string())
    .bind(customer.shop_id.to_string())
    .bind(customer.customer_number)
    .bind(customer.kind.as_str())
    .bind(&customer.first_name)
    .bind(&customer.last_name)
    .bind(&customer.company_name)
    .bind(&customer.email)
    .bind(&customer.phone_home)
    .bind(&customer.phone_work)
    .bind(&customer.phone_cell)
    .bind(&customer.phone_fax)
    .bind(phone_lookup_value(customer))
    .bind(customer.gst_payable)
    .bind(&customer.address_line1)
    .bind(&customer.address_line2)
    .bind(&customer.city)
    .bind(&customer.province)
    .bind(&customer.postal_code)
    .bind(&customer.country)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Rewrite every mutable field, including the phone index.
pub async fn update_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    customer: &Customer,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE customers SET
            kind = ?, first_name = ?, last_name = ?, company_name = ?,
            email = ?, phone_home = ?, phone_work = ?, phone_cell = ?,
            phone_fax = ?, phone_lookup = ?, gst_payable = ?,
            address_line1 = ?, address_line2 = ?, city = ?, province = ?,
            postal_code = ?, country = ?, updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(customer.kind.as_str())
    .bind(&customer.first_name)
    .bind(&customer.last_name)
    .bind(&customer.company_name)
    .bind(&customer.email)
    .bind(&customer.phone_home)
    .bind(&customer.phone_work)
    .bind(&customer.phone_cell)
    .bind(&customer.phone_fax)
    .bind(phone_lookup_value(customer))
    .bind(customer.gst_payable)
    .bind(&customer.address_line1)
    .bind(&customer.address_line2)
    .bind(&customer.city)
    .bind(&customer.province)
    .bind(&customer.postal_code)
    .bind(&customer.country)
    .bind(customer.guid.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Pool-based read for reporting and tests.
pub async fn load_customer(pool: &sqlx::SqlitePool, guid: Uuid) -> Result<Option<Customer>> {
    let query = format!("SELECT {} FROM customers WHERE guid = ?", CUSTOMER_COLUMNS);
    let row = sqlx::query(&query)
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(customer_from_row).transpose()
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer> {
    let guid: String = row.get("guid");
    let shop_id: String = row.get("shop_id");
    let kind: String = row.get("kind");

    Ok(Customer {
        guid: parse_guid(&guid)?,
        shop_id: parse_guid(&shop_id)?,
        customer_number: row.get("customer_number"),
        kind: CustomerKind::from_db(&kind),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        company_name: row.get("company_name"),
        email: row.get("email"),
        phone_home: row.get("phone_home"),
        phone_work: row.get("phone_work"),
        phone_cell: row.get("phone_cell"),
        phone_fax: row.get("phone_fax"),
        gst_payable: row.get("gst_payable"),
        address_line1: row.get("address_line1"),
        address_line2: row.get("address_line2"),
        city: row.get("city"),
        province: row.get("province"),
        postal_code: row.get("postal_code"),
        country: row.get("country"),
    })
}
