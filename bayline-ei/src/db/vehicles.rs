//! Vehicle persistence and VIN lookup

use super::{opt_parse_guid, parse_guid};
use bayline_common::db::Vehicle;
use bayline_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const VEHICLE_COLUMNS: &str = "guid, shop_id, customer_id, vin, year, make, model, trim, \
     body_style, color, odometer, engine, transmission, fuel_type, license_plate";

/// VIN match within a shop. VINs are stored uppercased; the partial unique
/// index guarantees at most one row.
pub async fn find_by_vin(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    shop_id: Uuid,
    vin: &str,
) -> Result<Option<Vehicle>> {
    let query = format!(
        "SELECT {} FROM vehicles WHERE shop_id = ? AND vin = ?",
        VEHICLE_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(shop_id.to_string())
        .bind(vin)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(vehicle_from_row).transpose()
}

pub async fn find_by_guid(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    guid: Uuid,
) -> Result<Option<Vehicle>> {
    let query = format!("SELECT {} FROM vehicles WHERE guid = ?", VEHICLE_COLUMNS);
    let row = sqlx::query(&query)
        .bind(guid.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(vehicle_from_row).transpose()
}

pub async fn insert_vehicle(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    vehicle: &Vehicle,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vehicles (
            guid, shop_id, customer_id, vin, year, make, model, trim,
            body_style, color, odometer, engine, transmission, fuel_type,
            license_plate
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(vehicle.guid.to_string())
    .bind(vehicle.shop_id.to_string())
    .bind(vehicle.customer_id.map(|id| id.to_string()))
    .bind(&vehicle.vin)
    .bind(vehicle.year)
    .bind(&vehicle.make)
    .bind(&vehicle.model)
    .bind(&vehicle.trim)
    .bind(&vehicle.body_style)
    .bind(&vehicle.color)
    .bind(vehicle.odometer)
    .bind(&vehicle.engine)
    .bind(&vehicle.transmission)
    .bind(&vehicle.fuel_type)
    .bind(&vehicle.license_plate)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn update_vehicle(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    vehicle: &Vehicle,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE vehicles SET
            customer_id = ?, vin = ?, year = ?, make = ?, model = ?,
            trim = ?, body_style = ?, color = ?, odometer = ?, engine = ?,
            transmission = ?, fuel_type = ?, license_plate = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(vehicle.customer_id.map(|id| id.to_string()))
    .bind(&vehicle.vin)
    .bind(vehicle.year)
    .bind(&vehicle.make)
    .bind(&vehicle.model)
    .bind(&vehicle.trim)
    .bind(&vehicle.body_style)
    .bind(&vehicle.color)
    .bind(vehicle.odometer)
    .bind(&vehicle.engine)
    .bind(&vehicle.transmission)
    .bind(&vehicle.fuel_type)
    .bind(&vehicle.license_plate)
    .bind(vehicle.guid.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Pool-based read for reporting and tests.
pub async fn load_vehicle(pool: &sqlx::SqlitePool, guid: Uuid) -> Result<Option<Vehicle>> {
    let query = format!("SELECT {} FROM vehicles WHERE guid = ?", VEHICLE_COLUMNS);
    let row = sqlx::query(&query)
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(vehicle_from_row).transpose()
}

fn vehicle_from_row(row: &SqliteRow) -> Result<Vehicle> {
    let guid: String = row.get("guid");
    let shop_id: String = row.get("shop_id");
    let customer_id: Option<String> = row.get("customer_id");

    Ok(Vehicle {
        guid: parse_guid(&guid)?,
        shop_id: parse_guid(&shop_id)?,
        customer_id: opt_parse_guid(customer_id)?,
        vin: row.get("vin"),
        year: row.get("year"),
        make: row.get("make"),
        model: row.get("model"),
        trim: row.get("trim"),
        body_style: row.get("body_style"),
        color: row.get("color"),
        odometer: row.get("odometer"),
        engine: row.get("engine"),
        transmission: row.get("transmission"),
        fuel_type: row.get("fuel_type"),
        license_plate: row.get("license_plate"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::shops::ensure_shop;
    use bayline_common::db::memory_pool;

    #[tokio::test]
    async fn vin_lookup_and_duplicate_vin_rejection() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();

        let vehicle = Vehicle {
            guid: Uuid::new_v4(),
            shop_id: shop.guid,
            customer_id: None,
            vin: Some("2T1BURHE5JC055217".to_string()),
            year: Some(2018),
            make: Some("Toyota".to_string()),
            model: Some("Corolla".to_string()),
            trim: None,
            body_style: None,
            color: None,
            odometer: Some(88412),
            engine: None,
            transmission: None,
            fuel_type: None,
            license_plate: None,
        };
        insert_vehicle(&mut tx, &vehicle).await.unwrap();

        let found = find_by_vin(&mut tx, shop.guid, "2T1BURHE5JC055217")
            .await
            .unwrap()
            .expect("vin match");
        assert_eq!(found.guid, vehicle.guid);
        assert_eq!(found.customer_id, None);

        let mut dup = vehicle.clone();
        dup.guid = Uuid::new_v4();
        assert!(insert_vehicle(&mut tx, &dup).await.is_err());
    }

    #[tokio::test]
    async fn vinless_vehicles_are_exempt_from_uniqueness() {
        let pool = memory_pool().await.unwrap();
        let mut tx = pool.begin().await.unwrap();
        let shop = ensure_shop(&mut tx, "Test Shop").await.unwrap();

        for _ in 0..2 {
            let vehicle = Vehicle {
                guid: Uuid::new_v4(),
                shop_id: shop.guid,
                customer_id: None,
                vin: None,
                year: Some(1999),
                make: Some("Ford".to_string()),
                model: None,
                trim: None,
                body_style: None,
                color: None,
                odometer: None,
                engine: None,
                transmission: None,
                fuel_type: None,
                license_plate: None,
            };
            insert_vehicle(&mut tx, &vehicle).await.unwrap();
        }
        tx.commit().await.unwrap();
    }
}
