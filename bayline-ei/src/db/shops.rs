//! Shop lookup and creation

use super::parse_guid;
use bayline_common::db::Shop;
use bayline_common::Result;
use sqlx::Row;
use uuid::Uuid;

/// Fetch the shop by name, creating it on first use.
///
/// INSERT OR IGNORE plus re-select keeps concurrent importers from racing
/// each other into duplicate rows; `shops.name` is unique.
pub async fn ensure_shop(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    name: &str,
) -> Result<Shop> {
    sqlx::query("INSERT OR IGNORE INTO shops (guid, name) VALUES (?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .execute(&mut **tx)
        .await?;

    let row = sqlx::query("SELECT guid, name FROM shops WHERE name = ?")
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;

    let guid: String = row.get("guid");
    Ok(Shop {
        guid: parse_guid(&guid)?,
        name: row.get("name"),
    })
}
