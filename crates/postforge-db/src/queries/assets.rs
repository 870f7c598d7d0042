//! Asset queries.
//!
//! Assets are registered at most once per parent (`UNIQUE(parent_item_id,
//! source_location)`) and cascade-delete with it. An asset's
//! `processed_location` doubles as the transform stage's durable progress
//! marker, which the retry classifier reads.

use chrono::{DateTime, Utc};
use postforge_common::{AssetId, AssetStatus, Error, ItemId, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{db_err, now_str};
use crate::models::Asset;

fn conversion_err<E>(e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_err)
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let status: AssetStatus = row
        .get::<_, String>("status")?
        .parse()
        .map_err(conversion_err)?;

    Ok(Asset {
        id: AssetId::from(row.get::<_, i64>("id")?),
        parent_item_id: ItemId::from(row.get::<_, i64>("parent_item_id")?),
        source_location: row.get("source_location")?,
        processed_location: row.get("processed_location")?,
        status,
        external_ref: row.get("external_ref")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

fn current_status(conn: &Connection, id: AssetId) -> Result<AssetStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM assets WHERE id = ?1",
            params![id.as_i64()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    status
        .ok_or_else(|| Error::not_found(format!("asset {id}")))?
        .parse()
}

/// Register an asset under its parent item.
///
/// Returns `Some(id)` when a row was inserted or a dead row revived,
/// `None` when the asset is already registered and healthy.
pub fn register(
    conn: &Connection,
    parent_item_id: ItemId,
    source_location: &str,
) -> Result<Option<AssetId>> {
    let existing = conn
        .query_row(
            "SELECT id, status FROM assets WHERE parent_item_id = ?1 AND source_location = ?2",
            params![parent_item_id.as_i64(), source_location],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(db_err)?;

    if let Some((id, status)) = existing {
        let id = AssetId::from(id);
        let status: AssetStatus = status.parse()?;
        if matches!(status, AssetStatus::Missing | AssetStatus::Error) {
            conn.execute(
                "UPDATE assets SET status = 'new', error_message = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![id.as_i64(), now_str()],
            )
            .map_err(db_err)?;
            return Ok(Some(id));
        }
        return Ok(None);
    }

    let now = now_str();
    conn.execute(
        "INSERT INTO assets (parent_item_id, source_location, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![parent_item_id.as_i64(), source_location, now],
    )
    .map_err(db_err)?;
    Ok(Some(AssetId::from(conn.last_insert_rowid())))
}

pub fn get(conn: &Connection, id: AssetId) -> Result<Option<Asset>> {
    conn.query_row(
        "SELECT * FROM assets WHERE id = ?1",
        params![id.as_i64()],
        asset_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Assets in a given status, ascending id.
pub fn list_by_status(conn: &Connection, status: AssetStatus) -> Result<Vec<Asset>> {
    let mut stmt = conn
        .prepare("SELECT * FROM assets WHERE status = ?1 ORDER BY id ASC")
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![status.as_str()], asset_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// All assets belonging to an item, ascending id.
pub fn list_for_item(conn: &Connection, parent_item_id: ItemId) -> Result<Vec<Asset>> {
    let mut stmt = conn
        .prepare("SELECT * FROM assets WHERE parent_item_id = ?1 ORDER BY id ASC")
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![parent_item_id.as_i64()], asset_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Assets still moving through the pipeline, for the missing-source sweep.
pub fn list_in_flight(conn: &Connection) -> Result<Vec<Asset>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM assets
             WHERE status NOT IN ('published', 'archived', 'missing')
             ORDER BY id ASC",
        )
        .map_err(db_err)?;
    let rows = stmt.query_map([], asset_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Guarded status update, same rules as the item machine.
pub fn update_status(
    conn: &Connection,
    id: AssetId,
    new_status: AssetStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let current = current_status(conn, id)?;
    if !current.can_transition_to(new_status) {
        return Err(Error::invalid_transition(format!(
            "asset {id}: {current} -> {new_status}"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE assets SET status = ?2, error_message = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?5",
            params![
                id.as_i64(),
                new_status.as_str(),
                error_message,
                now_str(),
                current.as_str()
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::database(format!(
            "concurrent status change on asset {id}"
        )));
    }
    Ok(())
}

pub fn mark_error(conn: &Connection, id: AssetId, message: &str) -> Result<()> {
    update_status(conn, id, AssetStatus::Error, Some(message))
}

pub fn mark_missing(conn: &Connection, id: AssetId) -> Result<()> {
    update_status(conn, id, AssetStatus::Missing, Some("source file not found"))
}

/// Transform completed: record the processed copy and advance.
pub fn set_processed(conn: &Connection, id: AssetId, processed_location: &str) -> Result<()> {
    let current = current_status(conn, id)?;
    if !current.can_transition_to(AssetStatus::Processed) {
        return Err(Error::invalid_transition(format!(
            "asset {id}: {current} -> processed"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE assets
             SET status = 'processed', processed_location = ?2, error_message = NULL,
                 updated_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![id.as_i64(), processed_location, now_str(), current.as_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::database(format!(
            "concurrent status change on asset {id}"
        )));
    }
    Ok(())
}

/// Publication: advance to `published` and record the target's reference.
pub fn set_published(conn: &Connection, id: AssetId, external_ref: &str) -> Result<()> {
    let current = current_status(conn, id)?;
    if !current.can_transition_to(AssetStatus::Published) {
        return Err(Error::invalid_transition(format!(
            "asset {id}: {current} -> published"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE assets
             SET status = 'published', external_ref = ?2, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![id.as_i64(), external_ref, now_str(), current.as_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::database(format!(
            "concurrent status change on asset {id}"
        )));
    }
    Ok(())
}

/// The retry classifier's write path for assets.
pub fn reset_error(conn: &Connection, id: AssetId, new_status: AssetStatus) -> Result<()> {
    if new_status.rank().is_none() {
        return Err(Error::invalid_transition(format!(
            "asset {id}: cannot reset error to {new_status}"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE assets SET status = ?2, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'error'",
            params![id.as_i64(), new_status.as_str(), now_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        let status = current_status(conn, id)?;
        return Err(Error::invalid_transition(format!(
            "asset {id}: reset requires error status, found {status}"
        )));
    }
    Ok(())
}

/// Number of the item's assets that have not yet reached `published` (or
/// beyond). The parent may not publish while this is nonzero.
pub fn unpublished_count(conn: &Connection, parent_item_id: ItemId) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM assets
         WHERE parent_item_id = ?1 AND status NOT IN ('published', 'archived')",
        params![parent_item_id.as_i64()],
        |row| row.get(0),
    )
    .map_err(db_err)
}
