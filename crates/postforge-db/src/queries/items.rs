//! Content item queries.
//!
//! Registration with content-addressed de-duplication, status-guarded
//! updates, and the retry/revive escape hatches. `list_by_status` is the only
//! read path stages use to find work; it always reflects committed writes and
//! returns rows in ascending id order so reruns are reproducible.

use chrono::{DateTime, Utc};
use postforge_common::{Error, ItemId, ItemStatus, Progress, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{db_err, now_str};
use crate::models::{ContentItem, RegisterOutcome};

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

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    let status: ItemStatus = row
        .get::<_, String>("status")?
        .parse()
        .map_err(conversion_err)?;
    let labels: Vec<String> =
        serde_json::from_str(&row.get::<_, String>("labels")?).map_err(conversion_err)?;

    Ok(ContentItem {
        id: ItemId::from(row.get::<_, i64>("id")?),
        source_location: row.get("source_location")?,
        content_hash: row.get("content_hash")?,
        title: row.get("title")?,
        labels,
        payload: row.get("payload")?,
        status,
        progress: Progress::from_bits(row.get::<_, i64>("progress")? as u32),
        external_id: row.get("external_id")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

fn current_status(conn: &Connection, id: ItemId) -> Result<ItemStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM content_items WHERE id = ?1",
            params![id.as_i64()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    status
        .ok_or_else(|| Error::not_found(format!("item {id}")))?
        .parse()
}

/// Register a scanned source file.
///
/// De-duplication is content-addressed: a hash matching a live row is a
/// [`RegisterOutcome::Duplicate`] (no insert); a hash matching a dead
/// (`missing`/`error`) row revives that row at the new location. A location
/// that already exists with different content is updated in place and reset
/// for reprocessing, never duplicated.
pub fn register(
    conn: &Connection,
    source_location: &str,
    content_hash: Option<&str>,
) -> Result<RegisterOutcome> {
    if let Some(hash) = content_hash {
        let existing = conn
            .query_row(
                "SELECT id, source_location, status FROM content_items WHERE content_hash = ?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        if let Some((id, location, status)) = existing {
            let id = ItemId::from(id);
            let status: ItemStatus = status.parse()?;
            return if matches!(status, ItemStatus::Error | ItemStatus::Missing) {
                revive(conn, id, source_location)?;
                Ok(RegisterOutcome::Revived(id))
            } else {
                Ok(RegisterOutcome::Duplicate {
                    existing: id,
                    existing_location: location,
                })
            };
        }
    }

    let existing_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM content_items WHERE source_location = ?1",
            params![source_location],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;

    if let Some(id) = existing_id {
        // Same location, new content: reset the row for reprocessing.
        conn.execute(
            "UPDATE content_items
             SET content_hash = ?2, status = 'new', progress = 0, payload = '',
                 external_id = NULL, error_message = NULL, updated_at = ?3
             WHERE id = ?1",
            params![id, content_hash, now_str()],
        )
        .map_err(db_err)?;
        Ok(RegisterOutcome::Updated(ItemId::from(id)))
    } else {
        let now = now_str();
        conn.execute(
            "INSERT INTO content_items (source_location, content_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![source_location, content_hash, now],
        )
        .map_err(db_err)?;
        Ok(RegisterOutcome::Inserted(ItemId::from(
            conn.last_insert_rowid(),
        )))
    }
}

/// Revive a dead (`missing`/`error`) item: reset to `new` at a possibly
/// different location, clearing the error and progress markers.
pub fn revive(conn: &Connection, id: ItemId, new_source_location: &str) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE content_items
             SET source_location = ?2, status = 'new', progress = 0,
                 error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status IN ('missing', 'error')",
            params![id.as_i64(), new_source_location, now_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        let status = current_status(conn, id)?;
        return Err(Error::invalid_transition(format!(
            "item {id}: cannot revive from {status}"
        )));
    }
    Ok(())
}

pub fn get(conn: &Connection, id: ItemId) -> Result<Option<ContentItem>> {
    conn.query_row(
        "SELECT * FROM content_items WHERE id = ?1",
        params![id.as_i64()],
        item_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Items in a given status, ascending id.
pub fn list_by_status(conn: &Connection, status: ItemStatus) -> Result<Vec<ContentItem>> {
    let mut stmt = conn
        .prepare("SELECT * FROM content_items WHERE status = ?1 ORDER BY id ASC")
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![status.as_str()], item_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Items still moving through the pipeline (not published, archived, or
/// missing); the missing-source sweep checks these against the filesystem.
pub fn list_in_flight(conn: &Connection) -> Result<Vec<ContentItem>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM content_items
             WHERE status NOT IN ('published', 'archived', 'missing')
             ORDER BY id ASC",
        )
        .map_err(db_err)?;
    let rows = stmt.query_map([], item_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Guarded status update. Rejects any move the status machine forbids and
/// applies the write as a compare-and-swap against the validated status.
pub fn update_status(
    conn: &Connection,
    id: ItemId,
    new_status: ItemStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let current = current_status(conn, id)?;
    if !current.can_transition_to(new_status) {
        return Err(Error::invalid_transition(format!(
            "item {id}: {current} -> {new_status}"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE content_items SET status = ?2, error_message = ?3, updated_at = ?4
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
            "concurrent status change on item {id}"
        )));
    }
    Ok(())
}

/// Record a per-item failure.
pub fn mark_error(conn: &Connection, id: ItemId, message: &str) -> Result<()> {
    update_status(conn, id, ItemStatus::Error, Some(message))
}

/// Record that the backing source file disappeared.
pub fn mark_missing(conn: &Connection, id: ItemId) -> Result<()> {
    update_status(conn, id, ItemStatus::Missing, Some("source file not found"))
}

/// The retry classifier's write path: leave `error` for an earlier pipeline
/// status without redoing already-durable work.
pub fn reset_error(conn: &Connection, id: ItemId, new_status: ItemStatus) -> Result<()> {
    if new_status.rank().is_none() {
        return Err(Error::invalid_transition(format!(
            "item {id}: cannot reset error to {new_status}"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE content_items SET status = ?2, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'error'",
            params![id.as_i64(), new_status.as_str(), now_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        let status = current_status(conn, id)?;
        return Err(Error::invalid_transition(format!(
            "item {id}: reset requires error status, found {status}"
        )));
    }
    Ok(())
}

/// Rewrite the working payload, optionally updating title/labels.
pub fn update_payload(
    conn: &Connection,
    id: ItemId,
    payload: &str,
    title: Option<&str>,
    labels: Option<&[String]>,
) -> Result<()> {
    let labels_json = match labels {
        Some(labels) => {
            Some(serde_json::to_string(labels).map_err(|e| Error::internal(e.to_string()))?)
        }
        None => None,
    };
    let changed = conn
        .execute(
            "UPDATE content_items
             SET payload = ?2, title = COALESCE(?3, title),
                 labels = COALESCE(?4, labels), updated_at = ?5
             WHERE id = ?1",
            params![id.as_i64(), payload, title, labels_json, now_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::not_found(format!("item {id}")));
    }
    Ok(())
}

/// Merge completed sub-step flags into the progress marker.
pub fn merge_progress(conn: &Connection, id: ItemId, flags: Progress) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE content_items SET progress = progress | ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_i64(), flags.bits(), now_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::not_found(format!("item {id}")));
    }
    Ok(())
}

/// Publication: advance to `published` and record the target's identifier.
pub fn set_published(conn: &Connection, id: ItemId, external_id: &str) -> Result<()> {
    let current = current_status(conn, id)?;
    if !current.can_transition_to(ItemStatus::Published) {
        return Err(Error::invalid_transition(format!(
            "item {id}: {current} -> published"
        )));
    }
    let changed = conn
        .execute(
            "UPDATE content_items
             SET status = 'published', external_id = ?2, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![id.as_i64(), external_id, now_str(), current.as_str()],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::database(format!(
            "concurrent status change on item {id}"
        )));
    }
    Ok(())
}

/// Delete an item; assets cascade.
pub fn delete(conn: &Connection, id: ItemId) -> Result<bool> {
    let changed = conn
        .execute(
            "DELETE FROM content_items WHERE id = ?1",
            params![id.as_i64()],
        )
        .map_err(db_err)?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool, PooledConnection};

    fn conn() -> (crate::pool::DbPool, PooledConnection) {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        (pool, conn)
    }

    #[test]
    fn test_register_inserts_new() {
        let (_pool, conn) = conn();
        let outcome = register(&conn, "a.html", Some("h1")).unwrap();
        let id = match outcome {
            RegisterOutcome::Inserted(id) => id,
            other => panic!("expected Inserted, got {other:?}"),
        };
        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.source_location, "a.html");
        assert_eq!(item.status, ItemStatus::New);
        assert!(item.progress.is_empty());
    }

    #[test]
    fn test_register_same_hash_is_duplicate() {
        let (_pool, conn) = conn();
        let first = register(&conn, "a.html", Some("h1")).unwrap();
        let id = first.accepted_id().unwrap();

        // Same bytes found at a different location: no second row.
        let second = register(&conn, "copy-of-a.html", Some("h1")).unwrap();
        assert_eq!(
            second,
            RegisterOutcome::Duplicate {
                existing: id,
                existing_location: "a.html".into()
            }
        );

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM content_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_same_location_new_hash_updates() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap();

        // The file changed in place: same row, reset for reprocessing.
        let outcome = register(&conn, "a.html", Some("h2")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Updated(id));

        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.content_hash.as_deref(), Some("h2"));
        assert_eq!(item.status, ItemStatus::New);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM content_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_register_revives_dead_row() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        mark_error(&conn, id, "boom").unwrap();

        let outcome = register(&conn, "moved/a.html", Some("h1")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Revived(id));

        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::New);
        assert_eq!(item.source_location, "moved/a.html");
        assert!(item.error_message.is_none());
    }

    #[test]
    fn test_update_status_rejects_backward() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap();
        update_status(&conn, id, ItemStatus::LocationAdded, None).unwrap();

        let err = update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));

        // Status unchanged after the rejected write.
        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::LocationAdded);
    }

    #[test]
    fn test_error_reachable_and_reset() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap();
        mark_error(&conn, id, "geocoder timeout").unwrap();

        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.error_message.as_deref(), Some("geocoder timeout"));

        reset_error(&conn, id, ItemStatus::KeywordsAdded).unwrap();
        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::KeywordsAdded);
        assert!(item.error_message.is_none());

        // reset_error only applies to items actually in error.
        assert!(reset_error(&conn, id, ItemStatus::New).is_err());
    }

    #[test]
    fn test_list_by_status_ascending_id() {
        let (_pool, conn) = conn();
        for i in 0..5 {
            register(&conn, &format!("{i}.html"), Some(&format!("h{i}"))).unwrap();
        }
        let items = list_by_status(&conn, ItemStatus::New).unwrap();
        assert_eq!(items.len(), 5);
        let ids: Vec<i64> = items.iter().map(|i| i.id.as_i64()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_progress_and_payload() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();

        let labels = vec!["travel".to_string(), "2019".to_string()];
        update_payload(&conn, id, "<p>hi</p>", Some("Trip"), Some(&labels)).unwrap();
        merge_progress(&conn, id, Progress::KEYWORDS).unwrap();

        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.payload, "<p>hi</p>");
        assert_eq!(item.title.as_deref(), Some("Trip"));
        assert_eq!(item.labels, labels);
        assert!(item.progress.contains(Progress::KEYWORDS));
        assert!(!item.progress.contains(Progress::LOCATION));
    }

    #[test]
    fn test_set_published_records_external_id() {
        let (_pool, conn) = conn();
        let id = register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap();
        update_status(&conn, id, ItemStatus::LocationAdded, None).unwrap();
        set_published(&conn, id, "post-9001").unwrap();

        let item = get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Published);
        assert_eq!(item.external_id.as_deref(), Some("post-9001"));

        // Published is behind us; publishing again is a forbidden move.
        assert!(set_published(&conn, id, "post-9002").is_err());
    }
}
