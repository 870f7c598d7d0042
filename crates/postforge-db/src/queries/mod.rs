//! Database query operations.
//!
//! Each function is a short, single-purpose operation against one table.
//! Mutations are single-row and atomic with respect to concurrent writers:
//! guarded status updates are applied as a compare-and-swap against the status
//! the caller validated, so a lost update can never slip through.

pub mod assets;
pub mod items;
pub mod settings;

use std::collections::BTreeMap;

use postforge_common::{Error, Result};
use rusqlite::Connection;

use crate::models::Statistics;

/// RFC 3339 timestamp for created_at/updated_at columns.
pub(crate) fn now_str() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn status_counts(conn: &Connection, table: &str) -> Result<BTreeMap<String, i64>> {
    // Table name is one of two internal constants, never user input.
    let mut stmt = conn
        .prepare(&format!(
            "SELECT status, COUNT(*) FROM {table} GROUP BY status"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(db_err)?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (status, count) = row.map_err(db_err)?;
        counts.insert(status, count);
    }
    Ok(counts)
}

/// Counts per status per kind, for reporting and the stats command.
pub fn statistics(conn: &Connection) -> Result<Statistics> {
    Ok(Statistics {
        items: status_counts(conn, "content_items")?,
        assets: status_counts(conn, "assets")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};

    #[test]
    fn test_statistics_empty() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let stats = statistics(&conn).unwrap();
        assert!(stats.items.is_empty());
        assert!(stats.assets.is_empty());
    }

    #[test]
    fn test_statistics_counts() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        items::register(&conn, "a.html", Some("h1")).unwrap();
        items::register(&conn, "b.html", Some("h2")).unwrap();

        let stats = statistics(&conn).unwrap();
        assert_eq!(stats.items.get("new"), Some(&2));
    }
}
