//! Settings queries.
//!
//! A flat `(section, key) -> value` store, last-write-wins. Lookups fall back
//! to the `default` section. Stage enablement is fail-open: a missing flag
//! never disables a stage, because an accidentally absent config key must not
//! silently skip processing.

use postforge_common::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::{db_err, now_str};

/// Section holding per-stage `enabled` flags, keyed by stage name.
pub const STAGES_SECTION: &str = "stages";

/// Look up a value, falling back to the `default` section.
pub fn get(conn: &Connection, section: &str, key: &str) -> Result<Option<String>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE section = ?1 AND key = ?2",
            params![section, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if value.is_some() {
        return Ok(value);
    }
    conn.query_row(
        "SELECT value FROM settings WHERE section = 'default' AND key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err)
}

/// Store a value, replacing any previous one.
pub fn set(conn: &Connection, section: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (section, key, value, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![section, key, value, now_str()],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Whether a stage is enabled. Fail-open: anything other than an explicit
/// negative counts as enabled.
pub fn stage_enabled(conn: &Connection, stage_name: &str) -> Result<bool> {
    let value = get(conn, STAGES_SECTION, stage_name)?;
    Ok(match value.as_deref() {
        Some(v) => !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "false" | "0" | "no" | "off"
        ),
        None => true,
    })
}
