//! Database maintenance: backup with rotation and compaction.

use std::path::{Path, PathBuf};

use postforge_common::{Error, Result};
use rusqlite::Connection;

/// Copy the database file into `backup_dir` with a timestamped name, keeping
/// at most `keep` backups. Returns the backup path, or `None` when there is
/// no database file yet.
pub fn backup_database(
    db_path: &Path,
    backup_dir: &Path,
    keep: usize,
) -> Result<Option<PathBuf>> {
    if !db_path.exists() {
        return Ok(None);
    }

    std::fs::create_dir_all(backup_dir)?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let backup_path = backup_dir.join(format!("postforge_{timestamp}.db"));
    std::fs::copy(db_path, &backup_path)?;
    tracing::info!("Database backed up to {:?}", backup_path);

    // Timestamped names sort chronologically; drop everything past `keep`.
    let mut backups: Vec<PathBuf> = std::fs::read_dir(backup_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("postforge_") && n.ends_with(".db"))
                .unwrap_or(false)
        })
        .collect();
    backups.sort();
    backups.reverse();

    for old in backups.into_iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(&old) {
            tracing::warn!("Failed to remove old backup {:?}: {}", old, e);
        } else {
            tracing::info!("Removed old backup {:?}", old);
        }
    }

    Ok(Some(backup_path))
}

/// Compact and refresh query planner statistics.
pub fn optimize(conn: &Connection) -> Result<()> {
    tracing::info!("Running VACUUM and ANALYZE");
    conn.execute_batch("VACUUM; ANALYZE;")
        .map_err(|e| Error::database(format!("optimize failed: {}", e)))
}
