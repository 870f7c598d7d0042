//! Archive stage: move fully-published items and their assets into cold
//! storage and mark them terminal.
//!
//! Filesystem moves are idempotent: a resumed run may repeat a move that
//! partially completed, and an already-moved file is a no-op, not an error.

use std::path::Path;

use postforge_common::{AssetStatus, ItemStatus, Result};
use postforge_db::pool::get_conn;
use postforge_db::queries::{assets, items};
use tracing::{error, info};

use super::{StageContext, StageOutcome};

/// Move `source` into `dest_dir`, tolerating a source that already moved.
fn move_idempotent(source: &Path, dest_dir: &Path) -> Result<()> {
    if !source.exists() {
        return Ok(());
    }
    let Some(name) = source.file_name() else {
        return Ok(());
    };
    let dest = dest_dir.join(name);

    if std::fs::rename(source, &dest).is_err() {
        // Rename fails across filesystems; fall back to copy + remove.
        std::fs::copy(source, &dest)?;
        std::fs::remove_file(source)?;
    }
    Ok(())
}

pub fn run(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = items::list_by_status(&conn, ItemStatus::Published)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
    let run_dir = ctx.config.archive_dir().join(timestamp.to_string());
    std::fs::create_dir_all(&run_dir)?;
    info!("Archiving {} items into {:?}", pending.len(), run_dir);

    let mut outcome = StageOutcome::empty();
    for item in pending {
        let result: Result<()> = (|| {
            move_idempotent(Path::new(&item.source_location), &run_dir)?;

            for asset in assets::list_for_item(&conn, item.id)? {
                if let Some(processed) = asset.processed_location.as_deref() {
                    move_idempotent(Path::new(processed), &run_dir)?;
                }
                if asset.status == AssetStatus::Published {
                    assets::update_status(&conn, asset.id, AssetStatus::Archived, None)?;
                }
            }

            items::update_status(&conn, item.id, ItemStatus::Archived, None)?;
            Ok(())
        })();

        match result {
            Ok(()) => outcome.succeeded += 1,
            Err(e) => {
                // The item stays published; the next run retries the sweep.
                error!("Archive failed for item {}: {}", item.id, e);
                outcome.failed += 1;
            }
        }
    }

    info!(
        "Archive complete: {} archived, {} failed",
        outcome.succeeded, outcome.failed
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.html");
        let dest_dir = dir.path().join("archive");
        std::fs::create_dir_all(&dest_dir).unwrap();
        std::fs::write(&src, "x").unwrap();

        move_idempotent(&src, &dest_dir).unwrap();
        assert!(!src.exists());
        assert!(dest_dir.join("a.html").exists());

        // Already moved: no-op, no error.
        move_idempotent(&src, &dest_dir).unwrap();
        assert!(dest_dir.join("a.html").exists());
    }
}
