//! Maintenance mode: database backup and compaction, report sweep.
//!
//! Runs instead of the content pipeline. Everything here is safe to repeat.

use postforge_common::Result;
use postforge_db::pool::{get_conn, init_pool};
use tracing::{info, warn};

use crate::config::Config;

const BACKUPS_TO_KEEP: usize = 5;
const REPORTS_TO_KEEP: usize = 5;

/// Sweep all but the newest run reports into `logs/archive/<timestamp>/`.
fn sweep_reports(config: &Config) -> Result<usize> {
    let logs_dir = config.logs_dir();
    if !logs_dir.exists() {
        return Ok(0);
    }

    let mut reports: Vec<_> = std::fs::read_dir(&logs_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("report_") && n.ends_with(".md"))
                .unwrap_or(false)
        })
        .collect();
    reports.sort();
    reports.reverse();

    let stale: Vec<_> = reports.into_iter().skip(REPORTS_TO_KEEP).collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let archive_dir = logs_dir.join("archive").join(timestamp.to_string());
    std::fs::create_dir_all(&archive_dir)?;

    let mut moved = 0;
    for report in stale {
        let Some(name) = report.file_name() else {
            continue;
        };
        match std::fs::rename(&report, archive_dir.join(name)) {
            Ok(()) => moved += 1,
            Err(e) => warn!("Could not archive report {:?}: {}", report, e),
        }
    }
    Ok(moved)
}

/// Run the full maintenance pass.
pub fn run_maintenance(config: &Config) -> Result<()> {
    info!("=== Maintenance mode ===");

    let db_path = config.db_path();
    postforge_db::maintenance::backup_database(&db_path, &config.backups_dir(), BACKUPS_TO_KEEP)?;

    let pool = init_pool(&db_path.to_string_lossy())?;
    let conn = get_conn(&pool)?;
    postforge_db::maintenance::optimize(&conn)?;

    let moved = sweep_reports(config)?;
    info!("Maintenance complete: {} old report(s) archived", moved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_reports_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.data_dir = dir.path().to_path_buf();

        let logs_dir = config.logs_dir();
        std::fs::create_dir_all(&logs_dir).unwrap();
        for i in 0..8 {
            std::fs::write(
                logs_dir.join(format!("report_2026-01-0{i}_00-00-00.md")),
                "x",
            )
            .unwrap();
        }

        let moved = sweep_reports(&config).unwrap();
        assert_eq!(moved, 3);

        let remaining = std::fs::read_dir(&logs_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .count();
        assert_eq!(remaining, REPORTS_TO_KEEP);
    }

    #[test]
    fn test_sweep_reports_without_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.data_dir = dir.path().join("absent");
        assert_eq!(sweep_reports(&config).unwrap(), 0);
    }
}
