//! Run report generation.
//!
//! A pure consumer of orchestration results: the logged summary, the Markdown
//! report file, and the error-message histogram grouped by distinct message
//! prefix so the dominant failure class is visible at a glance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use postforge_common::{AssetStatus, ItemStatus, Result};
use postforge_db::queries::{assets, items};
use rusqlite::Connection;
use tracing::{info, warn};

use super::orchestrator::{RunOutcome, RunReport, StageReport};

/// Group error messages by their prefix (the text before the first colon).
pub fn error_histogram(conn: &Connection) -> Result<BTreeMap<String, usize>> {
    let mut histogram = BTreeMap::new();

    let messages = items::list_by_status(conn, ItemStatus::Error)?
        .into_iter()
        .map(|item| item.error_message)
        .chain(
            assets::list_by_status(conn, AssetStatus::Error)?
                .into_iter()
                .map(|asset| asset.error_message),
        );

    for message in messages {
        let prefix = message
            .as_deref()
            .map(|m| m.split(':').next().unwrap_or(m).trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "unknown error".to_string());
        *histogram.entry(prefix).or_insert(0) += 1;
    }

    Ok(histogram)
}

fn stage_line(stage: &StageReport) -> String {
    if stage.disabled {
        return format!("  - {:<20}: disabled", stage.name);
    }
    if stage.dry_run {
        return format!("  - {:<20}: would run", stage.name);
    }
    if let Some(error) = &stage.stage_error {
        return format!("  - {:<20}: stage error: {}", stage.name, error);
    }
    let mut line = format!(
        "  - {:<20}: {} ok, {} failed",
        stage.name, stage.succeeded, stage.failed
    );
    if stage.skipped > 0 {
        line.push_str(&format!(", {} skipped", stage.skipped));
    }
    if stage.signal.is_some() {
        line.push_str(" (suspended)");
    }
    line
}

/// Log the per-stage summary and the error histogram.
pub fn log_summary(report: &RunReport, conn: &Connection) {
    info!("========================================");
    match &report.outcome {
        RunOutcome::Completed { had_errors: false } => info!("=== Pipeline run complete ==="),
        RunOutcome::Completed { had_errors: true } => {
            warn!("=== Pipeline run complete (with errors) ===")
        }
        RunOutcome::Suspended(reason) => warn!("=== Pipeline suspended: {} ===", reason),
        RunOutcome::Aborted(reason) => warn!("=== Pipeline aborted: {} ===", reason),
    }
    info!("========================================");

    for stage in &report.stages {
        info!("{}", stage_line(stage));
    }

    match error_histogram(conn) {
        Ok(histogram) if !histogram.is_empty() => {
            warn!("--- Error summary ---");
            for (prefix, count) in &histogram {
                warn!("  - {}: {} record(s)", prefix, count);
            }
            warn!("Run `postforge retry` to reclassify errored records.");
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read error summary: {}", e),
    }
}

/// Write the Markdown run report under the logs directory.
pub fn write_markdown(report: &RunReport, conn: &Connection, logs_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(logs_dir)?;
    let timestamp = report.started_at.format("%Y-%m-%d_%H-%M-%S");
    let path = logs_dir.join(format!("report_{timestamp}.md"));

    let mut out = String::new();
    out.push_str("# Postforge run report\n\n");
    out.push_str(&format!(
        "**Started**: {}\n**Finished**: {}\n\n",
        report.started_at.to_rfc3339(),
        report.finished_at.to_rfc3339()
    ));
    out.push_str(&format!(
        "**Outcome**: {}\n\n",
        match &report.outcome {
            RunOutcome::Completed { had_errors: false } => "completed".to_string(),
            RunOutcome::Completed { had_errors: true } => "completed with errors".to_string(),
            RunOutcome::Suspended(reason) => format!("suspended ({reason})"),
            RunOutcome::Aborted(reason) => format!("aborted ({reason})"),
        }
    ));

    out.push_str("## Stages\n\n");
    out.push_str("| Stage | Succeeded | Failed | Skipped | Note |\n");
    out.push_str("| :--- | ---: | ---: | ---: | :--- |\n");
    for stage in &report.stages {
        let note = if stage.disabled {
            "disabled".to_string()
        } else if stage.dry_run {
            "dry-run".to_string()
        } else if let Some(error) = &stage.stage_error {
            format!("stage error: {error}")
        } else if stage.signal.is_some() {
            "awaiting manual step".to_string()
        } else {
            String::new()
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            stage.name, stage.succeeded, stage.failed, stage.skipped, note
        ));
    }

    let histogram = error_histogram(conn)?;
    out.push_str("\n## Errors\n\n");
    if histogram.is_empty() {
        out.push_str("No errored records.\n");
    } else {
        for (prefix, count) in &histogram {
            out.push_str(&format!("- **{prefix}**: {count} record(s)\n"));
        }
        out.push_str("\n### Details\n\n");
        for item in items::list_by_status(conn, ItemStatus::Error)? {
            out.push_str(&format!(
                "- item `{}`: {}\n",
                item.source_location,
                item.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
        for asset in assets::list_by_status(conn, AssetStatus::Error)? {
            out.push_str(&format!(
                "- asset `{}`: {}\n",
                asset.source_location,
                asset.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    std::fs::write(&path, out)?;
    info!("Run report written to {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use postforge_db::pool::{get_conn, init_memory_pool};

    #[test]
    fn test_error_histogram_groups_by_prefix() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        for (i, message) in [
            "publish rejected (403): quota",
            "publish rejected (403): quota",
            "IO error: connection reset",
        ]
        .iter()
        .enumerate()
        {
            let id = items::register(&conn, &format!("{i}.html"), Some(&format!("h{i}")))
                .unwrap()
                .accepted_id()
                .unwrap();
            items::mark_error(&conn, id, message).unwrap();
        }

        let histogram = error_histogram(&conn).unwrap();
        assert_eq!(histogram.get("publish rejected (403)"), Some(&2));
        assert_eq!(histogram.get("IO error"), Some(&1));
    }

    #[test]
    fn test_write_markdown() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let report = RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome: RunOutcome::Completed { had_errors: false },
            stages: vec![StageReport {
                name: "scan",
                succeeded: 3,
                failed: 0,
                skipped: 1,
                disabled: false,
                dry_run: false,
                signal: None,
                stage_error: None,
            }],
        };

        let path = write_markdown(&report, &conn, dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("| scan | 3 | 0 | 1 |"));
        assert!(content.contains("No errored records."));
    }
}
