//! Enrichment stages: keyword markers, then location markers.
//!
//! Each stage drives the enricher collaborator over the items in its input
//! status, persists the rewritten payload, records the typed progress flag,
//! and advances the status. A failing item is recorded and never blocks its
//! siblings.

use postforge_common::{ItemStatus, Progress, Result};
use postforge_db::pool::get_conn;
use postforge_db::queries::items;
use tracing::{info, warn};

use super::{StageContext, StageOutcome};

pub fn run_keywords(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = items::list_by_status(&conn, ItemStatus::New)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let mut outcome = StageOutcome::empty();
    for item in pending {
        match ctx.enricher.add_keywords(&item.payload) {
            Ok(enrichment) => {
                items::update_payload(
                    &conn,
                    item.id,
                    &enrichment.payload,
                    enrichment.title.as_deref(),
                    Some(&enrichment.labels),
                )?;
                items::merge_progress(&conn, item.id, Progress::KEYWORDS)?;
                items::update_status(&conn, item.id, ItemStatus::KeywordsAdded, None)?;
                outcome.succeeded += 1;
            }
            Err(e) => {
                warn!("Keyword enrichment failed for item {}: {}", item.id, e);
                items::mark_error(&conn, item.id, &e.to_string())?;
                outcome.failed += 1;
            }
        }
    }

    info!(
        "Keyword enrichment complete: {} ok, {} failed",
        outcome.succeeded, outcome.failed
    );
    Ok(outcome)
}

pub fn run_location(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = items::list_by_status(&conn, ItemStatus::KeywordsAdded)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let mut outcome = StageOutcome::empty();
    for item in pending {
        match ctx.enricher.add_location(&item.payload) {
            Ok(enrichment) => {
                items::update_payload(&conn, item.id, &enrichment.payload, None, None)?;
                items::merge_progress(&conn, item.id, Progress::LOCATION)?;
                items::update_status(&conn, item.id, ItemStatus::LocationAdded, None)?;
                outcome.succeeded += 1;
            }
            Err(e) => {
                warn!("Location enrichment failed for item {}: {}", item.id, e);
                items::mark_error(&conn, item.id, &e.to_string())?;
                outcome.failed += 1;
            }
        }
    }

    info!(
        "Location enrichment complete: {} ok, {} failed",
        outcome.succeeded, outcome.failed
    );
    Ok(outcome)
}
