//! Transform stage: produce processed copies of new assets.
//!
//! Per-asset work is independent and potentially slow, so it runs through the
//! bounded runner; all store writes happen on the commit funnel.

use std::path::Path;

use postforge_common::{AssetStatus, Result};
use postforge_db::pool::get_conn;
use postforge_db::queries::assets;
use tracing::{info, warn};

use super::{StageContext, StageOutcome};
use crate::pipeline::runner::run_bounded;

pub fn run(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = assets::list_by_status(&conn, AssetStatus::New)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let output_dir = ctx.config.transform_output_dir();
    std::fs::create_dir_all(&output_dir)?;

    // Sources that vanished since the scan are parked, not failed.
    let mut outcome = StageOutcome::empty();
    let mut workable = Vec::new();
    for asset in pending {
        if Path::new(&asset.source_location).exists() {
            workable.push(asset);
        } else {
            warn!(
                "Asset source vanished before transform: {}",
                asset.source_location
            );
            assets::mark_missing(&conn, asset.id)?;
            outcome.skipped += 1;
        }
    }

    let transformer = ctx.transformer;
    let tally = run_bounded(
        &workable,
        ctx.config.max_parallelism(),
        |asset| transformer.transform(Path::new(&asset.source_location), &output_dir),
        |asset, result| match result {
            Ok(dest) => assets::set_processed(&conn, asset.id, &dest.to_string_lossy()),
            Err(e) => assets::mark_error(&conn, asset.id, &e.to_string()),
        },
    )?;

    outcome.succeeded = tally.succeeded;
    outcome.failed = tally.failed;
    info!(
        "Transform complete: {} processed, {} failed, {} missing",
        outcome.succeeded, outcome.failed, outcome.skipped
    );
    Ok(outcome)
}
