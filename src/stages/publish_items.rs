//! Item publication.
//!
//! An item publishes only after every asset its payload references is
//! published; until then it is skipped, not failed, because pending assets
//! are a normal pipeline condition. Local asset references are rewritten to
//! the external refs the manual channel resolved, then the item goes through
//! the publisher collaborator with a stable idempotency key.

use std::collections::HashMap;
use std::path::Path;

use postforge_common::{ItemStatus, Result};
use postforge_db::models::Asset;
use postforge_db::pool::get_conn;
use postforge_db::queries::{assets, items};
use regex::Regex;
use tracing::{debug, info, warn};

use super::{StageContext, StageOutcome};
use crate::publish::PublishRequest;

/// Rewrite local `src` references to the assets' external refs, matching by
/// file name.
pub(crate) fn rewrite_asset_refs(payload: &str, item_assets: &[Asset]) -> String {
    let by_name: HashMap<String, &str> = item_assets
        .iter()
        .filter_map(|asset| {
            let url = asset.external_ref.as_deref()?;
            let name = Path::new(&asset.source_location).file_name()?;
            Some((name.to_string_lossy().into_owned(), url))
        })
        .collect();
    if by_name.is_empty() {
        return payload.to_string();
    }

    let re = Regex::new(r#"(?i)(src\s*=\s*["'])([^"']+)(["'])"#).expect("static regex");
    re.replace_all(payload, |caps: &regex::Captures<'_>| {
        let value = &caps[2];
        let name = Path::new(value)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match by_name.get(&name) {
            Some(url) => format!("{}{}{}", &caps[1], url, &caps[3]),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

pub fn run(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = items::list_by_status(&conn, ItemStatus::LocationAdded)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let delay = std::time::Duration::from_millis(ctx.config.publisher.delay_ms);
    let mut outcome = StageOutcome::empty();

    for (i, item) in pending.iter().enumerate() {
        // Parent publication is blocked until every referenced asset is out.
        let unpublished = assets::unpublished_count(&conn, item.id)?;
        if unpublished > 0 {
            debug!(
                "Item {} waits on {} unpublished assets",
                item.id, unpublished
            );
            outcome.skipped += 1;
            continue;
        }

        let item_assets = assets::list_for_item(&conn, item.id)?;
        let payload = rewrite_asset_refs(&item.payload, &item_assets);

        let fallback_title = Path::new(&item.source_location)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.id.to_string());
        let idempotency_key = item
            .content_hash
            .clone()
            .unwrap_or_else(|| format!("item-{}", item.id));

        let request = PublishRequest {
            title: item.title.as_deref().unwrap_or(&fallback_title),
            payload: &payload,
            labels: &item.labels,
            idempotency_key: &idempotency_key,
        };

        match ctx.publisher.publish_item(&request) {
            Ok(external_id) => {
                items::update_payload(&conn, item.id, &payload, None, None)?;
                items::set_published(&conn, item.id, &external_id)?;
                info!("Published item {} as {}", item.id, external_id);
                outcome.succeeded += 1;
            }
            Err(e) => {
                warn!("Publish failed for item {}: {}", item.id, e);
                items::mark_error(&conn, item.id, &e.to_string())?;
                outcome.failed += 1;
            }
        }

        // Pace the target's rate ceiling between calls.
        if !delay.is_zero() && i + 1 < pending.len() {
            std::thread::sleep(delay);
        }
    }

    info!(
        "Publish complete: {} published, {} failed, {} waiting on assets",
        outcome.succeeded, outcome.failed, outcome.skipped
    );
    Ok(outcome)
}
