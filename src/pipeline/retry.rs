//! Retry classification.
//!
//! An errored record resumes from the latest stage whose work is already
//! durable, never from scratch. The evidence is read from the record itself:
//! the typed progress flags for items, the presence of a processed copy for
//! assets. No marker means the conservative default, the earliest
//! non-terminal status.

use postforge_common::{AssetStatus, ItemStatus, Progress, Result};
use postforge_db::models::{Asset, ContentItem};
use postforge_db::pool::{get_conn, DbPool};
use postforge_db::queries::{assets, items};
use tracing::info;

/// Where an errored item should resume.
pub fn classify_item(item: &ContentItem) -> ItemStatus {
    if item.progress.contains(Progress::LOCATION) {
        ItemStatus::LocationAdded
    } else if item.progress.contains(Progress::KEYWORDS) {
        ItemStatus::KeywordsAdded
    } else {
        ItemStatus::New
    }
}

/// Where an errored asset should resume.
pub fn classify_asset(asset: &Asset) -> AssetStatus {
    if asset.processed_location.is_some() {
        AssetStatus::Processed
    } else {
        AssetStatus::New
    }
}

/// Records moved out of `error` by one classifier pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTally {
    pub items_reset: usize,
    pub assets_reset: usize,
}

/// Reset every errored record to its classified resumption status.
pub fn run_retry(pool: &DbPool) -> Result<RetryTally> {
    let conn = get_conn(pool)?;
    let mut tally = RetryTally::default();

    for item in items::list_by_status(&conn, ItemStatus::Error)? {
        let resume_at = classify_item(&item);
        info!("Item {} resets to {}", item.id, resume_at);
        items::reset_error(&conn, item.id, resume_at)?;
        tally.items_reset += 1;
    }

    for asset in assets::list_by_status(&conn, AssetStatus::Error)? {
        let resume_at = classify_asset(&asset);
        info!("Asset {} resets to {}", asset.id, resume_at);
        assets::reset_error(&conn, asset.id, resume_at)?;
        tally.assets_reset += 1;
    }

    info!(
        "Retry classification complete: {} items, {} assets reset",
        tally.items_reset, tally.assets_reset
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use postforge_db::pool::init_memory_pool;

    #[test]
    fn test_classify_item_by_progress() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let id = items::register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();

        // No durable progress: back to the start.
        let item = items::get(&conn, id).unwrap().unwrap();
        assert_eq!(classify_item(&item), ItemStatus::New);

        // Keyword marker durable: resume after the keyword stage.
        items::merge_progress(&conn, id, Progress::KEYWORDS).unwrap();
        let item = items::get(&conn, id).unwrap().unwrap();
        assert_eq!(classify_item(&item), ItemStatus::KeywordsAdded);

        // Both markers durable: resume right before publication.
        items::merge_progress(&conn, id, Progress::LOCATION).unwrap();
        let item = items::get(&conn, id).unwrap().unwrap();
        assert_eq!(classify_item(&item), ItemStatus::LocationAdded);
    }

    #[test]
    fn test_run_retry_resumes_midway() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        // Item failed during location enrichment: keyword work is durable.
        let id = items::register(&conn, "a.html", Some("h1"))
            .unwrap()
            .accepted_id()
            .unwrap();
        items::merge_progress(&conn, id, Progress::KEYWORDS).unwrap();
        items::update_status(&conn, id, ItemStatus::KeywordsAdded, None).unwrap();
        items::mark_error(&conn, id, "geocoder timeout").unwrap();

        // Asset failed during upload: the processed copy is durable.
        let asset_id = assets::register(&conn, id, "img/a.jpg").unwrap().unwrap();
        assets::set_processed(&conn, asset_id, "work/a.jpg").unwrap();
        assets::mark_error(&conn, asset_id, "upload refused").unwrap();

        // The in-memory pool holds a single connection; release it so
        // run_retry can acquire one, then reacquire for verification.
        drop(conn);
        let tally = run_retry(&pool).unwrap();
        assert_eq!(
            tally,
            RetryTally {
                items_reset: 1,
                assets_reset: 1
            }
        );

        let conn = get_conn(&pool).unwrap();
        let item = items::get(&conn, id).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::KeywordsAdded);
        assert!(item.error_message.is_none());

        let asset = assets::get(&conn, asset_id).unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Processed);
    }

    #[test]
    fn test_run_retry_ignores_healthy_records() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        items::register(&conn, "a.html", Some("h1")).unwrap();

        // Release the single in-memory connection so run_retry can acquire one.
        drop(conn);
        let tally = run_retry(&pool).unwrap();
        assert_eq!(tally, RetryTally::default());
    }
}
