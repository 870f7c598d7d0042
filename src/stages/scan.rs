//! Scan stage: discover authored files, register them, and keep the store
//! honest about sources that disappeared.
//!
//! De-duplication is content-addressed: two scans of the same bytes never
//! create two items, and a dead (`missing`/`error`) item whose content
//! reappears anywhere is revived instead of re-registered.

use std::io::Read;
use std::path::Path;

use postforge_common::Result;
use postforge_db::models::RegisterOutcome;
use postforge_db::pool::get_conn;
use postforge_db::queries::{assets, items};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{StageContext, StageOutcome};

const MARKUP_EXTENSIONS: [&str; 2] = ["html", "htm"];
const ASSET_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

fn is_markup_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MARKUP_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_asset_ref(reference: &str) -> bool {
    if reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:")
    {
        return false;
    }
    Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ASSET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Local asset references from `src` attributes in the payload.
pub(crate) fn extract_asset_refs(payload: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)src\s*=\s*["']([^"']+)["']"#).expect("static regex");
    let mut refs = Vec::new();
    for caps in re.captures_iter(payload) {
        let reference = caps[1].trim().to_string();
        if is_asset_ref(&reference) && !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}

/// SHA-256 hex digest of a file's bytes, streamed.
pub(crate) fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Mark in-flight records whose source files vanished.
fn sweep_missing(conn: &rusqlite::Connection) -> Result<usize> {
    let mut missing = 0;

    for item in items::list_in_flight(conn)? {
        if !Path::new(&item.source_location).exists() {
            warn!(
                "Source vanished for item {}: {}",
                item.id, item.source_location
            );
            items::mark_missing(conn, item.id)?;
            missing += 1;
        }
    }
    for asset in assets::list_in_flight(conn)? {
        if !Path::new(&asset.source_location).exists() {
            warn!(
                "Source vanished for asset {}: {}",
                asset.id, asset.source_location
            );
            assets::mark_missing(conn, asset.id)?;
            missing += 1;
        }
    }

    if missing > 0 {
        info!("Marked {} records missing", missing);
    }
    Ok(missing)
}

pub fn run(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let input_dir = ctx.config.input_dir();

    if !input_dir.exists() {
        warn!("Input directory does not exist: {:?}", input_dir);
        return Ok(StageOutcome::counts(0, 1));
    }

    sweep_missing(&conn)?;

    let max_bytes = ctx.config.validation.max_file_bytes;
    let mut outcome = StageOutcome::empty();

    for entry in WalkDir::new(&input_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_dir() || !is_markup_file(path) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Cannot stat {:?}: {}", path, e);
                outcome.failed += 1;
                continue;
            }
        };
        if size > max_bytes {
            warn!("Skipping oversized file {:?} ({} bytes)", path, size);
            outcome.skipped += 1;
            continue;
        }

        match register_file(&conn, path) {
            Ok(true) => outcome.succeeded += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => {
                warn!("Failed to register {:?}: {}", path, e);
                outcome.failed += 1;
            }
        }
    }

    info!(
        "Scan complete: {} registered, {} skipped, {} failed",
        outcome.succeeded, outcome.skipped, outcome.failed
    );
    Ok(outcome)
}

/// Register one file. `Ok(true)` means the store accepted it (new, updated,
/// or revived); `Ok(false)` means it was a duplicate of a live item.
fn register_file(conn: &rusqlite::Connection, path: &Path) -> Result<bool> {
    let location = path.to_string_lossy().to_string();
    let hash = hash_file(path)?;

    let outcome = items::register(conn, &location, Some(&hash))?;
    let id = match outcome {
        RegisterOutcome::Duplicate {
            existing,
            existing_location,
        } => {
            debug!(
                "Duplicate content: {:?} matches item {} at {}",
                path, existing, existing_location
            );
            return Ok(false);
        }
        RegisterOutcome::Inserted(id) => {
            info!("Registered item {}: {:?}", id, path);
            id
        }
        RegisterOutcome::Updated(id) => {
            info!("Content changed in place for item {}: {:?}", id, path);
            id
        }
        RegisterOutcome::Revived(id) => {
            info!("Revived item {} at {:?}", id, path);
            id
        }
    };

    let bytes = std::fs::read(path)?;
    let payload = match String::from_utf8(bytes) {
        Ok(payload) => payload,
        Err(_) => {
            items::mark_error(conn, id, "unreadable encoding: payload is not valid UTF-8")?;
            return Err(postforge_common::Error::invalid_input(format!(
                "{path:?} is not valid UTF-8"
            )));
        }
    };

    items::update_payload(conn, id, &payload, None, None)?;

    // Register referenced local assets, resolved against the file's directory.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for reference in extract_asset_refs(&payload) {
        let resolved = base.join(&reference);
        let asset_location = resolved.to_string_lossy().to_string();
        if let Some(asset_id) = assets::register(conn, id, &asset_location)? {
            debug!("Registered asset {} for item {}: {}", asset_id, id, reference);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_asset_refs_local_images_only() {
        let payload = r#"
            <img src="img/a.jpg">
            <img SRC='b.PNG'>
            <img src="https://cdn.example.net/remote.jpg">
            <img src="data:image/png;base64,AAAA">
            <script src="app.js"></script>
            <img src="img/a.jpg">
        "#;
        let refs = extract_asset_refs(payload);
        assert_eq!(refs, vec!["img/a.jpg".to_string(), "b.PNG".to_string()]);
    }

    #[test]
    fn test_hash_file_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        std::fs::write(&path, "<p>hello</p>").unwrap();

        let first = hash_file(&path).unwrap();
        let second = hash_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        std::fs::write(&path, "<p>changed</p>").unwrap();
        assert_ne!(hash_file(&path).unwrap(), first);
    }

    #[test]
    fn test_is_markup_file() {
        assert!(is_markup_file(Path::new("a.html")));
        assert!(is_markup_file(Path::new("A.HTM")));
        assert!(!is_markup_file(Path::new("a.txt")));
        assert!(!is_markup_file(Path::new("html")));
    }
}
