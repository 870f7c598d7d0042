//! Asset publication through the manual exchange channel.
//!
//! The downstream target offers no API for media, so processed assets are
//! exported for the operator to upload by hand; the operator then saves the
//! resulting page into the confirmations directory and re-invokes the run.
//! Until that artifact appears the stage suspends the pipeline, idempotently:
//! re-running with the precondition still unmet re-exports (a no-op) and
//! suspends with the same reason.
//!
//! Export names carry a batch serial prefix so confirmations can never match
//! a file from an earlier batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use postforge_common::{AssetStatus, Error, Result};
use postforge_db::models::Asset;
use postforge_db::pool::get_conn;
use postforge_db::queries::{assets, settings};
use regex::Regex;
use tracing::{info, warn};

use super::{StageContext, StageOutcome};

const SERIAL_SECTION: &str = "publisher";
const SERIAL_KEY: &str = "batch_serial";
const FIRST_SERIAL: &str = "001A";

fn current_serial(conn: &rusqlite::Connection) -> Result<String> {
    Ok(settings::get(conn, SERIAL_SECTION, SERIAL_KEY)?
        .unwrap_or_else(|| FIRST_SERIAL.to_string()))
}

/// `001A -> 001B`, wrapping `Z` into the next numeric prefix (`001Z -> 002A`).
pub(crate) fn next_serial(serial: &str) -> String {
    let (prefix, last) = match serial.char_indices().last() {
        Some((idx, c)) if c.is_ascii_uppercase() => (&serial[..idx], c),
        _ => return FIRST_SERIAL.to_string(),
    };
    if last == 'Z' {
        let n: u32 = prefix.parse().unwrap_or(0);
        format!("{:03}A", n + 1)
    } else {
        format!("{}{}", prefix, (last as u8 + 1) as char)
    }
}

fn advance_serial(conn: &rusqlite::Connection) -> Result<()> {
    let next = next_serial(&current_serial(conn)?);
    settings::set(conn, SERIAL_SECTION, SERIAL_KEY, &next)?;
    info!("Batch serial advanced to {}", next);
    Ok(())
}

/// Confirmation manifests the operator may have dropped off.
fn find_manifests(confirmations_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    if !confirmations_dir.exists() {
        return Ok(manifests);
    }
    for entry in std::fs::read_dir(confirmations_dir)? {
        let path = entry?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("html" | "htm" | "txt" | "mhtml")) {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

/// Map of file name -> URL for every URL in the manifest text.
pub(crate) fn extract_external_refs(content: &str) -> HashMap<String, String> {
    // Soft line breaks from quoted-printable saves would split URLs.
    let unfolded = content.replace("=\r\n", "").replace("=\n", "");
    let re = Regex::new(r#"https?://[^\s"'<>]+"#).expect("static regex");

    let mut refs = HashMap::new();
    for m in re.find_iter(&unfolded) {
        let url = m.as_str().trim_end_matches(['.', ',', ')', ';']);
        let name = url
            .rsplit('/')
            .next()
            .and_then(|segment| segment.split('?').next())
            .unwrap_or_default();
        if !name.is_empty() {
            refs.entry(name.to_string()).or_insert_with(|| url.to_string());
        }
    }
    refs
}

fn exported_name(serial: &str, asset: &Asset) -> Option<String> {
    Path::new(asset.processed_location.as_deref()?)
        .file_name()
        .map(|name| format!("{}_{}", serial, name.to_string_lossy()))
}

/// Copy pending assets into the export directory under serial-prefixed names.
/// Re-running overwrites the same copies.
fn export_pending(
    conn: &rusqlite::Connection,
    pending: &[Asset],
    export_dir: &Path,
) -> Result<usize> {
    std::fs::create_dir_all(export_dir)?;
    let serial = current_serial(conn)?;

    let mut exported = 0;
    for asset in pending {
        let Some(source) = asset.processed_location.as_deref() else {
            continue;
        };
        let source = Path::new(source);
        if !source.exists() {
            warn!("Processed copy vanished for asset {}: {:?}", asset.id, source);
            continue;
        }
        let Some(name) = exported_name(&serial, asset) else {
            continue;
        };
        std::fs::copy(source, export_dir.join(name))?;
        exported += 1;
    }

    info!(
        "Exported {} assets to {:?} (serial {})",
        exported, export_dir, serial
    );
    Ok(exported)
}

/// Resolve pending assets against a confirmation manifest.
fn resolve_confirmations(
    conn: &rusqlite::Connection,
    pending: &[Asset],
    manifest: &Path,
) -> Result<StageOutcome> {
    let content = String::from_utf8_lossy(&std::fs::read(manifest)?).into_owned();
    let refs = extract_external_refs(&content);
    info!(
        "Confirmation manifest {:?} carries {} URLs",
        manifest,
        refs.len()
    );

    let serial = current_serial(conn)?;
    let mut outcome = StageOutcome::empty();

    for asset in pending {
        let Some(name) = exported_name(&serial, asset) else {
            outcome.failed += 1;
            continue;
        };
        match refs.get(&name) {
            Some(url) => {
                assets::set_published(conn, asset.id, url)?;
                outcome.succeeded += 1;
            }
            None => {
                // Stays `processed`; the next run re-exports and re-suspends.
                warn!("No confirmation for exported asset {}", name);
                outcome.failed += 1;
            }
        }
    }

    if outcome.succeeded > 0 {
        advance_serial(conn)?;
    }

    // Consumed manifests are renamed, never re-parsed.
    let processed_name = manifest.with_extension(format!(
        "{}.processed",
        manifest
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
    ));
    std::fs::rename(manifest, processed_name)?;

    Ok(outcome)
}

pub fn run(ctx: &StageContext<'_>) -> Result<StageOutcome> {
    let conn = get_conn(ctx.pool)?;
    let pending = assets::list_by_status(&conn, AssetStatus::Processed)?;
    if pending.is_empty() {
        return Ok(StageOutcome::empty());
    }

    let confirmations_dir = ctx.config.confirmations_dir();
    let export_dir = ctx.config.export_dir();
    std::fs::create_dir_all(&confirmations_dir)?;

    let manifests = find_manifests(&confirmations_dir)?;
    match manifests.len() {
        1 => resolve_confirmations(&conn, &pending, &manifests[0]),
        0 => {
            export_pending(&conn, &pending, &export_dir)?;
            Ok(StageOutcome::manual(format!(
                "{} assets await manual publication: upload the files in {:?}, \
                 then save the confirmation page into {:?} and re-run",
                pending.len(),
                export_dir,
                confirmations_dir
            )))
        }
        n => Err(Error::invalid_input(format!(
            "{n} confirmation manifests in {confirmations_dir:?}; keep exactly one"
        ))),
    }
}
