//! Cursor commands: show and reset.

use serde::Serialize;
use std::path::Path;
use tracing::info;
use zonesync_engine::{CursorStore, FileCursorStore};
use zonesync_protocol::ZoneId;

/// One committed cursor for output.
#[derive(Debug, Serialize)]
pub struct CursorInfo {
    /// Zone name.
    pub zone: String,
    /// Cursor bytes, hex-encoded.
    pub cursor: String,
    /// Cursor length in bytes.
    pub len: usize,
}

/// Reads the committed cursors, optionally for one zone only.
pub fn collect(
    path: &Path,
    zone: Option<&str>,
) -> Result<Vec<CursorInfo>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No cursor file found at {:?}", path).into());
    }

    let cursors = FileCursorStore::inspect(path)?;
    Ok(cursors
        .iter()
        .filter(|(id, _)| zone.map_or(true, |name| id.as_str() == name))
        .map(|(id, cursor)| CursorInfo {
            zone: id.to_string(),
            cursor: cursor.to_hex(),
            len: cursor.as_bytes().len(),
        })
        .collect())
}

/// Runs the show-cursor command.
pub fn show(
    path: &Path,
    zone: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cursors = collect(path, zone)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&cursors)?);
        }
        _ => {
            if cursors.is_empty() {
                println!("No committed cursors");
            }
            for info in &cursors {
                println!("{}: {} ({} bytes)", info.zone, info.cursor, info.len);
            }
        }
    }

    Ok(())
}

/// Forgets the committed cursor of a zone, forcing a full pull next pass.
///
/// Fails if a running engine holds the cursor file.
pub fn reset(path: &Path, zone: &str) -> Result<bool, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No cursor file found at {:?}", path).into());
    }

    let zone = ZoneId::new(zone);
    let store = FileCursorStore::open(path)?;
    let existed = store.load(&zone)?.is_some();
    store.clear(&zone)?;

    if existed {
        info!("Reset cursor for zone {}", zone);
    } else {
        info!("No cursor committed for zone {}", zone);
    }
    Ok(existed)
}
