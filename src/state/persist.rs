//! State snapshot and closed-event archiving

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ZinoError, ZinoResult};
use crate::models::events::Event;
use crate::state::ZinoState;

/// Writes the full state as a JSON snapshot
pub fn save_snapshot(state: &ZinoState, path: &Path) -> ZinoResult<()> {
    let serialized = serde_json::to_vec_pretty(state)?;
    write_snapshot_bytes(path, &serialized)
}

/// Writes pre-serialized snapshot bytes.  The write goes to a temporary file
/// first so a crash mid-write never clobbers the previous snapshot.
pub fn write_snapshot_bytes(path: &Path, serialized: &[u8]) -> ZinoResult<()> {
    debug!("dumping state to {}", path.display());
    let mut temporary = path.to_path_buf();
    temporary.set_extension("tmp");
    std::fs::write(&temporary, serialized)?;
    std::fs::rename(&temporary, path)?;
    Ok(())
}

/// Loads a state snapshot and rebuilds its indexes.  Returns None if no
/// snapshot exists yet.
pub fn load_snapshot(path: &Path) -> ZinoResult<Option<ZinoState>> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut state: ZinoState = serde_json::from_slice(&content).map_err(|error| {
        ZinoError::StatePersistence(format!("corrupt snapshot {}: {}", path.display(), error))
    })?;
    state.rebuild_indexes();
    info!(
        "loaded state snapshot from {} ({} open events)",
        path.display(),
        state.events.len()
    );
    Ok(Some(state))
}

/// Archives one closed event as its own JSON file in the old-events
/// directory
pub fn archive_closed_event(directory: &Path, event: &Event) -> ZinoResult<PathBuf> {
    let id = event
        .id
        .ok_or_else(|| ZinoError::Internal("cannot archive an uncommitted event".to_string()))?;
    std::fs::create_dir_all(directory)?;
    let path = directory.join(format!("{}.json", id));
    std::fs::write(&path, serde_json::to_vec_pretty(event)?)?;
    debug!("archived closed event {} to {}", id, path.display());
    Ok(path)
}
