//! Game-state persistence: one JSON file per game.
//!
//! Writes go through a temp file + rename so a crash mid-write leaves either
//! the previous state or the new one, never a torn file.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use waypoint_types::{GameId, GameState};

use crate::sqlite_util::ensure_secure_dir;
use crate::{StateStore, StoreError};

/// [`StateStore`] writing `state-<game_id>.json` files under one directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, game_id: GameId) -> PathBuf {
        self.dir.join(format!("state-{game_id}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error(tmp.path(), e))?;
    }
    tmp.write_all(bytes).map_err(|e| io_error(path, e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;

    #[cfg(unix)]
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %parent.display(), "Parent directory sync_all failed (best-effort): {e}");
    }
    Ok(())
}

impl StateStore for FileStateStore {
    fn load(&self, game_id: GameId) -> Result<Option<GameState>, StoreError> {
        let path = self.path_for(game_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let state: GameState = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        state.validate().map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if state.game_id != game_id {
            return Err(StoreError::Corrupt {
                path,
                message: format!("file holds game {}", state.game_id),
            });
        }
        Ok(Some(state))
    }

    fn save(&self, state: &GameState) -> Result<(), StoreError> {
        ensure_secure_dir(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path_for(state.game_id), &bytes)
    }
}
