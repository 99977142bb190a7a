//! `~/.waypoint/config.toml` loading.
//!
//! Every section and key is optional. Accessors resolve defaults, and string
//! values may reference environment variables as `${VAR}`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 60_000;
pub const DEFAULT_JITTER: f64 = 0.25;
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 120;
pub const DEFAULT_WAKE_BUDGET_SECS: u64 = 25;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WaypointConfig {
    pub server: Option<ServerConfig>,
    pub sync: Option<SyncConfig>,
    pub storage: Option<StorageConfig>,
    pub game: Option<GameConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncConfig {
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    /// Fraction of the delay applied as +/- jitter.
    pub jitter: Option<f64>,
    /// In-flight claims older than this are taken over by the next drain.
    pub claim_lease_secs: Option<u64>,
    /// Time budget of one background wake.
    pub wake_budget_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GameConfig {
    pub game_id: Option<i64>,
    pub team_id: Option<i64>,
}

/// Replace `${VAR}` references with their environment values.
///
/// Unset variables expand to the empty string; an unclosed `${` is kept as-is.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Expand `${VAR}` references and a leading `~/`.
fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env_vars(raw);
    if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

impl WaypointConfig {
    /// Load from the default location. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        Self::parse(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|s| s.base_url.as_deref())
            .map(expand_env_vars)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .server
            .as_ref()
            .and_then(|s| s.timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        let ms = self
            .sync
            .as_ref()
            .and_then(|s| s.backoff_base_ms)
            .unwrap_or(DEFAULT_BACKOFF_BASE_MS);
        Duration::from_millis(ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        let ms = self
            .sync
            .as_ref()
            .and_then(|s| s.backoff_cap_ms)
            .unwrap_or(DEFAULT_BACKOFF_CAP_MS);
        Duration::from_millis(ms).max(self.backoff_base())
    }

    /// Clamped to `[0.0, 1.0]`.
    #[must_use]
    pub fn jitter(&self) -> f64 {
        self.sync
            .as_ref()
            .and_then(|s| s.jitter)
            .filter(|j| j.is_finite())
            .map_or(DEFAULT_JITTER, |j| j.clamp(0.0, 1.0))
    }

    #[must_use]
    pub fn claim_lease(&self) -> Duration {
        let secs = self
            .sync
            .as_ref()
            .and_then(|s| s.claim_lease_secs)
            .unwrap_or(DEFAULT_CLAIM_LEASE_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn wake_budget(&self) -> Duration {
        let secs = self
            .sync
            .as_ref()
            .and_then(|s| s.wake_budget_secs)
            .unwrap_or(DEFAULT_WAKE_BUDGET_SECS);
        Duration::from_secs(secs)
    }

    /// Directory holding the queue database and state files.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        match self.storage.as_ref().and_then(|s| s.data_dir.as_deref()) {
            Some(raw) if !raw.trim().is_empty() => Some(expand_path(raw.trim())),
            _ => default_data_dir(),
        }
    }

    #[must_use]
    pub fn game_id(&self) -> Option<i64> {
        self.game.as_ref().and_then(|g| g.game_id)
    }

    #[must_use]
    pub fn team_id(&self) -> Option<i64> {
        self.game.as_ref().and_then(|g| g.team_id)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

#[must_use]
pub fn waypoint_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".waypoint"))
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    waypoint_home().map(|dir| dir.join("config.toml"))
}

#[must_use]
pub fn default_data_dir() -> Option<PathBuf> {
    waypoint_home().map(|dir| dir.join("data"))
}
