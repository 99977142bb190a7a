//! Wiring: configuration to stores, transport and the shared sync core.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use url::Url;
use waypoint_config::WaypointConfig;
use waypoint_engine::{BackoffPolicy, SyncCore, SystemClock};
use waypoint_store::{FileStateStore, SqliteQueueStore, StateStore};
use waypoint_transport::{HttpTransport, HttpTransportConfig};
use waypoint_types::{GameId, GameState, TeamId};

const QUEUE_FILE: &str = "queue.sqlite3";

/// Game and team picked on the command line, overriding the config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Selection {
    pub game: Option<i64>,
    pub team: Option<i64>,
}

pub struct Session {
    config: WaypointConfig,
    data_dir: PathBuf,
    selection: Selection,
}

impl Session {
    /// Load configuration from `path` (or the default location).
    pub fn open(path: Option<&Path>, selection: Selection) -> Result<Self> {
        let loaded = match path {
            Some(path) => WaypointConfig::load_from(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => WaypointConfig::load().context("loading config")?,
        };
        let config = loaded.unwrap_or_default();
        let data_dir = config
            .data_dir()
            .ok_or_else(|| anyhow!("cannot determine a data directory; set [storage].data_dir"))?;
        Ok(Self {
            config,
            data_dir,
            selection,
        })
    }

    #[must_use]
    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn game_id(&self) -> Result<GameId> {
        self.selection
            .game
            .or_else(|| self.config.game_id())
            .map(GameId::new)
            .ok_or_else(|| anyhow!("no game selected; pass --game or set [game].game_id"))
    }

    pub fn team_id(&self) -> Result<TeamId> {
        self.selection
            .team
            .or_else(|| self.config.team_id())
            .map(TeamId::new)
            .ok_or_else(|| anyhow!("no team selected; pass --team or set [game].team_id"))
    }

    pub fn queue(&self) -> Result<Arc<SqliteQueueStore>> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir.display()))?;
        let path = self.data_dir.join(QUEUE_FILE);
        let store = SqliteQueueStore::open(&path)
            .with_context(|| format!("opening queue {}", path.display()))?;
        Ok(Arc::new(store))
    }

    #[must_use]
    pub fn states(&self) -> Arc<FileStateStore> {
        Arc::new(FileStateStore::new(&self.data_dir))
    }

    /// The persisted replica of the selected game.
    pub fn load_state(&self) -> Result<GameState> {
        let game_id = self.game_id()?;
        let Some(state) = self
            .states()
            .load(game_id)
            .with_context(|| format!("loading state of game {game_id}"))?
        else {
            bail!("no local state for game {game_id}; run `waypoint init` first");
        };
        match self.selection.team.map(TeamId::new) {
            Some(team_id) if team_id != state.team_id => bail!(
                "local state of game {game_id} belongs to team {}; use `waypoint switch-team`",
                state.team_id
            ),
            _ => Ok(state),
        }
    }

    pub fn transport(&self) -> Result<Arc<HttpTransport>> {
        let raw = self
            .config
            .base_url()
            .ok_or_else(|| anyhow!("no server configured; set [server].base_url"))?;
        let base_url = Url::parse(&raw).with_context(|| format!("invalid base_url {raw}"))?;
        let transport = HttpTransport::new(
            HttpTransportConfig::new(base_url).with_timeout(self.config.request_timeout()),
        )
        .context("building HTTP client")?;
        Ok(Arc::new(transport))
    }

    /// Stores, transport and policies, ready for either context.
    pub fn core(&self) -> Result<SyncCore> {
        let backoff = BackoffPolicy::new(
            self.config.backoff_base(),
            self.config.backoff_cap(),
            self.config.jitter(),
        );
        Ok(SyncCore::new(
            self.queue()?,
            self.states(),
            self.transport()?,
            Arc::new(SystemClock),
        )
        .with_backoff(backoff)
        .with_claim_lease(self.config.claim_lease()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn selection_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!(
                "[storage]\ndata_dir = \"{}\"\n[game]\ngame_id = 7\nteam_id = 3\n",
                dir.path().join("data").display()
            ),
        );
        let session = Session::open(
            Some(&path),
            Selection {
                game: None,
                team: Some(9),
            },
        )
        .unwrap();
        assert_eq!(session.game_id().unwrap(), GameId::new(7));
        assert_eq!(session.team_id().unwrap(), TeamId::new(9));
    }

    #[test]
    fn missing_server_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &format!("[storage]\ndata_dir = \"{}\"\n", dir.path().display()),
        );
        let session = Session::open(Some(&path), Selection::default()).unwrap();
        let err = session.transport().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn queue_is_created_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("nested").join("data");
        let path = write_config(
            dir.path(),
            &format!("[storage]\ndata_dir = \"{}\"\n", data.display()),
        );
        let session = Session::open(Some(&path), Selection::default()).unwrap();
        session.queue().unwrap();
        assert!(data.join(QUEUE_FILE).exists());
    }
}
