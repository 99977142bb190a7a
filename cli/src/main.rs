//! Waypoint CLI - drives the offline-first sync engine from a terminal.
//!
//! Every command except `worker` acts as a short-lived page: it loads the
//! local replica, applies one action, and exits. `worker` runs the background
//! context, replaying the queue whenever it is woken.
//!
//! ```text
//! waypoint found 12 --mode qr          optimistic mark + send or queue
//! waypoint sync                        drain, then reconcile with the server
//! waypoint worker                      background replay until Ctrl-C
//! ```

mod commands;
mod logging;
mod session;
mod terminal;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{FoundArgs, InitArgs, JoinArgs, SwitchTeamArgs, WorkerArgs};
use session::{Selection, Session};

#[derive(Debug, Parser)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.waypoint/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Game to act on, overriding [game].game_id.
    #[arg(long, global = true)]
    game: Option<i64>,

    /// Team to act as, overriding [game].team_id.
    #[arg(long, global = true)]
    team: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the local replica of a game.
    Init(InitArgs),
    /// Show local progress and queue size.
    Status,
    /// Print queued updates as JSON records.
    Queue,
    /// Record a found location.
    Found(FoundArgs),
    /// Switch to another team in the current game.
    SwitchTeam(SwitchTeamArgs),
    /// Join a game on an existing or new team.
    Join(JoinArgs),
    /// Replay the queue and reconcile with the server.
    Sync,
    /// Run the background replay context.
    Worker(WorkerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let session = Session::open(
        cli.config.as_deref(),
        Selection {
            game: cli.game,
            team: cli.team,
        },
    )?;

    let result = match cli.command {
        Command::Init(args) => commands::init(&session, &args),
        Command::Status => commands::status(&session),
        Command::Queue => commands::queue(&session),
        Command::Found(args) => commands::found(&session, args).await,
        Command::SwitchTeam(args) => commands::switch_team(&session, &args).await,
        Command::Join(args) => commands::join(&session, args).await,
        Command::Sync => commands::sync(&session).await,
        Command::Worker(args) => commands::worker(&session, &args).await,
    };

    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "Command failed");
    }
    result
}
