//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use tokio::sync::watch;
use waypoint_engine::{
    BackgroundContext, Bridge, ForegroundContext, SubmitResult, SyncOutcome, SyncTrigger,
    WakeQueue, WakeRegistrar, pending_for,
};
use waypoint_store::{ListOrder, QueueStore, StateStore};
use waypoint_types::{
    Attachment, GameId, GameState, JoinTarget, LocationId, TeamId, ValidationMode,
    ValidationOutcome,
};

use crate::session::Session;
use crate::terminal::{TerminalNotifier, progress_line};

#[derive(Debug, Args)]
pub struct InitArgs {
    pub game_id: i64,
    pub team_id: i64,
    /// Location ids in hunt order.
    #[arg(required = true)]
    pub locations: Vec<i64>,
    /// Replace an existing local replica.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct FoundArgs {
    pub location_id: i64,
    /// How the location was validated.
    #[arg(long, default_value = "button", value_parser = parse_mode)]
    pub mode: ValidationMode,
    /// The server should review the evidence before counting it.
    #[arg(long)]
    pub needs_validation: bool,
    /// Photo evidence, sent as a multipart upload.
    #[arg(long)]
    pub photo: Option<PathBuf>,
    /// Queue without attempting the network.
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct JoinArgs {
    pub game_id: i64,
    /// Existing team to join (default: the selected team).
    #[arg(long, conflicts_with = "new_team")]
    pub team: Option<i64>,
    /// Create a team with this name.
    #[arg(long)]
    pub new_team: Option<String>,
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct SwitchTeamArgs {
    pub team_id: i64,
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Seconds between periodic wakes.
    #[arg(long, default_value_t = 30)]
    pub interval_secs: u64,
    /// Handle a single wake and exit.
    #[arg(long)]
    pub once: bool,
}

fn parse_mode(raw: &str) -> Result<ValidationMode, String> {
    ValidationMode::parse(raw).map_err(|err| err.to_string())
}

fn photo_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

fn read_photo(path: &Path) -> Result<Attachment> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading photo {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("photo");
    Ok(Attachment::new(name, photo_mime(path), bytes))
}

/// A page for one command, with wakes collected in-process.
fn open_page(session: &Session, online: bool) -> Result<(ForegroundContext, Arc<WakeQueue>)> {
    open_page_on(session, session.load_state()?, online)
}

fn open_page_on(
    session: &Session,
    state: GameState,
    online: bool,
) -> Result<(ForegroundContext, Arc<WakeQueue>)> {
    let wake = Arc::new(WakeQueue::new());
    let registrar: Arc<dyn WakeRegistrar> = wake.clone();
    let page = ForegroundContext::new(
        session.core()?,
        state,
        Arc::new(TerminalNotifier::new(false)),
        registrar,
    )
    .with_online(online);
    Ok((page, wake))
}

fn report_deferred(wake: &WakeQueue) {
    let tags = wake.pending();
    if !tags.is_empty() {
        tracing::info!(?tags, "Deferred replay registered");
        println!("Run `waypoint worker --once` or `waypoint sync` to deliver queued updates.");
    }
}

pub fn init(session: &Session, args: &InitArgs) -> Result<()> {
    let game_id = GameId::new(args.game_id);
    let states = session.states();
    if !args.force && states.load(game_id)?.is_some() {
        bail!("game {game_id} already has local state; pass --force to replace it");
    }
    let locations: Vec<LocationId> = args.locations.iter().copied().map(LocationId::new).collect();
    let state = GameState::new(game_id, TeamId::new(args.team_id), &locations);
    states.save(&state)?;
    println!("{}", progress_line(&state));
    Ok(())
}

pub fn status(session: &Session) -> Result<()> {
    let state = session.load_state()?;
    let queue = session.queue()?;
    println!("{}", progress_line(&state));
    println!("data: {}", session.data_dir().display());
    println!(
        "queued: {} for this team, {} total",
        pending_for(queue.as_ref(), &state)?,
        queue.count()?
    );
    for location in &state.locations {
        if location.local_only {
            println!("  location {} found locally, not yet confirmed", location.id);
        }
    }
    Ok(())
}

/// Dump the queue in its persisted record form.
pub fn queue(session: &Session) -> Result<()> {
    let records: Vec<_> = session
        .queue()?
        .list_all(ListOrder::Insertion)?
        .iter()
        .map(waypoint_types::PendingUpdate::to_record)
        .collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn found(session: &Session, args: FoundArgs) -> Result<()> {
    let (mut page, wake) = open_page(session, !args.offline)?;
    let mut outcome = ValidationOutcome::passed(args.mode, LocationId::new(args.location_id));
    outcome.needs_validation = args.needs_validation;
    if let Some(path) = &args.photo {
        outcome.attachment = Some(read_photo(path)?);
    }
    let result = page.submit_validation(outcome).await?;
    if let SubmitResult::Dispatched(dispatched) = &result {
        tracing::debug!(?dispatched, "Found location dispatched");
    }
    report_deferred(&wake);
    Ok(())
}

pub async fn switch_team(session: &Session, args: &SwitchTeamArgs) -> Result<()> {
    let (mut page, wake) = open_page(session, !args.offline)?;
    page.switch_team(TeamId::new(args.team_id)).await?;
    report_deferred(&wake);
    Ok(())
}

pub async fn join(session: &Session, args: JoinArgs) -> Result<()> {
    let game_id = GameId::new(args.game_id);
    let target = match (args.team, args.new_team) {
        (_, Some(name)) => JoinTarget::NewTeam(name),
        (Some(team), None) => JoinTarget::Existing(TeamId::new(team)),
        (None, None) => JoinTarget::Existing(session.team_id()?),
    };
    // Joining is allowed before any replica exists.
    let state = match session.load_state() {
        Ok(state) => state,
        Err(err) => {
            tracing::debug!(error = %err, "No current replica; starting from the joined game");
            let team_id = match &target {
                JoinTarget::Existing(team_id) => *team_id,
                JoinTarget::NewTeam(_) => session.team_id().unwrap_or(TeamId::new(0)),
            };
            GameState::new(game_id, team_id, &[])
        }
    };
    let (mut page, wake) = open_page_on(session, state, !args.offline)?;
    page.join_game(game_id, target).await?;
    report_deferred(&wake);
    Ok(())
}

pub async fn sync(session: &Session) -> Result<()> {
    let (mut page, _wake) = open_page(session, true)?;
    match page.sync(SyncTrigger::UserRequest).await? {
        SyncOutcome::Busy => println!("A sync is already running."),
        SyncOutcome::Completed(report) => {
            println!(
                "delivered {}, rejected {}, still queued {}",
                report.drain.flushed(),
                report.drain.rejected.len(),
                report.drain.requeued.len() + report.drain.not_due,
            );
            if let Some(err) = report.reconcile_error {
                println!("server state not refreshed: {err}");
            }
        }
    }
    Ok(())
}

/// Run the background context. Context messages are printed as JSON lines.
pub async fn worker(session: &Session, args: &WorkerArgs) -> Result<()> {
    let core = session.core()?;
    let bridge = Bridge::new();
    let background = BackgroundContext::new(&core, &bridge).with_budget(session.config().wake_budget());
    tracing::info!(owner = background.claim_owner(), "Background context started");

    let mut messages = bridge.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(message) = messages.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "Could not encode context message"),
            }
        }
    });

    if args.once {
        let report = background.handle_wake(Vec::new()).await?;
        drop(background);
        drop(bridge);
        let _ = printer.await;
        if report.is_none() {
            println!("A drain is already running.");
        }
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let wake = bridge.wake();
    let period = Duration::from_secs(args.interval_secs.max(1));
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            wake.poke();
        }
    });
    let serve = tokio::spawn(background.run(stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutting down background context");
    let _ = stop_tx.send(true);
    ticker.abort();
    serve.await.context("background task panicked")?;
    printer.abort();
    Ok(())
}
