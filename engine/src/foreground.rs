//! Foreground context: the open page.
//!
//! Owns the game replica, applies user actions optimistically, dispatches
//! them, and keeps the view in step with the queue and the background
//! context's messages.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use waypoint_types::{
    GameId, GameState, JoinGame, JoinTarget, LocationFound, Mutation, NotifyLevel, TeamId,
    TeamSwitch, UpdateDraft, ValidationOutcome,
};

use crate::bridge::ContextMessage;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::SyncError;
use crate::orchestrator::{
    Orchestrator, REJECTED_MESSAGE, STORAGE_FAILURE_MESSAGE, SyncOutcome, SyncTrigger,
};
use crate::replies::{JoinReply, ProgressReply};
use crate::shim::{Notifier, WakeRegistrar};
use crate::sync_core::{ContextKind, SyncCore, SyncGuard};

pub const CONFIRMED_MESSAGE: &str = "Location confirmed!";
pub const PENDING_VALIDATION_MESSAGE: &str = "Location submitted; pending official validation.";
pub const COMPLETED_MESSAGE: &str = "All locations found!";
pub const TEAM_SWITCH_QUEUED_MESSAGE: &str =
    "Team switch saved offline, will sync when back online.";
pub const JOIN_QUEUED_MESSAGE: &str = "Join request saved offline, will sync when back online.";

/// User actions delivered to a running page.
#[derive(Debug)]
pub enum PageCommand {
    Submit(ValidationOutcome),
    SwitchTeam(TeamId),
    JoinGame { game_id: GameId, target: JoinTarget },
    Sync,
}

#[derive(Debug)]
pub enum SubmitResult {
    /// Validation failed; nothing was recorded.
    NotPassed,
    Dispatched(DispatchOutcome),
}

pub struct ForegroundContext {
    state: GameState,
    core: SyncCore,
    dispatcher: Dispatcher,
    orchestrator: Orchestrator,
    notifier: Arc<dyn Notifier>,
    online: bool,
}

impl ForegroundContext {
    #[must_use]
    pub fn new(
        core: SyncCore,
        state: GameState,
        notifier: Arc<dyn Notifier>,
        wake: Arc<dyn WakeRegistrar>,
    ) -> Self {
        let dispatcher = core.dispatcher(Arc::clone(&wake));
        let orchestrator = core.orchestrator(
            ContextKind::Foreground,
            SyncGuard::new(),
            wake,
            Arc::clone(&notifier),
        );
        Self {
            state,
            core,
            dispatcher,
            orchestrator,
            notifier,
            online: true,
        }
    }

    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    #[must_use]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> GameState {
        self.state
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    #[must_use]
    pub fn claim_owner(&self) -> &str {
        self.orchestrator.drainer().owner()
    }

    /// Page load: draw what we have, then sync if connected.
    pub async fn start(&mut self) -> Result<Option<SyncOutcome>, SyncError> {
        self.notifier.render_from_state(&self.state);
        self.refresh_pending_indicator()?;
        if self.online {
            return self.sync(SyncTrigger::Startup).await.map(Some);
        }
        Ok(None)
    }

    /// Record a connectivity change; coming back online starts a sync.
    pub async fn set_online(&mut self, online: bool) -> Result<Option<SyncOutcome>, SyncError> {
        let reconnected = online && !self.online;
        self.online = online;
        if reconnected {
            tracing::info!("Connectivity restored");
            return self.sync(SyncTrigger::Reconnect).await.map(Some);
        }
        if !online {
            tracing::info!("Connectivity lost; updates will be queued");
        }
        Ok(None)
    }

    pub async fn sync(&mut self, trigger: SyncTrigger) -> Result<SyncOutcome, SyncError> {
        self.orchestrator
            .sync_with_server(&mut self.state, trigger)
            .await
    }

    /// Apply a capture/validation result: optimistic mark, persist, render,
    /// then dispatch and settle the optimistic flag.
    pub async fn submit_validation(
        &mut self,
        outcome: ValidationOutcome,
    ) -> Result<SubmitResult, SyncError> {
        if !outcome.passed {
            let reason = outcome
                .reason
                .as_deref()
                .unwrap_or("Validation failed; location not recorded.");
            self.notifier.notify(reason, NotifyLevel::Error);
            return Ok(SubmitResult::NotPassed);
        }

        let location_id = outcome.location_id;
        let advance = match self.state.mark_found_optimistic(location_id) {
            Ok(advance) => advance,
            Err(err) => {
                self.notifier.notify(&err.to_string(), NotifyLevel::Error);
                return Err(err.into());
            }
        };
        self.persist()?;
        self.notifier.render_from_state(&self.state);
        if advance.completed && !advance.already_found {
            self.notifier.notify(COMPLETED_MESSAGE, NotifyLevel::Success);
        }

        let mode = outcome.mode;
        let needs_validation = outcome.needs_validation;
        let mutation = Mutation::LocationFound(LocationFound {
            game_id: self.state.game_id,
            team_id: self.state.team_id,
            location_id,
            method: mode,
            metadata: outcome.metadata,
            needs_validation,
        });
        let mut draft = UpdateDraft::new(mutation, self.core.clock.now_ms());
        if let Some(attachment) = outcome.attachment {
            draft = draft.with_attachment(attachment);
        }

        let dispatched = self.dispatch(draft).await?;
        match &dispatched {
            DispatchOutcome::Sent { .. } if needs_validation => {
                self.notifier
                    .notify(PENDING_VALIDATION_MESSAGE, NotifyLevel::Info);
            }
            DispatchOutcome::Sent { .. } => {
                self.state.confirm_found(location_id)?;
                self.persist()?;
                self.notifier.render_from_state(&self.state);
                self.notifier.notify(CONFIRMED_MESSAGE, NotifyLevel::Success);
            }
            DispatchOutcome::Queued { .. } => {
                self.notifier.notify(
                    &format!("Saved offline ({mode}), will sync when back online."),
                    NotifyLevel::Warning,
                );
            }
            DispatchOutcome::Rejected { .. } => {
                if self.state.drop_optimistic(location_id) {
                    self.persist()?;
                    self.notifier.render_from_state(&self.state);
                }
                self.notifier.notify(REJECTED_MESSAGE, NotifyLevel::Error);
            }
        }
        self.refresh_pending_indicator()?;
        Ok(SubmitResult::Dispatched(dispatched))
    }

    /// Move to another team in the same game. Progress restarts locally
    /// until the server sends the new team's record.
    pub async fn switch_team(&mut self, team_id: TeamId) -> Result<DispatchOutcome, SyncError> {
        let previous = self.state.clone();
        self.state.switch_team(team_id);
        self.persist()?;
        self.notifier.render_from_state(&self.state);

        let draft = UpdateDraft::new(
            Mutation::TeamSwitch(TeamSwitch { team_id }),
            self.core.clock.now_ms(),
        );
        let dispatched = self.dispatch(draft).await?;
        match &dispatched {
            DispatchOutcome::Sent { reply, .. } => {
                if let Some(progress) = ProgressReply::parse(reply) {
                    let message = progress
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("Switched to team {team_id}."));
                    self.state = progress.into_state();
                    self.persist()?;
                    self.notifier.render_from_state(&self.state);
                    self.notifier.notify(&message, NotifyLevel::Success);
                } else {
                    self.notifier
                        .notify(&format!("Switched to team {team_id}."), NotifyLevel::Success);
                }
            }
            DispatchOutcome::Queued { .. } => {
                self.notifier
                    .notify(TEAM_SWITCH_QUEUED_MESSAGE, NotifyLevel::Warning);
            }
            DispatchOutcome::Rejected { .. } => {
                self.state = previous;
                self.persist()?;
                self.notifier.render_from_state(&self.state);
                self.notifier
                    .notify("That team no longer exists on the server.", NotifyLevel::Error);
            }
        }
        self.refresh_pending_indicator()?;
        Ok(dispatched)
    }

    /// Ask to join a game, either on an existing team or a new one.
    pub async fn join_game(
        &mut self,
        game_id: GameId,
        target: JoinTarget,
    ) -> Result<DispatchOutcome, SyncError> {
        let requested_team = match &target {
            JoinTarget::Existing(team_id) => Some(*team_id),
            JoinTarget::NewTeam(_) => None,
        };
        let draft = UpdateDraft::new(
            Mutation::JoinGame(JoinGame { game_id, target }),
            self.core.clock.now_ms(),
        );
        let dispatched = self.dispatch(draft).await?;
        match &dispatched {
            DispatchOutcome::Sent { reply, .. } => {
                let reply = JoinReply::parse(reply);
                match reply.team_id.or(requested_team) {
                    Some(team_id) if reply.success => {
                        self.adopt_team(reply.game_id.unwrap_or(game_id), team_id)?;
                        let message = reply
                            .message
                            .unwrap_or_else(|| format!("Joined game {game_id}."));
                        self.notifier.notify(&message, NotifyLevel::Success);
                    }
                    _ => {
                        let message = reply
                            .message
                            .unwrap_or_else(|| "Could not join that game.".to_string());
                        self.notifier.notify(&message, NotifyLevel::Error);
                    }
                }
            }
            DispatchOutcome::Queued { .. } => {
                self.notifier.notify(JOIN_QUEUED_MESSAGE, NotifyLevel::Warning);
            }
            DispatchOutcome::Rejected { .. } => {
                self.notifier.notify(
                    "That game or team no longer exists on the server.",
                    NotifyLevel::Error,
                );
            }
        }
        self.refresh_pending_indicator()?;
        Ok(dispatched)
    }

    /// Point the replica at `team_id` in `game_id`, reusing a persisted
    /// replica of that game when one exists.
    fn adopt_team(&mut self, game_id: GameId, team_id: TeamId) -> Result<(), SyncError> {
        let mut next = if game_id == self.state.game_id {
            self.state.clone()
        } else {
            self.core
                .states
                .load(game_id)?
                .unwrap_or_else(|| GameState::new(game_id, team_id, &[]))
        };
        if next.team_id != team_id {
            next.switch_team(team_id);
        }
        self.state = next;
        self.persist()?;
        self.notifier.render_from_state(&self.state);
        Ok(())
    }

    /// React to a message from the background context.
    pub fn handle_message(&mut self, message: &ContextMessage) -> Result<(), SyncError> {
        match message {
            ContextMessage::UpdateSent {
                game_id,
                team_id,
                location_id: Some(location_id),
                pending_review: false,
                ..
            } => {
                let ours = *game_id == Some(self.state.game_id)
                    && *team_id == Some(self.state.team_id);
                let unconfirmed = self
                    .state
                    .location(*location_id)
                    .is_some_and(|loc| loc.local_only);
                if ours && unconfirmed {
                    self.state.confirm_found(*location_id)?;
                    self.persist()?;
                    self.notifier.render_from_state(&self.state);
                }
            }
            ContextMessage::UpdateRejected {
                location_id: Some(location_id),
                ..
            } => {
                if self.state.drop_optimistic(*location_id) {
                    self.persist()?;
                    self.notifier.render_from_state(&self.state);
                }
                self.notifier.notify(REJECTED_MESSAGE, NotifyLevel::Error);
            }
            ContextMessage::UpdateSent { .. }
            | ContextMessage::UpdateRejected { .. }
            | ContextMessage::DrainFinished { .. } => {}
        }
        self.refresh_pending_indicator()?;
        Ok(())
    }

    /// Push the count of queued entries for this game and team to the view.
    pub fn refresh_pending_indicator(&self) -> Result<usize, SyncError> {
        let count = self.core.pending_for(&self.state)?;
        self.notifier.update_pending_indicator(count);
        Ok(count)
    }

    async fn dispatch(&self, draft: UpdateDraft) -> Result<DispatchOutcome, SyncError> {
        match self.dispatcher.send_or_queue(draft, self.online).await {
            Err(err) if err.is_storage() => {
                self.notifier.notify(
                    &format!("Could not save update offline: {err}"),
                    NotifyLevel::Error,
                );
                Err(err)
            }
            other => other,
        }
    }

    fn persist(&self) -> Result<(), SyncError> {
        self.core.states.save(&self.state).map_err(|err| {
            tracing::error!(game_id = %self.state.game_id, error = %err, "Could not persist game state");
            self.notifier
                .notify(STORAGE_FAILURE_MESSAGE, NotifyLevel::Error);
            SyncError::from(err)
        })
    }

    async fn handle_command(&mut self, command: PageCommand) -> Result<(), SyncError> {
        match command {
            PageCommand::Submit(outcome) => {
                self.submit_validation(outcome).await?;
            }
            PageCommand::SwitchTeam(team_id) => {
                self.switch_team(team_id).await?;
            }
            PageCommand::JoinGame { game_id, target } => {
                self.join_game(game_id, target).await?;
            }
            PageCommand::Sync => {
                self.sync(SyncTrigger::UserRequest).await?;
            }
        }
        Ok(())
    }

    /// Event loop for an open page. Returns the replica once the command
    /// channel closes.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PageCommand>,
        mut connectivity: watch::Receiver<bool>,
        mut messages: broadcast::Receiver<ContextMessage>,
    ) -> GameState {
        self.online = *connectivity.borrow_and_update();
        if let Err(err) = self.start().await {
            tracing::error!(error = %err, "Startup sync failed");
        }

        let mut connectivity_open = true;
        let mut messages_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if let Err(err) = self.handle_command(command).await {
                        tracing::error!(error = %err, "Page action failed");
                    }
                }
                changed = connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    let online = *connectivity.borrow_and_update();
                    if let Err(err) = self.set_online(online).await {
                        tracing::error!(error = %err, "Reconnect sync failed");
                    }
                }
                message = messages.recv(), if messages_open => {
                    let handled = match message {
                        Ok(message) => self.handle_message(&message),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed background messages; refreshing");
                            self.refresh_pending_indicator().map(|_| ())
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            messages_open = false;
                            Ok(())
                        }
                    };
                    if let Err(err) = handled {
                        tracing::error!(error = %err, "Could not apply background message");
                    }
                }
            }
        }
        self.state
    }
}
