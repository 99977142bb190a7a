//! Core domain types for waypoint.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from either execution context.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
mod mutation;
mod outcome;
mod pending;
mod state;

pub use ids::{GameId, LocationId, TeamId, UpdateId};
pub use mutation::{
    Attachment, HttpMethod, JoinGame, JoinTarget, LocationFound, Mutation, MutationError,
    MutationKind, TeamSwitch, ValidationMode,
};
pub use outcome::{NotifyLevel, ValidationOutcome};
pub use pending::{PendingUpdate, QueueRecord, UpdateDraft, generate_request_key};
pub use state::{
    Advance, GameState, LocationFlag, LocationProgress, ServerSnapshot, StateError,
};
