//! Client-side reconciliation of game state from push, refresh, and local actions.

pub mod engine;
pub mod error_state;
pub mod mutation;
pub mod refresh;
pub mod speculative;
pub mod state;

pub use engine::ReconciliationEngine;
pub use error_state::{ErrorSlot, ErrorSource, ErrorState};
pub use mutation::{MutationCoordinator, MutationReceipt};
pub use refresh::{RefreshCoordinator, RefreshHandle, RefreshOutcome};
pub use state::{
    ApplyOutcome, AuthoritativeUpdate, GameRoomState, MutationAction, MutationKind, Provenance,
    UpdateSource,
};
