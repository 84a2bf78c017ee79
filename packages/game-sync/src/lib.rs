#![deny(clippy::wildcard_imports)]
#![cfg_attr(test, allow(clippy::wildcard_imports))]

//! Client-side realtime sync for Nommie games.
//!
//! Keeps one player's view of one game consistent across the realtime push
//! channel, HTTP snapshot refreshes and the player's own optimistic actions.

pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod protocol;
pub mod realtime;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::{BackoffPolicy, SyncConfig};
pub use error::{ProblemDetails, SyncError};
pub use http::{GameApi, HttpGameApi, MutationRequest, SnapshotFetch, WsToken};
pub use realtime::{ConnectedInfo, ConnectionManager, ConnectionState, SubscriptionRouter};
pub use session::{GameSession, SyncEvent};
pub use sync::{
    ApplyOutcome, AuthoritativeUpdate, ErrorSlot, ErrorSource, ErrorState, GameRoomState,
    MutationAction, MutationCoordinator, MutationKind, MutationReceipt, Provenance,
    ReconciliationEngine, RefreshCoordinator, RefreshOutcome,
};
pub use transport::{Frame, Transport, TransportConn, TungsteniteTransport};

// Auto-initialize logging for unit tests
#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    sync_test_support::logging::init();
}
