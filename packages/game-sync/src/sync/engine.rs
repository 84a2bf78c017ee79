//! Single owner of the displayed game's reconciled state.
//!
//! Every write goes through this module: authoritative updates (initial load,
//! push, refresh) via [`ReconciliationEngine::apply_authoritative`] and
//! speculative writes via [`ReconciliationEngine::speculate`]. Readers get
//! cloned snapshots or a watch receiver.
//!
//! Ordering rule: an update whose version is lower than the stored version is
//! dropped whole. Equal or higher versions replace the stored state entirely,
//! which also retires any optimistic state at that version.

use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::snapshot::GameSnapshot;
use crate::error::SyncError;
use crate::sync::state::{
    ApplyOutcome, AuthoritativeUpdate, GameRoomState, Provenance, UpdateSource,
};

#[derive(Default)]
struct EngineState {
    displayed: Option<i64>,
    current: Option<GameRoomState>,
    /// Last accepted authoritative state, the rollback target for speculative writes.
    confirmed: Option<GameRoomState>,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    state: Arc<Mutex<EngineState>>,
    tx: Arc<watch::Sender<Option<Arc<GameRoomState>>>>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            tx: Arc::new(tx),
        }
    }

    /// Make `game_id` the displayed resource. Switching games drops the
    /// previous game's state; re-displaying the same game keeps it.
    pub fn display(&self, game_id: i64) {
        let mut state = self.state.lock();
        if state.displayed == Some(game_id) {
            return;
        }
        *state = EngineState {
            displayed: Some(game_id),
            ..EngineState::default()
        };
        self.publish(&state);
    }

    /// Drop the displayed resource. Later updates for it become no-ops.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = EngineState::default();
        self.publish(&state);
    }

    pub fn displayed(&self) -> Option<i64> {
        self.state.lock().displayed
    }

    pub fn get_current_state(&self, game_id: i64) -> Option<GameRoomState> {
        let state = self.state.lock();
        if state.displayed != Some(game_id) {
            return None;
        }
        state.current.clone()
    }

    /// ETag to send on the next conditional fetch for `game_id`.
    pub fn etag(&self, game_id: i64) -> Option<String> {
        let state = self.state.lock();
        if state.displayed != Some(game_id) {
            return None;
        }
        state.current.as_ref().and_then(|s| s.etag.clone())
    }

    pub fn watch(&self) -> watch::Receiver<Option<Arc<GameRoomState>>> {
        self.tx.subscribe()
    }

    pub fn apply_authoritative(&self, game_id: i64, update: AuthoritativeUpdate) -> ApplyOutcome {
        let mut state = self.state.lock();

        if state.displayed != Some(game_id) {
            debug!(game_id, version = update.version, "[RECONCILE] update for non-displayed game ignored");
            return ApplyOutcome::IgnoredOtherResource;
        }

        let (outcome, previous_etag) = match &state.current {
            None => (ApplyOutcome::Initialized, None),
            Some(current) if update.version < current.version => {
                debug!(
                    game_id,
                    incoming = update.version,
                    stored = current.version,
                    source = update.provenance().as_str(),
                    "[RECONCILE] stale update dropped"
                );
                return ApplyOutcome::IgnoredStale;
            }
            Some(current) if current.provenance == Provenance::Optimistic => {
                (ApplyOutcome::Superseded, current.etag.clone())
            }
            Some(current) => (ApplyOutcome::Replaced, current.etag.clone()),
        };

        let provenance = update.provenance();
        let etag = match update.source {
            UpdateSource::Http { etag } => etag.or(previous_etag),
            UpdateSource::Websocket => previous_etag,
        };

        let next = GameRoomState {
            game_id,
            version: update.version,
            viewer_seat: update.viewer.seat,
            viewer_hand: update.viewer.parsed_hand(),
            bid_constraints: update.viewer.bid_constraints,
            snapshot: update.snapshot,
            provenance,
            received_at: OffsetDateTime::now_utc(),
            etag,
        };

        info!(
            game_id,
            version = next.version,
            source = provenance.as_str(),
            outcome = ?outcome,
            "[RECONCILE] applied authoritative update"
        );

        state.confirmed = Some(next.clone());
        state.current = Some(next);
        self.publish(&state);
        outcome
    }

    /// Write a speculative successor of the current state, tagged optimistic,
    /// at the *same* version. Returns the version the speculation was based on.
    pub fn speculate<F>(&self, game_id: i64, transform: F) -> Result<i32, SyncError>
    where
        F: FnOnce(&GameRoomState) -> Result<GameSnapshot, SyncError>,
    {
        let mut state = self.state.lock();
        if state.displayed != Some(game_id) {
            return Err(SyncError::NoState { game_id });
        }
        let current = state
            .current
            .as_ref()
            .ok_or(SyncError::NoState { game_id })?;

        let snapshot = transform(current)?;
        let next = GameRoomState {
            snapshot,
            provenance: Provenance::Optimistic,
            received_at: OffsetDateTime::now_utc(),
            ..current.clone()
        };
        let base_version = next.version;

        debug!(game_id, base_version, "[RECONCILE] speculative write");
        state.current = Some(next);
        self.publish(&state);
        Ok(base_version)
    }

    /// Revert to the last authoritative state if a speculative write is still
    /// showing. Returns whether anything changed.
    pub fn rollback_speculative(&self, game_id: i64) -> bool {
        let mut state = self.state.lock();
        if state.displayed != Some(game_id) {
            return false;
        }
        let showing_optimistic = state
            .current
            .as_ref()
            .is_some_and(|s| s.provenance == Provenance::Optimistic);
        if !showing_optimistic {
            return false;
        }

        info!(game_id, "[RECONCILE] rolling back speculative state");
        state.current = state.confirmed.clone();
        self.publish(&state);
        true
    }

    /// Whether `game_id` still shows an optimistic state based on `base_version`.
    pub fn is_speculative_at(&self, game_id: i64, base_version: i32) -> bool {
        let state = self.state.lock();
        state.displayed == Some(game_id)
            && state.current.as_ref().is_some_and(|s| {
                s.provenance == Provenance::Optimistic && s.version == base_version
            })
    }

    fn publish(&self, state: &EngineState) {
        self.tx
            .send_replace(state.current.clone().map(Arc::new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{GameHeader, PhaseSnapshot, SeatPublic};
    use crate::protocol::game_state::ViewerState;

    fn snapshot(round_no: u8) -> GameSnapshot {
        GameSnapshot {
            game: GameHeader {
                round_no,
                dealer: 0,
                seating: [
                    SeatPublic::empty(0),
                    SeatPublic::empty(1),
                    SeatPublic::empty(2),
                    SeatPublic::empty(3),
                ],
                scores_total: [0; 4],
                host_seat: 0,
            },
            phase: PhaseSnapshot::Init,
        }
    }

    fn http(version: i32, etag: &str) -> AuthoritativeUpdate {
        AuthoritativeUpdate {
            version,
            snapshot: snapshot(version as u8),
            viewer: ViewerState::default(),
            source: UpdateSource::Http {
                etag: Some(etag.to_string()),
            },
        }
    }

    fn push(version: i32) -> AuthoritativeUpdate {
        AuthoritativeUpdate::from_push(version, snapshot(version as u8), ViewerState::default())
    }

    #[test]
    fn ignores_updates_for_other_games() {
        let engine = ReconciliationEngine::new();
        assert_eq!(
            engine.apply_authoritative(1, push(1)),
            ApplyOutcome::IgnoredOtherResource
        );
        engine.display(2);
        assert_eq!(
            engine.apply_authoritative(1, push(1)),
            ApplyOutcome::IgnoredOtherResource
        );
        assert!(engine.get_current_state(2).is_none());
    }

    #[test]
    fn push_keeps_http_etag() {
        let engine = ReconciliationEngine::new();
        engine.display(42);
        engine.apply_authoritative(42, http(1, r#""game-42-v1""#));
        assert_eq!(engine.apply_authoritative(42, push(2)), ApplyOutcome::Replaced);

        let state = engine.get_current_state(42).unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.provenance, Provenance::Websocket);
        assert_eq!(state.etag.as_deref(), Some(r#""game-42-v1""#));
    }

    #[test]
    fn stale_update_leaves_state_untouched() {
        let engine = ReconciliationEngine::new();
        engine.display(42);
        engine.apply_authoritative(42, push(3));
        let before = engine.get_current_state(42).unwrap();

        assert_eq!(
            engine.apply_authoritative(42, http(2, r#""game-42-v2""#)),
            ApplyOutcome::IgnoredStale
        );
        assert_eq!(engine.get_current_state(42).unwrap(), before);
        assert_eq!(engine.etag(42), None);
    }

    #[test]
    fn speculation_keeps_version_and_rolls_back() {
        let engine = ReconciliationEngine::new();
        engine.display(7);
        engine.apply_authoritative(7, push(4));

        let base = engine
            .speculate(7, |current| {
                let mut next = current.snapshot.clone();
                next.game.round_no = 99;
                Ok(next)
            })
            .unwrap();
        assert_eq!(base, 4);
        let speculative = engine.get_current_state(7).unwrap();
        assert_eq!(speculative.version, 4);
        assert_eq!(speculative.provenance, Provenance::Optimistic);
        assert!(engine.is_speculative_at(7, 4));

        assert!(engine.rollback_speculative(7));
        let restored = engine.get_current_state(7).unwrap();
        assert_eq!(restored.provenance, Provenance::Websocket);
        assert_eq!(restored.snapshot.game.round_no, 4);
        assert!(!engine.rollback_speculative(7));
    }

    #[test]
    fn speculate_without_state_is_rejected() {
        let engine = ReconciliationEngine::new();
        engine.display(7);
        let err = engine.speculate(7, |c| Ok(c.snapshot.clone())).unwrap_err();
        assert!(matches!(err, SyncError::NoState { game_id: 7 }));
    }

    #[test]
    fn watchers_see_every_accepted_write() {
        let engine = ReconciliationEngine::new();
        let mut rx = engine.watch();
        engine.display(1);
        engine.apply_authoritative(1, push(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|s| s.version), Some(1));

        engine.apply_authoritative(1, push(0));
        assert!(!rx.has_changed().unwrap());
    }
}
