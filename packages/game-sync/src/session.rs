//! One player's live view of one game at a time.
//!
//! `GameSession` wires the connection manager, subscription router,
//! reconciliation engine and the mutation/refresh coordinators together, and
//! is the type applications hold.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::domain::cards::{Card, Trump};
use crate::error::SyncError;
use crate::http::api::GameApi;
use crate::protocol::ws::{ErrorCode, ServerMsg};
use crate::realtime::connection::{ConnectionManager, ConnectionState, Registration};
use crate::realtime::router::SubscriptionRouter;
use crate::sync::engine::ReconciliationEngine;
use crate::sync::error_state::{ErrorSlot, ErrorSource, ErrorState};
use crate::sync::mutation::{MutationCoordinator, MutationReceipt};
use crate::sync::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::sync::state::{AuthoritativeUpdate, GameRoomState, MutationAction, MutationKind};
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 64;

/// Out-of-band notifications for the application.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    YourTurn { game_id: i64, version: i32 },
    LongWaitInvalidated { game_id: i64 },
    /// A push-channel error was masked by a successful refresh.
    PushErrorRecovered { game_id: i64, code: ErrorCode },
    /// A push-channel error whose follow-up refresh also failed.
    PushErrorSurfaced(ErrorState),
}

/// Everything the inbound message handler needs, cloned into the closure.
#[derive(Clone)]
struct PushContext {
    router: SubscriptionRouter,
    engine: ReconciliationEngine,
    refresh: RefreshCoordinator,
    errors: ErrorSlot,
    events: broadcast::Sender<SyncEvent>,
}

impl PushContext {
    fn handle(&self, msg: &ServerMsg) -> Result<(), SyncError> {
        match msg {
            ServerMsg::GameState {
                topic,
                version,
                game,
                viewer,
            } => {
                if !self.router.accepts(topic) {
                    debug!(
                        game_id = topic.game_id(),
                        version, "[RECONCILE] push for unsubscribed topic dropped"
                    );
                    return Ok(());
                }
                self.engine.apply_authoritative(
                    topic.game_id(),
                    AuthoritativeUpdate::from_push(*version, game.clone(), viewer.clone()),
                );
            }
            ServerMsg::YourTurn { game_id, version } => {
                self.emit(SyncEvent::YourTurn {
                    game_id: *game_id,
                    version: *version,
                });
            }
            ServerMsg::LongWaitInvalidated { game_id } => {
                self.emit(SyncEvent::LongWaitInvalidated { game_id: *game_id });
            }
            ServerMsg::Error { code, message } => self.on_push_error(*code, message.clone()),
            ServerMsg::Ack { command, topic } => {
                debug!(command = %command, topic = ?topic, "[SUBSCRIPTIONS] server ack");
            }
            ServerMsg::HelloAck { .. } => {}
        }
        Ok(())
    }

    /// Confirm a push error over HTTP before showing it.
    fn on_push_error(&self, code: ErrorCode, message: String) {
        let Some(game_id) = self.engine.displayed() else {
            let state = ErrorState::new(message, ErrorSource::Websocket);
            self.errors.set(state.clone());
            self.emit(SyncEvent::PushErrorSurfaced(state));
            return;
        };

        warn!(game_id, code = code.as_str(), message = %message, "[REFRESH] push error, confirming over http");
        let refresh = self.refresh.refresh(game_id);
        let ctx = self.clone();
        tokio::spawn(async move {
            match refresh.await {
                RefreshOutcome::Failed(err) => {
                    let state = ErrorState {
                        message,
                        trace_id: err.trace_id().map(str::to_string),
                        source: ErrorSource::Websocket,
                    };
                    if ctx.engine.displayed() == Some(game_id) {
                        ctx.errors.set(state.clone());
                    }
                    ctx.emit(SyncEvent::PushErrorSurfaced(state));
                }
                _ => {
                    info!(game_id, code = code.as_str(), "[REFRESH] push error masked by refresh");
                    ctx.emit(SyncEvent::PushErrorRecovered { game_id, code });
                }
            }
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

pub struct GameSession {
    config: SyncConfig,
    conn: ConnectionManager,
    router: SubscriptionRouter,
    engine: ReconciliationEngine,
    refresh: RefreshCoordinator,
    mutations: MutationCoordinator,
    errors: ErrorSlot,
    events: broadcast::Sender<SyncEvent>,
    handler: Option<Registration>,
}

impl GameSession {
    pub fn new(config: SyncConfig, api: Arc<dyn GameApi>, transport: Arc<dyn Transport>) -> Self {
        let errors = ErrorSlot::new();
        let engine = ReconciliationEngine::new();
        let conn = ConnectionManager::new(
            config.clone(),
            transport,
            Arc::clone(&api),
            errors.clone(),
        );
        let router = SubscriptionRouter::new(conn.clone());
        let refresh = RefreshCoordinator::new(
            Arc::clone(&api),
            engine.clone(),
            errors.clone(),
            config.slow_sync_threshold,
        );
        let mutations = MutationCoordinator::new(api, engine.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let ctx = PushContext {
            router: router.clone(),
            engine: engine.clone(),
            refresh: refresh.clone(),
            errors: errors.clone(),
            events: events.clone(),
        };
        let handler = conn.register_handler(move |msg| ctx.handle(msg));

        Self {
            config,
            conn,
            router,
            engine,
            refresh,
            mutations,
            errors,
            events,
            handler: Some(handler),
        }
    }

    /// Start the realtime connection if it is not already running.
    pub fn connect(&self) {
        self.conn.connect();
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
    }

    /// Display `game_id`: subscribe to its pushes and load its snapshot.
    pub async fn open_game(&self, game_id: i64) -> Result<GameRoomState, SyncError> {
        self.conn.connect();
        self.engine.display(game_id);
        self.router.subscribe(game_id);

        match self.refresh.refresh(game_id).await {
            RefreshOutcome::Failed(err) => Err(err),
            RefreshOutcome::Updated(_) | RefreshOutcome::NotModified => self
                .engine
                .get_current_state(game_id)
                .ok_or(SyncError::NoState { game_id }),
        }
    }

    /// Stop displaying the current game. Work still in flight for it becomes a no-op.
    pub fn close_game(&self) {
        self.router.unsubscribe();
        self.engine.clear();
    }

    /// Refresh the displayed game over HTTP, joining any refresh in flight.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        let game_id = self.engine.displayed().ok_or(SyncError::NoGameOpen)?;
        Ok(self.refresh.refresh(game_id).await)
    }

    pub async fn submit(&self, action: MutationAction) -> Result<MutationReceipt, SyncError> {
        let game_id = self.engine.displayed().ok_or(SyncError::NoGameOpen)?;
        let receipt = self.mutations.submit(game_id, action).await?;
        self.await_confirmation(receipt);
        Ok(receipt)
    }

    pub async fn bid(&self, bid: u8) -> Result<MutationReceipt, SyncError> {
        self.submit(MutationAction::Bid { bid }).await
    }

    pub async fn select_trump(&self, trump: Trump) -> Result<MutationReceipt, SyncError> {
        self.submit(MutationAction::Trump { trump }).await
    }

    pub async fn play(&self, card: Card) -> Result<MutationReceipt, SyncError> {
        self.submit(MutationAction::Play { card }).await
    }

    pub async fn set_ready(&self, is_ready: bool) -> Result<MutationReceipt, SyncError> {
        self.submit(MutationAction::Ready { is_ready }).await
    }

    /// Flip the viewer's ready flag as currently displayed.
    pub async fn toggle_ready(&self) -> Result<MutationReceipt, SyncError> {
        let game_id = self.engine.displayed().ok_or(SyncError::NoGameOpen)?;
        let state = self
            .engine
            .get_current_state(game_id)
            .ok_or(SyncError::NoState { game_id })?;
        let seat = state.viewer_seat.ok_or_else(|| SyncError::Speculative {
            kind: MutationKind::Ready,
            detail: "viewer has no seat in this game".to_string(),
        })?;
        let is_ready = state
            .snapshot
            .game
            .seating
            .get(usize::from(seat))
            .is_some_and(|s| s.is_ready);
        self.set_ready(!is_ready).await
    }

    /// If the push confirming `receipt` has not arrived within the confirm
    /// window, refresh; if even that leaves the speculative state showing, the
    /// server did not apply the action and the speculation is rolled back.
    fn await_confirmation(&self, receipt: MutationReceipt) {
        let engine = self.engine.clone();
        let refresh = self.refresh.clone();
        let window = self.config.mutation_confirm_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if !engine.is_speculative_at(receipt.game_id, receipt.base_version) {
                return;
            }
            info!(
                game_id = receipt.game_id,
                kind = receipt.kind.as_str(),
                base_version = receipt.base_version,
                "[MUTATION] unconfirmed after window, refreshing"
            );
            let outcome = refresh.refresh(receipt.game_id).await;
            if outcome.is_ok()
                && engine.is_speculative_at(receipt.game_id, receipt.base_version)
                && engine.rollback_speculative(receipt.game_id)
            {
                warn!(
                    game_id = receipt.game_id,
                    kind = receipt.kind.as_str(),
                    "[MUTATION] server state does not reflect action, rolled back"
                );
            }
        });
    }

    pub fn displayed_game(&self) -> Option<i64> {
        self.engine.displayed()
    }

    pub fn state(&self) -> Option<GameRoomState> {
        let game_id = self.engine.displayed()?;
        self.engine.get_current_state(game_id)
    }

    pub fn watch_state(&self) -> watch::Receiver<Option<Arc<GameRoomState>>> {
        self.engine.watch()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.conn.watch_state()
    }

    pub fn current_error(&self) -> Option<ErrorState> {
        self.errors.current()
    }

    pub fn watch_errors(&self) -> watch::Receiver<Option<ErrorState>> {
        self.errors.subscribe()
    }

    pub fn slow_sync(&self) -> watch::Receiver<bool> {
        self.refresh.slow_sync()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_pending(&self, kind: MutationKind) -> bool {
        self.engine
            .displayed()
            .is_some_and(|game_id| self.mutations.is_pending(game_id, kind))
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.unregister();
        }
        self.conn.disconnect();
    }
}
