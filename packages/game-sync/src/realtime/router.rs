//! Keeps the server-side subscription in step with the displayed game.
//!
//! The server forgets subscriptions when a socket drops, so the router
//! remembers the most recently requested game and reasserts it on every
//! handshake. Pushes are only accepted for the game subscribed on the current
//! connection generation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::ws::{ClientMsg, Topic};
use crate::realtime::connection::{ConnectedInfo, ConnectionManager, ConnectionState, Registration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub game_id: i64,
    /// Connection generation the subscribe was sent on.
    pub generation: u64,
}

#[derive(Default)]
struct RouterState {
    desired: Option<i64>,
    active: Option<ActiveSubscription>,
}

struct RouterInner {
    conn: ConnectionManager,
    state: Mutex<RouterState>,
    registration: Mutex<Option<Registration>>,
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.get_mut().take() {
            registration.unregister();
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionRouter {
    inner: Arc<RouterInner>,
}

impl SubscriptionRouter {
    pub fn new(conn: ConnectionManager) -> Self {
        let inner = Arc::new(RouterInner {
            conn: conn.clone(),
            state: Mutex::new(RouterState::default()),
            registration: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner);
        let registration = conn.on_connected(move |info| {
            if let Some(inner) = weak.upgrade() {
                inner.resubscribe(info);
            }
        });
        *inner.registration.lock() = Some(registration);
        Self { inner }
    }

    /// Subscribe to `game_id`, replacing any other subscription.
    ///
    /// While not connected the request is remembered and sent on the next
    /// handshake. Re-subscribing to the game already active on this
    /// connection sends nothing.
    pub fn subscribe(&self, game_id: i64) {
        let conn = &self.inner.conn;
        let mut state = self.inner.state.lock();
        let current = state
            .active
            .filter(|a| conn.state() == ConnectionState::Connected && a.generation == conn.generation());

        if state.desired == Some(game_id) && current.is_some_and(|a| a.game_id == game_id) {
            debug!(game_id, "[SUBSCRIPTIONS] already subscribed");
            return;
        }
        state.desired = Some(game_id);

        if conn.state() != ConnectionState::Connected {
            state.active = None;
            debug!(game_id, "[SUBSCRIPTIONS] not connected, subscribe deferred");
            return;
        }

        if let Some(previous) = current.filter(|a| a.game_id != game_id) {
            let msg = ClientMsg::Unsubscribe {
                topic: Topic::game(previous.game_id),
            };
            if let Err(err) = conn.send(msg) {
                warn!(game_id = previous.game_id, error = %err, "[SUBSCRIPTIONS] unsubscribe not sent");
            }
        }

        state.active = None;
        match conn.send(ClientMsg::Subscribe {
            topic: Topic::game(game_id),
        }) {
            Ok(generation) => {
                info!(game_id, generation, "[SUBSCRIPTIONS] subscribed");
                state.active = Some(ActiveSubscription {
                    game_id,
                    generation,
                });
            }
            Err(err) => {
                // Connection dropped between the state check and the send;
                // the next handshake resubscribes.
                debug!(game_id, error = %err, "[SUBSCRIPTIONS] subscribe deferred");
            }
        }
    }

    /// Unsubscribe and forget the requested game.
    pub fn unsubscribe(&self) {
        let conn = &self.inner.conn;
        let mut state = self.inner.state.lock();
        state.desired = None;
        let Some(active) = state.active.take() else {
            return;
        };
        if active.generation != conn.generation() {
            return;
        }
        match conn.send(ClientMsg::Unsubscribe {
            topic: Topic::game(active.game_id),
        }) {
            Ok(_) => info!(game_id = active.game_id, "[SUBSCRIPTIONS] unsubscribed"),
            Err(err) => {
                debug!(game_id = active.game_id, error = %err, "[SUBSCRIPTIONS] unsubscribe not sent")
            }
        }
    }

    /// Whether a push for `topic` belongs to the subscription on the current
    /// connection.
    pub fn accepts(&self, topic: &Topic) -> bool {
        let generation = self.inner.conn.generation();
        let state = self.inner.state.lock();
        state.active.is_some_and(|a| {
            a.game_id == topic.game_id()
                && a.generation == generation
                && state.desired == Some(a.game_id)
        })
    }

    pub fn desired(&self) -> Option<i64> {
        self.inner.state.lock().desired
    }

    pub fn active(&self) -> Option<ActiveSubscription> {
        self.inner.state.lock().active
    }
}

impl RouterInner {
    fn resubscribe(&self, info: &ConnectedInfo) {
        let mut state = self.state.lock();
        state.active = None;
        let Some(game_id) = state.desired else {
            return;
        };
        match self.conn.send(ClientMsg::Subscribe {
            topic: Topic::game(game_id),
        }) {
            Ok(generation) => {
                info!(game_id, generation, "[SUBSCRIPTIONS] resubscribed after handshake");
                state.active = Some(ActiveSubscription {
                    game_id,
                    generation,
                });
            }
            Err(err) => {
                warn!(
                    game_id,
                    generation = info.generation,
                    error = %err,
                    "[SUBSCRIPTIONS] resubscribe failed"
                );
            }
        }
    }
}
