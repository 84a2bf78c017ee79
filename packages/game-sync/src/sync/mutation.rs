//! Single-flight submission of player actions with optimistic display.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::http::api::{GameApi, MutationRequest};
use crate::sync::engine::ReconciliationEngine;
use crate::sync::speculative;
use crate::sync::state::{MutationAction, MutationKind};

type PendingSet = Arc<Mutex<HashSet<(i64, MutationKind)>>>;

/// Outcome of a submission the server accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationReceipt {
    pub game_id: i64,
    pub kind: MutationKind,
    /// Version the speculative write was based on and sent as `lock_version`.
    pub base_version: i32,
}

/// Marks `(game_id, kind)` as in flight until dropped.
struct PendingGuard {
    pending: PendingSet,
    key: (i64, MutationKind),
}

impl PendingGuard {
    fn acquire(pending: &PendingSet, game_id: i64, kind: MutationKind) -> Result<Self, SyncError> {
        let key = (game_id, kind);
        if !pending.lock().insert(key) {
            return Err(SyncError::MutationInFlight { kind, game_id });
        }
        Ok(Self {
            pending: Arc::clone(pending),
            key,
        })
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

/// Undoes a speculative write if the submission is dropped before the server
/// answered, since no confirmation window will follow it.
struct Speculation<'a> {
    engine: &'a ReconciliationEngine,
    game_id: i64,
    kind: MutationKind,
    answered: bool,
}

impl Drop for Speculation<'_> {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        if self.engine.rollback_speculative(self.game_id) {
            warn!(
                game_id = self.game_id,
                kind = self.kind.as_str(),
                "[MUTATION] submission abandoned before a response, rolled back"
            );
        }
    }
}

#[derive(Clone)]
pub struct MutationCoordinator {
    api: Arc<dyn GameApi>,
    engine: ReconciliationEngine,
    pending: PendingSet,
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn GameApi>, engine: ReconciliationEngine) -> Self {
        Self {
            api,
            engine,
            pending: Arc::default(),
        }
    }

    pub fn is_pending(&self, game_id: i64, kind: MutationKind) -> bool {
        self.pending.lock().contains(&(game_id, kind))
    }

    /// Show `action` optimistically and submit it.
    ///
    /// A second submission of the same kind for the same game while the first
    /// is outstanding fails with [`SyncError::MutationInFlight`] and has no
    /// effect. On failure, or if the returned future is dropped before the
    /// server answers, the speculative write is rolled back. There is no
    /// automatic retry.
    pub async fn submit(
        &self,
        game_id: i64,
        action: MutationAction,
    ) -> Result<MutationReceipt, SyncError> {
        let kind = action.kind();
        let _guard = PendingGuard::acquire(&self.pending, game_id, kind)?;

        let base_version = self
            .engine
            .speculate(game_id, |current| speculative::apply(current, &action))?;
        let mut speculation = Speculation {
            engine: &self.engine,
            game_id,
            kind,
            answered: false,
        };

        let request = MutationRequest {
            action,
            lock_version: base_version,
        };
        info!(game_id, kind = kind.as_str(), base_version, "[MUTATION] submitting");

        let response = self.api.submit(game_id, &request).await;
        speculation.answered = true;

        match response {
            Ok(()) => Ok(MutationReceipt {
                game_id,
                kind,
                base_version,
            }),
            Err(err) => {
                let rolled_back = self.engine.rollback_speculative(game_id);
                warn!(
                    game_id,
                    kind = kind.as_str(),
                    code = %err.code(),
                    error = %err,
                    rolled_back,
                    "[MUTATION] submission failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let pending: PendingSet = Arc::default();
        let guard = PendingGuard::acquire(&pending, 1, MutationKind::Bid).unwrap();
        assert!(matches!(
            PendingGuard::acquire(&pending, 1, MutationKind::Bid),
            Err(SyncError::MutationInFlight { .. })
        ));
        // different kind or game is independent
        let _other_kind = PendingGuard::acquire(&pending, 1, MutationKind::Play).unwrap();
        let _other_game = PendingGuard::acquire(&pending, 2, MutationKind::Bid).unwrap();

        drop(guard);
        assert!(PendingGuard::acquire(&pending, 1, MutationKind::Bid).is_ok());
    }
}
