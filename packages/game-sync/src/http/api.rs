use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::protocol::game_state::GameSnapshotResponse;
use crate::sync::state::MutationAction;

/// Short-lived credential for the realtime handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsToken {
    pub token: String,
    pub expires_in: i64,
}

/// Result of a conditional snapshot fetch.
#[derive(Debug, Clone)]
pub enum SnapshotFetch {
    Modified {
        response: GameSnapshotResponse,
        /// `ETag` header exactly as the server sent it.
        etag: Option<String>,
    },
    NotModified,
}

/// A player action plus the version the client believed was current.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationRequest {
    #[serde(flatten)]
    pub action: MutationAction,
    pub lock_version: i32,
}

/// The backend endpoints the sync layer consumes.
///
/// Implementations must be cheap to call concurrently; the sync layer never
/// holds a lock across any of these calls.
#[async_trait]
pub trait GameApi: Send + Sync + 'static {
    async fn issue_ws_token(&self) -> Result<WsToken, SyncError>;

    async fn fetch_snapshot(
        &self,
        game_id: i64,
        if_none_match: Option<&str>,
    ) -> Result<SnapshotFetch, SyncError>;

    async fn submit(&self, game_id: i64, request: &MutationRequest) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cards::Trump;

    #[test]
    fn mutation_body_flattens_action() {
        let body = serde_json::to_value(MutationRequest {
            action: MutationAction::Bid { bid: 3 },
            lock_version: 7,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "bid": 3, "lock_version": 7 }));

        let body = serde_json::to_value(MutationRequest {
            action: MutationAction::Trump {
                trump: Trump::NoTrumps,
            },
            lock_version: 2,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "trump": "NO_TRUMPS", "lock_version": 2 })
        );

        let body = serde_json::to_value(MutationRequest {
            action: MutationAction::Play {
                card: "QH".parse().unwrap(),
            },
            lock_version: 11,
        })
        .unwrap();
        assert_eq!(body["card"], "QH");
    }
}
