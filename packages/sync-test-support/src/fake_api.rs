//! Scripted stand-in for the backend HTTP API.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use game_sync::http::api::{GameApi, MutationRequest, SnapshotFetch, WsToken};
use game_sync::SyncError;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

#[derive(Default)]
struct Script {
    tokens: VecDeque<Result<WsToken, SyncError>>,
    snapshots: VecDeque<Result<SnapshotFetch, SyncError>>,
    submits: VecDeque<Result<(), SyncError>>,
    token_calls: usize,
    snapshot_requests: Vec<(i64, Option<String>)>,
    submissions: Vec<(i64, MutationRequest)>,
    hang_tokens: bool,
}

/// Holds requests until released.
#[derive(Clone)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
}

impl Gate {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let `n` held (or future) requests through.
    pub fn release(&self, n: usize) {
        self.semaphore.add_permits(n);
    }

    async fn pass(&self) {
        self.semaphore
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }
}

/// Responses are consumed in order. With nothing scripted, tokens succeed,
/// submissions succeed and snapshot fetches fail.
#[derive(Default)]
pub struct FakeGameApi {
    script: Mutex<Script>,
    snapshot_gate: Mutex<Option<Gate>>,
    submit_gate: Mutex<Option<Gate>>,
}

impl FakeGameApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_token(&self, result: Result<WsToken, SyncError>) {
        self.script.lock().tokens.push_back(result);
    }

    pub fn push_snapshot(&self, result: Result<SnapshotFetch, SyncError>) {
        self.script.lock().snapshots.push_back(result);
    }

    pub fn push_submit(&self, result: Result<(), SyncError>) {
        self.script.lock().submits.push_back(result);
    }

    /// Make every credential request hang until the caller gives up.
    pub fn hang_tokens(&self, hang: bool) {
        self.script.lock().hang_tokens = hang;
    }

    /// Hold snapshot fetches until the returned gate is released.
    pub fn gate_snapshots(&self) -> Gate {
        let gate = Gate::new();
        *self.snapshot_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold submissions until the returned gate is released.
    pub fn gate_submits(&self) -> Gate {
        let gate = Gate::new();
        *self.submit_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn token_calls(&self) -> usize {
        self.script.lock().token_calls
    }

    pub fn snapshot_calls(&self) -> usize {
        self.script.lock().snapshot_requests.len()
    }

    /// `If-None-Match` values sent, in order.
    pub fn if_none_match(&self) -> Vec<Option<String>> {
        self.script
            .lock()
            .snapshot_requests
            .iter()
            .map(|(_, etag)| etag.clone())
            .collect()
    }

    pub fn submit_calls(&self) -> usize {
        self.script.lock().submissions.len()
    }

    pub fn submissions(&self) -> Vec<(i64, MutationRequest)> {
        self.script.lock().submissions.clone()
    }
}

#[async_trait]
impl GameApi for FakeGameApi {
    async fn issue_ws_token(&self) -> Result<WsToken, SyncError> {
        let (hang, scripted, n) = {
            let mut script = self.script.lock();
            script.token_calls += 1;
            (script.hang_tokens, script.tokens.pop_front(), script.token_calls)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        scripted.unwrap_or_else(|| {
            Ok(WsToken {
                token: format!("test-token-{n}"),
                expires_in: 60,
            })
        })
    }

    async fn fetch_snapshot(
        &self,
        game_id: i64,
        if_none_match: Option<&str>,
    ) -> Result<SnapshotFetch, SyncError> {
        self.script
            .lock()
            .snapshot_requests
            .push((game_id, if_none_match.map(str::to_string)));
        let gate = self.snapshot_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.script
            .lock()
            .snapshots
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport("no scripted snapshot response")))
    }

    async fn submit(&self, game_id: i64, request: &MutationRequest) -> Result<(), SyncError> {
        self.script
            .lock()
            .submissions
            .push((game_id, request.clone()));
        let gate = self.submit_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.script.lock().submits.pop_front().unwrap_or(Ok(()))
    }
}
