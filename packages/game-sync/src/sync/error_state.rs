use std::sync::Arc;

use tokio::sync::watch;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Websocket,
    Http,
}

/// The error currently surfaced to the player, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub message: String,
    pub trace_id: Option<String>,
    pub source: ErrorSource,
}

impl ErrorState {
    pub fn new(message: impl Into<String>, source: ErrorSource) -> Self {
        Self {
            message: message.into(),
            trace_id: None,
            source,
        }
    }

    pub fn from_error(err: &SyncError, source: ErrorSource) -> Self {
        Self {
            message: err.detail(),
            trace_id: err.trace_id().map(str::to_string),
            source,
        }
    }
}

/// Shared, observable holder for the surfaced [`ErrorState`].
#[derive(Clone)]
pub struct ErrorSlot {
    tx: Arc<watch::Sender<Option<ErrorState>>>,
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: ErrorState) {
        tracing::debug!(source = ?state.source, message = %state.message, "surfacing sync error");
        self.tx.send_replace(Some(state));
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<ErrorState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ErrorState>> {
        self.tx.subscribe()
    }
}
