use serde::Deserialize;
use thiserror::Error;

use crate::sync::state::MutationKind;

/// Problem-details body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Transport error: {detail}")]
    Transport { detail: String },
    #[error("Handshake failed: {detail}")]
    Handshake { detail: String },
    #[error("Credential request failed: {detail}")]
    Credential {
        detail: String,
        trace_id: Option<String>,
    },
    #[error("Timed out: {detail}")]
    Timeout { detail: String },
    #[error("Unauthorized")]
    Unauthorized { trace_id: Option<String> },
    #[error("Request failed ({status}): {detail}")]
    Http {
        status: u16,
        code: String,
        detail: String,
        trace_id: Option<String>,
    },
    #[error("Decode error: {detail}")]
    Decode { detail: String },
    #[error("A {kind} action is already in flight for game {game_id}")]
    MutationInFlight { kind: MutationKind, game_id: i64 },
    #[error("Cannot apply {kind} locally: {detail}")]
    Speculative { kind: MutationKind, detail: String },
    #[error("No game state loaded for game {game_id}")]
    NoState { game_id: i64 },
    #[error("No game is open")]
    NoGameOpen,
    #[error("Configuration error: {detail}")]
    Config { detail: String },
}

impl SyncError {
    /// Stable SCREAMING_SNAKE_CASE code for this error.
    pub fn code(&self) -> String {
        match self {
            SyncError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            SyncError::Handshake { .. } => "HANDSHAKE_FAILED".to_string(),
            SyncError::Credential { .. } => "CREDENTIAL_ERROR".to_string(),
            SyncError::Timeout { .. } => "TIMEOUT".to_string(),
            SyncError::Unauthorized { .. } => "UNAUTHORIZED".to_string(),
            SyncError::Http { code, .. } => code.clone(),
            SyncError::Decode { .. } => "DECODE_ERROR".to_string(),
            SyncError::MutationInFlight { .. } => "MUTATION_IN_FLIGHT".to_string(),
            SyncError::Speculative { .. } => "SPECULATIVE_REJECTED".to_string(),
            SyncError::NoState { .. } => "NO_STATE".to_string(),
            SyncError::NoGameOpen => "NO_GAME_OPEN".to_string(),
            SyncError::Config { .. } => "CONFIG_ERROR".to_string(),
        }
    }

    /// Human-readable message suitable for surfacing to the player.
    pub fn detail(&self) -> String {
        match self {
            SyncError::Http { detail, .. } if !detail.is_empty() => detail.clone(),
            SyncError::Credential { detail, .. } => detail.clone(),
            SyncError::Unauthorized { .. } => "Authentication required".to_string(),
            other => other.to_string(),
        }
    }

    /// The request never reached a server that could answer it.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            SyncError::Credential { trace_id, .. }
            | SyncError::Unauthorized { trace_id }
            | SyncError::Http { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    pub fn handshake(detail: impl Into<String>) -> Self {
        Self::Handshake {
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Timeout {
            detail: detail.into(),
        }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    /// Build an HTTP error from a problem-details body, falling back to the
    /// `x-trace-id` header when the body carries no trace id.
    pub fn from_problem(status: u16, problem: ProblemDetails, header_trace_id: Option<String>) -> Self {
        let trace_id = problem.trace_id.or(header_trace_id);
        if status == 401 {
            return Self::Unauthorized { trace_id };
        }
        let detail = if problem.detail.is_empty() {
            problem.title
        } else {
            problem.detail
        };
        let code = if problem.code.is_empty() {
            format!("HTTP_{status}")
        } else {
            problem.code
        };
        Self::Http {
            status,
            code,
            detail,
            trace_id,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::decode(format!("json error: {e}"))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::timeout(format!("http request timed out: {e}"))
        } else if e.is_decode() {
            SyncError::decode(format!("http body error: {e}"))
        } else {
            SyncError::transport(format!("http error: {e}"))
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::transport(format!("websocket error: {e}"))
    }
}
