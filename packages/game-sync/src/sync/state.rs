use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::cards::{Card, Trump};
use crate::domain::snapshot::{GameSnapshot, Seat};
use crate::protocol::game_state::{BidConstraintsResponse, GameSnapshotResponse, ViewerState};

/// Where the currently displayed state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Http,
    Websocket,
    Optimistic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Http => "http",
            Provenance::Websocket => "websocket",
            Provenance::Optimistic => "optimistic",
        }
    }
}

/// The reconciled projection of one game room.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRoomState {
    pub game_id: i64,
    pub snapshot: GameSnapshot,
    pub version: i32,
    pub viewer_seat: Option<Seat>,
    pub viewer_hand: Vec<Card>,
    pub bid_constraints: Option<BidConstraintsResponse>,
    pub provenance: Provenance,
    pub received_at: OffsetDateTime,
    /// Last ETag issued by the snapshot endpoint. Never derived from a push.
    pub etag: Option<String>,
}

/// Origin of an authoritative update. Speculative writes never use this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    Http { etag: Option<String> },
    Websocket,
}

/// A complete, server-originated point-in-time view of a game.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritativeUpdate {
    pub version: i32,
    pub snapshot: GameSnapshot,
    pub viewer: ViewerState,
    pub source: UpdateSource,
}

impl AuthoritativeUpdate {
    pub fn from_http(response: GameSnapshotResponse, etag: Option<String>) -> Self {
        Self {
            version: response.version,
            snapshot: response.snapshot,
            viewer: response.viewer,
            source: UpdateSource::Http { etag },
        }
    }

    pub fn from_push(version: i32, snapshot: GameSnapshot, viewer: ViewerState) -> Self {
        Self {
            version,
            snapshot,
            viewer,
            source: UpdateSource::Websocket,
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self.source {
            UpdateSource::Http { .. } => Provenance::Http,
            UpdateSource::Websocket => Provenance::Websocket,
        }
    }
}

/// What the engine did with an authoritative update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First state for the displayed game.
    Initialized,
    /// Replaced a non-optimistic state.
    Replaced,
    /// Replaced a speculative state.
    Superseded,
    /// Older than what is stored.
    IgnoredStale,
    /// Not the displayed game.
    IgnoredOtherResource,
}

impl ApplyOutcome {
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Initialized | ApplyOutcome::Replaced | ApplyOutcome::Superseded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Bid,
    Trump,
    Play,
    Ready,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Bid => "bid",
            MutationKind::Trump => "trump",
            MutationKind::Play => "play",
            MutationKind::Ready => "ready",
        }
    }

    /// Path segment of the submission endpoint under `/api/games/{id}/`.
    pub fn path_segment(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player action with its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MutationAction {
    Bid { bid: u8 },
    Trump { trump: Trump },
    Play { card: Card },
    Ready { is_ready: bool },
}

impl MutationAction {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationAction::Bid { .. } => MutationKind::Bid,
            MutationAction::Trump { .. } => MutationKind::Trump,
            MutationAction::Play { .. } => MutationKind::Play,
            MutationAction::Ready { .. } => MutationKind::Ready,
        }
    }
}
