//! Public game snapshot as served by the backend.
//!
//! The client never derives these from game rules; they arrive complete from
//! either the snapshot endpoint or a `game_state` push and are only touched
//! locally by speculative writes.

use serde::{Deserialize, Serialize};

use crate::domain::cards::{Card, Trump};

/// Seat index, 0..=3.
pub type Seat = u8;

/// One seat as every viewer sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeatPublic {
    pub seat: Seat,
    pub user_id: Option<i64>,
    pub display_name: Option<String>,
    pub is_ai: bool,
    pub is_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_profile: Option<SeatAiProfilePublic>,
}

impl SeatPublic {
    pub const fn empty(seat: Seat) -> Self {
        Self {
            seat,
            user_id: None,
            display_name: None,
            is_ai: false,
            is_ready: false,
            ai_profile: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeatAiProfilePublic {
    pub name: String,
    pub version: String,
}

/// Fields shared by every phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameHeader {
    pub round_no: u8,
    pub dealer: Seat,
    pub seating: [SeatPublic; 4],
    pub scores_total: [i16; 4],
    pub host_seat: Seat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game: GameHeader,
    pub phase: PhaseSnapshot,
}

/// Phase payload, encoded as `{"phase": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "data")]
pub enum PhaseSnapshot {
    Init,
    Bidding(BiddingSnapshot),
    TrumpSelect(TrumpSelectSnapshot),
    Trick(TrickSnapshot),
    Scoring(ScoringSnapshot),
    Complete(CompleteSnapshot),
    GameOver,
}

impl PhaseSnapshot {
    pub fn name(&self) -> &'static str {
        match self {
            PhaseSnapshot::Init => "Init",
            PhaseSnapshot::Bidding(_) => "Bidding",
            PhaseSnapshot::TrumpSelect(_) => "TrumpSelect",
            PhaseSnapshot::Trick(_) => "Trick",
            PhaseSnapshot::Scoring(_) => "Scoring",
            PhaseSnapshot::Complete(_) => "Complete",
            PhaseSnapshot::GameOver => "GameOver",
        }
    }
}

/// Round facts visible to all seats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundPublic {
    pub hand_size: u8,
    pub leader: Seat,
    pub bid_winner: Option<Seat>,
    pub trump: Option<Trump>,
    pub tricks_won: [u8; 4],
    pub bids: [Option<u8>; 4],
}

/// Closing totals of the round before the current one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_no: u8,
    pub hand_size: u8,
    pub tricks_won: [u8; 4],
    pub bids: [Option<u8>; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiddingSnapshot {
    pub round: RoundPublic,
    pub to_act: Seat,
    pub bids: [Option<u8>; 4],
    pub min_bid: u8,
    pub max_bid: u8,
    pub last_trick: Option<Vec<(Seat, Card)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_round: Option<RoundResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrumpSelectSnapshot {
    pub round: RoundPublic,
    pub to_act: Seat,
    pub allowed_trumps: Vec<Trump>,
    pub last_trick: Option<Vec<(Seat, Card)>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrickSnapshot {
    pub round: RoundPublic,
    pub trick_no: u8,
    pub leader: Seat,
    pub current_trick: Vec<(Seat, Card)>,
    pub to_act: Seat,
    pub playable: Vec<Card>,
    pub last_trick: Option<Vec<(Seat, Card)>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringSnapshot {
    pub round: RoundPublic,
    pub round_scores: [i16; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompleteSnapshot {
    pub round: RoundPublic,
}
