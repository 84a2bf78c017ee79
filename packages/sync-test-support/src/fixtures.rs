//! Snapshot and message fixtures.

use game_sync::domain::snapshot::{
    BiddingSnapshot, GameHeader, GameSnapshot, PhaseSnapshot, RoundPublic, Seat, SeatPublic,
    TrickSnapshot, TrumpSelectSnapshot,
};
use game_sync::domain::{Card, Trump};
use game_sync::http::etag::game_etag;
use game_sync::http::SnapshotFetch;
use game_sync::protocol::{GameSnapshotResponse, ServerMsg, Topic, ViewerState};

pub const VIEWER_SEAT: Seat = 0;

pub fn header() -> GameHeader {
    let mut seating = [
        SeatPublic::empty(0),
        SeatPublic::empty(1),
        SeatPublic::empty(2),
        SeatPublic::empty(3),
    ];
    for (i, seat) in seating.iter_mut().enumerate() {
        seat.user_id = Some(100 + i as i64);
        seat.display_name = Some(format!("Player {}", i + 1));
    }
    GameHeader {
        round_no: 1,
        dealer: 3,
        seating,
        scores_total: [0; 4],
        host_seat: 0,
    }
}

pub fn round() -> RoundPublic {
    RoundPublic {
        hand_size: 13,
        leader: 0,
        bid_winner: None,
        trump: None,
        tricks_won: [0; 4],
        bids: [None; 4],
    }
}

pub fn lobby_snapshot() -> GameSnapshot {
    GameSnapshot {
        game: header(),
        phase: PhaseSnapshot::Init,
    }
}

/// Bidding with the viewer to act and no bids placed.
pub fn bidding_snapshot() -> GameSnapshot {
    GameSnapshot {
        game: header(),
        phase: PhaseSnapshot::Bidding(BiddingSnapshot {
            round: round(),
            to_act: VIEWER_SEAT,
            bids: [None; 4],
            min_bid: 0,
            max_bid: 13,
            last_trick: None,
            previous_round: None,
        }),
    }
}

/// Bidding after every seat has bid `bids`; the next seat is to act.
pub fn bidding_snapshot_with_bids(bids: [Option<u8>; 4], to_act: Seat) -> GameSnapshot {
    let mut snapshot = bidding_snapshot();
    if let PhaseSnapshot::Bidding(bidding) = &mut snapshot.phase {
        bidding.bids = bids;
        bidding.round.bids = bids;
        bidding.to_act = to_act;
    }
    snapshot
}

pub fn trump_select_snapshot() -> GameSnapshot {
    let mut round = round();
    round.bids = [Some(5), Some(2), Some(3), Some(1)];
    round.bid_winner = Some(VIEWER_SEAT);
    GameSnapshot {
        game: header(),
        phase: PhaseSnapshot::TrumpSelect(TrumpSelectSnapshot {
            round,
            to_act: VIEWER_SEAT,
            allowed_trumps: vec![
                Trump::Clubs,
                Trump::Diamonds,
                Trump::Hearts,
                Trump::Spades,
                Trump::NoTrumps,
            ],
            last_trick: None,
        }),
    }
}

/// First trick, seat 3 has led the king of diamonds and the viewer is next.
pub fn trick_snapshot() -> GameSnapshot {
    let mut round = round();
    round.bids = [Some(5), Some(2), Some(3), Some(1)];
    round.bid_winner = Some(VIEWER_SEAT);
    round.trump = Some(Trump::Hearts);
    round.leader = 3;
    GameSnapshot {
        game: header(),
        phase: PhaseSnapshot::Trick(TrickSnapshot {
            round,
            trick_no: 0,
            leader: 3,
            current_trick: vec![(3, card("KD"))],
            to_act: VIEWER_SEAT,
            playable: vec![card("2D"), card("AD")],
            last_trick: None,
        }),
    }
}

pub fn card(s: &str) -> Card {
    s.parse().expect("fixture card parses")
}

pub fn viewer() -> ViewerState {
    ViewerState {
        seat: Some(VIEWER_SEAT),
        hand: Some(vec!["AS".into(), "2D".into(), "AD".into(), "QH".into()]),
        bid_constraints: None,
    }
}

pub fn snapshot_response(version: i32, snapshot: GameSnapshot) -> GameSnapshotResponse {
    GameSnapshotResponse {
        snapshot,
        viewer: viewer(),
        version,
    }
}

/// A 200 snapshot response carrying the server's `"game-{id}-v{version}"` ETag.
pub fn modified(game_id: i64, version: i32, snapshot: GameSnapshot) -> SnapshotFetch {
    SnapshotFetch::Modified {
        response: snapshot_response(version, snapshot),
        etag: Some(game_etag(game_id, version)),
    }
}

pub fn game_state_msg(game_id: i64, version: i32, snapshot: GameSnapshot) -> ServerMsg {
    ServerMsg::GameState {
        topic: Topic::game(game_id),
        version,
        game: snapshot,
        viewer: viewer(),
    }
}
