//! Local guesses at the post-action snapshot.
//!
//! These never decide legality or turn order; they only echo the player's own
//! action into the snapshot so the UI can show it before the server confirms.

use crate::domain::snapshot::{GameSnapshot, PhaseSnapshot};
use crate::error::SyncError;
use crate::sync::state::{GameRoomState, MutationAction, MutationKind};

pub fn apply(current: &GameRoomState, action: &MutationAction) -> Result<GameSnapshot, SyncError> {
    let kind = action.kind();
    let seat = current.viewer_seat.ok_or_else(|| SyncError::Speculative {
        kind,
        detail: "viewer has no seat in this game".to_string(),
    })?;
    let seat_idx = usize::from(seat);
    if seat_idx >= 4 {
        return Err(SyncError::Speculative {
            kind,
            detail: format!("viewer seat {seat} out of range"),
        });
    }

    let mut next = current.snapshot.clone();
    match (action, &mut next.phase) {
        (MutationAction::Ready { is_ready }, _) => {
            next.game.seating[seat_idx].is_ready = *is_ready;
        }
        (MutationAction::Bid { bid }, PhaseSnapshot::Bidding(bidding)) => {
            // to_act is left alone; the server decides who acts next
            bidding.bids[seat_idx] = Some(*bid);
            bidding.round.bids[seat_idx] = Some(*bid);
        }
        (MutationAction::Trump { trump }, PhaseSnapshot::TrumpSelect(select)) => {
            select.round.trump = Some(*trump);
        }
        (MutationAction::Play { card }, PhaseSnapshot::Trick(trick)) => {
            // The hand is not touched; it is refreshed by the next authoritative push
            trick.current_trick.push((seat, *card));
        }
        (_, phase) => {
            return Err(wrong_phase(kind, phase.name()));
        }
    }
    Ok(next)
}

fn wrong_phase(kind: MutationKind, phase: &str) -> SyncError {
    SyncError::Speculative {
        kind,
        detail: format!("game is in phase {phase}"),
    }
}
