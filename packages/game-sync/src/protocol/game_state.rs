use serde::{Deserialize, Serialize};

use crate::domain::cards::Card;
use crate::domain::snapshot::{GameSnapshot, Seat};

/// Body of the snapshot endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameSnapshotResponse {
    pub snapshot: GameSnapshot,
    pub viewer: ViewerState,
    pub version: i32,
}

/// Viewer-relative context for a specific game snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<Seat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_constraints: Option<BidConstraintsResponse>,
}

impl ViewerState {
    /// Parse the viewer's hand. Unparseable entries are dropped with a warning;
    /// the hand is display data and a bad card must not reject the whole update.
    pub fn parsed_hand(&self) -> Vec<Card> {
        let Some(hand) = &self.hand else {
            return Vec::new();
        };
        hand.iter()
            .filter_map(|raw| match raw.parse::<Card>() {
                Ok(card) => Some(card),
                Err(err) => {
                    tracing::warn!(card = %raw, error = %err, "skipping unparseable card in viewer hand");
                    None
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidConstraintsResponse {
    pub zero_bid_locked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_state_is_camel_case() {
        let viewer: ViewerState = serde_json::from_str(
            r#"{"seat":2,"hand":["AS","TD","??"],"bidConstraints":{"zeroBidLocked":true}}"#,
        )
        .unwrap();
        assert_eq!(viewer.seat, Some(2));
        assert_eq!(viewer.parsed_hand().len(), 2);
        assert_eq!(
            viewer.bid_constraints,
            Some(BidConstraintsResponse {
                zero_bid_locked: true
            })
        );
    }

    #[test]
    fn spectator_viewer_has_no_fields() {
        let viewer: ViewerState = serde_json::from_str("{}").unwrap();
        assert_eq!(viewer, ViewerState::default());
        assert!(viewer.parsed_hand().is_empty());
    }
}
