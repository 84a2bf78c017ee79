pub mod game_state;
pub mod ws;

pub use game_state::{BidConstraintsResponse, GameSnapshotResponse, ViewerState};
pub use ws::{ClientMsg, ErrorCode, ServerMsg, Topic, PROTOCOL_VERSION};
