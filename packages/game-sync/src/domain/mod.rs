pub mod cards;
pub mod snapshot;

pub use cards::{Card, ParseCardError, Rank, Suit, Trump};
pub use snapshot::{GameSnapshot, PhaseSnapshot, Seat};
