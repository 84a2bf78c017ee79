//! Cards as the backend sends them: two-character tokens such as `"AS"` or
//! `"TD"`, with suits and trumps in upper snake case.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trump {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
    NoTrumps,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a card token: {0:?}")]
pub struct ParseCardError(String);

const RANKS: [(Rank, char); 13] = [
    (Rank::Two, '2'),
    (Rank::Three, '3'),
    (Rank::Four, '4'),
    (Rank::Five, '5'),
    (Rank::Six, '6'),
    (Rank::Seven, '7'),
    (Rank::Eight, '8'),
    (Rank::Nine, '9'),
    (Rank::Ten, 'T'),
    (Rank::Jack, 'J'),
    (Rank::Queen, 'Q'),
    (Rank::King, 'K'),
    (Rank::Ace, 'A'),
];

const SUITS: [(Suit, char); 4] = [
    (Suit::Clubs, 'C'),
    (Suit::Diamonds, 'D'),
    (Suit::Hearts, 'H'),
    (Suit::Spades, 'S'),
];

fn symbol<T: PartialEq + Copy>(table: &[(T, char)], value: T) -> char {
    table
        .iter()
        .find_map(|&(v, c)| (v == value).then_some(c))
        .unwrap_or('?')
}

fn lookup<T: Copy>(table: &[(T, char)], ch: char) -> Option<T> {
    table.iter().find_map(|&(v, c)| (c == ch).then_some(v))
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", symbol(&RANKS, self.rank), symbol(&SUITS, self.suit))
    }
}

impl FromStr for Card {
    type Err = ParseCardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseCardError(s.to_string());
        let mut chars = s.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(r), Some(su), None) => Ok(Card {
                rank: lookup(&RANKS, r).ok_or_else(invalid)?,
                suit: lookup(&SUITS, su).ok_or_else(invalid)?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Card {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Card {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        token.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_wire_format() {
        let cases = [
            (Rank::Ace, Suit::Spades, "AS"),
            (Rank::Ten, Suit::Diamonds, "TD"),
            (Rank::Three, Suit::Hearts, "3H"),
        ];
        for (rank, suit, token) in cases {
            let c = Card { suit, rank };
            assert_eq!(serde_json::to_string(&c).unwrap(), format!("\"{token}\""));
            assert_eq!(token.parse::<Card>().unwrap(), c);
        }
    }

    #[test]
    fn rejects_malformed_cards() {
        for bad in ["", "A", "ASX", "1S", "AX", "as"] {
            assert!(bad.parse::<Card>().is_err(), "{bad:?} should not parse");
        }
        assert!(serde_json::from_str::<Card>("\"ZZ\"").is_err());
    }

    #[test]
    fn trump_uses_screaming_names() {
        assert_eq!(
            serde_json::to_string(&Trump::NoTrumps).unwrap(),
            "\"NO_TRUMPS\""
        );
        assert_eq!(
            serde_json::from_str::<Trump>("\"HEARTS\"").unwrap(),
            Trump::Hearts
        );
        assert_eq!(serde_json::to_string(&Suit::Diamonds).unwrap(), "\"DIAMONDS\"");
        assert!(serde_json::from_str::<Trump>("\"hearts\"").is_err());
    }
}
