//! Line commands read from stdin while a game is open.

use game_sync::domain::{Card, Trump};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Bid(u8),
    Trump(Trump),
    Play(Card),
    Ready,
    Refresh,
    Show,
    Quit,
}

pub const HELP: &str = "commands: bid <n> | trump <clubs|diamonds|hearts|spades|no_trumps> | play <card> | ready | refresh | show | quit";

pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(HELP.to_string());
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for '{verb}'"));
    }

    match (verb.to_ascii_lowercase().as_str(), arg) {
        ("bid", Some(n)) => n
            .parse::<u8>()
            .map(Command::Bid)
            .map_err(|_| format!("bid must be a number, got '{n}'")),
        ("trump", Some(t)) => parse_trump(t).map(Command::Trump),
        ("play", Some(c)) => c
            .to_ascii_uppercase()
            .parse::<Card>()
            .map(Command::Play)
            .map_err(|e| e.to_string()),
        ("ready", None) => Ok(Command::Ready),
        ("refresh", None) => Ok(Command::Refresh),
        ("show", None) => Ok(Command::Show),
        ("quit" | "exit", None) => Ok(Command::Quit),
        _ => Err(HELP.to_string()),
    }
}

fn parse_trump(s: &str) -> Result<Trump, String> {
    let wire = serde_json::Value::String(s.to_ascii_uppercase());
    serde_json::from_value(wire).map_err(|e| e.to_string())
}
