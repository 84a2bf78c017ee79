use serde::{Deserialize, Serialize};

use crate::domain::snapshot::GameSnapshot;
use crate::protocol::game_state::ViewerState;

pub const PROTOCOL_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topic {
    #[serde(rename_all = "snake_case")]
    Game { id: i64 },
}

impl Topic {
    pub fn game(id: i64) -> Self {
        Topic::Game { id }
    }

    pub fn game_id(&self) -> i64 {
        let Topic::Game { id } = self;
        *id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Hello { protocol: i32, credential: String },
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

impl ClientMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMsg::Hello { .. } => "hello",
            ClientMsg::Subscribe { .. } => "subscribe",
            ClientMsg::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    HelloAck {
        protocol: i32,
        user_id: i64,
    },

    Ack {
        command: String,
        #[serde(default)]
        topic: Option<Topic>,
    },

    GameState {
        topic: Topic,
        version: i32,
        game: GameSnapshot,
        #[serde(default)]
        viewer: ViewerState,
    },

    YourTurn {
        game_id: i64,
        version: i32,
    },

    LongWaitInvalidated {
        game_id: i64,
    },

    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::HelloAck { .. } => "hello_ack",
            ServerMsg::Ack { .. } => "ack",
            ServerMsg::GameState { .. } => "game_state",
            ServerMsg::YourTurn { .. } => "your_turn",
            ServerMsg::LongWaitInvalidated { .. } => "long_wait_invalidated",
            ServerMsg::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadProtocol,
    BadTopic,
    BadRequest,
    Forbidden,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadProtocol => "bad_protocol",
            ErrorCode::BadTopic => "bad_topic",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Unknown => "unknown",
        }
    }
}
