use actix::Message;
use serde::{Deserialize, Serialize};

use crate::models::{GameSession, Notice, ReadModel, Winner};

/// Message sent from a presentation client to the bridge
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessage {
    pub message_type: String,
    pub game: Option<String>,
    /// Entry of the finished games listing
    pub index: Option<usize>,
    pub position: Option<String>,
    pub move_token: Option<String>,
    pub move_from: Option<String>,
    pub move_to: Option<String>,
    pub promote_to: Option<String>,
    pub recaptcha_token: Option<String>,
}

/// Message sent from the bridge to presentation clients
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServerMessage {
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub state: Option<ReadModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub games: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<MatchSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub notice: Option<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerMessage {
    pub fn state(state: ReadModel) -> Self {
        Self {
            message_type: "state".to_string(),
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn games(games: Vec<String>) -> Self {
        Self {
            message_type: "games".to_string(),
            games: Some(games),
            ..Default::default()
        }
    }

    pub fn matches(matches: Vec<MatchSummary>) -> Self {
        Self {
            message_type: "matches".to_string(),
            matches: Some(matches),
            ..Default::default()
        }
    }

    pub fn move_result(accepted: bool) -> Self {
        Self {
            message_type: "move_result".to_string(),
            accepted: Some(accepted),
            ..Default::default()
        }
    }

    pub fn notice(notice: Notice) -> Self {
        Self {
            message_type: "notice".to_string(),
            notice: Some(notice),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            message_type: "error".to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Listing entry of a finished game. Finished games usually share their name, so they are
/// picked by `index` into the last listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
    pub moves: usize,
    pub winner: Option<Winner>,
}

impl MatchSummary {
    pub fn new(index: usize, game: &GameSession) -> Self {
        Self {
            index,
            id: game.id.clone(),
            name: game.name.clone(),
            moves: game.move_history.len(),
            winner: game.winner,
        }
    }
}

/// Serialized server message pushed to one bridge connection
#[derive(Message)]
#[rtype(result = "()")]
pub struct BridgeMessage(pub String);
