use chess::{Piece, Square};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::game::utils::{parse_square, promotion_from_str, promotion_to_char};

/// Seconds the backend gives the crowd per move when it does not say otherwise
pub const DEFAULT_MOVE_TIME_BUDGET: u64 = 60;

/// Side of the board
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    White,
    Black,
}

impl From<chess::Color> for Side {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => Side::White,
            chess::Color::Black => Side::Black,
        }
    }
}

/// Who won a finished game
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Humanity,
    Ai,
}

/// One `[move, count]` pair of a tally, kept in the wire order
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteTally(pub String, pub u64);

impl VoteTally {
    pub fn new(token: impl Into<String>, count: u64) -> Self {
        Self(token.into(), count)
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn count(&self) -> u64 {
        self.1
    }
}

/// Authoritative game snapshot as last observed from the backend.
///
/// The backend speaks snake_case and calls things by its own names (`board`, `last_moves`,
/// `fen_to_votes`, `bot_limit`); the renames below map them onto the client model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameSession {
    #[serde(rename = "_id", default, deserialize_with = "object_id")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "board")]
    pub position: String,
    #[serde(rename = "last_moves", default, deserialize_with = "null_as_default")]
    pub move_history: Vec<String>,
    #[serde(rename = "fen_to_votes", default, deserialize_with = "null_as_default")]
    pub position_votes: HashMap<String, Vec<VoteTally>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub finished: bool,
    #[serde(default)]
    pub winner: Option<Winner>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub player_color: Side,
    #[serde(default, deserialize_with = "null_as_default")]
    pub base_update: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_update: i64,
    #[serde(rename = "bot_limit", default = "default_time_budget", deserialize_with = "time_budget")]
    pub per_move_time_budget: u64,
    #[serde(rename = "ctime", default)]
    pub created: Option<f64>,
    #[serde(rename = "mtime", default)]
    pub modified: Option<f64>,
}

impl GameSession {
    /// Tally recorded for `position`, empty when the backend has none
    pub fn votes_for(&self, position: &str) -> &[VoteTally] {
        self.position_votes.get(position).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Winner, only meaningful once the game is finished
    pub fn outcome(&self) -> Option<Winner> {
        if self.finished {
            self.winner
        } else {
            None
        }
    }
}

fn default_time_budget() -> u64 {
    DEFAULT_MOVE_TIME_BUDGET
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn time_budget<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(DEFAULT_MOVE_TIME_BUDGET))
}

// Mongo ids show up either as plain strings or as `{"$oid": "..."}`.
fn object_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        Some(serde_json::Value::Object(map)) => map.get("$oid").and_then(|oid| oid.as_str()).map(str::to_string),
        _ => None,
    })
}

/// The two highlighted squares of a candidate move, stored as `["e2", "e4"]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquarePair {
    pub from: Square,
    pub to: Square,
}

impl SquarePair {
    pub fn new(from: Square, to: Square) -> Self {
        Self { from, to }
    }

    pub fn to_strings(&self) -> Vec<String> {
        vec![self.from.to_string(), self.to.to_string()]
    }
}

impl Serialize for SquarePair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.from.to_string(), self.to.to_string()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SquarePair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (from, to) = <(String, String)>::deserialize(deserializer)?;
        let from = parse_square(&from).ok_or_else(|| de::Error::custom(format!("invalid square '{from}'")))?;
        let to = parse_square(&to).ok_or_else(|| de::Error::custom(format!("invalid square '{to}'")))?;
        Ok(Self { from, to })
    }
}

/// Candidate move waiting to be submitted as a vote. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingVote {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Piece>,
}

impl PendingVote {
    pub fn squares(&self) -> SquarePair {
        SquarePair::new(self.from, self.to)
    }

    /// Move token in the backend's `<from><to>[promotion]` form
    pub fn token(&self) -> String {
        match self.promotion.and_then(promotion_to_char) {
            Some(piece) => format!("{}{}{}", self.from, self.to, piece),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl fmt::Display for PendingVote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for PendingVote {
    type Err = String;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim().to_lowercase();
        let from = token.get(0..2).and_then(parse_square);
        let to = token.get(2..4).and_then(parse_square);
        let promotion = match token.get(4..) {
            None | Some("") => None,
            Some(piece) => Some(promotion_from_str(piece).ok_or_else(|| format!("invalid promotion in '{token}'"))?),
        };
        match (from, to) {
            (Some(from), Some(to)) => Ok(PendingVote { from, to, promotion }),
            _ => Err(format!("invalid move token '{token}'")),
        }
    }
}

/// Envelope every backend response is wrapped in
#[derive(Deserialize, Debug)]
pub struct ApiEnvelope<T> {
    pub result: T,
}

#[derive(Deserialize, Debug)]
pub struct GameList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub games: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct GameStatus {
    #[serde(default)]
    pub game: Option<GameSession>,
}

#[derive(Deserialize, Debug)]
pub struct VotingStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub voting: Vec<VoteTally>,
}

#[derive(Deserialize, Debug)]
pub struct FinishedGames {
    #[serde(default, deserialize_with = "null_as_default")]
    pub games: Vec<GameSession>,
}

/// Body of `POST /game/vote`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    #[serde(rename = "move")]
    pub move_token: String,
    pub game: String,
    #[serde(rename = "recaptchaToken", skip_serializing_if = "Option::is_none")]
    pub recaptcha_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_game_session_from_backend_payload() {
        let payload = json!({
            "_id": {"$oid": "65f0c0ffee"},
            "name": "Game 1",
            "base_update": 60,
            "next_update": 1_700_000_000_000i64,
            "player_color": "white",
            "board": "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            "last_moves": ["e2e4"],
            "fen_to_votes": {
                "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1": [["e7e5", 3], ["d7d5", 1]]
            },
            "finished": false,
            "winner": null,
            "bot_limit": 30,
            "ctime": 1_699_999_000_000i64,
            "mtime": 1_700_000_000_000i64
        });

        let session: GameSession = serde_json::from_value(payload).unwrap();
        assert_eq!(session.id.as_deref(), Some("65f0c0ffee"));
        assert_eq!(session.name, "Game 1");
        assert_eq!(session.move_history, vec!["e2e4".to_string()]);
        assert_eq!(session.per_move_time_budget, 30);
        assert_eq!(session.next_update, 1_700_000_000_000);
        assert_eq!(
            session.votes_for(&session.position),
            &[VoteTally::new("e7e5", 3), VoteTally::new("d7d5", 1)]
        );
        assert_eq!(session.outcome(), None);
    }

    #[test]
    fn test_game_session_tolerates_nulls() {
        let payload = json!({
            "name": "Game 2",
            "board": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "last_moves": null,
            "fen_to_votes": null,
            "next_update": null,
            "bot_limit": null,
            "finished": true,
            "winner": "ai"
        });

        let session: GameSession = serde_json::from_value(payload).unwrap();
        assert!(session.move_history.is_empty());
        assert!(session.position_votes.is_empty());
        assert_eq!(session.next_update, 0);
        assert_eq!(session.per_move_time_budget, DEFAULT_MOVE_TIME_BUDGET);
        assert_eq!(session.player_color, Side::White);
        assert_eq!(session.outcome(), Some(Winner::Ai));
    }

    #[test]
    fn test_square_pair_serializes_as_array() {
        let pair = SquarePair::new(Square::E2, Square::E4);
        assert_eq!(serde_json::to_value(pair).unwrap(), json!(["e2", "e4"]));
        let back: SquarePair = serde_json::from_value(json!(["e2", "e4"])).unwrap();
        assert_eq!(back, pair);
        assert!(serde_json::from_value::<SquarePair>(json!(["e2", "z9"])).is_err());
    }

    #[test]
    fn test_pending_vote_token() {
        let vote: PendingVote = "a7a8q".parse().unwrap();
        assert_eq!(vote.promotion, Some(Piece::Queen));
        assert_eq!(vote.token(), "a7a8q");

        let vote: PendingVote = "E2E4".parse().unwrap();
        assert_eq!(vote.token(), "e2e4");
        assert_eq!(vote.squares(), SquarePair::new(Square::E2, Square::E4));

        assert!("e2".parse::<PendingVote>().is_err());
        assert!("e7e8x".parse::<PendingVote>().is_err());
    }

    #[test]
    fn test_vote_request_body() {
        let request = VoteRequest {
            move_token: "e2e4".to_string(),
            game: "Game 1".to_string(),
            recaptcha_token: None,
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"move": "e2e4", "game": "Game 1"}));

        let request = VoteRequest {
            recaptcha_token: Some("token".to_string()),
            ..request
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"move": "e2e4", "game": "Game 1", "recaptchaToken": "token"})
        );
    }
}
