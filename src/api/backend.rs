use futures::future::BoxFuture;
use thiserror::Error as ThisError;

use crate::models::{GameSession, VoteRequest, VoteTally};

#[derive(Debug, ThisError)]
pub enum BackendError {
    #[error("Invalid backend address: {0}")]
    InvalidUri(String),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Malformed backend response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Backend answered with status {0}")]
    Status(u16),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

/// The game backend as seen by the client. Every call is independent; a failure of one
/// never affects another.
pub trait GameBackend {
    /// `GET /game/list-games`
    fn list_games(&self) -> BoxFuture<'static, Result<Vec<String>, BackendError>>;

    /// `GET /game/status/game/{name}`
    fn fetch_game(&self, name: &str) -> BoxFuture<'static, Result<GameSession, BackendError>>;

    /// `GET /game/status/voting/{name}`
    fn fetch_voting(&self, name: &str) -> BoxFuture<'static, Result<Vec<VoteTally>, BackendError>>;

    /// `GET /game/finished-games`
    fn finished_games(&self) -> BoxFuture<'static, Result<Vec<GameSession>, BackendError>>;

    /// `POST /game/vote`
    fn send_vote(&self, vote: VoteRequest) -> BoxFuture<'static, Result<(), BackendError>>;
}
