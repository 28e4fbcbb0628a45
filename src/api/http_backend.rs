use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::api::backend::{BackendError, GameBackend};
use crate::models::{
    ApiEnvelope, FinishedGames, GameList, GameSession, GameStatus, VoteRequest, VoteTally, VotingStatus,
};

/// Shape of every backend answer, successful or not
#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<ResponseStatus>,
}

#[derive(Deserialize, Debug)]
struct ResponseStatus {
    #[serde(default)]
    message: String,
}

/// How a failed lookup of a single resource is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// Only `404` means the resource is missing
    Listing,
    /// The backend reports an unknown name as a client error with an empty `result`
    ByName,
}

/// Turn a raw backend answer into the `result` of its envelope
fn decode<T: DeserializeOwned>(url: &Url, status: StatusCode, body: &str, lookup: Lookup) -> Result<T, BackendError> {
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(url.to_string()));
    }

    if !status.is_success() {
        if lookup == Lookup::ByName && status.is_client_error() {
            if let Ok(ErrorEnvelope { result: None, status: reported }) = serde_json::from_str(body) {
                let message = reported
                    .map(|reported| reported.message)
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| url.to_string());
                return Err(BackendError::NotFound(message));
            }
        }
        return Err(BackendError::Status(status.as_u16()));
    }

    Ok(serde_json::from_str::<ApiEnvelope<T>>(body)?.result)
}

/// A successful status answer without a game is a missing game too
fn into_game(result: Result<GameStatus, BackendError>, name: String) -> Result<GameSession, BackendError> {
    result?.game.ok_or(BackendError::NotFound(name))
}

/// REST backend reached through reqwest
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_uri: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base = Url::parse(base_uri).map_err(|err| BackendError::InvalidUri(format!("{base_uri}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidUri(base_uri.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        info!("Using game backend at {}", base);
        Ok(Self { client, base })
    }

    /// Build `<base>/<segments...>`, escaping each segment
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn get<T>(&self, url: Url, lookup: Lookup) -> BoxFuture<'static, Result<T, BackendError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        async move {
            debug!("GET {}", url);
            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            let body = response.text().await?;
            decode(&url, status, &body, lookup)
        }
        .boxed()
    }
}

impl GameBackend for HttpBackend {
    fn list_games(&self) -> BoxFuture<'static, Result<Vec<String>, BackendError>> {
        self.get::<GameList>(self.url(&["game", "list-games"]), Lookup::Listing)
            .map(|result| result.map(|list| list.games))
            .boxed()
    }

    fn fetch_game(&self, name: &str) -> BoxFuture<'static, Result<GameSession, BackendError>> {
        let name = name.to_string();
        self.get::<GameStatus>(self.url(&["game", "status", "game", &name]), Lookup::ByName)
            .map(move |result| into_game(result, name))
            .boxed()
    }

    fn fetch_voting(&self, name: &str) -> BoxFuture<'static, Result<Vec<VoteTally>, BackendError>> {
        self.get::<VotingStatus>(self.url(&["game", "status", "voting", name]), Lookup::ByName)
            .map(|result| result.map(|status| status.voting))
            .boxed()
    }

    fn finished_games(&self) -> BoxFuture<'static, Result<Vec<GameSession>, BackendError>> {
        self.get::<FinishedGames>(self.url(&["game", "finished-games"]), Lookup::Listing)
            .map(|result| result.map(|finished| finished.games))
            .boxed()
    }

    fn send_vote(&self, vote: VoteRequest) -> BoxFuture<'static, Result<(), BackendError>> {
        let client = self.client.clone();
        let url = self.url(&["game", "vote"]);
        async move {
            debug!("POST {} {:?}", url, vote);
            let response = client.post(url).json(&vote).send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(BackendError::Status(status.as_u16()))
            }
        }
        .boxed()
    }
}
