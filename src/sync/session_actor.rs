use actix::prelude::*;
use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::api::GameBackend;
use crate::models::{BridgeMessage, GameSession, MatchSummary, ReadModel, ServerMessage};
use crate::sync::synchronizer::{FetchTicket, LoadOutcome, SessionSynchronizer, TallyTicket};

/// Period of the countdown clock
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Drives a [`SessionSynchronizer`] on the actix event loop.
///
/// Every backend answer and timer callback runs on this actor's context, so state changes
/// happen one at a time and in order. Each change is pushed to all subscribed bridge
/// connections.
pub struct SessionActor {
    sync: SessionSynchronizer,
    backend: Arc<dyn GameBackend>,
    subscribers: HashMap<String, Recipient<BridgeMessage>>,
    matches: Vec<GameSession>,
    vote_poll_interval: Duration,
    last_countdown: String,
    rng: StdRng,
}

impl SessionActor {
    pub fn new(sync: SessionSynchronizer, backend: Arc<dyn GameBackend>, vote_poll_interval: Duration) -> Self {
        Self {
            sync,
            backend,
            subscribers: HashMap::new(),
            matches: Vec::new(),
            vote_poll_interval,
            last_countdown: String::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replace the jitter source, mostly for deterministic tests
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn broadcast(&self, message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Error serializing message: {}", e);
                return;
            }
        };

        for (id, recipient) in &self.subscribers {
            debug!("Sending {} to connection {}", message.message_type, id);
            recipient.do_send(BridgeMessage(text.clone()));
        }
    }

    fn broadcast_state(&mut self) {
        let state = self.sync.read_model();
        self.last_countdown = state.countdown.clone();
        self.broadcast(&ServerMessage::state(state));
    }

    fn refresh_sessions(&mut self, load_first: bool, ctx: &mut Context<Self>) {
        self.backend
            .list_games()
            .into_actor(self)
            .map(move |result, act, ctx| {
                let first = act.sync.apply_session_list(result).first().cloned();
                act.broadcast(&ServerMessage::games(act.sync.sessions().to_vec()));

                match first {
                    Some(first) if load_first && act.sync.active_session().is_none() => act.load(&first, ctx),
                    _ => act.broadcast_state(),
                }
            })
            .spawn(ctx);
    }

    fn load(&mut self, name: &str, ctx: &mut Context<Self>) {
        let ticket = self.sync.begin_load(name);
        self.broadcast_state();
        self.fetch(ticket, ctx);
    }

    fn fetch(&mut self, ticket: FetchTicket, ctx: &mut Context<Self>) {
        self.backend
            .fetch_game(&ticket.session)
            .into_actor(self)
            .map(move |result, act, ctx| {
                match act.sync.complete_load(&ticket, result, now_ms()) {
                    Ok(LoadOutcome::Applied { tally }) => {
                        if let Some(tally) = tally {
                            act.refresh_tally(tally, ctx);
                        }
                    }
                    Ok(LoadOutcome::Unavailable) | Ok(LoadOutcome::Discarded) => {}
                    Err(err) => act.broadcast(&ServerMessage::error(err.to_string())),
                }
                act.broadcast_state();
            })
            .spawn(ctx);
    }

    fn refresh_tally(&mut self, ticket: TallyTicket, ctx: &mut Context<Self>) {
        self.backend
            .fetch_voting(&ticket.session)
            .into_actor(self)
            .map(move |result, act, _| {
                if act.sync.complete_tally(&ticket, result) {
                    act.broadcast_state();
                }
            })
            .spawn(ctx);
    }

    fn on_tick(&mut self, ctx: &mut Context<Self>) {
        let tick = self.sync.tick(now_ms(), &mut self.rng);

        if let Some(refetch) = tick.refetch {
            debug!("Refetching {} in {:?}", refetch.session, refetch.delay);
            ctx.run_later(refetch.delay, move |act, ctx| {
                if act.sync.accepts_refetch(&refetch.session) {
                    let ticket = act.sync.begin_load(&refetch.session);
                    act.fetch(ticket, ctx);
                } else {
                    debug!("Dropping refetch of {}", refetch.session);
                }
            });
        }

        if tick.countdown != self.last_countdown {
            self.broadcast_state();
        }
    }

    fn show_match(&mut self, index: usize) -> bool {
        let Some(game) = self.matches.get(index).cloned() else {
            return false;
        };

        if let Err(err) = self.sync.load_archived(game) {
            self.broadcast(&ServerMessage::error(err.to_string()));
        }
        self.broadcast_state();
        true
    }

    fn refresh_matches(&mut self, then_show: Option<usize>, ctx: &mut Context<Self>) {
        self.backend
            .finished_games()
            .into_actor(self)
            .map(move |result, act, _| {
                act.matches = match result {
                    Ok(games) => {
                        info!("{} finished games available", games.len());
                        games
                    }
                    Err(err) => {
                        warn!("Failed to fetch finished games: {}", err);
                        Vec::new()
                    }
                };
                let summaries = act
                    .matches
                    .iter()
                    .enumerate()
                    .map(|(index, game)| MatchSummary::new(index, game))
                    .collect();
                act.broadcast(&ServerMessage::matches(summaries));

                if let Some(index) = then_show {
                    if !act.show_match(index) {
                        act.broadcast(&ServerMessage::error(format!("Finished game #{} was not found", index)));
                    }
                }
            })
            .spawn(ctx);
    }
}

impl Actor for SessionActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Session actor started");
        ctx.run_interval(TICK_INTERVAL, |act, ctx| act.on_tick(ctx));
        ctx.run_interval(self.vote_poll_interval, |act, ctx| {
            if let Some(ticket) = act.sync.begin_tally_refresh() {
                act.refresh_tally(ticket, ctx);
            }
        });
        self.refresh_sessions(true, ctx);
    }
}

/// Snapshot of the read model
#[derive(Message)]
#[rtype(result = "ReadModel")]
pub struct GetState;

#[derive(Message)]
#[rtype(result = "()")]
pub struct ListSessions;

#[derive(Message)]
#[rtype(result = "()")]
pub struct LoadSession {
    pub name: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ListMatches;

/// Show a finished game, by its `index` in the listing sent for [`ListMatches`]
#[derive(Message)]
#[rtype(result = "()")]
pub struct ViewMatch {
    pub index: usize,
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct SelectPosition {
    pub move_token: String,
    pub position: String,
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct ProposeMove {
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendVote {
    pub recaptcha_token: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub id: String,
    pub recipient: Recipient<BridgeMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub id: String,
}

impl Handler<GetState> for SessionActor {
    type Result = MessageResult<GetState>;

    fn handle(&mut self, _: GetState, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.sync.read_model())
    }
}

impl Handler<ListSessions> for SessionActor {
    type Result = ();

    fn handle(&mut self, _: ListSessions, ctx: &mut Self::Context) {
        self.refresh_sessions(false, ctx);
    }
}

impl Handler<LoadSession> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: LoadSession, ctx: &mut Self::Context) {
        info!("Loading game {}", msg.name);
        self.load(&msg.name, ctx);
    }
}

impl Handler<ListMatches> for SessionActor {
    type Result = ();

    fn handle(&mut self, _: ListMatches, ctx: &mut Self::Context) {
        self.refresh_matches(None, ctx);
    }
}

impl Handler<ViewMatch> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: ViewMatch, ctx: &mut Self::Context) {
        if !self.show_match(msg.index) {
            self.refresh_matches(Some(msg.index), ctx);
        }
    }
}

impl Handler<SelectPosition> for SessionActor {
    type Result = bool;

    fn handle(&mut self, msg: SelectPosition, _: &mut Self::Context) -> bool {
        let selected = self.sync.select_historical_position(&msg.move_token, &msg.position);
        if selected {
            self.broadcast_state();
        }
        selected
    }
}

impl Handler<ProposeMove> for SessionActor {
    type Result = bool;

    fn handle(&mut self, msg: ProposeMove, _: &mut Self::Context) -> bool {
        let accepted = self
            .sync
            .propose_candidate_move(&msg.from, &msg.to, msg.promotion.as_deref());
        if accepted {
            self.broadcast_state();
        }
        accepted
    }
}

impl Handler<SendVote> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: SendVote, ctx: &mut Self::Context) {
        let submission = match self.sync.prepare_vote(msg.recaptcha_token.as_deref()) {
            Ok(submission) => submission,
            Err(notice) => {
                self.broadcast(&ServerMessage::notice(notice));
                return;
            }
        };

        self.backend
            .send_vote(submission.request.clone())
            .into_actor(self)
            .map(move |result, act, ctx| {
                let Some(outcome) = act.sync.complete_vote(&submission, result) else {
                    return;
                };
                act.broadcast(&ServerMessage::notice(outcome.notice));
                if let Some(tally) = outcome.tally {
                    act.refresh_tally(tally, ctx);
                }
                act.broadcast_state();
            })
            .spawn(ctx);
    }
}

impl Handler<Subscribe> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Self::Context) {
        match serde_json::to_string(&ServerMessage::state(self.sync.read_model())) {
            Ok(text) => msg.recipient.do_send(BridgeMessage(text)),
            Err(e) => warn!("Error serializing message: {}", e),
        }
        self.subscribers.insert(msg.id.clone(), msg.recipient);
        info!("Connection {} subscribed, {} in total", msg.id, self.subscribers.len());
    }
}

impl Handler<Unsubscribe> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Self::Context) {
        self.subscribers.remove(&msg.id);
        info!("Connection {} unsubscribed, {} left", msg.id, self.subscribers.len());
    }
}
