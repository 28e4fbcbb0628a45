use log::{debug, error, info, warn};
use rand::Rng;
use thiserror::Error as ThisError;

use crate::api::BackendError;
use crate::game::timeline::check_final_position;
use crate::game::utils::{parse_square, promotion_from_str, side_to_string, winner_to_string};
use crate::game::{normalize, reconstruct, RulesEngine, TimelineEntry, TimelineError};
use crate::models::{GameSession, Notice, PendingVote, ReadModel, SquarePair, VoteRequest, VoteTally};
use crate::sync::highlight_store::HighlightStore;
use crate::sync::scheduler::{Deadline, RefreshScheduler, SchedulerState, Tick};

/// Archived games are renamed so they never collide with a live session of the same name
pub const ARCHIVED_PREFIX: &str = "Old ";

#[derive(Debug, ThisError)]
pub enum SyncError {
    #[error("Game '{0}' was not found")]
    NotFound(String),
    #[error("Game '{session}' cannot be shown: {source}")]
    CorruptHistory {
        session: String,
        #[source]
        source: TimelineError,
    },
}

/// Identifies the session an outstanding request was made for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyTicket {
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSubmission {
    pub session: String,
    pub request: VoteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Snapshot installed; the tally of the session should be refreshed next
    Applied { tally: Option<TallyTicket> },
    /// Backend unreachable, previous state kept
    Unavailable,
    /// Answer for a session that is no longer active
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub notice: Notice,
    pub tally: Option<TallyTicket>,
}

/// Single owner of the client's view of a game.
///
/// Network calls happen elsewhere: every fetch is a `begin_*` that hands out a ticket and a
/// `complete_*` that folds the answer back in. Completions for a session that is no longer
/// active are dropped, which is what keeps late answers from overwriting a newer view.
pub struct SessionSynchronizer {
    rules: Box<dyn RulesEngine>,
    highlights: Box<dyn HighlightStore>,
    scheduler: RefreshScheduler,
    require_verification: bool,

    sessions: Vec<String>,
    active: Option<String>,
    snapshot: Option<GameSession>,
    archived: bool,
    timeline: Vec<TimelineEntry>,
    displayed: Option<String>,
    highlighted: Option<SquarePair>,
    pending_vote: Option<PendingVote>,
    live_votes: Vec<VoteTally>,
    loading: bool,
}

impl SessionSynchronizer {
    pub fn new(rules: Box<dyn RulesEngine>, highlights: Box<dyn HighlightStore>, require_verification: bool) -> Self {
        Self {
            rules,
            highlights,
            scheduler: RefreshScheduler::new(),
            require_verification,
            sessions: Vec::new(),
            active: None,
            snapshot: None,
            archived: false,
            timeline: Vec::new(),
            displayed: None,
            highlighted: None,
            pending_vote: None,
            live_votes: Vec::new(),
            loading: false,
        }
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn snapshot(&self) -> Option<&GameSession> {
        self.snapshot.as_ref()
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn displayed_position(&self) -> Option<&str> {
        self.displayed.as_deref()
    }

    pub fn highlighted(&self) -> Option<SquarePair> {
        self.highlighted
    }

    pub fn pending_vote(&self) -> Option<PendingVote> {
        self.pending_vote
    }

    pub fn live_votes(&self) -> &[VoteTally] {
        &self.live_votes
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn countdown(&self) -> &str {
        self.scheduler.countdown()
    }

    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    fn is_active(&self, session: &str) -> bool {
        self.active.as_deref() == Some(session)
    }

    fn clear_view(&mut self) {
        self.snapshot = None;
        self.archived = false;
        self.timeline.clear();
        self.displayed = None;
        self.highlighted = None;
        self.pending_vote = None;
        self.live_votes.clear();
    }

    fn switch_to(&mut self, session: &str) {
        if self.is_active(session) {
            return;
        }
        info!("Switching to game {}", session);
        self.clear_view();
        self.active = Some(session.to_string());
        self.loading = true;
        self.scheduler.switch_session(session);
    }

    /// Result of `GET /game/list-games`; an unreachable backend just means no games
    pub fn apply_session_list(&mut self, result: Result<Vec<String>, BackendError>) -> &[String] {
        match result {
            Ok(sessions) => self.sessions = sessions,
            Err(err) => {
                warn!("Failed to fetch games: {}", err);
                self.sessions.clear();
            }
        }
        &self.sessions
    }

    /// Make `name` the active session and hand out the ticket for fetching its snapshot
    pub fn begin_load(&mut self, name: &str) -> FetchTicket {
        self.switch_to(name);
        FetchTicket {
            session: name.to_string(),
        }
    }

    pub fn complete_load(
        &mut self,
        ticket: &FetchTicket,
        result: Result<GameSession, BackendError>,
        now_ms: i64,
    ) -> Result<LoadOutcome, SyncError> {
        if !self.is_active(&ticket.session) {
            debug!(
                "Discarding snapshot of {}, active game is {:?}",
                ticket.session, self.active
            );
            return Ok(LoadOutcome::Discarded);
        }

        match result {
            Ok(session) if session.name != ticket.session => {
                warn!("Asked for game {} but got {}", ticket.session, session.name);
                self.loading = false;
                self.scheduler.resume(&ticket.session);
                Ok(LoadOutcome::Discarded)
            }
            Ok(session) => {
                self.install(session, false, now_ms)?;
                Ok(LoadOutcome::Applied {
                    tally: self.begin_tally_refresh(),
                })
            }
            Err(err) if err.is_not_found() => {
                warn!("Game {} does not exist", ticket.session);
                self.clear_view();
                self.loading = false;
                self.scheduler.halt();
                Err(SyncError::NotFound(ticket.session.clone()))
            }
            Err(err) => {
                warn!("Failed to fetch board of {}: {}", ticket.session, err);
                self.loading = false;
                self.scheduler.resume(&ticket.session);
                Ok(LoadOutcome::Unavailable)
            }
        }
    }

    /// Show an already fetched finished game, read-only and without any polling
    pub fn load_archived(&mut self, mut session: GameSession) -> Result<(), SyncError> {
        session.name = format!("{}{}", ARCHIVED_PREFIX, session.name);
        let name = session.name.clone();

        self.switch_to(&name);
        // archived games may share a name, so never reuse the previous view
        self.clear_view();
        self.scheduler.freeze(&name);
        self.install(session, true, 0)
    }

    fn install(&mut self, session: GameSession, archived: bool, now_ms: i64) -> Result<(), SyncError> {
        let name = session.name.clone();

        let replay = reconstruct(self.rules.as_ref(), &session.move_history, &session.position_votes)
            .and_then(|timeline| {
                check_final_position(self.rules.as_ref(), &timeline, &session.position)?;
                let side = self
                    .rules
                    .side_to_move(&session.position)
                    .map_err(|source| TimelineError::CorruptHistory {
                        ply: session.move_history.len(),
                        source,
                    })?;
                Ok((timeline, side))
            });

        let (timeline, side_to_move) = match replay {
            Ok(replay) => replay,
            Err(source) => {
                error!("Refusing to show game {}: {}", name, source);
                self.clear_view();
                self.loading = false;
                self.scheduler.halt();
                return Err(SyncError::CorruptHistory { session: name, source });
            }
        };

        let position_changed = self
            .snapshot
            .as_ref()
            .map(|previous| previous.position != session.position)
            .unwrap_or(true);
        if position_changed {
            self.pending_vote = None;
        }
        // a refetch of an unchanged position keeps whatever the user is browsing
        if position_changed || self.displayed.is_none() {
            self.displayed = Some(session.position.clone());
            self.highlighted = self.highlights.load(&name, &session.position);
        }

        debug!(
            "Game {} at ply {}, {} to move",
            name,
            timeline.len(),
            side_to_string(side_to_move)
        );

        if archived {
            self.live_votes = session.votes_for(&session.position).to_vec();
        } else {
            let deadline = Deadline {
                next_update: session.next_update,
                per_move_time_budget: session.per_move_time_budget,
                engine_to_move: side_to_move != session.player_color,
                finished: session.finished,
            };
            self.scheduler.reset(&name, deadline, now_ms);
        }

        self.timeline = timeline;
        self.archived = archived;
        self.loading = false;
        self.snapshot = Some(session);
        Ok(())
    }

    /// Ticket for refreshing the live tally, if the active session has one
    pub fn begin_tally_refresh(&self) -> Option<TallyTicket> {
        match &self.active {
            Some(session) if !self.archived => Some(TallyTicket {
                session: session.clone(),
            }),
            _ => None,
        }
    }

    /// Fold in a tally; returns whether it was applied
    pub fn complete_tally(&mut self, ticket: &TallyTicket, result: Result<Vec<VoteTally>, BackendError>) -> bool {
        if !self.is_active(&ticket.session) || self.archived {
            debug!("Discarding tally of {}", ticket.session);
            return false;
        }

        match result {
            Ok(votes) => {
                self.live_votes = votes;
                true
            }
            Err(err) => {
                warn!("Failed to fetch voting of {}: {}", ticket.session, err);
                false
            }
        }
    }

    /// Browse to a position of the timeline (or back to the start or the current position)
    pub fn select_historical_position(&mut self, move_token: &str, position: &str) -> bool {
        let Some(session) = self.active.clone() else {
            return false;
        };

        let in_timeline = self
            .timeline
            .iter()
            .any(|entry| entry.resulting_position == position && (move_token.is_empty() || entry.move_token == move_token));
        let is_current = self.snapshot.as_ref().is_some_and(|s| s.position == position);
        let is_start = self.snapshot.is_some() && self.rules.initial_position() == position;

        if !(in_timeline || is_current || is_start) {
            debug!("Position {} is not part of game {}", position, session);
            return false;
        }

        self.displayed = Some(position.to_string());
        self.highlighted = self.highlights.load(&session, position);
        true
    }

    /// Record a candidate move on the displayed position if the rules engine allows it.
    ///
    /// This is the only legality gate; a rejected move leaves everything as it was.
    pub fn propose_candidate_move(&mut self, from: &str, to: &str, promotion: Option<&str>) -> bool {
        let (Some(session), Some(position)) = (self.active.clone(), self.displayed.clone()) else {
            return false;
        };
        let (Some(from), Some(to)) = (parse_square(from), parse_square(to)) else {
            return false;
        };
        let promotion = match promotion.map(str::trim).filter(|p| !p.is_empty()) {
            None => None,
            Some(piece) => match promotion_from_str(piece) {
                Some(piece) => Some(piece),
                None => return false,
            },
        };

        let vote = PendingVote { from, to, promotion };
        if let Err(err) = self.rules.apply(&position, &vote.token()) {
            debug!("Rejected candidate move {}: {}", vote, err);
            return false;
        }

        let squares = vote.squares();
        if let Err(err) = self.highlights.save(&session, &position, squares) {
            warn!("Failed to store highlight of {}: {}", vote, err);
        }
        self.pending_vote = Some(vote);
        self.highlighted = Some(squares);
        true
    }

    /// Check the inputs of a vote and build the request for it
    pub fn prepare_vote(&self, verification: Option<&str>) -> Result<VoteSubmission, Notice> {
        if self.archived || self.snapshot.as_ref().is_some_and(|s| s.finished) {
            return Err(Notice::SessionClosed);
        }

        let verification = verification.map(str::trim).filter(|token| !token.is_empty());
        if self.require_verification && verification.is_none() {
            return Err(Notice::MissingVerification);
        }

        let (Some(vote), Some(session)) = (self.pending_vote, self.active.clone()) else {
            return Err(Notice::MissingMove);
        };

        Ok(VoteSubmission {
            session: session.clone(),
            request: VoteRequest {
                move_token: vote.token(),
                game: session,
                recaptcha_token: verification.filter(|_| self.require_verification).map(str::to_string),
            },
        })
    }

    /// Fold in the result of a vote submission; `None` when the session changed meanwhile
    pub fn complete_vote(&mut self, submission: &VoteSubmission, result: Result<(), BackendError>) -> Option<VoteOutcome> {
        if !self.is_active(&submission.session) {
            debug!("Discarding vote result of {}", submission.session);
            return None;
        }

        match result {
            Ok(()) => {
                info!(
                    "Vote ({}) registered in game '{}'",
                    submission.request.move_token, submission.session
                );
                if self.pending_vote.map(|vote| vote.token()) == Some(submission.request.move_token.clone()) {
                    self.pending_vote = None;
                }
                Some(VoteOutcome {
                    notice: Notice::VoteRegistered,
                    tally: self.begin_tally_refresh(),
                })
            }
            Err(err) => {
                error!(
                    "Failed to send vote {} to {}: {}",
                    submission.request.move_token, submission.session, err
                );
                Some(VoteOutcome {
                    notice: Notice::VoteFailed,
                    tally: None,
                })
            }
        }
    }

    pub fn tick<R: Rng + ?Sized>(&mut self, now_ms: i64, rng: &mut R) -> Tick {
        self.scheduler.tick(now_ms, rng)
    }

    /// Guard for a jittered refetch that is about to fire
    pub fn accepts_refetch(&self, session: &str) -> bool {
        self.is_active(session) && self.scheduler.accepts_refetch(session)
    }

    pub fn read_model(&self) -> ReadModel {
        let ranking_source: &[VoteTally] = match (&self.snapshot, &self.displayed) {
            (Some(snapshot), Some(position)) if self.archived || *position != snapshot.position => {
                snapshot.votes_for(position)
            }
            _ => &self.live_votes,
        };
        let winner = self.snapshot.as_ref().and_then(GameSession::outcome);

        ReadModel {
            sessions: self.sessions.clone(),
            session: self.active.clone(),
            position: self.displayed.clone(),
            current_position: self.snapshot.as_ref().map(|s| s.position.clone()),
            timeline: self.timeline.clone(),
            highlighted: self.highlighted.map(|squares| squares.to_strings()).unwrap_or_default(),
            pending_move: self.pending_vote.map(|vote| vote.token()),
            ranking: normalize(ranking_source).to_vec(),
            countdown: self.scheduler.countdown().to_string(),
            loading: self.loading,
            archived: self.archived,
            finished: self.snapshot.as_ref().is_some_and(|s| s.finished),
            winner,
            winner_label: winner.map(winner_to_string),
            refresh: self.scheduler.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tally::PLACEHOLDER_TOKEN;
    use crate::game::ChessRules;
    use crate::models::{Side, Winner};
    use crate::sync::highlight_store::MemoryHighlightStore;
    use crate::sync::scheduler::ZERO_COUNTDOWN;
    use chess::Square;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;
    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
    const AFTER_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";

    fn synchronizer() -> SessionSynchronizer {
        SessionSynchronizer::new(Box::new(ChessRules), Box::new(MemoryHighlightStore::new()), false)
    }

    fn game(name: &str, moves: &[&str], position: &str) -> GameSession {
        GameSession {
            id: None,
            name: name.to_string(),
            position: position.to_string(),
            move_history: moves.iter().map(|m| m.to_string()).collect(),
            position_votes: HashMap::from([(
                AFTER_E4.to_string(),
                vec![VoteTally::new("e7e5", 3), VoteTally::new("d7d5", 1)],
            )]),
            finished: false,
            winner: None,
            player_color: Side::White,
            base_update: 60,
            next_update: NOW,
            per_move_time_budget: 60,
            created: None,
            modified: None,
        }
    }

    fn loaded(sync: &mut SessionSynchronizer, session: GameSession) -> LoadOutcome {
        let ticket = sync.begin_load(&session.name);
        sync.complete_load(&ticket, Ok(session), NOW).unwrap()
    }

    #[test]
    fn test_load_builds_timeline_and_counts_down() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Game 1");
        assert!(sync.is_loading());

        let outcome = sync
            .complete_load(&ticket, Ok(game("Game 1", &["e2e4", "e7e5"], AFTER_E5)), NOW)
            .unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Applied {
                tally: Some(TallyTicket {
                    session: "Game 1".to_string()
                })
            }
        );

        assert!(!sync.is_loading());
        assert_eq!(sync.displayed_position(), Some(AFTER_E5));
        assert_eq!(sync.timeline().len(), 2);
        assert_eq!(sync.timeline()[0].votes, vec![VoteTally::new("e7e5", 3), VoteTally::new("d7d5", 1)]);
        assert!(sync.timeline()[1].votes.is_empty());
        assert_eq!(sync.scheduler_state(), SchedulerState::CountingDown);
        assert_eq!(sync.countdown(), "00:01:01");
    }

    #[test]
    fn test_historical_ranking() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));

        assert!(sync.select_historical_position("e2e4", AFTER_E4));
        let ranking = sync.read_model().ranking;
        assert_eq!(ranking[0].token, "e7e5");
        assert_eq!(ranking[0].count, 3);
        assert_eq!(ranking[0].percentage, 75.0);
        assert_eq!(ranking[1].token, "d7d5");
        assert_eq!(ranking[1].percentage, 25.0);
        assert_eq!(ranking[2].token, PLACEHOLDER_TOKEN);
        assert_eq!(ranking[2].count, 0);

        // the history itself is untouched
        assert_eq!(sync.snapshot().unwrap().move_history, vec!["e2e4".to_string(), "e7e5".to_string()]);
        assert!(!sync.select_historical_position("d2d4", "8/8/8/8/8/8/8/8 w - - 0 1"));
        assert_eq!(sync.displayed_position(), Some(AFTER_E4));
    }

    #[test]
    fn test_live_tally_for_current_position() {
        let mut sync = synchronizer();
        let outcome = loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        let LoadOutcome::Applied { tally: Some(ticket) } = outcome else {
            panic!("expected a tally ticket");
        };

        assert!(sync.complete_tally(&ticket, Ok(vec![VoteTally::new("g1f3", 2), VoteTally::new("d2d4", 2)])));
        let ranking = sync.read_model().ranking;
        assert_eq!(ranking[0].token, "g1f3");
        assert_eq!(ranking[0].percentage, 50.0);

        // a failing tally call keeps the last one
        assert!(!sync.complete_tally(&ticket, Err(BackendError::Status(502))));
        assert_eq!(sync.live_votes().len(), 2);
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let mut sync = synchronizer();
        let first = sync.begin_load("Game 1");
        let second = sync.begin_load("Game 2");

        assert!(matches!(
            sync.complete_load(&second, Ok(game("Game 2", &["e2e4"], AFTER_E4)), NOW),
            Ok(LoadOutcome::Applied { .. })
        ));
        assert_eq!(
            sync.complete_load(&first, Ok(game("Game 1", &["e2e4", "e7e5"], AFTER_E5)), NOW)
                .unwrap(),
            LoadOutcome::Discarded
        );

        assert_eq!(sync.active_session(), Some("Game 2"));
        assert_eq!(sync.displayed_position(), Some(AFTER_E4));
        assert_eq!(sync.timeline().len(), 1);
        assert!(!sync.complete_tally(&TallyTicket { session: "Game 1".to_string() }, Ok(vec![])));
    }

    #[test]
    fn test_mismatched_answer_is_discarded() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Game 1");
        assert_eq!(
            sync.complete_load(&ticket, Ok(game("Game 7", &[], START)), NOW).unwrap(),
            LoadOutcome::Discarded
        );
        assert!(sync.snapshot().is_none());
    }

    #[test]
    fn test_polling_continues_after_mismatched_answer() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut sync = synchronizer();
        let mut session = game("Game 1", &["e2e4", "e7e5"], AFTER_E5);
        session.next_update = NOW - 120_000;
        loaded(&mut sync, session);

        let refetch = sync.tick(NOW, &mut rng).refetch.expect("overdue game refetches");
        let ticket = sync.begin_load(&refetch.session);
        assert_eq!(
            sync.complete_load(&ticket, Ok(game("Game 7", &[], START)), NOW).unwrap(),
            LoadOutcome::Discarded
        );

        assert_eq!(sync.scheduler_state(), SchedulerState::CountingDown);
        assert!(sync.tick(NOW + 1_000, &mut rng).refetch.is_some());
        assert_eq!(sync.timeline().len(), 2);
    }

    #[test]
    fn test_closed_session_wins_over_missing_inputs() {
        let mut sync = SessionSynchronizer::new(Box::new(ChessRules), Box::new(MemoryHighlightStore::new()), true);
        let mut finished = game("Game 1", &["e2e4", "e7e5"], AFTER_E5);
        finished.finished = true;
        loaded(&mut sync, finished);

        assert_eq!(sync.prepare_vote(None), Err(Notice::SessionClosed));
        assert_eq!(sync.prepare_vote(Some("token")), Err(Notice::SessionClosed));
        assert!(sync.propose_candidate_move("g1", "f3", None));
        assert_eq!(sync.prepare_vote(Some("token")), Err(Notice::SessionClosed));
    }

    #[test]
    fn test_vote_from_historical_position_goes_to_live_game() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.select_historical_position("e2e4", AFTER_E4));
        assert!(sync.propose_candidate_move("d7", "d5", None));

        let submission = sync.prepare_vote(None).unwrap();
        assert_eq!(submission.session, "Game 1");
        assert_eq!(submission.request.move_token, "d7d5");
    }

    #[test]
    fn test_not_found() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Nope");
        let err = sync
            .complete_load(&ticket, Err(BackendError::NotFound("Nope".to_string())), NOW)
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(name) if name == "Nope"));
        assert!(!sync.is_loading());
    }

    #[test]
    fn test_corrupt_history_is_not_shown() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Game 1");
        let err = sync
            .complete_load(&ticket, Ok(game("Game 1", &["e2e4", "e2e4"], AFTER_E5)), NOW)
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::CorruptHistory {
                source: TimelineError::CorruptHistory { ply: 1, .. },
                ..
            }
        ));
        assert!(sync.timeline().is_empty());
        assert!(sync.displayed_position().is_none());
        assert!(sync.snapshot().is_none());
        assert!(!sync.is_loading());
    }

    #[test]
    fn test_history_must_reach_reported_position() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Game 1");
        let err = sync
            .complete_load(&ticket, Ok(game("Game 1", &["e2e4"], AFTER_E5)), NOW)
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::CorruptHistory {
                source: TimelineError::DivergentPosition { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_transport_failure_keeps_state_and_retries() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sync = synchronizer();
        let mut session = game("Game 1", &["e2e4", "e7e5"], AFTER_E5);
        session.next_update = NOW - 120_000;
        loaded(&mut sync, session);

        let refetch = sync.tick(NOW, &mut rng).refetch.expect("overdue game refetches");
        assert!(sync.accepts_refetch(&refetch.session));

        let ticket = sync.begin_load(&refetch.session);
        let outcome = sync
            .complete_load(&ticket, Err(BackendError::Status(503)), NOW)
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Unavailable);
        assert_eq!(sync.timeline().len(), 2);
        assert_eq!(sync.displayed_position(), Some(AFTER_E5));
        assert!(sync.tick(NOW + 1_000, &mut rng).refetch.is_some());
    }

    #[test]
    fn test_engine_turn_triggers_jittered_refetch() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut sync = synchronizer();
        // black to move, humanity plays white
        loaded(&mut sync, game("Game 1", &["e2e4"], AFTER_E4));

        let refetch = sync.tick(NOW, &mut rng).refetch.expect("engine turn refetches");
        assert_eq!(refetch.session, "Game 1");
        assert!(refetch.delay < Duration::from_millis(1_000));
        assert_eq!(sync.tick(NOW + 1_000, &mut rng).refetch, None);

        sync.begin_load("Game 2");
        assert!(!sync.accepts_refetch("Game 1"));
    }

    #[test]
    fn test_archived_session_is_frozen() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut sync = synchronizer();
        let mut finished = game("Game 1", &["e2e4"], AFTER_E4);
        finished.finished = true;
        finished.winner = Some(Winner::Humanity);
        finished.next_update = 0;

        sync.load_archived(finished).unwrap();
        assert_eq!(sync.active_session(), Some("Old Game 1"));
        assert!(sync.is_archived());
        assert_eq!(sync.scheduler_state(), SchedulerState::Stale);
        assert_eq!(sync.begin_tally_refresh(), None);

        for i in 0..10 {
            let tick = sync.tick(NOW + i * 1_000, &mut rng);
            assert_eq!(tick.countdown, ZERO_COUNTDOWN);
            assert_eq!(tick.refetch, None);
        }
        assert!(!sync.accepts_refetch("Old Game 1"));

        let model = sync.read_model();
        assert_eq!(model.countdown, ZERO_COUNTDOWN);
        assert_eq!(model.winner, Some(Winner::Humanity));
        assert_eq!(model.winner_label.as_deref(), Some("Humanity"));
        assert_eq!(model.ranking[0].token, "e7e5");
        assert_eq!(sync.prepare_vote(None), Err(Notice::SessionClosed));
    }

    #[test]
    fn test_illegal_candidate_move_changes_nothing() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.propose_candidate_move("g1", "f3", None));
        let before = sync.read_model();

        assert!(!sync.propose_candidate_move("e4", "e6", None));
        assert!(!sync.propose_candidate_move("z9", "e6", None));
        assert!(!sync.propose_candidate_move("g1", "f3", Some("k")));

        assert_eq!(sync.read_model(), before);
        assert_eq!(sync.pending_vote().map(|v| v.token()), Some("g1f3".to_string()));
    }

    #[test]
    fn test_candidate_move_highlight_is_restored() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));

        assert!(sync.select_historical_position("e2e4", AFTER_E4));
        assert_eq!(sync.highlighted(), None);
        assert!(sync.propose_candidate_move("d7", "d5", None));
        assert_eq!(sync.highlighted(), Some(SquarePair::new(Square::D7, Square::D5)));

        assert!(sync.select_historical_position("e7e5", AFTER_E5));
        assert_eq!(sync.highlighted(), None);
        assert!(sync.propose_candidate_move("G1", "F3", None));

        assert!(sync.select_historical_position("e2e4", AFTER_E4));
        assert_eq!(sync.highlighted(), Some(SquarePair::new(Square::D7, Square::D5)));
        assert!(sync.select_historical_position("", AFTER_E5));
        assert_eq!(sync.highlighted(), Some(SquarePair::new(Square::G1, Square::F3)));
        assert!(sync.select_historical_position("", START));
    }

    #[test]
    fn test_highlight_restored_on_load() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.propose_candidate_move("g1", "f3", None));

        loaded(&mut sync, game("Game 2", &[], START));
        assert_eq!(sync.highlighted(), None);
        assert_eq!(sync.pending_vote(), None);

        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert_eq!(sync.highlighted(), Some(SquarePair::new(Square::G1, Square::F3)));
        assert_eq!(sync.read_model().highlighted, vec!["g1".to_string(), "f3".to_string()]);
    }

    #[test]
    fn test_refetch_of_unchanged_position_keeps_view() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.propose_candidate_move("g1", "f3", None));
        assert!(sync.select_historical_position("e2e4", AFTER_E4));

        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert_eq!(sync.displayed_position(), Some(AFTER_E4));
        assert!(sync.pending_vote().is_some());

        // the engine moved: back to the live position, old candidate dropped
        let after_nf3 = "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2";
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5", "g1f3"], after_nf3));
        assert_eq!(sync.displayed_position(), Some(after_nf3));
        assert!(sync.pending_vote().is_none());
    }

    #[test]
    fn test_vote_inputs() {
        let mut sync = SessionSynchronizer::new(Box::new(ChessRules), Box::new(MemoryHighlightStore::new()), true);
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));

        assert_eq!(sync.prepare_vote(None), Err(Notice::MissingVerification));
        assert_eq!(sync.prepare_vote(Some("  ")), Err(Notice::MissingVerification));
        assert_eq!(sync.prepare_vote(Some("token")), Err(Notice::MissingMove));
        assert!(Notice::MissingMove.is_missing_vote_inputs());

        assert!(sync.propose_candidate_move("g1", "f3", None));
        let submission = sync.prepare_vote(Some("token")).unwrap();
        assert_eq!(
            submission.request,
            VoteRequest {
                move_token: "g1f3".to_string(),
                game: "Game 1".to_string(),
                recaptcha_token: Some("token".to_string()),
            }
        );
    }

    #[test]
    fn test_vote_without_verification() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.propose_candidate_move("g1", "f3", None));

        let submission = sync.prepare_vote(Some("ignored")).unwrap();
        assert_eq!(submission.request.recaptcha_token, None);
    }

    #[test]
    fn test_vote_completion() {
        let mut sync = synchronizer();
        loaded(&mut sync, game("Game 1", &["e2e4", "e7e5"], AFTER_E5));
        assert!(sync.propose_candidate_move("g1", "f3", None));
        let submission = sync.prepare_vote(None).unwrap();

        let failed = sync.complete_vote(&submission, Err(BackendError::Status(500))).unwrap();
        assert_eq!(failed.notice, Notice::VoteFailed);
        assert!(sync.pending_vote().is_some());

        let ok = sync.complete_vote(&submission, Ok(())).unwrap();
        assert_eq!(ok.notice, Notice::VoteRegistered);
        assert_eq!(
            ok.tally,
            Some(TallyTicket {
                session: "Game 1".to_string()
            })
        );
        assert!(sync.pending_vote().is_none());

        sync.begin_load("Game 2");
        assert_eq!(sync.complete_vote(&submission, Ok(())), None);
    }

    #[test]
    fn test_history_starts_from_standard_position() {
        let mut sync = synchronizer();
        let ticket = sync.begin_load("Game 1");
        assert!(sync
            .complete_load(&ticket, Ok(game("Game 1", &[], "8/P7/8/8/8/8/8/k6K w - - 0 1")), NOW)
            .is_err());

        loaded(&mut sync, game("Game 1", &[], START));
        assert!(!sync.propose_candidate_move("e2", "e5", None));
        assert!(sync.propose_candidate_move("e2", "e4", Some("")));
        assert_eq!(sync.pending_vote().map(|v| v.token()), Some("e2e4".to_string()));
    }

    #[test]
    fn test_session_list() {
        let mut sync = synchronizer();
        assert_eq!(
            sync.apply_session_list(Ok(vec!["Game 1".to_string(), "Game 2".to_string()])),
            &["Game 1".to_string(), "Game 2".to_string()]
        );
        assert!(sync.apply_session_list(Err(BackendError::Status(500))).is_empty());
        assert!(sync.read_model().sessions.is_empty());
    }
}
