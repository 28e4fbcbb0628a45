use log::debug;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

use crate::game::utils::format_countdown;

/// Grace added on top of the per-move budget before the client expects a new position
pub const FIXED_SKEW_MS: i64 = 1_000;

/// Refetches are spread over `[0, MAX_JITTER_MS)` so clients watching the same vote do not
/// hit the backend in the same instant
pub const MAX_JITTER_MS: u64 = 1_000;

/// Countdown shown when nothing is being counted down
pub const ZERO_COUNTDOWN: &str = "00:00:00";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    CountingDown,
    DueForRefresh,
    Stale,
}

/// Timing facts of the last snapshot the countdown is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub next_update: i64,
    pub per_move_time_budget: u64,
    pub engine_to_move: bool,
    pub finished: bool,
}

impl Deadline {
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        let budget_ms = i64::try_from(self.per_move_time_budget)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.next_update
            .saturating_add(budget_ms)
            .saturating_add(FIXED_SKEW_MS)
            .saturating_sub(now_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefetchRequest {
    pub session: String,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub countdown: String,
    pub refetch: Option<RefetchRequest>,
}

/// Countdown and polling state machine of the active session.
///
/// It never performs I/O itself; `tick` hands back at most one refetch request and the owner
/// runs it after the requested delay, checking `accepts_refetch` first.
#[derive(Debug)]
pub struct RefreshScheduler {
    state: SchedulerState,
    session: Option<String>,
    deadline: Option<Deadline>,
    countdown: String,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            session: None,
            deadline: None,
            countdown: ZERO_COUNTDOWN.to_string(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn countdown(&self) -> &str {
        &self.countdown
    }

    /// Forget everything about the previous session. Timers armed for it become no-ops.
    pub fn switch_session(&mut self, session: &str) {
        if self.session.as_deref() != Some(session) {
            debug!("Scheduler switching to session {}", session);
        }
        self.session = Some(session.to_string());
        self.state = SchedulerState::Idle;
        self.deadline = None;
        self.countdown = ZERO_COUNTDOWN.to_string();
    }

    /// A fresh snapshot of a live session arrived
    pub fn reset(&mut self, session: &str, deadline: Deadline, now_ms: i64) {
        if self.session.as_deref() != Some(session) {
            self.switch_session(session);
        }
        self.deadline = Some(deadline);
        self.state = SchedulerState::CountingDown;
        self.countdown = format_countdown(deadline.remaining_ms(now_ms));
    }

    /// Archived sessions are frozen: zero countdown, no polling, ever
    pub fn freeze(&mut self, session: &str) {
        self.switch_session(session);
        self.state = SchedulerState::Stale;
    }

    /// The refetch for `session` failed; count down again so the next tick retries
    pub fn resume(&mut self, session: &str) {
        if self.session.as_deref() == Some(session) && self.state == SchedulerState::Idle && self.deadline.is_some() {
            self.state = SchedulerState::CountingDown;
        }
    }

    /// Stop counting until a new snapshot arrives, e.g. after the session could not be shown
    pub fn halt(&mut self) {
        if self.state != SchedulerState::Stale {
            self.state = SchedulerState::Idle;
            self.deadline = None;
            self.countdown = ZERO_COUNTDOWN.to_string();
        }
    }

    /// Identity guard evaluated when a jittered refetch fires
    pub fn accepts_refetch(&self, session: &str) -> bool {
        self.state == SchedulerState::Idle && self.deadline.is_some() && self.session.as_deref() == Some(session)
    }

    /// One-second clock tick. Only reads the last snapshot's timing, never waits on I/O.
    pub fn tick<R: Rng + ?Sized>(&mut self, now_ms: i64, rng: &mut R) -> Tick {
        let deadline = match (self.state, self.deadline) {
            (SchedulerState::Stale, _) | (_, None) => {
                return Tick {
                    countdown: self.countdown.clone(),
                    refetch: None,
                }
            }
            (_, Some(deadline)) => deadline,
        };

        let remaining = deadline.remaining_ms(now_ms);
        self.countdown = format_countdown(remaining);

        if self.state == SchedulerState::CountingDown
            && (remaining <= 0 || (deadline.engine_to_move && !deadline.finished))
        {
            self.state = SchedulerState::DueForRefresh;
            self.countdown = ZERO_COUNTDOWN.to_string();
        }

        let refetch = self.schedule_refetch(rng);
        Tick {
            countdown: self.countdown.clone(),
            refetch,
        }
    }

    fn schedule_refetch<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<RefetchRequest> {
        if self.state != SchedulerState::DueForRefresh {
            return None;
        }
        let session = self.session.clone()?;

        let delay = Duration::from_millis(rng.random_range(0..MAX_JITTER_MS));
        debug!("Scheduling refetch of {} in {:?}", session, delay);
        self.state = SchedulerState::Idle;
        Some(RefetchRequest { session, delay })
    }
}
