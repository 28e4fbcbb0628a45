use serde::Serialize;

use crate::game::{RankedMove, TimelineEntry};
use crate::models::Winner;
use crate::sync::SchedulerState;

/// Everything presentation needs to draw the current view
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReadModel {
    pub sessions: Vec<String>,
    pub session: Option<String>,
    /// Position on the board, possibly a historical one
    pub position: Option<String>,
    /// Latest authoritative position of the session
    pub current_position: Option<String>,
    pub timeline: Vec<TimelineEntry>,
    pub highlighted: Vec<String>,
    pub pending_move: Option<String>,
    pub ranking: Vec<RankedMove>,
    pub countdown: String,
    pub loading: bool,
    pub archived: bool,
    pub finished: bool,
    pub winner: Option<Winner>,
    pub winner_label: Option<String>,
    pub refresh: SchedulerState,
}

/// One-shot, user-facing outcome of an action
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Vote requested without a candidate move
    MissingMove,
    /// Vote requested without the verification token the backend requires
    MissingVerification,
    /// Voting on a finished or archived game
    SessionClosed,
    VoteRegistered,
    VoteFailed,
}

impl Notice {
    /// Both flavours of "the vote is missing something the user has to provide"
    pub fn is_missing_vote_inputs(&self) -> bool {
        matches!(self, Notice::MissingMove | Notice::MissingVerification)
    }
}
