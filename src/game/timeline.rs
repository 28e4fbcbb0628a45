use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error as ThisError;

use crate::game::rules::{IllegalMove, RulesEngine};
use crate::game::utils::position_core;
use crate::models::VoteTally;

/// One ply of a game together with the tally the crowd recorded for the resulting position
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub move_token: String,
    pub resulting_position: String,
    pub votes: Vec<VoteTally>,
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TimelineError {
    #[error("Move history is corrupt at ply {ply}: {source}")]
    CorruptHistory {
        ply: usize,
        #[source]
        source: IllegalMove,
    },
    #[error("Move history ends in {replayed}, but the game is at {reported}")]
    DivergentPosition { replayed: String, reported: String },
}

/// Replay `move_history` from the initial position.
///
/// Fails as a whole on the first illegal ply; a partial timeline would pair votes with the
/// wrong positions.
pub fn reconstruct<R>(
    rules: &R,
    move_history: &[String],
    position_votes: &HashMap<String, Vec<VoteTally>>,
) -> Result<Vec<TimelineEntry>, TimelineError>
where
    R: RulesEngine + ?Sized,
{
    let mut position = rules.initial_position();
    let mut timeline = Vec::with_capacity(move_history.len());

    for (ply, token) in move_history.iter().enumerate() {
        let resulting_position = rules
            .apply(&position, token)
            .map_err(|source| TimelineError::CorruptHistory { ply, source })?;
        let votes = position_votes.get(&resulting_position).cloned().unwrap_or_default();

        timeline.push(TimelineEntry {
            move_token: token.clone(),
            resulting_position: resulting_position.clone(),
            votes,
        });
        position = resulting_position;
    }

    Ok(timeline)
}

/// Check that a replayed timeline lands on the position the backend reports.
///
/// Only placement and side to move are compared; counters and en-passant rendering may
/// legitimately differ between rules engines.
pub fn check_final_position<R>(rules: &R, timeline: &[TimelineEntry], reported: &str) -> Result<(), TimelineError>
where
    R: RulesEngine + ?Sized,
{
    let replayed = timeline
        .last()
        .map(|entry| entry.resulting_position.clone())
        .unwrap_or_else(|| rules.initial_position());

    if position_core(&replayed) == position_core(reported) {
        Ok(())
    } else {
        Err(TimelineError::DivergentPosition {
            replayed,
            reported: reported.to_string(),
        })
    }
}
