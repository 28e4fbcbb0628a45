use serde::Serialize;

use crate::models::VoteTally;

/// Number of moves shown in the most-voted ranking
pub const RANKING_SIZE: usize = 3;

/// Token of the filler entries when fewer moves have votes
pub const PLACEHOLDER_TOKEN: &str = "N/A";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RankedMove {
    pub token: String,
    pub count: u64,
    pub percentage: f64,
}

impl RankedMove {
    fn placeholder() -> Self {
        Self {
            token: PLACEHOLDER_TOKEN.to_string(),
            count: 0,
            percentage: 0.0,
        }
    }
}

pub type DisplayRanking = [RankedMove; RANKING_SIZE];

/// Turn a raw tally into the fixed three-slot ranking.
///
/// The input order is kept as is: the backend sends its tally already sorted by votes.
/// Percentages are taken over the moves that make it into the ranking.
pub fn normalize(tallies: &[VoteTally]) -> DisplayRanking {
    let shown = &tallies[..tallies.len().min(RANKING_SIZE)];
    let total: u64 = shown.iter().map(VoteTally::count).sum();

    std::array::from_fn(|i| match shown.get(i) {
        Some(tally) => RankedMove {
            token: tally.token().to_string(),
            count: tally.count(),
            percentage: if total == 0 {
                0.0
            } else {
                100.0 * tally.count() as f64 / total as f64
            },
        },
        None => RankedMove::placeholder(),
    })
}
