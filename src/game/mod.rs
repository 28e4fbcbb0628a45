pub mod rules;
pub mod tally;
pub mod timeline;
pub mod utils;

pub use rules::{ChessRules, RulesEngine};
pub use tally::{normalize, RankedMove};
pub use timeline::{reconstruct, TimelineEntry, TimelineError};
