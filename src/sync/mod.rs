pub mod highlight_store;
pub mod scheduler;
pub mod session_actor;
pub mod synchronizer;

pub use highlight_store::FileHighlightStore;
pub use scheduler::SchedulerState;
pub use session_actor::{
    GetState, ListMatches, ListSessions, LoadSession, ProposeMove, SelectPosition, SendVote, SessionActor, Subscribe,
    Unsubscribe, ViewMatch,
};
pub use synchronizer::SessionSynchronizer;
