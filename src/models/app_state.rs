use actix::Addr;

use crate::sync::SessionActor;

/// Application state shared between connections
pub struct AppState {
    pub session: Addr<SessionActor>,
}
