pub mod handler;
pub mod session_handlers;

pub use handler::{ws_index, BridgeSocket};
