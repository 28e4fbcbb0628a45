pub mod backend;
pub mod http_backend;

pub use backend::{BackendError, GameBackend};
pub use http_backend::HttpBackend;
