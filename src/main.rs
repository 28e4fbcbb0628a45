use actix::Actor;
use actix_web::{web, App, HttpServer};
use log::info;
use std::io;
use std::sync::Arc;

mod api;
mod config;
mod game;
mod models;
mod routes;
mod sync;
mod websocket;

use crate::api::HttpBackend;
use crate::config::AppConfig;
use crate::game::ChessRules;
use crate::models::AppState;
use crate::sync::{FileHighlightStore, SessionActor, SessionSynchronizer};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cfg = AppConfig::new().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let backend = HttpBackend::new(&cfg.backend_uri, cfg.request_timeout())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let highlights = FileHighlightStore::new(&cfg.highlight_store_path);
    info!("Highlighted squares are kept in {}", highlights.path().display());

    let sync = SessionSynchronizer::new(Box::new(ChessRules), Box::new(highlights), cfg.require_verification);
    let session = SessionActor::new(sync, Arc::new(backend), cfg.vote_poll_interval()).start();

    let app_state = web::Data::new(AppState { session });

    info!("Starting presentation bridge at http://{}", cfg.bind_address);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure_routes)
    })
    .bind(&cfg.bind_address)?
    .run()
    .await
}
