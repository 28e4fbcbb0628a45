use actix_web::{web, HttpResponse, Responder};
use log::warn;

use crate::models::AppState;
use crate::sync::GetState;

/// Current read model as JSON
pub async fn state(app_state: web::Data<AppState>) -> impl Responder {
    match app_state.session.send(GetState).await {
        Ok(state) => HttpResponse::Ok().json(state),
        Err(e) => {
            warn!("Session actor unavailable: {}", e);
            HttpResponse::ServiceUnavailable().finish()
        }
    }
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/state").route(web::get().to(state)));
}
