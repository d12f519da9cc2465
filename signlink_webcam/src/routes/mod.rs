mod health;
mod metrics;
mod session;
mod status;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, put},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/status", get(status::status))
        .route("/session", put(session::update_session))
        .route("/render_target", put(session::update_render_target))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/annotated_feed", get(video_feed::annotated_feed))
}
