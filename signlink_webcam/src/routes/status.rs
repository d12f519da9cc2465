use crate::{
    config::SessionSettings,
    render::RenderSize,
    server::SharedState,
    session::{SessionState, SessionView},
};
use axum::{extract::State, response::Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub connected: bool,
    pub prediction: Option<Value>,
    pub annotated_frame: Option<u64>,
    pub render_target: RenderSize,
    pub settings: SessionSettings,
}

impl StatusResponse {
    pub fn new(view: &SessionView, settings: SessionSettings) -> Self {
        Self {
            state: view.state(),
            connected: view.connected(),
            prediction: view.prediction(),
            annotated_frame: view.annotated_frame().map(|frame| frame.generation),
            render_target: view.render_size(),
            settings,
        }
    }
}

pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let settings = state.manager.lock().await.settings().clone();
    Json(StatusResponse::new(&state.view, settings))
}
