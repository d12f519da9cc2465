use crate::{
    config::SessionSettings, render::RenderSize, routes::status::StatusResponse,
    server::SharedState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Invalid session settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid render target: {0}")]
    InvalidRenderTarget(String),
}

impl IntoResponse for UpdateError {
    fn into_response(self) -> Response {
        (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()).into_response()
    }
}

#[instrument(skip(state))]
pub async fn update_session(
    State(state): State<SharedState>,
    Json(settings): Json<SessionSettings>,
) -> Result<Json<StatusResponse>, UpdateError> {
    settings.validate().map_err(UpdateError::InvalidSettings)?;

    let mut manager = state.manager.lock().await;
    manager.apply(settings).await;
    let settings = manager.settings().clone();
    drop(manager);

    Ok(Json(StatusResponse::new(&state.view, settings)))
}

#[instrument(skip(state))]
pub async fn update_render_target(
    State(state): State<SharedState>,
    Json(size): Json<RenderSize>,
) -> Result<Json<RenderSize>, UpdateError> {
    if size.width == 0 || size.height == 0 {
        return Err(UpdateError::InvalidRenderTarget(format!(
            "{}x{} has no area",
            size.width, size.height
        )));
    }

    state.manager.lock().await.set_render_size(size);

    Ok(Json(state.view.render_size()))
}
