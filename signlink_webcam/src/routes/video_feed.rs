use crate::{
    server::SharedState,
    stream::{FeedSource, VideoStream, VideoStreamError},
};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    feed(state, FeedSource::Preview)
}

#[instrument(skip(state))]
pub async fn annotated_feed(
    State(state): State<SharedState>,
) -> Result<Response, VideoStreamError> {
    feed(state, FeedSource::Annotated)
}

fn feed(state: SharedState, source: FeedSource) -> Result<Response, VideoStreamError> {
    let stream = VideoStream::new(
        state.view.clone(),
        state.encoder.clone(),
        source,
        state.feed_delay,
        state.shutdown.clone(),
    )
    .generate_stream();

    let body = Body::from_stream(stream);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, VideoStream::content_type())
        .body(body)
        .map_err(|e| VideoStreamError::HttpBuilderError(e.to_string()))?;

    Ok(response)
}

impl IntoResponse for VideoStreamError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
