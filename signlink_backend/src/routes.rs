use crate::{
    annotate::draw_box,
    frame::{decode_bytes, decode_data_uri, encode_jpeg, is_data_uri, FrameDecodeError},
    model_service::ModelService,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct BackendState {
    pub model: Arc<dyn ModelService>,
}

pub fn api_routes() -> Router<BackendState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/webcam/ws", get(webcam_ws))
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        status: "Available",
    })
}

#[instrument(skip_all)]
async fn webcam_ws(ws: WebSocketUpgrade, State(state): State<BackendState>) -> Response {
    ws.on_upgrade(move |socket| translate_webcam(socket, state))
}

enum Incoming {
    Frame(RgbImage),
    Ignored,
    Closed,
}

fn decode_message(message: Message) -> Result<Incoming, FrameDecodeError> {
    match message {
        Message::Text(text) if is_data_uri(text.as_str()) => {
            Ok(Incoming::Frame(decode_data_uri(text.as_str())?))
        }
        Message::Text(_) => Ok(Incoming::Ignored),
        Message::Binary(bytes) => Ok(Incoming::Frame(decode_bytes(&bytes)?)),
        Message::Close(_) => Ok(Incoming::Closed),
        _ => Ok(Incoming::Ignored),
    }
}

/// For each frame: run the model, reply with the annotated frame as a
/// binary JPEG, then with `{"prediction": ...}` as text.
async fn translate_webcam(mut socket: WebSocket, state: BackendState) {
    tracing::info!("Webcam client connected");
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Webcam socket error: {}", e);
                break;
            }
        };
        let mut frame = match decode_message(message) {
            Ok(Incoming::Frame(frame)) => frame,
            Ok(Incoming::Ignored) => continue,
            Ok(Incoming::Closed) => break,
            Err(e) => {
                tracing::warn!("Skipping undecodable frame: {}", e);
                continue;
            }
        };

        let prediction = match state.model.predict(&frame).await {
            Ok(prediction) => prediction,
            Err(e) => {
                tracing::error!("Model error: {}", e);
                None
            }
        };
        if let Some(hand) = prediction.as_ref().and_then(|p| p.hand) {
            draw_box(&mut frame, &hand);
        }

        let jpeg = match encode_jpeg(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::error!("Failed to encode annotated frame: {}", e);
                continue;
            }
        };
        if socket.send(Message::Binary(jpeg.into())).await.is_err() {
            break;
        }
        let body = serde_json::json!({ "prediction": prediction });
        if socket
            .send(Message::Text(body.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
    tracing::info!("Webcam client disconnected");
}
