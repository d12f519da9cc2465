use crate::channel::RawMessage;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

const PREDICTION_FIELD: &str = "prediction";

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Inbound text is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Inbound JSON has no `prediction` field")]
    MissingPrediction,
}

/// What the backend sent, once told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The value of the `prediction` field, passed through untouched.
    Prediction(Value),
    /// Encoded image bytes to display as-is.
    AnnotatedImage(Bytes),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Prediction(_) => "prediction",
            InboundMessage::AnnotatedImage(_) => "annotated_image",
        }
    }
}

impl TryFrom<RawMessage> for InboundMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw {
            RawMessage::Text(text) => {
                let value: Value = serde_json::from_str(&text)?;
                extract_prediction(value)
            }
            RawMessage::Binary(bytes) => {
                // Some servers ship JSON in binary frames.
                if looks_like_json(&bytes) {
                    if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                        if let Ok(message) = extract_prediction(value) {
                            return Ok(message);
                        }
                    }
                }
                Ok(InboundMessage::AnnotatedImage(bytes))
            }
        }
    }
}

fn extract_prediction(mut value: Value) -> Result<InboundMessage, MessageError> {
    value
        .get_mut(PREDICTION_FIELD)
        .map(|prediction| InboundMessage::Prediction(prediction.take()))
        .ok_or(MessageError::MissingPrediction)
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}
