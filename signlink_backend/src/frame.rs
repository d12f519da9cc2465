use base64::prelude::*;
use image::{codecs::jpeg::JpegEncoder, ImageError, RgbImage};
use thiserror::Error;

const DATA_URI_PREFIX: &str = "data:image";

#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("Data uri has no payload")]
    MissingPayload,
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Failed to decode image: {0}")]
    InvalidImage(#[from] ImageError),
}

/// True for the `data:image/...;base64,` text frames browsers send.
pub fn is_data_uri(text: &str) -> bool {
    text.starts_with(DATA_URI_PREFIX)
}

pub fn decode_data_uri(text: &str) -> Result<RgbImage, FrameDecodeError> {
    let (_, payload) = text
        .split_once(',')
        .ok_or(FrameDecodeError::MissingPayload)?;
    let bytes = BASE64_STANDARD.decode(payload.trim())?;
    decode_bytes(&bytes)
}

pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, FrameDecodeError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 80).encode_image(frame)?;
    Ok(buf)
}
