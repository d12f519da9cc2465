use crate::{
    camera::Frame,
    channel::OutboundPayload,
    config::{PayloadEncoding, StreamConfig},
    render::RenderSize,
};
use base64::prelude::*;
use image::{codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, ImageError};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(ImageError),
    #[error("Failed to decode annotated frame: {0}")]
    DecodeFrameFailed(ImageError),
}

/// Turns camera frames into channel payloads.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    quality: u8,
    fallback_size: (u32, u32),
    encoding: PayloadEncoding,
}

impl FrameEncoder {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            quality: config.jpeg_quality.clamp(1, 100),
            fallback_size: (config.fallback_width, config.fallback_height),
            encoding: config.payload_encoding,
        }
    }

    /// Draws `frame` onto an offscreen bitmap at the feed's native size,
    /// or at the fallback size while that is unknown.
    pub fn render<'a>(&self, frame: &'a Frame, native_size: Option<(u32, u32)>) -> Cow<'a, Frame> {
        let (width, height) = native_size
            .filter(|(w, h)| *w > 0 && *h > 0)
            .unwrap_or(self.fallback_size);
        if frame.dimensions() == (width, height) {
            Cow::Borrowed(frame)
        } else {
            Cow::Owned(imageops::resize(frame, width, height, FilterType::Triangle))
        }
    }

    pub fn encode_jpeg(&self, bitmap: &Frame) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(bitmap)
            .map_err(FrameError::EncodeFrameFailed)?;
        Ok(buf)
    }

    pub fn to_payload(&self, jpeg: Vec<u8>) -> OutboundPayload {
        match self.encoding {
            PayloadEncoding::DataUri => OutboundPayload::Text(format!(
                "data:image/jpeg;base64,{}",
                BASE64_STANDARD.encode(&jpeg)
            )),
            PayloadEncoding::Binary => OutboundPayload::Binary(jpeg),
        }
    }

    pub fn encode(
        &self,
        frame: &Frame,
        native_size: Option<(u32, u32)>,
    ) -> Result<OutboundPayload, FrameError> {
        let bitmap = self.render(frame, native_size);
        let jpeg = self.encode_jpeg(&bitmap)?;
        Ok(self.to_payload(jpeg))
    }
}

/// Decodes a backend frame and scales it to the render target.
pub fn decode_annotated(bytes: &[u8], size: RenderSize) -> Result<Frame, FrameError> {
    let image = image::load_from_memory(bytes)
        .map_err(FrameError::DecodeFrameFailed)?
        .to_rgb8();
    if image.dimensions() == (size.width, size.height) {
        return Ok(image);
    }
    Ok(imageops::resize(
        &image,
        size.width,
        size.height,
        FilterType::Triangle,
    ))
}
