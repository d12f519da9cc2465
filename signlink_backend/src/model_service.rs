use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// One recognised sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_label: String,
    pub confidence: f64,
    /// Hand region the label was read from. Drawn on the frame, not sent.
    #[serde(skip)]
    pub hand: Option<BoundingBox>,
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// `Ok(None)` when no hand is visible.
    async fn predict(&self, frame: &RgbImage) -> Result<Option<Detection>, ModelError>;
}

/// Answers every frame with the same label, around a centred hand region.
#[derive(Debug, Clone)]
pub struct StaticModelService {
    label: String,
    confidence: f64,
}

impl StaticModelService {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl ModelService for StaticModelService {
    async fn predict(&self, frame: &RgbImage) -> Result<Option<Detection>, ModelError> {
        let (width, height) = frame.dimensions();
        if width < 4 || height < 4 {
            return Ok(None);
        }
        Ok(Some(Detection {
            class_label: self.label.clone(),
            confidence: self.confidence,
            hand: Some(BoundingBox {
                x1: width / 4,
                y1: height / 4,
                x2: width * 3 / 4,
                y2: height * 3 / 4,
            }),
        }))
    }
}
