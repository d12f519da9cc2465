use crate::camera::Frame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

/// A backend frame as drawn into the render target.
#[derive(Debug)]
pub struct AnnotatedFrame {
    pub generation: u64,
    pub image: Frame,
}

pub type FrameHandle = Arc<AnnotatedFrame>;

/// Holds the one annotated frame currently on display. Publishing a new
/// frame drops the target's reference to the previous one.
#[derive(Debug)]
pub struct RenderTarget {
    size: RenderSize,
    current: Option<FrameHandle>,
    generation: u64,
}

impl RenderTarget {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            current: None,
            generation: 0,
        }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn resize(&mut self, size: RenderSize) {
        self.size = size;
    }

    pub fn publish(&mut self, image: Frame) -> FrameHandle {
        self.generation += 1;
        let frame = Arc::new(AnnotatedFrame {
            generation: self.generation,
            image,
        });
        if let Some(previous) = self.current.replace(frame.clone()) {
            tracing::trace!("Released annotated frame {}", previous.generation);
        }
        frame
    }

    pub fn current(&self) -> Option<FrameHandle> {
        self.current.clone()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
