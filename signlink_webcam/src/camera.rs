use async_trait::async_trait;
use image::{Rgb, RgbImage};
use thiserror::Error;

/// A decoded camera frame in RGB order.
pub type Frame = RgbImage;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
}

#[cfg(feature = "opencv_camera")]
impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::ReadFrameFailed(err.to_string())
    }
}

/// Grants access to a camera. Acquisition may take arbitrarily long (a
/// permission prompt, a slow driver) and is awaited off the session loop.
#[async_trait]
pub trait CameraPlatform: Send + Sync + 'static {
    async fn acquire(&self) -> Result<Box<dyn CameraFeed>, CameraError>;
}

/// A live, acquired camera stream.
pub trait CameraFeed: Send {
    /// The most recent decoded frame, or `None` while the feed has not
    /// produced one yet.
    fn current_frame(&mut self) -> Option<Frame>;

    /// Native resolution, when the stream metadata is known.
    fn native_size(&self) -> Option<(u32, u32)>;

    /// Stops every track of the stream.
    fn stop_tracks(&mut self);
}

/// Owns an acquired feed and stops its tracks exactly once, either through
/// [`CameraHandle::release`] or on drop.
pub struct CameraHandle {
    feed: Option<Box<dyn CameraFeed>>,
}

impl CameraHandle {
    pub fn new(feed: Box<dyn CameraFeed>) -> Self {
        Self { feed: Some(feed) }
    }

    pub fn is_live(&self) -> bool {
        self.feed.is_some()
    }

    pub fn current_frame(&mut self) -> Option<Frame> {
        self.feed.as_mut()?.current_frame()
    }

    pub fn native_size(&self) -> Option<(u32, u32)> {
        self.feed.as_ref()?.native_size()
    }

    pub fn release(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.stop_tracks();
            tracing::debug!("Camera tracks stopped");
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Moving test pattern for machines without a camera.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

#[async_trait]
impl CameraPlatform for SyntheticCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraFeed>, CameraError> {
        tracing::info!(
            "Using synthetic camera at {}x{}",
            self.width,
            self.height
        );
        Ok(Box::new(SyntheticFeed {
            width: self.width,
            height: self.height,
            tick: 0,
            stopped: false,
        }))
    }
}

struct SyntheticFeed {
    width: u32,
    height: u32,
    tick: u32,
    stopped: bool,
}

impl CameraFeed for SyntheticFeed {
    fn current_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        self.tick = self.tick.wrapping_add(1);
        let offset = self.tick.wrapping_mul(8);
        let band = (offset % self.width.max(1), self.width / 8);
        Some(RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= band.0 && x < band.0 + band.1 {
                Rgb([240, 240, 240])
            } else {
                Rgb([
                    (x * 255 / self.width) as u8,
                    (y * 255 / self.height) as u8,
                    (offset % 256) as u8,
                ])
            }
        }))
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn stop_tracks(&mut self) {
        self.stopped = true;
    }
}

#[cfg(feature = "opencv_camera")]
pub use self::device::OpenCvCamera;

#[cfg(feature = "opencv_camera")]
mod device {
    use super::{async_trait, CameraError, CameraFeed, CameraPlatform, Frame};
    use image::RgbImage;
    use opencv::{core::Mat, imgproc, prelude::*, videoio};

    /// Local capture device opened through OpenCV.
    #[derive(Debug, Clone)]
    pub struct OpenCvCamera {
        device_index: i32,
    }

    impl OpenCvCamera {
        pub fn new(device_index: i32) -> Self {
            Self { device_index }
        }
    }

    #[async_trait]
    impl CameraPlatform for OpenCvCamera {
        async fn acquire(&self) -> Result<Box<dyn CameraFeed>, CameraError> {
            let index = self.device_index;
            let capture = tokio::task::spawn_blocking(move || {
                let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
                    .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))?;
                let opened = capture
                    .is_opened()
                    .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))?;
                if !opened {
                    return Err(CameraError::OpenCameraFailed(format!(
                        "device {} could not be opened",
                        index
                    )));
                }
                Ok(capture)
            })
            .await
            .map_err(|e| CameraError::OpenCameraFailed(e.to_string()))??;

            Ok(Box::new(OpenCvFeed {
                capture: Some(capture),
            }))
        }
    }

    struct OpenCvFeed {
        capture: Option<videoio::VideoCapture>,
    }

    impl OpenCvFeed {
        fn read_rgb(&mut self) -> Result<Option<Frame>, CameraError> {
            let Some(capture) = self.capture.as_mut() else {
                return Ok(None);
            };
            let mut bgr = Mat::default();
            if !capture.read(&mut bgr)? || bgr.empty() {
                return Ok(None);
            }
            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb.data_bytes()?.to_vec();
            Ok(RgbImage::from_raw(width, height, data))
        }
    }

    impl CameraFeed for OpenCvFeed {
        fn current_frame(&mut self) -> Option<Frame> {
            match self.read_rgb() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to read camera frame: {}", e);
                    None
                }
            }
        }

        fn native_size(&self) -> Option<(u32, u32)> {
            let capture = self.capture.as_ref()?;
            let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).ok()?;
            let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()?;
            (width >= 1.0 && height >= 1.0).then(|| (width as u32, height as u32))
        }

        fn stop_tracks(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    tracing::warn!("Failed to release capture device: {}", e);
                }
            }
        }
    }
}
