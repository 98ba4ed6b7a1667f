use futures::future::BoxFuture;
use snafu::Snafu;

use crate::attachment::ImageAttachment;

/// Camera failures as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CameraError {
    #[snafu(display("Camera permission request was dismissed. Try again to be asked again."))]
    PermissionDismissed { stage: &'static str },
    #[snafu(display(
        "Camera permission denied. Please enable camera access in your system settings."
    ))]
    PermissionDenied { stage: &'static str },
    #[snafu(display("No camera found. Please ensure a camera is connected and enabled."))]
    NotFound { stage: &'static str },
    #[snafu(display("Could not access the camera. Please try again."))]
    Other {
        stage: &'static str,
        details: String,
    },
}

impl CameraError {
    /// Classifies a platform error by its name and message.
    pub fn classify(stage: &'static str, name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" if message.to_ascii_lowercase().contains("dismissed") => {
                Self::PermissionDismissed { stage }
            }
            "NotAllowedError" | "PermissionDeniedError" => Self::PermissionDenied { stage },
            "NotFoundError" | "DevicesNotFoundError" => Self::NotFound { stage },
            _ => Self::Other {
                stage,
                details: format!("{name}: {message}"),
            },
        }
    }

    /// Dismissal can be retried in place; the rest need the user to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PermissionDismissed { .. } | Self::Other { .. })
    }
}

pub trait Camera: Send + Sync {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>>;
}

/// A live device stream.
pub trait CameraStream: Send {
    fn capture_jpeg(&mut self) -> Result<Vec<u8>, CameraError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCamera;

impl Camera for NoCamera {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>, CameraError>> {
        Box::pin(async {
            Err(CameraError::NotFound {
                stage: "camera-open",
            })
        })
    }
}

/// Owns an open stream and stops it on drop.
pub struct CameraSession {
    stream: Box<dyn CameraStream>,
}

impl CameraSession {
    pub async fn open(camera: &dyn Camera) -> Result<Self, CameraError> {
        let stream = camera.open().await?;
        Ok(Self { stream })
    }

    pub fn capture(&mut self) -> Result<ImageAttachment, CameraError> {
        let frame = self.stream.capture_jpeg()?;
        ImageAttachment::jpeg(frame).map_err(|error| CameraError::Other {
            stage: "camera-capture-encode",
            details: error.to_string(),
        })
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

/// Opens the camera, grabs one JPEG frame and releases the device.
pub async fn capture_photo(camera: &dyn Camera) -> Result<ImageAttachment, CameraError> {
    let mut session = CameraSession::open(camera).await?;
    let photo = session.capture();
    if let Err(error) = &photo {
        tracing::warn!(error = %error, "camera capture failed");
    }
    photo
}
