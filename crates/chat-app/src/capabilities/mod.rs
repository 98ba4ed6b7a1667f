//! Optional platform services. Each one is a trait with a no-op implementation so the
//! controller runs headless; front ends inject what the platform actually offers.

use std::sync::Arc;

use snafu::Snafu;

mod camera;
mod clipboard;
mod notification;
mod speech;
mod visibility;

pub use camera::{Camera, CameraError, CameraSession, CameraStream, NoCamera, capture_photo};
pub use clipboard::{Clipboard, NoClipboard};
pub use notification::{
    NOTIFICATIONS_BLOCKED_TEXT, NOTIFICATIONS_UNSUPPORTED_TEXT, NoopNotifier, Notification,
    NotificationPermission, Notifier,
};
pub use speech::{
    Dictation, DictationSession, MICROPHONE_DENIED_ALERT, SPEECH_UNSUPPORTED_TEXT, SpeechErrorKind,
    SpeechEvent, SpeechRecognizer, UnsupportedSpeech,
};
pub use visibility::{AlwaysVisible, ManualVisibility, Visibility};

use crate::attachment::ObjectUrlRegistry;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CapabilityError {
    #[snafu(display("{capability} is not available"))]
    Unsupported {
        stage: &'static str,
        capability: &'static str,
    },
    #[snafu(display("{capability} permission denied"))]
    PermissionDenied {
        stage: &'static str,
        capability: &'static str,
    },
    #[snafu(display("{capability} failed: {source}"))]
    Io {
        stage: &'static str,
        capability: &'static str,
        source: std::io::Error,
    },
}

/// Everything platform-specific the controller and shell may touch.
#[derive(Clone)]
pub struct Capabilities {
    pub notifier: Arc<dyn Notifier>,
    pub visibility: Arc<dyn Visibility>,
    pub clipboard: Arc<dyn Clipboard>,
    pub speech: Arc<dyn SpeechRecognizer>,
    pub camera: Arc<dyn Camera>,
    pub object_urls: Arc<ObjectUrlRegistry>,
}

impl Capabilities {
    /// No notifications, always visible, no clipboard, speech or camera.
    pub fn headless() -> Self {
        Self {
            notifier: Arc::new(NoopNotifier),
            visibility: Arc::new(AlwaysVisible),
            clipboard: Arc::new(NoClipboard),
            speech: Arc::new(UnsupportedSpeech),
            camera: Arc::new(NoCamera),
            object_urls: ObjectUrlRegistry::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_visibility(mut self, visibility: Arc<dyn Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = clipboard;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::headless()
    }
}
