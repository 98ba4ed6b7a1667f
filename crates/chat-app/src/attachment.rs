//! Image attachments and the preview URLs handed to the rendered log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::{OptionExt, ResultExt, ensure};

use crate::error::{
    ChatResult, EmptyAttachmentSnafu, ReadAttachmentSnafu, UnsupportedAttachmentSnafu,
};

pub const OBJECT_URL_PREFIX: &str = "blob:ktr/";
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Raw image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> ChatResult<Self> {
        let mime_type = mime_type.into();
        let bytes = bytes.into();
        ensure!(
            !bytes.is_empty(),
            EmptyAttachmentSnafu {
                stage: "attachment-new",
                mime_type: mime_type.clone(),
            }
        );
        Ok(Self { mime_type, bytes })
    }

    /// A JPEG frame, as produced by camera capture.
    pub fn jpeg(bytes: impl Into<Arc<[u8]>>) -> ChatResult<Self> {
        Self::new(JPEG_MIME_TYPE, bytes)
    }

    /// Reads an image file; the MIME type comes from the extension.
    pub async fn from_path(path: &Path) -> ChatResult<Self> {
        let mime_type = mime_type_for_path(path).context(UnsupportedAttachmentSnafu {
            stage: "attachment-mime-type",
            path: path.display().to_string(),
        })?;
        let bytes = tokio::fs::read(path).await.context(ReadAttachmentSnafu {
            stage: "attachment-read",
            path: path.display().to_string(),
        })?;

        tracing::debug!(
            path = %path.display(),
            mime_type,
            len = bytes.len(),
            "read image attachment"
        );
        Self::new(mime_type, bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn mime_type_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => JPEG_MIME_TYPE,
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime_type)
}

/// Process-local table of preview URLs, the analogue of browser object URLs.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    entries: Mutex<HashMap<String, ImageAttachment>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `image` and returns a guard that revokes the URL when dropped.
    pub fn create(self: &Arc<Self>, image: &ImageAttachment) -> ObjectUrl {
        let url = format!("{OBJECT_URL_PREFIX}{}", uuid::Uuid::now_v7());
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.clone(), image.clone());
        }
        ObjectUrl {
            url,
            registry: Arc::downgrade(self),
        }
    }

    pub fn resolve(&self, url: &str) -> Option<ImageAttachment> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(url).cloned())
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn revoke(&self, url: &str) {
        if let Ok(mut entries) = self.entries.lock()
            && entries.remove(url).is_some()
        {
            tracing::trace!(url, "revoked object url");
        }
    }
}

/// Live preview URL; revoked on drop.
#[derive(Debug)]
pub struct ObjectUrl {
    url: String,
    registry: Weak<ObjectUrlRegistry>,
}

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.revoke(&self.url);
        }
    }
}
