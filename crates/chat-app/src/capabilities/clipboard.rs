use super::CapabilityError;

pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoClipboard;

impl Clipboard for NoClipboard {
    fn write_text(&self, _text: &str) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported {
            stage: "clipboard-write",
            capability: "clipboard",
        })
    }
}
