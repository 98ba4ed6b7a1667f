use futures::future::BoxFuture;

use super::CapabilityError;

pub const NOTIFICATIONS_BLOCKED_TEXT: &str =
    "Notifications are blocked. Please enable them in your system settings.";
pub const NOTIFICATIONS_UNSUPPORTED_TEXT: &str = "Desktop notifications are not supported here.";

/// Permission model of desktop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotificationPermission {
    /// Never asked.
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn is_supported(&self) -> bool;
    fn permission(&self) -> NotificationPermission;
    /// Asks the user; resolves to the permission they chose.
    fn request_permission(&self) -> BoxFuture<'_, NotificationPermission>;
    fn show(&self, notification: &Notification) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn is_supported(&self) -> bool {
        false
    }

    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Default
    }

    fn request_permission(&self) -> BoxFuture<'_, NotificationPermission> {
        Box::pin(async { NotificationPermission::Default })
    }

    fn show(&self, _notification: &Notification) -> Result<(), CapabilityError> {
        Ok(())
    }
}
