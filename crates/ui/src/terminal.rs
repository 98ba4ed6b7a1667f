//! Capabilities backed by the controlling terminal.

use std::io::{IsTerminal, Write};
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use colored::Colorize;
use futures::future::BoxFuture;
use ktr_chat::capabilities::{
    CapabilityError, Clipboard, Notification, NotificationPermission, Notifier,
};

/// Rings the bell and prints the notification to stderr.
///
/// Typing `/notify` is the consent, so a request grants immediately.
pub struct TerminalNotifier {
    permission: Mutex<NotificationPermission>,
    supported: bool,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Default),
            supported: std::io::stderr().is_terminal(),
        }
    }
}

impl Default for TerminalNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for TerminalNotifier {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn permission(&self) -> NotificationPermission {
        self.permission
            .lock()
            .map(|permission| *permission)
            .unwrap_or(NotificationPermission::Denied)
    }

    fn request_permission(&self) -> BoxFuture<'_, NotificationPermission> {
        Box::pin(async move {
            match self.permission.lock() {
                Ok(mut permission) => {
                    *permission = NotificationPermission::Granted;
                    NotificationPermission::Granted
                }
                Err(_) => NotificationPermission::Denied,
            }
        })
    }

    fn show(&self, notification: &Notification) -> Result<(), CapabilityError> {
        let mut stderr = std::io::stderr().lock();
        writeln!(
            stderr,
            "\x07{} {}",
            format!("{}:", notification.title).magenta().bold(),
            notification.body
        )
        .map_err(|source| CapabilityError::Io {
            stage: "terminal-notify",
            capability: "notifications",
            source,
        })
    }
}

/// Writes to the system clipboard through the OSC 52 escape sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Osc52Clipboard;

impl Osc52Clipboard {
    pub fn sequence(text: &str) -> String {
        format!("\x1b]52;c;{}\x07", STANDARD.encode(text))
    }
}

impl Clipboard for Osc52Clipboard {
    fn write_text(&self, text: &str) -> Result<(), CapabilityError> {
        let mut stdout = std::io::stdout().lock();
        if !stdout.is_terminal() {
            return Err(CapabilityError::Unsupported {
                stage: "osc52-clipboard",
                capability: "clipboard",
            });
        }

        stdout
            .write_all(Self::sequence(text).as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|source| CapabilityError::Io {
                stage: "osc52-clipboard",
                capability: "clipboard",
                source,
            })
    }
}
