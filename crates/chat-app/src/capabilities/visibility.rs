use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the user is currently looking at the chat.
pub trait Visibility: Send + Sync {
    fn is_hidden(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl Visibility for AlwaysVisible {
    fn is_hidden(&self) -> bool {
        false
    }
}

/// Visibility flipped explicitly by the front end.
#[derive(Debug, Default)]
pub struct ManualVisibility {
    hidden: AtomicBool,
}

impl ManualVisibility {
    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self) -> bool {
        !self.hidden.fetch_xor(true, Ordering::Relaxed)
    }
}

impl Visibility for ManualVisibility {
    fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_reports_new_state() {
        let visibility = ManualVisibility::default();
        assert!(!visibility.is_hidden());
        assert!(visibility.toggle());
        assert!(visibility.is_hidden());
        assert!(!visibility.toggle());
        visibility.set_hidden(true);
        assert!(visibility.is_hidden());
    }
}
