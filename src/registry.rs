//! Destinations subscribed to the daily report.
//!
//! In-memory only: the set starts from config and grows as chats opt in.

use std::fmt;

use parking_lot::Mutex;

/// Opaque destination handle (a Telegram chat id in production).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipient(pub String);

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Insertion-ordered recipient set.
#[derive(Default)]
pub struct RecipientRegistry {
    recipients: Mutex<Vec<Recipient>>,
}

impl RecipientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(initial: impl IntoIterator<Item = Recipient>) -> Self {
        let registry = Self::new();
        for recipient in initial {
            registry.register(recipient);
        }
        registry
    }

    /// Add a recipient. Returns false if it was already registered.
    pub fn register(&self, recipient: Recipient) -> bool {
        let mut guard = self.recipients.lock();
        if guard.contains(&recipient) {
            return false;
        }
        log::info!("Registered report recipient {}", recipient);
        guard.push(recipient);
        true
    }

    /// Snapshot of the current recipients, in registration order
    pub fn list(&self) -> Vec<Recipient> {
        self.recipients.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.recipients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.lock().is_empty()
    }
}
