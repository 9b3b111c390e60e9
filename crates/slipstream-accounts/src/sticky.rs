//! Sticky `model → account` pins.
//!
//! A pin is a soft preference for the account that last served a model
//! successfully. Reusing it maximizes the upstream prompt-cache hit rate.
//! Pins are observers: the store owns the accounts, and a pin to a vanished
//! or invalidated account simply fails the lookup.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use slipstream_core::constants::STICKY_IDLE_MS;

/// Sticky pin table shared across requests.
#[derive(Debug, Default)]
pub struct StickyPins {
    inner: Mutex<HashMap<String, (String, Instant)>>,
    idle: Duration,
}

impl StickyPins {
    /// Create with the default 10-minute idle window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            idle: Duration::from_millis(STICKY_IDLE_MS),
        }
    }

    /// Create with a custom idle window (tests).
    #[must_use]
    pub fn with_idle(idle: Duration) -> Self {
        Self { inner: Mutex::new(HashMap::new()), idle }
    }

    /// Pin `email` for `model`, refreshing the idle timer.
    pub fn pin(&self, model: &str, email: &str) {
        let _ = self
            .inner
            .lock()
            .insert(model.to_string(), (email.to_string(), Instant::now()));
    }

    /// The pinned account for `model`, unless the pin has idled out.
    #[must_use]
    pub fn get(&self, model: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        match inner.get(model) {
            Some((email, pinned_at)) if pinned_at.elapsed() < self.idle => Some(email.clone()),
            Some(_) => {
                let _ = inner.remove(model);
                None
            }
            None => None,
        }
    }

    /// Drop the pin for `model`.
    pub fn release(&self, model: &str) {
        let _ = self.inner.lock().remove(model);
    }

    /// Drop every pin pointing at `email` (account invalidated or removed).
    pub fn release_account(&self, email: &str) {
        self.inner.lock().retain(|_, (pinned, _)| pinned != email);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
