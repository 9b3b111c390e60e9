//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use slipstream_accounts::{AccountStore, StickyPins};
use slipstream_translate::SignatureCache;
use slipstream_upstream::{Scheduler, UpstreamClient};

use crate::config::Config;

/// State injected into every handler. Clone-friendly: everything is `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The account pool.
    pub store: Arc<AccountStore>,
    /// Sticky pins (shared with the scheduler).
    pub pins: Arc<StickyPins>,
    /// Thinking-signature cache (shared with the scheduler).
    pub signatures: Arc<SignatureCache>,
    /// The scheduler.
    pub scheduler: Arc<Scheduler>,
    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    /// Wire up state over a prepared account store.
    #[must_use]
    pub fn new(store: Arc<AccountStore>, client: UpstreamClient, config: &Config) -> Self {
        let pins = Arc::new(StickyPins::new());
        let signatures = Arc::new(SignatureCache::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&pins),
            client,
            Arc::clone(&signatures),
            config.fallback_model.clone(),
        ));
        Self { store, pins, signatures, scheduler, start_time: Instant::now() }
    }
}
