//! Background proactive-refresh tick.
//!
//! Every 30 seconds, accounts whose tokens fall inside the refresh buffer
//! (and whose failure backoff has elapsed) get refreshed ahead of demand,
//! so dispatch rarely pays the token-endpoint round trip. The registry's
//! in-flight set keeps the tick from doubling up on an email; the store's
//! flight mutex keeps the tick from racing a dispatch-time refresh.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use slipstream_core::constants::REFRESH_TICK_SECS;

use crate::store::AccountStore;

/// Spawn the refresh loop. Aborting the returned handle stops it.
pub fn spawn_refresh_loop(store: Arc<AccountStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_secs(REFRESH_TICK_SECS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let _ = tick.tick().await;
            run_refresh_tick(&store).await;
        }
    })
}

/// One pass over the pool: refresh every account that is due.
pub async fn run_refresh_tick(store: &Arc<AccountStore>) {
    let due = store.registry().due_for_refresh();
    if due.is_empty() {
        return;
    }
    debug!(count = due.len(), "proactive refresh tick");

    for email in due {
        if !store.registry().try_begin_refresh(&email) {
            continue;
        }
        let store = Arc::clone(store);
        let _ = tokio::spawn(async move {
            let flight = store.flight(&email);
            let _guard = flight.lock().await;
            match store.refresh_access_token(&email).await {
                Ok(_) => info!("proactive refresh succeeded"),
                Err(e) => debug!(error = %e, "proactive refresh failed"),
            }
            store.registry().end_refresh(&email);
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
