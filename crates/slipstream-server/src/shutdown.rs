//! Shutdown signal and teardown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use slipstream_accounts::AccountStore;
use slipstream_auth::storage::save_accounts;
use slipstream_auth::types::AccountsFile;

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            let _ = signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

/// Teardown: stop the refresh ticker and persist mutable account state.
pub fn teardown(
    store: &Arc<AccountStore>,
    refresh_task: &JoinHandle<()>,
    accounts_path: &std::path::Path,
    mut file: AccountsFile,
) {
    refresh_task.abort();

    file.accounts = store.to_stored();
    match save_accounts(accounts_path, &file) {
        Ok(()) => info!("account state persisted"),
        Err(e) => tracing::warn!("failed to persist account state: {e}"),
    }
}
