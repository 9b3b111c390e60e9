//! slipstream: an Anthropic-compatible proxy over the Cloud Code upstream.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slipstream_accounts::{spawn_refresh_loop, AccountStore};
use slipstream_auth::storage::load_accounts;
use slipstream_auth::types::AccountsFile;
use slipstream_auth::TokenRegistry;
use slipstream_server::shutdown::{shutdown_signal, teardown};
use slipstream_server::{server, AppState, Config};
use slipstream_upstream::UpstreamClient;

/// CLI flags; each overrides the loaded configuration.
#[derive(Debug, Parser)]
#[command(name = "slipstream", version, about)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,
    /// Data directory holding accounts.json.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Fallback model tried once when all accounts are exhausted.
    #[arg(long)]
    fallback_model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(fallback) = args.fallback_model {
        config.fallback_model = Some(fallback);
    }

    let accounts_path = config.accounts_path();
    let accounts_file = load_accounts(&accounts_path).unwrap_or_else(|| {
        warn!("no accounts file found; requests will fail until accounts are enrolled");
        AccountsFile::default()
    });
    info!(accounts = accounts_file.accounts.len(), "account pool loaded");

    let http = reqwest::Client::new();
    let store = Arc::new(AccountStore::from_file(
        &accounts_file,
        http.clone(),
        Arc::new(TokenRegistry::new()),
    ));

    // Write-back hook: every pool mutation lands on disk.
    {
        let path = accounts_path.clone();
        let file = accounts_file.clone();
        store.set_persist_hook(Arc::new(move |accounts| {
            let mut snapshot = file.clone();
            snapshot.accounts = accounts;
            if let Err(e) = slipstream_auth::storage::save_accounts(&path, &snapshot) {
                warn!("failed to persist account state: {e}");
            }
        }));
    }

    let refresh_task = spawn_refresh_loop(Arc::clone(&store));
    let state = AppState::new(Arc::clone(&store), UpstreamClient::new(http), &config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen address")?;

    server::run(state, addr, shutdown_signal()).await.context("server error")?;

    teardown(&store, &refresh_task, &accounts_path, accounts_file);
    Ok(())
}
