//! Campus Market sync daemon.
//!
//! Follows one store: loads its products, subscribes to realtime changes and
//! keeps the confirmed collection current, logging every change it applies.
//! Lines typed on stdin are debounced and run as product name searches.
//! Runs until Ctrl+C or SIGTERM.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use campus_market_client::auth::AuthGuard;
use campus_market_client::backend::{ChangeFeed, RealtimeFeed, SupabaseClient};
use campus_market_client::config::{CampusConfig, ConfigError};
use campus_market_client::editor::EditorSession;
use campus_market_client::error::AppError;
use campus_market_client::lockdown::{FileLockdownStore, LockdownGuard};
use campus_market_client::search::DebouncedSearch;
use campus_market_client::telemetry;
use campus_market_core::realtime::MergeOutcome;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// Tracing is not initialized until the config has loaded
#[allow(clippy::print_stderr)]
#[tokio::main]
async fn main() -> ExitCode {
    let config = match CampusConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry_guard = telemetry::init(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Sync daemon stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CampusConfig) -> Result<(), AppError> {
    let store_id = config
        .sync_store_id
        .ok_or_else(|| ConfigError::MissingEnvVar("SYNC_STORE_ID".to_string()))?;

    let client = SupabaseClient::new(&config.supabase);
    let mut feed = RealtimeFeed::new(&config.supabase);
    let mut auth = AuthGuard::new(client.clone());

    if let Some(account) = &config.account {
        let session = auth
            .sign_in(&account.email, account.password.expose_secret())
            .await?;
        client.set_session(Some(session)).await;
        feed = feed.with_session(session);
    }

    let lockdown = LockdownGuard::open(
        FileLockdownStore::new(&config.lockdown_state_path),
        config.lockdown_duration,
    )?;
    let mut editor = EditorSession::new(client.clone(), lockdown, store_id)
        .with_policy(config.abuse_policy)
        .with_page_size(config.page_size);

    editor.load().await?;
    tracing::info!(
        %store_id,
        products = editor.confirmed().len(),
        "Initial load complete"
    );

    let mut changes = feed.subscribe(store_id).await?;
    let (query_tx, mut queries) = DebouncedSearch::channel(config.search_debounce);
    tokio::spawn(read_queries(query_tx));
    let mut searching = true;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = changes.recv() => {
                let Some(event) = event else {
                    tracing::warn!("Realtime channel closed");
                    break;
                };
                let id = event.record_id();
                let kind = event.event_type;
                match editor.apply_remote(event) {
                    Some(MergeOutcome::Malformed) => {
                        tracing::warn!(?kind, "Ignoring malformed change");
                    }
                    Some(outcome) => {
                        tracing::info!(
                            ?kind,
                            id = ?id,
                            ?outcome,
                            products = editor.confirmed().len(),
                            "Change applied"
                        );
                    }
                    None => {}
                }
            }
            query = queries.next_query(), if searching => {
                let Some(query) = query else {
                    searching = false;
                    continue;
                };
                match editor.search(&query).await {
                    Ok(_) => tracing::info!(
                        search = editor.search_term().unwrap_or_default(),
                        products = editor.confirmed().len(),
                        "Search applied"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Search failed"),
                }
            }
            () = &mut shutdown => break,
        }
    }

    auth.sign_out().await?;
    client.set_session(None).await;
    Ok(())
}

/// Forward lines typed on stdin as search queries until stdin closes.
async fn read_queries(tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read search input");
                break;
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping sync");
}
