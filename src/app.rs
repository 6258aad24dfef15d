//! Wires configuration into the engine: browser session, vault, ledger and
//! orchestrator for one invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use apply_engine::{
    AuthManager, AuthSuccess, BatchReport, EnvCredentialsSource, Orchestrator, PlatformProfile,
};
use apply_ledger::Ledger;
use autoapply_core_types::SearchQuery;
use browser_port::{BrowserSession, CdpBrowserSession};
use session_vault::Vault;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::AppConfig;

async fn open_session(config: &AppConfig) -> Result<CdpBrowserSession> {
    let session_cfg = config.session_config();
    CdpBrowserSession::launch(&session_cfg)
        .await
        .context("could not start a browser session")
}

fn auth_manager(config: &AppConfig, profile: Arc<PlatformProfile>) -> AuthManager<EnvCredentialsSource> {
    AuthManager::new(
        Vault::new(config.storage.vault_path()),
        EnvCredentialsSource,
        profile,
    )
}

/// Open the ledger read-only style; a missing or unreadable file is an
/// empty ledger, never an error.
pub fn load_ledger(config: &AppConfig) -> Ledger {
    Ledger::load(config.storage.ledger_path())
}

/// One end-to-end batch: login (or session reuse), search, apply loop. The
/// browser is closed before returning, whatever happened.
pub async fn run_application_batch(
    config: &AppConfig,
    query: SearchQuery,
    cap: Option<usize>,
    cancel: CancellationToken,
) -> Result<BatchReport> {
    let profile = Arc::new(config.platform_profile()?);
    let session = open_session(config).await?;
    let auth = auth_manager(config, profile.clone());
    let ledger = Arc::new(Mutex::new(load_ledger(config)));

    let orchestrator = Orchestrator::new(profile, ledger)
        .with_cancel(cancel)
        .with_pacing(config.run.pacing_min_ms, config.run.pacing_max_ms);

    let cap = cap.or(config.run.cap);
    let result = orchestrator.run_batch(&session, &auth, &query, cap).await;

    if let Err(err) = session.close().await {
        warn!(%err, "browser session did not close cleanly");
    }
    result.context("batch aborted")
}

/// Auth step only: probe the stored session, refresh it via credential
/// login when stale.
pub async fn refresh_login(config: &AppConfig) -> Result<AuthSuccess> {
    let profile = Arc::new(config.platform_profile()?);
    let session = open_session(config).await?;
    let auth = auth_manager(config, profile);

    let result = auth.attempt_login(&session).await;

    if let Err(err) = session.close().await {
        warn!(%err, "browser session did not close cleanly");
    }
    result.context("login failed")
}
