mod credentials;
mod logging;
mod models;
mod oauth;
mod server;
mod sse;
mod transform;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use credentials::{
    CredentialStore, EnvCredentialStore, FsCredentialStore, KeychainCredentialStore,
};
use oauth::OAuthFetcher;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_PORT: u16 = 9879;

#[derive(Debug, Parser)]
#[command(name = "codex-proxy")]
#[command(version)]
#[command(about = "OpenAI-compatible proxy for the ChatGPT Codex Responses backend")]
struct Cli {
    /// Credential store backend.
    #[arg(long, value_enum, default_value_t = CredsStore::Auto)]
    creds_store: CredsStore,

    /// Override path for filesystem credentials (xdg/legacy modes).
    #[arg(long)]
    creds_path: Option<PathBuf>,

    /// Skip the immediate token refresh after migration.
    #[arg(long)]
    disable_migrate_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CredsStore {
    Auto,
    Xdg,
    Legacy,
    Keychain,
    Env,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    info!(
        creds_store = ?cli.creds_store,
        creds_path = ?cli.creds_path,
        "starting codex-proxy"
    );

    let creds: Arc<dyn CredentialStore> = match cli.creds_store {
        CredsStore::Auto | CredsStore::Xdg => {
            let path = cli
                .creds_path
                .clone()
                .unwrap_or_else(credentials::default_creds_path);
            info!(path = %path.display(), "using filesystem credentials with OAuth token refresh");

            if cli.creds_store == CredsStore::Auto {
                if let Err(err) = maybe_migrate_credentials(&path, cli.disable_migrate_refresh) {
                    error!(
                        error = %err,
                        target_path = %path.display(),
                        "migration failed, continuing with existing credentials if available"
                    );
                }
            }

            Arc::new(OAuthFetcher::new(Box::new(FsCredentialStore::new(path))))
        }
        CredsStore::Legacy => {
            let path = cli
                .creds_path
                .clone()
                .unwrap_or_else(credentials::legacy_creds_path);
            info!(path = %path.display(), "using legacy filesystem credentials with OAuth token refresh");
            Arc::new(OAuthFetcher::new(Box::new(FsCredentialStore::new(path))))
        }
        CredsStore::Keychain => {
            info!("using keychain credentials with OAuth token refresh");
            Arc::new(OAuthFetcher::new(Box::new(KeychainCredentialStore::new())))
        }
        CredsStore::Env => {
            info!("using environment credentials");
            Arc::new(EnvCredentialStore)
        }
    };

    validate_credentials_at_startup(creds.as_ref());

    let port = env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    server::run("0.0.0.0", port, creds)
}

/// In `auto` mode, seeds the target credentials file from the legacy file
/// (preferred) or the keychain when the target does not exist yet, then
/// performs one immediate refresh so the migrated process owns an
/// independent refresh chain.
fn maybe_migrate_credentials(target: &Path, disable_refresh: bool) -> Result<()> {
    if target.exists() {
        info!(target_path = %target.display(), "credentials already exist at target path, skipping migration");
        return Ok(());
    }

    info!(target_path = %target.display(), "target credentials file not found, attempting migration");

    let legacy_path = credentials::legacy_creds_path();
    let (migrated, source) = if legacy_path.exists() {
        let store = FsCredentialStore::new(legacy_path.clone());
        let creds = store
            .get_full_credentials()
            .with_context(|| format!("failed to read legacy credentials {}", legacy_path.display()))?;
        (creds, "legacy file")
    } else {
        let creds = credentials::read_oauth_from_keychain()
            .context("failed to read credentials from keychain")?;
        (creds, "keychain")
    };

    info!(
        user_id = %migrated.user_id,
        expires_at = migrated.expires_at_ms,
        source,
        "read credentials for migration"
    );

    credentials::init_from_oauth(target, &migrated)
        .with_context(|| format!("failed to write credentials to {}", target.display()))?;
    info!(target_path = %target.display(), "credentials file created");

    if disable_refresh {
        info!("skipping immediate token refresh (disabled by flag)");
        return Ok(());
    }

    info!(source, "performing immediate token refresh to establish an independent token chain");
    let tokens = match oauth::refresh_token(&migrated.refresh_token) {
        Ok(tokens) => tokens,
        Err(err) => {
            warn!(error = %err, "failed to refresh tokens after migration, will retry on first request");
            return Ok(());
        }
    };

    let expires_at = oauth::calculate_expires_at(tokens.expires_in);
    FsCredentialStore::new(target.to_path_buf())
        .update_tokens(&tokens.access_token, &tokens.refresh_token, expires_at)
        .context("failed to persist refreshed tokens after migration")?;

    info!(
        minutes_until_expiry = (expires_at - oauth::now_millis()) / 1000 / 60,
        "token refresh successful, independent token chain established"
    );
    Ok(())
}

/// Logs credential health at startup. Failures are warnings only: the server
/// still starts so the admin endpoints can seed credentials later.
fn validate_credentials_at_startup(creds: &dyn CredentialStore) {
    let (token, user_id) = match creds.get_credentials() {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, "failed to validate credentials at startup");
            return;
        }
    };
    info!(user_id = %user_id, token_length = token.len(), "credentials loaded");

    if !creds.supports_oauth() {
        return;
    }
    match creds.get_full_credentials() {
        Err(err) => {
            warn!(error = %err, "could not get full OAuth credentials for validation");
        }
        Ok(full) => {
            let minutes_until_expiry = (full.expires_at_ms - oauth::now_millis()) / 1000 / 60;
            if minutes_until_expiry <= 0 {
                warn!(
                    minutes_expired = -minutes_until_expiry,
                    "token is already expired, will attempt refresh on first request"
                );
            } else if minutes_until_expiry <= 60 {
                warn!(minutes_until_expiry, "token expires soon, will refresh shortly");
            } else {
                info!(minutes_until_expiry, "token is valid and not expiring soon");
            }
        }
    }
}
