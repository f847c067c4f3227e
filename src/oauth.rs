use crate::credentials::{CredentialStore, OAuthCredentials};
use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

pub const TOKEN_ENDPOINT: &str = "https://auth.openai.com/oauth/token";
pub const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

/// Tokens are treated as expired one hour before their actual expiry so a
/// refresh happens while the old token still works.
const TOKEN_EXPIRY_BUFFER_MS: i64 = 60 * 60 * 1000;
const BACKGROUND_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
const REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn token_expired(expires_at_ms: i64) -> bool {
    now_millis() >= expires_at_ms - TOKEN_EXPIRY_BUFFER_MS
}

pub fn calculate_expires_at(expires_in_secs: i64) -> i64 {
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    (now_secs + expires_in_secs) * 1000
}

fn minutes_until_expiry(expires_at_ms: i64) -> i64 {
    (expires_at_ms - now_millis()) / 1000 / 60
}

#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'static str,
    scope: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
}

/// Exchanges a refresh token for fresh tokens at the OAuth token endpoint.
pub fn refresh_token(refresh_token: &str) -> Result<TokenRefreshResponse> {
    let client = Client::builder()
        .timeout(REFRESH_TIMEOUT)
        .build()
        .context("failed to create token refresh client")?;

    let response = client
        .post(TOKEN_ENDPOINT)
        .json(&TokenRefreshRequest {
            grant_type: "refresh_token",
            refresh_token,
            client_id: CLIENT_ID,
            scope: "openid profile email",
        })
        .send()
        .context("failed requesting token refresh")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        bail!("token refresh failed with status {status}: {body}");
    }

    response
        .json()
        .context("failed to decode token refresh response")
}

struct FetcherInner {
    store: Box<dyn CredentialStore>,
    lock: Mutex<()>,
    stop: Mutex<Option<mpsc::Sender<()>>>,
}

/// Decorates a credential store with OAuth token refresh. A single mutex
/// guards every read-modify-write of the credentials; it is held across
/// store I/O and the refresh HTTP call but never across upstream requests.
/// A background thread re-checks expiry every ten minutes until `close()`.
pub struct OAuthFetcher {
    inner: Arc<FetcherInner>,
}

impl OAuthFetcher {
    pub fn new(store: Box<dyn CredentialStore>) -> Self {
        let inner = Arc::new(FetcherInner {
            store,
            lock: Mutex::new(()),
            stop: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = mpsc::channel();
        *inner.stop.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);

        let shared = Arc::clone(&inner);
        thread::spawn(move || loop {
            match stop_rx.recv_timeout(BACKGROUND_REFRESH_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => shared.check_and_refresh(),
                _ => {
                    debug!("background token refresh stopped");
                    return;
                }
            }
        });

        Self { inner }
    }

    /// Stops the background refresh thread. Idempotent.
    pub fn close(&self) {
        self.inner
            .stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl Drop for OAuthFetcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl FetcherInner {
    fn check_and_refresh(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let creds = match self.store.get_full_credentials() {
            Ok(creds) => creds,
            Err(err) => {
                error!(error = %err, "background refresh: failed to get credentials");
                return;
            }
        };
        if !token_expired(creds.expires_at_ms) {
            debug!(
                minutes_until_expiry = minutes_until_expiry(creds.expires_at_ms),
                "background refresh: token still valid"
            );
            return;
        }

        info!(
            minutes_until_expiry = minutes_until_expiry(creds.expires_at_ms),
            "background refresh: token expiring soon, refreshing"
        );
        let new_tokens = match refresh_token(&creds.refresh_token) {
            Ok(tokens) => tokens,
            Err(err) => {
                error!(error = %err, "background refresh: failed to refresh token");
                return;
            }
        };

        let expires_at = calculate_expires_at(new_tokens.expires_in);
        if let Err(err) = self.store.update_tokens(
            &new_tokens.access_token,
            &new_tokens.refresh_token,
            expires_at,
        ) {
            error!(error = %err, "background refresh: failed to persist tokens");
            return;
        }
        info!(
            minutes_until_expiry = minutes_until_expiry(expires_at),
            "background refresh: token refreshed"
        );
    }
}

impl CredentialStore for OAuthFetcher {
    fn get_credentials(&self) -> Result<(String, String)> {
        let _guard = self.inner.lock.lock().unwrap_or_else(|e| e.into_inner());

        let creds = self
            .inner
            .store
            .get_full_credentials()
            .context("failed to get full credentials")?;

        if !token_expired(creds.expires_at_ms) {
            debug!(
                minutes_until_expiry = minutes_until_expiry(creds.expires_at_ms),
                "access token still valid"
            );
            return Ok((creds.access_token, creds.user_id));
        }

        info!(
            minutes_until_expiry = minutes_until_expiry(creds.expires_at_ms),
            "access token expired or expiring soon, refreshing"
        );
        let new_tokens = match refresh_token(&creds.refresh_token) {
            Ok(tokens) => tokens,
            Err(err) => {
                // Serve the stale token; the 401 retry path covers the rest.
                error!(error = %err, "failed to refresh access token, serving stale token");
                return Ok((creds.access_token, creds.user_id));
            }
        };

        let expires_at = calculate_expires_at(new_tokens.expires_in);
        if let Err(err) = self.inner.store.update_tokens(
            &new_tokens.access_token,
            &new_tokens.refresh_token,
            expires_at,
        ) {
            error!(error = %err, "failed to persist refreshed tokens");
            return Ok((new_tokens.access_token, creds.user_id));
        }

        info!("access token refreshed");
        Ok((new_tokens.access_token, creds.user_id))
    }

    fn get_full_credentials(&self) -> Result<OAuthCredentials> {
        self.inner.store.get_full_credentials()
    }

    fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at_ms: i64,
    ) -> Result<()> {
        self.inner
            .store
            .update_tokens(access_token, refresh_token, expires_at_ms)
    }

    fn refresh_credentials(&self) -> Result<()> {
        let _guard = self.inner.lock.lock().unwrap_or_else(|e| e.into_inner());

        let creds = self
            .inner
            .store
            .get_full_credentials()
            .context("failed to get full credentials")?;
        let new_tokens =
            refresh_token(&creds.refresh_token).context("failed to refresh token")?;
        let expires_at = calculate_expires_at(new_tokens.expires_in);
        self.inner
            .store
            .update_tokens(&new_tokens.access_token, &new_tokens.refresh_token, expires_at)
            .context("failed to update tokens")
    }
}
