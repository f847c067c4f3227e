use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

const KEYCHAIN_SERVICE: &str = "codex-proxy-credentials";
const KEYCHAIN_ACCOUNT: &str = "codex-proxy";
const KEYCHAIN_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const KEYCHAIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: i64,
    pub user_id: String,
}

/// Capability set every credential backend provides. Stores that cannot hold
/// OAuth tokens (the env store) fail the token operations and report
/// `supports_oauth() == false` so the admin endpoints can reject seeding.
pub trait CredentialStore: Send + Sync {
    /// Returns `(access_token, user_id)` ready for an upstream request.
    fn get_credentials(&self) -> Result<(String, String)>;
    fn get_full_credentials(&self) -> Result<OAuthCredentials>;
    fn update_tokens(&self, access_token: &str, refresh_token: &str, expires_at_ms: i64)
        -> Result<()>;
    /// Re-reads or re-acquires credentials. May be a no-op.
    fn refresh_credentials(&self) -> Result<()>;
    fn supports_oauth(&self) -> bool {
        true
    }
}

pub fn default_creds_path() -> PathBuf {
    let config_home = env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var("HOME").ok().map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_default();
    config_home.join("codex-proxy").join("auth.json")
}

pub fn legacy_creds_path() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".codex")
        .join("auth.json")
}

/// Creates the parent directory chain with mode 0700.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(default)]
    tokens: AuthTokens,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuthTokens {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    account_id: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: i64,
}

/// Credentials file in the Codex CLI layout: a JSON document with a nested
/// `tokens` record. The OAuth access token is preferred for upstream calls,
/// with the ID token as fallback.
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    path: PathBuf,
}

impl FsCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_auth_file(&self) -> Result<AuthFile> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read credentials file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse credentials file {}", self.path.display()))
    }

    /// Runs `op` against the parsed file under an exclusive lock and writes
    /// the result back with mode 0600 (parent directory 0700).
    fn with_locked_file(&self, op: impl FnOnce(&mut AuthFile) -> Result<()>) -> Result<()> {
        ensure_parent_dir(&self.path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("failed to open credentials file {}", self.path.display()))?;

        #[cfg(unix)]
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("failed to lock credentials file {}", self.path.display()))?;

        let result = (|| {
            let mut raw = String::new();
            file.seek(SeekFrom::Start(0))?;
            file.read_to_string(&mut raw)?;
            let mut auth: AuthFile = if raw.trim().is_empty() {
                AuthFile::default()
            } else {
                serde_json::from_str(&raw).with_context(|| {
                    format!("invalid credentials file {}", self.path.display())
                })?
            };

            op(&mut auth)?;

            let payload = serde_json::to_string_pretty(&auth)
                .context("failed to encode credentials file")?;
            file.seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            file.write_all(payload.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            Ok(())
        })();

        let _ = fs2::FileExt::unlock(&file);
        result
    }

    fn select_token(tokens: &AuthTokens) -> &str {
        if tokens.access_token.is_empty() {
            &tokens.id_token
        } else {
            &tokens.access_token
        }
    }
}

impl CredentialStore for FsCredentialStore {
    fn get_credentials(&self) -> Result<(String, String)> {
        let auth = self.read_auth_file()?;
        let token = Self::select_token(&auth.tokens);
        if token.is_empty() || auth.tokens.account_id.is_empty() {
            bail!(
                "missing token or account_id in credentials file {}",
                self.path.display()
            );
        }
        Ok((token.to_string(), auth.tokens.account_id))
    }

    fn get_full_credentials(&self) -> Result<OAuthCredentials> {
        let auth = self.read_auth_file()?;
        let token = Self::select_token(&auth.tokens);
        if token.is_empty() || auth.tokens.account_id.is_empty() {
            bail!(
                "missing token or account_id in credentials file {}",
                self.path.display()
            );
        }
        Ok(OAuthCredentials {
            access_token: token.to_string(),
            refresh_token: auth.tokens.refresh_token,
            expires_at_ms: auth.tokens.expires_at,
            user_id: auth.tokens.account_id,
        })
    }

    fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at_ms: i64,
    ) -> Result<()> {
        self.with_locked_file(|auth| {
            auth.tokens.access_token = access_token.to_string();
            auth.tokens.refresh_token = refresh_token.to_string();
            auth.tokens.expires_at = expires_at_ms;
            Ok(())
        })
    }

    fn refresh_credentials(&self) -> Result<()> {
        Ok(())
    }
}

/// Seeds a fresh credentials file from migrated OAuth credentials.
pub fn init_from_oauth(path: &Path, creds: &OAuthCredentials) -> Result<()> {
    let store = FsCredentialStore::new(path.to_path_buf());
    store.with_locked_file(|auth| {
        auth.tokens.access_token = creds.access_token.clone();
        auth.tokens.refresh_token = creds.refresh_token.clone();
        auth.tokens.account_id = creds.user_id.clone();
        auth.tokens.expires_at = creds.expires_at_ms;
        Ok(())
    })
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeychainRecord {
    #[serde(default)]
    oauth: KeychainOauth,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeychainOauth {
    #[serde(rename = "accessToken", default)]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct SiblingConfig {
    #[serde(rename = "userID", default)]
    user_id: String,
}

#[derive(Debug, Default)]
struct KeychainCache {
    token: String,
    user_id: String,
    fetched_at: Option<Instant>,
}

struct KeychainShared {
    cache: Mutex<KeychainCache>,
    stop: Mutex<Option<mpsc::Sender<()>>>,
}

/// System-keychain-backed store. Shells out to the platform secret service
/// and pairs the OAuth record with a user-id lookup from the sibling config
/// file. Successful fetches are cached for five minutes and a background
/// thread re-fetches every ten minutes until `close()` is called.
pub struct KeychainCredentialStore {
    inner: Arc<KeychainShared>,
}

impl KeychainCredentialStore {
    pub fn new() -> Self {
        let inner = Arc::new(KeychainShared {
            cache: Mutex::new(KeychainCache::default()),
            stop: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = mpsc::channel();
        *inner.stop.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);

        let shared = Arc::clone(&inner);
        thread::spawn(move || loop {
            match stop_rx.recv_timeout(KEYCHAIN_REFRESH_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => match shared.refresh_and_get() {
                    Ok(_) => info!("refreshed credentials from keychain"),
                    Err(err) => error!(error = %err, "failed to refresh credentials from keychain"),
                },
                _ => return,
            }
        });

        Self { inner }
    }

    /// Stops the background re-fetch thread. Safe to call more than once.
    pub fn close(&self) {
        self.inner
            .stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl KeychainShared {
    fn refresh_and_get(&self) -> Result<(String, String)> {
        let record = read_keychain_record()?;
        let user_id = read_sibling_user_id()?;
        if record.oauth.access_token.is_empty() {
            bail!("accessToken is empty in keychain credentials");
        }

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.token = record.oauth.access_token.clone();
        cache.user_id = user_id.clone();
        cache.fetched_at = Some(Instant::now());
        Ok((record.oauth.access_token, user_id))
    }
}

impl CredentialStore for KeychainCredentialStore {
    fn get_credentials(&self) -> Result<(String, String)> {
        {
            let cache = self.inner.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(fetched_at) = cache.fetched_at {
                if !cache.token.is_empty()
                    && !cache.user_id.is_empty()
                    && fetched_at.elapsed() < KEYCHAIN_CACHE_TTL
                {
                    return Ok((cache.token.clone(), cache.user_id.clone()));
                }
            }
        }
        self.inner.refresh_and_get()
    }

    fn get_full_credentials(&self) -> Result<OAuthCredentials> {
        read_oauth_from_keychain()
    }

    fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_at_ms: i64,
    ) -> Result<()> {
        let mut record = read_keychain_record()?;
        record.oauth.access_token = access_token.to_string();
        record.oauth.refresh_token = refresh_token.to_string();
        record.oauth.expires_at = expires_at_ms;
        write_keychain_record(&record)?;

        let mut cache = self.inner.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.token = access_token.to_string();
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }

    fn refresh_credentials(&self) -> Result<()> {
        self.inner.refresh_and_get().map(|_| ())
    }
}

impl Drop for KeychainCredentialStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads the full OAuth record from the keychain, for migration and the
/// status endpoint.
pub fn read_oauth_from_keychain() -> Result<OAuthCredentials> {
    let record = read_keychain_record()?;
    if record.oauth.access_token.is_empty() {
        bail!("accessToken is empty in keychain credentials");
    }
    let user_id = read_sibling_user_id()?;
    Ok(OAuthCredentials {
        access_token: record.oauth.access_token,
        refresh_token: record.oauth.refresh_token,
        expires_at_ms: record.oauth.expires_at,
        user_id,
    })
}

fn read_keychain_record() -> Result<KeychainRecord> {
    let output = Command::new("security")
        .args(["find-generic-password", "-s", KEYCHAIN_SERVICE, "-w"])
        .output()
        .context("failed to invoke the system keychain")?;
    if !output.status.success() {
        bail!(
            "failed to retrieve credentials from keychain: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    serde_json::from_slice(&output.stdout).context("failed to parse keychain credentials JSON")
}

fn write_keychain_record(record: &KeychainRecord) -> Result<()> {
    let payload = serde_json::to_string(record).context("failed to encode keychain credentials")?;

    let _ = Command::new("security")
        .args(["delete-generic-password", "-s", KEYCHAIN_SERVICE])
        .output();

    let status = Command::new("security")
        .args([
            "add-generic-password",
            "-s",
            KEYCHAIN_SERVICE,
            "-a",
            KEYCHAIN_ACCOUNT,
            "-w",
            &payload,
            "-U",
        ])
        .status()
        .context("failed to invoke the system keychain")?;
    if !status.success() {
        bail!("failed to update keychain credentials");
    }
    Ok(())
}

fn read_sibling_user_id() -> Result<String> {
    let config_path = env::var("HOME")
        .map(PathBuf::from)
        .context("HOME environment variable is not set")?
        .join(".codex-proxy.json");
    let raw = fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let config: SiblingConfig =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", config_path.display()))?;
    if config.user_id.is_empty() {
        bail!("userID is empty in {}", config_path.display());
    }
    Ok(config.user_id)
}

/// Fixed credentials from `ACCESS_TOKEN` / `ACCOUNT_ID`. Not OAuth-capable:
/// there is no refresh token to rotate and nothing to persist.
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get_credentials(&self) -> Result<(String, String)> {
        let access_token = env::var("ACCESS_TOKEN").unwrap_or_default();
        let account_id = env::var("ACCOUNT_ID").unwrap_or_default();
        Ok((access_token, account_id))
    }

    fn get_full_credentials(&self) -> Result<OAuthCredentials> {
        bail!("environment credentials do not support OAuth tokens")
    }

    fn update_tokens(&self, _: &str, _: &str, _: i64) -> Result<()> {
        bail!("environment credentials do not support OAuth token updates")
    }

    fn refresh_credentials(&self) -> Result<()> {
        Ok(())
    }

    fn supports_oauth(&self) -> bool {
        false
    }
}
