//! Per-provider credential store.
//!
//! Secret material lives under `<creds_root>/<provider>/`; presence of a
//! provider's designated file is what makes it authenticated. Directories
//! are created `0700` and files written `0600`. A small state file beside
//! the provider directories records when credentials were stored and when
//! they expire.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Duration, Utc};
use envoy_protocol::{
    AuthCheckInfo, AuthCheckResult, AuthCheckStatus, AuthLoginResult, AuthMethod, AuthProvider,
    AuthRevokeResult, AuthState, AuthStatus, ProviderAuthState, ProviderAuthStatus,
};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STATE_FILE: &str = ".auth-state.json";
const CLAUDE_EXPIRY_DAYS: i64 = 365;
const WARN_THRESHOLD_HOURS: i64 = 24;

/// On-disk credential store for the known providers.
///
/// Every operation runs under one writer lock; there is no cross-provider
/// sharing to coordinate beyond the filesystem itself.
pub struct CredentialStore {
    root: PathBuf,
    state: Mutex<AuthState>,
}

impl CredentialStore {
    /// Creates a store rooted at `root`. No filesystem access happens
    /// until the first operation.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(AuthState::default()),
        }
    }

    fn provider_dir(&self, provider: AuthProvider) -> PathBuf {
        self.root.join(provider.as_str())
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Reads the persisted auth state, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_state(&self) -> Result<()> {
        let path = self.state_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let loaded: AuthState = serde_json::from_slice(&data)
            .map_err(|e| CoreError::external(format!("failed to parse auth state: {e}")))?;

        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        *state = loaded;
        Ok(())
    }

    fn save_state(&self, state: &AuthState) -> Result<()> {
        ensure_private_dir(&self.root)?;
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| CoreError::external(format!("failed to serialize auth state: {e}")))?;
        write_secret(&self.state_path(), &data)
    }

    /// Authentication status for all providers.
    pub fn status(&self) -> AuthStatus {
        let _guard = self.state.lock();
        let providers = AuthProvider::ALL
            .into_iter()
            .map(|p| (p, self.probe(p)))
            .collect();
        AuthStatus { providers }
    }

    /// Authentication status for one provider.
    #[must_use]
    pub fn provider_status(&self, provider: AuthProvider) -> ProviderAuthStatus {
        let _guard = self.state.lock();
        self.probe(provider)
    }

    /// Decides whether a provider is authenticated, in order: designated
    /// oauth file, fallback token file, environment variable, SSH key.
    fn probe(&self, provider: AuthProvider) -> ProviderAuthStatus {
        let dir = self.provider_dir(provider);

        if let Some(file) = oauth_file(provider) {
            if dir.join(file).is_file() {
                return authenticated(AuthMethod::Oauth);
            }
        }

        if provider == AuthProvider::Claude && token_file_has_access_token(&dir.join("credentials.json"))
        {
            return authenticated(AuthMethod::Token);
        }

        if let Some(var) = env_var(provider) {
            if std::env::var(var).is_ok_and(|v| !v.is_empty()) {
                return authenticated(AuthMethod::ApiKey);
            }
        }

        if provider == AuthProvider::Git {
            for key in ["id_ed25519", "id_rsa"] {
                if dir.join(key).is_file() {
                    return authenticated(AuthMethod::Ssh);
                }
            }
        }

        ProviderAuthStatus::default()
    }

    /// Stores a token for a provider.
    ///
    /// Empty tokens are rejected with a failed result rather than an
    /// error; the caller surfaces them as a client mistake.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for providers that do not take tokens and
    /// I/O errors when the secret cannot be written.
    pub fn login(&self, provider: AuthProvider, token: &str) -> Result<AuthLoginResult> {
        let (filename, token_key, method, missing) = match provider {
            AuthProvider::Claude => (
                "credentials.json",
                "accessToken",
                AuthMethod::Token,
                "token required for Claude authentication",
            ),
            AuthProvider::Gemini => (
                "credentials.json",
                "api_key",
                AuthMethod::ApiKey,
                "API key required for Gemini authentication",
            ),
            AuthProvider::Codex => (
                "auth.json",
                "api_key",
                AuthMethod::ApiKey,
                "API key required for Codex authentication",
            ),
            AuthProvider::Git => {
                return Err(CoreError::validation(
                    "git credentials are provisioned as SSH keys, not tokens",
                ))
            }
        };

        if token.is_empty() {
            return Ok(AuthLoginResult {
                success: false,
                provider: provider.to_string(),
                method: None,
                message: None,
                error: Some(missing.to_string()),
            });
        }

        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        let dir = self.provider_dir(provider);
        ensure_private_dir(&dir)?;
        let body = serde_json::to_vec_pretty(&BTreeMap::from([(token_key, token)]))
            .map_err(|e| CoreError::external(format!("failed to serialize credentials: {e}")))?;
        write_secret(&dir.join(filename), &body)?;

        self.record_sync(&mut state, provider, method, Utc::now())?;

        Ok(AuthLoginResult {
            success: true,
            provider: provider.to_string(),
            method: Some(method),
            message: Some("credentials stored successfully".to_string()),
            error: None,
        })
    }

    fn record_sync(
        &self,
        state: &mut AuthState,
        provider: AuthProvider,
        method: AuthMethod,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let expires_at = match provider {
            AuthProvider::Claude => Some(now + Duration::days(CLAUDE_EXPIRY_DAYS)),
            // Gemini/Codex keys and git SSH keys do not expire on a
            // schedule the envoy can know about.
            _ => None,
        };

        state.providers.insert(
            provider.to_string(),
            ProviderAuthState {
                synced_at: now,
                expires_at,
                method,
            },
        );
        self.save_state(state)
    }

    /// Removes every regular file in the provider directory. Succeeds
    /// when the directory is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn revoke(&self, provider: AuthProvider) -> Result<AuthRevokeResult> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        let dir = self.provider_dir(provider);
        if !dir.exists() {
            return Ok(AuthRevokeResult {
                success: true,
                provider: provider.to_string(),
                message: "no credentials found".to_string(),
            });
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }

        if state.providers.remove(provider.as_str()).is_some() {
            self.save_state(&state)?;
        }

        Ok(AuthRevokeResult {
            success: true,
            provider: provider.to_string(),
            message: "credentials revoked successfully".to_string(),
        })
    }

    /// Classifies every provider's credentials by expiry.
    pub fn check(&self) -> AuthCheckResult {
        self.check_at(Utc::now())
    }

    fn check_at(&self, now: DateTime<Utc>) -> AuthCheckResult {
        let status = self.status();
        let state = match self.state.lock() {
            Ok(state) => state.clone(),
            Err(_) => AuthState::default(),
        };

        let mut result = AuthCheckResult {
            valid: true,
            ..AuthCheckResult::default()
        };

        for (provider, provider_status) in &status.providers {
            let info = check_provider(*provider, *provider_status, &state, now);
            match info.status {
                AuthCheckStatus::Missing | AuthCheckStatus::Expired => {
                    result.valid = false;
                    result.expired |= info.status == AuthCheckStatus::Expired;
                }
                AuthCheckStatus::ExpiringSoon => result.expiring_soon = true,
                AuthCheckStatus::Valid => {}
            }
            result.providers.insert(*provider, info);
        }

        result
    }

    /// Logs a warning when any provider is expired or close to it.
    pub fn startup_check(&self) {
        let result = self.check();
        if result.expired {
            tracing::warn!("authentication credentials expired; check /api/auth/check");
        } else if result.expiring_soon {
            tracing::warn!("authentication credentials expiring soon; check /api/auth/check");
        }
    }
}

fn check_provider(
    provider: AuthProvider,
    status: ProviderAuthStatus,
    state: &AuthState,
    now: DateTime<Utc>,
) -> AuthCheckInfo {
    if !status.authenticated {
        return AuthCheckInfo {
            status: AuthCheckStatus::Missing,
            message: "not authenticated".to_string(),
            expires_at: None,
            expires_in: None,
        };
    }

    let Some(expires_at) = state
        .providers
        .get(provider.as_str())
        .and_then(|s| s.expires_at)
    else {
        return AuthCheckInfo {
            status: AuthCheckStatus::Valid,
            message: "authenticated".to_string(),
            expires_at: None,
            expires_in: None,
        };
    };

    let left = expires_at - now;
    if left <= Duration::zero() {
        AuthCheckInfo {
            status: AuthCheckStatus::Expired,
            message: "credentials have expired".to_string(),
            expires_at: Some(expires_at),
            expires_in: None,
        }
    } else {
        let humanized = humanize(left);
        let status = if left <= Duration::hours(WARN_THRESHOLD_HOURS) {
            AuthCheckStatus::ExpiringSoon
        } else {
            AuthCheckStatus::Valid
        };
        AuthCheckInfo {
            status,
            message: format!("expires in {humanized}"),
            expires_at: Some(expires_at),
            expires_in: Some(humanized),
        }
    }
}

fn humanize(d: Duration) -> String {
    if d < Duration::hours(1) {
        format!("{} minutes", d.num_minutes())
    } else if d < Duration::hours(24) {
        format!("{} hours", d.num_hours())
    } else {
        match d.num_days() {
            1 => "1 day".to_string(),
            days => format!("{days} days"),
        }
    }
}

fn authenticated(method: AuthMethod) -> ProviderAuthStatus {
    ProviderAuthStatus {
        authenticated: true,
        method: Some(method),
    }
}

const fn oauth_file(provider: AuthProvider) -> Option<&'static str> {
    match provider {
        AuthProvider::Claude => Some(".credentials.json"),
        AuthProvider::Gemini => Some("credentials.json"),
        AuthProvider::Codex => Some("auth.json"),
        AuthProvider::Git => None,
    }
}

const fn env_var(provider: AuthProvider) -> Option<&'static str> {
    match provider {
        AuthProvider::Gemini => Some("GEMINI_API_KEY"),
        AuthProvider::Codex => Some("OPENAI_API_KEY"),
        AuthProvider::Claude | AuthProvider::Git => None,
    }
}

fn token_file_has_access_token(path: &Path) -> bool {
    let Ok(data) = fs::read(path) else {
        return false;
    };

    #[derive(serde::Deserialize)]
    struct Creds {
        #[serde(rename = "accessToken", default)]
        access_token: String,
    }

    serde_json::from_slice::<Creds>(&data).is_ok_and(|c| !c.access_token.is_empty())
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

fn write_secret(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

fn lock_poisoned() -> CoreError {
    CoreError::Common(envoy_error::CommonError::internal("lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CredentialStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = CredentialStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn empty_token_is_rejected_without_side_effects() {
        let (dir, store) = store();
        let result = store.login(AuthProvider::Claude, "").unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("token required"));
        assert!(!dir.path().join("claude/credentials.json").exists());
    }

    #[test]
    fn login_then_status_then_revoke() {
        let (dir, store) = store();

        let result = store.login(AuthProvider::Claude, "abc").unwrap();
        assert!(result.success);
        assert_eq!(result.method, Some(AuthMethod::Token));

        let status = store.provider_status(AuthProvider::Claude);
        assert!(status.authenticated);
        assert_eq!(status.method, Some(AuthMethod::Token));

        let cred_path = dir.path().join("claude/credentials.json");
        let mode = std::fs::metadata(&cred_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(dir.path().join("claude"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let revoked = store.revoke(AuthProvider::Claude).unwrap();
        assert!(revoked.success);
        assert!(!store.provider_status(AuthProvider::Claude).authenticated);
    }

    #[test]
    fn revoke_without_credentials_succeeds() {
        let (_dir, store) = store();
        let result = store.revoke(AuthProvider::Codex).unwrap();
        assert!(result.success);
        assert_eq!(result.message, "no credentials found");
    }

    #[test]
    fn git_login_is_rejected() {
        let (_dir, store) = store();
        assert!(store.login(AuthProvider::Git, "key").is_err());
    }

    #[test]
    fn oauth_file_wins_over_token_file() {
        let (dir, store) = store();
        store.login(AuthProvider::Claude, "abc").unwrap();
        std::fs::write(dir.path().join("claude/.credentials.json"), b"{}").unwrap();

        let status = store.provider_status(AuthProvider::Claude);
        assert_eq!(status.method, Some(AuthMethod::Oauth));
    }

    #[test]
    fn ssh_key_authenticates_git() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("git")).unwrap();
        std::fs::write(dir.path().join("git/id_ed25519"), b"key").unwrap();

        let status = store.provider_status(AuthProvider::Git);
        assert!(status.authenticated);
        assert_eq!(status.method, Some(AuthMethod::Ssh));
    }

    #[test]
    fn state_round_trips_and_tracks_expiry() {
        let (dir, store) = store();
        store.login(AuthProvider::Claude, "abc").unwrap();

        let reloaded = CredentialStore::new(dir.path());
        reloaded.load_state().unwrap();
        let check = reloaded.check();
        let info = &check.providers[&AuthProvider::Claude];
        assert_eq!(info.status, AuthCheckStatus::Valid);
        assert!(info.expires_in.as_deref().unwrap().contains("day"));
    }

    #[test]
    fn expired_credentials_are_flagged() {
        let (_dir, store) = store();
        store.login(AuthProvider::Claude, "abc").unwrap();

        let future = Utc::now() + Duration::days(CLAUDE_EXPIRY_DAYS + 1);
        let result = store.check_at(future);
        assert!(result.expired);
        assert!(!result.valid);
        assert_eq!(
            result.providers[&AuthProvider::Claude].status,
            AuthCheckStatus::Expired
        );
    }
}
