//! Credential status, login, and persistence types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Credential providers the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Claude,
    Gemini,
    Codex,
    Git,
}

impl AuthProvider {
    /// All providers, in display order.
    pub const ALL: [Self; 4] = [Self::Claude, Self::Gemini, Self::Codex, Self::Git];

    /// Canonical lowercase name, also the on-disk directory name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
            Self::Git => "git",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "codex" => Ok(Self::Codex),
            "git" => Ok(Self::Git),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// How a provider is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Oauth,
    Token,
    ApiKey,
    Ssh,
}

/// Authentication state of one provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderAuthStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
}

/// Authentication state of all providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    pub providers: BTreeMap<AuthProvider, ProviderAuthStatus>,
}

/// Request body for `POST /api/auth/{provider}/login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthLoginRequest {
    #[serde(default)]
    pub token: String,
}

/// Outcome of a login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthLoginResult {
    pub success: bool,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a revoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRevokeResult {
    pub success: bool,
    pub provider: String,
    pub message: String,
}

/// Per-provider sync record persisted in `.auth-state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAuthState {
    pub synced_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub method: AuthMethod,
}

/// Contents of `<creds_root>/.auth-state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    pub version: u32,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderAuthState>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            version: 1,
            providers: BTreeMap::new(),
        }
    }
}

/// Expiry classification of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthCheckStatus {
    Valid,
    Missing,
    Expired,
    ExpiringSoon,
}

/// Expiry report for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCheckInfo {
    pub status: AuthCheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<String>,
}

/// Expiry report for all providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthCheckResult {
    pub valid: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub expiring_soon: bool,
    pub providers: BTreeMap<AuthProvider, AuthCheckInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_str() {
        for provider in AuthProvider::ALL {
            assert_eq!(provider.as_str().parse::<AuthProvider>().unwrap(), provider);
        }
        assert!("openai".parse::<AuthProvider>().is_err());
    }

    #[test]
    fn auth_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuthMethod::ApiKey).unwrap(),
            r#""api_key""#
        );
        assert_eq!(serde_json::to_string(&AuthMethod::Oauth).unwrap(), r#""oauth""#);
    }
}
