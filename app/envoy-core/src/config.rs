//! Configuration management.
//!
//! Envoy configuration is loaded from multiple sources with the following
//! priority:
//!
//! 1. Environment variables (ENVOY_*)
//! 2. User configuration file (~/.config/envoy/config.toml)
//! 3. System configuration file (/etc/envoy/config.toml)
//! 4. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! [server]
//! port = 7470
//!
//! [sleeves]
//! image = "ghcr.io/envoy/sleeve:latest"
//! max = 10
//!
//! [runtime]
//! network = "sleevenet"
//! workspace_root = "/home/agent/workspaces"
//!
//! [git]
//! clone_protocol = "ssh"
//! ```
//!
//! Keys changed through the HTTP config endpoints are persisted back to the
//! user file; a restart is required for running subsystems to pick them up.

use crate::error::{CoreError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Envoy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvoyConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Sleeve container settings.
    pub sleeves: SleevesConfig,
    /// Container runtime settings.
    pub runtime: RuntimeConfig,
    /// Git behavior.
    pub git: GitConfig,
    /// Terminal session settings.
    pub terminal: TerminalConfig,
}

impl Default for EnvoyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sleeves: SleevesConfig::default(),
            runtime: RuntimeConfig::default(),
            git: GitConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port the API listens on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 7470 }
    }
}

/// Sleeve container settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleevesConfig {
    /// Image sleeves are created from.
    pub image: String,
    /// Soft ceiling on concurrent containers, reported in host stats.
    pub max: usize,
}

impl Default for SleevesConfig {
    fn default() -> Self {
        Self {
            image: "ghcr.io/envoy/sleeve:latest".to_string(),
            max: 10,
        }
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bridged network sleeves are attached to.
    pub network: String,
    /// Directory under which workspaces live.
    pub workspace_root: PathBuf,
    /// Named volume backing the workspace root.
    pub workspace_volume: String,
    /// Named volume carrying credentials, mounted read-only into sleeves.
    pub creds_volume: String,
    /// Directory holding per-provider credential files.
    pub creds_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: "sleevenet".to_string(),
            workspace_root: PathBuf::from("/home/agent/workspaces"),
            workspace_volume: "agent-workspaces".to_string(),
            creds_volume: "agent-creds".to_string(),
            creds_root: PathBuf::from("/home/agent/.creds"),
        }
    }
}

/// Protocol used when cloning repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    Ssh,
    Https,
}

impl fmt::Display for CloneProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => f.write_str("ssh"),
            Self::Https => f.write_str("https"),
        }
    }
}

impl FromStr for CloneProtocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ssh" => Ok(Self::Ssh),
            "https" => Ok(Self::Https),
            _ => Err(CoreError::validation(
                "git.clone_protocol must be 'ssh' or 'https'",
            )),
        }
    }
}

/// Git behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Rewrite HTTPS clone URLs to SSH form when set to `ssh`.
    pub clone_protocol: CloneProtocol,
    /// Committer identity used for UI-driven commits.
    pub committer: CommitterConfig,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_protocol: CloneProtocol::Ssh,
            committer: CommitterConfig::default(),
        }
    }
}

/// Git committer identity. Empty fields fall back to the environment and
/// then to a process-wide default at commit time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

/// Terminal session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Exec entrypoint; attaches to a detached session manager so that
    /// reconnects re-enter the same terminal.
    pub command: Vec<String>,
    /// User the exec session runs as.
    pub user: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "abduco".to_string(),
                "-a".to_string(),
                "/home/agent/.session/shell.sock".to_string(),
            ],
            user: "agent".to_string(),
        }
    }
}

fn user_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".config/envoy/config.toml")
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/envoy/config.toml")
}

impl EnvoyConfig {
    /// Loads configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()))
            .merge(Env::prefixed("ENVOY_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Persists the current configuration to the user file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = user_config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))?;
        let content = format!(
            "# Envoy configuration\n# Modify via the dashboard or the config API.\n# Changes require an envoy restart to take effect.\n\n{body}"
        );
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the value of a dotted settings key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown keys.
    pub fn value(&self, key: &str) -> Result<serde_json::Value> {
        let value = match key {
            "server.port" => serde_json::json!(self.server.port),
            "sleeves.max" => serde_json::json!(self.sleeves.max),
            "sleeves.image" => serde_json::json!(self.sleeves.image),
            "runtime.network" => serde_json::json!(self.runtime.network),
            "runtime.workspace_root" => serde_json::json!(self.runtime.workspace_root),
            "git.clone_protocol" => serde_json::json!(self.git.clone_protocol),
            "git.committer.name" => serde_json::json!(self.git.committer.name),
            "git.committer.email" => serde_json::json!(self.git.committer.email),
            "terminal.user" => serde_json::json!(self.terminal.user),
            _ => return Err(CoreError::not_found(format!("config key: {key}"))),
        };
        Ok(value)
    }

    /// Updates a settings key from its string form and persists.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for bad values, `NotFound` for unknown or
    /// read-only keys.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server.port" => {
                let port: u16 = value
                    .parse()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| CoreError::validation("server.port must be 1-65535"))?;
                self.server.port = port;
            }
            "sleeves.max" => {
                let max: usize = value
                    .parse()
                    .ok()
                    .filter(|m| (1..=100).contains(m))
                    .ok_or_else(|| CoreError::validation("sleeves.max must be 1-100"))?;
                self.sleeves.max = max;
            }
            "sleeves.image" => {
                if value.is_empty() {
                    return Err(CoreError::validation("sleeves.image cannot be empty"));
                }
                self.sleeves.image = value.to_string();
            }
            "runtime.network" => {
                if value.is_empty() {
                    return Err(CoreError::validation("runtime.network cannot be empty"));
                }
                self.runtime.network = value.to_string();
            }
            "runtime.workspace_root" => {
                return Err(CoreError::validation("runtime.workspace_root is read-only"));
            }
            "git.clone_protocol" => {
                self.git.clone_protocol = value.parse()?;
            }
            "git.committer.name" => self.git.committer.name = value.to_string(),
            "git.committer.email" => self.git.committer.email = value.to_string(),
            "terminal.user" => {
                if value.is_empty() {
                    return Err(CoreError::validation("terminal.user cannot be empty"));
                }
                self.terminal.user = value.to_string();
            }
            _ => return Err(CoreError::not_found(format!("config key: {key}"))),
        }
        self.save()
    }

    /// Resets a settings key to its default and persists.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown keys.
    pub fn reset_value(&mut self, key: &str) -> Result<()> {
        let defaults = Self::default();
        match key {
            "server.port" => self.server.port = defaults.server.port,
            "sleeves.max" => self.sleeves.max = defaults.sleeves.max,
            "sleeves.image" => self.sleeves.image = defaults.sleeves.image,
            "runtime.network" => self.runtime.network = defaults.runtime.network,
            "git.clone_protocol" => self.git.clone_protocol = defaults.git.clone_protocol,
            "git.committer.name" => self.git.committer.name = defaults.git.committer.name,
            "git.committer.email" => self.git.committer.email = defaults.git.committer.email,
            "terminal.user" => self.terminal.user = defaults.terminal.user,
            _ => return Err(CoreError::not_found(format!("config key: {key}"))),
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EnvoyConfig::default();
        assert_eq!(cfg.server.port, 7470);
        assert_eq!(cfg.git.clone_protocol, CloneProtocol::Ssh);
        assert!(cfg.runtime.workspace_root.is_absolute());
        assert!(!cfg.terminal.command.is_empty());
    }

    #[test]
    fn clone_protocol_parses() {
        assert_eq!("ssh".parse::<CloneProtocol>().unwrap(), CloneProtocol::Ssh);
        assert_eq!(
            "https".parse::<CloneProtocol>().unwrap(),
            CloneProtocol::Https
        );
        assert!("git".parse::<CloneProtocol>().is_err());
    }

    #[test]
    fn unknown_key_is_not_found() {
        let cfg = EnvoyConfig::default();
        let err = cfg.value("no.such.key").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Common(envoy_error::CommonError::NotFound(_))
        ));
    }

    #[test]
    fn set_value_validates_ranges() {
        let mut cfg = EnvoyConfig::default();
        assert!(cfg.set_value("sleeves.max", "0").is_err());
        assert!(cfg.set_value("sleeves.max", "101").is_err());
        assert!(cfg.set_value("server.port", "not-a-port").is_err());
        assert!(cfg.set_value("runtime.workspace_root", "/tmp").is_err());
    }
}
