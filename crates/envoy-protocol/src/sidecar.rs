//! Response schema of the in-sleeve sidecar daemon.
//!
//! The sidecar itself is an external collaborator; only its `GET /status`
//! payload is modeled here.

use crate::workspace::CstackStats;
use serde::{Deserialize, Serialize};

/// Payload of `GET http://<container>:8080/status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarStatus {
    #[serde(default)]
    pub sleeve_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhf: Option<SidecarDhf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<SidecarWorkspaceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<SidecarProcessInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SidecarAuthInfo>,
}

/// Agent binary detected inside the sleeve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarDhf {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Workspace view from inside the sleeve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarWorkspaceInfo {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cstack: Option<CstackStats>,
}

/// Sidecar process self-report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SidecarProcessInfo {
    pub pid: i32,
    pub uptime_secs: f64,
    pub memory_rss_kb: i64,
}

/// Credential visibility from inside the sleeve.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SidecarAuthInfo {
    #[serde(default)]
    pub claude_auth: bool,
    #[serde(default)]
    pub gemini_auth: bool,
}
