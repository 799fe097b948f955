//! Workspace records, clone jobs, and VCS operation payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One directory under the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub path: String,
    pub in_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleeve_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<WorkspaceGitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cstack: Option<CstackStats>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub size_warning: bool,
    #[serde(default)]
    pub size_critical: bool,
}

/// Git state of a workspace, derived from short-lived subprocess calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceGitInfo {
    pub branch: String,
    #[serde(default)]
    pub is_detached: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_branch: String,
    pub is_dirty: bool,
    pub uncommitted_count: usize,
    #[serde(default)]
    pub ahead_count: usize,
    #[serde(default)]
    pub behind_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit_msg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit_time: String,
}

/// Task statistics reported by `cs stats --json`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CstackStats {
    #[serde(default)]
    pub open: u32,
    #[serde(default)]
    pub ready: u32,
    #[serde(default)]
    pub in_progress: u32,
    #[serde(default)]
    pub blocked: u32,
    #[serde(default)]
    pub closed: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub exists: bool,
}

/// Request body for `POST /api/workspaces/cstack?action=init`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CstackInitRequest {
    #[serde(default)]
    pub mode: String,
}

/// Result of a cstack init attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CstackInitResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for `POST /api/workspaces/clone`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneWorkspaceRequest {
    pub repo_url: String,
    #[serde(default)]
    pub name: String,
}

/// Lifecycle state of an asynchronous clone job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloneStatus {
    Pending,
    Cloning,
    Completed,
    Failed,
}

impl CloneStatus {
    /// Terminal jobs are eligible for eviction by the sweeper.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One asynchronous clone operation, pollable by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneJob {
    pub id: String,
    pub repo_url: String,
    pub workspace: String,
    pub status: CloneStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Branches available in a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchList {
    pub current: String,
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

/// Request body for the branch `switch` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchBranchRequest {
    #[serde(default)]
    pub branch: String,
}

/// Outcome of a VCS operation that can fail business-wise without being
/// an infrastructure error (pull that is not a fast-forward, push with
/// nothing to push).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl OpResult {
    /// Successful outcome with a message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed outcome with a message.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CloneStatus::Cloning).unwrap(),
            r#""cloning""#
        );
        assert_eq!(
            serde_json::from_str::<CloneStatus>(r#""failed""#).unwrap(),
            CloneStatus::Failed
        );
    }

    #[test]
    fn terminal_states() {
        assert!(CloneStatus::Completed.is_terminal());
        assert!(CloneStatus::Failed.is_terminal());
        assert!(!CloneStatus::Pending.is_terminal());
        assert!(!CloneStatus::Cloning.is_terminal());
    }

    #[test]
    fn cstack_stats_tolerates_partial_payloads() {
        let stats: CstackStats = serde_json::from_str(r#"{"closed":3,"total":4}"#).unwrap();
        assert_eq!(stats.closed, 3);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.open, 0);
    }
}
