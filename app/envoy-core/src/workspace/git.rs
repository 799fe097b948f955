//! Short-lived git subprocess helpers.
//!
//! Every invocation passes `safe.directory=<path>` because workspaces are
//! volume mounts whose ownership rarely matches the envoy's uid.

use crate::error::{CoreError, Result};
use envoy_protocol::WorkspaceGitInfo;
use std::path::Path;
use tokio::process::Command;

/// Runs `git -c safe.directory=<ws> -C <ws> <args…>` and returns trimmed
/// stdout.
///
/// # Errors
///
/// Returns `External` when git exits non-zero, with stderr attached.
pub(crate) async fn run_git(workspace: &Path, args: &[&str]) -> Result<String> {
    let ws = workspace.to_string_lossy();
    let output = Command::new("git")
        .arg("-c")
        .arg(format!("safe.directory={ws}"))
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()
        .await
        .map_err(|e| CoreError::external(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::external(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether the directory contains a git repository.
pub(crate) fn is_git_repo(workspace: &Path) -> bool {
    workspace.join(".git").exists()
}

/// Collects the full git view of a workspace, or `None` when it is not a
/// repository.
pub(crate) async fn git_info(workspace: &Path) -> Option<WorkspaceGitInfo> {
    if !is_git_repo(workspace) {
        return None;
    }

    let mut info = WorkspaceGitInfo::default();

    let (branch, is_detached) = current_branch(workspace).await;
    info.branch = branch;
    info.is_detached = is_detached;

    if !is_detached && !info.branch.is_empty() {
        info.remote_branch = remote_branch(workspace, &info.branch).await;
        let (ahead, behind) = ahead_behind(workspace, &info.remote_branch).await;
        info.ahead_count = ahead;
        info.behind_count = behind;
    }

    info.uncommitted_count = uncommitted_count(workspace).await;
    info.is_dirty = info.uncommitted_count > 0;

    if let Some((hash, msg, time)) = last_commit(workspace).await {
        info.last_commit_hash = hash;
        info.last_commit_msg = msg;
        info.last_commit_time = time;
    }

    Some(info)
}

/// Current ref name. A detached `HEAD` is reported as such, substituting
/// the short SHA for the branch name.
pub(crate) async fn current_branch(workspace: &Path) -> (String, bool) {
    let Ok(branch) = run_git(workspace, &["rev-parse", "--abbrev-ref", "HEAD"]).await else {
        return (String::new(), false);
    };
    if branch == "HEAD" {
        let sha = run_git(workspace, &["rev-parse", "--short", "HEAD"])
            .await
            .unwrap_or_default();
        return (sha, true);
    }
    (branch, false)
}

async fn remote_branch(workspace: &Path, branch: &str) -> String {
    run_git(
        workspace,
        &["rev-parse", "--abbrev-ref", &format!("{branch}@{{upstream}}")],
    )
    .await
    .unwrap_or_else(|_| format!("origin/{branch}"))
}

async fn ahead_behind(workspace: &Path, remote_branch: &str) -> (usize, usize) {
    match run_git(
        workspace,
        &[
            "rev-list",
            "--left-right",
            "--count",
            &format!("{remote_branch}...HEAD"),
        ],
    )
    .await
    {
        Ok(out) => parse_ahead_behind(&out),
        Err(_) => (0, 0),
    }
}

/// Parses `rev-list --left-right --count` output (`<behind> <ahead>`).
pub(crate) fn parse_ahead_behind(out: &str) -> (usize, usize) {
    let mut fields = out.split_whitespace();
    let behind = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let ahead = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    (ahead, behind)
}

/// Number of entries in `status --porcelain`.
pub(crate) async fn uncommitted_count(workspace: &Path) -> usize {
    match run_git(workspace, &["status", "--porcelain"]).await {
        Ok(out) => count_porcelain_lines(&out),
        Err(_) => 0,
    }
}

pub(crate) fn count_porcelain_lines(out: &str) -> usize {
    out.lines().filter(|l| !l.trim().is_empty()).count()
}

async fn last_commit(workspace: &Path) -> Option<(String, String, String)> {
    let out = run_git(workspace, &["log", "-1", "--format=%h|%s|%cr"])
        .await
        .ok()?;
    parse_last_commit(&out)
}

/// Parses one `%h|%s|%cr` log line.
pub(crate) fn parse_last_commit(line: &str) -> Option<(String, String, String)> {
    let mut parts = line.splitn(3, '|');
    Some((
        parts.next()?.to_string(),
        parts.next()?.to_string(),
        parts.next()?.to_string(),
    ))
}

/// Total size of a workspace in bytes, via `du -sb`.
pub(crate) async fn workspace_size(workspace: &Path) -> u64 {
    let Ok(output) = Command::new("du").arg("-sb").arg(workspace).output().await else {
        return 0;
    };
    if !output.status.success() {
        return 0;
    }
    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ahead_behind_parsing() {
        assert_eq!(parse_ahead_behind("2\t5"), (5, 2));
        assert_eq!(parse_ahead_behind("0 0"), (0, 0));
        assert_eq!(parse_ahead_behind("garbage"), (0, 0));
        assert_eq!(parse_ahead_behind(""), (0, 0));
    }

    #[test]
    fn porcelain_counting_skips_blank_lines() {
        assert_eq!(count_porcelain_lines(""), 0);
        assert_eq!(count_porcelain_lines(" M src/main.rs\n?? new.txt\n"), 2);
        assert_eq!(count_porcelain_lines("\n\n"), 0);
    }

    #[test]
    fn last_commit_parsing() {
        let (hash, msg, time) =
            parse_last_commit("abc1234|fix: handle empty pool|2 hours ago").unwrap();
        assert_eq!(hash, "abc1234");
        assert_eq!(msg, "fix: handle empty pool");
        assert_eq!(time, "2 hours ago");

        // Subject lines may themselves contain pipes.
        let (_, msg, _) = parse_last_commit("abc|a|b|c").unwrap();
        assert_eq!(msg, "a");
    }
}
