//! Workspace manager.
//!
//! A workspace is a directory under the configured root, usually a cloned
//! repository, that at most one sleeve may claim at a time. The manager
//! enumerates them with git and task-tracker enrichment, runs asynchronous
//! clone jobs, and gates VCS operations on the in-use and dirty-tree
//! invariants.

mod git;

use crate::config::{CloneProtocol, EnvoyConfig};
use crate::error::{CoreError, Result};
use crate::sleeve::SleeveDirectory;
use chrono::{DateTime, Duration, Utc};
use envoy_protocol::{
    BranchList, CloneJob, CloneStatus, CloneWorkspaceRequest, CstackInitResult, CstackStats,
    OpResult, WorkspaceInfo,
};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tokio::process::Command;

const SIZE_WARNING_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const SIZE_CRITICAL_BYTES: u64 = 20 * 1024 * 1024 * 1024;

const JOB_RETENTION: Duration = Duration::hours(1);
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(600);
const FETCH_ALL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(30);

/// Observer hook for clone progress, wired to the status broadcaster.
pub type CloneProgressFn = Box<dyn Fn(&str, CloneStatus, u8, Option<&str>) + Send + Sync>;

/// Manager for the workspace registry and its clone jobs.
pub struct WorkspaceManager {
    cfg: EnvoyConfig,
    sleeves: Arc<dyn SleeveDirectory>,
    jobs: Mutex<HashMap<String, CloneJob>>,
    on_clone_progress: RwLock<Option<CloneProgressFn>>,
}

impl WorkspaceManager {
    /// Creates a manager. Call [`Self::start_sweeper`] once a runtime is
    /// available to evict finished clone jobs.
    #[must_use]
    pub fn new(cfg: EnvoyConfig, sleeves: Arc<dyn SleeveDirectory>) -> Self {
        Self {
            cfg,
            sleeves,
            jobs: Mutex::new(HashMap::new()),
            on_clone_progress: RwLock::new(None),
        }
    }

    /// Installs the single-slot clone progress observer, replacing any
    /// previous one.
    pub fn set_on_clone_progress(&self, hook: CloneProgressFn) {
        if let Ok(mut slot) = self.on_clone_progress.write() {
            *slot = Some(hook);
        }
    }

    fn emit_progress(&self, id: &str, status: CloneStatus, progress: u8, error: Option<&str>) {
        if let Ok(slot) = self.on_clone_progress.read() {
            if let Some(hook) = slot.as_ref() {
                hook(id, status, progress, error);
            }
        }
    }

    /// Spawns the periodic sweeper evicting terminal clone jobs one hour
    /// after they end.
    pub fn start_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                manager.sweep_expired_jobs(Utc::now());
            }
        });
    }

    fn sweep_expired_jobs(&self, now: DateTime<Utc>) {
        let cutoff = now - JOB_RETENTION;
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.retain(|_, job| {
                !(job.status.is_terminal() && job.end_time.is_some_and(|end| end < cutoff))
            });
        }
    }

    /// Enumerates workspaces under the root, creating the root if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or read.
    pub async fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let root = &self.cfg.runtime.workspace_root;
        std::fs::create_dir_all(root)?;

        let mut names: Vec<String> = std::fs::read_dir(root)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                entry
                    .file_type()
                    .ok()?
                    .is_dir()
                    .then(|| entry.file_name().to_string_lossy().into_owned())
            })
            .collect();
        names.sort();

        let owners: HashMap<String, String> = self
            .sleeves
            .list()
            .into_iter()
            .map(|s| (s.workspace, s.name))
            .collect();

        let mut workspaces = Vec::with_capacity(names.len());
        for name in names {
            let path = root.join(&name);
            let path_str = path.to_string_lossy().into_owned();
            let sleeve_name = owners.get(&path_str).cloned();

            let size_bytes = git::workspace_size(&path).await;
            workspaces.push(WorkspaceInfo {
                name,
                in_use: sleeve_name.is_some(),
                sleeve_name,
                git: git::git_info(&path).await,
                cstack: self.cstack_stats(&path).await,
                size_bytes,
                size_warning: size_bytes > SIZE_WARNING_BYTES,
                size_critical: size_bytes > SIZE_CRITICAL_BYTES,
                path: path_str,
            });
        }

        Ok(workspaces)
    }

    /// Creates an empty workspace directory.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for bad names and `Conflict` when the
    /// directory already exists.
    pub fn create(&self, name: &str) -> Result<WorkspaceInfo> {
        if name.is_empty() {
            return Err(CoreError::validation("workspace name required"));
        }
        if name.contains(['/', '\\', '.']) {
            return Err(CoreError::validation("invalid workspace name"));
        }

        let path = self.cfg.runtime.workspace_root.join(name);
        if path.exists() {
            return Err(CoreError::conflict(format!(
                "workspace {name:?} already exists"
            )));
        }

        std::fs::create_dir_all(&path)?;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755));

        Ok(WorkspaceInfo {
            name: name.to_string(),
            path: path.to_string_lossy().into_owned(),
            in_use: false,
            sleeve_name: None,
            git: None,
            cstack: None,
            size_bytes: 0,
            size_warning: false,
            size_critical: false,
        })
    }

    /// Submits an asynchronous clone job and returns it in `cloning`
    /// state.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for unusable URLs and `Conflict` when the
    /// target directory already exists.
    pub fn clone_repository(self: &Arc<Self>, req: &CloneWorkspaceRequest) -> Result<CloneJob> {
        if req.repo_url.is_empty() {
            return Err(CoreError::validation("repo_url required"));
        }
        if !req.repo_url.starts_with("https://") && !req.repo_url.starts_with("git@") {
            return Err(CoreError::validation("URL must start with https:// or git@"));
        }

        let clone_url = if self.cfg.git.clone_protocol == CloneProtocol::Ssh
            && req.repo_url.starts_with("https://")
        {
            rewrite_to_ssh(&req.repo_url)
        } else {
            req.repo_url.clone()
        };

        let workspace_name = if req.name.is_empty() {
            let derived = repo_name_from_url(&req.repo_url);
            if derived.is_empty() {
                return Err(CoreError::validation(
                    "could not derive workspace name from repo URL",
                ));
            }
            derived
        } else {
            req.name.clone()
        };

        let path = self.cfg.runtime.workspace_root.join(&workspace_name);
        if path.exists() {
            return Err(CoreError::conflict(format!(
                "workspace {workspace_name:?} already exists"
            )));
        }

        let job = CloneJob {
            id: new_job_id(),
            repo_url: clone_url.clone(),
            workspace: path.to_string_lossy().into_owned(),
            status: CloneStatus::Cloning,
            error: None,
            start_time: Utc::now(),
            end_time: None,
        };

        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(job.id.clone(), job.clone());
        }
        self.emit_progress(&job.id, CloneStatus::Cloning, 0, None);

        let manager = Arc::clone(self);
        let background = job.clone();
        tokio::spawn(async move {
            manager.run_clone(background).await;
        });

        Ok(job)
    }

    async fn run_clone(&self, job: CloneJob) {
        let outcome = clone_repo(&job.repo_url, Path::new(&job.workspace)).await;

        let (status, error) = match outcome {
            Ok(()) => (CloneStatus::Completed, None),
            Err(err) => {
                let _ = std::fs::remove_dir_all(&job.workspace);
                (CloneStatus::Failed, Some(err.to_string()))
            }
        };

        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(entry) = jobs.get_mut(&job.id) {
                entry.status = status;
                entry.error = error.clone();
                entry.end_time = Some(Utc::now());
            }
        }

        match status {
            CloneStatus::Completed => {
                tracing::info!(job = %job.id, workspace = %job.workspace, "clone completed");
                self.emit_progress(&job.id, status, 100, None);
            }
            _ => {
                tracing::warn!(job = %job.id, "clone failed: {}", error.as_deref().unwrap_or(""));
                self.emit_progress(&job.id, status, 0, error.as_deref());
            }
        }
    }

    /// Looks up a clone job by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or already-evicted jobs.
    pub fn job(&self, id: &str) -> Result<CloneJob> {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(id).cloned())
            .ok_or_else(|| CoreError::not_found(format!("job {id:?}")))
    }

    /// Returns the owning sleeve's name when the workspace is mounted
    /// into one.
    #[must_use]
    pub fn in_use_by(&self, workspace: &str) -> Option<String> {
        self.sleeves
            .list()
            .into_iter()
            .find(|s| s.workspace == workspace)
            .map(|s| s.name)
    }

    fn require_workspace(&self, workspace: &str) -> Result<()> {
        if Path::new(workspace).exists() {
            Ok(())
        } else {
            Err(CoreError::not_found("workspace not found"))
        }
    }

    fn require_repo(&self, workspace: &str) -> Result<()> {
        if git::is_git_repo(Path::new(workspace)) {
            Ok(())
        } else {
            Err(CoreError::validation("workspace is not a git repository"))
        }
    }

    fn require_idle(&self, workspace: &str) -> Result<()> {
        match self.in_use_by(workspace) {
            Some(sleeve) => Err(CoreError::conflict(format!(
                "workspace in use by sleeve: {sleeve}"
            ))),
            None => Ok(()),
        }
    }

    async fn require_clean(&self, workspace: &str) -> Result<()> {
        if git::uncommitted_count(Path::new(workspace)).await > 0 {
            Err(CoreError::conflict("workspace has uncommitted changes"))
        } else {
            Ok(())
        }
    }

    /// Lists local and remote branches.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the workspace is not a repository.
    pub async fn list_branches(&self, workspace: &str) -> Result<BranchList> {
        self.require_repo(workspace)?;
        let ws = Path::new(workspace);

        let (current, _) = git::current_branch(ws).await;
        let mut branches = BranchList {
            current,
            local: Vec::new(),
            remote: Vec::new(),
        };

        if let Ok(out) = git::run_git(ws, &["branch", "--list", "--format=%(refname:short)"]).await
        {
            branches.local = out
                .lines()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        if let Ok(out) = git::run_git(ws, &["branch", "-r", "--format=%(refname:short)"]).await {
            branches.remote = out
                .lines()
                .map(str::trim)
                .filter(|b| !b.is_empty() && !b.ends_with("/HEAD"))
                .map(ToString::to_string)
                .collect();
        }

        Ok(branches)
    }

    /// Switches the current branch. Requires the workspace to be idle
    /// with a clean tree.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Validation`/`Conflict` for violated
    /// preconditions and `External` when the checkout itself fails.
    pub async fn switch_branch(&self, workspace: &str, branch: &str) -> Result<()> {
        self.require_workspace(workspace)?;
        self.require_repo(workspace)?;
        self.require_idle(workspace)?;
        self.require_clean(workspace).await?;

        let ws = Path::new(workspace);

        // Remote-tracking refs check out (or create) the local branch.
        if let Some(local) = branch.strip_prefix("origin/") {
            if git::run_git(ws, &["checkout", local]).await.is_err() {
                git::run_git(ws, &["checkout", "-b", local, "--track", branch])
                    .await
                    .map_err(|_| {
                        CoreError::external(format!("git error: failed to checkout branch {branch}"))
                    })?;
            }
            return Ok(());
        }

        git::run_git(ws, &["checkout", branch]).await.map_err(|_| {
            CoreError::external(format!("git error: failed to checkout branch {branch}"))
        })?;
        Ok(())
    }

    /// Fetches from origin.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Validation` for violated preconditions.
    pub async fn fetch_remote(&self, workspace: &str) -> Result<OpResult> {
        self.require_workspace(workspace)?;
        self.require_repo(workspace)?;

        match git::run_git(Path::new(workspace), &["fetch", "origin"]).await {
            Ok(_) => Ok(OpResult::ok("fetched from origin")),
            Err(_) => Ok(OpResult::fail("git fetch failed")),
        }
    }

    /// Pulls from origin, fast-forward only. Requires the workspace to be
    /// idle with a clean tree.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Validation`/`Conflict` for violated
    /// preconditions.
    pub async fn pull_remote(&self, workspace: &str) -> Result<OpResult> {
        self.require_workspace(workspace)?;
        self.require_repo(workspace)?;
        self.require_idle(workspace)?;
        self.require_clean(workspace).await?;

        match git::run_git(Path::new(workspace), &["pull", "--ff-only"]).await {
            Ok(_) => Ok(OpResult::ok("pulled from origin")),
            Err(_) => Ok(OpResult::fail("pull failed: not a fast-forward")),
        }
    }

    /// Stages everything and commits with the resolved committer
    /// identity. Requires the workspace to be idle and dirty.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Validation`/`Conflict` for violated
    /// preconditions.
    pub async fn commit_all(&self, workspace: &str, message: &str) -> Result<OpResult> {
        self.require_workspace(workspace)?;
        self.require_repo(workspace)?;
        self.require_idle(workspace)?;

        let ws = Path::new(workspace);
        if git::uncommitted_count(ws).await == 0 {
            return Ok(OpResult::fail("no changes to commit"));
        }

        if git::run_git(ws, &["add", "-A"]).await.is_err() {
            return Ok(OpResult::fail("failed to stage changes"));
        }

        let (name, email) = self.committer_identity().await;
        let output = Command::new("git")
            .arg("-c")
            .arg(format!("safe.directory={workspace}"))
            .arg("-C")
            .arg(workspace)
            .args(["commit", "-m", message])
            .env("GIT_AUTHOR_NAME", &name)
            .env("GIT_AUTHOR_EMAIL", &email)
            .env("GIT_COMMITTER_NAME", &name)
            .env("GIT_COMMITTER_EMAIL", &email)
            .output()
            .await
            .map_err(|e| CoreError::external(format!("failed to run git: {e}")))?;

        if output.status.success() {
            Ok(OpResult::ok("committed changes"))
        } else {
            let detail = String::from_utf8_lossy(&output.stderr);
            Ok(OpResult::fail(format!("commit failed: {}", detail.trim())))
        }
    }

    /// Pushes to origin. Requires the workspace to be idle and ahead of
    /// its upstream.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Validation`/`Conflict` for violated
    /// preconditions.
    pub async fn push_remote(&self, workspace: &str) -> Result<OpResult> {
        self.require_workspace(workspace)?;
        self.require_repo(workspace)?;
        self.require_idle(workspace)?;

        let ws = Path::new(workspace);
        let ahead = git::git_info(ws).await.map_or(0, |info| info.ahead_count);
        if ahead == 0 {
            return Ok(OpResult::fail("no commits to push"));
        }

        let output = Command::new("git")
            .arg("-c")
            .arg(format!("safe.directory={workspace}"))
            .arg("-C")
            .arg(workspace)
            .arg("push")
            .output()
            .await
            .map_err(|e| CoreError::external(format!("failed to run git: {e}")))?;

        if output.status.success() {
            return Ok(OpResult::ok("pushed to origin"));
        }

        let detail = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if detail.contains("could not read Username") || detail.contains("Authentication failed") {
            return Ok(OpResult::fail(
                "push failed: authentication required. Use an SSH remote \
                 (git remote set-url origin git@host:user/repo.git) or configure git credentials",
            ));
        }
        Ok(OpResult::fail(format!("push failed: {}", detail.trim())))
    }

    /// Fetches from origin for every git workspace in parallel under a
    /// 30-second wall-clock deadline. Workspaces that do not finish in
    /// time are not awaited; their fetch processes keep running in the
    /// background.
    pub async fn fetch_all(&self) -> OpResult {
        let workspaces = match self.list().await {
            Ok(workspaces) => workspaces,
            Err(_) => return OpResult::fail("failed to list workspaces"),
        };

        let git_paths: Vec<String> = workspaces
            .into_iter()
            .filter(|w| w.git.is_some())
            .map(|w| w.path)
            .collect();

        if git_paths.is_empty() {
            return OpResult::ok("no git workspaces to fetch");
        }

        let count = git_paths.len();
        let fetches = git_paths.into_iter().map(|path| {
            tokio::spawn(async move {
                let _ = git::run_git(Path::new(&path), &["fetch", "origin"]).await;
            })
        });
        let all = futures_util::future::join_all(fetches);

        match tokio::time::timeout(FETCH_ALL_DEADLINE, all).await {
            Ok(_) => OpResult::ok(format!("fetched {count} workspaces")),
            Err(_) => OpResult::ok("fetched workspaces (some timed out)"),
        }
    }

    /// Task statistics for one workspace, `None` when no tracker is
    /// initialized.
    pub async fn cstack_stats(&self, workspace: &Path) -> Option<CstackStats> {
        if !workspace.join(".cstack").exists() {
            return None;
        }

        let fallback = CstackStats {
            exists: true,
            ..CstackStats::default()
        };
        let Ok(output) = Command::new("cs")
            .args(["stats", "--json"])
            .current_dir(workspace)
            .output()
            .await
        else {
            return Some(fallback);
        };
        if !output.status.success() {
            return Some(fallback);
        }

        match serde_json::from_slice::<CstackStats>(&output.stdout) {
            Ok(mut stats) => {
                stats.exists = true;
                Some(stats)
            }
            Err(_) => Some(fallback),
        }
    }

    /// Initializes the task tracker in a workspace.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the workspace is missing.
    pub async fn init_cstack(&self, workspace: &str, mode: &str) -> Result<CstackInitResult> {
        self.require_workspace(workspace)?;
        let ws = Path::new(workspace);

        if ws.join(".cstack").exists() {
            return Ok(CstackInitResult {
                success: false,
                message: None,
                error: Some("cstack already initialized".to_string()),
            });
        }

        let output = Command::new("cs")
            .arg("init")
            .current_dir(ws)
            .output()
            .await
            .map_err(|e| CoreError::external(format!("failed to run cs: {e}")))?;

        if !output.status.success() {
            let detail = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(CstackInitResult {
                success: false,
                message: None,
                error: Some(detail.trim().to_string()),
            });
        }

        if mode == "interview" {
            let marker = ws.join(".cstack/INTERVIEW_PENDING.md");
            let _ = std::fs::write(
                marker,
                "# Interview Pending\n\nThis workspace still needs project context. \
                 Run the interview from the first sleeve session.\n",
            );
        }

        Ok(CstackInitResult {
            success: true,
            message: Some("cstack initialized".to_string()),
            error: None,
        })
    }

    /// Resolves the committer identity: configuration, then environment,
    /// then global git config, then a process-wide default.
    async fn committer_identity(&self) -> (String, String) {
        let mut name = self.cfg.git.committer.name.clone();
        let mut email = self.cfg.git.committer.email.clone();

        if name.is_empty() {
            name = std::env::var("GIT_COMMITTER_NAME").unwrap_or_default();
        }
        if email.is_empty() {
            email = std::env::var("GIT_COMMITTER_EMAIL").unwrap_or_default();
        }

        if name.is_empty() {
            name = global_git_config("user.name").await.unwrap_or_default();
        }
        if email.is_empty() {
            email = global_git_config("user.email").await.unwrap_or_default();
        }

        if name.is_empty() {
            name = "Envoy".to_string();
        }
        if email.is_empty() {
            email = "envoy@localhost".to_string();
        }

        (name, email)
    }

    #[cfg(test)]
    fn insert_job(&self, job: CloneJob) {
        self.jobs.lock().unwrap().insert(job.id.clone(), job);
    }
}

async fn global_git_config(key: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["config", "--global", key])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

async fn clone_repo(url: &str, dest: &Path) -> Result<()> {
    let output = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .await
        .map_err(|e| CoreError::external(format!("failed to run git: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CoreError::external(stderr.trim().to_string()))
    }
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Derives the workspace name from a repository URL: the final path
/// segment with a `.git` suffix stripped.
fn repo_name_from_url(url: &str) -> String {
    let url = url.strip_suffix(".git").unwrap_or(url);
    let url = url.strip_suffix('/').unwrap_or(url);
    url.rsplit(['/', ':']).next().unwrap_or_default().to_string()
}

/// Rewrites an HTTPS clone URL into SSH form:
/// `https://<host>/<path>(.git)?(/)?` becomes `git@<host>:<path>.git`.
fn rewrite_to_ssh(url: &str) -> String {
    let mut url = url.strip_suffix('/').unwrap_or(url).to_string();
    if !url.ends_with(".git") {
        url.push_str(".git");
    }

    let Some(remainder) = url.strip_prefix("https://") else {
        return url;
    };
    match remainder.split_once('/') {
        Some((host, path)) if !host.is_empty() && !path.is_empty() => {
            format!("git@{host}:{path}")
        }
        _ => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_protocol::SleeveInfo;

    struct NoSleeves;

    impl SleeveDirectory for NoSleeves {
        fn list(&self) -> Vec<SleeveInfo> {
            Vec::new()
        }
    }

    struct OneSleeve(String);

    impl SleeveDirectory for OneSleeve {
        fn list(&self) -> Vec<SleeveInfo> {
            vec![SleeveInfo {
                name: "athena".to_string(),
                container_id: "abc".to_string(),
                container_name: "sleeve-athena".to_string(),
                workspace: self.0.clone(),
                spawn_time: Utc::now(),
                status: "running".to_string(),
                constrained: false,
                memory_limit_mb: 0,
                cpu_limit: 0,
                integrity: 100.0,
                dhf: String::new(),
                dhf_version: String::new(),
                sidecar_healthy: false,
                resources: None,
            }]
        }
    }

    fn manager(root: &Path, sleeves: Arc<dyn SleeveDirectory>) -> Arc<WorkspaceManager> {
        let mut cfg = EnvoyConfig::default();
        cfg.runtime.workspace_root = root.to_path_buf();
        Arc::new(WorkspaceManager::new(cfg, sleeves))
    }

    #[test]
    fn repo_name_derivation() {
        let cases = [
            ("https://github.com/user/repo.git", "repo"),
            ("https://github.com/user/repo", "repo"),
            ("https://github.com/user/repo/", "repo"),
            ("git@github.com:user/repo.git", "repo"),
            ("https://gitlab.com/group/subgroup/repo.git", "repo"),
            // A trailing slash shields the .git suffix from stripping.
            ("https://github.com/user/repo.git/", "repo.git"),
            ("myrepo", "myrepo"),
        ];
        for (url, want) in cases {
            assert_eq!(repo_name_from_url(url), want, "url: {url}");
        }
    }

    #[test]
    fn https_urls_rewrite_to_ssh() {
        let cases = [
            (
                "https://github.com/acme/widgets",
                "git@github.com:acme/widgets.git",
            ),
            (
                "https://github.com/user/repo.git",
                "git@github.com:user/repo.git",
            ),
            (
                "https://github.com/user/repo/",
                "git@github.com:user/repo.git",
            ),
            (
                "https://gitlab.com/group/repo",
                "git@gitlab.com:group/repo.git",
            ),
            (
                "https://forge.example.com/user/repo",
                "git@forge.example.com:user/repo.git",
            ),
            ("git@github.com:user/repo.git", "git@github.com:user/repo.git"),
        ];
        for (url, want) in cases {
            assert_eq!(rewrite_to_ssh(url), want, "url: {url}");
        }
    }

    #[test]
    fn create_validates_names() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), Arc::new(NoSleeves));

        assert!(manager.create("").is_err());
        assert!(manager.create("a/b").is_err());
        assert!(manager.create("a\\b").is_err());
        assert!(manager.create("..").is_err());
        assert!(manager.create("v1.2").is_err());

        let ws = manager.create("widgets").unwrap();
        assert!(!ws.in_use);
        assert!(Path::new(&ws.path).is_dir());
    }

    #[test]
    fn create_twice_conflicts_and_leaves_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), Arc::new(NoSleeves));

        let ws = manager.create("widgets").unwrap();
        let err = manager.create("widgets").unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_conflict()));
        assert!(Path::new(&ws.path).is_dir());
    }

    #[tokio::test]
    async fn clone_submit_validates_and_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), Arc::new(NoSleeves));

        let err = manager
            .clone_repository(&CloneWorkspaceRequest::default())
            .unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_validation()));

        let err = manager
            .clone_repository(&CloneWorkspaceRequest {
                repo_url: "ftp://example.com/repo".to_string(),
                name: String::new(),
            })
            .unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_validation()));

        std::fs::create_dir_all(tmp.path().join("widgets")).unwrap();
        let err = manager
            .clone_repository(&CloneWorkspaceRequest {
                repo_url: "https://github.com/acme/widgets".to_string(),
                name: String::new(),
            })
            .unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_conflict()));
    }

    #[tokio::test]
    async fn clone_submit_rewrites_url_and_reports_cloning() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), Arc::new(NoSleeves));

        let job = manager
            .clone_repository(&CloneWorkspaceRequest {
                repo_url: "https://github.com/acme/widgets".to_string(),
                name: String::new(),
            })
            .unwrap();

        assert_eq!(job.id.len(), 16);
        assert!(job.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(job.repo_url, "git@github.com:acme/widgets.git");
        assert!(job.workspace.ends_with("/widgets"));
        assert_eq!(job.status, CloneStatus::Cloning);
        assert_eq!(manager.job(&job.id).unwrap().id, job.id);
    }

    #[test]
    fn sweeper_evicts_only_old_terminal_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), Arc::new(NoSleeves));
        let now = Utc::now();

        manager.insert_job(CloneJob {
            id: "a".repeat(16),
            repo_url: String::new(),
            workspace: String::new(),
            status: CloneStatus::Completed,
            error: None,
            start_time: now - Duration::hours(3),
            end_time: Some(now - Duration::hours(2)),
        });
        manager.insert_job(CloneJob {
            id: "b".repeat(16),
            repo_url: String::new(),
            workspace: String::new(),
            status: CloneStatus::Failed,
            error: Some("boom".to_string()),
            start_time: now,
            end_time: Some(now - Duration::minutes(5)),
        });
        manager.insert_job(CloneJob {
            id: "c".repeat(16),
            repo_url: String::new(),
            workspace: String::new(),
            status: CloneStatus::Cloning,
            error: None,
            start_time: now - Duration::hours(5),
            end_time: None,
        });

        manager.sweep_expired_jobs(now);

        assert!(manager.job(&"a".repeat(16)).is_err());
        assert!(manager.job(&"b".repeat(16)).is_ok());
        assert!(manager.job(&"c".repeat(16)).is_ok());
    }

    #[tokio::test]
    async fn vcs_operations_gate_on_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let ws_path = tmp.path().join("widgets");
        std::fs::create_dir_all(ws_path.join(".git")).unwrap();
        let ws = ws_path.to_string_lossy().into_owned();

        let manager = manager(tmp.path(), Arc::new(OneSleeve(ws.clone())));

        let err = manager.switch_branch(&ws, "main").await.unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_conflict()));

        let err = manager.pull_remote(&ws).await.unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_conflict()));

        let err = manager.commit_all(&ws, "msg").await.unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_conflict()));

        // fetch has no idle requirement; it only needs a repository.
        assert!(manager.fetch_remote(&ws).await.is_ok());
    }

    #[tokio::test]
    async fn vcs_operations_require_a_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let ws_path = tmp.path().join("plain");
        std::fs::create_dir_all(&ws_path).unwrap();
        let ws = ws_path.to_string_lossy().into_owned();

        let manager = manager(tmp.path(), Arc::new(NoSleeves));

        let err = manager.switch_branch(&ws, "main").await.unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_validation()));

        let err = manager.list_branches(&ws).await.unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_validation()));

        let err = manager
            .switch_branch(tmp.path().join("ghost").to_str().unwrap(), "main")
            .await
            .unwrap_err();
        assert!(err.common().is_some_and(|c| c.is_not_found()));
    }

    #[tokio::test]
    async fn list_joins_sleeves_and_flags_thresholds() {
        let tmp = tempfile::tempdir().unwrap();
        let used = tmp.path().join("used");
        std::fs::create_dir_all(&used).unwrap();
        std::fs::create_dir_all(tmp.path().join("free")).unwrap();
        // Plain files under the root are not workspaces.
        std::fs::write(tmp.path().join("stray.txt"), b"x").unwrap();

        let manager = manager(
            tmp.path(),
            Arc::new(OneSleeve(used.to_string_lossy().into_owned())),
        );
        let workspaces = manager.list().await.unwrap();
        assert_eq!(workspaces.len(), 2);

        let free = workspaces.iter().find(|w| w.name == "free").unwrap();
        assert!(!free.in_use);
        assert!(free.sleeve_name.is_none());
        assert!(!free.size_warning);

        let used = workspaces.iter().find(|w| w.name == "used").unwrap();
        assert!(used.in_use);
        assert_eq!(used.sleeve_name.as_deref(), Some("athena"));
    }
}
