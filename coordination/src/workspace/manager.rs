//! Workspace manager: git worktree isolation per task.
//!
//! Each task gets its own worktree on branch `<prefix><slug>` rooted at the
//! integration-branch tip. Provisioning is idempotent per task id, and a
//! dirty workspace is never destroyed without `force`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;
use crate::git::GitRunner;
use crate::task::Task;
use crate::workspace::error::{WorkspaceError, WorkspaceResult};
use crate::workspace::types::{ChangeSet, Workspace, WorkspaceListing, WorkspaceStatus};

/// Branch/path-safe name for a task id.
///
/// Ids that need sanitising get a short digest of the raw id appended so two
/// distinct ids never map to the same workspace.
pub fn workspace_slug(task_id: &str) -> String {
    let sanitized: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed == task_id {
        return trimmed.to_string();
    }
    let digest = blake3::hash(task_id.as_bytes()).to_hex();
    let stem = if trimmed.is_empty() { "task" } else { trimmed };
    format!("{stem}-{}", &digest.as_str()[..8])
}

/// Files that look like credentials and are never copied by default.
pub fn looks_like_secret(rel_path: &str) -> bool {
    let name = Path::new(rel_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(rel_path)
        .to_ascii_lowercase();
    let template = [".example", ".sample", ".template"]
        .iter()
        .any(|s| name.ends_with(s));
    (name.starts_with(".env") && !template)
        || [".pem", ".key", ".p12", ".pfx", ".keystore"]
            .iter()
            .any(|ext| name.ends_with(ext))
        || name.starts_with("id_rsa")
        || name.starts_with("id_ed25519")
        || name.contains("secret")
        || name.contains("credential")
}

struct LiveWorkspace {
    workspace: Workspace,
    leased: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the lifecycle of every task workspace.
pub struct WorkspaceManager {
    git: GitRunner,
    repo_root: PathBuf,
    base_dir: PathBuf,
    config: WorkspaceConfig,
    /// Serialises worktree creation and removal.
    provision_lock: Mutex<()>,
    live: Mutex<BTreeMap<String, LiveWorkspace>>,
}

impl WorkspaceManager {
    pub fn new(repo_root: impl AsRef<Path>, config: WorkspaceConfig) -> WorkspaceResult<Self> {
        let repo_root = repo_root.as_ref().to_path_buf();
        let git = GitRunner::new(&repo_root);
        let Ok(common_dir) = git.run(&["rev-parse", "--git-common-dir"]) else {
            return Err(WorkspaceError::NotARepository { path: repo_root });
        };
        // Relative to the repository root unless git printed an absolute path.
        let base_dir = config.resolved_base_dir(&repo_root.join(common_dir));
        std::fs::create_dir_all(&base_dir).map_err(|e| WorkspaceError::io(&base_dir, e))?;

        Ok(Self {
            git,
            repo_root,
            base_dir,
            config,
            provision_lock: Mutex::new(()),
            live: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn branch_for(&self, task_id: &str) -> String {
        format!("{}{}", self.config.branch_prefix, workspace_slug(task_id))
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.base_dir.join(workspace_slug(task_id))
    }

    /// Create (or return the existing) workspace for `task`.
    pub fn provision(&self, task: &Task) -> WorkspaceResult<Workspace> {
        let _guard = lock(&self.provision_lock);

        if let Some(live) = lock(&self.live).get_mut(&task.id) {
            live.leased = true;
            debug!(task_id = %task.id, "reusing live workspace");
            return Ok(live.workspace.clone());
        }

        let branch = self.branch_for(&task.id);
        if self.config.is_protected(&branch) {
            return Err(WorkspaceError::ProtectedBranch { branch });
        }
        let path = self.path_for(&task.id);

        let workspace = if path.exists() {
            self.adopt(&task.id, &path, &branch)?
        } else {
            self.create(&task.id, &path, &branch)?
        };

        lock(&self.live).insert(
            task.id.clone(),
            LiveWorkspace {
                workspace: workspace.clone(),
                leased: true,
            },
        );
        Ok(workspace)
    }

    fn create(&self, task_id: &str, path: &Path, branch: &str) -> WorkspaceResult<Workspace> {
        let base_ref = self.git.rev_parse(&self.config.integration_branch)?;
        if self.git.branch_exists(branch)? {
            warn!(task_id, branch, "stale task branch without worktree; resetting to integration tip");
        }

        self.git.run_with_retry(&[
            "worktree",
            "add",
            "-B",
            branch,
            &path.display().to_string(),
            &base_ref,
        ])?;

        let copied_files = self.copy_allow_listed(path)?;
        info!(task_id, branch, path = %path.display(), base_ref = %base_ref, "provisioned workspace");

        Ok(Workspace {
            task_id: task_id.to_string(),
            path: path.to_path_buf(),
            branch_name: branch.to_string(),
            base_ref,
            created_at: Utc::now(),
            copied_files,
        })
    }

    /// Take over a worktree left on disk by an earlier run.
    fn adopt(&self, task_id: &str, path: &Path, branch: &str) -> WorkspaceResult<Workspace> {
        let wanted = canonical(path);
        let registered = self
            .worktrees()?
            .into_iter()
            .any(|(p, b)| canonical(&p) == wanted && b.as_deref() == Some(branch));
        if !registered {
            return Err(WorkspaceError::PathConflict {
                task_id: task_id.to_string(),
                path: path.to_path_buf(),
            });
        }

        let base_ref = self.git.merge_base(&self.config.integration_branch, branch)?;
        let copied_files = self
            .config
            .env_allow_list
            .iter()
            .filter(|rel| path.join(rel).exists())
            .cloned()
            .collect();
        info!(task_id, branch, path = %path.display(), "adopted existing workspace");

        Ok(Workspace {
            task_id: task_id.to_string(),
            path: path.to_path_buf(),
            branch_name: branch.to_string(),
            base_ref,
            created_at: Utc::now(),
            copied_files,
        })
    }

    fn copy_allow_listed(&self, dest_root: &Path) -> WorkspaceResult<Vec<String>> {
        let mut copied = Vec::new();
        for rel in &self.config.env_allow_list {
            let rel_path = Path::new(rel);
            if rel_path.is_absolute()
                || rel_path
                    .components()
                    .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(WorkspaceError::UnsafeCopyPath { path: rel.clone() });
            }
            if looks_like_secret(rel) && !self.config.allow_secret_files {
                warn!(file = %rel, "skipping secret-looking file; set allow_secret_files to copy it");
                continue;
            }
            let src = self.repo_root.join(rel_path);
            if !src.is_file() {
                debug!(file = %rel, "allow-listed file not present; skipping");
                continue;
            }
            let dst = dest_root.join(rel_path);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
            }
            std::fs::copy(&src, &dst).map_err(|e| WorkspaceError::io(&dst, e))?;
            copied.push(rel.clone());
        }
        Ok(copied)
    }

    /// Clean, or dirty with the number of changed paths.
    pub fn status(&self, workspace: &Workspace) -> WorkspaceResult<WorkspaceStatus> {
        let copied = |path: &str| workspace.copied_files.iter().any(|c| c == path);
        let changes = self
            .git
            .at(&workspace.path)
            .status_entries()?
            .iter()
            .filter(|entry| {
                !(copied(&entry.path) && entry.orig_path.as_deref().map_or(true, copied))
            })
            .count();
        Ok(if changes == 0 {
            WorkspaceStatus::Clean
        } else {
            WorkspaceStatus::Dirty { changes }
        })
    }

    /// Commits on the workspace branch that are not in `base_ref`.
    pub fn new_commits(&self, workspace: &Workspace) -> WorkspaceResult<usize> {
        Ok(self
            .git
            .at(&workspace.path)
            .commits_between(&workspace.base_ref, "HEAD")?)
    }

    /// Diff and file list of the workspace relative to its base.
    pub fn change_set(&self, workspace: &Workspace) -> WorkspaceResult<ChangeSet> {
        let git = self.git.at(&workspace.path);
        let head = git.rev_parse("HEAD")?;
        let range = format!("{}..{}", workspace.base_ref, head);
        Ok(ChangeSet {
            base_ref: workspace.base_ref.clone(),
            commits: git.commits_between(&workspace.base_ref, &head)?,
            files: git.changed_files(&workspace.base_ref, &head)?,
            diff: git.run(&["diff", &range])?,
            head,
        })
    }

    /// Tear down a workspace. Refuses a dirty one unless `force`.
    pub fn destroy(&self, workspace: &Workspace, force: bool) -> WorkspaceResult<()> {
        let _guard = lock(&self.provision_lock);

        if workspace.path.exists() {
            if !force {
                if let WorkspaceStatus::Dirty { changes } = self.status(workspace)? {
                    warn!(
                        task_id = %workspace.task_id,
                        path = %workspace.path.display(),
                        changes,
                        "refusing to destroy dirty workspace; operator attention needed"
                    );
                    return Err(WorkspaceError::Dirty {
                        task_id: workspace.task_id.clone(),
                        changes,
                    });
                }
            }
            // Cleanliness was checked above; --force only covers copied files.
            self.git.run_with_retry(&[
                "worktree",
                "remove",
                "--force",
                &workspace.path.display().to_string(),
            ])?;
        } else {
            self.git.run(&["worktree", "prune"])?;
        }

        let flag = if force { "-D" } else { "-d" };
        if let Err(e) = self.git.run(&["branch", flag, &workspace.branch_name]) {
            warn!(branch = %workspace.branch_name, error = %e, "task branch kept");
        }

        lock(&self.live).remove(&workspace.task_id);
        info!(task_id = %workspace.task_id, force, "destroyed workspace");
        Ok(())
    }

    /// Mark a workspace as no longer held by its task.
    pub fn release(&self, task_id: &str) {
        if let Some(live) = lock(&self.live).get_mut(task_id) {
            live.leased = false;
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Workspace> {
        lock(&self.live).get(task_id).map(|l| l.workspace.clone())
    }

    /// All live workspaces, by task id.
    pub fn list(&self) -> Vec<WorkspaceListing> {
        lock(&self.live)
            .values()
            .map(|l| WorkspaceListing {
                workspace: l.workspace.clone(),
                leased: l.leased,
            })
            .collect()
    }

    /// Remove clean, released workspaces older than `max_age`.
    pub fn reap(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let candidates: Vec<Workspace> = lock(&self.live)
            .values()
            .filter(|l| !l.leased)
            .filter(|l| (now - l.workspace.created_at).to_std().unwrap_or_default() >= max_age)
            .map(|l| l.workspace.clone())
            .collect();

        let mut reaped = Vec::new();
        for workspace in candidates {
            match self.destroy(&workspace, false) {
                Ok(()) => reaped.push(workspace.task_id),
                Err(WorkspaceError::Dirty { .. }) => {}
                Err(e) => warn!(task_id = %workspace.task_id, error = %e, "reap failed"),
            }
        }
        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped idle workspaces");
        }
        reaped
    }

    /// Register task worktrees that an earlier process left under the base
    /// directory, unleased. They are keyed by slug since the raw task id is
    /// not recoverable from disk; returns the slugs registered.
    pub fn discover(&self) -> WorkspaceResult<Vec<String>> {
        let base_dir = canonical(&self.base_dir);
        let mut found = Vec::new();

        for (path, branch) in self.worktrees()? {
            let Some(branch) = branch else { continue };
            let Some(slug) = branch.strip_prefix(&self.config.branch_prefix) else {
                continue;
            };
            if canonical(&path).parent() != Some(base_dir.as_path()) {
                continue;
            }
            let known = lock(&self.live)
                .values()
                .any(|l| l.workspace.branch_name == branch);
            if known {
                continue;
            }

            let created_at = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(chrono::DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let workspace = Workspace {
                task_id: slug.to_string(),
                base_ref: self.git.merge_base(&self.config.integration_branch, &branch)?,
                path,
                branch_name: branch.clone(),
                created_at,
                copied_files: Vec::new(),
            };
            lock(&self.live).insert(
                slug.to_string(),
                LiveWorkspace {
                    workspace,
                    leased: false,
                },
            );
            found.push(slug.to_string());
        }
        if !found.is_empty() {
            debug!(count = found.len(), "discovered workspaces on disk");
        }
        Ok(found)
    }

    /// `(path, branch)` pairs from `git worktree list --porcelain`.
    fn worktrees(&self) -> WorkspaceResult<Vec<(PathBuf, Option<String>)>> {
        let stdout = self.git.run(&["worktree", "list", "--porcelain"])?;
        let mut entries = Vec::new();
        let mut current: Option<(PathBuf, Option<String>)> = None;

        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some((PathBuf::from(path), None));
            } else if let Some(branch) = line.strip_prefix("branch refs/heads/") {
                if let Some(entry) = current.as_mut() {
                    entry.1 = Some(branch.to_string());
                }
            }
        }
        if let Some(entry) = current {
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
