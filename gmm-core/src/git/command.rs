//! Git subcommands used to maintain mirrors
//!
//! Every subcommand failure is reported as [`Error::GitCommand`], except a
//! command that exceeded its time budget, which is reported as
//! [`Error::Network`]. Git's own output is logged but never placed in the
//! returned error.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::executor::{CommandExecutor, ExecError};
use crate::fs::FileSystem;
use crate::{Error, Result};

/// Git operations needed by a mirror
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// URL of the `origin` remote configured in `directory`
    async fn remote_url(&self, directory: &Path) -> Result<String>;

    /// Raw `ls-remote --tags` output for `uri`; doubles as a reachability probe
    async fn ls_remote_tags(&self, uri: &str) -> Result<String>;

    /// Fetch from the default remote, pruning deleted refs
    async fn fetch_prune(&self, directory: &Path) -> Result<()>;

    /// Create a bare mirror clone of `uri` at `path`
    async fn create_mirror(&self, uri: &str, path: &Path) -> Result<()>;

    /// Write `<path>/dist/<tag>.zip` from the repository at `path`
    async fn create_tag_archive(&self, tag: &str, path: &Path) -> Result<()>;
}

/// [`CommandRunner`] that invokes the git binary through a [`CommandExecutor`]
pub struct GitCommandRunner {
    git_path: String,
    executor: Arc<dyn CommandExecutor>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for GitCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCommandRunner")
            .field("git_path", &self.git_path)
            .finish_non_exhaustive()
    }
}

impl GitCommandRunner {
    /// Create a runner using `git` from `PATH`
    pub fn new(executor: Arc<dyn CommandExecutor>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            git_path: "git".to_string(),
            executor,
            fs,
        }
    }

    /// Use a specific git executable
    pub fn with_git_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = path.into();
        self
    }

    /// Run a git subcommand and classify its failure
    async fn exec(&self, directory: Option<&Path>, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let subcommand = args.first().cloned().unwrap_or_default();

        self.executor
            .exec(&self.git_path, directory, &args)
            .await
            .map_err(|err| classify(&subcommand, err))
    }
}

fn classify(subcommand: &str, err: ExecError) -> Error {
    match err {
        ExecError::TimedOut { .. } => {
            tracing::warn!(subcommand, error = %err, "git command timed out");
            Error::Network(format!("git {}: {}", subcommand, err))
        }
        ExecError::Exit { ref output, .. } => {
            tracing::warn!(subcommand, "Git said: {}", output);
            Error::GitCommand {
                command: subcommand.to_string(),
                reason: err.to_string(),
            }
        }
        ExecError::Spawn { .. } => Error::GitCommand {
            command: subcommand.to_string(),
            reason: err.to_string(),
        },
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::UserInput(format!("path is not valid UTF-8: {}", path.display()))
    })
}

#[async_trait]
impl CommandRunner for GitCommandRunner {
    async fn remote_url(&self, directory: &Path) -> Result<String> {
        self.exec(Some(directory), &["config", "--get", "remote.origin.url"])
            .await
    }

    async fn ls_remote_tags(&self, uri: &str) -> Result<String> {
        self.exec(None, &["ls-remote", "--tags", uri]).await
    }

    async fn fetch_prune(&self, directory: &Path) -> Result<()> {
        self.exec(Some(directory), &["fetch", "--prune"]).await?;
        Ok(())
    }

    async fn create_mirror(&self, uri: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent)?;
        }

        self.exec(None, &["clone", "--mirror", "--bare", uri, path_arg(path)?])
            .await?;
        Ok(())
    }

    async fn create_tag_archive(&self, tag: &str, path: &Path) -> Result<()> {
        let output = path.join("dist").join(format!("{}.zip", tag));

        // Tags like "release/1.0" nest below dist/
        if let Some(parent) = output.parent() {
            self.fs.create_dir_all(parent)?;
        }

        self.exec(Some(path), &["archive", tag, "-o", path_arg(&output)?])
            .await?;
        Ok(())
    }
}

/// Extract tag names from `git ls-remote --tags` output
///
/// Peeled entries (`refs/tags/v1^{}`) are skipped so each tag appears once.
pub fn parse_tag_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|reference| reference.strip_prefix("refs/tags/"))
        .filter(|tag| !tag.ends_with("^{}"))
        .map(|tag| tag.to_string())
        .collect()
}
