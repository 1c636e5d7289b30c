//! The mirror registry
//!
//! [`MirrorManager`] owns the name → [`Mirror`] map. A single async mutex
//! guards the map and is held for the whole of every mutation (`add`,
//! `remove`, `load_from_disk`), so a duplicate check and the insert it guards
//! can never interleave with another mutation. Long-running per-mirror work
//! (`update`, `archive_tags`) runs on a [`MirrorHandle`] after the lock is
//! released.
//!
//! `add` probes the remote while holding the lock, so a slow remote delays
//! every other registry call, reads included, for up to the git timeout.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::{Config, MirrorsConfig};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::git::{CommandRunner, GitCommandRunner, ProcessExecutor};
use crate::mirror::{mirror_name_from_uri, Mirror, MirrorHandle};
use crate::{Error, Result};

/// Builds a [`Mirror`] for a remote URI
#[async_trait]
pub trait MirrorFactory: Send + Sync {
    async fn create(&self, uri: &str) -> Result<Mirror>;
}

/// Factory creating mirrors below the configured base directory
pub struct DefaultMirrorFactory {
    config: MirrorsConfig,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
}

impl DefaultMirrorFactory {
    pub fn new(
        config: MirrorsConfig,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self { config, runner, fs }
    }

}

#[async_trait]
impl MirrorFactory for DefaultMirrorFactory {
    async fn create(&self, uri: &str) -> Result<Mirror> {
        let name = mirror_name_from_uri(uri)?;
        let interval = self.config.update_interval_for(&name);

        Mirror::create(
            uri,
            &self.config.base_dir,
            interval,
            self.runner.clone(),
            self.fs.clone(),
        )
        .await
    }
}

/// Registry of mirrors with serialized add/remove
pub struct MirrorManager {
    factory: Arc<dyn MirrorFactory>,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
    mirrors: Mutex<HashMap<String, Mirror>>,
}

impl std::fmt::Debug for MirrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorManager").finish_non_exhaustive()
    }
}

impl MirrorManager {
    /// Create an empty registry
    pub fn new(
        factory: Arc<dyn MirrorFactory>,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            factory,
            runner,
            fs,
            mirrors: Mutex::new(HashMap::new()),
        }
    }

    /// Wire a registry to the local disk and git binary described by `config`
    pub fn from_config(config: &Config) -> Self {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem);
        let executor = Arc::new(ProcessExecutor::new(config.git.timeout));
        let runner: Arc<dyn CommandRunner> = Arc::new(
            GitCommandRunner::new(executor, fs.clone()).with_git_path(&config.git.path),
        );
        let factory = Arc::new(DefaultMirrorFactory::new(
            config.mirrors.clone(),
            runner.clone(),
            fs.clone(),
        ));

        Self::new(factory, runner, fs)
    }

    /// Whether a mirror named `name` is registered
    pub async fn has(&self, name: &str) -> bool {
        self.mirrors.lock().await.contains_key(name)
    }

    /// Number of registered mirrors
    pub async fn len(&self) -> usize {
        self.mirrors.lock().await.len()
    }

    /// Whether no mirrors are registered
    pub async fn is_empty(&self) -> bool {
        self.mirrors.lock().await.is_empty()
    }

    /// Sorted names of all registered mirrors
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mirrors.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// A handle to the mirror named `name`
    pub async fn handle(&self, name: &str) -> Option<MirrorHandle> {
        self.mirrors.lock().await.get(name).map(Mirror::handle)
    }

    /// Register a new mirror for `uri` and return its name
    ///
    /// Fails with `UserInput` for a malformed URI or when a mirror with the
    /// same derived name already exists.
    pub async fn add(&self, uri: &str) -> Result<String> {
        let name = mirror_name_from_uri(uri)?;
        let mut mirrors = self.mirrors.lock().await;
        self.insert(&mut mirrors, uri, &name).await
    }

    /// Destroy and unregister the mirror named `name`
    ///
    /// If destroying fails the mirror stays registered so the removal can be
    /// retried.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut mirrors = self.mirrors.lock().await;

        let mirror = mirrors
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("mirror '{}' does not exist", name)))?;

        tracing::info!(mirror = %name, "Removing");
        mirror.destroy().await?;
        mirrors.remove(name);

        Ok(())
    }

    /// Populate the registry from `<base_dir>/<namespace>/<repo>` directories
    ///
    /// Each repository's `remote.origin.url` determines its mirror. Any
    /// failure aborts the scan; mirrors registered before the failure stay.
    pub async fn load_from_disk(&self, base_dir: &Path) -> Result<()> {
        let mut mirrors = self.mirrors.lock().await;

        for namespace in self.fs.read_subdirs(base_dir)? {
            let namespace_dir = base_dir.join(&namespace);
            tracing::info!(%namespace, "Handling namespace");

            for repo in self.fs.read_subdirs(&namespace_dir)? {
                let repo_dir: PathBuf = namespace_dir.join(&repo);
                let remote = self.runner.remote_url(&repo_dir).await?;
                let name = mirror_name_from_uri(&remote)?;
                self.insert(&mut mirrors, &remote, &name).await?;
            }
        }

        tracing::info!(count = mirrors.len(), "Loaded mirrors from disk");
        Ok(())
    }

    /// Fetch the mirror named `name` now
    pub async fn update(&self, name: &str) -> Result<()> {
        self.require(name).await?.update().await
    }

    /// Write tag archives for the mirror named `name`
    pub async fn archive_tags(&self, name: &str) -> Result<Vec<String>> {
        self.require(name).await?.create_tag_archives().await
    }

    /// Stop every scheduled job, keeping mirrors and their data
    pub async fn shutdown(&self) {
        let mut mirrors = self.mirrors.lock().await;
        for mirror in mirrors.values_mut() {
            mirror.stop_schedule();
        }
        tracing::info!(count = mirrors.len(), "Stopped mirror schedules");
    }

    async fn require(&self, name: &str) -> Result<MirrorHandle> {
        self.handle(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("mirror '{}' does not exist", name)))
    }

    async fn insert(
        &self,
        mirrors: &mut HashMap<String, Mirror>,
        uri: &str,
        name: &str,
    ) -> Result<String> {
        if mirrors.contains_key(name) {
            return Err(already_exists(name));
        }

        let mirror = self.factory.create(uri).await?;

        match mirrors.entry(mirror.name().to_string()) {
            Entry::Occupied(entry) => Err(already_exists(entry.key())),
            Entry::Vacant(entry) => {
                tracing::info!(%uri, mirror = %entry.key(), "Set remote");
                let name = entry.key().clone();
                entry.insert(mirror);
                Ok(name)
            }
        }
    }
}

fn already_exists(name: &str) -> Error {
    Error::UserInput(format!("mirror '{}' already exists", name))
}
