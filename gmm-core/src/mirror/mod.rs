//! A single mirrored repository and its lifecycle
//!
//! Creating a [`Mirror`] whose directory does not exist yet probes the remote
//! and starts the initial clone in the background; the caller gets the mirror
//! back before the clone finishes. While that clone is in flight a scheduled
//! update is skipped.
//!
//! Every git operation on a mirror's directory holds a shared guard and is
//! cancelled once the mirror is closed. [`Mirror::destroy`] closes the mirror,
//! then takes the guard exclusively before deleting, so no clone, fetch or
//! archive can write into the directory after it is removed.

mod name;
mod schedule;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::fs::FileSystem;
use crate::git::{parse_tag_list, CommandRunner};
use crate::{Error, Result};

pub use name::mirror_name_from_uri;
pub use schedule::{ScheduledJob, UpdateSchedule, DISABLED};

/// Progress of a mirror's initial clone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneState {
    /// Local data is present
    Ready,
    /// The initial clone is running
    Cloning,
    /// The last clone attempt failed; the next update retries it
    Failed,
}

struct MirrorInner {
    name: String,
    uri: String,
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
    clone_state: watch::Sender<CloneState>,
    closed: watch::Sender<bool>,
    // Shared by git operations on `path`, exclusive while destroying
    disk: RwLock<()>,
}

/// Shared reference to a mirror's data, usable without owning the [`Mirror`]
///
/// Handles are cheap to clone and are what the scheduled job and the initial
/// clone task hold on to.
#[derive(Clone)]
pub struct MirrorHandle {
    inner: Arc<MirrorInner>,
}

impl std::fmt::Debug for MirrorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorHandle")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .field("clone_state", &self.clone_state())
            .finish_non_exhaustive()
    }
}

impl MirrorHandle {
    /// The `<namespace>/<repo>` name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The remote this mirror follows
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Local path of the bare repository
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current state of the initial clone
    pub fn clone_state(&self) -> CloneState {
        *self.inner.clone_state.borrow()
    }

    /// Whether the mirror is being destroyed
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Wait until no clone is in flight and return the resulting state
    pub async fn wait_for_clone(&self) -> CloneState {
        let mut rx = self.inner.clone_state.subscribe();
        let state = match rx.wait_for(|state| *state != CloneState::Cloning).await {
            Ok(state) => *state,
            // The sender lives in `inner`, which we hold
            Err(_) => self.clone_state(),
        };
        state
    }

    /// Fetch from the remote, pruning deleted refs
    ///
    /// Skipped while the initial clone is still running or the mirror is
    /// being destroyed. If the last clone failed, the clone is attempted
    /// again instead.
    pub async fn update(&self) -> Result<()> {
        let _disk = self.inner.disk.read().await;

        if self.is_closed() {
            tracing::info!(mirror = %self.name(), "Mirror is being removed, skipping update");
            return Ok(());
        }

        match self.clone_state() {
            CloneState::Cloning => {
                tracing::info!(mirror = %self.name(), "Initial clone in progress, skipping update");
                return Ok(());
            }
            CloneState::Failed => return self.retry_clone().await,
            CloneState::Ready => {}
        }

        tracing::info!(mirror = %self.name(), "Updating");
        match self
            .until_closed(self.inner.runner.fetch_prune(self.path()))
            .await
        {
            Some(result) => result?,
            None => {
                tracing::info!(mirror = %self.name(), "Update cancelled");
                return Ok(());
            }
        }
        tracing::info!(mirror = %self.name(), "Update completed");
        Ok(())
    }

    /// Archive every remote tag into `<path>/dist/<tag>.zip`
    ///
    /// Returns the archived tags; stops at the first failure.
    pub async fn create_tag_archives(&self) -> Result<Vec<String>> {
        let _disk = self.inner.disk.read().await;

        if self.is_closed() {
            return Err(self.removed());
        }

        let output = self
            .until_closed(self.inner.runner.ls_remote_tags(self.uri()))
            .await
            .ok_or_else(|| self.removed())??;
        let tags = parse_tag_list(&output);

        for tag in &tags {
            tracing::debug!(mirror = %self.name(), %tag, "Archiving tag");
            self.until_closed(self.inner.runner.create_tag_archive(tag, self.path()))
                .await
                .ok_or_else(|| self.removed())??;
        }

        tracing::info!(mirror = %self.name(), count = tags.len(), "Tag archives written");
        Ok(tags)
    }

    fn removed(&self) -> Error {
        Error::NotFound(format!("mirror '{}' is being removed", self.name()))
    }

    /// Run `op` unless the mirror is closed first; `None` means it was dropped
    async fn until_closed<T>(&self, op: impl Future<Output = Result<T>>) -> Option<Result<T>> {
        let mut closed = self.inner.closed.subscribe();
        let outcome = tokio::select! {
            result = op => Some(result),
            _ = closed.wait_for(|closed| *closed) => None,
        };
        outcome
    }

    async fn retry_clone(&self) -> Result<()> {
        let claimed = self.inner.clone_state.send_if_modified(|state| {
            if *state == CloneState::Failed {
                *state = CloneState::Cloning;
                true
            } else {
                false
            }
        });

        if !claimed {
            return Ok(());
        }

        tracing::info!(mirror = %self.name(), "Retrying failed clone");
        self.clone_into_place().await
    }

    /// Callers hold a shared `disk` guard
    async fn clone_into_place(&self) -> Result<()> {
        if self.is_closed() {
            self.inner.clone_state.send_replace(CloneState::Failed);
            return Ok(());
        }

        // A killed clone leaves a partial directory git refuses to clone into
        if self.inner.fs.dir_exists(self.path()) {
            tracing::info!(path = %self.path().display(), "Removing leftovers of an earlier clone");
            if let Err(e) = self.inner.fs.remove_dir_all(self.path()) {
                self.inner.clone_state.send_replace(CloneState::Failed);
                return Err(e);
            }
        }

        tracing::info!(mirror = %self.name(), "Cloning");
        let result = match self
            .until_closed(self.inner.runner.create_mirror(self.uri(), self.path()))
            .await
        {
            Some(result) => result,
            None => {
                tracing::info!(mirror = %self.name(), "Clone cancelled");
                self.inner.clone_state.send_replace(CloneState::Failed);
                return Ok(());
            }
        };

        let state = match result {
            Ok(()) => {
                tracing::info!(mirror = %self.name(), "Cloning completed");
                CloneState::Ready
            }
            Err(_) => CloneState::Failed,
        };
        self.inner.clone_state.send_replace(state);

        result
    }
}

/// One tracked repository mirror
///
/// Owns the periodic update job (when enabled) and the initial clone task.
pub struct Mirror {
    handle: MirrorHandle,
    schedule: Option<ScheduledJob>,
    clone_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("handle", &self.handle)
            .field("scheduled", &self.schedule.is_some())
            .finish_non_exhaustive()
    }
}

impl Mirror {
    /// Create a mirror of `uri` below `base_dir`
    ///
    /// Fails with `UserInput` for an unusable URI and `Scheduling` for a
    /// malformed schedule, in both cases before touching the remote. When no
    /// local data exists the remote is probed (its failure is returned) and
    /// the clone continues in the background. Must be called from within a
    /// tokio runtime.
    pub async fn create(
        uri: &str,
        base_dir: &Path,
        update_interval: &str,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let uri = uri.trim();
        let name = mirror_name_from_uri(uri)?;
        let schedule = UpdateSchedule::parse(update_interval)?;
        let path = base_dir.join(&name);

        tracing::info!(mirror = %name, path = %path.display(), "Expecting repository");

        let exists = fs.dir_exists(&path);
        if !exists {
            assert_valid_remote(runner.as_ref(), uri).await?;
            tracing::info!(path = %path.display(), "Repository does not exist yet");
        }

        let initial_state = if exists {
            CloneState::Ready
        } else {
            CloneState::Cloning
        };
        let (clone_state, _) = watch::channel(initial_state);
        let (closed, _) = watch::channel(false);

        let handle = MirrorHandle {
            inner: Arc::new(MirrorInner {
                name,
                uri: uri.to_string(),
                path,
                runner,
                fs,
                clone_state,
                closed,
                disk: RwLock::new(()),
            }),
        };

        let clone_task = (!exists).then(|| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _disk = handle.inner.disk.read().await;
                if let Err(e) = handle.clone_into_place().await {
                    tracing::error!(mirror = %handle.name(), error = %e, "Initial clone failed");
                }
            })
        });

        let job_handle = handle.clone();
        let schedule = schedule.start(handle.name(), move || {
            let handle = job_handle.clone();
            async move {
                if let Err(e) = handle.update().await {
                    tracing::error!(mirror = %handle.name(), error = %e, "Scheduled update failed");
                }
            }
        });

        tracing::info!(mirror = %handle.name(), scheduled = schedule.is_some(), "Initialized mirror");

        Ok(Self {
            handle,
            schedule,
            clone_task,
        })
    }

    /// The `<namespace>/<repo>` name
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// The remote this mirror follows
    pub fn uri(&self) -> &str {
        self.handle.uri()
    }

    /// Local path of the bare repository
    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    /// A shared handle for running operations outside the registry
    pub fn handle(&self) -> MirrorHandle {
        self.handle.clone()
    }

    /// Current state of the initial clone
    pub fn clone_state(&self) -> CloneState {
        self.handle.clone_state()
    }

    /// Whether a periodic update job is attached
    pub fn is_scheduled(&self) -> bool {
        self.schedule.as_ref().is_some_and(|job| !job.is_stopped())
    }

    /// Fetch from the remote now
    pub async fn update(&self) -> Result<()> {
        self.handle.update().await
    }

    /// Stop the periodic update job, keeping local data
    pub fn stop_schedule(&mut self) {
        if let Some(job) = self.schedule.take() {
            job.stop();
        }
    }

    /// Close the mirror, wait out its git operations and delete local data
    ///
    /// A closed mirror stays closed even when the removal fails: later
    /// updates are skipped and only another `destroy` touches the directory.
    pub async fn destroy(&mut self) -> Result<()> {
        self.handle.inner.closed.send_replace(true);

        if let Some(mut job) = self.schedule.take() {
            job.stop_and_wait().await;
        }

        if let Some(task) = self.clone_task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!(mirror = %self.name(), error = %e, "Initial clone task panicked");
                }
            }
        }

        // Clones and fetches started from other handles see `closed` and
        // release their shared guards
        let _disk = self.handle.inner.disk.write().await;

        tracing::info!(path = %self.path().display(), "Removing directory");
        self.handle.inner.fs.remove_dir_all(self.path())?;
        tracing::info!(path = %self.path().display(), "Done removing");
        Ok(())
    }
}

async fn assert_valid_remote(runner: &dyn CommandRunner, uri: &str) -> Result<()> {
    tracing::info!(%uri, "Testing remote");
    runner.ls_remote_tags(uri).await?;
    tracing::info!(%uri, "Remote reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::testing::FakeRunner;
    use crate::ErrorKind;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn create(
        temp: &TempDir,
        uri: &str,
        interval: &str,
        runner: &Arc<FakeRunner>,
    ) -> Result<Mirror> {
        Mirror::create(
            uri,
            temp.path(),
            interval,
            runner.clone(),
            Arc::new(LocalFileSystem),
        )
        .await
    }

    #[tokio::test]
    async fn test_empty_uri_is_user_input() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let err = create(&temp, "", DISABLED, &runner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserInput);
        assert_eq!(runner.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_new_mirror_clones_in_background() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.hold_clones();

        let mirror = create(&temp, "http://x/NS/A.git", DISABLED, &runner)
            .await
            .unwrap();

        assert_eq!(mirror.name(), "ns/a");
        assert_eq!(mirror.path(), temp.path().join("ns").join("a"));
        assert_eq!(mirror.clone_state(), CloneState::Cloning);
        assert_eq!(runner.probe_count(), 1);

        runner.release_clones();
        assert_eq!(mirror.handle().wait_for_clone().await, CloneState::Ready);
        assert!(mirror.path().is_dir());
        assert_eq!(runner.clone_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_directory_skips_probe_and_clone() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();

        assert_eq!(mirror.clone_state(), CloneState::Ready);
        assert_eq!(runner.probe_count(), 0);
        assert_eq!(runner.clone_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails_construction() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.set_unreachable("http://x/ns/a");

        let err = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::GitCommand);
        assert_eq!(runner.clone_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_schedule_fails_before_probe() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());

        let err = create(&temp, "http://x/ns/a", "every now and then", &runner)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Scheduling);
        assert_eq!(runner.probe_count(), 0);
        assert_eq!(runner.clone_count(), 0);
    }

    #[tokio::test]
    async fn test_clone_failure_is_not_returned() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_clones();

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();

        assert_eq!(mirror.handle().wait_for_clone().await, CloneState::Failed);
    }

    #[tokio::test]
    async fn test_update_fetches_when_ready() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        mirror.update().await.unwrap();

        assert_eq!(runner.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_update_propagates_fetch_failure() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_fetches();

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();

        let err = mirror.update().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GitCommand);
    }

    #[tokio::test]
    async fn test_update_skipped_while_cloning() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.hold_clones();

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        mirror.update().await.unwrap();

        assert_eq!(runner.fetch_count(), 0);
        runner.release_clones();
    }

    #[tokio::test]
    async fn test_update_retries_failed_clone() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_clones();

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        assert_eq!(mirror.handle().wait_for_clone().await, CloneState::Failed);

        assert!(mirror.update().await.is_err());
        assert_eq!(runner.clone_count(), 2);
        assert_eq!(runner.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_updates_fire() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mut mirror = create(&temp, "http://x/ns/a", "@every 20ms", &runner)
            .await
            .unwrap();
        assert!(mirror.is_scheduled());

        tokio::time::sleep(Duration::from_millis(200)).await;
        mirror.stop_schedule();
        assert!(runner.fetch_count() >= 2);
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_updates() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mirror = create(&temp, "http://x/ns/a", "FALSE", &runner)
            .await
            .unwrap();
        assert!(!mirror.is_scheduled());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runner.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_scheduled_failures_are_swallowed() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_fetches();

        let mirror = create(&temp, "http://x/ns/a", "@every 20ms", &runner)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(runner.fetch_count() >= 2);
        assert!(mirror.is_scheduled());
    }

    #[tokio::test]
    async fn test_destroy_stops_schedule_and_removes_data() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mut mirror = create(&temp, "http://x/ns/a", "@every 20ms", &runner)
            .await
            .unwrap();
        mirror.destroy().await.unwrap();

        assert!(!mirror.is_scheduled());
        assert!(!temp.path().join("ns").join("a").exists());

        let fetches = runner.fetch_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.fetch_count(), fetches);
    }

    #[tokio::test]
    async fn test_destroy_cancels_inflight_clone() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.hold_clones();

        let mut mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        mirror.destroy().await.unwrap();

        runner.release_clones();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.clone_count(), 0);
        assert!(!temp.path().join("ns").join("a").exists());
    }

    #[tokio::test]
    async fn test_retry_clears_partial_clone() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_clones();
        runner.leave_partial_clones();

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        assert_eq!(mirror.handle().wait_for_clone().await, CloneState::Failed);
        assert!(mirror.path().join("HEAD").exists());

        runner.recover_clones();
        mirror.update().await.unwrap();

        assert_eq!(mirror.clone_state(), CloneState::Ready);
        assert!(!mirror.path().join("HEAD").exists());
        assert_eq!(runner.clone_count(), 2);
    }

    #[tokio::test]
    async fn test_destroy_cancels_retried_clone() {
        let temp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.fail_clones();

        let mut mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        let handle = mirror.handle();
        assert_eq!(handle.wait_for_clone().await, CloneState::Failed);

        runner.recover_clones();
        runner.hold_clones();
        let retry = tokio::spawn({
            let handle = handle.clone();
            async move { handle.update().await }
        });
        while handle.clone_state() != CloneState::Cloning {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        mirror.destroy().await.unwrap();
        runner.release_clones();

        retry.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!mirror.path().exists());
        assert_eq!(runner.clone_count(), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_closed_mirror_skips_update_and_archives() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());

        let mut mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        let handle = mirror.handle();
        mirror.destroy().await.unwrap();

        handle.update().await.unwrap();
        assert_eq!(runner.fetch_count(), 0);
        let err = handle.create_tag_archives().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!handle.path().exists());
    }

    #[tokio::test]
    async fn test_create_tag_archives() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("ns").join("a")).unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.set_tags("aaaa\trefs/tags/v1\nbbbb\trefs/tags/v1^{}\ncccc\trefs/tags/v2\n");

        let mirror = create(&temp, "http://x/ns/a", DISABLED, &runner)
            .await
            .unwrap();
        let tags = mirror.handle().create_tag_archives().await.unwrap();

        assert_eq!(tags, vec!["v1", "v2"]);
        assert_eq!(runner.archived(), vec!["v1", "v2"]);
    }
}
