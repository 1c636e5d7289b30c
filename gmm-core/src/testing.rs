//! Test doubles for the git layer

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::git::{CommandExecutor, CommandRunner, ExecError};
use crate::{Error, Result};

/// A single recorded executor invocation
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub program: String,
    pub directory: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Executor that records calls and replays queued responses
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecCall>>,
    responses: Mutex<VecDeque<std::result::Result<String, ExecError>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_ok(&self, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(output.to_string()));
    }

    pub fn respond_err(&self, err: ExecError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn exec(
        &self,
        program: &str,
        directory: Option<&Path>,
        args: &[String],
    ) -> std::result::Result<String, ExecError> {
        self.calls.lock().unwrap().push(ExecCall {
            program: program.to_string(),
            directory: directory.map(Path::to_path_buf),
            args: args.to_vec(),
        });

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

fn git_failure(command: &str) -> Error {
    Error::GitCommand {
        command: command.to_string(),
        reason: "git exited with exit status 128".to_string(),
    }
}

/// Scripted [`CommandRunner`] that creates real directories on clone
#[derive(Default)]
pub struct FakeRunner {
    remotes: Mutex<HashMap<PathBuf, String>>,
    unreachable: Mutex<HashSet<String>>,
    tags: Mutex<String>,
    fail_clone: Mutex<bool>,
    partial_clone: Mutex<bool>,
    fail_fetch: Mutex<bool>,
    clone_gate: Mutex<Option<Arc<Semaphore>>>,
    clones: AtomicUsize,
    fetches: AtomicUsize,
    probes: AtomicUsize,
    archived: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote(&self, directory: &Path, url: &str) {
        self.remotes
            .lock()
            .unwrap()
            .insert(directory.to_path_buf(), url.to_string());
    }

    pub fn set_unreachable(&self, uri: &str) {
        self.unreachable.lock().unwrap().insert(uri.to_string());
    }

    pub fn set_tags(&self, output: &str) {
        *self.tags.lock().unwrap() = output.to_string();
    }

    pub fn fail_clones(&self) {
        *self.fail_clone.lock().unwrap() = true;
    }

    pub fn recover_clones(&self) {
        *self.fail_clone.lock().unwrap() = false;
    }

    /// Make failing clones leave a half-written directory behind
    pub fn leave_partial_clones(&self) {
        *self.partial_clone.lock().unwrap() = true;
    }

    pub fn fail_fetches(&self) {
        *self.fail_fetch.lock().unwrap() = true;
    }

    /// Make clones block until [`FakeRunner::release_clones`] is called
    pub fn hold_clones(&self) {
        *self.clone_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_clones(&self) {
        if let Some(gate) = self.clone_gate.lock().unwrap().as_ref() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn archived(&self) -> Vec<String> {
        self.archived.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn remote_url(&self, directory: &Path) -> Result<String> {
        self.remotes
            .lock()
            .unwrap()
            .get(directory)
            .cloned()
            .ok_or_else(|| git_failure("config"))
    }

    async fn ls_remote_tags(&self, uri: &str) -> Result<String> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(uri) {
            return Err(git_failure("ls-remote"));
        }
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn fetch_prune(&self, _directory: &Path) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail_fetch.lock().unwrap() {
            return Err(git_failure("fetch"));
        }
        Ok(())
    }

    async fn create_mirror(&self, _uri: &str, path: &Path) -> Result<()> {
        let gate = self.clone_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| git_failure("clone"))?;
        }

        self.clones.fetch_add(1, Ordering::SeqCst);

        // git refuses to clone into a non-empty directory
        let occupied = std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(git_failure("clone"));
        }

        if *self.fail_clone.lock().unwrap() {
            if *self.partial_clone.lock().unwrap() {
                std::fs::create_dir_all(path).unwrap();
                std::fs::write(path.join("HEAD"), "ref: refs/heads/main\n").unwrap();
            }
            return Err(git_failure("clone"));
        }

        std::fs::create_dir_all(path)
            .map_err(|e| Error::filesystem(format!("create {}", path.display()), e))
    }

    async fn create_tag_archive(&self, tag: &str, _path: &Path) -> Result<()> {
        self.archived.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}
