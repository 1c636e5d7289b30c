//! Filesystem operations used by mirrors and the startup scan

use std::fs;
use std::io;
use std::path::Path;

use crate::{Error, Result};

/// Filesystem access needed by the mirror lifecycle
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`
    fn dir_exists(&self, path: &Path) -> bool;

    /// Create `path` and its parents, readable only by the owner
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Names of the immediate subdirectories of `path`, sorted
    fn read_subdirs(&self, path: &Path) -> Result<Vec<String>>;

    /// Recursively delete `path`; a missing directory is not an error
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

/// [`FileSystem`] backed by the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn dir_exists(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(_) => true,
            // Anything but "not found" means something is in the way
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        builder
            .create(path)
            .map_err(|e| Error::filesystem(format!("create directory {}", path.display()), e))
    }

    fn read_subdirs(&self, path: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(path)
            .map_err(|e| Error::filesystem(format!("read directory {}", path.display()), e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::filesystem(format!("read entry in {}", path.display()), e)
            })?;
            let file_type = entry.file_type().map_err(|e| {
                Error::filesystem(format!("stat {}", entry.path().display()), e)
            })?;

            if file_type.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::filesystem(
                format!("remove directory {}", path.display()),
                e,
            )),
        }
    }
}
