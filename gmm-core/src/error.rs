//! Error types for git-mirror-manager
//!
//! Every failure that leaves a component carries exactly one [`ErrorKind`].
//! The kind is fixed where the failure is first detected; callers only react
//! to it.

use std::fmt;

use thiserror::Error;

/// Result type alias for mirror management operations
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Interacting with the local filesystem failed
    Filesystem,
    /// A remote could not be reached in time
    Network,
    /// A git subcommand failed
    GitCommand,
    /// An update schedule could not be created
    Scheduling,
    /// The caller supplied invalid input
    UserInput,
    /// The requested mirror does not exist
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Network => "network",
            ErrorKind::GitCommand => "git-command",
            ErrorKind::Scheduling => "scheduling",
            ErrorKind::UserInput => "user-input",
            ErrorKind::NotFound => "not-found",
        };
        f.write_str(label)
    }
}

/// Error type for mirror management operations
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem error with the path or action that failed
    #[error("Filesystem error: {context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Git subcommand error; carries the process failure, never git's output
    #[error("git {command} failed: {reason}")]
    GitCommand { command: String, reason: String },

    /// Invalid update schedule
    #[error("Invalid schedule '{spec}': {reason}")]
    Scheduling { spec: String, reason: String },

    /// Invalid or conflicting user input
    #[error("{0}")]
    UserInput(String),

    /// Mirror not found
    #[error("{0}")]
    NotFound(String),
}

impl Error {
    /// Build a filesystem error from an IO error and a description of the action
    pub fn filesystem(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Filesystem {
            context: context.into(),
            source,
        }
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Filesystem { .. } => ErrorKind::Filesystem,
            Error::Network(_) => ErrorKind::Network,
            Error::GitCommand { .. } => ErrorKind::GitCommand,
            Error::Scheduling { .. } => ErrorKind::Scheduling,
            Error::UserInput(_) => ErrorKind::UserInput,
            Error::NotFound(_) => ErrorKind::NotFound,
        }
    }
}
