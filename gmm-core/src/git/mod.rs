//! Git operations for git-mirror-manager
//!
//! This module wraps the git binary: process execution with a timeout and the
//! subcommands a mirror needs.

mod command;
mod executor;

pub use command::{parse_tag_list, CommandRunner, GitCommandRunner};
pub use executor::{CommandExecutor, ExecError, ProcessExecutor};
