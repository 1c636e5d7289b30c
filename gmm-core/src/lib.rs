//! gmm-core - Mirror lifecycle management for git-mirror-manager
//!
//! This crate keeps a registry of bare git mirrors on local disk, clones new
//! mirrors in the background and keeps each one fetched on a schedule. Git
//! itself is driven through the [`git::CommandRunner`] abstraction.

pub mod config;
pub mod error;
pub mod fs;
pub mod git;
pub mod manager;
pub mod mirror;

#[cfg(test)]
mod testing;

pub use config::{CliOverrides, Config};
pub use error::{Error, ErrorKind, Result};
pub use manager::{DefaultMirrorFactory, MirrorFactory, MirrorManager};
pub use mirror::{mirror_name_from_uri, CloneState, Mirror, MirrorHandle, UpdateSchedule};
