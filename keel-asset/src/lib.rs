#![allow(clippy::new_without_default)]

mod artifact;
mod flat;
mod flight;
mod index;
mod tasks;

use std::path::PathBuf;

pub use artifact::{read_artifact, write_artifact, ArtifactProbe};
pub use flat::{round_up, Flat};
pub use flight::{FlightGuard, SingleFlight};
pub use index::{CacheIndex, CacheKind};
pub use tasks::{MainTask, MainThreadQueue, Progress};

/// Errors surfaced by the asset pipeline.
///
/// Cache-layer conditions (stale or structurally broken artifacts) never
/// appear here: they are recovered internally by reprocessing. What remains
/// is fatal to the single request that hit it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source file {0} does not exist")]
    SourceNotFound(PathBuf),
    #[error("source file {path} could not be decoded: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },
    #[error("cache record for '{0}' holds a malformed guid")]
    CorruptCacheRecord(String),
    #[error("cache database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
