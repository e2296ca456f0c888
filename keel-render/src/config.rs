use std::{
    fs,
    path::{Path, PathBuf},
};

use keel_asset::Error;

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(2, |n| n.get().saturating_sub(1).max(1))
}

fn default_frame_count() -> usize {
    3
}

/// Asset pipeline configuration, loadable from a RON file.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    /// Directory that logical asset paths are relative to.
    pub asset_root: PathBuf,
    /// Directory holding the cache database and the processed artifacts.
    pub cache_root: PathBuf,
    /// Worker threads processing and uploading assets.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Frame copies kept by the bindless table; must match how many frames
    /// the renderer keeps in flight.
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
}

impl Config {
    pub fn new(asset_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            cache_root: cache_root.into(),
            worker_count: default_worker_count(),
            frame_count: default_frame_count(),
        }
    }

    pub fn from_ron_file(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|_| Error::SourceNotFound(path.into()))?;
        ron::from_str(&text).map_err(|e| Error::SourceUnreadable {
            path: path.into(),
            reason: e.to_string(),
        })
    }
}
