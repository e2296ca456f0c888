pub mod image;
pub mod mesh;
pub mod skybox;

use std::path::{Path, PathBuf};

use keel_asset::{CacheIndex, CacheKind, Error, SingleFlight};

pub use image::ImageData;
pub use mesh::MeshData;
pub use skybox::SkyboxData;

use crate::ImageKind;

/// The single entry point worker threads use to turn a logical asset path
/// into processed data, through the cache index and the per-kind
/// processors.
///
/// Two workers racing on the same resolved cache path serialize on an
/// in-progress set; the loser takes the cache-hit path when it wakes.
pub struct AssetProcessor {
    asset_root: PathBuf,
    index: CacheIndex,
    in_flight: SingleFlight,
}

impl AssetProcessor {
    pub fn new(asset_root: &Path, cache_root: &Path) -> Result<Self, Error> {
        Ok(Self {
            asset_root: asset_root.to_path_buf(),
            index: CacheIndex::open(cache_root)?,
            in_flight: SingleFlight::new(),
        })
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    pub fn read_image_data(&self, path: &str, kind: ImageKind) -> Result<ImageData, Error> {
        let source = self.asset_root.join(path);
        let cache_path = self.index.resolve(CacheKind::Image, &source, kind as u32)?;
        let _flight = self.in_flight.enter(&cache_path);
        image::read_image_data(path, &source, &cache_path, kind)
    }

    pub fn read_mesh_data(&self, path: &str) -> Result<MeshData, Error> {
        let source = self.asset_root.join(path);
        let cache_path = self.index.resolve(CacheKind::Mesh, &source, 0)?;
        let _flight = self.in_flight.enter(&cache_path);
        mesh::read_mesh_data(path, &source, &cache_path)
    }

    pub fn read_equirectangular_skybox_data(&self, path: &str) -> Result<SkyboxData, Error> {
        let source = self.asset_root.join(path);
        let cache_path = self.index.resolve(CacheKind::Skybox, &source, 0)?;
        let _flight = self.in_flight.enter(&cache_path);
        skybox::read_skybox_data(path, &source, &cache_path)
    }
}
