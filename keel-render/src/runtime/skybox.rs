use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use keel_asset::{Error, MainTask, Progress};
use keel_graphics as gpu;

use super::cubemap::stage_cubemap;
use super::Signal;
use crate::hub::Services;
use crate::processor::ImageData;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SkyboxSignature {
    pub path: String,
}

struct SkyboxGpu {
    texture: gpu::Texture,
    view: gpu::TextureView,
}

/// A cubemap projected from a single equirectangular panorama.
pub struct SkyboxAsset {
    services: Arc<Services>,
    signature: SkyboxSignature,
    bindless_index: u32,
    loaded: AtomicBool,
    changed: Signal,
    gpu_data: OnceLock<SkyboxGpu>,
}

impl SkyboxAsset {
    pub(crate) fn new(services: Arc<Services>, signature: SkyboxSignature) -> Arc<Self> {
        let bindless_index = services.bindless.acquire_index();
        Arc::new(Self {
            services,
            signature,
            bindless_index,
            loaded: AtomicBool::new(false),
            changed: Signal::new(),
            gpu_data: OnceLock::new(),
        })
    }

    pub fn signature(&self) -> &SkyboxSignature {
        &self.signature
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn changed(&self) -> &Signal {
        &self.changed
    }

    fn check_loaded(&self) {
        debug_assert!(
            self.is_loaded(),
            "accessed unloaded skybox [{}]",
            self.signature.path
        );
    }

    pub fn bindless_index(&self) -> u32 {
        self.check_loaded();
        self.bindless_index
    }

    pub fn cubemap_view(&self) -> gpu::TextureView {
        self.check_loaded();
        self.gpu_data.get().unwrap().view
    }

    #[profiling::function]
    pub(crate) fn load(self: Arc<Self>) -> Result<(), Error> {
        let services = Arc::clone(&self.services);
        let data = services
            .processor
            .read_equirectangular_skybox_data(&self.signature.path)?;
        log::info!("Uploading skybox [{}]...", self.signature.path);

        let face_data: Vec<ImageData> = data
            .faces
            .into_iter()
            .map(|levels| ImageData {
                format: data.format,
                size: [data.face_size, data.face_size],
                levels,
            })
            .collect();
        let staged = stage_cubemap(&services, &self.signature.path, &face_data);
        let set = self.gpu_data.set(SkyboxGpu {
            texture: staged.texture,
            view: staged.view,
        });
        if set.is_err() {
            unreachable!("skybox [{}] loaded twice", self.signature.path);
        }
        services.main_queue.push(Box::new(FinishSkyboxLoad {
            asset: self,
            stage: staged.stage,
            sync_point: staged.sync_point,
        }));
        Ok(())
    }
}

impl Drop for SkyboxAsset {
    fn drop(&mut self) {
        self.services.bindless.release_index(self.bindless_index);
        if let Some(gpu_data) = self.gpu_data.get() {
            self.services.gpu.destroy_texture_view(gpu_data.view);
            self.services.gpu.destroy_texture(gpu_data.texture);
        }
    }
}

struct FinishSkyboxLoad {
    asset: Arc<SkyboxAsset>,
    stage: gpu::Buffer,
    sync_point: gpu::SyncPoint,
}

impl MainTask for FinishSkyboxLoad {
    fn tick(&mut self) -> Progress {
        let services = &self.asset.services;
        if !services.gpu.wait_for(&self.sync_point, 0) {
            return Progress::Pending;
        }
        services.gpu.destroy_buffer(self.stage);
        let view = self.asset.gpu_data.get().unwrap().view;
        services
            .bindless
            .set_texture(self.asset.bindless_index, view, services.texture_sampler);
        self.asset.loaded.store(true, Ordering::Release);
        self.asset.changed.emit();
        log::info!("Skybox [{}] uploaded", self.asset.signature.path);
        Progress::Done
    }
}
