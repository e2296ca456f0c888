use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use keel_asset::{Error, MainTask, Progress};
use keel_graphics as gpu;

use super::Signal;
use crate::hub::Services;
use crate::ImageKind;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TextureSignature {
    pub path: String,
    pub kind: ImageKind,
}

struct TextureGpu {
    texture: gpu::Texture,
    view: gpu::TextureView,
}

/// A 2D texture resident in the bindless table.
///
/// Constructed unloaded; populated by a worker task. The bindless index is
/// reserved up front so dependents can record it before the data arrives.
pub struct TextureAsset {
    services: Arc<Services>,
    signature: TextureSignature,
    bindless_index: u32,
    loaded: AtomicBool,
    changed: Signal,
    gpu_data: OnceLock<TextureGpu>,
}

impl TextureAsset {
    pub(crate) fn new(services: Arc<Services>, signature: TextureSignature) -> Arc<Self> {
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

    pub fn signature(&self) -> &TextureSignature {
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
            "accessed unloaded texture [{}]",
            self.signature.path
        );
    }

    pub fn bindless_index(&self) -> u32 {
        self.check_loaded();
        self.bindless_index
    }

    pub fn texture_view(&self) -> gpu::TextureView {
        self.check_loaded();
        self.gpu_data.get().unwrap().view
    }

    /// Worker-side load: decode (or fetch from cache), create the GPU
    /// resources, and submit the upload on this worker's own encoder. The
    /// bindless bind and the publish happen on the main thread once the
    /// submission retires.
    #[profiling::function]
    pub(crate) fn load(self: Arc<Self>) -> Result<(), Error> {
        let services = Arc::clone(&self.services);
        let data = services
            .processor
            .read_image_data(&self.signature.path, self.signature.kind)?;
        log::info!(
            "Uploading texture [{} ({:?})]...",
            self.signature.path,
            self.signature.kind
        );

        let extent = gpu::Extent {
            width: data.size[0],
            height: data.size[1],
            depth: 1,
        };
        let texture = services.gpu.create_texture(gpu::TextureDesc {
            name: &self.signature.path,
            format: data.format,
            size: extent,
            array_layer_count: 1,
            mip_level_count: data.levels.len() as u32,
            dimension: gpu::TextureDimension::D2,
            usage: gpu::TextureUsage::COPY | gpu::TextureUsage::RESOURCE,
        });
        let view = services.gpu.create_texture_view(gpu::TextureViewDesc {
            name: &self.signature.path,
            texture,
            dimension: gpu::ViewDimension::D2,
        });

        let stage = services.gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{}/stage", self.signature.path),
            size: texture.layer_byte_size(),
            memory: gpu::Memory::Upload,
        });
        let mut offset = 0usize;
        for (level, bytes) in data.levels.iter().enumerate() {
            assert_eq!(bytes.len() as u64, texture.level_byte_size(level as u32));
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    stage.data().add(offset),
                    bytes.len(),
                );
            }
            offset += bytes.len();
        }

        let sync_point = {
            let mut lease = services.encoders.checkout();
            let encoder = lease.transfer_encoder();
            encoder.start();
            {
                let mut pass = encoder.transfer();
                let info = data.format.block_info();
                let mut buffer_offset = 0u64;
                for level in 0..data.levels.len() as u32 {
                    let level_extent = extent.at_mip_level(level);
                    let bytes_per_row =
                        level_extent.width.div_ceil(info.dimensions.0 as u32) * info.size as u32;
                    pass.copy_buffer_to_texture(
                        stage.at(buffer_offset),
                        bytes_per_row,
                        texture.at(level, 0),
                        level_extent,
                    );
                    buffer_offset += texture.level_byte_size(level);
                }
            }
            services.gpu.submit(encoder)
        };

        if self.gpu_data.set(TextureGpu { texture, view }).is_err() {
            unreachable!("texture [{}] loaded twice", self.signature.path);
        }
        services.main_queue.push(Box::new(FinishTextureLoad {
            asset: self,
            stage,
            sync_point,
        }));
        Ok(())
    }
}

impl Drop for TextureAsset {
    fn drop(&mut self) {
        self.services.bindless.release_index(self.bindless_index);
        if let Some(gpu_data) = self.gpu_data.get() {
            self.services.gpu.destroy_texture_view(gpu_data.view);
            self.services.gpu.destroy_texture(gpu_data.texture);
        }
    }
}

/// Main-thread continuation: wait for the upload submission, bind the view
/// into the bindless table, publish.
struct FinishTextureLoad {
    asset: Arc<TextureAsset>,
    stage: gpu::Buffer,
    sync_point: gpu::SyncPoint,
}

impl MainTask for FinishTextureLoad {
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
        log::info!(
            "Texture [{} ({:?})] uploaded",
            self.asset.signature.path,
            self.asset.signature.kind
        );
        Progress::Done
    }
}
