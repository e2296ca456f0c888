use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use keel_asset::{Error, MainTask, Progress};
use keel_graphics as gpu;

use super::Signal;
use crate::hub::Services;
use crate::processor::ImageData;
use crate::ImageKind;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CubemapSignature {
    pub xpos: String,
    pub xneg: String,
    pub ypos: String,
    pub yneg: String,
    pub zpos: String,
    pub zneg: String,
    pub kind: ImageKind,
}

impl CubemapSignature {
    fn faces(&self) -> [&str; 6] {
        [
            &self.xpos, &self.xneg, &self.ypos, &self.yneg, &self.zpos, &self.zneg,
        ]
    }
}

struct CubemapGpu {
    texture: gpu::Texture,
    view: gpu::TextureView,
}

/// A cubemap assembled from six individually-cached face images.
pub struct CubemapAsset {
    services: Arc<Services>,
    signature: CubemapSignature,
    bindless_index: u32,
    loaded: AtomicBool,
    changed: Signal,
    gpu_data: OnceLock<CubemapGpu>,
}

impl CubemapAsset {
    pub(crate) fn new(services: Arc<Services>, signature: CubemapSignature) -> Arc<Self> {
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

    pub fn signature(&self) -> &CubemapSignature {
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
            "accessed unloaded cubemap [{}]",
            self.signature.xpos
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
        let mut face_data: Vec<ImageData> = Vec::with_capacity(6);
        for path in self.signature.faces() {
            face_data.push(services.processor.read_image_data(path, self.signature.kind)?);
        }
        let first = &face_data[0];
        for (path, data) in self.signature.faces().iter().zip(face_data.iter()).skip(1) {
            if data.size != first.size
                || data.format != first.format
                || data.levels.len() != first.levels.len()
            {
                return Err(Error::SourceUnreadable {
                    path: (*path).into(),
                    reason: "cubemap faces disagree on size or format".to_string(),
                });
            }
        }
        if first.size[0] != first.size[1] {
            return Err(Error::SourceUnreadable {
                path: self.signature.xpos.clone().into(),
                reason: "cubemap faces must be square".to_string(),
            });
        }
        log::info!("Uploading cubemap [{}]...", self.signature.xpos);

        let staged = stage_cubemap(&services, &self.signature.xpos, &face_data);
        let set = self.gpu_data.set(CubemapGpu {
            texture: staged.texture,
            view: staged.view,
        });
        if set.is_err() {
            unreachable!("cubemap [{}] loaded twice", self.signature.xpos);
        }
        services.main_queue.push(Box::new(FinishCubemapLoad {
            asset: self,
            stage: staged.stage,
            sync_point: staged.sync_point,
        }));
        Ok(())
    }
}

pub(super) struct StagedCubemap {
    pub texture: gpu::Texture,
    pub view: gpu::TextureView,
    pub stage: gpu::Buffer,
    pub sync_point: gpu::SyncPoint,
}

/// Shared by cubemap and skybox assets: create the 6-layer texture, stage
/// every face's mip chain, and submit the upload on a worker encoder.
pub(super) fn stage_cubemap(
    services: &Arc<Services>,
    name: &str,
    face_data: &[ImageData],
) -> StagedCubemap {
    assert_eq!(face_data.len(), 6);
    let size = face_data[0].size;
    let format = face_data[0].format;
    let level_count = face_data[0].levels.len() as u32;
    let extent = gpu::Extent {
        width: size[0],
        height: size[1],
        depth: 1,
    };
    let texture = services.gpu.create_texture(gpu::TextureDesc {
        name,
        format,
        size: extent,
        array_layer_count: 6,
        mip_level_count: level_count,
        dimension: gpu::TextureDimension::D2,
        usage: gpu::TextureUsage::COPY | gpu::TextureUsage::RESOURCE,
    });
    let view = services.gpu.create_texture_view(gpu::TextureViewDesc {
        name,
        texture,
        dimension: gpu::ViewDimension::Cube,
    });

    let stage = services.gpu.create_buffer(gpu::BufferDesc {
        name: &format!("{}/stage", name),
        size: texture.layer_byte_size() * 6,
        memory: gpu::Memory::Upload,
    });
    let mut offset = 0usize;
    for data in face_data {
        for (level, bytes) in data.levels.iter().enumerate() {
            assert_eq!(bytes.len() as u64, texture.level_byte_size(level as u32));
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), stage.data().add(offset), bytes.len());
            }
            offset += bytes.len();
        }
    }

    let sync_point = {
        let mut lease = services.encoders.checkout();
        let encoder = lease.transfer_encoder();
        encoder.start();
        {
            let mut pass = encoder.transfer();
            let info = format.block_info();
            let mut buffer_offset = 0u64;
            for layer in 0..6u32 {
                for level in 0..level_count {
                    let level_extent = extent.at_mip_level(level);
                    let bytes_per_row =
                        level_extent.width.div_ceil(info.dimensions.0 as u32) * info.size as u32;
                    pass.copy_buffer_to_texture(
                        stage.at(buffer_offset),
                        bytes_per_row,
                        texture.at(level, layer),
                        level_extent,
                    );
                    buffer_offset += texture.level_byte_size(level);
                }
            }
        }
        services.gpu.submit(encoder)
    };

    StagedCubemap {
        texture,
        view,
        stage,
        sync_point,
    }
}

impl Drop for CubemapAsset {
    fn drop(&mut self) {
        self.services.bindless.release_index(self.bindless_index);
        if let Some(gpu_data) = self.gpu_data.get() {
            self.services.gpu.destroy_texture_view(gpu_data.view);
            self.services.gpu.destroy_texture(gpu_data.texture);
        }
    }
}

struct FinishCubemapLoad {
    asset: Arc<CubemapAsset>,
    stage: gpu::Buffer,
    sync_point: gpu::SyncPoint,
}

impl MainTask for FinishCubemapLoad {
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
        log::info!("Cubemap [{}] uploaded", self.asset.signature.xpos);
        Progress::Done
    }
}
