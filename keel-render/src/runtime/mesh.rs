use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use keel_asset::{Error, MainTask, Progress};
use keel_graphics as gpu;

use super::Signal;
use crate::hub::Services;
use crate::PositionVertex;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MeshSignature {
    pub path: String,
}

struct MeshGpu {
    position_vertex_buffer: gpu::Buffer,
    model_vertex_buffer: gpu::Buffer,
    index_buffer: gpu::Buffer,
    acceleration_structure: gpu::AccelerationStructure,
    index_count: u32,
    bounds_min: glam::Vec3,
    bounds_max: glam::Vec3,
}

/// A mesh resident on the GPU: two vertex streams, an index buffer and the
/// bottom-level acceleration structure built from the position stream.
pub struct MeshAsset {
    services: Arc<Services>,
    signature: MeshSignature,
    loaded: AtomicBool,
    changed: Signal,
    gpu_data: OnceLock<MeshGpu>,
}

impl MeshAsset {
    pub(crate) fn new(services: Arc<Services>, signature: MeshSignature) -> Arc<Self> {
        Arc::new(Self {
            services,
            signature,
            loaded: AtomicBool::new(false),
            changed: Signal::new(),
            gpu_data: OnceLock::new(),
        })
    }

    pub fn signature(&self) -> &MeshSignature {
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
            "accessed unloaded mesh [{}]",
            self.signature.path
        );
    }

    pub fn position_vertex_buffer(&self) -> gpu::Buffer {
        self.check_loaded();
        self.gpu_data.get().unwrap().position_vertex_buffer
    }

    pub fn model_vertex_buffer(&self) -> gpu::Buffer {
        self.check_loaded();
        self.gpu_data.get().unwrap().model_vertex_buffer
    }

    pub fn index_buffer(&self) -> gpu::Buffer {
        self.check_loaded();
        self.gpu_data.get().unwrap().index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.check_loaded();
        self.gpu_data.get().unwrap().index_count
    }

    pub fn acceleration_structure(&self) -> gpu::AccelerationStructure {
        self.check_loaded();
        self.gpu_data.get().unwrap().acceleration_structure
    }

    pub fn bounding_box(&self) -> (glam::Vec3, glam::Vec3) {
        self.check_loaded();
        let gpu_data = self.gpu_data.get().unwrap();
        (gpu_data.bounds_min, gpu_data.bounds_max)
    }

    /// Worker-side load. The vertex/index upload and the acceleration
    /// structure build complete on this worker (the build waits on its own
    /// submission, scoped to this thread); the publish happens on the main
    /// thread.
    #[profiling::function]
    pub(crate) fn load(self: Arc<Self>) -> Result<(), Error> {
        let services = Arc::clone(&self.services);
        let data = services.processor.read_mesh_data(&self.signature.path)?;
        log::info!("Uploading mesh [{}]...", self.signature.path);

        let position_size = std::mem::size_of_val(data.position_vertices.as_slice()) as u64;
        let model_size = std::mem::size_of_val(data.model_vertices.as_slice()) as u64;
        let index_size = std::mem::size_of_val(data.indices.as_slice()) as u64;

        let make_buffer = |suffix: &str, size: u64| {
            services.gpu.create_buffer(gpu::BufferDesc {
                name: &format!("{}/{}", self.signature.path, suffix),
                size,
                memory: gpu::Memory::Device,
            })
        };
        let position_vertex_buffer = make_buffer("positions", position_size);
        let model_vertex_buffer = make_buffer("vertices", model_size);
        let index_buffer = make_buffer("indices", index_size);

        let stage = services.gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{}/stage", self.signature.path),
            size: position_size + model_size + index_size,
            memory: gpu::Memory::Upload,
        });
        unsafe {
            let mut cursor = stage.data();
            for (bytes, len) in [
                (data.position_vertices.as_ptr() as *const u8, position_size),
                (data.model_vertices.as_ptr() as *const u8, model_size),
                (data.indices.as_ptr() as *const u8, index_size),
            ] {
                std::ptr::copy_nonoverlapping(bytes, cursor, len as usize);
                cursor = cursor.add(len as usize);
            }
        }

        let mut lease = services.encoders.checkout();
        {
            let encoder = lease.transfer_encoder();
            encoder.start();
            {
                let mut pass = encoder.transfer();
                pass.copy_buffer_to_buffer(stage.at(0), position_vertex_buffer.into(), position_size);
                pass.copy_buffer_to_buffer(
                    stage.at(position_size),
                    model_vertex_buffer.into(),
                    model_size,
                );
                pass.copy_buffer_to_buffer(
                    stage.at(position_size + model_size),
                    index_buffer.into(),
                    index_size,
                );
            }
            let transfer_sync = services.gpu.submit(encoder);
            // the build below reads the vertex buffer, wait here on the worker
            while !services.gpu.wait_for(&transfer_sync, 100) {}
        }

        let triangle_count = (data.indices.len() / 3) as u32;
        let blas_mesh = gpu::AccelerationStructureMesh {
            vertex_data: position_vertex_buffer.into(),
            vertex_stride: std::mem::size_of::<PositionVertex>() as u64,
            vertex_count: data.position_vertices.len() as u32,
            index_data: index_buffer.into(),
            index_type: Some(gpu::IndexType::U32),
            triangle_count,
        };
        let sizes = services
            .gpu
            .get_bottom_level_acceleration_structure_sizes(std::slice::from_ref(&blas_mesh));
        let acceleration_structure =
            services
                .gpu
                .create_acceleration_structure(gpu::AccelerationStructureDesc {
                    name: &self.signature.path,
                    size: sizes.data,
                });
        let scratch = services.gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{}/scratch", self.signature.path),
            size: sizes.scratch,
            memory: gpu::Memory::Device,
        });
        let build_sync = {
            let encoder = lease.compute_encoder();
            encoder.start();
            encoder.acceleration_structure().build_bottom_level(
                acceleration_structure,
                std::slice::from_ref(&blas_mesh),
                scratch.into(),
            );
            services.gpu.submit(encoder)
        };
        // scoped wait so the scratch memory can be reclaimed right away
        while !services.gpu.wait_for(&build_sync, 100) {}
        drop(lease);
        services.gpu.destroy_buffer(scratch);
        services.gpu.destroy_buffer(stage);

        let set = self.gpu_data.set(MeshGpu {
            position_vertex_buffer,
            model_vertex_buffer,
            index_buffer,
            acceleration_structure,
            index_count: data.indices.len() as u32,
            bounds_min: data.bounds_min.into(),
            bounds_max: data.bounds_max.into(),
        });
        if set.is_err() {
            unreachable!("mesh [{}] loaded twice", self.signature.path);
        }
        services.main_queue.push(Box::new(FinishMeshLoad {
            asset: self,
            sync_point: build_sync,
        }));
        Ok(())
    }
}

impl Drop for MeshAsset {
    fn drop(&mut self) {
        if let Some(gpu_data) = self.gpu_data.get() {
            self.services
                .gpu
                .destroy_acceleration_structure(gpu_data.acceleration_structure);
            self.services.gpu.destroy_buffer(gpu_data.index_buffer);
            self.services.gpu.destroy_buffer(gpu_data.model_vertex_buffer);
            self.services
                .gpu
                .destroy_buffer(gpu_data.position_vertex_buffer);
        }
    }
}

struct FinishMeshLoad {
    asset: Arc<MeshAsset>,
    sync_point: gpu::SyncPoint,
}

impl MainTask for FinishMeshLoad {
    fn tick(&mut self) -> Progress {
        let services = &self.asset.services;
        if !services.gpu.wait_for(&self.sync_point, 0) {
            return Progress::Pending;
        }
        self.asset.loaded.store(true, Ordering::Release);
        self.asset.changed.emit();
        log::info!("Mesh [{}] uploaded", self.asset.signature.path);
        Progress::Done
    }
}
