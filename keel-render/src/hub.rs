use std::{
    collections::hash_map::{Entry, HashMap},
    fs,
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};

use keel_asset::{Error, MainThreadQueue};
use keel_graphics as gpu;

use crate::bindless::BindlessTextureManager;
use crate::processor::AssetProcessor;
use crate::runtime::{
    CubemapAsset, CubemapSignature, MaterialAsset, MaterialSignature, MeshAsset, MeshSignature,
    SkyboxAsset, SkyboxSignature, TextureAsset, TextureSignature,
};
use crate::{Config, ImageKind};

pub const DEFAULT_MATERIAL_PATH: &str = "internal/default.kmat";
pub const MISSING_MATERIAL_PATH: &str = "internal/missing.kmat";
pub const DEFAULT_MESH_PATH: &str = "internal/default.obj";
pub const MISSING_MESH_PATH: &str = "internal/missing.obj";

const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (
        DEFAULT_MATERIAL_PATH,
        include_str!("../data/default_material.kmat"),
    ),
    (
        MISSING_MATERIAL_PATH,
        include_str!("../data/missing_material.kmat"),
    ),
    (DEFAULT_MESH_PATH, include_str!("../data/default_mesh.obj")),
    (MISSING_MESH_PATH, include_str!("../data/missing_mesh.obj")),
];

pub(crate) struct WorkerEncoders {
    transfer: gpu::CommandEncoder,
    compute: gpu::CommandEncoder,
}

/// Checkout pool of per-worker command encoders, so recording is never
/// contended between concurrently running tasks.
pub(crate) struct EncoderPool {
    free: Mutex<Vec<WorkerEncoders>>,
}

impl EncoderPool {
    fn new(gpu_context: &gpu::Context, count: usize) -> Self {
        let free = (0..count)
            .map(|i| WorkerEncoders {
                transfer: gpu_context.create_command_encoder(gpu::CommandEncoderDesc {
                    name: &format!("asset-worker-{}/transfer", i),
                }),
                compute: gpu_context.create_command_encoder(gpu::CommandEncoderDesc {
                    name: &format!("asset-worker-{}/compute", i),
                }),
            })
            .collect();
        Self {
            free: Mutex::new(free),
        }
    }

    pub(crate) fn checkout(&self) -> EncoderLease<'_> {
        let encoders = self
            .free
            .lock()
            .unwrap()
            .pop()
            .expect("worker encoder pool exhausted");
        EncoderLease {
            pool: self,
            encoders: Some(encoders),
        }
    }
}

pub(crate) struct EncoderLease<'a> {
    pool: &'a EncoderPool,
    encoders: Option<WorkerEncoders>,
}

impl EncoderLease<'_> {
    pub(crate) fn transfer_encoder(&mut self) -> &mut gpu::CommandEncoder {
        &mut self.encoders.as_mut().unwrap().transfer
    }

    pub(crate) fn compute_encoder(&mut self) -> &mut gpu::CommandEncoder {
        &mut self.encoders.as_mut().unwrap().compute
    }
}

impl Drop for EncoderLease<'_> {
    fn drop(&mut self) {
        let encoders = self.encoders.take().unwrap();
        self.pool.free.lock().unwrap().push(encoders);
    }
}

/// Everything the load pipelines need, shared between the manager, the
/// worker tasks and the main-thread continuations.
pub(crate) struct Services {
    pub gpu: gpu::Context,
    pub processor: AssetProcessor,
    pub bindless: BindlessTextureManager,
    pub main_queue: MainThreadQueue,
    pub encoders: EncoderPool,
    pub texture_sampler: gpu::Sampler,
}

/// The asset hub: deduplicates load requests by signature, owns every
/// runtime asset, and drives the main-thread side of the load pipelines.
///
/// `on_update` must be called once per frame by the thread that owns
/// rendering; `on_new_frame` advances the bindless frame copy.
pub struct AssetManager {
    services: Arc<Services>,
    choir: Arc<choir::Choir>,
    _workers: Vec<choir::WorkerHandle>,
    textures: Mutex<HashMap<TextureSignature, Arc<TextureAsset>>>,
    cubemaps: Mutex<HashMap<CubemapSignature, Arc<CubemapAsset>>>,
    meshes: Mutex<HashMap<MeshSignature, Arc<MeshAsset>>>,
    materials: Mutex<HashMap<MaterialSignature, Arc<MaterialAsset>>>,
    skyboxes: Mutex<HashMap<SkyboxSignature, Arc<SkyboxAsset>>>,
    default_material: OnceLock<Arc<MaterialAsset>>,
    missing_material: OnceLock<Arc<MaterialAsset>>,
    default_mesh: OnceLock<Arc<MeshAsset>>,
    missing_mesh: OnceLock<Arc<MeshAsset>>,
}

fn write_builtin_sources(asset_root: &Path) -> Result<(), Error> {
    for (relative, contents) in BUILTIN_SOURCES {
        let path = asset_root.join(relative);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
    }
    Ok(())
}

impl AssetManager {
    pub fn new(config: &Config, gpu_context: gpu::Context) -> Result<Self, Error> {
        write_builtin_sources(&config.asset_root)?;
        let texture_sampler = gpu_context.create_sampler(gpu::SamplerDesc {
            name: "texture",
            address_modes: [gpu::AddressMode::Repeat; 3],
            mag_filter: gpu::FilterMode::Linear,
            min_filter: gpu::FilterMode::Linear,
            mipmap_filter: gpu::FilterMode::Linear,
            anisotropy_clamp: 16,
        });
        let worker_count = config.worker_count.max(1);
        let encoders = EncoderPool::new(&gpu_context, worker_count);
        let services = Arc::new(Services {
            processor: AssetProcessor::new(&config.asset_root, &config.cache_root)?,
            bindless: BindlessTextureManager::new(config.frame_count),
            main_queue: MainThreadQueue::new(),
            encoders,
            texture_sampler,
            gpu: gpu_context,
        });

        let choir = choir::Choir::new();
        let workers = (0..worker_count)
            .map(|i| choir.add_worker(&format!("asset-worker-{}", i)))
            .collect();

        let manager = Self {
            services,
            choir,
            _workers: workers,
            textures: Mutex::new(HashMap::new()),
            cubemaps: Mutex::new(HashMap::new()),
            meshes: Mutex::new(HashMap::new()),
            materials: Mutex::new(HashMap::new()),
            skyboxes: Mutex::new(HashMap::new()),
            default_material: OnceLock::new(),
            missing_material: OnceLock::new(),
            default_mesh: OnceLock::new(),
            missing_mesh: OnceLock::new(),
        };

        let _ = manager
            .default_material
            .set(manager.load_material(DEFAULT_MATERIAL_PATH));
        let _ = manager
            .missing_material
            .set(manager.load_material(MISSING_MATERIAL_PATH));
        let _ = manager.default_mesh.set(manager.load_mesh(DEFAULT_MESH_PATH));
        let _ = manager.missing_mesh.set(manager.load_mesh(MISSING_MESH_PATH));

        Ok(manager)
    }

    fn schedule(&self, name: &str, work: impl FnOnce() -> Result<(), Error> + Send + 'static) {
        let label = name.to_string();
        let task = self.choir.spawn(label.clone()).init(move |_| {
            if let Err(error) = work() {
                log::error!("{} failed: {}", label, error);
            }
        });
        let _running = task.run();
    }

    pub fn load_texture(&self, path: &str, kind: ImageKind) -> Arc<TextureAsset> {
        let signature = TextureSignature {
            path: path.to_string(),
            kind,
        };
        let asset = match self.textures.lock().unwrap().entry(signature) {
            Entry::Occupied(e) => return Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let asset = TextureAsset::new(Arc::clone(&self.services), e.key().clone());
                Arc::clone(e.insert(asset))
            }
        };
        let worker_asset = Arc::clone(&asset);
        self.schedule(&format!("load texture {}", path), move || worker_asset.load());
        asset
    }

    pub fn load_cubemap(
        &self,
        xpos: &str,
        xneg: &str,
        ypos: &str,
        yneg: &str,
        zpos: &str,
        zneg: &str,
        kind: ImageKind,
    ) -> Arc<CubemapAsset> {
        let signature = CubemapSignature {
            xpos: xpos.to_string(),
            xneg: xneg.to_string(),
            ypos: ypos.to_string(),
            yneg: yneg.to_string(),
            zpos: zpos.to_string(),
            zneg: zneg.to_string(),
            kind,
        };
        let asset = match self.cubemaps.lock().unwrap().entry(signature) {
            Entry::Occupied(e) => return Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let asset = CubemapAsset::new(Arc::clone(&self.services), e.key().clone());
                Arc::clone(e.insert(asset))
            }
        };
        let worker_asset = Arc::clone(&asset);
        self.schedule(&format!("load cubemap {}", xpos), move || worker_asset.load());
        asset
    }

    pub fn load_mesh(&self, path: &str) -> Arc<MeshAsset> {
        let signature = MeshSignature {
            path: path.to_string(),
        };
        let asset = match self.meshes.lock().unwrap().entry(signature) {
            Entry::Occupied(e) => return Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let asset = MeshAsset::new(Arc::clone(&self.services), e.key().clone());
                Arc::clone(e.insert(asset))
            }
        };
        let worker_asset = Arc::clone(&asset);
        self.schedule(&format!("load mesh {}", path), move || worker_asset.load());
        asset
    }

    /// Materials parse synchronously on the calling thread; only their
    /// textures load in the background.
    pub fn load_material(&self, path: &str) -> Arc<MaterialAsset> {
        let signature = MaterialSignature {
            path: path.to_string(),
        };
        if let Some(asset) = self.materials.lock().unwrap().get(&signature) {
            return Arc::clone(asset);
        }
        let asset = MaterialAsset::load(self, signature.clone());
        match self.materials.lock().unwrap().entry(signature) {
            // another caller raced us through the parse, keep the first
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => Arc::clone(e.insert(asset)),
        }
    }

    pub fn load_skybox(&self, path: &str) -> Arc<SkyboxAsset> {
        let signature = SkyboxSignature {
            path: path.to_string(),
        };
        let asset = match self.skyboxes.lock().unwrap().entry(signature) {
            Entry::Occupied(e) => return Arc::clone(e.get()),
            Entry::Vacant(e) => {
                let asset = SkyboxAsset::new(Arc::clone(&self.services), e.key().clone());
                Arc::clone(e.insert(asset))
            }
        };
        let worker_asset = Arc::clone(&asset);
        self.schedule(&format!("load skybox {}", path), move || worker_asset.load());
        asset
    }

    /// Drain the main-thread continuations. Call once per frame from the
    /// thread that owns GPU submission for rendering.
    #[profiling::function]
    pub fn on_update(&self) {
        self.services.main_queue.drain();
    }

    /// Advance the bindless frame copy. Call once per frame, before any
    /// descriptor use for the new frame.
    pub fn on_new_frame(&self) {
        self.services.bindless.on_new_frame();
    }

    pub fn graphics(&self) -> &gpu::Context {
        &self.services.gpu
    }

    pub fn bindless(&self) -> &BindlessTextureManager {
        &self.services.bindless
    }

    pub fn processor(&self) -> &AssetProcessor {
        &self.services.processor
    }

    pub fn asset_root(&self) -> &Path {
        self.services.processor.asset_root()
    }

    pub fn default_material(&self) -> &Arc<MaterialAsset> {
        self.default_material.get().unwrap()
    }

    pub fn missing_material(&self) -> &Arc<MaterialAsset> {
        self.missing_material.get().unwrap()
    }

    pub fn default_mesh(&self) -> &Arc<MeshAsset> {
        self.default_mesh.get().unwrap()
    }

    pub fn missing_mesh(&self) -> &Arc<MeshAsset> {
        self.missing_mesh.get().unwrap()
    }
}
