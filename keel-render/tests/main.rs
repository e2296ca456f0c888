use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use keel_graphics as gpu;
use keel_render::{AssetManager, Config, ImageKind};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "keel-render-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::new(dir.join("assets"), dir.join("cache"));
    config.worker_count = 2;
    config.frame_count = 3;
    config
}

fn test_manager(dir: &TempDir) -> AssetManager {
    fs::create_dir_all(dir.join("assets")).unwrap();
    let gpu_context = gpu::Context::init(gpu::ContextDesc::default()).unwrap();
    AssetManager::new(&test_config(dir), gpu_context).unwrap()
}

fn wait_until(manager: &AssetManager, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        manager.on_update();
        assert!(
            start.elapsed() < Duration::from_secs(30),
            "timed out waiting for an asset load"
        );
        thread::sleep(Duration::from_millis(2));
    }
}

fn write_png(path: &Path, width: u32, height: u32, color: impl Fn(u32, u32) -> [u8; 4]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let image = image::RgbaImage::from_fn(width, height, |x, y| image::Rgba(color(x, y)));
    image.save(path).unwrap();
}

const CUBE_OBJ: &str = include_str!("../data/default_mesh.obj");

fn read_texture_level(
    gpu_context: &gpu::Context,
    texture: gpu::Texture,
    level: u32,
    layer: u32,
) -> Vec<u8> {
    let extent = texture.extent().at_mip_level(level);
    let info = texture.format().block_info();
    let bytes_per_row = extent.width.div_ceil(info.dimensions.0 as u32) * info.size as u32;
    let size = texture.level_byte_size(level);
    let readback = gpu_context.create_buffer(gpu::BufferDesc {
        name: "readback",
        size,
        memory: gpu::Memory::Shared,
    });
    let mut encoder = gpu_context.create_command_encoder(gpu::CommandEncoderDesc {
        name: "readback",
    });
    encoder.start();
    encoder.transfer().copy_texture_to_buffer(
        texture.at(level, layer),
        readback.into(),
        bytes_per_row,
        extent,
    );
    let sync_point = gpu_context.submit(&mut encoder);
    assert!(gpu_context.wait_for(&sync_point, 1000));
    let data =
        unsafe { std::slice::from_raw_parts(readback.data(), size as usize) }.to_vec();
    gpu_context.destroy_buffer(readback);
    data
}

#[test]
fn texture_load_publishes_and_binds() {
    init_logs();
    let dir = TempDir::new("texture");
    let manager = test_manager(&dir);
    write_png(&dir.join("assets/checker.png"), 8, 8, |x, y| {
        if (x + y) % 2 == 0 {
            [255, 255, 255, 255]
        } else {
            [0, 0, 0, 255]
        }
    });

    let texture = manager.load_texture("checker.png", ImageKind::ColorSrgb);
    wait_until(&manager, || texture.is_loaded());

    let gpu_texture = texture.texture_view().texture();
    assert_eq!(gpu_texture.format(), gpu::TextureFormat::Bc3UnormSrgb);
    // 8x8 and 4x4 compress, the 2x2 tail is dropped with the chain
    assert_eq!(gpu_texture.mip_level_count(), 2);
    let index = texture.bindless_index();
    assert!(manager.bindless().binding(index).is_some());
}

#[test]
fn texture_dedup_returns_identical_handles() {
    init_logs();
    let dir = TempDir::new("dedup");
    let manager = test_manager(&dir);
    write_png(&dir.join("assets/wall.png"), 4, 4, |_, _| [128, 64, 32, 255]);

    // second request lands before the first load completes
    let first = manager.load_texture("wall.png", ImageKind::ColorSrgb);
    let second = manager.load_texture("wall.png", ImageKind::ColorSrgb);
    assert!(Arc::ptr_eq(&first, &second));

    // a different kind is a different signature, thus a different asset
    let gray = manager.load_texture("wall.png", ImageKind::Grayscale);
    assert!(!Arc::ptr_eq(&first, &gray));

    wait_until(&manager, || first.is_loaded() && gray.is_loaded());
    assert_ne!(first.bindless_index(), gray.bindless_index());
}

#[test]
fn cache_hit_skips_reimport() {
    init_logs();
    let dir = TempDir::new("cache-hit");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();
    write_png(&dir.join("assets/stone.png"), 4, 4, |_, _| [90, 80, 70, 255]);

    let first = processor
        .read_image_data("stone.png", ImageKind::ColorSrgb)
        .unwrap();
    let artifact = single_cache_file(&dir.join("cache/image"));
    let stamp = fs::metadata(&artifact).unwrap().modified().unwrap();

    thread::sleep(Duration::from_millis(20));
    let second = processor
        .read_image_data("stone.png", ImageKind::ColorSrgb)
        .unwrap();
    // bit-identical data, artifact untouched: the importer did not run again
    assert_eq!(first.levels, second.levels);
    assert_eq!(first.size, second.size);
    assert_eq!(fs::metadata(&artifact).unwrap().modified().unwrap(), stamp);
}

fn single_cache_file(dir: &Path) -> PathBuf {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected exactly one cache artifact");
    entries.pop().unwrap()
}

#[test]
fn modification_invalidates_but_keeps_identity() {
    init_logs();
    let dir = TempDir::new("invalidate");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();

    write_png(&dir.join("assets/floor.png"), 4, 4, |_, _| [10, 10, 10, 255]);
    let first = processor
        .read_image_data("floor.png", ImageKind::ColorSrgb)
        .unwrap();
    let artifact = single_cache_file(&dir.join("cache/image"));

    thread::sleep(Duration::from_millis(20));
    write_png(&dir.join("assets/floor.png"), 4, 4, |_, _| [200, 10, 10, 255]);
    let second = processor
        .read_image_data("floor.png", ImageKind::ColorSrgb)
        .unwrap();

    // reprocessed from the new pixels
    assert_ne!(first.levels[0], second.levels[0]);
    // same guid, same artifact path, still exactly one file
    assert_eq!(single_cache_file(&dir.join("cache/image")), artifact);
}

#[test]
fn version_mismatch_triggers_reprocessing() {
    init_logs();
    let dir = TempDir::new("version");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();
    write_png(&dir.join("assets/dirt.png"), 4, 4, |_, _| [50, 40, 30, 255]);

    let first = processor
        .read_image_data("dirt.png", ImageKind::ColorSrgb)
        .unwrap();
    let artifact = single_cache_file(&dir.join("cache/image"));
    let mut bytes = fs::read(&artifact).unwrap();
    let current_version = bytes[0];
    bytes[0] = current_version.wrapping_add(1);
    fs::write(&artifact, &bytes).unwrap();

    let second = processor
        .read_image_data("dirt.png", ImageKind::ColorSrgb)
        .unwrap();
    assert_eq!(first.levels, second.levels);
    // the artifact was rewritten with the expected version
    assert_eq!(fs::read(&artifact).unwrap()[0], current_version);
}

#[test]
fn deleted_artifact_is_recreated_under_same_guid() {
    init_logs();
    let dir = TempDir::new("recreate");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();
    fs::write(dir.join("assets/cube.obj"), CUBE_OBJ).unwrap();

    let first = processor.read_mesh_data("cube.obj").unwrap();
    let artifact = single_cache_file(&dir.join("cache/mesh"));

    // drop only the artifact, keeping the database row
    fs::remove_file(&artifact).unwrap();
    let second = processor.read_mesh_data("cube.obj").unwrap();
    assert!(artifact.is_file());
    assert_eq!(single_cache_file(&dir.join("cache/mesh")), artifact);
    assert_eq!(first.indices, second.indices);
    assert_eq!(first.position_vertices, second.position_vertices);
}

#[test]
fn mesh_processing_produces_tangents_and_bounds() {
    init_logs();
    let dir = TempDir::new("mesh-data");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();
    fs::write(dir.join("assets/cube.obj"), CUBE_OBJ).unwrap();

    let data = processor.read_mesh_data("cube.obj").unwrap();
    assert_eq!(data.indices.len(), 36);
    assert_eq!(data.position_vertices.len(), data.model_vertices.len());
    assert_eq!(data.bounds_min, [-0.5, -0.5, -0.5]);
    assert_eq!(data.bounds_max, [0.5, 0.5, 0.5]);
    for vertex in &data.model_vertices {
        assert!(
            vertex.tangent[3].abs() > 0.5,
            "tangent missing its handedness sign: {:?}",
            vertex.tangent
        );
    }
}

#[test]
fn mesh_load_builds_gpu_residency() {
    init_logs();
    let dir = TempDir::new("mesh-gpu");
    let manager = test_manager(&dir);
    fs::write(dir.join("assets/cube.obj"), CUBE_OBJ).unwrap();

    let mesh = manager.load_mesh("cube.obj");
    wait_until(&manager, || mesh.is_loaded());

    assert_eq!(mesh.index_count(), 36);
    let (bounds_min, bounds_max) = mesh.bounding_box();
    assert_eq!(bounds_min, glam::Vec3::splat(-0.5));
    assert_eq!(bounds_max, glam::Vec3::splat(0.5));
    let _ = mesh.position_vertex_buffer();
    let _ = mesh.model_vertex_buffer();
    let _ = mesh.index_buffer();
    let _ = mesh.acceleration_structure();
}

#[test]
fn failed_load_stays_unloaded() {
    init_logs();
    let dir = TempDir::new("failed");
    let manager = test_manager(&dir);

    let texture = manager.load_texture("nope.png", ImageKind::ColorSrgb);
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        manager.on_update();
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!texture.is_loaded());

    let err = manager.processor().read_mesh_data("nope.obj").unwrap_err();
    assert!(matches!(err, keel_asset::Error::SourceNotFound(_)));
}

#[test]
fn material_documents_both_versions() {
    init_logs();
    let dir = TempDir::new("material");
    let manager = test_manager(&dir);
    write_png(&dir.join("assets/albedo.png"), 4, 4, |_, _| [200, 180, 160, 255]);

    let v1 = r#"{
        "version": 1,
        "albedo_map": "albedo.png",
        "albedo_value": [0.0, 0.0, 0.0],
        "normal_map": null,
        "roughness_map": null,
        "roughness_value": 0.25,
        "metalness_map": null,
        "metalness_value": 1.0,
        "displacement_map": null,
        "displacement_scale": 0.1
    }"#;
    fs::write(dir.join("assets/old.kmat"), v1).unwrap();
    let old = manager.load_material("old.kmat");
    assert_eq!(old.roughness_value(), 0.25);
    assert_eq!(old.emissive_scale(), 0.0);
    wait_until(&manager, || old.is_loaded());
    assert!(old.albedo_bindless_index() >= 0);
    assert_eq!(old.normal_bindless_index(), -1);

    let v2 = r#"{
        "version": 2,
        "albedo_map": null,
        "albedo_value": [0.5, 0.5, 0.5],
        "normal_map": null,
        "roughness_map": null,
        "roughness_value": 0.5,
        "metalness_map": null,
        "metalness_value": 0.0,
        "displacement_map": null,
        "displacement_scale": 0.05,
        "emissive_map": null,
        "emissive_scale": 2.5
    }"#;
    fs::write(dir.join("assets/new.kmat"), v2).unwrap();
    let new = manager.load_material("new.kmat");
    assert_eq!(new.emissive_scale(), 2.5);
    assert!(new.is_loaded());

    // an unknown version is rejected and the material keeps its defaults
    fs::write(
        dir.join("assets/future.kmat"),
        r#"{"version": 9, "albedo_map": null, "albedo_value": [0,0,0],
            "normal_map": null, "roughness_map": null, "roughness_value": 0,
            "metalness_map": null, "metalness_value": 0,
            "displacement_map": null, "displacement_scale": 0}"#,
    )
    .unwrap();
    let future = manager.load_material("future.kmat");
    assert!(future.is_loaded());
    assert_eq!(future.albedo_bindless_index(), -1);
}

#[test]
fn material_edits_fire_changed_and_save() {
    init_logs();
    let dir = TempDir::new("material-edit");
    let manager = test_manager(&dir);

    let material = manager.load_material("editable.kmat"); // missing file: defaults
    let fired = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&fired);
    material.changed().connect(move || {
        observer.store(true, Ordering::SeqCst);
    });

    material.set_roughness_value(0.75);
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(material.roughness_value(), 0.75);

    material.save(manager.asset_root()).unwrap();
    let written = fs::read_to_string(dir.join("assets/editable.kmat")).unwrap();
    let document: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(document["version"], 2);
    assert_eq!(document["roughness_value"], 0.75);

    // dedup applies to materials too
    assert!(Arc::ptr_eq(&material, &manager.load_material("editable.kmat")));
}

#[test]
fn default_and_missing_sentinels_are_stable() {
    init_logs();
    let dir = TempDir::new("sentinels");
    let manager = test_manager(&dir);

    let default_material = Arc::clone(manager.default_material());
    assert!(Arc::ptr_eq(
        &default_material,
        &manager.load_material(keel_render::DEFAULT_MATERIAL_PATH)
    ));
    assert!(default_material.is_loaded());
    assert_eq!(manager.missing_material().albedo_value(), [1.0, 0.0, 1.0]);

    let default_mesh = Arc::clone(manager.default_mesh());
    let missing_mesh = Arc::clone(manager.missing_mesh());
    wait_until(&manager, || {
        default_mesh.is_loaded() && missing_mesh.is_loaded()
    });
    assert_eq!(default_mesh.index_count(), 36);
}

#[test]
fn bindless_deferred_updates_reach_every_frame_copy() {
    init_logs();
    let gpu_context = gpu::Context::init(gpu::ContextDesc::default()).unwrap();
    let bindless = keel_render::BindlessTextureManager::new(3);
    let texture = gpu_context.create_texture(gpu::TextureDesc {
        name: "b",
        format: gpu::TextureFormat::Rgba8Unorm,
        size: gpu::Extent {
            width: 1,
            height: 1,
            depth: 1,
        },
        array_layer_count: 1,
        mip_level_count: 1,
        dimension: gpu::TextureDimension::D2,
        usage: gpu::TextureUsage::RESOURCE,
    });
    let view = gpu_context.create_texture_view(gpu::TextureViewDesc {
        name: "b",
        texture,
        dimension: gpu::ViewDimension::D2,
    });
    let sampler = gpu_context.create_sampler(gpu::SamplerDesc::default());

    let index = bindless.acquire_index();
    bindless.set_texture(index, view, sampler);
    for _ in 0..3 {
        assert_eq!(bindless.binding(index), Some((view, sampler)));
        bindless.on_new_frame();
    }

    bindless.release_index(index);
    for _ in 0..3 {
        assert_eq!(bindless.binding(index), None);
        bindless.on_new_frame();
    }
}

#[test]
fn skybox_projects_poles_to_vertical_faces() {
    init_logs();
    let dir = TempDir::new("skybox");
    let manager = test_manager(&dir);
    // top half of the panorama bright, bottom half dark
    write_png(&dir.join("assets/sky.png"), 8, 4, |_, y| {
        if y < 2 {
            [250, 250, 250, 255]
        } else {
            [5, 5, 5, 255]
        }
    });

    let skybox = manager.load_skybox("sky.png");
    wait_until(&manager, || skybox.is_loaded());

    let view = skybox.cubemap_view();
    assert_eq!(view.dimension(), gpu::ViewDimension::Cube);
    let texture = view.texture();
    assert_eq!(texture.array_layer_count(), 6);
    // face size is half the panorama height; 2x2 is below the block size
    assert_eq!(texture.extent().width, 2);
    assert_eq!(texture.format(), gpu::TextureFormat::Rgba8UnormSrgb);

    let up = read_texture_level(manager.graphics(), texture, 0, 2);
    let down = read_texture_level(manager.graphics(), texture, 0, 3);
    assert!(up[0] > 200, "up face should be bright, got {}", up[0]);
    assert!(down[0] < 50, "down face should be dark, got {}", down[0]);
    assert!(manager.bindless().binding(skybox.bindless_index()).is_some());
}

#[test]
fn hdr_skybox_keeps_float_range() {
    init_logs();
    let dir = TempDir::new("hdr");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let processor =
        keel_render::processor::AssetProcessor::new(&dir.join("assets"), &dir.join("cache"))
            .unwrap();

    let pixels: Vec<image::Rgb<f32>> = (0..8 * 4).map(|_| image::Rgb([4.0, 2.0, 1.0])).collect();
    let file = fs::File::create(dir.join("assets/env.hdr")).unwrap();
    image::codecs::hdr::HdrEncoder::new(std::io::BufWriter::new(file))
        .encode(&pixels, 8, 4)
        .unwrap();

    let data = processor.read_equirectangular_skybox_data("env.hdr").unwrap();
    assert_eq!(data.format, gpu::TextureFormat::Rgba16Float);
    assert_eq!(data.face_size, 2);
    assert_eq!(data.faces.len(), 6);
    // 2x2 texels of 8-byte RGBA16F
    assert_eq!(data.faces[0][0].len(), 2 * 2 * 8);
    let red = half::f16::from_le_bytes([data.faces[0][0][0], data.faces[0][0][1]]).to_f32();
    assert!((red - 4.0).abs() < 0.1, "expected HDR red ~4.0, got {}", red);
}

#[test]
fn cubemap_from_six_faces() {
    init_logs();
    let dir = TempDir::new("cubemap");
    let manager = test_manager(&dir);
    let names = ["px", "nx", "py", "ny", "pz", "nz"];
    for (i, name) in names.iter().enumerate() {
        let value = (i as u8 + 1) * 30;
        write_png(&dir.join(&format!("assets/{}.png", name)), 5, 5, move |_, _| {
            [value, 0, 0, 255]
        });
    }

    let cubemap = manager.load_cubemap(
        "px.png",
        "nx.png",
        "py.png",
        "ny.png",
        "pz.png",
        "nz.png",
        ImageKind::ColorSrgb,
    );
    wait_until(&manager, || cubemap.is_loaded());

    let texture = cubemap.cubemap_view().texture();
    // 5x5 cannot be block-compressed, stays plain sRGB
    assert_eq!(texture.format(), gpu::TextureFormat::Rgba8UnormSrgb);
    assert_eq!(texture.mip_level_count(), 3);
    for layer in 0..6u32 {
        let face = read_texture_level(manager.graphics(), texture, 0, layer);
        assert_eq!(face[0], (layer as u8 + 1) * 30);
    }
}

#[test]
fn config_round_trips_through_ron() {
    init_logs();
    let dir = TempDir::new("config");
    let text = r#"(
        asset_root: "assets",
        cache_root: "cache",
        worker_count: 3,
    )"#;
    fs::write(dir.join("pipeline.ron"), text).unwrap();
    let config = Config::from_ron_file(&dir.join("pipeline.ron")).unwrap();
    assert_eq!(config.asset_root, PathBuf::from("assets"));
    assert_eq!(config.cache_root, PathBuf::from("cache"));
    assert_eq!(config.worker_count, 3);
    // omitted fields take their defaults
    assert!(config.frame_count >= 1);
}
