use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex, Weak},
};

use keel_asset::Error;

use super::texture::TextureAsset;
use super::{Connection, Signal};
use crate::{AssetManager, ImageKind};

pub const MATERIAL_DOCUMENT_VERSION: u32 = 2;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MaterialSignature {
    pub path: String,
}

/// On-disk material document. Version 1 predates the emissive slot; its
/// fields default when absent.
#[derive(serde::Deserialize, serde::Serialize)]
struct MaterialDocument {
    version: u32,
    albedo_map: Option<String>,
    albedo_value: [f32; 3],
    normal_map: Option<String>,
    roughness_map: Option<String>,
    roughness_value: f32,
    metalness_map: Option<String>,
    metalness_value: f32,
    displacement_map: Option<String>,
    displacement_scale: f32,
    #[serde(default)]
    emissive_map: Option<String>,
    #[serde(default)]
    emissive_scale: f32,
}

type TextureSlot = Option<(Arc<TextureAsset>, Connection)>;

#[derive(Default)]
struct Slots {
    albedo_map: TextureSlot,
    albedo_value: [f32; 3],
    normal_map: TextureSlot,
    roughness_map: TextureSlot,
    roughness_value: f32,
    metalness_map: TextureSlot,
    metalness_value: f32,
    displacement_map: TextureSlot,
    displacement_scale: f32,
    emissive_map: TextureSlot,
    emissive_scale: f32,
}

/// A mutable PBR material: six optional texture slots with scalar
/// fallbacks, parsed synchronously from a versioned JSON document.
///
/// Its textures load asynchronously through the shared dedup cache;
/// `is_loaded` derives from them. Edits fire the `changed` signal.
pub struct MaterialAsset {
    signature: MaterialSignature,
    changed: Signal,
    slots: Mutex<Slots>,
}

fn slot_texture(slot: &TextureSlot) -> Option<Arc<TextureAsset>> {
    slot.as_ref().map(|(texture, _)| Arc::clone(texture))
}

fn slot_loaded(slot: &TextureSlot) -> bool {
    slot.as_ref().map_or(true, |(texture, _)| texture.is_loaded())
}

fn slot_bindless_index(slot: &TextureSlot) -> i32 {
    match slot {
        Some((texture, _)) if texture.is_loaded() => texture.bindless_index() as i32,
        _ => -1,
    }
}

impl MaterialAsset {
    pub(crate) fn load(manager: &AssetManager, signature: MaterialSignature) -> Arc<Self> {
        let asset = Arc::new(Self {
            signature,
            changed: Signal::new(),
            slots: Mutex::new(Slots::default()),
        });
        match asset.read_document(manager) {
            Ok(()) => log::info!("Material [{}] loaded", asset.signature.path),
            Err(error) => log::error!(
                "Failed to load material [{}]: {}",
                asset.signature.path,
                error
            ),
        }
        asset
    }

    fn read_document(self: &Arc<Self>, manager: &AssetManager) -> Result<(), Error> {
        let path = manager.asset_root().join(&self.signature.path);
        let text =
            fs::read_to_string(&path).map_err(|_| Error::SourceNotFound(path.clone()))?;
        let document: MaterialDocument =
            serde_json::from_str(&text).map_err(|e| Error::SourceUnreadable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if document.version == 0 || document.version > MATERIAL_DOCUMENT_VERSION {
            return Err(Error::SourceUnreadable {
                path,
                reason: format!("unknown material version {}", document.version),
            });
        }
        {
            let mut slots = self.slots.lock().unwrap();
            slots.albedo_value = document.albedo_value;
            slots.roughness_value = document.roughness_value;
            slots.metalness_value = document.metalness_value;
            slots.displacement_scale = document.displacement_scale;
            slots.emissive_scale = document.emissive_scale;
        }
        self.set_albedo_map(manager, document.albedo_map.as_deref());
        self.set_normal_map(manager, document.normal_map.as_deref());
        self.set_roughness_map(manager, document.roughness_map.as_deref());
        self.set_metalness_map(manager, document.metalness_map.as_deref());
        self.set_displacement_map(manager, document.displacement_map.as_deref());
        self.set_emissive_map(manager, document.emissive_map.as_deref());
        Ok(())
    }

    /// Re-parse the document from disk, dropping any unsaved edits.
    pub fn reload(self: &Arc<Self>, manager: &AssetManager) {
        if let Err(error) = self.read_document(manager) {
            log::error!(
                "Failed to reload material [{}]: {}",
                self.signature.path,
                error
            );
        }
        self.changed.emit();
    }

    /// Serialize the current state back to the source document, always in
    /// the current version.
    pub fn save(&self, asset_root: &Path) -> Result<(), Error> {
        let document = {
            let slots = self.slots.lock().unwrap();
            let path_of = |slot: &TextureSlot| {
                slot.as_ref()
                    .map(|(texture, _)| texture.signature().path.clone())
            };
            MaterialDocument {
                version: MATERIAL_DOCUMENT_VERSION,
                albedo_map: path_of(&slots.albedo_map),
                albedo_value: slots.albedo_value,
                normal_map: path_of(&slots.normal_map),
                roughness_map: path_of(&slots.roughness_map),
                roughness_value: slots.roughness_value,
                metalness_map: path_of(&slots.metalness_map),
                metalness_value: slots.metalness_value,
                displacement_map: path_of(&slots.displacement_map),
                displacement_scale: slots.displacement_scale,
                emissive_map: path_of(&slots.emissive_map),
                emissive_scale: slots.emissive_scale,
            }
        };
        let text = serde_json::to_string_pretty(&document).unwrap();
        fs::write(asset_root.join(&self.signature.path), text)?;
        Ok(())
    }

    pub fn signature(&self) -> &MaterialSignature {
        &self.signature
    }

    pub fn changed(&self) -> &Signal {
        &self.changed
    }

    /// True once every referenced texture is resident. A material with no
    /// maps is loaded immediately.
    pub fn is_loaded(&self) -> bool {
        let slots = self.slots.lock().unwrap();
        slot_loaded(&slots.albedo_map)
            && slot_loaded(&slots.normal_map)
            && slot_loaded(&slots.roughness_map)
            && slot_loaded(&slots.metalness_map)
            && slot_loaded(&slots.displacement_map)
            && slot_loaded(&slots.emissive_map)
    }

    fn attach(
        self: &Arc<Self>,
        manager: &AssetManager,
        path: Option<&str>,
        kind: ImageKind,
    ) -> TextureSlot {
        let path = path?;
        let texture = manager.load_texture(path, kind);
        let weak: Weak<Self> = Arc::downgrade(self);
        let connection = texture.changed().connect(move || {
            if let Some(material) = weak.upgrade() {
                material.changed.emit();
            }
        });
        Some((texture, connection))
    }

    fn replace_slot(
        &self,
        slot: impl FnOnce(&mut Slots) -> &mut TextureSlot,
        new: TextureSlot,
    ) {
        let old = {
            let mut slots = self.slots.lock().unwrap();
            std::mem::replace(slot(&mut slots), new)
        };
        if let Some((texture, connection)) = old {
            texture.changed().disconnect(connection);
        }
        self.changed.emit();
    }

    pub fn set_albedo_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::ColorSrgb);
        self.replace_slot(|s| &mut s.albedo_map, new);
    }

    pub fn set_normal_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::NormalMap);
        self.replace_slot(|s| &mut s.normal_map, new);
    }

    pub fn set_roughness_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::Grayscale);
        self.replace_slot(|s| &mut s.roughness_map, new);
    }

    pub fn set_metalness_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::Grayscale);
        self.replace_slot(|s| &mut s.metalness_map, new);
    }

    pub fn set_displacement_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::Grayscale);
        self.replace_slot(|s| &mut s.displacement_map, new);
    }

    pub fn set_emissive_map(self: &Arc<Self>, manager: &AssetManager, path: Option<&str>) {
        let new = self.attach(manager, path, ImageKind::Grayscale);
        self.replace_slot(|s| &mut s.emissive_map, new);
    }

    pub fn albedo_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().albedo_map)
    }

    pub fn normal_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().normal_map)
    }

    pub fn roughness_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().roughness_map)
    }

    pub fn metalness_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().metalness_map)
    }

    pub fn displacement_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().displacement_map)
    }

    pub fn emissive_texture(&self) -> Option<Arc<TextureAsset>> {
        slot_texture(&self.slots.lock().unwrap().emissive_map)
    }

    /// Shader-facing slot index, -1 while the texture is absent or still
    /// loading so consumers fall back to the scalar value.
    pub fn albedo_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().albedo_map)
    }

    pub fn normal_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().normal_map)
    }

    pub fn roughness_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().roughness_map)
    }

    pub fn metalness_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().metalness_map)
    }

    pub fn displacement_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().displacement_map)
    }

    pub fn emissive_bindless_index(&self) -> i32 {
        slot_bindless_index(&self.slots.lock().unwrap().emissive_map)
    }

    pub fn albedo_value(&self) -> [f32; 3] {
        self.slots.lock().unwrap().albedo_value
    }

    pub fn set_albedo_value(&self, value: [f32; 3]) {
        self.slots.lock().unwrap().albedo_value = value;
        self.changed.emit();
    }

    pub fn roughness_value(&self) -> f32 {
        self.slots.lock().unwrap().roughness_value
    }

    pub fn set_roughness_value(&self, value: f32) {
        self.slots.lock().unwrap().roughness_value = value;
        self.changed.emit();
    }

    pub fn metalness_value(&self) -> f32 {
        self.slots.lock().unwrap().metalness_value
    }

    pub fn set_metalness_value(&self, value: f32) {
        self.slots.lock().unwrap().metalness_value = value;
        self.changed.emit();
    }

    pub fn displacement_scale(&self) -> f32 {
        self.slots.lock().unwrap().displacement_scale
    }

    pub fn set_displacement_scale(&self, value: f32) {
        self.slots.lock().unwrap().displacement_scale = value;
        self.changed.emit();
    }

    pub fn emissive_scale(&self) -> f32 {
        self.slots.lock().unwrap().emissive_scale
    }

    pub fn set_emissive_scale(&self, value: f32) {
        self.slots.lock().unwrap().emissive_scale = value;
        self.changed.emit();
    }
}

impl Drop for MaterialAsset {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap();
        for slot in [
            slots.albedo_map.take(),
            slots.normal_map.take(),
            slots.roughness_map.take(),
            slots.metalness_map.take(),
            slots.displacement_map.take(),
            slots.emissive_map.take(),
        ]
        .into_iter()
        .flatten()
        {
            let (texture, connection) = slot;
            texture.changed().disconnect(connection);
        }
    }
}
