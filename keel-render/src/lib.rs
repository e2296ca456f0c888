#![allow(clippy::new_without_default)]

pub mod bindless;
mod config;
mod hub;
pub mod processor;
pub mod runtime;

pub use bindless::BindlessTextureManager;
pub use config::Config;
pub use hub::{
    AssetManager, DEFAULT_MATERIAL_PATH, DEFAULT_MESH_PATH, MISSING_MATERIAL_PATH,
    MISSING_MESH_PATH,
};

/// How an image source is interpreted, which drives its working format,
/// mip filtering and block compression.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ImageKind {
    ColorSrgb = 0,
    NormalMap = 1,
    Grayscale = 2,
    Skybox = 3,
}

/// Position-only vertex, used by depth-only passes and acceleration
/// structure builds.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

/// Full vertex for material shading. The tangent carries the bitangent
/// handedness sign in `w`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
}

keel_asset::flat_pod!(PositionVertex);
keel_asset::flat_pod!(ModelVertex);
