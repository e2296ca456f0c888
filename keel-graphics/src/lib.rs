#![allow(clippy::new_without_default)]

mod host;
pub mod traits;

pub use host::{
    AccelerationStructure, AccelerationStructureCommandEncoder, Buffer, CommandEncoder, Context,
    Sampler, SyncPoint, Texture, TextureView, TransferCommandEncoder,
};

#[derive(Debug, Default)]
pub struct ContextDesc {
    pub validation: bool,
}

#[derive(Debug)]
pub struct NotSupportedError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Memory {
    /// Device-local memory, not host-visible.
    Device,
    /// Host-visible memory, mapped for the lifetime of the buffer.
    Shared,
    /// Host-visible write-combined memory for staging uploads.
    Upload,
}

#[derive(Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub memory: Memory,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferPiece {
    pub buffer: Buffer,
    pub offset: u64,
}

impl From<Buffer> for BufferPiece {
    fn from(buffer: Buffer) -> Self {
        Self { buffer, offset: 0 }
    }
}

impl BufferPiece {
    pub fn data(&self) -> *mut u8 {
        let base = self.buffer.data();
        assert!(!base.is_null());
        unsafe { base.offset(self.offset as isize) }
    }
}

impl Buffer {
    pub fn at(self, offset: u64) -> BufferPiece {
        BufferPiece {
            buffer: self,
            offset,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TexturePiece {
    pub texture: Texture,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl From<Texture> for TexturePiece {
    fn from(texture: Texture) -> Self {
        Self {
            texture,
            mip_level: 0,
            array_layer: 0,
        }
    }
}

impl Texture {
    pub fn at(self, mip_level: u32, array_layer: u32) -> TexturePiece {
        TexturePiece {
            texture: self,
            mip_level,
            array_layer,
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Bc3Unorm,
    Bc3UnormSrgb,
    Bc4Unorm,
    Bc5Unorm,
}

/// Dimensions and byte size of the addressable texel block of a format.
#[derive(Clone, Copy, Debug)]
pub struct TexelBlockInfo {
    pub dimensions: (u8, u8),
    pub size: u8,
}

impl TextureFormat {
    pub fn block_info(&self) -> TexelBlockInfo {
        fn uncompressed(size: u8) -> TexelBlockInfo {
            TexelBlockInfo {
                dimensions: (1, 1),
                size,
            }
        }
        fn cx_bc(size: u8) -> TexelBlockInfo {
            TexelBlockInfo {
                dimensions: (4, 4),
                size,
            }
        }
        match *self {
            Self::R8Unorm => uncompressed(1),
            Self::Rg8Unorm => uncompressed(2),
            Self::Rgba8Unorm => uncompressed(4),
            Self::Rgba8UnormSrgb => uncompressed(4),
            Self::Rgba16Float => uncompressed(8),
            Self::Bc3Unorm => cx_bc(16),
            Self::Bc3UnormSrgb => cx_bc(16),
            Self::Bc4Unorm => cx_bc(8),
            Self::Bc5Unorm => cx_bc(16),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.block_info().dimensions != (1, 1)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(*self, Self::Rgba8UnormSrgb | Self::Bc3UnormSrgb)
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum TextureDimension {
    D1,
    D2,
    D3,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum ViewDimension {
    D2,
    D2Array,
    Cube,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    /// Number of levels in a full mip chain down to 1x1.
    pub fn max_mip_levels(&self) -> u32 {
        32 - self.width.max(self.height).max(self.depth).leading_zeros()
    }
    pub fn at_mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct TextureUsage: u32 {
        const COPY = 1 << 0;
        const RESOURCE = 1 << 1;
        const STORAGE = 1 << 2;
    }
}

#[derive(Debug)]
pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub format: TextureFormat,
    pub size: Extent,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
}

#[derive(Debug)]
pub struct TextureViewDesc<'a> {
    pub name: &'a str,
    pub texture: Texture,
    pub dimension: ViewDimension,
}

#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Default)]
pub struct SamplerDesc<'a> {
    pub name: &'a str,
    pub address_modes: [AddressMode; 3],
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub anisotropy_clamp: u32,
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Clone, Debug)]
pub struct AccelerationStructureMesh {
    pub vertex_data: BufferPiece,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_data: BufferPiece,
    pub index_type: Option<IndexType>,
    pub triangle_count: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct AccelerationStructureSizes {
    pub data: u64,
    pub scratch: u64,
}

#[derive(Debug)]
pub struct AccelerationStructureDesc<'a> {
    pub name: &'a str,
    pub size: u64,
}

#[derive(Debug)]
pub struct CommandEncoderDesc<'a> {
    pub name: &'a str,
}
