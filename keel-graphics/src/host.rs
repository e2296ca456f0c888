//! Host-memory backend.
//!
//! Resources live in CPU memory and transfers execute at submission time.
//! The handle types and the recording surface match what a hardware backend
//! exposes, so pipeline code is written once against this API.

use std::{
    ptr,
    sync::atomic::{AtomicU64, Ordering},
};

pub struct Context {
    progress: AtomicU64,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct Buffer {
    data: *mut u8,
    size: u64,
}
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn data(&self) -> *mut u8 {
        self.data
    }
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct Texture {
    data: *mut u8,
    format: crate::TextureFormat,
    size: crate::Extent,
    array_layer_count: u32,
    mip_level_count: u32,
}
unsafe impl Send for Texture {}
unsafe impl Sync for Texture {}

impl Texture {
    pub fn format(&self) -> crate::TextureFormat {
        self.format
    }
    pub fn extent(&self) -> crate::Extent {
        self.size
    }
    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }
    pub fn array_layer_count(&self) -> u32 {
        self.array_layer_count
    }

    /// Tightly packed byte size of one mip level of one layer.
    pub fn level_byte_size(&self, level: u32) -> u64 {
        let info = self.format.block_info();
        let extent = self.size.at_mip_level(level);
        let row_blocks = extent.width.div_ceil(info.dimensions.0 as u32) as u64;
        let rows = extent.height.div_ceil(info.dimensions.1 as u32) as u64;
        row_blocks * rows * extent.depth as u64 * info.size as u64
    }

    /// Byte size of one array layer with its full mip chain.
    pub fn layer_byte_size(&self) -> u64 {
        (0..self.mip_level_count)
            .map(|level| self.level_byte_size(level))
            .sum()
    }

    fn level_offset(&self, mip_level: u32, array_layer: u32) -> u64 {
        assert!(mip_level < self.mip_level_count);
        assert!(array_layer < self.array_layer_count);
        array_layer as u64 * self.layer_byte_size()
            + (0..mip_level).map(|level| self.level_byte_size(level)).sum::<u64>()
    }

    fn total_byte_size(&self) -> u64 {
        self.layer_byte_size() * self.array_layer_count as u64
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct TextureView {
    pub(crate) texture: Texture,
    pub(crate) dimension: crate::ViewDimension,
}

impl TextureView {
    pub fn texture(&self) -> Texture {
        self.texture
    }
    pub fn dimension(&self) -> crate::ViewDimension {
        self.dimension
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct Sampler {
    pub mag_filter: crate::FilterMode,
    pub min_filter: crate::FilterMode,
    pub mipmap_filter: crate::FilterMode,
    pub address_modes: [crate::AddressMode; 3],
}

#[derive(Clone, Copy, Debug, Hash, PartialEq)]
pub struct AccelerationStructure {
    data: *mut u8,
    size: u64,
}
unsafe impl Send for AccelerationStructure {}
unsafe impl Sync for AccelerationStructure {}

/// Monotonic submission marker. Signaled once the associated submission
/// has finished executing.
#[derive(Clone, Debug)]
pub struct SyncPoint {
    progress: u64,
}

#[derive(Debug)]
enum Command {
    FillBuffer {
        dst: crate::BufferPiece,
        size: u64,
        value: u8,
    },
    CopyBufferToBuffer {
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    },
    CopyBufferToTexture {
        src: crate::BufferPiece,
        bytes_per_row: u32,
        dst: crate::TexturePiece,
        size: crate::Extent,
    },
    CopyTextureToBuffer {
        src: crate::TexturePiece,
        dst: crate::BufferPiece,
        bytes_per_row: u32,
        size: crate::Extent,
    },
    BuildBottomLevel {
        dst: AccelerationStructure,
        primitive_count: u64,
    },
}

pub struct CommandEncoder {
    name: String,
    commands: Vec<Command>,
}

impl CommandEncoder {
    pub fn start(&mut self) {
        self.commands.clear();
    }

    pub fn transfer(&mut self) -> TransferCommandEncoder<'_> {
        TransferCommandEncoder {
            commands: &mut self.commands,
        }
    }

    pub fn acceleration_structure(&mut self) -> AccelerationStructureCommandEncoder<'_> {
        AccelerationStructureCommandEncoder {
            commands: &mut self.commands,
        }
    }
}

pub struct TransferCommandEncoder<'a> {
    commands: &'a mut Vec<Command>,
}

impl TransferCommandEncoder<'_> {
    pub fn fill_buffer(&mut self, dst: crate::BufferPiece, size: u64, value: u8) {
        self.commands.push(Command::FillBuffer { dst, size, value });
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    ) {
        self.commands
            .push(Command::CopyBufferToBuffer { src, dst, size });
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: crate::BufferPiece,
        bytes_per_row: u32,
        dst: crate::TexturePiece,
        size: crate::Extent,
    ) {
        self.commands.push(Command::CopyBufferToTexture {
            src,
            bytes_per_row,
            dst,
            size,
        });
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: crate::TexturePiece,
        dst: crate::BufferPiece,
        bytes_per_row: u32,
        size: crate::Extent,
    ) {
        self.commands.push(Command::CopyTextureToBuffer {
            src,
            dst,
            bytes_per_row,
            size,
        });
    }
}

pub struct AccelerationStructureCommandEncoder<'a> {
    commands: &'a mut Vec<Command>,
}

impl AccelerationStructureCommandEncoder<'_> {
    pub fn build_bottom_level(
        &mut self,
        acceleration_structure: AccelerationStructure,
        meshes: &[crate::AccelerationStructureMesh],
        _scratch_data: crate::BufferPiece,
    ) {
        let primitive_count = meshes.iter().map(|m| m.triangle_count as u64).sum();
        self.commands.push(Command::BuildBottomLevel {
            dst: acceleration_structure,
            primitive_count,
        });
    }
}

fn alloc_bytes(size: u64) -> *mut u8 {
    Vec::leak(vec![0u8; size as usize]).as_mut_ptr()
}

unsafe fn free_bytes(data: *mut u8, size: u64) {
    if !data.is_null() {
        let _ = Vec::from_raw_parts(data, size as usize, size as usize);
    }
}

impl Context {
    pub fn init(_desc: crate::ContextDesc) -> Result<Self, crate::NotSupportedError> {
        Ok(Self {
            progress: AtomicU64::new(0),
        })
    }

    pub fn create_buffer(&self, desc: crate::BufferDesc) -> Buffer {
        Buffer {
            data: alloc_bytes(desc.size),
            size: desc.size,
        }
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        unsafe { free_bytes(buffer.data, buffer.size) };
    }

    pub fn create_texture(&self, desc: crate::TextureDesc) -> Texture {
        let mut texture = Texture {
            data: ptr::null_mut(),
            format: desc.format,
            size: desc.size,
            array_layer_count: desc.array_layer_count,
            mip_level_count: desc.mip_level_count,
        };
        assert!(desc.mip_level_count >= 1);
        assert!(desc.mip_level_count <= desc.size.max_mip_levels());
        texture.data = alloc_bytes(texture.total_byte_size());
        texture
    }

    pub fn destroy_texture(&self, texture: Texture) {
        unsafe { free_bytes(texture.data, texture.total_byte_size()) };
    }

    pub fn create_texture_view(&self, desc: crate::TextureViewDesc) -> TextureView {
        if desc.dimension == crate::ViewDimension::Cube {
            assert_eq!(desc.texture.array_layer_count, 6);
        }
        TextureView {
            texture: desc.texture,
            dimension: desc.dimension,
        }
    }

    pub fn destroy_texture_view(&self, _view: TextureView) {}

    pub fn create_sampler(&self, desc: crate::SamplerDesc) -> Sampler {
        Sampler {
            mag_filter: desc.mag_filter,
            min_filter: desc.min_filter,
            mipmap_filter: desc.mipmap_filter,
            address_modes: desc.address_modes,
        }
    }

    pub fn destroy_sampler(&self, _sampler: Sampler) {}

    pub fn get_bottom_level_acceleration_structure_sizes(
        &self,
        meshes: &[crate::AccelerationStructureMesh],
    ) -> crate::AccelerationStructureSizes {
        let primitive_count: u64 = meshes.iter().map(|m| m.triangle_count as u64).sum();
        crate::AccelerationStructureSizes {
            data: (primitive_count * 64).max(64),
            scratch: (primitive_count * 16).max(64),
        }
    }

    pub fn create_acceleration_structure(
        &self,
        desc: crate::AccelerationStructureDesc,
    ) -> AccelerationStructure {
        AccelerationStructure {
            data: alloc_bytes(desc.size),
            size: desc.size,
        }
    }

    pub fn destroy_acceleration_structure(&self, acceleration_structure: AccelerationStructure) {
        unsafe { free_bytes(acceleration_structure.data, acceleration_structure.size) };
    }

    pub fn create_command_encoder(&self, desc: crate::CommandEncoderDesc) -> CommandEncoder {
        CommandEncoder {
            name: desc.name.to_string(),
            commands: Vec::new(),
        }
    }

    pub fn destroy_command_encoder(&self, encoder: &mut CommandEncoder) {
        encoder.commands.clear();
    }

    pub fn submit(&self, encoder: &mut CommandEncoder) -> SyncPoint {
        for command in encoder.commands.drain(..) {
            unsafe { execute(command) };
        }
        let progress = self.progress.fetch_add(1, Ordering::AcqRel) + 1;
        log::trace!("submitted '{}' at progress {}", encoder.name, progress);
        SyncPoint { progress }
    }

    pub fn wait_for(&self, sp: &SyncPoint, _timeout_ms: u32) -> bool {
        self.progress.load(Ordering::Acquire) >= sp.progress
    }
}


unsafe fn execute(command: Command) {
    match command {
        Command::FillBuffer { dst, size, value } => {
            ptr::write_bytes(dst.data(), value, size as usize);
        }
        Command::CopyBufferToBuffer { src, dst, size } => {
            ptr::copy_nonoverlapping(src.data(), dst.data(), size as usize);
        }
        Command::CopyBufferToTexture {
            src,
            bytes_per_row,
            dst,
            size,
        } => {
            let texture = dst.texture;
            let info = texture.format().block_info();
            let level_extent = texture.extent().at_mip_level(dst.mip_level);
            // partial-level copies are not supported, rows are tightly packed
            assert!(size.width == level_extent.width && size.height == level_extent.height);
            let row_bytes =
                size.width.div_ceil(info.dimensions.0 as u32) as usize * info.size as usize;
            let rows = size.height.div_ceil(info.dimensions.1 as u32) as usize;
            assert!(bytes_per_row as usize >= row_bytes);
            let base = texture
                .data
                .add(texture.level_offset(dst.mip_level, dst.array_layer) as usize);
            for row in 0..rows {
                ptr::copy_nonoverlapping(
                    src.data().add(row * bytes_per_row as usize),
                    base.add(row * row_bytes),
                    row_bytes,
                );
            }
        }
        Command::CopyTextureToBuffer {
            src,
            dst,
            bytes_per_row,
            size,
        } => {
            let texture = src.texture;
            let info = texture.format().block_info();
            let level_extent = texture.extent().at_mip_level(src.mip_level);
            assert!(size.width == level_extent.width && size.height == level_extent.height);
            let row_bytes =
                size.width.div_ceil(info.dimensions.0 as u32) as usize * info.size as usize;
            let rows = size.height.div_ceil(info.dimensions.1 as u32) as usize;
            assert!(bytes_per_row as usize >= row_bytes);
            let base = texture
                .data
                .add(texture.level_offset(src.mip_level, src.array_layer) as usize);
            for row in 0..rows {
                ptr::copy_nonoverlapping(
                    base.add(row * row_bytes),
                    dst.data().add(row * bytes_per_row as usize),
                    row_bytes,
                );
            }
        }
        Command::BuildBottomLevel {
            dst,
            primitive_count,
        } => {
            assert!(dst.size >= 8);
            ptr::copy_nonoverlapping(
                primitive_count.to_le_bytes().as_ptr(),
                dst.data,
                8,
            );
        }
    }
}
