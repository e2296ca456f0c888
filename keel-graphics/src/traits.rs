//! The device trait seam. A backend implements these; pipeline code is
//! written against the inherent methods of the selected backend, which
//! mirror them one to one.

use std::fmt::Debug;
use std::hash::Hash;

pub trait ResourceDevice {
    type Buffer: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;
    type Texture: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;
    type TextureView: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;
    type Sampler: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;
    type AccelerationStructure: Send + Sync + Clone + Copy + Debug + Hash + PartialEq;

    fn create_buffer(&self, desc: super::BufferDesc) -> Self::Buffer;
    fn destroy_buffer(&self, buffer: Self::Buffer);
    fn create_texture(&self, desc: super::TextureDesc) -> Self::Texture;
    fn destroy_texture(&self, texture: Self::Texture);
    fn create_texture_view(&self, desc: super::TextureViewDesc) -> Self::TextureView;
    fn destroy_texture_view(&self, view: Self::TextureView);
    fn create_sampler(&self, desc: super::SamplerDesc) -> Self::Sampler;
    fn destroy_sampler(&self, sampler: Self::Sampler);
    fn create_acceleration_structure(
        &self,
        desc: super::AccelerationStructureDesc,
    ) -> Self::AccelerationStructure;
    fn destroy_acceleration_structure(&self, acceleration_structure: Self::AccelerationStructure);
}

pub trait CommandDevice {
    type CommandEncoder;
    type SyncPoint: Clone + Debug;

    fn create_command_encoder(&self, desc: super::CommandEncoderDesc) -> Self::CommandEncoder;
    fn destroy_command_encoder(&self, encoder: &mut Self::CommandEncoder);
    fn submit(&self, encoder: &mut Self::CommandEncoder) -> Self::SyncPoint;
    fn wait_for(&self, sp: &Self::SyncPoint, timeout_ms: u32) -> bool;
}

pub trait TransferEncoder {
    fn fill_buffer(&mut self, dst: super::BufferPiece, size: u64, value: u8);
    fn copy_buffer_to_buffer(&mut self, src: super::BufferPiece, dst: super::BufferPiece, size: u64);
    fn copy_buffer_to_texture(
        &mut self,
        src: super::BufferPiece,
        bytes_per_row: u32,
        dst: super::TexturePiece,
        size: super::Extent,
    );
    fn copy_texture_to_buffer(
        &mut self,
        src: super::TexturePiece,
        dst: super::BufferPiece,
        bytes_per_row: u32,
        size: super::Extent,
    );
}

pub trait AccelerationStructureEncoder {
    type AccelerationStructure: Send + Sync + Clone + Debug;

    fn build_bottom_level(
        &mut self,
        acceleration_structure: Self::AccelerationStructure,
        meshes: &[super::AccelerationStructureMesh],
        scratch_data: super::BufferPiece,
    );
}

impl ResourceDevice for super::Context {
    type Buffer = super::Buffer;
    type Texture = super::Texture;
    type TextureView = super::TextureView;
    type Sampler = super::Sampler;
    type AccelerationStructure = super::AccelerationStructure;

    fn create_buffer(&self, desc: super::BufferDesc) -> Self::Buffer {
        Self::create_buffer(self, desc)
    }
    fn destroy_buffer(&self, buffer: Self::Buffer) {
        Self::destroy_buffer(self, buffer)
    }
    fn create_texture(&self, desc: super::TextureDesc) -> Self::Texture {
        Self::create_texture(self, desc)
    }
    fn destroy_texture(&self, texture: Self::Texture) {
        Self::destroy_texture(self, texture)
    }
    fn create_texture_view(&self, desc: super::TextureViewDesc) -> Self::TextureView {
        Self::create_texture_view(self, desc)
    }
    fn destroy_texture_view(&self, view: Self::TextureView) {
        Self::destroy_texture_view(self, view)
    }
    fn create_sampler(&self, desc: super::SamplerDesc) -> Self::Sampler {
        Self::create_sampler(self, desc)
    }
    fn destroy_sampler(&self, sampler: Self::Sampler) {
        Self::destroy_sampler(self, sampler)
    }
    fn create_acceleration_structure(
        &self,
        desc: super::AccelerationStructureDesc,
    ) -> Self::AccelerationStructure {
        Self::create_acceleration_structure(self, desc)
    }
    fn destroy_acceleration_structure(&self, acceleration_structure: Self::AccelerationStructure) {
        Self::destroy_acceleration_structure(self, acceleration_structure)
    }
}

impl CommandDevice for super::Context {
    type CommandEncoder = super::CommandEncoder;
    type SyncPoint = super::SyncPoint;

    fn create_command_encoder(&self, desc: super::CommandEncoderDesc) -> Self::CommandEncoder {
        Self::create_command_encoder(self, desc)
    }
    fn destroy_command_encoder(&self, encoder: &mut Self::CommandEncoder) {
        Self::destroy_command_encoder(self, encoder)
    }
    fn submit(&self, encoder: &mut Self::CommandEncoder) -> Self::SyncPoint {
        Self::submit(self, encoder)
    }
    fn wait_for(&self, sp: &Self::SyncPoint, timeout_ms: u32) -> bool {
        Self::wait_for(self, sp, timeout_ms)
    }
}

impl TransferEncoder for super::TransferCommandEncoder<'_> {
    fn fill_buffer(&mut self, dst: super::BufferPiece, size: u64, value: u8) {
        Self::fill_buffer(self, dst, size, value)
    }
    fn copy_buffer_to_buffer(
        &mut self,
        src: super::BufferPiece,
        dst: super::BufferPiece,
        size: u64,
    ) {
        Self::copy_buffer_to_buffer(self, src, dst, size)
    }
    fn copy_buffer_to_texture(
        &mut self,
        src: super::BufferPiece,
        bytes_per_row: u32,
        dst: super::TexturePiece,
        size: super::Extent,
    ) {
        Self::copy_buffer_to_texture(self, src, bytes_per_row, dst, size)
    }
    fn copy_texture_to_buffer(
        &mut self,
        src: super::TexturePiece,
        dst: super::BufferPiece,
        bytes_per_row: u32,
        size: super::Extent,
    ) {
        Self::copy_texture_to_buffer(self, src, dst, bytes_per_row, size)
    }
}

impl AccelerationStructureEncoder for super::AccelerationStructureCommandEncoder<'_> {
    type AccelerationStructure = super::AccelerationStructure;

    fn build_bottom_level(
        &mut self,
        acceleration_structure: Self::AccelerationStructure,
        meshes: &[super::AccelerationStructureMesh],
        scratch_data: super::BufferPiece,
    ) {
        Self::build_bottom_level(self, acceleration_structure, meshes, scratch_data)
    }
}
