//! Vulkan resource management
//!
//! Buffers and images with dedicated memory, the staging upload path,
//! descriptor sets and per-frame uniform buffers.

/// Buffers and memory type selection
pub mod buffer;

/// Images, samplers and CPU-side texture data
pub mod image;

/// Synchronous staging uploads and read-backs
pub mod staging;

/// Descriptor set layout, pool and writes
pub mod descriptor_set;

/// Uniform buffer objects (UBOs) for shader data
pub mod uniform_buffer;

pub use buffer::{find_memory_type, GpuBuffer};
pub use descriptor_set::{
    pool_sizes_for, write_uniform_and_sampler, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
};
pub use image::{GpuImage, Sampler, TextureData};
pub use staging::StagingUploader;
pub use uniform_buffer::{FrameUniforms, UniformBuffer};
