//! Per-frame uniform data and host-visible uniform buffers

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Vector3};
use std::marker::PhantomData;

use super::buffer::GpuBuffer;
use crate::render::backends::vulkan::{DeviceContext, VulkanResult};

/// Degrees per second the demo geometry spins at
const ROTATION_SPEED_DEGREES: f32 = 90.0;

/// Uniform block read by the vertex shader at binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Column-major clip-space transform
    pub transform: [[f32; 4]; 4],
}

impl FrameUniforms {
    /// Rotation about Z after `elapsed_seconds`, corrected for the viewport aspect ratio
    pub fn animated(elapsed_seconds: f32, aspect_ratio: f32) -> Self {
        let aspect = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
            aspect_ratio
        } else {
            1.0
        };
        let angle = (elapsed_seconds * ROTATION_SPEED_DEGREES).to_radians();

        let rotation = Matrix4::from_axis_angle(&Vector3::z_axis(), angle);
        let aspect_fix = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0 / aspect, 1.0, 1.0));

        Self::from_matrix(&(aspect_fix * rotation))
    }

    /// Wrap a transform matrix
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Self {
        Self {
            transform: (*matrix).into(),
        }
    }
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self::from_matrix(&Matrix4::identity())
    }
}

/// Host-visible buffer holding one `T`
pub struct UniformBuffer<T: Pod> {
    buffer: GpuBuffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create a buffer sized for one `T`
    pub fn new(context: &DeviceContext) -> VulkanResult<Self> {
        let buffer = GpuBuffer::host_visible(context, Self::size(), vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Overwrite the contents
    pub fn write(&self, value: &T) -> VulkanResult<()> {
        self.buffer.write_bytes(bytemuck::bytes_of(value))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size of `T` in bytes
    pub fn size() -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    fn matrix(uniforms: &FrameUniforms) -> Matrix4<f32> {
        Matrix4::from(uniforms.transform)
    }

    #[test]
    fn test_starts_at_identity() {
        let uniforms = FrameUniforms::animated(0.0, 1.0);
        assert_relative_eq!(matrix(&uniforms), Matrix4::identity(), epsilon = 1e-6);
        assert_eq!(uniforms, FrameUniforms::default());
    }

    #[test]
    fn test_quarter_turn_after_one_second() {
        let uniforms = FrameUniforms::animated(1.0, 1.0);
        let x_axis = matrix(&uniforms) * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(x_axis, Vector4::new(0.0, 1.0, 0.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_aspect_ratio_squashes_x() {
        let uniforms = FrameUniforms::animated(0.0, 2.0);
        assert_relative_eq!(uniforms.transform[0][0], 0.5);
        assert_relative_eq!(uniforms.transform[1][1], 1.0);

        let degenerate = FrameUniforms::animated(0.0, 0.0);
        assert_relative_eq!(degenerate.transform[0][0], 1.0);
    }

    #[test]
    fn test_layout_is_std140_sized() {
        assert_eq!(UniformBuffer::<FrameUniforms>::size(), 64);
    }
}
