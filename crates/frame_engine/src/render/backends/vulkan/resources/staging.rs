//! Staging uploads into device-local memory
//!
//! Every call here is synchronous: it submits a one-shot command buffer and
//! waits for the graphics queue to go idle. Use it at load time, never from the
//! per-frame loop.

use ash::vk;
use bytemuck::Pod;

use super::buffer::GpuBuffer;
use super::image::{GpuImage, TextureData};
use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

const RGBA8_BYTES_PER_PIXEL: vk::DeviceSize = 4;

/// Moves CPU data into device-local resources through transient staging buffers
pub struct StagingUploader<'a> {
    context: &'a DeviceContext,
    pool: &'a CommandPool,
}

impl<'a> StagingUploader<'a> {
    /// Use `pool` (on the graphics family) for the one-shot copies
    pub fn new(context: &'a DeviceContext, pool: &'a CommandPool) -> Self {
        Self { context, pool }
    }

    fn staging_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<GpuBuffer> {
        GpuBuffer::host_visible(self.context, size, usage)
    }

    /// Upload `bytes` into a new device-local buffer with `usage`
    pub fn upload_buffer(&self, bytes: &[u8], usage: vk::BufferUsageFlags) -> VulkanResult<GpuBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = self.staging_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(bytes)?;

        let destination = GpuBuffer::new(
            self.context,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.pool.run_single_time(self.context.graphics_queue(), |recorder| {
            recorder.copy_buffer(staging.handle(), destination.handle(), size);
            Ok(())
        })?;

        log::debug!("Uploaded {size} bytes to a device-local buffer ({usage:?})");
        Ok(destination)
    }

    /// Upload a slice of plain data into a new device-local buffer
    pub fn upload_slice<T: Pod>(&self, data: &[T], usage: vk::BufferUsageFlags) -> VulkanResult<GpuBuffer> {
        self.upload_buffer(bytemuck::cast_slice(data), usage)
    }

    /// Upload RGBA8 pixels into a new sampled image left in shader-read layout
    pub fn upload_image(&self, texture: &TextureData, format: vk::Format) -> VulkanResult<GpuImage> {
        let staging = self.staging_buffer(texture.pixels.len() as vk::DeviceSize, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write_bytes(&texture.pixels)?;

        let extent = texture.extent();
        let image = GpuImage::new(
            self.context,
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        self.pool.run_single_time(self.context.graphics_queue(), |recorder| {
            recorder.transition_image_layout(
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            recorder.copy_buffer_to_image(staging.handle(), image.handle(), extent);
            recorder.transition_image_layout(
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        log::debug!("Uploaded {}x{} texture", extent.width, extent.height);
        Ok(image)
    }

    /// Copy a buffer created with `TRANSFER_SRC` usage back to the host
    pub fn read_back_buffer(&self, buffer: &GpuBuffer) -> VulkanResult<Vec<u8>> {
        let staging = self.staging_buffer(buffer.size(), vk::BufferUsageFlags::TRANSFER_DST)?;

        self.pool.run_single_time(self.context.graphics_queue(), |recorder| {
            recorder.copy_buffer(buffer.handle(), staging.handle(), buffer.size());
            Ok(())
        })?;

        staging.read_bytes()
    }

    /// Copy an RGBA8 image in shader-read layout back to the host
    ///
    /// The image is returned to shader-read layout afterwards.
    pub fn read_back_image(&self, image: &GpuImage) -> VulkanResult<Vec<u8>> {
        let extent = image.extent();
        let size = vk::DeviceSize::from(extent.width) * vk::DeviceSize::from(extent.height) * RGBA8_BYTES_PER_PIXEL;
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Image has no pixels".to_string(),
            });
        }
        let staging = self.staging_buffer(size, vk::BufferUsageFlags::TRANSFER_DST)?;

        self.pool.run_single_time(self.context.graphics_queue(), |recorder| {
            recorder.transition_image_layout(
                image.handle(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )?;
            recorder.copy_image_to_buffer(image.handle(), staging.handle(), extent);
            recorder.transition_image_layout(
                image.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        staging.read_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless() -> Option<DeviceContext> {
        match DeviceContext::headless("staging-test") {
            Ok(context) => Some(context),
            Err(e) => {
                eprintln!("Skipping GPU test, no Vulkan device: {e}");
                None
            }
        }
    }

    #[test]
    fn test_buffer_round_trip_is_byte_identical() {
        let Some(context) = headless() else { return };
        let pool = CommandPool::new(context.device().clone(), context.queue_families().graphics).unwrap();
        let uploader = StagingUploader::new(&context, &pool);

        let payload: Vec<u32> = (0..1024_u32).map(|i| i.wrapping_mul(2_654_435_761)).collect();
        let buffer = uploader
            .upload_slice(&payload, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC)
            .unwrap();

        let bytes = uploader.read_back_buffer(&buffer).unwrap();
        assert_eq!(bytes.as_slice(), bytemuck::cast_slice::<u32, u8>(&payload));
    }

    #[test]
    fn test_image_round_trip_is_byte_identical() {
        let Some(context) = headless() else { return };
        let pool = CommandPool::new(context.device().clone(), context.queue_families().graphics).unwrap();
        let uploader = StagingUploader::new(&context, &pool);

        let texture = TextureData::checkerboard(16, 4, [255, 0, 0, 255], [0, 0, 255, 255]);
        let image = uploader.upload_image(&texture, vk::Format::R8G8B8A8_UNORM).unwrap();

        let pixels = uploader.read_back_image(&image).unwrap();
        assert_eq!(pixels, texture.pixels);
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let Some(context) = headless() else { return };
        let pool = CommandPool::new(context.device().clone(), context.queue_families().graphics).unwrap();
        let uploader = StagingUploader::new(&context, &pool);

        let result = uploader.upload_buffer(&[], vk::BufferUsageFlags::VERTEX_BUFFER);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }
}
