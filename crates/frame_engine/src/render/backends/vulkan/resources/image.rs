//! GPU images, samplers and CPU-side texture data
//!
//! Images are 2D with one mip level, one array layer and one sample, each with
//! its own dedicated memory and a colour view.

use ash::{vk, Device};

use super::buffer::allocate_memory;
use crate::render::backends::vulkan::state::swapchain::create_color_view;
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major RGBA bytes
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Wrap raw RGBA bytes, checking their length against the size
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> VulkanResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{width}x{height} RGBA texture needs {expected} bytes, got {}", pixels.len()),
            });
        }
        Ok(Self { width, height, pixels })
    }

    /// Two-colour checkerboard made of `cell`-pixel squares
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let color = if (x / cell + y / cell) % 2 == 0 { a } else { b };
                pixels.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// Image handle, dedicated memory and a colour view
pub struct GpuImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl GpuImage {
    /// Create an optimally tiled 2D image in memory with `properties`
    pub fn new(
        context: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create a zero-sized image".to_string(),
            });
        }

        let device = context.device().clone();
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&create_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = match allocate_memory(context, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut gpu_image = Self {
            device,
            image,
            memory,
            view: vk::ImageView::null(),
            extent,
            format,
        };

        unsafe {
            gpu_image
                .device
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }
        gpu_image.view = create_color_view(&gpu_image.device, image, format)?;

        Ok(gpu_image)
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// RAII texture sampler
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering with repeat addressing and no anisotropy
    pub fn linear(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.create_sampler(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, sampler })
    }

    /// Get sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_layout() {
        let white = [255, 255, 255, 255];
        let black = [0, 0, 0, 255];
        let texture = TextureData::checkerboard(4, 2, white, black);

        assert_eq!(texture.pixels.len(), 4 * 4 * 4);
        let pixel = |x: usize, y: usize| &texture.pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(pixel(0, 0), white);
        assert_eq!(pixel(1, 1), white);
        assert_eq!(pixel(2, 0), black);
        assert_eq!(pixel(0, 2), black);
        assert_eq!(pixel(3, 3), white);
    }

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(TextureData::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(TextureData::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(TextureData::from_rgba(0, 2, Vec::new()).is_err());
    }
}
