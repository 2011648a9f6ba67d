//! Framebuffers for swapchain images

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::state::swapchain::Swapchain;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// RAII wrapper for a Vulkan framebuffer
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments`
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, framebuffer })
    }

    /// Get framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// One framebuffer per swapchain image, all sharing one render pass
pub struct RenderTargets {
    framebuffers: Vec<Framebuffer>,
    extent: vk::Extent2D,
}

impl RenderTargets {
    /// Build a framebuffer for every view of `swapchain`
    pub fn new(device: &Device, render_pass: &RenderPass, swapchain: &Swapchain) -> VulkanResult<Self> {
        let extent = swapchain.extent();
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device.clone(), render_pass.handle(), &[view], extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!("Created {} framebuffers at {}x{}", framebuffers.len(), extent.width, extent.height);

        Ok(Self { framebuffers, extent })
    }

    /// Framebuffer for a swapchain image index
    pub fn get(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No framebuffer for image {image_index} of {}", self.framebuffers.len()),
            })
    }

    /// Number of framebuffers
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    /// Whether there are no framebuffers
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Extent the framebuffers were created at
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}
