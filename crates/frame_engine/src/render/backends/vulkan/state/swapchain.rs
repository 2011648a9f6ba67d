//! Swapchain negotiation and ownership
//!
//! Negotiation is a set of pure functions over the surface support report. The
//! [`Swapchain`] owns the chain handle and one view per image, and releases views
//! before the chain on every exit path including a failed construction.

use ash::extensions::khr;
use ash::{vk, Device};

use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Everything the surface reports for the selected device
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    /// Image count/extent limits and transforms
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format/colour-space pairs, in driver order
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query the surface of `context`
    pub fn query(context: &DeviceContext) -> VulkanResult<Self> {
        let surface = context.surface()?;
        let device = context.physical_device().handle;

        Ok(Self {
            capabilities: surface.capabilities(device)?,
            formats: surface.formats(device)?,
            present_modes: surface.present_modes(device)?,
        })
    }
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    /// Image format and colour space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Minimum image count requested from the driver
    pub image_count: u32,
    /// Alpha compositing mode
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    /// Transform applied on presentation
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Prefer 8-bit BGRA sRGB with a non-linear sRGB colour space, else the first pair
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Prefer mailbox, else FIFO which every driver must support
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the fixed current extent if there is one, else clamp the window size into range
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: window_extent.width.clamp(min.width, max.width.max(min.width)),
        height: window_extent.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped at the maximum when the driver reports one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Prefer opaque, then pre-multiplied, post-multiplied and finally inherit
pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Negotiate every swapchain parameter from a support report
pub fn negotiate(support: &SwapchainSupport, window_extent: vk::Extent2D) -> VulkanResult<SwapchainSettings> {
    let surface_format = choose_surface_format(&support.formats).ok_or_else(|| VulkanError::InvalidOperation {
        reason: "Surface reports no formats".to_string(),
    })?;

    Ok(SwapchainSettings {
        surface_format,
        present_mode: choose_present_mode(&support.present_modes),
        extent: choose_extent(&support.capabilities, window_extent),
        image_count: choose_image_count(&support.capabilities),
        composite_alpha: choose_composite_alpha(support.capabilities.supported_composite_alpha),
        pre_transform: support.capabilities.current_transform,
    })
}

/// Result of asking the chain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `suboptimal` still allows rendering
    Acquired {
        /// Index into the swapchain images
        image_index: u32,
        /// Surface no longer matches exactly
        suboptimal: bool,
    },
    /// The chain no longer matches the surface and must be rebuilt
    OutOfDate,
}

/// Result of handing an image to the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the chain should be rebuilt
    Suboptimal,
    /// Not presented; the chain must be rebuilt
    OutOfDate,
}

impl PresentOutcome {
    /// Whether this result asks for the chain to be rebuilt
    pub const fn needs_recreation(self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

/// Swapchain with one image view per image
pub struct Swapchain {
    device: Device,
    loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    settings: SwapchainSettings,
}

impl Swapchain {
    /// Negotiate settings for the current surface and create the chain
    pub fn new(context: &DeviceContext, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let support = SwapchainSupport::query(context)?;
        let settings = negotiate(&support, window_extent)?;
        Self::with_settings(context, settings)
    }

    /// Create the chain from already negotiated settings
    pub fn with_settings(context: &DeviceContext, settings: SwapchainSettings) -> VulkanResult<Self> {
        let loader = context.swapchain_loader()?.clone();
        let surface = context.surface()?.handle();
        let families = context.queue_families();
        let family_indices = families.unique();

        let (sharing_mode, shared_indices): (vk::SharingMode, &[u32]) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices)
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_indices)
            .pre_transform(settings.pre_transform)
            .composite_alpha(settings.composite_alpha)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };

        // From here on Drop owns cleanup, including views created before a failure.
        let mut chain = Self {
            device: context.device().clone(),
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            settings,
        };

        chain.images = unsafe { chain.loader.get_swapchain_images(swapchain).map_err(VulkanError::Api)? };
        chain.image_views.reserve(chain.images.len());
        for &image in &chain.images {
            let view = create_color_view(&chain.device, image, settings.surface_format.format)?;
            chain.image_views.push(view);
        }

        log::info!(
            "Created swapchain: {:?}/{:?}, {:?}, {}x{}, {} images (requested {})",
            settings.surface_format.format,
            settings.surface_format.color_space,
            settings.present_mode,
            settings.extent.width,
            settings.extent.height,
            chain.images.len(),
            settings.image_count
        );

        Ok(chain)
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Present `image_index` once `wait_semaphore` is signaled
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Negotiated settings
    pub fn settings(&self) -> &SwapchainSettings {
        &self.settings
    }

    /// Get swapchain format
    pub fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    /// Number of images the driver actually created
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Get swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get swapchain image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Destroyed swapchain with {} views", self.image_views.len());
    }
}

/// Create a 2D colour view covering the single mip level and layer
pub(crate) fn create_color_view(device: &Device, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn variable_extent_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    #[test]
    fn test_image_count_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&variable_extent_caps()), 3);

        let tight = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&tight), 3);
    }

    #[test]
    fn test_image_count_unbounded_when_max_is_zero() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 5,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 6);
    }

    #[test]
    fn test_image_count_always_within_bounds() {
        for min in 1..6 {
            for max in [0, min, min + 1, min + 4] {
                let caps = vk::SurfaceCapabilitiesKHR {
                    min_image_count: min,
                    max_image_count: max,
                    ..Default::default()
                };
                let count = choose_image_count(&caps);
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn test_extent_uses_window_size_when_variable() {
        assert_eq!(choose_extent(&variable_extent_caps(), extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_extent_clamped_into_range() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_extent: extent(100, 100),
            max_image_extent: extent(1920, 1080),
            ..variable_extent_caps()
        };
        assert_eq!(choose_extent(&caps, extent(5000, 50)), extent(1920, 100));
        assert_eq!(choose_extent(&caps, extent(0, 0)), extent(100, 100));

        for (w, h) in [(1, 1), (640, 480), (1920, 1080), (u32::MAX - 1, 7)] {
            let chosen = choose_extent(&caps, extent(w, h));
            assert!((100..=1920).contains(&chosen.width));
            assert!((100..=1080).contains(&chosen.height));
        }
    }

    #[test]
    fn test_extent_fixed_current_extent_wins() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1024, 768),
            ..variable_extent_caps()
        };
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(1024, 768));
    }

    #[test]
    fn test_surface_format_preference() {
        let linear = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[linear, preferred]), Some(preferred));
        assert_eq!(choose_surface_format(&[linear]), Some(linear));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_preference() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_composite_alpha_preference() {
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn test_negotiate_scenario() {
        let support = SwapchainSupport {
            capabilities: variable_extent_caps(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let settings = negotiate(&support, extent(800, 600)).unwrap();
        assert_eq!(settings.extent, extent(800, 600));
        assert_eq!(settings.image_count, 3);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(settings.composite_alpha, vk::CompositeAlphaFlagsKHR::OPAQUE);

        let empty = SwapchainSupport {
            formats: Vec::new(),
            ..support
        };
        assert!(negotiate(&empty, extent(800, 600)).is_err());
    }

    #[test]
    fn test_present_outcome_recreation() {
        assert!(!PresentOutcome::Presented.needs_recreation());
        assert!(PresentOutcome::Suboptimal.needs_recreation());
        assert!(PresentOutcome::OutOfDate.needs_recreation());
    }
}
