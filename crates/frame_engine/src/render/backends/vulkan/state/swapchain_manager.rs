//! Swapchain and render target lifecycle
//!
//! The chain and its framebuffers are always torn down and rebuilt together.
//! [`recreate_surface_resources`] fixes the order; [`SwapchainManager`] supplies
//! the real objects.

use ash::vk;

use crate::render::backends::vulkan::rendering::render_pass::RenderPass;
use crate::render::backends::vulkan::state::framebuffer::RenderTargets;
use crate::render::backends::vulkan::state::swapchain::Swapchain;
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// The steps of rebuilding a presentation chain
pub trait SurfaceLifecycle {
    /// Block until no submitted work can reference the old objects
    fn wait_device_idle(&mut self) -> VulkanResult<()>;
    /// Release all framebuffers
    fn destroy_render_targets(&mut self);
    /// Release all image views and then the chain
    fn destroy_swap_chain(&mut self);
    /// Negotiate and create a new chain with its views
    fn create_swap_chain(&mut self) -> VulkanResult<()>;
    /// Build one framebuffer per image of the new chain
    fn create_render_targets(&mut self) -> VulkanResult<()>;
}

/// Rebuild the chain: idle, drop targets, drop chain, new chain, new targets
///
/// On error the lifecycle is left without a chain or targets; calling this
/// again retries from the start.
pub fn recreate_surface_resources<L: SurfaceLifecycle + ?Sized>(lifecycle: &mut L) -> VulkanResult<()> {
    lifecycle.wait_device_idle()?;
    lifecycle.destroy_render_targets();
    lifecycle.destroy_swap_chain();
    lifecycle.create_swap_chain()?;
    lifecycle.create_render_targets()
}

/// What a recreation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecreationReport {
    /// New swapchain extent
    pub extent: vk::Extent2D,
    /// Images in the new chain
    pub image_count: usize,
    /// Whether the surface format changed and the render pass was rebuilt
    pub format_changed: bool,
}

/// Owns the swapchain, its render pass and its framebuffers
///
/// Field order is drop order: framebuffers, then the chain, then the pass.
pub struct SwapchainManager {
    render_targets: Option<RenderTargets>,
    swapchain: Option<Swapchain>,
    render_pass: RenderPass,
}

impl SwapchainManager {
    /// Create the chain, the render pass for its format and the framebuffers
    pub fn new(context: &DeviceContext, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(context, window_extent)?;
        let render_pass = RenderPass::new_present_pass(context.device().clone(), swapchain.format())?;
        let render_targets = RenderTargets::new(context.device(), &render_pass, &swapchain)?;

        Ok(Self {
            render_targets: Some(render_targets),
            swapchain: Some(swapchain),
            render_pass,
        })
    }

    /// Rebuild the chain and framebuffers for the current surface
    pub fn recreate(&mut self, context: &DeviceContext, window_extent: vk::Extent2D) -> VulkanResult<RecreationReport> {
        let mut recreation = Recreation {
            manager: self,
            context,
            window_extent,
            format_changed: false,
        };
        recreate_surface_resources(&mut recreation)?;
        let format_changed = recreation.format_changed;

        let swapchain = self.swapchain()?;
        let report = RecreationReport {
            extent: swapchain.extent(),
            image_count: swapchain.image_count(),
            format_changed,
        };

        log::info!(
            "Recreated swapchain at {}x{} with {} images{}",
            report.extent.width,
            report.extent.height,
            report.image_count,
            if format_changed { " (new surface format)" } else { "" }
        );

        Ok(report)
    }

    /// The live swapchain
    pub fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Swapchain is not available".to_string(),
        })
    }

    /// Framebuffers for the live swapchain
    pub fn render_targets(&self) -> VulkanResult<&RenderTargets> {
        self.render_targets.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Render targets are not available".to_string(),
        })
    }

    /// Render pass shared by all framebuffers
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Whether a chain and matching framebuffers are both live
    pub fn is_complete(&self) -> bool {
        match (&self.swapchain, &self.render_targets) {
            (Some(chain), Some(targets)) => chain.image_count() == targets.len(),
            _ => false,
        }
    }
}

struct Recreation<'a> {
    manager: &'a mut SwapchainManager,
    context: &'a DeviceContext,
    window_extent: vk::Extent2D,
    format_changed: bool,
}

impl SurfaceLifecycle for Recreation<'_> {
    fn wait_device_idle(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    fn destroy_render_targets(&mut self) {
        self.manager.render_targets = None;
    }

    fn destroy_swap_chain(&mut self) {
        self.manager.swapchain = None;
    }

    fn create_swap_chain(&mut self) -> VulkanResult<()> {
        let swapchain = Swapchain::new(self.context, self.window_extent)?;

        if swapchain.format() != self.manager.render_pass.color_format() {
            log::info!(
                "Surface format changed from {:?} to {:?}",
                self.manager.render_pass.color_format(),
                swapchain.format()
            );
            self.manager.render_pass = RenderPass::new_present_pass(self.context.device().clone(), swapchain.format())?;
            self.format_changed = true;
        }

        self.manager.swapchain = Some(swapchain);
        Ok(())
    }

    fn create_render_targets(&mut self) -> VulkanResult<()> {
        let swapchain = self.manager.swapchain()?;
        let targets = RenderTargets::new(self.context.device(), &self.manager.render_pass, swapchain)?;
        self.manager.render_targets = Some(targets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tracks live objects by generation so dangling references are detectable
    #[derive(Default)]
    struct MockLifecycle {
        log: Vec<&'static str>,
        device_busy: bool,
        next_generation: u32,
        live_chains: Vec<u32>,
        targets_for: Option<u32>,
        target_count: usize,
        image_count: usize,
        fail_chain_creation: bool,
    }

    impl SurfaceLifecycle for MockLifecycle {
        fn wait_device_idle(&mut self) -> VulkanResult<()> {
            self.log.push("wait_idle");
            self.device_busy = false;
            Ok(())
        }

        fn destroy_render_targets(&mut self) {
            assert!(!self.device_busy, "targets destroyed while GPU busy");
            self.log.push("destroy_targets");
            self.targets_for = None;
            self.target_count = 0;
        }

        fn destroy_swap_chain(&mut self) {
            assert!(self.targets_for.is_none(), "chain destroyed while framebuffers reference it");
            self.log.push("destroy_chain");
            self.live_chains.clear();
        }

        fn create_swap_chain(&mut self) -> VulkanResult<()> {
            self.log.push("create_chain");
            if self.fail_chain_creation {
                return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            self.next_generation += 1;
            self.live_chains.push(self.next_generation);
            Ok(())
        }

        fn create_render_targets(&mut self) -> VulkanResult<()> {
            self.log.push("create_targets");
            let chain = *self.live_chains.last().expect("targets built without a chain");
            self.targets_for = Some(chain);
            self.target_count = self.image_count;
            Ok(())
        }
    }

    fn busy_mock() -> MockLifecycle {
        let mut mock = MockLifecycle {
            device_busy: true,
            image_count: 3,
            ..Default::default()
        };
        mock.next_generation = 1;
        mock.live_chains.push(1);
        mock.targets_for = Some(1);
        mock.target_count = 3;
        mock
    }

    #[test]
    fn test_recreation_follows_protocol_order() {
        let mut mock = busy_mock();
        recreate_surface_resources(&mut mock).unwrap();

        assert_eq!(
            mock.log,
            vec!["wait_idle", "destroy_targets", "destroy_chain", "create_chain", "create_targets"]
        );
        assert_eq!(mock.live_chains, vec![2]);
        assert_eq!(mock.targets_for, Some(2));
    }

    #[test]
    fn test_repeated_recreation_leaves_one_matching_chain() {
        let mut mock = busy_mock();
        recreate_surface_resources(&mut mock).unwrap();
        mock.device_busy = true;
        recreate_surface_resources(&mut mock).unwrap();

        assert_eq!(mock.live_chains.len(), 1);
        assert_eq!(mock.targets_for, mock.live_chains.last().copied());
        assert_eq!(mock.target_count, mock.image_count);
    }

    #[test]
    fn test_failed_chain_creation_stops_before_targets() {
        let mut mock = busy_mock();
        mock.fail_chain_creation = true;

        assert!(recreate_surface_resources(&mut mock).is_err());
        assert_eq!(mock.log.last(), Some(&"create_chain"));
        assert!(mock.live_chains.is_empty());
        assert!(mock.targets_for.is_none());

        mock.fail_chain_creation = false;
        mock.log.clear();
        recreate_surface_resources(&mut mock).unwrap();
        assert_eq!(mock.live_chains.len(), 1);
        assert_eq!(mock.targets_for, mock.live_chains.last().copied());
    }
}
