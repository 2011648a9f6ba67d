//! Vulkan state management: swapchain, framebuffers and frame synchronization

pub mod framebuffer;
pub mod swapchain;
pub mod swapchain_manager;
pub mod sync;

pub use framebuffer::{Framebuffer, RenderTargets};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainSettings, SwapchainSupport};
pub use swapchain_manager::{recreate_surface_resources, RecreationReport, SurfaceLifecycle, SwapchainManager};
pub use sync::{Fence, FrameSlot, Semaphore, MAX_FRAMES_IN_FLIGHT};
