//! # Rendering System
//!
//! Everything between the window and the GPU. The Vulkan backend owns device
//! selection, the swapchain lifecycle, frame resources and the frame
//! scheduler; this module re-exports the types applications touch.

/// Graphics backend implementations
pub mod backends;

pub use backends::vulkan;

// Types applications need to build a renderer and feed it geometry
pub use backends::vulkan::{
    FrameCounters, FrameOutcome, Mesh, TextureData, Vertex, VulkanError, VulkanRenderer, VulkanResult, Window,
    WindowError, WindowSignal,
};
