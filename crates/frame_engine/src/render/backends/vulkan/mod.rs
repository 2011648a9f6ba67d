//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering, state and scheduling
//! modules, tied together by [`VulkanRenderer`].

/// Window, instance, surface and device selection
pub mod initialization;

/// Buffers, images, descriptors and staging uploads
pub mod resources;

/// Render pass, pipeline, shaders and command recording
pub mod rendering;

/// Swapchain, framebuffers and synchronization primitives
pub mod state;

/// Frame scheduling across the in-flight slots
pub mod scheduling;

/// Main Vulkan renderer implementation
pub mod renderer;

// Re-export main renderer
pub use renderer::{FrameContext, VulkanRenderer};

// Re-export core initialization types
pub use initialization::context::{DeviceContext, VulkanError, VulkanInstance, VulkanResult};
pub use initialization::device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
pub use initialization::surface::Surface;
pub use initialization::window::{Window, WindowError, WindowResult, WindowSignal};

// Re-export resource types
pub use resources::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, FrameUniforms, GpuBuffer, GpuImage, Sampler,
    StagingUploader, TextureData, UniformBuffer,
};

// Re-export rendering types
pub use rendering::{
    ActiveRenderPass, CommandPool, CommandRecorder, GraphicsPipeline, Mesh, RenderPass, ShaderModule, Vertex,
    VertexLayout,
};

// Re-export state types
pub use state::{
    AcquireOutcome, Fence, FrameSlot, PresentOutcome, RecreationReport, Semaphore, Swapchain, SwapchainManager,
    MAX_FRAMES_IN_FLIGHT,
};

// Re-export scheduling types
pub use scheduling::{FrameBackend, FrameCounters, FrameOutcome, FrameScheduler, FrameSlotState};
