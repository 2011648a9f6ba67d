//! Vulkan initialization: window, instance, surface and device selection

pub mod context;
pub mod device;
pub mod surface;
pub mod window;

pub use context::*;
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
pub use surface::Surface;
pub use window::*;
