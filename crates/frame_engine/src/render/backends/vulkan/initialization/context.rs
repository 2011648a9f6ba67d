//! Vulkan context management
//!
//! Owns the instance, the optional presentation surface, the selected physical
//! device and the logical device. Everything else borrows the device from here.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::{Device, Entry, Instance};
use ash::vk;
use std::ffi::{c_char, CStr, CString};
use thiserror::Error;

use super::device::{self, LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
use super::surface::Surface;
use super::window::{Window, WindowError};
use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::resources::buffer::find_memory_type;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device met the requirements
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// No memory type satisfies an allocation's requirements
    #[error("No suitable memory type for type bits {type_bits:#b} with properties {properties:?}")]
    NoSuitableMemoryType {
        /// Memory type mask reported by the resource
        type_bits: u32,
        /// Property flags that were requested
        properties: vk::MemoryPropertyFlags,
    },

    /// A shader file could not be read or is not valid SPIR-V
    #[error("Failed to load shader '{path}': {source}")]
    ShaderLoad {
        /// Path that was read
        path: String,
        /// Underlying read or decode failure
        #[source]
        source: std::io::Error,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Window system failure while creating the surface
    #[error("Window error: {0}")]
    Window(#[from] WindowError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// Validation is requested only when `enable_validation` is set and the
    /// loader actually reports the Khronos validation layer.
    pub fn new(required_extensions: &[String], app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::InitializationFailed("Application name contains a NUL byte".to_string()))?;
        let engine_name_cstr = CString::new("FrameEngine")
            .map_err(|_| VulkanError::InitializationFailed("Engine name contains a NUL byte".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation requested but {VALIDATION_LAYER:?} is not installed; continuing without it");
        }

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VulkanError::InitializationFailed("Extension name contains a NUL byte".to_string()))?;

        let mut extensions: Vec<*const c_char> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug_messenger = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!("Created Vulkan instance for '{app_name}' (validation: {validation})");

        Ok(Self { entry, instance, debug_messenger })
    }

    /// Whether validation messages are being routed to the log
    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.map_err(VulkanError::Api)?;
        Ok(layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Main Vulkan context that owns all core Vulkan resources
///
/// Field order is drop order: the logical device goes first, the instance last.
pub struct DeviceContext {
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    queue_families: QueueFamilyIndices,
    surface: Option<Surface>,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Create a context that can present to `window`
    pub fn new(window: &Window, config: &RendererConfig) -> VulkanResult<Self> {
        let extensions = window.required_instance_extensions()?;
        let instance = VulkanInstance::new(&extensions, &config.application_name, config.validation_enabled())?;
        let surface = Surface::new(&instance, window)?;

        let (physical_device, queue_families) =
            device::select_suitable_device(&instance.instance, &surface, &config.device)?;
        let enabled_features = config.device.feature.enabled_features(&physical_device.features);

        let device = LogicalDevice::new(&instance.instance, &physical_device, queue_families, &enabled_features, true)?;

        log::info!(
            "Selected GPU: {} (graphics family {}, present family {})",
            physical_device.name(),
            queue_families.graphics,
            queue_families.present
        );

        Ok(Self {
            device,
            physical_device,
            queue_families,
            surface: Some(surface),
            instance,
        })
    }

    /// Create a context without a surface, for transfer-only work
    pub fn headless(app_name: &str) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(&[], app_name, false)?;
        let (physical_device, queue_families) = device::select_headless(&instance.instance)?;
        let device = LogicalDevice::new(
            &instance.instance,
            &physical_device,
            queue_families,
            &vk::PhysicalDeviceFeatures::default(),
            false,
        )?;

        log::debug!("Headless context on {}", physical_device.name());

        Ok(Self {
            device,
            physical_device,
            queue_families,
            surface: None,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Selected queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Presentation surface, absent on headless contexts
    pub fn surface(&self) -> VulkanResult<&Surface> {
        self.surface.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Context was created without a surface".to_string(),
        })
    }

    /// Swapchain extension loader, absent on headless contexts
    pub fn swapchain_loader(&self) -> VulkanResult<&khr::Swapchain> {
        self.device.swapchain_loader.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Swapchain extension was not enabled".to_string(),
        })
    }

    /// Current surface capabilities of the selected device
    pub fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        self.surface()?.capabilities(self.physical_device.handle)
    }

    /// Memory type index for an allocation on the selected device
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical_device.memory_properties, type_bits, properties)
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}
