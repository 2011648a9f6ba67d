//! Physical device selection and logical device creation
//!
//! Selection is split into a query step that talks to the driver and a pure
//! evaluation step over the queried data, so the rules can be tested without a GPU.

use ash::extensions::khr;
use ash::{vk, Device, Instance};
use std::ffi::CStr;
use thiserror::Error;

use super::context::{VulkanError, VulkanResult};
use super::surface::Surface;
use crate::core::config::{DeviceRequirements, RequiredFeature};

/// Physical device handle plus everything queried about it
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub handle: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Available queue families
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDeviceInfo {
    fn query(instance: &Instance, handle: vk::PhysicalDevice) -> Self {
        unsafe {
            Self {
                handle,
                properties: instance.get_physical_device_properties(handle),
                features: instance.get_physical_device_features(handle),
                memory_properties: instance.get_physical_device_memory_properties(handle),
                queue_families: instance.get_physical_device_queue_family_properties(handle),
            }
        }
    }

    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Graphics and present queue family indices; they may coincide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for rendering and transfers
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether one family serves both roles
    pub const fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What one queue family can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilySupport {
    /// Supports graphics operations
    pub graphics: bool,
    /// Can present to the target surface
    pub present: bool,
}

/// Queried facts about one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Reported device type
    pub device_type: vk::PhysicalDeviceType,
    /// Reported features
    pub features: vk::PhysicalDeviceFeatures,
    /// Per-family capabilities, indexed by family
    pub families: Vec<QueueFamilySupport>,
    /// Whether `VK_KHR_swapchain` is available
    pub has_swapchain_extension: bool,
    /// Number of surface formats reported
    pub format_count: usize,
    /// Number of present modes reported
    pub present_mode_count: usize,
}

/// Why a physical device was passed over
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Device type does not match the required category
    #[error("device type {0:?} does not match the required category")]
    WrongCategory(vk::PhysicalDeviceType),
    /// Required hardware feature is missing
    #[error("missing required feature {0:?}")]
    MissingFeature(RequiredFeature),
    /// No queue family supports graphics
    #[error("no graphics queue family")]
    NoGraphicsQueue,
    /// No queue family can present to the surface
    #[error("no queue family can present to the surface")]
    NoPresentQueue,
    /// Swapchain extension missing
    #[error("VK_KHR_swapchain not supported")]
    MissingSwapchainExtension,
    /// Surface reports no formats
    #[error("surface reports no formats")]
    NoSurfaceFormats,
    /// Surface reports no present modes
    #[error("surface reports no present modes")]
    NoPresentModes,
}

/// Pick queue families, preferring one family that does both graphics and present
pub fn choose_queue_families(families: &[QueueFamilySupport]) -> Result<QueueFamilyIndices, Rejection> {
    let index = |i: usize| i as u32;

    if let Some(shared) = families.iter().position(|f| f.graphics && f.present) {
        return Ok(QueueFamilyIndices {
            graphics: index(shared),
            present: index(shared),
        });
    }

    let graphics = families.iter().position(|f| f.graphics).ok_or(Rejection::NoGraphicsQueue)?;
    let present = families.iter().position(|f| f.present).ok_or(Rejection::NoPresentQueue)?;

    Ok(QueueFamilyIndices {
        graphics: index(graphics),
        present: index(present),
    })
}

/// Decide whether a candidate can drive the renderer
pub fn evaluate_candidate(
    candidate: &DeviceCandidate,
    requirements: &DeviceRequirements,
) -> Result<QueueFamilyIndices, Rejection> {
    if !requirements.category.accepts(candidate.device_type) {
        return Err(Rejection::WrongCategory(candidate.device_type));
    }
    if !requirements.feature.is_supported(&candidate.features) {
        return Err(Rejection::MissingFeature(requirements.feature));
    }

    let families = choose_queue_families(&candidate.families)?;

    if !candidate.has_swapchain_extension {
        return Err(Rejection::MissingSwapchainExtension);
    }
    if candidate.format_count == 0 {
        return Err(Rejection::NoSurfaceFormats);
    }
    if candidate.present_mode_count == 0 {
        return Err(Rejection::NoPresentModes);
    }

    Ok(families)
}

fn supports_swapchain(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<bool> {
    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .map_err(VulkanError::Api)?
    };

    Ok(extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name()))
}

fn build_candidate(instance: &Instance, info: &PhysicalDeviceInfo, surface: &Surface) -> VulkanResult<DeviceCandidate> {
    let mut families = Vec::with_capacity(info.queue_families.len());
    for (index, family) in info.queue_families.iter().enumerate() {
        families.push(QueueFamilySupport {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present: surface.supports_present(info.handle, index as u32)?,
        });
    }

    let has_swapchain_extension = supports_swapchain(instance, info.handle)?;
    let (format_count, present_mode_count) = if has_swapchain_extension {
        (
            surface.formats(info.handle)?.len(),
            surface.present_modes(info.handle)?.len(),
        )
    } else {
        (0, 0)
    };

    Ok(DeviceCandidate {
        device_type: info.properties.device_type,
        features: info.features,
        families,
        has_swapchain_extension,
        format_count,
        present_mode_count,
    })
}

/// Select the first physical device that can render and present to `surface`
pub fn select_suitable_device(
    instance: &Instance,
    surface: &Surface,
    requirements: &DeviceRequirements,
) -> VulkanResult<(PhysicalDeviceInfo, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };
    if devices.is_empty() {
        return Err(VulkanError::NoSuitableDevice("no Vulkan devices reported".to_string()));
    }

    let candidates = devices.into_iter().map(|handle| {
        let info = PhysicalDeviceInfo::query(instance, handle);
        let candidate = build_candidate(instance, &info, surface);
        (info.name(), info, candidate)
    });
    first_suitable(candidates, requirements)
}

/// Walk devices in order and keep the first one that passes `requirements`
///
/// A device whose capabilities could not be queried is skipped like a rejected one.
fn first_suitable<T>(
    candidates: impl IntoIterator<Item = (String, T, VulkanResult<DeviceCandidate>)>,
    requirements: &DeviceRequirements,
) -> VulkanResult<(T, QueueFamilyIndices)> {
    let mut reasons = Vec::new();
    for (name, device, candidate) in candidates {
        let candidate = match candidate {
            Ok(candidate) => candidate,
            Err(e) => {
                log::warn!("Could not query GPU {name}, skipping it: {e}");
                reasons.push(format!("{name}: query failed ({e})"));
                continue;
            }
        };

        match evaluate_candidate(&candidate, requirements) {
            Ok(families) => return Ok((device, families)),
            Err(rejection) => {
                log::debug!("Skipping GPU {name}: {rejection}");
                reasons.push(format!("{name}: {rejection}"));
            }
        }
    }

    Err(VulkanError::NoSuitableDevice(reasons.join("; ")))
}

/// Select the first physical device with a graphics queue, ignoring presentation
pub fn select_headless(instance: &Instance) -> VulkanResult<(PhysicalDeviceInfo, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

    devices
        .into_iter()
        .map(|handle| PhysicalDeviceInfo::query(instance, handle))
        .find_map(|info| {
            let graphics = info
                .queue_families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
            let graphics = graphics as u32;
            Some((info, QueueFamilyIndices { graphics, present: graphics }))
        })
        .ok_or_else(|| VulkanError::NoSuitableDevice("no device with a graphics queue".to_string()))
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader, present when the extension was enabled
    pub swapchain_loader: Option<khr::Swapchain>,
}

impl LogicalDevice {
    /// Create the logical device with one queue per distinct family
    pub fn new(
        instance: &Instance,
        physical_device: &PhysicalDeviceInfo,
        families: QueueFamilyIndices,
        enabled_features: &vk::PhysicalDeviceFeatures,
        enable_swapchain: bool,
    ) -> VulkanResult<Self> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = if enable_swapchain {
            vec![khr::Swapchain::name().as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(enabled_features);

        let device = unsafe {
            instance
                .create_device(physical_device.handle, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = enable_swapchain.then(|| khr::Swapchain::new(instance, &device));

        log::debug!("Created logical device with {} queue(s)", queue_infos.len());

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceCategory;

    fn family(graphics: bool, present: bool) -> QueueFamilySupport {
        QueueFamilySupport { graphics, present }
    }

    fn discrete_candidate() -> DeviceCandidate {
        DeviceCandidate {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            features: vk::PhysicalDeviceFeatures {
                geometry_shader: vk::TRUE,
                ..Default::default()
            },
            families: vec![family(true, true)],
            has_swapchain_extension: true,
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn test_accepts_matching_discrete_gpu() {
        let families = evaluate_candidate(&discrete_candidate(), &DeviceRequirements::default()).unwrap();
        assert_eq!(families, QueueFamilyIndices { graphics: 0, present: 0 });
        assert_eq!(families.unique(), vec![0]);
    }

    #[test]
    fn test_rejects_wrong_category() {
        let candidate = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..discrete_candidate()
        };
        assert_eq!(
            evaluate_candidate(&candidate, &DeviceRequirements::default()),
            Err(Rejection::WrongCategory(vk::PhysicalDeviceType::INTEGRATED_GPU))
        );

        let relaxed = DeviceRequirements {
            category: DeviceCategory::Any,
            ..Default::default()
        };
        assert!(evaluate_candidate(&candidate, &relaxed).is_ok());
    }

    #[test]
    fn test_rejects_missing_feature() {
        let candidate = DeviceCandidate {
            features: vk::PhysicalDeviceFeatures::default(),
            ..discrete_candidate()
        };
        assert_eq!(
            evaluate_candidate(&candidate, &DeviceRequirements::default()),
            Err(Rejection::MissingFeature(RequiredFeature::GeometryShader))
        );
    }

    #[test]
    fn test_rejects_empty_surface_support() {
        let no_formats = DeviceCandidate {
            format_count: 0,
            ..discrete_candidate()
        };
        assert_eq!(
            evaluate_candidate(&no_formats, &DeviceRequirements::default()),
            Err(Rejection::NoSurfaceFormats)
        );

        let no_modes = DeviceCandidate {
            present_mode_count: 0,
            ..discrete_candidate()
        };
        assert_eq!(
            evaluate_candidate(&no_modes, &DeviceRequirements::default()),
            Err(Rejection::NoPresentModes)
        );

        let no_extension = DeviceCandidate {
            has_swapchain_extension: false,
            ..discrete_candidate()
        };
        assert_eq!(
            evaluate_candidate(&no_extension, &DeviceRequirements::default()),
            Err(Rejection::MissingSwapchainExtension)
        );
    }

    #[test]
    fn test_query_failure_moves_on_to_next_device() {
        let candidates = vec![
            (
                "Lost GPU".to_string(),
                0,
                Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)),
            ),
            ("Good GPU".to_string(), 1, Ok(discrete_candidate())),
        ];

        let (device, families) = first_suitable(candidates, &DeviceRequirements::default()).unwrap();
        assert_eq!(device, 1);
        assert_eq!(families, QueueFamilyIndices { graphics: 0, present: 0 });
    }

    #[test]
    fn test_no_suitable_device_lists_every_reason() {
        let integrated = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            ..discrete_candidate()
        };
        let candidates = vec![
            (
                "Lost GPU".to_string(),
                0,
                Err(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED)),
            ),
            ("Laptop GPU".to_string(), 1, Ok(integrated)),
        ];

        match first_suitable(candidates, &DeviceRequirements::default()) {
            Err(VulkanError::NoSuitableDevice(reasons)) => {
                assert!(reasons.starts_with("Lost GPU: query failed"));
                assert!(reasons.contains("; Laptop GPU: "));
            }
            other => panic!("expected NoSuitableDevice, got {other:?}"),
        }
    }

    #[test]
    fn test_prefers_shared_queue_family() {
        let families = [family(true, false), family(false, true), family(true, true)];
        let chosen = choose_queue_families(&families).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(chosen.is_shared());
    }

    #[test]
    fn test_split_queue_families() {
        let families = [family(false, false), family(true, false), family(false, true)];
        let chosen = choose_queue_families(&families).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 1, present: 2 });
        assert_eq!(chosen.unique(), vec![1, 2]);
    }

    #[test]
    fn test_missing_queue_families() {
        assert_eq!(
            choose_queue_families(&[family(false, true)]),
            Err(Rejection::NoGraphicsQueue)
        );
        assert_eq!(
            choose_queue_families(&[family(true, false)]),
            Err(Rejection::NoPresentQueue)
        );
    }
}
