//! # Engine Configuration
//!
//! Configuration for the window, the renderer and the device requirements used
//! when picking a GPU. All structures are serde-serializable so they can be read
//! from TOML or RON files through the [`Config`] trait.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

/// # Shader Configuration
///
/// Paths to the two SPIR-V stages the graphics pipeline is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the common output locations so the demo works when launched from
    /// the workspace root or from inside a crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = ["target/shaders/", "../target/shaders/", "../../target/shaders/", "shaders/", "./"];

        let resolve = |file: &str| {
            shader_dirs
                .iter()
                .map(|dir| format!("{dir}{file}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{file}"))
        };

        Self {
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path));
        }
        if !Path::new(&self.fragment_shader_path).exists() {
            return Err(format!("Fragment shader not found: {}", self.fragment_shader_path));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("triangle.vert.spv", "triangle.frag.spv")
    }
}

/// Physical device category a GPU must report to be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceCategory {
    /// Dedicated GPU
    #[default]
    DiscreteGpu,
    /// GPU integrated with the CPU
    IntegratedGpu,
    /// GPU exposed through a virtualization layer
    VirtualGpu,
    /// Software rasterizer
    Cpu,
    /// Accept any category
    Any,
}

impl DeviceCategory {
    /// Whether a reported device type satisfies this category
    pub fn accepts(self, device_type: vk::PhysicalDeviceType) -> bool {
        match self {
            Self::DiscreteGpu => device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
            Self::IntegratedGpu => device_type == vk::PhysicalDeviceType::INTEGRATED_GPU,
            Self::VirtualGpu => device_type == vk::PhysicalDeviceType::VIRTUAL_GPU,
            Self::Cpu => device_type == vk::PhysicalDeviceType::CPU,
            Self::Any => true,
        }
    }
}

/// Hardware feature a GPU must support to be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequiredFeature {
    /// `geometryShader`
    #[default]
    GeometryShader,
    /// `tessellationShader`
    TessellationShader,
    /// `samplerAnisotropy`
    SamplerAnisotropy,
    /// `fillModeNonSolid`
    FillModeNonSolid,
    /// No feature required
    None,
}

impl RequiredFeature {
    /// Whether the queried feature set reports this feature
    pub fn is_supported(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        match self {
            Self::GeometryShader => features.geometry_shader == vk::TRUE,
            Self::TessellationShader => features.tessellation_shader == vk::TRUE,
            Self::SamplerAnisotropy => features.sampler_anisotropy == vk::TRUE,
            Self::FillModeNonSolid => features.fill_mode_non_solid == vk::TRUE,
            Self::None => true,
        }
    }

    /// Build the feature set to enable on the logical device
    ///
    /// Only the required feature is switched on, and only if the device
    /// reported it in `supported`.
    pub fn enabled_features(self, supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
        let mut enabled = vk::PhysicalDeviceFeatures::default();
        if !self.is_supported(supported) {
            return enabled;
        }
        match self {
            Self::GeometryShader => enabled.geometry_shader = vk::TRUE,
            Self::TessellationShader => enabled.tessellation_shader = vk::TRUE,
            Self::SamplerAnisotropy => enabled.sampler_anisotropy = vk::TRUE,
            Self::FillModeNonSolid => enabled.fill_mode_non_solid = vk::TRUE,
            Self::None => {}
        }
        enabled
    }
}

/// Requirements a physical device must meet to be picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRequirements {
    /// Required device category
    pub category: DeviceCategory,
    /// Required hardware feature
    pub feature: RequiredFeature,
}

impl DeviceRequirements {
    /// Accept any device with a graphics queue, no feature required
    pub const fn any() -> Self {
        Self {
            category: DeviceCategory::Any,
            feature: RequiredFeature::None,
        }
    }
}

/// Window creation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Engine".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// # Renderer Configuration
///
/// Configuration specific to the Vulkan backend: application metadata,
/// validation, clear colour, shaders and device requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Colour the render pass clears to
    pub clear_color: [f32; 4],
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Device selection requirements
    pub device: DeviceRequirements,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            enable_validation: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
            device: DeviceRequirements::default(),
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set device selection requirements
    pub const fn with_device_requirements(mut self, device: DeviceRequirements) -> Self {
        self.device = device;
        self
    }

    /// Enable or disable validation layers
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation should be requested, defaulting to debug builds
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err("Clear color must be finite".to_string());
        }
        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Frame Engine Application")
    }
}

/// # Engine Configuration
///
/// Top-level configuration read by the demo binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
}

impl EngineConfig {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("Window size must be non-zero".to_string()));
        }
        self.renderer.validate().map_err(ConfigError::Invalid)
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [window]
            title = "resize test"
            width = 800
            height = 600

            [renderer.device]
            category = "Any"
            feature = "None"
        "#;

        let config = EngineConfig::from_str_with_format(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.window.title, "resize test");
        assert_eq!(config.window.width, 800);
        assert!(config.window.resizable);
        assert_eq!(config.renderer.device, DeviceRequirements::any());
        assert_eq!(config.renderer.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_window_size_rejected() {
        let mut config = EngineConfig::default();
        config.window.width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_requirements_match_discrete_geometry() {
        let requirements = DeviceRequirements::default();
        assert!(requirements.category.accepts(vk::PhysicalDeviceType::DISCRETE_GPU));
        assert!(!requirements.category.accepts(vk::PhysicalDeviceType::INTEGRATED_GPU));

        let mut features = vk::PhysicalDeviceFeatures::default();
        assert!(!requirements.feature.is_supported(&features));
        features.geometry_shader = vk::TRUE;
        assert!(requirements.feature.is_supported(&features));
    }

    #[test]
    fn test_unsupported_feature_is_never_enabled() {
        let supported = vk::PhysicalDeviceFeatures::default();
        let enabled = RequiredFeature::SamplerAnisotropy.enabled_features(&supported);
        assert_eq!(enabled.sampler_anisotropy, vk::FALSE);

        let supported = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        let enabled = RequiredFeature::SamplerAnisotropy.enabled_features(&supported);
        assert_eq!(enabled.sampler_anisotropy, vk::TRUE);
        assert_eq!(enabled.geometry_shader, vk::FALSE);
    }
}
