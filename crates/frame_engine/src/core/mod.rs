//! Core engine types shared by every subsystem

pub mod config;

pub use config::{
    DeviceCategory, DeviceRequirements, EngineConfig, RendererConfig, RequiredFeature, ShaderConfig, WindowConfig,
};
