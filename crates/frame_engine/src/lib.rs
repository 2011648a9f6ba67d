//! # Frame Engine
//!
//! Frame synchronization and swapchain lifecycle for a Vulkan renderer.
//!
//! ## Features
//!
//! - **Device selection**: queue family and feature negotiation against a surface
//! - **Swapchain lifecycle**: negotiation plus a fixed five-step recreation
//! - **Frame scheduling**: two frames in flight, fence-guarded slot reuse
//! - **Staging uploads**: vertex, index and texture data in device-local memory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frame_engine::prelude::*;
//!
//! fn main() -> Result<(), EngineError> {
//!     frame_engine::foundation::logging::init();
//!
//!     let mesh = Mesh::new(
//!         vec![
//!             Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0], [0.5, 0.0]),
//!             Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0], [1.0, 1.0]),
//!             Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
//!         ],
//!         vec![0, 1, 2],
//!     )?;
//!
//!     let mut engine = Engine::new(EngineConfig::default(), &mesh)?;
//!     engine.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

/// Configuration file loading and saving
pub mod config;

// Core engine modules
pub mod core;

pub mod foundation;
pub mod render;

mod engine;

pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::{DeviceRequirements, EngineConfig, RendererConfig, ShaderConfig, WindowConfig},
        render::{FrameCounters, FrameOutcome, Mesh, TextureData, Vertex},
        Engine, EngineError,
    };
}
