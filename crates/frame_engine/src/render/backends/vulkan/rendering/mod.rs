//! Vulkan rendering components: commands, render pass, pipeline and vertex format

pub mod commands;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;

pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder, LayoutTransition};
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, ShaderModule};
pub use vertex_layout::{Mesh, Vertex, VertexLayout};
