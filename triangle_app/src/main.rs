//! Triangle demo application
//!
//! Draws a textured, rotating quad to exercise the frame loop: resize the
//! window, minimize it or drag it between monitors to drive swapchain rebuilds.

use frame_engine::config::Config;
use frame_engine::prelude::*;

const CONFIG_PATH: &str = "triangle_app.toml";

fn quad() -> Result<Mesh, EngineError> {
    let vertices = vec![
        Vertex::new([-0.5, -0.5], [1.0, 0.2, 0.2], [0.0, 0.0]),
        Vertex::new([0.5, -0.5], [0.2, 1.0, 0.2], [1.0, 0.0]),
        Vertex::new([0.5, 0.5], [0.2, 0.2, 1.0], [1.0, 1.0]),
        Vertex::new([-0.5, 0.5], [1.0, 1.0, 0.2], [0.0, 1.0]),
    ];
    Ok(Mesh::new(vertices, vec![0, 1, 2, 2, 3, 0])?)
}

fn main() -> Result<(), EngineError> {
    frame_engine::foundation::logging::init();

    log::info!("Starting triangle demo...");
    let config = EngineConfig::load_or_default(CONFIG_PATH)?;
    log::debug!(
        "Shaders: {} / {}",
        config.renderer.shaders.vertex_shader_path,
        config.renderer.shaders.fragment_shader_path
    );

    let texture = TextureData::checkerboard(128, 16, [255, 255, 255, 255], [40, 40, 40, 255]);
    let mut engine = Engine::with_texture(config, &quad()?, &texture)?;

    let counters = engine.run()?;
    log::info!("Presented {} frames", counters.frames_presented);
    Ok(())
}
