//! Vulkan renderer
//!
//! [`VulkanRenderer`] pairs a [`FrameScheduler`] with a [`FrameContext`] that
//! owns every GPU object a frame touches. The context implements
//! [`FrameBackend`], so all ordering decisions stay in the scheduler.

use ash::vk;
use std::time::Instant;

use super::initialization::{DeviceContext, Window};
use super::rendering::{CommandPool, CommandRecorder, GraphicsPipeline, Mesh};
use super::resources::{
    write_uniform_and_sampler, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, FrameUniforms,
    GpuBuffer, GpuImage, Sampler, StagingUploader, TextureData, UniformBuffer,
};
use super::scheduling::{FrameBackend, FrameOutcome, FrameScheduler};
use super::state::{
    AcquireOutcome, Fence, FrameSlot, PresentOutcome, Semaphore, SwapchainManager, MAX_FRAMES_IN_FLIGHT,
};
use super::{VulkanError, VulkanResult};
use crate::core::config::{RendererConfig, ShaderConfig};

const UNIFORM_BINDING: u32 = 0;
const TEXTURE_BINDING: u32 = 1;
const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Everything a frame needs on the GPU
///
/// Field order is drop order: per-slot objects first, the device last.
pub struct FrameContext {
    slots: Vec<FrameSlot>,
    _command_pool: CommandPool,
    uniform_buffers: Vec<UniformBuffer<FrameUniforms>>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    pipeline: GraphicsPipeline,
    pipeline_format: vk::Format,
    descriptor_layout: DescriptorSetLayout,
    _sampler: Sampler,
    texture: GpuImage,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    index_count: u32,
    swapchain_manager: SwapchainManager,
    shaders: ShaderConfig,
    clear_color: [f32; 4],
    window_extent: vk::Extent2D,
    started: Instant,
    context: DeviceContext,
}

impl FrameContext {
    /// Create the device, the presentation chain and all frame resources
    pub fn new(window: &Window, config: &RendererConfig, mesh: &Mesh, texture: &TextureData) -> VulkanResult<Self> {
        let context = DeviceContext::new(window, config)?;
        let window_extent = window.framebuffer_extent();
        let swapchain_manager = SwapchainManager::new(&context, window_extent)?;

        let command_pool = CommandPool::new(context.device().clone(), context.queue_families().graphics)?;

        let (vertex_buffer, index_buffer, texture) = {
            let uploader = StagingUploader::new(&context, &command_pool);
            (
                uploader.upload_slice(&mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?,
                uploader.upload_slice(&mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER)?,
                uploader.upload_image(texture, TEXTURE_FORMAT)?,
            )
        };
        let sampler = Sampler::linear(context.device().clone())?;

        let descriptor_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(TEXTURE_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(context.device())?;

        let pipeline = GraphicsPipeline::from_config(
            context.device(),
            swapchain_manager.render_pass().handle(),
            &config.shaders,
            &[descriptor_layout.handle()],
        )?;

        let descriptor_pool =
            DescriptorPool::for_layout(context.device().clone(), &descriptor_layout, MAX_FRAMES_IN_FLIGHT as u32)?;
        let descriptor_sets = descriptor_pool.allocate(&descriptor_layout, MAX_FRAMES_IN_FLIGHT)?;

        let uniform_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| UniformBuffer::<FrameUniforms>::new(&context))
            .collect::<VulkanResult<Vec<_>>>()?;

        for (set, uniform) in descriptor_sets.iter().zip(&uniform_buffers) {
            uniform.write(&FrameUniforms::default())?;
            write_uniform_and_sampler(
                context.device(),
                *set,
                (UNIFORM_BINDING, uniform.handle(), UniformBuffer::<FrameUniforms>::size()),
                (TEXTURE_BINDING, texture.view(), sampler.handle()),
            );
        }

        let slots = command_pool
            .allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?
            .into_iter()
            .map(|command_buffer| FrameSlot::new(context.device(), command_buffer))
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "Renderer ready: {} vertices, {} indices, {} frames in flight",
            mesh.vertices.len(),
            mesh.index_count(),
            MAX_FRAMES_IN_FLIGHT
        );

        let pipeline_format = swapchain_manager.render_pass().color_format();

        Ok(Self {
            slots,
            _command_pool: command_pool,
            uniform_buffers,
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            pipeline,
            pipeline_format,
            descriptor_layout,
            _sampler: sampler,
            texture,
            index_buffer,
            vertex_buffer,
            index_count: mesh.index_count(),
            swapchain_manager,
            shaders: config.shaders.clone(),
            clear_color: config.clear_color,
            window_extent,
            started: Instant::now(),
            context,
        })
    }

    fn slot(&self, slot: usize) -> VulkanResult<&FrameSlot> {
        self.slots.get(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {slot} does not exist"),
        })
    }

    fn update_uniforms(&self, slot: usize, extent: vk::Extent2D) -> VulkanResult<()> {
        let aspect_ratio = extent.width as f32 / extent.height.max(1) as f32;
        let uniforms = FrameUniforms::animated(self.started.elapsed().as_secs_f32(), aspect_ratio);
        self.uniform_buffers
            .get(slot)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No uniform buffer for slot {slot}"),
            })?
            .write(&uniforms)
    }

    /// Device and queues
    pub fn device_context(&self) -> &DeviceContext {
        &self.context
    }

    /// Presentation chain and its framebuffers
    pub fn swapchain_manager(&self) -> &SwapchainManager {
        &self.swapchain_manager
    }

    /// Sampled texture bound at binding 1
    pub fn texture(&self) -> &GpuImage {
        &self.texture
    }
}

impl FrameBackend for FrameContext {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.slot(slot)?.in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_available.handle();
        self.swapchain_manager.swapchain()?.acquire_next_image(semaphore)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.slot(slot)?.in_flight.reset()
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let extent = self.swapchain_manager.swapchain()?.extent();
        let framebuffer = self.swapchain_manager.render_targets()?.get(image_index)?;
        let descriptor_set = *self
            .descriptor_sets
            .get(slot)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("No descriptor set for slot {slot}"),
            })?;

        self.update_uniforms(slot, extent)?;

        let recorder = CommandRecorder::new(self.context.device().clone(), self.slot(slot)?.command_buffer);
        recorder.reset()?;
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        {
            let pass = recorder.begin_render_pass(
                self.swapchain_manager.render_pass().handle(),
                framebuffer,
                render_area,
                &clear_values,
            );
            pass.bind_pipeline(self.pipeline.handle());
            pass.set_viewport(&vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            pass.set_scissor(&render_area);
            pass.bind_vertex_buffers(&[self.vertex_buffer.handle()], &[0]);
            pass.bind_index_buffer(self.index_buffer.handle(), vk::IndexType::UINT16);
            pass.bind_descriptor_sets(self.pipeline.layout(), &[descriptor_set]);
            pass.draw_indexed(self.index_count);
        }

        recorder.end()
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.slot(slot)?;
        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context
                .device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], frame.in_flight.handle())
                .map_err(VulkanError::Api)
        }
    }

    fn rearm_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        // Consumes the acquire signal too, so the semaphore is unsignaled when the slot comes back.
        let frame = self.slot(slot)?;
        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        log::warn!("Re-arming fence for slot {slot} with an empty submission");
        unsafe {
            self.context
                .device()
                .queue_submit(self.context.graphics_queue(), &[submit_info], frame.in_flight.handle())
                .map_err(VulkanError::Api)
        }
    }

    fn replace_slot_sync(&mut self, slot: usize) -> VulkanResult<()> {
        // The old fence may still be owned by a queue operation that never completes.
        self.context.wait_idle()?;
        let device = self.context.device().clone();
        let in_flight = Fence::new(device.clone(), true)?;
        let image_available = Semaphore::new(device)?;

        let frame = self.slots.get_mut(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("Frame slot {slot} does not exist"),
        })?;
        frame.in_flight = in_flight;
        frame.image_available = image_available;
        log::warn!("Replaced fence and image-available semaphore for slot {slot}");
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let wait_semaphore = self.slot(slot)?.render_finished.handle();
        self.swapchain_manager
            .swapchain()?
            .present(self.context.present_queue(), image_index, wait_semaphore)
    }

    fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(false);
        }

        let report = self.swapchain_manager.recreate(&self.context, self.window_extent)?;
        if report.format_changed {
            log::info!("Swapchain format changed, rebuilding graphics pipeline");
        }

        // Compared on every rebuild so a pipeline that failed to build last time is retried.
        let render_pass = self.swapchain_manager.render_pass();
        let (device, shaders, layouts) = (self.context.device(), &self.shaders, [self.descriptor_layout.handle()]);
        refresh_pipeline(&mut self.pipeline, &mut self.pipeline_format, render_pass.color_format(), || {
            GraphicsPipeline::from_config(device, render_pass.handle(), shaders, &layouts)
        })?;
        Ok(true)
    }
}

/// Rebuild `pipeline` when it was built for a different colour format than `target`
///
/// `built_for` only moves to `target` once `build` succeeds.
fn refresh_pipeline<P, F>(pipeline: &mut P, built_for: &mut vk::Format, target: vk::Format, build: F) -> VulkanResult<bool>
where
    F: FnOnce() -> VulkanResult<P>,
{
    if *built_for == target {
        return Ok(false);
    }
    *pipeline = build()?;
    *built_for = target;
    Ok(true)
}

impl Drop for FrameContext {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during renderer teardown: {e}");
        }
    }
}

/// Draws the configured mesh once per [`VulkanRenderer::draw_frame`]
pub struct VulkanRenderer {
    scheduler: FrameScheduler,
    frame: FrameContext,
}

impl VulkanRenderer {
    /// Create a renderer drawing `mesh` textured with `texture`
    pub fn new(window: &Window, config: &RendererConfig, mesh: &Mesh, texture: &TextureData) -> VulkanResult<Self> {
        log::debug!("Creating VulkanRenderer...");
        let frame = FrameContext::new(window, config, mesh, texture)?;

        Ok(Self {
            scheduler: FrameScheduler::new(),
            frame,
        })
    }

    /// Run one frame against a window whose framebuffer is `window_extent` pixels
    pub fn draw_frame(&mut self, window_extent: vk::Extent2D) -> VulkanResult<FrameOutcome> {
        self.frame.window_extent = window_extent;
        self.scheduler.step(&mut self.frame)
    }

    /// Record that the window was resized; handled after the next present
    pub fn mark_framebuffer_resized(&mut self) {
        self.scheduler.mark_framebuffer_resized();
    }

    /// Frame scheduler state
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// GPU resources
    pub fn frame_context(&self) -> &FrameContext {
        &self.frame
    }

    /// Extent of the live swapchain
    pub fn swapchain_extent(&self) -> VulkanResult<vk::Extent2D> {
        Ok(self.frame.swapchain_manager.swapchain()?.extent())
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.frame.context.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_kept_when_format_matches() {
        let mut pipeline = 1u32;
        let mut built_for = vk::Format::B8G8R8A8_SRGB;

        let rebuilt = refresh_pipeline(&mut pipeline, &mut built_for, vk::Format::B8G8R8A8_SRGB, || {
            panic!("pipeline rebuilt for an unchanged format")
        })
        .unwrap();

        assert!(!rebuilt);
        assert_eq!(pipeline, 1);
    }

    #[test]
    fn test_failed_pipeline_build_is_retried_on_next_rebuild() {
        let mut pipeline = 1u32;
        let mut built_for = vk::Format::B8G8R8A8_SRGB;
        let target = vk::Format::R8G8B8A8_UNORM;

        let failed = refresh_pipeline(&mut pipeline, &mut built_for, target, || {
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        });
        assert!(failed.is_err());
        assert_eq!(pipeline, 1);
        assert_eq!(built_for, vk::Format::B8G8R8A8_SRGB);

        // The swapchain format no longer changes, but the pipeline is still stale.
        let rebuilt = refresh_pipeline(&mut pipeline, &mut built_for, target, || Ok(2)).unwrap();
        assert!(rebuilt);
        assert_eq!(pipeline, 2);
        assert_eq!(built_for, target);
    }
}
