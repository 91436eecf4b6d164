// Renderer - owns every Vulkan object the frame cycle touches
//
// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, the
// reverse of creation.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::HasDisplayHandle;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::command::CommandPool;
use crate::backend::error::FrameError;
use crate::backend::pipeline::Pipeline;
use crate::backend::shader::{self, ShaderStage};
use crate::backend::swapchain::{self, Acquire};
use crate::backend::sync::FrameSync;
use crate::backend::{Instance, Surface, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::frame::FrameBackend;
use crate::mesh::Mesh;

pub struct Renderer {
    sync: FrameSync,
    commands: CommandPool,
    mesh: Mesh,
    pipeline: Pipeline,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<VulkanDevice>,
    window: Arc<Window>,

    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    vertex_code: Vec<u32>,
    fragment_code: Vec<u32>,
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl Renderer {
    /// Initialize all Vulkan resources for `window`.
    ///
    /// 1. Instance and surface
    /// 2. Device (adapter and queue selection)
    /// 3. Swapchain and pipeline
    /// 4. Mesh upload
    /// 5. Command buffer and sync objects
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // Validation only ever in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();

        let instance = Instance::new(&config.window.title, display, enable_validation)?;
        let surface = Surface::new(instance.clone(), &window)?;
        let device = VulkanDevice::new(instance, &surface)?;
        log::info!("Rendering on {:?} {}", device.adapter.class, device.adapter.name);

        let vertex_code = shader::compile_file(&config.shaders.vertex, ShaderStage::Vertex)?;
        let fragment_code = shader::compile_file(&config.shaders.fragment, ShaderStage::Fragment)?;

        let present_mode = config.present_mode();
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            present_mode,
            size.width,
            size.height,
            None,
        )
        .context("Failed to create swapchain")?;

        let pipeline = Pipeline::new(device.clone(), &swapchain, &vertex_code, &fragment_code)
            .context("Failed to create pipeline")?;

        let mesh = Mesh::upload(&device, config.graphics.mesh).context("Failed to upload mesh")?;

        let commands = CommandPool::new(device.clone(), device.graphics_queue_family)?;
        let sync = FrameSync::new(device.clone())?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            sync,
            commands,
            mesh,
            pipeline,
            swapchain,
            surface,
            device,
            window,
            clear_color: config.graphics.clear_color,
            present_mode,
            vertex_code,
            fragment_code,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl FrameBackend for Renderer {
    fn wait_for_fence(&mut self) -> Result<(), FrameError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.sync.in_flight_fence], true, u64::MAX)
        }
        .map_err(FrameError::vulkan("vkWaitForFences"))
    }

    fn reset_fence(&mut self) -> Result<(), FrameError> {
        unsafe { self.device.device.reset_fences(&[self.sync.in_flight_fence]) }
            .map_err(FrameError::vulkan("vkResetFences"))
    }

    fn acquire_image(&mut self) -> Result<Acquire, FrameError> {
        self.swapchain
            .acquire_next_image(u64::MAX, self.sync.image_available)
            .map_err(FrameError::vulkan("vkAcquireNextImageKHR"))
    }

    fn record(&mut self, image_index: u32) -> Result<(), FrameError> {
        let device = &self.device.device;
        let cmd = self.commands.buffer;
        let extent = self.swapchain.extent;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.pipeline.render_pass)
            .framebuffer(self.pipeline.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(FrameError::vulkan("vkResetCommandBuffer"))?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(FrameError::vulkan("vkBeginCommandBuffer"))?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            self.mesh.draw(device, cmd);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .map_err(FrameError::vulkan("vkEndCommandBuffer"))
        }
    }

    fn submit(&mut self) -> Result<(), FrameError> {
        let wait_semaphores = [self.sync.image_available];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [self.commands.buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.in_flight_fence,
            )
        }
        .map_err(FrameError::vulkan("vkQueueSubmit"))
    }

    fn present(&mut self, image_index: u32) -> Result<bool, FrameError> {
        self.swapchain
            .present(
                self.device.graphics_queue,
                image_index,
                &[self.sync.render_finished],
            )
            .map_err(FrameError::vulkan("vkQueuePresentKHR"))
    }

    fn rebuild_swapchain(&mut self) -> Result<bool, FrameError> {
        let size = self.window.inner_size();
        let caps = self
            .surface
            .capabilities(self.device.physical_device)
            .map_err(FrameError::Rebuild)?;
        if !swapchain::is_presentable(swapchain::choose_extent(&caps, size.width, size.height)) {
            log::debug!("Window minimized, swapchain rebuild deferred");
            return Ok(false);
        }

        self.wait_idle()?;

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            self.present_mode,
            size.width,
            size.height,
            Some(&self.swapchain),
        )
        .map_err(FrameError::Rebuild)?;
        let pipeline = Pipeline::new(
            self.device.clone(),
            &swapchain,
            &self.vertex_code,
            &self.fragment_code,
        )
        .map_err(FrameError::Rebuild)?;
        let sync = FrameSync::new(self.device.clone()).map_err(FrameError::Rebuild)?;

        // Old framebuffers go before the image views they point at
        self.pipeline = pipeline;
        self.swapchain = swapchain;
        self.sync = sync;
        Ok(true)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        unsafe { self.device.device.device_wait_idle() }
            .map_err(FrameError::vulkan("vkDeviceWaitIdle"))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.wait_idle() {
            log::error!("{}", e);
        }
    }
}
