// Command pool for the graphics queue
//
// Holds the single reusable command buffer the frame loop re-records.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>, queue_family: u32) -> Result<Self> {
        // RESET: the command buffer is reset and re-recorded every frame
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Error while creating command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Error while creating command buffer");
            }
        };

        Ok(Self {
            pool,
            buffer,
            device,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees the command buffer
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
