// GPU buffers backed by the memory allocator
//
// Host-visible buffers are written through their persistent mapping.
// Device-local buffers are filled through a staging buffer copied on the
// transfer queue; the upload blocks until the copy is done.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// Vulkan rejects zero-sized buffers, empty ones still get this much
const MIN_BUFFER_SIZE: vk::DeviceSize = 4;

/// EXCLUSIVE when every listed family is the same one, CONCURRENT otherwise.
/// Returns the distinct families to hand to Vulkan for concurrent sharing.
pub fn sharing_mode(queue_families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let mut families = queue_families.to_vec();
    families.sort_unstable();
    families.dedup();

    if families.len() <= 1 {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families)
    }
}

pub struct Buffer {
    pub buffer: vk::Buffer,
    /// Bytes the caller asked for, may be 0
    size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        queue_families: &[u32],
    ) -> Result<Self> {
        let (sharing, families) = sharing_mode(queue_families);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(MIN_BUFFER_SIZE))
            .usage(usage)
            .sharing_mode(sharing)
            .queue_family_indices(&families);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer {}", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for {}", name));
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator().lock().free(allocation);
            return Err(e).with_context(|| format!("Failed to bind memory for {}", name));
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        })
    }

    /// Device-local buffer holding `data`, filled through a staging copy
    pub fn upload<T: bytemuck::Pod>(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        let buffer = Self::new(
            device,
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            &device.queue_family_indices(),
        )?;

        if size == 0 {
            return Ok(buffer);
        }

        let mut staging = Self::new(
            device,
            &format!("{} staging", name),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &[device.transfer_queue_family],
        )?;
        staging.write(bytes)?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device
            .submit_transfer(|d, cmd| unsafe {
                d.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            })
            .with_context(|| format!("Failed to upload {}", name))?;

        Ok(buffer)
    }

    /// Copy a device-local buffer back to the host
    pub fn read_back(&self) -> Result<Vec<u8>> {
        if self.size == 0 {
            return Ok(Vec::new());
        }

        let staging = Self::new(
            &self.device,
            "readback staging",
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            &[self.device.transfer_queue_family],
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.size,
        };
        self.device
            .submit_transfer(|d, cmd| unsafe {
                d.cmd_copy_buffer(cmd, self.buffer, staging.buffer, &[region]);
            })
            .context("Failed to read back buffer")?;

        staging.read()
    }

    /// Write into a host-visible buffer.
    ///
    /// A size mismatch is logged and the shorter length is copied.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = self.size as usize;
        if bytes.len() != size {
            log::warn!(
                "Data given to buffer has incorrect size ({} bytes for {})",
                bytes.len(),
                size
            );
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        let len = bytes.len().min(size);
        mapped[..len].copy_from_slice(&bytes[..len]);
        Ok(())
    }

    /// Contents of a host-visible buffer
    pub fn read(&self) -> Result<Vec<u8>> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .context("Buffer is not host visible")?;
        Ok(mapped[..self.size as usize].to_vec())
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
