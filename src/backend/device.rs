// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (capability query + selector)
// - Logical device + graphics / transfer queue creation
// - Memory allocator setup
// - One-shot transfer submissions for uploads

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::capability::{self, AdapterInfo};
use super::selector::{self, REQUIRED_DEVICE_EXTENSIONS};
use super::{Instance, Surface};

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub adapter: AdapterInfo,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub transfer_queue: vk::Queue,
    pub transfer_queue_family: u32,

    // Dropped by hand before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,
    transfer_pool: Mutex<vk::CommandPool>,

    instance: Arc<Instance>,
}

impl VulkanDevice {
    /// Pick an adapter able to present to `surface` and create the device on it
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device");

        let adapters = capability::enumerate_adapters(&instance, surface)?;
        let selection = selector::select(adapters, REQUIRED_DEVICE_EXTENSIONS)
            .context("Error while selecting physical device")?;

        let physical_device = selection.adapter.handle;
        let graphics_queue_family = selection.graphics_family;
        let transfer_queue_family = selection.transfer_family;

        let device = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            transfer_queue_family,
        )?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let transfer_queue = unsafe { device.get_device_queue(transfer_queue_family, 0) };

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let allocator = match Self::create_allocator(&instance, physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(transfer_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let transfer_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(e).context("Error while creating transfer command pool");
            }
        };

        Ok(Arc::new(Self {
            device,
            physical_device,
            adapter: selection.adapter,
            graphics_queue,
            graphics_queue_family,
            transfer_queue,
            transfer_queue_family,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            transfer_pool: Mutex::new(transfer_pool),
            instance,
        }))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        transfer_queue_family: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build()];
        if transfer_queue_family != graphics_queue_family {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(transfer_queue_family)
                    .queue_priorities(&queue_priorities)
                    .build(),
            );
        }

        let extension_names = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|&name| CString::new(name))
            .collect::<Result<Vec<_>, _>>()?;
        let extensions: Vec<_> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .context("Error while creating device")
    }

    fn create_allocator(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Queue family indices a resource shared between graphics and transfer must list
    pub fn queue_family_indices(&self) -> Vec<u32> {
        vec![self.graphics_queue_family, self.transfer_queue_family]
    }

    /// Record commands with `record`, submit them on the transfer queue and
    /// block until the queue is idle.
    pub fn submit_transfer<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let pool = self.transfer_pool.lock();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate transfer command buffer")?;

        let result = (|| -> Result<()> {
            let cmd = command_buffers[0];
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe {
                self.device.begin_command_buffer(cmd, &begin_info)?;
                record(&self.device, cmd);
                self.device.end_command_buffer(cmd)?;

                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
                self.device
                    .queue_submit(self.transfer_queue, &[submit_info.build()], vk::Fence::null())
                    .context("Failed to submit transfer")?;
                self.device
                    .queue_wait_idle(self.transfer_queue)
                    .context("Failed to wait for transfer queue")?;
            }
            Ok(())
        })();

        unsafe {
            self.device.free_command_buffers(*pool, &command_buffers);
        }

        result
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device
                .destroy_command_pool(*self.transfer_pool.get_mut(), None);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
