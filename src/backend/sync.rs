// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One frame in flight, so there is exactly one set. Replaced as a whole
// when the swapchain is rebuilt, a frame abandoned after the fence reset
// would otherwise leave it unsignaled forever.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let raw = &device.device;

        let semaphores = create_each(
            2,
            || unsafe { raw.create_semaphore(&semaphore_info, None) },
            |semaphore| unsafe { raw.destroy_semaphore(semaphore, None) },
        )
        .context("Failed to create frame semaphores")?;
        let (image_available, render_finished) = (semaphores[0], semaphores[1]);

        let in_flight_fence = match Self::signaled_fence(&device) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    raw.destroy_semaphore(render_finished, None);
                    raw.destroy_semaphore(image_available, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
            device,
        })
    }

    // Start signaled so the first frame's wait returns immediately
    fn signaled_fence(device: &VulkanDevice) -> Result<vk::Fence> {
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe { device.device.create_fence(&fence_info, None) }
            .context("Failed to create in-flight fence")
    }
}

/// Create `count` objects; if one fails, the ones already made are released
/// newest first.
fn create_each<T: Copy, E>(
    count: usize,
    mut create: impl FnMut() -> Result<T, E>,
    mut release: impl FnMut(T),
) -> Result<Vec<T>, E> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(object) => created.push(object),
            Err(e) => {
                created.into_iter().rev().for_each(&mut release);
                return Err(e);
            }
        }
    }
    Ok(created)
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_creation_releases_earlier_objects() {
        let mut next = 0;
        let mut released = Vec::new();
        let result = create_each(
            3,
            || {
                next += 1;
                if next == 3 {
                    Err("out of memory")
                } else {
                    Ok(next)
                }
            },
            |object| released.push(object),
        );

        assert_eq!(result, Err("out of memory"));
        assert_eq!(released, vec![2, 1]);
    }

    #[test]
    fn successful_creation_releases_nothing() {
        let mut next = 0;
        let mut released = Vec::new();
        let result = create_each::<_, ()>(
            2,
            || {
                next += 1;
                Ok(next)
            },
            |object| released.push(object),
        );

        assert_eq!(result, Ok(vec![1, 2]));
        assert!(released.is_empty());
    }
}
