// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every object holds an Arc to what it was
// created from, so destruction order follows ownership.

pub mod buffer;
pub mod capability;
pub mod command;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::Instance;
pub use surface::Surface;
pub use swapchain::Swapchain;
