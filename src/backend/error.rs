// Typed errors for the places where callers need to branch
//
// Everything else in the backend returns anyhow::Result with context.

use ash::vk;

/// Why no adapter / queue family could be picked
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No physical device found")]
    NoAdapter,

    #[error("No physical device could be selected")]
    NoSelectableAdapter,

    #[error("No graphics-capable queue family found")]
    NoQueueFamily,
}

/// Per-frame failure. Stale swapchains are not errors, see `swapchain::Acquire`.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("Failed to rebuild swap resources")]
    Rebuild(#[source] anyhow::Error),
}

impl FrameError {
    pub fn vulkan(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| FrameError::Vulkan { op, result }
    }
}
