// Frame cycle - one rendered frame per loop tick
//
// FRAME FLOW (single frame in flight):
// 1. Wait for the fence of the previous frame
// 2. Reset it
// 3. Acquire the next swapchain image
// 4. Re-record the command buffer for that image
// 5. Submit, signaling the fence when the GPU is done
// 6. Present
//
// A swapchain reported out of date or suboptimal is marked stale and
// rebuilt at the start of the next frame. While the window is minimized
// frames are skipped until the rebuild succeeds.

use crate::backend::error::FrameError;
use crate::backend::swapchain::Acquire;

/// The GPU side of a frame, one method per step
pub trait FrameBackend {
    fn wait_for_fence(&mut self) -> Result<(), FrameError>;
    fn reset_fence(&mut self) -> Result<(), FrameError>;
    fn acquire_image(&mut self) -> Result<Acquire, FrameError>;
    fn record(&mut self, image_index: u32) -> Result<(), FrameError>;
    fn submit(&mut self) -> Result<(), FrameError>;
    /// Returns true when the swapchain should be rebuilt
    fn present(&mut self, image_index: u32) -> Result<bool, FrameError>;
    /// Recreate the swap resources. The fence must be signaled afterwards.
    ///
    /// Returns false, without touching anything, while the surface has no
    /// area to present to (minimized window).
    fn rebuild_swapchain(&mut self) -> Result<bool, FrameError>;
    fn wait_idle(&mut self) -> Result<(), FrameError>;
}

pub struct FrameCycle<B> {
    backend: B,
    stale: bool,
    frames: u64,
}

impl<B: FrameBackend> FrameCycle<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            stale: false,
            frames: 0,
        }
    }

    /// Run one frame. Returns false when nothing was presented.
    pub fn draw_frame(&mut self) -> Result<bool, FrameError> {
        if self.stale {
            // Stay stale until the surface is usable again
            if !self.backend.rebuild_swapchain()? {
                return Ok(false);
            }
            log::info!("Swapchain rebuilt");
            self.stale = false;
        }

        self.backend.wait_for_fence()?;
        self.backend.reset_fence()?;

        let image_index = match self.backend.acquire_image()? {
            // Still presentable, the present result decides about a rebuild
            Acquire::Image { index, .. } => index,
            Acquire::OutOfDate => {
                self.stale = true;
                return Ok(false);
            }
        };

        self.backend.record(image_index)?;
        self.backend.submit()?;

        if self.backend.present(image_index)? {
            self.stale = true;
        }

        self.frames += 1;
        Ok(true)
    }

    /// Block until the GPU is done with everything, before teardown
    pub fn shutdown(&mut self) -> Result<(), FrameError> {
        log::info!("Waiting for device idle");
        self.backend.wait_idle()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait,
        Reset,
        Acquire(Option<u32>),
        Record(u32),
        Submit,
        Present(u32),
        Rebuild,
        /// Rebuild attempted while the surface had no area
        RebuildDeferred,
        WaitIdle,
    }

    /// Swapchain of `image_count` images handed out round robin. The fence is
    /// signaled as soon as work is submitted.
    struct MockBackend {
        calls: Vec<Call>,
        image_count: u32,
        next_image: u32,
        fence_signaled: bool,
        acquire_script: VecDeque<Acquire>,
        present_script: VecDeque<Result<bool, FrameError>>,
        /// Rebuild attempts that find the window minimized
        minimized_for: u32,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image: 0,
                fence_signaled: true,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                minimized_for: 0,
            }
        }

        fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| call(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_fence(&mut self) -> Result<(), FrameError> {
            // A real wait would never return
            assert!(self.fence_signaled, "waited on an unsignaled fence");
            self.calls.push(Call::Wait);
            Ok(())
        }

        fn reset_fence(&mut self) -> Result<(), FrameError> {
            self.fence_signaled = false;
            self.calls.push(Call::Reset);
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<Acquire, FrameError> {
            let acquired = self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                Acquire::Image {
                    index,
                    suboptimal: false,
                }
            });
            let index = match acquired {
                Acquire::Image { index, .. } => Some(index),
                Acquire::OutOfDate => None,
            };
            self.calls.push(Call::Acquire(index));
            Ok(acquired)
        }

        fn record(&mut self, image_index: u32) -> Result<(), FrameError> {
            self.calls.push(Call::Record(image_index));
            Ok(())
        }

        fn submit(&mut self) -> Result<(), FrameError> {
            self.fence_signaled = true;
            self.calls.push(Call::Submit);
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<bool, FrameError> {
            self.calls.push(Call::Present(image_index));
            self.present_script.pop_front().unwrap_or(Ok(false))
        }

        fn rebuild_swapchain(&mut self) -> Result<bool, FrameError> {
            if self.minimized_for > 0 {
                self.minimized_for -= 1;
                self.calls.push(Call::RebuildDeferred);
                return Ok(false);
            }
            self.fence_signaled = true;
            self.next_image = 0;
            self.calls.push(Call::Rebuild);
            Ok(true)
        }

        fn wait_idle(&mut self) -> Result<(), FrameError> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }
    }

    #[test]
    fn each_step_runs_once_per_frame() {
        let mut cycle = FrameCycle::new(MockBackend::new(3));
        let n = 10;
        for _ in 0..n {
            assert!(cycle.draw_frame().unwrap());
        }
        assert_eq!(cycle.frames(), n as u64);

        let mock = cycle.backend();
        assert_eq!(mock.count(|c| *c == Call::Wait), n);
        assert_eq!(mock.count(|c| *c == Call::Reset), n);
        assert_eq!(mock.count(|c| matches!(c, Call::Acquire(_))), n);
        assert_eq!(mock.count(|c| matches!(c, Call::Present(_))), n);
        assert_eq!(mock.count(|c| *c == Call::Rebuild), 0);
    }

    #[test]
    fn steps_run_in_order_and_present_the_acquired_image() {
        let mut cycle = FrameCycle::new(MockBackend::new(3));
        for _ in 0..7 {
            cycle.draw_frame().unwrap();
        }

        for (frame, calls) in cycle.backend().calls.chunks(6).enumerate() {
            let index = frame as u32 % 3;
            assert_eq!(
                calls,
                [
                    Call::Wait,
                    Call::Reset,
                    Call::Acquire(Some(index)),
                    Call::Record(index),
                    Call::Submit,
                    Call::Present(index),
                ]
            );
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_before_next_frame() {
        let mut mock = MockBackend::new(2);
        mock.acquire_script = VecDeque::from([
            Acquire::Image {
                index: 0,
                suboptimal: false,
            },
            Acquire::OutOfDate,
        ]);
        let mut cycle = FrameCycle::new(mock);

        assert!(cycle.draw_frame().unwrap());
        // Fence is left reset here, the rebuild has to hand back a signaled one
        assert!(!cycle.draw_frame().unwrap());
        assert!(cycle.draw_frame().unwrap());

        let calls = &cycle.backend().calls;
        assert_eq!(
            calls[6..],
            [
                Call::Wait,
                Call::Reset,
                Call::Acquire(None),
                Call::Rebuild,
                Call::Wait,
                Call::Reset,
                Call::Acquire(Some(0)),
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
            ]
        );
        assert_eq!(cycle.frames(), 2);
    }

    #[test]
    fn stale_present_rebuilds_once() {
        let mut mock = MockBackend::new(2);
        mock.present_script = VecDeque::from([Ok(false), Ok(true)]);
        let mut cycle = FrameCycle::new(mock);

        for _ in 0..4 {
            assert!(cycle.draw_frame().unwrap());
        }

        let mock = cycle.backend();
        assert_eq!(mock.count(|c| *c == Call::Rebuild), 1);
        let rebuild = mock.calls.iter().position(|c| *c == Call::Rebuild).unwrap();
        assert_eq!(mock.calls[rebuild - 1], Call::Present(1));
        assert_eq!(mock.calls[rebuild + 1], Call::Wait);
    }

    #[test]
    fn minimized_window_skips_frames_until_rebuild_succeeds() {
        let mut mock = MockBackend::new(2);
        mock.acquire_script = VecDeque::from([Acquire::OutOfDate]);
        mock.minimized_for = 3;
        let mut cycle = FrameCycle::new(mock);

        // Out of date, fence left reset
        assert!(!cycle.draw_frame().unwrap());
        for _ in 0..3 {
            assert!(!cycle.draw_frame().unwrap());
        }
        assert!(cycle.draw_frame().unwrap());

        let calls = &cycle.backend().calls;
        assert_eq!(
            calls[..],
            [
                Call::Wait,
                Call::Reset,
                Call::Acquire(None),
                Call::RebuildDeferred,
                Call::RebuildDeferred,
                Call::RebuildDeferred,
                Call::Rebuild,
                Call::Wait,
                Call::Reset,
                Call::Acquire(Some(0)),
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
            ]
        );
        assert_eq!(cycle.frames(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut mock = MockBackend::new(2);
        mock.acquire_script = VecDeque::from([Acquire::Image {
            index: 1,
            suboptimal: true,
        }]);
        let mut cycle = FrameCycle::new(mock);

        assert!(cycle.draw_frame().unwrap());
        assert!(cycle.draw_frame().unwrap());

        let mock = cycle.backend();
        assert_eq!(
            mock.calls[..6],
            [
                Call::Wait,
                Call::Reset,
                Call::Acquire(Some(1)),
                Call::Record(1),
                Call::Submit,
                Call::Present(1),
            ]
        );
        // Present reported nothing, so no rebuild
        assert_eq!(mock.count(|c| *c == Call::Rebuild), 0);
    }

    #[test]
    fn suboptimal_acquire_rebuilds_when_present_asks() {
        let mut mock = MockBackend::new(2);
        mock.acquire_script = VecDeque::from([Acquire::Image {
            index: 0,
            suboptimal: true,
        }]);
        mock.present_script = VecDeque::from([Ok(true)]);
        let mut cycle = FrameCycle::new(mock);

        assert!(cycle.draw_frame().unwrap());
        assert!(cycle.draw_frame().unwrap());

        let mock = cycle.backend();
        assert_eq!(mock.count(|c| *c == Call::Rebuild), 1);
        assert_eq!(mock.calls[6], Call::Rebuild);
    }

    #[test]
    fn other_present_errors_are_fatal() {
        let mut mock = MockBackend::new(2);
        mock.present_script = VecDeque::from([Err(FrameError::Vulkan {
            op: "vkQueuePresentKHR",
            result: vk::Result::ERROR_DEVICE_LOST,
        })]);
        let mut cycle = FrameCycle::new(mock);

        let err = cycle.draw_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Vulkan {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        ));
        assert_eq!(cycle.frames(), 0);
    }

    #[test]
    fn shutdown_waits_for_idle() {
        let mut cycle = FrameCycle::new(MockBackend::new(2));
        cycle.draw_frame().unwrap();
        cycle.shutdown().unwrap();
        assert_eq!(cycle.backend().calls.last(), Some(&Call::WaitIdle));
    }
}
