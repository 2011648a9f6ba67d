//! Frame scheduling
//!
//! [`FrameScheduler::step`] drives one frame through a fixed ring of slots:
//! wait for the slot's fence, acquire an image, reset the fence, record,
//! submit, present, then advance. GPU work goes through a [`FrameBackend`] so
//! the ordering rules can be exercised without a device.

use crate::render::backends::vulkan::state::swapchain::{AcquireOutcome, PresentOutcome};
use crate::render::backends::vulkan::state::sync::MAX_FRAMES_IN_FLIGHT;
use crate::render::backends::vulkan::VulkanResult;

/// GPU operations the scheduler sequences
///
/// `slot` is always below [`MAX_FRAMES_IN_FLIGHT`].
pub trait FrameBackend {
    /// Block without timeout until the slot's in-flight fence is signaled
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Return the slot's fence to unsignaled
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Reset and re-record the slot's command buffer for `image_index`
    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Submit the slot's commands, signaling render-finished and the fence
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Signal the slot's fence without drawing, after a failed record or submit
    fn rearm_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Swap the slot's fence and image-available semaphore for fresh ones
    ///
    /// The new fence starts signaled. Used when re-arming failed.
    fn replace_slot_sync(&mut self, slot: usize) -> VulkanResult<()>;

    /// Present `image_index` once the slot's render-finished semaphore is signaled
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;

    /// Rebuild the swapchain and its render targets
    ///
    /// Returns `false` when rebuilding has to wait, e.g. the window has no area.
    fn recreate_swapchain(&mut self) -> VulkanResult<bool>;
}

/// CPU-side phase of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameSlotState {
    /// Not being worked on
    #[default]
    Idle,
    /// Waiting for or acquiring a swapchain image
    Acquiring,
    /// Command buffer is being recorded
    Recording,
    /// Work handed to the graphics queue and possibly still running
    Submitted,
    /// Image handed to the presentation engine
    Presenting,
}

/// What one call to [`FrameScheduler::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was submitted and the image handed to presentation
    Presented {
        /// Swapchain image used
        image_index: u32,
        /// Whether the chain was rebuilt after presenting
        recreated: bool,
    },
    /// The chain was out of date; nothing was drawn and the slot did not advance
    Skipped,
}

/// Running totals kept by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCounters {
    /// Frames whose image reached the presentation engine
    pub frames_presented: u64,
    /// Frames dropped because acquisition reported out of date
    pub frames_skipped: u64,
    /// Successful swapchain rebuilds
    pub recreations: u64,
}

/// Sequences frames across the in-flight slots
#[derive(Debug, Default)]
pub struct FrameScheduler {
    current_slot: usize,
    framebuffer_resized: bool,
    recreation_pending: bool,
    unarmed: [bool; MAX_FRAMES_IN_FLIGHT],
    states: [FrameSlotState; MAX_FRAMES_IN_FLIGHT],
    counters: FrameCounters,
}

impl FrameScheduler {
    /// Start at slot 0 with every slot idle
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that the window's framebuffer changed size
    ///
    /// Acted on after the next present, never mid-frame.
    pub fn mark_framebuffer_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Slot the next step will use
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Phase of a slot
    pub fn slot_state(&self, slot: usize) -> Option<FrameSlotState> {
        self.states.get(slot).copied()
    }

    /// Whether a resize is waiting to be handled
    pub fn framebuffer_resized(&self) -> bool {
        self.framebuffer_resized
    }

    /// Whether a rebuild was requested but has not succeeded yet
    pub fn recreation_pending(&self) -> bool {
        self.recreation_pending
    }

    /// Whether a slot's fence is known never to signal, so its next wait is skipped
    pub fn slot_unarmed(&self, slot: usize) -> bool {
        self.unarmed.get(slot).copied().unwrap_or(false)
    }

    /// Running totals
    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    /// Run one frame
    pub fn step<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VulkanResult<FrameOutcome> {
        if self.recreation_pending && !self.recreate(backend)? {
            return Ok(FrameOutcome::Skipped);
        }

        let slot = self.current_slot;
        self.states[slot] = FrameSlotState::Acquiring;

        let waited = if self.unarmed[slot] {
            log::debug!("Slot {slot} has no pending fence signal, skipping its wait");
            Ok(())
        } else {
            backend.wait_for_slot(slot)
        };
        let acquired = waited.and_then(|()| backend.acquire_image(slot));
        let image_index = match acquired {
            Ok(AcquireOutcome::Acquired { image_index, suboptimal }) => {
                if suboptimal {
                    log::trace!("Acquired image {image_index} from a suboptimal swapchain");
                }
                image_index
            }
            Ok(AcquireOutcome::OutOfDate) => {
                // The fence is untouched, so the next wait on this slot still returns.
                self.states[slot] = FrameSlotState::Idle;
                self.counters.frames_skipped += 1;
                log::debug!("Swapchain out of date on acquire, skipping frame");
                self.recreate(backend)?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => {
                self.states[slot] = FrameSlotState::Idle;
                return Err(e);
            }
        };

        if let Err(e) = backend.reset_slot_fence(slot) {
            self.states[slot] = FrameSlotState::Idle;
            return Err(e);
        }
        self.unarmed[slot] = false;

        self.states[slot] = FrameSlotState::Recording;
        let submitted = backend
            .record_commands(slot, image_index)
            .and_then(|()| backend.submit(slot));
        if let Err(e) = submitted {
            log::error!("Frame on slot {slot} failed before reaching the queue: {e}");
            self.recover_unsubmitted_slot(backend, slot);
            // The acquired image is never presented; only a rebuild gives it back.
            self.recreation_pending = true;
            self.states[slot] = FrameSlotState::Idle;
            self.advance();
            return Err(e);
        }

        self.states[slot] = FrameSlotState::Presenting;
        let presented = backend.present(slot, image_index);
        self.states[slot] = FrameSlotState::Submitted;
        self.advance();

        let outcome = presented?;
        if outcome != PresentOutcome::OutOfDate {
            self.counters.frames_presented += 1;
        }

        let resized = std::mem::take(&mut self.framebuffer_resized);
        let recreated = if outcome.needs_recreation() || resized {
            log::debug!("Rebuilding swapchain after present ({outcome:?}, resized: {resized})");
            self.recreate(backend)?
        } else {
            false
        };

        Ok(FrameOutcome::Presented { image_index, recreated })
    }

    /// Leave a slot whose fence was reset but never submitted in a state its next wait can pass
    fn recover_unsubmitted_slot<B: FrameBackend + ?Sized>(&mut self, backend: &mut B, slot: usize) {
        let Err(rearm) = backend.rearm_slot_fence(slot) else {
            return;
        };
        log::error!("Failed to re-arm fence for slot {slot}: {rearm}");

        if let Err(replace) = backend.replace_slot_sync(slot) {
            log::error!("Failed to replace sync objects for slot {slot}: {replace}");
            self.unarmed[slot] = true;
        }
    }

    fn advance(&mut self) {
        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;
    }

    fn recreate<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> VulkanResult<bool> {
        self.recreation_pending = true;
        if backend.recreate_swapchain()? {
            self.recreation_pending = false;
            self.counters.recreations += 1;
            Ok(true)
        } else {
            log::debug!("Swapchain rebuild deferred");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::VulkanError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Rearm(usize),
        Replace(usize),
        Present(usize, u32),
        Recreate,
    }

    /// Models fences well enough to catch a wait that could never return
    struct MockBackend {
        calls: Vec<Call>,
        fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
        fence_pending: [bool; MAX_FRAMES_IN_FLIGHT],
        acquire_results: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        next_image: u32,
        image_count: u32,
        fail_submit: bool,
        fail_rearm: bool,
        fail_replace: bool,
        defer_recreation: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
                fence_pending: [false; MAX_FRAMES_IN_FLIGHT],
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                next_image: 0,
                image_count: 3,
                fail_submit: false,
                fail_rearm: false,
                fail_replace: false,
                defer_recreation: false,
            }
        }

        fn position(&self, call: &Call) -> Option<usize> {
            self.calls.iter().position(|c| c == call)
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Wait(slot));
            if self.fence_pending[slot] {
                self.fence_pending[slot] = false;
                self.fence_signaled[slot] = true;
            }
            assert!(self.fence_signaled[slot], "wait on slot {slot} would block forever");
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Reset(slot));
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            assert!(!self.fence_pending[slot], "recording slot {slot} while its work may still run");
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot));
            if self.fail_submit {
                return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
            }
            self.fence_pending[slot] = true;
            Ok(())
        }

        fn rearm_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Rearm(slot));
            if self.fail_rearm {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.fence_pending[slot] = true;
            Ok(())
        }

        fn replace_slot_sync(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Replace(slot));
            if self.fail_replace {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.fence_pending[slot] = false;
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_results.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
            self.calls.push(Call::Recreate);
            Ok(!self.defer_recreation)
        }
    }

    #[test]
    fn test_normal_frame_order() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();

        let outcome = scheduler.step(&mut backend).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                recreated: false
            }
        );
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.slot_state(0), Some(FrameSlotState::Submitted));
        assert_eq!(scheduler.slot_state(1), Some(FrameSlotState::Idle));
    }

    #[test]
    fn test_slots_cycle_and_fences_are_waited_before_reuse() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();

        for _ in 0..6 {
            scheduler.step(&mut backend).unwrap();
        }

        let slots: Vec<usize> = backend
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Submit(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(scheduler.counters().frames_presented, 6);
    }

    #[test]
    fn test_out_of_date_acquire_skips_without_touching_fence() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);

        let outcome = scheduler.step(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(backend.calls, vec![Call::Wait(0), Call::Acquire(0), Call::Recreate]);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.counters().frames_skipped, 1);
        assert_eq!(scheduler.counters().recreations, 1);

        // The next frame reuses slot 0 and proceeds normally.
        backend.calls.clear();
        let outcome = scheduler.step(&mut backend).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { recreated: false, .. }));
        assert_eq!(backend.calls.first(), Some(&Call::Wait(0)));
        assert!(backend.calls.contains(&Call::Present(0, 0)));
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_continues() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.acquire_results.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });

        let outcome = scheduler.step(&mut backend).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 2,
                recreated: false
            }
        );
        assert!(!backend.calls.contains(&Call::Recreate));
    }

    #[test]
    fn test_suboptimal_present_recreates_after_presenting() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.present_results.push_back(PresentOutcome::Suboptimal);

        let outcome = scheduler.step(&mut backend).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                image_index: 0,
                recreated: true
            }
        );
        let present = backend.position(&Call::Present(0, 0)).unwrap();
        let recreate = backend.position(&Call::Recreate).unwrap();
        assert!(present < recreate);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.counters().frames_presented, 1);
    }

    #[test]
    fn test_out_of_date_present_recreates_and_advances() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.present_results.push_back(PresentOutcome::OutOfDate);

        let outcome = scheduler.step(&mut backend).unwrap();

        assert!(matches!(outcome, FrameOutcome::Presented { recreated: true, .. }));
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.counters().frames_presented, 0);
    }

    #[test]
    fn test_resize_flag_handled_after_present_and_cleared() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        scheduler.mark_framebuffer_resized();

        let outcome = scheduler.step(&mut backend).unwrap();

        assert!(matches!(outcome, FrameOutcome::Presented { recreated: true, .. }));
        assert_eq!(backend.calls.last(), Some(&Call::Recreate));
        assert!(backend.position(&Call::Acquire(0)).unwrap() < backend.position(&Call::Recreate).unwrap());
        assert!(!scheduler.framebuffer_resized());
        assert_eq!(scheduler.current_slot(), 1);

        backend.calls.clear();
        scheduler.step(&mut backend).unwrap();
        assert!(!backend.calls.contains(&Call::Recreate));
    }

    #[test]
    fn test_submit_failure_rearms_fence_and_advances() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.fail_submit = true;

        assert!(scheduler.step(&mut backend).is_err());
        assert!(backend.calls.contains(&Call::Rearm(0)));
        assert!(!backend.calls.contains(&Call::Replace(0)));
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.slot_state(0), Some(FrameSlotState::Idle));
        // The acquired image was never presented, so the chain has to be rebuilt to get it back.
        assert!(scheduler.recreation_pending());

        // Slot 0 comes round again; the mock panics if its wait could never return.
        backend.fail_submit = false;
        backend.calls.clear();
        scheduler.step(&mut backend).unwrap();
        assert_eq!(backend.calls.first(), Some(&Call::Recreate));
        assert!(!scheduler.recreation_pending());
        scheduler.step(&mut backend).unwrap();
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn test_failed_rearm_replaces_slot_sync() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.fail_submit = true;
        backend.fail_rearm = true;

        assert!(scheduler.step(&mut backend).is_err());
        let rearm = backend.position(&Call::Rearm(0)).unwrap();
        let replace = backend.position(&Call::Replace(0)).unwrap();
        assert!(rearm < replace);
        assert!(!scheduler.slot_unarmed(0));

        backend.fail_submit = false;
        backend.fail_rearm = false;
        for _ in 0..4 {
            scheduler.step(&mut backend).unwrap();
        }
        assert_eq!(scheduler.counters().frames_presented, 4);
    }

    #[test]
    fn test_unrecoverable_fence_skips_next_wait() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.fail_submit = true;
        backend.fail_rearm = true;
        backend.fail_replace = true;

        assert!(scheduler.step(&mut backend).is_err());
        assert!(scheduler.slot_unarmed(0));

        backend.fail_submit = false;
        backend.fail_rearm = false;
        backend.fail_replace = false;
        backend.calls.clear();

        // Slot 1, then slot 0 again without blocking on its dead fence.
        scheduler.step(&mut backend).unwrap();
        scheduler.step(&mut backend).unwrap();
        assert!(backend.calls.contains(&Call::Wait(1)));
        assert!(!backend.calls.contains(&Call::Wait(0)));
        assert!(backend.calls.contains(&Call::Submit(0)));
        assert!(!scheduler.slot_unarmed(0));

        // Once resubmitted, slot 0 is waited on normally.
        scheduler.step(&mut backend).unwrap();
        backend.calls.clear();
        scheduler.step(&mut backend).unwrap();
        assert_eq!(backend.calls.first(), Some(&Call::Wait(0)));
    }

    #[test]
    fn test_deferred_recreation_is_retried_next_step() {
        let mut scheduler = FrameScheduler::new();
        let mut backend = MockBackend::new();
        backend.defer_recreation = true;
        backend.acquire_results.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(scheduler.step(&mut backend).unwrap(), FrameOutcome::Skipped);
        assert!(scheduler.recreation_pending());

        backend.calls.clear();
        assert_eq!(scheduler.step(&mut backend).unwrap(), FrameOutcome::Skipped);
        assert_eq!(backend.calls, vec![Call::Recreate]);

        backend.defer_recreation = false;
        backend.calls.clear();
        let outcome = scheduler.step(&mut backend).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
        assert_eq!(backend.calls.first(), Some(&Call::Recreate));
        assert!(!scheduler.recreation_pending());
        assert_eq!(scheduler.counters().recreations, 1);
    }
}
