// Frame slot ring - bounded frames in flight
//
// N slots used round-robin. A slot's command buffer may only be rewound once
// the CPU has seen its fence signaled, so at most N frames are ever queued
// on the GPU. That fence wait in begin_frame is the only backpressure.
//
//   Idle ──begin──> Recording ──submit──> Submitted ──fence observed──> Idle

use ash::vk;

/// Number of frame slots. Two lets the CPU record frame N+1 while the GPU
/// executes frame N.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled; safe to reuse.
    Idle,
    /// Fence reset, commands being written.
    Recording,
    /// Handed to the queue; the fence signals when the GPU is done.
    Submitted,
}

/// Per-slot recording context and sync objects.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when all work submitted from this slot has finished.
    pub fence: vk::Fence,
    /// Signaled when the swapchain image acquired for this slot is writable.
    pub image_available: vk::Semaphore,
    state: SlotState,
}

impl FrameSlot {
    /// Wrap freshly created handles. The fence must be created signaled.
    pub fn new(
        command_pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
        image_available: vk::Semaphore,
    ) -> Self {
        Self {
            command_pool,
            command_buffer,
            fence,
            image_available,
            state: SlotState::Idle,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// The fence was observed signaled.
    pub(crate) fn mark_idle(&mut self) {
        self.state = SlotState::Idle;
    }

    pub(crate) fn mark_recording(&mut self) {
        debug_assert_eq!(self.state, SlotState::Idle, "slot reused before its fence was observed");
        self.state = SlotState::Recording;
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.state = SlotState::Submitted;
    }
}

/// Fixed ring of frame slots with a round-robin cursor.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    /// Build a ring from pre-created slots; the cursor starts at 0.
    pub fn new(slots: Vec<FrameSlot>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, current: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the active slot.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Move to the next slot: `(current + 1) mod N`.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn slot(n: u64) -> FrameSlot {
        FrameSlot::new(
            vk::CommandPool::from_raw(n),
            vk::CommandBuffer::from_raw(n + 100),
            vk::Fence::from_raw(n + 200),
            vk::Semaphore::from_raw(n + 300),
        )
    }

    #[test]
    fn test_frames_in_flight_is_double_buffered() {
        assert_eq!(FRAMES_IN_FLIGHT, 2);
    }

    #[test]
    fn test_cursor_wraps_mod_n() {
        let mut ring = FrameRing::new((0..FRAMES_IN_FLIGHT as u64).map(slot).collect());

        for m in 0..7 {
            assert_eq!(ring.current_index(), m % FRAMES_IN_FLIGHT);
            ring.advance();
        }
    }

    #[test]
    fn test_current_follows_cursor() {
        let mut ring = FrameRing::new(vec![slot(1), slot(2), slot(3)]);
        assert_eq!(ring.current().fence, vk::Fence::from_raw(201));
        ring.advance();
        ring.advance();
        assert_eq!(ring.current().fence, vk::Fence::from_raw(203));
        ring.advance();
        assert_eq!(ring.current().fence, vk::Fence::from_raw(201));
        assert_eq!(ring.len(), 3);
        assert!(ring.slot(3).is_none());
    }

    #[test]
    fn test_slot_state_cycle() {
        let mut slot = slot(1);
        assert_eq!(slot.state(), SlotState::Idle);
        slot.mark_recording();
        assert_eq!(slot.state(), SlotState::Recording);
        slot.mark_submitted();
        assert_eq!(slot.state(), SlotState::Submitted);
        slot.mark_idle();
        assert_eq!(slot.state(), SlotState::Idle);
    }
}
