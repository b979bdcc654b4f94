// In-memory device and swapchain for frame-loop tests
//
// Records every call as an Event instead of touching a GPU. Fences follow a
// tiny model: created signaled, unsignaled by submit, and "completed" by the
// next wait unless the test has hung them.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};

use super::{
    CommandRecorder, DisplayImage, FrameSlot, FrameSubmit, GpuDevice, ImageBarrier, ImageState,
    PresentTarget, RenderTarget,
};
use crate::error::{FrameError, FrameResult};
use crate::lifetime::{LifetimeStack, ResourceKind, Teardown};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommands(vk::CommandBuffer),
    BeginCommands(vk::CommandBuffer),
    EndCommands(vk::CommandBuffer),
    Barrier(vk::CommandBuffer, ImageBarrier),
    Clear(vk::CommandBuffer, vk::Image),
    Blit { src: vk::Image, dst: vk::Image },
    BindPipeline(vk::Pipeline),
    BindDescriptorSet(vk::PipelineLayout, vk::DescriptorSet),
    Dispatch(u32, u32, u32),
    Submit(FrameSubmit),
    WaitIdle,
}

pub struct MockDevice {
    events: RefCell<Vec<Event>>,
    /// fence -> signaled
    fences: RefCell<HashMap<vk::Fence, bool>>,
    /// Fences whose submitted work never completes.
    hung: RefCell<HashSet<vk::Fence>>,
    fail_submit: Cell<Option<vk::Result>>,
    lifetime: RefCell<LifetimeStack>,
    next_handle: Cell<u64>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            fences: RefCell::new(HashMap::new()),
            hung: RefCell::new(HashSet::new()),
            fail_submit: Cell::new(None),
            lifetime: RefCell::new(LifetimeStack::new()),
            next_handle: Cell::new(0x1000),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Pending teardown kinds, next to run first.
    pub fn pending_teardown(&self) -> Vec<ResourceKind> {
        self.lifetime.borrow().pending().collect()
    }

    /// Work submitted with `fence` from now on never finishes.
    pub fn hang_fence(&self, fence: vk::Fence) {
        self.hung.borrow_mut().insert(fence);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.fail_submit.set(Some(result));
    }

    fn handle<H: Handle>(&self) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        H::from_raw(raw)
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl GpuDevice for MockDevice {
    fn create_render_target(&self, extent: vk::Extent2D) -> FrameResult<RenderTarget> {
        let target = RenderTarget {
            image: self.handle(),
            view: self.handle(),
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            state: ImageState::UNDEFINED,
        };
        self.defer(Teardown::Image {
            image: target.image,
            allocation: None,
        });
        self.defer(Teardown::ImageView(target.view));
        Ok(target)
    }

    fn create_frame_slot(&self) -> FrameResult<FrameSlot> {
        let slot = FrameSlot::new(self.handle(), self.handle(), self.handle(), self.handle());
        self.fences.borrow_mut().insert(slot.fence, true);
        self.defer(Teardown::CommandPool(slot.command_pool));
        self.defer(Teardown::Fence(slot.fence));
        self.defer(Teardown::Semaphore(slot.image_available));
        Ok(slot)
    }

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        let semaphore = self.handle();
        self.defer(Teardown::Semaphore(semaphore));
        Ok(semaphore)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()> {
        self.record(Event::WaitFence(fence));
        let mut fences = self.fences.borrow_mut();
        let signaled = fences.entry(fence).or_insert(true);
        if !*signaled {
            if self.hung.borrow().contains(&fence) {
                return Err(FrameError::FenceTimeout { timeout_ns });
            }
            // The GPU finishes while we wait
            *signaled = true;
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> FrameResult<()> {
        let mut fences = self.fences.borrow_mut();
        assert_eq!(fences.get(&fence), Some(&true), "reset of an unsignaled fence");
        fences.insert(fence, false);
        self.record(Event::ResetFence(fence));
        Ok(())
    }

    fn submit(&self, submit: &FrameSubmit) -> FrameResult<()> {
        if let Some(result) = self.fail_submit.take() {
            return Err(FrameError::device("vkQueueSubmit2")(result));
        }
        assert_eq!(
            self.fences.borrow().get(&submit.fence),
            Some(&false),
            "submit with a fence that was not reset"
        );
        self.record(Event::Submit(*submit));
        Ok(())
    }

    fn wait_idle(&self) -> FrameResult<()> {
        self.record(Event::WaitIdle);
        Ok(())
    }

    fn defer(&self, action: Teardown) {
        self.lifetime.borrow_mut().push(action);
    }
}

impl CommandRecorder for MockDevice {
    fn reset_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        self.record(Event::ResetCommands(cmd));
        Ok(())
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        self.record(Event::BeginCommands(cmd));
        Ok(())
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        self.record(Event::EndCommands(cmd));
        Ok(())
    }

    fn image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.record(Event::Barrier(cmd, *barrier));
    }

    fn clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, _color: [f32; 4]) {
        self.record(Event::Clear(cmd, image));
    }

    fn blit_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_extent: vk::Extent3D,
        dst: vk::Image,
        _dst_extent: vk::Extent3D,
    ) {
        self.record(Event::Blit { src, dst });
    }

    fn bind_pipeline(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(Event::BindPipeline(pipeline));
    }

    fn bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(Event::BindDescriptorSet(layout, set));
    }

    fn dispatch(&self, _cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(Event::Dispatch(x, y, z));
    }
}

/// Swapchain stand-in handing out image indices round-robin.
pub struct MockSwapchain {
    images: Vec<DisplayImage>,
    extent: vk::Extent2D,
    next: Cell<u32>,
    acquired: RefCell<Vec<vk::Semaphore>>,
    presented: RefCell<Vec<(u32, vk::Semaphore)>>,
}

impl MockSwapchain {
    pub fn new(image_count: usize, extent: vk::Extent2D) -> Self {
        let images = (0..image_count as u64)
            .map(|i| DisplayImage {
                image: vk::Image::from_raw(0x10 + i),
                view: vk::ImageView::from_raw(0x80 + i),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                state: ImageState::UNACQUIRED,
            })
            .collect();

        Self {
            images,
            extent,
            next: Cell::new(0),
            acquired: RefCell::new(Vec::new()),
            presented: RefCell::new(Vec::new()),
        }
    }

    /// Semaphores passed to each acquire, in call order.
    pub fn acquired(&self) -> Vec<vk::Semaphore> {
        self.acquired.borrow().clone()
    }

    /// (image index, wait semaphore) of each present, in call order.
    pub fn presented(&self) -> Vec<(u32, vk::Semaphore)> {
        self.presented.borrow().clone()
    }
}

impl PresentTarget for MockSwapchain {
    fn images(&self) -> &[DisplayImage] {
        &self.images
    }

    fn images_mut(&mut self) -> &mut [DisplayImage] {
        &mut self.images
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn acquire_next_image(&self, signal: vk::Semaphore, _timeout_ns: u64) -> FrameResult<u32> {
        let index = self.next.get();
        self.next.set((index + 1) % self.images.len() as u32);
        self.acquired.borrow_mut().push(signal);
        Ok(index)
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> FrameResult<()> {
        self.presented.borrow_mut().push((image_index, wait));
        Ok(())
    }
}
