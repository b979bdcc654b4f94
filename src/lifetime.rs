// Deferred teardown - reverse-order destruction of every GPU object
//
// GPU objects here are not owned through Drop. Construction order across
// subsystems (instance, device, allocator, swapchain, frame slots,
// pipelines...) matches dependency order, so replaying destruction in
// reverse push order always destroys children before their parents.
//
// Entries are tagged variants; `pending()` lists them without running any.

use ash::vk;
use gpu_allocator::vulkan::Allocation;

/// One deferred destruction step.
#[derive(Debug)]
pub enum Teardown {
    /// Block until the device has finished all submitted work.
    WaitIdle,
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    /// Also frees every command buffer allocated from it.
    CommandPool(vk::CommandPool),
    ImageView(vk::ImageView),
    /// An allocator-backed image; the allocation is returned after the image
    /// is destroyed.
    Image {
        image: vk::Image,
        allocation: Option<Allocation>,
    },
    Swapchain(vk::SwapchainKHR),
    /// The device memory allocator (frees its memory blocks).
    Allocator,
    Device,
    Surface(vk::SurfaceKHR),
    DebugMessenger(vk::DebugUtilsMessengerEXT),
    Instance,
}

/// What kind of object a [`Teardown`] destroys, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    WaitIdle,
    Pipeline,
    PipelineLayout,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    Semaphore,
    Fence,
    CommandPool,
    ImageView,
    Image,
    Swapchain,
    Allocator,
    Device,
    Surface,
    DebugMessenger,
    Instance,
}

impl Teardown {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Teardown::WaitIdle => ResourceKind::WaitIdle,
            Teardown::Pipeline(_) => ResourceKind::Pipeline,
            Teardown::PipelineLayout(_) => ResourceKind::PipelineLayout,
            Teardown::ShaderModule(_) => ResourceKind::ShaderModule,
            Teardown::DescriptorSetLayout(_) => ResourceKind::DescriptorSetLayout,
            Teardown::DescriptorPool(_) => ResourceKind::DescriptorPool,
            Teardown::Semaphore(_) => ResourceKind::Semaphore,
            Teardown::Fence(_) => ResourceKind::Fence,
            Teardown::CommandPool(_) => ResourceKind::CommandPool,
            Teardown::ImageView(_) => ResourceKind::ImageView,
            Teardown::Image { .. } => ResourceKind::Image,
            Teardown::Swapchain(_) => ResourceKind::Swapchain,
            Teardown::Allocator => ResourceKind::Allocator,
            Teardown::Device => ResourceKind::Device,
            Teardown::Surface(_) => ResourceKind::Surface,
            Teardown::DebugMessenger(_) => ResourceKind::DebugMessenger,
            Teardown::Instance => ResourceKind::Instance,
        }
    }
}

/// Append-only stack of teardown actions, flushed once at shutdown.
///
/// There is no way to remove a single entry: the stack is all-or-nothing.
#[derive(Debug, Default)]
pub struct LifetimeStack {
    actions: Vec<Teardown>,
}

impl LifetimeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action. Push order must be acquisition order.
    pub fn push(&mut self, action: Teardown) {
        log::trace!("Deferred teardown #{}: {:?}", self.actions.len(), action.kind());
        self.actions.push(action);
    }

    /// Run every action from most recently pushed to least recently pushed,
    /// exactly once each, leaving the stack empty. A no-op when empty.
    pub fn flush<F>(&mut self, mut execute: F)
    where
        F: FnMut(Teardown),
    {
        if self.actions.is_empty() {
            return;
        }

        log::debug!("Flushing {} teardown actions", self.actions.len());

        while let Some(action) = self.actions.pop() {
            execute(action);
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Kinds of the pending actions, in the order a flush would run them.
    pub fn pending(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.actions.iter().rev().map(Teardown::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_flush_runs_in_reverse_push_order() {
        let mut stack = LifetimeStack::new();
        stack.push(Teardown::Fence(vk::Fence::from_raw(1)));
        stack.push(Teardown::Fence(vk::Fence::from_raw(2)));
        stack.push(Teardown::Fence(vk::Fence::from_raw(3)));

        let mut ran = Vec::new();
        stack.flush(|action| match action {
            Teardown::Fence(fence) => ran.push(fence.as_raw()),
            other => panic!("unexpected action {:?}", other),
        });

        assert_eq!(ran, vec![3, 2, 1]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_flush_empty_stack_is_noop() {
        let mut stack = LifetimeStack::new();
        let mut calls = 0;
        stack.flush(|_| calls += 1);
        assert_eq!(calls, 0);

        stack.push(Teardown::WaitIdle);
        stack.flush(|_| calls += 1);
        stack.flush(|_| calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_three_objects_torn_down_in_reverse_creation() {
        // device -> render target -> a frame slot's command pool
        let mut stack = LifetimeStack::new();
        stack.push(Teardown::Device);
        stack.push(Teardown::Image {
            image: vk::Image::from_raw(0x10),
            allocation: None,
        });
        stack.push(Teardown::CommandPool(vk::CommandPool::from_raw(0x20)));

        let mut kinds = Vec::new();
        stack.flush(|action| kinds.push(action.kind()));

        assert_eq!(
            kinds,
            vec![ResourceKind::CommandPool, ResourceKind::Image, ResourceKind::Device]
        );
    }

    #[test]
    fn test_pending_lists_next_to_run_first() {
        let mut stack = LifetimeStack::new();
        stack.push(Teardown::Instance);
        stack.push(Teardown::Device);
        stack.push(Teardown::WaitIdle);

        let pending: Vec<_> = stack.pending().collect();
        assert_eq!(
            pending,
            vec![ResourceKind::WaitIdle, ResourceKind::Device, ResourceKind::Instance]
        );
        assert_eq!(stack.len(), 3);
    }
}
