// Synchronization primitives
//
// Fences, semaphores and per-slot command buffers for the frame ring.
// Fences are created signaled so the first wait on each slot returns at once.

use ash::vk;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::{FrameSlot, GpuDevice};
use crate::lifetime::Teardown;

/// One frame slot: resettable command pool + primary buffer, signaled
/// fence, image-acquired semaphore. Pushes CommandPool, Fence, Semaphore.
pub fn create_frame_slot(device: &VulkanDevice) -> FrameResult<FrameSlot> {
    // RESET: the buffer is rewound every time the slot comes round
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
        .map_err(FrameError::device("vkCreateCommandPool"))?;
    device.defer(Teardown::CommandPool(command_pool));

    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .map_err(FrameError::device("vkAllocateCommandBuffers"))?[0];

    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled
    let fence = unsafe { device.device.create_fence(&fence_info, None) }
        .map_err(FrameError::device("vkCreateFence"))?;
    device.defer(Teardown::Fence(fence));

    let image_available = create_semaphore(device)?;

    Ok(FrameSlot::new(command_pool, command_buffer, fence, image_available))
}

/// Binary semaphore, registered for teardown.
pub fn create_semaphore(device: &VulkanDevice) -> FrameResult<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
        .map_err(FrameError::device("vkCreateSemaphore"))?;
    device.defer(Teardown::Semaphore(semaphore));
    Ok(semaphore)
}
