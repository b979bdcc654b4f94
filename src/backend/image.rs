// Render target allocation
//
// The scene is drawn into an HDR image owned by the engine, not into the
// swapchain images directly; end_frame blits it across.

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::state::color_subresource_range;
use crate::frame::{GpuDevice, ImageState, RenderTarget};
use crate::lifetime::Teardown;

/// 16-bit float RGBA: storage-image capable everywhere that matters.
pub const RENDER_TARGET_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Written by compute (storage), blitted from and cleared (transfer).
pub fn render_target_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
}

/// Allocate the render target and its view. Pushes Image, then ImageView.
pub fn create_render_target(
    device: &VulkanDevice,
    extent: vk::Extent2D,
) -> FrameResult<RenderTarget> {
    let extent = vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    };

    log::info!(
        "Creating render target: {}x{} {:?}",
        extent.width,
        extent.height,
        RENDER_TARGET_FORMAT
    );

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(RENDER_TARGET_FORMAT)
        .extent(extent)
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(render_target_usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.device.create_image(&image_info, None) }
        .map_err(FrameError::device("vkCreateImage"))?;
    let requirements = unsafe { device.device.get_image_memory_requirements(image) };

    // Not on the lifetime stack yet: until bound, failures release by hand
    let allocation = {
        let mut allocator = device.allocator();
        let allocated = match allocator.as_mut() {
            Some(allocator) => allocator
                .allocate(&AllocationCreateDesc {
                    name: "render target",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::DedicatedImage(image),
                })
                .map_err(|e| FrameError::Allocation(e.to_string())),
            None => Err(FrameError::Allocation("allocator already destroyed".into())),
        };

        match allocated {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        }
    };

    let bound = unsafe {
        device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
    };

    // Registered either way, so a failed bind is released at shutdown
    device.defer(Teardown::Image {
        image,
        allocation: Some(allocation),
    });
    bound.map_err(FrameError::device("vkBindImageMemory"))?;

    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(RENDER_TARGET_FORMAT)
        .subresource_range(color_subresource_range());

    let view = unsafe { device.device.create_image_view(&view_info, None) }
        .map_err(FrameError::device("vkCreateImageView"))?;
    device.defer(Teardown::ImageView(view));

    Ok(RenderTarget {
        image,
        view,
        format: RENDER_TARGET_FORMAT,
        extent,
        state: ImageState::UNDEFINED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_target_usage_covers_every_use() {
        let usage = render_target_usage();
        assert!(usage.contains(vk::ImageUsageFlags::STORAGE));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        // No render pass ever draws into it
        assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
