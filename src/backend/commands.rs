// Command recording
//
// Thin synchronization2 wrappers. Recording calls can't fail (errors show
// up at end/submit), so only reset/begin/end return results.

use ash::vk;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::state::color_subresource_range;
use crate::frame::{CommandRecorder, ImageBarrier};

impl CommandRecorder for VulkanDevice {
    fn reset_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(FrameError::device("vkResetCommandBuffer"))
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        // Recorded fresh every frame, submitted once
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(FrameError::device("vkBeginCommandBuffer"))
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> FrameResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(FrameError::device("vkEndCommandBuffer"))
    }

    fn image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let barriers = [barrier.to_vk()];
        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);

        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]) {
        let clear_color = vk::ClearColorValue { float32: color };

        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_color,
                &[color_subresource_range()],
            );
        }
    }

    fn blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_extent: vk::Extent3D,
        dst: vk::Image,
        dst_extent: vk::Extent3D,
    ) {
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        // Whole image to whole image; sizes may differ, filter smooths it
        let region = vk::ImageBlit2::builder()
            .src_subresource(layers)
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_subresource(layers)
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_extent)])
            .build();
        let regions = [region];

        let blit_info = vk::BlitImageInfo2::builder()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions)
            .filter(vk::Filter::LINEAR);

        unsafe { self.device.cmd_blit_image2(cmd, &blit_info) };
    }

    fn bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, 0, &[set], &[]);
        }
    }

    fn dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
    }
}

/// Exclusive upper corner of a blit region covering `extent`.
fn far_corner(extent: vk::Extent3D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}
