// Swapchain - Window presentation
//
// Owns the displayable images and implements the engine's PresentTarget.
// Created once: the window is fixed-size and an out-of-date surface is
// reported as an error rather than recreated.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};
use crate::frame::state::color_subresource_range;
use crate::frame::{DisplayImage, GpuDevice, ImageState, PresentTarget};
use crate::lifetime::Teardown;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    images: Vec<DisplayImage>,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create the swapchain for the device's surface. Pushes the swapchain,
    /// then one view per image.
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_loader = &device.surface_loader;
        let surface = device.surface;

        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Surface format: {:?} / {:?}, present mode: {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        // TRANSFER_DST: the render target is blitted in, never drawn to directly
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        device.defer(Teardown::Swapchain(swapchain));

        let handles = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }?;
        log::info!("Created swapchain with {} images", handles.len());

        let image_extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let images = handles
            .into_iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(color_subresource_range());

                let view = unsafe { device.device.create_image_view(&view_info, None) }
                    .context("Failed to create image view")?;
                device.defer(Teardown::ImageView(view));

                Ok(DisplayImage {
                    image,
                    view,
                    extent: image_extent,
                    state: ImageState::UNACQUIRED,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            format: surface_format.format,
            extent,
            present_mode,
            images,
            device,
        })
    }
}

impl PresentTarget for Swapchain {
    fn images(&self) -> &[DisplayImage] {
        &self.images
    }

    fn images_mut(&mut self) -> &mut [DisplayImage] {
        &mut self.images
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn acquire_next_image(&self, signal: vk::Semaphore, timeout_ns: u64) -> FrameResult<u32> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("Swapchain is suboptimal for the surface");
                }
                Ok(index)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                Err(FrameError::AcquireTimeout { timeout_ns })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SurfaceOutOfDate),
            Err(e) => Err(FrameError::device("vkAcquireNextImageKHR")(e)),
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> FrameResult<()> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.queue, &present_info)
        };

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("Presented to a suboptimal swapchain");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SurfaceOutOfDate),
            Err(e) => Err(FrameError::device("vkQueuePresentKHR")(e)),
        }
    }
}

/// 8-bit sRGB (RGBA or BGRA), otherwise whatever the surface lists first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            matches!(f.format, vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The configured mode if the surface has it, else FIFO (always supported).
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        log::warn!("Present mode {:?} not supported, using FIFO", preferred);
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum).
fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}
