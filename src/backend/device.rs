// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers + debug messenger
// - Window surface (platform-specific, see surface.rs)
// - Physical device selection (Vulkan 1.3, graphics + present queue)
// - Logical device with synchronization2
// - Memory allocator setup
// - Owns the teardown stack and executes it at shutdown
//
// Nothing here is destroyed by Drop. Every object is pushed onto the
// lifetime stack as it is created and destroyed by `shutdown()`.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::surface;
use crate::error::{FrameError, FrameResult};
use crate::frame::{FrameSlot, FrameSubmit, GpuDevice, RenderTarget};
use crate::lifetime::{LifetimeStack, ResourceKind, Teardown};

/// Vulkan device plus everything created alongside it.
pub struct VulkanDevice {
    _entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Presentation
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    pub swapchain_loader: khr::Swapchain,

    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,

    // One queue does graphics, compute, transfer and present
    pub queue: vk::Queue,
    pub queue_family: u32,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,

    /// `None` once the allocator teardown has run.
    allocator: Mutex<Option<Allocator>>,
    lifetime: Mutex<LifetimeStack>,
}

impl VulkanDevice {
    /// Create the device and a surface for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `window` - Window to present to
    ///
    /// On failure, everything created before the failing step is destroyed
    /// again before the error is returned.
    pub fn new<W>(app_name: &str, enable_validation: bool, window: &W) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let mut partial = PartialDevice::default();
        match Self::create(
            app_name,
            enable_validation,
            display_handle,
            window_handle,
            &mut partial,
        ) {
            Ok(device) => Ok(device),
            Err(e) => {
                let destroyed = partial.unwind();
                log::debug!("Device setup failed, destroyed {} objects", destroyed);
                Err(e)
            }
        }
    }

    fn create(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        partial: &mut PartialDevice,
    ) -> Result<Arc<Self>> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Load Vulkan library, create instance
        // ─────────────────────────────────────────────────────────────────────
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;
        partial._entry = Some(entry.clone());

        let surface_extensions = surface::required_extensions(display_handle)?;
        let instance =
            Self::create_instance(&entry, app_name, enable_validation, &surface_extensions)?;
        partial.instance = Some(instance.clone());
        partial.lifetime.push(Teardown::Instance);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Debug messenger (validation output -> log)
        // ─────────────────────────────────────────────────────────────────────
        let debug_utils = if enable_validation {
            let (loader, messenger) = Self::setup_debug_messenger(&entry, &instance)?;
            partial.debug_utils = Some(loader.clone());
            partial.lifetime.push(Teardown::DebugMessenger(messenger));
            Some((loader, messenger))
        } else {
            None
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Surface
        // ─────────────────────────────────────────────────────────────────────
        let surface_loader = khr::Surface::new(&entry, &instance);
        partial.surface_loader = Some(surface_loader.clone());
        let surface =
            unsafe { surface::create_surface(&entry, &instance, display_handle, window_handle) }?;
        partial.lifetime.push(Teardown::Surface(surface));

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Pick GPU and queue family
        // ─────────────────────────────────────────────────────────────────────
        let (physical_device, queue_family) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Logical device
        // ─────────────────────────────────────────────────────────────────────
        let (device, queue) = Self::create_logical_device(&instance, physical_device, queue_family)?;
        partial.device = Some(device.clone());
        partial.lifetime.push(Teardown::Device);

        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Memory allocator (last step that can fail)
        // ─────────────────────────────────────────────────────────────────────
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        let mut lifetime = std::mem::take(&mut partial.lifetime);
        lifetime.push(Teardown::Allocator);

        Ok(Arc::new(Self {
            _entry: entry,
            instance,
            debug_utils,
            surface,
            surface_loader,
            swapchain_loader,
            physical_device,
            device,
            queue,
            queue_family,
            properties,
            allocator: Mutex::new(Some(allocator)),
            lifetime: Mutex::new(lifetime),
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const std::ffi::c_char],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("vulkan-engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            if props.api_version < vk::API_VERSION_1_3 || !Self::check_device_features(instance, device) {
                continue;
            }

            // Graphics queue family that can also present to our surface
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let family = queue_families.iter().enumerate().find_map(|(i, family)| {
                let index = i as u32;
                let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let present = unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .unwrap_or(false);
                (graphics && present).then_some(index)
            });

            if let Some(family) = family {
                // Score device (prefer discrete GPU)
                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    _ => 1,
                };

                if score > best_score {
                    best_score = score;
                    best_device = Some((device, family));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No GPU with Vulkan 1.3 graphics + present support found"))
    }

    fn check_device_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };

        supports_required_features(&features13)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        // Barriers, submission and blits go through synchronization2
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().synchronization2(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok((device, queue))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<Allocator> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    /// Lock the memory allocator. `None` after shutdown.
    pub(crate) fn allocator(&self) -> MutexGuard<'_, Option<Allocator>> {
        self.allocator.lock()
    }

    /// Kinds of the pending teardown actions, next to run first.
    pub fn pending_teardown(&self) -> Vec<ResourceKind> {
        self.lifetime.lock().pending().collect()
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    /// Run every deferred teardown action, newest first.
    ///
    /// Call once, after the last frame. The device (and everything created
    /// from it) is unusable afterwards. A second call does nothing.
    pub fn shutdown(&self) {
        log::info!("Cleaning up Vulkan resources...");

        // Drain under the lock, destroy outside it: Image teardown needs
        // the allocator lock.
        let mut stack = std::mem::take(&mut *self.lifetime.lock());
        stack.flush(|action| unsafe { self.destroy(action) });

        log::info!("Cleanup complete");
    }

    unsafe fn destroy(&self, action: Teardown) {
        log::debug!("Destroying {:?}", action.kind());

        match action {
            Teardown::WaitIdle => {
                if let Err(e) = self.device.device_wait_idle() {
                    log::error!("vkDeviceWaitIdle failed during shutdown: {}", e);
                }
            }
            Teardown::Pipeline(pipeline) => self.device.destroy_pipeline(pipeline, None),
            Teardown::PipelineLayout(layout) => self.device.destroy_pipeline_layout(layout, None),
            Teardown::ShaderModule(module) => self.device.destroy_shader_module(module, None),
            Teardown::DescriptorSetLayout(layout) => {
                self.device.destroy_descriptor_set_layout(layout, None)
            }
            Teardown::DescriptorPool(pool) => self.device.destroy_descriptor_pool(pool, None),
            Teardown::Semaphore(semaphore) => self.device.destroy_semaphore(semaphore, None),
            Teardown::Fence(fence) => self.device.destroy_fence(fence, None),
            Teardown::CommandPool(pool) => self.device.destroy_command_pool(pool, None),
            Teardown::ImageView(view) => self.device.destroy_image_view(view, None),
            Teardown::Image { image, allocation } => {
                self.device.destroy_image(image, None);
                if let Some(allocation) = allocation {
                    match self.allocator.lock().as_mut() {
                        Some(allocator) => {
                            if let Err(e) = allocator.free(allocation) {
                                log::error!("Failed to free image memory: {}", e);
                            }
                        }
                        None => log::error!("Image memory outlived the allocator"),
                    }
                }
            }
            Teardown::Swapchain(swapchain) => {
                self.swapchain_loader.destroy_swapchain(swapchain, None)
            }
            Teardown::Allocator => {
                // Dropping returns every memory block to the device
                drop(self.allocator.lock().take());
            }
            Teardown::Device => self.device.destroy_device(None),
            Teardown::Surface(surface) => self.surface_loader.destroy_surface(surface, None),
            Teardown::DebugMessenger(messenger) => {
                if let Some((loader, _)) = &self.debug_utils {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
            }
            Teardown::Instance => self.instance.destroy_instance(None),
        }
    }
}

/// Objects created so far by a `VulkanDevice::new` that has not finished,
/// with the loaders needed to destroy them.
#[derive(Default)]
struct PartialDevice {
    lifetime: LifetimeStack,
    // Keeps the library loaded until unwinding is done
    _entry: Option<Entry>,
    instance: Option<ash::Instance>,
    debug_utils: Option<DebugUtils>,
    surface_loader: Option<khr::Surface>,
    device: Option<ash::Device>,
}

impl PartialDevice {
    /// Destroy everything pushed so far, newest first. Returns how many
    /// actions ran.
    fn unwind(mut self) -> usize {
        let mut count = 0;
        let mut lifetime = std::mem::take(&mut self.lifetime);
        lifetime.flush(|action| {
            count += 1;
            unsafe { self.destroy(action) }
        });
        count
    }

    unsafe fn destroy(&self, action: Teardown) {
        log::debug!("Destroying {:?} after failed setup", action.kind());

        match action {
            Teardown::Device => {
                if let Some(device) = &self.device {
                    device.destroy_device(None);
                }
            }
            Teardown::Surface(surface) => {
                if let Some(loader) = &self.surface_loader {
                    loader.destroy_surface(surface, None);
                }
            }
            Teardown::DebugMessenger(messenger) => {
                if let Some(loader) = &self.debug_utils {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
            }
            Teardown::Instance => {
                if let Some(instance) = &self.instance {
                    instance.destroy_instance(None);
                }
            }
            other => log::warn!("{:?} is not created during device setup", other.kind()),
        }
    }
}

// =============================================================================
// FRAME ENGINE SEAM
// =============================================================================

impl GpuDevice for VulkanDevice {
    fn create_render_target(&self, extent: vk::Extent2D) -> FrameResult<RenderTarget> {
        super::image::create_render_target(self, extent)
    }

    fn create_frame_slot(&self) -> FrameResult<FrameSlot> {
        super::sync::create_frame_slot(self)
    }

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        super::sync::create_semaphore(self)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(FrameError::FenceTimeout { timeout_ns }),
            Err(e) => Err(FrameError::device("vkWaitForFences")(e)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> FrameResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(FrameError::device("vkResetFences"))
    }

    fn submit(&self, submit: &FrameSubmit) -> FrameResult<()> {
        let wait = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(submit.wait.semaphore)
            .stage_mask(submit.wait.stage)
            .build()];
        let signal = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(submit.signal.semaphore)
            .stage_mask(submit.signal.stage)
            .build()];
        let command_buffers = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(submit.command_buffer)
            .build()];

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signal)
            .build();

        unsafe {
            self.device
                .queue_submit2(self.queue, &[submit_info], submit.fence)
        }
        .map_err(FrameError::device("vkQueueSubmit2"))
    }

    fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(FrameError::device("vkDeviceWaitIdle"))
    }

    fn defer(&self, action: Teardown) {
        self.lifetime.lock().push(action);
    }
}

/// Only synchronization2 is needed: nothing records a render pass.
fn supports_required_features(features13: &vk::PhysicalDeviceVulkan13Features) -> bool {
    features13.synchronization2 == vk::TRUE
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_only_synchronization2_is_required() {
        let mut features = vk::PhysicalDeviceVulkan13Features::default();
        assert!(!supports_required_features(&features));

        features.synchronization2 = vk::TRUE;
        assert!(supports_required_features(&features));
    }

    #[test]
    fn test_unwind_drains_everything_pushed() {
        // No loaders: the entries can't be destroyed, but each is still
        // consumed exactly once
        let mut partial = PartialDevice::default();
        partial.lifetime.push(Teardown::Instance);
        partial
            .lifetime
            .push(Teardown::Surface(vk::SurfaceKHR::from_raw(3)));
        partial.lifetime.push(Teardown::Device);

        assert_eq!(partial.unwind(), 3);
    }

    #[test]
    fn test_unwind_of_nothing_is_a_no_op() {
        assert_eq!(PartialDevice::default().unwind(), 0);
    }
}
