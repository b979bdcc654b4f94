// Backend module - Vulkan implementation of the frame engine's seams
//
// Design: Thin wrapper around ash, explicit control
// Every object created here is registered on the device's teardown stack.

pub mod commands;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
