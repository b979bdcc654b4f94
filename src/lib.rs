// =============================================================================
// VULKAN ENGINE - frame synchronization and resource lifetime
// =============================================================================
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  LayerStack (application code, once per frame)                  │
// │    └── Renderer: begin_frame / record / end_frame               │
// │          ├── FrameRing (fences, command buffers, acquire sems)  │
// │          ├── ImageState tracking -> barriers                    │
// │          └── PresentTarget (swapchain)                          │
// │  VulkanDevice                                                   │
// │    └── LifetimeStack: every object, destroyed in reverse        │
// └─────────────────────────────────────────────────────────────────┘

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod layer;
pub mod lifetime;

use std::sync::Arc;

pub use error::{FrameError, FrameResult};
pub use frame::{Renderer, RendererSettings};

/// The renderer over the real Vulkan backend.
pub type VulkanRenderer = Renderer<Arc<backend::VulkanDevice>, backend::Swapchain>;
