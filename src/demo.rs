// Demo layers - a compute-shaded scene and the overlay that presents it
//
// Scene (layer):     begin_frame, clear, bind compute pipeline, dispatch
// Present (overlay): end_frame, FPS in the window title
//
// Overlays run after layers, so every frame is closed by PresentOverlay.

use anyhow::Result;
use ash::vk;
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use vulkan_engine::backend::descriptor::{
    write_storage_image, DescriptorAllocator, DescriptorLayoutBuilder, PoolSizeRatio,
};
use vulkan_engine::backend::pipeline::{ComputePipelineBuilder, PipelineLayoutBuilder};
use vulkan_engine::backend::shader;
use vulkan_engine::layer::Layer;
use vulkan_engine::VulkanRenderer;

/// Matches `local_size_x/y` in shaders/gradient.comp.
const WORKGROUP_SIZE: u32 = 16;

/// Workgroups needed to cover `extent`, rounding up at the edges.
pub fn group_counts(extent: vk::Extent3D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

// =============================================================================
// SCENE LAYER
// =============================================================================

struct SceneResources {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
}

pub struct SceneLayer {
    shader_path: PathBuf,
    clear_color: Vec3,
    resources: Option<SceneResources>,
}

impl SceneLayer {
    pub fn new(shader_path: PathBuf, clear_color: Vec3) -> Self {
        Self {
            shader_path,
            clear_color,
            resources: None,
        }
    }
}

impl Layer<VulkanRenderer> for SceneLayer {
    fn name(&self) -> &str {
        "Scene"
    }

    fn on_attach(&mut self, renderer: &mut VulkanRenderer) -> Result<()> {
        let device = renderer.device().clone();

        // ─────────────────────────────────────────────────────────────────────
        // Descriptors: one storage image (the render target) at binding 0
        // ─────────────────────────────────────────────────────────────────────
        let set_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(&device, vk::ShaderStageFlags::ALL)?;

        let descriptors = DescriptorAllocator::new(
            &device,
            1,
            &[PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            }],
        )?;
        let set = descriptors.allocate(&device, set_layout)?;
        write_storage_image(&device, set, 0, renderer.render_target().view);

        // ─────────────────────────────────────────────────────────────────────
        // Compute pipeline
        // ─────────────────────────────────────────────────────────────────────
        let code = shader::load_spirv(&self.shader_path)?;
        let module = shader::create_shader_module(&device, &code)?;

        let layout = PipelineLayoutBuilder::new()
            .add_set_layout(set_layout)
            .build(&device)?;
        let pipeline = ComputePipelineBuilder::new(layout, module).build(&device)?;

        self.resources = Some(SceneResources {
            pipeline,
            layout,
            set,
        });

        // All setup-time objects exist: shutdown starts by idling the device
        renderer.end_init();

        log::info!("Layer {} attached", self.name());
        Ok(())
    }

    fn on_update(&mut self, renderer: &mut VulkanRenderer) -> Result<()> {
        let Some(resources) = &self.resources else {
            anyhow::bail!("Scene layer updated before it was attached");
        };

        renderer.begin_frame()?;
        renderer.clear(self.clear_color);
        renderer.bind_pipeline(resources.pipeline, vk::PipelineBindPoint::COMPUTE);
        renderer.bind_descriptor_set(vk::PipelineBindPoint::COMPUTE, resources.layout, resources.set);

        let (x, y) = group_counts(renderer.render_target().extent);
        renderer.dispatch(x, y, 1);
        Ok(())
    }
}

// =============================================================================
// PRESENT OVERLAY
// =============================================================================

pub struct PresentOverlay {
    window: Arc<Window>,
    title: String,
    show_fps: bool,
    frames_since_update: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl PresentOverlay {
    pub fn new(window: Arc<Window>, title: String, show_fps: bool) -> Self {
        let now = Instant::now();
        Self {
            window,
            title,
            show_fps,
            frames_since_update: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frames_since_update += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frames_since_update as f32 / elapsed;
            self.window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                self.title,
                fps,
                frame_time * 1000.0
            ));
            log::debug!("{:.0} FPS", fps);

            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}

impl Layer<VulkanRenderer> for PresentOverlay {
    fn name(&self) -> &str {
        "Present"
    }

    fn on_update(&mut self, renderer: &mut VulkanRenderer) -> Result<()> {
        renderer.end_frame()?;

        if self.show_fps {
            self.update_fps();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_counts_round_up() {
        let exact = vk::Extent3D {
            width: 1280,
            height: 720,
            depth: 1,
        };
        assert_eq!(group_counts(exact), (80, 45));

        let ragged = vk::Extent3D {
            width: 1281,
            height: 17,
            depth: 1,
        };
        assert_eq!(group_counts(ragged), (81, 2));
    }
}
