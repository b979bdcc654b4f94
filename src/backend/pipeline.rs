// Pipeline creation
//
// Compute only: the scene is written by a compute shader into the render
// target. Layouts and pipelines are registered for teardown on creation.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;

use super::VulkanDevice;
use crate::frame::GpuDevice;
use crate::lifetime::Teardown;

/// Builds a pipeline layout from descriptor set layouts.
#[derive(Debug, Default)]
pub struct PipelineLayoutBuilder {
    set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn build(self, device: &VulkanDevice) -> Result<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&self.set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;
        device.defer(Teardown::PipelineLayout(layout));

        Ok(layout)
    }
}

/// Builds a compute pipeline from one shader module, entry point `main`.
#[derive(Debug)]
pub struct ComputePipelineBuilder {
    layout: vk::PipelineLayout,
    shader: vk::ShaderModule,
    entry_point: &'static CStr,
}

impl ComputePipelineBuilder {
    pub fn new(layout: vk::PipelineLayout, shader: vk::ShaderModule) -> Self {
        Self {
            layout,
            shader,
            entry_point: c"main",
        }
    }

    pub fn build(self, device: &VulkanDevice) -> Result<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader)
            .name(self.entry_point)
            .build();

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(self.layout)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create compute pipeline")?
        };

        let pipeline = pipelines
            .into_iter()
            .next()
            .context("Driver returned no compute pipeline")?;
        device.defer(Teardown::Pipeline(pipeline));

        Ok(pipeline)
    }
}
