// Descriptor sets - layouts, pool, writes
//
// Construction only. Binding a set during a frame goes through the
// renderer, which forwards to the command recorder.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;
use crate::frame::GpuDevice;
use crate::lifetime::Teardown;

/// Collects bindings for one descriptor set layout.
#[derive(Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One descriptor of `ty` at `binding`. Stage flags are set in `build`.
    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .build(),
        );
        self
    }

    /// Create the layout with every binding visible to `stages`.
    pub fn build(
        mut self,
        device: &VulkanDevice,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;
        device.defer(Teardown::DescriptorSetLayout(layout));

        Ok(layout)
    }
}

/// Descriptors of one type per set, for pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// Pool sizes for `max_sets` sets with the given per-set ratios.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| vk::DescriptorPoolSize {
            ty: r.ty,
            descriptor_count: (r.ratio * max_sets as f32).ceil() as u32,
        })
        .collect()
}

/// A fixed descriptor pool; sets live as long as the pool.
pub struct DescriptorAllocator {
    pub pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    pub fn new(device: &VulkanDevice, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<Self> {
        let sizes = pool_sizes(max_sets, ratios);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;
        device.defer(Teardown::DescriptorPool(pool));

        log::debug!("Descriptor pool: {} sets, {:?}", max_sets, sizes);
        Ok(Self { pool })
    }

    pub fn allocate(
        &self,
        device: &VulkanDevice,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?;

        sets.into_iter().next().context("Driver returned no descriptor set")
    }
}

/// Point `binding` of `set` at a storage image view in GENERAL layout.
pub fn write_storage_image(
    device: &VulkanDevice,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
) {
    let image_info = [vk::DescriptorImageInfo::builder()
        .image_view(view)
        .image_layout(vk::ImageLayout::GENERAL)
        .build()];

    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(&image_info)
        .build();

    unsafe { device.device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_bindings_in_order() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER);

        let bindings = &builder.bindings;
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_count, 1);
    }

    #[test]
    fn test_pool_sizes_scale_with_sets() {
        let ratios = [
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 1.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                ratio: 0.5,
            },
        ];

        let sizes = pool_sizes(3, &ratios);
        assert_eq!(sizes[0].descriptor_count, 3);
        // Rounded up so every set gets its share
        assert_eq!(sizes[1].descriptor_count, 2);
    }
}
