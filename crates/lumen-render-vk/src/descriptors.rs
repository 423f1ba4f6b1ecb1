// SPDX-License-Identifier: CEPL-1.0
//! Descriptor set layouts, pools and a small set writer.
use std::collections::HashMap;

use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{DescriptorAllocator, RenderError};

use crate::device::Device;
use crate::handle::Owned;

pub struct DescriptorSetLayout {
    layout: Owned<vk::DescriptorSetLayout>,
    bindings: HashMap<u32, vk::DescriptorSetLayoutBinding<'static>>,
}

pub struct DescriptorSetLayoutBuilder<'d> {
    device: &'d Device,
    bindings: HashMap<u32, vk::DescriptorSetLayoutBinding<'static>>,
}

impl<'d> DescriptorSetLayoutBuilder<'d> {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        assert!(
            !self.bindings.contains_key(&binding),
            "binding {binding} already in use"
        );
        self.bindings.insert(
            binding,
            vk::DescriptorSetLayoutBinding {
                binding,
                descriptor_type,
                descriptor_count: count,
                stage_flags,
                ..Default::default()
            },
        );
        self
    }

    pub fn build(self) -> Result<DescriptorSetLayout> {
        let mut list: Vec<_> = self.bindings.values().copied().collect();
        list.sort_by_key(|b| b.binding);
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: list.len() as u32,
            p_bindings: list.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe {
            let raw = self
                .device
                .raw()
                .create_descriptor_set_layout(&info, None)
                .context("failed to create descriptor set layout")?;
            Owned::new(self.device.shared(), raw)
        };
        Ok(DescriptorSetLayout {
            layout,
            bindings: self.bindings,
        })
    }
}

impl DescriptorSetLayout {
    pub fn builder(device: &Device) -> DescriptorSetLayoutBuilder<'_> {
        DescriptorSetLayoutBuilder {
            device,
            bindings: HashMap::new(),
        }
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.layout.raw()
    }
}

/// Looks up `binding` for a single-descriptor write. Both misuse cases are
/// programming errors.
pub(crate) fn single_descriptor_type(
    bindings: &HashMap<u32, vk::DescriptorSetLayoutBinding<'static>>,
    binding: u32,
) -> vk::DescriptorType {
    let Some(desc) = bindings.get(&binding) else {
        panic!("layout does not contain binding {binding}");
    };
    assert_eq!(
        desc.descriptor_count, 1,
        "binding {binding} expects {} descriptors, got a single one",
        desc.descriptor_count
    );
    desc.descriptor_type
}

pub struct DescriptorPoolBuilder<'d> {
    device: &'d Device,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl<'d> DescriptorPoolBuilder<'d> {
    pub fn add_pool_size(mut self, ty: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty,
            descriptor_count: count,
        });
        self
    }

    pub fn set_pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn set_max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self) -> Result<DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: self.flags,
            max_sets: self.max_sets,
            pool_size_count: self.pool_sizes.len() as u32,
            p_pool_sizes: self.pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe {
            let raw = self
                .device
                .raw()
                .create_descriptor_pool(&info, None)
                .context("failed to create descriptor pool")?;
            Owned::new(self.device.shared(), raw)
        };
        Ok(DescriptorPool { pool })
    }
}

pub struct DescriptorPool {
    pool: Owned<vk::DescriptorPool>,
}

pub(crate) fn allocation_error(result: vk::Result) -> anyhow::Error {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
            RenderError::PoolExhausted.into()
        }
        other => RenderError::Api {
            call: "vkAllocateDescriptorSets",
            result: format!("{other:?}"),
        }
        .into(),
    }
}

impl DescriptorPool {
    pub fn builder(device: &Device) -> DescriptorPoolBuilder<'_> {
        DescriptorPoolBuilder {
            device,
            pool_sizes: Vec::new(),
            max_sets: 1000,
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }

    pub fn raw(&self) -> vk::DescriptorPool {
        self.pool.raw()
    }

    pub fn allocate_descriptor(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool.raw(),
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        let sets = unsafe { self.pool.device().raw.allocate_descriptor_sets(&info) }
            .map_err(allocation_error)?;
        Ok(sets[0])
    }

    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        unsafe {
            self.pool
                .device()
                .raw
                .free_descriptor_sets(self.pool.raw(), sets)
        }
        .context("free_descriptor_sets")
    }

    pub fn reset_pool(&mut self) -> Result<()> {
        unsafe {
            self.pool
                .device()
                .raw
                .reset_descriptor_pool(self.pool.raw(), vk::DescriptorPoolResetFlags::empty())
        }
        .context("reset_descriptor_pool")
    }
}

impl DescriptorAllocator for DescriptorPool {
    type Set = vk::DescriptorSet;
    type Layout = vk::DescriptorSetLayout;

    fn allocate(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        self.allocate_descriptor(layout)
    }

    fn free(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        self.free_descriptors(sets)
    }

    fn reset(&mut self) -> Result<()> {
        self.reset_pool()
    }
}

enum PendingWrite {
    Buffer(u32, vk::DescriptorType, vk::DescriptorBufferInfo),
    Image(u32, vk::DescriptorType, vk::DescriptorImageInfo),
}

/// Collects buffer/image writes for one set of `layout`.
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<PendingWrite>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        let ty = single_descriptor_type(&self.layout.bindings, binding);
        self.writes.push(PendingWrite::Buffer(binding, ty, info));
        self
    }

    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        let ty = single_descriptor_type(&self.layout.bindings, binding);
        self.writes.push(PendingWrite::Image(binding, ty, info));
        self
    }

    /// Allocates a set from the pool and applies the writes to it.
    pub fn build(self) -> Result<vk::DescriptorSet> {
        let set = self.pool.allocate_descriptor(self.layout.raw())?;
        self.overwrite(set);
        Ok(set)
    }

    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes: Vec<_> = self
            .writes
            .iter()
            .map(|w| {
                let (binding, ty) = match w {
                    PendingWrite::Buffer(b, t, _) | PendingWrite::Image(b, t, _) => (*b, *t),
                };
                let mut write = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: binding,
                    descriptor_count: 1,
                    descriptor_type: ty,
                    ..Default::default()
                };
                match w {
                    PendingWrite::Buffer(_, _, info) => write.p_buffer_info = info as *const _,
                    PendingWrite::Image(_, _, info) => write.p_image_info = info as *const _,
                }
                write
            })
            .collect();
        unsafe { self.pool.pool.device().raw.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> HashMap<u32, vk::DescriptorSetLayoutBinding<'static>> {
        let mut map = HashMap::new();
        map.insert(
            0,
            vk::DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                ..Default::default()
            },
        );
        map.insert(
            1,
            vk::DescriptorSetLayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 4,
                ..Default::default()
            },
        );
        map
    }

    #[test]
    fn single_binding_resolves_its_type() {
        assert_eq!(
            single_descriptor_type(&bindings(), 0),
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }

    #[test]
    #[should_panic(expected = "does not contain binding 7")]
    fn unknown_binding_panics() {
        single_descriptor_type(&bindings(), 7);
    }

    #[test]
    #[should_panic(expected = "expects 4 descriptors")]
    fn single_write_into_array_binding_panics() {
        single_descriptor_type(&bindings(), 1);
    }

    #[test]
    fn exhausted_pool_is_a_typed_error() {
        let err = allocation_error(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::PoolExhausted)
        ));
        let err = allocation_error(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().contains("vkAllocateDescriptorSets"));
    }
}
