// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection, the logical device and its one-shot helpers.
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use lumen_render::{
    BufferUsage, ImageLayout, LayoutTransition, MemoryProperties, RenderError, TransferDevice,
};
use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::handle::{Owned, RawDevice};
use crate::instance::RawInstance;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

/// What the surface offers on the selected device.
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Picks a graphics family and a present family, preferring one family that
/// does both.
pub(crate) fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, f) in families.iter().enumerate() {
        let i = i as u32;
        if f.queue_count == 0 {
            continue;
        }
        let g = f.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let p = supports_present(i);
        if g && p {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if g && graphics.is_none() {
            graphics = Some(i);
        }
        if p && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

pub(crate) fn pick_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

pub fn vk_memory_flags(props: MemoryProperties) -> vk::MemoryPropertyFlags {
    let mut out = vk::MemoryPropertyFlags::empty();
    for (ours, theirs) in [
        (MemoryProperties::DEVICE_LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        (MemoryProperties::HOST_VISIBLE, vk::MemoryPropertyFlags::HOST_VISIBLE),
        (MemoryProperties::HOST_COHERENT, vk::MemoryPropertyFlags::HOST_COHERENT),
        (MemoryProperties::HOST_CACHED, vk::MemoryPropertyFlags::HOST_CACHED),
    ] {
        if props.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub fn vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut out = vk::BufferUsageFlags::empty();
    for (ours, theirs) in [
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
    ] {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub fn vk_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub(crate) fn barrier_masks(transition: LayoutTransition) -> BarrierMasks {
    use vk::{AccessFlags as A, PipelineStageFlags as S};
    match transition {
        LayoutTransition::UndefinedToTransferDst => BarrierMasks {
            src_access: A::empty(),
            dst_access: A::TRANSFER_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
        },
        LayoutTransition::UndefinedToTransferSrc => BarrierMasks {
            src_access: A::empty(),
            dst_access: A::TRANSFER_READ,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::TRANSFER,
        },
        LayoutTransition::TransferDstToShaderRead => BarrierMasks {
            src_access: A::TRANSFER_WRITE,
            dst_access: A::SHADER_READ,
            src_stage: S::TRANSFER,
            dst_stage: S::FRAGMENT_SHADER,
        },
        LayoutTransition::UndefinedToDepthAttachment => BarrierMasks {
            src_access: A::empty(),
            dst_access: A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: S::TOP_OF_PIPE,
            dst_stage: S::EARLY_FRAGMENT_TESTS,
        },
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

pub fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        f if has_stencil(f) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub(crate) fn format_supported(
    props: vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
        _ => false,
    }
}

unsafe fn surface_support(
    instance: &RawInstance,
    phys: vk::PhysicalDevice,
) -> Result<SurfaceSupport> {
    let loader = &instance.surface_loader;
    Ok(SurfaceSupport {
        capabilities: loader
            .get_physical_device_surface_capabilities(phys, instance.surface)
            .context("get_physical_device_surface_capabilities")?,
        formats: loader
            .get_physical_device_surface_formats(phys, instance.surface)
            .context("get_physical_device_surface_formats")?,
        present_modes: loader
            .get_physical_device_surface_present_modes(phys, instance.surface)
            .context("get_physical_device_surface_present_modes")?,
    })
}

/// `Ok(families)` when `phys` can run the engine, `Err(reason)` otherwise.
unsafe fn check_device(
    instance: &RawInstance,
    phys: vk::PhysicalDevice,
) -> Result<std::result::Result<QueueFamilies, String>> {
    let props = instance.raw.get_physical_device_properties(phys);
    if props.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return Ok(Err(format!("not a discrete GPU ({:?})", props.device_type)));
    }

    let families = instance.raw.get_physical_device_queue_family_properties(phys);
    let Some(families) = find_queue_families(&families, |i| {
        instance
            .surface_loader
            .get_physical_device_surface_support(phys, i, instance.surface)
            .unwrap_or(false)
    }) else {
        return Ok(Err("no graphics or present queue family".into()));
    };

    let exts = instance
        .raw
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let has_swapchain = exts
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
    if !has_swapchain {
        return Ok(Err(format!("missing {}", swapchain::NAME.to_string_lossy())));
    }

    let support = surface_support(instance, phys)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Ok(Err("surface exposes no formats or present modes".into()));
    }

    let features = instance.raw.get_physical_device_features(phys);
    if features.sampler_anisotropy != vk::TRUE {
        return Ok(Err("no samplerAnisotropy".into()));
    }
    Ok(Ok(families))
}

pub struct Device {
    command_pool: Owned<vk::CommandPool>,
    raw: Arc<RawDevice>,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Device {
    /// Selects a physical device for `instance`'s surface and creates the
    /// logical device, its queues and the command pool.
    pub unsafe fn new(instance: RawInstance) -> Result<Self> {
        let instance = Arc::new(instance);
        let candidates = instance
            .raw
            .enumerate_physical_devices()
            .context("enumerate_physical_devices")?;

        let mut rejected = Vec::new();
        let mut picked = None;
        for phys in candidates {
            let name = CStr::from_ptr(
                instance
                    .raw
                    .get_physical_device_properties(phys)
                    .device_name
                    .as_ptr(),
            )
            .to_string_lossy()
            .into_owned();
            match check_device(&instance, phys)? {
                Ok(families) => {
                    picked = Some((phys, families, name));
                    break;
                }
                Err(reason) => {
                    debug!("skipping {name}: {reason}");
                    rejected.push(format!("{name}: {reason}"));
                }
            }
        }
        let Some((phys, families, name)) = picked else {
            let detail = if rejected.is_empty() {
                "no Vulkan devices".to_string()
            } else {
                rejected.join("; ")
            };
            return Err(RenderError::NoSuitableDevice(detail).into());
        };

        let properties = instance.raw.get_physical_device_properties(phys);
        let memory_properties = instance.raw.get_physical_device_memory_properties(phys);

        let priorities = [1.0_f32];
        let unique: BTreeSet<u32> = [families.graphics, families.present].into();
        let queue_infos: Vec<_> = unique
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = instance
            .raw
            .create_device(phys, &dinfo, None)
            .context("create_device")?;
        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        let raw = Arc::new(RawDevice {
            swapchain: swapchain::Device::new(&instance.raw, &device),
            raw: device,
            instance,
        });

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::TRANSIENT
                | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = raw
            .raw
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let command_pool = Owned::new(&raw, pool);

        info!(
            "GPU: {name} (graphics family {}, present family {})",
            families.graphics, families.present
        );
        Ok(Self {
            command_pool,
            raw,
            phys,
            families,
            graphics_queue,
            present_queue,
            properties,
            memory_properties,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw.raw
    }

    pub fn shared(&self) -> &Arc<RawDevice> {
        &self.raw
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.raw.swapchain
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool.raw()
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    pub unsafe fn surface_support(&self) -> Result<SurfaceSupport> {
        surface_support(&self.raw.instance, self.phys)
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.raw.instance.surface
    }

    pub fn find_memory_type(&self, type_bits: u32, properties: MemoryProperties) -> Result<u32> {
        pick_memory_type(&self.memory_properties, type_bits, vk_memory_flags(properties)).ok_or_else(
            || {
                RenderError::NoSuitableMemoryType {
                    type_bits,
                    properties,
                }
                .into()
            },
        )
    }

    pub unsafe fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&f| {
                let props = self
                    .raw
                    .instance
                    .raw
                    .get_physical_device_format_properties(self.phys, f);
                format_supported(props, tiling, features)
            })
            .ok_or_else(|| {
                RenderError::NoSuitableDevice(format!(
                    "none of {candidates:?} supports {features:?} with {tiling:?} tiling"
                ))
                .into()
            })
    }

    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: MemoryProperties,
    ) -> Result<(Owned<vk::Buffer>, Owned<vk::DeviceMemory>)> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = Owned::new(&self.raw, self.raw().create_buffer(&bci, None)?);
        let req = self.raw().get_buffer_memory_requirements(buffer.raw());
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, properties)?,
            ..Default::default()
        };
        let memory = Owned::new(&self.raw, self.raw().allocate_memory(&mai, None)?);
        self.raw()
            .bind_buffer_memory(buffer.raw(), memory.raw(), 0)
            .context("bind_buffer_memory")?;
        Ok((buffer, memory))
    }

    pub unsafe fn create_image_with_info(
        &self,
        info: &vk::ImageCreateInfo,
        properties: MemoryProperties,
    ) -> Result<(Owned<vk::Image>, Owned<vk::DeviceMemory>)> {
        let image = Owned::new(&self.raw, self.raw().create_image(info, None)?);
        let req = self.raw().get_image_memory_requirements(image.raw());
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, properties)?,
            ..Default::default()
        };
        let memory = Owned::new(&self.raw, self.raw().allocate_memory(&mai, None)?);
        self.raw()
            .bind_image_memory(image.raw(), memory.raw(), 0)
            .context("bind_image_memory")?;
        Ok((image, memory))
    }

    pub unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Owned<vk::ImageView>> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = self
            .raw()
            .create_image_view(&info, None)
            .context("create_image_view")?;
        Ok(Owned::new(&self.raw, view))
    }

    pub unsafe fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        Ok(self.raw().allocate_command_buffers(&info)?)
    }

    pub unsafe fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let cmd = self.allocate_command_buffers(1)?[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        if let Err(e) = self.raw().begin_command_buffer(cmd, &bi) {
            self.raw()
                .free_command_buffers(self.command_pool(), std::slice::from_ref(&cmd));
            return Err(e).context("begin_command_buffer (single time)");
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for `cmd`, then frees it.
    pub unsafe fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let res = (|| -> Result<()> {
            self.raw().end_command_buffer(cmd)?;
            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            self.raw()
                .queue_submit(self.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())?;
            self.raw().queue_wait_idle(self.graphics_queue)?;
            Ok(())
        })();
        self.raw()
            .free_command_buffers(self.command_pool(), std::slice::from_ref(&cmd));
        res.context("single time command submission")
    }

    /// Records `record` into a fresh one-shot command buffer and runs it to
    /// completion. The buffer is freed on every path.
    pub unsafe fn one_shot<R>(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> Result<R>,
    ) -> Result<R> {
        let cmd = self.begin_single_time_commands()?;
        match record(cmd) {
            Ok(out) => {
                self.end_single_time_commands(cmd)?;
                Ok(out)
            }
            Err(e) => {
                // Nothing was submitted; just give the buffer back.
                let _ = self.raw().end_command_buffer(cmd);
                self.raw()
                    .free_command_buffers(self.command_pool(), std::slice::from_ref(&cmd));
                Err(e)
            }
        }
    }

    pub unsafe fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()> {
        self.one_shot(|cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            self.raw()
                .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
            Ok(())
        })
    }

    /// Image must already be in `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> Result<()> {
        self.one_shot(|cmd| {
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            self.raw().cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            Ok(())
        })
    }

    /// Records one pipeline barrier moving `image` from `old` to `new`.
    /// Only the pairs in [`LayoutTransition`] are accepted.
    pub unsafe fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: ImageLayout,
        new: ImageLayout,
    ) -> Result<()> {
        let transition = LayoutTransition::classify(old, new)?;
        let masks = barrier_masks(transition);
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: masks.src_access,
            dst_access_mask: masks.dst_access,
            old_layout: vk_layout(old),
            new_layout: vk_layout(new),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect_for(format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        self.one_shot(|cmd| {
            self.raw().cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
            Ok(())
        })
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw().device_wait_idle() }.context("device_wait_idle")
    }
}

impl TransferDevice for Device {
    type Buffer = Buffer;

    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperties,
    ) -> Result<Buffer> {
        Buffer::new(self, size, 1, vk_buffer_usage(usage), memory, 1)
    }

    fn write_buffer(&self, buffer: &mut Buffer, bytes: &[u8]) -> Result<()> {
        buffer.map(vk::WHOLE_SIZE, 0)?;
        buffer.write_to_buffer(bytes, 0);
        buffer.unmap();
        Ok(())
    }

    fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: u64) -> Result<()> {
        unsafe { Device::copy_buffer(self, src.raw(), dst.raw(), size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_one_family_for_graphics_and_present() {
        let fams = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let got = find_queue_families(&fams, |i| i != 1).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 2, present: 2 });
    }

    #[test]
    fn split_graphics_and_present_families() {
        let fams = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let got = find_queue_families(&fams, |i| i == 1).unwrap();
        assert_eq!(got, QueueFamilies { graphics: 0, present: 1 });
    }

    #[test]
    fn no_present_family_rejects_device() {
        let fams = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&fams, |_| false).is_none());
    }

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let props = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let staging = vk_memory_flags(MemoryProperties::STAGING);
        assert_eq!(pick_memory_type(&props, 0b111, staging), Some(2));
        assert_eq!(pick_memory_type(&props, 0b011, staging), None);
        assert_eq!(
            pick_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
    }

    #[test]
    fn usage_flags_translate() {
        let flags = vk_buffer_usage(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(
            flags,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(
            vk_memory_flags(MemoryProperties::DEVICE_LOCAL),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
    }

    #[test]
    fn every_transition_has_ordered_masks() {
        for t in LayoutTransition::ALL {
            let m = barrier_masks(t);
            assert!(!m.dst_access.is_empty(), "{t:?}");
            assert_ne!(m.src_stage, m.dst_stage, "{t:?}");
        }
        let upload = barrier_masks(LayoutTransition::TransferDstToShaderRead);
        assert_eq!(upload.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_aspects() {
        assert_eq!(aspect_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn format_support_checks_requested_tiling() {
        let props = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let f = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert!(format_supported(props, vk::ImageTiling::OPTIMAL, f));
        assert!(!format_supported(props, vk::ImageTiling::LINEAR, f));
    }
}
