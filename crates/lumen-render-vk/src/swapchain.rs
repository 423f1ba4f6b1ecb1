// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and the per-slot sync objects that gate it.
use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{
    check_chain_formats, ImageLayout, ImageOwners, MemoryProperties, PresentStatus, RenderError,
    RenderSize, MAX_FRAMES_IN_FLIGHT,
};
use tracing::info;

use crate::device::{aspect_for, Device};
use crate::handle::Owned;

/// Preferred presentation mode; falls back to FIFO when unavailable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PresentMode {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    want: PresentMode,
) -> vk::PresentModeKHR {
    let preferred = match want {
        PresentMode::Mailbox => Some(vk::PresentModeKHR::MAILBOX),
        PresentMode::Immediate => Some(vk::PresentModeKHR::IMMEDIATE),
        PresentMode::Fifo => None,
    };
    // FIFO is the only mode every implementation must support.
    preferred
        .filter(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub(crate) fn acquire_status(
    result: Result<(u32, bool), vk::Result>,
) -> Result<(u32, PresentStatus), RenderError> {
    match result {
        Ok((index, false)) => Ok((index, PresentStatus::Success)),
        Ok((index, true)) => Ok((index, PresentStatus::Suboptimal)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((u32::MAX, PresentStatus::OutOfDate)),
        Err(e) => Err(RenderError::Api {
            call: "vkAcquireNextImageKHR",
            result: format!("{e:?}"),
        }),
    }
}

pub(crate) fn present_status(result: Result<bool, vk::Result>) -> Result<PresentStatus, RenderError> {
    match result {
        Ok(false) => Ok(PresentStatus::Success),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(RenderError::Api {
            call: "vkQueuePresentKHR",
            result: format!("{e:?}"),
        }),
    }
}

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

struct FrameSync {
    image_available: Owned<vk::Semaphore>,
    render_finished: Owned<vk::Semaphore>,
    in_flight: Owned<vk::Fence>,
}

struct DepthTarget {
    view: Owned<vk::ImageView>,
    _image: Owned<vk::Image>,
    _memory: Owned<vk::DeviceMemory>,
}

pub struct Swapchain {
    // STRICT TEARDOWN ORDER (field order): framebuffers, render pass, depth
    // targets, image views, then the swapchain that owns the images.
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    render_pass: Owned<vk::RenderPass>,
    depth: Vec<DepthTarget>,
    image_views: Vec<Owned<vk::ImageView>>,
    swapchain: Owned<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    sync: Vec<FrameSync>,
    owners: ImageOwners,
    image_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl Swapchain {
    /// Builds a chain for `window_extent`. When `previous` is given it is
    /// handed to the driver as `old_swapchain` and must stay alive until this
    /// returns.
    pub unsafe fn new(
        device: &Device,
        window_extent: RenderSize,
        present_mode: PresentMode,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = device.surface_support()?;
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| RenderError::NoSuitableDevice("surface reports no formats".into()))?;
        let mode = choose_present_mode(&support.present_modes, present_mode);
        let extent = choose_extent(&support.capabilities, window_extent);
        let min_images = image_count(&support.capabilities);

        let families = device.families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, index_count, p_indices) = if families.graphics != families.present {
            (vk::SharingMode::CONCURRENT, 2, family_indices.as_ptr())
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: device.surface(),
            min_image_count: min_images,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: p_indices,
            pre_transform: support.capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: mode,
            clipped: vk::TRUE,
            old_swapchain: previous
                .map(|p| p.swapchain.raw())
                .unwrap_or(vk::SwapchainKHR::null()),
            ..Default::default()
        };
        let loader = device.swapchain_loader();
        let swapchain = Owned::new(
            device.shared(),
            loader
                .create_swapchain(&info, None)
                .context("create_swapchain")?,
        );
        let images = loader
            .get_swapchain_images(swapchain.raw())
            .context("get_swapchain_images")?;

        let image_views = images
            .iter()
            .map(|&img| device.create_image_view(img, surface_format.format, vk::ImageAspectFlags::COLOR))
            .collect::<Result<Vec<_>>>()?;

        let depth_format = device.find_supported_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        let depth = (0..images.len())
            .map(|_| create_depth_target(device, depth_format, extent))
            .collect::<Result<Vec<_>>>()?;

        let render_pass = create_render_pass(device, surface_format.format, depth_format)?;

        let framebuffers = image_views
            .iter()
            .zip(&depth)
            .map(|(view, d)| -> Result<Owned<vk::Framebuffer>> {
                let attachments = [view.raw(), d.view.raw()];
                let fb_info = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: render_pass.raw(),
                    attachment_count: attachments.len() as u32,
                    p_attachments: attachments.as_ptr(),
                    width: extent.width,
                    height: extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let fb = device
                    .raw()
                    .create_framebuffer(&fb_info, None)
                    .context("create_framebuffer")?;
                Ok(Owned::new(device.shared(), fb))
            })
            .collect::<Result<Vec<_>>>()?;

        let sync = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| create_frame_sync(device))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "swap chain: {:?} / {:?}, depth {:?}, {:?}, {}x{}, {} images",
            surface_format.format,
            surface_format.color_space,
            depth_format,
            mode,
            extent.width,
            extent.height,
            images.len()
        );

        let chain = Self {
            framebuffers,
            render_pass,
            depth,
            image_views,
            swapchain,
            owners: ImageOwners::new(images.len()),
            images,
            sync,
            image_format: surface_format.format,
            depth_format,
            extent,
            graphics_queue: device.graphics_queue(),
            present_queue: device.present_queue(),
        };
        debug_assert!(chain.lengths_agree());
        Ok(chain)
    }

    pub fn lengths_agree(&self) -> bool {
        let n = self.images.len();
        self.image_views.len() == n && self.depth.len() == n && self.framebuffers.len() == n
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index].raw()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_format(&self) -> vk::Format {
        self.image_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// A rebuilt chain must keep the formats of its predecessor.
    pub fn compare_formats(&self, other: &Swapchain) -> Result<(), RenderError> {
        check_chain_formats(
            self.image_format,
            self.depth_format,
            other.image_format,
            other.depth_format,
        )
    }

    /// Waits on `slot`'s fence, then acquires the next image, signalling the
    /// slot's "image available" semaphore.
    pub unsafe fn acquire_next_image(&self, slot: usize) -> Result<(u32, PresentStatus)> {
        let sync = &self.sync[slot];
        let device = &self.swapchain.device().raw;
        device
            .wait_for_fences(&[sync.in_flight.raw()], true, u64::MAX)
            .context("wait_for_fences (slot)")?;
        let result = self.swapchain.device().swapchain.acquire_next_image(
            self.swapchain.raw(),
            u64::MAX,
            sync.image_available.raw(),
            vk::Fence::null(),
        );
        Ok(acquire_status(result)?)
    }

    /// Submits `cmd` for `image_index` on behalf of `slot` and presents it.
    pub unsafe fn submit_command_buffers(
        &mut self,
        slot: usize,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentStatus> {
        let device = &self.swapchain.device().raw;

        // An earlier frame in another slot may still be rendering into this image.
        if let Some(prev) = self.owners.claim(image_index as usize, slot) {
            device
                .wait_for_fences(&[self.sync[prev].in_flight.raw()], true, u64::MAX)
                .context("wait_for_fences (image owner)")?;
        }

        let sync = &self.sync[slot];
        let wait = [sync.image_available.raw()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [sync.render_finished.raw()];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        device
            .reset_fences(&[sync.in_flight.raw()])
            .context("reset_fences")?;
        device
            .queue_submit(
                self.graphics_queue,
                std::slice::from_ref(&submit),
                sync.in_flight.raw(),
            )
            .context("failed to submit draw command buffer")?;

        let swapchains = [self.swapchain.raw()];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: signal.len() as u32,
            p_wait_semaphores: signal.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: &image_index,
            ..Default::default()
        };
        let result = self
            .swapchain
            .device()
            .swapchain
            .queue_present(self.present_queue, &present);
        Ok(present_status(result)?)
    }
}

unsafe fn create_depth_target(
    device: &Device,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<DepthTarget> {
    let info = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let (image, memory) = device.create_image_with_info(&info, MemoryProperties::DEVICE_LOCAL)?;
    device.transition_image_layout(
        image.raw(),
        format,
        ImageLayout::Undefined,
        ImageLayout::DepthStencilAttachment,
    )?;
    let view = device.create_image_view(image.raw(), format, aspect_for(format))?;
    Ok(DepthTarget {
        view,
        _image: image,
        _memory: memory,
    })
}

unsafe fn create_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<Owned<vk::RenderPass>> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: stages,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    let rp = device
        .raw()
        .create_render_pass(&rp_info, None)
        .context("create_render_pass")?;
    Ok(Owned::new(device.shared(), rp))
}

unsafe fn create_frame_sync(device: &Device) -> Result<FrameSync> {
    let sem_info = vk::SemaphoreCreateInfo::default();
    // Signalled so the first wait on each slot returns immediately.
    let fence_info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    let d = device.raw();
    Ok(FrameSync {
        image_available: Owned::new(device.shared(), d.create_semaphore(&sem_info, None)?),
        render_finished: Owned::new(device.shared(), d.create_semaphore(&sem_info, None)?),
        in_flight: Owned::new(device.shared(), d.create_fence(&fence_info, None)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra8_srgb_nonlinear() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let picked = choose_surface_format(&formats).unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let picked = choose_surface_format(&formats).unwrap();
        assert_eq!(picked.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_preference_with_fifo_fallback() {
        use vk::PresentModeKHR as M;
        let all = [M::FIFO, M::MAILBOX, M::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, PresentMode::Mailbox), M::MAILBOX);
        assert_eq!(choose_present_mode(&all, PresentMode::Immediate), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&all, PresentMode::Fifo), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO], PresentMode::Mailbox), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO], PresentMode::Immediate), M::FIFO);
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_current_when_fixed() {
        let c = caps((1024, 768), (1, 1), (4096, 4096));
        let e = choose_extent(&c, RenderSize::new(10, 10));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn extent_clamps_window_size_when_free() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (2048, 1024));
        let e = choose_extent(&c, RenderSize::new(4000, 10));
        assert_eq!((e.width, e.height), (2048, 64));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 0;
        assert_eq!(image_count(&c), 3);
    }

    #[test]
    fn acquire_results_map_to_statuses() {
        assert_eq!(acquire_status(Ok((1, false))).unwrap(), (1, PresentStatus::Success));
        assert_eq!(acquire_status(Ok((2, true))).unwrap(), (2, PresentStatus::Suboptimal));
        assert_eq!(
            acquire_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap().1,
            PresentStatus::OutOfDate
        );
        assert!(acquire_status(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_results_map_to_statuses() {
        assert_eq!(present_status(Ok(false)).unwrap(), PresentStatus::Success);
        assert_eq!(present_status(Ok(true)).unwrap(), PresentStatus::Suboptimal);
        assert_eq!(
            present_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentStatus::OutOfDate
        );
        let err = present_status(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).unwrap_err();
        assert!(err.to_string().contains("vkQueuePresentKHR"));
    }
}
