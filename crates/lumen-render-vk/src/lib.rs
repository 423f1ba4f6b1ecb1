// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: owns the instance, device and swap chain, and drives them
//! on behalf of [`lumen_render::FrameRenderer`].
use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{FrameBackend, FrameInfo, PresentStatus, RenderSize, MAX_FRAMES_IN_FLIGHT};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

pub mod handle;

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod swapchain;
pub mod texture;

pub use ash;
pub use buffer::Buffer;
pub use descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
pub use device::Device;
pub use handle::Owned;
pub use instance::Validation;
pub use mesh::{Mesh, MeshData, Vertex};
pub use pipeline::{create_pipeline_layout, Pipeline, PipelineConfig};
pub use swapchain::{PresentMode, Swapchain};
pub use texture::{CachedTextureError, Texture, TextureSource};

/// SPIR-V compiled by the build script.
pub mod shaders {
    pub const MESH_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"));
    pub const MESH_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"));
    pub const POINT_LIGHT_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/point_light.vert.spv"));
    pub const POINT_LIGHT_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/point_light.frag.spv"));
}

#[derive(Clone, Debug)]
pub struct VkConfig {
    pub app_name: String,
    pub validation: Validation,
    pub present_mode: PresentMode,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            app_name: "lumen".into(),
            validation: Validation::default(),
            present_mode: PresentMode::default(),
        }
    }
}

pub type VkFrameInfo<'a, C> = FrameInfo<'a, VkBackend, DescriptorPool, C>;

pub struct VkBackend {
    command_buffers: Vec<vk::CommandBuffer>,
    // STRICT TEARDOWN ORDER: the chain goes before the device it was built on.
    swapchain: Swapchain,
    present_mode: PresentMode,
    device: Device,
}

impl VkBackend {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &VkConfig,
    ) -> Result<Self> {
        unsafe {
            let instance =
                instance::create_instance(window, display, &config.app_name, config.validation)?;
            let device = Device::new(instance)?;
            let swapchain = Swapchain::new(&device, size, config.present_mode, None)?;
            let command_buffers = device
                .allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)
                .context("failed to allocate command buffers")?;
            info!("Vulkan backend ready");
            Ok(Self {
                command_buffers,
                swapchain,
                present_mode: config.present_mode,
                device,
            })
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle during teardown: {e:#}");
        }
        unsafe {
            self.device
                .raw()
                .free_command_buffers(self.device.command_pool(), &self.command_buffers);
        }
    }
}

pub(crate) fn clear_values(clear: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub(crate) fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

impl FrameBackend for VkBackend {
    type CommandBuffer = vk::CommandBuffer;

    fn acquire_next_image(&mut self, slot: usize) -> Result<(u32, PresentStatus)> {
        unsafe { self.swapchain.acquire_next_image(slot) }
    }

    fn command_buffer(&self, slot: usize) -> vk::CommandBuffer {
        self.command_buffers[slot]
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe {
            let d = self.device.raw();
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            d.begin_command_buffer(cmd, &info)?;
        }
        Ok(())
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.raw().end_command_buffer(cmd)? };
        Ok(())
    }

    fn submit(
        &mut self,
        slot: usize,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentStatus> {
        unsafe { self.swapchain.submit_command_buffers(slot, cmd, image_index) }
    }

    fn begin_render_pass(&mut self, cmd: vk::CommandBuffer, image_index: u32, clear: [f32; 4]) {
        let extent = self.swapchain.extent();
        let clears = clear_values(clear);
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.swapchain.render_pass(),
            framebuffer: self.swapchain.framebuffer(image_index as usize),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let (viewport, scissor) = full_viewport(extent);
        unsafe {
            let d = self.device.raw();
            d.cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.device.raw().cmd_end_render_pass(cmd) };
    }

    fn recreate_chain(&mut self, size: RenderSize) -> Result<()> {
        self.device.wait_idle()?;
        let fresh = unsafe {
            Swapchain::new(&self.device, size, self.present_mode, Some(&self.swapchain))?
        };
        self.swapchain.compare_formats(&fresh)?;
        debug!(
            "chain replaced: {} -> {} images",
            self.swapchain.image_count(),
            fresh.image_count()
        );
        // old chain (and its sync objects) dropped here, after the new one exists
        self.swapchain = fresh;
        Ok(())
    }

    fn extent(&self) -> RenderSize {
        let e = self.swapchain.extent();
        RenderSize::new(e.width, e.height)
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_color_and_far_depth() {
        let clears = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(clears[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(clears[1].depth_stencil.depth, 1.0);
            assert_eq!(clears[1].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn viewport_covers_extent() {
        let (vp, sc) = full_viewport(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!((vp.width, vp.height), (1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        assert_eq!(sc.extent.width, 1280);
        assert_eq!(sc.offset.x, 0);
    }

    #[test]
    fn default_config_prefers_mailbox() {
        let cfg = VkConfig::default();
        assert_eq!(cfg.present_mode, PresentMode::Mailbox);
        assert_eq!(cfg.validation, Validation::default());
    }

    #[test]
    fn every_shader_is_spirv() {
        for spv in [
            shaders::MESH_VERT,
            shaders::MESH_FRAG,
            shaders::POINT_LIGHT_VERT,
            shaders::POINT_LIGHT_FRAG,
        ] {
            let words = ash::util::read_spv(&mut std::io::Cursor::new(spv)).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }
}
