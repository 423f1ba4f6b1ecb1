// SPDX-License-Identifier: CEPL-1.0
//! Everything that lives on the GPU for the lifetime of the window.
use anyhow::{Context, Result};
use lumen_core::{CompressedImage, TextureCache};
use lumen_math::{Camera, GlobalUbo, Mat4, PointLight, AMBIENT_LIGHT};
use lumen_platform::winit::window::Window;
use lumen_platform::WindowState;
use lumen_render::{FramePools, FrameRenderer, MemoryProperties, RenderSize, MAX_FRAMES_IN_FLIGHT};
use lumen_render_vk::ash::vk;
use lumen_render_vk::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, Device, Mesh, MeshData,
    Texture, VkBackend, VkConfig, VkFrameInfo,
};
use tracing::{info, warn};

use crate::config::AppCfg;
use crate::render_system::{MeshRenderSystem, PointLightSystem, SceneObject};

const FRAME_POOL_SETS: u32 = 1000;
const CHECKER_STEM: &str = "checker";
const CHECKER_SIZE: u32 = 64;

/// Drop order is field order: scene and pools first, the renderer (and with it
/// the device) last.
pub struct Gpu {
    scene: Vec<SceneObject>,
    system: MeshRenderSystem,
    light_system: PointLightSystem,
    frame_pools: FramePools<DescriptorPool>,
    global_sets: Vec<vk::DescriptorSet>,
    _global_pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    ubo_buffer: Buffer,
    camera: Camera,
    light: PointLight,
    angle: f32,
    renderer: FrameRenderer<VkBackend>,
}

impl Gpu {
    pub fn new(window: &Window, cfg: &AppCfg, vk_cfg: &VkConfig, cache: &TextureCache) -> Result<Self> {
        let size = window.inner_size();
        let backend = VkBackend::new(
            window,
            window,
            RenderSize::new(size.width, size.height),
            vk_cfg,
        )
        .context("Vulkan init failed")?;
        let mut renderer = FrameRenderer::new(backend);
        renderer.set_clear_color(cfg.render.clear_color);
        let device = renderer.backend().device();

        // One aligned UBO instance per frame slot.
        let mut ubo_buffer = Buffer::new(
            device,
            GlobalUbo::SIZE,
            MAX_FRAMES_IN_FLIGHT as u32,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryProperties::STAGING,
            device.min_uniform_buffer_offset_alignment(),
        )?;
        ubo_buffer.map(vk::WHOLE_SIZE, 0)?;

        let global_pool = DescriptorPool::builder(device)
            .set_max_sets(MAX_FRAMES_IN_FLIGHT as u32)
            .add_pool_size(
                vk::DescriptorType::UNIFORM_BUFFER,
                MAX_FRAMES_IN_FLIGHT as u32,
            )
            .build()?;
        let global_layout = DescriptorSetLayout::builder(device)
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )
            .build()?;
        let global_sets = (0..MAX_FRAMES_IN_FLIGHT as u32)
            .map(|slot| {
                DescriptorWriter::new(&global_layout, &global_pool)
                    .write_buffer(0, ubo_buffer.descriptor_info_for_index(slot))
                    .build()
            })
            .collect::<Result<Vec<_>>>()?;

        let frame_pools = FramePools::new(|_| {
            DescriptorPool::builder(device)
                .set_max_sets(FRAME_POOL_SETS)
                .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, FRAME_POOL_SETS)
                .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, FRAME_POOL_SETS)
                .set_pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .build()
        })?;

        let render_pass = renderer.backend().render_pass();
        let system = MeshRenderSystem::new(device, render_pass, global_layout.raw())?;
        let light_system = PointLightSystem::new(device, render_pass, global_layout.raw())?;

        let scene = vec![SceneObject {
            mesh: Mesh::new(device, &MeshData::triangle())?,
            texture: load_texture(device, cache)?,
            transform: Mat4::IDENTITY,
        }];

        let mut camera = Camera::default();
        camera.set_aspect(renderer.aspect_ratio());
        info!("scene ready: {} object(s)", scene.len());

        Ok(Self {
            scene,
            system,
            light_system,
            frame_pools,
            global_sets,
            _global_pool: global_pool,
            _global_layout: global_layout,
            ubo_buffer,
            camera,
            light: PointLight::default(),
            angle: 0.0,
            renderer,
        })
    }

    /// Records and presents one frame. `Ok(false)` means the frame was skipped.
    pub fn draw_frame(&mut self, window: &mut WindowState, dt: f32) -> Result<bool> {
        let Some(cmd) = self.renderer.begin_frame(window)? else {
            return Ok(false);
        };
        let slot = self.renderer.frame_index();

        self.angle = (self.angle + dt * 0.8) % std::f32::consts::TAU;
        for obj in &mut self.scene {
            obj.transform = Mat4::from_rotation_y(self.angle);
        }
        self.camera.set_aspect(self.renderer.aspect_ratio());

        // This slot's fence has been waited on, so its UBO is ours to write.
        let ubo = GlobalUbo::new(&self.camera, AMBIENT_LIGHT, &self.light);
        self.ubo_buffer.write_to_index(bytemuck::bytes_of(&ubo), slot as u32);
        self.ubo_buffer.flush_index(slot as u32)?;

        let frame_pool = self.frame_pools.begin_slot(slot)?;
        let info = VkFrameInfo {
            frame_index: slot,
            frame_time: dt,
            command_buffer: cmd,
            camera: &self.camera,
            global_descriptor_set: self.global_sets[slot],
            frame_pool,
        };

        self.renderer.begin_swapchain_render_pass(cmd);
        let device = self.renderer.backend().device();
        self.system.render(device, &info, &self.scene)?;
        self.light_system.render(device, &info);
        self.renderer.end_swapchain_render_pass(cmd);
        self.renderer.end_frame(window)?;
        Ok(true)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.renderer.wait_idle()
    }
}

/// A two-tone checkerboard in tightly packed RGBA8.
fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let mut px = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 230 } else { 40 };
            px.extend_from_slice(&[v, v, v, 255]);
        }
    }
    px
}

/// Loads the demo texture, building and caching it on a miss.
fn load_texture(device: &Device, cache: &TextureCache) -> Result<Texture> {
    if cache.fetch(CHECKER_STEM).is_none() {
        info!("texture cache miss for {CHECKER_STEM}, generating");
        let image = CompressedImage {
            width: CHECKER_SIZE as i32,
            height: CHECKER_SIZE as i32,
            format: vk::Format::R8G8B8A8_SRGB.as_raw(),
            data: checkerboard(CHECKER_SIZE, 8),
        };
        if let Err(e) = cache.store(CHECKER_STEM, &image) {
            warn!("could not cache {CHECKER_STEM}: {e}");
            return Texture::from_cached(device, &image);
        }
    }
    Texture::load_or_placeholder(device, cache, CHECKER_STEM)
}
