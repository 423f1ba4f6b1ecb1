// SPDX-License-Identifier: CEPL-1.0
//! Draw systems recorded inside the chain render pass: textured meshes, then
//! the point light billboard on top.
use anyhow::Result;
use lumen_math::{Camera, Mat4, PushConstants};
use lumen_render_vk::ash::vk;
use lumen_render_vk::{
    create_pipeline_layout, shaders, DescriptorSetLayout, DescriptorWriter, Device, Mesh, Owned,
    Pipeline, PipelineConfig, Texture, Vertex, VkFrameInfo,
};

pub struct SceneObject {
    pub mesh: Mesh,
    pub texture: Texture,
    pub transform: Mat4,
}

pub struct MeshRenderSystem {
    pipeline: Pipeline,
    layout: Owned<vk::PipelineLayout>,
    material_layout: DescriptorSetLayout,
}

const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

impl MeshRenderSystem {
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        global_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let material_layout = DescriptorSetLayout::builder(device)
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build()?;
        let push = vk::PushConstantRange {
            stage_flags: PUSH_STAGES,
            offset: 0,
            size: std::mem::size_of::<PushConstants>() as u32,
        };
        let layout = create_pipeline_layout(
            device,
            &[global_layout, material_layout.raw()],
            std::slice::from_ref(&push),
        )?;
        let config = PipelineConfig::new(render_pass, layout.raw()).with_vertex_input(
            Vertex::binding_descriptions(),
            Vertex::attribute_descriptions(),
        );
        let pipeline = Pipeline::new(device, shaders::MESH_VERT, shaders::MESH_FRAG, &config)?;
        Ok(Self {
            pipeline,
            layout,
            material_layout,
        })
    }

    /// Material sets come from the frame's pool and die with it.
    pub fn render(
        &self,
        device: &Device,
        frame: &VkFrameInfo<'_, Camera>,
        objects: &[SceneObject],
    ) -> Result<()> {
        let cmd = frame.command_buffer;
        self.pipeline.bind(device, cmd);
        for obj in objects {
            let material = DescriptorWriter::new(&self.material_layout, frame.frame_pool)
                .write_image(0, obj.texture.descriptor_info())
                .build()?;
            let push = PushConstants::from_model(obj.transform);
            unsafe {
                device.raw().cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.layout.raw(),
                    0,
                    &[frame.global_descriptor_set, material],
                    &[],
                );
                device.raw().cmd_push_constants(
                    cmd,
                    self.layout.raw(),
                    PUSH_STAGES,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }
            obj.mesh.bind(device, cmd);
            obj.mesh.draw(device, cmd);
        }
        Ok(())
    }
}

/// Vertices in the light billboard; positions come from `gl_VertexIndex`.
pub const BILLBOARD_VERTICES: u32 = 6;

/// No vertex input, blended over the scene, not written to depth.
fn point_light_config(render_pass: vk::RenderPass, layout: vk::PipelineLayout) -> PipelineConfig {
    let mut config = PipelineConfig::new(render_pass, layout).with_alpha_blend();
    config.depth_write = false;
    config
}

/// Draws the scene's point light as a camera-facing disc. Reads position,
/// radius and color from the global UBO only.
pub struct PointLightSystem {
    pipeline: Pipeline,
    layout: Owned<vk::PipelineLayout>,
}

impl PointLightSystem {
    pub fn new(
        device: &Device,
        render_pass: vk::RenderPass,
        global_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let layout = create_pipeline_layout(device, &[global_layout], &[])?;
        let config = point_light_config(render_pass, layout.raw());
        let pipeline = Pipeline::new(
            device,
            shaders::POINT_LIGHT_VERT,
            shaders::POINT_LIGHT_FRAG,
            &config,
        )?;
        Ok(Self { pipeline, layout })
    }

    pub fn render(&self, device: &Device, frame: &VkFrameInfo<'_, Camera>) {
        let cmd = frame.command_buffer;
        self.pipeline.bind(device, cmd);
        unsafe {
            device.raw().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.raw(),
                0,
                &[frame.global_descriptor_set],
                &[],
            );
            device.raw().cmd_draw(cmd, BILLBOARD_VERTICES, 1, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_billboard_has_no_vertex_input() {
        let config = point_light_config(vk::RenderPass::null(), vk::PipelineLayout::null());
        assert!(config.bindings.is_empty());
        assert!(config.attributes.is_empty());
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(BILLBOARD_VERTICES % 3, 0);
    }

    #[test]
    fn light_billboard_blends_without_writing_depth() {
        let config = point_light_config(vk::RenderPass::null(), vk::PipelineLayout::null());
        assert!(config.blend);
        assert!(config.depth_test);
        assert!(!config.depth_write);
    }
}
