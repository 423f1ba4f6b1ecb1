// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipelines against the chain render pass.
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;

use crate::device::Device;
use crate::handle::Owned;

/// Fixed-function state for a graphics pipeline. Viewport and scissor are
/// always dynamic; they're set per frame from the chain extent.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub layout: vk::PipelineLayout,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub blend: bool,
}

impl PipelineConfig {
    pub fn new(render_pass: vk::RenderPass, layout: vk::PipelineLayout) -> Self {
        Self {
            render_pass,
            subpass: 0,
            layout,
            bindings: Vec::new(),
            attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            blend: false,
        }
    }

    pub fn with_vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.bindings = bindings;
        self.attributes = attributes;
        self
    }

    /// Straight alpha blending on the color attachment.
    pub fn with_alpha_blend(mut self) -> Self {
        self.blend = true;
        self
    }

    pub(crate) fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let mut att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: COLOR_WRITE_ALL,
            blend_enable: vk::FALSE,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
        };
        if self.blend {
            att.blend_enable = vk::TRUE;
            att.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
            att.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            att.dst_alpha_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
        }
        att
    }
}

const COLOR_WRITE_ALL: vk::ColorComponentFlags = vk::ColorComponentFlags::from_raw(0b1111);

pub(crate) const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Creates a pipeline layout from descriptor set layouts and push-constant ranges.
pub fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constants: &[vk::PushConstantRange],
) -> Result<Owned<vk::PipelineLayout>> {
    let info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: set_layouts.as_ptr(),
        push_constant_range_count: push_constants.len() as u32,
        p_push_constant_ranges: push_constants.as_ptr(),
        ..Default::default()
    };
    unsafe {
        let layout = device
            .raw()
            .create_pipeline_layout(&info, None)
            .context("create_pipeline_layout")?;
        Ok(Owned::new(device.shared(), layout))
    }
}

unsafe fn shader_module(device: &Device, spv: &[u8]) -> Result<Owned<vk::ShaderModule>> {
    let code = read_spv(&mut Cursor::new(spv)).context("invalid SPIR-V")?;
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = device
        .raw()
        .create_shader_module(&info, None)
        .context("create_shader_module")?;
    Ok(Owned::new(device.shared(), module))
}

pub struct Pipeline {
    pipeline: Owned<vk::Pipeline>,
}

impl Pipeline {
    /// Shader modules only live for the duration of this call.
    pub fn new(device: &Device, vert_spv: &[u8], frag_spv: &[u8], config: &PipelineConfig) -> Result<Self> {
        unsafe {
            let vs = shader_module(device, vert_spv).context("vertex shader")?;
            let fs = shader_module(device, frag_spv).context("fragment shader")?;
            let entry = c"main";

            let stages = [
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::VERTEX,
                    module: vs.raw(),
                    p_name: entry.as_ptr(),
                    ..Default::default()
                },
                vk::PipelineShaderStageCreateInfo {
                    s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                    stage: vk::ShaderStageFlags::FRAGMENT,
                    module: fs.raw(),
                    p_name: entry.as_ptr(),
                    ..Default::default()
                },
            ];

            let vertex_input = vk::PipelineVertexInputStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
                vertex_binding_description_count: config.bindings.len() as u32,
                p_vertex_binding_descriptions: config.bindings.as_ptr(),
                vertex_attribute_description_count: config.attributes.len() as u32,
                p_vertex_attribute_descriptions: config.attributes.as_ptr(),
                ..Default::default()
            };
            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
                topology: config.topology,
                ..Default::default()
            };
            let dynamic_state = vk::PipelineDynamicStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
                dynamic_state_count: DYNAMIC_STATES.len() as u32,
                p_dynamic_states: DYNAMIC_STATES.as_ptr(),
                ..Default::default()
            };
            // counts only; the values are dynamic
            let viewport_state = vk::PipelineViewportStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
                viewport_count: 1,
                scissor_count: 1,
                ..Default::default()
            };
            let raster = vk::PipelineRasterizationStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
                polygon_mode: vk::PolygonMode::FILL,
                cull_mode: config.cull_mode,
                front_face: config.front_face,
                line_width: 1.0,
                ..Default::default()
            };
            let multisample = vk::PipelineMultisampleStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
                rasterization_samples: vk::SampleCountFlags::TYPE_1,
                min_sample_shading: 1.0,
                ..Default::default()
            };
            let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
                depth_test_enable: config.depth_test.into(),
                depth_write_enable: config.depth_write.into(),
                depth_compare_op: config.depth_compare,
                max_depth_bounds: 1.0,
                ..Default::default()
            };
            let color_blend_att = config.color_blend_attachment();
            let color_blend = vk::PipelineColorBlendStateCreateInfo {
                s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
                attachment_count: 1,
                p_attachments: &color_blend_att,
                ..Default::default()
            };

            let info = vk::GraphicsPipelineCreateInfo {
                s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
                stage_count: stages.len() as u32,
                p_stages: stages.as_ptr(),
                p_vertex_input_state: &vertex_input,
                p_input_assembly_state: &input_assembly,
                p_viewport_state: &viewport_state,
                p_rasterization_state: &raster,
                p_multisample_state: &multisample,
                p_depth_stencil_state: &depth_stencil,
                p_color_blend_state: &color_blend,
                p_dynamic_state: &dynamic_state,
                layout: config.layout,
                render_pass: config.render_pass,
                subpass: config.subpass,
                ..Default::default()
            };

            let pipelines = device
                .raw()
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&info),
                    None,
                )
                .map_err(|(_, err)| anyhow!("create_graphics_pipelines failed: {err:?}"))?;
            Ok(Self {
                pipeline: Owned::new(device.shared(), pipelines[0]),
            })
        }
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline.raw()
    }

    pub fn bind(&self, device: &Device, cmd: vk::CommandBuffer) {
        unsafe {
            device
                .raw()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.raw())
        };
    }
}
