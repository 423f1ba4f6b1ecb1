// SPDX-License-Identifier: CEPL-1.0
//! Indexed meshes living in device-local memory.
use std::mem::{offset_of, size_of};

use anyhow::{ensure, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use lumen_render::{upload_device_local, BufferUsage};
use tracing::debug;

use crate::buffer::Buffer;
use crate::device::Device;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Locations 0..=3: position, normal, tangent, uv.
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attr = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attr(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, tangent)),
            attr(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }
}

/// CPU-side geometry.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// A single upward-facing triangle with UVs spanning the texture.
    pub fn triangle() -> Self {
        let v = |x: f32, y: f32, u: f32, t: f32| Vertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            tangent: [1.0, 0.0, 0.0],
            uv: [u, t],
        };
        Self {
            vertices: vec![v(0.0, -0.5, 0.5, 0.0), v(0.5, 0.5, 1.0, 1.0), v(-0.5, 0.5, 0.0, 1.0)],
            indices: vec![0, 1, 2],
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.vertices.len() >= 3, "mesh needs at least 3 vertices");
        ensure!(
            self.indices.len() % 3 == 0 && !self.indices.is_empty(),
            "index count {} is not a whole number of triangles",
            self.indices.len()
        );
        let n = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= n) {
            anyhow::bail!("index {bad} out of range for {n} vertices");
        }
        Ok(())
    }
}

pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    pub fn new(device: &Device, data: &MeshData) -> Result<Self> {
        data.validate()?;
        let vertex_buffer = upload_device_local(
            device,
            bytemuck::cast_slice(&data.vertices),
            BufferUsage::VERTEX,
        )?;
        let index_buffer = upload_device_local(
            device,
            bytemuck::cast_slice(&data.indices),
            BufferUsage::INDEX,
        )?;
        debug!(
            "mesh: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn bind(&self, device: &Device, cmd: vk::CommandBuffer) {
        unsafe {
            device
                .raw()
                .cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.raw()], &[0]);
            device
                .raw()
                .cmd_bind_index_buffer(cmd, self.index_buffer.raw(), 0, vk::IndexType::UINT32);
        }
    }

    pub fn draw(&self, device: &Device, cmd: vk::CommandBuffer) {
        unsafe { device.raw().cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0) };
    }
}
