// Built-in geometry and its vertex layout
//
// Uploaded once at startup into device-local buffers.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::Deserialize;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use crate::backend::buffer::Buffer;
use crate::backend::VulkanDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position: Vec3::from_array(position),
            normal: Vec3::from_array(normal),
            uv: Vec2::from_array(uv),
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Which built-in shape to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Triangle,
    Quad,
}

const NORMAL: [f32; 3] = [0.0, 0.0, 1.0];

// Counter-clockwise on screen (Vulkan clip space has y pointing down)
const TRIANGLE: [Vertex; 3] = [
    Vertex::new([-0.5, 0.5, 0.0], NORMAL, [0.0, 1.0]),
    Vertex::new([0.5, 0.5, 0.0], NORMAL, [1.0, 1.0]),
    Vertex::new([0.0, -0.5, 0.0], NORMAL, [0.5, 0.0]),
];

const QUAD: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5, 0.0], NORMAL, [0.0, 0.0]),
    Vertex::new([0.5, -0.5, 0.0], NORMAL, [1.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.0], NORMAL, [1.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.0], NORMAL, [0.0, 1.0]),
];

const QUAD_INDICES: [u16; 6] = [3, 2, 1, 3, 1, 0];

impl Shape {
    pub fn vertices(self) -> &'static [Vertex] {
        match self {
            Shape::Triangle => &TRIANGLE,
            Shape::Quad => &QUAD,
        }
    }

    pub fn indices(self) -> Option<&'static [u16]> {
        match self {
            Shape::Triangle => None,
            Shape::Quad => Some(&QUAD_INDICES),
        }
    }
}

/// Geometry living in device-local memory
pub struct Mesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Option<Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Mesh {
    pub fn upload(device: &Arc<VulkanDevice>, shape: Shape) -> Result<Self> {
        let vertices = shape.vertices();
        let vertex_buffer = Buffer::upload(
            device,
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
        )?;

        let (index_buffer, index_count) = match shape.indices() {
            Some(indices) => {
                let buffer = Buffer::upload(
                    device,
                    "indices",
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    indices,
                )?;
                (Some(buffer), indices.len() as u32)
            }
            None => (None, 0),
        };

        log::info!(
            "Uploaded {:?}: {} vertex bytes, {} indices",
            shape,
            vertex_buffer.size(),
            index_count
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count,
        })
    }

    /// Bind buffers and issue the draw, indexed when there is an index buffer
    ///
    /// # Safety
    /// `cmd` must be recording inside a render pass with a compatible pipeline bound.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
        match &self.index_buffer {
            Some(indices) => {
                device.cmd_bind_index_buffer(cmd, indices.buffer, 0, vk::IndexType::UINT16);
                device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            }
            None => device.cmd_draw(cmd, self.vertex_count, 1, 0, 0),
        }
    }
}
