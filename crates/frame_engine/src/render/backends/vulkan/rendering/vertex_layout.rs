//! Vertex format and mesh data

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// 2D position, RGB colour and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in normalized device coordinates
    pub position: [f32; 2],
    /// Linear RGB colour
    pub color: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(position: [f32; 2], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, uv }
    }
}

/// Vertex input descriptions matching [`Vertex`]
pub struct VertexLayout;

impl VertexLayout {
    /// Single interleaved binding at slot 0
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position, colour and uv at locations 0, 1 and 2
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 8,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: 20,
            },
        ]
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle indices into `vertices`
    pub indices: Vec<u16>,
}

impl Mesh {
    /// Build a mesh, rejecting empty data and out-of-range indices
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u16>) -> VulkanResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "Mesh needs at least one vertex and one index".to_string(),
            });
        }
        if indices.len() % 3 != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Index count {} is not a multiple of 3", indices.len()),
            });
        }
        if let Some(&bad) = indices.iter().find(|&&i| usize::from(i) >= vertices.len()) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Index {bad} out of range for {} vertices", vertices.len()),
            });
        }
        Ok(Self { vertices, indices })
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_offsets_match_struct() {
        assert_eq!(VertexLayout::binding_description().stride, 28);

        let vertex = Vertex::new([1.0, 2.0], [3.0, 4.0, 5.0], [6.0, 7.0]);
        let bytes = bytemuck::bytes_of(&vertex);
        let read = |offset: u32| f32::from_ne_bytes(bytes[offset as usize..offset as usize + 4].try_into().unwrap());

        let [position, color, uv] = VertexLayout::attribute_descriptions();
        assert_eq!(read(position.offset), 1.0);
        assert_eq!(read(color.offset), 3.0);
        assert_eq!(read(uv.offset), 6.0);
    }

    #[test]
    fn test_mesh_validation() {
        let v = Vertex::new([0.0, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0]);
        assert!(Mesh::new(vec![v; 3], vec![0, 1, 2]).is_ok());
        assert!(Mesh::new(vec![v; 3], vec![0, 1, 3]).is_err());
        assert!(Mesh::new(vec![v; 3], vec![0, 1]).is_err());
        assert!(Mesh::new(Vec::new(), Vec::new()).is_err());
    }
}
