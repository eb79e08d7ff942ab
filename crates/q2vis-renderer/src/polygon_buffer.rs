//! Interleaved vertex buffer for the visible world.
//!
//! Triangles are grouped by diffuse texture so each texture is drawn with a
//! single `draw_arrays` call.

use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};

use crate::surface::Surface;

/// Vertex format for world surfaces: 7 floats, position then diffuse UV
/// then lightmap UV.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BspVertex {
    /// Vertex position (xyz).
    pub position: [f32; 3],
    /// Diffuse texture coordinates.
    pub tex_coord: [f32; 2],
    /// Lightmap atlas coordinates.
    pub lm_coord: [f32; 2],
}

impl BspVertex {
    /// Floats per vertex.
    pub const FLOATS: usize = 7;
    /// Size of vertex in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(position: [f32; 3], tex_coord: [f32; 2], lm_coord: [f32; 2]) -> Self {
        Self {
            position,
            tex_coord,
            lm_coord,
        }
    }
}

/// Where a texture's triangles live in the vertex buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureRange {
    /// First vertex (not float) of the texture's run.
    pub vert_offset: u32,
    pub vert_count: u32,
}

pub struct PolygonBuffer {
    pub vertices: Vec<BspVertex>,
    /// Indexed by texture id. Unused textures have a zero range.
    pub ranges: Vec<TextureRange>,
}

impl PolygonBuffer {
    /// Lay surfaces out by ascending texture id. Surfaces sharing a texture
    /// keep their relative order.
    pub fn new(surfaces: &[Surface], num_textures: usize) -> Self {
        let mut by_texture: BTreeMap<usize, Vec<&Surface>> = BTreeMap::new();
        for surface in surfaces {
            by_texture.entry(surface.texture_id).or_default().push(surface);
        }

        let total: usize = surfaces.iter().map(|s| s.vertices.len()).sum();
        let mut vertices = Vec::with_capacity(total);
        let num_ranges = by_texture.keys().next_back().map_or(num_textures, |&last| num_textures.max(last + 1));
        let mut ranges = vec![TextureRange::default(); num_ranges];

        for (texture_id, group) in by_texture {
            let vert_offset = vertices.len() as u32;
            for surface in group {
                vertices.extend_from_slice(&surface.vertices);
            }
            ranges[texture_id] = TextureRange {
                vert_offset,
                vert_count: vertices.len() as u32 - vert_offset,
            };
        }

        Self { vertices, ranges }
    }

    /// The buffer as raw bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn as_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(texture_id: usize, triangles: usize, tag: f32) -> Surface {
        Surface {
            texture_id,
            vertices: vec![BspVertex::new([tag, 0.0, 0.0], [0.0; 2], [0.0; 2]); triangles * 3],
        }
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(BspVertex::SIZE, BspVertex::FLOATS * 4);
        let v = BspVertex::new([1.0, 2.0, 3.0], [4.0, 5.0], [6.0, 7.0]);
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_grouped_by_ascending_texture() {
        let surfaces = [surface(2, 1, 1.0), surface(0, 2, 2.0), surface(2, 1, 3.0)];
        let buffer = PolygonBuffer::new(&surfaces, 4);

        assert_eq!(buffer.vertex_count(), 12);
        assert_eq!(buffer.ranges.len(), 4);
        assert_eq!(buffer.ranges[0], TextureRange { vert_offset: 0, vert_count: 6 });
        assert_eq!(buffer.ranges[1], TextureRange::default());
        assert_eq!(buffer.ranges[2], TextureRange { vert_offset: 6, vert_count: 6 });
        assert_eq!(buffer.ranges[3], TextureRange::default());

        // texture 2 keeps surface order
        assert_eq!(buffer.vertices[6].position[0], 1.0);
        assert_eq!(buffer.vertices[9].position[0], 3.0);
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let surfaces: Vec<Surface> = (0..10).map(|i| surface((i * 3) % 5, i + 1, i as f32)).collect();
        let buffer = PolygonBuffer::new(&surfaces, 5);

        let mut next = 0;
        for range in buffer.ranges.iter().filter(|r| r.vert_count > 0) {
            assert_eq!(range.vert_offset, next);
            next += range.vert_count;
        }
        assert_eq!(next as usize, buffer.vertex_count());
        assert_eq!(buffer.as_floats().len(), buffer.vertex_count() * BspVertex::FLOATS);
        assert_eq!(buffer.as_bytes().len(), buffer.vertex_count() * BspVertex::SIZE);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = PolygonBuffer::new(&[], 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.ranges, vec![TextureRange::default(); 3]);
    }
}
