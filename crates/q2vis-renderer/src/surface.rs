// surface.rs -- turning BSP faces into textured triangles

use q2vis_common::bspfile::LevelData;
use q2vis_common::q_shared::{dot_product, Vec3};
use q2vis_common::qfiles::{DFace, TexInfo};

use crate::lightmap_atlas::{LightmapDims, LightmapRect, UNLIT_LIGHTMAP_UV};
use crate::polygon_buffer::BspVertex;

/// Texture-space coordinates of a world point, in texels.
#[inline]
pub fn planar_uv(p: &Vec3, texinfo: &TexInfo) -> [f32; 2] {
    [
        dot_product(p, &texinfo.u_axis()) + texinfo.u_offset(),
        dot_product(p, &texinfo.v_axis()) + texinfo.v_offset(),
    ]
}

/// Start vertex of the `index`th entry of the surfedge list. Positive
/// entries walk an edge forwards, negative ones backwards.
fn edge_vertex(level: &LevelData, index: usize) -> Option<Vec3> {
    let surf_edge = *level.surf_edges.get(index)?;
    let edge = level.edges.get(surf_edge.unsigned_abs() as usize)?;
    let vertex = if surf_edge >= 0 { edge.v[0] } else { edge.v[1] };
    level.vertices.get(vertex as usize).map(|v| v.point)
}

/// Triangulate a face as a fan around its first vertex:
/// `(v0, v1, v2), (v0, v2, v3), ...`. Faces with fewer than three edges
/// give nothing.
pub fn face_fan(level: &LevelData, face: &DFace) -> Vec<Vec3> {
    let numedges = face.numedges.max(0) as usize;
    if numedges < 3 || face.firstedge < 0 {
        return Vec::new();
    }

    let first = face.firstedge as usize;
    let polygon: Option<Vec<Vec3>> = (first..first + numedges).map(|i| edge_vertex(level, i)).collect();
    let Some(polygon) = polygon else {
        log::warn!("{}: face edges {}..{} out of range", level.name, first, first + numedges);
        return Vec::new();
    };

    let mut fan = Vec::with_capacity((numedges - 2) * 3);
    for pair in polygon[1..].windows(2) {
        fan.push(polygon[0]);
        fan.push(pair[0]);
        fan.push(pair[1]);
    }
    fan
}

/// The triangles of one face, ready for the polygon buffer.
#[derive(Debug, Clone)]
pub struct Surface {
    pub texture_id: usize,
    pub vertices: Vec<BspVertex>,
}

impl Surface {
    /// Build the vertices of a triangle fan. Diffuse coordinates are
    /// normalized by the texture size; every vertex starts out pointing at
    /// the white lightmap texel.
    pub fn new(fan: &[Vec3], texinfo: &TexInfo, texture_id: usize, texture_width: u32, texture_height: u32) -> Self {
        let (w, h) = (texture_width.max(1) as f32, texture_height.max(1) as f32);
        let vertices = fan
            .iter()
            .map(|p| {
                let [u, v] = planar_uv(p, texinfo);
                BspVertex::new(*p, [u / w, v / h], UNLIT_LIGHTMAP_UV)
            })
            .collect();
        Self { texture_id, vertices }
    }

    /// Point the lightmap coordinates at the face's rectangle in the atlas.
    pub fn set_lightmap(&mut self, texinfo: &TexInfo, dims: &LightmapDims, rect: &LightmapRect, atlas_size: i32) {
        for vertex in &mut self.vertices {
            let uv = planar_uv(&vertex.position, texinfo);
            vertex.lm_coord = dims.atlas_uv(uv, rect, atlas_size);
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}
