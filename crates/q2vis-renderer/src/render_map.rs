// render_map.rs -- geometry and lightmaps for one visible set
//
// A RenderMap is rebuilt from scratch whenever the camera moves into a new
// cluster: faces are triangulated, their lightmaps packed into a fresh
// atlas, and the triangles laid out by texture. Drawing is then one
// draw_arrays call per texture.

use q2vis_common::bspfile::LevelData;
use q2vis_common::common::com_dprintf;
use q2vis_common::q_shared::SURF_SKY;
use q2vis_common::qfiles::{DFace, TexInfo};

use crate::backend::{RenderBackend, TextureHandle, DIFFUSE_UNIT, LIGHTMAP_UNIT};
use crate::lightmap_atlas::{
    brighten_lightmap, LightmapAtlas, LightmapDims, DEFAULT_LIGHTMAP_SCALE, DEFAULT_LIGHTMAP_SIZE,
    LIGHTMAP_SOURCE_BYTES,
};
use crate::polygon_buffer::{PolygonBuffer, TextureRange};
use crate::surface::{face_fan, Surface};
use crate::textures::MapTexture;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightmapSettings {
    /// Atlas edge length in texels.
    pub size: i32,
    pub scale: f32,
}

impl Default for LightmapSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_LIGHTMAP_SIZE,
            scale: DEFAULT_LIGHTMAP_SCALE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub faces: usize,
    pub sky: usize,
    pub lightmapped: usize,
    /// Faces without lightmap data, drawn fully bright.
    pub unlit: usize,
    /// Faces whose lightmap didn't fit in the atlas.
    pub atlas_full: usize,
    pub triangles: usize,
}

pub struct RenderMap {
    pub textures: Vec<MapTexture>,
    pub buffer: PolygonBuffer,
    pub atlas: TextureHandle,
    pub atlas_size: i32,
    pub stats: BuildStats,
}

struct SurfaceBuilder<'a> {
    level: &'a LevelData,
    textures: &'a [MapTexture],
    settings: LightmapSettings,
    atlas: LightmapAtlas,
    atlas_texture: TextureHandle,
    stats: BuildStats,
}

impl SurfaceBuilder<'_> {
    fn build(&mut self, face: &DFace, backend: &mut dyn RenderBackend) -> Option<Surface> {
        let level = self.level;
        let Some(texinfo) = usize::try_from(face.texinfo).ok().and_then(|i| level.texinfos.get(i)) else {
            log::warn!("{}: face with bad texinfo {}", level.name, face.texinfo);
            return None;
        };

        if texinfo.surface_flags().contains(SURF_SKY) {
            self.stats.sky += 1;
            return None;
        }

        let Some((texture_id, texture)) = level
            .texture_id(texinfo)
            .and_then(|id| self.textures.get(id).map(|t| (id, t)))
        else {
            log::warn!("{}: no texture for {}", level.name, texinfo.texture_name());
            return None;
        };

        let fan = face_fan(level, face);
        if fan.is_empty() {
            return None;
        }

        let mut surface = Surface::new(&fan, texinfo, texture_id, texture.width, texture.height);
        if texinfo.flags == 0 {
            self.place_lightmap(&mut surface, &fan, texinfo, face, backend);
        } else {
            self.stats.unlit += 1;
        }
        self.stats.triangles += surface.triangle_count();
        Some(surface)
    }

    /// Copy the face's lightmap into the atlas and point the surface at it.
    /// Anything that goes wrong leaves the surface on the white texel.
    fn place_lightmap(
        &mut self,
        surface: &mut Surface,
        fan: &[[f32; 3]],
        texinfo: &TexInfo,
        face: &DFace,
        backend: &mut dyn RenderBackend,
    ) {
        let dims = LightmapDims::compute(fan, texinfo);
        if dims.is_degenerate() {
            self.stats.unlit += 1;
            return;
        }

        let start = face.lightofs;
        let len = dims.texels() * LIGHTMAP_SOURCE_BYTES;
        let samples = usize::try_from(start)
            .ok()
            .and_then(|start| self.level.lighting.get(start..start + len));
        let Some(samples) = samples else {
            com_dprintf(&format!("face lightmap {}+{} outside the lighting lump\n", start, len));
            self.stats.unlit += 1;
            return;
        };

        let Some(rect) = self.atlas.allocate(dims.width, dims.height) else {
            com_dprintf(&format!("no room for a {}x{} lightmap\n", dims.width, dims.height));
            self.stats.atlas_full += 1;
            return;
        };

        let rgba = brighten_lightmap(samples, self.settings.scale);
        backend.update_sub_image(self.atlas_texture, rect.x, rect.y, rect.width, rect.height, &rgba);
        surface.set_lightmap(texinfo, &dims, &rect, self.atlas.size());
        self.stats.lightmapped += 1;
    }
}

impl RenderMap {
    /// Build the geometry and lightmap atlas for `faces`.
    pub fn new(
        level: &LevelData,
        textures: &[MapTexture],
        faces: &[usize],
        settings: LightmapSettings,
        backend: &mut dyn RenderBackend,
    ) -> Self {
        let atlas = LightmapAtlas::new(settings.size);
        let size = atlas.size() as u32;
        let atlas_texture = backend.create_texture(size, size, &[]);
        let white = atlas.white_texel();
        backend.update_sub_image(atlas_texture, white.x, white.y, 1, 1, &[255, 255, 255, 255]);

        let mut builder = SurfaceBuilder {
            level,
            textures,
            settings,
            atlas,
            atlas_texture,
            stats: BuildStats::default(),
        };

        let mut surfaces = Vec::with_capacity(faces.len());
        for &index in faces {
            let Some(face) = level.faces.get(index) else {
                log::warn!("{}: face {} out of range", level.name, index);
                continue;
            };
            builder.stats.faces += 1;
            if let Some(surface) = builder.build(face, backend) {
                surfaces.push(surface);
            }
        }

        // one mip chain for the whole atlas
        backend.generate_mipmaps(atlas_texture);

        let stats = builder.stats;
        com_dprintf(&format!(
            "RenderMap: {} faces, {} triangles, {} lightmaps, {} unlit, {} sky, {} atlas full, {} atlas texels used\n",
            stats.faces,
            stats.triangles,
            stats.lightmapped,
            stats.unlit,
            stats.sky,
            stats.atlas_full,
            builder.atlas.used_texels()
        ));

        Self {
            textures: textures.to_vec(),
            buffer: PolygonBuffer::new(&surfaces, textures.len()),
            atlas: atlas_texture,
            atlas_size: builder.atlas.size(),
            stats,
        }
    }

    pub fn range(&self, texture_id: usize) -> TextureRange {
        self.buffer.ranges.get(texture_id).copied().unwrap_or_default()
    }

    pub fn upload(&self, backend: &mut dyn RenderBackend) {
        backend.upload_vertices(self.buffer.as_bytes());
    }

    /// Bind the atlas once, then draw every texture's run of triangles.
    pub fn draw(&self, backend: &mut dyn RenderBackend) {
        backend.bind_texture(LIGHTMAP_UNIT, self.atlas);
        for (texture, range) in self.textures.iter().zip(&self.buffer.ranges) {
            if range.vert_count == 0 {
                continue;
            }
            backend.bind_texture(DIFFUSE_UNIT, texture.handle);
            backend.draw_arrays(range.vert_offset, range.vert_count);
        }
    }

    /// Give the atlas texture back to the backend.
    pub fn release(self, backend: &mut dyn RenderBackend) {
        backend.delete_texture(self.atlas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawCall, SoftwareBackend};
    use crate::lightmap_atlas::UNLIT_LIGHTMAP_UV;
    use q2vis_common::bspfile::texture_ids;
    use q2vis_common::qfiles::{DEdge, DVertex};

    fn texinfo(name: &str, flags: i32) -> TexInfo {
        let mut ti = TexInfo {
            vecs: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
            flags,
            ..Default::default()
        };
        ti.texture[..name.len()].copy_from_slice(name.as_bytes());
        ti
    }

    fn quad_face(texinfo: i16, lightofs: i32) -> DFace {
        DFace {
            firstedge: 0,
            numedges: 4,
            texinfo,
            lightofs,
            ..Default::default()
        }
    }

    /// One 64x32 quad (a 5x3 lightmap) reused by every face.
    fn level(texinfos: Vec<TexInfo>, faces: Vec<DFace>) -> LevelData {
        let points = [[0.0, 0.0, 0.0], [64.0, 0.0, 0.0], [64.0, 32.0, 0.0], [0.0, 32.0, 0.0]];
        LevelData {
            name: "test".to_string(),
            vertices: points.iter().map(|&point| DVertex { point }).collect(),
            edges: vec![DEdge { v: [0, 0] }, DEdge { v: [0, 1] }, DEdge { v: [1, 2] }, DEdge { v: [2, 3] }, DEdge { v: [3, 0] }],
            surf_edges: vec![1, 2, 3, 4],
            texture_ids: texture_ids(&texinfos),
            texinfos,
            faces,
            lighting: vec![32; 5 * 3 * 3],
            ..Default::default()
        }
    }

    fn map_textures(backend: &mut SoftwareBackend, n: usize) -> Vec<MapTexture> {
        (0..n)
            .map(|_| MapTexture {
                handle: backend.create_texture(64, 64, &[]),
                width: 64,
                height: 64,
            })
            .collect()
    }

    fn small_atlas() -> LightmapSettings {
        LightmapSettings { size: 8, scale: 4.0 }
    }

    #[test]
    fn test_lightmapped_face() {
        let level = level(vec![texinfo("wall", 0)], vec![quad_face(0, 0)]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 1);

        let map = RenderMap::new(&level, &textures, &[0], small_atlas(), &mut backend);
        assert_eq!(map.stats.lightmapped, 1);
        assert_eq!(map.stats.triangles, 2);
        assert_eq!(map.buffer.vertex_count(), 6);
        assert_eq!(map.range(0), TextureRange { vert_offset: 0, vert_count: 6 });

        // 32 * 4 in the 5x3 corner, white in the reserved texel
        let atlas = backend.texture_pixels(map.atlas).unwrap();
        assert_eq!(&atlas[0..4], &[128, 128, 128, 255]);
        assert_eq!(&atlas[(2 * 8 + 4) * 4..(2 * 8 + 5) * 4], &[128, 128, 128, 255]);
        assert_eq!(&atlas[(2 * 8 + 5) * 4..(2 * 8 + 6) * 4], &[0, 0, 0, 0]);
        assert_eq!(&atlas[(8 * 8 - 1) * 4..], &[255, 255, 255, 255]);
        assert!(backend.mip_levels(map.atlas) > 1);

        let v = map.buffer.vertices[0];
        assert!((v.lm_coord[0] - 8.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_sky_faces_skipped() {
        let level = level(vec![texinfo("sky", SURF_SKY.bits() as i32), texinfo("wall", 0)], vec![
            quad_face(0, 0),
            quad_face(1, 0),
        ]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 2);

        let map = RenderMap::new(&level, &textures, &[0, 1], small_atlas(), &mut backend);
        assert_eq!(map.stats.sky, 1);
        assert_eq!(map.range(0).vert_count, 0);
        assert_eq!(map.range(1).vert_count, 6);
    }

    #[test]
    fn test_unlit_faces_use_white_texel() {
        // flagged texinfo, negative offset, offset past the lump
        let level = level(vec![texinfo("water", 8), texinfo("wall", 0)], vec![
            quad_face(0, 0),
            quad_face(1, -1),
            quad_face(1, 40),
        ]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 2);

        let map = RenderMap::new(&level, &textures, &[0, 1, 2], small_atlas(), &mut backend);
        assert_eq!(map.stats.unlit, 3);
        assert_eq!(map.stats.lightmapped, 0);
        assert!(map.buffer.vertices.iter().all(|v| v.lm_coord == UNLIT_LIGHTMAP_UV));
    }

    #[test]
    fn test_degenerate_lightmap_skips_atlas() {
        // non-finite texture axes give no usable lightmap extents
        let mut broken = texinfo("wall", 0);
        broken.vecs[0][0] = f32::INFINITY;
        let level = level(vec![broken], vec![quad_face(0, 0)]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 1);

        let map = RenderMap::new(&level, &textures, &[0], small_atlas(), &mut backend);
        assert_eq!(map.stats.faces, 1);
        assert_eq!(map.stats.unlit, 1);
        assert_eq!(map.stats.lightmapped, 0);
        assert_eq!(map.stats.atlas_full, 0);
        assert_eq!(map.buffer.vertex_count(), 6);
        assert!(map.buffer.vertices.iter().all(|v| v.lm_coord == UNLIT_LIGHTMAP_UV));

        // nothing but the white texel was written
        let atlas = backend.texture_pixels(map.atlas).unwrap();
        let (white, rest) = (&atlas[(8 * 8 - 1) * 4..], &atlas[..(8 * 8 - 1) * 4]);
        assert_eq!(white, &[255, 255, 255, 255]);
        assert!(rest.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_atlas_full_falls_back() {
        let faces = vec![quad_face(0, 0); 5];
        let level = level(vec![texinfo("wall", 0)], faces);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 1);

        // an 8x8 atlas only has room for two 5x3 lightmaps
        let map = RenderMap::new(&level, &textures, &[0, 1, 2, 3, 4], small_atlas(), &mut backend);
        assert_eq!(map.stats.lightmapped + map.stats.atlas_full, 5);
        assert!(map.stats.atlas_full > 0);
        assert_eq!(map.buffer.vertex_count(), 30);
    }

    #[test]
    fn test_draw_sequence() {
        let level = level(vec![texinfo("a", 0), texinfo("b", 0), texinfo("c", 0)], vec![
            quad_face(2, 0),
            quad_face(0, 0),
            quad_face(2, 0),
        ]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 3);
        let map = RenderMap::new(&level, &textures, &[0, 1, 2], LightmapSettings::default(), &mut backend);

        backend.begin_frame(&Default::default());
        map.upload(&mut backend);
        map.draw(&mut backend);
        backend.end_frame();

        assert_eq!(
            backend.draw_calls(),
            &[
                DrawCall {
                    textures: [Some(textures[0].handle), Some(map.atlas)],
                    first: 0,
                    count: 6
                },
                DrawCall {
                    textures: [Some(textures[2].handle), Some(map.atlas)],
                    first: 6,
                    count: 12
                },
            ]
        );
    }

    #[test]
    fn test_release_deletes_atlas() {
        let level = level(vec![texinfo("wall", 0)], vec![quad_face(0, 0)]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 1);
        let map = RenderMap::new(&level, &textures, &[0], small_atlas(), &mut backend);

        assert_eq!(backend.texture_count(), 2);
        let atlas = map.atlas;
        map.release(&mut backend);
        assert_eq!(backend.texture_count(), 1);
        assert!(backend.texture_pixels(atlas).is_none());
    }

    #[test]
    fn test_bad_face_indices_ignored() {
        let level = level(vec![texinfo("wall", 0)], vec![quad_face(0, 0), quad_face(7, 0)]);
        let mut backend = SoftwareBackend::new();
        let textures = map_textures(&mut backend, 1);
        let map = RenderMap::new(&level, &textures, &[0, 1, 99], small_atlas(), &mut backend);
        assert_eq!(map.stats.faces, 2);
        assert_eq!(map.buffer.vertex_count(), 6);
    }
}
