// lightmap_atlas.rs -- packing per-face lightmaps into one shared texture
//
// The atlas is a square of `r_lightmap_size` texels carved up by a binary
// tree of rectangles. Leaves are either free or filled; internal nodes have
// exactly two children that partition them. Nodes live in an arena and
// reference each other by index. A fresh atlas is built for every visible
// set, so nothing is ever freed.

use rayon::prelude::*;

use q2vis_common::q_shared::Vec3;
use q2vis_common::qfiles::TexInfo;

use crate::surface::planar_uv;

pub const DEFAULT_LIGHTMAP_SIZE: i32 = 512;
pub const DEFAULT_LIGHTMAP_SCALE: f32 = 4.0;

/// World units per lightmap texel.
pub const LIGHTMAP_TEXEL: i32 = 16;

/// Source lightmap bytes per texel.
pub const LIGHTMAP_SOURCE_BYTES: usize = 3;
pub const LIGHTMAP_BYTES: usize = 4;

/// Atlas coordinates of the reserved white texel used by unlit faces.
pub const UNLIT_LIGHTMAP_UV: [f32; 2] = [0.999, 0.999];

/// Lightmaps with at least this many texels are brightened in parallel.
const PARALLEL_TEXEL_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightmapRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl LightmapRect {
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn overlaps(&self, other: &LightmapRect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    fn split_x(&self, width: i32) -> [LightmapRect; 2] {
        [
            LightmapRect { width, ..*self },
            LightmapRect {
                x: self.x + width,
                width: self.width - width,
                ..*self
            },
        ]
    }

    fn split_y(&self, height: i32) -> [LightmapRect; 2] {
        [
            LightmapRect { height, ..*self },
            LightmapRect {
                y: self.y + height,
                height: self.height - height,
                ..*self
            },
        ]
    }
}

#[derive(Debug, Clone)]
pub struct LightmapNode {
    pub rect: LightmapRect,
    /// Arena indices of the two halves, for internal nodes.
    pub children: Option<[usize; 2]>,
    pub filled: bool,
}

impl LightmapNode {
    fn leaf(rect: LightmapRect) -> Self {
        Self {
            rect,
            children: None,
            filled: false,
        }
    }
}

pub struct LightmapAtlas {
    size: i32,
    nodes: Vec<LightmapNode>,
}

impl LightmapAtlas {
    const ROOT: usize = 0;

    /// Create an empty atlas of `size` × `size` texels with the white texel
    /// at `(size-1, size-1)` already taken.
    ///
    /// The root therefore never starts out as a single free leaf: the last
    /// row and the white texel are carved off first, so no allocation can
    /// cover the texel and a request for the full `size` × `size` always
    /// fails.
    pub fn new(size: i32) -> Self {
        let size = size.max(2);
        let mut atlas = Self {
            size,
            nodes: vec![LightmapNode::leaf(LightmapRect {
                x: 0,
                y: 0,
                width: size,
                height: size,
            })],
        };
        atlas.reserve_white_texel();
        atlas
    }

    fn reserve_white_texel(&mut self) {
        let [_, last_row] = self.split(Self::ROOT, |r| r.split_y(r.height - 1));
        let [_, white] = self.split(last_row, |r| r.split_x(r.width - 1));
        self.nodes[white].filled = true;
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn nodes(&self) -> &[LightmapNode] {
        &self.nodes
    }

    /// The reserved white texel.
    pub fn white_texel(&self) -> LightmapRect {
        LightmapRect {
            x: self.size - 1,
            y: self.size - 1,
            width: 1,
            height: 1,
        }
    }

    /// Find room for a `width` × `height` rectangle. First fit: the tree is
    /// searched depth first, child 0 before child 1, and the first free leaf
    /// that is large enough is split down to an exact fit.
    pub fn allocate(&mut self, width: i32, height: i32) -> Option<LightmapRect> {
        if width <= 0 || height <= 0 {
            return None;
        }
        self.allocate_in(Self::ROOT, width, height)
    }

    fn allocate_in(&mut self, index: usize, width: i32, height: i32) -> Option<LightmapRect> {
        if let Some([front, back]) = self.nodes[index].children {
            return self
                .allocate_in(front, width, height)
                .or_else(|| self.allocate_in(back, width, height));
        }

        let node = &mut self.nodes[index];
        if node.filled {
            return None;
        }

        let rect = node.rect;
        if rect.width < width || rect.height < height {
            return None;
        }

        if rect.width == width && rect.height == height {
            node.filled = true;
            return Some(rect);
        }

        // split along the axis with the most slack
        let [first, _] = if rect.width - width > rect.height - height {
            self.split(index, |r| r.split_x(width))
        } else {
            self.split(index, |r| r.split_y(height))
        };
        self.allocate_in(first, width, height)
    }

    fn split(&mut self, index: usize, halves: impl FnOnce(&LightmapRect) -> [LightmapRect; 2]) -> [usize; 2] {
        let [a, b] = halves(&self.nodes[index].rect);
        let first = self.nodes.len();
        self.nodes.push(LightmapNode::leaf(a));
        self.nodes.push(LightmapNode::leaf(b));
        self.nodes[index].children = Some([first, first + 1]);
        [first, first + 1]
    }

    /// Every leaf rectangle, filled or free.
    pub fn leaves(&self) -> impl Iterator<Item = &LightmapNode> {
        self.nodes.iter().filter(|n| n.children.is_none())
    }

    /// Number of texels handed out, the white texel included.
    pub fn used_texels(&self) -> i64 {
        self.leaves().filter(|n| n.filled).map(|n| n.rect.area()).sum()
    }
}

// ============================================================
// Texel brightening
// ============================================================

fn brighten_texel(src: &[u8], dst: &mut [u8], scale: f32) {
    let mut r = src[0] as f32 * scale;
    let mut g = src[1] as f32 * scale;
    let mut b = src[2] as f32 * scale;

    // rescale rather than clamp each channel so the hue is kept
    let max = r.max(g).max(b);
    if max > 255.0 {
        let t = 255.0 / max;
        r *= t;
        g *= t;
        b *= t;
    }

    dst[0] = r as u8;
    dst[1] = g as u8;
    dst[2] = b as u8;
    dst[3] = 255;
}

/// Expand packed RGB lightmap samples to RGBA, multiplied by `scale`.
pub fn brighten_lightmap(src: &[u8], scale: f32) -> Vec<u8> {
    let texels = src.len() / LIGHTMAP_SOURCE_BYTES;
    let mut dst = vec![0u8; texels * LIGHTMAP_BYTES];

    if texels >= PARALLEL_TEXEL_THRESHOLD {
        dst.par_chunks_exact_mut(LIGHTMAP_BYTES)
            .zip(src.par_chunks_exact(LIGHTMAP_SOURCE_BYTES))
            .for_each(|(d, s)| brighten_texel(s, d, scale));
    } else {
        for (d, s) in dst.chunks_exact_mut(LIGHTMAP_BYTES).zip(src.chunks_exact(LIGHTMAP_SOURCE_BYTES)) {
            brighten_texel(s, d, scale);
        }
    }
    dst
}

// ============================================================
// Lightmap extents
// ============================================================

/// Size of a face's lightmap in texels and the snapped minimum of its
/// planar texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightmapDims {
    pub width: i32,
    pub height: i32,
    pub min_u: f32,
    pub min_v: f32,
}

impl LightmapDims {
    /// Lightmap extents of the polygon through `points`. Coordinates are
    /// floored before taking the min and max; an empty polygon has a zero
    /// size.
    pub fn compute(points: &[Vec3], texinfo: &TexInfo) -> Self {
        let mut bounds: Option<[f64; 4]> = None;
        for p in points {
            let [u, v] = planar_uv(p, texinfo);
            let (u, v) = ((u as f64).floor(), (v as f64).floor());
            bounds = Some(match bounds {
                None => [u, v, u, v],
                Some([min_u, min_v, max_u, max_v]) => {
                    [min_u.min(u), min_v.min(v), max_u.max(u), max_v.max(v)]
                }
            });
        }

        let Some([min_u, min_v, max_u, max_v]) = bounds else {
            return Self {
                width: 0,
                height: 0,
                min_u: 0.0,
                min_v: 0.0,
            };
        };

        let texel = LIGHTMAP_TEXEL as f64;
        Self {
            width: ((max_u / texel).ceil() - (min_u / texel).floor() + 1.0) as i32,
            height: ((max_v / texel).ceil() - (min_v / texel).floor() + 1.0) as i32,
            min_u: min_u as f32,
            min_v: min_v as f32,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn texels(&self) -> usize {
        if self.is_degenerate() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    /// Atlas coordinates for planar UV `uv` of a face whose lightmap was
    /// placed at `rect` in an atlas of `atlas_size` texels.
    pub fn atlas_uv(&self, uv: [f32; 2], rect: &LightmapRect, atlas_size: i32) -> [f32; 2] {
        let span = (atlas_size * LIGHTMAP_TEXEL) as f32;
        let s = (uv[0] - self.min_u + (rect.x * LIGHTMAP_TEXEL + LIGHTMAP_TEXEL / 2) as f32) / span;
        let t = (uv[1] - self.min_v + (rect.y * LIGHTMAP_TEXEL + LIGHTMAP_TEXEL / 2) as f32) / span;
        [s, t]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texinfo_xy() -> TexInfo {
        TexInfo {
            vecs: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
            ..Default::default()
        }
    }

    fn assert_partition(atlas: &LightmapAtlas) {
        let leaves: Vec<LightmapRect> = atlas.leaves().map(|n| n.rect).collect();
        let total: i64 = leaves.iter().map(|r| r.area()).sum();
        assert_eq!(total, atlas.size() as i64 * atlas.size() as i64);

        for (i, a) in leaves.iter().enumerate() {
            assert!(a.width > 0 && a.height > 0);
            assert!(a.x >= 0 && a.y >= 0);
            assert!(a.x + a.width <= atlas.size() && a.y + a.height <= atlas.size());
            for b in &leaves[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }

        for node in atlas.nodes() {
            if let Some([c0, c1]) = node.children {
                let (a, b) = (atlas.nodes()[c0].rect, atlas.nodes()[c1].rect);
                assert_eq!(a.area() + b.area(), node.rect.area());
                assert!(!node.filled);
            }
        }
    }

    // ----------------------------------------------------------------
    // Allocation
    // ----------------------------------------------------------------

    #[test]
    fn test_new_atlas_reserves_white_texel() {
        let atlas = LightmapAtlas::new(64);
        assert_partition(&atlas);
        assert_eq!(atlas.used_texels(), 1);

        let white = atlas.white_texel();
        assert!(atlas.leaves().any(|n| n.filled && n.rect == white));
    }

    #[test]
    fn test_full_size_request_never_fits() {
        let mut atlas = LightmapAtlas::new(16);
        assert_eq!(atlas.allocate(16, 16), None);
        // everything above the last row is still free in one piece
        let rect = atlas.allocate(16, 15).unwrap();
        assert_eq!(rect, LightmapRect { x: 0, y: 0, width: 16, height: 15 });
        assert_partition(&atlas);
    }

    #[test]
    fn test_first_allocation_at_origin() {
        let mut atlas = LightmapAtlas::new(64);
        let rect = atlas.allocate(5, 3).unwrap();
        assert_eq!(rect, LightmapRect { x: 0, y: 0, width: 5, height: 3 });
        assert_partition(&atlas);
    }

    #[test]
    fn test_split_along_larger_slack() {
        let mut atlas = LightmapAtlas::new(16);
        // the free area is 16x15; 2x15 leaves more slack in width
        let a = atlas.allocate(2, 15).unwrap();
        assert_eq!(a, LightmapRect { x: 0, y: 0, width: 2, height: 15 });
        let b = atlas.allocate(2, 15).unwrap();
        assert_eq!(b, LightmapRect { x: 2, y: 0, width: 2, height: 15 });
        assert_partition(&atlas);
    }

    #[test]
    fn test_allocations_never_overlap() {
        let mut atlas = LightmapAtlas::new(128);
        let mut placed = Vec::new();
        for i in 0..200 {
            let w = 1 + (i * 7) % 17;
            let h = 1 + (i * 13) % 11;
            if let Some(rect) = atlas.allocate(w, h) {
                assert_eq!((rect.width, rect.height), (w, h));
                placed.push(rect);
            }
        }
        assert!(placed.len() > 50);

        placed.push(atlas.white_texel());
        for (i, a) in placed.iter().enumerate() {
            for b in &placed[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
        assert_partition(&atlas);
    }

    #[test]
    fn test_full_atlas_fails_softly() {
        let mut atlas = LightmapAtlas::new(8);
        assert!(atlas.allocate(8, 8).is_none());
        assert!(atlas.allocate(9, 1).is_none());
        assert!(atlas.allocate(8, 7).is_some());
        assert!(atlas.allocate(7, 1).is_some());
        // only the white texel is left
        assert!(atlas.allocate(1, 1).is_none());
        assert_eq!(atlas.used_texels(), 64);
        assert_partition(&atlas);
    }

    #[test]
    fn test_allocate_rejects_empty_rect() {
        let mut atlas = LightmapAtlas::new(8);
        assert!(atlas.allocate(0, 4).is_none());
        assert!(atlas.allocate(4, -1).is_none());
        assert_eq!(atlas.nodes().len(), 5);
    }

    // ----------------------------------------------------------------
    // Brightening
    // ----------------------------------------------------------------

    #[test]
    fn test_brighten_without_clamp() {
        assert_eq!(brighten_lightmap(&[10, 20, 30], 4.0), vec![40, 80, 120, 255]);
    }

    #[test]
    fn test_brighten_keeps_hue_when_clamping() {
        let out = brighten_lightmap(&[200, 100, 50], 4.0);
        assert_eq!(out[0], 255);
        assert_eq!(out[1], 127);
        assert_eq!(out[2], 63);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn test_brighten_bounds() {
        let src: Vec<u8> = (0..=255u8).flat_map(|v| [v, v / 2, 255 - v]).collect();
        for &scale in &[0.5f32, 1.0, 4.0, 16.0] {
            let out = brighten_lightmap(&src, scale);
            assert_eq!(out.len(), 256 * 4);
            for (s, d) in src.chunks_exact(3).zip(out.chunks_exact(4)) {
                assert_eq!(d[3], 255);
                let max = s.iter().map(|&c| c as f32 * scale).fold(0.0, f32::max);
                if max > 255.0 {
                    // the largest channel lands on 255 (less rounding), the rest scale with it
                    for k in 0..3 {
                        let expected = s[k] as f32 * scale * 255.0 / max;
                        assert!((d[k] as f32 - expected).abs() <= 1.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_brighten_large_lightmap_matches_serial() {
        let src: Vec<u8> = (0..PARALLEL_TEXEL_THRESHOLD * 3 + 30).map(|i| (i % 251) as u8).collect();
        let out = brighten_lightmap(&src, 4.0);
        assert_eq!(out.len(), (PARALLEL_TEXEL_THRESHOLD + 10) * 4);
        for (s, d) in src.chunks_exact(3).zip(out.chunks_exact(4)).step_by(97) {
            let mut expected = [0u8; 4];
            brighten_texel(s, &mut expected, 4.0);
            assert_eq!(d, expected);
        }
    }

    // ----------------------------------------------------------------
    // Dimensions and atlas coordinates
    // ----------------------------------------------------------------

    #[test]
    fn test_dims_of_square_face() {
        let points = [[0.0, 0.0, 0.0], [64.0, 0.0, 0.0], [64.0, 32.0, 0.0]];
        let dims = LightmapDims::compute(&points, &texinfo_xy());
        assert_eq!(dims.width, 5);
        assert_eq!(dims.height, 3);
        assert_eq!(dims.min_u, 0.0);
        assert_eq!(dims.min_v, 0.0);
    }

    #[test]
    fn test_dims_floor_before_min() {
        let points = [[-0.5, 17.9, 0.0], [15.5, 40.0, 0.0], [3.0, 20.0, 0.0]];
        let dims = LightmapDims::compute(&points, &texinfo_xy());
        // u spans floor(-0.5) = -1 .. 15, v spans 17 .. 40
        assert_eq!(dims.min_u, -1.0);
        assert_eq!(dims.min_v, 17.0);
        assert_eq!(dims.width, 1 - (-1) + 1);
        assert_eq!(dims.height, 3 - 1 + 1);
    }

    #[test]
    fn test_dims_of_empty_polygon_is_degenerate() {
        let dims = LightmapDims::compute(&[], &texinfo_xy());
        assert!(dims.is_degenerate());
        assert_eq!(dims.texels(), 0);
    }

    #[test]
    fn test_atlas_uv() {
        let dims = LightmapDims { width: 5, height: 3, min_u: 0.0, min_v: 0.0 };
        let rect = LightmapRect { x: 2, y: 4, width: 5, height: 3 };

        let [s, t] = dims.atlas_uv([0.0, 0.0], &rect, 512);
        assert!((s - (2.0 * 16.0 + 8.0) / 8192.0).abs() < 1e-6);
        assert!((t - (4.0 * 16.0 + 8.0) / 8192.0).abs() < 1e-6);

        let [s, _] = dims.atlas_uv([64.0, 0.0], &rect, 512);
        assert!((s - (64.0 + 40.0) / 8192.0).abs() < 1e-6);
    }
}
