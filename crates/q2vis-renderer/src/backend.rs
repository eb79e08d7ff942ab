//! The seam between the map renderer and a graphics API.
//!
//! Everything the renderer needs from the GPU goes through [`RenderBackend`]:
//! texture creation and sub-image updates, mipmap generation, one vertex
//! buffer, two texture units and `draw_arrays`. [`SoftwareBackend`] keeps all
//! of it in memory, which is what the headless viewer and the tests run on.

use std::collections::HashMap;
use std::path::Path;

use q2vis_common::common::com_dprintf;
use q2vis_common::q_shared::Vec3;

use crate::polygon_buffer::BspVertex;

/// Texture unit for diffuse textures.
pub const DIFFUSE_UNIT: usize = 0;
/// Texture unit for the lightmap atlas.
pub const LIGHTMAP_UNIT: usize = 1;
pub const MAX_TEXTURE_UNITS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Where the frame is drawn from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameView {
    pub origin: Vec3,
    /// pitch, yaw, roll in degrees
    pub angles: Vec3,
    pub leaf: usize,
    pub cluster: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("texture {handle:?} has {len} bytes, expected {width}x{height} RGBA")]
    BadPixelData {
        handle: TextureHandle,
        len: usize,
        width: u32,
        height: u32,
    },
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub trait RenderBackend {
    /// Create an RGBA texture. Empty `rgba` gives a texture of zeroes.
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> TextureHandle;
    /// Replace a rectangle of mip level 0.
    fn update_sub_image(&mut self, handle: TextureHandle, x: i32, y: i32, width: i32, height: i32, rgba: &[u8]);
    /// Rebuild the whole mip chain from level 0.
    fn generate_mipmaps(&mut self, handle: TextureHandle);
    fn delete_texture(&mut self, handle: TextureHandle);
    /// Replace the vertex buffer. The data is tightly packed [`BspVertex`]es.
    fn upload_vertices(&mut self, data: &[u8]);
    fn bind_texture(&mut self, unit: usize, handle: TextureHandle);
    /// Draw `count` vertices starting at vertex `first` as a triangle list.
    fn draw_arrays(&mut self, first: u32, count: u32);
    fn begin_frame(&mut self, view: &FrameView);
    fn end_frame(&mut self);
}

// ============================================================
// Mipmaps
// ============================================================

/// Count the number of mipmap levels for a given width and height.
///
/// Mipmap generation continues while either dimension is > 1,
/// halving each dimension each level (clamped to 1).
pub fn mipmap_level_count(width: u32, height: u32) -> u32 {
    let mut levels = 1;
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        w = (w >> 1).max(1);
        h = (h >> 1).max(1);
        levels += 1;
    }
    levels
}

/// 2x2 box filter of an RGBA image. Odd edges reuse their last row or
/// column.
pub fn mip_map(data: &[u8], width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return (Vec::new(), width >> 1, height >> 1);
    }
    let (ow, oh) = ((w >> 1).max(1), (h >> 1).max(1));
    let mut out = vec![0u8; ow * oh * 4];

    for y in 0..oh {
        let (y0, y1) = ((y * 2).min(h - 1), (y * 2 + 1).min(h - 1));
        for x in 0..ow {
            let (x0, x1) = ((x * 2).min(w - 1), (x * 2 + 1).min(w - 1));
            for c in 0..4 {
                let sum = data[(y0 * w + x0) * 4 + c] as u32
                    + data[(y0 * w + x1) * 4 + c] as u32
                    + data[(y1 * w + x0) * 4 + c] as u32
                    + data[(y1 * w + x1) * 4 + c] as u32;
                out[(y * ow + x) * 4 + c] = (sum >> 2) as u8;
            }
        }
    }
    (out, ow as u32, oh as u32)
}

// ============================================================
// Software backend
// ============================================================

struct SoftTexture {
    width: u32,
    height: u32,
    /// level 0 first
    levels: Vec<Vec<u8>>,
}

/// One recorded `draw_arrays` call and the textures bound at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub textures: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    pub first: u32,
    pub count: u32,
}

/// A backend that keeps textures and vertices in memory and records draw
/// calls instead of rasterizing them.
#[derive(Default)]
pub struct SoftwareBackend {
    textures: HashMap<TextureHandle, SoftTexture>,
    next_handle: u32,
    bound: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    vertices: Vec<BspVertex>,
    draw_calls: Vec<DrawCall>,
    view: Option<FrameView>,
    frames: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_size(&self, handle: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&handle).map(|t| (t.width, t.height))
    }

    /// Level 0 pixels of a texture.
    pub fn texture_pixels(&self, handle: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&handle).map(|t| t.levels[0].as_slice())
    }

    pub fn mip_levels(&self, handle: TextureHandle) -> usize {
        self.textures.get(&handle).map_or(0, |t| t.levels.len())
    }

    pub fn bound_texture(&self, unit: usize) -> Option<TextureHandle> {
        self.bound.get(unit).copied().flatten()
    }

    /// Draw calls since the last `begin_frame`.
    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[BspVertex] {
        &self.vertices
    }

    pub fn current_view(&self) -> Option<&FrameView> {
        self.view.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write level 0 of a texture to disk. The format follows the
    /// extension, normally `.png`.
    pub fn save_texture(&self, handle: TextureHandle, path: impl AsRef<Path>) -> Result<(), RenderError> {
        let tex = self.textures.get(&handle).ok_or(RenderError::UnknownTexture(handle))?;
        let pixels = tex.levels[0].clone();
        let len = pixels.len();
        let img = image::RgbaImage::from_raw(tex.width, tex.height, pixels).ok_or(RenderError::BadPixelData {
            handle,
            len,
            width: tex.width,
            height: tex.height,
        })?;
        img.save(path.as_ref())?;
        com_dprintf(&format!("Wrote {}\n", path.as_ref().display()));
        Ok(())
    }
}

impl RenderBackend for SoftwareBackend {
    fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> TextureHandle {
        let size = width as usize * height as usize * 4;
        let mut pixels = vec![0u8; size];
        if rgba.len() >= size {
            pixels.copy_from_slice(&rgba[..size]);
        } else if !rgba.is_empty() {
            log::warn!("create_texture: {} bytes for a {}x{} texture", rgba.len(), width, height);
            pixels[..rgba.len()].copy_from_slice(rgba);
        }

        // handle 0 is never handed out
        self.next_handle += 1;
        let handle = TextureHandle(self.next_handle);
        self.textures.insert(
            handle,
            SoftTexture {
                width,
                height,
                levels: vec![pixels],
            },
        );
        handle
    }

    fn update_sub_image(&mut self, handle: TextureHandle, x: i32, y: i32, width: i32, height: i32, rgba: &[u8]) {
        let Some(tex) = self.textures.get_mut(&handle) else {
            log::warn!("update_sub_image: unknown texture {:?}", handle);
            return;
        };

        if x < 0
            || y < 0
            || width < 0
            || height < 0
            || (x + width) as u32 > tex.width
            || (y + height) as u32 > tex.height
            || rgba.len() < width as usize * height as usize * 4
        {
            log::warn!(
                "update_sub_image: {}x{} at {},{} doesn't fit {}x{} texture {:?}",
                width,
                height,
                x,
                y,
                tex.width,
                tex.height,
                handle
            );
            return;
        }

        let (x, y, width, height) = (x as usize, y as usize, width as usize, height as usize);
        let stride = tex.width as usize * 4;
        let base = &mut tex.levels[0];
        for row in 0..height {
            let dst = (y + row) * stride + x * 4;
            let src = row * width * 4;
            base[dst..dst + width * 4].copy_from_slice(&rgba[src..src + width * 4]);
        }
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) {
        let Some(tex) = self.textures.get_mut(&handle) else {
            log::warn!("generate_mipmaps: unknown texture {:?}", handle);
            return;
        };

        tex.levels.truncate(1);
        let (mut w, mut h) = (tex.width, tex.height);
        for _ in 1..mipmap_level_count(tex.width, tex.height) {
            let (level, nw, nh) = mip_map(&tex.levels[tex.levels.len() - 1], w, h);
            tex.levels.push(level);
            w = nw;
            h = nh;
        }
    }

    fn delete_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle).is_none() {
            log::warn!("delete_texture: unknown texture {:?}", handle);
        }
        for slot in &mut self.bound {
            if *slot == Some(handle) {
                *slot = None;
            }
        }
    }

    fn upload_vertices(&mut self, data: &[u8]) {
        if data.len() % BspVertex::SIZE != 0 {
            log::warn!("upload_vertices: {} bytes is not a whole number of vertices", data.len());
        }
        self.vertices = data
            .chunks_exact(BspVertex::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();
    }

    fn bind_texture(&mut self, unit: usize, handle: TextureHandle) {
        if unit >= MAX_TEXTURE_UNITS {
            log::warn!("bind_texture: no texture unit {}", unit);
            return;
        }
        if !self.textures.contains_key(&handle) {
            log::warn!("bind_texture: unknown texture {:?}", handle);
        }
        self.bound[unit] = Some(handle);
    }

    fn draw_arrays(&mut self, first: u32, count: u32) {
        if first as usize + count as usize > self.vertex_count() {
            log::warn!(
                "draw_arrays: {}+{} past the end of {} vertices",
                first,
                count,
                self.vertex_count()
            );
            return;
        }
        self.draw_calls.push(DrawCall {
            textures: self.bound,
            first,
            count,
        });
    }

    fn begin_frame(&mut self, view: &FrameView) {
        self.draw_calls.clear();
        self.view = Some(*view);
    }

    fn end_frame(&mut self) {
        self.frames += 1;
        let triangles: u32 = self.draw_calls.iter().map(|d| d.count / 3).sum();
        com_dprintf(&format!(
            "frame {}: {} draw calls, {} triangles\n",
            self.frames,
            self.draw_calls.len(),
            triangles
        ));
    }
}
