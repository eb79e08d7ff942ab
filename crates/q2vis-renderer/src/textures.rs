// textures.rs -- loading the wall textures a level references
//
// Textures are 8-bit .wal files expanded through the game palette. The
// palette comes from pics/colormap.pcx; without it a grayscale ramp is used
// so a level still shows its structure.

use std::io::{Read, Seek};

use rayon::prelude::*;

use q2vis_common::bspfile::LevelData;
use q2vis_common::common::{com_dprintf, com_printf};
use q2vis_common::error::LoadResult;
use q2vis_common::files::Pack;
use q2vis_common::qfiles::{pcx_decode, MipTex, TexInfo, PCX_PALETTE_SIZE};

use crate::backend::{RenderBackend, TextureHandle};

pub const COLORMAP_PATH: &str = "pics/colormap.pcx";

const NOTEXTURE_SIZE: u32 = 16;

/// A diffuse texture as seen by the map renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapTexture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// 256 RGB entries.
#[derive(Clone)]
pub struct Palette(pub [u8; PCX_PALETTE_SIZE]);

impl Palette {
    pub fn grayscale() -> Self {
        let mut colors = [0u8; PCX_PALETTE_SIZE];
        for (i, rgb) in colors.chunks_exact_mut(3).enumerate() {
            rgb.fill(i as u8);
        }
        Palette(colors)
    }

    /// The palette stored with `pics/colormap.pcx`, or a grayscale ramp if
    /// the pack doesn't have a usable one.
    pub fn load<R: Read + Seek>(pack: &mut Pack<R>) -> Self {
        let raw = match pack.load_file(COLORMAP_PATH) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("{}, using a grayscale palette", e);
                return Self::grayscale();
            }
        };
        match pcx_decode(COLORMAP_PATH, &raw) {
            Ok(pcx) => Palette(pcx.palette),
            Err(e) => {
                log::warn!("{}, using a grayscale palette", e);
                Self::grayscale()
            }
        }
    }

    #[inline]
    pub fn rgb(&self, index: u8) -> [u8; 3] {
        let i = index as usize * 3;
        [self.0[i], self.0[i + 1], self.0[i + 2]]
    }
}

/// Expand palette indices to opaque RGBA.
pub fn indexed_to_rgba(indices: &[u8], palette: &Palette) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(indices.len() * 4);
    for &index in indices {
        let [r, g, b] = palette.rgb(index);
        rgba.extend_from_slice(&[r, g, b, 255]);
    }
    rgba
}

/// Checkerboard used in place of missing textures.
pub fn notexture_rgba() -> (u32, u32, Vec<u8>) {
    let mut data = Vec::with_capacity((NOTEXTURE_SIZE * NOTEXTURE_SIZE * 4) as usize);
    for y in 0..NOTEXTURE_SIZE {
        for x in 0..NOTEXTURE_SIZE {
            let on = ((x / 4) + (y / 4)) % 2 == 0;
            data.extend_from_slice(if on { &[255, 0, 255, 255] } else { &[0, 0, 0, 255] });
        }
    }
    (NOTEXTURE_SIZE, NOTEXTURE_SIZE, data)
}

struct DecodedTexture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

fn decode_wal(path: &str, raw: &[u8], palette: &Palette) -> LoadResult<DecodedTexture> {
    let mt = MipTex::parse(path, raw)?;
    Ok(DecodedTexture {
        width: mt.width,
        height: mt.height,
        rgba: indexed_to_rgba(mt.mip0(raw), palette),
    })
}

/// Load every texture the level uses and upload it. The result is indexed
/// by texture id. Missing or broken textures are replaced by a checkerboard.
pub fn load_map_textures<R: Read + Seek>(
    level: &LevelData,
    pack: &mut Pack<R>,
    palette: &Palette,
    backend: &mut dyn RenderBackend,
) -> Vec<MapTexture> {
    let mut names: Vec<(&str, usize)> = level.texture_ids.iter().map(|(n, &id)| (n.as_str(), id)).collect();
    names.sort_unstable();

    // file reads share the pack handle, decoding doesn't
    let raw: Vec<(usize, String, LoadResult<Vec<u8>>)> = names
        .iter()
        .map(|&(name, id)| {
            let path = TexInfo::wal_path(name);
            let data = pack.load_file(&path);
            (id, path, data)
        })
        .collect();

    let decoded: Vec<(usize, String, LoadResult<DecodedTexture>)> = raw
        .into_par_iter()
        .map(|(id, path, data)| {
            let tex = data.and_then(|data| decode_wal(&path, &data, palette));
            (id, path, tex)
        })
        .collect();

    let mut notexture: Option<MapTexture> = None;
    let mut textures: Vec<Option<MapTexture>> = vec![None; level.texture_ids.len()];
    let mut missing = 0;

    for (id, path, tex) in decoded {
        let map_texture = match tex {
            Ok(tex) => {
                com_dprintf(&format!("{} {}x{}\n", path, tex.width, tex.height));
                MapTexture {
                    handle: backend.create_texture(tex.width, tex.height, &tex.rgba),
                    width: tex.width,
                    height: tex.height,
                }
            }
            Err(e) => {
                log::warn!("texture {} is missing: {}", path, e);
                missing += 1;
                *notexture.get_or_insert_with(|| {
                    let (width, height, rgba) = notexture_rgba();
                    MapTexture {
                        handle: backend.create_texture(width, height, &rgba),
                        width,
                        height,
                    }
                })
            }
        };
        if let Some(slot) = textures.get_mut(id) {
            *slot = Some(map_texture);
        }
    }

    com_printf(&format!("Loaded {} textures ({} missing)\n", names.len(), missing));
    textures.into_iter().flatten().collect()
}
