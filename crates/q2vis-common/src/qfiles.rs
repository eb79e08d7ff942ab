// qfiles.rs -- Quake 2 file format structures (PAK, PCX, WAL, BSP v38)

use crate::error::{LoadError, LoadResult};
use crate::q_shared::{SurfaceFlags, Vec3};

// ============================================================
// PAK files
// ============================================================

pub const IDPAKHEADER: [u8; 4] = *b"PACK";

pub const MAX_FILES_IN_PACK: usize = 4096;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DPackHeader {
    pub ident: [u8; 4],
    pub dirofs: i32,
    pub dirlen: i32,
}

#[derive(Debug, Clone)]
#[repr(C)]
pub struct DPackFile {
    pub name: [u8; 56],
    pub filepos: i32,
    pub filelen: i32,
}

pub const PACK_HEADER_SIZE: usize = 12;
pub const PACK_FILE_SIZE: usize = 64;

fn le_i32(data: &[u8], ofs: usize) -> i32 {
    i32::from_le_bytes([data[ofs], data[ofs + 1], data[ofs + 2], data[ofs + 3]])
}

impl DPackHeader {
    pub fn parse(header: &[u8; PACK_HEADER_SIZE]) -> Self {
        Self {
            ident: [header[0], header[1], header[2], header[3]],
            dirofs: le_i32(header, 4),
            dirlen: le_i32(header, 8),
        }
    }
}

impl DPackFile {
    /// Decode one directory entry. `entry` must be `PACK_FILE_SIZE` bytes.
    pub fn parse(entry: &[u8]) -> Self {
        let mut name = [0u8; 56];
        name.copy_from_slice(&entry[..56]);
        Self {
            name,
            filepos: le_i32(entry, 56),
            filelen: le_i32(entry, 60),
        }
    }

    /// The entry name up to its first NUL.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

// ============================================================
// PCX format
// ============================================================

/// PCX header size in bytes
pub const PCX_HEADER_SIZE: usize = 128;
/// PCX palette size in bytes (at end of file)
pub const PCX_PALETTE_SIZE: usize = 768;

/// A decoded 8-bit PCX image.
pub struct PcxImage {
    /// Palette-indexed pixel data (1 byte per pixel)
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 256 RGB triplets
    pub palette: [u8; PCX_PALETTE_SIZE],
}

/// Decode an 8-bit, RLE encoded, version 5 PCX image.
///
/// Only the layout Quake 2 ships (`pics/colormap.pcx` and friends) is
/// accepted; anything else is reported as `LoadError::BadPcx`.
pub fn pcx_decode(name: &str, raw: &[u8]) -> LoadResult<PcxImage> {
    let bad = |why: &str| LoadError::BadPcx(format!("{} ({})", name, why));

    if raw.len() < PCX_HEADER_SIZE + PCX_PALETTE_SIZE {
        return Err(bad("too short"));
    }

    let (manufacturer, version, encoding, bits_per_pixel) = (raw[0], raw[1], raw[2], raw[3]);
    let word = |ofs: usize| u16::from_le_bytes([raw[ofs], raw[ofs + 1]]) as u32;
    let (xmin, ymin, xmax, ymax) = (word(4), word(6), word(8), word(10));

    if manufacturer != 0x0a || version != 5 || encoding != 1 || bits_per_pixel != 8 {
        return Err(bad("not an 8 bit rle image"));
    }
    if xmax >= 640 || ymax >= 480 || xmax < xmin || ymax < ymin {
        return Err(bad("bad dimensions"));
    }

    let width = xmax - xmin + 1;
    let height = ymax - ymin + 1;
    let data_end = raw.len() - PCX_PALETTE_SIZE;

    let mut palette = [0u8; PCX_PALETTE_SIZE];
    palette.copy_from_slice(&raw[data_end..]);

    let mut pixels = Vec::with_capacity((width * height) as usize);
    let mut src = PCX_HEADER_SIZE;
    for _ in 0..height {
        let mut x = 0;
        while x < width {
            let byte = *raw[..data_end].get(src).ok_or_else(|| bad("ran out of pixel data"))?;
            src += 1;

            let (run, pixel) = if byte & 0xC0 == 0xC0 {
                let pixel = *raw[..data_end].get(src).ok_or_else(|| bad("ran out of pixel data"))?;
                src += 1;
                ((byte & 0x3F) as u32, pixel)
            } else {
                (1, byte)
            };

            // runs never carry over to the next scanline
            let run = run.min(width - x);
            pixels.extend(std::iter::repeat(pixel).take(run as usize));
            x += run;
        }
    }

    Ok(PcxImage {
        pixels,
        width,
        height,
        palette,
    })
}

// ============================================================
// WAL texture format
// ============================================================

pub const MIPLEVELS: usize = 4;
pub const MIPTEX_HEADER_SIZE: usize = 100;

#[derive(Debug, Clone)]
#[repr(C)]
pub struct MipTex {
    pub name: [u8; 32],
    pub width: u32,
    pub height: u32,
    pub offsets: [u32; MIPLEVELS],
    pub animname: [u8; 32],
    pub flags: i32,
    pub contents: i32,
    pub value: i32,
}

impl MipTex {
    /// Parse the header of a .wal file and check that the full size mip
    /// level fits inside the file.
    pub fn parse(path: &str, data: &[u8]) -> LoadResult<MipTex> {
        if data.len() < MIPTEX_HEADER_SIZE {
            return Err(LoadError::BadWal {
                name: path.to_string(),
                reason: format!("header needs {} bytes, file has {}", MIPTEX_HEADER_SIZE, data.len()),
            });
        }

        let u32_at = |ofs: usize| u32::from_le_bytes([data[ofs], data[ofs + 1], data[ofs + 2], data[ofs + 3]]);

        let mut mt = MipTex {
            name: [0; 32],
            width: u32_at(32),
            height: u32_at(36),
            offsets: [u32_at(40), u32_at(44), u32_at(48), u32_at(52)],
            animname: [0; 32],
            flags: u32_at(88) as i32,
            contents: u32_at(92) as i32,
            value: u32_at(96) as i32,
        };
        mt.name.copy_from_slice(&data[0..32]);
        mt.animname.copy_from_slice(&data[56..88]);

        let needed = mt.offsets[0] as u64 + mt.width as u64 * mt.height as u64;
        if mt.width == 0 || mt.height == 0 || needed > data.len() as u64 {
            return Err(LoadError::BadWal {
                name: path.to_string(),
                reason: format!("{}x{} mip 0 at {} doesn't fit", mt.width, mt.height, mt.offsets[0]),
            });
        }
        Ok(mt)
    }

    /// Palette indices of the full size mip level.
    pub fn mip0<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.offsets[0] as usize;
        &data[start..start + (self.width * self.height) as usize]
    }
}

// ============================================================
// BSP file format
// ============================================================

pub const IDBSPHEADER: [u8; 4] = *b"IBSP";
pub const BSPVERSION: i32 = 38;

// Lump indices
pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_VERTEXES: usize = 2;
pub const LUMP_VISIBILITY: usize = 3;
pub const LUMP_NODES: usize = 4;
pub const LUMP_TEXINFO: usize = 5;
pub const LUMP_FACES: usize = 6;
pub const LUMP_LIGHTING: usize = 7;
pub const LUMP_LEAFS: usize = 8;
pub const LUMP_LEAFFACES: usize = 9;
pub const LUMP_LEAFBRUSHES: usize = 10;
pub const LUMP_EDGES: usize = 11;
pub const LUMP_SURFEDGES: usize = 12;
pub const LUMP_MODELS: usize = 13;
pub const LUMP_BRUSHES: usize = 14;
pub const LUMP_BRUSHSIDES: usize = 15;
pub const LUMP_POP: usize = 16;
pub const LUMP_AREAS: usize = 17;
pub const LUMP_AREAPORTALS: usize = 18;
pub const HEADER_LUMPS: usize = 19;

pub const BSP_HEADER_SIZE: usize = 8 + HEADER_LUMPS * 8;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Lump {
    pub fileofs: i32,
    pub filelen: i32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DHeader {
    pub ident: [u8; 4],
    pub version: i32,
    pub lumps: [Lump; HEADER_LUMPS],
}

impl DHeader {
    /// Decode the header at the start of a BSP file. `data` must hold at
    /// least `BSP_HEADER_SIZE` bytes.
    pub fn parse(data: &[u8]) -> Self {
        let mut lumps = [Lump::default(); HEADER_LUMPS];
        for (i, lump) in lumps.iter_mut().enumerate() {
            let base = 8 + i * 8;
            lump.fileofs = le_i32(data, base);
            lump.filelen = le_i32(data, base + 4);
        }
        Self {
            ident: [data[0], data[1], data[2], data[3]],
            version: le_i32(data, 4),
            lumps,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct DVertex {
    pub point: Vec3,
}

// Plane types; 0-2 are axial planes
pub const PLANE_X: i32 = 0;
pub const PLANE_Y: i32 = 1;
pub const PLANE_Z: i32 = 2;
pub const PLANE_ANYX: i32 = 3;
pub const PLANE_ANYY: i32 = 4;
pub const PLANE_ANYZ: i32 = 5;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DPlane {
    pub normal: Vec3,
    pub dist: f32,
    pub plane_type: i32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DNode {
    pub planenum: i32,
    pub children: [i32; 2], // negative numbers are -(leafs+1), not nodes
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstface: u16,
    pub numfaces: u16,
}

#[derive(Debug, Clone)]
#[repr(C)]
pub struct TexInfo {
    pub vecs: [[f32; 4]; 2], // [s/t][xyz offset]
    pub flags: i32,
    pub value: i32,
    pub texture: [u8; 32],
    pub nexttexinfo: i32,
}

impl Default for TexInfo {
    fn default() -> Self {
        Self {
            vecs: [[0.0; 4]; 2],
            flags: 0,
            value: 0,
            texture: [0; 32],
            nexttexinfo: -1,
        }
    }
}

impl TexInfo {
    pub fn u_axis(&self) -> Vec3 {
        [self.vecs[0][0], self.vecs[0][1], self.vecs[0][2]]
    }

    pub fn v_axis(&self) -> Vec3 {
        [self.vecs[1][0], self.vecs[1][1], self.vecs[1][2]]
    }

    pub fn u_offset(&self) -> f32 {
        self.vecs[0][3]
    }

    pub fn v_offset(&self) -> f32 {
        self.vecs[1][3]
    }

    pub fn surface_flags(&self) -> SurfaceFlags {
        SurfaceFlags::from_bits_retain(self.flags as u32)
    }

    /// Texture name up to the first NUL, e.g. `e1u1/floor1_3`.
    pub fn texture_name(&self) -> String {
        let end = self.texture.iter().position(|&b| b == 0).unwrap_or(self.texture.len());
        String::from_utf8_lossy(&self.texture[..end]).into_owned()
    }

    /// Path of the .wal file inside the pack for a texture name.
    pub fn wal_path(name: &str) -> String {
        format!("textures/{}.wal", name.trim()).to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DEdge {
    pub v: [u16; 2],
}

pub const MAXLIGHTMAPS: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DFace {
    pub planenum: u16,
    pub side: i16,
    pub firstedge: i32, // we must support > 64k edges
    pub numedges: i16,
    pub texinfo: i16,
    pub styles: [u8; MAXLIGHTMAPS],
    pub lightofs: i32, // start of [numstyles*surfsize] samples
}

/// Cluster number of leaves that aren't part of any visibility cluster.
pub const CLUSTER_NONE: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DLeaf {
    pub contents: i32,
    pub cluster: u16,
    pub area: u16,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstleafface: u16,
    pub numleaffaces: u16,
    pub firstleafbrush: u16,
    pub numleafbrushes: u16,
}

/// Per-cluster offsets into the visibility lump, relative to the lump start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DVisOffsets {
    pub pvs: i32,
    pub phs: i32,
}

// ============================================================
// On-disk record sizes
// ============================================================

pub const PLANE_SIZE: usize = 20;
pub const VERTEX_SIZE: usize = 12;
pub const NODE_SIZE: usize = 28;
pub const TEXINFO_SIZE: usize = 76;
pub const FACE_SIZE: usize = 20;
pub const LEAF_SIZE: usize = 28;
pub const LEAFFACE_SIZE: usize = 2;
pub const EDGE_SIZE: usize = 4;
pub const SURFEDGE_SIZE: usize = 4;

// =============================================================================
// Tests
// =============================================================================
