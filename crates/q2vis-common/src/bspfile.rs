// bspfile.rs -- reading a BSP v38 level into memory
//
// Only the lumps needed to draw and cull the world are kept: geometry,
// texinfo, lighting, the node/leaf tree and the visibility lump.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::common::{com_dprintf, com_printf};
use crate::error::{LoadError, LoadResult};
use crate::qfiles::*;

/// Parallel threshold for lump parsing - below this count, sequential is faster
const PARALLEL_LUMP_THRESHOLD: usize = 64;

// ============================================================
// Level data
// ============================================================

/// Everything the renderer needs from a level, decoded to native types.
#[derive(Debug, Default)]
pub struct LevelData {
    pub name: String,
    pub planes: Vec<DPlane>,
    pub vertices: Vec<DVertex>,
    pub nodes: Vec<DNode>,
    pub texinfos: Vec<TexInfo>,
    pub faces: Vec<DFace>,
    pub leafs: Vec<DLeaf>,
    pub leaf_faces: Vec<u16>,
    pub edges: Vec<DEdge>,
    pub surf_edges: Vec<i32>,
    /// Raw lighting lump, 3 bytes per lightmap texel.
    pub lighting: Vec<u8>,
    /// Raw visibility lump; the offsets below are relative to its start.
    pub visibility: Vec<u8>,
    pub vis_offsets: Vec<DVisOffsets>,
    /// texture name -> texture id, ids assigned in first-seen texinfo order
    pub texture_ids: HashMap<String, usize>,
}

impl LevelData {
    pub fn num_clusters(&self) -> usize {
        self.vis_offsets.len()
    }

    /// Texture id used by a texinfo.
    pub fn texture_id(&self, texinfo: &TexInfo) -> Option<usize> {
        self.texture_ids.get(&texinfo.texture_name()).copied()
    }

    /// Texture names ordered by id.
    pub fn texture_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, usize)> = self
            .texture_ids
            .iter()
            .map(|(name, &id)| (name.as_str(), id))
            .collect();
        names.sort_by_key(|&(_, id)| id);
        names.into_iter().map(|(name, _)| name).collect()
    }
}

// ============================================================
// BSP byte helpers
// ============================================================

pub fn read_i32_le(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

pub fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

pub fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

fn read_vec3(data: &[u8], offset: usize) -> [f32; 3] {
    [
        read_f32_le(data, offset),
        read_f32_le(data, offset + 4),
        read_f32_le(data, offset + 8),
    ]
}

fn read_i16x3(data: &[u8], offset: usize) -> [i16; 3] {
    [
        read_i16_le(data, offset),
        read_i16_le(data, offset + 2),
        read_i16_le(data, offset + 4),
    ]
}

// ============================================================
// Lump loaders
// ============================================================

/// Bounds-check a lump and return its bytes.
fn lump_bytes<'a>(data: &'a [u8], lump: &Lump, name: &'static str) -> LoadResult<&'a [u8]> {
    let ofs = lump.fileofs as i64;
    let len = lump.filelen as i64;
    if ofs < 0 || len < 0 || ofs + len > data.len() as i64 {
        return Err(LoadError::LumpOutOfRange {
            lump: name,
            ofs,
            len,
            file_len: data.len(),
        });
    }
    Ok(&data[ofs as usize..(ofs + len) as usize])
}

/// Decode a lump of fixed-size records, in parallel for large lumps.
fn load_records<T, F>(data: &[u8], lump: &Lump, name: &'static str, stride: usize, parse: F) -> LoadResult<Vec<T>>
where
    T: Send,
    F: Fn(&[u8]) -> T + Sync + Send,
{
    let bytes = lump_bytes(data, lump, name)?;
    if !bytes.len().is_multiple_of(stride) {
        return Err(LoadError::FunnyLumpSize {
            lump: name,
            len: bytes.len(),
            stride,
        });
    }

    let count = bytes.len() / stride;
    let records: Vec<T> = if count >= PARALLEL_LUMP_THRESHOLD {
        bytes.par_chunks_exact(stride).map(parse).collect()
    } else {
        bytes.chunks_exact(stride).map(parse).collect()
    };
    com_dprintf(&format!("{}: {} records\n", name, count));
    Ok(records)
}

fn load_planes(data: &[u8], lump: &Lump) -> LoadResult<Vec<DPlane>> {
    load_records(data, lump, "planes", PLANE_SIZE, |r| DPlane {
        normal: read_vec3(r, 0),
        dist: read_f32_le(r, 12),
        plane_type: read_i32_le(r, 16),
    })
}

fn load_vertexes(data: &[u8], lump: &Lump) -> LoadResult<Vec<DVertex>> {
    load_records(data, lump, "vertexes", VERTEX_SIZE, |r| DVertex { point: read_vec3(r, 0) })
}

fn load_nodes(data: &[u8], lump: &Lump) -> LoadResult<Vec<DNode>> {
    load_records(data, lump, "nodes", NODE_SIZE, |r| DNode {
        planenum: read_i32_le(r, 0),
        children: [read_i32_le(r, 4), read_i32_le(r, 8)],
        mins: read_i16x3(r, 12),
        maxs: read_i16x3(r, 18),
        firstface: read_u16_le(r, 24),
        numfaces: read_u16_le(r, 26),
    })
}

fn load_texinfo(data: &[u8], lump: &Lump) -> LoadResult<Vec<TexInfo>> {
    load_records(data, lump, "texinfo", TEXINFO_SIZE, |r| {
        let mut ti = TexInfo::default();
        for (j, v) in ti.vecs.iter_mut().enumerate() {
            for (k, c) in v.iter_mut().enumerate() {
                *c = read_f32_le(r, j * 16 + k * 4);
            }
        }
        ti.flags = read_i32_le(r, 32);
        ti.value = read_i32_le(r, 36);
        ti.texture.copy_from_slice(&r[40..72]);
        ti.nexttexinfo = read_i32_le(r, 72);
        ti
    })
}

fn load_faces(data: &[u8], lump: &Lump) -> LoadResult<Vec<DFace>> {
    load_records(data, lump, "faces", FACE_SIZE, |r| DFace {
        planenum: read_u16_le(r, 0),
        side: read_i16_le(r, 2),
        firstedge: read_i32_le(r, 4),
        numedges: read_i16_le(r, 8),
        texinfo: read_i16_le(r, 10),
        styles: [r[12], r[13], r[14], r[15]],
        lightofs: read_i32_le(r, 16),
    })
}

fn load_leafs(data: &[u8], lump: &Lump) -> LoadResult<Vec<DLeaf>> {
    // contents: i32, cluster: u16, area: u16, mins/maxs: [i16; 3],
    // firstleafface, numleaffaces, firstleafbrush, numleafbrushes: u16
    load_records(data, lump, "leafs", LEAF_SIZE, |r| DLeaf {
        contents: read_i32_le(r, 0),
        cluster: read_u16_le(r, 4),
        area: read_u16_le(r, 6),
        mins: read_i16x3(r, 8),
        maxs: read_i16x3(r, 14),
        firstleafface: read_u16_le(r, 20),
        numleaffaces: read_u16_le(r, 22),
        firstleafbrush: read_u16_le(r, 24),
        numleafbrushes: read_u16_le(r, 26),
    })
}

fn load_leaf_faces(data: &[u8], lump: &Lump) -> LoadResult<Vec<u16>> {
    load_records(data, lump, "leaffaces", LEAFFACE_SIZE, |r| read_u16_le(r, 0))
}

fn load_edges(data: &[u8], lump: &Lump) -> LoadResult<Vec<DEdge>> {
    load_records(data, lump, "edges", EDGE_SIZE, |r| DEdge {
        v: [read_u16_le(r, 0), read_u16_le(r, 2)],
    })
}

fn load_surf_edges(data: &[u8], lump: &Lump) -> LoadResult<Vec<i32>> {
    load_records(data, lump, "surfedges", SURFEDGE_SIZE, |r| read_i32_le(r, 0))
}

/// Copy the visibility lump and decode its per-cluster offset table.
fn load_visibility(data: &[u8], lump: &Lump) -> LoadResult<(Vec<u8>, Vec<DVisOffsets>)> {
    let bytes = lump_bytes(data, lump, "visibility")?;
    if bytes.len() < 4 {
        // no vis info
        return Ok((Vec::new(), Vec::new()));
    }

    let numclusters = read_i32_le(bytes, 0).max(0) as usize;
    if 4 + numclusters * 8 > bytes.len() {
        return Err(LoadError::FunnyLumpSize {
            lump: "visibility",
            len: bytes.len(),
            stride: 8,
        });
    }

    let offsets = (0..numclusters)
        .map(|i| {
            let base = 4 + i * 8;
            DVisOffsets {
                pvs: read_i32_le(bytes, base),
                phs: read_i32_le(bytes, base + 4),
            }
        })
        .collect();
    Ok((bytes.to_vec(), offsets))
}

/// Map each texture name to an id. Several texinfos may share one name.
pub fn texture_ids(texinfos: &[TexInfo]) -> HashMap<String, usize> {
    let mut ids = HashMap::new();
    for ti in texinfos {
        let next = ids.len();
        ids.entry(ti.texture_name()).or_insert(next);
    }
    ids
}

// ============================================================
// Level loading
// ============================================================

/// Parse a complete BSP file held in memory.
pub fn load_level(name: &str, data: &[u8]) -> LoadResult<LevelData> {
    if data.len() < BSP_HEADER_SIZE {
        return Err(LoadError::Truncated(name.to_string()));
    }

    let DHeader { ident, version, lumps } = DHeader::parse(data);
    if ident != IDBSPHEADER {
        return Err(LoadError::BadMagic { what: name.to_string(), found: ident });
    }
    if version != BSPVERSION {
        return Err(LoadError::BadVersion {
            what: name.to_string(),
            found: version,
            expected: BSPVERSION,
        });
    }

    let texinfos = load_texinfo(data, &lumps[LUMP_TEXINFO])?;
    let texture_ids = texture_ids(&texinfos);
    let (visibility, vis_offsets) = load_visibility(data, &lumps[LUMP_VISIBILITY])?;

    let level = LevelData {
        name: name.to_string(),
        planes: load_planes(data, &lumps[LUMP_PLANES])?,
        vertices: load_vertexes(data, &lumps[LUMP_VERTEXES])?,
        nodes: load_nodes(data, &lumps[LUMP_NODES])?,
        faces: load_faces(data, &lumps[LUMP_FACES])?,
        leafs: load_leafs(data, &lumps[LUMP_LEAFS])?,
        leaf_faces: load_leaf_faces(data, &lumps[LUMP_LEAFFACES])?,
        edges: load_edges(data, &lumps[LUMP_EDGES])?,
        surf_edges: load_surf_edges(data, &lumps[LUMP_SURFEDGES])?,
        lighting: lump_bytes(data, &lumps[LUMP_LIGHTING], "lighting")?.to_vec(),
        texinfos,
        visibility,
        vis_offsets,
        texture_ids,
    };

    com_printf(&format!(
        "Loaded {}: {} faces, {} leafs, {} clusters, {} textures\n",
        name,
        level.faces.len(),
        level.leafs.len(),
        level.num_clusters(),
        level.texture_ids.len()
    ));
    Ok(level)
}

// ============================================================
// Tests
// ============================================================
