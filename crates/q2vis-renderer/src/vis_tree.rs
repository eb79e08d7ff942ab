// vis_tree.rs -- BSP point location and per-leaf potentially visible face sets
//
// Every leaf gets the complete list of faces that can be seen from it,
// resolved once at load time from the cluster PVS rows. At runtime the only
// work left is walking the node tree down to the camera's leaf.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use q2vis_common::bspfile::LevelData;
use q2vis_common::common::com_printf;
use q2vis_common::q_shared::{dot_product, Vec3};
use q2vis_common::qfiles::{DPlane, CLUSTER_NONE};

/// A node with its splitting plane copied in.
#[derive(Debug, Clone, Copy)]
pub struct TreeNode {
    pub plane: DPlane,
    /// front, back; negative numbers are -(leaf+1)
    pub children: [i32; 2],
}

/// A leaf and the faces visible from it.
#[derive(Debug, Clone)]
pub struct TreeLeaf {
    pub leaf: usize,
    pub cluster: u16,
    /// Sorted, deduplicated face indices. Leaves of one cluster share the list.
    pub visible_faces: Arc<[usize]>,
}

impl TreeLeaf {
    pub fn has_cluster(&self) -> bool {
        self.cluster != CLUSTER_NONE
    }
}

pub struct VisibilityTree {
    nodes: Vec<TreeNode>,
    leaves: Vec<TreeLeaf>,
}

// ============================================================
// PVS decompression
// ============================================================

/// Walk one run-length compressed PVS row starting at `offset`, calling
/// `visible` for every cluster whose bit is set.
///
/// A zero byte is followed by a count of zero bytes it stands for; any other
/// byte is a bitmask over the next eight clusters, LSB first. Decoding stops
/// once `num_clusters` clusters have been covered. A row that runs off the
/// end of `visibility` stops early, and bits past `num_clusters` are ignored.
pub fn decompress_pvs(visibility: &[u8], offset: usize, num_clusters: usize, mut visible: impl FnMut(usize)) {
    let mut cursor = offset;
    let mut cluster = 0usize;

    while cluster < num_clusters {
        let Some(&byte) = visibility.get(cursor) else {
            log::warn!("Vis decompression overrun at byte {} (cluster {} of {})", cursor, cluster, num_clusters);
            return;
        };

        if byte == 0 {
            let Some(&run) = visibility.get(cursor + 1) else {
                log::warn!("Vis decompression overrun at byte {} (cluster {} of {})", cursor + 1, cluster, num_clusters);
                return;
            };
            cursor += 2;
            cluster += 8 * run as usize;
            continue;
        }

        for bit in 0..8 {
            let other = cluster + bit;
            if byte & (1 << bit) != 0 && other < num_clusters {
                visible(other);
            }
        }
        cursor += 1;
        cluster += 8;
    }
}

// ============================================================
// Construction
// ============================================================

impl VisibilityTree {
    pub fn new(level: &LevelData) -> Self {
        let nodes: Vec<TreeNode> = level
            .nodes
            .iter()
            .map(|n| TreeNode {
                plane: level.planes.get(n.planenum as usize).copied().unwrap_or_else(|| {
                    log::warn!("{}: node references missing plane {}", level.name, n.planenum);
                    DPlane::default()
                }),
                children: n.children,
            })
            .collect();

        let faces_in_cluster = Self::faces_in_cluster(level);
        let faces_from_cluster = Self::faces_from_cluster(level, &faces_in_cluster);

        let empty: Arc<[usize]> = Arc::from(Vec::new());
        let mut leaves: Vec<TreeLeaf> = level
            .leafs
            .iter()
            .enumerate()
            .map(|(i, leaf)| TreeLeaf {
                leaf: i,
                cluster: leaf.cluster,
                visible_faces: faces_from_cluster
                    .get(&leaf.cluster)
                    .cloned()
                    .unwrap_or_else(|| empty.clone()),
            })
            .collect();

        if leaves.is_empty() {
            leaves.push(TreeLeaf {
                leaf: 0,
                cluster: CLUSTER_NONE,
                visible_faces: empty,
            });
        }

        let tree = Self { nodes, leaves };
        tree.print_stats(faces_from_cluster.len());
        tree
    }

    /// Union of the faces of every leaf in each cluster. Clusters with no
    /// leaves are absent, which reads as "no faces".
    fn faces_in_cluster(level: &LevelData) -> HashMap<u16, Vec<usize>> {
        let num_faces = level.faces.len();
        let mut clusters: HashMap<u16, BTreeSet<usize>> = HashMap::new();
        let mut dropped = 0usize;

        for leaf in &level.leafs {
            if leaf.cluster == CLUSTER_NONE {
                continue;
            }
            let first = leaf.firstleafface as usize;
            let end = first + leaf.numleaffaces as usize;
            let span: &[u16] = match level.leaf_faces.get(first..end) {
                Some(span) => span,
                None => {
                    dropped += leaf.numleaffaces as usize;
                    &[]
                }
            };

            let set = clusters.entry(leaf.cluster).or_default();
            for &face in span {
                if (face as usize) < num_faces {
                    set.insert(face as usize);
                } else {
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            log::warn!("{}: dropped {} leaf face references outside the face array", level.name, dropped);
        }

        clusters
            .into_iter()
            .map(|(cluster, set)| (cluster, set.into_iter().collect()))
            .collect()
    }

    /// Expand each cluster's PVS row into the full set of faces visible
    /// from it, starting with the cluster's own faces.
    fn faces_from_cluster(
        level: &LevelData,
        faces_in_cluster: &HashMap<u16, Vec<usize>>,
    ) -> HashMap<u16, Arc<[usize]>> {
        let num_clusters = level.num_clusters();
        let all_visible = || -> Arc<[usize]> {
            let all: BTreeSet<usize> = faces_in_cluster.values().flatten().copied().collect();
            all.into_iter().collect()
        };

        if num_clusters == 0 {
            // no vis info, everything sees everything
            let all = all_visible();
            return faces_in_cluster.keys().map(|&c| (c, all.clone())).collect();
        }

        let mut result = HashMap::with_capacity(faces_in_cluster.len());
        let mut everything: Option<Arc<[usize]>> = None;

        for &cluster in faces_in_cluster.keys() {
            let offset = level.vis_offsets.get(cluster as usize).map(|o| o.pvs);
            let faces = match offset {
                Some(pvs) if pvs >= 0 => {
                    let mut visible: BTreeSet<usize> = faces_in_cluster[&cluster].iter().copied().collect();
                    decompress_pvs(&level.visibility, pvs as usize, num_clusters, |other| {
                        // cluster ids past u16 can't name a leaf's cluster
                        let other_faces = u16::try_from(other).ok().and_then(|c| faces_in_cluster.get(&c));
                        if let Some(other_faces) = other_faces {
                            visible.extend(other_faces.iter().copied());
                        }
                    });
                    visible.into_iter().collect()
                }
                _ => {
                    log::warn!("cluster {} has no PVS row, treating everything as visible", cluster);
                    everything.get_or_insert_with(all_visible).clone()
                }
            };
            result.insert(cluster, faces);
        }
        result
    }

    fn print_stats(&self, clusters: usize) {
        let total: usize = self.leaves.iter().map(|l| l.visible_faces.len()).sum();
        com_printf(&format!(
            "Visibility: {} leafs, {} clusters, {:.1} visible faces per leaf\n",
            self.leaves.len(),
            clusters,
            total as f32 / self.leaves.len() as f32
        ));
    }

    // ============================================================
    // Point / leaf queries
    // ============================================================

    /// Walk down from `start_node` to the leaf containing `p`. Points exactly
    /// on a plane go to the front side.
    pub fn find_leaf_node(&self, start_node: i32, p: &Vec3) -> &TreeLeaf {
        if self.nodes.is_empty() {
            return &self.leaves[0];
        }

        let mut num = start_node;
        while num >= 0 {
            let node = &self.nodes[num as usize];
            let plane = &node.plane;

            let d = if (0..3).contains(&plane.plane_type) {
                p[plane.plane_type as usize] - plane.dist
            } else {
                dot_product(&plane.normal, p) - plane.dist
            };

            num = if d < 0.0 { node.children[1] } else { node.children[0] };
        }
        &self.leaves[(-1 - num) as usize]
    }

    pub fn locate_leaf(&self, p: &Vec3) -> &TreeLeaf {
        self.find_leaf_node(0, p)
    }

    pub fn leaf(&self, index: usize) -> Option<&TreeLeaf> {
        self.leaves.get(index)
    }

    pub fn leaves(&self) -> &[TreeLeaf] {
        &self.leaves
    }
}
