#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod vis_tree;
pub mod lightmap_atlas;
pub mod surface;
pub mod polygon_buffer;
pub mod textures;
pub mod render_map;
