// viewer.rs -- the per-frame loop
//
// input -> camera -> locate leaf -> (rebuild on cluster change) -> upload
// -> draw -> end frame

use q2vis_common::bspfile::LevelData;
use q2vis_common::common::com_printf;
use q2vis_common::cvar::CvarContext;
use q2vis_common::q_shared::{CVAR_LATCH, CVAR_ZERO};
use q2vis_renderer::backend::{FrameView, RenderBackend};
use q2vis_renderer::lightmap_atlas::{DEFAULT_LIGHTMAP_SCALE, DEFAULT_LIGHTMAP_SIZE};
use q2vis_renderer::render_map::{LightmapSettings, RenderMap};
use q2vis_renderer::textures::MapTexture;
use q2vis_renderer::vis_tree::VisibilityTree;

use crate::camera::{CameraState, InputSnapshot};

/// Register the renderer cvars with their defaults.
pub fn register_cvars(cvars: &mut CvarContext) {
    cvars.get("r_lightmap_size", &DEFAULT_LIGHTMAP_SIZE.to_string(), CVAR_LATCH);
    cvars.get("r_lightmap_scale", &DEFAULT_LIGHTMAP_SCALE.to_string(), CVAR_ZERO);
}

fn lightmap_settings(cvars: &CvarContext) -> LightmapSettings {
    LightmapSettings {
        size: (cvars.variable_value("r_lightmap_size") as i32).clamp(16, 4096),
        scale: cvars.variable_value("r_lightmap_scale"),
    }
}

pub struct Viewer<B: RenderBackend> {
    pub level: LevelData,
    pub tree: VisibilityTree,
    pub textures: Vec<MapTexture>,
    pub backend: B,
    pub camera: CameraState,
    render_map: Option<RenderMap>,
    cluster: Option<u16>,
    rebuilds: usize,
}

impl<B: RenderBackend> Viewer<B> {
    pub fn new(level: LevelData, textures: Vec<MapTexture>, backend: B, camera: CameraState) -> Self {
        let tree = VisibilityTree::new(&level);
        Self {
            level,
            tree,
            textures,
            backend,
            camera,
            render_map: None,
            cluster: None,
            rebuilds: 0,
        }
    }

    pub fn render_map(&self) -> Option<&RenderMap> {
        self.render_map.as_ref()
    }

    /// Number of times the visible geometry has been rebuilt.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Run one frame. Returns false once the input asks to quit.
    pub fn frame(&mut self, input: &InputSnapshot, cvars: &mut CvarContext) -> bool {
        self.camera.apply(input);

        let leaf = self.tree.locate_leaf(&self.camera.origin);
        let (leaf_index, cluster) = (leaf.leaf, leaf.cluster);

        if self.cluster != Some(cluster) {
            // a leaf that sees nothing keeps the last geometry on screen
            if !leaf.visible_faces.is_empty() {
                let faces = leaf.visible_faces.clone();
                cvars.get_latched_vars();
                let settings = lightmap_settings(cvars);

                if let Some(old) = self.render_map.take() {
                    old.release(&mut self.backend);
                }
                self.render_map = Some(RenderMap::new(
                    &self.level,
                    &self.textures,
                    &faces,
                    settings,
                    &mut self.backend,
                ));
                self.rebuilds += 1;
                log::debug!("leaf {} cluster {}: {} visible faces", leaf_index, cluster, faces.len());
            }
            self.cluster = Some(cluster);
        }

        self.backend.begin_frame(&FrameView {
            origin: self.camera.origin,
            angles: self.camera.angles,
            leaf: leaf_index,
            cluster,
        });
        if let Some(map) = &self.render_map {
            map.upload(&mut self.backend);
            map.draw(&mut self.backend);
        }
        self.backend.end_frame();

        !input.quit
    }

    /// Release the backend resources of the current geometry.
    pub fn shutdown(&mut self) {
        if let Some(map) = self.render_map.take() {
            map.release(&mut self.backend);
        }
        com_printf(&format!("{} visible set rebuilds\n", self.rebuilds));
    }
}
