// host.rs -- startup, the scripted frame loop and shutdown

use q2vis_common::bspfile::load_level;
use q2vis_common::common::{com_printf, version_string};
use q2vis_common::cvar::CvarContext;
use q2vis_common::error::LoadError;
use q2vis_common::files::Pack;
use q2vis_common::q_shared::{CVAR_NOSET, CVAR_ZERO};
use q2vis_renderer::backend::{RenderError, SoftwareBackend};
use q2vis_renderer::textures::{load_map_textures, Palette};

use crate::camera::{CameraState, ScriptedInput};
use crate::viewer::{register_cvars, Viewer};

/// Seconds per scripted frame.
pub const SCRIPT_FRAMETIME: f32 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("couldn't write the lightmap atlas: {0}")]
    Render(#[from] RenderError),
}

pub fn register_host_cvars(cvars: &mut CvarContext) {
    cvars.get("version", &version_string(), CVAR_NOSET);
    cvars.get("pak", "./data/pak0.pak", CVAR_ZERO);
    cvars.get("map", "maps/demo1.bsp", CVAR_ZERO);
    cvars.get("cl_speed", "200", CVAR_ZERO);
    cvars.get("sensitivity", "0.7", CVAR_ZERO);
    cvars.get("cl_startpos", "50 -256 50", CVAR_ZERO);
    cvars.get("cl_walkyaw", "0", CVAR_ZERO);
    cvars.get("frames", "1", CVAR_ZERO);
    cvars.get("r_dumpatlas", "", CVAR_ZERO);
    register_cvars(cvars);
}

fn initial_camera(cvars: &CvarContext) -> CameraState {
    let origin = cvars.find_var("cl_startpos").map_or([0.0; 3], |var| var.vector());
    let mut camera = CameraState::new(origin, cvars.variable_value("cl_walkyaw"));
    camera.speed = cvars.variable_value("cl_speed");
    camera.sensitivity = cvars.variable_value("sensitivity");
    camera
}

/// Load the level named by the cvars and build a viewer for it.
pub fn init(cvars: &CvarContext) -> Result<Viewer<SoftwareBackend>, HostError> {
    let pak_path = cvars.variable_string("pak").to_string();
    let map_name = cvars.variable_string("map").to_string();

    let mut pack = Pack::open(&pak_path)?;
    let data = pack.load_file(&map_name)?;
    let level = load_level(&map_name, &data)?;

    let mut backend = SoftwareBackend::new();
    let palette = Palette::load(&mut pack);
    let textures = load_map_textures(&level, &mut pack, &palette, &mut backend);

    Ok(Viewer::new(level, textures, backend, initial_camera(cvars)))
}

/// Start up, walk the scripted path and shut down.
pub fn run(cvars: &mut CvarContext) -> Result<(), HostError> {
    com_printf(&format!("{}\n", version_string()));
    register_host_cvars(cvars);

    let mut viewer = init(cvars)?;
    let frames = cvars.variable_value("frames").max(0.0) as u32;

    for input in ScriptedInput::new(frames, SCRIPT_FRAMETIME) {
        if !viewer.frame(&input, cvars) {
            break;
        }
    }

    let origin = viewer.camera.origin;
    com_printf(&format!(
        "Stopped at ({:.1} {:.1} {:.1}) in leaf {}\n",
        origin[0],
        origin[1],
        origin[2],
        viewer.tree.locate_leaf(&origin).leaf
    ));

    let dump = cvars.variable_string("r_dumpatlas").to_string();
    if !dump.is_empty() {
        match viewer.render_map() {
            Some(map) => {
                viewer.backend.save_texture(map.atlas, &dump)?;
                com_printf(&format!("Wrote {}\n", dump));
            }
            None => log::warn!("r_dumpatlas: nothing visible, no atlas to write"),
        }
    }

    viewer.shutdown();
    Ok(())
}
