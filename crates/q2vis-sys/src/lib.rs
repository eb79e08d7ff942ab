// Headless viewer: camera, frame loop and startup.

pub mod camera;
pub mod viewer;
pub mod host;
