// camera.rs -- free-flying viewer camera
//
// The camera is plain state owned by the frame loop. Each frame the input
// layer produces an InputSnapshot and the camera applies it once.

use q2vis_common::q_shared::{anglemod, angle_vectors, vector_ma, Vec3, PITCH, ROLL, YAW};

pub const DEFAULT_SPEED: f32 = 200.0;
pub const DEFAULT_SENSITIVITY: f32 = 0.7;

/// Radians of turn per mouse unit at sensitivity 1.
pub const MOUSE_RADIANS_PER_UNIT: f32 = 0.025;

/// Everything the camera needs from one frame of input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputSnapshot {
    pub forward: bool,
    pub back: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub up: bool,
    pub down: bool,
    /// Mouse motion since the last frame; positive x turns right, positive
    /// y looks down.
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    /// Seconds since the last frame.
    pub frametime: f32,
    pub quit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub origin: Vec3,
    /// pitch, yaw, roll in degrees
    pub angles: Vec3,
    /// units per second
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::new([0.0; 3], 0.0)
    }
}

impl CameraState {
    pub fn new(origin: Vec3, yaw: f32) -> Self {
        Self {
            origin,
            angles: [0.0, anglemod(yaw), 0.0],
            speed: DEFAULT_SPEED,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }

    /// Turn, then move along the new view direction.
    pub fn apply(&mut self, input: &InputSnapshot) {
        let degrees = (self.sensitivity * MOUSE_RADIANS_PER_UNIT).to_degrees();
        self.angles[YAW] = anglemod(self.angles[YAW] - input.mouse_dx * degrees);
        self.angles[PITCH] = (self.angles[PITCH] + input.mouse_dy * degrees).clamp(-90.0, 90.0);
        self.angles[ROLL] = 0.0;

        let (forward, right, _) = angle_vectors(&self.angles);
        let step = self.speed * input.frametime.max(0.0);
        let axis = |pos: bool, neg: bool| (pos as i32 - neg as i32) as f32 * step;

        let mut origin = self.origin;
        origin = vector_ma(&origin, axis(input.forward, input.back), &forward);
        origin = vector_ma(&origin, axis(input.move_right, input.move_left), &right);
        origin[2] += axis(input.up, input.down);
        self.origin = origin;
    }
}

/// Input for the headless viewer: walk straight ahead at a fixed frame
/// time, then quit.
pub struct ScriptedInput {
    frames: u32,
    frametime: f32,
    taken: u32,
}

impl ScriptedInput {
    pub fn new(frames: u32, frametime: f32) -> Self {
        Self {
            frames,
            frametime,
            taken: 0,
        }
    }
}

impl Iterator for ScriptedInput {
    type Item = InputSnapshot;

    fn next(&mut self) -> Option<InputSnapshot> {
        if self.taken >= self.frames {
            return None;
        }
        self.taken += 1;
        Some(InputSnapshot {
            forward: true,
            frametime: self.frametime,
            quit: self.taken == self.frames,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &Vec3, b: &Vec3) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-3)
    }

    #[test]
    fn test_walk_forward_along_yaw() {
        let mut cam = CameraState::new([0.0; 3], 90.0);
        cam.apply(&InputSnapshot {
            forward: true,
            frametime: 0.5,
            ..Default::default()
        });
        assert!(approx(&cam.origin, &[0.0, 100.0, 0.0]));
    }

    #[test]
    fn test_strafe_and_fly() {
        let mut cam = CameraState::new([10.0, 0.0, 0.0], 0.0);
        cam.apply(&InputSnapshot {
            move_right: true,
            up: true,
            frametime: 0.1,
            ..Default::default()
        });
        // facing +x, right is -y
        assert!(approx(&cam.origin, &[10.0, -20.0, 20.0]));
    }

    #[test]
    fn test_opposite_keys_cancel() {
        let mut cam = CameraState::default();
        cam.apply(&InputSnapshot {
            forward: true,
            back: true,
            frametime: 1.0,
            ..Default::default()
        });
        assert_eq!(cam.origin, [0.0; 3]);
    }

    #[test]
    fn test_pitch_clamps() {
        let mut cam = CameraState::default();
        cam.apply(&InputSnapshot {
            mouse_dy: 10_000.0,
            ..Default::default()
        });
        assert_eq!(cam.angles[PITCH], 90.0);
        cam.apply(&InputSnapshot {
            mouse_dy: -20_000.0,
            ..Default::default()
        });
        assert_eq!(cam.angles[PITCH], -90.0);
    }

    #[test]
    fn test_yaw_wraps() {
        let mut cam = CameraState::new([0.0; 3], 350.0);
        // turning left 1 radian worth of mouse at sensitivity 1
        cam.sensitivity = 1.0;
        cam.apply(&InputSnapshot {
            mouse_dx: -40.0,
            ..Default::default()
        });
        let expected = (350.0 + 1f32.to_degrees()) - 360.0;
        assert!((cam.angles[YAW] - expected).abs() < 1e-3);
        assert!(cam.angles[YAW] >= 0.0 && cam.angles[YAW] < 360.0);
    }

    #[test]
    fn test_scripted_input() {
        let frames: Vec<InputSnapshot> = ScriptedInput::new(3, 0.1).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.forward && f.frametime == 0.1));
        assert!(!frames[0].quit);
        assert!(frames[2].quit);
        assert_eq!(ScriptedInput::new(0, 0.1).count(), 0);
    }
}
