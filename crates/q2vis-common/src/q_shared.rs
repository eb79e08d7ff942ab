// q_shared.rs -- math types, surface flags and cvar flags shared by all crates

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

pub const PITCH: usize = 0; // up / down
pub const YAW: usize = 1; // left / right
pub const ROLL: usize = 2; // fall over

// ============================================================
// Surface flags (texinfo flags)
// ============================================================

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceFlags: u32 {
        const LIGHT    = 0x01; // value will hold the light strength
        const SLICK    = 0x02;
        const SKY      = 0x04; // don't draw, but add to skybox
        const WARP     = 0x08; // turbulent water warp
        const TRANS33  = 0x10;
        const TRANS66  = 0x20;
        const FLOWING  = 0x40; // scroll towards angle
        const NODRAW   = 0x80; // don't bother referencing the texture
    }
}
pub const SURF_SKY: SurfaceFlags = SurfaceFlags::SKY;

// ============================================================
// Cvar flags
// ============================================================

pub const CVAR_ZERO: i32 = 0;
pub const CVAR_NOSET: i32 = 8; // don't allow change from the command line
pub const CVAR_LATCH: i32 = 16; // save changes until the next level load

// ============================================================
// MATHLIB -- Vector operations
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// veca + scale * vecb
pub fn vector_ma(veca: &Vec3, scale: f32, vecb: &Vec3) -> Vec3 {
    [
        veca[0] + scale * vecb[0],
        veca[1] + scale * vecb[1],
        veca[2] + scale * vecb[2],
    ]
}

// ============================================================
// Angle functions
// ============================================================

/// Forward, right and up vectors for a set of Euler angles in degrees.
pub fn angle_vectors(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = [cp * cy, cp * sy, -sp];
    let right = [
        -sr * sp * cy + -cr * -sy,
        -sr * sp * sy + -cr * cy,
        -sr * cp,
    ];
    let up = [
        cr * sp * cy + -sr * -sy,
        cr * sp * sy + -sr * cy,
        cr * cp,
    ];
    (forward, right, up)
}

/// Wrap an angle in degrees into [0, 360).
pub fn anglemod(a: f32) -> f32 {
    a.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &Vec3, b: &Vec3) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-5)
    }

    #[test]
    fn test_dot_and_ma() {
        let x = [1.0, 0.0, 0.0];
        let y = [0.0, 1.0, 0.0];
        assert_eq!(dot_product(&x, &y), 0.0);
        assert_eq!(dot_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(vector_ma(&x, 2.0, &y), [1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_angle_vectors_identity() {
        let (f, r, u) = angle_vectors(&[0.0, 0.0, 0.0]);
        assert!(approx(&f, &[1.0, 0.0, 0.0]));
        assert!(approx(&r, &[0.0, -1.0, 0.0]));
        assert!(approx(&u, &[0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_angle_vectors_yaw_90() {
        let (f, _, _) = angle_vectors(&[0.0, 90.0, 0.0]);
        assert!(approx(&f, &[0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_anglemod_wraps() {
        assert_eq!(anglemod(370.0), 10.0);
        assert_eq!(anglemod(-10.0), 350.0);
    }

    #[test]
    fn test_surface_flags_bits() {
        let flags = SurfaceFlags::from_bits_truncate(0x4 | 0x1);
        assert!(flags.contains(SURF_SKY));
        assert!(flags.contains(SurfaceFlags::LIGHT));
        assert!(!flags.contains(SurfaceFlags::WARP));
    }
}
