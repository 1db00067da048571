//! Vector/quaternion helpers on plain `[f32; 3]` / `[f32; 4]` arrays.
//!
//! Quaternions are stored as (x, y, z, w). Matrix work (axis remap
//! conjugation, Euler extraction) goes through nalgebra.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

pub const IDENTITY_QUAT: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

pub fn vec3_add(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn vec3_scale(v: &[f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

pub fn vec3_lerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        (1.0 - t) * a[0] + t * b[0],
        (1.0 - t) * a[1] + t * b[1],
        (1.0 - t) * a[2] + t * b[2],
    ]
}

pub fn vec3_is_finite(v: &[f32; 3]) -> bool {
    v.iter().all(|c| c.is_finite())
}

pub fn quat_dot(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

pub fn quat_length(q: &[f32; 4]) -> f32 {
    quat_dot(q, q).sqrt()
}

pub fn quat_is_finite(q: &[f32; 4]) -> bool {
    q.iter().all(|c| c.is_finite())
}

/// Normalize to unit length. A zero-length quaternion becomes identity.
pub fn quat_normalize(q: &[f32; 4]) -> [f32; 4] {
    let len = quat_length(q);
    if len > 0.0 {
        [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
    } else {
        IDENTITY_QUAT
    }
}

/// Hamilton product a * b (apply b first, then a).
pub fn quat_mul(a: &[f32; 4], b: &[f32; 4]) -> [f32; 4] {
    let (ax, ay, az, aw) = (a[0], a[1], a[2], a[3]);
    let (bx, by, bz, bw) = (b[0], b[1], b[2], b[3]);
    [
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
        aw * bw - ax * bx - ay * by - az * bz,
    ]
}

/// Inverse of a unit quaternion (conjugate).
pub fn quat_inverse(q: &[f32; 4]) -> [f32; 4] {
    [-q[0], -q[1], -q[2], q[3]]
}

/// Normalized linear interpolation with shortest-path sign flip.
pub fn quat_nlerp(a: &[f32; 4], b: &[f32; 4], t: f32) -> [f32; 4] {
    let sign = if quat_dot(a, b) < 0.0 { -1.0 } else { 1.0 };
    quat_normalize(&[
        (1.0 - t) * a[0] + t * sign * b[0],
        (1.0 - t) * a[1] + t * sign * b[1],
        (1.0 - t) * a[2] + t * sign * b[2],
        (1.0 - t) * a[3] + t * sign * b[3],
    ])
}

/// Shortest-arc spherical interpolation. Falls back to nlerp when the
/// arc is too small for the sine terms to be stable.
pub fn quat_slerp(a: &[f32; 4], b: &[f32; 4], t: f32) -> [f32; 4] {
    let mut dot = quat_dot(a, b);
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    dot = dot.abs().min(1.0);

    if dot > 0.9995 {
        return quat_nlerp(a, b, t);
    }

    let theta = dot.acos();
    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta * sign;

    quat_normalize(&[
        wa * a[0] + wb * b[0],
        wa * a[1] + wb * b[1],
        wa * a[2] + wb * b[2],
        wa * a[3] + wb * b[3],
    ])
}

fn quat_to_mat(q: &[f32; 4]) -> Matrix3<f32> {
    let uq = UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]));
    uq.to_rotation_matrix().into_inner()
}

fn mat_to_quat(m: &Matrix3<f32>) -> [f32; 4] {
    let uq = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*m));
    let v = uq.vector();
    quat_normalize(&[v[0], v[1], v[2], uq.scalar()])
}

/// Euler application order for rotation-order conversion and clamping.
///
/// `Xyz` means R = Rx * Ry * Rz (intrinsic, column-vector convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RotationOrder {
    #[default]
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

fn clamped_asin(v: f32) -> f32 {
    v.clamp(-1.0, 1.0).asin()
}

/// Decompose a unit quaternion into Euler angles (radians) for the given
/// order. Angles are returned indexed by axis: `[x, y, z]`.
pub fn euler_from_quat(q: &[f32; 4], order: RotationOrder) -> [f32; 3] {
    let m = quat_to_mat(q);
    match order {
        RotationOrder::Xyz => {
            let y = clamped_asin(m[(0, 2)]);
            let x = (-m[(1, 2)]).atan2(m[(2, 2)]);
            let z = (-m[(0, 1)]).atan2(m[(0, 0)]);
            [x, y, z]
        }
        RotationOrder::Xzy => {
            let z = clamped_asin(-m[(0, 1)]);
            let x = m[(2, 1)].atan2(m[(1, 1)]);
            let y = m[(0, 2)].atan2(m[(0, 0)]);
            [x, y, z]
        }
        RotationOrder::Yxz => {
            let x = clamped_asin(-m[(1, 2)]);
            let y = m[(0, 2)].atan2(m[(2, 2)]);
            let z = m[(1, 0)].atan2(m[(1, 1)]);
            [x, y, z]
        }
        RotationOrder::Yzx => {
            let z = clamped_asin(m[(1, 0)]);
            let y = (-m[(2, 0)]).atan2(m[(0, 0)]);
            let x = (-m[(1, 2)]).atan2(m[(1, 1)]);
            [x, y, z]
        }
        RotationOrder::Zxy => {
            let x = clamped_asin(m[(2, 1)]);
            let z = (-m[(0, 1)]).atan2(m[(1, 1)]);
            let y = (-m[(2, 0)]).atan2(m[(2, 2)]);
            [x, y, z]
        }
        RotationOrder::Zyx => {
            let y = clamped_asin(-m[(2, 0)]);
            let z = m[(1, 0)].atan2(m[(0, 0)]);
            let x = m[(2, 1)].atan2(m[(2, 2)]);
            [x, y, z]
        }
    }
}

fn axis_quat(axis: usize, angle: f32) -> [f32; 4] {
    let (s, c) = (angle * 0.5).sin_cos();
    let mut q = [0.0, 0.0, 0.0, c];
    q[axis] = s;
    q
}

/// Compose Euler angles (`[x, y, z]` radians) into a unit quaternion,
/// applying the axes in the given order.
pub fn quat_from_euler(angles: &[f32; 3], order: RotationOrder) -> [f32; 4] {
    let seq: [usize; 3] = match order {
        RotationOrder::Xyz => [0, 1, 2],
        RotationOrder::Xzy => [0, 2, 1],
        RotationOrder::Yxz => [1, 0, 2],
        RotationOrder::Yzx => [1, 2, 0],
        RotationOrder::Zxy => [2, 0, 1],
        RotationOrder::Zyx => [2, 1, 0],
    };
    let mut q = axis_quat(seq[0], angles[seq[0]]);
    q = quat_mul(&q, &axis_quat(seq[1], angles[seq[1]]));
    q = quat_mul(&q, &axis_quat(seq[2], angles[seq[2]]));
    quat_normalize(&q)
}

/// Signed-permutation axis matrix. Converts one axis convention into
/// another; entries are -1, 0 or 1 with exactly one non-zero per row and
/// column for a valid remap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMap(pub [[i8; 3]; 3]);

impl Default for AxisMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl AxisMap {
    pub fn identity() -> Self {
        Self([[1, 0, 0], [0, 1, 0], [0, 0, 1]])
    }

    /// Handedness flip used by the ingestion side: negates Z.
    pub fn flip_z() -> Self {
        Self([[1, 0, 0], [0, 1, 0], [0, 0, -1]])
    }

    pub fn determinant(&self) -> i32 {
        let m = &self.0;
        let (a, b, c) = (m[0][0] as i32, m[0][1] as i32, m[0][2] as i32);
        let (d, e, f) = (m[1][0] as i32, m[1][1] as i32, m[1][2] as i32);
        let (g, h, i) = (m[2][0] as i32, m[2][1] as i32, m[2][2] as i32);
        a * (e * i - f * h) - b * (d * i - f * g) + c * (d * h - e * g)
    }

    /// A remap is usable only when the matrix is invertible (det = ±1 for
    /// signed permutations; 0 means a collapsed axis).
    pub fn is_invertible(&self) -> bool {
        self.determinant() != 0
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    fn as_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_fn(|r, c| self.0[r][c] as f32)
    }

    pub fn apply_vec3(&self, v: &[f32; 3]) -> [f32; 3] {
        let m = &self.0;
        let mut out = [0.0f32; 3];
        for r in 0..3 {
            out[r] = m[r][0] as f32 * v[0] + m[r][1] as f32 * v[1] + m[r][2] as f32 * v[2];
        }
        out
    }

    /// Conjugate a rotation by this transform: R' = M * R * M^T.
    ///
    /// This is the correct handedness-preserving conversion; for det = -1
    /// the result is still a proper rotation, unlike per-component sign
    /// flips on the quaternion.
    pub fn apply_quat(&self, q: &[f32; 4]) -> [f32; 4] {
        if self.is_identity() {
            return *q;
        }
        let m = self.as_matrix();
        let r = quat_to_mat(q);
        mat_to_quat(&(m * r * m.transpose()))
    }
}
