//! Projection and pose matrices for per-eye rendering.

use glam::{Mat4, Vec3};

use crate::vr::graphics::GraphicsApi;
use crate::vr::types::{Fov, Pose};

/// Asymmetric perspective projection from the four fov half-angles.
///
/// Follows the clip-space convention of `api`. A `far_z <= near_z` yields an
/// infinite far plane.
pub fn projection_fov(api: GraphicsApi, fov: &Fov, near_z: f32, far_z: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_down = fov.angle_down.tan();
    let tan_up = fov.angle_up.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = if api.flips_y() {
        tan_down - tan_up
    } else {
        tan_up - tan_down
    };
    let offset_z = if api.has_negative_one_to_one_depth() {
        near_z
    } else {
        0.0
    };

    let (m22, m32) = if far_z <= near_z {
        (-1.0, -(near_z + offset_z))
    } else {
        (
            -(far_z + offset_z) / (far_z - near_z),
            -(far_z * (near_z + offset_z)) / (far_z - near_z),
        )
    };

    // Column-major.
    Mat4::from_cols_array(&[
        2.0 / tan_width,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 / tan_height,
        0.0,
        0.0,
        (tan_right + tan_left) / tan_width,
        (tan_up + tan_down) / tan_height,
        m22,
        -1.0,
        0.0,
        0.0,
        m32,
        0.0,
    ])
}

/// Transform from a pose's local frame into the reference space.
pub fn pose_to_world(pose: &Pose, scale: Vec3) -> Mat4 {
    Mat4::from_scale_rotation_translation(scale, pose.orientation, pose.position)
}

/// World-to-eye matrix: the rigid-body inverse of the eye pose.
pub fn view_from_pose(pose: &Pose) -> Mat4 {
    let inverse_rotation = pose.orientation.normalize().conjugate();
    Mat4::from_quat(inverse_rotation) * Mat4::from_translation(-pose.position)
}
