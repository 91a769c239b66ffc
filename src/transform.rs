//! Pose relocation between a portal pair's coordinate frames.
//!
//! Everything here is a pure function over [`GlobalTransform`]s: a pose
//! expressed relative to the source portal is re-expressed relative to the
//! destination portal. Only rotation and translation participate; portal
//! scale is ignored so a scaled portal mesh cannot shear a relocated pose.

use bevy::prelude::*;

/// Relocates a world-space point from the source portal's frame to the
/// destination portal's frame.
///
/// The result holds `relocated relative to destination == point relative to
/// source`.
#[inline]
#[must_use]
pub fn relocate_point(
    source: &GlobalTransform,
    destination: &GlobalTransform,
    point: Vec3,
) -> Vec3 {
    let local = source.rotation().inverse() * (point - source.translation());
    destination.rotation() * local + destination.translation()
}

/// Relocates a world-space rotation from the source portal's frame to the
/// destination portal's frame.
#[inline]
#[must_use]
pub fn relocate_rotation(
    source: &GlobalTransform,
    destination: &GlobalTransform,
    rotation: Quat,
) -> Quat {
    destination.rotation() * source.rotation().inverse() * rotation
}

/// Relocates a world-space direction (velocity, forward vector, offset)
/// by the relative rotation of the pair. Length is preserved.
#[inline]
#[must_use]
pub fn relocate_direction(
    source: &GlobalTransform,
    destination: &GlobalTransform,
    direction: Vec3,
) -> Vec3 {
    destination.rotation() * (source.rotation().inverse() * direction)
}

/// Relocates a whole [`Transform`] through the pair.
///
/// Translation and rotation are relocated, scale passes through untouched.
#[must_use]
pub fn relocate_transform(
    source: &GlobalTransform,
    destination: &GlobalTransform,
    transform: &Transform,
) -> Transform {
    Transform {
        translation: relocate_point(source, destination, transform.translation),
        rotation: relocate_rotation(source, destination, transform.rotation),
        scale: transform.scale,
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    use super::*;

    const EPSILON: f32 = 1e-5;

    fn portal(translation: Vec3, rotation: Quat) -> GlobalTransform {
        GlobalTransform::from(Transform::from_translation(translation).with_rotation(rotation))
    }

    #[test]
    fn round_trip_returns_original_pose() {
        let a = portal(Vec3::new(-3.0, 1.0, 2.0), Quat::from_rotation_y(FRAC_PI_4));
        let b = portal(Vec3::new(8.0, -2.0, 5.0), Quat::from_euler(EulerRot::YXZ, 1.2, 0.3, 0.0));

        let pose = Transform::from_xyz(-2.5, 1.5, 1.0)
            .with_rotation(Quat::from_euler(EulerRot::YXZ, 0.4, -0.2, 0.1));

        let there = relocate_transform(&a, &b, &pose);
        let back = relocate_transform(&b, &a, &there);

        assert!(back.translation.abs_diff_eq(pose.translation, EPSILON));
        assert!(back.rotation.abs_diff_eq(pose.rotation, EPSILON));
    }

    #[test]
    fn relative_offset_is_preserved() {
        // Portal A at the origin facing +Z, portal B at (10, 0, 0) facing -X.
        // An object one unit behind A's plane must come out one unit behind
        // B's plane, with the lateral/vertical offset intact.
        let a = portal(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::PI));
        let b = portal(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));

        let relocated = relocate_point(&a, &b, Vec3::new(0.3, 0.7, -1.0));

        // In A's frame the point sits at (-0.3, 0.7, 1.0); re-expressed in
        // B's frame that lands at (11.0, 0.7, 0.3).
        assert!(relocated.abs_diff_eq(Vec3::new(11.0, 0.7, 0.3), EPSILON));
    }

    #[test]
    fn direction_is_rotated_by_the_relative_rotation() {
        let a = portal(Vec3::ZERO, Quat::IDENTITY);
        let b = portal(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));

        let velocity = relocate_direction(&a, &b, Vec3::new(0.0, 0.0, 2.0));

        assert!(velocity.abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), EPSILON));
        assert!((velocity.length() - 2.0).abs() < EPSILON);
    }

    #[test]
    fn portal_scale_does_not_shear_the_result() {
        let unscaled = portal(Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_y(0.7));
        let scaled = GlobalTransform::from(
            Transform::from_xyz(2.0, 0.0, 0.0)
                .with_rotation(Quat::from_rotation_y(0.7))
                .with_scale(Vec3::new(3.0, 0.5, 2.0)),
        );
        let b = portal(Vec3::new(-5.0, 1.0, 4.0), Quat::from_rotation_x(0.3));

        let point = Vec3::new(1.0, 2.0, 3.0);
        assert!(
            relocate_point(&scaled, &b, point).abs_diff_eq(relocate_point(&unscaled, &b, point), EPSILON)
        );
    }
}
