//! Oblique near-plane projection for portal cameras.
//!
//! A portal camera must not render geometry that sits between itself and its
//! portal's surface, otherwise the wall behind the remote portal leaks into
//! the portal image. Instead of a fixed near plane, [`ObliqueProjection`]
//! substitutes an arbitrary view-space plane into the projection's third row
//! (Lengyel's technique), leaving fov/aspect/far untouched.

use bevy::{
    math::Vec3A,
    prelude::*,
    render::camera::{CameraProjection, SubCameraView},
};

/// Minimum squared length for a clip plane normal to be considered valid.
const DEGENERATE_NORMAL_EPSILON: f32 = 1e-8;

/// Minimum magnitude for the corner projection denominator.
const DEGENERATE_CORNER_EPSILON: f32 = 1e-6;

/// A perspective projection with an optional oblique near clip plane.
///
/// With `clip_plane` unset this behaves exactly like the wrapped
/// [`PerspectiveProjection`]. Use [`Projection::custom`] to install it on a
/// camera.
#[derive(Debug, Clone, Reflect, Default)]
pub struct ObliqueProjection {
    /// The unmodified projection; fov, aspect ratio and far plane are always
    /// taken from here.
    pub base: PerspectiveProjection,
    /// View-space clip plane as `(n, d)` with `n . p + d >= 0` kept.
    ///
    /// The normal must point away from the camera (the camera sits in the
    /// clipped half-space, like it does for an ordinary near plane).
    pub clip_plane: Option<Vec4>,
}

impl ObliqueProjection {
    /// Wraps the observer camera's projection, so the portal camera inherits
    /// its fov, aspect ratio and far plane.
    #[must_use]
    pub fn from_observer(projection: &Projection) -> Self {
        let base = match projection {
            Projection::Perspective(perspective) => perspective.clone(),
            _ => PerspectiveProjection::default(),
        };
        Self {
            base,
            clip_plane: None,
        }
    }
}

impl CameraProjection for ObliqueProjection {
    fn get_clip_from_view(&self) -> Mat4 {
        let clip_from_view = self.base.get_clip_from_view();
        match self.clip_plane {
            Some(plane) => oblique_clip_from_view(clip_from_view, plane),
            None => clip_from_view,
        }
    }

    fn get_clip_from_view_for_sub(&self, sub_view: &SubCameraView) -> Mat4 {
        self.base.get_clip_from_view_for_sub(sub_view)
    }

    fn update(&mut self, width: f32, height: f32) {
        self.base.update(width, height);
    }

    fn far(&self) -> f32 {
        self.base.far()
    }

    fn get_frustum_corners(&self, z_near: f32, z_far: f32) -> [Vec3A; 8] {
        self.base.get_frustum_corners(z_near, z_far)
    }
}

/// Builds plane coefficients `(n, d)` from a point on the plane and its
/// normal, satisfying `n . p + d == 0`.
#[inline]
#[must_use]
pub fn plane_from_point_normal(point: Vec3, normal: Vec3) -> Vec4 {
    normal.extend(-normal.dot(point))
}

/// Maps world-space plane coefficients into a camera's view space.
///
/// Plane coefficients transform by the inverse-transpose of the point
/// transform; for the rigid camera pose this is the transpose of the
/// camera's world matrix.
#[inline]
#[must_use]
pub fn world_plane_to_view(camera_transform: &GlobalTransform, plane_world: Vec4) -> Vec4 {
    camera_transform.compute_matrix().transpose() * plane_world
}

/// Replaces the near clipping behavior of `clip_from_view` with the given
/// view-space plane.
///
/// Bevy's perspective projections are reversed-infinite-Z, so the plane is
/// mapped to `z_ndc == 1` and the diagonally opposite frustum corner to
/// `z_ndc == 0`, keeping the depth range usable. Falls back to the
/// unmodified matrix when the plane is degenerate or does not face the
/// camera from in front (the camera must sit in the clipped half-space).
#[must_use]
pub fn oblique_clip_from_view(clip_from_view: Mat4, plane: Vec4) -> Mat4 {
    if plane.truncate().length_squared() < DEGENERATE_NORMAL_EPSILON || plane.w >= 0.0 {
        return clip_from_view;
    }

    // Far corner of the frustum diagonal to the plane, at the reversed-Z
    // far value z_ndc = 0.
    let corner =
        clip_from_view.inverse() * Vec4::new(plane.x.signum(), plane.y.signum(), 0.0, 1.0);
    let denom = plane.dot(corner);
    if denom.abs() < DEGENERATE_CORNER_EPSILON {
        return clip_from_view;
    }

    let row_w = clip_from_view.row(3);
    let row_z = row_w - (row_w.dot(corner) / denom) * plane;

    let mut columns = clip_from_view.to_cols_array_2d();
    columns[0][2] = row_z.x;
    columns[1][2] = row_z.y;
    columns[2][2] = row_z.z;
    columns[3][2] = row_z.w;
    Mat4::from_cols_array_2d(&columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_clip() -> Mat4 {
        PerspectiveProjection::default().get_clip_from_view()
    }

    fn ndc_z(clip_from_view: Mat4, view_point: Vec3) -> f32 {
        let clip = clip_from_view * view_point.extend(1.0);
        clip.z / clip.w
    }

    #[test]
    fn reproduces_the_default_near_plane() {
        let projection = PerspectiveProjection::default();
        let clip_from_view = projection.get_clip_from_view();
        // The projection's own near plane: looking down -Z, keep -z >= near.
        let plane = Vec4::new(0.0, 0.0, -1.0, -projection.near);

        let oblique = oblique_clip_from_view(clip_from_view, plane);

        assert!(oblique.abs_diff_eq(clip_from_view, 1e-5));
    }

    #[test]
    fn clips_geometry_behind_the_plane() {
        // Portal plane at z = -5, keeping the far side.
        let plane = Vec4::new(0.0, 0.0, -1.0, -5.0);
        let oblique = oblique_clip_from_view(base_clip(), plane);

        // Markers on the kept side rasterize in the visible depth range.
        for z in [-5.01, -6.0, -20.0] {
            let depth = ndc_z(oblique, Vec3::new(0.0, 0.0, z));
            assert!(
                (0.0..=1.0).contains(&depth),
                "kept marker at z={z} produced depth {depth}"
            );
        }
        // Markers between the camera and the plane fall beyond the near
        // bound (reversed-Z: depth > 1) and are never rasterized.
        for z in [-4.99, -2.0, -0.5] {
            let depth = ndc_z(oblique, Vec3::new(0.0, 0.0, z));
            assert!(depth > 1.0, "clipped marker at z={z} produced depth {depth}");
        }
    }

    #[test]
    fn plane_maps_onto_the_near_depth() {
        let plane = Vec4::new(0.0, 0.0, -1.0, -3.0);
        let oblique = oblique_clip_from_view(base_clip(), plane);

        let depth = ndc_z(oblique, Vec3::new(0.4, -0.2, -3.0));
        assert!((depth - 1.0).abs() < 1e-4);
    }

    #[test]
    fn tilted_plane_keeps_the_correct_half_space() {
        let normal = Vec3::new(0.3, 0.0, -1.0).normalize();
        let plane = plane_from_point_normal(Vec3::new(0.0, 0.0, -4.0), normal);
        let oblique = oblique_clip_from_view(base_clip(), plane);

        let kept = Vec3::new(0.0, 0.0, -6.0);
        let clipped = Vec3::new(-2.0, 0.0, -4.0);
        assert!(normal.dot(kept - Vec3::new(0.0, 0.0, -4.0)) > 0.0);
        assert!(normal.dot(clipped - Vec3::new(0.0, 0.0, -4.0)) < 0.0);

        assert!(ndc_z(oblique, kept) <= 1.0);
        assert!(ndc_z(oblique, clipped) > 1.0);
    }

    #[test]
    fn degenerate_normal_falls_back_to_the_default_projection() {
        let clip_from_view = base_clip();
        let oblique = oblique_clip_from_view(clip_from_view, Vec4::new(0.0, 0.0, 0.0, -5.0));
        assert_eq!(oblique, clip_from_view);
    }

    #[test]
    fn plane_behind_the_camera_falls_back() {
        let clip_from_view = base_clip();
        // d >= 0 puts the camera on the kept side or on the plane itself.
        let through_camera = Vec4::new(0.0, 0.0, -1.0, 0.0);
        let behind = Vec4::new(0.0, 0.0, 1.0, 2.0);
        assert_eq!(
            oblique_clip_from_view(clip_from_view, through_camera),
            clip_from_view
        );
        assert_eq!(oblique_clip_from_view(clip_from_view, behind), clip_from_view);
    }

    #[test]
    fn world_plane_maps_into_view_space() {
        // Camera at (0, 0, 10) looking down -Z; a world plane at the origin
        // facing +Z becomes a view-space plane at z = -10.
        let camera = GlobalTransform::from(Transform::from_xyz(0.0, 0.0, 10.0));
        let plane_world = plane_from_point_normal(Vec3::ZERO, Vec3::Z);

        let plane_view = world_plane_to_view(&camera, plane_world);

        assert!(plane_view.abs_diff_eq(Vec4::new(0.0, 0.0, 1.0, 10.0), 1e-5));
        // A view-space point on the world plane satisfies the mapped equation.
        let on_plane = Vec3::new(3.0, -2.0, -10.0);
        assert!(plane_view.truncate().dot(on_plane) + plane_view.w < 1e-4);
    }
}
