//! Gizmos for [`Portal`] debugging.

use bevy::{
    color::palettes::tailwind::{CYAN_400, ORANGE_600},
    prelude::*,
};

use crate::{Portal, camera::PortalCamera, slice::SliceParams};

#[derive(Reflect, Default, GizmoConfigGroup)]
pub struct PortalGizmos;

/// Gizmo plugin for [`Portal`]s.
///
/// These gizmos help visualize portal surfaces, where each portal's camera
/// ended up (along with its facing direction), and the slice planes applied
/// to crossing travelers and their clones.
pub struct PortalGizmosPlugin;

impl Plugin for PortalGizmosPlugin {
    fn build(&self, app: &mut App) {
        app.init_gizmo_group::<PortalGizmos>().add_systems(
            Update,
            (debug_portal_surfaces, debug_portal_cameras, debug_slice_planes),
        );
    }
}

/// System that outlines each portal's surface extent.
fn debug_portal_surfaces(
    mut gizmos: Gizmos<PortalGizmos>,
    portal_query: Query<(&GlobalTransform, &Portal)>,
) {
    for (transform, portal) in &portal_query {
        let isometry = Isometry3d::new(transform.translation(), transform.rotation());
        gizmos.rect(isometry, portal.extent * 2.0, ORANGE_600);
    }
}

/// System that renders arrows indicating the translation and rotation of
/// [`PortalCamera`]s.
fn debug_portal_cameras(
    mut gizmos: Gizmos<PortalGizmos>,
    portal_query: Query<&Portal>,
    camera_query: Query<&GlobalTransform, With<PortalCamera>>,
) {
    for portal in &portal_query {
        let Some(camera) = portal
            .linked_camera
            .and_then(|camera| camera_query.get(camera).ok())
        else {
            continue;
        };
        let start = camera.translation();
        gizmos.arrow(start, start + *camera.forward() * 0.5, ORANGE_600);
    }
}

/// System that renders the active slice planes as normal arrows.
fn debug_slice_planes(mut gizmos: Gizmos<PortalGizmos>, slice_query: Query<&SliceParams>) {
    for params in &slice_query {
        if !params.enabled {
            continue;
        }
        gizmos.arrow(params.center, params.center + params.normal, CYAN_400);
    }
}
