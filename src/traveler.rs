//! The traveler transfer state machine.
//!
//! A traveler overlapping a portal's trigger volume enters a crossing: a
//! render-only clone appears at the destination, both are sliced against
//! their portal planes, and when the overlap ends the traveler commits to
//! whichever side of the pair it finished on. The observer is special-cased:
//! a camera cannot be sliced meaningfully, so it transfers atomically the
//! instant it passes the midplane, with the destination portal's camera
//! re-posed in the same step so the swap frame already shows correct
//! content.
//!
//! All systems here run before transform propagation; portal cameras update
//! after it. That ordering is the only cross-module guarantee the design
//! needs.

use bevy::{prelude::*, transform::TransformSystem};

use crate::{
    Portal,
    camera::{PortalCamera, mirror_camera_pose},
    slice::{SliceMaterial, SliceParams},
    transform::{relocate_point, relocate_transform},
};

/// Plugin providing crossing detection, clone lifecycle and transfers.
pub struct TravelerPlugin {
    /// Whether to run the built-in trigger-volume overlap detector.
    ///
    /// Disable it to drive [`PortalOverlapStart`]/[`PortalOverlapEnd`] from
    /// an external physics engine instead.
    pub detect_overlaps: bool,
}

impl Default for TravelerPlugin {
    fn default() -> Self {
        Self {
            detect_overlaps: true,
        }
    }
}

/// Label for systems advancing traveler crossings.
#[derive(Debug, PartialEq, Eq, Clone, Hash, SystemSet)]
pub enum TravelerSystems {
    /// Emits overlap events from the built-in trigger volumes.
    DetectOverlaps,
    /// Starts and ends crossings from overlap events.
    Transitions,
    /// Re-poses clones, refreshes slice planes, transfers at the midplane.
    UpdateCrossings,
    /// Records each traveler's end-of-frame position.
    RecordPositions,
}

impl Plugin for TravelerPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<PortalOverlapStart>()
            .add_event::<PortalOverlapEnd>()
            .add_event::<PortalTransfer>()
            .configure_sets(
                PostUpdate,
                (
                    TravelerSystems::DetectOverlaps,
                    TravelerSystems::Transitions,
                    TravelerSystems::UpdateCrossings,
                    TravelerSystems::RecordPositions,
                )
                    .chain()
                    .before(TransformSystem::TransformPropagate),
            )
            .add_systems(
                PostUpdate,
                (
                    apply_crossing_transitions.in_set(TravelerSystems::Transitions),
                    update_crossings.in_set(TravelerSystems::UpdateCrossings),
                    record_traveler_positions.in_set(TravelerSystems::RecordPositions),
                ),
            )
            .add_observer(despawn_crossing_clone)
            .register_type::<(Traveler, ObserverTraveler, Crossing, TravelerClone)>();

        if self.detect_overlaps {
            app.add_systems(
                PostUpdate,
                detect_portal_overlaps.in_set(TravelerSystems::DetectOverlaps),
            );
        }
    }
}

/// An object capable of crossing portals.
#[derive(Component, Reflect, Debug, Clone)]
#[reflect(Component)]
pub struct Traveler {
    /// Approximate radius of the collision volume, used as a margin by the
    /// built-in overlap detector.
    pub radius: f32,
    /// World position at the end of the previous frame. `None` until one
    /// frame has completed.
    pub prev_position: Option<Vec3>,
    /// The portal volume currently overlapped, tracked by the detector.
    overlapping: Option<Entity>,
}

impl Default for Traveler {
    fn default() -> Self {
        Self {
            radius: 0.2,
            prev_position: None,
            overlapping: None,
        }
    }
}

impl Traveler {
    #[inline]
    #[must_use]
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

/// Marks the observer's traveler (the entity carrying the primary camera).
///
/// Observers transfer atomically at the midplane instead of stretching
/// through the pair with a clone.
#[derive(Component, Reflect, Debug, Default)]
#[reflect(Component)]
#[require(Traveler)]
pub struct ObserverTraveler;

/// Present while a traveler is mid-crossing.
///
/// The set of entities holding this component is the active-crossing set;
/// it is sparse-set storage since it churns with every crossing.
#[derive(Component, Reflect, Debug)]
#[reflect(Component)]
#[component(storage = "SparseSet")]
pub struct Crossing {
    /// The portal whose volume started the crossing.
    pub portal: Entity,
    /// The render-only duplicate at the destination. `None` for observers.
    pub clone: Option<Entity>,
    /// Side of the portal plane the crossing started from (+1 front,
    /// -1 back; a start exactly on the plane counts as front).
    pub entry_side: f32,
    /// Side of the plane on the most recent frame.
    side: f32,
    /// Whether the midplane has been passed an odd number of times.
    crossed: bool,
}

/// Marks a crossing traveler's render-only duplicate, pointing back at the
/// original.
///
/// Clones are owned by their crossing: they despawn with it, and they are
/// not travelers themselves.
#[derive(Component, Reflect, Debug)]
#[reflect(Component)]
pub struct TravelerClone(pub Entity);

/// A traveler's volume began overlapping a portal's trigger volume.
///
/// This is the boundary contract with the physics collaborator; the
/// built-in detector emits the same events.
#[derive(Event, Debug, Clone, Copy)]
pub struct PortalOverlapStart {
    pub traveler: Entity,
    pub portal: Entity,
    /// The traveler's position at the time of the trigger, used to classify
    /// the entry side.
    pub position: Vec3,
}

/// A traveler's volume stopped overlapping a portal's trigger volume.
#[derive(Event, Debug, Clone, Copy)]
pub struct PortalOverlapEnd {
    pub traveler: Entity,
    pub portal: Entity,
}

/// A traveler's pose was re-expressed in the destination portal's frame.
///
/// Fired when a completed crossing commits, and when an observer swaps at
/// the midplane. Collaborators that keep world-space state for the traveler
/// (velocities, look targets) should re-express it with
/// [`crate::transform::relocate_direction`].
#[derive(Event, Debug, Clone, Copy)]
pub struct PortalTransfer {
    pub traveler: Entity,
    pub source: Entity,
    pub destination: Entity,
}

/// Which side of a portal's plane a point is on: +1 along the portal's
/// forward axis, -1 behind it. A point exactly on the plane counts as
/// front.
fn plane_side(portal_transform: &GlobalTransform, point: Vec3) -> f32 {
    let toward = portal_transform
        .forward()
        .dot(point - portal_transform.translation());
    if toward >= 0.0 { 1.0 } else { -1.0 }
}

/// Whether a point (with margin) is inside a portal's trigger volume.
///
/// `grown_side` extends the volume's depth on one side of the plane; the
/// detector uses it to keep an observer inside the volume until the
/// midplane test has run, so the near plane cannot poke through the surface
/// before the swap.
fn trigger_contains(
    portal: &Portal,
    portal_transform: &GlobalTransform,
    point: Vec3,
    margin: f32,
    grown_side: Option<f32>,
) -> bool {
    let local = portal_transform.rotation().inverse() * (point - portal_transform.translation());
    if local.x.abs() > portal.extent.x + margin || local.y.abs() > portal.extent.y + margin {
        return false;
    }
    // Forward is -Z in the portal's local frame.
    let depth = -local.z;
    let mut limit = portal.trigger_depth + margin;
    if let Some(side) = grown_side {
        if depth * side >= 0.0 {
            limit += portal.trigger_depth;
        }
    }
    depth.abs() <= limit
}

/// System that emits overlap events from the built-in trigger volumes.
///
/// A traveler tracks at most one overlapped portal at a time, which also
/// enforces the one-active-crossing rule at the detection level.
fn detect_portal_overlaps(
    mut traveler_query: Query<(
        Entity,
        &Transform,
        &mut Traveler,
        Option<&Crossing>,
        Has<ObserverTraveler>,
    )>,
    portal_query: Query<(Entity, &GlobalTransform, &Portal)>,
    mut start_events: EventWriter<PortalOverlapStart>,
    mut end_events: EventWriter<PortalOverlapEnd>,
) {
    for (entity, transform, mut traveler, crossing, is_observer) in &mut traveler_query {
        let position = transform.translation;

        if let Some(current) = traveler.overlapping {
            let grown_side = crossing
                .filter(|crossing| is_observer && crossing.portal == current)
                .map(|crossing| crossing.entry_side);
            let still_inside = portal_query.get(current).is_ok_and(|(_, portal_transform, portal)| {
                trigger_contains(portal, portal_transform, position, traveler.radius, grown_side)
            });
            if !still_inside {
                traveler.overlapping = None;
                end_events.write(PortalOverlapEnd {
                    traveler: entity,
                    portal: current,
                });
            }
            continue;
        }

        for (portal_entity, portal_transform, portal) in &portal_query {
            if trigger_contains(portal, portal_transform, position, traveler.radius, None) {
                traveler.overlapping = Some(portal_entity);
                start_events.write(PortalOverlapStart {
                    traveler: entity,
                    portal: portal_entity,
                    position,
                });
                break;
            }
        }
    }
}

/// System that starts and ends crossings from overlap events.
fn apply_crossing_transitions(
    mut commands: Commands,
    mut start_events: EventReader<PortalOverlapStart>,
    mut end_events: EventReader<PortalOverlapEnd>,
    mut traveler_query: Query<(
        &mut Transform,
        &mut Traveler,
        Option<&Crossing>,
        Has<ObserverTraveler>,
    )>,
    portal_query: Query<(&Portal, &GlobalTransform)>,
    renderable_query: Query<(Option<&Mesh3d>, Option<&MeshMaterial3d<SliceMaterial>>)>,
    mut transfer_events: EventWriter<PortalTransfer>,
) {
    for event in start_events.read() {
        let Ok((transform, _, crossing, is_observer)) = traveler_query.get_mut(event.traveler)
        else {
            continue;
        };
        if crossing.is_some() {
            // One active crossing per traveler; a second trigger waits for
            // the first to complete.
            continue;
        }
        let Ok((portal, portal_transform)) = portal_query.get(event.portal) else {
            continue;
        };
        let Some(linked) = portal.linked else {
            debug!("crossing trigger on unlinked portal {}, aborting", event.portal);
            continue;
        };
        let Ok((_, destination_transform)) = portal_query.get(linked) else {
            continue;
        };

        let entry_side = plane_side(portal_transform, event.position);

        let clone = if is_observer {
            None
        } else {
            let relocated = relocate_transform(portal_transform, destination_transform, &transform);
            let mut clone = commands.spawn((
                Name::new("Traveler Clone"),
                relocated,
                SliceParams::for_portal_plane(destination_transform, entry_side < 0.0),
            ));
            if let Ok((mesh, material)) = renderable_query.get(event.traveler) {
                if let Some(mesh) = mesh {
                    clone.insert(mesh.clone());
                }
                if let Some(material) = material {
                    clone.insert(material.clone());
                }
            }
            // Added last: the marker's `OnAdd` observer duplicates the slice
            // material and must see the handle already in place.
            clone.insert(TravelerClone(event.traveler));
            Some(clone.id())
        };

        if !is_observer {
            commands
                .entity(event.traveler)
                .insert(SliceParams::for_portal_plane(portal_transform, entry_side > 0.0));
        }
        commands.entity(event.traveler).insert(Crossing {
            portal: event.portal,
            clone,
            entry_side,
            side: entry_side,
            crossed: false,
        });
    }

    for event in end_events.read() {
        let Ok((mut transform, mut traveler, crossing, is_observer)) =
            traveler_query.get_mut(event.traveler)
        else {
            continue;
        };
        // A stray exit for a traveler that is not crossing is a no-op.
        let Some(crossing) = crossing else {
            continue;
        };
        if crossing.portal != event.portal {
            continue;
        }

        if !is_observer && crossing.crossed {
            if let Ok((portal, portal_transform)) = portal_query.get(event.portal)
                && let Some(linked) = portal.linked
                && let Ok((_, destination_transform)) = portal_query.get(linked)
            {
                let relocated =
                    relocate_transform(portal_transform, destination_transform, &transform);
                *transform = relocated;
                traveler.prev_position = traveler
                    .prev_position
                    .map(|p| relocate_point(portal_transform, destination_transform, p));
                transfer_events.write(PortalTransfer {
                    traveler: event.traveler,
                    source: event.portal,
                    destination: linked,
                });
            }
        }

        commands.entity(event.traveler).remove::<Crossing>();
        commands.entity(event.traveler).insert(SliceParams::DISABLED);
    }
}

/// System that advances every active crossing by one frame.
fn update_crossings(
    mut commands: Commands,
    mut traveler_query: Query<(
        Entity,
        &mut Transform,
        &mut Traveler,
        &mut Crossing,
        Has<ObserverTraveler>,
        Option<&mut SliceParams>,
    )>,
    portal_query: Query<(&Portal, &GlobalTransform)>,
    mut clone_query: Query<
        (&mut Transform, &mut SliceParams),
        (With<TravelerClone>, Without<Traveler>),
    >,
    mut portal_camera_query: Query<
        (&mut Transform, &mut GlobalTransform, &mut Camera),
        (With<PortalCamera>, Without<Traveler>, Without<TravelerClone>),
    >,
    mut transfer_events: EventWriter<PortalTransfer>,
) {
    for (entity, mut transform, mut traveler, mut crossing, is_observer, slice) in
        &mut traveler_query
    {
        let Ok((portal, portal_transform)) = portal_query.get(crossing.portal) else {
            continue;
        };
        let Some(linked) = portal.linked else {
            continue;
        };
        let Ok((destination_portal, destination_transform)) = portal_query.get(linked) else {
            continue;
        };

        let side = plane_side(portal_transform, transform.translation);
        let prev_side = traveler
            .prev_position
            .map(|p| plane_side(portal_transform, p))
            .unwrap_or(crossing.side);
        crossing.side = side;

        // Opposite signs sum to zero; anything else is not a midplane pass.
        if prev_side + side == 0.0 {
            crossing.crossed = !crossing.crossed;

            if is_observer {
                let relocated =
                    relocate_transform(portal_transform, destination_transform, &transform);

                // Re-pose the destination portal's camera from the
                // post-transfer pose before the camera systems run, so the
                // portal the observer emerges from displays correct content
                // on the very frame of the swap.
                if let Some(camera_entity) = destination_portal.linked_camera {
                    if let Ok((mut camera_transform, mut camera_global_transform, mut camera)) =
                        portal_camera_query.get_mut(camera_entity)
                    {
                        mirror_camera_pose(
                            destination_transform,
                            portal_transform,
                            &relocated,
                            &mut camera_transform,
                            &mut camera_global_transform,
                        );
                        camera.is_active = true;
                    }
                }

                traveler.prev_position = traveler
                    .prev_position
                    .map(|p| relocate_point(portal_transform, destination_transform, p));
                traveler.overlapping = None;
                *transform = relocated;
                commands.entity(entity).remove::<Crossing>();
                transfer_events.write(PortalTransfer {
                    traveler: entity,
                    source: crossing.portal,
                    destination: linked,
                });
                continue;
            }
        }

        if let Some(clone_entity) = crossing.clone {
            if let Ok((mut clone_transform, mut clone_slice)) = clone_query.get_mut(clone_entity) {
                *clone_transform =
                    relocate_transform(portal_transform, destination_transform, &transform);
                *clone_slice =
                    SliceParams::for_portal_plane(destination_transform, crossing.entry_side < 0.0);
            }
        }
        if let Some(mut slice) = slice {
            *slice = SliceParams::for_portal_plane(portal_transform, crossing.entry_side > 0.0);
        }
    }
}

/// System that records each traveler's end-of-frame position for the next
/// frame's midplane test.
fn record_traveler_positions(mut traveler_query: Query<(&Transform, &mut Traveler)>) {
    for (transform, mut traveler) in &mut traveler_query {
        traveler.prev_position = Some(transform.translation);
    }
}

/// Observer that reclaims the clone whenever a crossing ends, including
/// when a mid-crossing traveler is despawned outright.
fn despawn_crossing_clone(
    trigger: Trigger<OnRemove, Crossing>,
    crossing_query: Query<&Crossing>,
    mut commands: Commands,
) {
    let crossing = crossing_query.get(trigger.target()).unwrap();
    if let Some(clone) = crossing.clone {
        commands.entity(clone).try_despawn();
    }
}
