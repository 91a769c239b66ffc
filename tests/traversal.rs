//! End-to-end traversal over a real schedule.
//!
//! Portal A sits at the origin facing +Z, portal B at (10, 0, 0) facing -X.
//! A traveler integrating its own velocity approaches A from behind, crosses
//! its plane, and must come out of B with pose and velocity re-expressed in
//! B's frame.

use std::f32::consts::{FRAC_PI_2, PI};

use bevy::{ecs::system::Command, prelude::*, transform::TransformPlugin};
use bevy_seamless_portals::{
    Crossing, LinkPortals, Portal, PortalTransfer, SliceParams, Traveler, TravelerClone,
    TravelerPlugin, transform::relocate_direction,
};

const DT: f32 = 0.05;
const EPSILON: f32 = 1e-3;

#[derive(Component)]
struct Velocity(Vec3);

fn integrate_velocity(mut query: Query<(&mut Transform, &Velocity)>) {
    for (mut transform, velocity) in &mut query {
        transform.translation += velocity.0 * DT;
    }
}

/// Collaborator-side handling of a transfer: world-space velocity is
/// re-expressed in the destination portal's frame.
fn relocate_velocity_on_transfer(
    mut transfers: EventReader<PortalTransfer>,
    mut velocity_query: Query<&mut Velocity>,
    portal_query: Query<&GlobalTransform, With<Portal>>,
) {
    for transfer in transfers.read() {
        let Ok(mut velocity) = velocity_query.get_mut(transfer.traveler) else {
            continue;
        };
        let Ok([source, destination]) =
            portal_query.get_many([transfer.source, transfer.destination])
        else {
            continue;
        };
        velocity.0 = relocate_direction(source, destination, velocity.0);
    }
}

fn setup_app() -> App {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, TransformPlugin, TravelerPlugin::default()))
        .add_systems(Update, (relocate_velocity_on_transfer, integrate_velocity).chain());
    app
}

fn clone_count(app: &mut App) -> usize {
    let world = app.world_mut();
    let mut clones = world.query::<&TravelerClone>();
    clones.iter(world).count()
}

#[test]
fn traveler_crosses_the_pair_end_to_end() {
    let mut app = setup_app();

    let world = app.world_mut();
    let camera = world.spawn(Transform::IDENTITY).id();
    // Portal A: at the origin, forward +Z.
    let a = world
        .spawn((
            Transform::from_rotation(Quat::from_rotation_y(PI)),
            Portal::new(camera)
                .with_extent(Vec2::splat(1.25))
                .with_trigger_depth(0.5),
        ))
        .id();
    // Portal B: at (10, 0, 0), forward -X.
    let b = world
        .spawn((
            Transform::from_xyz(10.0, 0.0, 0.0).with_rotation(Quat::from_rotation_y(FRAC_PI_2)),
            Portal::new(camera)
                .with_extent(Vec2::splat(1.25))
                .with_trigger_depth(0.5),
        ))
        .id();
    LinkPortals { a, b }.apply(world);

    let traveler = world
        .spawn((
            Transform::from_xyz(0.0, 0.0, -1.0),
            Traveler::default().with_radius(0.25),
            Velocity(Vec3::new(0.0, 0.0, 2.0)),
        ))
        .id();

    let mut saw_crossing = false;
    let mut transferred = false;

    for _ in 0..60 {
        app.update();

        let position = app.world().get::<Transform>(traveler).unwrap().translation;

        let active_clone = app
            .world()
            .get::<Crossing>(traveler)
            .map(|crossing| crossing.clone);
        if let Some(clone) = active_clone {
            saw_crossing = true;

            // Exactly one clone mirrors the traveler on B's side.
            let clone = clone.expect("a plain traveler crosses with a clone");
            assert_eq!(clone_count(&mut app), 1);

            // A traveler at (0, 0, z) mirrors to (10 - z, 0, 0).
            let clone_position = app.world().get::<Transform>(clone).unwrap().translation;
            let expected = Vec3::new(10.0 - position.z, 0.0, 0.0);
            assert!(
                clone_position.abs_diff_eq(expected, EPSILON),
                "clone at {clone_position}, expected {expected}"
            );

            // Entry was from behind A: the original keeps the back side,
            // the clone the complementary one.
            let original_slice = app.world().get::<SliceParams>(traveler).unwrap();
            let clone_slice = app.world().get::<SliceParams>(clone).unwrap();
            assert!(original_slice.enabled && !original_slice.flip);
            assert!(clone_slice.enabled && clone_slice.flip);
        } else if saw_crossing {
            transferred = true;
            break;
        }
    }

    assert!(saw_crossing, "the traveler never entered the portal volume");
    assert!(transferred, "the crossing never completed");

    // The trigger volume reaches 0.75 units from the plane; the first
    // integration step past that is z = 0.8, which commits to (9.2, 0, 0).
    let transform = *app.world().get::<Transform>(traveler).unwrap();
    assert!(
        transform.translation.abs_diff_eq(Vec3::new(9.2, 0.0, 0.0), EPSILON),
        "committed pose was {}",
        transform.translation
    );
    // Orientation picked up the pair's relative rotation.
    assert!(
        transform
            .rotation
            .abs_diff_eq(Quat::from_rotation_y(-FRAC_PI_2), EPSILON)
            || transform
                .rotation
                .abs_diff_eq(-Quat::from_rotation_y(-FRAC_PI_2), EPSILON)
    );

    assert_eq!(clone_count(&mut app), 0);

    // One more frame delivers the transfer event to the velocity
    // collaborator: (0, 0, 2) becomes (-2, 0, 0), moving out of B.
    app.update();
    let velocity = app.world().get::<Velocity>(traveler).unwrap().0;
    assert!(
        velocity.abs_diff_eq(Vec3::new(-2.0, 0.0, 0.0), EPSILON),
        "velocity was {velocity}"
    );
}
