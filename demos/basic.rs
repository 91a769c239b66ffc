//! A minimal linked portal pair in front of a static camera.

use bevy::{color::palettes::tailwind::ORANGE_600, prelude::*};
#[cfg(feature = "gizmos")]
use bevy_seamless_portals::gizmos::PortalGizmosPlugin;
use bevy_seamless_portals::{LinkPortals, Portal, PortalPlugins};

fn main() {
    App::new()
        .add_plugins((
            DefaultPlugins,
            PortalPlugins,
            #[cfg(feature = "gizmos")]
            PortalGizmosPlugin,
        ))
        .add_systems(Startup, setup)
        .run();
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let primary_camera = commands
        .spawn((
            Camera3d::default(),
            Camera {
                clear_color: ClearColorConfig::Custom(Color::BLACK),
                ..default()
            },
            Transform::from_xyz(-3.5, 0.0, 8.0).looking_at(Vec3::ZERO, Vec3::Y),
        ))
        .id();

    commands.insert_resource(AmbientLight {
        brightness: 750.0,
        ..default()
    });

    commands.spawn((
        Mesh3d(meshes.add(Cuboid::default())),
        MeshMaterial3d(materials.add(Color::from(ORANGE_600))),
        Transform::from_xyz(1.5, 0.0, 0.0),
    ));

    // Looking into portal A shows the cube as seen from portal B's position.
    let rectangle = meshes.add(Rectangle::from_size(Vec2::splat(2.5)));
    let a = commands
        .spawn((
            Mesh3d(rectangle.clone()),
            Transform::from_xyz(-1.5, 0.0, 0.0),
            Portal::new(primary_camera),
        ))
        .id();
    let b = commands
        .spawn((
            Mesh3d(rectangle),
            Transform::from_xyz(1.5, 0.0, 2.0),
            Portal::new(primary_camera),
        ))
        .id();
    commands.queue(LinkPortals { a, b });
}
