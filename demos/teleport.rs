//! Demonstrates two bidirectional portals with seamless traversal.
//!
//! The camera is an observer traveler: walking through either portal swaps
//! it to the other side without a visible cut. A torus slides back and
//! forth through one portal, stretching across the pair with a sliced
//! clone while it crosses.

use std::f32::consts::FRAC_PI_4;

use bevy::{
    color::palettes::tailwind::{SKY_200, SLATE_200},
    input::mouse::MouseMotion,
    prelude::*,
    render::{render_resource::Face, view::RenderLayers},
    window::{CursorGrabMode, PrimaryWindow},
};
#[cfg(feature = "gizmos")]
use bevy_seamless_portals::gizmos::PortalGizmosPlugin;
use bevy_seamless_portals::{
    LinkPortals, ObserverTraveler, Portal, PortalPlugins, Traveler, sliceable,
    slice::SliceMaterial,
};

fn main() {
    App::new()
        .add_plugins((
            DefaultPlugins,
            PortalPlugins,
            #[cfg(feature = "gizmos")]
            PortalGizmosPlugin,
        ))
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_camera_look, handle_movement, slide_shuttle))
        .run();
}

const CAMERA_START_XYZ: Vec3 = Vec3::new(10.0, 0.5, 5.0);
const FLOOR_MESH_SIZE: f32 = 10.0;
const WALL_MESH_SIZE: f32 = 20.0;
const PORTAL_MESH_SIZE: f32 = 2.5;
const PORTAL_FRAME_SIZES_AND_TRANSLATIONS: [(Vec3, Vec3); 4] = [
    // Left
    (Vec3::new(0.1, 2.5, 0.2), Vec3::new(-1.3, -0.009, 0.0)),
    // Right
    (Vec3::new(0.1, 2.5, 0.2), Vec3::new(1.3, -0.009, 0.0)),
    // Top
    (Vec3::new(2.7, 0.1, 0.2), Vec3::new(0.0, 1.291, 0.0)),
    // Bottom
    (Vec3::new(2.7, 0.1, 0.2), Vec3::new(-0.0, -1.309, 0.0)),
];

// Component used for camera controlling
#[derive(Component)]
struct CameraController {
    // Sensitivity of the camera with respect to mouse movement
    sensitivity: f32,
    // Speed the controller moves in world space
    speed: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            sensitivity: 0.03,
            speed: 3.0,
        }
    }
}

// Component marking the torus that slides through portal A
#[derive(Component)]
struct Shuttle;

fn setup(
    mut commands: Commands,
    mut primary_window: Single<&mut Window, With<PrimaryWindow>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut slice_materials: ResMut<Assets<SliceMaterial>>,
) {
    primary_window.cursor_options.grab_mode = CursorGrabMode::Locked;
    primary_window.cursor_options.visible = false;

    let primary_camera = commands
        .spawn((
            Camera3d::default(),
            Camera {
                clear_color: ClearColorConfig::Custom(Color::BLACK),
                ..default()
            },
            Transform::from_translation(CAMERA_START_XYZ),
            CameraController::default(),
            // The camera itself crosses portals, swapping at the midplane.
            ObserverTraveler,
            Traveler::default().with_radius(0.1),
            RenderLayers::from_layers(&[0, 1]),
        ))
        .id();

    commands.insert_resource(AmbientLight {
        brightness: 750.0,
        ..default()
    });

    let floor_mesh = meshes.add(Plane3d::new(Vec3::Y, Vec2::splat(FLOOR_MESH_SIZE)));
    let torus_mesh = meshes.add(Torus::default());
    let portal_mesh = meshes.add(Rectangle::from_size(Vec2::splat(PORTAL_MESH_SIZE)));
    let wall_mesh = meshes.add(Cuboid::from_size(Vec3::splat(WALL_MESH_SIZE)));

    let y_offset = -PORTAL_MESH_SIZE / 2.0 - 0.01;
    let mut portals = Vec::new();

    for (sign, color) in [(-1.0, SKY_200), (1.0, SLATE_200)] {
        // Floor
        commands.spawn((
            Mesh3d(floor_mesh.clone()),
            MeshMaterial3d(materials.add(Color::from(color))),
            Transform::from_xyz(10.0 * sign, y_offset, 0.0),
        ));

        // Walls
        let wall_material = StandardMaterial {
            reflectance: 0.0,
            base_color: color.into(),
            cull_mode: Some(Face::Front),
            ..default()
        };
        commands.spawn((
            Mesh3d(wall_mesh.clone()),
            MeshMaterial3d(materials.add(wall_material)),
            Transform::from_xyz(10.0 * sign, y_offset, 0.0),
        ));

        let portal_transform = Transform::from_xyz(10.0 * sign, 0.0, 0.0)
            .with_rotation(Quat::from_axis_angle(Vec3::Y, FRAC_PI_4));
        portals.push(
            commands
                .spawn((
                    Mesh3d(portal_mesh.clone()),
                    portal_transform,
                    // The mesh is a `Rectangle`, so to allow for the portal
                    // to be seen from both sides, don't cull any of its
                    // faces.
                    Portal::new(primary_camera)
                        .with_extent(Vec2::splat(PORTAL_MESH_SIZE / 2.0))
                        .with_cull_mode(None),
                    // Stop portals from recursively rendering eachother
                    RenderLayers::layer(1),
                ))
                .with_children(|parent| {
                    // Portal borders
                    for (size, translation) in PORTAL_FRAME_SIZES_AND_TRANSLATIONS {
                        parent.spawn((
                            Mesh3d(meshes.add(Cuboid::from_size(size))),
                            MeshMaterial3d(materials.add(Color::BLACK)),
                            Transform::from_translation(translation),
                        ));
                    }
                })
                .id(),
        );
    }

    commands.queue(LinkPortals {
        a: portals[0],
        b: portals[1],
    });

    // A torus shuttling through portal A, stretching across the pair while
    // it crosses.
    commands.spawn((
        Mesh3d(torus_mesh),
        MeshMaterial3d(slice_materials.add(sliceable(StandardMaterial {
            base_color: Color::BLACK,
            ..default()
        }))),
        Transform::from_xyz(-10.0, y_offset + 1.5, 3.0)
            .with_rotation(Quat::from_axis_angle(Vec3::Z, FRAC_PI_4)),
        Traveler::default().with_radius(0.75),
        Shuttle,
    ));
}

fn slide_shuttle(mut shuttle_query: Query<&mut Transform, With<Shuttle>>, time: Res<Time>) {
    for mut transform in &mut shuttle_query {
        // Oscillate through the portal's plane without leaving its trigger
        // volume, so the torus stays permanently mid-crossing and visibly
        // stretches between the two mouths.
        let along = (time.elapsed_secs() * 0.4).sin();
        let normal = Quat::from_axis_angle(Vec3::Y, FRAC_PI_4) * Vec3::Z;
        transform.translation = Vec3::new(-10.0, transform.translation.y, 0.0) + normal * along;
    }
}

fn handle_camera_look(
    mut mouse_motion_events: EventReader<MouseMotion>,
    mut camera_query: Query<(&CameraController, &mut Transform)>,
) {
    let Ok((camera_controller, mut transform)) = camera_query.single_mut() else {
        return;
    };

    for event in mouse_motion_events.read() {
        let yaw_delta = Quat::from_rotation_y(
            (-event.delta.x * camera_controller.sensitivity)
                .clamp(-89.0, 89.0)
                .to_radians(),
        );
        let pitch_delta =
            Quat::from_rotation_x((-event.delta.y * camera_controller.sensitivity).to_radians());
        transform.rotation = yaw_delta * transform.rotation.normalize() * pitch_delta;
    }
}

fn handle_movement(
    keys: Res<ButtonInput<KeyCode>>,
    mut camera_query: Query<(&CameraController, &mut Transform)>,
    time: Res<Time>,
) {
    let Ok((camera_controller, mut transform)) = camera_query.single_mut() else {
        return;
    };

    // Zero the y-vector to only allow lateral movement
    let forward = transform.forward().with_y(0.0).normalize();
    let right = transform.right().with_y(0.0).normalize();

    let mut movement = Vec3::ZERO;

    if keys.pressed(KeyCode::KeyW) {
        movement += forward;
    }
    if keys.pressed(KeyCode::KeyS) {
        movement -= forward;
    }
    if keys.pressed(KeyCode::KeyA) {
        movement -= right;
    }
    if keys.pressed(KeyCode::KeyD) {
        movement += right;
    }

    transform.translation += movement * camera_controller.speed * time.delta_secs();
}
