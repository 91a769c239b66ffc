//! Portal camera lifecycle and per-frame updates.
//!
//! Every linked portal owns one camera. Each frame the camera is posed as
//! the observer's mirror image through the pair, its projection is given an
//! oblique near plane at the linked portal's surface, and it renders into a
//! dedicated off-screen image that the portal's material samples. Cameras
//! only render while their portal surface is visible to the observer; the
//! skip is an optimization, correctness never depends on it.

use bevy::{
    core_pipeline::tonemapping::{DebandDither, Tonemapping},
    ecs::system::SystemParam,
    image::{TextureFormatPixelInfo, Volume},
    math::FloatOrd,
    prelude::*,
    render::{
        camera::{Exposure, ImageRenderTarget, ManualTextureViews, RenderTarget},
        render_resource::{
            Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        },
        view::{ColorGrading, ViewVisibility, VisibilitySystems},
    },
    transform::TransformSystem,
    window::{PrimaryWindow, WindowRef, WindowResized},
};

use crate::{
    Portal,
    projection::{ObliqueProjection, plane_from_point_normal, world_plane_to_view},
    transform::relocate_transform,
};

/// Offset of the oblique clip plane past the portal surface, so the
/// portal's own backing geometry never occludes its contents.
const CLIP_PLANE_BIAS: f32 = 0.025;

/// Plugin that provides [`PortalCamera`] spawning/despawning, pose and clip
/// plane updates, render activation, and resizing of rendered portal images.
pub struct PortalCameraPlugin;

/// Label for systems that update [`Portal`] related cameras.
#[derive(Debug, PartialEq, Eq, Clone, Hash, SystemSet)]
pub enum PortalCameraSystems {
    /// Resizes portal images if any [`WindowResized`] events are read.
    ResizeImage,
    /// Mirrors the observer's pose through each portal pair.
    UpdateTransform,
    /// Recomputes each portal camera's oblique clip plane.
    UpdateClipPlane,
    /// Enables cameras whose portal surface is visible this frame.
    UpdateActivation,
}

impl Plugin for PortalCameraPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            PostUpdate,
            (
                PortalCameraSystems::UpdateTransform,
                PortalCameraSystems::UpdateClipPlane,
            )
                .chain()
                .after(TransformSystem::TransformPropagate)
                .before(VisibilitySystems::UpdateFrusta),
        )
        .configure_sets(
            PostUpdate,
            PortalCameraSystems::UpdateActivation.after(VisibilitySystems::CheckVisibility),
        )
        .add_systems(
            PreUpdate,
            (
                validate_portal_links,
                setup_portal_cameras,
                teardown_portal_cameras,
                resize_portal_images.in_set(PortalCameraSystems::ResizeImage),
            ),
        )
        .add_systems(
            PostUpdate,
            (
                update_portal_camera_transform.in_set(PortalCameraSystems::UpdateTransform),
                update_portal_camera_clip_planes.in_set(PortalCameraSystems::UpdateClipPlane),
                update_portal_camera_activation.in_set(PortalCameraSystems::UpdateActivation),
            ),
        )
        .add_observer(despawn_portal_camera)
        .register_type::<(Portal, PortalCamera, PortalImage)>();
    }
}

/// Component used to mark a [`Portal`]'s associated camera.
///
/// Points back at the portal entity that owns it.
#[derive(Component, Reflect, Debug)]
#[reflect(Component)]
#[require(Camera3d)]
pub struct PortalCamera(pub Entity);

/// Component used to store a reference to a [`PortalCamera`]'s rendered
/// image, kept on the portal entity itself.
#[derive(Component, Reflect, Debug, Deref, DerefMut)]
#[reflect(Component)]
pub struct PortalImage(pub Handle<Image>);

/// System that warns about one-sided portal links.
///
/// A pair must always refer to each other; [`crate::LinkPortals`] maintains
/// that, hand-written links can break it.
fn validate_portal_links(
    changed_query: Query<(Entity, &Portal), Changed<Portal>>,
    portal_query: Query<&Portal>,
) {
    for (entity, portal) in &changed_query {
        let Some(linked) = portal.linked else {
            continue;
        };
        let reciprocal = portal_query.get(linked).ok().and_then(|p| p.linked);
        if reciprocal != Some(entity) {
            warn!(
                "portal {entity} links to {linked} but the link back is {reciprocal:?}; \
                 use LinkPortals to keep pairs symmetric"
            );
        }
    }
}

/// System that spawns a camera for every linked portal that does not have
/// one yet.
///
/// An image is created based on the observer camera's viewport size, and
/// the camera renders into it, inheriting any view properties currently
/// present on the observer.
fn setup_portal_cameras(
    mut commands: Commands,
    mut portal_query: Query<(Entity, &mut Portal), Changed<Portal>>,
    observer_query: Query<(
        &Camera,
        Option<&Projection>,
        Option<&Camera3d>,
        Option<&DebandDither>,
        Option<&Tonemapping>,
        Option<&ColorGrading>,
        Option<&Exposure>,
    )>,
    global_transform_query: Query<&GlobalTransform>,
    mut portal_images: PortalImages,
) {
    for (entity, mut portal) in &mut portal_query {
        if portal.linked.is_none() || portal.linked_camera.is_some() {
            continue;
        }

        let Ok((observer, projection, camera_3d, deband_dither, tonemapping, color_grading, exposure)) =
            observer_query.get(portal.primary_camera)
        else {
            error!(
                "could not setup portal camera for {entity}: primary_camera does not contain a Camera component"
            );
            continue;
        };

        let Some(image_handle) = portal_images.new(observer) else {
            error!("could not create portal image for {entity}");
            continue;
        };

        // The camera's pose is overwritten every frame; start it at the
        // linked portal so the first frame is not wildly off.
        let initial_transform = portal
            .linked
            .and_then(|linked| global_transform_query.get(linked).ok())
            .copied()
            .unwrap_or_default();

        let oblique = projection
            .map(ObliqueProjection::from_observer)
            .unwrap_or_default();

        portal.linked_camera = Some(
            commands
                .spawn((
                    Name::new("Portal Camera"),
                    Camera {
                        // Render before the observer so the image is fresh
                        // when the portal surface samples it.
                        order: -1,
                        target: RenderTarget::Image(ImageRenderTarget {
                            handle: image_handle.clone(),
                            scale_factor: FloatOrd(1.0),
                        }),
                        ..observer.clone()
                    },
                    Projection::custom(oblique),
                    initial_transform.compute_transform(),
                    initial_transform,
                    camera_3d.cloned().unwrap_or_default(),
                    deband_dither.copied().unwrap_or_default(),
                    tonemapping.copied().unwrap_or_default(),
                    color_grading.cloned().unwrap_or_default(),
                    exposure.copied().unwrap_or_default(),
                    PortalCamera(entity),
                ))
                .id(),
        );

        commands.entity(entity).insert(PortalImage(image_handle));
    }
}

/// System that reclaims the camera of a portal that has been unlinked.
///
/// Removing [`PortalImage`] reverts the surface material to its neutral
/// fill.
fn teardown_portal_cameras(
    mut commands: Commands,
    mut portal_query: Query<(Entity, &mut Portal), Changed<Portal>>,
) {
    for (entity, mut portal) in &mut portal_query {
        if portal.linked.is_some() {
            continue;
        }
        let Some(linked_camera) = portal.linked_camera.take() else {
            continue;
        };
        commands.entity(linked_camera).despawn();
        commands.entity(entity).remove::<PortalImage>();
    }
}

/// Observer that despawns a portal's camera when the [`Portal`] component
/// is removed from a triggered entity.
fn despawn_portal_camera(
    trigger: Trigger<OnRemove, Portal>,
    portal_query: Query<&Portal>,
    mut commands: Commands,
) {
    let portal = portal_query.get(trigger.target()).unwrap();

    if let Some(linked_camera) = portal.linked_camera {
        commands.entity(linked_camera).despawn();
    }
}

/// Computes and applies a portal camera's mirrored pose.
///
/// Exposed to the crossing state machine so an observer transfer can
/// re-pose the destination portal's camera synchronously, before the
/// regular update runs.
pub(crate) fn mirror_camera_pose(
    portal_transform: &GlobalTransform,
    destination_transform: &GlobalTransform,
    observer_transform: &Transform,
    camera_transform: &mut Transform,
    camera_global_transform: &mut GlobalTransform,
) {
    let mirrored = relocate_transform(portal_transform, destination_transform, observer_transform);
    *camera_transform = mirrored;
    *camera_global_transform = GlobalTransform::from(mirrored);
}

/// System that poses each [`PortalCamera`] as the observer's mirror image
/// through the portal pair.
fn update_portal_camera_transform(
    portal_query: Query<(&GlobalTransform, &Portal), Without<PortalCamera>>,
    global_transform_query: Query<&GlobalTransform, Without<PortalCamera>>,
    mut portal_camera_query: Query<(&mut GlobalTransform, &mut Transform), With<PortalCamera>>,
) {
    for (portal_transform, portal) in &portal_query {
        let (Some(linked), Some(linked_camera)) = (portal.linked, portal.linked_camera) else {
            continue;
        };

        let Ok([observer_transform, destination_transform]) =
            global_transform_query.get_many([portal.primary_camera, linked])
        else {
            continue;
        };

        let Ok((mut camera_global_transform, mut camera_transform)) =
            portal_camera_query.get_mut(linked_camera)
        else {
            continue;
        };

        mirror_camera_pose(
            portal_transform,
            destination_transform,
            &observer_transform.compute_transform(),
            &mut camera_transform,
            &mut camera_global_transform,
        );
    }
}

/// System that points each portal camera's oblique clip plane at the linked
/// portal's surface.
///
/// The plane's kept half-space faces away from the camera, so geometry
/// between the linked portal and the camera (the wall it usually hangs on)
/// is never rasterized. With the plane installed in the projection, the
/// culling frustum's near half-space follows automatically when frusta are
/// rebuilt from it.
fn update_portal_camera_clip_planes(
    portal_query: Query<&Portal>,
    global_transform_query: Query<&GlobalTransform>,
    mut portal_camera_query: Query<(&mut Projection, &GlobalTransform), With<PortalCamera>>,
) {
    for portal in &portal_query {
        let (Some(linked), Some(linked_camera)) = (portal.linked, portal.linked_camera) else {
            continue;
        };

        let Ok(destination_transform) = global_transform_query.get(linked) else {
            continue;
        };

        let Ok((mut projection, camera_transform)) = portal_camera_query.get_mut(linked_camera)
        else {
            continue;
        };

        let center = destination_transform.translation();
        let forward = *destination_transform.forward();
        let mut normal = forward;
        if (camera_transform.translation() - center).dot(forward) >= 0.0 {
            normal = -normal;
        }
        let plane_world = plane_from_point_normal(center + normal * CLIP_PLANE_BIAS, normal);
        let plane_view = world_plane_to_view(camera_transform, plane_world);

        let Projection::Custom(custom) = &mut *projection else {
            continue;
        };
        let Some(oblique) = custom.downcast_mut::<ObliqueProjection>() else {
            continue;
        };
        oblique.clip_plane = Some(plane_view);
    }
}

/// System that gates portal rendering on the surface actually being seen.
fn update_portal_camera_activation(
    portal_query: Query<(&Portal, &ViewVisibility)>,
    mut portal_camera_query: Query<&mut Camera, With<PortalCamera>>,
) {
    for (portal, view_visibility) in &portal_query {
        let Some(linked_camera) = portal.linked_camera else {
            continue;
        };
        let Ok(mut camera) = portal_camera_query.get_mut(linked_camera) else {
            continue;
        };
        let visible = view_visibility.get();
        if camera.is_active != visible {
            camera.is_active = visible;
        }
    }
}

/// System that resizes [`PortalImage`]s when the [`WindowResized`] event is
/// fired.
fn resize_portal_images(
    mut resized_reader: EventReader<WindowResized>,
    window_query: Query<&Window>,
    portal_image_query: Query<&PortalImage>,
    mut images: ResMut<Assets<Image>>,
) {
    for event in resized_reader.read() {
        let Ok(window) = window_query.get(event.window) else {
            continue;
        };
        let window_size = window.physical_size();
        let size = Extent3d {
            width: window_size.x,
            height: window_size.y,
            ..default()
        };

        for portal_image in &portal_image_query {
            let Some(image) = images.get_mut(&portal_image.0) else {
                continue;
            };

            image.resize(size);
        }
    }
}

#[derive(SystemParam)]
struct PortalImages<'w, 's> {
    primary_window_query: Query<'w, 's, &'static Window, With<PrimaryWindow>>,
    window_query: Query<'w, 's, &'static Window>,
    images: ResMut<'w, Assets<Image>>,
    manual_texture_views: Res<'w, ManualTextureViews>,
}

impl PortalImages<'_, '_> {
    /// Creates a new [`Image`] with size matching the given `camera`.
    ///
    /// Returns `None` if no viewport size could be obtained.
    fn new(&mut self, camera: &Camera) -> Option<Handle<Image>> {
        let size = self.get_viewport_size(camera)?;
        let format = TextureFormat::Bgra8UnormSrgb;
        let image = Image {
            data: Some(vec![0; size.volume() * format.pixel_size()]),
            texture_descriptor: TextureDescriptor {
                label: None,
                size,
                dimension: TextureDimension::D2,
                format,
                mip_level_count: 1,
                sample_count: 1,
                usage: TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_DST
                    | TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            },
            ..default()
        };
        Some(self.images.add(image))
    }

    /// Retrieves the size of the viewport of a given `camera`.
    ///
    /// Returns `None` if no sizing could be obtained.
    fn get_viewport_size(&self, camera: &Camera) -> Option<Extent3d> {
        match camera.viewport.as_ref() {
            Some(viewport) => Some(viewport.physical_size),
            None => match &camera.target {
                RenderTarget::Window(window_ref) => (match window_ref {
                    WindowRef::Primary => self.primary_window_query.single().ok(),
                    WindowRef::Entity(entity) => self.window_query.get(*entity).ok(),
                })
                .map(Window::physical_size),
                RenderTarget::Image(image_target) => {
                    self.images.get(&image_target.handle).map(Image::size)
                }
                RenderTarget::TextureView(handle) => self
                    .manual_texture_views
                    .get(handle)
                    .map(|texture| texture.size),
            },
        }
        .map(|size| Extent3d {
            width: size.x,
            height: size.y,
            ..default()
        })
    }
}
