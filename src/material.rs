//! The portal surface's material.
//!
//! The surface is shaded by sampling the portal camera's off-screen image
//! with *screen-space* texture coordinates (the fragment's framebuffer
//! position divided by the viewport size). Mesh-authored UVs would distort
//! under perspective; screen-space sampling guarantees the surface shows
//! exactly the pixels the mirrored camera rendered for that part of the
//! screen, whatever the viewing angle.

use bevy::{
    asset::load_internal_asset,
    core_pipeline::core_3d::CORE_3D_DEPTH_FORMAT,
    pbr::{MaterialPipeline, MaterialPipelineKey},
    prelude::*,
    render::{
        mesh::MeshVertexBufferLayoutRef,
        render_resource::{
            AsBindGroup, CompareFunction, DepthBiasState, DepthStencilState, Face,
            RenderPipelineDescriptor, ShaderRef, SpecializedMeshPipelineError, StencilFaceState,
            StencilState,
        },
    },
    window::WindowResized,
};

use crate::{
    Portal,
    camera::{PortalCameraSystems, PortalImage},
};

pub const PORTAL_SHADER_HANDLE: Handle<Shader> =
    Handle::weak_from_u128(47911207032941047610470731070329089744);

pub struct PortalMaterialPlugin;

impl Plugin for PortalMaterialPlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            PORTAL_SHADER_HANDLE,
            concat!(env!("CARGO_MANIFEST_DIR"), "/assets/portal.wgsl"),
            Shader::from_wgsl
        );

        app.add_plugins(MaterialPlugin::<PortalMaterial>::default())
            .add_systems(
                PreUpdate,
                touch_portal_materials
                    .run_if(on_event::<WindowResized>)
                    .after(PortalCameraSystems::ResizeImage),
            )
            .add_observer(attach_surface_material)
            .add_observer(blank_surface_material);
    }
}

/// Material used for a [`Portal`]'s mesh.
#[derive(Asset, AsBindGroup, Clone, Reflect)]
#[bind_group_data(PortalMaterialKey)]
pub struct PortalMaterial {
    /// The linked camera's off-screen image. `None` renders the neutral
    /// fallback fill, which is what an unlinked portal displays.
    #[texture(0)]
    #[sampler(1)]
    pub source_image: Option<Handle<Image>>,
    /// Specifies which side of the portal to cull: "front", "back", or
    /// neither. Inherited from [`Portal::cull_mode`] but not kept in sync.
    #[reflect(ignore)]
    pub cull_mode: Option<Face>,
    /// The effect of draw calls on the depth and stencil aspects of the
    /// portal. You can make use of this field to resolve z-fighting.
    #[reflect(ignore)]
    pub depth_stencil: Option<DepthStencilState>,
}

impl Default for PortalMaterial {
    fn default() -> Self {
        Self {
            source_image: None,
            cull_mode: Some(Face::Back),
            depth_stencil: Some(DepthStencilState {
                format: CORE_3D_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::GreaterEqual,
                stencil: StencilState {
                    front: StencilFaceState::IGNORE,
                    back: StencilFaceState::IGNORE,
                    read_mask: 0,
                    write_mask: 0,
                },
                bias: DepthBiasState::default(),
            }),
        }
    }
}

impl Material for PortalMaterial {
    fn fragment_shader() -> ShaderRef {
        PORTAL_SHADER_HANDLE.into()
    }

    fn specialize(
        _pipeline: &MaterialPipeline<Self>,
        descriptor: &mut RenderPipelineDescriptor,
        _layout: &MeshVertexBufferLayoutRef,
        key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        descriptor.primitive.cull_mode = key.bind_group_data.cull_mode;
        descriptor.depth_stencil = key.bind_group_data.depth_stencil;
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PortalMaterialKey {
    cull_mode: Option<Face>,
    depth_stencil: Option<DepthStencilState>,
}

impl From<&PortalMaterial> for PortalMaterialKey {
    fn from(material: &PortalMaterial) -> Self {
        Self {
            cull_mode: material.cull_mode,
            depth_stencil: material.depth_stencil.clone(),
        }
    }
}

/// Marks all [`PortalMaterial`]s on [`Portal`] entities as changed in the
/// asset system, forcing their bind groups to pick up resized images.
///
/// See <https://github.com/bevyengine/bevy/issues/5069> for context.
fn touch_portal_materials(
    material_query: Query<&MeshMaterial3d<PortalMaterial>, With<Portal>>,
    mut materials: ResMut<Assets<PortalMaterial>>,
) {
    for material_handle in &material_query {
        materials.get_mut(material_handle);
    }
}

/// Observer that gives a portal its surface material once its camera's
/// image exists.
///
/// A portal that already carries a [`PortalMaterial`] (from a previous
/// link) keeps it and only has its image re-pointed.
fn attach_surface_material(
    trigger: Trigger<OnAdd, PortalImage>,
    mut commands: Commands,
    portal_query: Query<(&Portal, &PortalImage, Option<&MeshMaterial3d<PortalMaterial>>)>,
    mut materials: ResMut<Assets<PortalMaterial>>,
) {
    let entity = trigger.target();
    let Ok((portal, portal_image, material_handle)) = portal_query.get(entity) else {
        return;
    };

    if let Some(material) = material_handle.and_then(|handle| materials.get_mut(&handle.0)) {
        material.source_image = Some(portal_image.0.clone());
        return;
    }

    commands
        .entity(entity)
        .insert(MeshMaterial3d(materials.add(PortalMaterial {
            source_image: Some(portal_image.0.clone()),
            cull_mode: portal.cull_mode,
            ..default()
        })));
}

/// Observer that reverts a portal to the neutral fill when it loses its
/// image, which happens when the portal is unlinked.
fn blank_surface_material(
    trigger: Trigger<OnRemove, PortalImage>,
    portal_query: Query<&MeshMaterial3d<PortalMaterial>>,
    mut materials: ResMut<Assets<PortalMaterial>>,
) {
    let Ok(material_handle) = portal_query.get(trigger.target()) else {
        return;
    };
    let Some(material) = materials.get_mut(&material_handle.0) else {
        return;
    };
    material.source_image = None;
}
