//! Plane slicing for travelers mid-crossing.
//!
//! While an object straddles a portal, the original and its clone must each
//! show only their half of the geometry: the original everything on the
//! entry side of the source portal's plane, the clone everything past the
//! destination portal's plane. [`SliceParams`] carries the plane and which
//! side to keep; [`SliceMaterial`] applies it per fragment as an arithmetic
//! select on alpha (no data-dependent branching in the fragment stage).
//!
//! The parameters are driven by the crossing state machine, but they are an
//! ordinary component: set them yourself for reveal effects unrelated to
//! portals.

use bevy::{
    asset::load_internal_asset,
    pbr::{ExtendedMaterial, MaterialExtension},
    prelude::*,
    render::render_resource::{AsBindGroup, ShaderRef, ShaderType},
};

use crate::traveler::{TravelerClone, TravelerSystems};

pub const SLICE_SHADER_HANDLE: Handle<Shader> =
    Handle::weak_from_u128(233901170489949933716364646467936428047);

/// Standard material extended with a slicing plane.
pub type SliceMaterial = ExtendedMaterial<StandardMaterial, SliceExtension>;

pub struct SlicePlugin;

impl Plugin for SlicePlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            SLICE_SHADER_HANDLE,
            concat!(env!("CARGO_MANIFEST_DIR"), "/assets/slice.wgsl"),
            Shader::from_wgsl
        );

        app.add_plugins(MaterialPlugin::<SliceMaterial>::default())
            .add_systems(
                PostUpdate,
                sync_slice_materials.after(TravelerSystems::UpdateCrossings),
            )
            .add_observer(isolate_clone_material)
            .register_type::<SliceParams>();
    }
}

/// Which side of a plane to keep when rendering an entity's surface.
///
/// A fragment at `p` survives iff `dot(normal, p - center)` has the sign
/// selected by `flip` (`true` keeps the positive side), or unconditionally
/// while `enabled` is `false`. Not persisted beyond a crossing by the state
/// machine; external writers own it otherwise.
#[derive(Component, Reflect, Debug, Clone, Copy)]
#[reflect(Component)]
pub struct SliceParams {
    /// A point on the slicing plane.
    pub center: Vec3,
    /// The plane normal. Does not need to be unit length.
    pub normal: Vec3,
    /// Whether slicing applies at all.
    pub enabled: bool,
    /// `true` keeps `dot(normal, p - center) >= 0`, `false` the other side.
    pub flip: bool,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self::DISABLED
    }
}

impl SliceParams {
    pub const DISABLED: Self = Self {
        center: Vec3::ZERO,
        normal: Vec3::Z,
        enabled: false,
        flip: false,
    };

    /// Slice against a portal's plane, keeping the positive (forward) side
    /// when `flip` is set.
    #[must_use]
    pub fn for_portal_plane(portal_transform: &GlobalTransform, flip: bool) -> Self {
        Self {
            center: portal_transform.translation(),
            normal: *portal_transform.forward(),
            enabled: true,
            flip,
        }
    }

    /// CPU mirror of the fragment select: whether a point's fragments are
    /// kept. Points exactly on the plane are kept from either side.
    #[must_use]
    pub fn keeps(&self, point: Vec3) -> bool {
        if !self.enabled {
            return true;
        }
        let side = self.normal.dot(point - self.center);
        let sign = if self.flip { 1.0 } else { -1.0 };
        side * sign >= 0.0
    }
}

/// Uniform data for [`SliceMaterial`], packed for the shader.
#[derive(ShaderType, Reflect, Debug, Clone, Copy)]
pub struct SliceUniform {
    /// `xyz`: plane center, `w`: kept sign (+1 or -1).
    pub center_and_sign: Vec4,
    /// `xyz`: plane normal, `w`: 1.0 when slicing is enabled.
    pub normal_and_enable: Vec4,
}

impl Default for SliceUniform {
    fn default() -> Self {
        SliceParams::DISABLED.into()
    }
}

impl From<SliceParams> for SliceUniform {
    fn from(params: SliceParams) -> Self {
        let sign = if params.flip { 1.0 } else { -1.0 };
        let enable = if params.enabled { 1.0 } else { 0.0 };
        Self {
            center_and_sign: params.center.extend(sign),
            normal_and_enable: params.normal.extend(enable),
        }
    }
}

/// Material extension carrying the slice uniform.
#[derive(Asset, AsBindGroup, Reflect, Debug, Clone, Default)]
pub struct SliceExtension {
    #[uniform(100)]
    pub slice: SliceUniform,
}

impl MaterialExtension for SliceExtension {
    fn fragment_shader() -> ShaderRef {
        SLICE_SHADER_HANDLE.into()
    }
}

/// Builds a [`SliceMaterial`] from a base material.
///
/// The base's alpha mode is forced to [`AlphaMode::Mask`] since the slice
/// select works by zeroing alpha.
#[must_use]
pub fn sliceable(mut base: StandardMaterial) -> SliceMaterial {
    base.alpha_mode = AlphaMode::Mask(0.5);
    ExtendedMaterial {
        base,
        extension: SliceExtension::default(),
    }
}

/// System that copies [`SliceParams`] into the owning entity's
/// [`SliceMaterial`] uniform.
fn sync_slice_materials(
    query: Query<(&SliceParams, &MeshMaterial3d<SliceMaterial>), Changed<SliceParams>>,
    mut materials: ResMut<Assets<SliceMaterial>>,
) {
    for (params, material_handle) in &query {
        let Some(material) = materials.get_mut(&material_handle.0) else {
            continue;
        };
        material.extension.slice = (*params).into();
    }
}

/// Observer that gives a freshly spawned clone its own material instance.
///
/// The clone starts with the original's material handle; original and clone
/// keep complementary sides of their planes, so sharing one uniform would
/// make the two slices fight.
fn isolate_clone_material(
    trigger: Trigger<OnAdd, TravelerClone>,
    mut commands: Commands,
    query: Query<&MeshMaterial3d<SliceMaterial>, With<TravelerClone>>,
    mut materials: ResMut<Assets<SliceMaterial>>,
) {
    let entity = trigger.target();
    let Ok(material_handle) = query.get(entity) else {
        return;
    };
    let Some(material) = materials.get(&material_handle.0).cloned() else {
        return;
    };
    let isolated = materials.add(material);
    commands.entity(entity).insert(MeshMaterial3d(isolated));
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::transform::relocate_point;

    fn portal(translation: Vec3, rotation: Quat) -> GlobalTransform {
        GlobalTransform::from(Transform::from_translation(translation).with_rotation(rotation))
    }

    #[test]
    fn disabled_params_keep_everything() {
        let params = SliceParams::DISABLED;
        for point in [Vec3::ZERO, Vec3::splat(100.0), Vec3::new(-3.0, 2.0, 8.5)] {
            assert!(params.keeps(point));
        }
    }

    #[test]
    fn flip_selects_the_kept_half_space() {
        let source = portal(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::PI));
        // Forward is +Z here.
        let front = Vec3::new(0.2, 0.1, 1.0);
        let back = Vec3::new(0.2, 0.1, -1.0);

        let keep_front = SliceParams::for_portal_plane(&source, true);
        assert!(keep_front.keeps(front));
        assert!(!keep_front.keeps(back));

        let keep_back = SliceParams::for_portal_plane(&source, false);
        assert!(!keep_back.keeps(front));
        assert!(keep_back.keeps(back));
    }

    #[test]
    fn original_and_clone_partition_the_object() {
        // Portal A at the origin with forward +Z, portal B elsewhere.
        let a = portal(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::PI));
        let b = portal(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));

        // Entry from the front: the original keeps the front side, the
        // clone the complementary one.
        let original = SliceParams::for_portal_plane(&a, true);
        let clone = SliceParams::for_portal_plane(&b, false);

        // March an object of half-length 0.5 through the plane.
        for progress in [0.0_f32, 0.25, 0.5, 0.75, 1.0] {
            let center_z = 0.5 - progress;
            for offset in [-0.45_f32, -0.2, 0.01, 0.3, 0.45] {
                for lateral in [Vec3::ZERO, Vec3::new(0.2, -0.1, 0.0)] {
                    let point = lateral + Vec3::new(0.0, 0.0, center_z + offset);
                    if original.normal.dot(point - original.center).abs() < 1e-4 {
                        continue;
                    }
                    let kept_by_original = original.keeps(point);
                    let kept_by_clone = clone.keeps(relocate_point(&a, &b, point));
                    assert!(
                        kept_by_original ^ kept_by_clone,
                        "point {point} at progress {progress} kept by both or neither"
                    );
                }
            }
        }
    }

    #[test]
    fn uniform_packs_sign_and_enable() {
        let params = SliceParams {
            center: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::Y,
            enabled: true,
            flip: true,
        };
        let uniform = SliceUniform::from(params);
        assert_eq!(uniform.center_and_sign, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(uniform.normal_and_enable, Vec4::new(0.0, 1.0, 0.0, 1.0));

        let uniform = SliceUniform::from(SliceParams::DISABLED);
        assert_eq!(uniform.center_and_sign.w, -1.0);
        assert_eq!(uniform.normal_and_enable.w, 0.0);
    }
}
