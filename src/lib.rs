#![doc = include_str!("../README.md")]

pub mod camera;
#[cfg(feature = "gizmos")]
pub mod gizmos;
pub mod material;
pub mod projection;
pub mod slice;
pub mod transform;
pub mod traveler;

use bevy::{
    app::PluginGroupBuilder, ecs::system::Command, prelude::*, render::render_resource::Face,
};

pub use crate::{
    camera::{PortalCamera, PortalCameraPlugin},
    material::{PortalMaterial, PortalMaterialPlugin},
    projection::ObliqueProjection,
    slice::{SliceMaterial, SliceParams, SlicePlugin, sliceable},
    traveler::{
        Crossing, ObserverTraveler, PortalOverlapEnd, PortalOverlapStart, PortalTransfer, Traveler,
        TravelerClone, TravelerPlugin,
    },
};

/// All plugins required for portals to render and for travelers to cross
/// them.
pub struct PortalPlugins;

impl PluginGroup for PortalPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::start::<Self>()
            .add(PortalCameraPlugin)
            .add(PortalMaterialPlugin)
            .add(SlicePlugin)
            .add(TravelerPlugin::default())
    }
}

/// A planar portal surface.
///
/// Portals come in linked pairs: each renders the view out of its partner
/// and hands travelers over to it. Use [`LinkPortals`] to link two portals;
/// an unlinked portal displays a neutral fill and never starts a crossing.
#[derive(Component, Reflect, Debug)]
#[reflect(Component)]
#[require(Transform)]
pub struct Portal {
    /// The entity with the primary render [`Camera`], i.e. the camera used
    /// to look at this portal.
    pub primary_camera: Entity,
    /// The paired portal, if any. Keep this symmetric: a linked pair always
    /// refers to each other. [`LinkPortals`] maintains that for you.
    pub linked: Option<Entity>,
    /// Half-extents of the portal surface in its local XY plane, bounding
    /// the trigger volume.
    pub extent: Vec2,
    /// Base half-thickness of the trigger volume along the portal's normal.
    ///
    /// While an observer is inside, the volume is extended by this amount
    /// again on the side it entered from, and shrinks back on exit.
    pub trigger_depth: f32,
    /// Specifies which side of the portal to cull: "front", "back", or
    /// neither.
    ///
    /// If set to `None`, both sides of the portal's mesh will be rendered.
    ///
    /// Defaults to `Some(Face::Back)`, similar to
    /// [`StandardMaterial::cull_mode`].
    #[reflect(ignore)]
    pub cull_mode: Option<Face>,
    /// The [`Entity`] that has this portal's [`PortalCamera`].
    ///
    /// This is set internally and should not be manually assigned.
    pub linked_camera: Option<Entity>,
}

impl Portal {
    /// Creates an unlinked [`Portal`] observed by `primary_camera`.
    #[inline]
    #[must_use]
    pub fn new(primary_camera: Entity) -> Self {
        Self {
            primary_camera,
            linked: None,
            extent: Vec2::splat(1.25),
            trigger_depth: 0.5,
            cull_mode: Some(Face::Back),
            linked_camera: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_extent(mut self, extent: Vec2) -> Self {
        self.extent = extent;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_trigger_depth(mut self, trigger_depth: f32) -> Self {
        self.trigger_depth = trigger_depth;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cull_mode(mut self, cull_mode: Option<Face>) -> Self {
        self.cull_mode = cull_mode;
        self
    }
}

/// Command that links two portals symmetrically.
///
/// Whatever either portal was linked to before is unlinked first, so the
/// pair invariant survives re-linking.
#[derive(Debug, Clone, Copy)]
pub struct LinkPortals {
    pub a: Entity,
    pub b: Entity,
}

impl Command for LinkPortals {
    fn apply(self, world: &mut World) {
        let Self { a, b } = self;
        if a == b {
            warn!("cannot link portal {a} to itself");
            return;
        }
        if world.get::<Portal>(a).is_none() || world.get::<Portal>(b).is_none() {
            warn!("cannot link {a} and {b}: both entities must have a Portal component");
            return;
        }

        let stale: Vec<Entity> = [a, b]
            .into_iter()
            .filter_map(|entity| world.get::<Portal>(entity).and_then(|portal| portal.linked))
            .filter(|&previous| previous != a && previous != b)
            .collect();
        for entity in stale {
            if let Some(mut portal) = world.get_mut::<Portal>(entity) {
                portal.linked = None;
            }
        }

        // Both were checked above.
        world.get_mut::<Portal>(a).unwrap().linked = Some(b);
        world.get_mut::<Portal>(b).unwrap().linked = Some(a);
    }
}

/// Command that unlinks a portal and its partner.
///
/// Both ends revert to the unlinked state: neutral fill, no camera, no
/// crossings.
#[derive(Debug, Clone, Copy)]
pub struct UnlinkPortal {
    pub portal: Entity,
}

impl Command for UnlinkPortal {
    fn apply(self, world: &mut World) {
        let Some(linked) = world
            .get_mut::<Portal>(self.portal)
            .and_then(|mut portal| portal.linked.take())
        else {
            return;
        };
        if let Some(mut partner) = world.get_mut::<Portal>(linked) {
            partner.linked = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_portal(world: &mut World, camera: Entity) -> Entity {
        world.spawn((Transform::IDENTITY, Portal::new(camera))).id()
    }

    #[test]
    fn linking_is_symmetric_and_relinking_detaches_the_old_partner() {
        let mut world = World::new();
        let camera = world.spawn_empty().id();
        let a = spawn_portal(&mut world, camera);
        let b = spawn_portal(&mut world, camera);
        let c = spawn_portal(&mut world, camera);

        LinkPortals { a, b }.apply(&mut world);
        assert_eq!(world.get::<Portal>(a).unwrap().linked, Some(b));
        assert_eq!(world.get::<Portal>(b).unwrap().linked, Some(a));

        LinkPortals { a, b: c }.apply(&mut world);
        assert_eq!(world.get::<Portal>(a).unwrap().linked, Some(c));
        assert_eq!(world.get::<Portal>(c).unwrap().linked, Some(a));
        assert_eq!(world.get::<Portal>(b).unwrap().linked, None);
    }

    #[test]
    fn unlinking_clears_both_ends() {
        let mut world = World::new();
        let camera = world.spawn_empty().id();
        let a = spawn_portal(&mut world, camera);
        let b = spawn_portal(&mut world, camera);

        LinkPortals { a, b }.apply(&mut world);
        UnlinkPortal { portal: b }.apply(&mut world);

        assert_eq!(world.get::<Portal>(a).unwrap().linked, None);
        assert_eq!(world.get::<Portal>(b).unwrap().linked, None);
    }

    #[test]
    fn self_and_non_portal_links_are_rejected() {
        let mut world = World::new();
        let camera = world.spawn_empty().id();
        let a = spawn_portal(&mut world, camera);
        let plain = world.spawn_empty().id();

        LinkPortals { a, b: a }.apply(&mut world);
        assert_eq!(world.get::<Portal>(a).unwrap().linked, None);

        LinkPortals { a, b: plain }.apply(&mut world);
        assert_eq!(world.get::<Portal>(a).unwrap().linked, None);
    }
}
