use bevy::{prelude::*, reflect::FromReflect};
use bevy_rapier3d::prelude::*;

pub const WALLS_GROUP: Group = Group::GROUP_1;
pub const PROPS_GROUP: Group = Group::GROUP_2;
pub const PORTAL_GROUP: Group = Group::GROUP_3;
pub const PLAYER_GROUP: Group = Group::GROUP_4;
pub const RAYCAST_GROUP: Group = Group::GROUP_5;
pub const GROUND_GROUP: Group = Group::GROUP_6;
pub const ALL_GROUPS: Group = Group::ALL;

/// Fixed simulation step, accumulated against the variable frame time.
pub const PHYSICS_DT: f32 = 1. / 60.;

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default())
            .register_type::<EntityKind>()
            .register_type::<Teleportable>()
            .register_type::<SurfaceBounds>()
            .add_startup_system(configure_rapier);
    }
}

fn configure_rapier(mut config: ResMut<RapierConfiguration>) {
    // Step in fixed increments while there is frame time left, so fast portal exits stay stable.
    config.timestep_mode = TimestepMode::Interpolated {
        dt: PHYSICS_DT,
        time_scale: 1.,
        substeps: 1,
    };
}

/// What a physics body is, queried instead of guessing from its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub enum EntityKind {
    Player,
    Cube,
    Surface {
        holds_portals: bool,
    },
    Portal,
    #[default]
    Decoration,
}

impl EntityKind {
    pub fn can_hold_portal(&self) -> bool {
        matches!(self, EntityKind::Surface { holds_portals: true })
    }

    pub fn can_teleport(&self) -> bool {
        matches!(self, EntityKind::Player | EntityKind::Cube)
    }

    pub fn is_player(&self) -> bool {
        matches!(self, EntityKind::Player)
    }
}

/// Marks a body which portals may carry, along with its local bounding box.
#[derive(Debug, Clone, Copy, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct Teleportable {
    pub half_extents: Vec3,
}

/// Local bounding box of a surface portals can be shot onto.
#[derive(Debug, Clone, Copy, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct SurfaceBounds {
    pub half_extents: Vec3,
}

impl SurfaceBounds {
    /// World space axis aligned box enclosing the surface.
    pub fn world_aabb(&self, transform: &GlobalTransform) -> (Vec3, Vec3) {
        let matrix = transform.compute_matrix();
        let h = self.half_extents;
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { -h.x } else { h.x },
                if i & 2 == 0 { -h.y } else { h.y },
                if i & 4 == 0 { -h.z } else { h.z },
            );
            let world = matrix.transform_point3(corner);
            min = min.min(world);
            max = max.max(world);
        }
        (min, max)
    }
}
