//! Pose and velocity remapping between two linked portals.
//!
//! A portal's local frame has its right along X, its up along Y and its outward normal along Z.
//! Crossing a portal maps the object into the source portal's local frame, turns it half way
//! around the local up axis so that "entering" becomes "exiting", then maps it out of the
//! destination portal's frame.

use std::f32::consts::PI;

use bevy::prelude::*;

use crate::plugins::physics::EntityKind;

/// Above this `|normal . up|` a portal is floor or ceiling mounted.
pub const MOUNTED_THRESHOLD: f32 = 0.7;
/// Live positions further than this from the portal center are replaced by the fail-safe anchor.
pub const FAILSAFE_RADIUS: f32 = 2.;
/// Exit offset along the destination normal between two wall portals.
pub const WALL_EXIT_OFFSET: f32 = 0.5;

/// Cached pose of a placed portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalFrame {
    pub translation: Vec3,
    pub rotation: Quat,
    pub normal: Vec3,
    pub local_to_world: Mat4,
    pub world_to_local: Mat4,
}

impl Default for PortalFrame {
    fn default() -> Self {
        PortalFrame::new(Vec3::ZERO, Quat::IDENTITY)
    }
}

impl PortalFrame {
    pub fn new(translation: Vec3, rotation: Quat) -> PortalFrame {
        let rotation = rotation.normalize();
        let local_to_world = Mat4::from_rotation_translation(rotation, translation);
        PortalFrame {
            translation,
            rotation,
            normal: rotation * Vec3::Z,
            local_to_world,
            world_to_local: local_to_world.inverse(),
        }
    }

    /// Build a frame from its outward normal and an up hint lying in (or near) the portal plane.
    pub fn facing(translation: Vec3, normal: Vec3, up: Vec3) -> PortalFrame {
        let normal = normal.normalize();
        let right = up.cross(normal).normalize();
        let up = normal.cross(right);
        PortalFrame::new(
            translation,
            Quat::from_mat3(&Mat3::from_cols(right, up, normal)),
        )
    }

    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.translation).with_rotation(self.rotation)
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Floor and ceiling portals, as opposed to wall portals.
    pub fn is_horizontal(&self) -> bool {
        self.normal.dot(Vec3::Y).abs() > MOUNTED_THRESHOLD
    }

    /// Positive in front of the portal, negative behind it.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.translation).dot(self.normal)
    }

    pub fn project_onto_plane(&self, point: Vec3) -> Vec3 {
        point - self.normal * self.signed_distance(point)
    }
}

/// Rotation by 180 degrees around the local up axis.
///
/// On a wall portal this axis is vertical; on a floor or ceiling portal the local up lies flat,
/// so the same turn happens around a horizontal in-plane axis.
pub fn half_turn() -> Quat {
    Quat::from_rotation_y(PI)
}

/// Full affine map taking a point seen at `source` to its counterpart at `destination`.
pub fn portal_to_portal(source: &PortalFrame, destination: &PortalFrame) -> Mat4 {
    destination.local_to_world * Mat4::from_quat(half_turn()) * source.world_to_local
}

fn rotation_between(source: &PortalFrame, destination: &PortalFrame) -> Quat {
    destination.rotation * half_turn() * source.rotation.inverse()
}

/// Where an object at `position` comes out of `destination`.
///
/// `anchor` is the fail-safe point recorded when the object started overlapping `source`; it is
/// used instead of the live position once the object has drifted out of the fail-safe radius.
pub fn destination_position(
    source: &PortalFrame,
    destination: &PortalFrame,
    position: Vec3,
    anchor: Option<Vec3>,
    half_height: f32,
) -> Vec3 {
    let position = match anchor {
        Some(anchor) if position.distance(source.translation) > FAILSAFE_RADIUS => anchor,
        _ => position,
    };
    let exit = portal_to_portal(source, destination).transform_point3(position);
    // Push the object clear of the destination surface so it does not clip straight back in.
    let offset = if source.is_horizontal() || destination.is_horizontal() {
        half_height
    } else {
        WALL_EXIT_OFFSET
    };
    exit + destination.normal * offset
}

/// Orientation of an object after crossing from `source` to `destination`.
///
/// The player is stood back upright when going between a wall and a floor or ceiling portal,
/// otherwise the camera would keep the roll of the transition.
pub fn destination_rotation(
    source: &PortalFrame,
    destination: &PortalFrame,
    rotation: Quat,
    kind: EntityKind,
) -> Quat {
    let turned = (rotation_between(source, destination) * rotation).normalize();
    if kind.is_player() && (source.is_horizontal() ^ destination.is_horizontal()) {
        upright(turned)
    } else {
        turned
    }
}

/// Linear velocity after crossing; a pure rotation so speed is unchanged.
pub fn destination_velocity(source: &PortalFrame, destination: &PortalFrame, velocity: Vec3) -> Vec3 {
    rotation_between(source, destination) * velocity
}

/// Keep the heading of `rotation` but force its up vector to the world up.
fn upright(rotation: Quat) -> Quat {
    let front = rotation * Vec3::Z;
    let flat = Vec3::new(front.x, 0., front.z);
    let front = if flat.length_squared() > 1e-6 {
        flat.normalize()
    } else {
        // Looking straight up or down, the top of the view becomes the heading.
        let top = rotation * Vec3::Y;
        Vec3::new(top.x, 0., top.z).try_normalize().unwrap_or(Vec3::Z)
    };
    let right = Vec3::Y.cross(front).normalize();
    let front = right.cross(Vec3::Y);
    Quat::from_mat3(&Mat3::from_cols(right, Vec3::Y, front)).normalize()
}
