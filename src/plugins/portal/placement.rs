//! Fitting a portal onto the surface a shot landed on.

use bevy::prelude::*;
use thiserror::Error;

use super::{
    geometry::{overlap_correction, separating_push, Bounds2, PlaneAxes, Rect2},
    teleport::PortalFrame,
};

/// Above this `|normal . up|` the surface is treated as a floor or a ceiling.
pub const FLOOR_THRESHOLD: f32 = 0.9;
/// Normals closer than this are considered the same plane orientation.
const SAME_NORMAL: f32 = 0.9;
/// Planes closer than this (along the normal) are considered the same surface.
const SAME_PLANE_DISTANCE: f32 = 0.1;
/// Leftover clamp correction tolerated after the sibling correction.
const CLAMP_TOLERANCE: f32 = 1e-4;
/// Penetration tolerated between two corrected portals.
const OVERLAP_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlacementError {
    #[error("aimed inside the other portal")]
    InsideSibling,
    #[error("no room for the portal next to the other one")]
    NoRoom,
    #[error("surface has no usable normal")]
    UnsupportedSurface,
}

/// A ray hit on a portal-capable surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRequest {
    pub hit_point: Vec3,
    pub surface_normal: Vec3,
    /// Position of whoever fired, used to orient floor portals.
    pub viewer: Vec3,
    /// World space bounds of the hit surface.
    pub surface_min: Vec3,
    pub surface_max: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalPlacer {
    pub half_extents: Vec2,
    /// Gap left between the portal and its surface.
    pub surface_offset: f32,
}

impl Default for PortalPlacer {
    fn default() -> Self {
        PortalPlacer {
            half_extents: Vec2::new(1.78, 2.62),
            surface_offset: 0.02,
        }
    }
}

impl PortalPlacer {
    /// Orientation of a portal shot on a surface with `normal`.
    ///
    /// Wall portals stand upright. Floor and ceiling portals have their top pointing away from
    /// the viewer.
    pub fn orientation(&self, normal: Vec3, hit_point: Vec3, viewer: Vec3) -> Quat {
        let up = if normal.dot(Vec3::Y).abs() > FLOOR_THRESHOLD {
            let to_viewer = viewer - hit_point;
            let flat = to_viewer - normal * to_viewer.dot(normal);
            if flat.length_squared() > 1e-6 {
                -flat.normalize()
            } else {
                Vec3::NEG_Z
            }
        } else {
            Vec3::Y
        };
        PortalFrame::facing(Vec3::ZERO, normal, up).rotation
    }

    /// The portal rectangle centered on `center`, seen in the surface plane.
    fn footprint(&self, axes: PlaneAxes, center: Vec3, rotation: Quat) -> Rect2 {
        let right = rotation * Vec3::X * self.half_extents.x;
        let up = rotation * Vec3::Y * self.half_extents.y;
        Rect2::from_corners(
            axes.project(center),
            [
                center - right + up,
                center + right + up,
                center - right - up,
                center + right - up,
            ]
            .map(|corner| axes.project(corner)),
        )
    }

    fn clamp_correction(&self, rect: &Rect2, surface: &Bounds2) -> Vec2 {
        let corners = [rect.top_left, rect.top_right, rect.bottom_left, rect.bottom_right];
        let bounds = Bounds2 {
            min: corners.iter().fold(Vec2::splat(f32::MAX), |acc, c| acc.min(*c)),
            max: corners.iter().fold(Vec2::splat(f32::MIN), |acc, c| acc.max(*c)),
        };
        bounds.correction_into(surface)
    }

    /// Work out where the portal goes, or why it cannot go there.
    ///
    /// The portal is first pushed back inside the surface, then away from `sibling` if both sit
    /// on the same plane. A portal that would be pushed out of the surface again is rejected.
    pub fn place(
        &self,
        request: &PlacementRequest,
        sibling: Option<&PortalFrame>,
    ) -> Result<PortalFrame, PlacementError> {
        let normal = request
            .surface_normal
            .try_normalize()
            .ok_or(PlacementError::UnsupportedSurface)?;
        let rotation = self.orientation(normal, request.hit_point, request.viewer);
        let axes = PlaneAxes::for_normal(normal);
        let surface = Bounds2::from_points(
            axes.project(request.surface_min),
            axes.project(request.surface_max),
        );

        let mut center = request.hit_point;
        let shift = self.clamp_correction(&self.footprint(axes, center, rotation), &surface);
        center += axes.lift(shift);

        let sibling = sibling.filter(|sibling| {
            sibling.normal.dot(normal) > SAME_NORMAL
                && sibling.signed_distance(center).abs() < SAME_PLANE_DISTANCE
        });
        if let Some(sibling) = sibling {
            let other = self.footprint(axes, sibling.translation, sibling.rotation);
            let ours = self.footprint(axes, center, rotation);
            if other.contains(ours.center) {
                return Err(PlacementError::InsideSibling);
            }
            let mut shift = overlap_correction(&ours, &other);
            if shift == Vec2::ZERO {
                shift = -overlap_correction(&other, &ours);
            }
            // Corner pushes assume matching orientations, floor portals rarely have them.
            if ours.translated(shift).overlaps(&other, OVERLAP_TOLERANCE) {
                shift = separating_push(&ours, &other, ours.center - other.center)
                    .ok_or(PlacementError::NoRoom)?;
            }
            center += axes.lift(shift);

            let leftover = self.clamp_correction(&self.footprint(axes, center, rotation), &surface);
            if leftover.length() > CLAMP_TOLERANCE {
                return Err(PlacementError::NoRoom);
            }
        }

        Ok(PortalFrame::new(center + normal * self.surface_offset, rotation))
    }
}
