use bevy::prelude::*;
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::portal::teleport::PortalFrame;

/// World space corners of a frustum, the 4 near ones first.
///
/// `near_depth` and `far_depth` are the NDC depths of the near and far planes, which differ
/// between reverse-Z and OpenGL style projections.
pub fn frustum_corners(view_projection: Mat4, near_depth: f32, far_depth: f32) -> [Vec3; 8] {
    let inverse = view_projection.inverse();
    let mut corners = [Vec3::ZERO; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let depth = if i < 4 { near_depth } else { far_depth };
        let x = if i & 1 == 0 { -1. } else { 1. };
        let y = if i & 2 == 0 { -1. } else { 1. };
        *corner = inverse.project_point3(Vec3::new(x, y, depth));
    }
    corners
}

pub fn draw_camera_frustum(view_projection: Mat4, lines: &mut DebugLines) {
    const NEAR_COLOR: Color = Color::BLACK;
    const FAR_COLOR: Color = Color::WHITE;

    // Bevy cameras use reverse-Z.
    let corners = frustum_corners(view_projection, 1., 0.);

    // Depth lines
    for i in 0..4 {
        lines.line_gradient(corners[i], corners[i + 4], 0., NEAR_COLOR, FAR_COLOR);
    }
    // Near then far plane
    for (offset, color) in [(0, NEAR_COLOR), (4, FAR_COLOR)] {
        lines.line_colored(corners[offset], corners[offset + 1], 0., color);
        lines.line_colored(corners[offset], corners[offset + 2], 0., color);
        lines.line_colored(corners[offset + 1], corners[offset + 3], 0., color);
        lines.line_colored(corners[offset + 2], corners[offset + 3], 0., color);
    }
}

pub fn draw_portal_outline(
    frame: &PortalFrame,
    half_extents: Vec2,
    color: Color,
    lines: &mut DebugLines,
) {
    let right = frame.right() * half_extents.x;
    let up = frame.up() * half_extents.y;
    let center = frame.translation;
    let corners = [
        center - right - up,
        center + right - up,
        center + right + up,
        center - right + up,
    ];
    for i in 0..4 {
        lines.line_colored(corners[i], corners[(i + 1) % 4], 0., color);
    }
    lines.line_gradient(center, center + frame.normal, 0., color, Color::WHITE);
}
