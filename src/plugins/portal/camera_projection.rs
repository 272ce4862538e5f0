use std::f32::consts::FRAC_PI_4;

use bevy::{prelude::*, render::camera::CameraProjection};

/// Depth range convention of a projection matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipDepth {
    /// OpenGL style, near plane at -1 and far plane at 1.
    NegOneToOne,
    /// Bevy's convention, near plane at 1 and far plane at 0.
    ReverseZ,
}

/// Replace the near plane of `projection` by `plane`, given in view space.
///
/// The positive side of `plane` is what stays visible. The far plane is tilted so that the
/// frustum corner opposite to the plane keeps its depth, which keeps depth precision usable.
/// See Lengyel, "Oblique View Frustum Depth Projection and Clipping".
pub fn oblique_near_clip(projection: Mat4, plane: Vec4, depth: ClipDepth) -> Mat4 {
    let far_z = match depth {
        ClipDepth::NegOneToOne => 1.,
        ClipDepth::ReverseZ => 0.,
    };
    let corner = Vec4::new(plane.x.signum(), plane.y.signum(), far_z, 1.);
    let q = projection.inverse() * corner;
    let c_dot_q = plane.dot(q);
    if c_dot_q.abs() < f32::EPSILON {
        return projection;
    }
    let m4 = projection.row(3);
    let row = match depth {
        ClipDepth::NegOneToOne => plane * (2. * m4.dot(q) / c_dot_q) - m4,
        ClipDepth::ReverseZ => m4 - plane * (m4.dot(q) / c_dot_q),
    };

    let mut oblique = projection;
    oblique.x_axis.z = row.x;
    oblique.y_axis.z = row.y;
    oblique.z_axis.z = row.z;
    oblique.w_axis.z = row.w;
    oblique
}

/// Perspective projection whose near plane is an arbitrary plane, used for rendering portal virtual cameras.
#[derive(Debug, Component, Clone, Reflect)]
#[reflect(Component)]
pub struct PortalCameraProjection {
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    /// View space plane, positive side visible.
    #[reflect(ignore)]
    pub clip_plane: Vec4,
}

impl Default for PortalCameraProjection {
    fn default() -> Self {
        PortalCameraProjection {
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.1,
            far: 1000.,
            clip_plane: Vec4::new(0., 0., -1., -0.1),
        }
    }
}

impl CameraProjection for PortalCameraProjection {
    fn get_projection_matrix(&self) -> Mat4 {
        let projection = Mat4::perspective_rh(self.fov, self.aspect_ratio, self.far, self.near);
        // The camera itself has to be behind the plane, otherwise there is nothing to cut.
        if self.clip_plane.w >= 0. {
            return projection;
        }
        oblique_near_clip(projection, self.clip_plane, ClipDepth::ReverseZ)
    }

    fn update(&mut self, width: f32, height: f32) {
        self.aspect_ratio = width / height;
    }

    fn far(&self) -> f32 {
        self.far
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn ndc_depth(projection: Mat4, point: Vec3) -> f32 {
        let clip = projection * point.extend(1.);
        clip.z / clip.w
    }

    // Plane z = -5, keeping what lies beyond it.
    const PLANE: Vec4 = Vec4::new(0., 0., -1., -5.);

    #[test]
    fn gl_plane_lands_on_near_depth() {
        let projection = Mat4::perspective_rh_gl(FRAC_PI_4, 1.5, 0.1, 100.);
        let oblique = oblique_near_clip(projection, PLANE, ClipDepth::NegOneToOne);
        assert_relative_eq!(ndc_depth(oblique, Vec3::new(1., 0.5, -5.)), -1., epsilon = 1e-4);
        assert!(ndc_depth(oblique, Vec3::new(0., 0., -3.)) < -1.);
        let beyond = ndc_depth(oblique, Vec3::new(0., 0., -20.));
        assert!(beyond > -1. && beyond < 1.);
    }

    #[test]
    fn reverse_z_plane_lands_on_near_depth() {
        let projection = Mat4::perspective_rh(FRAC_PI_4, 1.5, 100., 0.1);
        let oblique = oblique_near_clip(projection, PLANE, ClipDepth::ReverseZ);
        assert_relative_eq!(ndc_depth(oblique, Vec3::new(1., 0.5, -5.)), 1., epsilon = 1e-4);
        assert!(ndc_depth(oblique, Vec3::new(0., 0., -3.)) > 1.);
        let beyond = ndc_depth(oblique, Vec3::new(0., 0., -20.));
        assert!(beyond > 0. && beyond < 1.);
    }

    #[test]
    fn tilted_plane_is_respected() {
        let normal = Vec3::new(0.3, 0., -1.).normalize();
        let on_plane = Vec3::new(0., 0., -4.);
        let plane = normal.extend(-normal.dot(on_plane));
        let projection = Mat4::perspective_rh(FRAC_PI_4, 1.5, 100., 0.1);
        let oblique = oblique_near_clip(projection, plane, ClipDepth::ReverseZ);

        let elsewhere = on_plane + normal.cross(Vec3::Y) * 1.5;
        assert_relative_eq!(ndc_depth(oblique, elsewhere), 1., epsilon = 1e-3);
    }

    #[test]
    fn default_plane_is_the_regular_near_plane() {
        let projection = PortalCameraProjection::default();
        let regular = Mat4::perspective_rh(FRAC_PI_4, 16. / 9., 1000., 0.1);
        assert!(projection
            .get_projection_matrix()
            .abs_diff_eq(regular, 1e-3));
    }
}
