//! Stencil based rendering of the view through a pair of portals.
//!
//! The renderer does not own a graphics API. It drives a [`StencilCanvas`] through the pass
//! sequence: ordinary scene, portal silhouettes stamped into the stencil buffer, then one scene
//! pass per portal confined to its silhouette and seen from the sibling portal.

use std::f32::consts::FRAC_PI_4;

use bevy::prelude::*;

use super::{
    camera_projection::{oblique_near_clip, ClipDepth},
    teleport::{portal_to_portal, PortalFrame},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalSlot {
    A,
    B,
}

impl PortalSlot {
    pub const ALL: [PortalSlot; 2] = [PortalSlot::A, PortalSlot::B];

    pub fn index(self) -> usize {
        match self {
            PortalSlot::A => 0,
            PortalSlot::B => 1,
        }
    }

    pub fn stencil_ref(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn sibling(self) -> PortalSlot {
        match self {
            PortalSlot::A => PortalSlot::B,
            PortalSlot::B => PortalSlot::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Always pass and replace the stencil value with the reference.
    Stamp(u8),
    /// Only draw where the stencil value equals the reference.
    Equal(u8),
}

/// A framebuffer with a stencil attachment.
pub trait StencilCanvas {
    /// Clear color and depth, and the stencil to 0.
    fn clear(&mut self);
    fn set_write_masks(&mut self, color: bool, depth: bool);
    fn set_depth_test(&mut self, enabled: bool);
    fn set_stencil(&mut self, mode: StencilMode);
    /// Write the far depth wherever the current stencil test passes.
    fn reset_depth(&mut self);
    /// Draw everything except the portals.
    fn draw_scene(&mut self, view: Mat4, projection: Mat4);
    fn draw_portal(&mut self, slot: PortalSlot, model: Mat4, view: Mat4, projection: Mat4);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPortal {
    pub frame: PortalFrame,
    pub linked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveParams {
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveParams {
    fn default() -> Self {
        PerspectiveParams {
            fov: FRAC_PI_4,
            aspect: 16. / 9.,
            near: 0.1,
            far: 1000.,
        }
    }
}

impl PerspectiveParams {
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov, self.aspect, self.near, self.far)
    }
}

/// View matrix of the camera seeing through `portal`, stood at the matching place behind `sibling`.
pub fn destination_view(view: Mat4, portal: &PortalFrame, sibling: &PortalFrame) -> Mat4 {
    view * portal_to_portal(sibling, portal)
}

/// World space plane of a portal, positive in front of it.
pub fn clip_plane(frame: &PortalFrame) -> Vec4 {
    frame.normal.extend(-frame.normal.dot(frame.translation))
}

/// Move a world space plane into the space of `view`.
pub fn view_space_plane(view: Mat4, plane: Vec4) -> Vec4 {
    view.inverse().transpose() * plane
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PortalRenderer {
    pub perspective: PerspectiveParams,
}

impl PortalRenderer {
    pub fn new(perspective: PerspectiveParams) -> PortalRenderer {
        PortalRenderer { perspective }
    }

    /// Oblique projection for the view through `portal`, cutting everything in front of `sibling`.
    pub fn destination_projection(&self, destination_view: Mat4, sibling: &PortalFrame) -> Mat4 {
        let projection = self.perspective.projection();
        let plane = view_space_plane(destination_view, clip_plane(sibling));
        if plane.w >= 0. {
            // Looking at the back of the portal.
            return projection;
        }
        oblique_near_clip(projection, plane, ClipDepth::NegOneToOne)
    }

    /// Render a full frame, returns how many through-portal passes were drawn.
    ///
    /// Unless both portals exist and are linked, this is a single ordinary scene pass.
    pub fn render_frame(
        &self,
        canvas: &mut impl StencilCanvas,
        view: Mat4,
        portals: [Option<&RenderPortal>; 2],
    ) -> usize {
        let projection = self.perspective.projection();
        canvas.set_stencil(StencilMode::Disabled);
        canvas.set_write_masks(true, true);
        canvas.set_depth_test(true);
        canvas.clear();
        canvas.draw_scene(view, projection);

        let frames = match portals {
            [Some(a), Some(b)] if a.linked && b.linked => [a.frame, b.frame],
            _ => return 0,
        };

        canvas.set_write_masks(false, false);
        for slot in PortalSlot::ALL {
            canvas.set_stencil(StencilMode::Stamp(slot.stencil_ref()));
            canvas.draw_portal(slot, frames[slot.index()].local_to_world, view, projection);
        }

        for slot in PortalSlot::ALL {
            let portal = &frames[slot.index()];
            let sibling = &frames[slot.sibling().index()];
            let through_view = destination_view(view, portal, sibling);
            let through_projection = self.destination_projection(through_view, sibling);

            canvas.set_stencil(StencilMode::Equal(slot.stencil_ref()));
            // The wall the portal sits on already wrote its depth here.
            canvas.set_write_masks(false, true);
            canvas.reset_depth();
            canvas.set_write_masks(true, true);
            canvas.set_depth_test(true);
            canvas.draw_scene(through_view, through_projection);
        }

        canvas.set_stencil(StencilMode::Disabled);
        canvas.set_write_masks(true, true);
        PortalSlot::ALL.len()
    }
}
