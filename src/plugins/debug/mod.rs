//! Development helpers: line drawing of portals and portal cameras, and the editor.

pub mod draw;

use bevy::{prelude::*, render::camera::CameraProjection};
use bevy_prototype_debug_lines::{DebugLines, DebugLinesPlugin};

use crate::plugins::portal::{
    camera_projection::PortalCameraProjection, Portal, PortalCamera, PortalSettings,
};

#[derive(Debug)]
/// Development plugin intended for debug builds use.
pub struct DebugPlugin;

/// Whether to draw the virtual portal camera frusta, toggled with F3.
#[derive(Debug, Default, Resource)]
pub struct DebugDraw {
    pub frusta: bool,
}

impl Plugin for DebugPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(DebugLinesPlugin::default())
            .init_resource::<DebugDraw>()
            .add_system(toggle_debug_draw)
            .add_system(draw_portals::<0>)
            .add_system(draw_portals::<1>)
            .add_system(draw_portal_frusta::<0>)
            .add_system(draw_portal_frusta::<1>);

        #[cfg(feature = "editor")]
        {
            app.add_plugin(bevy_editor_pls::prelude::EditorPlugin);
        }
    }
}

fn toggle_debug_draw(mut debug_draw: ResMut<DebugDraw>, keys: Res<Input<KeyCode>>) {
    if keys.just_pressed(KeyCode::F3) {
        debug_draw.frusta = !debug_draw.frusta;
        info!("Portal camera frusta drawing: {}", debug_draw.frusta);
    }
}

fn draw_portals<const N: u32>(
    portals: Query<&Portal<N>>,
    settings: Res<PortalSettings>,
    mut lines: ResMut<DebugLines>,
) {
    let color = if N == 0 { Color::CYAN } else { Color::ORANGE };
    let half_extents = Vec2::new(settings.half_width, settings.half_height);
    for portal in &portals {
        draw::draw_portal_outline(portal.state().frame(), half_extents, color, &mut lines);
    }
}

fn draw_portal_frusta<const N: u32>(
    debug_draw: Res<DebugDraw>,
    cameras: Query<(&Camera, &GlobalTransform, &PortalCameraProjection), With<PortalCamera<N>>>,
    mut lines: ResMut<DebugLines>,
) {
    if !debug_draw.frusta {
        return;
    }
    for (camera, transform, projection) in &cameras {
        if camera.is_active {
            let view_projection =
                projection.get_projection_matrix() * transform.compute_matrix().inverse();
            draw::draw_camera_frustum(view_projection, &mut lines);
        }
    }
}
