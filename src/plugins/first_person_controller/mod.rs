//! This module contains the first person controller plugin.
//!
//! TODO features:
//!
//! * Additional controls:
//!   * Jumping
//!   * Crouching
//! * Climbing slopes and stairs

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use bevy::{prelude::*, reflect::FromReflect, render::view::RenderLayers};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use leafwing_input_manager::prelude::*;

use crate::plugins::{
    input::{default_input_map, Actions},
    physics::*,
    portal::PORTAL_RENDER_LAYER,
};

#[derive(Debug)]
/// First person controller plugin, which registers the required systems to use the first person
/// controller also provided by this module.
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FirstPersonCamera>()
            .add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(process_controller_inputs.label(FirstPersonLabels::ProcessInputs));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, SystemLabel)]
/// Labels for the first person controller systems.
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
}

#[derive(Debug, Component)]
/// First person controller component.
pub struct FirstPersonController {
    pub theta: Angle<f32>,
    pub phi: Angle<f32>,
    pub camera_anchor: Entity,
}

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
/// Marker trait for first person cameras
pub struct FirstPersonCamera;

#[derive(Debug, Component, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct FirstPersonControllerSpawner {}

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

const PLAYER_HEIGHT: f32 = 1.8;
const PLAYER_RADIUS: f32 = 0.4;
const EYE_HEIGHT: f32 = 1.25;

fn spawn_controller(
    mut commands: Commands,
    spawners_query: Query<Entity, With<FirstPersonControllerSpawner>>,
) {
    for id in &spawners_query {
        const CAMERA_OFFSET: Vec3 = Vec3::new(0., EYE_HEIGHT - PLAYER_HEIGHT / 2., 0.);

        commands
            .entity(id)
            .insert(InputManagerBundle {
                action_state: ActionState::default(),
                input_map: default_input_map(),
            })
            .insert((
                RigidBody::Dynamic,
                Collider::capsule_y(PLAYER_HEIGHT / 2. - PLAYER_RADIUS, PLAYER_RADIUS),
                LockedAxes::ROTATION_LOCKED_X | LockedAxes::ROTATION_LOCKED_Z,
                Velocity::default(),
                Name::from("Player"),
                CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
                EntityKind::Player,
                Teleportable {
                    half_extents: Vec3::new(PLAYER_RADIUS, PLAYER_HEIGHT / 2., PLAYER_RADIUS),
                },
            ));

        let camera_anchor = commands
            .spawn(SpatialBundle::from(Transform::from_translation(CAMERA_OFFSET)))
            .insert(Name::from("Camera anchor"))
            .id();

        let camera = commands
            .spawn(Camera3dBundle {
                projection: Projection::Perspective(PerspectiveProjection {
                    fov: FRAC_PI_4,
                    aspect_ratio: 16. / 9.,
                    near: 0.1,
                    far: 1000.,
                }),
                ..default()
            })
            .insert((
                Name::from("Player camera"),
                FirstPersonCamera,
                // The player camera is the only one seeing the portals themselves.
                RenderLayers::default().with(PORTAL_RENDER_LAYER),
            ))
            .id();

        commands.entity(camera_anchor).push_children(&[camera]);

        commands
            .entity(id)
            .add_child(camera_anchor)
            .insert(FirstPersonController {
                theta: Angle::zero(),
                phi: Angle::zero(),
                camera_anchor,
            })
            .remove::<FirstPersonControllerSpawner>();
        info!("Spawned player {:?}", id);
    }
}

const PLAYER_SPEED: f32 = 3.;
const MOUSE_SENSITIVITY: f32 = 0.004;
const MOUSE_ANGVEL_MULTIPLIER: f32 = -75.;
const SPRINT_MULTIPLIER: f32 = 2.;

/// -1, 0 or 1 depending on which of two opposite actions are held.
fn axis(input_state: &ActionState<Actions>, positive: Actions, negative: Actions) -> f32 {
    match (input_state.pressed(positive), input_state.pressed(negative)) {
        (true, false) => 1.,
        (false, true) => -1.,
        _ => 0.,
    }
}

fn process_controller_inputs(
    mut player_query: Query<(
        &ActionState<Actions>,
        &mut FirstPersonController,
        &mut Velocity,
        &Transform,
    )>,
    mut camera_query: Query<&mut Transform, Without<FirstPersonController>>,
) {
    for (input_state, mut controller, mut velocity, transform) in &mut player_query {
        let k = if input_state.pressed(Actions::Sprint) {
            SPRINT_MULTIPLIER
        } else {
            1.
        };
        let forward = transform.forward() * axis(input_state, Actions::Forward, Actions::Backwards);
        let left = transform.left() * axis(input_state, Actions::StrafeLeft, Actions::StrafeRight);
        let walk = (forward + left) * PLAYER_SPEED * k;

        // Keep the vertical velocity so falling, and flying out of a floor portal, still work.
        velocity.linvel = Vec3::new(walk.x, velocity.linvel.y, walk.z);

        // Process mouse movement. We handle the rotation components separately:
        // * Rotation around the vertical axis (e.g. aiming left or right) is applied to the
        //   player root node.
        // * Rotation around the horizontal axis (e.g. aiming up or down) is applied directly to
        //   the camera anchor in order to keep the vertical orientation neutral on the root node.
        if let Some(mouse_movement) = input_state.axis_pair(Actions::Aim) {
            controller.theta += Angle::radians(mouse_movement.x() * MOUSE_SENSITIVITY);
            controller.phi += Angle::radians(mouse_movement.y() * MOUSE_SENSITIVITY);
            controller.phi.radians = controller.phi.radians.clamp(-FRAC_PI_2, FRAC_PI_2);

            let v_rotation = Quat::from_axis_angle(Vec3::X, -controller.phi.radians);
            velocity.angvel.y = mouse_movement.x() * MOUSE_SENSITIVITY * MOUSE_ANGVEL_MULTIPLIER;

            if let Ok(mut camera_transform) = camera_query.get_mut(controller.camera_anchor) {
                camera_transform.rotation = v_rotation;
            }
        } else {
            velocity.angvel.y = 0.;
        }
    }
}
