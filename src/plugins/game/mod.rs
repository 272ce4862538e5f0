use std::f32::consts::*;

use bevy::prelude::*;

use crate::{
    plugins::*,
    util::scenes::{make_test_arena, spawn_props},
};

pub mod settings;

use settings::{GameSettings, SettingsError};

#[derive(Debug)]
/// Main game plugin, responsible for loading the other game plugins and bootstrapping the game.
pub struct GamePlugin {
    settings: GameSettings,
    /// Why the settings file was ignored, logged once logging is up.
    settings_error: Option<String>,
}

impl GamePlugin {
    pub fn new(settings: GameSettings, settings_error: Option<SettingsError>) -> GamePlugin {
        GamePlugin {
            settings,
            settings_error: settings_error.map(|err| err.to_string()),
        }
    }
}

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        let window = &self.settings.window;
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            window: WindowDescriptor {
                title: window.title.clone(),
                width: window.width,
                height: window.height,
                ..default()
            },
            ..default()
        }));

        if let Some(err) = self.settings_error.clone() {
            app.add_startup_system(move || warn!("Using default settings: {}", err));
        }

        app.insert_resource(self.settings.clone())
            .insert_resource(self.settings.portals.clone());

        #[cfg(feature = "devel")]
        {
            app.add_plugin(debug::DebugPlugin);
        }

        app.add_plugin(physics::PhysicsPlugin)
            .add_plugin(input::InputPlugin)
            .add_plugin(first_person_controller::FirstPersonControllerPlugin)
            .add_plugin(portal::PortalPlugin);

        app.add_startup_system(setup);
    }
}

/// Perform game initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    make_test_arena(&mut commands, &mut meshes, &mut materials, 24., 8.);
    spawn_props(&mut commands, &mut meshes, &mut materials);

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, -FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    commands.spawn(first_person_controller::FirstPersonControllerBundle {
        spatial: SpatialBundle::from(Transform::from_xyz(0., 1., 4.)),
        ..default()
    });
    info!("Game setup done");
}
