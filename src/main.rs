use bevy::prelude::*;

use lost_portal::plugins::game::{settings::GameSettings, GamePlugin};

const SETTINGS_PATH: &str = "assets/settings.json";

fn main() {
    let (settings, settings_error) = GameSettings::load_or_default(SETTINGS_PATH);
    App::new()
        .add_plugin(GamePlugin::new(settings, settings_error))
        .run();
}
