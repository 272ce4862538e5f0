//! Game configuration, read from a JSON file at startup.

use std::{fs, io, path::Path};

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::plugins::portal::PortalSettings;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Resource, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    pub window: WindowSettings,
    pub portals: PortalSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub title: String,
    pub width: f32,
    pub height: f32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            title: "Lost Portal Prototype v.0.666".to_string(),
            width: 1280.,
            height: 720.,
        }
    }
}

impl GameSettings {
    pub fn from_json(json: &str) -> Result<GameSettings, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<GameSettings, SettingsError> {
        GameSettings::from_json(&fs::read_to_string(path)?)
    }

    /// Settings from `path`, or the defaults along with the reason they could not be read.
    ///
    /// A missing file is not an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> (GameSettings, Option<SettingsError>) {
        match GameSettings::load(path) {
            Ok(settings) => (settings, None),
            Err(SettingsError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                (GameSettings::default(), None)
            }
            Err(err) => (GameSettings::default(), Some(err)),
        }
    }
}
