use std::fs;
use std::path::{Path, PathBuf};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SettingsError};
use crate::follower::FollowerSettings;
use crate::visual::RoleSprites;

/// Configuration of the role icon overlay.
///
/// Read from the `[role_icons]` section of a TOML file. Every field has a default,
/// so a file only needs to list what it changes.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleIconSettings {
    /// Upper bound on icon instances ever created.
    pub max_pool_size: usize,
    /// Seconds between roster scan cycles.
    pub update_interval: f64,
    /// Seconds between role document refreshes.
    pub json_refresh_interval: f64,
    /// Sessions scanned per tick while a scan cycle runs.
    pub players_per_batch: usize,
    pub distance_check_interval: f64,
    pub rotation_update_interval: f64,
    pub max_visible_distance: f32,
    pub icon_scale: f32,
    pub height_offset: f32,
    pub lock_vertical_axis: bool,
    /// Delay before a newly joined session is reconciled on its own.
    pub join_recheck_delay: f64,
    /// Delay before the first scan after startup.
    pub initial_scan_delay: f64,
    pub document_url: Option<String>,
    pub document_path: Option<PathBuf>,
    pub role_sprites: RoleSprites,
}

impl Default for RoleIconSettings {
    fn default() -> Self {
        Self {
            max_pool_size: 32,
            update_interval: 60.0,
            json_refresh_interval: 300.0,
            players_per_batch: 8,
            distance_check_interval: 0.5,
            rotation_update_interval: 0.033,
            max_visible_distance: 50.0,
            icon_scale: 0.3,
            height_offset: 1.0,
            lock_vertical_axis: true,
            join_recheck_delay: 2.0,
            initial_scan_delay: 2.0,
            document_url: None,
            document_path: None,
            role_sprites: RoleSprites::default(),
        }
    }
}

impl RoleIconSettings {
    pub const SECTION: &'static str = "role_icons";

    /// Parses the `[role_icons]` section of a TOML document and validates it.
    /// A document without the section yields the defaults (which still need sprites).
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let mut table: toml::Table = toml::from_str(text)?;
        let settings = match table.remove(Self::SECTION) {
            Some(section) => section.try_into::<Self>()?,
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.players_per_batch == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        for (name, value) in [
            ("update_interval", self.update_interval),
            ("json_refresh_interval", self.json_refresh_interval),
            ("distance_check_interval", self.distance_check_interval),
            ("rotation_update_interval", self.rotation_update_interval),
            ("join_recheck_delay", self.join_recheck_delay),
            ("initial_scan_delay", self.initial_scan_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidInterval { name, value });
            }
        }
        for (name, value) in [
            ("max_visible_distance", self.max_visible_distance),
            ("icon_scale", self.icon_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidMagnitude { name, value });
            }
        }
        if !self.height_offset.is_finite() {
            return Err(ConfigError::InvalidMagnitude {
                name: "height_offset",
                value: self.height_offset,
            });
        }
        if self.role_sprites.is_empty() {
            return Err(ConfigError::EmptyRoleSprites);
        }
        Ok(())
    }

    pub fn follower(&self) -> FollowerSettings {
        FollowerSettings {
            distance_check_interval: self.distance_check_interval,
            rotation_update_interval: self.rotation_update_interval,
            max_visible_distance: self.max_visible_distance,
            icon_scale: self.icon_scale,
            height_offset: self.height_offset,
            lock_vertical_axis: self.lock_vertical_axis,
        }
    }
}
