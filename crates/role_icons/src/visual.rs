//! The icon visual seen from the core: an opaque object the follower moves,
//! turns and shows or hides.

use bevy::math::{Quat, Vec3};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Operations the core performs on one icon instance.
pub trait IconVisual: Send + Sync + 'static {
    /// Assigns the sprite; `None` clears it.
    fn set_sprite(&mut self, sprite: Option<&str>, flip_x: bool);
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn set_position(&mut self, position: Vec3);
    fn position(&self) -> Vec3;
    fn set_rotation(&mut self, rotation: Quat);
    fn set_scale(&mut self, scale: f32);
    /// Debug label of the instance, e.g. `Icon_Alice_vip`.
    fn set_label(&mut self, _label: Option<String>) {}
}

/// Plain-data visual. The engine layer mirrors it onto a spawned entity.
#[derive(Debug, Clone, PartialEq)]
pub struct IconState {
    pub sprite: Option<String>,
    pub flip_x: bool,
    pub enabled: bool,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub label: Option<String>,
}

impl Default for IconState {
    fn default() -> Self {
        Self {
            sprite: None,
            flip_x: false,
            enabled: false,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
            label: None,
        }
    }
}

impl IconVisual for IconState {
    fn set_sprite(&mut self, sprite: Option<&str>, flip_x: bool) {
        self.sprite = sprite.map(str::to_owned);
        self.flip_x = flip_x;
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }
}

/// Role name → sprite asset path, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSprites(IndexMap<String, String>);

impl RoleSprites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: impl Into<String>, sprite: impl Into<String>) -> Self {
        self.insert(role, sprite);
        self
    }

    pub fn insert(&mut self, role: impl Into<String>, sprite: impl Into<String>) {
        self.0.insert(role.into(), sprite.into());
    }

    /// Sprite for `role`; empty paths count as unassigned.
    pub fn get(&self, role: &str) -> Option<&str> {
        self.0
            .get(role)
            .map(String::as_str)
            .filter(|path| !path.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
