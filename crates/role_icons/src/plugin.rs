//! Bevy integration.
//!
//! Session entities carry [`Participant`] (plus optional [`HeadTracking`] and
//! [`Disconnected`]); the observer carries [`LocalViewer`]. The plugin builds a
//! [`Roster`] from them every frame, ticks the binder and mirrors every pool slot
//! onto its own entity with a [`RoleIcon`], a [`Transform`] and an [`IconSprite`].
//!
//! ```no_run
//! use bevy::prelude::*;
//! use role_icons::{IconTemplate, RoleIconSettings, RoleIconsPlugin};
//!
//! let settings = RoleIconSettings::load("settings.toml").unwrap();
//! App::new()
//!     .insert_resource(settings)
//!     .insert_resource(IconTemplate::default())
//!     .add_plugins((MinimalPlugins, RoleIconsPlugin))
//!     .run();
//! ```

use std::collections::HashSet;

use bevy::prelude::*;

use crate::binder::SessionIconBinder;
use crate::error::ConfigError;
use crate::pool::{IconHandle, IconStateFactory};
use crate::session::{Roster, SessionSnapshot, Viewer};
use crate::settings::RoleIconSettings;
use crate::source::{FileRoleSource, HttpRoleSource, RoleDocumentSource};
use crate::visual::IconState;
use crate::LOG_ROLE_ICONS;

/// A connected session. `identity` is the key used in the role document.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

/// Head pose of a participant. Without it the icon hovers above the base position.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct HeadTracking {
    pub position: Vec3,
    pub rotation: Quat,
}

/// The session is no longer valid; its icon is released on the next pass.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct Disconnected;

/// The observer icons face and measure distance against.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct LocalViewer;

/// Icon entity mirroring one pool slot.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleIcon {
    pub slot: IconHandle,
}

/// What the renderer should draw for an icon entity.
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct IconSprite {
    pub path: Option<String>,
    pub flip_x: bool,
    pub visible: bool,
    pub render_order: i32,
}

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct SessionJoined {
    pub identity: String,
}

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct SessionLeft {
    pub identity: String,
}

/// Visual template for icon entities. Must be inserted by the host; without it
/// the plugin disables itself.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct IconTemplate {
    /// Name prefix of idle icon entities. Bound icons are named `Icon_{identity}_{role}`.
    pub name_prefix: String,
    pub render_order: i32,
}

impl Default for IconTemplate {
    fn default() -> Self {
        Self {
            name_prefix: "Icon".into(),
            render_order: 0,
        }
    }
}

/// Where role documents are fetched from. Built from the settings unless the
/// host inserts one before startup.
#[derive(Resource)]
pub struct RoleDocumentFeed(pub Box<dyn RoleDocumentSource>);

#[derive(Resource, Deref, DerefMut)]
pub struct RoleIcons(pub SessionIconBinder<IconStateFactory>);

/// Present instead of [`RoleIcons`] when startup validation failed.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct RoleIconsDisabled(pub ConfigError);

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleIconsSet {
    /// Join / leave notifications.
    Ingest,
    /// Binder tick: refresh, scans, followers.
    Reconcile,
    /// Icon entities mirror the pool.
    Sync,
}

pub struct RoleIconsPlugin;

impl Plugin for RoleIconsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RoleIconSettings>()
            .add_event::<SessionJoined>()
            .add_event::<SessionLeft>()
            .configure_sets(
                Update,
                (
                    RoleIconsSet::Ingest,
                    RoleIconsSet::Reconcile,
                    RoleIconsSet::Sync,
                )
                    .chain(),
            )
            .add_systems(Startup, setup_role_icons)
            .add_systems(
                Update,
                (
                    ingest_session_events.in_set(RoleIconsSet::Ingest),
                    tick_role_icons.in_set(RoleIconsSet::Reconcile),
                    sync_icon_entities.in_set(RoleIconsSet::Sync),
                )
                    .run_if(resource_exists::<RoleIcons>),
            );
    }
}

/// Opens the configured document source; a local path takes precedence over a URL.
pub fn open_document_source(
    settings: &RoleIconSettings,
) -> Result<Box<dyn RoleDocumentSource>, ConfigError> {
    if let Some(path) = &settings.document_path {
        return Ok(Box::new(FileRoleSource::new(path.clone())));
    }
    match &settings.document_url {
        Some(url) => HttpRoleSource::new(url.clone())
            .map(|source| Box::new(source) as Box<dyn RoleDocumentSource>)
            .map_err(|err| ConfigError::InvalidSource(err.to_string())),
        None => Err(ConfigError::MissingDocumentSource),
    }
}

fn start_role_icons(
    settings: &RoleIconSettings,
    has_template: bool,
    has_feed: bool,
) -> Result<(RoleIcons, Option<RoleDocumentFeed>), ConfigError> {
    if !has_template {
        return Err(ConfigError::MissingTemplate);
    }
    let binder = SessionIconBinder::new(settings.clone(), IconStateFactory)?;
    let feed = if has_feed {
        None
    } else {
        Some(RoleDocumentFeed(open_document_source(settings)?))
    };
    Ok((RoleIcons(binder), feed))
}

fn setup_role_icons(
    mut commands: Commands,
    settings: Res<RoleIconSettings>,
    template: Option<Res<IconTemplate>>,
    feed: Option<Res<RoleDocumentFeed>>,
) {
    match start_role_icons(&settings, template.is_some(), feed.is_some()) {
        Ok((icons, new_feed)) => {
            if let Some(feed) = new_feed {
                info!(
                    target: LOG_ROLE_ICONS,
                    "Role documents from {}",
                    feed.0.describe()
                );
                commands.insert_resource(feed);
            }
            info!(
                target: LOG_ROLE_ICONS,
                "Role icons enabled: pool of {}, {} sprites, batches of {}",
                settings.max_pool_size,
                settings.role_sprites.len(),
                settings.players_per_batch
            );
            commands.insert_resource(icons);
        }
        Err(err) => {
            error!(target: LOG_ROLE_ICONS, "Role icons disabled: {}", err);
            commands.insert_resource(RoleIconsDisabled(err));
        }
    }
}

fn ingest_session_events(
    time: Res<Time>,
    mut icons: ResMut<RoleIcons>,
    mut joined: EventReader<SessionJoined>,
    mut left: EventReader<SessionLeft>,
) {
    let now = time.elapsed_secs_f64();
    for event in joined.read() {
        icons.on_session_joined(&event.identity, now);
    }
    for event in left.read() {
        icons.on_session_left(&event.identity);
    }
}

fn tick_role_icons(
    time: Res<Time>,
    mut icons: ResMut<RoleIcons>,
    mut feed: ResMut<RoleDocumentFeed>,
    participants: Query<(
        &Participant,
        &Transform,
        Option<&HeadTracking>,
        Has<Disconnected>,
    )>,
    viewers: Query<(Option<&Participant>, &Transform, Option<&HeadTracking>), With<LocalViewer>>,
) {
    let roster: Roster = participants
        .iter()
        .map(|(participant, transform, head, disconnected)| {
            let mut session = SessionSnapshot::new(&participant.identity, transform.translation);
            if let Some(head) = head {
                session = session.with_head(head.position, head.rotation);
            }
            if disconnected {
                session = session.invalid();
            }
            session
        })
        .collect();

    let viewer = viewers.iter().next().map(|(participant, transform, head)| {
        let mut viewer = Viewer::at(transform.translation);
        if let Some(head) = head {
            viewer = viewer.with_head(head.position, head.rotation);
        }
        viewer.identity = participant.map(|p| p.identity.clone());
        viewer
    });

    icons.tick(
        &roster,
        viewer.as_ref(),
        feed.0.as_mut(),
        time.elapsed_secs_f64(),
    );
}

fn sync_icon_entities(
    mut commands: Commands,
    icons: Res<RoleIcons>,
    template: Res<IconTemplate>,
    mut spawned: Query<(&RoleIcon, &mut Name, &mut Transform, &mut IconSprite)>,
) {
    let mut mirrored = HashSet::new();
    for (icon, mut name, mut transform, mut sprite) in &mut spawned {
        let Some(slot) = icons.pool().get(icon.slot) else {
            continue;
        };
        mirrored.insert(icon.slot);
        let state = slot.visual();
        let label = entity_name(&template, icon.slot, state);
        if name.as_str() != label {
            name.set(label);
        }
        transform.set_if_neq(icon_transform(state));
        sprite.set_if_neq(icon_sprite(&template, state));
    }

    for slot in icons.pool().slots() {
        if mirrored.contains(&slot.handle()) {
            continue;
        }
        let state = slot.visual();
        debug!(target: LOG_ROLE_ICONS, "Spawning entity for {}", slot.handle());
        commands.spawn((
            RoleIcon {
                slot: slot.handle(),
            },
            Name::new(entity_name(&template, slot.handle(), state)),
            icon_transform(state),
            icon_sprite(&template, state),
        ));
    }
}

fn entity_name(template: &IconTemplate, slot: IconHandle, state: &IconState) -> String {
    match &state.label {
        Some(label) => label.clone(),
        None => format!("{}_{}", template.name_prefix, slot.index()),
    }
}

fn icon_transform(state: &IconState) -> Transform {
    Transform {
        translation: state.position,
        rotation: state.rotation,
        scale: Vec3::splat(state.scale),
    }
}

fn icon_sprite(template: &IconTemplate, state: &IconState) -> IconSprite {
    IconSprite {
        path: state.sprite.clone(),
        flip_x: state.flip_x,
        visible: state.enabled,
        render_order: template.render_order,
    }
}
