//! Role icons above connected sessions.
//!
//! A remote JSON document assigns prioritized roles to identities. Every session
//! that resolves to a role gets a pooled icon that follows its head, faces the
//! local viewer and hides beyond a configurable distance.
//!
//! The core ([`SessionIconBinder`], [`IconPool`], [`IconFollower`], [`resolve`]) is
//! engine-agnostic and driven by an explicit clock; [`RoleIconsPlugin`] wires it
//! into a Bevy `App`.

pub mod binder;
pub mod error;
pub mod follower;
pub mod plugin;
pub mod pool;
pub mod roles;
pub mod schedule;
pub mod session;
pub mod settings;
pub mod source;
pub mod visual;

pub use binder::{BinderStats, SessionIconBinder};
pub use error::{ConfigError, DocumentError, FetchError, PoolError, SettingsError};
pub use follower::{FollowerSettings, FollowerState, FollowerStatus, IconFollower};
pub use plugin::{
    Disconnected, HeadTracking, IconSprite, IconTemplate, LocalViewer, Participant,
    RoleDocumentFeed, RoleIcon, RoleIcons, RoleIconsDisabled, RoleIconsPlugin, RoleIconsSet,
    SessionJoined, SessionLeft,
};
pub use pool::{IconFactory, IconHandle, IconPool, IconStateFactory};
pub use roles::{resolve, RoleDefinition, RoleDocument, RoleTable};
pub use session::{Roster, SessionSnapshot, Viewer};
pub use settings::RoleIconSettings;
pub use source::{FileRoleSource, HttpRoleSource, QueuedRoleSource, RoleDocumentSource};
pub use visual::{IconState, IconVisual, RoleSprites};

pub const LOG_ROLE_ICONS: &str = "role_icons";
