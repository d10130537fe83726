//! Read-only views of connected sessions.
//!
//! Sessions are owned by the host. Every reconciliation pass works on a fresh
//! [`Roster`] snapshot; nothing here is cached across passes.

use bevy::math::{Quat, Vec3};
use indexmap::IndexMap;

/// Head positions shorter than this are treated as "no tracking data".
pub const DEGENERATE_POSITION: f32 = 0.1;

/// Snapshot of one session for the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Stable identity (the display name).
    pub identity: String,
    /// Base (feet) position.
    pub position: Vec3,
    pub head_position: Vec3,
    pub head_rotation: Quat,
    pub valid: bool,
}

impl SessionSnapshot {
    pub fn new(identity: impl Into<String>, position: Vec3) -> Self {
        Self {
            identity: identity.into(),
            position,
            head_position: Vec3::ZERO,
            head_rotation: Quat::IDENTITY,
            valid: true,
        }
    }

    pub fn with_head(mut self, position: Vec3, rotation: Quat) -> Self {
        self.head_position = position;
        self.head_rotation = rotation;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Tracked head position, or `None` while it is degenerate.
    pub fn tracked_head(&self) -> Option<Vec3> {
        let head = self.head_position;
        (head.is_finite() && head.length() > DEGENERATE_POSITION).then_some(head)
    }
}

/// Ordered snapshot of the sessions the host currently knows about.
///
/// Order is the host's enumeration order; the binder's batch cursor walks it.
/// A duplicated identity keeps its first entry, unless that entry is invalid and a
/// later one is valid: a stale disconnected entity never hides a live session.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    sessions: IndexMap<String, SessionSnapshot>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, session: SessionSnapshot) {
        match self.sessions.get_mut(&session.identity) {
            Some(existing) if !existing.valid && session.valid => *existing = session,
            Some(_) => {}
            None => {
                self.sessions.insert(session.identity.clone(), session);
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&SessionSnapshot> {
        self.sessions.get(identity)
    }

    /// The session for `identity` if it is present and valid.
    pub fn live(&self, identity: &str) -> Option<&SessionSnapshot> {
        self.get(identity).filter(|s| s.valid)
    }

    pub fn get_index(&self, index: usize) -> Option<&SessionSnapshot> {
        self.sessions.get_index(index).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionSnapshot> {
        self.sessions.values()
    }
}

impl FromIterator<SessionSnapshot> for Roster {
    fn from_iter<T: IntoIterator<Item = SessionSnapshot>>(iter: T) -> Self {
        let mut roster = Roster::new();
        for session in iter {
            roster.push(session);
        }
        roster
    }
}

/// The local observer icons are oriented towards and measured against.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    pub identity: Option<String>,
    pub position: Vec3,
    pub head_position: Vec3,
    pub head_rotation: Quat,
}

impl Viewer {
    pub fn at(position: Vec3) -> Self {
        Self {
            identity: None,
            position,
            head_position: position,
            head_rotation: Quat::IDENTITY,
        }
    }

    pub fn from_session(session: &SessionSnapshot) -> Self {
        Self {
            identity: Some(session.identity.clone()),
            position: session.position,
            head_position: session.tracked_head().unwrap_or(session.position),
            head_rotation: session.head_rotation,
        }
    }

    pub fn with_head(mut self, position: Vec3, rotation: Quat) -> Self {
        self.head_position = position;
        self.head_rotation = rotation;
        self
    }

    pub fn is(&self, identity: &str) -> bool {
        self.identity.as_deref() == Some(identity)
    }
}
