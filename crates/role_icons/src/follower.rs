//! Per-icon worker that keeps one leased icon above its target session.
//!
//! ```text
//! Unbound --bind--> OutOfRange <--distance check--> InRange
//!    ^                   |                              |
//!    +---- release / target invalid --------------------+
//! ```
//!
//! Invalid targets are detected every tick. Position follows every tick while in
//! range; rotation and distance run on their own deadlines.

use bevy::math::{EulerRot, Quat, Vec3};
use bevy::transform::components::Transform;
use tracing::debug;

use crate::schedule::Deadline;
use crate::session::{Roster, SessionSnapshot, Viewer};
use crate::visual::IconVisual;

const LOG_FOLLOWER: &str = "role_icons::follower";

/// Extra height above the base position when the head is not tracked.
pub const FALLBACK_HEAD_HEIGHT: f32 = 1.8;

/// Look vectors shorter than this are never turned into a rotation.
pub const MIN_LOOK_LENGTH: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowerSettings {
    pub distance_check_interval: f64,
    pub rotation_update_interval: f64,
    pub max_visible_distance: f32,
    pub icon_scale: f32,
    pub height_offset: f32,
    pub lock_vertical_axis: bool,
}

impl Default for FollowerSettings {
    fn default() -> Self {
        Self {
            distance_check_interval: 0.5,
            rotation_update_interval: 0.033,
            max_visible_distance: 50.0,
            icon_scale: 0.3,
            height_offset: 1.0,
            lock_vertical_axis: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowerState {
    #[default]
    Unbound,
    OutOfRange,
    InRange,
}

/// Result of one [`IconFollower::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerStatus {
    /// Nothing bound.
    Idle,
    Following,
    /// The target vanished or became invalid this tick; the follower is now unbound.
    TargetLost,
}

#[derive(Debug, Clone, Default)]
pub struct IconFollower {
    target: Option<String>,
    state: FollowerState,
    next_distance_check: Deadline,
    next_rotation_update: Deadline,
    current_distance: f32,
}

impl IconFollower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.state != FollowerState::Unbound
    }

    /// Bound and within visible range.
    pub fn is_active(&self) -> bool {
        self.state == FollowerState::InRange
    }

    /// Distance measured by the last distance check.
    pub fn current_distance(&self) -> f32 {
        self.current_distance
    }

    /// Attaches the follower to `target` and places the icon right away.
    pub fn bind<V: IconVisual>(
        &mut self,
        target: &SessionSnapshot,
        sprite: Option<&str>,
        visual: &mut V,
        viewer: Option<&Viewer>,
        settings: &FollowerSettings,
        now: f64,
    ) {
        self.target = Some(target.identity.clone());
        self.state = FollowerState::OutOfRange;
        self.next_distance_check.reset();
        self.next_rotation_update.reset();

        let own_icon = viewer.is_some_and(|v| v.is(&target.identity));
        visual.set_sprite(sprite, own_icon);
        visual.set_scale(settings.icon_scale);
        visual.set_enabled(false);

        let initial = tracked_position(target, settings).unwrap_or_else(|| {
            target.position + Vec3::Y * (settings.height_offset + FALLBACK_HEAD_HEIGHT)
        });
        if initial.is_finite() {
            visual.set_position(initial);
        }
        if let Some(viewer) = viewer {
            self.update_rotation(visual, viewer, settings, now);
        }

        self.next_distance_check
            .rearm(now, settings.distance_check_interval);
        if let Some(viewer) = viewer {
            self.check_distance(visual.position(), target, visual, viewer, settings, now);
        }

        debug!(
            target: LOG_FOLLOWER,
            "Icon bound to {} at {:?} ({:?})", target.identity, visual.position(), self.state
        );
    }

    /// Per-tick update. `roster` is the current snapshot the target is looked up in.
    pub fn tick<V: IconVisual>(
        &mut self,
        visual: &mut V,
        roster: &Roster,
        viewer: Option<&Viewer>,
        settings: &FollowerSettings,
        now: f64,
    ) -> FollowerStatus {
        if self.target.is_none() {
            return FollowerStatus::Idle;
        }
        let Some(target) = self.target.as_deref().and_then(|id| roster.live(id)) else {
            debug!(
                target: LOG_FOLLOWER,
                "Target {:?} is gone, hiding icon", self.target
            );
            self.release(visual);
            return FollowerStatus::TargetLost;
        };

        if self.state == FollowerState::InRange {
            self.update_position(target, visual, settings);
            if self.next_rotation_update.is_due(now) {
                if let Some(viewer) = viewer {
                    self.update_rotation(visual, viewer, settings, now);
                }
            }
        }

        if self
            .next_distance_check
            .fire(now, settings.distance_check_interval)
        {
            if let Some(viewer) = viewer {
                let position = tracked_position(target, settings).unwrap_or(visual.position());
                self.check_distance(position, target, visual, viewer, settings, now);
            }
        }

        FollowerStatus::Following
    }

    /// Back to `Unbound` from any state: target cleared, visual hidden, deadlines reset.
    pub fn release<V: IconVisual>(&mut self, visual: &mut V) {
        visual.set_enabled(false);
        visual.set_sprite(None, false);
        visual.set_label(None);
        *self = Self::default();
    }

    fn check_distance<V: IconVisual>(
        &mut self,
        position: Vec3,
        target: &SessionSnapshot,
        visual: &mut V,
        viewer: &Viewer,
        settings: &FollowerSettings,
        now: f64,
    ) {
        let distance = viewer.position.distance(position);
        self.current_distance = distance;
        let within = distance <= settings.max_visible_distance;

        match (self.state, within) {
            (FollowerState::OutOfRange, true) => {
                self.state = FollowerState::InRange;
                visual.set_enabled(true);
                self.update_position(target, visual, settings);
                self.update_rotation(visual, viewer, settings, now);
            }
            (FollowerState::InRange, false) => {
                self.state = FollowerState::OutOfRange;
                visual.set_enabled(false);
            }
            _ => {}
        }
    }

    /// Keeps the last valid position while the head is not tracked.
    fn update_position<V: IconVisual>(
        &self,
        target: &SessionSnapshot,
        visual: &mut V,
        settings: &FollowerSettings,
    ) {
        if let Some(position) = tracked_position(target, settings) {
            visual.set_position(position);
        }
    }

    fn update_rotation<V: IconVisual>(
        &mut self,
        visual: &mut V,
        viewer: &Viewer,
        settings: &FollowerSettings,
        now: f64,
    ) {
        self.next_rotation_update
            .rearm(now, settings.rotation_update_interval);
        let rotation = if settings.lock_vertical_axis {
            Some(yaw_only(viewer.head_rotation))
        } else {
            look_rotation(visual.position() - viewer.head_position)
        };
        if let Some(rotation) = rotation.filter(|r| r.is_finite()) {
            visual.set_rotation(rotation);
        }
    }
}

fn tracked_position(target: &SessionSnapshot, settings: &FollowerSettings) -> Option<Vec3> {
    target
        .tracked_head()
        .map(|head| head + Vec3::Y * settings.height_offset)
}

/// The viewer's head yaw with pitch and roll dropped.
pub fn yaw_only(head_rotation: Quat) -> Quat {
    let (yaw, _, _) = head_rotation.to_euler(EulerRot::YXZ);
    Quat::from_rotation_y(yaw)
}

/// Rotation whose front (+Z) faces back along `direction`, i.e. towards the viewer
/// when `direction` points from the viewer to the icon.
pub fn look_rotation(direction: Vec3) -> Option<Quat> {
    if !direction.is_finite() || direction.length() <= MIN_LOOK_LENGTH {
        return None;
    }
    Some(Transform::IDENTITY.looking_to(direction, Vec3::Y).rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visual::IconState;

    fn settings() -> FollowerSettings {
        FollowerSettings {
            distance_check_interval: 0.5,
            rotation_update_interval: 0.1,
            max_visible_distance: 10.0,
            icon_scale: 0.3,
            height_offset: 1.0,
            lock_vertical_axis: false,
        }
    }

    fn alice(x: f32) -> SessionSnapshot {
        SessionSnapshot::new("alice", Vec3::new(x, 0.0, 0.0))
            .with_head(Vec3::new(x, 1.5, 0.0), Quat::IDENTITY)
    }

    fn roster(sessions: impl IntoIterator<Item = SessionSnapshot>) -> Roster {
        sessions.into_iter().collect()
    }

    #[test]
    fn bind_places_icon_above_head_and_enters_range() {
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::at(Vec3::ZERO);

        follower.bind(&alice(3.0), Some("vip.png"), &mut visual, Some(&viewer), &settings(), 0.0);

        assert_eq!(follower.state(), FollowerState::InRange);
        assert!(visual.enabled);
        assert_eq!(visual.sprite.as_deref(), Some("vip.png"));
        assert_eq!(visual.scale, 0.3);
        assert_eq!(visual.position, Vec3::new(3.0, 2.5, 0.0));
        assert_eq!(follower.target(), Some("alice"));
    }

    #[test]
    fn bind_falls_back_to_base_position_without_head_tracking() {
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let target = SessionSnapshot::new("alice", Vec3::new(40.0, 0.0, 0.0));

        follower.bind(&target, None, &mut visual, Some(&Viewer::at(Vec3::ZERO)), &settings(), 0.0);

        assert!(visual
            .position
            .abs_diff_eq(Vec3::new(40.0, 2.8, 0.0), 1e-5));
        assert_eq!(follower.state(), FollowerState::OutOfRange);
        assert!(!visual.enabled);
    }

    #[test]
    fn own_icon_is_flipped() {
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::from_session(&alice(0.0));

        follower.bind(&alice(0.0), Some("vip.png"), &mut visual, Some(&viewer), &settings(), 0.0);
        assert!(visual.flip_x);
    }

    #[test]
    fn range_exit_waits_for_next_distance_check() {
        let settings = settings();
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::at(Vec3::ZERO);
        follower.bind(&alice(5.0), None, &mut visual, Some(&viewer), &settings, 0.0);
        assert!(follower.is_active());

        // Moved beyond range, but the next check is only due at t = 0.5.
        let far = roster([alice(20.0)]);
        assert_eq!(
            follower.tick(&mut visual, &far, Some(&viewer), &settings, 0.2),
            FollowerStatus::Following
        );
        assert_eq!(follower.state(), FollowerState::InRange);
        assert!(visual.enabled);

        follower.tick(&mut visual, &far, Some(&viewer), &settings, 0.5);
        assert_eq!(follower.state(), FollowerState::OutOfRange);
        assert!(!visual.enabled);
        assert!(follower.is_bound());
        assert!((follower.current_distance() - 20.0_f32.hypot(2.5)).abs() < 1e-4);

        // And back in on a later check.
        let near = roster([alice(2.0)]);
        follower.tick(&mut visual, &near, Some(&viewer), &settings, 0.7);
        assert_eq!(follower.state(), FollowerState::OutOfRange);
        follower.tick(&mut visual, &near, Some(&viewer), &settings, 1.0);
        assert_eq!(follower.state(), FollowerState::InRange);
        assert!(visual.enabled);
        assert_eq!(visual.position, Vec3::new(2.0, 2.5, 0.0));
    }

    #[test]
    fn distance_exactly_at_threshold_is_in_range() {
        let settings = FollowerSettings {
            height_offset: 0.0,
            ..settings()
        };
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let target = SessionSnapshot::new("alice", Vec3::ZERO)
            .with_head(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY);

        follower.bind(&target, None, &mut visual, Some(&Viewer::at(Vec3::ZERO)), &settings, 0.0);
        assert_eq!(follower.state(), FollowerState::InRange);
    }

    #[test]
    fn invalid_target_unbinds_within_one_tick() {
        let settings = settings();
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::at(Vec3::ZERO);
        follower.bind(&alice(1.0), Some("vip.png"), &mut visual, Some(&viewer), &settings, 0.0);

        let status = follower.tick(
            &mut visual,
            &roster([alice(1.0).invalid()]),
            Some(&viewer),
            &settings,
            0.01,
        );
        assert_eq!(status, FollowerStatus::TargetLost);
        assert_eq!(follower.state(), FollowerState::Unbound);
        assert!(!visual.enabled);
        assert_eq!(visual.sprite, None);

        assert_eq!(
            follower.tick(&mut visual, &Roster::new(), Some(&viewer), &settings, 0.02),
            FollowerStatus::Idle
        );
    }

    #[test]
    fn zero_head_position_keeps_last_valid_position() {
        let settings = settings();
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::at(Vec3::ZERO);
        follower.bind(&alice(4.0), None, &mut visual, Some(&viewer), &settings, 0.0);
        let before = visual.position;

        let glitch = SessionSnapshot::new("alice", Vec3::new(4.0, 0.0, 0.0));
        follower.tick(&mut visual, &roster([glitch]), Some(&viewer), &settings, 0.5);

        assert_eq!(visual.position, before);
        assert!(visual.position.is_finite());
        assert_eq!(follower.state(), FollowerState::InRange);
    }

    #[test]
    fn rotation_is_throttled_but_position_is_not() {
        let settings = settings();
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let viewer = Viewer::at(Vec3::ZERO);
        follower.bind(&alice(3.0), None, &mut visual, Some(&viewer), &settings, 0.0);
        let first_rotation = visual.rotation;

        let moved = roster([alice(-3.0)]);
        follower.tick(&mut visual, &moved, Some(&viewer), &settings, 0.05);
        assert_eq!(visual.position, Vec3::new(-3.0, 2.5, 0.0));
        assert_eq!(visual.rotation, first_rotation);

        follower.tick(&mut visual, &moved, Some(&viewer), &settings, 0.1);
        assert_ne!(visual.rotation, first_rotation);
    }

    #[test]
    fn locked_axis_copies_viewer_yaw() {
        let settings = FollowerSettings {
            lock_vertical_axis: true,
            ..settings()
        };
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        let head = Quat::from_euler(EulerRot::YXZ, 0.8, 0.4, 0.2);
        let viewer = Viewer::at(Vec3::ZERO).with_head(Vec3::new(0.0, 1.7, 0.0), head);

        follower.bind(&alice(3.0), None, &mut visual, Some(&viewer), &settings, 0.0);

        let (yaw, pitch, roll) = visual.rotation.to_euler(EulerRot::YXZ);
        assert!((yaw - 0.8).abs() < 1e-4);
        assert!(pitch.abs() < 1e-4);
        assert!(roll.abs() < 1e-4);
    }

    #[test]
    fn coincident_positions_never_rotate() {
        assert_eq!(look_rotation(Vec3::ZERO), None);
        assert_eq!(look_rotation(Vec3::splat(0.001)), None);
        assert_eq!(look_rotation(Vec3::new(f32::NAN, 0.0, 1.0)), None);

        let rotation = look_rotation(Vec3::new(0.0, 5.0, 0.0)).unwrap();
        assert!(rotation.is_finite());

        // Front (+Z) points back at the viewer.
        let rotation = look_rotation(Vec3::new(0.0, 0.0, -4.0)).unwrap();
        assert!((rotation * Vec3::Z).abs_diff_eq(Vec3::Z, 1e-5));
    }

    #[test]
    fn release_resets_everything() {
        let mut follower = IconFollower::new();
        let mut visual = IconState::default();
        follower.bind(&alice(1.0), Some("vip.png"), &mut visual, Some(&Viewer::at(Vec3::ZERO)), &settings(), 0.0);

        follower.release(&mut visual);
        assert_eq!(follower.state(), FollowerState::Unbound);
        assert_eq!(follower.target(), None);
        assert!(!visual.enabled);
        assert_eq!(follower.current_distance(), 0.0);
    }
}
