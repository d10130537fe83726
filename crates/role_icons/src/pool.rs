//! Fixed-capacity pool of reusable icon instances.
//!
//! Instances are created lazily through an [`IconFactory`], never more than
//! `capacity` of them, and never destroyed while the pool lives. Leasing always
//! recycles a free slot before allocating a new one.

use std::fmt;

use tracing::{debug, trace};

use crate::error::PoolError;
use crate::follower::{FollowerSettings, FollowerStatus, IconFollower};
use crate::session::{Roster, Viewer};
use crate::visual::{IconState, IconVisual};

const LOG_POOL: &str = "role_icons::pool";

/// Index of a slot inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IconHandle(usize);

impl IconHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for IconHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "icon#{}", self.0)
    }
}

/// Creates the underlying visual for a newly allocated slot.
pub trait IconFactory: Send + Sync + 'static {
    type Visual: IconVisual;

    fn instantiate(&mut self, handle: IconHandle) -> Self::Visual;

    /// Called for every instance when the pool is torn down.
    fn destroy(&mut self, _handle: IconHandle, _visual: Self::Visual) {}
}

/// Factory for [`IconState`] visuals; the engine layer spawns the entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct IconStateFactory;

impl IconFactory for IconStateFactory {
    type Visual = IconState;

    fn instantiate(&mut self, _handle: IconHandle) -> IconState {
        IconState::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Leased,
}

#[derive(Debug)]
pub struct IconSlot<V> {
    handle: IconHandle,
    state: SlotState,
    visual: V,
    follower: IconFollower,
}

impl<V: IconVisual> IconSlot<V> {
    pub fn handle(&self) -> IconHandle {
        self.handle
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn visual(&self) -> &V {
        &self.visual
    }

    pub fn follower(&self) -> &IconFollower {
        &self.follower
    }

    /// Identity the slot's follower tracks, if any.
    pub fn bound_identity(&self) -> Option<&str> {
        self.follower.target()
    }

    /// Split borrow for binding: the follower drives the visual.
    pub fn parts_mut(&mut self) -> (&mut IconFollower, &mut V) {
        (&mut self.follower, &mut self.visual)
    }
}

pub struct IconPool<F: IconFactory> {
    capacity: usize,
    slots: Vec<IconSlot<F::Visual>>,
    free: Vec<usize>,
    factory: F,
}

impl<F: IconFactory> IconPool<F> {
    pub fn new(capacity: usize, factory: F) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            factory,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Instances created so far (leased + free).
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    pub fn leased(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Hands out a slot, recycling a free one when possible.
    pub fn lease(&mut self) -> Result<IconHandle, PoolError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.state = SlotState::Leased;
            trace!(target: LOG_POOL, "Recycled {}", slot.handle);
            return Ok(slot.handle);
        }

        if self.slots.len() >= self.capacity {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            });
        }

        let handle = IconHandle(self.slots.len());
        let visual = self.factory.instantiate(handle);
        self.slots.push(IconSlot {
            handle,
            state: SlotState::Leased,
            visual,
            follower: IconFollower::new(),
        });
        debug!(
            target: LOG_POOL,
            "Allocated {} ({}/{})", handle, self.slots.len(), self.capacity
        );
        Ok(handle)
    }

    /// Returns a slot to the pool. The visual is hidden and detached before the
    /// slot becomes leasable again. Releasing a free or unknown handle is a no-op.
    pub fn release(&mut self, handle: IconHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            return false;
        };
        if slot.state == SlotState::Free {
            return false;
        }
        slot.follower.release(&mut slot.visual);
        slot.state = SlotState::Free;
        self.free.push(handle.0);
        trace!(target: LOG_POOL, "Released {}", handle);
        true
    }

    pub fn get(&self, handle: IconHandle) -> Option<&IconSlot<F::Visual>> {
        self.slots.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: IconHandle) -> Option<&mut IconSlot<F::Visual>> {
        self.slots
            .get_mut(handle.0)
            .filter(|slot| slot.state == SlotState::Leased)
    }

    pub fn slots(&self) -> impl Iterator<Item = &IconSlot<F::Visual>> {
        self.slots.iter()
    }

    /// Runs every leased follower for this tick and returns the handles whose
    /// target was lost.
    pub fn tick_followers(
        &mut self,
        roster: &Roster,
        viewer: Option<&Viewer>,
        settings: &FollowerSettings,
        now: f64,
    ) -> Vec<IconHandle> {
        let mut lost = Vec::new();
        for slot in self
            .slots
            .iter_mut()
            .filter(|slot| slot.state == SlotState::Leased)
        {
            let status = slot
                .follower
                .tick(&mut slot.visual, roster, viewer, settings, now);
            if status == FollowerStatus::TargetLost {
                lost.push(slot.handle);
            }
        }
        lost
    }

    /// Hands every instance back to the factory.
    pub fn shutdown(&mut self) {
        self.free.clear();
        for mut slot in self.slots.drain(..) {
            slot.follower.release(&mut slot.visual);
            self.factory.destroy(slot.handle, slot.visual);
        }
    }
}

impl<F: IconFactory> fmt::Debug for IconPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IconPool")
            .field("capacity", &self.capacity)
            .field("allocated", &self.slots.len())
            .field("leased", &self.leased())
            .finish()
    }
}
