//! Keeps one icon on every valid session that holds a role, and none elsewhere.
//!
//! The binder owns the current [`RoleTable`], the [`IconPool`] and the
//! identity → icon map. It is driven once per tick by [`SessionIconBinder::tick`]:
//!
//! 1. refresh the role document when its deadline fires (fire-and-forget),
//! 2. apply a finished fetch: new table + full reconciliation,
//! 3. reconcile sessions whose join re-check is due,
//! 4. scan the next batch of the roster while a scan cycle is running; the
//!    disconnect sweep runs when the cursor wraps,
//! 5. tick every leased follower.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, PoolError};
use crate::follower::FollowerSettings;
use crate::pool::{IconFactory, IconHandle, IconPool};
use crate::roles::{RoleDocument, RoleTable};
use crate::schedule::Deadline;
use crate::session::{Roster, SessionSnapshot, Viewer};
use crate::settings::RoleIconSettings;
use crate::source::{FetchResult, RoleDocumentSource};
use crate::visual::IconVisual;

const LOG_BINDER: &str = "role_icons::binder";

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderStats {
    pub leases: u64,
    pub releases: u64,
    pub exhausted: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub scan_cycles: u64,
}

#[derive(Debug, Clone)]
struct BoundIcon {
    handle: IconHandle,
    role: String,
}

pub struct SessionIconBinder<F: IconFactory> {
    settings: RoleIconSettings,
    follower: FollowerSettings,
    table: RoleTable,
    pool: IconPool<F>,
    bound: HashMap<String, BoundIcon>,
    /// Identities already warned about an exhausted pool.
    waiting_for_slot: HashSet<String>,
    started: bool,
    scanning: bool,
    cursor: usize,
    next_scan: Deadline,
    next_refresh: Deadline,
    pending_joins: Vec<(String, Deadline)>,
    stats: BinderStats,
}

impl<F: IconFactory> SessionIconBinder<F> {
    pub fn new(settings: RoleIconSettings, factory: F) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            follower: settings.follower(),
            pool: IconPool::new(settings.max_pool_size, factory),
            settings,
            table: RoleTable::empty(),
            bound: HashMap::new(),
            waiting_for_slot: HashSet::new(),
            started: false,
            scanning: false,
            cursor: 0,
            next_scan: Deadline::immediate(),
            next_refresh: Deadline::immediate(),
            pending_joins: Vec::new(),
            stats: BinderStats::default(),
        })
    }

    pub fn settings(&self) -> &RoleIconSettings {
        &self.settings
    }

    pub fn table(&self) -> &RoleTable {
        &self.table
    }

    pub fn pool(&self) -> &IconPool<F> {
        &self.pool
    }

    pub fn stats(&self) -> BinderStats {
        self.stats
    }

    /// Number of sessions currently holding an icon.
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    pub fn icon_for(&self, identity: &str) -> Option<IconHandle> {
        self.bound.get(identity).map(|bound| bound.handle)
    }

    pub fn visual_for(&self, identity: &str) -> Option<&F::Visual> {
        let handle = self.icon_for(identity)?;
        self.pool.get(handle).map(|slot| slot.visual())
    }

    pub fn bound_role(&self, identity: &str) -> Option<&str> {
        self.bound.get(identity).map(|bound| bound.role.as_str())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// One host tick. `roster` must be a fresh snapshot.
    pub fn tick(
        &mut self,
        roster: &Roster,
        viewer: Option<&Viewer>,
        source: &mut dyn RoleDocumentSource,
        now: f64,
    ) {
        if !self.started {
            self.started = true;
            self.next_scan = Deadline::at(now + self.settings.initial_scan_delay);
        }

        if self
            .next_refresh
            .fire(now, self.settings.json_refresh_interval)
        {
            self.refresh_role_table(source);
        }
        if let Some(result) = source.poll() {
            self.apply_document(result, roster, viewer, now);
        }

        self.run_due_joins(roster, viewer, now);

        if !self.scanning && self.next_scan.fire(now, self.settings.update_interval) {
            self.scanning = true;
            self.cursor = 0;
        }
        if self.scanning {
            self.scan_batch(roster, viewer, now);
        }

        for handle in self
            .pool
            .tick_followers(roster, viewer, &self.follower, now)
        {
            self.release_handle(handle);
        }
    }

    /// Starts a document fetch; the result arrives through [`Self::apply_document`].
    pub fn refresh_role_table(&mut self, source: &mut dyn RoleDocumentSource) {
        debug!(target: LOG_BINDER, "Requesting role document from {}", source.describe());
        self.stats.refreshes += 1;
        source.request();
    }

    /// Applies a finished fetch. On success the table is replaced as a whole and
    /// a full reconciliation runs; on failure the current table stays.
    pub fn apply_document(
        &mut self,
        result: FetchResult,
        roster: &Roster,
        viewer: Option<&Viewer>,
        now: f64,
    ) -> bool {
        let parsed = match result {
            Ok(text) => RoleDocument::parse(&text).map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match parsed {
            Ok(document) => {
                let table = RoleTable::from_document(&document);
                info!(
                    target: LOG_BINDER,
                    "Role table replaced: {} roles, {} users ({} roles skipped)",
                    table.role_count(),
                    table.len(),
                    document.skipped.len()
                );
                self.replace_table(table, roster, viewer, now);
                true
            }
            Err(reason) => {
                self.stats.refresh_failures += 1;
                warn!(
                    target: LOG_BINDER,
                    "Role document refresh failed, keeping {} roles: {}",
                    self.table.role_count(),
                    reason
                );
                false
            }
        }
    }

    /// Swaps in `table` and reconciles the whole roster against it.
    pub fn replace_table(
        &mut self,
        table: RoleTable,
        roster: &Roster,
        viewer: Option<&Viewer>,
        now: f64,
    ) {
        self.table = table;
        self.reconcile(roster, viewer, now);
    }

    /// Full pass over `roster` followed by the disconnect sweep.
    pub fn reconcile(&mut self, roster: &Roster, viewer: Option<&Viewer>, now: f64) {
        for session in roster.iter() {
            self.reconcile_session(session, viewer, now);
        }
        self.sweep(roster);
    }

    /// Scans at most `players_per_batch` sessions from the cursor. When the cursor
    /// has covered the roster it wraps to 0, the sweep runs and the cycle ends.
    pub fn scan_batch(&mut self, roster: &Roster, viewer: Option<&Viewer>, now: f64) {
        let len = roster.len();
        let start = self.cursor.min(len);
        let end = (start + self.settings.players_per_batch).min(len);
        for index in start..end {
            if let Some(session) = roster.get_index(index) {
                self.reconcile_session(session, viewer, now);
            }
        }
        debug!(
            target: LOG_BINDER,
            "Scanned sessions {}..{} of {}", start, end, len
        );

        self.cursor = end;
        if self.cursor >= len {
            self.cursor = 0;
            self.scanning = false;
            self.stats.scan_cycles += 1;
            self.sweep(roster);
        }
    }

    /// Brings a single session in line with the table. A session that already
    /// holds an icon keeps it as long as it resolves to some role.
    pub fn reconcile_session(
        &mut self,
        session: &SessionSnapshot,
        viewer: Option<&Viewer>,
        now: f64,
    ) {
        if !session.valid {
            self.release_identity(&session.identity);
            return;
        }

        let role = self.table.role_for(&session.identity).map(str::to_owned);
        match (role, self.bound.get(&session.identity).cloned()) {
            (None, Some(_)) => {
                self.release_identity(&session.identity);
            }
            (None, None) | (Some(_), Some(_)) => {}
            (Some(role), None) => self.bind_new(session, role, viewer, now),
        }
    }

    /// Join notification: the session gets reconciled on its own after
    /// `join_recheck_delay` instead of waiting for the next scan cycle.
    pub fn on_session_joined(&mut self, identity: &str, now: f64) {
        let due = Deadline::at(now + self.settings.join_recheck_delay);
        match self.pending_joins.iter_mut().find(|(id, _)| id == identity) {
            Some((_, deadline)) => *deadline = due,
            None => self.pending_joins.push((identity.to_owned(), due)),
        }
        debug!(target: LOG_BINDER, "Session joined: {}", identity);
    }

    /// Leave notification: the icon goes back to the pool right away.
    pub fn on_session_left(&mut self, identity: &str) {
        self.pending_joins.retain(|(id, _)| id != identity);
        self.waiting_for_slot.remove(identity);
        self.release_identity(identity);
        debug!(target: LOG_BINDER, "Session left: {}", identity);
    }

    /// Releases every icon and hands the instances back to the factory.
    pub fn shutdown(&mut self) {
        let identities: Vec<String> = self.bound.keys().cloned().collect();
        for identity in identities {
            self.release_identity(&identity);
        }
        self.pool.shutdown();
    }

    fn run_due_joins(&mut self, roster: &Roster, viewer: Option<&Viewer>, now: f64) {
        let mut due = Vec::new();
        self.pending_joins.retain(|(identity, deadline)| {
            if deadline.is_due(now) {
                due.push(identity.clone());
                false
            } else {
                true
            }
        });
        for identity in due {
            match roster.get(&identity) {
                Some(session) => self.reconcile_session(session, viewer, now),
                None => debug!(
                    target: LOG_BINDER,
                    "Joined session {} left before its re-check", identity
                ),
            }
        }
    }

    fn bind_new(
        &mut self,
        session: &SessionSnapshot,
        role: String,
        viewer: Option<&Viewer>,
        now: f64,
    ) {
        let Some(sprite) = self.settings.role_sprites.get(&role).map(str::to_owned) else {
            warn!(
                target: LOG_BINDER,
                "No sprite configured for role '{}', {} stays without icon",
                role,
                session.identity
            );
            return;
        };

        let handle = match self.pool.lease() {
            Ok(handle) => handle,
            Err(PoolError::Exhausted { capacity }) => {
                self.stats.exhausted += 1;
                if self.waiting_for_slot.insert(session.identity.clone()) {
                    warn!(
                        target: LOG_BINDER,
                        "Icon pool exhausted ({} in use), {} stays without icon",
                        capacity,
                        session.identity
                    );
                } else {
                    debug!(
                        target: LOG_BINDER,
                        "{} still waiting for a free icon", session.identity
                    );
                }
                return;
            }
        };
        self.stats.leases += 1;
        self.waiting_for_slot.remove(&session.identity);

        if let Some(slot) = self.pool.get_mut(handle) {
            let (follower, visual) = slot.parts_mut();
            visual.set_label(Some(format!("Icon_{}_{}", session.identity, role)));
            follower.bind(
                session,
                Some(sprite.as_str()),
                visual,
                viewer,
                &self.follower,
                now,
            );
        }
        info!(
            target: LOG_BINDER,
            "Icon {} bound to {} ({})", handle, session.identity, role
        );
        self.bound
            .insert(session.identity.clone(), BoundIcon { handle, role });
    }

    fn sweep(&mut self, roster: &Roster) {
        let gone: Vec<String> = self
            .bound
            .keys()
            .filter(|identity| roster.live(identity).is_none())
            .cloned()
            .collect();
        for identity in gone {
            self.release_identity(&identity);
        }
        self.waiting_for_slot
            .retain(|identity| roster.live(identity).is_some());
    }

    fn release_identity(&mut self, identity: &str) -> bool {
        let Some(bound) = self.bound.remove(identity) else {
            return false;
        };
        self.pool.release(bound.handle);
        self.stats.releases += 1;
        info!(
            target: LOG_BINDER,
            "Icon {} released from {} ({})", bound.handle, identity, bound.role
        );
        true
    }

    /// Target lost inside the follower: find its owner and release.
    fn release_handle(&mut self, handle: IconHandle) {
        let owner = self
            .bound
            .iter()
            .find(|(_, bound)| bound.handle == handle)
            .map(|(identity, _)| identity.clone());
        match owner {
            Some(identity) => {
                self.release_identity(&identity);
            }
            None => {
                self.pool.release(handle);
            }
        }
    }
}

impl<F: IconFactory> std::fmt::Debug for SessionIconBinder<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIconBinder")
            .field("roles", &self.table.role_count())
            .field("bound", &self.bound.len())
            .field("pool", &self.pool)
            .field("scanning", &self.scanning)
            .field("cursor", &self.cursor)
            .field("stats", &self.stats)
            .finish()
    }
}
