// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use pulse::Clock;

use crate::{Object, TOMBSTONE_PURGE_THRESHOLD, TOMBSTONE_TTL};

#[derive(Debug, Clone)]
struct RemovedInfo {
    name: String,
    display: String,
    removed_at: Instant,
}

#[derive(Debug, Clone)]
enum Entry<T> {
    Live(T),
    Tomb { obj: T, info: RemovedInfo },
}

/// A keyed registry of live objects with soft-delete tombstones.
///
/// Keys are unique; each key holds at most one entry. A deleted entry stays
/// behind as a tombstone for [`TOMBSTONE_TTL`][crate::TOMBSTONE_TTL] so that
/// a prompt re-add is recognized as a reload. Tombstones past their TTL are
/// removed by [`purge_expired_tombstones`][Self::purge_expired_tombstones],
/// which also runs opportunistically once more than
/// [`TOMBSTONE_PURGE_THRESHOLD`][crate::TOMBSTONE_PURGE_THRESHOLD] of them
/// accumulate.
#[derive(Debug)]
pub struct Pool<T: Object> {
    m: DashMap<String, Entry<T>>,
    name: String,
    clock: Clock,
    disable_log: AtomicBool,
    tombs: AtomicU32,
}

impl<T: Object> Pool<T> {
    /// Creates an empty pool with the given name, on the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Clock::new())
    }

    /// Creates an empty pool reading tombstone ages from the given clock.
    #[must_use]
    pub fn with_clock(name: impl Into<String>, clock: Clock) -> Self {
        Self {
            m: DashMap::new(),
            name: name.into(),
            clock,
            disable_log: AtomicBool::new(false),
            tombs: AtomicU32::new(0),
        }
    }

    /// Returns the pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suppresses (or restores) the pool's info logging.
    pub fn disable_log(&self, disable: bool) {
        self.disable_log.store(disable, Ordering::Relaxed);
    }

    /// Inserts the object under its own key. See [`add_key`][Self::add_key].
    pub fn add(&self, obj: T) {
        self.add_key(obj.key().to_string(), obj);
    }

    /// Inserts or replaces the entry under `key`.
    ///
    /// A live occupant is only replaced when the new object prefers itself
    /// over it ([`Object::prefer_over`]). Replacing a tombstone younger than
    /// the TTL is logged as a reload.
    pub fn add_key(&self, key: String, obj: T) {
        let _ = self.add_key_inner(key, obj);
    }

    fn add_key_inner(&self, key: String, obj: T) -> Option<&'static str> {
        let now = self.clock.instant();
        let mut action = "added";

        match self.m.entry(key) {
            dashmap::Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Entry::Live(cur) => {
                        if !obj.prefer_over(cur) {
                            return None;
                        }
                    }
                    Entry::Tomb { info, .. } => {
                        if now.saturating_duration_since(info.removed_at) < TOMBSTONE_TTL {
                            action = "reloaded";
                        }
                        self.tombs.fetch_sub(1, Ordering::Relaxed);
                    }
                }
                occupied.insert(Entry::Live(obj.clone()));
            }
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert(Entry::Live(obj.clone()));
            }
        }

        self.log_action(action, &obj);
        Some(action)
    }

    /// Inserts the object only when its key is free.
    ///
    /// Returns the object now considered authoritative for the key and
    /// whether an insert happened:
    ///
    /// - live occupant: `(occupant, false)`;
    /// - tombstone younger than the TTL: the recently-removed object keeps
    ///   its claim, `(removed object, false)`;
    /// - expired tombstone: the tombstone is replaced, `(new, true)`;
    /// - free key: `(new, true)`.
    pub fn add_if_not_exists(&self, obj: T) -> (T, bool) {
        let now = self.clock.instant();

        match self.m.entry(obj.key().to_string()) {
            dashmap::Entry::Occupied(mut occupied) => match occupied.get() {
                Entry::Live(cur) => (cur.clone(), false),
                Entry::Tomb { obj: removed, info } => {
                    if now.saturating_duration_since(info.removed_at) < TOMBSTONE_TTL {
                        return (removed.clone(), false);
                    }
                    self.tombs.fetch_sub(1, Ordering::Relaxed);
                    occupied.insert(Entry::Live(obj.clone()));
                    self.log_action("added", &obj);
                    (obj, true)
                }
            },
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert(Entry::Live(obj.clone()));
                self.log_action("added", &obj);
                (obj, true)
            }
        }
    }

    /// Soft-deletes the object under its key, keeping its display name for
    /// the removal log.
    pub fn del(&self, obj: &T) {
        self.del_inner(obj.key(), Some(obj.display_name().to_string()));
    }

    /// Soft-deletes the entry under `key`.
    pub fn del_key(&self, key: &str) {
        self.del_inner(key, None);
    }

    fn del_inner(&self, key: &str, display: Option<String>) {
        {
            let Some(mut entry) = self.m.get_mut(key) else {
                return;
            };
            let Entry::Live(cur) = &*entry else {
                return;
            };

            let info = RemovedInfo {
                name: cur.name().to_string(),
                display: display.unwrap_or_else(|| cur.display_name().to_string()),
                removed_at: self.clock.instant(),
            };
            let obj = cur.clone();
            *entry = Entry::Tomb { obj, info };
        }

        if self.tombs.fetch_add(1, Ordering::Relaxed) + 1 > TOMBSTONE_PURGE_THRESHOLD {
            self.purge_expired_tombstones();
        }
    }

    /// Returns the live object under `key`, if any. Tombstoned entries are
    /// not returned.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        match self.m.get(key).as_deref() {
            Some(Entry::Live(obj)) => Some(obj.clone()),
            _ => None,
        }
    }

    /// Returns the total number of entries, tombstones included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.m.len()
    }

    /// Returns the current tombstone count.
    #[must_use]
    pub fn tombstones(&self) -> u32 {
        self.tombs.load(Ordering::Relaxed)
    }

    /// Removes every entry, tombstones included.
    pub fn clear(&self) {
        self.m.clear();
        self.tombs.store(0, Ordering::Relaxed);
    }

    /// Calls `f` for every live entry until it returns `false`.
    pub fn iter(&self, mut f: impl FnMut(&str, &T) -> bool) {
        for entry in self.m.iter() {
            if let Entry::Live(obj) = entry.value() {
                if !f(entry.key(), obj) {
                    return;
                }
            }
        }
    }

    /// Returns the live objects sorted by name in ascending order.
    #[must_use]
    pub fn slice(&self) -> Vec<T> {
        let mut objects: Vec<T> = self
            .m
            .iter()
            .filter_map(|entry| match entry.value() {
                Entry::Live(obj) => Some(obj.clone()),
                Entry::Tomb { .. } => None,
            })
            .collect();
        objects.sort_by(|a, b| a.name().cmp(b.name()));
        objects
    }

    /// Removes every tombstone older than the TTL and returns how many were
    /// purged.
    ///
    /// Each candidate is re-verified under the map lock (same removal time)
    /// so a key that was concurrently reloaded or re-deleted is left alone.
    pub fn purge_expired_tombstones(&self) -> usize {
        let now = self.clock.instant();

        let expired: Vec<(String, Instant)> = self
            .m
            .iter()
            .filter_map(|entry| match entry.value() {
                Entry::Tomb { info, .. }
                    if now.saturating_duration_since(info.removed_at) >= TOMBSTONE_TTL =>
                {
                    Some((entry.key().clone(), info.removed_at))
                }
                _ => None,
            })
            .collect();

        let mut purged = 0;
        for (key, removed_at) in expired {
            let removed = self.m.remove_if(&key, |_, value| {
                matches!(value, Entry::Tomb { info, .. } if info.removed_at == removed_at)
            });
            if let Some((_, Entry::Tomb { info, .. })) = removed {
                self.tombs.fetch_sub(1, Ordering::Relaxed);
                purged += 1;
                self.log_removed(&info);
            }
        }
        purged
    }

    fn log_action(&self, action: &'static str, obj: &T) {
        if self.disable_log.load(Ordering::Relaxed) {
            return;
        }
        let name = obj.name();
        let display_name = obj.display_name();
        if display_name == name {
            tracing::info!(pool = %self.name, name = %name, "{action}");
        } else {
            tracing::info!(pool = %self.name, name = %name, display = %display_name, "{action}");
        }
    }

    fn log_removed(&self, info: &RemovedInfo) {
        if self.disable_log.load(Ordering::Relaxed) {
            return;
        }
        if info.display == info.name {
            tracing::info!(pool = %self.name, name = %info.name, "removed");
        } else {
            tracing::info!(pool = %self.name, name = %info.name, display = %info.display, "removed");
        }
    }
}
