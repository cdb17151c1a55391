// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Zone registry and `RemoveZone` side effects (spec.md §4.6).
//!
//! This tracks zone *metadata* (priority, ordering, commissioning-window
//! flags) — a layer above [`crate::client::pool::Pool`]'s zone-session map,
//! which only tracks live connections. A zone can be registered here before
//! its session exists and survives after the session closes.

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRecord {
    pub key: String,
    pub zone_id: String,
    pub priority: u8,
}

/// Commissioning-window flags the device re-asserts whenever a zone slot
/// frees up (spec.md §4.6 (iii)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommissioningFlags {
    pub active: bool,
    pub completed: bool,
}

struct RegistryState {
    zones: Vec<ZoneRecord>,
    ordering: Vec<String>,
    commissioning: CommissioningFlags,
    device_in_two_zones: bool,
}

/// Registry of configured zones plus the "re-entering commissioning" and
/// "device in two zones" preconditions `RemoveZone` mutates.
pub struct ZoneRegistry {
    state: Mutex<RegistryState>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                zones: Vec::new(),
                ordering: Vec::new(),
                commissioning: CommissioningFlags::default(),
                device_in_two_zones: false,
            }),
        }
    }

    pub async fn add_zone(&self, record: ZoneRecord) {
        let mut state = self.state.lock().await;
        state.ordering.push(record.key.clone());
        state.zones.push(record);
        state.device_in_two_zones = state.zones.len() >= 2;
    }

    pub async fn zone_count(&self) -> usize {
        self.state.lock().await.zones.len()
    }

    pub async fn device_in_two_zones(&self) -> bool {
        self.state.lock().await.device_in_two_zones
    }

    pub async fn commissioning_flags(&self) -> CommissioningFlags {
        self.state.lock().await.commissioning
    }

    /// Highest-`priority` zone, ties broken by ordering-list position
    /// (earliest registered wins).
    pub async fn highest_priority_zone(&self) -> Option<ZoneRecord> {
        let state = self.state.lock().await;
        // `Iterator::max_by_key` keeps the *last* of several equally-maximum
        // elements, so the ordering list is walked in reverse: among ties,
        // the one encountered last in the reversed walk is the one that
        // appears first in `ordering` (earliest registered).
        state
            .ordering
            .iter()
            .rev()
            .filter_map(|key| state.zones.iter().find(|z| &z.key == key))
            .max_by_key(|z| z.priority)
            .cloned()
    }

    /// Applies the core-side effects of a successfully device-executed
    /// `RemoveZone` (spec.md §4.6): removes the zone (matched by key or
    /// zoneID), drops it from the ordering list, re-opens the
    /// commissioning window, and clears `device_in_two_zones` if the count
    /// falls below 2. Returns the removed record, if any matched.
    pub async fn remove_zone(&self, key_or_zone_id: &str) -> Option<ZoneRecord> {
        let mut state = self.state.lock().await;
        let index = state
            .zones
            .iter()
            .position(|z| z.key == key_or_zone_id || z.zone_id == key_or_zone_id)?;
        let removed = state.zones.remove(index);
        state.ordering.retain(|k| k != &removed.key);
        state.commissioning = CommissioningFlags { active: true, completed: false };
        if state.zones.len() < 2 {
            state.device_in_two_zones = false;
        }
        Some(removed)
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
