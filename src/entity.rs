// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity directory (§4.5, C5): tracks which archetype and row every live
//! entity currently occupies.
//!
//! Plain free-list recycling, not generational keys: the spec's entity
//! lifecycle is create/destroy plus a liveness check, with no requirement
//! that a stale id be distinguishable from a reused one, so there's
//! nothing here for a generation counter to buy.

use crate::archetype::ArchetypeId;

/// Opaque entity identifier. Recycled on destroy, so holding on to an
/// `EntityId` past its destruction can observe a different, later entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) u64);

impl EntityId {
    /// The reserved null id (§3). Never returned by [`EntityDirectory::create_id`].
    pub const NULL: EntityId = EntityId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Location {
    archetype: ArchetypeId,
    row: u32,
}

/// Per-entity bookkeeping: which archetype/row an id currently lives at,
/// and the free list of recyclable ids.
///
/// Slot 0 of every backing array is permanently reserved and never
/// handed out (§3: entity id 0 is the null id), so `active`/`location`
/// are one longer than the number of ids ever allocated.
pub struct EntityDirectory {
    active: Vec<bool>,
    location: Vec<Option<Location>>,
    free_list: Vec<u64>,
    next_id: u64,
}

impl Default for EntityDirectory {
    fn default() -> Self {
        Self {
            active: vec![false],
            location: vec![None],
            free_list: Vec::new(),
            next_id: 1,
        }
    }
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh entity id with no archetype location yet. Callers
    /// must follow up with [`Self::set_location`] once the entity has
    /// been placed into an archetype's storage. Never returns the null
    /// id (0).
    pub fn create_id(&mut self) -> EntityId {
        if let Some(raw) = self.free_list.pop() {
            let id = EntityId(raw);
            self.active[id.index()] = true;
            self.location[id.index()] = None;
            id
        } else {
            let raw = self.next_id;
            self.next_id += 1;
            self.active.push(true);
            self.location.push(None);
            EntityId(raw)
        }
    }

    /// Mark `id` as destroyed and return it to the free list. No-op if
    /// the id is already inactive.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        if !self.is_active(id) {
            return false;
        }
        self.active[id.index()] = false;
        self.location[id.index()] = None;
        self.free_list.push(id.0);
        true
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.active.get(id.index()).copied().unwrap_or(false)
    }

    pub fn set_location(&mut self, id: EntityId, archetype: ArchetypeId, row: u32) {
        debug_assert!(self.is_active(id), "set_location on an inactive entity");
        self.location[id.index()] = Some(Location { archetype, row });
    }

    pub fn location(&self, id: EntityId) -> Option<(ArchetypeId, u32)> {
        if !self.is_active(id) {
            return None;
        }
        self.location[id.index()].map(|l| (l.archetype, l.row))
    }

    pub fn archetype_of(&self, id: EntityId) -> Option<ArchetypeId> {
        self.location(id).map(|(a, _)| a)
    }

    /// Update only the row component of an entity's location, used after a
    /// swap-remove moves the entity that used to occupy the removed row's
    /// slot.
    pub fn set_row(&mut self, id: EntityId, row: u32) {
        if let Some(loc) = self.location.get_mut(id.index()).and_then(|l| l.as_mut()) {
            loc.row = row;
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }
}
