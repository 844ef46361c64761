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

//! Query engine (§4.6, C6): bitmask-matched, refcounted queries with
//! per-component reactive change detection.
//!
//! Matching is maintained incrementally: every time the archetype table
//! gains a new archetype, each live query is tested against it once,
//! rather than every query re-scanning every archetype on each iteration.

use ahash::AHashMap;

use crate::archetype::{ArchetypeId, ArchetypeTable};
use crate::bitset::ArchetypeMask;
use crate::entity::EntityId;
use crate::registry::{ComponentRegistry, ComponentTypeId};

/// Designer-facing query shape: which components a matching archetype
/// must have, must not have, must have at least one of, and which of
/// those should be checked for per-row change detection.
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptor {
    pub required: Vec<ComponentTypeId>,
    pub excluded: Vec<ComponentTypeId>,
    pub any_of: Vec<ComponentTypeId>,
    pub react: Vec<ComponentTypeId>,
    /// §4.6: a `mutable` query is never cached by signature — every
    /// `get_query` call for it allocates a fresh, independently-refcounted
    /// instance instead of sharing one keyed by `(required, excluded,
    /// any_of, react)`.
    pub mutable: bool,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ctid: ComponentTypeId) -> Self {
        self.required.push(ctid);
        self
    }

    pub fn without(mut self, ctid: ComponentTypeId) -> Self {
        self.excluded.push(ctid);
        self
    }

    pub fn any_of(mut self, ctid: ComponentTypeId) -> Self {
        self.any_of.push(ctid);
        self
    }

    pub fn react_to(mut self, ctid: ComponentTypeId) -> Self {
        self.react.push(ctid);
        self
    }

    /// Mark this query `mutable` (§4.6): it will never be shared from the
    /// cache, even if another call describes the identical shape.
    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    fn signature(&self) -> QuerySignature {
        let sort = |ids: &[ComponentTypeId]| {
            let mut v: Vec<u16> = ids.iter().map(|c| c.index() as u16).collect();
            v.sort_unstable();
            v.dedup();
            v
        };
        QuerySignature {
            required: sort(&self.required),
            excluded: sort(&self.excluded),
            any_of: sort(&self.any_of),
            react: sort(&self.react),
        }
    }

    fn compile(&self, registry: &ComponentRegistry) -> CompiledQuery {
        CompiledQuery {
            required_mask: registry.compute_mask(self.required.iter().copied()),
            excluded_mask: registry.compute_mask(self.excluded.iter().copied()),
            any_of_mask: registry.compute_mask(self.any_of.iter().copied()),
            react: self.react.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuerySignature {
    required: Vec<u16>,
    excluded: Vec<u16>,
    any_of: Vec<u16>,
    react: Vec<u16>,
}

struct CompiledQuery {
    required_mask: ArchetypeMask,
    excluded_mask: ArchetypeMask,
    any_of_mask: ArchetypeMask,
    react: Vec<ComponentTypeId>,
}

impl CompiledQuery {
    fn matches(&self, mask: &ArchetypeMask) -> bool {
        if !mask.is_superset_of(&self.required_mask) {
            return false;
        }
        if mask.intersects(&self.excluded_mask) {
            return false;
        }
        if !self.any_of_mask.is_empty() && !mask.intersects(&self.any_of_mask) {
            return false;
        }
        true
    }
}

struct QueryState {
    compiled: CompiledQuery,
    matching_archetypes: Vec<ArchetypeId>,
    refcount: usize,
    last_iteration_tick: u64,
}

/// A refcounted handle into the query cache. Cloning shares the same
/// underlying cached match set; [`QueryEngine::release_query`] must be
/// called once per [`QueryEngine::get_query`] to free it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(usize);

/// Owns every live query's matched-archetype cache.
#[derive(Default)]
pub struct QueryEngine {
    states: Vec<Option<QueryState>>,
    free_slots: Vec<usize>,
    by_signature: AHashMap<QuerySignature, QueryHandle>,
    /// Monotonic counter backing each `mutable` query's cache key
    /// (`"mutable:<counter>"` in spec.md §4.6 terms); never reused, so a
    /// `mutable` query can never collide with, or be handed back for, a
    /// previous one.
    next_mutable_id: u64,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_state(&mut self, state: QueryState) -> QueryHandle {
        if let Some(slot) = self.free_slots.pop() {
            self.states[slot] = Some(state);
            QueryHandle(slot)
        } else {
            self.states.push(Some(state));
            QueryHandle(self.states.len() - 1)
        }
    }

    /// Get (or compile and cache) the query described by `descriptor`.
    /// Increments the handle's refcount. A `mutable` descriptor (§4.6)
    /// always allocates a fresh, uniquely-keyed instance instead.
    pub fn get_query(
        &mut self,
        descriptor: &QueryDescriptor,
        registry: &ComponentRegistry,
        table: &ArchetypeTable,
    ) -> QueryHandle {
        if descriptor.mutable {
            let compiled = descriptor.compile(registry);
            let matching_archetypes: Vec<ArchetypeId> = table
                .iter()
                .filter(|a| compiled.matches(a.mask()))
                .map(|a| a.id())
                .collect();
            let state = QueryState {
                compiled,
                matching_archetypes,
                refcount: 1,
                last_iteration_tick: 0,
            };
            self.next_mutable_id += 1;
            return self.insert_state(state);
        }

        let signature = descriptor.signature();
        if let Some(&handle) = self.by_signature.get(&signature) {
            if let Some(state) = self.states[handle.0].as_mut() {
                state.refcount += 1;
                return handle;
            }
        }

        let compiled = descriptor.compile(registry);
        let matching_archetypes: Vec<ArchetypeId> = table
            .iter()
            .filter(|a| compiled.matches(a.mask()))
            .map(|a| a.id())
            .collect();

        let state = QueryState {
            compiled,
            matching_archetypes,
            refcount: 1,
            last_iteration_tick: 0,
        };

        let handle = self.insert_state(state);
        self.by_signature.insert(signature, handle);
        handle
    }

    /// Release one reference to `handle`. Frees its cache slot once the
    /// refcount reaches zero.
    pub fn release_query(&mut self, handle: QueryHandle) {
        let Some(slot) = self.states.get_mut(handle.0) else { return };
        let Some(state) = slot else { return };
        state.refcount -= 1;
        if state.refcount == 0 {
            *slot = None;
            self.free_slots.push(handle.0);
            self.by_signature.retain(|_, h| *h != handle);
        }
    }

    /// Called whenever the archetype table creates a new archetype: test
    /// it against every live query once rather than re-scanning later.
    pub fn on_archetype_created(&mut self, archetype_id: ArchetypeId, mask: &ArchetypeMask) {
        for state in self.states.iter_mut().flatten() {
            if state.compiled.matches(mask) {
                state.matching_archetypes.push(archetype_id);
            }
        }
    }

    /// Rows currently matched by `handle`, each as `(archetype, row, entity)`.
    ///
    /// When the query has `react` components, rows whose tracked
    /// components haven't changed since the last call to
    /// [`Self::finish_iteration`] for this handle are skipped.
    pub fn matching_rows(&self, handle: QueryHandle, table: &ArchetypeTable) -> Vec<(ArchetypeId, u32, EntityId)> {
        let Some(Some(state)) = self.states.get(handle.0) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for &archetype_id in &state.matching_archetypes {
            let archetype = table.get(archetype_id);
            if !state.compiled.react.is_empty() && archetype.max_dirty_tick() <= state.last_iteration_tick {
                // Broad-phase cull: nothing in this archetype changed since
                // the last time this query iterated.
                continue;
            }
            for chunk_index in 0..archetype.chunk_count() {
                for local_row in 0..archetype.chunk_len(chunk_index) {
                    let row = archetype.join_row(chunk_index, local_row);
                    if !state.compiled.react.is_empty()
                        && !state
                            .compiled
                            .react
                            .iter()
                            .any(|&ctid| table.dirty_tick(archetype_id, row, ctid) > state.last_iteration_tick)
                    {
                        continue;
                    }
                    out.push((archetype_id, row, table.entity_at(archetype_id, row)));
                }
            }
        }
        out
    }

    /// Record that `handle` just finished an iteration pass at `tick`,
    /// so the next call only sees rows changed after this point.
    pub fn finish_iteration(&mut self, handle: QueryHandle, tick: u64) {
        if let Some(Some(state)) = self.states.get_mut(handle.0) {
            state.last_iteration_tick = tick;
        }
    }

    pub fn matching_archetypes(&self, handle: QueryHandle) -> &[ArchetypeId] {
        self.states
            .get(handle.0)
            .and_then(|s| s.as_ref())
            .map(|s| s.matching_archetypes.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;
    use crate::schema::{ComponentSchema, PrimitiveType, PropertyType};

    fn setup() -> (ComponentRegistry, ArchetypeTable, ComponentTypeId, ComponentTypeId) {
        let mut registry = ComponentRegistry::new();
        let mut schema = ComponentSchema::new();
        schema.insert("x".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        let pos = registry.register("Position", &schema).unwrap();
        let vel = registry.register("Velocity", &schema).unwrap();
        let table = ArchetypeTable::new(4);
        (registry, table, pos, vel)
    }

    #[test]
    fn query_matches_existing_and_future_archetypes() {
        let (registry, mut table, pos, vel) = setup();
        let mask = registry.compute_mask([pos]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut engine = QueryEngine::new();
        let descriptor = QueryDescriptor::new().with(pos);
        let handle = engine.get_query(&descriptor, &registry, &table);
        assert_eq!(engine.matching_archetypes(handle), &[archetype_id]);

        let mask2 = registry.compute_mask([pos, vel]);
        let (archetype2, _) = table.get_or_create_archetype(&mask2, &registry).unwrap();
        engine.on_archetype_created(archetype2, table.get(archetype2).mask());
        assert_eq!(engine.matching_archetypes(handle).len(), 2);
    }

    #[test]
    fn excluded_component_filters_out_archetype() {
        let (registry, mut table, pos, vel) = setup();
        let mask = registry.compute_mask([pos, vel]);
        table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut engine = QueryEngine::new();
        let descriptor = QueryDescriptor::new().with(pos).without(vel);
        let handle = engine.get_query(&descriptor, &registry, &table);
        assert!(engine.matching_archetypes(handle).is_empty());
    }

    #[test]
    fn mutable_queries_never_share_a_cache_slot() {
        let (registry, mut table, pos, _vel) = setup();
        let mask = registry.compute_mask([pos]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut engine = QueryEngine::new();
        let descriptor = QueryDescriptor::new().with(pos).mutable();
        let a = engine.get_query(&descriptor, &registry, &table);
        let b = engine.get_query(&descriptor, &registry, &table);
        assert_ne!(a, b);
        assert_eq!(engine.matching_archetypes(a), &[archetype_id]);
        assert_eq!(engine.matching_archetypes(b), &[archetype_id]);

        engine.release_query(a);
        assert!(engine.matching_archetypes(a).is_empty());
        // `b` must still be live: releasing `a` never aliases `b`'s slot.
        assert_eq!(engine.matching_archetypes(b), &[archetype_id]);
        engine.release_query(b);
    }

    #[test]
    fn refcounting_releases_cache_slot() {
        let (registry, table, pos, _vel) = setup();
        let mut engine = QueryEngine::new();
        let descriptor = QueryDescriptor::new().with(pos);
        let a = engine.get_query(&descriptor, &registry, &table);
        let b = engine.get_query(&descriptor, &registry, &table);
        assert_eq!(a, b);
        engine.release_query(a);
        engine.release_query(b);
        assert!(engine.matching_archetypes(a).is_empty());
    }
}
