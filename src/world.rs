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

//! The facade. `World` owns every subsystem in the fixed init order the
//! design notes call for (interner → registry → archetype table → entity
//! directory → query engine → command buffer) and is the only type most
//! embedding hosts need to name.
//!
//! Structural edits queue onto the command buffer and only take effect at
//! [`World::flush`]; the one exception is [`World::instantiate_prefab_now`],
//! a pre-buffered fast path for scripting hosts that still routes through
//! the same archetype-table primitive the buffer uses (see DESIGN.md).

use crate::archetype::{ArchetypeId, ArchetypeTable};
use crate::command::{self, Command, CommandBuffer, FlushContext};
use crate::entity::EntityId;
use crate::error::Result;
use crate::external::{InMemoryPrefabSource, ManualTickSource, PrefabSource, TickSource};
use crate::interner::StringInterner;
use crate::query::{QueryDescriptor, QueryHandle};
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::schema::{ComponentSchema, NullRpnParser, RpnParser};
use crate::value::DataMap;

/// One matched row handed back by [`World::iter_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRow {
    pub entity: EntityId,
    pub archetype: ArchetypeId,
    pub row: u32,
}

/// Owns the whole data engine: schema-compiled component registry,
/// chunked SoA archetype storage, entity directory, reactive query cache,
/// and the deferred command buffer that mutates all of the above.
pub struct World {
    interner: StringInterner,
    registry: ComponentRegistry,
    archetypes: ArchetypeTable,
    entities: crate::entity::EntityDirectory,
    queries: crate::query::QueryEngine,
    commands: CommandBuffer,
    rpn_parser: Box<dyn RpnParser>,
    prefabs: Box<dyn PrefabSource>,
    tick_source: Box<dyn TickSource>,
    current_tick: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// A world with no RPN parser (formulas always compile to empty
    /// streams), no prefabs registered, and a [`ManualTickSource`] the
    /// caller advances by calling [`World::flush`].
    pub fn new() -> Self {
        Self::with_collaborators(
            Box::new(NullRpnParser),
            Box::new(InMemoryPrefabSource::new()),
            Box::new(ManualTickSource::new()),
        )
    }

    /// Build a world with host-supplied external collaborators (§6):
    /// formula parsing, prefab resolution, and the tick source.
    pub fn with_collaborators(
        rpn_parser: Box<dyn RpnParser>,
        prefabs: Box<dyn PrefabSource>,
        tick_source: Box<dyn TickSource>,
    ) -> Self {
        Self::with_chunk_capacity(crate::DEFAULT_CHUNK_CAPACITY, rpn_parser, prefabs, tick_source)
    }

    /// Build a world whose archetypes chunk rows at `chunk_capacity`
    /// instead of the default (§3: chunk capacity is a per-world tuning
    /// knob, not a global constant, since nothing in the spec requires it
    /// to be fixed across worlds).
    pub fn with_chunk_capacity(
        chunk_capacity: usize,
        rpn_parser: Box<dyn RpnParser>,
        prefabs: Box<dyn PrefabSource>,
        tick_source: Box<dyn TickSource>,
    ) -> Self {
        Self {
            interner: StringInterner::new(),
            registry: ComponentRegistry::new(),
            archetypes: ArchetypeTable::new(chunk_capacity),
            entities: crate::entity::EntityDirectory::new(),
            queries: crate::query::QueryEngine::new(),
            commands: CommandBuffer::new(),
            rpn_parser,
            prefabs,
            tick_source,
            current_tick: 0,
        }
    }

    // -- registration (startup only, §6) ------------------------------

    /// Register a component type under `name` with the given schema,
    /// returning its dense [`ComponentTypeId`]. Registration is a
    /// startup-only operation (§1 Non-goals: no dynamic registration
    /// after the world starts running).
    pub fn register_component(&mut self, name: &str, schema: &ComponentSchema) -> Result<ComponentTypeId> {
        self.registry.register(name, schema)
    }

    pub fn component_id(&self, name: &str) -> Result<ComponentTypeId> {
        self.registry.get_type_id(name)
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn interner(&self) -> &StringInterner {
        &self.interner
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    // -- deferred structural edits (§4.7) ------------------------------

    /// Queue creation of one entity with the given component data. Takes
    /// effect at the next [`World::flush`].
    pub fn spawn(&mut self, components: Vec<(String, crate::value::DataValue)>) {
        self.commands.push(Command::CreateEntity { components });
    }

    /// Queue creation of `count` entities that all start with identical
    /// component data (§4.7 `CreateIdenticalEntities`).
    pub fn spawn_identical(&mut self, components: Vec<(String, crate::value::DataValue)>, count: usize) {
        self.commands.push(Command::CreateIdenticalEntities { count, components });
    }

    /// Queue creation of a heterogeneous batch of entities, each with its
    /// own component data (§4.7 `CreateEntitiesWithData`).
    pub fn spawn_batch(&mut self, entities: Vec<Vec<(String, crate::value::DataValue)>>) {
        self.commands.push(Command::CreateEntitiesWithData { entities });
    }

    /// Queue creation of an entity from a prefab, merging `overrides` over
    /// the prefab's base data (overrides win). Resolved against
    /// [`PrefabSource`] at flush time.
    pub fn instantiate_prefab(&mut self, prefab_id: u16, overrides: Vec<(String, crate::value::DataValue)>) {
        self.commands.push(Command::InstantiatePrefab { prefab_id, overrides });
    }

    /// Immediate-mode prefab instantiation for scripting hosts (open
    /// question in DESIGN.md): resolves and spawns right away instead of
    /// waiting for the next flush, but through the same
    /// `archetype-table` row-allocation primitive the buffered path uses,
    /// so there's no second code path for the two to drift apart.
    pub fn instantiate_prefab_now(&mut self, prefab_id: u16, overrides: Vec<(String, crate::value::DataValue)>) -> Result<Option<EntityId>> {
        let Some(prefab_data) = self.prefabs.get_prefab(prefab_id) else {
            return Ok(None);
        };
        let mut components: Vec<(String, crate::value::DataValue)> = prefab_data.into_iter().collect();
        for (name, value) in overrides {
            if let Some(existing) = components.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = value;
            } else {
                components.push((name, value));
            }
        }
        let tick = self.current_tick;
        let mut ctx = self.flush_context(tick);
        let entity = command::spawn_entity(&mut ctx, &components)?;
        Ok(Some(entity))
    }

    pub fn destroy(&mut self, entity: EntityId) {
        self.commands.push(Command::DestroyEntity { entity });
    }

    pub fn destroy_in_query(&mut self, query: QueryHandle) {
        self.commands.push(Command::DestroyEntitiesInQuery { query });
    }

    pub fn add_component(&mut self, entity: EntityId, component: &str, data: crate::value::DataValue) {
        self.commands.push(Command::AddComponent {
            entity,
            component: component.to_string(),
            data,
        });
    }

    pub fn remove_component(&mut self, entity: EntityId, component: &str) {
        self.commands.push(Command::RemoveComponent {
            entity,
            component: component.to_string(),
        });
    }

    pub fn set_component_data(&mut self, entity: EntityId, component: &str, data: crate::value::DataValue) {
        self.commands.push(Command::SetComponentData {
            entity,
            component: component.to_string(),
            data,
        });
    }

    pub fn add_component_to_query(&mut self, query: QueryHandle, component: &str, data: crate::value::DataValue) {
        self.commands.push(Command::AddComponentToQuery {
            query,
            component: component.to_string(),
            data,
        });
    }

    pub fn remove_component_from_query(&mut self, query: QueryHandle, component: &str) {
        self.commands.push(Command::RemoveComponentFromQuery {
            query,
            component: component.to_string(),
        });
    }

    pub fn set_component_data_on_query(&mut self, query: QueryHandle, component: &str, data: crate::value::DataValue) {
        self.commands.push(Command::SetComponentDataOnQuery {
            query,
            component: component.to_string(),
            data,
        });
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Obtain the current tick from the tick source and consolidate +
    /// apply every queued command (§4.7). Returns the tick this flush ran
    /// at, which is also the next reactive baseline for queries that
    /// iterate right after.
    #[cfg_attr(feature = "profiling", tracing::instrument(skip(self)))]
    pub fn flush(&mut self) -> Result<u64> {
        let tick = self.tick_source.current_tick();
        self.current_tick = tick;
        if self.commands.is_empty() {
            return Ok(tick);
        }
        #[cfg(feature = "profiling")]
        tracing::debug!(tick, pending = self.commands.len(), "flushing command buffer");
        let mut ctx = self.flush_context(tick);
        self.commands.flush(&mut ctx)?;
        Ok(tick)
    }

    fn flush_context(&mut self, tick: u64) -> FlushContext<'_> {
        FlushContext {
            registry: &self.registry,
            archetypes: &mut self.archetypes,
            entities: &mut self.entities,
            queries: &mut self.queries,
            interner: &self.interner,
            rpn_parser: self.rpn_parser.as_ref(),
            prefabs: self.prefabs.as_ref(),
            tick,
        }
    }

    // -- direct (non-deferred) reads and in-place writes (§5) ----------

    pub fn is_active(&self, entity: EntityId) -> bool {
        self.entities.is_active(entity)
    }

    pub fn archetype_of(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.entities.archetype_of(entity)
    }

    /// Read one entity's component back as designer-facing data (the
    /// read program, §4.2), or `None` if the entity is inactive or lacks
    /// the component.
    pub fn get_component(&self, entity: EntityId, component: &str) -> Option<DataMap> {
        let ctid = self.registry.get_type_id(component).ok()?;
        let (archetype_id, row) = self.entities.location(entity)?;
        if !self.archetypes.get(archetype_id).has_component(ctid) {
            return None;
        }
        self.archetypes.read_component(archetype_id, row, ctid, &self.registry, &self.interner)
    }

    pub fn has_component(&self, entity: EntityId, component: &str) -> bool {
        let Ok(ctid) = self.registry.get_type_id(component) else {
            return false;
        };
        self.entities
            .archetype_of(entity)
            .map(|a| self.archetypes.get(a).has_component(ctid))
            .unwrap_or(false)
    }

    /// A system that writes a data column directly (not through the
    /// command buffer, since it's not a structural change) must call this
    /// so reactive queries over that component see the write (§5).
    pub fn mark_dirty(&mut self, entity: EntityId, component: &str, tick: u64) {
        let Ok(ctid) = self.registry.get_type_id(component) else {
            return;
        };
        let Some((archetype_id, row)) = self.entities.location(entity) else {
            return;
        };
        self.archetypes.mark_dirty(archetype_id, row, ctid, tick);
    }

    // -- queries (§4.6) -------------------------------------------------

    pub fn query(&mut self, descriptor: &QueryDescriptor) -> QueryHandle {
        self.queries.get_query(descriptor, &self.registry, &self.archetypes)
    }

    pub fn release_query(&mut self, handle: QueryHandle) {
        self.queries.release_query(handle);
    }

    /// Rows currently matched by `handle`. For a reactive query, only
    /// rows changed since the last call to [`World::finish_query_iteration`]
    /// for this handle are returned.
    pub fn iter_query(&self, handle: QueryHandle) -> Vec<QueryRow> {
        self.queries
            .matching_rows(handle, &self.archetypes)
            .into_iter()
            .map(|(archetype, row, entity)| QueryRow { entity, archetype, row })
            .collect()
    }

    /// Record that a system just finished iterating `handle` at the
    /// world's current tick, so the query's next reactive pass only sees
    /// rows dirtied after this point.
    pub fn finish_query_iteration(&mut self, handle: QueryHandle) {
        self.queries.finish_iteration(handle, self.current_tick);
    }

    pub fn archetype_table(&self) -> &ArchetypeTable {
        &self.archetypes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PrimitiveType, PropertyType};
    use crate::value::DataValue;

    fn pos_schema() -> ComponentSchema {
        let mut s = ComponentSchema::new();
        s.insert("x".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        s.insert("y".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        s
    }

    fn vel_schema() -> ComponentSchema {
        pos_schema()
    }

    /// End-to-end scenario 1 (spec.md §8): create & read primitives.
    #[test]
    fn create_and_read_primitives() {
        let mut world = World::new();
        world.register_component("Pos", &pos_schema()).unwrap();

        world.spawn(vec![(
            "Pos".to_string(),
            DataValue::Object(
                [("x".to_string(), DataValue::Number(10.0)), ("y".to_string(), DataValue::Number(20.0))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        world.flush().unwrap();

        let descriptor = QueryDescriptor::new().with(world.component_id("Pos").unwrap());
        let handle = world.query(&descriptor);
        let rows = world.iter_query(handle);
        assert_eq!(rows.len(), 1);

        let data = world.get_component(rows[0].entity, "Pos").unwrap();
        assert_eq!(data.get("x"), Some(&DataValue::Number(10.0)));
        assert_eq!(data.get("y"), Some(&DataValue::Number(20.0)));
        world.release_query(handle);
    }

    /// End-to-end scenario 2: archetype transition on add-component.
    #[test]
    fn add_component_moves_to_new_archetype() {
        let mut world = World::new();
        world.register_component("Pos", &pos_schema()).unwrap();
        world.register_component("Vel", &vel_schema()).unwrap();

        world.spawn(vec![(
            "Pos".to_string(),
            DataValue::Object(
                [("x".to_string(), DataValue::Number(1.0)), ("y".to_string(), DataValue::Number(1.0))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        world.flush().unwrap();

        let pos_only = QueryDescriptor::new().with(world.component_id("Pos").unwrap());
        let handle = world.query(&pos_only);
        let entity = world.iter_query(handle)[0].entity;
        world.release_query(handle);

        world.add_component(
            entity,
            "Vel",
            DataValue::Object(
                [("x".to_string(), DataValue::Number(5.0)), ("y".to_string(), DataValue::Number(5.0))]
                    .into_iter()
                    .collect(),
            ),
        );
        world.flush().unwrap();

        let both = QueryDescriptor::new()
            .with(world.component_id("Pos").unwrap())
            .with(world.component_id("Vel").unwrap());
        let handle2 = world.query(&both);
        assert_eq!(world.iter_query(handle2).len(), 1);
        world.release_query(handle2);

        let pos = world.get_component(entity, "Pos").unwrap();
        assert_eq!(pos.get("x"), Some(&DataValue::Number(1.0)));
        let vel = world.get_component(entity, "Vel").unwrap();
        assert_eq!(vel.get("x"), Some(&DataValue::Number(5.0)));
    }

    /// End-to-end scenario 3: reactive query change detection.
    #[test]
    fn reactive_query_yields_only_changed_rows() {
        let mut world = World::new();
        let mut schema = ComponentSchema::new();
        schema.insert("value".to_string(), PropertyType::Primitive(PrimitiveType::U32));
        world.register_component("React", &schema).unwrap();
        let ctid = world.component_id("React").unwrap();

        world.spawn_identical(
            vec![("React".to_string(), DataValue::Object(
                [("value".to_string(), DataValue::Number(0.0))].into_iter().collect(),
            ))],
            10,
        );
        world.flush().unwrap();

        let descriptor = QueryDescriptor::new().with(ctid).react_to(ctid);
        let handle = world.query(&descriptor);
        let first = world.iter_query(handle);
        assert_eq!(first.len(), 10, "initial creation marks every row dirty");
        world.finish_query_iteration(handle);

        let target = first[0].entity;
        world.set_component_data(
            target,
            "React",
            DataValue::Object([("value".to_string(), DataValue::Number(42.0))].into_iter().collect()),
        );
        world.flush().unwrap();

        let second = world.iter_query(handle);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entity, target);
        let data = world.get_component(target, "React").unwrap();
        assert_eq!(data.get("value"), Some(&DataValue::Number(42.0)));
        world.release_query(handle);
    }

    /// End-to-end scenario 4: consolidation within a single flush.
    #[test]
    fn consolidation_nets_add_remove_set_to_set_only() {
        let mut world = World::new();
        world.register_component("A", &pos_schema()).unwrap();
        world.register_component("B", &pos_schema()).unwrap();

        world.spawn(vec![]);
        world.flush().unwrap();
        let entity = EntityId(1);

        world.add_component(
            entity,
            "A",
            DataValue::Object([("x".to_string(), DataValue::Number(1.0))].into_iter().collect()),
        );
        world.remove_component(entity, "A");
        world.set_component_data(
            entity,
            "B",
            DataValue::Object([("x".to_string(), DataValue::Number(9.0))].into_iter().collect()),
        );
        world.flush().unwrap();

        assert!(!world.has_component(entity, "A"));
        assert!(world.has_component(entity, "B"));
        let b = world.get_component(entity, "B").unwrap();
        assert_eq!(b.get("x"), Some(&DataValue::Number(9.0)));
    }

    /// End-to-end scenario 5: destroy cancels a pending modification.
    #[test]
    fn destroy_cancels_pending_add() {
        let mut world = World::new();
        world.register_component("A", &pos_schema()).unwrap();
        world.spawn(vec![]);
        world.flush().unwrap();
        let entity = EntityId(1);

        world.add_component(
            entity,
            "A",
            DataValue::Object([("x".to_string(), DataValue::Number(1.0))].into_iter().collect()),
        );
        world.destroy(entity);
        world.flush().unwrap();

        assert!(!world.is_active(entity));
    }

    /// End-to-end scenario 6: batched identical creation.
    #[test]
    fn batch_identical_create_allocates_distinct_ids() {
        let mut world = World::new();
        world.register_component("Pos", &pos_schema()).unwrap();
        world.spawn_identical(
            vec![(
                "Pos".to_string(),
                DataValue::Object(
                    [("x".to_string(), DataValue::Number(1.0)), ("y".to_string(), DataValue::Number(2.0))]
                        .into_iter()
                        .collect(),
                ),
            )],
            1000,
        );
        world.flush().unwrap();

        let descriptor = QueryDescriptor::new().with(world.component_id("Pos").unwrap());
        let handle = world.query(&descriptor);
        let rows = world.iter_query(handle);
        assert_eq!(rows.len(), 1000);
        world.release_query(handle);
    }
}
