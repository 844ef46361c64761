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

//! Deferred command buffer (§4.7, C7): structural edits queue up as
//! [`Command`]s during a tick and get consolidated into batched archetype
//! moves at [`CommandBuffer::flush`] instead of moving rows one
//! instruction at a time.

use ahash::{AHashMap, AHashSet};
use bumpalo::Bump;

use crate::archetype::ArchetypeTable;
use crate::entity::{EntityDirectory, EntityId};
use crate::external::PrefabSource;
use crate::query::{QueryEngine, QueryHandle};
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::schema::{merge_with_defaults, normalize_designer_data, run_write_program, RpnParser};
use crate::value::DataValue;

/// One queued structural edit.
#[derive(Debug, Clone)]
pub enum Command {
    CreateEntity {
        components: Vec<(String, DataValue)>,
    },
    CreateEntityInArchetype {
        component_names: Vec<String>,
        data: Vec<(String, DataValue)>,
    },
    CreateIdenticalEntities {
        count: usize,
        components: Vec<(String, DataValue)>,
    },
    CreateEntitiesWithData {
        entities: Vec<Vec<(String, DataValue)>>,
    },
    InstantiatePrefab {
        prefab_id: u16,
        overrides: Vec<(String, DataValue)>,
    },
    DestroyEntity {
        entity: EntityId,
    },
    DestroyEntitiesInQuery {
        query: QueryHandle,
    },
    AddComponent {
        entity: EntityId,
        component: String,
        data: DataValue,
    },
    RemoveComponent {
        entity: EntityId,
        component: String,
    },
    SetComponentData {
        entity: EntityId,
        component: String,
        data: DataValue,
    },
    AddComponentToQuery {
        query: QueryHandle,
        component: String,
        data: DataValue,
    },
    RemoveComponentFromQuery {
        query: QueryHandle,
        component: String,
    },
    SetComponentDataOnQuery {
        query: QueryHandle,
        component: String,
        data: DataValue,
    },
}

#[derive(Debug, Clone)]
enum ComponentOp {
    Add(DataValue),
    Remove,
    Set(DataValue),
}

/// Context a flush needs: every engine piece a command might touch.
pub struct FlushContext<'a> {
    pub registry: &'a ComponentRegistry,
    pub archetypes: &'a mut ArchetypeTable,
    pub entities: &'a mut EntityDirectory,
    pub queries: &'a mut QueryEngine,
    pub interner: &'a crate::interner::StringInterner,
    pub rpn_parser: &'a dyn RpnParser,
    pub prefabs: &'a dyn PrefabSource,
    pub tick: u64,
}

/// Queues structural edits and consolidates them into batched archetype
/// moves at flush time.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Consolidate and apply every queued command, in phase order:
    /// deletions, then modifications, then query-scoped ops, then
    /// creations. Errors referencing stale ids or missing prefabs are
    /// logged and skipped rather than propagated; only an internal
    /// precondition violation (the archetype table overflowing) aborts
    /// the flush, leaving everything applied so far in place.
    pub fn flush(&mut self, ctx: &mut FlushContext<'_>) -> crate::error::Result<()> {
        // Bumpalo arena for the flush's own scratch allocations (resolved
        // query row snapshots); freed in bulk when this function returns.
        let arena = Bump::new();

        let mut destroyed: AHashSet<EntityId> = AHashSet::default();
        // Per-entity ops, in first-touched order, so an entity with several
        // simultaneous structural edits in one flush gets exactly one
        // combined archetype move (§4.7 step 3) instead of one move per
        // edit. `pending_order` preserves issue order (§5); within each
        // entity's map, a later command for the same ctid overwrites the
        // earlier one, which is the net/consolidation rule.
        let mut pending_order: Vec<EntityId> = Vec::new();
        let mut pending_ops: AHashMap<EntityId, AHashMap<ComponentTypeId, ComponentOp>> = AHashMap::default();
        let mut destroy_queries: Vec<QueryHandle> = Vec::new();
        let mut query_ops: Vec<(QueryHandle, String, ComponentOp)> = Vec::new();
        let mut creations: Vec<Command> = Vec::new();

        for command in self.commands.drain(..) {
            match command {
                Command::DestroyEntity { entity } => {
                    destroyed.insert(entity);
                    pending_ops.remove(&entity);
                }
                Command::DestroyEntitiesInQuery { query } => destroy_queries.push(query),
                Command::AddComponent { entity, component, data } => {
                    if destroyed.contains(&entity) {
                        continue;
                    }
                    if let Ok(ctid) = ctx.registry.get_type_id(&component) {
                        if !pending_ops.contains_key(&entity) {
                            pending_order.push(entity);
                        }
                        pending_ops.entry(entity).or_default().insert(ctid, ComponentOp::Add(data));
                    } else {
                        tracing_unregistered(&component);
                    }
                }
                Command::RemoveComponent { entity, component } => {
                    if destroyed.contains(&entity) {
                        continue;
                    }
                    if let Ok(ctid) = ctx.registry.get_type_id(&component) {
                        if !pending_ops.contains_key(&entity) {
                            pending_order.push(entity);
                        }
                        pending_ops.entry(entity).or_default().insert(ctid, ComponentOp::Remove);
                    } else {
                        tracing_unregistered(&component);
                    }
                }
                Command::SetComponentData { entity, component, data } => {
                    if destroyed.contains(&entity) {
                        continue;
                    }
                    if let Ok(ctid) = ctx.registry.get_type_id(&component) {
                        if !pending_ops.contains_key(&entity) {
                            pending_order.push(entity);
                        }
                        pending_ops.entry(entity).or_default().insert(ctid, ComponentOp::Set(data));
                    } else {
                        tracing_unregistered(&component);
                    }
                }
                Command::AddComponentToQuery { query, component, data } => {
                    query_ops.push((query, component, ComponentOp::Add(data)))
                }
                Command::RemoveComponentFromQuery { query, component } => {
                    query_ops.push((query, component, ComponentOp::Remove))
                }
                Command::SetComponentDataOnQuery { query, component, data } => {
                    query_ops.push((query, component, ComponentOp::Set(data)))
                }
                creation @ (Command::CreateEntity { .. }
                | Command::CreateEntityInArchetype { .. }
                | Command::CreateIdenticalEntities { .. }
                | Command::CreateEntitiesWithData { .. }
                | Command::InstantiatePrefab { .. }) => creations.push(creation),
            }
        }

        // Phase 1: deletions. Query-targeted destroys resolve against the
        // table as it stands now, before any modification is applied. The
        // resolved row list is scratch that dies with this flush, so it's
        // bump-allocated rather than put on the heap.
        for query in destroy_queries {
            let rows = ctx.queries.matching_rows(query, ctx.archetypes);
            let mut resolved = bumpalo::collections::Vec::with_capacity_in(rows.len(), &arena);
            resolved.extend(rows.iter().map(|(_, _, entity)| *entity));
            for entity in resolved {
                destroyed.insert(entity);
            }
        }
        for entity in &destroyed {
            if ctx.entities.is_active(*entity) {
                remove_entity(ctx, *entity);
            }
        }
        pending_ops.retain(|e, _| !destroyed.contains(e));

        // Phase 2: modifications. Every pending ctid change for an entity
        // is applied as a single batched archetype move (§4.4's "copy plan
        // S→T"), not one move per changed component.
        for entity in pending_order {
            let Some(ops) = pending_ops.remove(&entity) else {
                continue;
            };
            if !ctx.entities.is_active(entity) {
                continue;
            }
            apply_batched_ops(ctx, entity, ops);
        }

        // Phase 3: query-scoped ops, resolved against the table as of now.
        for (query, component, op) in query_ops {
            let Ok(ctid) = ctx.registry.get_type_id(&component) else {
                tracing_unregistered(&component);
                continue;
            };
            let rows = ctx.queries.matching_rows(query, ctx.archetypes);
            let mut entities = bumpalo::collections::Vec::with_capacity_in(rows.len(), &arena);
            entities.extend(rows.iter().map(|(_, _, e)| *e));
            for entity in entities {
                apply_component_op(ctx, entity, ctid, op.clone());
            }
        }

        // Phase 4: creations.
        for creation in creations {
            apply_creation(ctx, creation)?;
        }

        Ok(())
    }
}

fn tracing_unregistered(component: &str) {
    #[cfg(feature = "profiling")]
    tracing::warn!(component, "command buffer: unregistered component, skipped");
    #[cfg(not(feature = "profiling"))]
    let _ = component;
}

fn remove_entity(ctx: &mut FlushContext<'_>, entity: EntityId) {
    let Some((archetype_id, row)) = ctx.entities.location(entity) else {
        return;
    };
    if let Some(moved_entity) = ctx.archetypes.remove_row(archetype_id, row) {
        ctx.entities.set_row(moved_entity, row);
    }
    ctx.entities.destroy(entity);
}

fn apply_component_op(ctx: &mut FlushContext<'_>, entity: EntityId, ctid: ComponentTypeId, op: ComponentOp) {
    match op {
        ComponentOp::Remove => remove_component(ctx, entity, ctid),
        ComponentOp::Add(data) => add_component(ctx, entity, ctid, data),
        ComponentOp::Set(data) => set_component(ctx, entity, ctid, data),
    }
}

/// Apply every pending ctid change queued for one entity in a single
/// archetype move. `Add` and `Set` are equivalent for mask purposes (both
/// demand the ctid be present in the target archetype); `Remove` demands
/// it be absent. If the net mask doesn't actually change — e.g. a `Set` on
/// a component the entity already has — no move happens at all, only a
/// data write.
fn apply_batched_ops(ctx: &mut FlushContext<'_>, entity: EntityId, ops: AHashMap<ComponentTypeId, ComponentOp>) {
    let Some((old_archetype, old_row)) = ctx.entities.location(entity) else {
        return;
    };
    let old_mask = ctx.archetypes.get(old_archetype).mask().clone();

    let mut new_mask = old_mask.clone();
    let mut writes: Vec<(ComponentTypeId, DataValue)> = Vec::new();
    for (ctid, op) in ops {
        match op {
            ComponentOp::Remove => new_mask.clear(ctx.registry.bit_flag(ctid)),
            ComponentOp::Add(data) | ComponentOp::Set(data) => {
                new_mask.set(ctx.registry.bit_flag(ctid));
                writes.push((ctid, data));
            }
        }
    }

    let target_archetype = if new_mask == old_mask {
        old_archetype
    } else {
        let Ok((id, is_new)) = ctx.archetypes.get_or_create_archetype(&new_mask, ctx.registry) else {
            return;
        };
        if is_new {
            ctx.queries.on_archetype_created(id, ctx.archetypes.get(id).mask());
        }
        id
    };

    let row = if target_archetype != old_archetype {
        move_entity(ctx, entity, old_archetype, old_row, target_archetype);
        ctx.entities.location(entity).expect("just moved").1
    } else {
        old_row
    };

    for (ctid, data) in writes {
        write_processed_component(ctx, target_archetype, row, ctid, data);
    }
}

fn write_processed_component(
    ctx: &mut FlushContext<'_>,
    archetype_id: crate::archetype::ArchetypeId,
    row: u32,
    ctid: ComponentTypeId,
    data: DataValue,
) {
    let Some(info) = ctx.registry.get_info(ctid) else { return };
    let Ok(overrides) = normalize_designer_data(info, data) else {
        return;
    };
    let merged = merge_with_defaults(info, &overrides);
    let Ok(processed) = run_write_program(info, merged, ctx.interner, ctx.rpn_parser) else {
        return;
    };
    ctx.archetypes.write_component(archetype_id, row, ctid, &processed, ctx.registry);
    ctx.archetypes.mark_dirty(archetype_id, row, ctid, ctx.tick);
}

fn add_component(ctx: &mut FlushContext<'_>, entity: EntityId, ctid: ComponentTypeId, data: DataValue) {
    let Some((old_archetype, old_row)) = ctx.entities.location(entity) else {
        return;
    };
    if ctx.archetypes.get(old_archetype).has_component(ctid) {
        // Already present: treat as a data update instead of a move.
        write_processed_component(ctx, old_archetype, old_row, ctid, data);
        return;
    }

    let new_archetype = match ctx.archetypes.cached_add_transition(old_archetype, ctid) {
        Some(id) => id,
        None => {
            let mut mask = ctx.archetypes.get(old_archetype).mask().clone();
            mask.set(ctx.registry.bit_flag(ctid));
            let Ok((id, is_new)) = ctx.archetypes.get_or_create_archetype(&mask, ctx.registry) else {
                return;
            };
            if is_new {
                ctx.queries.on_archetype_created(id, ctx.archetypes.get(id).mask());
            }
            ctx.archetypes.cache_add_transition(old_archetype, ctid, id);
            id
        }
    };

    move_entity(ctx, entity, old_archetype, old_row, new_archetype);
    let (_, new_row) = ctx.entities.location(entity).expect("just moved");
    write_processed_component(ctx, new_archetype, new_row, ctid, data);
}

fn remove_component(ctx: &mut FlushContext<'_>, entity: EntityId, ctid: ComponentTypeId) {
    let Some((old_archetype, old_row)) = ctx.entities.location(entity) else {
        return;
    };
    if !ctx.archetypes.get(old_archetype).has_component(ctid) {
        return;
    }

    let new_archetype = match ctx.archetypes.cached_remove_transition(old_archetype, ctid) {
        Some(id) => id,
        None => {
            let mut mask = ctx.archetypes.get(old_archetype).mask().clone();
            mask.clear(ctx.registry.bit_flag(ctid));
            let Ok((id, is_new)) = ctx.archetypes.get_or_create_archetype(&mask, ctx.registry) else {
                return;
            };
            if is_new {
                ctx.queries.on_archetype_created(id, ctx.archetypes.get(id).mask());
            }
            ctx.archetypes.cache_remove_transition(old_archetype, ctid, id);
            id
        }
    };

    move_entity(ctx, entity, old_archetype, old_row, new_archetype);
}

/// Setting data on a component the entity doesn't have is an add (§4.7
/// step 3: `Add`/`Set` of a ctid are identical for mask purposes), so this
/// falls through to the same add-and-move path as [`add_component`].
fn set_component(ctx: &mut FlushContext<'_>, entity: EntityId, ctid: ComponentTypeId, data: DataValue) {
    add_component(ctx, entity, ctid, data);
}

/// Move an entity's row from `old_archetype` to `new_archetype`, copying
/// every component the two archetypes share at the raw column level (no
/// decode/re-encode through the write program) and leaving the rest to be
/// written separately (by the caller, for a just-added component). Every
/// copied component's dirty tick is refreshed at the target row (§4.4
/// "Archetype move" step 4: the whole target row counts as changed, not
/// just whichever component triggered the move).
fn move_entity(
    ctx: &mut FlushContext<'_>,
    entity: EntityId,
    old_archetype: crate::archetype::ArchetypeId,
    old_row: u32,
    new_archetype: crate::archetype::ArchetypeId,
) {
    let shared: Vec<ComponentTypeId> = ctx
        .archetypes
        .get(old_archetype)
        .component_type_ids()
        .iter()
        .copied()
        .filter(|c| ctx.archetypes.get(new_archetype).has_component(*c))
        .collect();

    let new_row = ctx.archetypes.allocate_row(new_archetype, entity);
    for ctid in shared {
        ctx.archetypes
            .copy_component(ctid, old_archetype, old_row, new_archetype, new_row, ctx.registry);
        ctx.archetypes.mark_dirty(new_archetype, new_row, ctid, ctx.tick);
    }

    if let Some(moved_entity) = ctx.archetypes.remove_row(old_archetype, old_row) {
        ctx.entities.set_row(moved_entity, old_row);
    }
    ctx.entities.set_location(entity, new_archetype, new_row);
}

pub(crate) fn spawn_entity(
    ctx: &mut FlushContext<'_>,
    components: &[(String, DataValue)],
) -> crate::error::Result<EntityId> {
    let mut mask = crate::bitset::ArchetypeMask::new();
    let mut resolved = Vec::with_capacity(components.len());
    for (name, data) in components {
        let ctid = ctx.registry.get_type_id(name)?;
        mask.set(ctx.registry.bit_flag(ctid));
        resolved.push((ctid, data.clone()));
    }

    let (archetype_id, is_new) = ctx.archetypes.get_or_create_archetype(&mask, ctx.registry)?;
    if is_new {
        ctx.queries.on_archetype_created(archetype_id, ctx.archetypes.get(archetype_id).mask());
    }

    let entity = ctx.entities.create_id();
    let row = ctx.archetypes.allocate_row(archetype_id, entity);
    ctx.entities.set_location(entity, archetype_id, row);

    for (ctid, data) in resolved {
        write_processed_component(ctx, archetype_id, row, ctid, data);
    }
    Ok(entity)
}

fn apply_creation(ctx: &mut FlushContext<'_>, command: Command) -> crate::error::Result<()> {
    match command {
        Command::CreateEntity { components } => {
            spawn_entity(ctx, &components)?;
        }
        Command::CreateEntityInArchetype { component_names, data } => {
            let mut components: Vec<(String, DataValue)> =
                component_names.into_iter().map(|name| (name, DataValue::Null)).collect();
            for (name, value) in data {
                if let Some(existing) = components.iter_mut().find(|(n, _)| *n == name) {
                    existing.1 = value;
                } else {
                    components.push((name, value));
                }
            }
            spawn_entity(ctx, &components)?;
        }
        Command::CreateIdenticalEntities { count, components } => {
            for _ in 0..count {
                spawn_entity(ctx, &components)?;
            }
        }
        Command::CreateEntitiesWithData { entities } => {
            for components in entities {
                spawn_entity(ctx, &components)?;
            }
        }
        Command::InstantiatePrefab { prefab_id, overrides } => match ctx.prefabs.get_prefab(prefab_id) {
            Some(prefab_data) => {
                let mut components: Vec<(String, DataValue)> = prefab_data.into_iter().collect();
                for (name, value) in overrides {
                    if let Some(existing) = components.iter_mut().find(|(n, _)| *n == name) {
                        existing.1 = value;
                    } else {
                        components.push((name, value));
                    }
                }
                spawn_entity(ctx, &components)?;
            }
            None => {
                // Logged and skipped (§7): a missing prefab never aborts a flush.
                #[cfg(feature = "profiling")]
                tracing::warn!(prefab_id, "command buffer: prefab not found, skipped");
            }
        },
        _ => unreachable!("non-creation command routed into apply_creation"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryPrefabSource;
    use crate::interner::StringInterner;
    use crate::query::QueryDescriptor;
    use crate::registry::ComponentRegistry;
    use crate::schema::{ComponentSchema, NullRpnParser, PrimitiveType, PropertyType};

    struct Harness {
        registry: ComponentRegistry,
        archetypes: ArchetypeTable,
        entities: EntityDirectory,
        queries: QueryEngine,
        interner: StringInterner,
        prefabs: InMemoryPrefabSource,
    }

    impl Harness {
        fn new() -> Self {
            let mut registry = ComponentRegistry::new();
            let mut pos_schema = ComponentSchema::new();
            pos_schema.insert("x".to_string(), PropertyType::Primitive(PrimitiveType::F64));
            registry.register("Position", &pos_schema).unwrap();
            let mut vel_schema = ComponentSchema::new();
            vel_schema.insert("dx".to_string(), PropertyType::Primitive(PrimitiveType::F64));
            registry.register("Velocity", &vel_schema).unwrap();
            Self {
                registry,
                archetypes: ArchetypeTable::new(4),
                entities: EntityDirectory::new(),
                queries: QueryEngine::new(),
                interner: StringInterner::new(),
                prefabs: InMemoryPrefabSource::new(),
            }
        }

        fn ctx<'a>(&'a mut self, parser: &'a NullRpnParser, tick: u64) -> FlushContext<'a> {
            FlushContext {
                registry: &self.registry,
                archetypes: &mut self.archetypes,
                entities: &mut self.entities,
                queries: &mut self.queries,
                interner: &self.interner,
                rpn_parser: parser,
                prefabs: &self.prefabs,
                tick,
            }
        }
    }

    #[test]
    fn create_entity_then_destroy() {
        let mut h = Harness::new();
        let parser = NullRpnParser;
        let mut buffer = CommandBuffer::new();
        buffer.push(Command::CreateEntity {
            components: vec![("Position".to_string(), DataValue::Number(1.0))],
        });
        let mut ctx = h.ctx(&parser, 1);
        buffer.flush(&mut ctx).unwrap();
        assert_eq!(h.entities.active_count(), 1);
    }

    #[test]
    fn add_then_remove_component_consolidates_to_remove() {
        let mut h = Harness::new();
        let parser = NullRpnParser;
        let mut create = CommandBuffer::new();
        create.push(Command::CreateEntity {
            components: vec![("Position".to_string(), DataValue::Number(1.0))],
        });
        let mut ctx = h.ctx(&parser, 1);
        create.flush(&mut ctx).unwrap();

        let entity = EntityId(1);
        let mut buffer = CommandBuffer::new();
        buffer.push(Command::AddComponent {
            entity,
            component: "Velocity".to_string(),
            data: DataValue::Number(5.0),
        });
        buffer.push(Command::RemoveComponent {
            entity,
            component: "Velocity".to_string(),
        });
        let mut ctx = h.ctx(&parser, 2);
        buffer.flush(&mut ctx).unwrap();

        let (archetype_id, _) = h.entities.location(entity).unwrap();
        let vel_id = h.registry.get_type_id("Velocity").unwrap();
        assert!(!h.archetypes.get(archetype_id).has_component(vel_id));
    }

    #[test]
    fn destroy_overrides_pending_modifications() {
        let mut h = Harness::new();
        let parser = NullRpnParser;
        let mut create = CommandBuffer::new();
        create.push(Command::CreateEntity {
            components: vec![("Position".to_string(), DataValue::Number(1.0))],
        });
        let mut ctx = h.ctx(&parser, 1);
        create.flush(&mut ctx).unwrap();

        let entity = EntityId(1);
        let mut buffer = CommandBuffer::new();
        buffer.push(Command::SetComponentData {
            entity,
            component: "Position".to_string(),
            data: DataValue::Number(99.0),
        });
        buffer.push(Command::DestroyEntity { entity });
        let mut ctx = h.ctx(&parser, 2);
        buffer.flush(&mut ctx).unwrap();

        assert!(!h.entities.is_active(entity));
    }

    #[test]
    fn query_scoped_add_component_applies_to_all_matches() {
        let mut h = Harness::new();
        let parser = NullRpnParser;
        let mut create = CommandBuffer::new();
        create.push(Command::CreateIdenticalEntities {
            count: 3,
            components: vec![("Position".to_string(), DataValue::Number(0.0))],
        });
        let mut ctx = h.ctx(&parser, 1);
        create.flush(&mut ctx).unwrap();

        let pos_id = h.registry.get_type_id("Position").unwrap();
        let descriptor = QueryDescriptor::new().with(pos_id);
        let handle = h.queries.get_query(&descriptor, &h.registry, &h.archetypes);

        let mut buffer = CommandBuffer::new();
        buffer.push(Command::AddComponentToQuery {
            query: handle,
            component: "Velocity".to_string(),
            data: DataValue::Number(2.0),
        });
        let mut ctx = h.ctx(&parser, 2);
        buffer.flush(&mut ctx).unwrap();

        let vel_id = h.registry.get_type_id("Velocity").unwrap();
        // `handle`'s cached archetype list still includes the old
        // (Position-only) archetype, which is now empty; a fresh query
        // over both components finds the moved entities.
        let descriptor2 = QueryDescriptor::new().with(pos_id).with(vel_id);
        let handle2 = h.queries.get_query(&descriptor2, &h.registry, &h.archetypes);
        let moved_rows = h.queries.matching_rows(handle2, &h.archetypes);
        assert_eq!(moved_rows.len(), 3);
    }
}
