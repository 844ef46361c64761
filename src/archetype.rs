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

//! Archetype table (§4.4, C4): Structure-of-Arrays storage for every
//! distinct set of component types observed at runtime, plus the
//! transition cache that makes add/remove-component moves O(1) to look up.

use ahash::AHashMap;

use crate::bitset::ArchetypeMask;
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::schema::{decode_property, PrimitiveType, Representation, StorageColumn, StorageType};
use crate::value::{DataMap, DataValue};

/// Identifies one archetype within an [`ArchetypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    pub fn from_raw(raw: u32) -> Self {
        ArchetypeId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single typed storage column, laid out contiguously (SoA).
#[derive(Debug, Clone)]
enum Column {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

impl Column {
    fn with_capacity(ty: StorageType, capacity: usize) -> Self {
        match ty {
            StorageType::F64 => Column::F64(vec![0.0; capacity]),
            StorageType::F32 => Column::F32(vec![0.0; capacity]),
            StorageType::I32 => Column::I32(vec![0; capacity]),
            StorageType::U32 => Column::U32(vec![0; capacity]),
            StorageType::I16 => Column::I16(vec![0; capacity]),
            StorageType::U16 => Column::U16(vec![0; capacity]),
            StorageType::I8 => Column::I8(vec![0; capacity]),
            StorageType::U8 => Column::U8(vec![0; capacity]),
        }
    }

    fn write(&mut self, row: usize, value: f64) {
        match self {
            Column::F64(v) => v[row] = value,
            Column::F32(v) => v[row] = value as f32,
            Column::I32(v) => v[row] = value as i32,
            Column::U32(v) => v[row] = value as u32,
            Column::I16(v) => v[row] = value as i16,
            Column::U16(v) => v[row] = value as u16,
            Column::I8(v) => v[row] = value as i8,
            Column::U8(v) => v[row] = value as u8,
        }
    }

    fn read(&self, row: usize) -> f64 {
        match self {
            Column::F64(v) => v[row],
            Column::F32(v) => v[row] as f64,
            Column::I32(v) => v[row] as f64,
            Column::U32(v) => v[row] as f64,
            Column::I16(v) => v[row] as f64,
            Column::U16(v) => v[row] as f64,
            Column::I8(v) => v[row] as f64,
            Column::U8(v) => v[row] as f64,
        }
    }

    fn swap_remove_into(&mut self, row: usize, last: usize) {
        let moved = self.read(last);
        if row != last {
            self.write(row, moved);
        }
    }
}

/// A fixed-capacity block of rows belonging to one archetype.
struct Chunk {
    len: usize,
    capacity: usize,
    columns: Vec<Column>,
    entities: Vec<EntityId>,
    /// One dirty tick per component (not per raw column) per row.
    dirty_ticks: Vec<Vec<u64>>,
    max_dirty_tick: u64,
}

impl Chunk {
    fn new(column_types: &[StorageType], component_count: usize, capacity: usize) -> Self {
        Self {
            len: 0,
            capacity,
            columns: column_types
                .iter()
                .map(|&ty| Column::with_capacity(ty, capacity))
                .collect(),
            entities: Vec::with_capacity(capacity),
            dirty_ticks: vec![vec![0u64; capacity]; component_count],
            max_dirty_tick: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    fn push_entity(&mut self, entity: EntityId) -> usize {
        let row = self.len;
        self.entities.push(entity);
        self.len += 1;
        row
    }

    /// Swap-remove `row`, returning the entity that now occupies it (the
    /// one that used to be last), or `None` if `row` was already last.
    fn swap_remove(&mut self, row: usize) -> Option<EntityId> {
        let last = self.len - 1;
        for column in &mut self.columns {
            column.swap_remove_into(row, last);
        }
        for ticks in &mut self.dirty_ticks {
            ticks[row] = ticks[last];
        }
        self.entities.swap_remove(row);
        self.len -= 1;
        if row == last {
            None
        } else {
            Some(self.entities[row])
        }
    }

    fn mark_dirty(&mut self, component_index: usize, row: usize, tick: u64) {
        self.dirty_ticks[component_index][row] = tick;
        if tick > self.max_dirty_tick {
            self.max_dirty_tick = tick;
        }
    }
}

/// Shared storage for one variable-length packed array property (§4.2),
/// owned by the archetype rather than any single row. Never reclaims
/// space: entries are only ever appended.
#[derive(Debug, Default, Clone)]
struct PackedPool {
    data: Vec<f64>,
}

/// One distinct set of component types and its SoA-chunked storage.
pub struct Archetype {
    id: ArchetypeId,
    mask: ArchetypeMask,
    component_type_ids: Vec<ComponentTypeId>,
    /// Concrete storage columns, grouped by component in
    /// `component_type_ids` order.
    columns: Vec<StorageColumn>,
    /// `[start, end)` range into `columns` for each entry in
    /// `component_type_ids`.
    component_ranges: Vec<(usize, usize)>,
    component_index: AHashMap<ComponentTypeId, usize>,
    /// `None` marks a hole left by a chunk that emptied out in the middle
    /// of the list (its storage was released); `allocate_row` reuses holes
    /// before growing the list.
    chunks: Vec<Option<Chunk>>,
    /// Scan hint for `allocate_row`: start the wrapping search for a
    /// non-full (or empty) chunk here instead of from the front every time.
    last_non_full_chunk_index: usize,
    chunk_capacity: usize,
    packed_pools: AHashMap<(ComponentTypeId, String), PackedPool>,
    transitions_add: AHashMap<ComponentTypeId, ArchetypeId>,
    transitions_remove: AHashMap<ComponentTypeId, ArchetypeId>,
}

impl Archetype {
    fn column_types(&self) -> Vec<StorageType> {
        self.columns.iter().map(|c| c.ty).collect()
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    pub fn mask(&self) -> &ArchetypeMask {
        &self.mask
    }

    pub fn component_type_ids(&self) -> &[ComponentTypeId] {
        &self.component_type_ids
    }

    pub fn has_component(&self, ctid: ComponentTypeId) -> bool {
        self.component_index.contains_key(&ctid)
    }

    pub fn entity_count(&self) -> usize {
        self.chunks.iter().flatten().map(|c| c.len).sum()
    }

    pub fn max_dirty_tick(&self) -> u64 {
        self.chunks.iter().flatten().map(|c| c.max_dirty_tick).max().unwrap_or(0)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Rows occupied in slot `chunk_index`; `0` for a released hole.
    pub fn chunk_len(&self, chunk_index: usize) -> usize {
        self.chunks[chunk_index].as_ref().map_or(0, |c| c.len)
    }

    fn chunk(&self, chunk_index: usize) -> &Chunk {
        self.chunks[chunk_index].as_ref().expect("row must address an occupied chunk")
    }

    fn chunk_mut(&mut self, chunk_index: usize) -> &mut Chunk {
        self.chunks[chunk_index].as_mut().expect("row must address an occupied chunk")
    }

    /// Row address packed as `chunk_index * chunk_capacity + local_row`.
    fn split_row(&self, row: u32) -> (usize, usize) {
        let row = row as usize;
        (row / self.chunk_capacity, row % self.chunk_capacity)
    }

    pub fn join_row(&self, chunk_index: usize, local_row: usize) -> u32 {
        (chunk_index * self.chunk_capacity + local_row) as u32
    }

    fn column_range(&self, ctid: ComponentTypeId) -> Option<(usize, usize)> {
        self.component_index
            .get(&ctid)
            .map(|&idx| self.component_ranges[idx])
    }
}

/// Owns every archetype in a world and the mask → id index used to find
/// or create them.
pub struct ArchetypeTable {
    archetypes: Vec<Archetype>,
    by_mask: AHashMap<ArchetypeMask, ArchetypeId>,
    chunk_capacity: usize,
}

impl ArchetypeTable {
    pub fn new(chunk_capacity: usize) -> Self {
        let mut table = Self {
            archetypes: Vec::new(),
            by_mask: AHashMap::default(),
            chunk_capacity,
        };
        // The empty archetype always exists at id 0 for entities with no components.
        table.build_archetype(ArchetypeMask::new(), &[]);
        table
    }

    /// Build an archetype that has no components (used only for the
    /// permanent empty-mask archetype at id 0, which needs no columns).
    fn build_archetype(&mut self, mask: ArchetypeMask, component_type_ids: &[ComponentTypeId]) -> ArchetypeId {
        debug_assert!(component_type_ids.is_empty());
        let id = ArchetypeId::from_raw(self.archetypes.len() as u32);
        self.archetypes.push(Archetype {
            id,
            mask: mask.clone(),
            component_type_ids: Vec::new(),
            columns: Vec::new(),
            component_ranges: Vec::new(),
            component_index: AHashMap::default(),
            chunks: Vec::new(),
            last_non_full_chunk_index: 0,
            chunk_capacity: self.chunk_capacity,
            packed_pools: AHashMap::default(),
            transitions_add: AHashMap::default(),
            transitions_remove: AHashMap::default(),
        });
        self.by_mask.insert(mask, id);
        id
    }

    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    pub fn empty_archetype(&self) -> ArchetypeId {
        ArchetypeId::from_raw(0)
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Find or create the archetype for `mask`, whose bits are component
    /// type ids registered in `registry`. The returned `bool` is `true`
    /// only when a new archetype was created, so callers that notify the
    /// query engine of newly matchable archetypes don't double-register
    /// one that already existed.
    pub fn get_or_create_archetype(
        &mut self,
        mask: &ArchetypeMask,
        registry: &ComponentRegistry,
    ) -> Result<(ArchetypeId, bool)> {
        if let Some(&id) = self.by_mask.get(mask) {
            return Ok((id, false));
        }
        if self.archetypes.len() >= crate::MAX_ARCHETYPES {
            return Err(EcsError::TooManyArchetypes);
        }

        let component_type_ids: Vec<ComponentTypeId> = registry
            .iter_ids()
            .filter(|id| mask.contains(registry.bit_flag(*id)))
            .collect();

        let mut columns = Vec::new();
        let mut component_ranges = Vec::with_capacity(component_type_ids.len());
        let mut component_index = AHashMap::default();
        for (idx, &ctid) in component_type_ids.iter().enumerate() {
            let info = registry
                .get_info(ctid)
                .ok_or_else(|| EcsError::UnregisteredComponent(format!("ctid#{}", ctid.index())))?;
            let start = columns.len();
            columns.extend(info.columns.iter().cloned());
            component_ranges.push((start, columns.len()));
            component_index.insert(ctid, idx);
        }

        let id = ArchetypeId::from_raw(self.archetypes.len() as u32);
        self.archetypes.push(Archetype {
            id,
            mask: mask.clone(),
            component_type_ids,
            columns,
            component_ranges,
            component_index,
            chunks: Vec::new(),
            last_non_full_chunk_index: 0,
            chunk_capacity: self.chunk_capacity,
            packed_pools: AHashMap::default(),
            transitions_add: AHashMap::default(),
            transitions_remove: AHashMap::default(),
        });
        self.by_mask.insert(mask.clone(), id);
        Ok((id, true))
    }

    /// Allocate a new row for `entity` in `archetype_id`. Scans chunk slots
    /// starting from `last_non_full_chunk_index`, wrapping, for the first
    /// one that is either a released hole or not yet full; only appends a
    /// fresh chunk when no slot can take the row.
    pub fn allocate_row(&mut self, archetype_id: ArchetypeId, entity: EntityId) -> u32 {
        let archetype = self.get_mut(archetype_id);
        let chunk_count = archetype.chunks.len();
        let mut found = None;
        if chunk_count > 0 {
            let start = archetype.last_non_full_chunk_index.min(chunk_count - 1);
            for offset in 0..chunk_count {
                let idx = (start + offset) % chunk_count;
                let available = match &archetype.chunks[idx] {
                    Some(chunk) => !chunk.is_full(),
                    None => true,
                };
                if available {
                    found = Some(idx);
                    break;
                }
            }
        }

        let chunk_index = found.unwrap_or_else(|| {
            archetype.chunks.push(None);
            archetype.chunks.len() - 1
        });

        if archetype.chunks[chunk_index].is_none() {
            let column_types = archetype.column_types();
            let component_count = archetype.component_type_ids.len();
            archetype.chunks[chunk_index] =
                Some(Chunk::new(&column_types, component_count, archetype.chunk_capacity));
        }
        archetype.last_non_full_chunk_index = chunk_index;
        let local_row = archetype.chunk_mut(chunk_index).push_entity(entity);
        archetype.join_row(chunk_index, local_row)
    }

    /// Write one component's processed (write-program'd) data into a row.
    pub fn write_component(
        &mut self,
        archetype_id: ArchetypeId,
        row: u32,
        ctid: ComponentTypeId,
        processed: &DataMap,
        registry: &ComponentRegistry,
    ) {
        let info = registry.get_info(ctid).expect("component must be registered");
        let archetype = self.get_mut(archetype_id);
        let Some((start, end)) = archetype.column_range(ctid) else {
            return;
        };
        let (chunk_index, local_row) = archetype.split_row(row);
        for col_idx in 0..(end - start) {
            let value = {
                let column = &archetype.columns[start + col_idx];
                processed.get(&column.name).and_then(DataValue::as_f64).unwrap_or(0.0)
            };
            archetype.chunk_mut(chunk_index).columns[start + col_idx].write(local_row, value);
        }
        // Dirty-marking is the caller's job (`World` calls `mark_dirty`
        // with the real current tick right after this write).

        // Packed array properties bypass the write program; append their
        // live contents to the archetype's shared pool directly and record
        // the resulting `[start, start+length)` window on this row's own
        // start/length columns (§4.2: "a u32 start_index and u16 length
        // per entity, indexing into a shared pool").
        for (property, representation) in &info.representations {
            if let Representation::PackedArray {
                item,
                start_column,
                length_column,
            } = representation
            {
                if let Some(DataValue::Array(items)) = processed.get(property) {
                    let (pool_start, pool_len) = write_packed_pool(archetype, ctid, property, *item, items);
                    let start_offset = start
                        + archetype.columns[start..end]
                            .iter()
                            .position(|c| &c.name == start_column)
                            .expect("packed array start column must exist");
                    let length_offset = start
                        + archetype.columns[start..end]
                            .iter()
                            .position(|c| &c.name == length_column)
                            .expect("packed array length column must exist");
                    archetype.chunk_mut(chunk_index).columns[start_offset].write(local_row, pool_start as f64);
                    archetype.chunk_mut(chunk_index).columns[length_offset].write(local_row, pool_len as f64);
                }
            }
        }
    }

    pub fn read_component(
        &self,
        archetype_id: ArchetypeId,
        row: u32,
        ctid: ComponentTypeId,
        registry: &ComponentRegistry,
        interner: &crate::interner::StringInterner,
    ) -> Option<DataMap> {
        let info = registry.get_info(ctid)?;
        let archetype = self.get(archetype_id);
        let (start, end) = archetype.column_range(ctid)?;
        let (chunk_index, local_row) = archetype.split_row(row);
        let chunk = archetype.chunk(chunk_index);

        let mut out = DataMap::new();
        for key in &info.schema_keys {
            let representation = &info.representations[key];
            let value = decode_property(
                key,
                representation,
                |col_name| {
                    let col_offset = archetype.columns[start..end]
                        .iter()
                        .position(|c| c.name == col_name)
                        .expect("column name must exist within this component's range");
                    DataValue::Number(chunk.columns[start + col_offset].read(local_row))
                },
                interner,
            );
            let value = if let Representation::PackedArray {
                start_column,
                length_column,
                ..
            } = representation
            {
                let start_offset = start
                    + archetype.columns[start..end]
                        .iter()
                        .position(|c| &c.name == start_column)
                        .expect("packed array start column must exist");
                let length_offset = start
                    + archetype.columns[start..end]
                        .iter()
                        .position(|c| &c.name == length_column)
                        .expect("packed array length column must exist");
                let pool_start = chunk.columns[start_offset].read(local_row) as usize;
                let pool_len = chunk.columns[length_offset].read(local_row) as usize;
                read_packed_pool(archetype, ctid, key, pool_start, pool_len).unwrap_or(value)
            } else {
                value
            };
            out.insert(key.clone(), value);
        }
        Some(out)
    }

    /// Remove a row via swap-remove, returning the entity that was moved
    /// into the vacated slot, if any. If the chunk empties out, its
    /// storage is released: truncated off the end of the chunk list, or
    /// left as a hole for `allocate_row` to reuse if it wasn't last.
    pub fn remove_row(&mut self, archetype_id: ArchetypeId, row: u32) -> Option<EntityId> {
        let archetype = self.get_mut(archetype_id);
        let (chunk_index, local_row) = archetype.split_row(row);
        let moved = archetype.chunk_mut(chunk_index).swap_remove(local_row);

        if archetype.chunk(chunk_index).len == 0 {
            if chunk_index == archetype.chunks.len() - 1 {
                archetype.chunks.pop();
                while matches!(archetype.chunks.last(), Some(None)) {
                    archetype.chunks.pop();
                }
            } else {
                archetype.chunks[chunk_index] = None;
            }
            if archetype.last_non_full_chunk_index >= archetype.chunks.len() {
                archetype.last_non_full_chunk_index = 0;
            }
        }
        moved
    }

    /// The entity currently occupying `row` in `archetype_id`.
    pub fn entity_at(&self, archetype_id: ArchetypeId, row: u32) -> EntityId {
        let archetype = self.get(archetype_id);
        let (chunk_index, local_row) = archetype.split_row(row);
        archetype.chunk(chunk_index).entities[local_row]
    }

    pub fn cached_add_transition(&self, archetype_id: ArchetypeId, ctid: ComponentTypeId) -> Option<ArchetypeId> {
        self.get(archetype_id).transitions_add.get(&ctid).copied()
    }

    pub fn cache_add_transition(&mut self, archetype_id: ArchetypeId, ctid: ComponentTypeId, target: ArchetypeId) {
        self.get_mut(archetype_id).transitions_add.insert(ctid, target);
    }

    pub fn cached_remove_transition(&self, archetype_id: ArchetypeId, ctid: ComponentTypeId) -> Option<ArchetypeId> {
        self.get(archetype_id).transitions_remove.get(&ctid).copied()
    }

    pub fn cache_remove_transition(&mut self, archetype_id: ArchetypeId, ctid: ComponentTypeId, target: ArchetypeId) {
        self.get_mut(archetype_id).transitions_remove.insert(ctid, target);
    }

    pub fn mark_dirty(&mut self, archetype_id: ArchetypeId, row: u32, ctid: ComponentTypeId, tick: u64) {
        let archetype = self.get_mut(archetype_id);
        let Some(&component_index) = archetype.component_index.get(&ctid) else {
            return;
        };
        let (chunk_index, local_row) = archetype.split_row(row);
        archetype.chunk_mut(chunk_index).mark_dirty(component_index, local_row, tick);
    }

    pub fn dirty_tick(&self, archetype_id: ArchetypeId, row: u32, ctid: ComponentTypeId) -> u64 {
        let archetype = self.get(archetype_id);
        let Some(&component_index) = archetype.component_index.get(&ctid) else {
            return 0;
        };
        let (chunk_index, local_row) = archetype.split_row(row);
        archetype.chunk(chunk_index).dirty_ticks[component_index][local_row]
    }

    /// Copy one component's raw column values from one row to another,
    /// used by archetype moves (add/remove component) to carry a shared
    /// component across without decoding it to designer data and back.
    /// Both archetypes must have `ctid` (same [`crate::schema::ComponentInfo`],
    /// so identical column layout for that component); a no-op otherwise.
    ///
    /// A packed array property's pool lives on its *archetype*, not the
    /// row, so a plain column copy would carry over a `start_index` that
    /// means nothing in the target archetype's pool. `registry` lets this
    /// detect that case and re-append the source row's slice into the
    /// target archetype's own pool instead, rewriting `start_index` to
    /// match.
    pub fn copy_component(
        &mut self,
        ctid: ComponentTypeId,
        from_archetype: ArchetypeId,
        from_row: u32,
        to_archetype: ArchetypeId,
        to_row: u32,
        registry: &ComponentRegistry,
    ) {
        let values: Vec<f64> = {
            let from = self.get(from_archetype);
            let Some((start, end)) = from.column_range(ctid) else {
                return;
            };
            let (chunk_index, local_row) = from.split_row(from_row);
            let chunk = from.chunk(chunk_index);
            (start..end).map(|i| chunk.columns[i].read(local_row)).collect()
        };
        {
            let to = self.get_mut(to_archetype);
            let Some((start, _end)) = to.column_range(ctid) else {
                return;
            };
            let (chunk_index, local_row) = to.split_row(to_row);
            let chunk = to.chunk_mut(chunk_index);
            for (offset, value) in values.iter().enumerate() {
                chunk.columns[start + offset].write(local_row, *value);
            }
        }

        let Some(info) = registry.get_info(ctid) else { return };
        for representation in info.representations.values() {
            if let Representation::PackedArray {
                item,
                start_column,
                length_column,
            } = representation
            {
                let (pool_start, pool_len) = {
                    let from = self.get(from_archetype);
                    let Some((start, end)) = from.column_range(ctid) else { continue };
                    let (chunk_index, local_row) = from.split_row(from_row);
                    let chunk = from.chunk(chunk_index);
                    let start_offset = start
                        + from.columns[start..end]
                            .iter()
                            .position(|c| &c.name == start_column)
                            .expect("packed array start column must exist");
                    let length_offset = start
                        + from.columns[start..end]
                            .iter()
                            .position(|c| &c.name == length_column)
                            .expect("packed array length column must exist");
                    (
                        chunk.columns[start_offset].read(local_row) as usize,
                        chunk.columns[length_offset].read(local_row) as usize,
                    )
                };
                let slice: Vec<DataValue> = {
                    let from = self.get(from_archetype);
                    match from.packed_pools.get(&(ctid, find_property_name(info, start_column))) {
                        Some(pool) => {
                            let end = (pool_start + pool_len).min(pool.data.len());
                            let s = pool_start.min(end);
                            pool.data[s..end].iter().map(|&v| DataValue::Number(v)).collect()
                        }
                        None => Vec::new(),
                    }
                };
                let property = find_property_name(info, start_column);
                let to = self.get_mut(to_archetype);
                let (new_start, new_len) = write_packed_pool(to, ctid, &property, *item, &slice);
                let Some((start, end)) = to.column_range(ctid) else { continue };
                let (chunk_index, local_row) = to.split_row(to_row);
                let start_offset = start
                    + to.columns[start..end]
                        .iter()
                        .position(|c| &c.name == start_column)
                        .expect("packed array start column must exist");
                let length_offset = start
                    + to.columns[start..end]
                        .iter()
                        .position(|c| &c.name == length_column)
                        .expect("packed array length column must exist");
                to.chunk_mut(chunk_index).columns[start_offset].write(local_row, new_start as f64);
                to.chunk_mut(chunk_index).columns[length_offset].write(local_row, new_len as f64);
            }
        }
    }
}

/// Recover a packed array's original schema property name from one of its
/// implicit column names (`<prop>_startIndex`), for pool-key lookups.
fn find_property_name(info: &crate::schema::ComponentInfo, start_column: &str) -> String {
    start_column
        .strip_suffix("_startIndex")
        .unwrap_or(start_column)
        .to_string()
}

/// Append `items` to `property`'s shared pool, returning the `(start,
/// length)` window this row now owns. The pool never reclaims space
/// (§4.2): it is append-only for the archetype's lifetime.
fn write_packed_pool(
    archetype: &mut Archetype,
    ctid: ComponentTypeId,
    property: &str,
    item: PrimitiveType,
    items: &[DataValue],
) -> (usize, usize) {
    let _ = item;
    let pool = archetype
        .packed_pools
        .entry((ctid, property.to_string()))
        .or_default();
    let start = pool.data.len();
    for value in items {
        pool.data.push(value.as_f64().unwrap_or(0.0));
    }
    (start, items.len())
}

/// Reconstruct a packed array property's `[start, start+length)` window
/// from the archetype's shared pool.
fn read_packed_pool(
    archetype: &Archetype,
    ctid: ComponentTypeId,
    property: &str,
    start: usize,
    length: usize,
) -> Option<DataValue> {
    let pool = archetype.packed_pools.get(&(ctid, property.to_string()))?;
    let end = (start + length).min(pool.data.len());
    let start = start.min(end);
    Some(DataValue::Array(
        pool.data[start..end].iter().map(|&v| DataValue::Number(v)).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;
    use crate::schema::{ComponentSchema, PropertyType};

    fn registry_with_position() -> (ComponentRegistry, ComponentTypeId) {
        let mut registry = ComponentRegistry::new();
        let mut schema = ComponentSchema::new();
        schema.insert("x".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        schema.insert("y".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        let ctid = registry.register("Position", &schema).unwrap();
        (registry, ctid)
    }

    #[test]
    fn emptying_a_middle_chunk_leaves_a_hole_that_allocate_row_reuses() {
        let (registry, ctid) = registry_with_position();
        let mut table = ArchetypeTable::new(2);
        let mask = registry.compute_mask([ctid]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();
        let mut dir = crate::entity::EntityDirectory::new();

        // Chunk capacity 2: four entities fill exactly two chunks.
        let a = dir.create_id();
        let b = dir.create_id();
        let c = dir.create_id();
        let d = dir.create_id();
        table.allocate_row(archetype_id, a);
        let row_b = table.allocate_row(archetype_id, b);
        table.allocate_row(archetype_id, c);
        table.allocate_row(archetype_id, d);
        assert_eq!(table.get(archetype_id).chunk_count(), 2);

        // Empty the first chunk entirely (it isn't the trailing one), so
        // its storage is released rather than the chunk list shrinking.
        table.remove_row(archetype_id, row_b);
        let remaining = table.remove_row(archetype_id, 0);
        assert_eq!(remaining, None, "b's row was the only other occupant of chunk 0");
        assert_eq!(table.get(archetype_id).chunk_count(), 2, "chunk slot is released, not removed");
        assert_eq!(table.get(archetype_id).chunk_len(0), 0);
        assert_eq!(table.get(archetype_id).entity_count(), 2);

        // The next two allocations should backfill the released hole
        // instead of growing the chunk list.
        let e = dir.create_id();
        let f = dir.create_id();
        table.allocate_row(archetype_id, e);
        table.allocate_row(archetype_id, f);
        assert_eq!(table.get(archetype_id).chunk_count(), 2, "hole was reused, no third chunk allocated");
        assert_eq!(table.get(archetype_id).entity_count(), 4);
    }

    #[test]
    fn trailing_empty_chunk_is_truncated_from_the_chunk_list() {
        let (registry, ctid) = registry_with_position();
        let mut table = ArchetypeTable::new(2);
        let mask = registry.compute_mask([ctid]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();
        let mut dir = crate::entity::EntityDirectory::new();

        let a = dir.create_id();
        let b = dir.create_id();
        let row_a = table.allocate_row(archetype_id, a);
        let row_b = table.allocate_row(archetype_id, b);
        assert_eq!(table.get(archetype_id).chunk_count(), 1);

        table.remove_row(archetype_id, row_b);
        table.remove_row(archetype_id, row_a);
        assert_eq!(table.get(archetype_id).chunk_count(), 0, "sole chunk empties and is popped");
    }

    #[test]
    fn allocate_and_write_row_round_trips() {
        let (registry, ctid) = registry_with_position();
        let mut table = ArchetypeTable::new(4);
        let mask = registry.compute_mask([ctid]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut dir = crate::entity::EntityDirectory::new();
        let entity = dir.create_id();
        let row = table.allocate_row(archetype_id, entity);

        let mut data = DataMap::new();
        data.insert("x".to_string(), DataValue::Number(1.0));
        data.insert("y".to_string(), DataValue::Number(2.0));
        table.write_component(archetype_id, row, ctid, &data, &registry);

        let interner = crate::interner::StringInterner::new();
        let read = table
            .read_component(archetype_id, row, ctid, &registry, &interner)
            .unwrap();
        assert_eq!(read.get("x"), Some(&DataValue::Number(1.0)));
        assert_eq!(read.get("y"), Some(&DataValue::Number(2.0)));
    }

    #[test]
    fn swap_remove_reports_moved_entity() {
        let (registry, ctid) = registry_with_position();
        let mut table = ArchetypeTable::new(4);
        let mask = registry.compute_mask([ctid]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut dir = crate::entity::EntityDirectory::new();
        let a = dir.create_id();
        let b = dir.create_id();
        let row_a = table.allocate_row(archetype_id, a);
        let _row_b = table.allocate_row(archetype_id, b);

        let moved = table.remove_row(archetype_id, row_a);
        assert_eq!(moved, Some(b));
    }

    #[test]
    fn exceeding_max_archetypes_errors() {
        let mut registry = ComponentRegistry::new();
        let mut table = ArchetypeTable::new(4);
        let mut ctids = Vec::new();
        for i in 0..13 {
            let mut schema = ComponentSchema::new();
            schema.insert("v".to_string(), PropertyType::Primitive(PrimitiveType::I32));
            ctids.push(registry.register(&format!("C{i}"), &schema).unwrap());
        }
        // Every non-empty subset of 13 components is at most 2^13 - plenty
        // to push past a small MAX_ARCHETYPES if the crate were configured
        // that low; with the real 4096 default this just exercises the
        // get-or-create path repeatedly without erroring.
        for ctid in &ctids {
            let mask = registry.compute_mask([*ctid]);
            table.get_or_create_archetype(&mask, &registry).unwrap();
        }
        assert!(table.len() > 1);
    }

    #[test]
    fn packed_array_rows_read_back_their_own_slice() {
        let mut registry = ComponentRegistry::new();
        let mut schema = ComponentSchema::new();
        schema.insert(
            "hits".to_string(),
            PropertyType::PackedArray { item: PrimitiveType::F32 },
        );
        let ctid = registry.register("Log", &schema).unwrap();
        let mut table = ArchetypeTable::new(8);
        let mask = registry.compute_mask([ctid]);
        let (archetype_id, _) = table.get_or_create_archetype(&mask, &registry).unwrap();

        let mut dir = crate::entity::EntityDirectory::new();
        let a = dir.create_id();
        let b = dir.create_id();
        let row_a = table.allocate_row(archetype_id, a);
        let row_b = table.allocate_row(archetype_id, b);

        let mut data_a = DataMap::new();
        data_a.insert(
            "hits".to_string(),
            DataValue::Array(vec![DataValue::Number(1.0), DataValue::Number(2.0)]),
        );
        table.write_component(archetype_id, row_a, ctid, &data_a, &registry);

        let mut data_b = DataMap::new();
        data_b.insert(
            "hits".to_string(),
            DataValue::Array(vec![DataValue::Number(3.0)]),
        );
        table.write_component(archetype_id, row_b, ctid, &data_b, &registry);

        let interner = crate::interner::StringInterner::new();
        let read_a = table.read_component(archetype_id, row_a, ctid, &registry, &interner).unwrap();
        let read_b = table.read_component(archetype_id, row_b, ctid, &registry, &interner).unwrap();
        assert_eq!(
            read_a.get("hits"),
            Some(&DataValue::Array(vec![DataValue::Number(1.0), DataValue::Number(2.0)]))
        );
        assert_eq!(
            read_b.get("hits"),
            Some(&DataValue::Array(vec![DataValue::Number(3.0)]))
        );
    }

    #[test]
    fn packed_array_survives_an_archetype_move() {
        let mut registry = ComponentRegistry::new();
        let mut log_schema = ComponentSchema::new();
        log_schema.insert(
            "hits".to_string(),
            PropertyType::PackedArray { item: PrimitiveType::F32 },
        );
        let log_ctid = registry.register("Log", &log_schema).unwrap();
        let tag_schema = ComponentSchema::new();
        let tag_ctid = registry.register("Tag", &tag_schema).unwrap();

        let mut table = ArchetypeTable::new(8);
        let mut dir = crate::entity::EntityDirectory::new();

        let mask_log = registry.compute_mask([log_ctid]);
        let (from_archetype, _) = table.get_or_create_archetype(&mask_log, &registry).unwrap();
        let mask_log_tag = registry.compute_mask([log_ctid, tag_ctid]);
        let (to_archetype, _) = table.get_or_create_archetype(&mask_log_tag, &registry).unwrap();

        let entity = dir.create_id();
        let from_row = table.allocate_row(from_archetype, entity);
        let mut data = DataMap::new();
        data.insert(
            "hits".to_string(),
            DataValue::Array(vec![DataValue::Number(9.0), DataValue::Number(8.0), DataValue::Number(7.0)]),
        );
        table.write_component(from_archetype, from_row, log_ctid, &data, &registry);

        let to_row = table.allocate_row(to_archetype, entity);
        table.copy_component(log_ctid, from_archetype, from_row, to_archetype, to_row, &registry);

        let interner = crate::interner::StringInterner::new();
        let moved = table
            .read_component(to_archetype, to_row, log_ctid, &registry, &interner)
            .unwrap();
        assert_eq!(
            moved.get("hits"),
            Some(&DataValue::Array(vec![
                DataValue::Number(9.0),
                DataValue::Number(8.0),
                DataValue::Number(7.0)
            ]))
        );
    }
}
