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

//! Component registry (§4.1, C3): assigns every registered component a
//! dense [`ComponentTypeId`] and a unique bit in an [`ArchetypeMask`].
//!
//! Registration happens once at startup (§6 Non-goals: no dynamic
//! registration after the world starts running), so the hot path here is
//! the id/name lookup, not the insert.

use rustc_hash::FxHashMap;

use crate::bitset::ArchetypeMask;
use crate::error::{EcsError, Result};
use crate::schema::{compile_schema, ComponentInfo, ComponentSchema};

/// Dense index assigned to a registered component type, `< MAX_COMPONENTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u16);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Entry {
    name: String,
    info: ComponentInfo,
}

/// Owns the compiled [`ComponentInfo`] for every registered component and
/// the name ↔ id mapping used to resolve host-facing requests.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: Vec<Entry>,
    by_name: FxHashMap<String, ComponentTypeId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `schema` and register it under `name`, returning its id.
    ///
    /// Errors with [`EcsError::TooManyComponentTypes`] past
    /// [`crate::MAX_COMPONENTS`] and with [`EcsError::InvalidSchema`] when
    /// the schema itself doesn't compile.
    pub fn register(&mut self, name: &str, schema: &ComponentSchema) -> Result<ComponentTypeId> {
        if self.entries.len() >= crate::MAX_COMPONENTS {
            return Err(EcsError::TooManyComponentTypes);
        }
        let info = compile_schema(name, schema)?;
        let id = ComponentTypeId(self.entries.len() as u16);
        self.entries.push(Entry {
            name: name.to_string(),
            info,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get_type_id(&self, name: &str) -> Result<ComponentTypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EcsError::UnregisteredComponent(name.to_string()))
    }

    pub fn get_name(&self, id: ComponentTypeId) -> Option<&str> {
        self.entries.get(id.index()).map(|e| e.name.as_str())
    }

    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.entries.get(id.index()).map(|e| &e.info)
    }

    pub fn get_info_by_name(&self, name: &str) -> Result<&ComponentInfo> {
        let id = self.get_type_id(name)?;
        Ok(self.get_info(id).expect("registered id always has info"))
    }

    /// The bit this component type occupies in an [`ArchetypeMask`].
    pub fn bit_flag(&self, id: ComponentTypeId) -> usize {
        id.index()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the [`ArchetypeMask`] for a set of component type ids,
    /// failing if any of them isn't registered in this registry.
    pub fn compute_mask(&self, ids: impl IntoIterator<Item = ComponentTypeId>) -> ArchetypeMask {
        let mut mask = ArchetypeMask::new();
        for id in ids {
            mask.set(self.bit_flag(id));
        }
        mask
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        (0..self.entries.len()).map(|i| ComponentTypeId(i as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PrimitiveType, PropertyType};

    fn pos_schema() -> ComponentSchema {
        let mut s = ComponentSchema::new();
        s.insert("x".to_string(), PropertyType::Primitive(PrimitiveType::F64));
        s
    }

    #[test]
    fn register_and_resolve_round_trips() {
        let mut reg = ComponentRegistry::new();
        let id = reg.register("Position", &pos_schema()).unwrap();
        assert_eq!(reg.get_type_id("Position").unwrap(), id);
        assert_eq!(reg.get_name(id), Some("Position"));
    }

    #[test]
    fn unregistered_lookup_errors() {
        let reg = ComponentRegistry::new();
        let err = reg.get_type_id("Nope").unwrap_err();
        assert!(matches!(err, EcsError::UnregisteredComponent(_)));
    }

    #[test]
    fn distinct_components_get_distinct_bits() {
        let mut reg = ComponentRegistry::new();
        let a = reg.register("A", &pos_schema()).unwrap();
        let b = reg.register("B", &pos_schema()).unwrap();
        let mask = reg.compute_mask([a, b]);
        assert!(mask.contains(reg.bit_flag(a)));
        assert!(mask.contains(reg.bit_flag(b)));
        assert_ne!(reg.bit_flag(a), reg.bit_flag(b));
    }

    #[test]
    fn registering_past_max_components_errors() {
        let mut reg = ComponentRegistry::new();
        for i in 0..crate::MAX_COMPONENTS {
            reg.register(&format!("C{i}"), &pos_schema()).unwrap();
        }
        let err = reg.register("Overflow", &pos_schema()).unwrap_err();
        assert!(matches!(err, EcsError::TooManyComponentTypes));
    }
}
