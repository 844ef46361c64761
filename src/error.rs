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

//! Error types for the data engine.

use std::fmt;

use crate::value::DataValue;

/// Errors raised while compiling a component schema (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A type tag in the schema wasn't recognized.
    UnknownType { property: String, tag: String },
    /// A bitmask property declared more than 32 flags.
    BitmaskOverflow { property: String, flag_count: usize },
    /// An enum declared more labels than its inferred storage width allows.
    EnumOverflow { property: String, label_count: usize },
    /// A flat or packed array capacity was non-positive or non-integer.
    ArrayCapacityInvalid { property: String, capacity: i64 },
    /// A packed array's item type can't live in the shared pool.
    PackArrayUnsupportedItem { property: String, item: String },
    /// A tag component (empty schema) was registered with a shorthand scalar elsewhere.
    ShorthandOnTagComponent { component: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::UnknownType { property, tag } => {
                write!(f, "property '{property}' has unknown type tag '{tag}'")
            }
            SchemaError::BitmaskOverflow { property, flag_count } => write!(
                f,
                "bitmask property '{property}' declares {flag_count} flags, max is 32"
            ),
            SchemaError::EnumOverflow { property, label_count } => write!(
                f,
                "enum property '{property}' declares {label_count} labels, which overflows its storage width"
            ),
            SchemaError::ArrayCapacityInvalid { property, capacity } => write!(
                f,
                "array property '{property}' has invalid capacity {capacity}"
            ),
            SchemaError::PackArrayUnsupportedItem { property, item } => write!(
                f,
                "packed array property '{property}' has unsupported item type '{item}'"
            ),
            SchemaError::ShorthandOnTagComponent { component } => write!(
                f,
                "component '{component}' has an empty schema (tag component) and cannot accept shorthand scalar data"
            ),
        }
    }
}

/// Top-level error type for the engine.
#[derive(Debug, Clone)]
pub enum EcsError {
    /// A component name or id has no registered component type id.
    UnregisteredComponent(String),
    /// An archetype id/mask was referenced that doesn't exist.
    ///
    /// Only reachable via a corrupt external id; treated as a fatal
    /// precondition violation by callers.
    UnknownArchetype(String),
    /// A structural error in a component schema, raised at registration time.
    InvalidSchema(SchemaError),
    /// More than [`crate::MAX_COMPONENTS`] component types were registered.
    TooManyComponentTypes,
    /// More than [`crate::MAX_ARCHETYPES`] distinct archetype masks were requested.
    TooManyArchetypes,
    /// A write-program instruction rejected the designer-supplied value.
    InvalidValue {
        component: String,
        property: String,
        value: DataValue,
        reason: String,
    },
    /// `InstantiatePrefab` referenced a prefab id the source doesn't have.
    ///
    /// Logged and skipped during a command buffer flush; never propagated
    /// out of `flush`.
    PrefabNotFound(u16),
    /// A mutation targeted an entity id that is not currently active.
    ///
    /// Logged and skipped during a command buffer flush; never propagated
    /// out of `flush`.
    EntityNotActive(crate::entity::EntityId),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::UnregisteredComponent(name) => {
                write!(f, "component '{name}' is not registered")
            }
            EcsError::UnknownArchetype(detail) => write!(f, "unknown archetype: {detail}"),
            EcsError::InvalidSchema(err) => write!(f, "invalid schema: {err}"),
            EcsError::TooManyComponentTypes => write!(
                f,
                "component type registry is full (max {})",
                crate::MAX_COMPONENTS
            ),
            EcsError::TooManyArchetypes => write!(
                f,
                "archetype table is full (max {})",
                crate::MAX_ARCHETYPES
            ),
            EcsError::InvalidValue {
                component,
                property,
                value,
                reason,
            } => write!(
                f,
                "invalid value for {component}.{property} ({value:?}): {reason}"
            ),
            EcsError::PrefabNotFound(id) => write!(f, "prefab {id} not found"),
            EcsError::EntityNotActive(entity) => write!(f, "entity {entity:?} is not active"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<SchemaError> for EcsError {
    fn from(err: SchemaError) -> Self {
        EcsError::InvalidSchema(err)
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EcsError>;
