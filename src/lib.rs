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

//! Archetype-based ECS data engine.
//!
//! Owns the hard parts of a data-driven ECS: archetype SoA storage, a
//! schema compiler that maps designer component schemas to packed column
//! layouts, reactive queries, and a deferred command buffer that
//! consolidates structural edits into batched archetype moves.
//!
//! Rendering, audio, physics, input, prefab file I/O and scheduling live
//! outside this crate; see [`external`] for the seams that connect them.

pub mod archetype;
pub mod bitset;
pub mod command;
pub mod entity;
pub mod error;
pub mod external;
pub mod interner;
pub mod query;
pub mod registry;
pub mod schema;
pub mod value;
pub mod world;

/// Maximum number of distinct component types a single world can register.
///
/// Dense [`registry::ComponentTypeId`]s are assigned in `[0, MAX_COMPONENTS)`
/// and index directly into each archetype's [`bitset::ArchetypeMask`].
pub const MAX_COMPONENTS: usize = 256;

/// Maximum number of distinct archetypes a single world can allocate.
pub const MAX_ARCHETYPES: usize = 4096;

/// Default number of rows held by a single archetype chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 256;

pub use error::{EcsError, Result, SchemaError};

/// Convenience re-exports for embedding hosts.
pub mod prelude {
    pub use crate::archetype::{ArchetypeId, ArchetypeTable};
    pub use crate::bitset::{ArchetypeMask, BitSet};
    pub use crate::command::{Command, CommandBuffer};
    pub use crate::entity::EntityId;
    pub use crate::error::{EcsError, Result, SchemaError};
    pub use crate::external::{InMemoryPrefabSource, ManualTickSource, PrefabSource, TickSource};
    pub use crate::query::{QueryDescriptor, QueryHandle};
    pub use crate::registry::{ComponentRegistry, ComponentTypeId};
    pub use crate::schema::{ComponentSchema, NullRpnParser, PropertyType, RpnParser};
    pub use crate::value::{DataMap, DataValue};
    pub use crate::world::World;
}
