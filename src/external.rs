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

//! External seams (§5, C8/C9): the two places a host plugs into this
//! engine without the engine needing to know anything about rendering,
//! physics, asset pipelines, or prefab file formats.

use crate::value::DataMap;

/// Supplies the current logical tick used to stamp dirty ticks (§4.6).
///
/// Object-safe so a `World` can hold one behind `&mut dyn TickSource`
/// without a generic parameter threading through every call site.
pub trait TickSource {
    fn current_tick(&mut self) -> u64;
}

/// A [`TickSource`] a host advances by calling [`Self::advance`] once per
/// logical frame. The default for tests and simple embedding.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualTickSource {
    tick: u64,
}

impl ManualTickSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

impl TickSource for ManualTickSource {
    fn current_tick(&mut self) -> u64 {
        self.tick
    }
}

/// Resolves a prefab id to its designer data (§6 Non-goals: reading
/// prefab files from disk is out of scope; this only resolves already
/// loaded data by id).
pub trait PrefabSource {
    fn get_prefab(&self, id: u16) -> Option<DataMap>;
}

/// A [`PrefabSource`] backed by an in-memory table, useful for tests and
/// hosts that load all prefabs up front.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPrefabSource {
    prefabs: std::collections::HashMap<u16, DataMap>,
}

impl InMemoryPrefabSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u16, data: DataMap) {
        self.prefabs.insert(id, data);
    }
}

impl PrefabSource for InMemoryPrefabSource {
    fn get_prefab(&self, id: u16) -> Option<DataMap> {
        self.prefabs.get(&id).cloned()
    }
}
