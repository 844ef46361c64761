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

//! String interner (§4.1, C1): every `InternedString` column stores a
//! `u32` handle instead of a boxed string, so columns stay fixed-width
//! and Copy. Handle `0` is reserved for the empty string so a freshly
//! zeroed column reads back as `""` without a lookup.

use ahash::AHashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Tables {
    strings: Vec<String>,
    handles: AHashMap<String, u32>,
}

/// Thread-safe string interner. Reads take a shared read lock; interning a
/// new string takes the write lock only for the duration of the insert.
#[derive(Debug, Default)]
pub struct StringInterner {
    tables: RwLock<Tables>,
}

impl StringInterner {
    pub fn new() -> Self {
        let tables = Tables {
            strings: vec![String::new()],
            handles: AHashMap::default(),
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Intern `s`, returning its handle. Interning the same string twice
    /// returns the same handle. The empty string always maps to handle 0.
    pub fn intern(&self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&handle) = self.tables.read().handles.get(s) {
            return handle;
        }
        let mut tables = self.tables.write();
        // Re-check under the write lock: another thread may have interned
        // `s` between our read-lock lookup above and acquiring this one.
        if let Some(&handle) = tables.handles.get(s) {
            return handle;
        }
        let handle = tables.strings.len() as u32;
        tables.strings.push(s.to_string());
        tables.handles.insert(s.to_string(), handle);
        handle
    }

    /// Look up a previously interned string by handle.
    pub fn get(&self, handle: u32) -> Option<String> {
        self.tables.read().strings.get(handle as usize).cloned()
    }

    /// Number of distinct strings interned, including the reserved empty one.
    pub fn len(&self) -> usize {
        self.tables.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_handle_zero() {
        let interner = StringInterner::new();
        assert_eq!(interner.intern(""), 0);
        assert_eq!(interner.get(0).as_deref(), Some(""));
    }

    #[test]
    fn repeated_intern_returns_same_handle() {
        let interner = StringInterner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn distinct_strings_get_distinct_handles() {
        let interner = StringInterner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
        assert_eq!(interner.get(a).as_deref(), Some("foo"));
        assert_eq!(interner.get(b).as_deref(), Some("bar"));
    }

    #[test]
    fn unknown_handle_returns_none() {
        let interner = StringInterner::new();
        assert_eq!(interner.get(999), None);
    }
}
