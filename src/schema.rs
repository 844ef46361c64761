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

//! Schema compiler (§4.2): maps a designer-facing component schema to a
//! packed SoA column layout plus a write program (designer data → storage
//! primitives) and the representation metadata a read program needs to
//! invert it.
//!
//! No dynamic dispatch on the hot path: every property compiles down to a
//! flat [`Instruction`] list up front, walked once per write instead of
//! re-inspecting the schema per call.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::error::{EcsError, Result, SchemaError};
use crate::interner::StringInterner;
use crate::value::{DataMap, DataValue};

/// Concrete numeric storage type backing a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    F64,
    F32,
    I32,
    U32,
    I16,
    U16,
    I8,
    U8,
}

impl StorageType {
    pub fn byte_size(self) -> usize {
        match self {
            StorageType::F64 => 8,
            StorageType::F32 => 4,
            StorageType::I32 => 4,
            StorageType::U32 => 4,
            StorageType::I16 => 2,
            StorageType::U16 => 2,
            StorageType::I8 => 1,
            StorageType::U8 => 1,
        }
    }
}

/// Designer-facing primitive numeric type tags (§3). `Bool` is stored as `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    F64,
    F32,
    I32,
    U32,
    I16,
    U16,
    I8,
    U8,
    Bool,
}

impl PrimitiveType {
    pub fn storage(self) -> StorageType {
        match self {
            PrimitiveType::F64 => StorageType::F64,
            PrimitiveType::F32 => StorageType::F32,
            PrimitiveType::I32 => StorageType::I32,
            PrimitiveType::U32 => StorageType::U32,
            PrimitiveType::I16 => StorageType::I16,
            PrimitiveType::U16 => StorageType::U16,
            PrimitiveType::I8 => StorageType::I8,
            PrimitiveType::U8 => StorageType::U8,
            PrimitiveType::Bool => StorageType::U8,
        }
    }

    /// Parse a schema type tag, e.g. `"f64"`, `"bool"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "f64" => PrimitiveType::F64,
            "f32" => PrimitiveType::F32,
            "i32" => PrimitiveType::I32,
            "u32" => PrimitiveType::U32,
            "i16" => PrimitiveType::I16,
            "u16" => PrimitiveType::U16,
            "i8" => PrimitiveType::I8,
            "u8" => PrimitiveType::U8,
            "bool" => PrimitiveType::Bool,
            _ => return None,
        })
    }
}

/// An item type allowed inside a flat array (§3: "T may itself be
/// primitive, string, or enum").
#[derive(Debug, Clone, PartialEq)]
pub enum FlatItemType {
    Primitive(PrimitiveType),
    InternedString,
    Enum { labels: Vec<String> },
}

/// A property's designer-facing type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyType {
    Primitive(PrimitiveType),
    InternedString,
    Enum {
        labels: Vec<String>,
    },
    Bitmask {
        flags: Vec<String>,
    },
    FlatArray {
        item: Box<FlatItemType>,
        capacity: usize,
    },
    /// Variable-length array of a primitive item type, indexing into a
    /// shared pool owned at the archetype level.
    PackedArray {
        item: PrimitiveType,
    },
    /// Designer-facing array of formula strings. `formula_capacity` bounds
    /// the number of formula slots; `stream_capacity` bounds the total
    /// number of opcodes across all of an entity's formulas. Both are
    /// needed because the compiled representation is three fixed-width
    /// flat arrays (§4.2), and a flat array needs a fixed width up front.
    Rpn {
        formula_capacity: usize,
        stream_capacity: usize,
    },
}

/// A designer's component schema: property name → type descriptor.
///
/// `BTreeMap` keeps keys in ascending sorted order for free, matching
/// §4.2's "schema keys are sorted ascending before compilation" rule.
pub type ComponentSchema = BTreeMap<String, PropertyType>;

/// A single concrete storage column.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageColumn {
    pub name: String,
    pub ty: StorageType,
}

/// Per-property metadata needed to invert storage back to designer data.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Primitive {
        storage: StorageType,
        is_bool: bool,
    },
    InternedString,
    Enum {
        labels: Vec<String>,
        width: StorageType,
    },
    Bitmask {
        flags: Vec<String>,
        width: StorageType,
    },
    FlatArray {
        item: FlatItemType,
        capacity: usize,
        count_column: String,
        item_columns: Vec<String>,
    },
    PackedArray {
        item: PrimitiveType,
        start_column: String,
        length_column: String,
    },
    Rpn {
        formula_capacity: usize,
        stream_capacity: usize,
        stream_columns: Vec<String>,
        stream_count_column: String,
        starts_columns: Vec<String>,
        starts_count_column: String,
        lengths_columns: Vec<String>,
        lengths_count_column: String,
    },
}

/// An ordered write-program instruction. Primitive columns need none.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    ProcessEnum {
        property: String,
        labels: Vec<String>,
    },
    ProcessBitmask {
        property: String,
        flags: Vec<String>,
    },
    ProcessString {
        property: String,
    },
    ProcessFlatArray {
        property: String,
        capacity: usize,
        item: FlatItemType,
        count_column: String,
    },
    ProcessRpn {
        property: String,
        formula_capacity: usize,
        stream_capacity: usize,
        stream_columns: Vec<String>,
        stream_count_column: String,
        starts_columns: Vec<String>,
        starts_count_column: String,
        lengths_columns: Vec<String>,
        lengths_count_column: String,
    },
}

/// The schema compiled into a packed layout plus write/read program metadata.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub name: String,
    pub byte_size: usize,
    pub columns: Vec<StorageColumn>,
    /// Original schema keys, sorted ascending (not the implicit sub-columns).
    pub schema_keys: Vec<String>,
    pub representations: BTreeMap<String, Representation>,
    /// Designer-level default value per original schema property.
    pub default_instance: DataMap,
    pub write_program: SmallVec<[Instruction; 4]>,
}

impl ComponentInfo {
    /// Whether this is a tag component (no schema properties at all).
    pub fn is_tag(&self) -> bool {
        self.schema_keys.is_empty()
    }

    /// The property shorthand scalar data applies to (§4.2: "applied to
    /// the first schema property"), resolved as the first key of the
    /// schema in ascending sorted order (see DESIGN.md Open Questions).
    pub fn shorthand_property(&self) -> Option<&str> {
        self.schema_keys.first().map(String::as_str)
    }
}

/// Parses an RPN formula string into an opcode/literal stream.
///
/// Intentionally external: §4.2 leaves formula parsing out of scope for
/// this specification. Hosts that use RPN formula components provide a
/// real implementation; [`NullRpnParser`] is a no-op default.
pub trait RpnParser {
    fn parse(&self, formula: &str) -> Result<Vec<f32>>;
}

/// An [`RpnParser`] that treats every formula as empty. Suitable when a
/// host never populates RPN formula components.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRpnParser;

impl RpnParser for NullRpnParser {
    fn parse(&self, _formula: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

fn bitmask_width(flag_count: usize, property: &str) -> std::result::Result<StorageType, SchemaError> {
    match flag_count {
        0..=8 => Ok(StorageType::U8),
        9..=16 => Ok(StorageType::U16),
        17..=32 => Ok(StorageType::U32),
        _ => Err(SchemaError::BitmaskOverflow {
            property: property.to_string(),
            flag_count,
        }),
    }
}

fn enum_width(label_count: usize, property: &str) -> std::result::Result<StorageType, SchemaError> {
    match label_count {
        0..=256 => Ok(StorageType::U8),
        257..=65536 => Ok(StorageType::U16),
        n if n <= u32::MAX as usize => Ok(StorageType::U32),
        _ => Err(SchemaError::EnumOverflow {
            property: property.to_string(),
            label_count,
        }),
    }
}

fn flat_item_storage(item: &FlatItemType, property: &str) -> std::result::Result<StorageType, SchemaError> {
    match item {
        FlatItemType::Primitive(p) => Ok(p.storage()),
        FlatItemType::InternedString => Ok(StorageType::U32),
        FlatItemType::Enum { labels } => enum_width(labels.len(), property),
    }
}

/// Compile a designer schema into a [`ComponentInfo`].
pub fn compile_schema(name: &str, schema: &ComponentSchema) -> Result<ComponentInfo> {
    let mut columns = Vec::new();
    let mut representations = BTreeMap::new();
    let mut default_instance = DataMap::new();
    let mut write_program = SmallVec::new();
    let schema_keys: Vec<String> = schema.keys().cloned().collect();

    // schema.keys() from a BTreeMap already iterates in ascending order;
    // the implicit columns each property contributes are generated in the
    // same pass and so interleave correctly once the whole combined list
    // is re-sorted below.
    let mut column_order: Vec<(String, StorageType)> = Vec::new();

    for (property, ty) in schema.iter() {
        match ty {
            PropertyType::Primitive(p) => {
                column_order.push((property.clone(), p.storage()));
                representations.insert(
                    property.clone(),
                    Representation::Primitive {
                        storage: p.storage(),
                        is_bool: matches!(p, PrimitiveType::Bool),
                    },
                );
                default_instance.insert(
                    property.clone(),
                    if matches!(p, PrimitiveType::Bool) {
                        DataValue::Bool(false)
                    } else {
                        DataValue::Number(0.0)
                    },
                );
            }
            PropertyType::InternedString => {
                column_order.push((property.clone(), StorageType::U32));
                representations.insert(property.clone(), Representation::InternedString);
                default_instance.insert(property.clone(), DataValue::String(String::new()));
                write_program.push(Instruction::ProcessString {
                    property: property.clone(),
                });
            }
            PropertyType::Enum { labels } => {
                let width = enum_width(labels.len(), property)?;
                column_order.push((property.clone(), width));
                representations.insert(
                    property.clone(),
                    Representation::Enum {
                        labels: labels.clone(),
                        width,
                    },
                );
                default_instance.insert(
                    property.clone(),
                    labels
                        .first()
                        .map(|l| DataValue::String(l.clone()))
                        .unwrap_or(DataValue::Number(0.0)),
                );
                write_program.push(Instruction::ProcessEnum {
                    property: property.clone(),
                    labels: labels.clone(),
                });
            }
            PropertyType::Bitmask { flags } => {
                if flags.len() > 32 {
                    return Err(SchemaError::BitmaskOverflow {
                        property: property.clone(),
                        flag_count: flags.len(),
                    }
                    .into());
                }
                let width = bitmask_width(flags.len(), property)?;
                column_order.push((property.clone(), width));
                representations.insert(
                    property.clone(),
                    Representation::Bitmask {
                        flags: flags.clone(),
                        width,
                    },
                );
                default_instance.insert(property.clone(), DataValue::Array(Vec::new()));
                write_program.push(Instruction::ProcessBitmask {
                    property: property.clone(),
                    flags: flags.clone(),
                });
            }
            PropertyType::FlatArray { item, capacity } => {
                if *capacity == 0 {
                    return Err(SchemaError::ArrayCapacityInvalid {
                        property: property.clone(),
                        capacity: *capacity as i64,
                    }
                    .into());
                }
                let item_storage = flat_item_storage(item, property)?;
                let count_column = format!("{property}_count");
                let mut item_columns = Vec::with_capacity(*capacity);
                for i in 0..*capacity {
                    let col = format!("{property}{i}");
                    column_order.push((col.clone(), item_storage));
                    item_columns.push(col);
                }
                column_order.push((count_column.clone(), StorageType::U8));
                representations.insert(
                    property.clone(),
                    Representation::FlatArray {
                        item: (**item).clone(),
                        capacity: *capacity,
                        count_column: count_column.clone(),
                        item_columns: item_columns.clone(),
                    },
                );
                default_instance.insert(property.clone(), DataValue::Array(Vec::new()));
                write_program.push(Instruction::ProcessFlatArray {
                    property: property.clone(),
                    capacity: *capacity,
                    item: (**item).clone(),
                    count_column,
                });
            }
            PropertyType::PackedArray { item } => {
                let start_column = format!("{property}_startIndex");
                let length_column = format!("{property}_length");
                column_order.push((start_column.clone(), StorageType::U32));
                column_order.push((length_column.clone(), StorageType::U16));
                representations.insert(
                    property.clone(),
                    Representation::PackedArray {
                        item: *item,
                        start_column,
                        length_column,
                    },
                );
                default_instance.insert(property.clone(), DataValue::Array(Vec::new()));
                // Packed arrays aren't coerced through the write program:
                // the archetype table appends to the shared pool directly
                // (§4.4), since the pool lives outside any single row.
            }
            PropertyType::Rpn {
                formula_capacity,
                stream_capacity,
            } => {
                if *formula_capacity == 0 || *stream_capacity == 0 {
                    return Err(SchemaError::ArrayCapacityInvalid {
                        property: property.clone(),
                        capacity: if *formula_capacity == 0 {
                            *formula_capacity as i64
                        } else {
                            *stream_capacity as i64
                        },
                    }
                    .into());
                }
                let stream_base = format!("{property}_rpnStream");
                let starts_base = format!("{property}_formulaStarts");
                let lengths_base = format!("{property}_formulaLengths");

                let stream_count_column = format!("{stream_base}_count");
                let starts_count_column = format!("{starts_base}_count");
                let lengths_count_column = format!("{lengths_base}_count");

                let stream_columns: Vec<String> =
                    (0..*stream_capacity).map(|i| format!("{stream_base}{i}")).collect();
                let starts_columns: Vec<String> =
                    (0..*formula_capacity).map(|i| format!("{starts_base}{i}")).collect();
                let lengths_columns: Vec<String> =
                    (0..*formula_capacity).map(|i| format!("{lengths_base}{i}")).collect();

                for col in &stream_columns {
                    column_order.push((col.clone(), StorageType::F32));
                }
                column_order.push((stream_count_column.clone(), StorageType::U8));
                for col in &starts_columns {
                    column_order.push((col.clone(), StorageType::I16));
                }
                column_order.push((starts_count_column.clone(), StorageType::U8));
                for col in &lengths_columns {
                    column_order.push((col.clone(), StorageType::U8));
                }
                column_order.push((lengths_count_column.clone(), StorageType::U8));

                representations.insert(
                    property.clone(),
                    Representation::Rpn {
                        formula_capacity: *formula_capacity,
                        stream_capacity: *stream_capacity,
                        stream_columns: stream_columns.clone(),
                        stream_count_column: stream_count_column.clone(),
                        starts_columns: starts_columns.clone(),
                        starts_count_column: starts_count_column.clone(),
                        lengths_columns: lengths_columns.clone(),
                        lengths_count_column: lengths_count_column.clone(),
                    },
                );
                default_instance.insert(property.clone(), DataValue::Array(Vec::new()));
                write_program.push(Instruction::ProcessRpn {
                    property: property.clone(),
                    formula_capacity: *formula_capacity,
                    stream_capacity: *stream_capacity,
                    stream_columns,
                    stream_count_column,
                    starts_columns,
                    starts_count_column,
                    lengths_columns,
                    lengths_count_column,
                });
            }
        }
    }

    // Deterministic column order regardless of input order (§3 invariant):
    // sort the combined explicit + implicit key list ascending.
    column_order.sort_by(|a, b| a.0.cmp(&b.0));

    let mut byte_size = 0;
    for (col_name, storage) in column_order {
        byte_size += storage.byte_size();
        columns.push(StorageColumn {
            name: col_name,
            ty: storage,
        });
    }

    Ok(ComponentInfo {
        name: name.to_string(),
        byte_size,
        columns,
        schema_keys,
        representations,
        default_instance,
        write_program,
    })
}

fn process_flat_item(
    item: &FlatItemType,
    value: &DataValue,
    interner: &mut StringInterner,
) -> Result<f64> {
    match item {
        FlatItemType::Primitive(_) => value
            .as_f64()
            .ok_or_else(|| EcsError::InvalidValue {
                component: String::new(),
                property: String::new(),
                value: value.clone(),
                reason: "expected numeric array item".to_string(),
            }),
        FlatItemType::InternedString => {
            let s = value.as_str().unwrap_or("");
            Ok(interner.intern(s) as f64)
        }
        FlatItemType::Enum { labels } => match value {
            DataValue::String(s) => labels
                .iter()
                .position(|l| l == s)
                .map(|i| i as f64)
                .ok_or_else(|| EcsError::InvalidValue {
                    component: String::new(),
                    property: String::new(),
                    value: value.clone(),
                    reason: format!("unknown enum label '{s}'"),
                }),
            DataValue::Number(n) => Ok(*n),
            _ => Err(EcsError::InvalidValue {
                component: String::new(),
                property: String::new(),
                value: value.clone(),
                reason: "expected string or numeric enum value".to_string(),
            }),
        },
    }
}

/// Execute a component's write program against designer data already
/// merged with defaults, turning it into storage-ready primitives keyed
/// by the concrete column names in [`ComponentInfo::columns`].
///
/// `data` is consumed and returned transformed: scalar properties are
/// replaced in place with their numeric storage form, array/RPN
/// properties are replaced by their generated sub-columns, and the
/// original array-valued key is removed.
pub fn run_write_program(
    info: &ComponentInfo,
    mut data: DataMap,
    interner: &StringInterner,
    rpn_parser: &dyn RpnParser,
) -> Result<DataMap> {
    for instruction in &info.write_program {
        match instruction {
            Instruction::ProcessEnum { property, labels } => {
                let Some(value) = data.get(property) else { continue };
                let replaced = match value {
                    DataValue::String(s) => {
                        let idx = labels.iter().position(|l| l == s).ok_or_else(|| {
                            EcsError::InvalidValue {
                                component: info.name.clone(),
                                property: property.clone(),
                                value: value.clone(),
                                reason: format!("unknown enum label '{s}'"),
                            }
                        })?;
                        DataValue::Number(idx as f64)
                    }
                    DataValue::Number(n) => DataValue::Number(*n),
                    other => {
                        return Err(EcsError::InvalidValue {
                            component: info.name.clone(),
                            property: property.clone(),
                            value: other.clone(),
                            reason: "expected string label or numeric index".to_string(),
                        });
                    }
                };
                data.insert(property.clone(), replaced);
            }
            Instruction::ProcessBitmask { property, flags } => {
                let Some(value) = data.get(property) else { continue };
                let replaced = match value {
                    DataValue::Array(items) => {
                        let mut bits: u32 = 0;
                        for item in items {
                            let label = item.as_str().ok_or_else(|| EcsError::InvalidValue {
                                component: info.name.clone(),
                                property: property.clone(),
                                value: item.clone(),
                                reason: "bitmask flag must be a string label".to_string(),
                            })?;
                            let idx = flags.iter().position(|f| f == label).ok_or_else(|| {
                                EcsError::InvalidValue {
                                    component: info.name.clone(),
                                    property: property.clone(),
                                    value: item.clone(),
                                    reason: format!("unknown bitmask flag '{label}'"),
                                }
                            })?;
                            bits |= 1 << idx;
                        }
                        DataValue::Number(bits as f64)
                    }
                    DataValue::Number(n) => DataValue::Number(*n),
                    other => {
                        return Err(EcsError::InvalidValue {
                            component: info.name.clone(),
                            property: property.clone(),
                            value: other.clone(),
                            reason: "expected a list of flag labels".to_string(),
                        });
                    }
                };
                data.insert(property.clone(), replaced);
            }
            Instruction::ProcessString { property } => {
                let handle = match data.get(property) {
                    Some(DataValue::String(s)) => interner.intern(s),
                    Some(DataValue::Null) | None => 0,
                    Some(other) => {
                        return Err(EcsError::InvalidValue {
                            component: info.name.clone(),
                            property: property.clone(),
                            value: other.clone(),
                            reason: "expected a string".to_string(),
                        });
                    }
                };
                data.insert(property.clone(), DataValue::Number(handle as f64));
            }
            Instruction::ProcessFlatArray {
                property,
                capacity,
                item,
                count_column,
            } => {
                let items: Vec<DataValue> = match data.get(property) {
                    Some(DataValue::Array(items)) => items.clone(),
                    Some(DataValue::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(EcsError::InvalidValue {
                            component: info.name.clone(),
                            property: property.clone(),
                            value: other.clone(),
                            reason: "expected an array".to_string(),
                        });
                    }
                };
                let live = items.len().min(*capacity);
                for i in 0..*capacity {
                    let col = format!("{property}{i}");
                    let value = if i < live {
                        process_flat_item(item, &items[i], interner).map_err(|e| {
                            retarget_invalid_value(e, &info.name, property)
                        })?
                    } else {
                        0.0
                    };
                    data.insert(col, DataValue::Number(value));
                }
                data.insert(count_column.clone(), DataValue::Number(live as f64));
                data.remove(property);
            }
            Instruction::ProcessRpn {
                property,
                formula_capacity,
                stream_capacity,
                stream_columns,
                stream_count_column,
                starts_columns,
                starts_count_column,
                lengths_columns,
                lengths_count_column,
            } => {
                let formulas: Vec<String> = match data.get(property) {
                    Some(DataValue::Array(items)) => items
                        .iter()
                        .map(|v| v.as_str().unwrap_or("").to_string())
                        .collect(),
                    Some(DataValue::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(EcsError::InvalidValue {
                            component: info.name.clone(),
                            property: property.clone(),
                            value: other.clone(),
                            reason: "expected an array of formula strings".to_string(),
                        });
                    }
                };

                let live_formulas = formulas.len().min(*formula_capacity);
                let mut stream: Vec<f32> = Vec::new();
                let mut starts = vec![-1i32; *formula_capacity];
                let mut lengths = vec![0u8; *formula_capacity];

                for i in 0..live_formulas {
                    let opcodes = rpn_parser.parse(&formulas[i])?;
                    let remaining = stream_capacity.saturating_sub(stream.len());
                    let take = opcodes.len().min(remaining);
                    if take > 0 {
                        starts[i] = stream.len() as i32;
                        lengths[i] = take as u8;
                        stream.extend_from_slice(&opcodes[..take]);
                    }
                }

                for (i, col) in stream_columns.iter().enumerate() {
                    let value = stream.get(i).copied().unwrap_or(0.0);
                    data.insert(col.clone(), DataValue::Number(value as f64));
                }
                data.insert(
                    stream_count_column.clone(),
                    DataValue::Number(stream.len() as f64),
                );

                for (i, col) in starts_columns.iter().enumerate() {
                    data.insert(col.clone(), DataValue::Number(starts[i] as f64));
                }
                data.insert(
                    starts_count_column.clone(),
                    DataValue::Number(live_formulas as f64),
                );

                for (i, col) in lengths_columns.iter().enumerate() {
                    data.insert(col.clone(), DataValue::Number(lengths[i] as f64));
                }
                data.insert(
                    lengths_count_column.clone(),
                    DataValue::Number(live_formulas as f64),
                );

                data.remove(property);
            }
        }
    }
    Ok(data)
}

fn retarget_invalid_value(err: EcsError, component: &str, property: &str) -> EcsError {
    match err {
        EcsError::InvalidValue { value, reason, .. } => EcsError::InvalidValue {
            component: component.to_string(),
            property: property.to_string(),
            value,
            reason,
        },
        other => other,
    }
}

/// Expand shorthand scalar designer data (§4.2) into a full data map.
///
/// Tag components (empty schema) reject shorthand scalars outright.
pub fn normalize_designer_data(info: &ComponentInfo, raw: DataValue) -> Result<DataMap> {
    match raw {
        DataValue::Object(map) => Ok(map),
        DataValue::Null => Ok(DataMap::new()),
        scalar if scalar.is_scalar() => {
            let Some(property) = info.shorthand_property() else {
                return Err(EcsError::InvalidSchema(SchemaError::ShorthandOnTagComponent {
                    component: info.name.clone(),
                }));
            };
            let mut map = DataMap::new();
            map.insert(property.to_string(), scalar);
            Ok(map)
        }
        other => Err(EcsError::InvalidValue {
            component: info.name.clone(),
            property: String::new(),
            value: other,
            reason: "expected an object, a shorthand scalar, or null".to_string(),
        }),
    }
}

/// Merge designer-supplied overrides over a component's default instance,
/// producing a full property map ready for [`run_write_program`].
pub fn merge_with_defaults(info: &ComponentInfo, overrides: &DataMap) -> DataMap {
    let mut merged = info.default_instance.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Decode one original schema property back from its processed storage
/// values, inverting the write program (§4.2 "read program").
///
/// `column_value` fetches a processed value for a concrete storage column
/// name. `Rpn` formulas are lossy on read: the compiled opcode stream
/// can't be un-parsed back into formula source text, so the reconstructed
/// value is the raw `{stream, starts, lengths}` triple instead.
pub fn decode_property(
    property: &str,
    representation: &Representation,
    mut column_value: impl FnMut(&str) -> DataValue,
    interner: &StringInterner,
) -> DataValue {
    match representation {
        Representation::Primitive { is_bool, .. } => {
            // Primitive/string/enum/bitmask properties have no implicit
            // sub-columns: the column is named after the property itself.
            let raw = column_value(property);
            if *is_bool {
                DataValue::Bool(raw.as_f64().unwrap_or(0.0) != 0.0)
            } else {
                raw
            }
        }
        Representation::InternedString => {
            let handle = column_value(property).as_f64().unwrap_or(0.0) as u32;
            DataValue::String(interner.get(handle).unwrap_or_default())
        }
        Representation::Enum { labels, .. } => {
            let idx = column_value(property).as_f64().unwrap_or(0.0) as usize;
            labels
                .get(idx)
                .map(|l| DataValue::String(l.clone()))
                .unwrap_or(DataValue::Number(idx as f64))
        }
        Representation::Bitmask { flags, .. } => {
            let bits = column_value(property).as_f64().unwrap_or(0.0) as u32;
            let mut out = Vec::new();
            for (i, flag) in flags.iter().enumerate() {
                if bits & (1 << i) != 0 {
                    out.push(DataValue::String(flag.clone()));
                }
            }
            DataValue::Array(out)
        }
        Representation::FlatArray {
            item,
            item_columns,
            count_column,
            ..
        } => {
            let count = column_value(count_column).as_f64().unwrap_or(0.0) as usize;
            let mut out = Vec::with_capacity(count);
            for col in item_columns.iter().take(count) {
                let raw = column_value(col);
                out.push(decode_flat_item(item, raw, interner));
            }
            DataValue::Array(out)
        }
        Representation::PackedArray { .. } => {
            // Packed array contents live in the archetype's shared pool;
            // the archetype table reconstructs these directly since this
            // function only sees per-row column values.
            DataValue::Array(Vec::new())
        }
        Representation::Rpn {
            stream_columns,
            stream_count_column,
            starts_columns,
            starts_count_column,
            lengths_columns,
            lengths_count_column,
            ..
        } => {
            let stream_count = column_value(stream_count_column).as_f64().unwrap_or(0.0) as usize;
            let stream: Vec<DataValue> = stream_columns
                .iter()
                .take(stream_count)
                .map(|c| column_value(c))
                .collect();
            let formula_count = column_value(starts_count_column).as_f64().unwrap_or(0.0) as usize;
            let starts: Vec<DataValue> = starts_columns
                .iter()
                .take(formula_count)
                .map(|c| column_value(c))
                .collect();
            let lengths_count = column_value(lengths_count_column).as_f64().unwrap_or(0.0) as usize;
            let lengths: Vec<DataValue> = lengths_columns
                .iter()
                .take(lengths_count)
                .map(|c| column_value(c))
                .collect();
            let mut obj = DataMap::new();
            obj.insert("rpnStream".to_string(), DataValue::Array(stream));
            obj.insert("formulaStarts".to_string(), DataValue::Array(starts));
            obj.insert("formulaLengths".to_string(), DataValue::Array(lengths));
            DataValue::Object(obj)
        }
    }
}

fn decode_flat_item(item: &FlatItemType, raw: DataValue, interner: &StringInterner) -> DataValue {
    match item {
        FlatItemType::Primitive(_) => raw,
        FlatItemType::InternedString => {
            let handle = raw.as_f64().unwrap_or(0.0) as u32;
            DataValue::String(interner.get(handle).unwrap_or_default())
        }
        FlatItemType::Enum { labels } => {
            let idx = raw.as_f64().unwrap_or(0.0) as usize;
            labels
                .get(idx)
                .map(|l| DataValue::String(l.clone()))
                .unwrap_or(DataValue::Number(idx as f64))
        }
    }
}
