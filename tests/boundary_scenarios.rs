//! Boundary scenarios from the data engine specification: registry and
//! archetype table overflow, tag-component shorthand rejection, and
//! bitmask width overflow.

use archetype_data_engine::prelude::*;

fn one_field_schema() -> ComponentSchema {
    let mut s = ComponentSchema::new();
    s.insert("v".to_string(), PropertyType::Primitive(PrimitiveType::I32));
    s
}

#[test]
fn registering_past_max_components_errors_at_the_overflow_call() {
    let mut world = World::new();
    for i in 0..archetype_data_engine::MAX_COMPONENTS {
        world.register_component(&format!("C{i}"), &one_field_schema()).unwrap();
    }
    let err = world.register_component("Overflow", &one_field_schema()).unwrap_err();
    assert!(matches!(err, EcsError::TooManyComponentTypes));
}

#[test]
fn exceeding_max_archetypes_errors_only_on_the_overflow_mask() {
    // 13 components have 2^13 = 8192 distinct masks (including the empty
    // one archetype 0 already owns), comfortably more than the default
    // MAX_ARCHETYPES of 4096 — enough to fill the table via distinct
    // *subsets* of a small component set rather than registering
    // thousands of component types (bounded by MAX_COMPONENTS = 256).
    let mut world = World::new();
    let mut ctids = Vec::new();
    for i in 0..13 {
        ctids.push(world.register_component(&format!("C{i}"), &one_field_schema()).unwrap());
    }

    // Archetype 0 (the empty mask) already exists; fill the remaining
    // MAX_ARCHETYPES - 1 slots with distinct non-empty subsets.
    let mut created = 1usize;
    let mut subset: u32 = 1;
    while created < archetype_data_engine::MAX_ARCHETYPES {
        let components: Vec<(String, DataValue)> = (0..13)
            .filter(|bit| subset & (1 << bit) != 0)
            .map(|bit| (world.registry().get_name(ctids[bit]).unwrap().to_string(), DataValue::Null))
            .collect();
        world.spawn(components);
        world.flush().unwrap();
        created += 1;
        subset += 1;
    }
    assert_eq!(world.archetype_table().len(), archetype_data_engine::MAX_ARCHETYPES);

    // One more distinct mask now overflows the table. A failed archetype
    // allocation during a flush is fatal (§4.7) and propagates out.
    let components: Vec<(String, DataValue)> = (0..13)
        .filter(|bit| subset & (1 << bit) != 0)
        .map(|bit| (world.registry().get_name(ctids[bit]).unwrap().to_string(), DataValue::Null))
        .collect();
    world.spawn(components);
    let err = world.flush().unwrap_err();
    assert!(matches!(err, EcsError::TooManyArchetypes));
}

#[test]
fn empty_schema_is_a_tag_that_rejects_shorthand_scalars_at_the_schema_layer() {
    let info = archetype_data_engine::schema::compile_schema("Marker", &ComponentSchema::new()).unwrap();
    assert!(info.is_tag());

    // §8: "Empty component schema ⇒ tag component; any shorthand scalar
    // data ⇒ InvalidSchema" — the schema layer itself rejects a scalar.
    let err = archetype_data_engine::schema::normalize_designer_data(&info, DataValue::Number(1.0)).unwrap_err();
    assert!(matches!(
        err,
        EcsError::InvalidSchema(SchemaError::ShorthandOnTagComponent { .. })
    ));

    // `Null`/an empty object are both fine for a tag with no properties.
    assert!(archetype_data_engine::schema::normalize_designer_data(&info, DataValue::Null).is_ok());

    // Through the command buffer, a per-command `InvalidSchema` during
    // write-program execution is logged and skipped per §7's per-entity
    // error policy — a tag has no columns to write either way, so the
    // entity is still created in the tag's archetype.
    let mut world = World::new();
    world.register_component("Marker", &ComponentSchema::new()).unwrap();
    world.spawn(vec![("Marker".to_string(), DataValue::Number(1.0))]);
    world.flush().unwrap();

    let descriptor = QueryDescriptor::new().with(world.component_id("Marker").unwrap());
    let handle = world.query(&descriptor);
    assert_eq!(world.iter_query(handle).len(), 1);
    world.release_query(handle);
}

#[test]
fn bitmask_with_33_flags_fails_to_compile() {
    let mut world = World::new();
    let mut schema = ComponentSchema::new();
    let flags: Vec<String> = (0..33).map(|i| format!("flag{i}")).collect();
    schema.insert("flags".to_string(), PropertyType::Bitmask { flags });

    let err = world.register_component("TooManyFlags", &schema).unwrap_err();
    assert!(matches!(
        err,
        EcsError::InvalidSchema(SchemaError::BitmaskOverflow { flag_count: 33, .. })
    ));
}
