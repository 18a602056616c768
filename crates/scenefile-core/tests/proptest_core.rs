//! Property-based tests for the scenefile core.
//!
//! Uses proptest to generate random chunks, version windows and object
//! graphs, then verify the laws the loader and saver rely on.

use proptest::prelude::*;
use scenefile_core::chunk::Chunk;
use scenefile_core::class::ClassHierarchy;
use scenefile_core::id::*;
use scenefile_core::pipeline::ObjectPipeline;
use scenefile_core::registry::SchemaRegistryBuilder;
use scenefile_core::save::{SaveOptions, save_to_bytes};
use scenefile_core::schema::{ScalarKind, SchemaType};
use scenefile_core::state::ClassState;
use scenefile_core::test_utils::*;
use std::collections::HashSet;

// ===========================================================================
// Generators
// ===========================================================================

/// One write through the chunk cursor.
#[derive(Debug, Clone)]
enum WriteOp {
    Dword(u32),
    Int(i32),
    Float(f32),
    Object(u32),
    Sequence(Vec<u32>),
    ManagerInt(u32, i32),
    Text(Option<String>),
    Sub(u8, Vec<u32>, Vec<u32>),
}

fn arb_write_op() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        any::<u32>().prop_map(WriteOp::Dword),
        any::<i32>().prop_map(WriteOp::Int),
        (-1.0e6f32..1.0e6).prop_map(WriteOp::Float),
        any::<u32>().prop_map(WriteOp::Object),
        proptest::collection::vec(any::<u32>(), 0..8).prop_map(WriteOp::Sequence),
        (any::<u32>(), any::<i32>()).prop_map(|(g, v)| WriteOp::ManagerInt(g, v)),
        proptest::option::of("[a-z]{0,12}").prop_map(WriteOp::Text),
        (
            any::<u8>(),
            proptest::collection::vec(any::<u32>(), 0..6),
            proptest::collection::vec(any::<u32>(), 0..3),
        )
            .prop_map(|(class, words, ids)| WriteOp::Sub(class, words, ids)),
    ]
}

fn build_chunk(class: u8, data_version: u8, ops: &[WriteOp]) -> Chunk {
    let mut chunk = Chunk::new(ClassId(class as u32), data_version);
    {
        let mut w = chunk.start_write();
        for op in ops {
            match op {
                WriteOp::Dword(v) => w.write_dword(*v),
                WriteOp::Int(v) => w.write_int(*v),
                WriteOp::Float(v) => w.write_float(*v),
                WriteOp::Object(id) => w.write_object_id(ObjectId(*id)),
                WriteOp::Sequence(ids) => {
                    let ids: Vec<ObjectId> = ids.iter().map(|&i| ObjectId(i)).collect();
                    w.write_object_sequence(&ids);
                }
                WriteOp::ManagerInt(g, v) => w.write_manager_int(Guid::new(*g, 1), *v),
                WriteOp::Text(s) => w.write_string(s.as_deref()),
                WriteOp::Sub(class, words, ids) => {
                    let mut sub = Chunk::new(ClassId(*class as u32), 0);
                    {
                        let mut sw = sub.start_write();
                        sw.write_raw_words(words);
                        for &id in ids {
                            sw.write_object_id(ObjectId(id));
                        }
                    }
                    w.write_sub_chunk(sub);
                }
            }
        }
    }
    chunk
}

/// A group graph of `n` groups with random member edges.
fn arb_graph(max: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1..=max).prop_flat_map(|n| {
        (
            Just(n),
            proptest::collection::vec((0..n, 0..n), 0..(n * 2)),
        )
    })
}

// ===========================================================================
// Chunk laws
// ===========================================================================

proptest! {
    #[test]
    fn chunk_round_trip(
        class in any::<u8>(),
        data_version in any::<u8>(),
        ops in proptest::collection::vec(arb_write_op(), 0..24),
    ) {
        let chunk = build_chunk(class, data_version, &ops);
        let bytes = chunk.to_bytes();
        prop_assert_eq!(bytes.len(), chunk.serialized_len());
        let back = Chunk::from_bytes(&bytes).unwrap();
        prop_assert_eq!(back.class_id(), chunk.class_id());
        prop_assert_eq!(back.data_version(), chunk.data_version());
        prop_assert_eq!(back.chunk_version(), chunk.chunk_version());
        prop_assert_eq!(back.options(), chunk.options());
        prop_assert_eq!(back.words(), chunk.words());
        prop_assert_eq!(back.id_list(), chunk.id_list());
        prop_assert_eq!(back.sub_chunks(), chunk.sub_chunks());
        prop_assert_eq!(back.manager_list(), chunk.manager_list());
    }

    #[test]
    fn sections_read_in_any_order(
        values in proptest::collection::vec(any::<u32>(), 4),
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
    ) {
        let tags = [0x10u32, 0x20, 0x40, 0x80];
        let mut chunk = Chunk::new(ClassId::OBJECT, 0);
        {
            let mut w = chunk.start_write();
            for &i in &order {
                w.write_identifier(tags[i]);
                w.write_dword(values[i]);
            }
        }
        let mut r = chunk.reader();
        for i in (0..4).rev() {
            prop_assert!(r.seek_identifier(tags[i]));
            prop_assert_eq!(r.read_dword().unwrap(), values[i]);
        }
        prop_assert!(!r.seek_identifier(0x100));
    }
}

// ===========================================================================
// Hostile identifier chains
// ===========================================================================

const CHAIN_TAGS: [u32; 6] = [0x10, 0x18, 0x1000, 0x4000, 0x0010_0000, 0x0055_0000];

/// Payload words biased towards known tags and small links, so chains are
/// often almost well-formed.
fn arb_chain_word() -> impl Strategy<Value = u32> {
    prop_oneof![
        proptest::sample::select(CHAIN_TAGS.to_vec()),
        0u32..24,
        any::<u32>(),
    ]
}

proptest! {
    #[test]
    fn arbitrary_links_never_panic(
        words in proptest::collection::vec(arb_chain_word(), 0..24),
        subs in 0usize..3,
        seeks in proptest::collection::vec(proptest::sample::select(CHAIN_TAGS.to_vec()), 0..6),
    ) {
        let mut chunk = raw_chunk(&[]);
        {
            let mut w = chunk.start_write();
            w.write_raw_words(&words);
        }
        let mut with_subs = Chunk::new(ClassId::GROUP, 0);
        {
            let mut w = with_subs.start_write();
            w.write_raw_words(&words);
            for _ in 0..subs {
                w.write_sub_chunk(raw_chunk(&[1]));
            }
        }

        for c in [&chunk, &with_subs] {
            let mut r = c.reader();
            for &tag in &seeks {
                if let Some(size) = r.seek_identifier_with_size(tag) {
                    prop_assert!(size <= c.words().len());
                    let _ = r.read_dword();
                    let _ = r.read_sub_chunk();
                }
            }
            if let Some(sections) = r.identifier_sections() {
                for s in &sections {
                    prop_assert!(s.offset + 2 + s.len <= c.words().len());
                }
            }
            for p in r.unvisited_sections() {
                prop_assert!(p.words.len() <= c.words().len());
                prop_assert!(p.sub_chunks.len() <= c.sub_chunks().len());
            }
        }

        let registry = registry();
        let pipeline = ObjectPipeline::new(&registry);
        for class in [ClassId::OBJECT, ClassId::GROUP, ClassId::BEHAVIOR, ClassId::PARAMETER_OUT] {
            if let Ok(state) = pipeline.deserialize(class, &with_subs) {
                let _ = pipeline.serialize(class, &state);
            }
        }
    }
}

// ===========================================================================
// Version compatibility
// ===========================================================================

proptest! {
    #[test]
    fn version_compatibility_law(
        since in 0u32..12,
        span in 0u32..12,
        bounded in any::<bool>(),
        version in 0u32..30,
    ) {
        let removed = if bounded { since + span + 1 } else { 0 };
        let ty = SchemaType::scalar("Widget", ScalarKind::Int)
            .since(since)
            .removed(removed);
        let expected = (since == 0 || version >= since) && (removed == 0 || version < removed);
        prop_assert_eq!(ty.is_compatible(version), expected);

        let mut builder = SchemaRegistryBuilder::new();
        builder.register(ty).unwrap();
        let registry = builder.build().unwrap();
        prop_assert_eq!(registry.find_for_version("Widget", version).is_some(), expected);
    }
}

// ===========================================================================
// Class hierarchy
// ===========================================================================

#[test]
fn hierarchy_is_antisymmetric() {
    let hierarchy = ClassHierarchy::legacy();
    let ids: Vec<ClassId> = hierarchy.iter().map(|e| e.id).collect();
    for &a in &ids {
        assert!(hierarchy.is_derived_from(a, a));
        for &b in &ids {
            if a != b {
                assert!(
                    !(hierarchy.is_derived_from(a, b) && hierarchy.is_derived_from(b, a)),
                    "{a:?} and {b:?} derive from each other"
                );
            }
        }
    }
}

// ===========================================================================
// Remap laws
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn load_mapping_is_a_bijection(
        file_ids in proptest::collection::hash_set(0u32..1_000_000, 1..24),
    ) {
        let names: Vec<String> = (0..file_ids.len()).map(|i| format!("o{i}")).collect();
        let objects: Vec<(u32, &str, &[u32])> = file_ids
            .iter()
            .zip(&names)
            .map(|(&id, name)| (id, name.as_str(), &[][..]))
            .collect();
        let (session, report) = reload(&group_file(&objects));

        prop_assert_eq!(report.mapping.len(), file_ids.len());
        let mut runtimes = HashSet::new();
        for &file in &file_ids {
            let runtime = report.runtime_id(ObjectId(file));
            prop_assert!(runtime.is_some());
            let runtime = runtime.unwrap();
            prop_assert!(session.repository().contains(runtime));
            prop_assert!(runtimes.insert(runtime), "runtime {} assigned twice", runtime);
        }
    }

    #[test]
    fn save_is_deterministic((n, edges) in arb_graph(12)) {
        let mut session = session();
        let ids: Vec<ObjectId> = (0..n)
            .map(|i| add_group(&mut session, &format!("g{i}"), &[]))
            .collect();
        for &(from, to) in &edges {
            if let ClassState::Group(g) = &mut session.object_mut(ids[from]).unwrap().state.class {
                g.members.push(ids[to]);
            }
        }
        let first = save_to_bytes(&mut session, &ids[..1], &SaveOptions::default()).unwrap();
        let second = save_to_bytes(&mut session, &ids[..1], &SaveOptions::default()).unwrap();
        prop_assert_eq!(first, second);

        let full = save_to_bytes(&mut session, &ids, &SaveOptions::default()).unwrap();
        let again = save_to_bytes(&mut session, &ids, &SaveOptions::default()).unwrap();
        prop_assert_eq!(full, again);
    }
}
