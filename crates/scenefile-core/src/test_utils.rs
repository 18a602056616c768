//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

#![allow(clippy::expect_used)]

use crate::chunk::Chunk;
use crate::format::{
    CURRENT_FILE_VERSION, DirectoryEntry, Header1, ObjectFrame, WriteParams, write_file,
};
use crate::id::{ClassId, Guid, ObjectId};
use crate::load::{LoadOptions, LoadReport, load_bytes};
use crate::object::ObjectFlags;
use crate::pipeline::ObjectPipeline;
use crate::registry::{SchemaRegistry, SchemaRegistryBuilder};
use crate::save::{SaveOptions, save_to_bytes};
use crate::schema::{FieldDesc, SchemaType, Value};
use crate::session::Session;
use crate::state::{
    Attribute, BehaviorState, ClassState, GroupState, LevelValue, ObjectState, ParamValue,
    ParameterState,
};
use std::sync::Arc;

/// Section tag of the generic sound level registered by [`sound_registry`].
pub const SOUND_LEVEL_TAG: u32 = 0x0090_0000;

// ===========================================================================
// Sessions
// ===========================================================================

pub fn session() -> Session {
    Session::with_builtins().expect("builtin registry")
}

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin().expect("builtin registry")
}

/// The builtins plus a generically marshaled `Sound` level contributed by
/// `plugin`.
pub fn sound_registry(plugin: Guid) -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistryBuilder::with_builtins().expect("builtin registry");
    builder
        .register(
            SchemaType::structure(
                "SoundLevel",
                vec![
                    FieldDesc::new("volume", "Float"),
                    FieldDesc::new("source", "ObjectId"),
                ],
            )
            .for_class(ClassId::SOUND, SOUND_LEVEL_TAG)
            .from_plugin(plugin),
        )
        .expect("register sound level");
    Arc::new(builder.build().expect("build registry"))
}

pub fn uncompressed() -> SaveOptions {
    SaveOptions {
        compress: false,
        ..SaveOptions::default()
    }
}

// ===========================================================================
// State constructors
// ===========================================================================

pub fn group_state(members: &[ObjectId]) -> ObjectState {
    ObjectState {
        class: ClassState::Group(GroupState {
            members: members.to_vec(),
        }),
        ..Default::default()
    }
}

pub fn graph_state(sub_behaviors: &[ObjectId]) -> ObjectState {
    ObjectState {
        class: ClassState::Behavior(BehaviorState {
            sub_behaviors: sub_behaviors.to_vec(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// State of a sound object for [`sound_registry`].
pub fn sound_state(volume: f32, source: ObjectId) -> ObjectState {
    let mut state = ObjectState::default();
    state.behavioral_mut();
    state.levels.push(LevelValue {
        class_id: ClassId::SOUND,
        value: Value::Struct(vec![
            ("volume".into(), Value::Float(volume)),
            ("source".into(), Value::Object(source)),
        ]),
    });
    state
}

pub fn int_param_state(value: i32) -> ObjectState {
    ObjectState {
        class: ClassState::Parameter(ParameterState {
            type_guid: crate::builtin::PARAM_INT,
            value: ParamValue::Typed(Value::Int(value)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ===========================================================================
// Session builders
// ===========================================================================

/// Add a group holding `members`.
pub fn add_group(session: &mut Session, name: &str, members: &[ObjectId]) -> ObjectId {
    session.create_object(ClassId::GROUP, Some(name), group_state(members))
}

/// Two groups that list each other as members.
pub fn add_cycle(session: &mut Session) -> (ObjectId, ObjectId) {
    let a = add_group(session, "a", &[]);
    let b = add_group(session, "b", &[a]);
    if let Some(object) = session.object_mut(a) {
        object.state = group_state(&[b]);
    }
    (a, b)
}

/// A behavior graph with one building block, one parameter attached as an
/// attribute, and a group listing all three.
pub fn add_scene(session: &mut Session) -> Vec<ObjectId> {
    let block = session.create_object(
        ClassId::BEHAVIOR,
        Some("block"),
        ObjectState {
            class: ClassState::Behavior(BehaviorState {
                block: Some((Guid::new(0x1234, 0x5678), 1)),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let graph = session.create_object(ClassId::BEHAVIOR, Some("graph"), graph_state(&[block]));
    let param = session.create_object(
        ClassId::PARAMETER_OUT,
        Some("speed"),
        int_param_state(7),
    );
    let mut holder = group_state(&[graph, block, param]);
    holder.behavioral_mut().scripts = vec![graph];
    holder.behavioral_mut().attributes = vec![Attribute {
        attribute_type: 0,
        parameter: param,
    }];
    let group = session.create_object(ClassId::GROUP, Some("scene"), holder);
    vec![group, graph, block, param]
}

// ===========================================================================
// Files
// ===========================================================================

/// Save `objects` uncompressed.
pub fn save(session: &mut Session, objects: &[ObjectId]) -> Vec<u8> {
    save_to_bytes(session, objects, &uncompressed()).expect("save")
}

/// Load `bytes` into a fresh session.
pub fn reload(bytes: &[u8]) -> (Session, LoadReport) {
    let mut session = session();
    let report = load_bytes(&mut session, bytes, &LoadOptions::default()).expect("load");
    (session, report)
}

/// A file whose directory uses the given file IDs. Each object is a group
/// whose member list holds file IDs verbatim.
pub fn group_file(objects: &[(u32, &str, &[u32])]) -> Vec<u8> {
    let registry = registry();
    let pipeline = ObjectPipeline::new(&registry);
    let mut header1 = Header1::default();
    let mut chunks: Vec<(ObjectId, Chunk)> = Vec::new();
    for &(file_id, name, members) in objects {
        header1.objects.push(DirectoryEntry {
            file_id: ObjectId(file_id),
            class_id: ClassId::GROUP,
            flags: ObjectFlags::NONE,
            name: Some(name.to_owned()),
        });
        let ids: Vec<ObjectId> = members.iter().map(|&m| ObjectId(m)).collect();
        let chunk = pipeline
            .serialize(ClassId::GROUP, &group_state(&ids))
            .expect("serialize group");
        chunks.push((ObjectId(file_id), chunk));
    }
    let frames: Vec<ObjectFrame<'_>> = chunks
        .iter()
        .map(|(file_id, chunk)| ObjectFrame {
            file_id: *file_id,
            chunk: Some(chunk),
        })
        .collect();
    let params = WriteParams {
        file_version: CURRENT_FILE_VERSION,
        compress: false,
        compression_level: 0,
        max_id_saved: objects.iter().map(|o| o.0).max().unwrap_or(0),
    };
    write_file(&header1, &[], &frames, &params).expect("write file")
}

/// A chunk whose payload is `words`, with no identifier structure.
pub fn raw_chunk(words: &[u32]) -> Chunk {
    let mut chunk = Chunk::new(ClassId(0), 0);
    {
        let mut w = chunk.start_write();
        for &word in words {
            w.write_dword(word);
        }
    }
    chunk
}
