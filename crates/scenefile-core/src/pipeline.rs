//! The object pipeline: class-chain dispatch from chunks to layered object
//! state and back.
//!
//! For an object of class `C` the pipeline resolves the chain root-to-leaf
//! through the class hierarchy and visits each level in order against one
//! shared cursor. A level whose schema type carries [`TypeOps`] is read by
//! its `read` function; a level bound to a section tag without ops is
//! marshaled generically into a [`LevelValue`]; a level with no registered
//! type contributes nothing. Identifier sections no level sought are kept
//! on the state and re-emitted after the known sections on write.
//!
//! [`TypeOps`]: crate::schema::TypeOps

use crate::chunk::{Chunk, ChunkError};
use crate::class::ClassHierarchy;
use crate::cursor::{ChunkReader, ChunkWriter, DEFAULT_SEQUENCE_LIMIT};
use crate::error::ErrorKind;
use crate::id::{ClassId, ObjectId};
use crate::registry::{RegistryError, SchemaRegistry};
use crate::repository::Repository;
use crate::schema::SchemaType;
use crate::state::{LevelValue, ManagerAttachment, ObjectState};

/// Section holding per-object manager attachments, written after every
/// class level.
pub const ATTACHMENTS_TAG: u32 = 0x7f00_0000;

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Handed to every level's `read` function.
#[derive(Debug, Clone, Copy)]
pub struct ReadContext<'a> {
    pub registry: &'a SchemaRegistry,
    /// Leaf class of the object being read.
    pub class_id: ClassId,
    /// File format version the chunk was written with.
    pub file_version: u32,
    /// Producer-defined version stored in the chunk header.
    pub data_version: u8,
}

/// Handed to every level's `write` function.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub class_id: ClassId,
    pub file_version: u32,
}

/// Handed to finalizers once every object of a load has been read.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub hierarchy: ClassHierarchy<'static>,
    pub repository: &'a Repository,
    pub object: ObjectId,
    pub class_id: ClassId,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("class {0:?} is not part of the class hierarchy")]
    UnknownClass(ClassId),
    #[error("{level} level requires section 0x{tag:08x}")]
    MissingSection { level: &'static str, tag: u32 },
    #[error("{level} level: {reason}")]
    Invalid { level: &'static str, reason: String },
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("in {level} level")]
    Level {
        level: String,
        #[source]
        source: Box<ObjectError>,
    },
}

impl ObjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ObjectError::UnknownClass(_) => ErrorKind::NotFound,
            ObjectError::MissingSection { .. } | ObjectError::Invalid { .. } => {
                ErrorKind::Validation
            }
            ObjectError::Chunk(e) => e.kind(),
            ObjectError::Registry(e) => e.kind(),
            ObjectError::Level { source, .. } => source.kind(),
        }
    }

    fn in_level(self, ty: &SchemaType) -> Self {
        ObjectError::Level {
            level: ty.name.clone(),
            source: Box::new(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ObjectPipeline<'r> {
    registry: &'r SchemaRegistry,
    hierarchy: ClassHierarchy<'static>,
    file_version: u32,
    sequence_limit: usize,
}

impl<'r> ObjectPipeline<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            hierarchy: ClassHierarchy::legacy(),
            file_version: crate::format::CURRENT_FILE_VERSION,
            sequence_limit: DEFAULT_SEQUENCE_LIMIT,
        }
    }

    pub fn with_file_version(mut self, version: u32) -> Self {
        self.file_version = version;
        self
    }

    pub fn with_sequence_limit(mut self, limit: usize) -> Self {
        self.sequence_limit = limit;
        self
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn hierarchy(&self) -> ClassHierarchy<'static> {
        self.hierarchy
    }

    /// The schema types of `class_id`'s chain, root first. Levels without a
    /// registered type are omitted.
    fn levels(&self, class_id: ClassId) -> Result<Vec<&'r SchemaType>, ObjectError> {
        let chain = self
            .hierarchy
            .chain(class_id)
            .ok_or(ObjectError::UnknownClass(class_id))?;
        let mut out = Vec::with_capacity(chain.len());
        for level in chain {
            match self.registry.find_by_class_id(level) {
                Some(ty) => out.push(ty),
                None => log::debug!(
                    "class {} has no schema type; its level contributes nothing",
                    self.hierarchy.name(level).unwrap_or("?")
                ),
            }
        }
        Ok(out)
    }

    /// Read the state of an object of class `class_id` from `chunk`.
    pub fn deserialize(
        &self,
        class_id: ClassId,
        chunk: &Chunk,
    ) -> Result<ObjectState, ObjectError> {
        let levels = self.levels(class_id)?;
        let mut state = ObjectState {
            data_version: chunk.data_version(),
            ..Default::default()
        };
        if self.hierarchy.uses_extended_base_deserializer(class_id) {
            state.behavioral_mut();
        }
        let ctx = ReadContext {
            registry: self.registry,
            class_id,
            file_version: self.file_version,
            data_version: chunk.data_version(),
        };
        let mut r = chunk.reader().with_sequence_limit(self.sequence_limit);
        for ty in &levels {
            if let Some(ops) = ty.ops {
                log::trace!("reading {} level", ty.name);
                (ops.read)(&mut r, &mut state, &ctx).map_err(|e| e.in_level(ty))?;
                continue;
            }
            let (Some(tag), Some(level)) = (ty.section_tag, ty.class_id) else {
                continue;
            };
            if !r.seek_identifier(tag) {
                continue;
            }
            match self.registry.read_value(ty, &mut r, self.file_version) {
                Ok(value) => state.levels.push(LevelValue {
                    class_id: level,
                    value,
                }),
                Err(e) if e.kind().is_fatal() => return Err(ObjectError::from(e).in_level(ty)),
                Err(e) => {
                    log::warn!("skipping malformed {} section: {e}", ty.name);
                    r.release_section();
                }
            }
        }
        for ty in &levels {
            if let Some(validate) = ty.ops.and_then(|o| o.validate) {
                validate(&state).map_err(|e| e.in_level(ty))?;
            }
        }
        if r.seek_identifier(ATTACHMENTS_TAG) {
            match read_attachments(&mut r) {
                Ok(attachments) => state.attachments = attachments,
                Err(e) if e.kind().is_fatal() => return Err(e.into()),
                Err(e) => {
                    log::warn!("skipping malformed manager attachments: {e}");
                    r.release_section();
                }
            }
        }
        state.preserved = r.unvisited_sections();
        if !state.preserved.is_empty() {
            log::debug!(
                "preserving {} unrecognized sections of a class {} object",
                state.preserved.len(),
                class_id.0
            );
        }
        Ok(state)
    }

    /// Write `state` as an object of class `class_id`.
    pub fn serialize(&self, class_id: ClassId, state: &ObjectState) -> Result<Chunk, ObjectError> {
        let levels = self.levels(class_id)?;
        let ctx = WriteContext {
            registry: self.registry,
            class_id,
            file_version: self.file_version,
        };
        let mut chunk = Chunk::new(class_id, state.data_version);
        {
            let mut w = chunk.start_write();
            for ty in &levels {
                if let Some(ops) = ty.ops {
                    (ops.write)(&mut w, state, &ctx).map_err(|e| e.in_level(ty))?;
                    continue;
                }
                let (Some(tag), Some(level)) = (ty.section_tag, ty.class_id) else {
                    continue;
                };
                if let Some(value) = state.level(level) {
                    w.write_identifier(tag);
                    self.registry
                        .write_value(ty, value, &mut w, self.file_version)
                        .map_err(|e| ObjectError::from(e).in_level(ty))?;
                }
            }
            if !state.attachments.is_empty() {
                write_attachments(&mut w, &state.attachments);
            }
            for section in &state.preserved {
                w.write_preserved(section);
            }
        }
        Ok(chunk)
    }

    /// Run every level's validator against `state`.
    pub fn validate(&self, class_id: ClassId, state: &ObjectState) -> Result<(), ObjectError> {
        for ty in self.levels(class_id)? {
            if let Some(validate) = ty.ops.and_then(|o| o.validate) {
                validate(state).map_err(|e| e.in_level(ty))?;
            }
        }
        Ok(())
    }

    /// Run every level's finalizer, root first. Returns the number of
    /// references dropped.
    pub fn finalize(&self, state: &mut ObjectState, ctx: &FinalizeContext<'_>) -> usize {
        let Ok(levels) = self.levels(ctx.class_id) else {
            return 0;
        };
        levels
            .iter()
            .filter_map(|ty| ty.ops.and_then(|o| o.finalize))
            .map(|finalize| finalize(state, ctx))
            .sum()
    }
}

fn read_attachments(r: &mut ChunkReader<'_>) -> Result<Vec<ManagerAttachment>, ChunkError> {
    let count = r.read_sequence_len()?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let manager = r.read_guid()?;
        let chunk = r.read_sub_chunk()?.clone();
        out.push(ManagerAttachment { manager, chunk });
    }
    Ok(out)
}

fn write_attachments(w: &mut ChunkWriter<'_>, attachments: &[ManagerAttachment]) {
    w.write_identifier(ATTACHMENTS_TAG);
    w.write_dword(attachments.len() as u32);
    for a in attachments {
        w.write_guid(a.manager);
        w.write_sub_chunk(a.chunk.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::OBJECT_HIDDEN;
    use crate::id::Guid;
    use crate::registry::SchemaRegistryBuilder;
    use crate::schema::{FieldDesc, SchemaType};
    use crate::state::{ClassState, GroupState, Visibility};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builtin().unwrap()
    }

    #[test]
    fn unknown_class_rejected() {
        let reg = registry();
        let chunk = Chunk::new(ClassId(999), 0);
        let err = ObjectPipeline::new(&reg)
            .deserialize(ClassId(999), &chunk)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn group_round_trip() {
        let reg = registry();
        let pipeline = ObjectPipeline::new(&reg);
        let mut state = ObjectState {
            visibility: Visibility::Hidden,
            class: ClassState::Group(GroupState {
                members: vec![ObjectId(4), ObjectId(5)],
            }),
            ..Default::default()
        };
        state.behavioral_mut().priority = 3;
        let chunk = pipeline.serialize(ClassId::GROUP, &state).unwrap();
        let back = pipeline.deserialize(ClassId::GROUP, &chunk).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn attachments_follow_the_levels() {
        let reg = registry();
        let pipeline = ObjectPipeline::new(&reg);
        let mut note = Chunk::new(ClassId(0), 2);
        {
            let mut w = note.start_write();
            w.write_object_id(ObjectId(6));
        }
        let mut state = ObjectState::default();
        state.attach(Guid::new(0x51, 0x52), note.clone());
        let chunk = pipeline.serialize(ClassId::SCENE_OBJECT, &state).unwrap();
        assert_eq!(chunk.sub_chunks().len(), 1);
        let back = pipeline.deserialize(ClassId::SCENE_OBJECT, &chunk).unwrap();
        assert_eq!(back.attachment(Guid::new(0x51, 0x52)), Some(&note));
        assert!(back.preserved.is_empty());
    }

    #[test]
    fn behavioral_layer_only_for_be_objects() {
        let reg = registry();
        let pipeline = ObjectPipeline::new(&reg);
        let empty = Chunk::new(ClassId::SCENE_OBJECT, 0);
        let scene_object = pipeline.deserialize(ClassId::SCENE_OBJECT, &empty).unwrap();
        assert!(scene_object.behavioral.is_none());
        let level = pipeline.deserialize(ClassId::LEVEL, &empty).unwrap();
        assert!(level.behavioral.is_some());
    }

    #[test]
    fn unknown_sections_survive_round_trip() {
        let reg = registry();
        let pipeline = ObjectPipeline::new(&reg);
        let mut chunk = Chunk::new(ClassId::OBJECT, 0);
        {
            let mut w = chunk.start_write();
            w.write_identifier(OBJECT_HIDDEN);
            w.write_identifier(0xBEEF);
            w.write_object_id(ObjectId(12));
            w.write_dword(99);
        }
        let state = pipeline.deserialize(ClassId::OBJECT, &chunk).unwrap();
        assert_eq!(state.visibility, Visibility::Hidden);
        assert_eq!(state.preserved.len(), 1);
        assert_eq!(state.preserved[0].words, vec![12, 99]);

        let rewritten = pipeline.serialize(ClassId::OBJECT, &state).unwrap();
        assert_eq!(rewritten.object_ids(), vec![ObjectId(12)]);
        let again = pipeline.deserialize(ClassId::OBJECT, &rewritten).unwrap();
        assert_eq!(again, state);
    }

    #[test]
    fn unknown_section_keeps_its_sub_chunk() {
        let reg = registry();
        let pipeline = ObjectPipeline::new(&reg);
        let mut inner = Chunk::new(ClassId(0), 1);
        {
            let mut w = inner.start_write();
            w.write_object_id(ObjectId(5));
        }
        let mut chunk = Chunk::new(ClassId::OBJECT, 0);
        {
            let mut w = chunk.start_write();
            w.write_identifier(0x0055_0000);
            w.write_sub_chunk(inner.clone());
        }
        let mut state = pipeline.deserialize(ClassId::OBJECT, &chunk).unwrap();
        assert_eq!(state.preserved[0].sub_chunks, vec![(0, inner.clone())]);

        // An attachment written first takes sub-chunk 0.
        let note = Chunk::new(ClassId(0), 2);
        state.attach(Guid::new(0x51, 0x52), note.clone());
        let rewritten = pipeline.serialize(ClassId::OBJECT, &state).unwrap();
        assert_eq!(rewritten.sub_chunks().len(), 2);
        let back = pipeline.deserialize(ClassId::OBJECT, &rewritten).unwrap();
        assert_eq!(back.attachment(Guid::new(0x51, 0x52)), Some(&note));
        assert_eq!(back.preserved[0].sub_chunks, vec![(0, inner.clone())]);

        let mut r = rewritten.reader();
        assert!(r.seek_identifier(0x0055_0000));
        assert_eq!(r.read_sub_chunk().unwrap(), &inner);
    }

    #[test]
    fn malformed_identifier_link_reads_as_defaults() {
        let reg = registry();
        let mut chunk = Chunk::new(ClassId::OBJECT, 0);
        chunk
            .start_write()
            .write_raw_words(&[OBJECT_HIDDEN, 1, 5, 0]);
        let state = ObjectPipeline::new(&reg)
            .deserialize(ClassId::OBJECT, &chunk)
            .unwrap();
        assert_eq!(state.visibility, Visibility::Hidden);
        assert!(state.preserved.is_empty());
    }

    #[test]
    fn generic_level_marshaled_by_tag() {
        let mut b = SchemaRegistryBuilder::with_builtins().unwrap();
        b.register(
            SchemaType::structure(
                "SoundLevel",
                vec![
                    FieldDesc::new("volume", "Float"),
                    FieldDesc::new("source", "ObjectId"),
                ],
            )
            .for_class(ClassId::SOUND, 0x0090_0000)
            .from_plugin(Guid::new(7, 7)),
        )
        .unwrap();
        let reg = b.build().unwrap();
        let pipeline = ObjectPipeline::new(&reg);

        let mut state = ObjectState::default();
        state.behavioral_mut();
        state.levels.push(LevelValue {
            class_id: ClassId::SOUND,
            value: crate::schema::Value::Struct(vec![
                ("volume".into(), crate::schema::Value::Float(0.5)),
                ("source".into(), crate::schema::Value::Object(ObjectId(3))),
            ]),
        });
        let chunk = pipeline.serialize(ClassId::WAVE_SOUND, &state).unwrap();
        assert_eq!(chunk.object_ids(), vec![ObjectId(3)]);
        let back = pipeline.deserialize(ClassId::WAVE_SOUND, &chunk).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn missing_required_section_is_validation() {
        let reg = registry();
        let chunk = Chunk::new(ClassId::BEHAVIOR_LINK, 0);
        let err = ObjectPipeline::new(&reg)
            .deserialize(ClassId::BEHAVIOR_LINK, &chunk)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.kind().is_fatal());
    }
}
