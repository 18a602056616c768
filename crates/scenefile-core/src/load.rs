//! Loading a file into a session.
//!
//! [`FileLoader`] is a state machine advanced one stage per call:
//!
//! ```text
//! Init -> Header -> Header1 -> Objects -> Completed
//! ```
//!
//! The `Objects` stage does the bulk of the work: dependency checks, the
//! pre-load hooks, decompression of the data section, object creation
//! (pass A), freezing the remap table (pass B), manager chunks, rewriting
//! every reference to runtime IDs (pass C), body deserialization (pass D)
//! and finalization. A failing stage halts the loader in place; objects
//! already created stay in the session.

use crate::chunk::{ChunkError, CompressionInfo};
use crate::cursor::DEFAULT_SEQUENCE_LIMIT;
use crate::error::{ErrorKind, error_chain, io_kind};
use crate::format::{
    DataSection, DirectoryEntry, FileHeader, FormatError, HEADER_LEN, Header1, ManagerData,
    ObjectData, Payload, split_sections, unpack_section,
};
use crate::id::{ChunkKey, ClassId, Guid, ObjectId};
use crate::object::ObjectFlags;
use crate::pipeline::{FinalizeContext, ObjectError, ObjectPipeline};
use crate::remap::{LoadRemapTable, RemapError, RemapOutcome};
use crate::repository::Repository;
use crate::session::{DuplicatePolicy, Session};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Behaviour switches for one load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Look for objects with the same name and class already in the session.
    pub check_duplicates: bool,
    /// Resolve duplicates with `duplicate_policy` instead of asking the
    /// session hooks.
    pub automatic: bool,
    /// Fail when the file depends on a plugin the session does not have.
    pub check_dependencies: bool,
    /// Flag every created object as dynamic.
    pub as_dynamic: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Longest sequence a chunk may declare.
    pub max_sequence_len: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            check_duplicates: false,
            automatic: true,
            check_dependencies: true,
            as_dynamic: false,
            duplicate_policy: DuplicatePolicy::CreateNew,
            max_sequence_len: DEFAULT_SEQUENCE_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("file depends on plugin {guid} (category {category}), which is not available")]
    MissingPlugin { guid: Guid, category: u32 },
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error("object {file_id} of class {class_id:?}")]
    Object {
        file_id: ObjectId,
        class_id: ClassId,
        #[source]
        source: ObjectError,
    },
    #[error("chunk of manager {guid}")]
    Manager {
        guid: Guid,
        #[source]
        source: ChunkError,
    },
    #[error("loader halted by an earlier failure")]
    Halted,
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Io { source, .. } => io_kind(source, false),
            LoadError::Format(e) => e.kind(),
            LoadError::MissingPlugin { .. } => ErrorKind::NotFound,
            LoadError::Remap(e) => e.kind(),
            LoadError::Object { source, .. } => source.kind(),
            LoadError::Manager { source, .. } => source.kind(),
            LoadError::Halted => ErrorKind::InvalidState,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What a load did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub file_version: u32,
    /// `(file ID, runtime ID)` for every directory entry, in directory order.
    pub mapping: Vec<(ObjectId, ObjectId)>,
    pub created: usize,
    /// Directory entries bound to objects already in the session.
    pub reused: usize,
    pub replaced: usize,
    pub placeholders: usize,
    /// Bodies read successfully.
    pub loaded: usize,
    /// Bodies skipped as malformed.
    pub failed: usize,
    pub remap: RemapOutcome,
    /// References dropped by finalizers.
    pub dangling_dropped: usize,
    pub missing_plugins: Vec<Guid>,
    /// Manager chunks kept for managers this session lacks.
    pub unclaimed_managers: usize,
}

impl LoadReport {
    pub fn runtime_id(&self, file_id: ObjectId) -> Option<ObjectId> {
        self.mapping
            .iter()
            .find(|(file, _)| *file == file_id)
            .map(|&(_, runtime)| runtime)
    }

    /// Runtime IDs in directory order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.mapping.iter().map(|&(_, runtime)| runtime)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadStage {
    Init,
    Header,
    Header1,
    Objects,
    Completed,
}

/// Where a directory entry landed in pass A.
#[derive(Debug, Clone, Copy)]
struct Target {
    runtime: ObjectId,
    class_id: ClassId,
    read_body: bool,
}

/// A rewritten chunk waiting for pass D.
#[derive(Debug, Clone, Copy)]
struct Parked {
    file_id: ObjectId,
    runtime: ObjectId,
    class_id: ClassId,
    key: ChunkKey,
}

pub struct FileLoader<'s> {
    session: &'s mut Session,
    options: LoadOptions,
    bytes: Vec<u8>,
    stage: LoadStage,
    halted: bool,
    header: FileHeader,
    header1: Header1,
    data_range: Range<usize>,
    report: LoadReport,
}

impl<'s> FileLoader<'s> {
    pub fn new(session: &'s mut Session, bytes: Vec<u8>, options: LoadOptions) -> Self {
        Self {
            session,
            options,
            bytes,
            stage: LoadStage::Init,
            halted: false,
            header: FileHeader::default(),
            header1: Header1::default(),
            data_range: 0..0,
            report: LoadReport::default(),
        }
    }

    /// Read the whole file at `path` into a new loader.
    pub fn open(
        session: &'s mut Session,
        path: impl AsRef<Path>,
        options: LoadOptions,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(session, bytes, options))
    }

    pub fn stage(&self) -> LoadStage {
        self.stage
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Run the next stage. Advancing a completed loader does nothing; a
    /// loader that failed keeps failing with [`LoadError::Halted`].
    pub fn advance(&mut self) -> Result<LoadStage, LoadError> {
        if self.halted {
            return Err(LoadError::Halted);
        }
        let result = match self.stage {
            LoadStage::Init => self.read_header().map(|()| LoadStage::Header),
            LoadStage::Header => self.read_header1().map(|()| LoadStage::Header1),
            LoadStage::Header1 => self.load_objects().map(|()| LoadStage::Objects),
            LoadStage::Objects => {
                self.complete();
                Ok(LoadStage::Completed)
            }
            LoadStage::Completed => return Ok(LoadStage::Completed),
        };
        match result {
            Ok(next) => {
                log::debug!("load stage {:?} -> {next:?}", self.stage);
                self.stage = next;
                Ok(next)
            }
            Err(e) => {
                log::debug!("load halted in stage {:?}: {}", self.stage, error_chain(&e));
                self.halted = true;
                Err(e)
            }
        }
    }

    /// Advance until completed.
    pub fn run(mut self) -> Result<LoadReport, LoadError> {
        while self.advance()? != LoadStage::Completed {}
        Ok(self.report)
    }

    // -- Stages --

    fn read_header(&mut self) -> Result<(), LoadError> {
        self.header = FileHeader::parse(&self.bytes)?;
        self.report.file_version = self.header.file_version;
        Ok(())
    }

    fn read_header1(&mut self) -> Result<(), LoadError> {
        let raw = split_sections(&self.bytes, &self.header)?;
        let h1 = unpack_section(
            raw.header1,
            self.header.header1_unpack_size,
            self.header.is_compressed(),
            "header-1",
        )?;
        self.header1 = Header1::decode(&h1)?;
        let start = HEADER_LEN + raw.header1.len();
        self.data_range = start..start + raw.data.len();
        log::debug!(
            "directory lists {} objects and {} plugin dependencies",
            self.header1.objects.len(),
            self.header1.plugins.len()
        );
        Ok(())
    }

    fn load_objects(&mut self) -> Result<(), LoadError> {
        self.check_dependencies()?;
        self.session.hooks_mut().pre_load(&self.header);
        for manager in self.session.managers_mut().iter_mut() {
            manager.pre_load();
        }

        let compressed = self.header.is_compressed();
        let raw = self
            .bytes
            .get(self.data_range.clone())
            .ok_or_else(|| FormatError::Corrupt("data section out of range".into()))?;
        let data = unpack_section(raw, self.header.data_unpack_size, compressed, "data")?;
        let info = CompressionInfo {
            unpacked_size: data.len(),
            packed_size: raw.len(),
            compressed,
        };
        let section = DataSection::decode(
            &data,
            self.header.manager_count,
            self.header.object_count,
            info,
        )?;

        let mut table = LoadRemapTable::new();
        let targets = self.create_objects(&mut table)?;
        table.freeze();
        self.load_managers(section.managers, &table)?;
        let parked = self.rewrite_objects(section.objects, &table, &targets)?;
        let loaded = self.read_bodies(&parked)?;
        self.finalize(&loaded);

        let parts = self.session.parts_mut();
        for manager in parts.managers.iter_mut() {
            manager.post_load(parts.repository);
        }
        Ok(())
    }

    fn complete(&mut self) {
        let r = &self.report;
        log::info!(
            "loaded {}/{} objects, file version {} ({} failed, {} placeholders, {} nulled)",
            r.loaded,
            r.mapping.len(),
            r.file_version,
            r.failed,
            r.placeholders,
            r.remap.zeroed + r.dangling_dropped
        );
        self.session.hooks_mut().post_load(&self.report);
    }

    // -- Objects stage --

    fn check_dependencies(&mut self) -> Result<(), LoadError> {
        for dep in &self.header1.plugins {
            if self.session.has_plugin(dep.guid) {
                continue;
            }
            if self.options.check_dependencies {
                return Err(LoadError::MissingPlugin {
                    guid: dep.guid,
                    category: dep.category,
                });
            }
            log::warn!("plugin {} is missing; loading anyway", dep.guid);
            self.report.missing_plugins.push(dep.guid);
        }
        Ok(())
    }

    /// Pass A: one runtime object per directory entry, before any payload is
    /// interpreted.
    fn create_objects(
        &mut self,
        table: &mut LoadRemapTable,
    ) -> Result<HashMap<ObjectId, Target>, LoadError> {
        let entries = std::mem::take(&mut self.header1.objects);
        let mut targets = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let (runtime, read_body) = if entry.flags.contains(ObjectFlags::REFERENCE_ONLY) {
                (self.resolve_reference(entry, table), false)
            } else {
                self.place_object(entry, table)
            };
            table.insert(entry.file_id, runtime)?;
            targets.insert(
                entry.file_id,
                Target {
                    runtime,
                    class_id: entry.class_id,
                    read_body,
                },
            );
            self.report.mapping.push((entry.file_id, runtime));
        }
        self.header1.objects = entries;
        Ok(targets)
    }

    fn created_flags(&self, entry: &DirectoryEntry) -> ObjectFlags {
        let mut flags = entry.flags;
        flags.remove(ObjectFlags::REFERENCE_ONLY);
        if self.options.as_dynamic {
            flags.insert(ObjectFlags::DYNAMIC);
        }
        flags
    }

    /// An existing object with the entry's name and class, not yet bound to
    /// another file ID.
    fn existing(&self, entry: &DirectoryEntry, table: &LoadRemapTable) -> Option<ObjectId> {
        let name = entry.name.as_deref()?;
        self.session
            .repository()
            .find_by_name(name, entry.class_id)
            .filter(|id| !table.is_target(*id))
    }

    fn resolve_reference(&mut self, entry: &DirectoryEntry, table: &LoadRemapTable) -> ObjectId {
        if let Some(id) = self.existing(entry, table) {
            self.report.reused += 1;
            return id;
        }
        log::warn!(
            "referenced object {:?} of class {:?} not found; creating a placeholder",
            entry.name.as_deref().unwrap_or("<unnamed>"),
            entry.class_id
        );
        let mut flags = self.created_flags(entry);
        flags.insert(ObjectFlags::PLACEHOLDER);
        self.report.placeholders += 1;
        self.session
            .repository_mut()
            .create(entry.class_id, entry.name.clone(), flags)
    }

    fn place_object(&mut self, entry: &DirectoryEntry, table: &LoadRemapTable) -> (ObjectId, bool) {
        let existing = if self.options.check_duplicates {
            self.existing(entry, table)
        } else {
            None
        };
        let flags = self.created_flags(entry);
        let Some(existing) = existing else {
            self.report.created += 1;
            let id = self
                .session
                .repository_mut()
                .create(entry.class_id, entry.name.clone(), flags);
            return (id, true);
        };
        let policy = if self.options.automatic {
            self.options.duplicate_policy
        } else {
            self.session.hooks_mut().resolve_duplicate(entry, existing)
        };
        log::debug!(
            "duplicate {:?} resolved as {policy:?}",
            entry.name.as_deref().unwrap_or_default()
        );
        match policy {
            DuplicatePolicy::UseExisting => {
                self.report.reused += 1;
                (existing, false)
            }
            DuplicatePolicy::ReplaceExisting => {
                self.report.replaced += 1;
                (existing, true)
            }
            DuplicatePolicy::Rename => {
                let repo = self.session.repository_mut();
                let name = entry
                    .name
                    .as_deref()
                    .map(|base| unique_name(repo, base, entry.class_id));
                self.report.created += 1;
                (repo.create(entry.class_id, name, flags), true)
            }
            DuplicatePolicy::CreateNew => {
                self.report.created += 1;
                let id = self
                    .session
                    .repository_mut()
                    .create(entry.class_id, entry.name.clone(), flags);
                (id, true)
            }
        }
    }

    /// Manager chunks are rewritten and handed over before object chunks so
    /// that managers can translate their integers in pass C.
    fn load_managers(
        &mut self,
        managers: Vec<ManagerData>,
        table: &LoadRemapTable,
    ) -> Result<(), LoadError> {
        for ManagerData { guid, payload } in managers {
            let mut chunk = match payload {
                Payload::None => continue,
                Payload::Chunk(chunk) => chunk,
                Payload::Malformed(e) => {
                    log::warn!("skipping malformed chunk of manager {guid}: {e}");
                    continue;
                }
            };
            self.report.remap += table.rewrite(&mut chunk)?;
            match self.session.managers_mut().get_mut(guid) {
                Some(manager) => match manager.load_chunk(&chunk) {
                    Ok(()) => {}
                    Err(source) if source.kind().is_fatal() => {
                        return Err(LoadError::Manager { guid, source });
                    }
                    Err(e) => log::warn!("manager {guid} rejected its chunk: {e}"),
                },
                None => {
                    log::debug!("no manager {guid} in this session; keeping its chunk");
                    self.report.unclaimed_managers += 1;
                    self.session.keep_unclaimed(guid, chunk);
                }
            }
        }
        Ok(())
    }

    /// Pass C: rewrite file IDs to runtime IDs and park the chunks.
    fn rewrite_objects(
        &mut self,
        objects: Vec<ObjectData>,
        table: &LoadRemapTable,
        targets: &HashMap<ObjectId, Target>,
    ) -> Result<Vec<Parked>, LoadError> {
        let mut parked = Vec::with_capacity(objects.len());
        for ObjectData { file_id, payload } in objects {
            let Some(target) = targets.get(&file_id) else {
                log::warn!("data for undeclared object {file_id} ignored");
                continue;
            };
            let mut chunk = match payload {
                Payload::None => continue,
                Payload::Chunk(chunk) => chunk,
                Payload::Malformed(e) => {
                    log::warn!("object {file_id} has a malformed chunk: {e}");
                    self.report.failed += 1;
                    continue;
                }
            };
            if !target.read_body {
                continue;
            }
            chunk.set_class_id(target.class_id);
            self.report.remap += table.rewrite(&mut chunk)?;
            let parts = self.session.parts_mut();
            let managers = &*parts.managers;
            chunk.remap_manager_values(&mut |guid, value| managers.remap_value(guid, value));
            parked.push(Parked {
                file_id,
                runtime: target.runtime,
                class_id: target.class_id,
                key: parts.chunks.insert(chunk),
            });
        }
        Ok(parked)
    }

    /// Pass D: deserialize every parked chunk into its object's state.
    /// Returns the objects whose bodies were read.
    fn read_bodies(&mut self, parked: &[Parked]) -> Result<Vec<ObjectId>, LoadError> {
        let registry = self.session.shared_registry();
        let pipeline = ObjectPipeline::new(&registry)
            .with_file_version(self.header.file_version)
            .with_sequence_limit(self.options.max_sequence_len);
        let mut loaded = Vec::with_capacity(parked.len());
        for p in parked {
            let parts = self.session.parts_mut();
            let Some(chunk) = parts.chunks.remove(p.key) else {
                continue;
            };
            let state = match pipeline.deserialize(p.class_id, &chunk) {
                Ok(state) => state,
                Err(source) if source.kind().is_fatal() => {
                    return Err(LoadError::Object {
                        file_id: p.file_id,
                        class_id: p.class_id,
                        source,
                    });
                }
                Err(e) => {
                    log::warn!("object {} not loaded: {}", p.file_id, error_chain(&e));
                    self.report.failed += 1;
                    continue;
                }
            };
            for a in &state.attachments {
                if let Some(manager) = parts.managers.get_mut(a.manager)
                    && let Err(e) = manager.load_attachment(p.runtime, &a.chunk)
                {
                    log::warn!("manager {} rejected data of object {}: {e}", a.manager, p.runtime);
                }
            }
            if let Some(object) = parts.repository.get_mut(p.runtime) {
                object.type_guid = state.sub_kind();
                object.state = state;
            }
            self.report.loaded += 1;
            loaded.push(p.runtime);
        }
        Ok(loaded)
    }

    /// Run finalizers now that every object exists.
    fn finalize(&mut self, loaded: &[ObjectId]) {
        let registry = self.session.shared_registry();
        let pipeline = ObjectPipeline::new(&registry);
        for &id in loaded {
            let Some(object) = self.session.object_mut(id) else {
                continue;
            };
            let class_id = object.class_id;
            let mut state = std::mem::take(&mut object.state);
            let ctx = FinalizeContext {
                registry: &registry,
                hierarchy: pipeline.hierarchy(),
                repository: self.session.repository(),
                object: id,
                class_id,
            };
            self.report.dangling_dropped += pipeline.finalize(&mut state, &ctx);
            if let Some(object) = self.session.object_mut(id) {
                object.state = state;
            }
        }
    }
}

/// `base (2)`, `base (3)`, ... whichever is free first.
fn unique_name(repo: &Repository, base: &str, class_id: ClassId) -> String {
    (2u32..)
        .map(|n| format!("{base} ({n})"))
        .find(|candidate| repo.find_by_name(candidate, class_id).is_none())
        .unwrap_or_else(|| base.to_owned())
}

/// Load the file at `path` into `session`.
pub fn load(
    session: &mut Session,
    path: impl AsRef<Path>,
    options: &LoadOptions,
) -> Result<LoadReport, LoadError> {
    FileLoader::open(session, path, options.clone())?.run()
}

/// Load an in-memory file into `session`.
pub fn load_bytes(
    session: &mut Session,
    bytes: &[u8],
    options: &LoadOptions,
) -> Result<LoadReport, LoadError> {
    FileLoader::new(session, bytes.to_vec(), options.clone()).run()
}
