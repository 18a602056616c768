//! Saving session objects to a file.
//!
//! A [`FileSaver`] collects the objects to write, then [`FileSaver::finish`]
//! plans file IDs in request order, pulls referenced objects in as
//! dependencies, serializes every body through the object pipeline,
//! rewrites runtime IDs to file IDs and assembles the container.

use crate::chunk::{Chunk, ChunkOptions};
use crate::compression::DEFAULT_LEVEL;
use crate::error::{ErrorKind, io_kind};
use crate::format::{
    CURRENT_FILE_VERSION, DirectoryEntry, FormatError, Header1, MIN_FILE_VERSION, ManagerFrame,
    ObjectFrame, PluginDependency, WriteParams, write_file,
};
use crate::id::{ClassId, Guid, ObjectId};
use crate::object::ObjectFlags;
use crate::pipeline::{ObjectError, ObjectPipeline};
use crate::registry::SchemaRegistry;
use crate::remap::{RemapError, RemapOutcome, SaveRemapPlan};
use crate::repository::Repository;
use crate::session::Session;
use crate::state::{ClassState, ObjectState, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Plugin category recorded for schema types contributed by a plugin.
pub const SCHEMA_PLUGIN_CATEGORY: u32 = 0;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// zlib-compress both sections.
    pub compress: bool,
    pub compression_level: u32,
    pub file_version: u32,
    /// Write referenced but unrequested objects as directory entries without
    /// data. When false they are saved in full, together with everything
    /// they reference in turn.
    pub save_dependencies_as_references: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compress: true,
            compression_level: DEFAULT_LEVEL,
            file_version: CURRENT_FILE_VERSION,
            save_dependencies_as_references: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("cannot write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error("object {0} is not in the session")]
    UnknownObject(ObjectId),
    #[error("object {id} of class {class_id:?}")]
    Object {
        id: ObjectId,
        class_id: ClassId,
        #[source]
        source: ObjectError,
    },
    #[error("saver already finished")]
    Finished,
}

impl SaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaveError::Io { source, .. } => io_kind(source, true),
            SaveError::Format(e) => e.kind(),
            SaveError::Remap(e) => e.kind(),
            SaveError::UnknownObject(_) => ErrorKind::NotFound,
            SaveError::Object { source, .. } => source.kind(),
            SaveError::Finished => ErrorKind::InvalidState,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReport {
    /// Directory entries written, reference-only ones included.
    pub objects: usize,
    pub reference_only: usize,
    /// Objects whose file ID differs from their runtime ID.
    pub remapped: usize,
    pub conflicts: usize,
    pub managers: usize,
    pub plugins: usize,
    pub remap: RemapOutcome,
    pub bytes: usize,
    /// `(runtime ID, file ID)` in file order.
    pub mapping: Vec<(ObjectId, ObjectId)>,
}

impl SaveReport {
    pub fn file_id(&self, runtime: ObjectId) -> Option<ObjectId> {
        self.mapping
            .iter()
            .find(|(r, _)| *r == runtime)
            .map(|&(_, file)| file)
    }
}

// ---------------------------------------------------------------------------
// Saver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveStage {
    /// Created, nothing added yet.
    Init,
    Collecting,
    Completed,
}

pub struct FileSaver<'s> {
    session: &'s mut Session,
    target: Option<PathBuf>,
    options: SaveOptions,
    stage: SaveStage,
    requested: Vec<ObjectId>,
    attachments: HashMap<ObjectId, Vec<(Guid, Chunk)>>,
    manager_data: Vec<(Guid, Chunk)>,
}

impl<'s> FileSaver<'s> {
    /// A saver that writes to `path` on [`finish`](Self::finish).
    pub fn create(
        session: &'s mut Session,
        path: impl AsRef<Path>,
        options: SaveOptions,
    ) -> Result<Self, SaveError> {
        let mut saver = Self::in_memory(session, options)?;
        saver.target = Some(path.as_ref().to_path_buf());
        Ok(saver)
    }

    /// A saver whose output is taken with [`finish_to_bytes`](Self::finish_to_bytes).
    pub fn in_memory(session: &'s mut Session, options: SaveOptions) -> Result<Self, SaveError> {
        if !(MIN_FILE_VERSION..=CURRENT_FILE_VERSION).contains(&options.file_version) {
            return Err(FormatError::UnsupportedVersion {
                version: options.file_version,
                min: MIN_FILE_VERSION,
                max: CURRENT_FILE_VERSION,
            }
            .into());
        }
        Ok(Self {
            session,
            target: None,
            options,
            stage: SaveStage::Init,
            requested: Vec::new(),
            attachments: HashMap::new(),
            manager_data: Vec::new(),
        })
    }

    pub fn stage(&self) -> SaveStage {
        self.stage
    }

    /// Objects requested so far. Dependencies are not counted.
    pub fn object_count(&self) -> usize {
        self.requested.len()
    }

    /// Request `id`. Requesting an object twice keeps its first position.
    pub fn add_object(&mut self, id: ObjectId) -> Result<(), SaveError> {
        if self.stage == SaveStage::Completed {
            return Err(SaveError::Finished);
        }
        if !self.session.repository().contains(id) {
            return Err(SaveError::UnknownObject(id));
        }
        if !self.requested.contains(&id) {
            self.requested.push(id);
        }
        self.stage = SaveStage::Collecting;
        Ok(())
    }

    /// Request `id` and store `data` with it on behalf of `manager`. The
    /// data replaces any attachment the object already carries for that
    /// manager in this file only.
    pub fn add_object_with_data(
        &mut self,
        id: ObjectId,
        manager: Guid,
        data: Chunk,
    ) -> Result<(), SaveError> {
        self.add_object(id)?;
        self.attachments.entry(id).or_default().push((manager, data));
        Ok(())
    }

    /// Write `chunk` as `manager`'s chunk instead of asking the manager.
    pub fn add_manager_data(&mut self, manager: Guid, chunk: Chunk) -> Result<(), SaveError> {
        if self.stage == SaveStage::Completed {
            return Err(SaveError::Finished);
        }
        match self.manager_data.iter_mut().find(|(g, _)| *g == manager) {
            Some(slot) => slot.1 = chunk,
            None => self.manager_data.push((manager, chunk)),
        }
        Ok(())
    }

    /// Build the file and write it to the target path. An in-memory saver
    /// builds the file and drops it.
    pub fn finish(&mut self) -> Result<SaveReport, SaveError> {
        let (bytes, report) = self.build()?;
        if let Some(path) = &self.target {
            std::fs::write(path, &bytes).map_err(|source| SaveError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(report)
    }

    /// Build the file and return its bytes.
    pub fn finish_to_bytes(&mut self) -> Result<(Vec<u8>, SaveReport), SaveError> {
        self.build()
    }

    fn build(&mut self) -> Result<(Vec<u8>, SaveReport), SaveError> {
        if self.stage == SaveStage::Completed {
            return Err(SaveError::Finished);
        }
        self.session.hooks_mut().pre_save(&self.requested);

        let registry = self.session.shared_registry();
        let repo = self.session.repository();
        let plan = self.plan(repo)?;
        let pipeline =
            ObjectPipeline::new(&registry).with_file_version(self.options.file_version);

        let mut report = SaveReport::default();
        let mut header1 = Header1::default();
        let mut bodies: Vec<(ObjectId, Option<Chunk>)> = Vec::with_capacity(plan.len());
        let mut plugins = BTreeSet::new();
        for entry in plan.entries() {
            let object = repo
                .get(entry.runtime)
                .ok_or(SaveError::UnknownObject(entry.runtime))?;
            let mut flags = object.flags;
            flags.remove(ObjectFlags::DYNAMIC);
            if entry.reference_only {
                flags.insert(ObjectFlags::REFERENCE_ONLY);
            }
            header1.objects.push(DirectoryEntry {
                file_id: entry.file,
                class_id: object.class_id,
                flags,
                name: object.name.clone(),
            });
            report.mapping.push((entry.runtime, entry.file));
            if entry.reference_only {
                bodies.push((entry.file, None));
                continue;
            }

            let extra = self.attachments.get(&entry.runtime);
            let mut attached;
            let state = match extra {
                Some(extra) => {
                    attached = object.state.clone();
                    for (manager, data) in extra {
                        attached.attach(*manager, data.clone());
                    }
                    &attached
                }
                None => &object.state,
            };
            let mut chunk = pipeline
                .serialize(object.class_id, state)
                .map_err(|source| SaveError::Object {
                    id: entry.runtime,
                    class_id: object.class_id,
                    source,
                })?;
            chunk.insert_options(ChunkOptions::FILE);
            report.remap += plan.rewrite(&mut chunk);
            plugins.extend(plugins_of(&registry, &pipeline, object.class_id, state));
            bodies.push((entry.file, Some(chunk)));
        }
        header1.plugins = plugins
            .into_iter()
            .map(|guid| PluginDependency {
                category: SCHEMA_PLUGIN_CATEGORY,
                guid,
            })
            .collect();

        let saved: Vec<ObjectId> = plan
            .entries()
            .iter()
            .filter(|e| !e.reference_only)
            .map(|e| e.runtime)
            .collect();
        let mut manager_chunks = self.manager_chunks(&saved);
        for (_, chunk) in &mut manager_chunks {
            report.remap += plan.rewrite(chunk);
        }

        let managers: Vec<ManagerFrame<'_>> = manager_chunks
            .iter()
            .map(|(guid, chunk)| ManagerFrame {
                guid: *guid,
                chunk: Some(chunk),
            })
            .collect();
        let objects: Vec<ObjectFrame<'_>> = bodies
            .iter()
            .map(|(file_id, chunk)| ObjectFrame {
                file_id: *file_id,
                chunk: chunk.as_ref(),
            })
            .collect();
        let params = WriteParams {
            file_version: self.options.file_version,
            compress: self.options.compress,
            compression_level: self.options.compression_level,
            max_id_saved: plan.max_file_id().map_or(0, |id| id.0),
        };
        let bytes = write_file(&header1, &managers, &objects, &params)?;

        report.objects = plan.len();
        report.reference_only = plan.reference_only();
        report.remapped = plan.remapped();
        report.conflicts = plan.conflicts();
        report.managers = managers.len();
        report.plugins = header1.plugins.len();
        report.bytes = bytes.len();
        log::info!(
            "saved {} objects ({} as references) and {} manager chunks in {} bytes",
            report.objects,
            report.reference_only,
            report.managers,
            report.bytes
        );

        self.stage = SaveStage::Completed;
        self.session.hooks_mut().post_save(&report);
        Ok((bytes, report))
    }

    /// File IDs for the requested objects in order, then for everything they
    /// reference.
    fn plan(&self, repo: &Repository) -> Result<SaveRemapPlan, SaveError> {
        let mut plan = SaveRemapPlan::new();
        for &id in &self.requested {
            plan.assign(id, false)?;
        }
        let as_references = self.options.save_dependencies_as_references;
        let mut queue: VecDeque<ObjectId> = self.requested.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let Some(object) = repo.get(id) else {
                continue;
            };
            let mut refs = object.state.references();
            if let Some(extra) = self.attachments.get(&id) {
                refs.extend(extra.iter().flat_map(|(_, c)| c.object_ids()));
            }
            for r in refs {
                if plan.lookup(r).is_some() {
                    continue;
                }
                if !repo.contains(r) {
                    log::warn!("object {id} refers to {r}, which is not in the session");
                    continue;
                }
                plan.assign(r, as_references)?;
                if !as_references {
                    queue.push_back(r);
                }
            }
        }
        log::debug!(
            "save plan: {} objects, {} reference-only",
            plan.len(),
            plan.reference_only()
        );
        Ok(plan)
    }

    /// Manager chunks in a fixed order: registered managers, then chunks kept
    /// from earlier loads, then explicitly added data for other GUIDs.
    /// Explicit data wins over what a manager would produce.
    fn manager_chunks(&self, saved: &[ObjectId]) -> Vec<(Guid, Chunk)> {
        let explicit = |guid: Guid| {
            self.manager_data
                .iter()
                .find(|(g, _)| *g == guid)
                .map(|(_, c)| c.clone())
        };
        let mut out: Vec<(Guid, Chunk)> = Vec::new();
        for manager in self.session.managers().iter() {
            let guid = manager.guid();
            if let Some(chunk) = explicit(guid).or_else(|| manager.save_chunk(saved)) {
                out.push((guid, chunk));
            }
        }
        for (guid, chunk) in self.session.unclaimed_manager_data() {
            if out.iter().any(|(g, _)| g == guid) {
                continue;
            }
            out.push((*guid, explicit(*guid).unwrap_or_else(|| chunk.clone())));
        }
        for (guid, chunk) in &self.manager_data {
            if !out.iter().any(|(g, _)| g == guid) {
                out.push((*guid, chunk.clone()));
            }
        }
        out
    }
}

/// Plugins whose types an object of `class_id` with `state` needs to load.
fn plugins_of(
    registry: &SchemaRegistry,
    pipeline: &ObjectPipeline<'_>,
    class_id: ClassId,
    state: &ObjectState,
) -> Vec<Guid> {
    let mut out: Vec<Guid> = pipeline
        .hierarchy()
        .chain(class_id)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|level| registry.find_by_class_id(level))
        .filter_map(|ty| ty.plugin)
        .collect();
    if let ClassState::Parameter(p) = &state.class
        && matches!(p.value, ParamValue::Typed(_))
        && let Some(plugin) = registry.find_param(p.type_guid).and_then(|ty| ty.plugin)
    {
        out.push(plugin);
    }
    out
}

/// Save `objects` from `session` to `path`.
pub fn save(
    session: &mut Session,
    path: impl AsRef<Path>,
    objects: &[ObjectId],
    options: &SaveOptions,
) -> Result<SaveReport, SaveError> {
    let mut saver = FileSaver::create(session, path, options.clone())?;
    for &id in objects {
        saver.add_object(id)?;
    }
    saver.finish()
}

/// Save `objects` from `session` into memory.
pub fn save_to_bytes(
    session: &mut Session,
    objects: &[ObjectId],
    options: &SaveOptions,
) -> Result<Vec<u8>, SaveError> {
    let mut saver = FileSaver::in_memory(session, options.clone())?;
    for &id in objects {
        saver.add_object(id)?;
    }
    Ok(saver.finish_to_bytes()?.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Payload, read_file};
    use crate::load::{LoadError, LoadOptions, load_bytes};
    use crate::test_utils;

    #[test]
    fn saving_twice_gives_identical_bytes() {
        let mut session = test_utils::session();
        let ids = test_utils::add_scene(&mut session);
        let first = save_to_bytes(&mut session, &ids, &SaveOptions::default()).unwrap();
        let second = save_to_bytes(&mut session, &ids, &SaveOptions::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn requested_objects_come_first() {
        let mut session = test_utils::session();
        let (a, b) = test_utils::add_cycle(&mut session);
        let mut saver = FileSaver::in_memory(&mut session, test_utils::uncompressed()).unwrap();
        saver.add_object(b).unwrap();
        let (_, report) = saver.finish_to_bytes().unwrap();
        assert_eq!(report.file_id(b), Some(ObjectId(0)));
        assert_eq!(report.file_id(a), Some(ObjectId(1)));
    }

    #[test]
    fn dependencies_as_references() {
        let mut session = test_utils::session();
        let (a, _) = test_utils::add_cycle(&mut session);

        let mut saver = FileSaver::in_memory(&mut session, test_utils::uncompressed()).unwrap();
        saver.add_object(a).unwrap();
        let (bytes, report) = saver.finish_to_bytes().unwrap();
        assert_eq!(report.objects, 2);
        assert_eq!(report.reference_only, 1);
        let file = read_file(&bytes).unwrap();
        assert!(file.header1.objects[1].flags.contains(ObjectFlags::REFERENCE_ONLY));
        assert!(matches!(file.data.objects[1].payload, Payload::None));

        let full = SaveOptions {
            save_dependencies_as_references: false,
            ..test_utils::uncompressed()
        };
        let mut saver = FileSaver::in_memory(&mut session, full).unwrap();
        saver.add_object(a).unwrap();
        let (_, report) = saver.finish_to_bytes().unwrap();
        assert_eq!(report.objects, 2);
        assert_eq!(report.reference_only, 0);
    }

    #[test]
    fn dynamic_flag_is_not_written() {
        let mut session = test_utils::session();
        let g = test_utils::add_group(&mut session, "g", &[]);
        session.object_mut(g).unwrap().flags.insert(ObjectFlags::DYNAMIC);
        let bytes = test_utils::save(&mut session, &[g]);
        let file = read_file(&bytes).unwrap();
        assert!(!file.header1.objects[0].flags.contains(ObjectFlags::DYNAMIC));
    }

    // -----------------------------------------------------------------------
    // Stages and errors
    // -----------------------------------------------------------------------

    #[test]
    fn stages_and_counts() {
        let mut session = test_utils::session();
        let g = test_utils::add_group(&mut session, "g", &[]);
        let mut saver = FileSaver::in_memory(&mut session, SaveOptions::default()).unwrap();
        assert_eq!(saver.stage(), SaveStage::Init);
        saver.add_object(g).unwrap();
        saver.add_object(g).unwrap();
        assert_eq!(saver.stage(), SaveStage::Collecting);
        assert_eq!(saver.object_count(), 1);

        let err = saver.add_object(ObjectId(999)).unwrap_err();
        assert!(matches!(err, SaveError::UnknownObject(ObjectId(999))));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        saver.finish_to_bytes().unwrap();
        assert_eq!(saver.stage(), SaveStage::Completed);
        assert!(matches!(saver.add_object(g), Err(SaveError::Finished)));
        assert!(matches!(saver.finish(), Err(SaveError::Finished)));
    }

    #[test]
    fn version_outside_range_is_rejected() {
        let mut session = test_utils::session();
        for file_version in [MIN_FILE_VERSION - 1, CURRENT_FILE_VERSION + 1] {
            let options = SaveOptions {
                file_version,
                ..SaveOptions::default()
            };
            let err = FileSaver::in_memory(&mut session, options).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
        }
    }

    #[test]
    fn finish_writes_the_target() {
        let mut session = test_utils::session();
        let g = test_utils::add_group(&mut session, "g", &[]);
        let path = std::env::temp_dir().join(format!("scenefile-save-{}.nmo", std::process::id()));
        let report = save(&mut session, &path, &[g], &SaveOptions::default()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(report.bytes, bytes.len());
        assert!(read_file(&bytes).is_ok());
    }

    // -----------------------------------------------------------------------
    // Plugins and managers
    // -----------------------------------------------------------------------

    #[test]
    fn plugin_of_a_saved_level_is_recorded() {
        let plugin = Guid::new(0x50c0, 0x1d);
        let mut session = Session::new(test_utils::sound_registry(plugin));
        let sound = session.create_object(
            ClassId::SOUND,
            Some("hum"),
            test_utils::sound_state(0.5, ObjectId::NULL),
        );
        let bytes = test_utils::save(&mut session, &[sound]);
        let file = read_file(&bytes).unwrap();
        assert_eq!(
            file.header1.plugins,
            vec![PluginDependency {
                category: SCHEMA_PLUGIN_CATEGORY,
                guid: plugin
            }]
        );

        let mut bare = test_utils::session();
        let err = load_bytes(&mut bare, &bytes, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingPlugin { .. }));
    }

    #[test]
    fn explicit_manager_data_is_written() {
        let guid = Guid::new(0x77, 0x1);
        let mut session = test_utils::session();
        let mut saver = FileSaver::in_memory(&mut session, test_utils::uncompressed()).unwrap();
        saver.add_manager_data(guid, test_utils::raw_chunk(&[1])).unwrap();
        saver.add_manager_data(guid, test_utils::raw_chunk(&[2])).unwrap();
        let (bytes, report) = saver.finish_to_bytes().unwrap();
        assert!(report.managers >= 1);
        let file = read_file(&bytes).unwrap();
        let frames: Vec<_> = file.data.managers.iter().filter(|m| m.guid == guid).collect();
        assert_eq!(frames.len(), 1);
        match &frames[0].payload {
            Payload::Chunk(c) => assert_eq!(c.words(), &[2]),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
