//! A load/save session: the repository of reconstructed objects, the chunk
//! arena, the attached managers and the caller's hooks.
//!
//! A session shares its schema registry through an `Arc`, so independent
//! sessions may live on different threads while the registry stays
//! read-only. One session is never used from two threads at once.

use crate::chunk::Chunk;
use crate::class::ClassHierarchy;
use crate::format::{DirectoryEntry, FileHeader};
use crate::id::{ChunkKey, ClassId, Guid, ObjectId};
use crate::load::LoadReport;
use crate::manager::{Manager, ManagerRegistry};
use crate::object::{ObjectFlags, SceneObject};
use crate::registry::{RegistryError, SchemaRegistry};
use crate::repository::Repository;
use crate::save::SaveReport;
use crate::state::ObjectState;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeSet;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Duplicate handling
// ---------------------------------------------------------------------------

/// What to do with a loaded object whose name and class match an object
/// already in the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Create a second object with the same name.
    #[default]
    CreateNew,
    /// Keep the existing object and point the file's references at it. The
    /// loaded body is discarded.
    UseExisting,
    /// Keep the existing object's ID and replace its state with the loaded
    /// body.
    ReplaceExisting,
    /// Create a new object under a name not yet taken.
    Rename,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Caller callbacks around load and save. Every method defaults to a no-op.
pub trait SessionHooks: Send + std::fmt::Debug {
    /// Called once the header is read, before any object is created.
    fn pre_load(&mut self, header: &FileHeader) {
        let _ = header;
    }

    fn post_load(&mut self, report: &LoadReport) {
        let _ = report;
    }

    /// Decide a duplicate when loading in non-automatic mode.
    fn resolve_duplicate(
        &mut self,
        incoming: &DirectoryEntry,
        existing: ObjectId,
    ) -> DuplicatePolicy {
        let _ = (incoming, existing);
        DuplicatePolicy::CreateNew
    }

    /// Called with the requested objects before anything is serialized.
    fn pre_save(&mut self, objects: &[ObjectId]) {
        let _ = objects;
    }

    fn post_save(&mut self, report: &SaveReport) {
        let _ = report;
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

// ---------------------------------------------------------------------------
// Chunk arena
// ---------------------------------------------------------------------------

/// Chunks parked by the session between load passes. Everything is dropped
/// together by [`ChunkArena::reset`].
#[derive(Debug, Default)]
pub struct ChunkArena {
    chunks: SlotMap<ChunkKey, Chunk>,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: Chunk) -> ChunkKey {
        self.chunks.insert(chunk)
    }

    pub fn get(&self, key: ChunkKey) -> Option<&Chunk> {
        self.chunks.get(key)
    }

    pub fn get_mut(&mut self, key: ChunkKey) -> Option<&mut Chunk> {
        self.chunks.get_mut(key)
    }

    pub fn remove(&mut self, key: ChunkKey) -> Option<Chunk> {
        self.chunks.remove(key)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Session {
    registry: Arc<SchemaRegistry>,
    repository: Repository,
    chunks: ChunkArena,
    managers: ManagerRegistry,
    hooks: Box<dyn SessionHooks>,
    unclaimed: Vec<(Guid, Chunk)>,
    plugins: BTreeSet<Guid>,
}

impl Session {
    /// A session over `registry` with the built-in managers. Every plugin
    /// GUID that a registered schema type names counts as available.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let plugins = registry.iter().filter_map(|t| t.plugin).collect();
        Self {
            registry,
            repository: Repository::new(),
            chunks: ChunkArena::new(),
            managers: ManagerRegistry::with_builtins(),
            hooks: Box::new(NoHooks),
            unclaimed: Vec::new(),
            plugins,
        }
    }

    /// A session over a fresh built-in registry.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        Ok(Self::new(Arc::new(SchemaRegistry::builtin()?)))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn shared_registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn hierarchy(&self) -> ClassHierarchy<'static> {
        ClassHierarchy::legacy()
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut Repository {
        &mut self.repository
    }

    pub fn chunks(&self) -> &ChunkArena {
        &self.chunks
    }

    pub fn managers(&self) -> &ManagerRegistry {
        &self.managers
    }

    pub fn managers_mut(&mut self) -> &mut ManagerRegistry {
        &mut self.managers
    }

    pub fn register_manager(&mut self, manager: Box<dyn Manager>) -> Result<(), RegistryError> {
        self.managers.register(manager)
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn SessionHooks>) {
        self.hooks = hooks;
    }

    pub fn hooks_mut(&mut self) -> &mut dyn SessionHooks {
        self.hooks.as_mut()
    }

    pub fn add_plugin(&mut self, guid: Guid) {
        self.plugins.insert(guid);
    }

    pub fn has_plugin(&self, guid: Guid) -> bool {
        self.plugins.contains(&guid)
    }

    /// Manager chunks read from files whose manager is not registered here.
    /// They are written back on save.
    pub fn unclaimed_manager_data(&self) -> &[(Guid, Chunk)] {
        &self.unclaimed
    }

    /// Keep a manager chunk nobody claimed. A later chunk for the same GUID
    /// replaces the earlier one.
    pub fn keep_unclaimed(&mut self, guid: Guid, chunk: Chunk) {
        match self.unclaimed.iter_mut().find(|(g, _)| *g == guid) {
            Some(slot) => slot.1 = chunk,
            None => self.unclaimed.push((guid, chunk)),
        }
    }

    /// Create an object with the given state.
    pub fn create_object(
        &mut self,
        class_id: ClassId,
        name: Option<&str>,
        state: ObjectState,
    ) -> ObjectId {
        let id = self
            .repository
            .create(class_id, name.map(str::to_owned), ObjectFlags::NONE);
        if let Some(object) = self.repository.get_mut(id) {
            object.state = state;
        }
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.repository.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.repository.get_mut(id)
    }

    /// Drop every object created by a dynamic-only load.
    pub fn remove_dynamic_objects(&mut self) -> usize {
        let removed = self.repository.remove_flagged(ObjectFlags::DYNAMIC);
        log::debug!("removed {removed} dynamic objects");
        removed
    }

    /// Drop every object, parked chunk and unclaimed manager chunk. The
    /// registry, managers, hooks and plugins stay.
    pub fn clear(&mut self) {
        self.repository.clear();
        self.chunks.reset();
        self.unclaimed.clear();
    }

    pub(crate) fn parts_mut(&mut self) -> SessionParts<'_> {
        SessionParts {
            registry: &self.registry,
            repository: &mut self.repository,
            chunks: &mut self.chunks,
            managers: &mut self.managers,
            hooks: self.hooks.as_mut(),
        }
    }
}

/// Disjoint borrows of a session's parts for the load and save passes.
pub(crate) struct SessionParts<'s> {
    pub registry: &'s SchemaRegistry,
    pub repository: &'s mut Repository,
    pub chunks: &'s mut ChunkArena,
    pub managers: &'s mut ManagerRegistry,
    pub hooks: &'s mut dyn SessionHooks,
}
