//! Managers: GUID-identified extensions that own manager-scoped integers
//! embedded in object chunks and one chunk of their own per file.

use crate::chunk::{Chunk, ChunkError};
use crate::id::{ClassId, Guid, ObjectId};
use crate::registry::RegistryError;
use crate::repository::Repository;
use std::any::Any;

/// GUID of the built-in attribute manager.
pub const ATTRIBUTE_MANAGER_GUID: Guid = Guid::new(0x3d24_2466, 0x0000_0000);

const ATTRIBUTE_TYPES_TAG: u32 = 0x0000_0001;

// ---------------------------------------------------------------------------
// Manager trait
// ---------------------------------------------------------------------------

/// An extension that participates in load and save.
///
/// Every method except the identity accessors has a no-op default, so a
/// manager only overrides what it stores.
pub trait Manager: Send + std::fmt::Debug {
    fn guid(&self) -> Guid;

    fn name(&self) -> &str;

    /// Called before any object of a file is created.
    fn pre_load(&mut self) {}

    /// Consume this manager's chunk from a file. Object IDs inside it have
    /// already been rewritten to runtime IDs.
    fn load_chunk(&mut self, chunk: &Chunk) -> Result<(), ChunkError> {
        let _ = chunk;
        Ok(())
    }

    /// Receive the data this manager attached to `object` when it was saved.
    /// The attachment also stays on the object's state.
    fn load_attachment(&mut self, object: ObjectId, chunk: &Chunk) -> Result<(), ChunkError> {
        let _ = (object, chunk);
        Ok(())
    }

    /// Translate a manager-scoped integer read from the file just loaded.
    fn remap_value(&self, value: i32) -> i32 {
        value
    }

    /// Produce this manager's chunk for a file holding `objects`.
    fn save_chunk(&self, objects: &[ObjectId]) -> Option<Chunk> {
        let _ = objects;
        None
    }

    /// Called once every object body has been read and finalized.
    fn post_load(&mut self, repository: &Repository) {
        let _ = repository;
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// Attribute manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    pub name: String,
    /// Parameter type of the attribute's value; null for flag attributes.
    pub param_type: Guid,
    pub category: Option<String>,
    /// Restricts the attribute to objects derived from this class.
    pub compatible_class: Option<ClassId>,
}

/// Owns the table of attribute types behavioral objects refer to by index.
#[derive(Debug, Default)]
pub struct AttributeManager {
    types: Vec<AttributeType>,
    /// File index to runtime index for the file being loaded.
    load_map: Vec<i32>,
}

impl AttributeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute type, returning its index. A name already
    /// present returns the existing index.
    pub fn register(&mut self, ty: AttributeType) -> i32 {
        if let Some(index) = self.index_of(&ty.name) {
            return index;
        }
        self.types.push(ty);
        (self.types.len() - 1) as i32
    }

    pub fn index_of(&self, name: &str) -> Option<i32> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| i as i32)
    }

    pub fn get(&self, index: i32) -> Option<&AttributeType> {
        usize::try_from(index).ok().and_then(|i| self.types.get(i))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Manager for AttributeManager {
    fn guid(&self) -> Guid {
        ATTRIBUTE_MANAGER_GUID
    }

    fn name(&self) -> &str {
        "Attribute Manager"
    }

    fn pre_load(&mut self) {
        self.load_map.clear();
    }

    fn load_chunk(&mut self, chunk: &Chunk) -> Result<(), ChunkError> {
        let mut r = chunk.reader();
        if !r.seek_identifier(ATTRIBUTE_TYPES_TAG) {
            return Ok(());
        }
        let count = r.read_sequence_len()?;
        let mut map = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r.read_string()?.unwrap_or_default();
            let param_type = r.read_guid()?;
            let category = r.read_string()?;
            let class = r.read_dword()?;
            let index = self.register(AttributeType {
                name,
                param_type,
                category,
                compatible_class: (class != 0).then_some(ClassId(class)),
            });
            map.push(index);
        }
        log::debug!("attribute manager merged {count} attribute types");
        self.load_map = map;
        Ok(())
    }

    fn remap_value(&self, value: i32) -> i32 {
        match usize::try_from(value).ok().and_then(|i| self.load_map.get(i)) {
            Some(&runtime) => runtime,
            None => value,
        }
    }

    fn save_chunk(&self, _objects: &[ObjectId]) -> Option<Chunk> {
        if self.types.is_empty() {
            return None;
        }
        let mut chunk = Chunk::new(ClassId(0), 0);
        let mut w = chunk.start_write();
        w.write_identifier(ATTRIBUTE_TYPES_TAG);
        w.write_dword(self.types.len() as u32);
        for ty in &self.types {
            w.write_string(Some(&ty.name));
            w.write_guid(ty.param_type);
            w.write_string(ty.category.as_deref());
            w.write_dword(ty.compatible_class.map_or(0, |c| c.0));
        }
        Some(chunk)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ManagerRegistry
// ---------------------------------------------------------------------------

/// The managers attached to a session, one per GUID.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    managers: Vec<Box<dyn Manager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in attribute manager.
    pub fn with_builtins() -> Self {
        Self {
            managers: vec![Box::new(AttributeManager::new())],
        }
    }

    pub fn register(&mut self, manager: Box<dyn Manager>) -> Result<(), RegistryError> {
        let guid = manager.guid();
        if self.contains(guid) {
            return Err(RegistryError::ManagerTaken(guid));
        }
        self.managers.push(manager);
        Ok(())
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.managers.iter().any(|m| m.guid() == guid)
    }

    pub fn get(&self, guid: Guid) -> Option<&dyn Manager> {
        self.managers
            .iter()
            .find(|m| m.guid() == guid)
            .map(|m| m.as_ref())
    }

    pub fn get_mut(&mut self, guid: Guid) -> Option<&mut Box<dyn Manager>> {
        self.managers.iter_mut().find(|m| m.guid() == guid)
    }

    /// Typed access to a concrete manager.
    pub fn get_as<T: Manager + 'static>(&self) -> Option<&T> {
        self.managers
            .iter()
            .find_map(|m| m.as_any().downcast_ref::<T>())
    }

    pub fn get_as_mut<T: Manager + 'static>(&mut self) -> Option<&mut T> {
        self.managers
            .iter_mut()
            .find_map(|m| m.as_any_mut().downcast_mut::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Manager> {
        self.managers.iter().map(|m| m.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Manager>> {
        self.managers.iter_mut()
    }

    /// Translate a manager-scoped integer through the manager owning `guid`.
    /// Values of unknown managers pass through unchanged.
    pub fn remap_value(&self, guid: Guid, value: i32) -> i32 {
        self.get(guid).map_or(value, |m| m.remap_value(value))
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}
