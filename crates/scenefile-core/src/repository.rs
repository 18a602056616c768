//! The session's object store: the only place object IDs are turned into
//! object access.
//!
//! Objects live in a `SlotMap` for dense iteration; a hash index maps the
//! public [`ObjectId`] to the slot. IDs are handed out sequentially from 1
//! and never reused within a repository, so a stale ID is a plain miss.

use crate::id::{ClassId, ObjectId, ObjectKey};
use crate::object::{ObjectFlags, SceneObject};
use crate::state::ObjectState;
use slotmap::SlotMap;
use std::collections::HashMap;

#[derive(Debug)]
pub struct Repository {
    objects: SlotMap<ObjectKey, SceneObject>,
    index: HashMap<ObjectId, ObjectKey>,
    next_id: u32,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    pub fn new() -> Self {
        Self {
            objects: SlotMap::with_key(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create an object with an empty state and return its fresh ID.
    pub fn create(
        &mut self,
        class_id: ClassId,
        name: Option<String>,
        flags: ObjectFlags,
    ) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        let key = self.objects.insert(SceneObject {
            id,
            class_id,
            name,
            type_guid: None,
            flags,
            state: ObjectState::default(),
        });
        self.index.insert(id, key);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.index.get(&id).and_then(|k| self.objects.get(*k))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        let key = self.index.get(&id)?;
        self.objects.get_mut(*key)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        let key = self.index.remove(&id)?;
        self.objects.remove(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    /// Every live ID in ascending order.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// First object with `name` whose class is exactly `class_id`, lowest ID
    /// first.
    pub fn find_by_name(&self, name: &str, class_id: ClassId) -> Option<ObjectId> {
        self.objects
            .values()
            .filter(|o| o.class_id == class_id && o.name.as_deref() == Some(name))
            .map(|o| o.id)
            .min()
    }

    /// Remove every object carrying `flags`. Returns how many were removed.
    pub fn remove_flagged(&mut self, flags: ObjectFlags) -> usize {
        let doomed: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|o| o.flags.contains(flags))
            .map(|o| o.id)
            .collect();
        for id in &doomed {
            self.remove(*id);
        }
        doomed.len()
    }

    /// Drop every object. IDs keep counting from where they were.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.index.clear();
    }
}
