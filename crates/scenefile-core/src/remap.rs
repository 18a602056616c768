//! Object-ID translation between file IDs and runtime IDs.
//!
//! File IDs are sequential from 0, so the file-side null reference is
//! [`FILE_NULL_ID`] rather than 0. Runtime IDs start at 1 and use 0 as null.
//!
//! Loading is two-pass: every declared object gets a runtime ID and an entry
//! in a [`LoadRemapTable`] before any payload is read, the table is frozen,
//! and only then are chunks rewritten in place through their ID lists.
//! Saving builds a [`SaveRemapPlan`] over exactly the objects being written.

use crate::chunk::Chunk;
use crate::error::ErrorKind;
use crate::id::ObjectId;
use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

/// The null reference inside a file.
pub const FILE_NULL_ID: ObjectId = ObjectId(u32::MAX);

#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("remap table is frozen")]
    Frozen,
    #[error("remap table must be frozen before rewriting")]
    NotFrozen,
    #[error("file id {0} declared twice")]
    DuplicateFileId(ObjectId),
    #[error("runtime id {runtime} for file id {file} is already the target of file id {existing}")]
    DuplicateRuntimeId {
        file: ObjectId,
        runtime: ObjectId,
        existing: ObjectId,
    },
    #[error("null id cannot be mapped")]
    NullId,
}

impl RemapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemapError::Frozen | RemapError::NotFrozen => ErrorKind::InvalidState,
            RemapError::DuplicateFileId(_) | RemapError::DuplicateRuntimeId { .. } => {
                ErrorKind::AlreadyExists
            }
            RemapError::NullId => ErrorKind::InvalidArgument,
        }
    }
}

/// Tally of one or more chunk rewrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapOutcome {
    /// Slots translated through the table.
    pub rewritten: usize,
    /// Slots whose ID had no entry and were set to null.
    pub zeroed: usize,
}

impl AddAssign for RemapOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.rewritten += rhs.rewritten;
        self.zeroed += rhs.zeroed;
    }
}

// ---------------------------------------------------------------------------
// Load direction
// ---------------------------------------------------------------------------

/// File ID to runtime ID, built during object creation and frozen before any
/// reference is rewritten.
#[derive(Debug, Default)]
pub struct LoadRemapTable {
    entries: Vec<(ObjectId, ObjectId)>,
    forward: HashMap<ObjectId, ObjectId>,
    targets: HashMap<ObjectId, ObjectId>,
    frozen: bool,
}

impl LoadRemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `file` is `runtime` in this session. The mapping must stay
    /// injective.
    pub fn insert(&mut self, file: ObjectId, runtime: ObjectId) -> Result<(), RemapError> {
        if self.frozen {
            return Err(RemapError::Frozen);
        }
        if file == FILE_NULL_ID || runtime.is_null() {
            return Err(RemapError::NullId);
        }
        if self.forward.contains_key(&file) {
            return Err(RemapError::DuplicateFileId(file));
        }
        if let Some(&existing) = self.targets.get(&runtime) {
            return Err(RemapError::DuplicateRuntimeId {
                file,
                runtime,
                existing,
            });
        }
        self.forward.insert(file, runtime);
        self.targets.insert(runtime, file);
        self.entries.push((file, runtime));
        Ok(())
    }

    /// Whether `runtime` is already the target of some file ID.
    pub fn is_target(&self, runtime: ObjectId) -> bool {
        self.targets.contains_key(&runtime)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn lookup(&self, file: ObjectId) -> Option<ObjectId> {
        self.forward.get(&file).copied()
    }

    /// `(file, runtime)` pairs in insertion order.
    pub fn entries(&self) -> &[(ObjectId, ObjectId)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite every object-ID slot of `chunk` (sub-chunks included) from
    /// file IDs to runtime IDs. An undeclared ID becomes null.
    pub fn rewrite(&self, chunk: &mut Chunk) -> Result<RemapOutcome, RemapError> {
        if !self.frozen {
            return Err(RemapError::NotFrozen);
        }
        let mut outcome = RemapOutcome::default();
        chunk.remap_ids(&mut |file| {
            if file == FILE_NULL_ID {
                return ObjectId::NULL;
            }
            match self.lookup(file) {
                Some(runtime) => {
                    outcome.rewritten += 1;
                    runtime
                }
                None => {
                    outcome.zeroed += 1;
                    ObjectId::NULL
                }
            }
        });
        if outcome.zeroed > 0 {
            log::warn!(
                "{} references to undeclared objects set to null",
                outcome.zeroed
            );
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Save direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub runtime: ObjectId,
    pub file: ObjectId,
    /// Pulled in as a dependency, not requested.
    pub reference_only: bool,
}

/// Runtime ID to sequential file ID for one save.
#[derive(Debug, Default)]
pub struct SaveRemapPlan {
    entries: Vec<PlanEntry>,
    forward: HashMap<ObjectId, usize>,
    used: HashSet<ObjectId>,
    next: u32,
    remapped: usize,
    reference_only: usize,
    conflicts: usize,
}

impl SaveRemapPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next file ID to `runtime`, or return the one it already
    /// has. Requesting an object previously added as a dependency promotes
    /// it to a full entry.
    pub fn assign(
        &mut self,
        runtime: ObjectId,
        reference_only: bool,
    ) -> Result<ObjectId, RemapError> {
        if runtime.is_null() {
            return Err(RemapError::NullId);
        }
        if let Some(&i) = self.forward.get(&runtime) {
            let entry = &mut self.entries[i];
            if entry.reference_only && !reference_only {
                entry.reference_only = false;
                self.reference_only -= 1;
            }
            return Ok(entry.file);
        }
        let mut file = ObjectId(self.next);
        while self.used.contains(&file) {
            self.conflicts += 1;
            self.next += 1;
            file = ObjectId(self.next);
        }
        self.next += 1;
        self.used.insert(file);
        if file != runtime {
            self.remapped += 1;
        }
        if reference_only {
            self.reference_only += 1;
        }
        self.forward.insert(runtime, self.entries.len());
        self.entries.push(PlanEntry {
            runtime,
            file,
            reference_only,
        });
        Ok(file)
    }

    pub fn lookup(&self, runtime: ObjectId) -> Option<ObjectId> {
        self.forward.get(&runtime).map(|&i| self.entries[i].file)
    }

    pub fn entry(&self, runtime: ObjectId) -> Option<&PlanEntry> {
        self.forward.get(&runtime).map(|&i| &self.entries[i])
    }

    /// Entries in assignment order.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose file ID differs from their runtime ID.
    pub fn remapped(&self) -> usize {
        self.remapped
    }

    pub fn reference_only(&self) -> usize {
        self.reference_only
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    /// Highest file ID assigned, if any.
    pub fn max_file_id(&self) -> Option<ObjectId> {
        self.entries.iter().map(|e| e.file).max()
    }

    /// Rewrite every object-ID slot of `chunk` from runtime IDs to file IDs.
    /// An ID outside the plan becomes the file null.
    pub fn rewrite(&self, chunk: &mut Chunk) -> RemapOutcome {
        let mut outcome = RemapOutcome::default();
        chunk.remap_ids(&mut |runtime| {
            if runtime.is_null() {
                return FILE_NULL_ID;
            }
            match self.lookup(runtime) {
                Some(file) => {
                    outcome.rewritten += 1;
                    file
                }
                None => {
                    outcome.zeroed += 1;
                    FILE_NULL_ID
                }
            }
        });
        if outcome.zeroed > 0 {
            log::warn!(
                "{} references to unsaved objects written as null",
                outcome.zeroed
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ClassId;

    fn chunk_with(ids: &[u32]) -> Chunk {
        let mut chunk = Chunk::new(ClassId(0), 0);
        let mut w = chunk.start_write();
        for &id in ids {
            w.write_object_id(ObjectId(id));
        }
        drop(w);
        chunk
    }

    #[test]
    fn load_table_rejects_duplicates_and_late_inserts() {
        let mut t = LoadRemapTable::new();
        t.insert(ObjectId(0), ObjectId(5)).unwrap();
        assert!(matches!(
            t.insert(ObjectId(0), ObjectId(6)),
            Err(RemapError::DuplicateFileId(_))
        ));
        assert!(matches!(
            t.insert(ObjectId(1), ObjectId(5)),
            Err(RemapError::DuplicateRuntimeId { .. })
        ));
        assert!(matches!(
            t.insert(FILE_NULL_ID, ObjectId(9)),
            Err(RemapError::NullId)
        ));
        t.freeze();
        assert_eq!(
            t.insert(ObjectId(2), ObjectId(7)).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn rewrite_requires_freeze() {
        let t = LoadRemapTable::new();
        let mut chunk = chunk_with(&[0]);
        assert!(matches!(t.rewrite(&mut chunk), Err(RemapError::NotFrozen)));
    }

    #[test]
    fn load_rewrite_zeroes_misses() {
        let mut t = LoadRemapTable::new();
        t.insert(ObjectId(0), ObjectId(11)).unwrap();
        t.insert(ObjectId(1), ObjectId(12)).unwrap();
        t.freeze();
        let mut chunk = chunk_with(&[1, 0, 7, u32::MAX]);
        let outcome = t.rewrite(&mut chunk).unwrap();
        assert_eq!(outcome, RemapOutcome { rewritten: 2, zeroed: 1 });
        assert_eq!(chunk.words(), &[12, 11, 0, 0]);
    }

    #[test]
    fn save_plan_is_sequential_and_counts() {
        let mut plan = SaveRemapPlan::new();
        assert_eq!(plan.assign(ObjectId(7), false).unwrap(), ObjectId(0));
        assert_eq!(plan.assign(ObjectId(1), true).unwrap(), ObjectId(1));
        assert_eq!(plan.assign(ObjectId(7), false).unwrap(), ObjectId(0));
        assert_eq!(plan.reference_only(), 1);
        assert_eq!(plan.assign(ObjectId(1), false).unwrap(), ObjectId(1));
        assert_eq!(plan.reference_only(), 0);
        assert_eq!(plan.remapped(), 1);
        assert_eq!(plan.conflicts(), 0);
        assert_eq!(plan.max_file_id(), Some(ObjectId(1)));
    }

    #[test]
    fn save_rewrite_maps_null_and_misses_to_file_null() {
        let mut plan = SaveRemapPlan::new();
        plan.assign(ObjectId(4), false).unwrap();
        let mut chunk = chunk_with(&[4, 0, 9]);
        let outcome = plan.rewrite(&mut chunk);
        assert_eq!(outcome, RemapOutcome { rewritten: 1, zeroed: 1 });
        assert_eq!(chunk.words(), &[0, u32::MAX, u32::MAX]);
    }
}
