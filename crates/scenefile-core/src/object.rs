use crate::id::{ClassId, Guid, ObjectId};
use crate::state::ObjectState;
use serde::{Deserialize, Serialize};

/// Per-object flags, stored in the file's object directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectFlags(u32);

impl ObjectFlags {
    pub const NONE: Self = Self(0);
    /// Created by a dynamic-only load; removable as a batch.
    pub const DYNAMIC: Self = Self(0x1);
    /// Saved as a directory entry without data; resolved by name on load.
    pub const REFERENCE_ONLY: Self = Self(0x2);
    /// Stands in for a reference-only object that could not be resolved.
    pub const PLACEHOLDER: Self = Self(0x4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ObjectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A reconstructed runtime entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub id: ObjectId,
    pub class_id: ClassId,
    pub name: Option<String>,
    /// Sub-kind GUID, such as a building block's prototype.
    pub type_guid: Option<Guid>,
    pub flags: ObjectFlags,
    pub state: ObjectState,
}

impl SceneObject {
    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(ObjectFlags::DYNAMIC)
    }

    pub fn is_placeholder(&self) -> bool {
        self.flags.contains(ObjectFlags::PLACEHOLDER)
    }
}
