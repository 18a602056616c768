use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;
use std::str::FromStr;

new_key_type! {
    /// Handle to a chunk held by a session arena.
    pub struct ChunkKey;

    /// Handle to an object's slot in the repository's dense storage.
    pub struct ObjectKey;
}

/// Identifies an object. Inside a file this is a file ID; once loaded it is
/// a runtime ID unique within the session. Zero is the null reference.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The null reference.
    pub const NULL: ObjectId = ObjectId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a class in the legacy class tree. Cheap to copy and compare.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClassId(pub u32);

/// Two-DWORD identifier used for managers, plugins and parameter types.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Guid {
    pub d1: u32,
    pub d2: u32,
}

impl Guid {
    pub const NULL: Guid = Guid { d1: 0, d2: 0 };

    pub const fn new(d1: u32, d2: u32) -> Self {
        Self { d1, d2 }
    }

    pub fn is_null(self) -> bool {
        self.d1 == 0 && self.d2 == 0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x},0x{:08x}", self.d1, self.d2)
    }
}

/// Error returned when a GUID string is not of the form `0x1234abcd,0x0000ffff`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed guid '{0}'")]
pub struct ParseGuidError(pub String);

impl FromStr for Guid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGuidError(s.to_string());
        let (a, b) = s.split_once(',').ok_or_else(err)?;
        let parse = |part: &str| {
            let part = part.trim();
            let digits = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            u32::from_str_radix(digits, 16).map_err(|_| err())
        };
        Ok(Guid::new(parse(a)?, parse(b)?))
    }
}
