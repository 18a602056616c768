//! Serde data file structs for schema type declarations.
//!
//! These structs define the on-disk format of `types.{ron,toml,json}`. They
//! are deserialized as written and then resolved against a registry builder
//! by [`crate::types`].

use scenefile_core::schema::{ParamKind, ScalarKind};
use serde::Deserialize;

// ===========================================================================
// Types
// ===========================================================================

/// A schema type declaration in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeData {
    pub name: String,
    pub shape: ShapeData,
    #[serde(default)]
    pub since: u32,
    #[serde(default)]
    pub deprecated: u32,
    #[serde(default)]
    pub removed: u32,
    #[serde(default)]
    pub param: Option<ParamData>,
    /// Class level this type describes; its value is marshaled generically.
    #[serde(default)]
    pub class: Option<ClassLevelData>,
    /// GUID of the plugin that provides the type, as `0x1234abcd,0x0000ffff`.
    #[serde(default)]
    pub plugin: Option<String>,
}

/// The layout of a declared type.
#[derive(Debug, Clone, Deserialize)]
pub enum ShapeData {
    Scalar { scalar: ScalarKind },
    Struct { fields: Vec<FieldData> },
    FixedArray { element: String, len: usize },
    VariableArray { element: String },
    Enum { values: Vec<EnumValueData> },
}

/// A struct member.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldData {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub since: u32,
    #[serde(default)]
    pub deprecated: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumValueData {
    pub name: String,
    pub value: i32,
}

// ===========================================================================
// Parameter and class metadata
// ===========================================================================

/// Parameter-type metadata. GUIDs are written as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamData {
    pub guid: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub derived_from: Option<String>,
    /// Class name an object-reference parameter must point at.
    #[serde(default)]
    pub target_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassLevelData {
    /// Legacy class name, e.g. `"Sound"`.
    pub class: String,
    /// Identifier the level's value is stored under.
    pub tag: u32,
}

// ===========================================================================
// TOML wrappers
// ===========================================================================

/// TOML files need a top-level table; the type list lives under `types`.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlTypes {
    pub types: Vec<TypeData>,
}
