//! Schema type descriptors: shape, version window, parameter metadata and
//! the optional dispatch capabilities a class level supplies.

use crate::cursor::{ChunkReader, ChunkWriter};
use crate::id::{ClassId, Guid, ObjectId};
use crate::math::{Color, Mat4, Quat, Vec2, Vec3, Vec4};
use crate::pipeline::{FinalizeContext, ObjectError, ReadContext, WriteContext};
use crate::state::ObjectState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between a logical type name and its historical variant suffix,
/// as in `Widget@3`.
pub const VARIANT_SEPARATOR: char = '@';

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// Primitive payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    Byte,
    Word,
    Int,
    Dword,
    Float,
    Guid,
    ObjectId,
    String,
    Buffer,
    Vec2,
    Vec3,
    Vec4,
    Quat,
    Matrix,
    Color,
}

impl ScalarKind {
    /// In-memory size in bytes; 0 for variable-length kinds.
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Byte => 1,
            ScalarKind::Word => 2,
            ScalarKind::Bool
            | ScalarKind::Int
            | ScalarKind::Dword
            | ScalarKind::Float
            | ScalarKind::ObjectId => 4,
            ScalarKind::Guid | ScalarKind::Vec2 => 8,
            ScalarKind::Vec3 => 12,
            ScalarKind::Vec4 | ScalarKind::Quat | ScalarKind::Color => 16,
            ScalarKind::Matrix => 64,
            ScalarKind::String | ScalarKind::Buffer => 0,
        }
    }

    pub fn align(self) -> usize {
        match self {
            ScalarKind::Byte => 1,
            ScalarKind::Word => 2,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Struct,
    FixedArray { element: String, len: usize },
    VariableArray { element: String },
    Enum,
}

impl TypeKind {
    pub fn label(&self) -> &'static str {
        match self {
            TypeKind::Scalar(_) => "scalar",
            TypeKind::Struct => "struct",
            TypeKind::FixedArray { .. } => "fixed array",
            TypeKind::VariableArray { .. } => "variable array",
            TypeKind::Enum => "enum",
        }
    }
}

/// A struct member. `offset` is computed when the registry is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    pub name: String,
    pub type_name: String,
    pub offset: usize,
    pub since: u32,
    pub deprecated: u32,
}

impl FieldDesc {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            offset: 0,
            since: 0,
            deprecated: 0,
        }
    }

    pub fn since(mut self, version: u32) -> Self {
        self.since = version;
        self
    }

    pub fn deprecated(mut self, version: u32) -> Self {
        self.deprecated = version;
        self
    }

    /// Whether the field is serialized at `version`.
    pub fn is_present(&self, version: u32) -> bool {
        self.since == 0 || version >= self.since
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub value: i32,
}

impl EnumValue {
    pub fn new(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Format versions a type applies to. Zero leaves that side unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionWindow {
    pub since: u32,
    pub deprecated: u32,
    pub removed: u32,
}

impl VersionWindow {
    pub const ALWAYS: VersionWindow = VersionWindow {
        since: 0,
        deprecated: 0,
        removed: 0,
    };

    pub fn is_compatible(&self, version: u32) -> bool {
        (self.since == 0 || version >= self.since) && (self.removed == 0 || version < self.removed)
    }

    /// Advisory only; never affects compatibility.
    pub fn is_deprecated(&self, version: u32) -> bool {
        self.deprecated != 0 && version >= self.deprecated
    }
}

// ---------------------------------------------------------------------------
// Parameter metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Value,
    ObjectRef,
    Enum,
    Flags,
    Struct,
}

/// Links a schema type to the legacy parameter-type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamMeta {
    pub guid: Guid,
    pub kind: ParamKind,
    pub derived_from: Option<Guid>,
    /// Class an object-reference parameter must point at.
    pub target_class: Option<ClassId>,
}

impl ParamMeta {
    pub fn new(guid: Guid, kind: ParamKind) -> Self {
        Self {
            guid,
            kind,
            derived_from: None,
            target_class: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch capabilities
// ---------------------------------------------------------------------------

pub type ReadFn =
    fn(&mut ChunkReader<'_>, &mut ObjectState, &ReadContext<'_>) -> Result<(), ObjectError>;
pub type WriteFn =
    fn(&mut ChunkWriter<'_>, &ObjectState, &WriteContext<'_>) -> Result<(), ObjectError>;
pub type ValidateFn = fn(&ObjectState) -> Result<(), ObjectError>;
/// Returns the number of references the finalizer dropped.
pub type FinalizeFn = fn(&mut ObjectState, &FinalizeContext<'_>) -> usize;

/// Per-level serialization behavior. When present the pipeline calls these
/// instead of marshaling the type's fields generically.
#[derive(Clone, Copy)]
pub struct TypeOps {
    pub read: ReadFn,
    pub write: WriteFn,
    pub validate: Option<ValidateFn>,
    pub finalize: Option<FinalizeFn>,
}

impl TypeOps {
    pub fn new(read: ReadFn, write: WriteFn) -> Self {
        Self {
            read,
            write,
            validate: None,
            finalize: None,
        }
    }

    pub fn with_validate(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_finalize(mut self, finalize: FinalizeFn) -> Self {
        self.finalize = Some(finalize);
        self
    }
}

impl fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeOps")
            .field("validate", &self.validate.is_some())
            .field("finalize", &self.finalize.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Schema type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchemaType {
    pub name: String,
    pub kind: TypeKind,
    /// Computed at registry build; 0 for variable-length shapes.
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldDesc>,
    pub enum_values: Vec<EnumValue>,
    pub param: Option<ParamMeta>,
    pub ops: Option<TypeOps>,
    pub window: VersionWindow,
    /// Legacy class this type describes a level of.
    pub class_id: Option<ClassId>,
    /// Identifier a class level without `ops` stores its generic value under.
    pub section_tag: Option<u32>,
    /// Plugin that provides the class; recorded as a file dependency.
    pub plugin: Option<Guid>,
}

impl SchemaType {
    fn with_kind(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            size: 0,
            align: 4,
            fields: Vec::new(),
            enum_values: Vec::new(),
            param: None,
            ops: None,
            window: VersionWindow::ALWAYS,
            class_id: None,
            section_tag: None,
            plugin: None,
        }
    }

    pub fn scalar(name: &str, kind: ScalarKind) -> Self {
        Self::with_kind(name, TypeKind::Scalar(kind))
    }

    pub fn structure(name: &str, fields: Vec<FieldDesc>) -> Self {
        let mut ty = Self::with_kind(name, TypeKind::Struct);
        ty.fields = fields;
        ty
    }

    pub fn fixed_array(name: &str, element: &str, len: usize) -> Self {
        Self::with_kind(
            name,
            TypeKind::FixedArray {
                element: element.to_string(),
                len,
            },
        )
    }

    pub fn variable_array(name: &str, element: &str) -> Self {
        Self::with_kind(
            name,
            TypeKind::VariableArray {
                element: element.to_string(),
            },
        )
    }

    pub fn enumeration(name: &str, values: Vec<EnumValue>) -> Self {
        let mut ty = Self::with_kind(name, TypeKind::Enum);
        ty.enum_values = values;
        ty
    }

    /// A class level serialized by `ops`.
    pub fn class(name: &str, class_id: ClassId, ops: TypeOps) -> Self {
        let mut ty = Self::with_kind(name, TypeKind::Struct);
        ty.class_id = Some(class_id);
        ty.ops = Some(ops);
        ty
    }

    pub fn with_window(mut self, window: VersionWindow) -> Self {
        self.window = window;
        self
    }

    pub fn since(mut self, version: u32) -> Self {
        self.window.since = version;
        self
    }

    pub fn deprecated(mut self, version: u32) -> Self {
        self.window.deprecated = version;
        self
    }

    pub fn removed(mut self, version: u32) -> Self {
        self.window.removed = version;
        self
    }

    pub fn with_param(mut self, meta: ParamMeta) -> Self {
        self.param = Some(meta);
        self
    }

    pub fn with_ops(mut self, ops: TypeOps) -> Self {
        self.ops = Some(ops);
        self
    }

    /// Bind a generically marshaled type to a class level stored under `tag`.
    pub fn for_class(mut self, class_id: ClassId, tag: u32) -> Self {
        self.class_id = Some(class_id);
        self.section_tag = Some(tag);
        self
    }

    pub fn from_plugin(mut self, plugin: Guid) -> Self {
        self.plugin = Some(plugin);
        self
    }

    /// The logical name, without any `@N` variant suffix.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    pub fn is_compatible(&self, version: u32) -> bool {
        self.window.is_compatible(version)
    }

    pub fn enum_name(&self, value: i32) -> Option<&str> {
        self.enum_values
            .iter()
            .find(|e| e.value == value)
            .map(|e| e.name.as_str())
    }
}

pub fn base_name(name: &str) -> &str {
    name.split_once(VARIANT_SEPARATOR)
        .map_or(name, |(base, _)| base)
}

// ---------------------------------------------------------------------------
// Dynamic values
// ---------------------------------------------------------------------------

/// A generically marshaled value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Word(u16),
    Int(i32),
    Dword(u32),
    Float(f32),
    Guid(Guid),
    Object(ObjectId),
    String(Option<String>),
    Buffer(Vec<u8>),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    Matrix(Mat4),
    Color(Color),
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
    Enum(i32),
}

impl Value {
    pub fn label(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Word(_) => "word",
            Value::Int(_) => "int",
            Value::Dword(_) => "dword",
            Value::Float(_) => "float",
            Value::Guid(_) => "guid",
            Value::Object(_) => "object id",
            Value::String(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::Vec2(_) => "vec2",
            Value::Vec3(_) => "vec3",
            Value::Vec4(_) => "vec4",
            Value::Quat(_) => "quat",
            Value::Matrix(_) => "matrix",
            Value::Color(_) => "color",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Enum(_) => "enum",
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Every object ID held anywhere inside the value.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<ObjectId>) {
        match self {
            Value::Object(id) => out.push(*id),
            Value::Struct(fields) => fields.iter().for_each(|(_, v)| v.collect_references(out)),
            Value::Array(items) => items.iter().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Visit every object-ID slot mutably.
    pub fn for_each_reference_mut(&mut self, f: &mut dyn FnMut(&mut ObjectId)) {
        match self {
            Value::Object(id) => f(id),
            Value::Struct(fields) => fields
                .iter_mut()
                .for_each(|(_, v)| v.for_each_reference_mut(f)),
            Value::Array(items) => items.iter_mut().for_each(|v| v.for_each_reference_mut(f)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_window() {
        let w = VersionWindow {
            since: 5,
            deprecated: 7,
            removed: 9,
        };
        assert!(!w.is_compatible(4));
        assert!(w.is_compatible(5));
        assert!(w.is_compatible(8));
        assert!(!w.is_compatible(9));
        assert!(w.is_deprecated(7));
        assert!(!w.is_deprecated(6));
        assert!(VersionWindow::ALWAYS.is_compatible(0));
        assert!(VersionWindow::ALWAYS.is_compatible(u32::MAX));
    }

    #[test]
    fn variant_base_names() {
        assert_eq!(base_name("Widget@3"), "Widget");
        assert_eq!(base_name("Widget"), "Widget");
        let ty = SchemaType::scalar("Angle@2", ScalarKind::Float);
        assert_eq!(ty.base_name(), "Angle");
    }

    #[test]
    fn field_presence_ignores_deprecation() {
        let f = FieldDesc::new("speed", "Float").since(3).deprecated(4);
        assert!(!f.is_present(2));
        assert!(f.is_present(3));
        assert!(f.is_present(10));
    }

    #[test]
    fn value_references() {
        let mut v = Value::Struct(vec![
            ("target".into(), Value::Object(ObjectId(4))),
            (
                "list".into(),
                Value::Array(vec![Value::Object(ObjectId(5)), Value::Int(1)]),
            ),
        ]);
        assert_eq!(v.references(), vec![ObjectId(4), ObjectId(5)]);
        v.for_each_reference_mut(&mut |id| id.0 += 10);
        assert_eq!(v.references(), vec![ObjectId(14), ObjectId(15)]);
        assert_eq!(v.field("target"), Some(&Value::Object(ObjectId(14))));
    }

    #[test]
    fn scalar_layout() {
        assert_eq!(ScalarKind::Matrix.size(), 64);
        assert_eq!(ScalarKind::Word.align(), 2);
        assert_eq!(ScalarKind::String.size(), 0);
    }
}
