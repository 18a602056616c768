//! Field-by-field marshaling of schema types without dispatch capabilities.

use crate::cursor::{ChunkReader, ChunkWriter};
use crate::registry::{RegistryError, SchemaRegistry};
use crate::schema::{ScalarKind, SchemaType, TypeKind, Value};

/// Deepest struct/array nesting marshaled before giving up.
pub const MAX_VALUE_DEPTH: usize = 16;

impl SchemaRegistry {
    /// Read a value of `ty`. Struct fields outside their version window at
    /// `version` are skipped.
    pub fn read_value(
        &self,
        ty: &SchemaType,
        r: &mut ChunkReader<'_>,
        version: u32,
    ) -> Result<Value, RegistryError> {
        self.read_at(ty, r, version, 0)
    }

    pub fn write_value(
        &self,
        ty: &SchemaType,
        value: &Value,
        w: &mut ChunkWriter<'_>,
        version: u32,
    ) -> Result<(), RegistryError> {
        self.write_at(ty, value, w, version, 0)
    }

    fn resolve(&self, name: &str) -> Result<&SchemaType, RegistryError> {
        self.find_by_name(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn read_at(
        &self,
        ty: &SchemaType,
        r: &mut ChunkReader<'_>,
        version: u32,
        depth: usize,
    ) -> Result<Value, RegistryError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RegistryError::TooDeep(MAX_VALUE_DEPTH));
        }
        let value = match &ty.kind {
            TypeKind::Scalar(kind) => read_scalar(*kind, r)?,
            TypeKind::Enum => Value::Enum(r.read_int()?),
            TypeKind::Struct => {
                let mut fields = Vec::with_capacity(ty.fields.len());
                for field in ty.fields.iter().filter(|f| f.is_present(version)) {
                    let field_ty = self.resolve(&field.type_name)?;
                    let v = self.read_at(field_ty, r, version, depth + 1)?;
                    fields.push((field.name.clone(), v));
                }
                Value::Struct(fields)
            }
            TypeKind::FixedArray { element, len } => {
                let element_ty = self.resolve(element)?;
                let mut items = Vec::with_capacity((*len).min(r.remaining()));
                for _ in 0..*len {
                    items.push(self.read_at(element_ty, r, version, depth + 1)?);
                }
                Value::Array(items)
            }
            TypeKind::VariableArray { element } => {
                let element_ty = self.resolve(element)?;
                let count = r.read_sequence_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_at(element_ty, r, version, depth + 1)?);
                }
                Value::Array(items)
            }
        };
        Ok(value)
    }

    fn write_at(
        &self,
        ty: &SchemaType,
        value: &Value,
        w: &mut ChunkWriter<'_>,
        version: u32,
        depth: usize,
    ) -> Result<(), RegistryError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RegistryError::TooDeep(MAX_VALUE_DEPTH));
        }
        let mismatch = || RegistryError::ValueMismatch {
            type_name: ty.name.clone(),
            type_kind: ty.kind.label(),
            found: value.label(),
        };
        match (&ty.kind, value) {
            (TypeKind::Scalar(kind), v) => write_scalar(*kind, v, w).ok_or_else(mismatch)?,
            (TypeKind::Enum, Value::Enum(v) | Value::Int(v)) => w.write_int(*v),
            (TypeKind::Struct, Value::Struct(_)) => {
                for field in ty.fields.iter().filter(|f| f.is_present(version)) {
                    let field_ty = self.resolve(&field.type_name)?;
                    let v = value
                        .field(&field.name)
                        .ok_or_else(|| RegistryError::MissingField {
                            type_name: ty.name.clone(),
                            field: field.name.clone(),
                        })?;
                    self.write_at(field_ty, v, w, version, depth + 1)?;
                }
            }
            (TypeKind::FixedArray { element, len }, Value::Array(items)) => {
                if items.len() != *len {
                    return Err(mismatch());
                }
                let element_ty = self.resolve(element)?;
                for item in items {
                    self.write_at(element_ty, item, w, version, depth + 1)?;
                }
            }
            (TypeKind::VariableArray { element }, Value::Array(items)) => {
                let element_ty = self.resolve(element)?;
                w.write_dword(items.len() as u32);
                for item in items {
                    self.write_at(element_ty, item, w, version, depth + 1)?;
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

fn read_scalar(kind: ScalarKind, r: &mut ChunkReader<'_>) -> Result<Value, RegistryError> {
    let value = match kind {
        ScalarKind::Bool => Value::Bool(r.read_bool()?),
        ScalarKind::Byte => Value::Byte(r.read_byte()?),
        ScalarKind::Word => Value::Word(r.read_word()?),
        ScalarKind::Int => Value::Int(r.read_int()?),
        ScalarKind::Dword => Value::Dword(r.read_dword()?),
        ScalarKind::Float => Value::Float(r.read_float()?),
        ScalarKind::Guid => Value::Guid(r.read_guid()?),
        ScalarKind::ObjectId => Value::Object(r.read_object_id()?),
        ScalarKind::String => Value::String(r.read_string()?),
        ScalarKind::Buffer => Value::Buffer(r.read_buffer()?),
        ScalarKind::Vec2 => Value::Vec2(r.read_vec2()?),
        ScalarKind::Vec3 => Value::Vec3(r.read_vec3()?),
        ScalarKind::Vec4 => Value::Vec4(r.read_vec4()?),
        ScalarKind::Quat => Value::Quat(r.read_quat()?),
        ScalarKind::Matrix => Value::Matrix(r.read_matrix()?),
        ScalarKind::Color => Value::Color(r.read_color()?),
    };
    Ok(value)
}

/// `None` when `value` does not fit `kind`.
fn write_scalar(kind: ScalarKind, value: &Value, w: &mut ChunkWriter<'_>) -> Option<()> {
    match (kind, value) {
        (ScalarKind::Bool, Value::Bool(v)) => w.write_bool(*v),
        (ScalarKind::Byte, Value::Byte(v)) => w.write_byte(*v),
        (ScalarKind::Word, Value::Word(v)) => w.write_word(*v),
        (ScalarKind::Int, Value::Int(v)) => w.write_int(*v),
        (ScalarKind::Dword, Value::Dword(v)) => w.write_dword(*v),
        (ScalarKind::Float, Value::Float(v)) => w.write_float(*v),
        (ScalarKind::Guid, Value::Guid(v)) => w.write_guid(*v),
        (ScalarKind::ObjectId, Value::Object(v)) => w.write_object_id(*v),
        (ScalarKind::String, Value::String(v)) => w.write_string(v.as_deref()),
        (ScalarKind::Buffer, Value::Buffer(v)) => w.write_buffer(v),
        (ScalarKind::Vec2, Value::Vec2(v)) => w.write_vec2(*v),
        (ScalarKind::Vec3, Value::Vec3(v)) => w.write_vec3(*v),
        (ScalarKind::Vec4, Value::Vec4(v)) => w.write_vec4(*v),
        (ScalarKind::Quat, Value::Quat(v)) => w.write_quat(*v),
        (ScalarKind::Matrix, Value::Matrix(v)) => w.write_matrix(*v),
        (ScalarKind::Color, Value::Color(v)) => w.write_color(*v),
        _ => return None,
    }
    Some(())
}
