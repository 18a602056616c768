//! Resolves declared schema types into registry registrations.

use crate::loader::{
    DataLoadError, check_duplicate, deserialize_list, find_data_file, resolve_name,
};
use crate::schema::{ShapeData, TypeData};
use scenefile_core::class::ClassHierarchy;
use scenefile_core::id::{ClassId, Guid};
use scenefile_core::registry::{SchemaRegistryBuilder, SchemaTypeId};
use scenefile_core::schema::{EnumValue, FieldDesc, ParamMeta, SchemaType};
use std::collections::HashMap;
use std::path::Path;

/// Register every type in `dir/types.*` with `builder`. A directory without
/// a types file contributes nothing.
pub fn load_types(
    dir: &Path,
    builder: &mut SchemaRegistryBuilder,
) -> Result<Vec<SchemaTypeId>, DataLoadError> {
    let Some(path) = find_data_file(dir, "types")? else {
        return Ok(Vec::new());
    };
    let types: Vec<TypeData> = deserialize_list(&path, "types")?;
    resolve_types(&types, builder, &path)
}

/// Check names and references in `types`, then register them in order.
/// `file` is only used for error messages.
pub fn resolve_types(
    types: &[TypeData],
    builder: &mut SchemaRegistryBuilder,
    file: &Path,
) -> Result<Vec<SchemaTypeId>, DataLoadError> {
    let mut declared: HashMap<String, usize> = HashMap::new();
    for (i, ty) in types.iter().enumerate() {
        check_duplicate(&declared, &ty.name, file)?;
        if builder.contains(&ty.name) {
            return Err(DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: ty.name.clone(),
            });
        }
        declared.insert(ty.name.clone(), i);
    }

    let classes: HashMap<String, ClassId> = ClassHierarchy::legacy()
        .iter()
        .map(|e| (e.name.to_string(), e.id))
        .collect();

    let mut resolved = Vec::with_capacity(types.len());
    for ty in types {
        for dep in dependencies(&ty.shape) {
            if !declared.contains_key(dep) && !builder.contains(dep) {
                return Err(DataLoadError::UnresolvedRef {
                    file: file.to_path_buf(),
                    name: dep.to_string(),
                    expected_kind: "type",
                });
            }
        }
        resolved.push(to_schema_type(ty, &classes, file)?);
    }

    let mut ids = Vec::with_capacity(resolved.len());
    for ty in resolved {
        log::debug!("registering {} '{}'", ty.kind.label(), ty.name);
        ids.push(builder.register(ty)?);
    }
    Ok(ids)
}

fn dependencies(shape: &ShapeData) -> Vec<&str> {
    match shape {
        ShapeData::Struct { fields } => fields.iter().map(|f| f.type_name.as_str()).collect(),
        ShapeData::FixedArray { element, .. } | ShapeData::VariableArray { element } => {
            vec![element.as_str()]
        }
        ShapeData::Scalar { .. } | ShapeData::Enum { .. } => Vec::new(),
    }
}

fn parse_guid(text: &str, file: &Path) -> Result<Guid, DataLoadError> {
    text.parse().map_err(|source| DataLoadError::InvalidGuid {
        file: file.to_path_buf(),
        source,
    })
}

fn to_schema_type(
    data: &TypeData,
    classes: &HashMap<String, ClassId>,
    file: &Path,
) -> Result<SchemaType, DataLoadError> {
    let mut ty = match &data.shape {
        ShapeData::Scalar { scalar } => SchemaType::scalar(&data.name, *scalar),
        ShapeData::Struct { fields } => SchemaType::structure(
            &data.name,
            fields
                .iter()
                .map(|f| {
                    FieldDesc::new(&f.name, &f.type_name)
                        .since(f.since)
                        .deprecated(f.deprecated)
                })
                .collect(),
        ),
        ShapeData::FixedArray { element, len } => {
            SchemaType::fixed_array(&data.name, element, *len)
        }
        ShapeData::VariableArray { element } => SchemaType::variable_array(&data.name, element),
        ShapeData::Enum { values } => SchemaType::enumeration(
            &data.name,
            values
                .iter()
                .map(|v| EnumValue::new(&v.name, v.value))
                .collect(),
        ),
    }
    .since(data.since)
    .deprecated(data.deprecated)
    .removed(data.removed);

    if let Some(param) = &data.param {
        let mut meta = ParamMeta::new(parse_guid(&param.guid, file)?, param.kind);
        if let Some(base) = &param.derived_from {
            meta.derived_from = Some(parse_guid(base, file)?);
        }
        if let Some(class) = &param.target_class {
            meta.target_class = Some(*resolve_name(classes, class, file, "class")?);
        }
        ty = ty.with_param(meta);
    }
    if let Some(level) = &data.class {
        let class = *resolve_name(classes, &level.class, file, "class")?;
        ty = ty.for_class(class, level.tag);
    }
    if let Some(plugin) = &data.plugin {
        ty = ty.from_plugin(parse_guid(plugin, file)?);
    }
    Ok(ty)
}
