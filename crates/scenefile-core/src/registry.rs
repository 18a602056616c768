//! Schema registry: a builder that collects types, then a frozen registry
//! with name, class, version and parameter-GUID lookup.
//!
//! Versioned variants of one logical type are registered under `Base@N`
//! names and found together through [`SchemaRegistry::find_all_variants`].

use crate::chunk::ChunkError;
use crate::error::ErrorKind;
use crate::id::{ClassId, Guid};
use crate::schema::{SchemaType, TypeKind, base_name};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Index of a type inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaTypeId(pub u32);

/// Builder for constructing an immutable SchemaRegistry.
/// Three-phase lifecycle: registration -> mutation -> finalization.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    types: Vec<SchemaType>,
    by_name: HashMap<String, SchemaTypeId>,
    by_class: HashMap<ClassId, SchemaTypeId>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder pre-loaded with the scalar catalogue and the legacy class
    /// levels.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut builder = Self::new();
        crate::builtin::register_builtin_types(&mut builder)?;
        Ok(builder)
    }

    /// Phase 1: Register a type. Names are unique, and at most one type may
    /// describe a given class.
    pub fn register(&mut self, ty: SchemaType) -> Result<SchemaTypeId, RegistryError> {
        if self.by_name.contains_key(&ty.name) {
            return Err(RegistryError::AlreadyExists(ty.name));
        }
        let id = SchemaTypeId(self.types.len() as u32);
        if let Some(class) = ty.class_id {
            if let Some(existing) = self.by_class.get(&class) {
                return Err(RegistryError::ClassTaken {
                    class,
                    existing: self.types[existing.0 as usize].name.clone(),
                });
            }
            self.by_class.insert(class, id);
        }
        self.by_name.insert(ty.name.clone(), id);
        self.types.push(ty);
        Ok(id)
    }

    /// Phase 2: Mutate an existing type by name.
    pub fn mutate<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut SchemaType),
    {
        let id = self
            .by_name
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.types[id.0 as usize]);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SchemaType> {
        self.by_name
            .get(name)
            .map(|id| &self.types[id.0 as usize])
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Phase 3: Resolve references, compute layouts and freeze.
    pub fn build(mut self) -> Result<SchemaRegistry, RegistryError> {
        // Mutation may have renamed or re-bound types; rebuild both maps.
        self.by_name.clear();
        self.by_class.clear();
        for (i, ty) in self.types.iter().enumerate() {
            let id = SchemaTypeId(i as u32);
            if self.by_name.insert(ty.name.clone(), id).is_some() {
                return Err(RegistryError::AlreadyExists(ty.name.clone()));
            }
            if let Some(class) = ty.class_id
                && let Some(existing) = self.by_class.insert(class, id)
            {
                return Err(RegistryError::ClassTaken {
                    class,
                    existing: self.types[existing.0 as usize].name.clone(),
                });
            }
        }

        // Validate: every field and element reference must resolve.
        for ty in &self.types {
            for dep in dependencies(ty) {
                if !self.by_name.contains_key(dep) {
                    return Err(RegistryError::UnresolvedType {
                        owner: ty.name.clone(),
                        name: dep.to_string(),
                    });
                }
            }
        }

        let mut seen = HashMap::new();
        for ty in &self.types {
            if let Some(meta) = ty.param
                && let Some(existing) = seen.insert(meta.guid, ty.name.clone())
            {
                return Err(RegistryError::ParamGuidTaken {
                    guid: meta.guid,
                    existing,
                });
            }
        }

        let mut layouts = vec![None; self.types.len()];
        for i in 0..self.types.len() {
            let mut stack = Vec::new();
            compute_layout(&self.types, &self.by_name, i, &mut layouts, &mut stack)?;
        }
        for (i, ty) in self.types.iter_mut().enumerate() {
            let (size, align) = layouts[i].unwrap_or((0, 4));
            ty.size = size;
            ty.align = align;
        }
        // Field offsets follow natural alignment; a variable-length member
        // leaves everything after it at the member's own offset.
        for i in 0..self.types.len() {
            let mut offset = 0usize;
            let mut variable = false;
            let mut offsets = Vec::with_capacity(self.types[i].fields.len());
            for field in &self.types[i].fields {
                let (size, align) = self
                    .by_name
                    .get(&field.type_name)
                    .and_then(|id| layouts[id.0 as usize])
                    .unwrap_or((0, 4));
                if !variable {
                    offset = offset.next_multiple_of(align.max(1));
                }
                offsets.push(offset);
                if size == 0 {
                    variable = true;
                } else if !variable {
                    offset += size;
                }
            }
            for (field, offset) in self.types[i].fields.iter_mut().zip(offsets) {
                field.offset = offset;
            }
        }

        log::debug!("schema registry built with {} types", self.types.len());
        Ok(SchemaRegistry {
            types: self.types,
            by_name: self.by_name,
            by_class: self.by_class,
            param_index: OnceLock::new(),
        })
    }
}

fn dependencies(ty: &SchemaType) -> Vec<&str> {
    match &ty.kind {
        TypeKind::Struct => ty.fields.iter().map(|f| f.type_name.as_str()).collect(),
        TypeKind::FixedArray { element, .. } | TypeKind::VariableArray { element } => {
            vec![element.as_str()]
        }
        TypeKind::Scalar(_) | TypeKind::Enum => Vec::new(),
    }
}

fn compute_layout(
    types: &[SchemaType],
    by_name: &HashMap<String, SchemaTypeId>,
    index: usize,
    layouts: &mut [Option<(usize, usize)>],
    stack: &mut Vec<usize>,
) -> Result<(usize, usize), RegistryError> {
    if let Some(layout) = layouts[index] {
        return Ok(layout);
    }
    let ty = &types[index];
    if stack.contains(&index) {
        return Err(RegistryError::RecursiveType(ty.name.clone()));
    }
    stack.push(index);
    let mut child = |name: &str, stack: &mut Vec<usize>| {
        let id = by_name
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        compute_layout(types, by_name, id.0 as usize, layouts, stack)
    };
    let layout = match &ty.kind {
        TypeKind::Scalar(kind) => (kind.size(), kind.align()),
        TypeKind::Enum => (4, 4),
        TypeKind::FixedArray { element, len } => {
            let (size, align) = child(element, stack)?;
            (size * len, align)
        }
        TypeKind::VariableArray { element } => {
            let (_, align) = child(element, stack)?;
            (0, align)
        }
        TypeKind::Struct => {
            let mut offset = 0usize;
            let mut max_align = 1usize;
            let mut variable = false;
            for field in &ty.fields {
                let (size, align) = child(&field.type_name, stack)?;
                max_align = max_align.max(align);
                offset = offset.next_multiple_of(align.max(1)) + size;
                variable |= size == 0;
            }
            if variable {
                (0, max_align)
            } else {
                (offset.next_multiple_of(max_align), max_align)
            }
        }
    };
    stack.pop();
    layouts[index] = Some(layout);
    Ok(layout)
}

/// Immutable schema registry. Frozen after build(). Thread-safe to share.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: Vec<SchemaType>,
    by_name: HashMap<String, SchemaTypeId>,
    by_class: HashMap<ClassId, SchemaTypeId>,
    param_index: OnceLock<HashMap<Guid, SchemaTypeId>>,
}

impl SchemaRegistry {
    /// The scalar catalogue plus the legacy class levels.
    pub fn builtin() -> Result<Self, RegistryError> {
        SchemaRegistryBuilder::with_builtins()?.build()
    }

    pub fn get(&self, id: SchemaTypeId) -> Option<&SchemaType> {
        self.types.get(id.0 as usize)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SchemaType> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn find_by_class_id(&self, class_id: ClassId) -> Option<&SchemaType> {
        self.by_class.get(&class_id).and_then(|id| self.get(*id))
    }

    /// The type named `name` if it is compatible with `version`; otherwise
    /// the compatible variant of the same logical type with the highest
    /// `since`.
    pub fn find_for_version(&self, name: &str, version: u32) -> Option<&SchemaType> {
        if let Some(ty) = self.find_by_name(name)
            && ty.is_compatible(version)
        {
            return Some(ty);
        }
        let base = base_name(name);
        self.types
            .iter()
            .filter(|t| t.base_name() == base && t.is_compatible(version))
            .max_by_key(|t| t.window.since)
    }

    /// Every registered variant of a logical type, oldest first.
    pub fn find_all_variants(&self, name: &str) -> Vec<&SchemaType> {
        let base = base_name(name);
        let mut out: Vec<&SchemaType> = self
            .types
            .iter()
            .filter(|t| t.base_name() == base)
            .collect();
        out.sort_by_key(|t| t.window.since);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Look up a parameter type by its GUID. The index is built on first use.
    pub fn find_param(&self, guid: Guid) -> Option<&SchemaType> {
        let index = self.param_index.get_or_init(|| {
            self.types
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.param.map(|m| (m.guid, SchemaTypeId(i as u32))))
                .collect()
        });
        index.get(&guid).and_then(|id| self.get(*id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type '{0}' is already registered")]
    AlreadyExists(String),
    #[error("class {class:?} is already described by '{existing}'")]
    ClassTaken { class: ClassId, existing: String },
    #[error("parameter guid {guid} is already claimed by '{existing}'")]
    ParamGuidTaken { guid: Guid, existing: String },
    #[error("manager {0} is already registered")]
    ManagerTaken(Guid),
    #[error("type not found: {0}")]
    NotFound(String),
    #[error("'{owner}' refers to unknown type '{name}'")]
    UnresolvedType { owner: String, name: String },
    #[error("type '{0}' contains itself")]
    RecursiveType(String),
    #[error("a {type_kind} of type '{type_name}' cannot hold a {found} value")]
    ValueMismatch {
        type_name: String,
        type_kind: &'static str,
        found: &'static str,
    },
    #[error("value of type '{type_name}' is missing field '{field}'")]
    MissingField { type_name: String, field: String },
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::AlreadyExists(_)
            | RegistryError::ClassTaken { .. }
            | RegistryError::ParamGuidTaken { .. }
            | RegistryError::ManagerTaken(_) => ErrorKind::AlreadyExists,
            RegistryError::NotFound(_) | RegistryError::UnresolvedType { .. } => {
                ErrorKind::NotFound
            }
            RegistryError::RecursiveType(_)
            | RegistryError::ValueMismatch { .. }
            | RegistryError::MissingField { .. } => ErrorKind::InvalidArgument,
            RegistryError::TooDeep(_) => ErrorKind::Validation,
            RegistryError::Chunk(e) => e.kind(),
        }
    }
}
