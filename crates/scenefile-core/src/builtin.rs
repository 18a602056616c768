//! Built-in schema types: the scalar catalogue, the common parameter types
//! and the dispatch functions of the legacy class levels.
//!
//! Every class level stores its data in identifier sections. Sections whose
//! data is at its default are not written; a reader treats an absent section
//! as the default. Required sections are noted on their tag.

use crate::chunk::ChunkError;
use crate::cursor::{ChunkReader, ChunkWriter};
use crate::id::{ClassId, Guid, ObjectId};
use crate::manager::ATTRIBUTE_MANAGER_GUID;
use crate::pipeline::{FinalizeContext, ObjectError, ReadContext, WriteContext};
use crate::registry::{RegistryError, SchemaRegistryBuilder};
use crate::schema::{ParamKind, ParamMeta, ScalarKind, SchemaType, TypeOps, Value};
use crate::state::{
    Attribute, BehaviorState, ClassState, GroupState, IoState, LinkState, ObjectState,
    OperationState, ParamSource, ParamValue, ParameterInState, ParameterState, Visibility,
};

// ---------------------------------------------------------------------------
// Section tags
// ---------------------------------------------------------------------------

pub const OBJECT_HIDDEN: u32 = 0x0000_0010;
pub const OBJECT_HIERARCHY_HIDDEN: u32 = 0x0000_0018;

pub const BEOBJECT_SCRIPTS: u32 = 0x0000_1000;
pub const BEOBJECT_PRIORITY: u32 = 0x0000_2000;
pub const BEOBJECT_ATTRIBUTES: u32 = 0x0000_4000;

pub const GROUP_MEMBERS: u32 = 0x0010_0000;

/// Required.
pub const BEHAVIOR_MAIN: u32 = 0x0020_0000;
pub const BEHAVIOR_OWNER: u32 = 0x0020_0001;

/// Required.
pub const LINK_IO: u32 = 0x0030_0000;
pub const LINK_DELAY: u32 = 0x0030_0001;

pub const IO_MAIN: u32 = 0x0040_0000;

/// Required.
pub const PARAM_TYPE: u32 = 0x0050_0000;
pub const PARAM_VALUE: u32 = 0x0050_0001;
pub const PARAM_OWNER: u32 = 0x0050_0002;
pub const PARAMOUT_DESTINATIONS: u32 = 0x0051_0000;
pub const PARAMLOCAL_SETTING: u32 = 0x0052_0000;

/// Required.
pub const PARAMIN_MAIN: u32 = 0x0060_0000;
pub const PARAMIN_OWNER: u32 = 0x0060_0001;

/// Required.
pub const PARAMOP_MAIN: u32 = 0x0070_0000;

// Priority record flags.
const PRIORITY_PRESENT: u32 = 0x1;
const PRIORITY_WAITING: u32 = 0x2;

// Behavior flags. These four are derived from the optional fields on write
// and stripped from `BehaviorState::flags` on read.
pub const BEHAVIOR_GRAPH: u32 = 0x0000_0001;
pub const BEHAVIOR_HAS_PRIORITY: u32 = 0x0000_0100;
pub const BEHAVIOR_COMPATIBLE_CLASS: u32 = 0x0000_0200;
pub const BEHAVIOR_TARGETABLE: u32 = 0x0000_0400;
const DERIVED_FLAGS: u32 =
    BEHAVIOR_GRAPH | BEHAVIOR_HAS_PRIORITY | BEHAVIOR_COMPATIBLE_CLASS | BEHAVIOR_TARGETABLE;

// Parameter value encodings.
const VALUE_RAW: u32 = 0;
const VALUE_TYPED: u32 = 1;

// ---------------------------------------------------------------------------
// Parameter type GUIDs
// ---------------------------------------------------------------------------

pub const PARAM_BOOL: Guid = Guid::new(0x1ad5_2a8e, 0x5e74_1920);
pub const PARAM_INT: Guid = Guid::new(0x5a57_16fd, 0x44e2_76d7);
pub const PARAM_DWORD: Guid = Guid::new(0x6f5a_3b2c, 0x1d2e_7f40);
pub const PARAM_FLOAT: Guid = Guid::new(0x4788_4c3f, 0x432c_2c20);
pub const PARAM_GUID: Guid = Guid::new(0x3cb0_4f4b, 0x6e42_5b31);
pub const PARAM_STRING: Guid = Guid::new(0x6bfc_3b5d, 0x2c95_4811);
pub const PARAM_VECTOR2D: Guid = Guid::new(0x4efc_b34a, 0x6079_e42f);
pub const PARAM_VECTOR: Guid = Guid::new(0x48a0_7d6c, 0x3d4d_0a7f);
pub const PARAM_QUATERNION: Guid = Guid::new(0x06bc_7d5b, 0x1c6e_28b1);
pub const PARAM_MATRIX: Guid = Guid::new(0x643c_6d2e, 0x2aa6_4d33);
pub const PARAM_COLOR: Guid = Guid::new(0x57d0_4e45, 0x1b2f_5d8e);
pub const PARAM_OBJECT: Guid = Guid::new(0x30ff_289b, 0x2a36_02d8);
pub const PARAM_GROUP: Guid = Guid::new(0x5bec_2b79, 0x4bf0_1a53);

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Register the scalar catalogue, the common parameter types and every
/// built-in class level.
pub fn register_builtin_types(b: &mut SchemaRegistryBuilder) -> Result<(), RegistryError> {
    let value = |guid| ParamMeta::new(guid, ParamKind::Value);
    let scalars = [
        ("Bool", ScalarKind::Bool, Some(value(PARAM_BOOL))),
        ("Byte", ScalarKind::Byte, None),
        ("Word", ScalarKind::Word, None),
        ("Int", ScalarKind::Int, Some(value(PARAM_INT))),
        ("Dword", ScalarKind::Dword, Some(value(PARAM_DWORD))),
        ("Float", ScalarKind::Float, Some(value(PARAM_FLOAT))),
        ("Guid", ScalarKind::Guid, Some(value(PARAM_GUID))),
        (
            "ObjectId",
            ScalarKind::ObjectId,
            Some(ParamMeta {
                target_class: Some(ClassId::OBJECT),
                ..ParamMeta::new(PARAM_OBJECT, ParamKind::ObjectRef)
            }),
        ),
        ("String", ScalarKind::String, Some(value(PARAM_STRING))),
        ("Buffer", ScalarKind::Buffer, None),
        ("Vector2D", ScalarKind::Vec2, Some(value(PARAM_VECTOR2D))),
        ("Vector", ScalarKind::Vec3, Some(value(PARAM_VECTOR))),
        ("Vector4", ScalarKind::Vec4, None),
        ("Quaternion", ScalarKind::Quat, Some(value(PARAM_QUATERNION))),
        ("Matrix", ScalarKind::Matrix, Some(value(PARAM_MATRIX))),
        ("Color", ScalarKind::Color, Some(value(PARAM_COLOR))),
    ];
    for (name, kind, param) in scalars {
        let mut ty = SchemaType::scalar(name, kind);
        ty.param = param;
        b.register(ty)?;
    }
    b.register(
        SchemaType::scalar("GroupRef", ScalarKind::ObjectId).with_param(ParamMeta {
            derived_from: Some(PARAM_OBJECT),
            target_class: Some(ClassId::GROUP),
            ..ParamMeta::new(PARAM_GROUP, ParamKind::ObjectRef)
        }),
    )?;

    let noop = TypeOps::new(read_nothing, write_nothing);
    let levels = [
        (
            "Object",
            ClassId::OBJECT,
            TypeOps::new(read_object, write_object).with_finalize(finalize_object),
        ),
        ("SceneObject", ClassId::SCENE_OBJECT, noop),
        (
            "BeObject",
            ClassId::BE_OBJECT,
            TypeOps::new(read_be_object, write_be_object),
        ),
        ("Group", ClassId::GROUP, TypeOps::new(read_group, write_group)),
        (
            "Behavior",
            ClassId::BEHAVIOR,
            TypeOps::new(read_behavior, write_behavior).with_validate(validate_behavior),
        ),
        (
            "BehaviorLink",
            ClassId::BEHAVIOR_LINK,
            TypeOps::new(read_link, write_link),
        ),
        ("BehaviorIO", ClassId::BEHAVIOR_IO, TypeOps::new(read_io, write_io)),
        (
            "Parameter",
            ClassId::PARAMETER,
            TypeOps::new(read_parameter, write_parameter).with_finalize(finalize_parameter),
        ),
        (
            "ParameterOut",
            ClassId::PARAMETER_OUT,
            TypeOps::new(read_parameter_out, write_parameter_out),
        ),
        (
            "ParameterLocal",
            ClassId::PARAMETER_LOCAL,
            TypeOps::new(read_parameter_local, write_parameter_local),
        ),
        (
            "ParameterIn",
            ClassId::PARAMETER_IN,
            TypeOps::new(read_parameter_in, write_parameter_in),
        ),
        (
            "ParameterOperation",
            ClassId::PARAMETER_OPERATION,
            TypeOps::new(read_operation, write_operation),
        ),
    ];
    for (name, class, ops) in levels {
        b.register(SchemaType::class(name, class, ops))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Section helpers
// ---------------------------------------------------------------------------

/// Seek an optional section and read it with `f`. An absent section yields
/// `None`. A malformed one is logged, left to be preserved verbatim, and
/// also yields `None`; only fatal errors propagate.
fn optional<'c, T>(
    r: &mut ChunkReader<'c>,
    tag: u32,
    what: &str,
    f: impl FnOnce(&mut ChunkReader<'c>) -> Result<T, ChunkError>,
) -> Result<Option<T>, ObjectError> {
    if !r.seek_identifier(tag) {
        return Ok(None);
    }
    match f(r) {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind().is_fatal() => Err(e.into()),
        Err(e) => {
            log::warn!("skipping malformed {what} section: {e}");
            r.release_section();
            Ok(None)
        }
    }
}

fn required(r: &mut ChunkReader<'_>, tag: u32, level: &'static str) -> Result<(), ObjectError> {
    if r.seek_identifier(tag) {
        Ok(())
    } else {
        Err(ObjectError::MissingSection { level, tag })
    }
}

fn read_nothing(
    _r: &mut ChunkReader<'_>,
    _state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    Ok(())
}

fn write_nothing(
    _w: &mut ChunkWriter<'_>,
    _state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

fn read_object(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    // Most specific first; the two are mutually exclusive on disk.
    state.visibility = if r.seek_identifier(OBJECT_HIERARCHY_HIDDEN) {
        Visibility::HierarchicallyHidden
    } else if r.seek_identifier(OBJECT_HIDDEN) {
        Visibility::Hidden
    } else {
        Visibility::Visible
    };
    Ok(())
}

fn write_object(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    match state.visibility {
        Visibility::Visible => {}
        Visibility::Hidden => w.write_identifier(OBJECT_HIDDEN),
        Visibility::HierarchicallyHidden => w.write_identifier(OBJECT_HIERARCHY_HIDDEN),
    }
    Ok(())
}

/// Drop references to objects that do not exist in the repository.
fn finalize_object(state: &mut ObjectState, ctx: &FinalizeContext<'_>) -> usize {
    let dropped = state.drop_dangling(&|id| ctx.repository.contains(id));
    if dropped > 0 {
        log::warn!(
            "object {} dropped {dropped} dangling references",
            ctx.object
        );
    }
    dropped
}

// ---------------------------------------------------------------------------
// BeObject
// ---------------------------------------------------------------------------

fn read_be_object(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    let scripts = optional(r, BEOBJECT_SCRIPTS, "scripts", |r| r.read_object_sequence())?;
    let priority = optional(r, BEOBJECT_PRIORITY, "priority", |r| {
        let flags = r.read_dword()?;
        let priority = if flags & PRIORITY_PRESENT != 0 {
            r.read_int()?
        } else {
            0
        };
        Ok((priority, flags & PRIORITY_WAITING != 0))
    })?;
    let attributes = optional(r, BEOBJECT_ATTRIBUTES, "attributes", |r| {
        let params = r.read_object_sequence()?;
        let (guid, types) = r.read_manager_sequence()?;
        Ok((params, guid, types))
    })?;

    let be = state.behavioral_mut();
    if let Some(scripts) = scripts {
        be.scripts = scripts;
    }
    if let Some((priority, waiting)) = priority {
        be.priority = priority;
        be.waiting_for_message = waiting;
    }
    if let Some((params, guid, types)) = attributes {
        if guid != ATTRIBUTE_MANAGER_GUID {
            log::warn!("attributes section belongs to manager {guid}; skipped");
            r.release_section();
        } else if params.len() != types.len() {
            log::warn!(
                "attributes section pairs {} parameters with {} types; skipped",
                params.len(),
                types.len()
            );
            r.release_section();
        } else {
            be.attributes = types
                .into_iter()
                .zip(params)
                .map(|(attribute_type, parameter)| Attribute {
                    attribute_type,
                    parameter,
                })
                .collect();
        }
    }
    Ok(())
}

fn write_be_object(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let Some(be) = &state.behavioral else {
        return Ok(());
    };
    if !be.scripts.is_empty() {
        w.write_identifier(BEOBJECT_SCRIPTS);
        w.write_object_sequence(&be.scripts);
    }
    if be.priority != 0 || be.waiting_for_message {
        w.write_identifier(BEOBJECT_PRIORITY);
        let mut flags = 0;
        if be.priority != 0 {
            flags |= PRIORITY_PRESENT;
        }
        if be.waiting_for_message {
            flags |= PRIORITY_WAITING;
        }
        w.write_dword(flags);
        if be.priority != 0 {
            w.write_int(be.priority);
        }
    }
    if !be.attributes.is_empty() {
        let params: Vec<ObjectId> = be.attributes.iter().map(|a| a.parameter).collect();
        let types: Vec<i32> = be.attributes.iter().map(|a| a.attribute_type).collect();
        w.write_identifier(BEOBJECT_ATTRIBUTES);
        w.write_object_sequence(&params);
        w.write_manager_sequence(ATTRIBUTE_MANAGER_GUID, &types);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

fn read_group(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    let members = optional(r, GROUP_MEMBERS, "group members", |r| {
        r.read_object_sequence()
    })?;
    state.class = ClassState::Group(GroupState {
        members: members.unwrap_or_default(),
    });
    Ok(())
}

fn write_group(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    if let ClassState::Group(g) = &state.class
        && !g.members.is_empty()
    {
        w.write_identifier(GROUP_MEMBERS);
        w.write_object_sequence(&g.members);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

fn read_behavior(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    required(r, BEHAVIOR_MAIN, "Behavior")?;
    let flags = r.read_dword()?;
    let mut b = BehaviorState {
        flags: flags & !DERIVED_FLAGS,
        ..Default::default()
    };
    if flags & BEHAVIOR_GRAPH == 0 {
        let guid = r.read_guid()?;
        b.block = Some((guid, r.read_dword()?));
    }
    if flags & BEHAVIOR_HAS_PRIORITY != 0 {
        b.priority = r.read_int()?;
    }
    if flags & BEHAVIOR_COMPATIBLE_CLASS != 0 {
        b.compatible_class = Some(ClassId(r.read_dword()?));
    }
    if flags & BEHAVIOR_TARGETABLE != 0 {
        b.target = r.read_object_id()?;
    }
    let save_flags = r.read_dword()?;
    for (i, array) in b.arrays_mut().into_iter().enumerate() {
        if save_flags & (1 << i) != 0 {
            *array = r.read_object_sequence()?;
        }
    }
    if let Some(owner) = optional(r, BEHAVIOR_OWNER, "behavior owner", |r| {
        r.read_object_id()
    })? {
        b.owner = owner;
    }
    state.class = ClassState::Behavior(b);
    Ok(())
}

fn write_behavior(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let ClassState::Behavior(b) = &state.class else {
        return Err(ObjectError::Invalid {
            level: "Behavior",
            reason: "state carries no behavior layer".into(),
        });
    };
    let mut flags = b.flags & !DERIVED_FLAGS;
    if b.block.is_none() {
        flags |= BEHAVIOR_GRAPH;
    }
    if b.priority != 0 {
        flags |= BEHAVIOR_HAS_PRIORITY;
    }
    if b.compatible_class.is_some() {
        flags |= BEHAVIOR_COMPATIBLE_CLASS;
    }
    if !b.target.is_null() {
        flags |= BEHAVIOR_TARGETABLE;
    }

    w.write_identifier(BEHAVIOR_MAIN);
    w.write_dword(flags);
    if let Some((guid, version)) = b.block {
        w.write_guid(guid);
        w.write_dword(version);
    }
    if b.priority != 0 {
        w.write_int(b.priority);
    }
    if let Some(class) = b.compatible_class {
        w.write_dword(class.0);
    }
    if !b.target.is_null() {
        w.write_object_id(b.target);
    }
    let arrays = b.arrays();
    let save_flags = arrays
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.is_empty())
        .fold(0u32, |acc, (i, _)| acc | (1 << i));
    w.write_dword(save_flags);
    for array in arrays.into_iter().filter(|a| !a.is_empty()) {
        w.write_object_sequence(array);
    }
    if !b.owner.is_null() {
        w.write_identifier(BEHAVIOR_OWNER);
        w.write_object_id(b.owner);
    }
    Ok(())
}

fn validate_behavior(state: &ObjectState) -> Result<(), ObjectError> {
    if let ClassState::Behavior(b) = &state.class
        && b.block.is_some()
        && !b.sub_behaviors.is_empty()
    {
        return Err(ObjectError::Invalid {
            level: "Behavior",
            reason: format!(
                "building block owns {} sub-behaviors",
                b.sub_behaviors.len()
            ),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BehaviorLink / BehaviorIO
// ---------------------------------------------------------------------------

fn read_link(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    required(r, LINK_IO, "BehaviorLink")?;
    let mut link = LinkState {
        input: r.read_object_id()?,
        output: r.read_object_id()?,
        ..Default::default()
    };
    if let Some((activation, initial)) = optional(r, LINK_DELAY, "link delay", |r| {
        Ok((r.read_int()?, r.read_int()?))
    })? {
        link.activation_delay = activation;
        link.initial_delay = initial;
    }
    state.class = ClassState::BehaviorLink(link);
    Ok(())
}

fn write_link(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let ClassState::BehaviorLink(link) = &state.class else {
        return Err(ObjectError::Invalid {
            level: "BehaviorLink",
            reason: "state carries no link layer".into(),
        });
    };
    w.write_identifier(LINK_IO);
    w.write_object_id(link.input);
    w.write_object_id(link.output);
    if link.activation_delay != 0 || link.initial_delay != 0 {
        w.write_identifier(LINK_DELAY);
        w.write_int(link.activation_delay);
        w.write_int(link.initial_delay);
    }
    Ok(())
}

fn read_io(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    let io = optional(r, IO_MAIN, "behavior io", |r| {
        let flags = r.read_dword()?;
        Ok(IoState {
            flags,
            owner: r.read_object_id()?,
        })
    })?;
    state.class = ClassState::BehaviorIo(io.unwrap_or_default());
    Ok(())
}

fn write_io(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    if let ClassState::BehaviorIo(io) = &state.class
        && (io.flags != 0 || !io.owner.is_null())
    {
        w.write_identifier(IO_MAIN);
        w.write_dword(io.flags);
        w.write_object_id(io.owner);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Run `f` against the parameter layer, installing a default one first if
/// the state carries another layer.
fn with_parameter(state: &mut ObjectState, f: impl FnOnce(&mut ParameterState)) {
    let mut p = match std::mem::take(&mut state.class) {
        ClassState::Parameter(p) => p,
        _ => ParameterState::default(),
    };
    f(&mut p);
    state.class = ClassState::Parameter(p);
}

fn read_parameter(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    required(r, PARAM_TYPE, "Parameter")?;
    let type_guid = r.read_guid()?;
    let mut value = ParamValue::None;
    if r.seek_identifier(PARAM_VALUE) {
        value = read_param_value(r, type_guid, ctx)?;
    }
    let owner = optional(r, PARAM_OWNER, "parameter owner", |r| r.read_object_id())?;
    with_parameter(state, |p| {
        p.type_guid = type_guid;
        p.value = value;
        p.owner = owner.unwrap_or_default();
    });
    Ok(())
}

/// Decode a parameter value with the cursor inside its section. A value
/// that cannot be decoded leaves the section to be preserved verbatim.
fn read_param_value(
    r: &mut ChunkReader<'_>,
    type_guid: Guid,
    ctx: &ReadContext<'_>,
) -> Result<ParamValue, ObjectError> {
    let mode = r.read_dword()?;
    let decoded = match mode {
        VALUE_RAW => r.read_buffer().map(ParamValue::Raw).map_err(ObjectError::from),
        VALUE_TYPED => match ctx.registry.find_param(type_guid) {
            Some(ty) => ctx
                .registry
                .read_value(ty, r, ctx.file_version)
                .map(ParamValue::Typed)
                .map_err(ObjectError::from),
            None => {
                log::warn!("no schema type for parameter type {type_guid}; value kept opaque");
                r.release_section();
                return Ok(ParamValue::None);
            }
        },
        other => Err(ObjectError::Invalid {
            level: "Parameter",
            reason: format!("unknown value encoding {other}"),
        }),
    };
    match decoded {
        Ok(v) => Ok(v),
        Err(e) if e.kind().is_fatal() => Err(e),
        Err(e) => {
            log::warn!("skipping malformed parameter value: {e}");
            r.release_section();
            Ok(ParamValue::None)
        }
    }
}

fn write_parameter(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let ClassState::Parameter(p) = &state.class else {
        return Err(ObjectError::Invalid {
            level: "Parameter",
            reason: "state carries no parameter layer".into(),
        });
    };
    w.write_identifier(PARAM_TYPE);
    w.write_guid(p.type_guid);
    match &p.value {
        ParamValue::None => {}
        ParamValue::Raw(bytes) => {
            w.write_identifier(PARAM_VALUE);
            w.write_dword(VALUE_RAW);
            w.write_buffer(bytes);
        }
        ParamValue::Typed(value) => {
            let ty = ctx
                .registry
                .find_param(p.type_guid)
                .ok_or_else(|| ObjectError::Invalid {
                    level: "Parameter",
                    reason: format!("no schema type for parameter type {}", p.type_guid),
                })?;
            w.write_identifier(PARAM_VALUE);
            w.write_dword(VALUE_TYPED);
            ctx.registry.write_value(ty, value, w, ctx.file_version)?;
        }
    }
    if !p.owner.is_null() {
        w.write_identifier(PARAM_OWNER);
        w.write_object_id(p.owner);
    }
    Ok(())
}

/// Null object-reference values pointing at objects of the wrong class.
fn finalize_parameter(state: &mut ObjectState, ctx: &FinalizeContext<'_>) -> usize {
    let ClassState::Parameter(p) = &mut state.class else {
        return 0;
    };
    let Some(target) = ctx
        .registry
        .find_param(p.type_guid)
        .and_then(|ty| ty.param)
        .filter(|meta| meta.kind == ParamKind::ObjectRef)
        .and_then(|meta| meta.target_class)
    else {
        return 0;
    };
    let ParamValue::Typed(Value::Object(id)) = &mut p.value else {
        return 0;
    };
    let Some(obj) = ctx.repository.get(*id) else {
        return 0;
    };
    if ctx.hierarchy.is_derived_from(obj.class_id, target) {
        return 0;
    }
    log::warn!(
        "parameter {} refers to {} of class {:?}, expected {:?}",
        ctx.object,
        id,
        obj.class_id,
        target
    );
    *id = ObjectId::NULL;
    1
}

fn read_parameter_out(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    let destinations = optional(r, PARAMOUT_DESTINATIONS, "parameter destinations", |r| {
        r.read_object_sequence()
    })?;
    with_parameter(state, |p| p.destinations = destinations.unwrap_or_default());
    Ok(())
}

fn write_parameter_out(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    if let ClassState::Parameter(p) = &state.class
        && !p.destinations.is_empty()
    {
        w.write_identifier(PARAMOUT_DESTINATIONS);
        w.write_object_sequence(&p.destinations);
    }
    Ok(())
}

fn read_parameter_local(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    let setting = optional(r, PARAMLOCAL_SETTING, "local parameter", |r| r.read_bool())?;
    with_parameter(state, |p| p.is_setting = setting.unwrap_or(false));
    Ok(())
}

fn write_parameter_local(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    if let ClassState::Parameter(p) = &state.class
        && p.is_setting
    {
        w.write_identifier(PARAMLOCAL_SETTING);
        w.write_bool(true);
    }
    Ok(())
}

fn read_parameter_in(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    required(r, PARAMIN_MAIN, "ParameterIn")?;
    let type_guid = r.read_guid()?;
    let mode = r.read_dword()?;
    let source = r.read_object_id()?;
    let source = match mode {
        0 => ParamSource::None,
        1 => ParamSource::Direct(source),
        2 => ParamSource::Shared(source),
        other => {
            return Err(ObjectError::Invalid {
                level: "ParameterIn",
                reason: format!("unknown source mode {other}"),
            });
        }
    };
    let owner = optional(r, PARAMIN_OWNER, "input parameter owner", |r| {
        r.read_object_id()
    })?;
    state.class = ClassState::ParameterIn(ParameterInState {
        type_guid,
        source,
        owner: owner.unwrap_or_default(),
    });
    Ok(())
}

fn write_parameter_in(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let ClassState::ParameterIn(p) = &state.class else {
        return Err(ObjectError::Invalid {
            level: "ParameterIn",
            reason: "state carries no input parameter layer".into(),
        });
    };
    let mode = match p.source {
        ParamSource::None => 0,
        ParamSource::Direct(_) => 1,
        ParamSource::Shared(_) => 2,
    };
    w.write_identifier(PARAMIN_MAIN);
    w.write_guid(p.type_guid);
    w.write_dword(mode);
    w.write_object_id(p.source.object());
    if !p.owner.is_null() {
        w.write_identifier(PARAMIN_OWNER);
        w.write_object_id(p.owner);
    }
    Ok(())
}

fn read_operation(
    r: &mut ChunkReader<'_>,
    state: &mut ObjectState,
    _ctx: &ReadContext<'_>,
) -> Result<(), ObjectError> {
    required(r, PARAMOP_MAIN, "ParameterOperation")?;
    let operation = r.read_guid()?;
    let inputs = [r.read_object_id()?, r.read_object_id()?];
    state.class = ClassState::ParameterOperation(OperationState {
        operation,
        inputs,
        output: r.read_object_id()?,
        owner: r.read_object_id()?,
    });
    Ok(())
}

fn write_operation(
    w: &mut ChunkWriter<'_>,
    state: &ObjectState,
    _ctx: &WriteContext<'_>,
) -> Result<(), ObjectError> {
    let ClassState::ParameterOperation(op) = &state.class else {
        return Err(ObjectError::Invalid {
            level: "ParameterOperation",
            reason: "state carries no operation layer".into(),
        });
    };
    w.write_identifier(PARAMOP_MAIN);
    w.write_guid(op.operation);
    for id in op.inputs.iter().chain([&op.output, &op.owner]) {
        w.write_object_id(*id);
    }
    Ok(())
}
