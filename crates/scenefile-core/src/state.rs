//! The layered state record produced by the object pipeline.
//!
//! Each class level contributes one layer: the root level owns visibility,
//! the behavioral-object level adds [`BehavioralState`], and leaf levels fill
//! [`ClassState`]. Levels without dispatch capabilities contribute
//! [`LevelValue`]s, and sections no level understood are kept verbatim.

use crate::chunk::Chunk;
use crate::cursor::PreservedSection;
use crate::id::{ClassId, Guid, ObjectId};
use crate::schema::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    /// Hidden together with everything beneath it in the scene hierarchy.
    HierarchicallyHidden,
}

/// An attribute attached to a behavioral object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    /// Index into the attribute manager's type table.
    pub attribute_type: i32,
    /// Parameter object holding the attribute's value, if any.
    pub parameter: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehavioralState {
    pub scripts: Vec<ObjectId>,
    pub priority: i32,
    pub waiting_for_message: bool,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupState {
    pub members: Vec<ObjectId>,
}

/// A behavior graph or building block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorState {
    /// Flags other than those implied by the optional fields below.
    pub flags: u32,
    /// Prototype GUID and version of a building block. `None` for graphs.
    pub block: Option<(Guid, u32)>,
    pub priority: i32,
    pub compatible_class: Option<ClassId>,
    pub target: ObjectId,
    pub owner: ObjectId,
    pub sub_behaviors: Vec<ObjectId>,
    pub sub_links: Vec<ObjectId>,
    pub operations: Vec<ObjectId>,
    pub input_params: Vec<ObjectId>,
    pub output_params: Vec<ObjectId>,
    pub local_params: Vec<ObjectId>,
    pub inputs: Vec<ObjectId>,
    pub outputs: Vec<ObjectId>,
}

impl BehaviorState {
    /// The eight object arrays in on-disk order.
    pub fn arrays(&self) -> [&Vec<ObjectId>; 8] {
        [
            &self.sub_behaviors,
            &self.sub_links,
            &self.operations,
            &self.input_params,
            &self.output_params,
            &self.local_params,
            &self.inputs,
            &self.outputs,
        ]
    }

    pub fn arrays_mut(&mut self) -> [&mut Vec<ObjectId>; 8] {
        [
            &mut self.sub_behaviors,
            &mut self.sub_links,
            &mut self.operations,
            &mut self.input_params,
            &mut self.output_params,
            &mut self.local_params,
            &mut self.inputs,
            &mut self.outputs,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkState {
    pub input: ObjectId,
    pub output: ObjectId,
    pub activation_delay: i32,
    pub initial_delay: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoState {
    pub owner: ObjectId,
    pub flags: u32,
}

/// A parameter's value: decoded through the type registered for the
/// parameter's GUID, or an opaque byte buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ParamValue {
    #[default]
    None,
    Typed(Value),
    Raw(Vec<u8>),
}

/// Parameter, ParameterOut and ParameterLocal share one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterState {
    pub type_guid: Guid,
    pub value: ParamValue,
    pub owner: ObjectId,
    /// Output parameters only.
    pub destinations: Vec<ObjectId>,
    /// Local parameters only.
    pub is_setting: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamSource {
    #[default]
    None,
    /// Fed by an output or local parameter.
    Direct(ObjectId),
    /// Shares the value of another input parameter.
    Shared(ObjectId),
}

impl ParamSource {
    pub fn object(self) -> ObjectId {
        match self {
            ParamSource::None => ObjectId::NULL,
            ParamSource::Direct(id) | ParamSource::Shared(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterInState {
    pub type_guid: Guid,
    pub source: ParamSource,
    pub owner: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationState {
    pub operation: Guid,
    pub inputs: [ObjectId; 2],
    pub output: ObjectId,
    pub owner: ObjectId,
}

/// Leaf-specific layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ClassState {
    #[default]
    None,
    Group(GroupState),
    Behavior(BehaviorState),
    BehaviorLink(LinkState),
    BehaviorIo(IoState),
    Parameter(ParameterState),
    ParameterIn(ParameterInState),
    ParameterOperation(OperationState),
}

/// A generically marshaled class level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelValue {
    pub class_id: ClassId,
    pub value: Value,
}

/// Data a manager keeps about one object, stored with the object's chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerAttachment {
    pub manager: Guid,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectState {
    pub data_version: u8,
    pub visibility: Visibility,
    pub behavioral: Option<BehavioralState>,
    pub class: ClassState,
    pub levels: Vec<LevelValue>,
    pub attachments: Vec<ManagerAttachment>,
    /// Sections no level sought, re-emitted on write.
    pub preserved: Vec<PreservedSection>,
}

impl ObjectState {
    pub fn behavioral_mut(&mut self) -> &mut BehavioralState {
        self.behavioral.get_or_insert_with(BehavioralState::default)
    }

    /// The GUID naming this object's sub-kind: a building block's prototype,
    /// a parameter's type or an operation.
    pub fn sub_kind(&self) -> Option<Guid> {
        let guid = match &self.class {
            ClassState::Behavior(b) => b.block.map(|(guid, _)| guid)?,
            ClassState::Parameter(p) => p.type_guid,
            ClassState::ParameterIn(p) => p.type_guid,
            ClassState::ParameterOperation(op) => op.operation,
            _ => return None,
        };
        (!guid.is_null()).then_some(guid)
    }

    pub fn attachment(&self, manager: Guid) -> Option<&Chunk> {
        self.attachments
            .iter()
            .find(|a| a.manager == manager)
            .map(|a| &a.chunk)
    }

    /// Attach `chunk` for `manager`, replacing any previous attachment.
    pub fn attach(&mut self, manager: Guid, chunk: Chunk) {
        match self.attachments.iter_mut().find(|a| a.manager == manager) {
            Some(a) => a.chunk = chunk,
            None => self.attachments.push(ManagerAttachment { manager, chunk }),
        }
    }

    pub fn level(&self, class_id: ClassId) -> Option<&Value> {
        self.levels
            .iter()
            .find(|l| l.class_id == class_id)
            .map(|l| &l.value)
    }

    /// Every non-null object this state refers to. References held inside
    /// preserved sections are not decoded and not listed.
    pub fn references(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        if let Some(b) = &self.behavioral {
            out.extend(&b.scripts);
            out.extend(b.attributes.iter().map(|a| a.parameter));
        }
        match &self.class {
            ClassState::None => {}
            ClassState::Group(g) => out.extend(&g.members),
            ClassState::Behavior(b) => {
                out.push(b.target);
                out.push(b.owner);
                for array in b.arrays() {
                    out.extend(array);
                }
            }
            ClassState::BehaviorLink(l) => out.extend([l.input, l.output]),
            ClassState::BehaviorIo(io) => out.push(io.owner),
            ClassState::Parameter(p) => {
                out.push(p.owner);
                out.extend(&p.destinations);
                if let ParamValue::Typed(v) = &p.value {
                    out.extend(v.references());
                }
            }
            ClassState::ParameterIn(p) => out.extend([p.source.object(), p.owner]),
            ClassState::ParameterOperation(op) => {
                out.extend(op.inputs);
                out.extend([op.output, op.owner]);
            }
        }
        for level in &self.levels {
            out.extend(level.value.references());
        }
        out.retain(|id| !id.is_null());
        out
    }

    /// Drop every reference for which `exists` is false: single slots are
    /// nulled and list entries removed. Returns how many were dropped.
    pub fn drop_dangling(&mut self, exists: &dyn Fn(ObjectId) -> bool) -> usize {
        let mut dropped = 0;
        let mut slot = |id: &mut ObjectId| {
            if !id.is_null() && !exists(*id) {
                *id = ObjectId::NULL;
                dropped += 1;
            }
        };
        let list = |ids: &mut Vec<ObjectId>| {
            let before = ids.len();
            ids.retain(|id| id.is_null() || exists(*id));
            before - ids.len()
        };
        let mut removed = 0;
        if let Some(b) = &mut self.behavioral {
            removed += list(&mut b.scripts);
            for attr in &mut b.attributes {
                slot(&mut attr.parameter);
            }
        }
        match &mut self.class {
            ClassState::None => {}
            ClassState::Group(g) => removed += list(&mut g.members),
            ClassState::Behavior(b) => {
                slot(&mut b.target);
                slot(&mut b.owner);
                for array in b.arrays_mut() {
                    removed += list(array);
                }
            }
            ClassState::BehaviorLink(l) => {
                slot(&mut l.input);
                slot(&mut l.output);
            }
            ClassState::BehaviorIo(io) => slot(&mut io.owner),
            ClassState::Parameter(p) => {
                slot(&mut p.owner);
                removed += list(&mut p.destinations);
                if let ParamValue::Typed(v) = &mut p.value {
                    v.for_each_reference_mut(&mut slot);
                }
            }
            ClassState::ParameterIn(p) => {
                let mut source = p.source.object();
                slot(&mut source);
                if source.is_null() {
                    p.source = ParamSource::None;
                }
                slot(&mut p.owner);
            }
            ClassState::ParameterOperation(op) => {
                for input in &mut op.inputs {
                    slot(input);
                }
                slot(&mut op.output);
                slot(&mut op.owner);
            }
        }
        for level in &mut self.levels {
            level.value.for_each_reference_mut(&mut slot);
        }
        dropped + removed
    }
}
