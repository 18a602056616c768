//! The fixed legacy class tree and pure queries over it.
//!
//! The tree is an immutable table of `(class, parent, name)` entries sorted
//! by class ID. Every query walks parent links with a depth bound, so a
//! malformed table containing a cycle yields "not found" instead of looping.

use crate::id::ClassId;

/// Deepest parent chain any query will follow.
pub const MAX_CLASS_DEPTH: usize = 32;

impl ClassId {
    pub const OBJECT: ClassId = ClassId(1);
    pub const PARAMETER_IN: ClassId = ClassId(2);
    pub const PARAMETER_OUT: ClassId = ClassId(3);
    pub const PARAMETER_OPERATION: ClassId = ClassId(4);
    pub const STATE: ClassId = ClassId(5);
    pub const BEHAVIOR_LINK: ClassId = ClassId(6);
    pub const BEHAVIOR: ClassId = ClassId(8);
    pub const BEHAVIOR_IO: ClassId = ClassId(9);
    pub const SCENE: ClassId = ClassId(10);
    pub const SCENE_OBJECT: ClassId = ClassId(11);
    pub const RENDER_CONTEXT: ClassId = ClassId(12);
    pub const KINEMATIC_CHAIN: ClassId = ClassId(13);
    pub const OBJECT_ANIMATION: ClassId = ClassId(15);
    pub const ANIMATION: ClassId = ClassId(16);
    pub const KEYED_ANIMATION: ClassId = ClassId(18);
    pub const BE_OBJECT: ClassId = ClassId(19);
    pub const SYNCHRO: ClassId = ClassId(20);
    pub const LEVEL: ClassId = ClassId(21);
    pub const PLACE: ClassId = ClassId(22);
    pub const GROUP: ClassId = ClassId(23);
    pub const SOUND: ClassId = ClassId(24);
    pub const WAVE_SOUND: ClassId = ClassId(25);
    pub const MIDI_SOUND: ClassId = ClassId(26);
    pub const ENTITY_2D: ClassId = ClassId(27);
    pub const SPRITE: ClassId = ClassId(28);
    pub const SPRITE_TEXT: ClassId = ClassId(29);
    pub const MATERIAL: ClassId = ClassId(30);
    pub const TEXTURE: ClassId = ClassId(31);
    pub const MESH: ClassId = ClassId(32);
    pub const ENTITY_3D: ClassId = ClassId(33);
    pub const CAMERA: ClassId = ClassId(34);
    pub const TARGET_CAMERA: ClassId = ClassId(35);
    pub const CURVE_POINT: ClassId = ClassId(36);
    pub const SPRITE_3D: ClassId = ClassId(37);
    pub const LIGHT: ClassId = ClassId(38);
    pub const TARGET_LIGHT: ClassId = ClassId(39);
    pub const CHARACTER: ClassId = ClassId(40);
    pub const OBJECT_3D: ClassId = ClassId(41);
    pub const BODY_PART: ClassId = ClassId(42);
    pub const CURVE: ClassId = ClassId(43);
    pub const PARAMETER_LOCAL: ClassId = ClassId(45);
    pub const PARAMETER: ClassId = ClassId(46);
    pub const RENDER_OBJECT: ClassId = ClassId(47);
    pub const INTERFACE_OBJECT_MANAGER: ClassId = ClassId(48);
    pub const CRITICAL_SECTION: ClassId = ClassId(49);
    pub const GRID: ClassId = ClassId(50);
    pub const LAYER: ClassId = ClassId(51);
    pub const DATA_ARRAY: ClassId = ClassId(52);
    pub const PATCH_MESH: ClassId = ClassId(53);
    pub const PROGRESSIVE_MESH: ClassId = ClassId(54);
}

/// One node of the class tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    pub id: ClassId,
    pub parent: Option<ClassId>,
    pub name: &'static str,
}

const fn entry(id: ClassId, parent: ClassId, name: &'static str) -> ClassEntry {
    ClassEntry {
        id,
        parent: Some(parent),
        name,
    }
}

static LEGACY_CLASSES: &[ClassEntry] = &[
    ClassEntry {
        id: ClassId::OBJECT,
        parent: None,
        name: "Object",
    },
    entry(ClassId::PARAMETER_IN, ClassId::OBJECT, "ParameterIn"),
    entry(ClassId::PARAMETER_OUT, ClassId::PARAMETER, "ParameterOut"),
    entry(ClassId::PARAMETER_OPERATION, ClassId::OBJECT, "ParameterOperation"),
    entry(ClassId::STATE, ClassId::OBJECT, "State"),
    entry(ClassId::BEHAVIOR_LINK, ClassId::OBJECT, "BehaviorLink"),
    entry(ClassId::BEHAVIOR, ClassId::SCENE_OBJECT, "Behavior"),
    entry(ClassId::BEHAVIOR_IO, ClassId::OBJECT, "BehaviorIO"),
    entry(ClassId::SCENE, ClassId::BE_OBJECT, "Scene"),
    entry(ClassId::SCENE_OBJECT, ClassId::OBJECT, "SceneObject"),
    entry(ClassId::RENDER_CONTEXT, ClassId::OBJECT, "RenderContext"),
    entry(ClassId::KINEMATIC_CHAIN, ClassId::OBJECT, "KinematicChain"),
    entry(ClassId::OBJECT_ANIMATION, ClassId::SCENE_OBJECT, "ObjectAnimation"),
    entry(ClassId::ANIMATION, ClassId::SCENE_OBJECT, "Animation"),
    entry(ClassId::KEYED_ANIMATION, ClassId::ANIMATION, "KeyedAnimation"),
    entry(ClassId::BE_OBJECT, ClassId::SCENE_OBJECT, "BeObject"),
    entry(ClassId::SYNCHRO, ClassId::OBJECT, "SynchroObject"),
    entry(ClassId::LEVEL, ClassId::BE_OBJECT, "Level"),
    entry(ClassId::PLACE, ClassId::ENTITY_3D, "Place"),
    entry(ClassId::GROUP, ClassId::BE_OBJECT, "Group"),
    entry(ClassId::SOUND, ClassId::BE_OBJECT, "Sound"),
    entry(ClassId::WAVE_SOUND, ClassId::SOUND, "WaveSound"),
    entry(ClassId::MIDI_SOUND, ClassId::SOUND, "MidiSound"),
    entry(ClassId::ENTITY_2D, ClassId::RENDER_OBJECT, "2dEntity"),
    entry(ClassId::SPRITE, ClassId::ENTITY_2D, "Sprite"),
    entry(ClassId::SPRITE_TEXT, ClassId::SPRITE, "SpriteText"),
    entry(ClassId::MATERIAL, ClassId::BE_OBJECT, "Material"),
    entry(ClassId::TEXTURE, ClassId::BE_OBJECT, "Texture"),
    entry(ClassId::MESH, ClassId::BE_OBJECT, "Mesh"),
    entry(ClassId::ENTITY_3D, ClassId::RENDER_OBJECT, "3dEntity"),
    entry(ClassId::CAMERA, ClassId::ENTITY_3D, "Camera"),
    entry(ClassId::TARGET_CAMERA, ClassId::CAMERA, "TargetCamera"),
    entry(ClassId::CURVE_POINT, ClassId::ENTITY_3D, "CurvePoint"),
    entry(ClassId::SPRITE_3D, ClassId::ENTITY_3D, "Sprite3D"),
    entry(ClassId::LIGHT, ClassId::ENTITY_3D, "Light"),
    entry(ClassId::TARGET_LIGHT, ClassId::LIGHT, "TargetLight"),
    entry(ClassId::CHARACTER, ClassId::ENTITY_3D, "Character"),
    entry(ClassId::OBJECT_3D, ClassId::ENTITY_3D, "3dObject"),
    entry(ClassId::BODY_PART, ClassId::OBJECT_3D, "BodyPart"),
    entry(ClassId::CURVE, ClassId::ENTITY_3D, "Curve"),
    entry(ClassId::PARAMETER_LOCAL, ClassId::PARAMETER, "ParameterLocal"),
    entry(ClassId::PARAMETER, ClassId::OBJECT, "Parameter"),
    entry(ClassId::RENDER_OBJECT, ClassId::BE_OBJECT, "RenderObject"),
    entry(
        ClassId::INTERFACE_OBJECT_MANAGER,
        ClassId::OBJECT,
        "InterfaceObjectManager",
    ),
    entry(ClassId::CRITICAL_SECTION, ClassId::OBJECT, "CriticalSection"),
    entry(ClassId::GRID, ClassId::ENTITY_3D, "Grid"),
    entry(ClassId::LAYER, ClassId::OBJECT, "Layer"),
    entry(ClassId::DATA_ARRAY, ClassId::BE_OBJECT, "DataArray"),
    entry(ClassId::PATCH_MESH, ClassId::MESH, "PatchMesh"),
    entry(ClassId::PROGRESSIVE_MESH, ClassId::MESH, "ProgressiveMesh"),
];

/// Read-only view over a class table.
#[derive(Debug, Clone, Copy)]
pub struct ClassHierarchy<'t> {
    table: &'t [ClassEntry],
}

impl ClassHierarchy<'static> {
    /// The built-in legacy class tree.
    pub fn legacy() -> Self {
        Self {
            table: LEGACY_CLASSES,
        }
    }
}

impl Default for ClassHierarchy<'static> {
    fn default() -> Self {
        Self::legacy()
    }
}

impl<'t> ClassHierarchy<'t> {
    /// Wrap a table. Entries must be sorted by class ID.
    pub fn new(table: &'t [ClassEntry]) -> Self {
        Self { table }
    }

    pub fn entry(&self, id: ClassId) -> Option<&'t ClassEntry> {
        self.table
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.table[i])
    }

    pub fn contains(&self, id: ClassId) -> bool {
        self.entry(id).is_some()
    }

    pub fn parent(&self, id: ClassId) -> Option<ClassId> {
        self.entry(id)?.parent
    }

    pub fn name(&self, id: ClassId) -> Option<&'t str> {
        self.entry(id).map(|e| e.name)
    }

    pub fn by_name(&self, name: &str) -> Option<ClassId> {
        self.table.iter().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'t ClassEntry> + 't {
        self.table.iter()
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself. `None` when
    /// `id` is unknown or its parent chain is circular or too deep.
    pub fn ancestors(&self, id: ClassId) -> Option<Vec<ClassId>> {
        let mut out = Vec::new();
        let mut cur = self.entry(id)?;
        while let Some(parent) = cur.parent {
            if parent == id || out.contains(&parent) || out.len() >= MAX_CLASS_DEPTH {
                return None;
            }
            out.push(parent);
            match self.entry(parent) {
                Some(e) => cur = e,
                None => break,
            }
        }
        Some(out)
    }

    /// The chain root-to-leaf, ending with `id`.
    pub fn chain(&self, id: ClassId) -> Option<Vec<ClassId>> {
        let mut chain = self.ancestors(id)?;
        chain.reverse();
        chain.push(id);
        Some(chain)
    }

    /// Whether `child` is `ancestor` or inherits from it.
    pub fn is_derived_from(&self, child: ClassId, ancestor: ClassId) -> bool {
        if child == ancestor {
            return self.contains(child);
        }
        self.ancestors(child)
            .is_some_and(|chain| chain.contains(&ancestor))
    }

    /// Nearest class both `a` and `b` derive from.
    pub fn common_ancestor(&self, a: ClassId, b: ClassId) -> Option<ClassId> {
        let chain_b = self.chain(b)?;
        let mut chain_a = self.chain(a)?;
        chain_a.reverse();
        chain_a.into_iter().find(|c| chain_b.contains(c))
    }

    /// Number of ancestors; the root is at level 0.
    pub fn derivation_level(&self, id: ClassId) -> Option<usize> {
        self.ancestors(id).map(|a| a.len())
    }

    /// Whether payloads of `id` carry the behavioral-object base sections
    /// (scripts, priority, attributes) ahead of their own fields.
    pub fn uses_extended_base_deserializer(&self, id: ClassId) -> bool {
        self.is_derived_from(id, ClassId::BE_OBJECT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_table_is_sorted_and_acyclic() {
        let h = ClassHierarchy::legacy();
        assert!(LEGACY_CLASSES.windows(2).all(|w| w[0].id < w[1].id));
        for e in h.iter() {
            assert!(h.ancestors(e.id).is_some(), "{} has a broken chain", e.name);
        }
    }

    #[test]
    fn chain_is_root_first() {
        let h = ClassHierarchy::legacy();
        assert_eq!(
            h.chain(ClassId::GROUP).unwrap(),
            vec![
                ClassId::OBJECT,
                ClassId::SCENE_OBJECT,
                ClassId::BE_OBJECT,
                ClassId::GROUP
            ]
        );
        assert!(h.ancestors(ClassId::OBJECT).unwrap().is_empty());
    }

    #[test]
    fn derivation() {
        let h = ClassHierarchy::legacy();
        assert!(h.is_derived_from(ClassId::TARGET_CAMERA, ClassId::ENTITY_3D));
        assert!(h.is_derived_from(ClassId::GROUP, ClassId::GROUP));
        assert!(!h.is_derived_from(ClassId::BEHAVIOR, ClassId::BE_OBJECT));
        assert!(!h.is_derived_from(ClassId::OBJECT, ClassId::GROUP));
        assert_eq!(h.derivation_level(ClassId::OBJECT), Some(0));
        assert_eq!(h.derivation_level(ClassId::BE_OBJECT), Some(2));
    }

    #[test]
    fn common_ancestors() {
        let h = ClassHierarchy::legacy();
        assert_eq!(
            h.common_ancestor(ClassId::CAMERA, ClassId::LIGHT),
            Some(ClassId::ENTITY_3D)
        );
        assert_eq!(
            h.common_ancestor(ClassId::PARAMETER_OUT, ClassId::BEHAVIOR),
            Some(ClassId::OBJECT)
        );
        assert_eq!(
            h.common_ancestor(ClassId::GROUP, ClassId::GROUP),
            Some(ClassId::GROUP)
        );
    }

    #[test]
    fn extended_base_deserializer() {
        let h = ClassHierarchy::legacy();
        assert!(h.uses_extended_base_deserializer(ClassId::GROUP));
        assert!(h.uses_extended_base_deserializer(ClassId::BODY_PART));
        assert!(h.uses_extended_base_deserializer(ClassId::BE_OBJECT));
        assert!(!h.uses_extended_base_deserializer(ClassId::BEHAVIOR));
        assert!(!h.uses_extended_base_deserializer(ClassId::PARAMETER));
        assert!(!h.uses_extended_base_deserializer(ClassId(200)));
    }

    #[test]
    fn cycles_are_not_found() {
        static CYCLE: &[ClassEntry] = &[
            ClassEntry {
                id: ClassId(1),
                parent: Some(ClassId(2)),
                name: "A",
            },
            ClassEntry {
                id: ClassId(2),
                parent: Some(ClassId(1)),
                name: "B",
            },
        ];
        let h = ClassHierarchy::new(CYCLE);
        assert_eq!(h.ancestors(ClassId(1)), None);
        assert!(!h.is_derived_from(ClassId(1), ClassId(2)));
        assert!(!h.is_derived_from(ClassId(2), ClassId(1)));
        assert_eq!(h.derivation_level(ClassId(2)), None);
    }

    #[test]
    fn names() {
        let h = ClassHierarchy::legacy();
        assert_eq!(h.name(ClassId::BEHAVIOR), Some("Behavior"));
        assert_eq!(h.by_name("Group"), Some(ClassId::GROUP));
        assert_eq!(h.name(ClassId(250)), None);
    }
}
