//! The semantic fact database for BASIC classes and interfaces.
//!
//! Semantic analysis populates this index while walking declarations; lowering
//! then consumes it read-only. Lookups never panic on absent entries: the
//! lowering driver is responsible for conservative fallbacks when metadata is
//! missing, since diagnostics were already raised earlier in the pipeline.
pub mod layout;
pub mod qualified_name;

use crate::qualified_name::QualifiedName;
use ast::nodes::Type;
use indexmap::IndexMap;
use std::collections::HashMap;

/// The bound on hierarchy walks.
///
/// Semantic analysis rejects inheritance cycles, so this only guards against
/// a malformed index feeding an unbounded loop.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// An instance or static field as declared on a class.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,

    /// The element or field class when object-typed, empty for primitives.
    pub object_class: String,
    pub is_array: bool,

    /// Inclusive upper bounds for fields declared with fixed extents.
    pub array_extents: Vec<i64>,
}

impl FieldInfo {
    pub fn scalar(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty,
            object_class: String::new(),
            is_array: false,
            array_extents: Vec::new(),
        }
    }
}

/// A parameter shape within a method signature.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub object_class: String,
    pub is_array: bool,
}

/// Everything lowering needs to know about one declared method.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<ParamSig>,
    pub ret: Option<Type>,

    /// Qualified class name when the method returns an object, empty
    /// otherwise.
    pub ret_object_class: String,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_final: bool,

    /// Virtual slot index; -1 for non-virtual methods. The slot is assigned
    /// by the class that first introduces the method and preserved by every
    /// override below it.
    pub slot: i32,
    pub is_property_accessor: bool,
    pub is_getter: bool,
}

impl MethodInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            ret: None,
            ret_object_class: String::new(),
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_final: false,
            slot: -1,
            is_property_accessor: false,
            is_getter: false,
        }
    }
}

/// The signature shape of one interface slot.
#[derive(Clone, Debug, PartialEq)]
pub struct IfaceMethodSig {
    pub name: String,
    pub param_types: Vec<Type>,
    pub ret: Option<Type>,
}

/// Interface metadata including the stable ID and slot layout.
#[derive(Clone, Debug)]
pub struct InterfaceInfo {
    pub iface_id: i64,
    pub qualified_name: QualifiedName,
    pub slots: Vec<IfaceMethodSig>,
}

/// Aggregated facts extracted from one `CLASS` declaration.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    /// The unqualified class identifier as declared.
    pub name: String,
    pub qualified_name: QualifiedName,
    pub base_qualified: Option<QualifiedName>,
    pub is_abstract: bool,
    pub is_final: bool,
    pub has_constructor: bool,

    /// Set when lowering must synthesise a default constructor.
    pub has_synth_ctor: bool,
    pub has_destructor: bool,
    pub has_static_ctor: bool,
    pub fields: Vec<FieldInfo>,
    pub static_fields: Vec<FieldInfo>,

    /// Declared methods keyed by canonical lowercase name.
    pub methods: IndexMap<String, MethodInfo>,

    /// Virtual method names in slot order, for deterministic ABI layout.
    pub vtable: Vec<String>,

    /// Interfaces implemented by this class, by stable ID.
    pub implemented_interfaces: Vec<i64>,

    /// Per-interface slot-to-method mappings. Empty strings mark slots left
    /// abstract or unimplemented.
    pub iface_slot_impl: HashMap<i64, Vec<String>>,
}

impl ClassInfo {
    pub fn new(qualified_name: QualifiedName) -> Self {
        let name = qualified_name.tail().to_string();

        Self {
            name,
            qualified_name,
            base_qualified: None,
            is_abstract: false,
            is_final: false,
            has_constructor: false,
            has_synth_ctor: false,
            has_destructor: false,
            has_static_ctor: false,
            fields: Vec::new(),
            static_fields: Vec::new(),
            methods: IndexMap::new(),
            vtable: Vec::new(),
            implemented_interfaces: Vec::new(),
            iface_slot_impl: HashMap::new(),
        }
    }

    pub fn add_method(&mut self, method: MethodInfo) {
        self.methods.insert(method.name.to_ascii_lowercase(), method);
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn static_field(&self, name: &str) -> Option<&FieldInfo> {
        self.static_fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// The container mapping class and interface names to extracted metadata.
///
/// Classes and interfaces are stored in declaration order; the module
/// initialiser depends on that order being stable.
pub struct OopIndex {
    classes: IndexMap<String, ClassInfo>,
    interfaces: IndexMap<String, InterfaceInfo>,
    next_interface_id: i64,
}

impl OopIndex {
    pub fn new() -> Self {
        Self {
            classes: IndexMap::new(),
            interfaces: IndexMap::new(),
            next_interface_id: 0,
        }
    }

    pub fn add_class(&mut self, class: ClassInfo) {
        self.classes.insert(class.qualified_name.canonical(), class);
    }

    pub fn add_interface(&mut self, iface: InterfaceInfo) {
        self.interfaces.insert(iface.qualified_name.canonical(), iface);
    }

    /// Classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    /// Interfaces in declaration order.
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceInfo> {
        self.interfaces.values()
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&name.to_ascii_lowercase())
    }

    pub fn find_class_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(&name.to_ascii_lowercase())
    }

    pub fn find_interface(&self, name: &str) -> Option<&InterfaceInfo> {
        self.interfaces.get(&name.to_ascii_lowercase())
    }

    pub fn interface_by_id(&self, iface_id: i64) -> Option<&InterfaceInfo> {
        self.interfaces.values().find(|i| i.iface_id == iface_id)
    }

    /// Allocates the next stable interface ID.
    pub fn allocate_interface_id(&mut self) -> i64 {
        let id = self.next_interface_id;

        self.next_interface_id += 1;
        id
    }

    pub fn find_method(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> Option<&MethodInfo> {
        self.find_class(class_name).and_then(|c| c.method(method_name))
    }

    /// Walks the base chain until the method is found or the root is reached.
    pub fn find_method_in_hierarchy(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> Option<&MethodInfo> {
        let mut current = self.find_class(class_name);
        let mut depth = 0;

        while let Some(class) = current {
            if let Some(method) = class.method(method_name) {
                return Some(method);
            }

            depth += 1;

            if depth > MAX_HIERARCHY_DEPTH {
                return None;
            }

            current = class
                .base_qualified
                .as_ref()
                .and_then(|base| self.find_class(base.as_str()));
        }

        None
    }

    pub fn find_field(
        &self,
        class_name: &str,
        field_name: &str,
    ) -> Option<&FieldInfo> {
        self.find_class(class_name).and_then(|c| c.field(field_name))
    }

    /// Walks the base chain until the field is found or the root is reached.
    pub fn find_field_in_hierarchy(
        &self,
        class_name: &str,
        field_name: &str,
    ) -> Option<&FieldInfo> {
        let mut current = self.find_class(class_name);
        let mut depth = 0;

        while let Some(class) = current {
            if let Some(field) = class.field(field_name) {
                return Some(field);
            }

            depth += 1;

            if depth > MAX_HIERARCHY_DEPTH {
                return None;
            }

            current = class
                .base_qualified
                .as_ref()
                .and_then(|base| self.find_class(base.as_str()));
        }

        None
    }

    /// The virtual slot for a method, or -1 for non-virtual methods and
    /// missing entries.
    pub fn virtual_slot_of(&self, class_name: &str, method_name: &str) -> i32 {
        self.find_method(class_name, method_name).map_or(-1, |m| m.slot)
    }

    /// Returns the qualified name of the nearest class in the base chain that
    /// provides a concrete (non-abstract) implementation of the method, or
    /// `None` when every provider is abstract or the method is unknown.
    pub fn concrete_implementor(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> Option<String> {
        let mut current = self.find_class(class_name);
        let mut depth = 0;

        while let Some(class) = current {
            if let Some(method) = class.method(method_name) {
                if !method.is_abstract {
                    return Some(class.qualified_name.as_str().to_string());
                }
            }

            depth += 1;

            if depth > MAX_HIERARCHY_DEPTH {
                break;
            }

            current = class
                .base_qualified
                .as_ref()
                .and_then(|base| self.find_class(base.as_str()));
        }

        None
    }

    /// Like [`OopIndex::concrete_implementor`], but falls back to the
    /// starting class when nothing concrete is found. Direct call sites use
    /// this; table population stores a null slot instead.
    pub fn implementing_class(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> String {
        self.concrete_implementor(class_name, method_name)
            .unwrap_or_else(|| class_name.to_string())
    }

    /// Builds a slot-to-method-name array covering this class and all its
    /// ancestors. Walking most-derived first means overrides win; slots no
    /// class in the chain binds stay empty.
    pub fn vtable_slot_map(&self, class_name: &str) -> Vec<String> {
        let mut max_slot: i32 = -1;
        let mut current = self.find_class(class_name);
        let mut depth = 0;

        while let Some(class) = current {
            for method in class.methods.values() {
                if method.is_virtual && method.slot > max_slot {
                    max_slot = method.slot;
                }
            }

            depth += 1;

            if depth > MAX_HIERARCHY_DEPTH {
                break;
            }

            current = class
                .base_qualified
                .as_ref()
                .and_then(|base| self.find_class(base.as_str()));
        }

        if max_slot < 0 {
            return Vec::new();
        }

        let mut slots = vec![String::new(); (max_slot + 1) as usize];

        current = self.find_class(class_name);
        depth = 0;

        while let Some(class) = current {
            for method in class.methods.values() {
                if !method.is_virtual || method.slot < 0 {
                    continue;
                }

                let slot = &mut slots[method.slot as usize];

                if slot.is_empty() {
                    *slot = method.name.clone();
                }
            }

            depth += 1;

            if depth > MAX_HIERARCHY_DEPTH {
                break;
            }

            current = class
                .base_qualified
                .as_ref()
                .and_then(|base| self.find_class(base.as_str()));
        }

        slots
    }
}

impl Default for OopIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn virtual_method(name: &str, slot: i32) -> MethodInfo {
        let mut method = MethodInfo::new(name);

        method.is_virtual = true;
        method.slot = slot;
        method
    }

    fn animal_dog_index() -> OopIndex {
        let mut index = OopIndex::new();
        let mut animal = ClassInfo::new(QualifiedName::new("Animal"));
        let mut dog = ClassInfo::new(QualifiedName::new("Dog"));

        animal.fields.push(FieldInfo::scalar("Age", Type::I64));
        animal.add_method(virtual_method("Speak", 0));
        dog.base_qualified = Some(QualifiedName::new("Animal"));
        dog.add_method(virtual_method("Speak", 0));
        dog.add_method(virtual_method("Fetch", 1));
        index.add_class(animal);
        index.add_class(dog);
        index
    }

    #[test]
    fn test_find_class_is_case_insensitive() {
        let index = animal_dog_index();

        assert!(index.find_class("ANIMAL").is_some());
        assert!(index.find_class("dog").is_some());
        assert!(index.find_class("Cat").is_none());
    }

    #[test]
    fn test_find_method_in_hierarchy() {
        let index = animal_dog_index();

        assert!(index.find_method("Dog", "Fetch").is_some());
        assert!(index.find_method("Dog", "speak").is_some());
        assert!(index.find_method_in_hierarchy("Dog", "Speak").is_some());
        assert!(index.find_method_in_hierarchy("Dog", "Missing").is_none());
    }

    #[test]
    fn test_find_field_in_hierarchy() {
        let index = animal_dog_index();

        assert!(index.find_field("Dog", "Age").is_none());
        assert!(index.find_field_in_hierarchy("Dog", "age").is_some());
    }

    #[test]
    fn test_virtual_slot_of() {
        let index = animal_dog_index();

        assert_eq!(index.virtual_slot_of("Animal", "Speak"), 0);
        assert_eq!(index.virtual_slot_of("Dog", "Fetch"), 1);
        assert_eq!(index.virtual_slot_of("Dog", "Missing"), -1);
    }

    #[test]
    fn test_implementing_class_walks_past_abstract() {
        let mut index = OopIndex::new();
        let mut base = ClassInfo::new(QualifiedName::new("Shape"));
        let mut derived = ClassInfo::new(QualifiedName::new("Circle"));
        let mut area = virtual_method("Area", 0);

        area.is_abstract = true;
        base.is_abstract = true;
        base.add_method(area);
        derived.base_qualified = Some(QualifiedName::new("Shape"));
        derived.add_method(virtual_method("Area", 0));
        index.add_class(base);
        index.add_class(derived);

        assert_eq!(index.implementing_class("Circle", "Area"), "Circle");
        assert_eq!(
            index.concrete_implementor("Circle", "Area"),
            Some("Circle".to_string())
        );
        // No concrete provider anywhere: the fallback names the starting
        // class, while the table-population query reports the absence.
        assert_eq!(index.implementing_class("Shape", "Area"), "Shape");
        assert_eq!(index.concrete_implementor("Shape", "Area"), None);
    }

    #[test]
    fn test_vtable_slot_map_prefers_most_derived() {
        let index = animal_dog_index();

        assert_eq!(index.vtable_slot_map("Animal"), vec!["Speak".to_string()]);
        assert_eq!(
            index.vtable_slot_map("Dog"),
            vec!["Speak".to_string(), "Fetch".to_string()]
        );
        assert!(index.vtable_slot_map("Missing").is_empty());
    }

    #[test]
    fn test_vtable_slot_map_leaves_unbound_slots_empty() {
        let mut index = OopIndex::new();
        let mut class = ClassInfo::new(QualifiedName::new("Sparse"));

        class.add_method(virtual_method("Late", 2));
        index.add_class(class);

        assert_eq!(
            index.vtable_slot_map("Sparse"),
            vec![String::new(), String::new(), "Late".to_string()]
        );
    }

    #[test]
    fn test_interface_ids_are_monotonic() {
        let mut index = OopIndex::new();

        assert_eq!(index.allocate_interface_id(), 0);
        assert_eq!(index.allocate_interface_id(), 1);
        assert_eq!(index.allocate_interface_id(), 2);
    }

    #[test]
    fn test_interface_lookup() {
        let mut index = OopIndex::new();
        let id = index.allocate_interface_id();

        index.add_interface(InterfaceInfo {
            iface_id: id,
            qualified_name: QualifiedName::new("Printable"),
            slots: vec![IfaceMethodSig {
                name: "Print".to_string(),
                param_types: Vec::new(),
                ret: None,
            }],
        });

        assert!(index.find_interface("printable").is_some());
        assert_eq!(
            index.interface_by_id(id).unwrap().qualified_name.as_str(),
            "Printable"
        );
    }

    #[test]
    fn test_hierarchy_walk_is_bounded_on_cycles() {
        let mut index = OopIndex::new();
        let mut a = ClassInfo::new(QualifiedName::new("A"));
        let mut b = ClassInfo::new(QualifiedName::new("B"));

        a.base_qualified = Some(QualifiedName::new("B"));
        b.base_qualified = Some(QualifiedName::new("A"));
        index.add_class(a);
        index.add_class(b);

        assert!(index.find_method_in_hierarchy("A", "Anything").is_none());
        assert!(index.find_field_in_hierarchy("A", "anything").is_none());
        assert_eq!(index.implementing_class("A", "anything"), "A");
    }
}
