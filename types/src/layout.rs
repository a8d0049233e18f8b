//! Byte layouts for class instances.
//!
//! Layouts are computed once per class by semantic analysis and consumed
//! read-only by lowering when it emits field GEPs, allocation sizes, and
//! destructor release sequences.
use crate::ClassInfo;
use ast::nodes::Type;
use indexmap::IndexMap;

/// The object header: every instance stores its vtable pointer at offset 0.
pub const HEADER_SIZE: u32 = 8;

/// One instance field with its resolved byte offset.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub offset: u32,
    pub ty: Type,
    pub is_array: bool,

    /// The field or element class when object-typed, empty otherwise.
    pub object_class: String,
}

/// The byte-offset map for one class.
#[derive(Clone, Debug)]
pub struct ClassLayout {
    /// Total instance size in bytes, never below the header size.
    pub size: u32,

    /// The stable 64-bit class identifier assigned by semantic analysis.
    pub class_id: i64,

    /// Fields in declaration order.
    pub fields: Vec<FieldSlot>,
}

fn field_size(field_ty: Type, is_array: bool, object_class: &str) -> u32 {
    // Pointer-sized slots for strings, objects and array handles; booleans
    // pack into a single byte.
    if is_array || !object_class.is_empty() {
        return 8;
    }

    match field_ty {
        Type::Bool => 1,
        _ => 8,
    }
}

impl ClassLayout {
    /// Assigns offsets to the class's instance fields in declaration order,
    /// starting just past the header.
    ///
    /// Alignment is the runtime allocator's concern; lowering emits raw
    /// byte-offset GEPs against exactly this map.
    pub fn compute(class_id: i64, class: &ClassInfo) -> Self {
        let mut offset = HEADER_SIZE;
        let mut fields = Vec::with_capacity(class.fields.len());

        for field in &class.fields {
            fields.push(FieldSlot {
                name: field.name.clone(),
                offset,
                ty: field.ty,
                is_array: field.is_array,
                object_class: field.object_class.clone(),
            });

            offset += field_size(field.ty, field.is_array, &field.object_class);
        }

        Self { size: offset.max(HEADER_SIZE), class_id, fields }
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Layouts keyed by unqualified class name, case-insensitively.
pub struct LayoutMap {
    layouts: IndexMap<String, ClassLayout>,
}

impl LayoutMap {
    pub fn new() -> Self {
        Self { layouts: IndexMap::new() }
    }

    pub fn insert(&mut self, class_name: &str, layout: ClassLayout) {
        self.layouts.insert(class_name.to_ascii_lowercase(), layout);
    }

    pub fn get(&self, class_name: &str) -> Option<&ClassLayout> {
        self.layouts.get(&class_name.to_ascii_lowercase())
    }
}

impl Default for LayoutMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualified_name::QualifiedName;
    use crate::FieldInfo;

    #[test]
    fn test_empty_class_keeps_header_space() {
        let class = ClassInfo::new(QualifiedName::new("Empty"));
        let layout = ClassLayout::compute(7, &class);

        assert_eq!(layout.size, 8);
        assert_eq!(layout.class_id, 7);
        assert!(layout.fields.is_empty());
    }

    #[test]
    fn test_offsets_follow_declaration_order() {
        let mut class = ClassInfo::new(QualifiedName::new("Point"));

        class.fields.push(FieldInfo::scalar("X", Type::I64));
        class.fields.push(FieldInfo::scalar("Y", Type::I64));

        let layout = ClassLayout::compute(1, &class);

        assert_eq!(layout.size, 24);
        assert_eq!(layout.fields[0].offset, 8);
        assert_eq!(layout.fields[1].offset, 16);
    }

    #[test]
    fn test_bool_fields_use_one_byte() {
        let mut class = ClassInfo::new(QualifiedName::new("Flags"));

        class.fields.push(FieldInfo::scalar("Ready", Type::Bool));
        class.fields.push(FieldInfo::scalar("Count", Type::I64));

        let layout = ClassLayout::compute(2, &class);

        assert_eq!(layout.fields[0].offset, 8);
        assert_eq!(layout.fields[1].offset, 9);
        assert_eq!(layout.size, 17);
    }

    #[test]
    fn test_object_and_array_fields_are_pointer_sized() {
        let mut class = ClassInfo::new(QualifiedName::new("Node"));
        let mut next = FieldInfo::scalar("Next", Type::Bool);
        let mut items = FieldInfo::scalar("Items", Type::Bool);

        next.object_class = "Node".to_string();
        items.is_array = true;
        class.fields.push(next);
        class.fields.push(items);

        let layout = ClassLayout::compute(3, &class);

        assert_eq!(layout.fields[0].offset, 8);
        assert_eq!(layout.fields[1].offset, 16);
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_find_field_is_case_insensitive() {
        let mut class = ClassInfo::new(QualifiedName::new("Box"));

        class.fields.push(FieldInfo::scalar("Width", Type::I64));

        let layout = ClassLayout::compute(4, &class);

        assert!(layout.find_field("WIDTH").is_some());
        assert!(layout.find_field("height").is_none());
    }

    #[test]
    fn test_layout_map_lookup() {
        let mut layouts = LayoutMap::new();
        let class = ClassInfo::new(QualifiedName::new("Widget"));

        layouts.insert("Widget", ClassLayout::compute(9, &class));

        assert!(layouts.get("widget").is_some());
        assert!(layouts.get("Gadget").is_none());
    }
}
