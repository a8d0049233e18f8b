//! Per-procedure symbol tracking.
//!
//! A fresh table is built for every constructor, destructor, method, property
//! accessor and static constructor. Entries appear during early parameter
//! registration and variable collection, gain stack slots during allocation,
//! and drive the release loops in the epilogue. Iteration follows insertion
//! order so emitted release sequences are deterministic.
use ast::nodes::Type;
use indexmap::IndexMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SymbolKind {
    Param,
    Local,

    /// The implicit `ME` receiver.
    Receiver,
}

#[derive(Debug, Clone)]
pub(crate) struct SymbolInfo {
    /// The temporary holding the symbol's stack slot, once allocated.
    pub(crate) slot_id: Option<u32>,
    pub(crate) ty: Type,
    pub(crate) referenced: bool,
    pub(crate) is_array: bool,
    pub(crate) is_object: bool,

    /// Qualified class name for object symbols, empty otherwise.
    pub(crate) object_class: String,
    pub(crate) kind: SymbolKind,
}

impl SymbolInfo {
    fn new(kind: SymbolKind) -> SymbolInfo {
        SymbolInfo {
            slot_id: None,
            ty: Type::I64,
            referenced: false,
            is_array: false,
            is_object: false,
            object_class: String::new(),
            kind,
        }
    }
}

pub(crate) struct SymbolTable {
    symbols: IndexMap<String, SymbolInfo>,
}

impl SymbolTable {
    pub(crate) fn new() -> SymbolTable {
        SymbolTable { symbols: IndexMap::new() }
    }

    pub(crate) fn clear(&mut self) {
        self.symbols.clear();
    }

    pub(crate) fn ensure(&mut self, name: &str) -> &mut SymbolInfo {
        self.symbols
            .entry(name.to_string())
            .or_insert_with(|| SymbolInfo::new(SymbolKind::Local))
    }

    pub(crate) fn ensure_kind(
        &mut self,
        name: &str,
        kind: SymbolKind,
    ) -> &mut SymbolInfo {
        self.symbols
            .entry(name.to_string())
            .or_insert_with(|| SymbolInfo::new(kind))
    }

    pub(crate) fn get(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    pub(crate) fn set_type(&mut self, name: &str, ty: Type) {
        self.ensure(name).ty = ty;
    }

    pub(crate) fn set_object_class(&mut self, name: &str, class: String) {
        let info = self.ensure(name);

        info.is_object = true;
        info.object_class = class;
    }

    pub(crate) fn mark_referenced(&mut self, name: &str) {
        self.ensure(name).referenced = true;
    }

    pub(crate) fn mark_array(&mut self, name: &str) {
        self.ensure(name).is_array = true;
    }

    pub(crate) fn set_slot(&mut self, name: &str, slot_id: u32) {
        self.ensure(name).slot_id = Some(slot_id);
    }

    /// Symbols in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &SymbolInfo)> {
        self.symbols.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_defaults_to_local() {
        let mut table = SymbolTable::new();

        table.ensure("x");

        let info = table.get("x").unwrap();

        assert_eq!(info.kind, SymbolKind::Local);
        assert!(!info.referenced);
        assert!(info.slot_id.is_none());
    }

    #[test]
    fn test_object_class_marks_object() {
        let mut table = SymbolTable::new();

        table.set_object_class("p", "Point".to_string());

        let info = table.get("p").unwrap();

        assert!(info.is_object);
        assert_eq!(info.object_class, "Point");
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut table = SymbolTable::new();

        table.ensure("b");
        table.ensure("a");
        table.ensure("c");

        let names: Vec<_> = table.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
