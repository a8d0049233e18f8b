//! Mangled symbol names for BASIC class members.
//!
//! The scheme mirrors BASIC's surface identifiers while encoding member roles
//! through suffixes, keeping downstream lowering agnostic to the source
//! syntax. Identical inputs must produce byte-identical outputs: the emitted
//! module's symbol space is part of the ABI.

/// The synthesised module initialiser that wires up vtables, itables and
/// static state before user code runs.
pub const MODULE_INIT: &str = "__mod_init$oop";

pub fn mangle_ctor(class: &str) -> String {
    format!("{}.__ctor", class)
}

pub fn mangle_static_ctor(class: &str) -> String {
    format!("{}.__ctor$static", class)
}

pub fn mangle_dtor(class: &str) -> String {
    format!("{}.__dtor", class)
}

pub fn mangle_method(class: &str, method: &str) -> String {
    format!("{}.{}", class, method)
}

pub fn mangle_property_getter(class: &str, property: &str) -> String {
    format!("{}.get_{}", class, property)
}

pub fn mangle_property_setter(class: &str, property: &str) -> String {
    format!("{}.set_{}", class, property)
}

pub fn mangle_iface_reg_thunk(iface: &str) -> String {
    format!("__iface_reg${}", iface)
}

pub fn mangle_iface_bind_thunk(class: &str, iface: &str) -> String {
    format!("__iface_bind${}${}", class, iface)
}

/// The module-scope global backing one static field.
pub fn mangle_static_field(class: &str, field: &str) -> String {
    format!("{}::{}", class, field)
}
