//! The runtime helpers lowering calls into.
//!
//! Helpers are declared lazily: a feature is requested the first time the
//! emitted code needs it, which adds exactly one extern declaration to the
//! module. The signatures here are the fixed contract with the runtime
//! support library.
use crate::il::Type;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeFeature {
    /// `rt_obj_new_i64(classId, size) -> ptr`
    ObjNew,
    /// `rt_obj_release_check0(obj) -> i1`, true iff the count reached zero.
    ObjReleaseCheck0,
    /// `rt_obj_free(obj)`, called after the destructor ran.
    ObjFree,
    /// `rt_get_class_vtable(classId) -> ptr`
    GetClassVtable,
    /// `rt_register_class_with_base_rs(classId, vtable, qname, slots, baseId)`
    RegisterClass,
    /// `rt_register_interface_direct(ifaceId, qname, slots)`
    RegisterInterface,
    /// `rt_bind_interface(classId, ifaceId, itable)`
    BindInterface,
    /// `rt_alloc(bytes) -> ptr`, raw storage for vtables and itables.
    Alloc,
    ArrI64New,
    ArrStrAlloc,
    ArrObjNew,
    ArrI64Retain,
    ArrI64Release,
    ArrObjRelease,
    StrReleaseMaybe,
}

pub struct Signature {
    pub name: &'static str,
    pub params: &'static [Type],
    pub ret: Type,
}

pub fn signature(feature: RuntimeFeature) -> Signature {
    match feature {
        RuntimeFeature::ObjNew => Signature {
            name: "rt_obj_new_i64",
            params: &[Type::I64, Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::ObjReleaseCheck0 => Signature {
            name: "rt_obj_release_check0",
            params: &[Type::Ptr],
            ret: Type::I1,
        },
        RuntimeFeature::ObjFree => Signature {
            name: "rt_obj_free",
            params: &[Type::Ptr],
            ret: Type::Void,
        },
        RuntimeFeature::GetClassVtable => Signature {
            name: "rt_get_class_vtable",
            params: &[Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::RegisterClass => Signature {
            name: "rt_register_class_with_base_rs",
            params: &[Type::I64, Type::Ptr, Type::Str, Type::I64, Type::I64],
            ret: Type::Void,
        },
        RuntimeFeature::RegisterInterface => Signature {
            name: "rt_register_interface_direct",
            params: &[Type::I64, Type::Str, Type::I64],
            ret: Type::Void,
        },
        RuntimeFeature::BindInterface => Signature {
            name: "rt_bind_interface",
            params: &[Type::I64, Type::I64, Type::Ptr],
            ret: Type::Void,
        },
        RuntimeFeature::Alloc => Signature {
            name: "rt_alloc",
            params: &[Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::ArrI64New => Signature {
            name: "rt_arr_i64_new",
            params: &[Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::ArrStrAlloc => Signature {
            name: "rt_arr_str_alloc",
            params: &[Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::ArrObjNew => Signature {
            name: "rt_arr_obj_new",
            params: &[Type::I64],
            ret: Type::Ptr,
        },
        RuntimeFeature::ArrI64Retain => Signature {
            name: "rt_arr_i64_retain",
            params: &[Type::Ptr],
            ret: Type::Void,
        },
        RuntimeFeature::ArrI64Release => Signature {
            name: "rt_arr_i64_release",
            params: &[Type::Ptr],
            ret: Type::Void,
        },
        RuntimeFeature::ArrObjRelease => Signature {
            name: "rt_arr_obj_release",
            params: &[Type::Ptr],
            ret: Type::Void,
        },
        RuntimeFeature::StrReleaseMaybe => Signature {
            name: "rt_str_release_maybe",
            params: &[Type::Str],
            ret: Type::Void,
        },
    }
}

/// A built-in class whose construction bypasses user code.
///
/// `NEW` on one of these emits a direct call to the catalog constructor
/// instead of the allocate-install-construct sequence, when runtime type
/// bridging is enabled.
pub struct RuntimeClass {
    /// Fully qualified name, compared case-insensitively.
    pub qname: &'static str,

    /// The constructor symbol exported by the runtime.
    pub ctor: &'static str,

    /// String builders hand back a string handle rather than an object
    /// pointer.
    pub returns_str: bool,
}

pub fn class_catalog() -> &'static [RuntimeClass] {
    &[
        RuntimeClass {
            qname: "Viper.String",
            ctor: "Viper.String.FromStr",
            returns_str: true,
        },
        RuntimeClass {
            qname: "Viper.Text.StringBuilder",
            ctor: "Viper.Text.StringBuilder.New",
            returns_str: false,
        },
    ]
}

/// Looks up a catalog entry by qualified name.
pub fn find_runtime_class(qname: &str) -> Option<&'static RuntimeClass> {
    class_catalog().iter().find(|c| c.qname.eq_ignore_ascii_case(qname))
}
