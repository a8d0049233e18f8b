//! Shared emission patterns for class members: parameter initialisation,
//! array field allocation, and destructor field release.
use crate::il::{Type, Value};
use crate::lower::{ast_type_to_il, Lowerer};
use crate::runtime::RuntimeFeature;
use ast::nodes as ast;
use std::collections::HashSet;

/// The signature shape a member is lowered with, shared between declared
/// methods and synthesised property accessors.
pub(crate) struct MethodSpec {
    pub(crate) name: String,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) ret: Option<ast::Type>,

    /// Qualified class name when the member returns an object, empty
    /// otherwise.
    pub(crate) ret_object_class: String,
    pub(crate) is_static: bool,
}

pub(crate) struct ParamSpec {
    pub(crate) name: String,
    pub(crate) ty: ast::Type,
    pub(crate) object_class: String,
    pub(crate) is_array: bool,
    pub(crate) takes_ownership: bool,
}

impl ParamSpec {
    pub(crate) fn from_ast(param: &ast::Param) -> ParamSpec {
        ParamSpec {
            name: param.name.clone(),
            ty: param.ty,
            object_class: param.object_class.clone(),
            is_array: param.is_array,
            takes_ownership: param.takes_ownership,
        }
    }
}

impl MethodSpec {
    pub(crate) fn from_method(method: &ast::MethodDecl) -> MethodSpec {
        MethodSpec {
            name: method.name.clone(),
            params: method.params.iter().map(ParamSpec::from_ast).collect(),
            ret: method.ret,
            ret_object_class: method.ret_object_class.clone(),
            is_static: method.is_static,
        }
    }

    pub(crate) fn getter(property: &ast::PropertyDecl) -> MethodSpec {
        MethodSpec {
            name: format!("get_{}", property.name),
            params: Vec::new(),
            ret: Some(property.ty),
            ret_object_class: String::new(),
            is_static: property.is_static,
        }
    }

    pub(crate) fn setter(
        property: &ast::PropertyDecl,
        setter: &ast::PropertySet,
    ) -> MethodSpec {
        MethodSpec {
            name: format!("set_{}", property.name),
            params: vec![ParamSpec {
                name: setter.param_name.clone(),
                ty: property.ty,
                object_class: String::new(),
                is_array: false,
                takes_ownership: false,
            }],
            ret: None,
            ret_object_class: String::new(),
            is_static: property.is_static,
        }
    }
}

impl<'a> Lowerer<'a> {
    /// Binds one incoming parameter to a stack slot. Booleans get a 1-byte
    /// slot; arrays go through the retain/release store protocol; objects
    /// are stored as pointers.
    pub(crate) fn emit_param_init(
        &mut self,
        param: &ParamSpec,
        param_index: usize,
        param_names: &mut HashSet<String>,
    ) {
        param_names.insert(param.name.clone());

        let is_object = !param.object_class.is_empty();
        let bytes = if !param.is_array && !is_object && param.ty == ast::Type::Bool
        {
            1
        } else {
            8
        };
        let slot = self.emit_alloca(bytes);

        if param.is_array {
            self.symbols.mark_array(&param.name);
            self.emit_store(Type::Ptr, slot.clone(), Value::Null);
        }

        if is_object {
            let qualified = self.qualify(&param.object_class);

            self.symbols.set_object_class(&param.name, qualified);
        } else {
            self.symbols.set_type(&param.name, param.ty);
        }

        self.symbols.mark_referenced(&param.name);

        let slot_id = match slot {
            Value::Temp(id) => id,
            _ => unreachable!(),
        };

        self.symbols.set_slot(&param.name, slot_id);

        let il_ty = if is_object || param.is_array {
            Type::Ptr
        } else {
            ast_type_to_il(param.ty)
        };
        let incoming = Value::Temp(param_index as u32);

        if param.is_array {
            self.store_array(slot, incoming, is_object);
        } else {
            self.emit_store(il_ty, slot, incoming);
        }
    }

    /// Binds all parameters in order. `self_offset` is 1 for instance
    /// members, 0 for static ones.
    pub(crate) fn emit_all_param_inits(
        &mut self,
        params: &[ParamSpec],
        self_offset: usize,
    ) -> HashSet<String> {
        let mut param_names = HashSet::new();

        for (index, param) in params.iter().enumerate() {
            self.emit_param_init(param, self_offset + index, &mut param_names);
        }

        param_names
    }

    /// Requests the retain/release helpers an array parameter will need.
    pub(crate) fn require_array_param_helpers(&mut self) {
        self.request_feature(RuntimeFeature::ArrI64Retain);
        self.request_feature(RuntimeFeature::ArrI64Release);
    }

    /// Allocates storage for instance array fields declared with fixed
    /// extents, using the element-kind-specific runtime allocator.
    pub(crate) fn emit_array_field_inits(
        &mut self,
        klass: &ast::ClassDecl,
        self_slot: u32,
    ) {
        let Some(layout) = self.find_layout(&klass.name) else { return };
        let me = self.load_self_pointer(self_slot);

        for member in &klass.members {
            let ast::ClassMember::Field(field) = member else { continue };

            if field.is_static || !field.is_array || field.extents.is_empty() {
                continue;
            }

            let Some(slot) = layout.find_field(&field.name) else { continue };

            // Extents are inclusive upper bounds: DIM A(7) holds 8 elements.
            let total: i64 = field.extents.iter().map(|e| e + 1).product();
            let length = Value::Int(total);
            let handle = if field.ty == ast::Type::Str {
                self.request_feature(RuntimeFeature::ArrStrAlloc);
                self.emit_call_ret(Type::Ptr, "rt_arr_str_alloc", vec![length])
            } else if !field.object_class.is_empty() {
                self.request_feature(RuntimeFeature::ArrObjNew);
                self.emit_call_ret(Type::Ptr, "rt_arr_obj_new", vec![length])
            } else {
                self.request_feature(RuntimeFeature::ArrI64New);
                self.emit_call_ret(Type::Ptr, "rt_arr_i64_new", vec![length])
            };
            let field_ptr = self.emit_gep(me.clone(), slot.offset as i64);

            self.emit_store(Type::Ptr, field_ptr, handle);
        }
    }

    /// The destructor's field cleanup: object arrays release through the
    /// array helper, single objects through the refcount check, strings
    /// through the string release helper. Primitives need no action.
    pub(crate) fn emit_field_release_sequence(
        &mut self,
        self_ptr: Value,
        layout: &types::layout::ClassLayout,
    ) {
        for field in &layout.fields {
            self.cur_loc = location::Location::synthetic();

            let field_ptr = self.emit_gep(self_ptr.clone(), field.offset as i64);

            if !field.object_class.is_empty() {
                let value = self.emit_load(Type::Ptr, field_ptr);

                if field.is_array {
                    self.request_feature(RuntimeFeature::ArrObjRelease);
                    self.emit_call("rt_arr_obj_release", vec![value]);
                } else {
                    self.request_feature(RuntimeFeature::ObjReleaseCheck0);

                    // The flag is discarded: the referenced object's own
                    // destructor chain is driven by the caller's DELETE,
                    // not by this destructor.
                    let _ = self.emit_call_ret(
                        Type::I1,
                        "rt_obj_release_check0",
                        vec![value],
                    );
                }

                continue;
            }

            match field.ty {
                ast::Type::Str => {
                    let value = self.emit_load(Type::Str, field_ptr);

                    self.request_feature(RuntimeFeature::StrReleaseMaybe);
                    self.emit_call("rt_str_release_maybe", vec![value]);
                }
                ast::Type::I64 | ast::Type::F64 | ast::Type::Bool => {}
            }
        }
    }
}
