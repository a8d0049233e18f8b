//! Emission of class member bodies and the module initialiser.
//!
//! Every constructor, destructor, method, property accessor and static
//! constructor flows through the shared procedure scaffolding: reset state,
//! register parameters early, push class and field scopes, collect
//! variables, start the function, bind `ME`, initialise parameters and
//! locals, lower the body, and run the release epilogue at the exit block.
use crate::il::{Type, Value};
use crate::lower::oop::helpers::{MethodSpec, ParamSpec};
use crate::lower::{ast_type_to_il, Lowerer, SELF_NAME};
use crate::runtime::RuntimeFeature;
use crate::symbol_names::{
    mangle_ctor, mangle_dtor, mangle_iface_bind_thunk, mangle_iface_reg_thunk,
    mangle_method, mangle_static_ctor, mangle_static_field, MODULE_INIT,
};
use ast::nodes as ast;
use location::Location;
use std::collections::HashSet;
use types::OopIndex;

/// Produces a registration order where every base class precedes each of its
/// derived classes. The visited set doubles as a cycle guard; analysis
/// rejects real cycles before lowering runs.
fn topological_class_order(index: &OopIndex) -> Vec<String> {
    fn visit(
        index: &OopIndex,
        qname: &str,
        registered: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) {
        let Some(class) = index.find_class(qname) else { return };
        let canonical = class.qualified_name.canonical();

        if registered.contains(&canonical) {
            return;
        }

        registered.insert(canonical);

        if let Some(base) = &class.base_qualified {
            visit(index, base.as_str(), registered, order);
        }

        order.push(class.qualified_name.as_str().to_string());
    }

    let mut registered = HashSet::new();
    let mut order = Vec::new();

    for class in index.classes() {
        visit(index, class.qualified_name.as_str(), &mut registered, &mut order);
    }

    order
}

impl<'a> Lowerer<'a> {
    /// Emits all class members, interface thunks, and the module initialiser
    /// for a program. Class bodies come first so their symbols exist before
    /// the initialiser references them.
    pub(crate) fn emit_oop_decls_and_bodies(&mut self, program: &ast::Program) {
        let index = self.index;

        // Module-scope globals for static fields, zero-initialised.
        for class in index.classes() {
            for field in &class.static_fields {
                let ty = if !field.object_class.is_empty() {
                    Type::Ptr
                } else {
                    ast_type_to_il(field.ty)
                };

                self.module.globals.push(crate::il::Global {
                    name: mangle_static_field(
                        class.qualified_name.as_str(),
                        &field.name,
                    ),
                    ty,
                });
            }
        }

        self.scan_declarations(&program.main);

        let reg_thunks = self.emit_interface_registration_thunks();
        let bind_thunks = self.emit_interface_bind_thunks();

        self.emit_module_init(&reg_thunks, &bind_thunks);
    }

    fn scan_declarations(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            match stmt {
                ast::Stmt::Namespace(ns) => {
                    self.push_namespace(&ns.path);
                    self.scan_declarations(&ns.body);
                    self.pop_namespace(ns.path.len());
                }
                ast::Stmt::Class(decl) => self.emit_class(decl),
                _ => {}
            }
        }
    }

    fn emit_class(&mut self, decl: &ast::ClassDecl) {
        let mut ctor = None;
        let mut static_ctor = None;
        let mut dtor = None;
        let mut methods = Vec::new();
        let mut properties = Vec::new();

        for member in &decl.members {
            match member {
                ast::ClassMember::Constructor(c) if c.is_static => {
                    static_ctor = Some(c);
                }
                ast::ClassMember::Constructor(c) => ctor = Some(c),
                ast::ClassMember::Destructor(d) => dtor = Some(d),
                ast::ClassMember::Method(m) => methods.push(m),
                ast::ClassMember::Property(p) => properties.push(p),
                ast::ClassMember::Field(_) => {}
            }
        }

        if let Some(ctor) = ctor {
            let params =
                ctor.params.iter().map(ParamSpec::from_ast).collect::<Vec<_>>();

            self.emit_class_constructor(decl, &params, &ctor.body);
        } else {
            let index = self.index;
            let synthesise = index
                .find_class(&self.qualify(&decl.name))
                .map_or(false, |class| class.has_synth_ctor);

            if synthesise {
                self.emit_class_constructor(decl, &[], &[]);
            }
        }

        // A destructor is emitted for every class, user body or not: field
        // cleanup must run regardless.
        self.emit_class_destructor(decl, dtor);

        for method in methods {
            self.emit_method_like(
                decl,
                &MethodSpec::from_method(method),
                &method.body,
            );
        }

        // Property accessors reuse the method pipeline end to end so their
        // epilogue semantics can't drift.
        for property in properties {
            if let Some(getter) = &property.getter {
                self.emit_method_like(
                    decl,
                    &MethodSpec::getter(property),
                    &getter.body,
                );
            }

            if let Some(setter) = &property.setter {
                self.emit_method_like(
                    decl,
                    &MethodSpec::setter(property, setter),
                    &setter.body,
                );
            }
        }

        if let Some(static_ctor) = static_ctor {
            self.emit_static_constructor(decl, static_ctor);
        }
    }

    fn emit_class_constructor(
        &mut self,
        klass: &ast::ClassDecl,
        params: &[ParamSpec],
        body: &[ast::Stmt],
    ) {
        self.reset_lowering_state();

        // Register parameter names and types before collecting variables so
        // same-named module-level variables can't pollute their typing.
        for param in params {
            self.register_proc_param(&param.name);

            if !param.object_class.is_empty() {
                let qualified = self.qualify(&param.object_class);

                self.symbols.set_object_class(&param.name, qualified);
            } else {
                self.symbols.set_type(&param.name, param.ty);
            }
        }

        let qname = self.qualify(&klass.name);

        self.push_class(qname.clone());
        self.push_field_scope(klass.name.clone());
        self.collect_vars(body);

        let mut ir_params = vec![(SELF_NAME.to_string(), Type::Ptr)];

        for param in params {
            let ty = if param.is_array || !param.object_class.is_empty() {
                Type::Ptr
            } else {
                ast_type_to_il(param.ty)
            };

            ir_params.push((param.name.clone(), ty));

            if param.is_array {
                self.require_array_param_helpers();
            }
        }

        self.start_function(mangle_ctor(&qname), Type::Void, ir_params);

        let exit = self.build_procedure_skeleton();
        let self_slot = self.materialize_self_slot(&qname);

        // Install the vptr at constructor entry; the vtable itself is
        // populated by the module initialiser.
        let index = self.index;

        if index.find_class(&qname).is_some() {
            if let Some(layout) = self.find_layout(&klass.name) {
                let class_id = layout.class_id;

                self.request_feature(RuntimeFeature::GetClassVtable);

                let vtable = self.emit_call_ret(
                    Type::Ptr,
                    "rt_get_class_vtable",
                    vec![Value::Int(class_id)],
                );
                let me = self.load_self_pointer(self_slot);

                self.emit_store(Type::Ptr, me, vtable);
            }
        }

        let param_names = self.emit_all_param_inits(params, 1);

        self.allocate_local_slots();
        self.emit_array_field_inits(klass, self_slot);
        self.emit_body_and_branch_to_exit(body, exit);
        self.cur_block = exit;
        self.emit_method_epilogue(&param_names, &param_names);
        self.release_owned_params(params);
        self.cur_loc = Location::synthetic();
        self.emit_ret_void();
        self.namer.reset();
        self.pop_field_scope();
        self.pop_class();
    }

    /// Releases the parameters semantic analysis marked as ownership
    /// transfers. Everything else stays borrowed.
    fn release_owned_params(&mut self, params: &[ParamSpec]) {
        let owned = params
            .iter()
            .filter(|p| p.takes_ownership)
            .map(|p| p.name.clone())
            .collect::<HashSet<_>>();

        if owned.is_empty() {
            return;
        }

        self.release_object_params(&owned);
        self.release_array_params(&owned);
    }

    fn emit_class_destructor(
        &mut self,
        klass: &ast::ClassDecl,
        dtor: Option<&ast::DestructorDecl>,
    ) {
        self.reset_lowering_state();

        let qname = self.qualify(&klass.name);

        self.push_class(qname.clone());
        self.push_field_scope(klass.name.clone());

        let body = dtor.map(|d| d.body.as_slice()).unwrap_or(&[]);

        if !body.is_empty() {
            self.collect_vars(body);
        }

        self.start_function(
            mangle_dtor(&qname),
            Type::Void,
            vec![(SELF_NAME.to_string(), Type::Ptr)],
        );

        let exit = self.build_procedure_skeleton();
        let self_slot = self.materialize_self_slot(&qname);

        self.allocate_local_slots();
        self.emit_body_and_branch_to_exit(body, exit);
        self.cur_block = exit;
        self.cur_loc = Location::synthetic();

        let me = self.load_self_pointer(self_slot);

        if let Some(layout) = self.find_layout(&klass.name) {
            self.emit_field_release_sequence(me, layout);
        }

        let empty = HashSet::new();

        self.emit_method_epilogue(&empty, &empty);
        self.cur_loc = Location::synthetic();
        self.emit_ret_void();
        self.namer.reset();
        self.pop_field_scope();
        self.pop_class();
    }

    pub(crate) fn emit_method_like(
        &mut self,
        klass: &ast::ClassDecl,
        spec: &MethodSpec,
        body: &[ast::Stmt],
    ) {
        self.reset_lowering_state();

        for param in &spec.params {
            self.register_proc_param(&param.name);

            if !param.object_class.is_empty() {
                let qualified = self.qualify(&param.object_class);

                self.symbols.set_object_class(&param.name, qualified);
            } else {
                self.symbols.set_type(&param.name, param.ty);
            }
        }

        let qname = self.qualify(&klass.name);

        self.push_class(qname.clone());
        self.push_field_scope(klass.name.clone());
        self.collect_vars(body);
        self.current_proc_name = Some(spec.name.clone());

        let returns_object = !spec.ret_object_class.is_empty();
        let returns_value = spec.ret.is_some() || returns_object;

        // The method-name symbol carries the return value, VB-style. For
        // object returns it must be typed as an object so the epilogue can
        // exclude it from release.
        if returns_object {
            self.symbols
                .set_object_class(&spec.name, spec.ret_object_class.clone());
            self.symbols.mark_referenced(&spec.name);
        } else if let Some(ty) = spec.ret {
            self.symbols.set_type(&spec.name, ty);
            self.symbols.mark_referenced(&spec.name);
        }

        let ret_ty = if returns_object {
            Type::Ptr
        } else {
            spec.ret.map(ast_type_to_il).unwrap_or(Type::Void)
        };
        let mut ir_params = Vec::with_capacity(spec.params.len() + 1);

        if !spec.is_static {
            ir_params.push((SELF_NAME.to_string(), Type::Ptr));
        }

        for param in &spec.params {
            let ty = if param.is_array || !param.object_class.is_empty() {
                Type::Ptr
            } else {
                ast_type_to_il(param.ty)
            };

            ir_params.push((param.name.clone(), ty));

            if param.is_array {
                self.require_array_param_helpers();
            }
        }

        self.start_function(mangle_method(&qname, &spec.name), ret_ty, ir_params);

        let exit = self.build_procedure_skeleton();

        if !spec.is_static {
            self.materialize_self_slot(&qname);
        }

        let self_offset = if spec.is_static { 0 } else { 1 };
        let param_names = self.emit_all_param_inits(&spec.params, self_offset);

        self.allocate_local_slots();
        self.emit_body_and_branch_to_exit(body, exit);
        self.cur_block = exit;

        // The returned object must survive the epilogue: exclude the
        // method-name symbol from the object release set.
        let mut exclude = param_names.clone();

        if returns_object {
            exclude.insert(spec.name.clone());
        }

        self.emit_method_epilogue(&param_names, &exclude);
        self.release_owned_params(&spec.params);
        self.cur_loc = Location::synthetic();

        if returns_value {
            let slot_id = self
                .symbols
                .get(&spec.name)
                .and_then(|info| info.slot_id);
            let ret_value = match slot_id {
                Some(id) => self.emit_load(ret_ty, Value::Temp(id)),
                None if returns_object => Value::Null,
                None => match spec.ret.unwrap() {
                    ast::Type::I64 => Value::Int(0),
                    ast::Type::F64 => Value::Float(0.0),
                    ast::Type::Bool => self.emit_bool_const(false),
                    ast::Type::Str => {
                        let label = self.get_string_label("");

                        self.emit_const_str(&label)
                    }
                },
            };

            self.emit_ret(ret_value);
        } else {
            self.emit_ret_void();
        }

        self.namer.reset();
        self.pop_field_scope();
        self.pop_class();
        self.current_proc_name = None;
    }

    /// Emits the class-level initialiser thunk and records it for the module
    /// initialiser to call.
    fn emit_static_constructor(
        &mut self,
        klass: &ast::ClassDecl,
        ctor: &ast::ConstructorDecl,
    ) {
        self.reset_lowering_state();

        let qname = self.qualify(&klass.name);

        self.push_class(qname.clone());
        self.collect_vars(&ctor.body);

        let name = mangle_static_ctor(&qname);

        self.start_function(name.clone(), Type::Void, Vec::new());

        let exit = self.build_procedure_skeleton();

        self.allocate_local_slots();
        self.emit_body_and_branch_to_exit(&ctor.body, exit);
        self.cur_block = exit;
        self.cur_loc = Location::synthetic();
        self.emit_ret_void();
        self.static_ctor_aliases
            .insert(name, "__static_ctor".to_string());
        self.namer.reset();
        self.pop_class();
    }

    // -------------------------------------------------------------------
    // Interface thunks and the module initialiser
    // -------------------------------------------------------------------

    fn start_thunk(&mut self, name: String) {
        self.reset_lowering_state();
        self.start_function(name, Type::Void, Vec::new());

        let function = self.cur_fn.unwrap();
        let entry =
            self.module.functions[function].add_block("entry".to_string());

        self.cur_block = entry;
        self.cur_loc = Location::synthetic();
    }

    fn emit_interface_registration_thunks(&mut self) -> Vec<String> {
        let index = self.index;
        let interfaces = index
            .interfaces()
            .map(|iface| {
                (
                    iface.qualified_name.as_str().to_string(),
                    iface.iface_id,
                    iface.slots.len() as i64,
                )
            })
            .collect::<Vec<_>>();
        let mut thunks = Vec::with_capacity(interfaces.len());

        for (qname, iface_id, slot_count) in interfaces {
            let name = mangle_iface_reg_thunk(&qname);

            thunks.push(name.clone());
            self.start_thunk(name);
            self.request_feature(RuntimeFeature::RegisterInterface);

            let label = self.get_string_label(&qname);
            let qname_handle = self.emit_const_str(&label);

            self.emit_call(
                "rt_register_interface_direct",
                vec![
                    Value::Int(iface_id),
                    qname_handle,
                    Value::Int(slot_count),
                ],
            );
            self.emit_ret_void();
        }

        thunks
    }

    fn emit_interface_bind_thunks(&mut self) -> Vec<String> {
        let index = self.index;
        let mut thunks = Vec::new();
        let mut pending = Vec::new();

        for class in index.classes() {
            let Some(layout) = self.find_layout(&class.name) else { continue };

            for &iface_id in &class.implemented_interfaces {
                let Some(iface) = index.interface_by_id(iface_id) else {
                    continue;
                };

                pending.push((
                    class.qualified_name.as_str().to_string(),
                    layout.class_id,
                    iface_id,
                    iface.qualified_name.as_str().to_string(),
                    iface.slots.len(),
                ));
            }
        }

        for (class_qname, class_id, iface_id, iface_qname, slot_count) in
            pending
        {
            let name = mangle_iface_bind_thunk(&class_qname, &iface_qname);

            thunks.push(name.clone());
            self.start_thunk(name);
            self.request_feature(RuntimeFeature::Alloc);

            let bytes = (slot_count as i64) * 8;
            let itable = self.emit_call_ret(
                Type::Ptr,
                "rt_alloc",
                vec![Value::Int(bytes)],
            );
            let impl_names = index
                .find_class(&class_qname)
                .and_then(|class| class.iface_slot_impl.get(&iface_id));

            for slot in 0..slot_count {
                let slot_ptr =
                    self.emit_gep(itable.clone(), (slot as i64) * 8);
                let method_name = impl_names
                    .and_then(|names| names.get(slot))
                    .cloned()
                    .unwrap_or_default();

                // Abstract or missing implementations keep the slot layout
                // and trap through the runtime if dispatched.
                let target = if method_name.is_empty() {
                    None
                } else {
                    index.concrete_implementor(&class_qname, &method_name)
                };

                match target {
                    Some(implementor) => self.emit_store(
                        Type::Ptr,
                        slot_ptr,
                        Value::global(mangle_method(&implementor, &method_name)),
                    ),
                    None => self.emit_store(Type::Ptr, slot_ptr, Value::Null),
                }
            }

            self.request_feature(RuntimeFeature::BindInterface);
            self.emit_call(
                "rt_bind_interface",
                vec![Value::Int(class_id), Value::Int(iface_id), itable],
            );
            self.emit_ret_void();
        }

        thunks
    }

    /// Emits `__mod_init$oop`: class registrations in topological order,
    /// interface registration thunks, interface bind thunks, then static
    /// constructors in declaration order.
    fn emit_module_init(&mut self, reg_thunks: &[String], bind_thunks: &[String]) {
        let index = self.index;

        self.start_thunk(MODULE_INIT.to_string());

        for qname in topological_class_order(index) {
            let Some(class) = index.find_class(&qname) else { continue };
            let Some(layout) = self.find_layout(&class.name) else { continue };
            let class_id = layout.class_id;
            let slots = index.vtable_slot_map(class.qualified_name.as_str());
            let slot_count = slots.len() as i64;
            let bytes = if slot_count > 0 { slot_count * 8 } else { 8 };

            self.request_feature(RuntimeFeature::Alloc);

            let vtable = self.emit_call_ret(
                Type::Ptr,
                "rt_alloc",
                vec![Value::Int(bytes)],
            );

            for (slot, method_name) in slots.iter().enumerate() {
                let slot_ptr =
                    self.emit_gep(vtable.clone(), (slot as i64) * 8);
                // Unbound and abstract slots hold null; dispatching through
                // one traps in the runtime.
                let target = if method_name.is_empty() {
                    None
                } else {
                    index.concrete_implementor(
                        class.qualified_name.as_str(),
                        method_name,
                    )
                };

                match target {
                    Some(implementor) => self.emit_store(
                        Type::Ptr,
                        slot_ptr,
                        Value::global(mangle_method(&implementor, method_name)),
                    ),
                    None => self.emit_store(Type::Ptr, slot_ptr, Value::Null),
                }
            }

            let base_id = class
                .base_qualified
                .as_ref()
                .and_then(|base| index.find_class(base.as_str()))
                .and_then(|base| self.find_layout(&base.name))
                .map(|base_layout| base_layout.class_id)
                .unwrap_or(-1);

            self.request_feature(RuntimeFeature::RegisterClass);

            let label =
                self.get_string_label(class.qualified_name.as_str());
            let qname_handle = self.emit_const_str(&label);

            self.emit_call(
                "rt_register_class_with_base_rs",
                vec![
                    Value::Int(class_id),
                    vtable,
                    qname_handle,
                    Value::Int(slot_count),
                    Value::Int(base_id),
                ],
            );
        }

        // Interfaces register before any class binds to them.
        for thunk in reg_thunks {
            self.emit_call(thunk, Vec::new());
        }

        for thunk in bind_thunks {
            self.emit_call(thunk, Vec::new());
        }

        // Static constructors run last, once all wiring is installed. The
        // aliases table was filled in class-declaration order.
        let static_ctors = self
            .static_ctor_aliases
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        for name in static_ctors {
            self.emit_call(&name, Vec::new());
        }

        self.emit_ret_void();
    }
}
