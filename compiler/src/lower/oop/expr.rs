//! Class resolution, member access, and method dispatch.
use crate::il::{Type, Value};
use crate::lower::{ast_type_to_il, Lowerer, RVal, SELF_NAME};
use crate::symbol_names::mangle_method;
use ast::nodes as ast;

impl<'a> Lowerer<'a> {
    /// Recovers the best static class of an object-valued expression.
    ///
    /// Walks variable references, `ME`, `NEW`, member access chains, indexed
    /// references and method calls. An empty result means the class can't be
    /// determined; callers fall back to conservative emission.
    pub(crate) fn resolve_object_class(&self, expr: &ast::Expr) -> String {
        match expr {
            ast::Expr::Var(var) => {
                if let Some(info) = self.symbols.get(&var.name) {
                    if info.is_object {
                        return info.object_class.clone();
                    }
                }

                // Module-level object variables referenced away from their
                // DIM resolve through the module cache.
                self.module_object_class
                    .get(&var.name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_default()
            }
            ast::Expr::Me(_) => self
                .symbols
                .get(SELF_NAME)
                .filter(|info| info.is_object)
                .map(|info| info.object_class.clone())
                .unwrap_or_default(),
            ast::Expr::New(new) => self.qualify(&new.class_name),
            ast::Expr::MemberAccess(access) => {
                let base_class = self.resolve_object_class(&access.base);

                if base_class.is_empty() {
                    return String::new();
                }

                self.find_layout(&base_class)
                    .and_then(|layout| layout.find_field(&access.member))
                    .filter(|field| !field.object_class.is_empty())
                    .map(|field| self.qualify(&field.object_class))
                    .unwrap_or_default()
            }
            ast::Expr::MethodCall(call) => {
                let base_class = self.resolve_object_class(&call.base);

                if base_class.is_empty() {
                    return String::new();
                }

                // BASIC uses parentheses for both indexing and calls, so
                // `obj.items(0)` parses as a call; check for an array field
                // before treating the name as a method.
                if let Some(field) = self
                    .find_layout(&base_class)
                    .and_then(|layout| layout.find_field(&call.method))
                {
                    if field.is_array && !field.object_class.is_empty() {
                        return self.qualify(&field.object_class);
                    }
                }

                self.index
                    .find_method_in_hierarchy(&base_class, &call.method)
                    .filter(|method| !method.ret_object_class.is_empty())
                    .map(|method| method.ret_object_class.clone())
                    .unwrap_or_default()
            }
            ast::Expr::ArrayRef(array) => {
                if let Some(info) = self.symbols.get(&array.name) {
                    if info.is_object {
                        return info.object_class.clone();
                    }
                }

                if let Some(field) = self.lookup_scope_field(&array.name) {
                    if !field.object_class.is_empty() {
                        return self.qualify(&field.object_class);
                    }
                }

                self.module_array_elem_class
                    .get(&array.name.to_ascii_lowercase())
                    .cloned()
                    .unwrap_or_default()
            }
            _ => String::new(),
        }
    }

    /// Lowers `base.field`: resolve the base class, look up the field's
    /// offset, then GEP and typed load. Unknown classes or fields degrade to
    /// a zero placeholder; diagnostics were raised during analysis.
    pub(crate) fn lower_member_access(
        &mut self,
        node: &ast::MemberAccess,
    ) -> RVal {
        let class = self.resolve_object_class(&node.base);
        let base = self.lower_expr(&node.base);
        let Some(field) = self
            .find_layout(&class)
            .and_then(|layout| layout.find_field(&node.member))
        else {
            return RVal { value: Value::Int(0), ty: Type::I64 };
        };
        let offset = field.offset as i64;
        let ty = if field.is_array || !field.object_class.is_empty() {
            Type::Ptr
        } else {
            ast_type_to_il(field.ty)
        };

        self.cur_loc = node.location;

        let ptr = self.emit_gep(base.value, offset);
        let value = self.emit_load(ty, ptr);

        RVal { value, ty }
    }

    /// Lowers `base.m(args)`. Non-virtual and final methods dispatch
    /// directly to the implementing class's symbol; virtual methods load the
    /// vptr, index the vtable by slot, and call indirectly.
    pub(crate) fn lower_method_call(&mut self, node: &ast::MethodCall) -> RVal {
        let index = self.index;
        let class = self.resolve_object_class(&node.base);
        let base = self.lower_expr(&node.base);
        let mut args = Vec::with_capacity(node.args.len() + 1);

        args.push(base.value.clone());

        for arg in &node.args {
            let lowered = self.lower_expr(arg);

            args.push(lowered.value);
        }

        self.cur_loc = node.location;

        if class.is_empty() {
            // Unknown receiver class: call by bare name and yield zero;
            // semantic analysis already rejected this program.
            self.emit_call(&node.method, args);
            return RVal { value: Value::Int(0), ty: Type::I64 };
        }

        let method = index.find_method_in_hierarchy(&class, &node.method);
        let ret = match method {
            Some(info) if !info.ret_object_class.is_empty() => Some(Type::Ptr),
            Some(info) => info.ret.map(ast_type_to_il),
            None => None,
        };
        let virtual_dispatch = method
            .map(|info| info.is_virtual && !info.is_final && info.slot >= 0)
            .unwrap_or(false);

        let value = if virtual_dispatch {
            let slot = method.unwrap().slot as i64;
            let vptr = self.emit_load(Type::Ptr, base.value);
            let slot_ptr = self.emit_gep(vptr, slot * 8);
            let target = self.emit_load(Type::Ptr, slot_ptr);

            match ret {
                Some(ty) => {
                    let value = self.emit_call_indirect_ret(ty, target, args);

                    RVal { value, ty }
                }
                None => {
                    self.emit_call_indirect(target, args);
                    RVal { value: Value::Int(0), ty: Type::I64 }
                }
            }
        } else {
            let implementor = index.implementing_class(&class, &node.method);
            let callee = mangle_method(&implementor, &node.method);

            match ret {
                Some(ty) => {
                    let value = self.emit_call_ret(ty, &callee, args);

                    RVal { value, ty }
                }
                None => {
                    self.emit_call(&callee, args);
                    RVal { value: Value::Int(0), ty: Type::I64 }
                }
            }
        };

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::Opcode;
    use crate::test_util::{
        assign, calls_to, class_stmt, dim_object, expr_stmt, function,
        instructions, mcall, member, method, new_expr, program, var, Fixture,
    };
    use types::qualified_name::QualifiedName;
    use types::{ClassInfo, FieldInfo, MethodInfo};

    fn virtual_method(name: &str, slot: i32) -> MethodInfo {
        let mut info = MethodInfo::new(name);

        info.is_virtual = true;
        info.slot = slot;
        info
    }

    fn animal_fixture() -> Fixture {
        let mut fixture = Fixture::new();
        let mut animal = ClassInfo::new(QualifiedName::new("Animal"));

        animal.has_synth_ctor = true;
        animal.add_method(virtual_method("Speak", 0));

        let mut name = MethodInfo::new("Name");

        name.ret = Some(ast::Type::Str);
        animal.add_method(name);
        fixture.add_class(animal);
        fixture
    }

    #[test]
    fn test_virtual_call_goes_through_the_vtable() {
        let fixture = animal_fixture();
        let program = program(vec![
            class_stmt(
                "Animal",
                vec![
                    method("Speak", Vec::new(), None, Vec::new()),
                    method("Name", Vec::new(), Some(ast::Type::Str), Vec::new()),
                ],
            ),
            dim_object("a", "Animal"),
            assign(var("a"), new_expr("Animal", Vec::new())),
            expr_stmt(mcall(var("a"), "Speak", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");
        let ins = instructions(main);
        let site = ins
            .iter()
            .position(|i| i.op == Opcode::CallIndirect)
            .expect("no indirect call emitted");

        // vptr load at offset 0, slot GEP, function pointer load, call.
        assert_eq!(ins[site - 3].op, Opcode::Load);
        assert_eq!(ins[site - 3].ty, Type::Ptr);
        assert_eq!(ins[site - 2].op, Opcode::Gep);
        assert_eq!(ins[site - 2].operands[1], Value::Int(0));
        assert_eq!(ins[site - 1].op, Opcode::Load);

        // The receiver rides along as the first argument.
        assert!(matches!(ins[site].operands[1], Value::Temp(_)));
    }

    #[test]
    fn test_non_virtual_call_dispatches_directly() {
        let fixture = animal_fixture();
        let program = program(vec![
            class_stmt(
                "Animal",
                vec![
                    method("Speak", Vec::new(), None, Vec::new()),
                    method("Name", Vec::new(), Some(ast::Type::Str), Vec::new()),
                ],
            ),
            dim_object("a", "Animal"),
            assign(var("a"), new_expr("Animal", Vec::new())),
            expr_stmt(mcall(var("a"), "Name", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");
        let direct = calls_to(main, "Animal.Name");

        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].ty, Type::Str);
    }

    #[test]
    fn test_final_method_bypasses_the_vtable() {
        let mut fixture = Fixture::new();
        let mut animal = ClassInfo::new(QualifiedName::new("Animal"));
        let mut run = virtual_method("Run", 0);

        run.is_final = true;
        animal.has_synth_ctor = true;
        animal.add_method(run);
        fixture.add_class(animal);

        let program = program(vec![
            class_stmt("Animal", vec![method("Run", Vec::new(), None, Vec::new())]),
            dim_object("a", "Animal"),
            assign(var("a"), new_expr("Animal", Vec::new())),
            expr_stmt(mcall(var("a"), "Run", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        assert_eq!(calls_to(main, "Animal.Run").len(), 1);
        assert!(!instructions(main)
            .iter()
            .any(|i| i.op == Opcode::CallIndirect));
    }

    #[test]
    fn test_inherited_method_calls_the_implementing_class() {
        let mut fixture = Fixture::new();
        let mut base = ClassInfo::new(QualifiedName::new("Base"));

        base.has_synth_ctor = true;
        base.add_method(MethodInfo::new("Helper"));
        fixture.add_class(base);

        let mut derived = ClassInfo::new(QualifiedName::new("Derived"));

        derived.base_qualified = Some(QualifiedName::new("Base"));
        derived.has_synth_ctor = true;
        fixture.add_class(derived);

        let program = program(vec![
            class_stmt("Base", vec![method("Helper", Vec::new(), None, Vec::new())]),
            class_stmt("Derived", Vec::new()),
            dim_object("d", "Derived"),
            assign(var("d"), new_expr("Derived", Vec::new())),
            expr_stmt(mcall(var("d"), "Helper", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        assert_eq!(calls_to(main, "Base.Helper").len(), 1);
    }

    #[test]
    fn test_call_on_unknown_class_falls_back_to_the_bare_name() {
        let fixture = Fixture::new();
        let program = program(vec![
            dim_object("x", ""),
            expr_stmt(mcall(var("x"), "Mystery", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        assert_eq!(calls_to(main, "Mystery").len(), 1);
    }

    #[test]
    fn test_member_access_loads_through_the_field_offset() {
        let mut fixture = Fixture::new();
        let mut point = ClassInfo::new(QualifiedName::new("Point"));

        point.has_synth_ctor = true;
        point.fields.push(FieldInfo::scalar("x", ast::Type::I64));
        point.fields.push(FieldInfo::scalar("y", ast::Type::I64));
        fixture.add_class(point);

        let program = program(vec![
            class_stmt("Point", Vec::new()),
            dim_object("p", "Point"),
            crate::test_util::dim_scalar("n", ast::Type::I64),
            assign(var("p"), new_expr("Point", Vec::new())),
            assign(var("n"), member(var("p"), "y")),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");
        let ins = instructions(main);
        let gep = ins
            .iter()
            .position(|i| {
                i.op == Opcode::Gep && i.operands[1] == Value::Int(16)
            })
            .expect("no GEP at the y offset");

        assert_eq!(ins[gep + 1].op, Opcode::Load);
        assert_eq!(ins[gep + 1].ty, Type::I64);
    }

    #[test]
    fn test_missing_field_degrades_to_zero() {
        let mut fixture = Fixture::new();
        let mut point = ClassInfo::new(QualifiedName::new("Point"));

        point.has_synth_ctor = true;
        fixture.add_class(point);

        let program = program(vec![
            class_stmt("Point", Vec::new()),
            dim_object("p", "Point"),
            crate::test_util::dim_scalar("n", ast::Type::I64),
            assign(var("p"), new_expr("Point", Vec::new())),
            assign(var("n"), member(var("p"), "ghost")),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        // The store into `n` falls back to the zero placeholder.
        assert!(instructions(main).iter().any(|i| {
            i.op == Opcode::Store
                && i.ty == Type::I64
                && i.operands[1] == Value::Int(0)
        }));
    }

    #[test]
    fn test_resolves_classes_through_member_chains() {
        let mut fixture = Fixture::new();
        let mut engine = ClassInfo::new(QualifiedName::new("Engine"));

        engine.has_synth_ctor = true;
        fixture.add_class(engine);

        let mut car = ClassInfo::new(QualifiedName::new("Car"));
        let mut field = FieldInfo::scalar("engine", ast::Type::I64);

        field.object_class = "Engine".to_string();
        car.fields.push(field);
        car.has_synth_ctor = true;
        fixture.add_class(car);

        let lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);
        let expr = member(new_expr("Car", Vec::new()), "engine");

        assert_eq!(lowerer.resolve_object_class(&expr), "Engine");

        let scalar = member(new_expr("Engine", Vec::new()), "rpm");

        assert_eq!(lowerer.resolve_object_class(&scalar), "");
    }

    #[test]
    fn test_resolves_method_return_classes_and_field_arrays() {
        let mut fixture = Fixture::new();
        let mut widget = ClassInfo::new(QualifiedName::new("Widget"));

        widget.has_synth_ctor = true;
        fixture.add_class(widget);

        let mut panel = ClassInfo::new(QualifiedName::new("Panel"));
        let mut make = MethodInfo::new("Make");

        make.ret_object_class = "Widget".to_string();
        panel.add_method(make);

        let mut items = FieldInfo::scalar("items", ast::Type::I64);

        items.object_class = "Widget".to_string();
        items.is_array = true;
        panel.fields.push(items);
        panel.has_synth_ctor = true;
        fixture.add_class(panel);

        let lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);
        let call = mcall(new_expr("Panel", Vec::new()), "Make", Vec::new());

        assert_eq!(lowerer.resolve_object_class(&call), "Widget");

        // `panel.items(0)` parses as a call; the array field wins.
        let indexed = mcall(
            new_expr("Panel", Vec::new()),
            "items",
            vec![crate::test_util::int(0)],
        );

        assert_eq!(lowerer.resolve_object_class(&indexed), "Widget");
    }

    #[test]
    fn test_resolves_module_level_object_variables() {
        let mut fixture = Fixture::new();
        let mut widget = ClassInfo::new(QualifiedName::new("Widget"));

        widget.has_synth_ctor = true;
        fixture.add_class(widget);

        let mut lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);
        let main = vec![dim_object("w", "Widget")];

        lowerer.cache_module_object_types(&main);

        assert_eq!(
            lowerer.resolve_object_class(&var("W")),
            "Widget",
            "module cache lookups are case-insensitive"
        );
    }

    #[test]
    fn test_string_method_results_are_deferred_for_release() {
        let fixture = animal_fixture();
        let program = program(vec![
            class_stmt(
                "Animal",
                vec![
                    method("Speak", Vec::new(), None, Vec::new()),
                    method("Name", Vec::new(), Some(ast::Type::Str), Vec::new()),
                ],
            ),
            dim_object("a", "Animal"),
            assign(var("a"), new_expr("Animal", Vec::new())),
            expr_stmt(mcall(var("a"), "Name", Vec::new())),
        ]);
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        // The discarded string result is released in the epilogue.
        assert_eq!(calls_to(main, "rt_str_release_maybe").len(), 1);
    }
}
