//! Statement lowering for the forms that appear inside member bodies.
use crate::il::{Type, Value};
use crate::lower::{ast_type_to_il, Lowerer};
use crate::runtime::RuntimeFeature;
use ast::nodes as ast;

impl<'a> Lowerer<'a> {
    pub(crate) fn lower_stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::Dim(node) => self.lower_dim(node),
            ast::Stmt::Assign(node) => self.lower_assign(node),
            ast::Stmt::Expr(node) => self.lower_expr_stmt(node),
            ast::Stmt::Return(node) => self.lower_return(node),
            ast::Stmt::Delete(node) => self.lower_delete(node),
            ast::Stmt::OnError(node) => self.lower_on_error(node),
            // Declarations were emitted before procedure bodies.
            ast::Stmt::Class(_)
            | ast::Stmt::Interface(_)
            | ast::Stmt::Namespace(_) => {}
        }
    }

    /// Scalar and object `DIM`s only reserve a slot, which already happened
    /// during local allocation. Arrays declared with fixed extents allocate
    /// their storage here.
    fn lower_dim(&mut self, node: &ast::Dim) {
        if !node.is_array || node.extents.is_empty() {
            return;
        }

        let Some(info) = self.symbols.get(&node.name) else { return };
        let Some(slot_id) = info.slot_id else { return };
        let is_object = !node.object_class.is_empty();

        self.cur_loc = node.location;

        let total: i64 =
            node.extents.iter().map(|e| e + 1).product();
        let length = Value::Int(total);
        let handle = if node.ty == ast::Type::Str {
            self.request_feature(RuntimeFeature::ArrStrAlloc);
            self.emit_call_ret(Type::Ptr, "rt_arr_str_alloc", vec![length])
        } else if is_object {
            self.request_feature(RuntimeFeature::ArrObjNew);
            self.emit_call_ret(Type::Ptr, "rt_arr_obj_new", vec![length])
        } else {
            self.request_feature(RuntimeFeature::ArrI64New);
            self.emit_call_ret(Type::Ptr, "rt_arr_i64_new", vec![length])
        };

        self.store_array(Value::Temp(slot_id), handle, is_object);
    }

    fn lower_assign(&mut self, node: &ast::Assign) {
        match &node.target {
            ast::Expr::Var(var) => self.lower_assign_var(node, var),
            ast::Expr::MemberAccess(access) => {
                let value = self.lower_expr(&node.value);
                let base = self.lower_expr(&access.base);
                let class = self.resolve_object_class(&access.base);
                let Some(layout) = self.find_layout(&class) else { return };
                let Some(field) = layout.find_field(&access.member) else {
                    return;
                };
                let ty = if field.is_array || !field.object_class.is_empty() {
                    Type::Ptr
                } else {
                    ast_type_to_il(field.ty)
                };
                let offset = field.offset as i64;

                self.cur_loc = node.location;

                let ptr = self.emit_gep(base.value, offset);

                self.emit_store(ty, ptr, value.value);
            }
            // Element stores belong to the array lowering pipeline.
            _ => {}
        }
    }

    fn lower_assign_var(&mut self, node: &ast::Assign, var: &ast::Var) {
        let value = self.lower_expr(&node.value);

        self.cur_loc = node.location;

        if let Some(info) = self.symbols.get(&var.name) {
            if let Some(slot_id) = info.slot_id {
                let slot = Value::Temp(slot_id);

                if info.is_array {
                    let is_object = !info.object_class.is_empty();

                    self.store_array(slot, value.value, is_object);
                } else if info.is_object {
                    self.emit_store(Type::Ptr, slot, value.value);
                } else {
                    let ty = ast_type_to_il(info.ty);

                    // A boolean assigned to an integer variable becomes the
                    // BASIC logical mask: -1 for true, 0 for false.
                    let stored = if ty == Type::I64 && value.ty == Type::I1 {
                        self.emit_basic_logical_i64(value.value)
                    } else {
                        value.value
                    };

                    self.emit_store(ty, slot, stored);
                }

                return;
            }
        }

        if let Some((global, ty)) = self.static_field_global(&var.name) {
            self.emit_store(ty, Value::Global(global), value.value);
            return;
        }

        if let Some(field) = self.lookup_scope_field(&var.name) {
            let ty = if field.is_array || !field.object_class.is_empty() {
                Type::Ptr
            } else {
                ast_type_to_il(field.ty)
            };
            let offset = field.offset as i64;
            let me = self.lower_me().value;
            let ptr = self.emit_gep(me, offset);

            self.emit_store(ty, ptr, value.value);
        }
    }

    fn lower_expr_stmt(&mut self, expr: &ast::Expr) {
        let result = self.lower_expr(expr);

        // String results produced for their side effects are still owned
        // handles; hold them for the epilogue's deferred release.
        if result.ty == Type::Str {
            if let Value::Temp(_) = result.value {
                self.defer_release(result.value, ast::Type::Str);
            }
        }
    }

    /// `RETURN expr` stores into the procedure-name slot and jumps to the
    /// exit block, which loads the slot for the actual `ret`. Plain `RETURN`
    /// just jumps.
    fn lower_return(&mut self, node: &ast::Return) {
        if let Some(expr) = &node.value {
            let value = self.lower_expr(expr);

            if let Some(name) = self.current_proc_name.clone() {
                if let Some(info) = self.symbols.get(&name) {
                    if let Some(slot_id) = info.slot_id {
                        let ty = if info.is_object {
                            Type::Ptr
                        } else {
                            ast_type_to_il(info.ty)
                        };

                        self.cur_loc = node.location;
                        self.emit_store(ty, Value::Temp(slot_id), value.value);
                    }
                }
            }
        }

        self.cur_loc = node.location;

        let exit = self.cur_exit;

        self.emit_br(exit);
    }

    /// `ON ERROR GOTO n` installs the per-line handler; `ON ERROR GOTO 0`
    /// clears it. Handlers never stack: installing a new one replaces the
    /// active one.
    fn lower_on_error(&mut self, node: &ast::OnError) {
        self.cur_loc = node.location;

        match node.line {
            Some(line) => {
                if self.handlers.active {
                    self.emit_eh_pop();
                }

                let handler = self.ensure_error_handler_block(line);

                self.cur_loc = node.location;
                self.emit_eh_push(handler);
                self.handlers.active = true;
            }
            None => {
                if self.handlers.active {
                    self.emit_eh_pop();
                }

                self.handlers.active = false;
            }
        }
    }
}
