//! Lowering of `NEW` expressions.
use crate::il::{Type, Value};
use crate::lower::{Lowerer, RVal};
use crate::runtime::{find_runtime_class, RuntimeFeature};
use crate::symbol_names::mangle_ctor;
use ast::nodes as ast;

impl<'a> Lowerer<'a> {
    /// Lowers `NEW Class(args)`.
    ///
    /// Built-in classes from the runtime catalog construct through a direct
    /// runtime call when bridging is enabled. Everything else allocates
    /// through the object allocator, installs the vptr so virtual dispatch
    /// works from the first constructor instruction, and then invokes the
    /// constructor with the instance prepended to the arguments.
    pub(crate) fn lower_new(&mut self, expr: &ast::New) -> RVal {
        self.cur_loc = expr.location;

        let qname = self.qualify(&expr.class_name);

        if self.config.runtime_type_bridging {
            if let Some(runtime_class) = find_runtime_class(&qname) {
                let mut args = Vec::with_capacity(expr.args.len());

                for arg in &expr.args {
                    let lowered = self.lower_expr(arg);

                    args.push(lowered.value);
                }

                let ret = if runtime_class.returns_str {
                    Type::Str
                } else {
                    Type::Ptr
                };

                self.module.add_extern(runtime_class.ctor, Vec::new(), ret);
                self.cur_loc = expr.location;

                let value = self.emit_call_ret(ret, runtime_class.ctor, args);

                return RVal { value, ty: ret };
            }
        }

        // Unresolved classes lower with (0, 8): analysis already reported
        // the error, and an 8-byte allocation still leaves room for the
        // header.
        let (mut size, class_id) = self
            .find_layout(&expr.class_name)
            .map(|layout| (layout.size as i64, layout.class_id))
            .unwrap_or((8, 0));

        if size < 8 {
            size = 8;
        }

        self.request_feature(RuntimeFeature::ObjNew);

        let object = self.emit_call_ret(
            Type::Ptr,
            "rt_obj_new_i64",
            vec![Value::Int(class_id), Value::Int(size)],
        );

        // Install the vptr before the constructor runs, so dispatch inside
        // the constructor body resolves through the registered vtable.
        if self.index.find_class(&qname).is_some()
            && self.find_layout(&expr.class_name).is_some()
        {
            self.request_feature(RuntimeFeature::GetClassVtable);

            let vtable = self.emit_call_ret(
                Type::Ptr,
                "rt_get_class_vtable",
                vec![Value::Int(class_id)],
            );

            self.emit_store(Type::Ptr, object.clone(), vtable);
        }

        let mut ctor_args = Vec::with_capacity(expr.args.len() + 1);

        ctor_args.push(object.clone());

        for arg in &expr.args {
            let lowered = self.lower_expr(arg);

            ctor_args.push(lowered.value);
        }

        self.cur_loc = expr.location;
        self.emit_call(&mangle_ctor(&qname), ctor_args);

        RVal { value: object, ty: Type::Ptr }
    }
}
