//! Lowering of `DELETE` statements.
use crate::il::Type;
use crate::lower::Lowerer;
use crate::runtime::RuntimeFeature;
use crate::symbol_names::mangle_dtor;
use ast::nodes as ast;

impl<'a> Lowerer<'a> {
    /// Lowers `DELETE target`.
    ///
    /// The target is evaluated exactly once and cached in a temporary; both
    /// the release check and the destructor receive that value. The
    /// destructor and the free helper run only on the branch where the
    /// runtime reports the reference count reached zero.
    pub(crate) fn lower_delete(&mut self, stmt: &ast::Delete) {
        self.cur_loc = stmt.location;

        let target = self.lower_expr(&stmt.target);

        self.request_feature(RuntimeFeature::ObjReleaseCheck0);
        self.request_feature(RuntimeFeature::ObjFree);

        let should_destroy = self.emit_call_ret(
            Type::I1,
            "rt_obj_release_check0",
            vec![target.value.clone()],
        );
        let destroy_index = self.add_block("delete_dtor");
        let cont_index = self.add_block("delete_cont");

        self.cur_loc = stmt.location;
        self.emit_cbr(should_destroy, destroy_index, cont_index);
        self.cur_block = destroy_index;
        self.cur_loc = stmt.location;

        let class = self.resolve_object_class(&stmt.target);

        if !class.is_empty() {
            self.emit_call(&mangle_dtor(&class), vec![target.value.clone()]);
        }

        self.emit_call("rt_obj_free", vec![target.value]);
        self.emit_br(cont_index);
        self.cur_block = cont_index;
        self.cur_loc = stmt.location;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{Opcode, Value};
    use crate::test_util::{
        assign, calls_to, class_stmt, delete_stmt, dim_object, function, int,
        new_expr, program, var, Fixture,
    };
    use types::qualified_name::QualifiedName;
    use types::{ClassInfo, FieldInfo};

    fn point_program() -> (Fixture, ast::Program) {
        let mut fixture = Fixture::new();
        let mut point = ClassInfo::new(QualifiedName::new("Point"));

        point.has_synth_ctor = true;
        point.fields.push(FieldInfo::scalar("x", ast::Type::I64));
        fixture.add_class(point);

        let program = program(vec![
            class_stmt("Point", Vec::new()),
            dim_object("p", "Point"),
            assign(var("p"), new_expr("Point", vec![int(1)])),
            delete_stmt(var("p")),
        ]);

        (fixture, program)
    }

    #[test]
    fn test_delete_checks_the_refcount_before_destroying() {
        let (fixture, program) = point_program();
        let module = fixture.lower(&program);
        let main = function(&module, "main");
        let check = calls_to(main, "rt_obj_release_check0");

        // One check for DELETE, one for the main epilogue's local release.
        assert_eq!(check.len(), 2);

        // The destroy branch runs the destructor, then frees.
        let dtor_block = main
            .blocks
            .iter()
            .find(|b| b.label.starts_with("delete_dtor"))
            .unwrap();
        let callees = dtor_block
            .instructions
            .iter()
            .filter_map(|i| i.callee.clone())
            .collect::<Vec<_>>();

        assert_eq!(callees, vec!["Point.__dtor", "rt_obj_free"]);
        assert!(main
            .blocks
            .iter()
            .any(|b| b.label.starts_with("delete_cont")));
    }

    #[test]
    fn test_delete_evaluates_the_target_exactly_once() {
        let (fixture, program) = point_program();
        let module = fixture.lower(&program);
        let main = function(&module, "main");

        // The value passed to the release check, the destructor, and the
        // free helper must be one and the same temporary.
        let check = calls_to(main, "rt_obj_release_check0")[0].operands[0].clone();
        let dtor_block = main
            .blocks
            .iter()
            .find(|b| b.label.starts_with("delete_dtor"))
            .unwrap();

        for ins in &dtor_block.instructions {
            if ins.op == Opcode::Call {
                assert_eq!(ins.operands[0], check);
            }
        }

        assert!(matches!(check, Value::Temp(_)));
    }
}
