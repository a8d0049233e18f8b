//! Various test helper functions and types.
//!
//! Tests populate the fact database directly, playing the role semantic
//! analysis has in the full pipeline, then drive the lowering and inspect
//! the produced module.
use crate::config::Config;
use crate::il;
use crate::lower::lower_program;
use ast::nodes as ast;
use location::Location;
use types::layout::{ClassLayout, LayoutMap};
use types::{ClassInfo, OopIndex};

pub(crate) fn loc() -> Location {
    Location::default()
}

// -----------------------------------------------------------------------
// Expression builders
// -----------------------------------------------------------------------

pub(crate) fn int(value: i64) -> ast::Expr {
    ast::Expr::Int(Box::new(ast::IntLiteral { value, location: loc() }))
}

pub(crate) fn bool_lit(value: bool) -> ast::Expr {
    ast::Expr::Bool(Box::new(ast::BoolLiteral { value, location: loc() }))
}

pub(crate) fn str_lit(value: &str) -> ast::Expr {
    ast::Expr::Str(Box::new(ast::StringLiteral {
        value: value.to_string(),
        location: loc(),
    }))
}

pub(crate) fn var(name: &str) -> ast::Expr {
    ast::Expr::Var(Box::new(ast::Var {
        name: name.to_string(),
        location: loc(),
    }))
}

pub(crate) fn me() -> ast::Expr {
    ast::Expr::Me(Box::new(ast::Me { location: loc() }))
}

pub(crate) fn new_expr(class_name: &str, args: Vec<ast::Expr>) -> ast::Expr {
    ast::Expr::New(Box::new(ast::New {
        class_name: class_name.to_string(),
        args,
        location: loc(),
    }))
}

pub(crate) fn member(base: ast::Expr, field: &str) -> ast::Expr {
    ast::Expr::MemberAccess(Box::new(ast::MemberAccess {
        base: Box::new(base),
        member: field.to_string(),
        location: loc(),
    }))
}

pub(crate) fn mcall(
    base: ast::Expr,
    method: &str,
    args: Vec<ast::Expr>,
) -> ast::Expr {
    ast::Expr::MethodCall(Box::new(ast::MethodCall {
        base: Box::new(base),
        method: method.to_string(),
        args,
        location: loc(),
    }))
}

// -----------------------------------------------------------------------
// Statement builders
// -----------------------------------------------------------------------

pub(crate) fn assign(target: ast::Expr, value: ast::Expr) -> ast::Stmt {
    ast::Stmt::Assign(Box::new(ast::Assign {
        target,
        value,
        location: loc(),
    }))
}

pub(crate) fn expr_stmt(expr: ast::Expr) -> ast::Stmt {
    ast::Stmt::Expr(Box::new(expr))
}

pub(crate) fn ret_some(value: ast::Expr) -> ast::Stmt {
    ast::Stmt::Return(Box::new(ast::Return {
        value: Some(value),
        location: loc(),
    }))
}

pub(crate) fn delete_stmt(target: ast::Expr) -> ast::Stmt {
    ast::Stmt::Delete(Box::new(ast::Delete { target, location: loc() }))
}

pub(crate) fn on_error(line: Option<u32>) -> ast::Stmt {
    ast::Stmt::OnError(Box::new(ast::OnError { line, location: loc() }))
}

pub(crate) fn dim_object(name: &str, class: &str) -> ast::Stmt {
    ast::Stmt::Dim(Box::new(ast::Dim {
        name: name.to_string(),
        ty: ast::Type::I64,
        object_class: class.to_string(),
        is_array: false,
        extents: Vec::new(),
        location: loc(),
    }))
}

pub(crate) fn dim_scalar(name: &str, ty: ast::Type) -> ast::Stmt {
    ast::Stmt::Dim(Box::new(ast::Dim {
        name: name.to_string(),
        ty,
        object_class: String::new(),
        is_array: false,
        extents: Vec::new(),
        location: loc(),
    }))
}

// -----------------------------------------------------------------------
// Declaration builders
// -----------------------------------------------------------------------

pub(crate) fn scalar_param(name: &str, ty: ast::Type) -> ast::Param {
    ast::Param {
        name: name.to_string(),
        ty,
        object_class: String::new(),
        is_array: false,
        takes_ownership: false,
        location: loc(),
    }
}

pub(crate) fn object_param(name: &str, class: &str) -> ast::Param {
    ast::Param {
        name: name.to_string(),
        ty: ast::Type::I64,
        object_class: class.to_string(),
        is_array: false,
        takes_ownership: false,
        location: loc(),
    }
}

pub(crate) fn owned_object_param(name: &str, class: &str) -> ast::Param {
    let mut param = object_param(name, class);

    param.takes_ownership = true;
    param
}

pub(crate) fn ctor(params: Vec<ast::Param>, body: Vec<ast::Stmt>) -> ast::ClassMember {
    ast::ClassMember::Constructor(ast::ConstructorDecl {
        params,
        is_static: false,
        body,
        location: loc(),
    })
}

pub(crate) fn static_ctor(body: Vec<ast::Stmt>) -> ast::ClassMember {
    ast::ClassMember::Constructor(ast::ConstructorDecl {
        params: Vec::new(),
        is_static: true,
        body,
        location: loc(),
    })
}

pub(crate) fn method(
    name: &str,
    params: Vec<ast::Param>,
    ret: Option<ast::Type>,
    body: Vec<ast::Stmt>,
) -> ast::ClassMember {
    ast::ClassMember::Method(ast::MethodDecl {
        name: name.to_string(),
        params,
        ret,
        ret_object_class: String::new(),
        is_static: false,
        body,
        location: loc(),
    })
}

pub(crate) fn object_method(
    name: &str,
    ret_class: &str,
    body: Vec<ast::Stmt>,
) -> ast::ClassMember {
    ast::ClassMember::Method(ast::MethodDecl {
        name: name.to_string(),
        params: Vec::new(),
        ret: None,
        ret_object_class: ret_class.to_string(),
        is_static: false,
        body,
        location: loc(),
    })
}

pub(crate) fn class_stmt(
    name: &str,
    members: Vec<ast::ClassMember>,
) -> ast::Stmt {
    ast::Stmt::Class(Box::new(ast::ClassDecl {
        name: name.to_string(),
        base: None,
        implements: Vec::new(),
        is_abstract: false,
        is_final: false,
        members,
        location: loc(),
    }))
}

pub(crate) fn program(main: Vec<ast::Stmt>) -> ast::Program {
    ast::Program { main }
}

// -----------------------------------------------------------------------
// Fact database fixture
// -----------------------------------------------------------------------

pub(crate) struct Fixture {
    pub(crate) index: OopIndex,
    pub(crate) layouts: LayoutMap,
    pub(crate) config: Config,
    next_class_id: i64,
}

impl Fixture {
    pub(crate) fn new() -> Fixture {
        Fixture {
            index: OopIndex::new(),
            layouts: LayoutMap::new(),
            config: Config::new(),
            next_class_id: 1,
        }
    }

    /// Registers a class record and computes its layout, assigning class IDs
    /// in registration order starting at 1.
    pub(crate) fn add_class(&mut self, class: ClassInfo) {
        let layout = ClassLayout::compute(self.next_class_id, &class);

        self.next_class_id += 1;
        self.layouts.insert(&class.name, layout);
        self.index.add_class(class);
    }

    pub(crate) fn lower(&self, program: &ast::Program) -> il::Module {
        lower_program(&self.index, &self.layouts, &self.config, program)
    }

    pub(crate) fn printed(&self, program: &ast::Program) -> String {
        il::printer::print(&self.lower(program))
    }
}

// -----------------------------------------------------------------------
// Module inspection helpers
// -----------------------------------------------------------------------

pub(crate) fn function<'m>(module: &'m il::Module, name: &str) -> &'m il::Function {
    module
        .function(name)
        .unwrap_or_else(|| panic!("function {} not found", name))
}

pub(crate) fn instructions(function: &il::Function) -> Vec<&il::Instr> {
    function.blocks.iter().flat_map(|b| b.instructions.iter()).collect()
}

pub(crate) fn callees(function: &il::Function) -> Vec<String> {
    instructions(function)
        .into_iter()
        .filter_map(|i| i.callee.clone())
        .collect()
}

pub(crate) fn calls_to<'m>(
    function: &'m il::Function,
    callee: &str,
) -> Vec<&'m il::Instr> {
    instructions(function)
        .into_iter()
        .filter(|i| i.callee.as_deref() == Some(callee))
        .collect()
}
