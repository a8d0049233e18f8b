//! AST nodes for BASIC programs.
//!
//! The tree is produced by the parser and annotated by semantic analysis
//! before lowering sees it. Lowering treats every node as immutable.
use location::Location;

/// The scalar type tags BASIC expressions and declarations carry.
///
/// Object and array typing is expressed separately: declarations that can
/// hold an object carry the class name in an `object_class` field, and array
/// declarations set an `is_array` flag. This mirrors the semantic fact
/// database rather than folding everything into one type lattice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    I64,
    F64,
    Bool,
    Str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, PartialEq)]
pub struct IntLiteral {
    pub value: i64,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct FloatLiteral {
    pub value: f64,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct BoolLiteral {
    pub value: bool,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct StringLiteral {
    pub value: String,
    pub location: Location,
}

/// A reference to a variable, parameter, field, or static field by name.
///
/// Which of those it is gets decided during lowering, based on the symbol
/// table and the active field scope.
#[derive(Debug, PartialEq)]
pub struct Var {
    pub name: String,
    pub location: Location,
}

/// The implicit receiver inside constructors, destructors, methods, and
/// property accessors.
#[derive(Debug, PartialEq)]
pub struct Me {
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct New {
    /// The class name as written, possibly unqualified.
    pub class_name: String,
    pub args: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct MemberAccess {
    pub base: Box<Expr>,
    pub member: String,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct MethodCall {
    pub base: Box<Expr>,
    pub method: String,
    pub args: Vec<Expr>,
    pub location: Location,
}

/// An indexed reference such as `a(i)`.
///
/// BASIC uses parentheses for both calls and indexing, so semantic analysis
/// only produces this node when `name` is known to be an array.
#[derive(Debug, PartialEq)]
pub struct ArrayRef {
    pub name: String,
    pub indices: Vec<Expr>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct Binary {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub enum Expr {
    Int(Box<IntLiteral>),
    Float(Box<FloatLiteral>),
    Bool(Box<BoolLiteral>),
    Str(Box<StringLiteral>),
    Var(Box<Var>),
    Me(Box<Me>),
    New(Box<New>),
    MemberAccess(Box<MemberAccess>),
    MethodCall(Box<MethodCall>),
    ArrayRef(Box<ArrayRef>),
    Binary(Box<Binary>),
}

impl Expr {
    pub fn location(&self) -> Location {
        match self {
            Expr::Int(n) => n.location,
            Expr::Float(n) => n.location,
            Expr::Bool(n) => n.location,
            Expr::Str(n) => n.location,
            Expr::Var(n) => n.location,
            Expr::Me(n) => n.location,
            Expr::New(n) => n.location,
            Expr::MemberAccess(n) => n.location,
            Expr::MethodCall(n) => n.location,
            Expr::ArrayRef(n) => n.location,
            Expr::Binary(n) => n.location,
        }
    }
}

/// A `DIM` declaration, either module-level or local to a procedure body.
#[derive(Debug, PartialEq)]
pub struct Dim {
    pub name: String,
    pub ty: Type,

    /// The class name when the variable holds an object, empty otherwise.
    pub object_class: String,
    pub is_array: bool,

    /// Inclusive upper bounds: `DIM A(7)` declares 8 elements.
    pub extents: Vec<i64>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct Assign {
    pub target: Expr,
    pub value: Expr,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct Return {
    pub value: Option<Expr>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct Delete {
    pub target: Expr,
    pub location: Location,
}

/// `ON ERROR GOTO n`, or `ON ERROR GOTO 0` when `line` is `None`.
#[derive(Debug, PartialEq)]
pub struct OnError {
    pub line: Option<u32>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,

    /// The class name when the parameter holds an object, empty otherwise.
    pub object_class: String,
    pub is_array: bool,

    /// Set by semantic analysis when the callee takes ownership of the
    /// argument. Ordinary parameters are borrowed: the callee neither
    /// retains nor releases them.
    pub takes_ownership: bool,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    pub object_class: String,
    pub is_static: bool,
    pub is_array: bool,
    pub extents: Vec<i64>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct ConstructorDecl {
    pub params: Vec<Param>,

    /// True for `SHARED SUB NEW`: the class-level initialiser that runs once
    /// from the module initialiser rather than per instance.
    pub is_static: bool,
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct DestructorDecl {
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<Param>,

    /// The scalar return type for `FUNCTION`s, `None` for `SUB`s.
    pub ret: Option<Type>,

    /// The qualified class name when the method returns an object, empty
    /// otherwise.
    pub ret_object_class: String,
    pub is_static: bool,
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct PropertyGet {
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct PropertySet {
    pub param_name: String,
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub getter: Option<PropertyGet>,
    pub setter: Option<PropertySet>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub enum ClassMember {
    Field(FieldDecl),
    Constructor(ConstructorDecl),
    Destructor(DestructorDecl),
    Method(MethodDecl),
    Property(PropertyDecl),
}

#[derive(Debug, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub base: Option<String>,
    pub implements: Vec<String>,
    pub is_abstract: bool,
    pub is_final: bool,
    pub members: Vec<ClassMember>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct InterfaceMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<Type>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<InterfaceMethod>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub struct NamespaceDecl {
    pub path: Vec<String>,
    pub body: Vec<Stmt>,
    pub location: Location,
}

#[derive(Debug, PartialEq)]
pub enum Stmt {
    Dim(Box<Dim>),
    Assign(Box<Assign>),
    Expr(Box<Expr>),
    Return(Box<Return>),
    Delete(Box<Delete>),
    OnError(Box<OnError>),
    Class(Box<ClassDecl>),
    Interface(Box<InterfaceDecl>),
    Namespace(Box<NamespaceDecl>),
}

/// A parsed program: the main statement list, including declarations.
#[derive(Debug, PartialEq)]
pub struct Program {
    pub main: Vec<Stmt>,
}
