//! The typed intermediate language produced by lowering.
//!
//! A module is append-only while a program is lowered: functions, globals and
//! externs are added in a fixed order so that lowering the same tree twice
//! produces byte-identical output.
pub mod printer;

use location::Location;
use std::fmt;

/// The IL type lattice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    I1,
    I16,
    I32,
    I64,
    F64,
    Ptr,
    Str,
    Error,
    ResumeTok,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
            Type::Str => "str",
            Type::Error => "error",
            Type::ResumeTok => "resumetok",
        };

        write!(f, "{}", name)
    }
}

/// A typed operand: a constant, the null pointer, an SSA temporary, or a
/// reference to a global symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Null,
    Temp(u32),
    Global(String),
}

impl Value {
    pub fn global(name: impl Into<String>) -> Value {
        Value::Global(name.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Null => write!(f, "null"),
            Value::Temp(id) => write!(f, "%{}", id),
            Value::Global(name) => write!(f, "@{}", name),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    Alloca,
    Load,
    Store,
    Gep,
    IAddOvf,
    ISubOvf,
    IMulOvf,
    FAdd,
    FSub,
    FMul,
    Zext1,
    Trunc1,
    Call,
    CallIndirect,
    Br,
    CBr,
    Ret,
    Trap,
    TrapFromErr,
    EhPush,
    EhPop,
    EhEntry,
    ConstStr,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Alloca => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Gep => "gep",
            Opcode::IAddOvf => "iadd.ovf",
            Opcode::ISubOvf => "isub.ovf",
            Opcode::IMulOvf => "imul.ovf",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::Zext1 => "zext.1",
            Opcode::Trunc1 => "trunc.1",
            Opcode::Call => "call",
            Opcode::CallIndirect => "call.indirect",
            Opcode::Br => "br",
            Opcode::CBr => "cbr",
            Opcode::Ret => "ret",
            Opcode::Trap => "trap",
            Opcode::TrapFromErr => "trap.from_err",
            Opcode::EhPush => "eh.push",
            Opcode::EhPop => "eh.pop",
            Opcode::EhEntry => "eh.entry",
            Opcode::ConstStr => "const.str",
        }
    }
}

/// A single IL instruction.
///
/// Branch targets are recorded as block labels, call targets as symbol names.
/// Instructions producing a value record the temporary they define.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub result: Option<u32>,
    pub op: Opcode,
    pub ty: Type,
    pub operands: Vec<Value>,
    pub callee: Option<String>,
    pub labels: Vec<String>,
    pub loc: Location,
}

impl Instr {
    pub fn new(op: Opcode, ty: Type) -> Instr {
        Instr {
            result: None,
            op,
            ty,
            operands: Vec::new(),
            callee: None,
            labels: Vec::new(),
            loc: Location::synthetic(),
        }
    }
}

/// A named function or block parameter with its pre-assigned temporary ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub id: u32,
}

/// A basic block.
///
/// Blocks live in the owning function's vector, which reallocates as blocks
/// are added; they are therefore always addressed by index, never by held
/// reference.
#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,

    /// Parameters delivered by the runtime when the block is entered through
    /// unwinding; empty for ordinary blocks.
    pub params: Vec<Param>,
    pub instructions: Vec<Instr>,
    pub terminated: bool,
}

impl Block {
    pub fn new(label: String) -> Block {
        Block {
            label,
            params: Vec::new(),
            instructions: Vec::new(),
            terminated: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new(name: String, ret: Type, params: Vec<Param>) -> Function {
        Function { name, ret, params, blocks: Vec::new() }
    }

    pub fn add_block(&mut self, label: String) -> usize {
        let index = self.blocks.len();

        // Blocks aren't added in tight loops, so reserve exactly what's
        // needed instead of letting the vector grow geometrically.
        self.blocks.reserve_exact(1);
        self.blocks.push(Block::new(label));
        index
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }
}

/// A zero-initialised module-scope global.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
}

/// A declared external function provided by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Extern {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// An interned string literal.
#[derive(Debug, Clone, PartialEq)]
pub struct StringConst {
    pub label: String,
    pub value: String,
}

/// The IL module under construction.
#[derive(Debug, Clone)]
pub struct Module {
    pub externs: Vec<Extern>,
    pub globals: Vec<Global>,
    pub strings: Vec<StringConst>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Module {
        Module {
            externs: Vec::new(),
            globals: Vec::new(),
            strings: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Declares an extern once; repeated declarations are ignored.
    pub fn add_extern(&mut self, name: &str, params: Vec<Type>, ret: Type) {
        if self.externs.iter().any(|e| e.name == name) {
            return;
        }

        self.externs.push(Extern { name: name.to_string(), params, ret });
    }

    pub fn add_function(
        &mut self,
        name: String,
        ret: Type,
        params: Vec<Param>,
    ) -> usize {
        let index = self.functions.len();

        self.functions.push(Function::new(name, ret, params));
        index
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
