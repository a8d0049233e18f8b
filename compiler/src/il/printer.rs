//! Textual form of an IL module.
//!
//! The printed text is the contract downstream components consume, so the
//! output is fully determined by the module contents: no hashing, no
//! environment-dependent ordering.
use crate::il::{Function, Instr, Module, Opcode, Value};
use std::fmt::Write as _;

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }

    out
}

fn join(values: &[Value]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn write_instr(buffer: &mut String, ins: &Instr) {
    buffer.push_str("  ");

    if let Some(id) = ins.result {
        let _ = write!(buffer, "%{} = ", id);
    }

    match ins.op {
        Opcode::Alloca => {
            let _ = write!(buffer, "alloca {}", ins.operands[0]);
        }
        Opcode::Load => {
            let _ = write!(buffer, "load {}, {}", ins.ty, ins.operands[0]);
        }
        Opcode::Store => {
            let _ = write!(
                buffer,
                "store {} {}, {}",
                ins.ty, ins.operands[0], ins.operands[1]
            );
        }
        Opcode::Gep => {
            let _ = write!(
                buffer,
                "gep {}, {}",
                ins.operands[0], ins.operands[1]
            );
        }
        Opcode::IAddOvf
        | Opcode::ISubOvf
        | Opcode::IMulOvf
        | Opcode::FAdd
        | Opcode::FSub
        | Opcode::FMul => {
            let _ = write!(
                buffer,
                "{} {} {}, {}",
                ins.op.mnemonic(),
                ins.ty,
                ins.operands[0],
                ins.operands[1]
            );
        }
        Opcode::Zext1 | Opcode::Trunc1 => {
            let _ = write!(
                buffer,
                "{} {} {}",
                ins.op.mnemonic(),
                ins.ty,
                ins.operands[0]
            );
        }
        Opcode::Call => {
            let callee = ins.callee.as_deref().unwrap_or("");

            if ins.result.is_some() {
                let _ = write!(
                    buffer,
                    "call {} @{}({})",
                    ins.ty,
                    callee,
                    join(&ins.operands)
                );
            } else {
                let _ =
                    write!(buffer, "call @{}({})", callee, join(&ins.operands));
            }
        }
        Opcode::CallIndirect => {
            let _ = write!(
                buffer,
                "call.indirect {} {}({})",
                ins.ty,
                ins.operands[0],
                join(&ins.operands[1..])
            );
        }
        Opcode::Br => {
            let _ = write!(buffer, "br {}", ins.labels[0]);
        }
        Opcode::CBr => {
            let _ = write!(
                buffer,
                "cbr {}, {}, {}",
                ins.operands[0], ins.labels[0], ins.labels[1]
            );
        }
        Opcode::Ret => {
            if let Some(value) = ins.operands.first() {
                let _ = write!(buffer, "ret {}", value);
            } else {
                buffer.push_str("ret");
            }
        }
        Opcode::Trap => {
            buffer.push_str("trap");
        }
        Opcode::TrapFromErr => {
            let _ = write!(buffer, "trap.from_err {}", ins.operands[0]);
        }
        Opcode::EhPush => {
            let _ = write!(buffer, "eh.push {}", ins.labels[0]);
        }
        Opcode::EhPop => {
            buffer.push_str("eh.pop");
        }
        Opcode::EhEntry => {
            buffer.push_str("eh.entry");
        }
        Opcode::ConstStr => {
            let _ = write!(buffer, "const.str {}", ins.operands[0]);
        }
    }

    buffer.push('\n');
}

fn write_function(buffer: &mut String, function: &Function) {
    let params = function
        .params
        .iter()
        .map(|p| format!("{} %{}", p.ty, p.id))
        .collect::<Vec<_>>()
        .join(", ");

    let _ = write!(
        buffer,
        "func @{}({}) -> {} {{\n",
        function.name, params, function.ret
    );

    for block in &function.blocks {
        if block.params.is_empty() {
            let _ = writeln!(buffer, "{}:", block.label);
        } else {
            let params = block
                .params
                .iter()
                .map(|p| format!("{} %{}", p.ty, p.id))
                .collect::<Vec<_>>()
                .join(", ");

            let _ = writeln!(buffer, "{}({}):", block.label, params);
        }

        for ins in &block.instructions {
            write_instr(buffer, ins);
        }
    }

    buffer.push_str("}\n");
}

/// Renders the module as deterministic IL text.
pub fn print(module: &Module) -> String {
    let mut buffer = String::new();

    for ext in &module.externs {
        let params = ext
            .params
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let _ = writeln!(
            buffer,
            "extern @{}({}) -> {}",
            ext.name, params, ext.ret
        );
    }

    for global in &module.globals {
        let _ = writeln!(buffer, "global {} @{}", global.ty, global.name);
    }

    for string in &module.strings {
        let _ = writeln!(
            buffer,
            "string @{} = \"{}\"",
            string.label,
            escape(&string.value)
        );
    }

    for function in &module.functions {
        if !buffer.is_empty() {
            buffer.push('\n');
        }

        write_function(&mut buffer, function);
    }

    buffer
}
