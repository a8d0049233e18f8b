//! IL emission primitives.
//!
//! Every helper appends to the block the driver currently has open. Emitting
//! into a terminated block is a programmer error and asserts; a sound
//! semantic analysis never triggers it. Blocks are addressed by index into
//! the owning function's vector, which reallocates as blocks are added.
use crate::il::{Instr, Opcode, Param, Type, Value};
use crate::lower::{Lowerer, SELF_NAME};
use crate::runtime::{signature, RuntimeFeature};
use crate::symbol_names::mangle_dtor;
use ast::nodes as ast;
use location::Location;
use std::collections::HashSet;

impl<'a> Lowerer<'a> {
    fn next_temp_id(&mut self) -> u32 {
        let id = self.next_temp;

        self.next_temp += 1;
        id
    }

    fn push_instr(&mut self, ins: Instr) {
        let function = self.cur_fn.expect("emission requires a function");
        let block =
            &mut self.module.functions[function].blocks[self.cur_block];

        assert!(!block.terminated, "emitting into a terminated block");
        block.instructions.push(ins);
    }

    fn push_terminator(&mut self, ins: Instr) {
        self.push_instr(ins);

        let function = self.cur_fn.unwrap();

        self.module.functions[function].blocks[self.cur_block].terminated =
            true;
    }

    pub(crate) fn current_terminated(&self) -> bool {
        let function = self.cur_fn.expect("emission requires a function");

        self.module.functions[function].blocks[self.cur_block].terminated
    }

    /// Adds a block to the current function, named through the per-function
    /// label generator. Returns its index.
    pub(crate) fn add_block(&mut self, base: &str) -> usize {
        let label = self.namer.generic(base);
        let function = self.cur_fn.expect("add_block requires a function");

        self.module.functions[function].add_block(label)
    }

    fn block_label(&mut self, index: usize) -> String {
        let function = self.cur_fn.expect("branching requires a function");

        // Branch successors must be named; synthesise a fallback label for
        // any block that reached a branch unnamed.
        if self.module.functions[function].blocks[index].label.is_empty() {
            let label = self.namer.generic("bb");

            self.module.functions[function].blocks[index].label = label;
        }

        self.module.functions[function].blocks[index].label.clone()
    }

    /// Declares the runtime helper backing a feature, once per module.
    pub(crate) fn request_feature(&mut self, feature: RuntimeFeature) {
        let sig = signature(feature);

        self.module.add_extern(sig.name, sig.params.to_vec(), sig.ret);
    }

    // -------------------------------------------------------------------
    // Instruction primitives
    // -------------------------------------------------------------------

    pub(crate) fn emit_alloca(&mut self, bytes: i64) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(Opcode::Alloca, Type::Ptr);

        ins.result = Some(id);
        ins.operands.push(Value::Int(bytes));
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    pub(crate) fn emit_load(&mut self, ty: Type, addr: Value) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(Opcode::Load, ty);

        ins.result = Some(id);
        ins.operands.push(addr);
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    pub(crate) fn emit_store(&mut self, ty: Type, addr: Value, value: Value) {
        let mut ins = Instr::new(Opcode::Store, ty);

        ins.operands = vec![addr, value];
        ins.loc = self.cur_loc;
        self.push_instr(ins);
    }

    pub(crate) fn emit_binary(
        &mut self,
        op: Opcode,
        ty: Type,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(op, ty);

        ins.result = Some(id);
        ins.operands = vec![lhs, rhs];
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    pub(crate) fn emit_unary(
        &mut self,
        op: Opcode,
        ty: Type,
        value: Value,
    ) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(op, ty);

        ins.result = Some(id);
        ins.operands.push(value);
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    /// Computes a byte-offset pointer into an object or table.
    pub(crate) fn emit_gep(&mut self, base: Value, offset: i64) -> Value {
        self.emit_binary(Opcode::Gep, Type::Ptr, base, Value::Int(offset))
    }

    pub(crate) fn emit_call(&mut self, callee: &str, args: Vec<Value>) {
        let mut ins = Instr::new(Opcode::Call, Type::Void);

        ins.callee = Some(callee.to_string());
        ins.operands = args;
        ins.loc = self.cur_loc;
        self.push_instr(ins);
    }

    pub(crate) fn emit_call_ret(
        &mut self,
        ty: Type,
        callee: &str,
        args: Vec<Value>,
    ) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(Opcode::Call, ty);

        ins.result = Some(id);
        ins.callee = Some(callee.to_string());
        ins.operands = args;
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    /// Calls through a function pointer, as loaded from a vtable slot.
    pub(crate) fn emit_call_indirect(&mut self, target: Value, args: Vec<Value>) {
        let mut ins = Instr::new(Opcode::CallIndirect, Type::Void);

        ins.operands = vec![target];
        ins.operands.extend(args);
        ins.loc = self.cur_loc;
        self.push_instr(ins);
    }

    pub(crate) fn emit_call_indirect_ret(
        &mut self,
        ty: Type,
        target: Value,
        args: Vec<Value>,
    ) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(Opcode::CallIndirect, ty);

        ins.result = Some(id);
        ins.operands = vec![target];
        ins.operands.extend(args);
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    /// Branches to the given block. Branching to the current block is a
    /// no-op, which keeps degenerate lowerings from emitting self-loops.
    pub(crate) fn emit_br(&mut self, target: usize) {
        if self.cur_block == target {
            return;
        }

        let label = self.block_label(target);
        let mut ins = Instr::new(Opcode::Br, Type::Void);

        ins.labels.push(label);
        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    pub(crate) fn emit_cbr(
        &mut self,
        cond: Value,
        if_true: usize,
        if_false: usize,
    ) {
        let true_label = self.block_label(if_true);
        let false_label = self.block_label(if_false);
        let mut ins = Instr::new(Opcode::CBr, Type::Void);

        ins.operands.push(cond);
        ins.labels = vec![true_label, false_label];
        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    fn emit_eh_pop_for_return(&mut self) {
        // Returning with a pushed handler would leak it on the runtime's
        // handler stack.
        if self.handlers.active {
            self.emit_eh_pop();
        }
    }

    pub(crate) fn emit_ret(&mut self, value: Value) {
        self.emit_eh_pop_for_return();

        let mut ins = Instr::new(Opcode::Ret, Type::Void);

        ins.operands.push(value);
        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    pub(crate) fn emit_ret_void(&mut self) {
        self.emit_eh_pop_for_return();

        let mut ins = Instr::new(Opcode::Ret, Type::Void);

        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    #[allow(dead_code)]
    pub(crate) fn emit_trap(&mut self) {
        let mut ins = Instr::new(Opcode::Trap, Type::Void);

        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    pub(crate) fn emit_trap_from_err(&mut self, err: Value) {
        let mut ins = Instr::new(Opcode::TrapFromErr, Type::I32);

        ins.operands.push(err);
        ins.loc = self.cur_loc;
        self.push_terminator(ins);
    }

    pub(crate) fn emit_eh_push(&mut self, handler: usize) {
        let label = self.block_label(handler);
        let mut ins = Instr::new(Opcode::EhPush, Type::Void);

        ins.labels.push(label);
        ins.loc = self.cur_loc;
        self.push_instr(ins);
    }

    pub(crate) fn emit_eh_pop(&mut self) {
        let mut ins = Instr::new(Opcode::EhPop, Type::Void);

        ins.loc = self.cur_loc;
        self.push_instr(ins);
    }

    pub(crate) fn emit_const_str(&mut self, label: &str) -> Value {
        let id = self.next_temp_id();
        let mut ins = Instr::new(Opcode::ConstStr, Type::Str);

        ins.result = Some(id);
        ins.operands.push(Value::global(label));
        ins.loc = self.cur_loc;
        self.push_instr(ins);
        Value::Temp(id)
    }

    pub(crate) fn emit_bool_const(&mut self, value: bool) -> Value {
        self.emit_unary(
            Opcode::Trunc1,
            Type::I1,
            Value::Int(if value { 1 } else { 0 }),
        )
    }

    fn emit_zext1_to_i64(&mut self, value: Value) -> Value {
        self.emit_unary(Opcode::Zext1, Type::I64, value)
    }

    /// Normalises a boolean to BASIC's logical mask: -1 for true, 0 for
    /// false, produced as `0 - zext(b)`.
    pub(crate) fn emit_basic_logical_i64(&mut self, value: Value) -> Value {
        if let Value::Int(v) = value {
            return Value::Int(if v != 0 { -1 } else { 0 });
        }

        let zext = self.emit_zext1_to_i64(value);

        self.emit_binary(
            Opcode::ISubOvf,
            Type::I64,
            Value::Int(0),
            zext,
        )
    }

    /// Materialises a boolean through a control-flow diamond. Both callbacks
    /// receive a 1-byte slot to store their branch's result into; the joined
    /// value is reloaded from the slot.
    #[allow(dead_code)]
    pub(crate) fn emit_bool_from_branches<T, E>(
        &mut self,
        cond: Value,
        emit_then: T,
        emit_else: E,
    ) -> Value
    where
        T: FnOnce(&mut Self, Value),
        E: FnOnce(&mut Self, Value),
    {
        let slot = self.emit_alloca(1);
        let then_index = self.add_block("bool_then");
        let else_index = self.add_block("bool_else");
        let join_index = self.add_block("bool_join");

        self.emit_cbr(cond, then_index, else_index);

        self.cur_block = then_index;
        emit_then(self, slot.clone());

        if !self.current_terminated() {
            self.emit_br(join_index);
        }

        self.cur_block = else_index;
        emit_else(self, slot.clone());

        if !self.current_terminated() {
            self.emit_br(join_index);
        }

        self.cur_block = join_index;
        self.emit_load(Type::I1, slot)
    }

    // -------------------------------------------------------------------
    // Error handler blocks
    // -------------------------------------------------------------------

    /// Returns the handler block for a BASIC line, creating it on first use.
    ///
    /// A fresh handler block takes `(err, tok)` parameters delivered by the
    /// runtime during unwinding and opens with the `eh.entry` marker. Until
    /// the statement lowerer fills in a resume path, the handler forwards
    /// the error to the runtime trap.
    pub(crate) fn ensure_error_handler_block(&mut self, line: u32) -> usize {
        if let Some(&index) = self.handlers.blocks.get(&line) {
            return index;
        }

        let label = self.namer.generic(&format!("handler_L{}", line));
        let function = self.cur_fn.expect("handlers require a function");
        let index = self.module.functions[function].add_block(label);
        let err_id = self.next_temp_id();
        let tok_id = self.next_temp_id();

        {
            let block = &mut self.module.functions[function].blocks[index];

            block.params = vec![
                Param {
                    name: "err".to_string(),
                    ty: Type::Error,
                    id: err_id,
                },
                Param {
                    name: "tok".to_string(),
                    ty: Type::ResumeTok,
                    id: tok_id,
                },
            ];
        }

        let saved = self.cur_block;

        self.cur_block = index;
        self.cur_loc = Location::synthetic();

        let mut entry = Instr::new(Opcode::EhEntry, Type::Void);

        entry.loc = self.cur_loc;
        self.push_instr(entry);
        self.emit_trap_from_err(Value::Temp(err_id));
        self.cur_block = saved;
        self.handlers.blocks.insert(line, index);
        index
    }

    // -------------------------------------------------------------------
    // Reference-count maintenance
    // -------------------------------------------------------------------

    /// Writes an array handle into a slot: retain the new handle, release
    /// whatever the slot held, then store. All array kinds share the
    /// refcount header; only release is element-aware.
    pub(crate) fn store_array(
        &mut self,
        slot: Value,
        value: Value,
        is_object_array: bool,
    ) {
        self.request_feature(RuntimeFeature::ArrI64Retain);
        self.emit_call("rt_arr_i64_retain", vec![value.clone()]);

        let old = self.emit_load(Type::Ptr, slot.clone());

        if is_object_array {
            self.request_feature(RuntimeFeature::ArrObjRelease);
            self.emit_call("rt_arr_obj_release", vec![old]);
        } else {
            self.request_feature(RuntimeFeature::ArrI64Release);
            self.emit_call("rt_arr_i64_release", vec![old]);
        }

        self.emit_store(Type::Ptr, slot, value);
    }

    /// Marks a temporary for release in the epilogue.
    pub(crate) fn defer_release(&mut self, value: Value, ty: ast::Type) {
        self.deferred_temps.push((value, ty));
    }

    pub(crate) fn release_deferred_temps(&mut self) {
        let pending = std::mem::take(&mut self.deferred_temps);

        for (value, ty) in pending {
            if ty == ast::Type::Str {
                self.request_feature(RuntimeFeature::StrReleaseMaybe);
                self.emit_call("rt_str_release_maybe", vec![value]);
            }
        }
    }

    fn release_object_slot(&mut self, slot_id: u32, object_class: &str) {
        self.cur_loc = Location::synthetic();

        let slot = Value::Temp(slot_id);
        let handle = self.emit_load(Type::Ptr, slot.clone());

        self.request_feature(RuntimeFeature::ObjReleaseCheck0);
        self.request_feature(RuntimeFeature::ObjFree);

        let should_destroy = self.emit_call_ret(
            Type::I1,
            "rt_obj_release_check0",
            vec![handle.clone()],
        );
        let destroy_index = self.add_block("obj_epilogue_dtor");
        let cont_index = self.add_block("obj_epilogue_cont");

        self.emit_cbr(should_destroy, destroy_index, cont_index);
        self.cur_block = destroy_index;

        if !object_class.is_empty() {
            self.emit_call(&mangle_dtor(object_class), vec![handle.clone()]);
        }

        self.emit_call("rt_obj_free", vec![handle]);
        self.emit_br(cont_index);
        self.cur_block = cont_index;
        self.emit_store(Type::Ptr, slot, Value::Null);
    }

    /// Releases every owned object local on scope exit, excluding `ME` and
    /// the given names (parameters, plus the method-name symbol when the
    /// method returns an object).
    pub(crate) fn release_object_locals(&mut self, excluded: &HashSet<String>) {
        let pending = self
            .symbols
            .iter()
            .filter(|(name, info)| {
                info.referenced
                    && info.is_object
                    && info.slot_id.is_some()
                    && name.as_str() != SELF_NAME
                    && !excluded.contains(name.as_str())
            })
            .map(|(_, info)| (info.slot_id.unwrap(), info.object_class.clone()))
            .collect::<Vec<_>>();

        for (slot_id, object_class) in pending {
            self.release_object_slot(slot_id, &object_class);
        }
    }

    /// Releases object parameters marked as owned. Ordinary parameters are
    /// borrowed and never pass through here; conflating the two causes a
    /// double free.
    pub(crate) fn release_object_params(&mut self, param_names: &HashSet<String>) {
        if param_names.is_empty() {
            return;
        }

        let pending = self
            .symbols
            .iter()
            .filter(|(name, info)| {
                info.referenced
                    && info.is_object
                    && info.slot_id.is_some()
                    && name.as_str() != SELF_NAME
                    && param_names.contains(name.as_str())
            })
            .map(|(_, info)| (info.slot_id.unwrap(), info.object_class.clone()))
            .collect::<Vec<_>>();

        for (slot_id, object_class) in pending {
            self.release_object_slot(slot_id, &object_class);
        }
    }

    fn release_array_slot(&mut self, slot_id: u32, is_object_array: bool) {
        let slot = Value::Temp(slot_id);
        let handle = self.emit_load(Type::Ptr, slot.clone());

        if is_object_array {
            self.request_feature(RuntimeFeature::ArrObjRelease);
            self.emit_call("rt_arr_obj_release", vec![handle]);
        } else {
            self.request_feature(RuntimeFeature::ArrI64Release);
            self.emit_call("rt_arr_i64_release", vec![handle]);
        }

        self.emit_store(Type::Ptr, slot, Value::Null);
    }

    pub(crate) fn release_array_locals(&mut self, excluded: &HashSet<String>) {
        let pending = self
            .symbols
            .iter()
            .filter(|(name, info)| {
                info.referenced
                    && info.is_array
                    && info.slot_id.is_some()
                    && !excluded.contains(name.as_str())
            })
            .map(|(_, info)| {
                (info.slot_id.unwrap(), !info.object_class.is_empty())
            })
            .collect::<Vec<_>>();

        for (slot_id, is_object_array) in pending {
            self.release_array_slot(slot_id, is_object_array);
        }
    }

    pub(crate) fn release_array_params(&mut self, param_names: &HashSet<String>) {
        if param_names.is_empty() {
            return;
        }

        let pending = self
            .symbols
            .iter()
            .filter(|(name, info)| {
                info.referenced
                    && info.is_array
                    && info.slot_id.is_some()
                    && param_names.contains(name.as_str())
            })
            .map(|(_, info)| {
                (info.slot_id.unwrap(), !info.object_class.is_empty())
            })
            .collect::<Vec<_>>();

        for (slot_id, is_object_array) in pending {
            self.release_array_slot(slot_id, is_object_array);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Fixture;

    fn harness<'a>(fixture: &'a Fixture) -> Lowerer<'a> {
        let mut lowerer = Lowerer::new(
            &fixture.index,
            &fixture.layouts,
            &fixture.config,
        );

        lowerer.start_function(
            "test".to_string(),
            Type::Void,
            Vec::new(),
        );
        lowerer.build_procedure_skeleton();
        lowerer
    }

    fn block(lowerer: &Lowerer, index: usize) -> crate::il::Block {
        lowerer.module.functions[lowerer.cur_fn.unwrap()].blocks[index].clone()
    }

    #[test]
    fn test_branch_to_current_block_is_a_no_op() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);

        lowerer.emit_br(lowerer.cur_block);

        assert!(block(&lowerer, 0).instructions.is_empty());
        assert!(!block(&lowerer, 0).terminated);
    }

    #[test]
    #[should_panic(expected = "terminated block")]
    fn test_emitting_into_terminated_block_asserts() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);

        lowerer.emit_ret_void();
        lowerer.emit_alloca(8);
    }

    #[test]
    fn test_bool_from_branches_builds_a_diamond() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);
        let cond = lowerer.emit_bool_const(true);

        let result = lowerer.emit_bool_from_branches(
            cond,
            |lw, slot| lw.emit_store(Type::I1, slot, Value::Int(1)),
            |lw, slot| lw.emit_store(Type::I1, slot, Value::Int(0)),
        );

        assert!(matches!(result, Value::Temp(_)));

        let function = &lowerer.module.functions[lowerer.cur_fn.unwrap()];

        // entry, exit, then, else, join.
        assert_eq!(function.blocks.len(), 5);
        assert!(function.blocks[2].terminated);
        assert!(function.blocks[3].terminated);

        let join = &function.blocks[4];

        assert_eq!(join.instructions.last().unwrap().op, Opcode::Load);
    }

    #[test]
    fn test_basic_logical_mask_folds_constants() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);

        assert_eq!(
            lowerer.emit_basic_logical_i64(Value::Int(1)),
            Value::Int(-1)
        );
        assert_eq!(
            lowerer.emit_basic_logical_i64(Value::Int(0)),
            Value::Int(0)
        );
    }

    #[test]
    fn test_basic_logical_mask_subtracts_from_zero() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);
        let cond = lowerer.emit_bool_const(true);

        lowerer.emit_basic_logical_i64(cond);

        let entry = block(&lowerer, 0);
        let sub = entry.instructions.last().unwrap();

        assert_eq!(sub.op, Opcode::ISubOvf);
        assert_eq!(sub.operands[0], Value::Int(0));
    }

    #[test]
    fn test_ret_pops_active_handler() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);
        let handler = lowerer.ensure_error_handler_block(10);

        lowerer.emit_eh_push(handler);
        lowerer.handlers.active = true;
        lowerer.emit_ret_void();

        let entry = block(&lowerer, 0);
        let len = entry.instructions.len();

        assert_eq!(entry.instructions[len - 2].op, Opcode::EhPop);
        assert_eq!(entry.instructions[len - 1].op, Opcode::Ret);
    }

    #[test]
    fn test_error_handler_blocks_are_cached_per_line() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);

        let first = lowerer.ensure_error_handler_block(10);
        let again = lowerer.ensure_error_handler_block(10);
        let other = lowerer.ensure_error_handler_block(20);

        assert_eq!(first, again);
        assert_ne!(first, other);

        let handler = block(&lowerer, first);

        assert_eq!(handler.params.len(), 2);
        assert_eq!(handler.params[0].ty, Type::Error);
        assert_eq!(handler.params[1].ty, Type::ResumeTok);
        assert_eq!(handler.instructions[0].op, Opcode::EhEntry);
        assert!(handler.terminated);
    }

    #[test]
    fn test_trap_terminates_the_block() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);

        lowerer.emit_trap();

        let entry = block(&lowerer, 0);

        assert_eq!(entry.instructions.last().unwrap().op, Opcode::Trap);
        assert!(entry.terminated);
    }

    #[test]
    fn test_store_array_retains_new_and_releases_old() {
        let fixture = Fixture::new();
        let mut lowerer = harness(&fixture);
        let slot = lowerer.emit_alloca(8);

        lowerer.store_array(slot, Value::Temp(0), false);

        let entry = block(&lowerer, 0);
        let callees = entry
            .instructions
            .iter()
            .filter_map(|i| i.callee.clone())
            .collect::<Vec<_>>();

        assert_eq!(callees, vec!["rt_arr_i64_retain", "rt_arr_i64_release"]);
        assert_eq!(entry.instructions.last().unwrap().op, Opcode::Store);
    }
}
