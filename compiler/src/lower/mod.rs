//! Lowering of BASIC programs to IL.
//!
//! The driver owns the module being built plus the per-procedure state
//! (symbol table, temporary counter, label namer, handler cache), all of
//! which is reset between procedures. The class metadata index and the
//! layout cache are read-only throughout.
pub(crate) mod emit;
mod expr;
pub(crate) mod oop;
mod stmt;

use crate::config::Config;
use crate::il;
use crate::symbol_names::MODULE_INIT;
use crate::symbols::{SymbolKind, SymbolTable};
use ast::nodes as ast;
use fnv::FnvHashMap;
use indexmap::IndexMap;
use location::Location;
use std::collections::{HashMap, HashSet};
use types::layout::{ClassLayout, LayoutMap};
use types::qualified_name::QualifiedName;
use types::OopIndex;

/// The name of the implicit receiver inside class members.
pub(crate) const SELF_NAME: &str = "ME";

pub(crate) fn ast_type_to_il(ty: ast::Type) -> il::Type {
    match ty {
        ast::Type::I64 => il::Type::I64,
        ast::Type::F64 => il::Type::F64,
        ast::Type::Bool => il::Type::I1,
        ast::Type::Str => il::Type::Str,
    }
}

/// The stack slot size for a scalar of the given type.
pub(crate) fn slot_size(ty: ast::Type) -> i64 {
    match ty {
        ast::Type::Bool => 1,
        _ => 8,
    }
}

/// A lowered expression: the produced value and its IL type.
pub(crate) struct RVal {
    pub(crate) value: il::Value,
    pub(crate) ty: il::Type,
}

/// One entry of the field scope stack: inside members of this class,
/// unqualified identifiers may resolve to its instance fields.
pub(crate) struct FieldScope {
    pub(crate) class_name: String,
}

/// Deterministic per-function label generation.
pub(crate) struct BlockNamer {
    counter: u32,
}

impl BlockNamer {
    fn new() -> BlockNamer {
        BlockNamer { counter: 0 }
    }

    pub(crate) fn generic(&mut self, base: &str) -> String {
        let label = format!("{}_{}", base, self.counter);

        self.counter += 1;
        label
    }

    pub(crate) fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Error-handler bookkeeping for the procedure being lowered.
pub(crate) struct HandlerState {
    /// Whether a handler is currently pushed; returns must pop it first.
    pub(crate) active: bool,

    /// Handler blocks already created, keyed by BASIC target line.
    pub(crate) blocks: FnvHashMap<u32, usize>,
}

impl HandlerState {
    fn new() -> HandlerState {
        HandlerState { active: false, blocks: FnvHashMap::default() }
    }
}

pub(crate) struct Lowerer<'a> {
    pub(crate) index: &'a OopIndex,
    pub(crate) layouts: &'a LayoutMap,
    pub(crate) config: &'a Config,
    pub(crate) module: il::Module,

    // Per-procedure state, reset before each procedure.
    pub(crate) symbols: SymbolTable,
    pub(crate) cur_fn: Option<usize>,
    pub(crate) cur_block: usize,
    pub(crate) cur_exit: usize,
    pub(crate) next_temp: u32,
    pub(crate) cur_loc: Location,
    pub(crate) namer: BlockNamer,
    pub(crate) handlers: HandlerState,
    pub(crate) deferred_temps: Vec<(il::Value, ast::Type)>,
    pub(crate) current_proc_name: Option<String>,

    // Module-wide lowering state.
    pub(crate) namespace: Vec<String>,
    pub(crate) class_stack: Vec<String>,
    pub(crate) field_scopes: Vec<FieldScope>,
    pub(crate) module_object_class: HashMap<String, String>,
    pub(crate) module_array_elem_class: HashMap<String, String>,
    pub(crate) static_ctor_aliases: IndexMap<String, String>,
    string_labels: HashMap<String, usize>,
}

/// Lowers a program against the populated fact database and layout cache,
/// producing the IL module.
pub fn lower_program(
    index: &OopIndex,
    layouts: &LayoutMap,
    config: &Config,
    program: &ast::Program,
) -> il::Module {
    let mut lowerer = Lowerer::new(index, layouts, config);

    lowerer.cache_module_object_types(&program.main);
    lowerer.emit_oop_decls_and_bodies(program);
    lowerer.emit_main(program);
    lowerer.module
}

impl<'a> Lowerer<'a> {
    pub(crate) fn new(
        index: &'a OopIndex,
        layouts: &'a LayoutMap,
        config: &'a Config,
    ) -> Lowerer<'a> {
        Lowerer {
            index,
            layouts,
            config,
            module: il::Module::new(),
            symbols: SymbolTable::new(),
            cur_fn: None,
            cur_block: 0,
            cur_exit: 0,
            next_temp: 0,
            cur_loc: Location::synthetic(),
            namer: BlockNamer::new(),
            handlers: HandlerState::new(),
            deferred_temps: Vec::new(),
            current_proc_name: None,
            namespace: Vec::new(),
            class_stack: Vec::new(),
            field_scopes: Vec::new(),
            module_object_class: HashMap::new(),
            module_array_elem_class: HashMap::new(),
            static_ctor_aliases: IndexMap::new(),
            string_labels: HashMap::new(),
        }
    }

    pub(crate) fn reset_lowering_state(&mut self) {
        self.symbols.clear();
        self.cur_fn = None;
        self.cur_block = 0;
        self.cur_exit = 0;
        self.next_temp = 0;
        self.cur_loc = Location::synthetic();
        self.namer.reset();
        self.handlers = HandlerState::new();
        self.deferred_temps.clear();
        self.current_proc_name = None;
    }

    /// Maps an identifier to a qualified name using the active namespace
    /// path. Already-qualified names pass through unchanged.
    pub(crate) fn qualify(&self, name: &str) -> String {
        if name.contains('.') {
            return name.to_string();
        }

        QualifiedName::qualify(&self.namespace, name).as_str().to_string()
    }

    pub(crate) fn push_namespace(&mut self, path: &[String]) {
        self.namespace.extend(path.iter().cloned());
    }

    pub(crate) fn pop_namespace(&mut self, depth: usize) {
        let keep = self.namespace.len().saturating_sub(depth);

        self.namespace.truncate(keep);
    }

    pub(crate) fn push_class(&mut self, qualified_name: String) {
        self.class_stack.push(qualified_name);
    }

    pub(crate) fn pop_class(&mut self) {
        self.class_stack.pop();
    }

    pub(crate) fn current_class(&self) -> Option<&String> {
        self.class_stack.last()
    }

    pub(crate) fn push_field_scope(&mut self, class_name: String) {
        self.field_scopes.push(FieldScope { class_name });
    }

    pub(crate) fn pop_field_scope(&mut self) {
        self.field_scopes.pop();
    }

    pub(crate) fn active_field_scope(&self) -> Option<&FieldScope> {
        self.field_scopes.last()
    }

    /// Looks up a layout by class name, falling back to the unqualified tail
    /// for qualified names. The cache is keyed by unqualified name.
    pub(crate) fn find_layout(&self, name: &str) -> Option<&'a ClassLayout> {
        self.layouts
            .get(name)
            .or_else(|| self.layouts.get(QualifiedName::new(name).tail()))
    }

    /// The instance field an unqualified identifier resolves to through the
    /// active field scope, if any.
    pub(crate) fn lookup_scope_field(
        &self,
        name: &str,
    ) -> Option<&'a types::layout::FieldSlot> {
        let scope = self.active_field_scope()?;

        self.find_layout(&scope.class_name)?.find_field(name)
    }

    fn is_field_name(&self, name: &str) -> bool {
        self.lookup_scope_field(name).is_some()
    }

    fn is_static_field_name(&self, name: &str) -> bool {
        let index = self.index;

        self.current_class()
            .and_then(|qname| index.find_class(qname))
            .and_then(|class| class.static_field(name))
            .is_some()
    }

    /// Registers a parameter name ahead of variable collection so that
    /// same-named module-level variables can't pollute its type.
    pub(crate) fn register_proc_param(&mut self, name: &str) {
        self.symbols.ensure_kind(name, SymbolKind::Param);
        self.symbols.mark_referenced(name);
    }

    // -------------------------------------------------------------------
    // Variable collection
    // -------------------------------------------------------------------

    pub(crate) fn collect_vars(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            match stmt {
                ast::Stmt::Dim(dim) => {
                    self.symbols.ensure(&dim.name);
                    self.symbols.set_type(&dim.name, dim.ty);

                    if !dim.object_class.is_empty() {
                        let qualified = self.qualify(&dim.object_class);

                        self.symbols.set_object_class(&dim.name, qualified);
                    }

                    if dim.is_array {
                        self.symbols.mark_array(&dim.name);
                    }

                    self.symbols.mark_referenced(&dim.name);
                }
                ast::Stmt::Assign(assign) => {
                    self.collect_assign_target(&assign.target);
                    self.collect_vars_expr(&assign.value);
                }
                ast::Stmt::Expr(expr) => self.collect_vars_expr(expr),
                ast::Stmt::Return(ret) => {
                    if let Some(value) = &ret.value {
                        self.collect_vars_expr(value);
                    }
                }
                ast::Stmt::Delete(delete) => {
                    self.collect_vars_expr(&delete.target);
                }
                ast::Stmt::OnError(_) => {}
                // Declarations are lowered through their own entry points.
                ast::Stmt::Class(_)
                | ast::Stmt::Interface(_)
                | ast::Stmt::Namespace(_) => {}
            }
        }
    }

    fn collect_assign_target(&mut self, target: &ast::Expr) {
        match target {
            ast::Expr::Var(var) => {
                if self.symbols.get(&var.name).is_some() {
                    self.symbols.mark_referenced(&var.name);
                    return;
                }

                // Unqualified identifiers naming fields resolve as field
                // stores, not locals.
                if self.is_field_name(&var.name)
                    || self.is_static_field_name(&var.name)
                {
                    return;
                }

                self.symbols.ensure(&var.name);
                self.symbols.mark_referenced(&var.name);
            }
            ast::Expr::MemberAccess(access) => {
                self.collect_vars_expr(&access.base);
            }
            ast::Expr::ArrayRef(array) => {
                self.collect_array_name(&array.name);

                for index in &array.indices {
                    self.collect_vars_expr(index);
                }
            }
            _ => {}
        }
    }

    fn collect_array_name(&mut self, name: &str) {
        if self.symbols.get(name).is_some() {
            self.symbols.mark_referenced(name);
            return;
        }

        if self.is_field_name(name) {
            return;
        }

        self.symbols.ensure(name);
        self.symbols.mark_array(name);
        self.symbols.mark_referenced(name);
    }

    pub(crate) fn collect_vars_expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Var(var) => {
                if self.symbols.get(&var.name).is_some() {
                    self.symbols.mark_referenced(&var.name);
                    return;
                }

                if self.is_field_name(&var.name)
                    || self.is_static_field_name(&var.name)
                {
                    return;
                }

                self.symbols.ensure(&var.name);
                self.symbols.mark_referenced(&var.name);
            }
            ast::Expr::New(new) => {
                for arg in &new.args {
                    self.collect_vars_expr(arg);
                }
            }
            ast::Expr::MemberAccess(access) => {
                self.collect_vars_expr(&access.base);
            }
            ast::Expr::MethodCall(call) => {
                self.collect_vars_expr(&call.base);

                for arg in &call.args {
                    self.collect_vars_expr(arg);
                }
            }
            ast::Expr::ArrayRef(array) => {
                self.collect_array_name(&array.name);

                for index in &array.indices {
                    self.collect_vars_expr(index);
                }
            }
            ast::Expr::Binary(binary) => {
                self.collect_vars_expr(&binary.left);
                self.collect_vars_expr(&binary.right);
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------
    // Procedure scaffolding
    // -------------------------------------------------------------------

    pub(crate) fn start_function(
        &mut self,
        name: String,
        ret: il::Type,
        params: Vec<(String, il::Type)>,
    ) -> usize {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(id, (name, ty))| il::Param { name, ty, id: id as u32 })
            .collect::<Vec<_>>();

        self.next_temp = params.len() as u32;

        let index = self.module.add_function(name, ret, params);

        self.cur_fn = Some(index);
        index
    }

    /// Creates the entry and exit blocks and leaves the entry block current.
    /// Returns the exit block's index; blocks are referred to by index only,
    /// as the block vector reallocates on later additions.
    pub(crate) fn build_procedure_skeleton(&mut self) -> usize {
        let function = self.cur_fn.expect("skeleton requires a function");
        let entry = self.module.functions[function]
            .add_block("entry".to_string());
        let exit =
            self.module.functions[function].add_block("exit".to_string());

        self.cur_block = entry;
        self.cur_exit = exit;
        exit
    }

    /// Binds the incoming `ME` pointer to a stack slot and records it in the
    /// symbol table so field accesses load from a stable location.
    pub(crate) fn materialize_self_slot(&mut self, class_qname: &str) -> u32 {
        self.cur_loc = Location::synthetic();
        self.symbols.ensure_kind(SELF_NAME, SymbolKind::Receiver);
        self.symbols.set_object_class(SELF_NAME, class_qname.to_string());
        self.symbols.mark_referenced(SELF_NAME);

        let slot = self.emit_alloca(8);
        let slot_id = match slot {
            il::Value::Temp(id) => id,
            _ => unreachable!(),
        };

        self.symbols.set_slot(SELF_NAME, slot_id);
        self.emit_store(il::Type::Ptr, slot, il::Value::Temp(0));
        slot_id
    }

    pub(crate) fn load_self_pointer(&mut self, slot_id: u32) -> il::Value {
        self.cur_loc = Location::synthetic();
        self.emit_load(il::Type::Ptr, il::Value::Temp(slot_id))
    }

    /// Allocates stack slots for every referenced local that doesn't have one
    /// yet. Slots are zero-initialised so the epilogue's release loops only
    /// ever see null handles for never-assigned locals.
    pub(crate) fn allocate_local_slots(&mut self) {
        let pending = self
            .symbols
            .iter()
            .filter(|(_, info)| {
                info.referenced
                    && info.slot_id.is_none()
                    && info.kind == SymbolKind::Local
            })
            .map(|(name, info)| {
                (name.clone(), info.ty, info.is_array, info.is_object)
            })
            .collect::<Vec<_>>();

        for (name, ty, is_array, is_object) in pending {
            self.cur_loc = Location::synthetic();

            let size = if is_array || is_object { 8 } else { slot_size(ty) };
            let slot = self.emit_alloca(size);
            let slot_id = match slot {
                il::Value::Temp(id) => id,
                _ => unreachable!(),
            };

            if is_array || is_object {
                self.emit_store(il::Type::Ptr, slot, il::Value::Null);
            } else {
                match ty {
                    ast::Type::F64 => {
                        self.emit_store(
                            il::Type::F64,
                            slot,
                            il::Value::Float(0.0),
                        );
                    }
                    ast::Type::Str => {
                        self.emit_store(il::Type::Str, slot, il::Value::Null);
                    }
                    ast::Type::Bool => {
                        self.emit_store(il::Type::I1, slot, il::Value::Int(0));
                    }
                    ast::Type::I64 => {
                        self.emit_store(il::Type::I64, slot, il::Value::Int(0));
                    }
                }
            }

            self.symbols.set_slot(&name, slot_id);
        }
    }

    pub(crate) fn lower_statement_sequence(
        &mut self,
        stmts: &[ast::Stmt],
        stop_on_terminated: bool,
    ) {
        for stmt in stmts {
            if stop_on_terminated && self.current_terminated() {
                break;
            }

            self.lower_stmt(stmt);
        }
    }

    pub(crate) fn emit_body_and_branch_to_exit(
        &mut self,
        stmts: &[ast::Stmt],
        exit_index: usize,
    ) {
        if stmts.is_empty() {
            self.cur_loc = Location::synthetic();
            self.emit_br(exit_index);
            return;
        }

        self.lower_statement_sequence(stmts, true);

        if !self.current_terminated() {
            self.emit_br(exit_index);
        }
    }

    /// The shared end-of-procedure release sequence: deferred temporaries,
    /// then owned object locals, then owned array locals. Borrowed parameters
    /// stay untouched; the caller owns their lifetime.
    pub(crate) fn emit_method_epilogue(
        &mut self,
        param_names: &HashSet<String>,
        exclude_from_obj_release: &HashSet<String>,
    ) {
        self.cur_loc = Location::synthetic();
        self.release_deferred_temps();
        self.release_object_locals(exclude_from_obj_release);
        self.release_array_locals(param_names);
    }

    // -------------------------------------------------------------------
    // Module-level variable typing
    // -------------------------------------------------------------------

    /// Records the object classes of module-level variables and arrays so
    /// class resolution works for names referenced away from their `DIM`.
    pub(crate) fn cache_module_object_types(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            let ast::Stmt::Dim(dim) = stmt else { continue };

            if dim.object_class.is_empty() {
                continue;
            }

            let qualified = self.qualify(&dim.object_class);
            let key = dim.name.to_ascii_lowercase();

            if dim.is_array {
                self.module_array_elem_class.insert(key, qualified);
            } else {
                self.module_object_class.insert(key, qualified);
            }
        }
    }

    // -------------------------------------------------------------------
    // Main entry
    // -------------------------------------------------------------------

    /// Lowers the program's top-level statements into `main`. The first call
    /// emitted is to the module initialiser: no user code may run before the
    /// vtables, itables, and static state are installed.
    pub(crate) fn emit_main(&mut self, program: &ast::Program) {
        self.reset_lowering_state();
        self.collect_vars(&program.main);

        self.start_function("main".to_string(), il::Type::I64, Vec::new());

        let exit = self.build_procedure_skeleton();

        self.cur_loc = Location::synthetic();
        self.emit_call(MODULE_INIT, Vec::new());
        self.allocate_local_slots();
        self.emit_body_and_branch_to_exit(&program.main, exit);
        self.cur_block = exit;

        let empty = HashSet::new();

        self.emit_method_epilogue(&empty, &empty);
        self.cur_loc = Location::synthetic();
        self.emit_ret(il::Value::Int(0));
        self.namer.reset();
    }

    pub(crate) fn get_string_label(&mut self, text: &str) -> String {
        if let Some(&index) = self.string_labels.get(text) {
            return self.module.strings[index].label.clone();
        }

        let label = format!(".Lstr{}", self.module.strings.len());

        self.string_labels
            .insert(text.to_string(), self.module.strings.len());
        self.module.strings.push(il::StringConst {
            label: label.clone(),
            value: text.to_string(),
        });
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{assign, int, var, Fixture};

    #[test]
    fn test_qualify_respects_namespace() {
        let fixture = Fixture::new();
        let mut lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);

        assert_eq!(lowerer.qualify("Person"), "Person");

        lowerer.push_namespace(&["A".to_string(), "B".to_string()]);

        assert_eq!(lowerer.qualify("Person"), "A.B.Person");
        assert_eq!(lowerer.qualify("C.D"), "C.D");

        lowerer.pop_namespace(2);

        assert_eq!(lowerer.qualify("Person"), "Person");
    }

    #[test]
    fn test_block_namer_is_deterministic() {
        let mut namer = BlockNamer::new();

        assert_eq!(namer.generic("delete_dtor"), "delete_dtor_0");
        assert_eq!(namer.generic("delete_cont"), "delete_cont_1");

        namer.reset();

        assert_eq!(namer.generic("delete_dtor"), "delete_dtor_0");
    }

    #[test]
    fn test_collect_vars_registers_assigned_locals() {
        let fixture = Fixture::new();
        let mut lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);
        let stmts = vec![assign(var("x"), int(1))];

        lowerer.collect_vars(&stmts);

        let info = lowerer.symbols.get("x").unwrap();

        assert!(info.referenced);
    }

    #[test]
    fn test_boolean_assigned_to_integer_becomes_a_logical_mask() {
        use crate::il::Opcode;
        use crate::test_util::{bool_lit, dim_scalar, function, instructions};

        let fixture = Fixture::new();
        let program = ast::Program {
            main: vec![
                dim_scalar("n", ast::Type::I64),
                assign(var("n"), bool_lit(true)),
            ],
        };
        let module = fixture.lower(&program);
        let main = function(&module, "main");
        let ops = instructions(main)
            .iter()
            .map(|i| i.op)
            .collect::<Vec<_>>();

        assert!(ops.contains(&Opcode::Zext1));
        assert!(ops.contains(&Opcode::ISubOvf));
    }

    #[test]
    fn test_string_labels_are_interned() {
        let fixture = Fixture::new();
        let mut lowerer =
            Lowerer::new(&fixture.index, &fixture.layouts, &fixture.config);

        let first = lowerer.get_string_label("hello");
        let second = lowerer.get_string_label("hello");
        let other = lowerer.get_string_label("world");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(lowerer.module.strings.len(), 2);
    }
}
