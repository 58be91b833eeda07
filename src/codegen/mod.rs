//! SSA IR code generator (C11)
//!
//! Emits the textual QBE-style SSA IR described in spec.md §4.6: `w`/`l`/
//! `s`/`d` scalar types, `function <ret> $name(<params>) { @blk ... }`
//! bodies, `%temp` SSA values, and `data $name = { ... }` globals. Every
//! variable gets a stack slot at function entry (`alloc4`/`alloc8`) with
//! loads/stores bracketing each use — no `mem2reg`, only the constant
//! folding C8 already did. Walks the `cfg::Cfg` built for each routine
//! rather than the raw AST, so block structure (and the merge points C10
//! already worked out) drives label emission directly.
//!
//! Structured the way the teacher's `codegen/` splits concerns: this
//! module owns state + orchestration, `expr` owns expression lowering,
//! `runtime` is the external call table, `error` is the error type.

mod error;
mod expr;
mod runtime;
mod stmt;

pub use error::CodeGenError;

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::{Program, RoutineDecl};
use crate::cfg::{self, Cfg};
use crate::options::{CompileOptions, ForIntegerWidth};
use crate::symbols::{ClassInfo, Scope, SymbolTable, UdtInfo};
use crate::types::{BaseType, TypeDescriptor};

/// One variable's codegen-time storage: either a local stack slot (`alloc`
/// result temp) or a module-level global symbol name.
#[derive(Debug, Clone)]
enum Storage {
    Local(String),
    Global(String),
}

pub struct CodeGen<'a> {
    table: &'a SymbolTable,
    output: String,
    temp_counter: u32,
    block_counter: u32,
    /// mangled variable name (uppercased) -> storage + declared type
    vars: HashMap<String, (Storage, TypeDescriptor)>,
    /// mangled array name (uppercased) -> storage + element type + dims
    arrays: HashMap<String, (Storage, TypeDescriptor, Vec<Option<u32>>)>,
    current_function: Option<String>,
    /// Block id -> emitted label, shared across a single routine's codegen.
    block_labels: HashMap<cfg::BlockId, String>,
    globals_emitted: bool,
    /// Every distinct string literal's text -> its `data $strN` symbol,
    /// interned up front (see `collect_string_literals`) since a `data`
    /// declaration can't be emitted in the middle of a `function` body.
    string_table: HashMap<String, String>,
    /// Stack slot holding the call-site id a `GOSUB`/`ON...GOSUB` stashed
    /// before jumping, consumed by the bare `RETURN` it lands on; `None`
    /// until the current routine's body actually needs one.
    gosub_slot: Option<String>,
    /// `GOSUB` target block -> how many distinct call sites have jumped to
    /// it so far, assigned in the same block-array order `wire_gosub_returns`
    /// used to wire `RETURN` successors, so the ids line up.
    gosub_target_counter: HashMap<cfg::BlockId, u32>,
    /// `FOR EACH` header block -> (iterator handle slot, "already started"
    /// flag slot), pre-allocated in `@start` since QBE requires `alloc*`
    /// there and the header may be re-entered on the loop's back-edge.
    foreach_slots: HashMap<cfg::BlockId, (String, String)>,
    /// Variable a `FOR EACH ... LIST OF ANY` bound the element's runtime
    /// type tag to, read by a later `MATCH TYPE` in the same body.
    current_type_tag: Option<String>,
}

/// Generate IR text for the whole program: a `data` section for every
/// global variable and `CONSTANT`-backed string literal, then one
/// `function` per routine plus the implicit `$main`.
pub fn generate_program(program: &Program, table: &SymbolTable) -> Result<String, CodeGenError> {
    let mut gen = CodeGen {
        table,
        output: String::new(),
        temp_counter: 0,
        block_counter: 0,
        vars: HashMap::new(),
        arrays: HashMap::new(),
        current_function: None,
        block_labels: HashMap::new(),
        globals_emitted: false,
        string_table: HashMap::new(),
        gosub_slot: None,
        gosub_target_counter: HashMap::new(),
        foreach_slots: HashMap::new(),
        current_type_tag: None,
    };
    gen.emit_program(program)?;
    Ok(gen.output)
}

impl<'a> CodeGen<'a> {
    fn fresh_temp(&mut self) -> String {
        let id = self.temp_counter;
        self.temp_counter += 1;
        format!("t{id}")
    }

    fn fresh_block_label(&mut self, hint: &str) -> String {
        let id = self.block_counter;
        self.block_counter += 1;
        format!("{hint}{id}")
    }

    fn label_for(&mut self, block: cfg::BlockId) -> String {
        if let Some(existing) = self.block_labels.get(&block) {
            return existing.clone();
        }
        let label = format!("blk{block}");
        self.block_labels.insert(block, label.clone());
        label
    }

    fn emit_program(&mut self, program: &Program) -> Result<(), CodeGenError> {
        self.emit_globals(program)?;
        self.emit_string_literals(program)?;
        self.emit_udt_aggregates()?;

        let cfgs = cfg::build_program(program, self.table);

        // Implicit main.
        self.vars.clear();
        self.arrays.clear();
        self.current_function = None;
        self.bind_scope_vars(None);
        self.block_labels.clear();
        let main_cfg = &cfgs["$MAIN"];
        self.emit_function_from_cfg("main", &[], None, main_cfg)?;

        for routine in &program.routines {
            self.vars.clear();
            self.arrays.clear();
            self.current_function = Some(routine.name.to_ascii_uppercase());
            self.bind_scope_vars(Some(&routine.name));
            self.block_labels.clear();
            let routine_cfg = &cfgs[&routine.name.to_ascii_uppercase()];
            self.emit_routine(routine, routine_cfg)?;
        }

        for class in program.classes.iter() {
            self.emit_class_methods(class)?;
        }

        Ok(())
    }

    /// Module-level `data` declarations for every global scalar/array and
    /// for the DATA segment's literal payload (spec.md §3 invariant 8).
    fn emit_globals(&mut self, program: &Program) -> Result<(), CodeGenError> {
        if self.globals_emitted {
            return Ok(());
        }
        self.globals_emitted = true;
        writeln!(self.output, "# globals")?;
        for ((name, scope), info) in &self.table.variables {
            if *scope != Scope::Global {
                continue;
            }
            let size = (info.ty.bit_width() / 8).max(1);
            writeln!(
                self.output,
                "data $g_{} = {{ z {} }}",
                global_symbol(name),
                size
            )?;
        }
        for ((name, scope), info) in &self.table.arrays {
            if *scope != Scope::Global {
                continue;
            }
            let size = if info.dimensions.iter().any(|d| d.is_none()) {
                8
            } else {
                let elem_size = (info.element_ty.bit_width() / 8).max(1);
                let count: u32 = info.dimensions.iter().map(|d| d.unwrap_or(1)).product::<u32>().max(1);
                elem_size * count
            };
            writeln!(
                self.output,
                "data $g_{} = {{ z {} }}",
                global_symbol(name),
                size
            )?;
        }
        for (idx, value) in self.table.data.values.iter().enumerate() {
            match value {
                crate::ast::DataValue::Number(n) => {
                    writeln!(self.output, "data $data_{idx} = {{ d d_{n} }}", n = format_float(*n))?;
                }
                crate::ast::DataValue::Text(s) => {
                    writeln!(self.output, "data $data_{idx} = {{ b \"{}\", b 0 }}", escape_ir_string(s))?;
                }
            }
        }
        self.emit_timer_table()?;
        let _ = program;
        Ok(())
    }

    /// `timer_after`/`timer_every` etc. take a small integer handler id
    /// rather than a function pointer (QBE has no first-class function
    /// values in `data` outside this one table); the runtime indexes this
    /// table to find which mangled routine to call when a timer fires.
    fn emit_timer_table(&mut self) -> Result<(), CodeGenError> {
        if self.table.timer_handlers.is_empty() {
            return Ok(());
        }
        write!(self.output, "data $timer_table = {{")?;
        for (i, handler) in self.table.timer_handlers.iter().enumerate() {
            if i > 0 {
                write!(self.output, ",")?;
            }
            write!(self.output, " l ${}", handler.to_ascii_lowercase())?;
        }
        writeln!(self.output, " }}")?;
        Ok(())
    }

    /// Walk every expression reachable from the program once, interning
    /// each distinct string literal as a `data $strN` symbol up front
    /// (a `data` def can't be written mid-function, so this must happen
    /// before any function body is emitted).
    fn emit_string_literals(&mut self, program: &Program) -> Result<(), CodeGenError> {
        let mut texts = Vec::new();
        for line in &program.lines {
            for stmt in &line.statements {
                collect_strings_stmt(stmt, &mut texts);
            }
        }
        for routine in &program.routines {
            for stmt in &routine.body {
                collect_strings_stmt(stmt, &mut texts);
            }
        }
        for class in &program.classes {
            for method in &class.methods {
                for stmt in &method.body {
                    collect_strings_stmt(stmt, &mut texts);
                }
            }
            if let Some(ctor) = &class.constructor {
                for stmt in &ctor.body {
                    collect_strings_stmt(stmt, &mut texts);
                }
            }
        }
        for constant in &program.constants {
            collect_strings_expr(&constant.value, &mut texts);
        }
        for text in texts {
            if self.string_table.contains_key(&text) {
                continue;
            }
            let symbol = format!("str{}", self.string_table.len());
            writeln!(
                self.output,
                "data ${symbol} = {{ b \"{}\", b 0 }}",
                escape_ir_string(&text)
            )?;
            self.string_table.insert(text, symbol);
        }
        Ok(())
    }

    /// UDTs become struct aggregate type declarations (`type :Name = { ... }`);
    /// classes get their layout documented as a comment since the instance
    /// itself is opaque (`class_new` hands back an untyped pointer).
    fn emit_udt_aggregates(&mut self) -> Result<(), CodeGenError> {
        for udt in self.table.udts.values() {
            self.emit_udt_type(udt)?;
        }
        for class in self.table.classes.values() {
            self.emit_class_layout_comment(class)?;
        }
        Ok(())
    }

    fn emit_udt_type(&mut self, udt: &UdtInfo) -> Result<(), CodeGenError> {
        write!(self.output, "type :{} = {{", udt.name)?;
        for (i, (_, ty)) in udt.fields.iter().enumerate() {
            if i > 0 {
                write!(self.output, ",")?;
            }
            write!(self.output, " {}", ir_type(ty))?;
        }
        writeln!(self.output, " }}")?;
        if let Some(simd) = udt.simd {
            writeln!(self.output, "# simd: {udt_name} -> {simd:?}", udt_name = udt.name)?;
        }
        Ok(())
    }

    fn emit_class_layout_comment(&mut self, class: &ClassInfo) -> Result<(), CodeGenError> {
        writeln!(
            self.output,
            "# class {} id={} size={} parent={}",
            class.name,
            class.class_id,
            class.instance_size,
            class.parent.as_deref().unwrap_or("-")
        )?;
        for slot in &class.vtable {
            writeln!(
                self.output,
                "#   vtable[{}] = {}",
                slot.vtable_index,
                runtime::mangle_method(&class.name, &slot.name)
            )?;
        }
        Ok(())
    }

    /// Populate `self.vars`/`self.arrays` with every symbol visible in
    /// `function` (or global scope when `function` is `None`, for main).
    fn bind_scope_vars(&mut self, function: Option<&str>) {
        let scope = match function {
            Some(name) => Scope::Function(name.to_ascii_uppercase()),
            None => Scope::Function(crate::semantic::MAIN_SCOPE.to_string()),
        };
        for ((name, s), info) in &self.table.variables {
            if *s == scope || *s == Scope::Global {
                let storage = if *s == Scope::Global {
                    Storage::Global(global_symbol(name))
                } else {
                    Storage::Local(format!("v_{}", name.to_ascii_lowercase()))
                };
                self.vars.insert(name.clone(), (storage, info.ty.clone()));
            }
        }
        for ((name, s), info) in &self.table.arrays {
            if *s == scope || *s == Scope::Global {
                let storage = if *s == Scope::Global {
                    Storage::Global(global_symbol(name))
                } else {
                    Storage::Local(format!("a_{}", name.to_ascii_lowercase()))
                };
                self.arrays.insert(
                    name.clone(),
                    (storage, info.element_ty.clone(), info.dimensions.clone()),
                );
            }
        }
    }

    fn emit_routine(&mut self, routine: &RoutineDecl, cfg: &Cfg) -> Result<(), CodeGenError> {
        let ret_ty = routine.return_type.as_ref().map(ir_type).unwrap_or("w");
        let mangled = mangle_routine_name(routine);
        let params: Vec<String> = routine
            .params
            .iter()
            .map(|p| format!("{} %p_{}", ir_type(&p.ty), p.name.to_ascii_lowercase()))
            .collect();
        if routine.return_type.is_some() {
            write!(self.output, "export function {ret_ty} ${mangled}(")?;
        } else {
            write!(self.output, "export function ${mangled}(")?;
        }
        write!(self.output, "{}", params.join(", "))?;
        writeln!(self.output, ") {{")?;
        writeln!(self.output, "@start")?;
        self.emit_prologue(routine.params.iter().map(|p| p.name.as_str()))?;
        self.emit_cfg_body(cfg)?;
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    fn emit_function_from_cfg(
        &mut self,
        name: &str,
        param_names: &[&str],
        ret_ty: Option<&str>,
        cfg: &Cfg,
    ) -> Result<(), CodeGenError> {
        if let Some(ty) = ret_ty {
            writeln!(self.output, "export function {ty} ${name}() {{")?;
        } else {
            writeln!(self.output, "export function ${name}() {{")?;
        }
        writeln!(self.output, "@start")?;
        self.emit_prologue(param_names.iter().copied())?;
        self.emit_cfg_body(cfg)?;
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    /// Allocate a stack slot for every local variable/array visible in the
    /// current function and copy incoming by-value parameters into theirs.
    fn emit_prologue<'p>(
        &mut self,
        param_names: impl Iterator<Item = &'p str>,
    ) -> Result<(), CodeGenError> {
        let locals: Vec<(String, String, &'static str, u32)> = self
            .vars
            .iter()
            .filter_map(|(name, (storage, ty))| match storage {
                Storage::Local(slot) => {
                    let size = (ty.bit_width() / 8).max(1);
                    Some((name.clone(), slot.clone(), alloc_op(size), size))
                }
                Storage::Global(_) => None,
            })
            .collect();
        for (_, slot, op, size) in &locals {
            writeln!(self.output, "  %{slot} ={op_ty} {op} {size}", op_ty = "l")?;
        }
        let array_locals: Vec<(String, String, u32)> = self
            .arrays
            .iter()
            .filter_map(|(name, (storage, elem_ty, dims))| match storage {
                Storage::Local(slot) => {
                    if dims.iter().any(|d| d.is_none()) {
                        // Dynamic shape: the slot holds a runtime handle
                        // pointer, not inline storage.
                        return Some((name.clone(), slot.clone(), 8));
                    }
                    let elem_size = (elem_ty.bit_width() / 8).max(1);
                    let count: u32 = dims.iter().map(|d| d.unwrap_or(1)).product::<u32>().max(1);
                    Some((name.clone(), slot.clone(), elem_size * count))
                }
                Storage::Global(_) => None,
            })
            .collect();
        for (_, slot, size) in &array_locals {
            writeln!(self.output, "  %{slot} =l alloc8 {size}")?;
        }
        for name in param_names {
            let upper = name.to_ascii_uppercase();
            if let Some((Storage::Local(slot), ty)) = self.vars.get(&upper) {
                writeln!(
                    self.output,
                    "  store{t} %p_{p}, %{slot}",
                    t = ir_store_suffix(ty),
                    p = name.to_ascii_lowercase(),
                    slot = slot,
                )?;
            }
        }
        Ok(())
    }

    fn emit_cfg_body(&mut self, cfg: &Cfg) -> Result<(), CodeGenError> {
        self.gosub_slot = None;
        self.gosub_target_counter.clear();
        self.foreach_slots.clear();
        self.current_type_tag = None;

        if stmt::needs_gosub_slot(cfg) {
            let slot = self.fresh_temp();
            writeln!(self.output, "  %{slot} =w alloc4 4")?;
            self.gosub_slot = Some(slot);
        }
        for header in stmt::foreach_header_ids(cfg) {
            let iter_slot = self.fresh_temp();
            let started_slot = self.fresh_temp();
            writeln!(self.output, "  %{iter_slot} =l alloc8 8")?;
            writeln!(self.output, "  %{started_slot} =w alloc4 4")?;
            writeln!(self.output, "  storew 0, %{started_slot}")?;
            self.foreach_slots.insert(header, (iter_slot, started_slot));
        }

        writeln!(self.output, "  jmp @{}", self.label_for(cfg.entry))?;
        for block in &cfg.blocks {
            let label = self.label_for(block.id);
            writeln!(self.output, "@{label}")?;
            for stmt in &block.statements {
                self.codegen_statement(stmt)?;
            }
            self.codegen_terminator(block)?;
        }
        Ok(())
    }

    fn emit_class_methods(&mut self, class: &crate::ast::ClassDecl) -> Result<(), CodeGenError> {
        for method in &class.methods {
            self.vars.clear();
            self.arrays.clear();
            let scope_name = format!("{}__{}", class.name.to_ascii_uppercase(), method.name.to_ascii_uppercase());
            self.current_function = Some(scope_name.clone());
            self.bind_method_vars(class, method);
            self.block_labels.clear();
            let cfg = cfg::build_routine_cfg(&method.body);
            let mangled = runtime::mangle_method(&class.name, &method.name);
            let ret_ty = method.return_type.as_ref().map(ir_type).unwrap_or("w");
            let mut params = vec!["l %this".to_string()];
            for p in &method.params {
                params.push(format!("{} %p_{}", ir_type(&p.ty), p.name.to_ascii_lowercase()));
            }
            if method.return_type.is_some() {
                write!(self.output, "export function {ret_ty} ${mangled}(")?;
            } else {
                write!(self.output, "export function ${mangled}(")?;
            }
            write!(self.output, "{}", params.join(", "))?;
            writeln!(self.output, ") {{")?;
            writeln!(self.output, "@start")?;
            let this_slot = "v_this".to_string();
            writeln!(self.output, "  %{this_slot} =l alloc8 8")?;
            writeln!(self.output, "  storel %this, %{this_slot}")?;
            self.vars.insert(
                "THIS".to_string(),
                (Storage::Local(this_slot), TypeDescriptor::class(class.name.clone())),
            );
            self.emit_prologue(method.params.iter().map(|p| p.name.as_str()))?;
            self.emit_cfg_body(&cfg)?;
            writeln!(self.output, "}}")?;
            writeln!(self.output)?;
        }
        if let Some(ctor) = &class.constructor {
            self.emit_class_methods_single(class, ctor, "CONSTRUCTOR")?;
        }
        if let Some(dtor) = &class.destructor {
            self.emit_class_methods_single(class, dtor, "DESTRUCTOR")?;
        }
        Ok(())
    }

    fn emit_class_methods_single(
        &mut self,
        class: &crate::ast::ClassDecl,
        method: &crate::ast::MethodDecl,
        tag: &str,
    ) -> Result<(), CodeGenError> {
        self.vars.clear();
        self.arrays.clear();
        self.current_function = Some(format!("{}__{tag}", class.name.to_ascii_uppercase()));
        self.bind_method_vars(class, method);
        self.block_labels.clear();
        let cfg = cfg::build_routine_cfg(&method.body);
        let mangled = format!("{}__{}", class.name.to_ascii_uppercase(), tag);
        let mut params = vec!["l %this".to_string()];
        for p in &method.params {
            params.push(format!("{} %p_{}", ir_type(&p.ty), p.name.to_ascii_lowercase()));
        }
        write!(self.output, "export function ${mangled}(")?;
        write!(self.output, "{}", params.join(", "))?;
        writeln!(self.output, ") {{")?;
        writeln!(self.output, "@start")?;
        let this_slot = "v_this".to_string();
        writeln!(self.output, "  %{this_slot} =l alloc8 8")?;
        writeln!(self.output, "  storel %this, %{this_slot}")?;
        self.vars.insert(
            "THIS".to_string(),
            (Storage::Local(this_slot), TypeDescriptor::class(class.name.clone())),
        );
        self.emit_prologue(method.params.iter().map(|p| p.name.as_str()))?;
        self.emit_cfg_body(&cfg)?;
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    fn bind_method_vars(&mut self, class: &crate::ast::ClassDecl, method: &crate::ast::MethodDecl) {
        let scope = Scope::Function(format!(
            "{}__{}",
            class.name.to_ascii_uppercase(),
            method.name.to_ascii_uppercase()
        ));
        for ((name, s), info) in &self.table.variables {
            if *s == scope {
                self.vars.insert(
                    name.clone(),
                    (Storage::Local(format!("v_{}", name.to_ascii_lowercase())), info.ty.clone()),
                );
            }
        }
    }

    fn current_for_integer_width(&self) -> &'static str {
        match self.table.options.for_integer_width {
            ForIntegerWidth::Integer => "w",
            ForIntegerWidth::Long => "l",
        }
    }
}

fn collect_strings_expr(expr: &crate::ast::Expr, out: &mut Vec<String>) {
    use crate::ast::Expr;
    match expr {
        Expr::StringLiteral(s) => out.push(s.clone()),
        Expr::ArrayAccess { indices, .. } => indices.iter().for_each(|e| collect_strings_expr(e, out)),
        Expr::FieldAccess { base, .. } => collect_strings_expr(base, out),
        Expr::Index { base, index } => {
            collect_strings_expr(base, out);
            collect_strings_expr(index, out);
        }
        Expr::Unary { expr, .. } => collect_strings_expr(expr, out),
        Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
            collect_strings_expr(lhs, out);
            collect_strings_expr(rhs, out);
        }
        Expr::Call { args, .. } | Expr::New { args, .. } | Expr::SuperCall { args, .. } => {
            args.iter().for_each(|e| collect_strings_expr(e, out))
        }
        Expr::MethodCall { base, args, .. } => {
            collect_strings_expr(base, out);
            args.iter().for_each(|e| collect_strings_expr(e, out));
        }
        Expr::IsNothing(inner) | Expr::IsClass { expr: inner, .. } => collect_strings_expr(inner, out),
        Expr::NumberLiteral(_) | Expr::Variable(_) | Expr::Nothing => {}
    }
}

fn collect_strings_lvalue(lv: &crate::ast::LValue, out: &mut Vec<String>) {
    use crate::ast::LValue;
    match lv {
        LValue::Variable(_) => {}
        LValue::ArrayElement { indices, .. } => indices.iter().for_each(|e| collect_strings_expr(e, out)),
        LValue::Field { base, .. } => collect_strings_lvalue(base, out),
        LValue::Index { base, index } => {
            collect_strings_expr(base, out);
            collect_strings_expr(index, out);
        }
    }
}

fn collect_strings_stmt(stmt: &crate::ast::Statement, out: &mut Vec<String>) {
    use crate::ast::{PrintItem, Statement};
    match stmt {
        Statement::Dim { specs, .. } => {
            for spec in specs {
                spec.dimensions.iter().flatten().for_each(|e| collect_strings_expr(e, out));
            }
        }
        Statement::Redim { dimensions, .. } => dimensions.iter().for_each(|e| collect_strings_expr(e, out)),
        Statement::Assign { target, value, .. } => {
            collect_strings_lvalue(target, out);
            collect_strings_expr(value, out);
        }
        Statement::Print { items, .. } => {
            for item in items {
                if let PrintItem::Expr(e) = item {
                    collect_strings_expr(e, out);
                }
            }
        }
        Statement::Input { prompt, target, at, .. } => {
            if let Some(p) = prompt {
                collect_strings_expr(p, out);
            }
            collect_strings_lvalue(target, out);
            if let Some((r, c)) = at {
                collect_strings_expr(r, out);
                collect_strings_expr(c, out);
            }
        }
        Statement::CallStatement { args, .. } => args.iter().for_each(|e| collect_strings_expr(e, out)),
        Statement::OnCall { selector, .. } => collect_strings_expr(selector, out),
        Statement::ExprStatement { expr, .. } => collect_strings_expr(expr, out),
        Statement::If {
            condition,
            then_branch,
            else_ifs,
            else_branch,
            ..
        } => {
            collect_strings_expr(condition, out);
            then_branch.iter().for_each(|s| collect_strings_stmt(s, out));
            for (c, body) in else_ifs {
                collect_strings_expr(c, out);
                body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
            if let Some(body) = else_branch {
                body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
        }
        Statement::For { start, end, step, body, .. } => {
            collect_strings_expr(start, out);
            collect_strings_expr(end, out);
            if let Some(s) = step {
                collect_strings_expr(s, out);
            }
            body.iter().for_each(|s| collect_strings_stmt(s, out));
        }
        Statement::ForEach { collection, body, .. } => {
            collect_strings_expr(collection, out);
            body.iter().for_each(|s| collect_strings_stmt(s, out));
        }
        Statement::While { condition, body, .. } => {
            collect_strings_expr(condition, out);
            body.iter().for_each(|s| collect_strings_stmt(s, out));
        }
        Statement::DoLoop { body, pre_test, post_test, .. } => {
            if let Some((_, e)) = pre_test {
                collect_strings_expr(e, out);
            }
            if let Some((_, e)) = post_test {
                collect_strings_expr(e, out);
            }
            body.iter().for_each(|s| collect_strings_stmt(s, out));
        }
        Statement::Repeat { body, until, .. } => {
            collect_strings_expr(until, out);
            body.iter().for_each(|s| collect_strings_stmt(s, out));
        }
        Statement::SelectCase { discriminant, arms, otherwise, .. } => {
            collect_strings_expr(discriminant, out);
            for arm in arms {
                for m in &arm.matches {
                    match m {
                        crate::ast::CaseMatch::Value(e) => collect_strings_expr(e, out),
                        crate::ast::CaseMatch::Range(a, b) => {
                            collect_strings_expr(a, out);
                            collect_strings_expr(b, out);
                        }
                        crate::ast::CaseMatch::RelOp(_, e) => collect_strings_expr(e, out),
                    }
                }
                arm.body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
            if let Some(body) = otherwise {
                body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
        }
        Statement::MatchType { discriminant, arms, .. } => {
            collect_strings_expr(discriminant, out);
            for arm in arms {
                arm.body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
        }
        Statement::TryCatchFinally { try_body, catches, finally, .. } => {
            try_body.iter().for_each(|s| collect_strings_stmt(s, out));
            for c in catches {
                c.body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
            if let Some(body) = finally {
                body.iter().for_each(|s| collect_strings_stmt(s, out));
            }
        }
        Statement::Throw { code, .. } => collect_strings_expr(code, out),
        Statement::OnGoto { selector, .. } => collect_strings_expr(selector, out),
        Statement::Return { value, .. } => {
            if let Some(v) = value {
                collect_strings_expr(v, out);
            }
        }
        Statement::Read { targets, .. } => targets.iter().for_each(|t| collect_strings_lvalue(t, out)),
        Statement::Delete { target, .. } => collect_strings_lvalue(target, out),
        Statement::Timer { duration, .. } => collect_strings_expr(duration, out),
        Statement::Exit { .. }
        | Statement::Goto { .. }
        | Statement::Gosub { .. }
        | Statement::Restore { .. }
        | Statement::Label { .. } => {}
    }
}

fn global_symbol(mangled_name: &str) -> String {
    mangled_name.to_ascii_lowercase()
}

fn mangle_routine_name(routine: &RoutineDecl) -> String {
    routine.name.to_ascii_lowercase()
}

/// Map a `TypeDescriptor` onto a QBE scalar type letter (spec.md §4.6).
/// UDTs and class instances are always addressed through a pointer
/// (`l`); aggregates-by-value are not part of this IR contract.
pub(crate) fn ir_type(ty: &TypeDescriptor) -> &'static str {
    match ty.base {
        BaseType::Byte
        | BaseType::UByte
        | BaseType::Short
        | BaseType::UShort
        | BaseType::Integer
        | BaseType::UInteger => "w",
        BaseType::Long | BaseType::ULong => "l",
        BaseType::Single => "s",
        BaseType::Double => "d",
        BaseType::String
        | BaseType::Unicode
        | BaseType::Object
        | BaseType::ClassInstance
        | BaseType::UserDefined => "l",
        BaseType::Void | BaseType::Unknown => "w",
    }
}

fn ir_store_suffix(ty: &TypeDescriptor) -> &'static str {
    match ir_type(ty) {
        "w" => "w",
        "l" => "l",
        "s" => "s",
        "d" => "d",
        _ => "w",
    }
}

fn alloc_op(size_bytes: u32) -> &'static str {
    if size_bytes > 8 {
        "alloc16"
    } else if size_bytes > 4 {
        "alloc8"
    } else {
        "alloc4"
    }
}

fn escape_ir_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_float(n: f64) -> String {
    format!("{n}").replace('.', "_").replace('-', "neg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_type_maps_integer_widths() {
        assert_eq!(ir_type(&TypeDescriptor::simple(BaseType::Byte)), "w");
        assert_eq!(ir_type(&TypeDescriptor::simple(BaseType::Long)), "l");
        assert_eq!(ir_type(&TypeDescriptor::simple(BaseType::Single)), "s");
        assert_eq!(ir_type(&TypeDescriptor::simple(BaseType::Double)), "d");
        assert_eq!(ir_type(&TypeDescriptor::simple(BaseType::String)), "l");
    }

    #[test]
    fn alloc_op_picks_widest_needed() {
        assert_eq!(alloc_op(1), "alloc4");
        assert_eq!(alloc_op(4), "alloc4");
        assert_eq!(alloc_op(8), "alloc8");
        assert_eq!(alloc_op(16), "alloc16");
    }
}
