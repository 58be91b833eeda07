//! Statement and CFG-terminator lowering.
//!
//! `codegen_statement` covers exactly the "simple" statements `cfg::Builder`
//! leaves inside a block's `statements` list; every structured-control-flow
//! statement (`IF`, `FOR`, `SELECT CASE`, `TRY`, ...) was already consumed
//! by the CFG builder into a `Terminator`, so `codegen_terminator` handles
//! those instead.

use std::fmt::Write as _;

use super::{ir_store_suffix, ir_type, CodeGen, CodeGenError, Storage};
use crate::ast::{
    CaseMatch, CatchClause, CompareOp, DimSpec, Expr, GotoTarget, LValue, PrintItem, Statement,
    TimerKind, UnaryOp,
};
use crate::cfg::{self, BasicBlock, BlockId, Cfg, Terminator};
use crate::types::{BaseType, TypeDescriptor};

impl<'a> CodeGen<'a> {
    pub(super) fn codegen_statement(&mut self, stmt: &Statement) -> Result<(), CodeGenError> {
        match stmt {
            Statement::Dim { specs, .. } => self.codegen_dim(specs),
            Statement::Redim { name, dimensions, preserve, .. } => {
                self.codegen_redim(name, dimensions, *preserve)
            }
            Statement::Assign { target, value, .. } => self.codegen_assign(target, value),
            Statement::Print { items, .. } => self.codegen_print(items),
            Statement::Input { prompt, target, at, .. } => {
                self.codegen_input(prompt.as_ref(), target, at.as_ref())
            }
            Statement::CallStatement { name, args, .. } => self.codegen_call_discard(name, args),
            Statement::ExprStatement { expr, .. } => {
                self.codegen_expr(expr)?;
                Ok(())
            }
            Statement::OnCall { selector, targets, .. } => self.codegen_on_call(selector, targets),
            Statement::Restore { target, .. } => self.codegen_restore(target.as_ref()),
            Statement::Read { targets, .. } => self.codegen_read(targets),
            Statement::Delete { target, .. } => self.codegen_delete(target),
            Statement::Timer { kind, duration, handler, .. } => {
                self.codegen_timer(*kind, duration, handler)
            }
            Statement::Label { .. } => Ok(()),
            other => Err(format!("codegen: {other:?} should have been lowered to a CFG terminator").into()),
        }
    }

    /// `Terminator::Return`'s dispatch needs `block.successors` (one entry
    /// per `GOSUB` call site reaching this `RETURN`), so this takes the
    /// whole block rather than just its terminator.
    pub(super) fn codegen_terminator(&mut self, block: &BasicBlock) -> Result<(), CodeGenError> {
        match &block.terminator {
            Terminator::Unset => Err("codegen: reached an unset CFG terminator".to_string().into()),
            Terminator::Jump(target) => self.emit_jump(*target),
            Terminator::CondBranch { cond, then_block, else_block } => {
                let (op, _) = self.codegen_expr(cond)?;
                let then_label = self.label_for(*then_block);
                let else_label = self.label_for(*else_block);
                writeln!(self.output, "  jnz {op}, @{then_label}, @{else_label}")?;
                Ok(())
            }
            Terminator::ForHeader { var, limit, step, body, merge } => {
                self.codegen_for_header(var, limit, step.as_ref(), *body, *merge)
            }
            Terminator::ForEachHeader { var, type_tag_var, collection, body, merge } => {
                self.codegen_for_each_header(block.id, var, type_tag_var.as_deref(), collection, *body, *merge)
            }
            Terminator::Switch { discriminant, arms, default } => {
                self.codegen_switch(discriminant, arms, *default)
            }
            Terminator::MatchType { discriminant, arms, default } => {
                self.codegen_match_type(discriminant, arms, *default)
            }
            Terminator::TryRegion { body, catches, finally, after } => {
                self.codegen_try_region(*body, catches, *finally, *after)
            }
            Terminator::Gosub { target, .. } => {
                self.emit_gosub_tag(*target)?;
                self.emit_jump(*target)
            }
            Terminator::OnGoto { selector, targets, is_gosub, .. } => {
                self.codegen_on_goto(selector, targets, *is_gosub)
            }
            Terminator::Return(value) => self.codegen_return(block, value.as_ref()),
            Terminator::Throw(code) => {
                let (op, ty) = self.codegen_expr(code)?;
                let l = self.ensure_long(&op, &ty)?;
                writeln!(self.output, "  call $runtime_throw(l {l})")?;
                Ok(())
            }
            Terminator::ImplicitReturn => {
                writeln!(self.output, "  ret")?;
                Ok(())
            }
        }
    }

    /// A `GOTO`/`GOSUB` target that couldn't be resolved inside this
    /// routine's own CFG (a jump from a `SUB`/`FUNCTION` body to a
    /// top-level line) can't be expressed as a direct label jump here;
    /// raise it as a runtime error instead of attempting one.
    fn emit_jump(&mut self, target: BlockId) -> Result<(), CodeGenError> {
        if target == cfg::EXTERNAL_TARGET {
            writeln!(self.output, "  call $runtime_throw(l 9)")?;
            return Ok(());
        }
        let label = self.label_for(target);
        writeln!(self.output, "  jmp @{label}")?;
        Ok(())
    }

    fn codegen_dim(&mut self, specs: &[DimSpec]) -> Result<(), CodeGenError> {
        for spec in specs {
            if spec.dimensions.is_empty() {
                // Scalar: its slot was already reserved by `emit_prologue`.
                // A LIST/HASHMAP scalar still needs a live runtime handle
                // in that slot before any `.APPEND`/`.GET`/... call uses it.
                if spec.ty.base == BaseType::Object {
                    let rt_fn = if spec.ty.object_type_name.as_deref() == Some("HASHMAP") {
                        "hashmap_new"
                    } else {
                        "list_new"
                    };
                    let (addr, _) = self.variable_address(&spec.name)?;
                    let handle = self.fresh_temp();
                    writeln!(self.output, "  %{handle} =l call ${rt_fn}()")?;
                    writeln!(self.output, "  storel %{handle}, {addr}")?;
                }
                continue;
            }
            let upper = spec.name.to_ascii_uppercase();
            let (storage, elem_ty, dims) = self
                .arrays
                .get(&upper)
                .cloned()
                .ok_or_else(|| format!("codegen: unresolved array {}", spec.name))?;
            if !dims.iter().any(|d| d.is_none()) {
                // Fixed shape: the flat buffer is already reserved too.
                continue;
            }
            let base = match storage {
                Storage::Local(slot) => format!("%{slot}"),
                Storage::Global(sym) => format!("$g_{sym}"),
            };
            let elem_size = (elem_ty.bit_width() / 8).max(1);
            let handle = self.fresh_temp();
            writeln!(self.output, "  %{handle} =l call $array_new(w {elem_size}, l 0)")?;
            writeln!(self.output, "  storel %{handle}, {base}")?;
        }
        Ok(())
    }

    fn codegen_redim(&mut self, name: &str, dimensions: &[Expr], preserve: bool) -> Result<(), CodeGenError> {
        let upper = name.to_ascii_uppercase();
        let (storage, ..) = self
            .arrays
            .get(&upper)
            .cloned()
            .ok_or_else(|| format!("codegen: unresolved array {name}"))?;
        let base = match storage {
            Storage::Local(slot) => format!("%{slot}"),
            Storage::Global(sym) => format!("$g_{sym}"),
        };
        let handle = self.fresh_temp();
        writeln!(self.output, "  %{handle} =l loadl {base}")?;
        let mut count = "1".to_string();
        for d in dimensions {
            let (op, _) = self.codegen_expr(d)?;
            let combined = self.fresh_temp();
            writeln!(self.output, "  %{combined} =l mul {count}, {op}")?;
            count = format!("%{combined}");
        }
        let rt_fn = if preserve { "array_redim_preserve" } else { "array_redim" };
        let resized = self.fresh_temp();
        writeln!(self.output, "  %{resized} =l call ${rt_fn}(l %{handle}, l {count})")?;
        writeln!(self.output, "  storel %{resized}, {base}")?;
        Ok(())
    }

    fn codegen_assign(&mut self, target: &LValue, value: &Expr) -> Result<(), CodeGenError> {
        let (op, _) = self.codegen_expr(value)?;
        self.store_lvalue(target, &op)
    }

    /// Write `value_op` into an lvalue's storage. Mirrors `expr.rs`'s
    /// load-side handling of the same four shapes.
    fn store_lvalue(&mut self, lv: &LValue, value_op: &str) -> Result<(), CodeGenError> {
        match lv {
            LValue::Variable(name) => {
                let (addr, ty) = self.variable_address(name)?;
                writeln!(self.output, "  store{t} {value_op}, {addr}", t = ir_store_suffix(&ty))?;
                Ok(())
            }
            LValue::ArrayElement { name, indices } => self.codegen_array_store(name, indices, value_op),
            LValue::Field { base, field } => {
                let (base_addr, base_ty) = self.lvalue_field_base(base)?;
                let (offset, field_ty) = self.field_offset(&base_ty, field)?;
                let addr = self.fresh_temp();
                writeln!(self.output, "  %{addr} =l add {base_addr}, {offset}")?;
                writeln!(self.output, "  store{t} {value_op}, %{addr}", t = ir_store_suffix(&field_ty))?;
                Ok(())
            }
            LValue::Index { base, index } => {
                let (base_op, _) = self.codegen_expr(base)?;
                let (idx_op, _) = self.codegen_expr(index)?;
                writeln!(self.output, "  call $list_set(l {base_op}, l {idx_op}, l {value_op})")?;
                Ok(())
            }
        }
    }

    /// The declared type of an lvalue, without evaluating it — used by
    /// `READ`/`INPUT` to pick which runtime conversion to call.
    fn lvalue_type(&self, lv: &LValue) -> Result<TypeDescriptor, CodeGenError> {
        match lv {
            LValue::Variable(name) => self
                .vars
                .get(&name.to_ascii_uppercase())
                .map(|(_, ty)| ty.clone())
                .ok_or_else(|| format!("codegen: unresolved variable {name}").into()),
            LValue::ArrayElement { name, .. } => self
                .arrays
                .get(&name.to_ascii_uppercase())
                .map(|(_, ty, _)| ty.clone())
                .ok_or_else(|| format!("codegen: unresolved array {name}").into()),
            LValue::Field { base, field } => {
                let base_ty = self.lvalue_type(base)?;
                self.field_offset(&base_ty, field).map(|(_, ty)| ty)
            }
            LValue::Index { .. } => Ok(TypeDescriptor::simple(BaseType::Object)),
        }
    }

    /// Address of a nested `LValue` used as a `Field`'s base — the
    /// `LValue`-flavored counterpart of `expr.rs`'s `field_base_address`,
    /// needed because `LValue::Field`'s base is itself an `LValue`, not
    /// an `Expr`.
    fn lvalue_field_base(&mut self, lv: &LValue) -> Result<(String, TypeDescriptor), CodeGenError> {
        match lv {
            LValue::Variable(name) => self.variable_address(name),
            LValue::ArrayElement { name, indices } => {
                let upper = name.to_ascii_uppercase();
                let (storage, elem_ty, dims) = self
                    .arrays
                    .get(&upper)
                    .cloned()
                    .ok_or_else(|| format!("codegen: unresolved array {name}"))?;
                let base = match storage {
                    Storage::Local(slot) => format!("%{slot}"),
                    Storage::Global(sym) => format!("$g_{sym}"),
                };
                if dims.iter().any(|d| d.is_none()) {
                    let handle = self.fresh_temp();
                    writeln!(self.output, "  %{handle} =l loadl {base}")?;
                    let mut flat_index = "0".to_string();
                    for idx_expr in indices {
                        let (op, _) = self.codegen_expr(idx_expr)?;
                        let combined = self.fresh_temp();
                        writeln!(self.output, "  %{combined} =l add {flat_index}, {op}")?;
                        flat_index = format!("%{combined}");
                    }
                    let dest = self.fresh_temp();
                    writeln!(self.output, "  %{dest} =l call $array_get(l %{handle}, l {flat_index})")?;
                    return Ok((format!("%{dest}"), elem_ty));
                }
                let elem_size = (elem_ty.bit_width() / 8).max(1);
                let offset = self.flat_offset(&dims, indices, elem_size)?;
                let addr = self.fresh_temp();
                writeln!(self.output, "  %{addr} =l add {base}, {offset}")?;
                Ok((format!("%{addr}"), elem_ty))
            }
            LValue::Field { base, field } => {
                let (inner_addr, inner_ty) = self.lvalue_field_base(base)?;
                let (offset, field_ty) = self.field_offset(&inner_ty, field)?;
                let addr = self.fresh_temp();
                writeln!(self.output, "  %{addr} =l add {inner_addr}, {offset}")?;
                Ok((format!("%{addr}"), field_ty))
            }
            LValue::Index { base, index } => {
                let (base_op, _) = self.codegen_expr(base)?;
                let (idx_op, _) = self.codegen_expr(index)?;
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $list_get(l {base_op}, l {idx_op})")?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Object)))
            }
        }
    }

    fn codegen_print(&mut self, items: &[PrintItem]) -> Result<(), CodeGenError> {
        let mut suppress_newline = false;
        for item in items {
            match item {
                PrintItem::Expr(e) => {
                    let (op, ty) = self.codegen_expr(e)?;
                    if ty.is_string() {
                        writeln!(self.output, "  call $print_string(l {op})")?;
                    } else if ty.is_float() {
                        let d = self.ensure_double(&op, &ty)?;
                        writeln!(self.output, "  call $print_double(d {d})")?;
                    } else {
                        let l = self.ensure_long(&op, &ty)?;
                        writeln!(self.output, "  call $print_int(l {l})")?;
                    }
                    suppress_newline = false;
                }
                PrintItem::Semicolon => suppress_newline = true,
                PrintItem::Comma => {
                    writeln!(self.output, "  call $print_tab()")?;
                    suppress_newline = true;
                }
            }
        }
        if !suppress_newline {
            writeln!(self.output, "  call $print_newline()")?;
        }
        Ok(())
    }

    /// Widen a `w` value to `l` (what every integer-taking runtime call
    /// expects); `s`/`d` pass through unchanged since no integer runtime
    /// call is ever handed a float operand.
    fn ensure_long(&mut self, op: &str, ty: &TypeDescriptor) -> Result<String, CodeGenError> {
        if ir_type(ty) != "w" {
            return Ok(op.to_string());
        }
        let dest = self.fresh_temp();
        let ext = if ty.is_unsigned() { "extuw" } else { "extsw" };
        writeln!(self.output, "  %{dest} =l {ext} {op}")?;
        Ok(format!("%{dest}"))
    }

    /// Convert a scalar operand to `d`, the type every float-taking
    /// runtime call expects.
    fn ensure_double(&mut self, op: &str, ty: &TypeDescriptor) -> Result<String, CodeGenError> {
        match ir_type(ty) {
            "d" => Ok(op.to_string()),
            "s" => {
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =d exts {op}")?;
                Ok(format!("%{dest}"))
            }
            "w" => {
                let dest = self.fresh_temp();
                let conv = if ty.is_unsigned() { "uwtof" } else { "swtof" };
                writeln!(self.output, "  %{dest} =d {conv} {op}")?;
                Ok(format!("%{dest}"))
            }
            _ => {
                let dest = self.fresh_temp();
                let conv = if ty.is_unsigned() { "ultof" } else { "sltof" };
                writeln!(self.output, "  %{dest} =d {conv} {op}")?;
                Ok(format!("%{dest}"))
            }
        }
    }

    fn codegen_input(
        &mut self,
        prompt: Option<&Expr>,
        target: &LValue,
        at: Option<&(Expr, Expr)>,
    ) -> Result<(), CodeGenError> {
        if let Some((row, col)) = at {
            let (r, _) = self.codegen_expr(row)?;
            let (c, _) = self.codegen_expr(col)?;
            writeln!(self.output, "  call $input_set_cursor(l {r}, l {c})")?;
        }
        if let Some(p) = prompt {
            let (op, ty) = self.codegen_expr(p)?;
            if ty.is_string() {
                writeln!(self.output, "  call $print_string(l {op})")?;
            } else {
                let d = self.ensure_double(&op, &ty)?;
                writeln!(self.output, "  call $print_double(d {d})")?;
            }
        }
        let target_ty = self.lvalue_type(target)?;
        let raw = self.fresh_temp();
        writeln!(self.output, "  %{raw} =l call $input_line()")?;
        if target_ty.is_string() {
            self.store_lvalue(target, &format!("%{raw}"))?;
        } else if target_ty.is_float() {
            let dest = self.fresh_temp();
            writeln!(self.output, "  %{dest} =d call $str_to_double(l %{raw})")?;
            self.store_lvalue(target, &format!("%{dest}"))?;
        } else {
            let dest = self.fresh_temp();
            writeln!(self.output, "  %{dest} =l call $str_to_int(l %{raw})")?;
            self.store_lvalue(target, &format!("%{dest}"))?;
        }
        Ok(())
    }

    fn codegen_call_discard(&mut self, name: &str, args: &[Expr]) -> Result<(), CodeGenError> {
        self.codegen_call(name, args)?;
        Ok(())
    }

    /// `ON expr CALL sub1, sub2, ...` — an inline equality-chain dispatch
    /// to a parameterless `SUB`, not a CFG terminator (control always
    /// resumes at the next statement).
    fn codegen_on_call(&mut self, selector: &Expr, targets: &[String]) -> Result<(), CodeGenError> {
        let (sel_op, sel_ty) = self.codegen_expr(selector)?;
        let sel = self.ensure_long(&sel_op, &sel_ty)?;
        let after = self.fresh_block_label("oncall_end");
        for (i, name) in targets.iter().enumerate() {
            let idx = i as i64 + 1;
            let hit = self.fresh_block_label("oncall_hit");
            let miss = self.fresh_block_label("oncall_miss");
            let cmp = self.fresh_temp();
            writeln!(self.output, "  %{cmp} =w ceql {sel}, {idx}")?;
            writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
            writeln!(self.output, "@{hit}")?;
            self.codegen_call_discard(name, &[])?;
            writeln!(self.output, "  jmp @{after}")?;
            writeln!(self.output, "@{miss}")?;
        }
        writeln!(self.output, "@{after}")?;
        Ok(())
    }

    fn codegen_restore(&mut self, target: Option<&GotoTarget>) -> Result<(), CodeGenError> {
        let idx = match target {
            None => 0,
            Some(GotoTarget::Number(n)) => *self
                .table
                .data
                .line_restore
                .get(n)
                .ok_or_else(|| format!("codegen: RESTORE has no DATA at line {n}"))?,
            Some(GotoTarget::Label(l)) => *self
                .table
                .data
                .label_restore
                .get(l)
                .ok_or_else(|| format!("codegen: RESTORE has no DATA at label {l}"))?,
        };
        writeln!(self.output, "  call $data_restore_line(l {idx})")?;
        Ok(())
    }

    fn codegen_read(&mut self, targets: &[LValue]) -> Result<(), CodeGenError> {
        for t in targets {
            let ty = self.lvalue_type(t)?;
            let dest = self.fresh_temp();
            if ty.is_string() {
                writeln!(self.output, "  %{dest} =l call $data_read_string()")?;
            } else if ty.is_float() {
                writeln!(self.output, "  %{dest} =d call $data_read_double()")?;
            } else {
                writeln!(self.output, "  %{dest} =l call $data_read_int()")?;
            }
            self.store_lvalue(t, &format!("%{dest}"))?;
        }
        Ok(())
    }

    /// Under SAMM, `DELETE` is a release-now hint, not an error — the
    /// runtime already owns the lifetime via refcounting. Without SAMM it
    /// is the program's only way to free a class instance.
    fn codegen_delete(&mut self, target: &LValue) -> Result<(), CodeGenError> {
        if self.table.options.samm {
            return Ok(());
        }
        let expr = lvalue_to_expr(target);
        let (op, ty) = self.codegen_expr(&expr)?;
        if is_refcounted(&ty) {
            writeln!(self.output, "  call $class_release(l {op})")?;
        }
        Ok(())
    }

    fn codegen_timer(&mut self, kind: TimerKind, duration: &Expr, handler: &str) -> Result<(), CodeGenError> {
        let idx = self
            .table
            .timer_handlers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(handler))
            .ok_or_else(|| format!("codegen: unregistered timer handler {handler}"))?;
        if matches!(kind, TimerKind::EveryFrame) {
            writeln!(self.output, "  call $timer_every_frame(w {idx})")?;
            return Ok(());
        }
        let (dur_op, dur_ty) = self.codegen_expr(duration)?;
        let dur = self.ensure_long(&dur_op, &dur_ty)?;
        let rt_fn = cfg::timer_runtime_fn(kind);
        writeln!(self.output, "  call ${rt_fn}(l {dur}, w {idx})")?;
        Ok(())
    }

    /// `FOR`'s init and increment are injected as plain `Assign` statements
    /// by the CFG builder (in `current` and the step block respectively),
    /// so this only has to emit the loop test itself.
    fn codegen_for_header(
        &mut self,
        var: &str,
        limit: &Expr,
        step: Option<&Expr>,
        body: BlockId,
        merge: BlockId,
    ) -> Result<(), CodeGenError> {
        let (var_op, var_ty) = self.load_variable(var)?;
        let (limit_op, _) = self.codegen_expr(limit)?;
        let descending = matches!(step, Some(Expr::Unary { op: UnaryOp::Neg, .. }))
            || matches!(step, Some(Expr::NumberLiteral(n)) if *n < 0.0);
        let op = if descending { CompareOp::Ge } else { CompareOp::Le };
        let mnemonic = super::expr::cmp_mnemonic(op, ir_type(&var_ty), !var_ty.is_unsigned(), var_ty.is_float());
        let cmp = self.fresh_temp();
        writeln!(self.output, "  %{cmp} =w {mnemonic} {var_op}, {limit_op}")?;
        let body_label = self.label_for(body);
        let merge_label = self.label_for(merge);
        writeln!(self.output, "  jnz %{cmp}, @{body_label}, @{merge_label}")?;
        Ok(())
    }

    /// Re-entered on both the loop's forward edge and its back-edge, so
    /// the iterator handle is created once (guarded by `started_slot`,
    /// pre-allocated in `@start`) and every visit just asks it for the
    /// next element.
    fn codegen_for_each_header(
        &mut self,
        header: BlockId,
        var: &str,
        type_tag_var: Option<&str>,
        collection: &Expr,
        body: BlockId,
        merge: BlockId,
    ) -> Result<(), CodeGenError> {
        let (iter_slot, started_slot) = self
            .foreach_slots
            .get(&header)
            .cloned()
            .ok_or_else(|| format!("codegen: missing FOR EACH slots for block {header}"))?;
        let new_label = self.fresh_block_label("feach_new");
        let test_label = self.fresh_block_label("feach_test");
        let started = self.fresh_temp();
        writeln!(self.output, "  %{started} =w loadw %{started_slot}")?;
        writeln!(self.output, "  jnz %{started}, @{test_label}, @{new_label}")?;

        writeln!(self.output, "@{new_label}")?;
        let (coll_op, _) = self.codegen_expr(collection)?;
        let iter = self.fresh_temp();
        writeln!(self.output, "  %{iter} =l call $list_iter_new(l {coll_op})")?;
        writeln!(self.output, "  storel %{iter}, %{iter_slot}")?;
        writeln!(self.output, "  storew 1, %{started_slot}")?;
        writeln!(self.output, "  jmp @{test_label}")?;

        writeln!(self.output, "@{test_label}")?;
        let iter_val = self.fresh_temp();
        writeln!(self.output, "  %{iter_val} =l loadl %{iter_slot}")?;
        let (elem_addr, _) = self.variable_address(var)?;
        let has_next = self.fresh_temp();
        writeln!(self.output, "  %{has_next} =w call $list_iter_next(l %{iter_val}, l {elem_addr})")?;
        if let Some(tag_var) = type_tag_var {
            let tag_val = self.fresh_temp();
            writeln!(self.output, "  %{tag_val} =w call $list_iter_tag(l %{iter_val})")?;
            let (tag_addr, tag_ty) = self.variable_address(tag_var)?;
            writeln!(self.output, "  store{t} %{tag_val}, {tag_addr}", t = ir_store_suffix(&tag_ty))?;
            self.current_type_tag = Some(tag_var.to_string());
        }
        let body_label = self.label_for(body);
        let merge_label = self.label_for(merge);
        writeln!(self.output, "  jnz %{has_next}, @{body_label}, @{merge_label}")?;
        Ok(())
    }

    fn codegen_switch(
        &mut self,
        discriminant: &Expr,
        arms: &[(Vec<CaseMatch>, BlockId)],
        default: BlockId,
    ) -> Result<(), CodeGenError> {
        let (disc_op, disc_ty) = self.codegen_expr(discriminant)?;
        for (matches, target) in arms {
            let hit = self.label_for(*target);
            for m in matches {
                let miss = self.fresh_block_label("case_miss");
                self.emit_case_test(m, &disc_op, &disc_ty, &hit, &miss)?;
                writeln!(self.output, "@{miss}")?;
            }
        }
        let default_label = self.label_for(default);
        writeln!(self.output, "  jmp @{default_label}")?;
        Ok(())
    }

    fn emit_case_test(
        &mut self,
        m: &CaseMatch,
        disc_op: &str,
        disc_ty: &TypeDescriptor,
        hit: &str,
        miss: &str,
    ) -> Result<(), CodeGenError> {
        let t = ir_type(disc_ty);
        let signed = !disc_ty.is_unsigned();
        let is_float = disc_ty.is_float();
        match m {
            CaseMatch::Value(e) => {
                let (v, _) = self.codegen_expr(e)?;
                let cmp = self.fresh_temp();
                let mnemonic = super::expr::cmp_mnemonic(CompareOp::Eq, t, signed, is_float);
                writeln!(self.output, "  %{cmp} =w {mnemonic} {disc_op}, {v}")?;
                writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
            }
            CaseMatch::Range(lo, hi) => {
                let (lo_op, _) = self.codegen_expr(lo)?;
                let (hi_op, _) = self.codegen_expr(hi)?;
                let ge = self.fresh_temp();
                writeln!(
                    self.output,
                    "  %{ge} =w {} {disc_op}, {lo_op}",
                    super::expr::cmp_mnemonic(CompareOp::Ge, t, signed, is_float)
                )?;
                let le = self.fresh_temp();
                writeln!(
                    self.output,
                    "  %{le} =w {} {disc_op}, {hi_op}",
                    super::expr::cmp_mnemonic(CompareOp::Le, t, signed, is_float)
                )?;
                let both = self.fresh_temp();
                writeln!(self.output, "  %{both} =w and %{ge}, %{le}")?;
                writeln!(self.output, "  jnz %{both}, @{hit}, @{miss}")?;
            }
            CaseMatch::RelOp(op, e) => {
                let (v, _) = self.codegen_expr(e)?;
                let cmp = self.fresh_temp();
                let mnemonic = super::expr::cmp_mnemonic(*op, t, signed, is_float);
                writeln!(self.output, "  %{cmp} =w {mnemonic} {disc_op}, {v}")?;
                writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
            }
        }
        Ok(())
    }

    fn codegen_match_type(
        &mut self,
        discriminant: &Expr,
        arms: &[(String, String, BlockId)],
        default: BlockId,
    ) -> Result<(), CodeGenError> {
        let (disc_op, _) = self.codegen_expr(discriminant)?;
        for (bound_type, binding, target) in arms {
            let hit = self.label_for(*target);
            let miss = self.fresh_block_label("mt_miss");
            self.codegen_match_type_arm(bound_type, binding, &disc_op, &hit, &miss)?;
            writeln!(self.output, "@{miss}")?;
        }
        let default_label = self.label_for(default);
        writeln!(self.output, "  jmp @{default_label}")?;
        Ok(())
    }

    /// Tests `disc_op` against `bound_type`: through the FOR EACH-bound
    /// type tag when one is in scope (`current_type_tag`), via
    /// `class_is_instance` otherwise. Either way, on a hit `binding` is
    /// bound to `disc_op` before jumping into the arm's body block.
    fn codegen_match_type_arm(
        &mut self,
        bound_type: &str,
        binding: &str,
        disc_op: &str,
        hit: &str,
        miss: &str,
    ) -> Result<(), CodeGenError> {
        let cmp = self.fresh_temp();
        if let Some(tag_var) = self.current_type_tag.clone() {
            let (tag_op, _) = self.load_variable(&tag_var)?;
            let tag_id = self.match_type_tag_operand(bound_type);
            writeln!(self.output, "  %{cmp} =w ceqw {tag_op}, {tag_id}")?;
        } else if let Some(class) = self.table.classes.get(bound_type) {
            let class_id = class.class_id;
            writeln!(self.output, "  %{cmp} =w call $class_is_instance(l {disc_op}, w {class_id})")?;
        } else {
            writeln!(self.output, "  %{cmp} =w copy 1")?;
        }
        let bind_label = self.fresh_block_label("mt_bind");
        writeln!(self.output, "  jnz %{cmp}, @{bind_label}, @{miss}")?;
        writeln!(self.output, "@{bind_label}")?;
        let (addr, bind_ty) = self.variable_address(binding)?;
        writeln!(self.output, "  store{t} {disc_op}, {addr}", t = ir_store_suffix(&bind_ty))?;
        writeln!(self.output, "  jmp @{hit}")?;
        Ok(())
    }

    /// Encoding shared with `list_iter_tag`: 1-7 for the scalar base
    /// types, `100 + class_id` for a concrete class.
    fn match_type_tag_operand(&self, bound_type: &str) -> i64 {
        match bound_type.to_ascii_uppercase().as_str() {
            "INTEGER" => 1,
            "LONG" => 2,
            "SINGLE" => 3,
            "DOUBLE" => 4,
            "STRING" => 5,
            "LIST" => 6,
            "OBJECT" => 7,
            _ => self
                .table
                .classes
                .get(bound_type)
                .map(|c| 100 + c.class_id as i64)
                .unwrap_or(0),
        }
    }

    /// `try_enter`/a synthesized landing block stand in for real non-local
    /// unwinding, which belongs to the external runtime/backend: this
    /// emits the protected region's entry and a catch dispatcher reachable
    /// by label, but nothing in this IR actually transfers control to the
    /// landing block on a thrown error — that jump is the runtime's to
    /// make. `try_leave` is consequently never reachable from here and is
    /// not emitted; the body's normal exit already flows into `finally`/
    /// `after` via the CFG's own `Jump` wiring.
    fn codegen_try_region(
        &mut self,
        body: BlockId,
        catches: &[(CatchClause, BlockId)],
        finally: Option<BlockId>,
        after: BlockId,
    ) -> Result<(), CodeGenError> {
        writeln!(self.output, "  call $try_enter(l {body})")?;
        let body_label = self.label_for(body);
        writeln!(self.output, "  jmp @{body_label}")?;

        let landing = self.fresh_block_label("try_landing");
        writeln!(self.output, "@{landing}")?;
        let err = self.fresh_temp();
        writeln!(self.output, "  %{err} =l call $runtime_get_err()")?;
        let mut catch_all: Option<BlockId> = None;
        for (clause, target) in catches {
            if clause.codes.is_empty() {
                catch_all = Some(*target);
                continue;
            }
            let hit = self.label_for(*target);
            for code in &clause.codes {
                let cmp = self.fresh_temp();
                writeln!(self.output, "  %{cmp} =w ceql %{err}, {code}")?;
                let miss = self.fresh_block_label("catch_miss");
                writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
                writeln!(self.output, "@{miss}")?;
            }
        }
        let fallback = finally.unwrap_or(after);
        let fallback_label = catch_all.map(|t| self.label_for(t)).unwrap_or_else(|| self.label_for(fallback));
        writeln!(self.output, "  jmp @{fallback_label}")?;
        Ok(())
    }

    fn emit_gosub_tag(&mut self, target: BlockId) -> Result<(), CodeGenError> {
        let slot = self
            .gosub_slot
            .clone()
            .ok_or_else(|| "codegen: GOSUB without an allocated dispatch slot".to_string())?;
        let counter = self.gosub_target_counter.entry(target).or_insert(0);
        let id = *counter;
        *counter += 1;
        writeln!(self.output, "  storew {id}, %{slot}")?;
        Ok(())
    }

    /// Selector out of `[1, targets.len()]` has no designated CFG
    /// successor (BASIC falls through to the next statement, which this
    /// CFG model doesn't represent for `ON...GOTO/GOSUB`), so it raises a
    /// runtime error instead.
    fn codegen_on_goto(&mut self, selector: &Expr, targets: &[BlockId], is_gosub: bool) -> Result<(), CodeGenError> {
        let (sel_op, sel_ty) = self.codegen_expr(selector)?;
        let sel = self.ensure_long(&sel_op, &sel_ty)?;
        for (i, target) in targets.iter().enumerate() {
            let idx = i as i64 + 1;
            let hit = self.fresh_block_label("ongoto_hit");
            let miss = self.fresh_block_label("ongoto_miss");
            let cmp = self.fresh_temp();
            writeln!(self.output, "  %{cmp} =w ceql {sel}, {idx}")?;
            writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
            writeln!(self.output, "@{hit}")?;
            if is_gosub {
                self.emit_gosub_tag(*target)?;
            }
            self.emit_jump(*target)?;
            writeln!(self.output, "@{miss}")?;
        }
        writeln!(self.output, "  call $runtime_throw(l 10)")?;
        Ok(())
    }

    fn codegen_return(&mut self, block: &BasicBlock, value: Option<&Expr>) -> Result<(), CodeGenError> {
        if !block.successors.is_empty() {
            let slot = self
                .gosub_slot
                .clone()
                .ok_or_else(|| "codegen: GOSUB return with no dispatch slot".to_string())?;
            let id = self.fresh_temp();
            writeln!(self.output, "  %{id} =w loadw %{slot}")?;
            let last = block.successors.len() - 1;
            for (i, succ) in block.successors.iter().enumerate() {
                if i == last {
                    self.emit_jump(*succ)?;
                    break;
                }
                let cmp = self.fresh_temp();
                writeln!(self.output, "  %{cmp} =w ceqw %{id}, {i}")?;
                let hit = self.label_for(*succ);
                let miss = self.fresh_block_label("gosub_ret_miss");
                writeln!(self.output, "  jnz %{cmp}, @{hit}, @{miss}")?;
                writeln!(self.output, "@{miss}")?;
            }
            return Ok(());
        }
        match value {
            Some(e) => {
                let (op, _) = self.codegen_expr(e)?;
                writeln!(self.output, "  ret {op}")?;
            }
            None => writeln!(self.output, "  ret")?,
        }
        Ok(())
    }
}

fn lvalue_to_expr(lv: &LValue) -> Expr {
    match lv {
        LValue::Variable(name) => Expr::Variable(name.clone()),
        LValue::ArrayElement { name, indices } => Expr::ArrayAccess {
            name: name.clone(),
            indices: indices.clone(),
        },
        LValue::Field { base, field } => Expr::FieldAccess {
            base: Box::new(lvalue_to_expr(base)),
            field: field.clone(),
        },
        LValue::Index { base, index } => Expr::Index {
            base: base.clone(),
            index: index.clone(),
        },
    }
}

fn is_refcounted(ty: &TypeDescriptor) -> bool {
    ty.is_class_instance()
}

/// Whether this routine's body contains a `GOSUB`/`ON...GOSUB`, and so
/// needs a dispatch slot pre-allocated in `@start`.
pub(super) fn needs_gosub_slot(cfg: &Cfg) -> bool {
    cfg.blocks.iter().any(|b| {
        matches!(b.terminator, Terminator::Gosub { .. })
            || matches!(&b.terminator, Terminator::OnGoto { is_gosub: true, .. })
    })
}

/// Every `FOR EACH` header block, each of which needs its own iterator
/// handle + "already started" slot pair pre-allocated in `@start`.
pub(super) fn foreach_header_ids(cfg: &Cfg) -> Vec<BlockId> {
    cfg.blocks
        .iter()
        .filter(|b| matches!(b.terminator, Terminator::ForEachHeader { .. }))
        .map(|b| b.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_gosub_slot_detects_gosub_terminator() {
        let cfg = Cfg {
            blocks: vec![BasicBlock {
                id: 0,
                statements: vec![],
                terminator: Terminator::Gosub { target: 1, resume: 2 },
                predecessors: vec![],
                successors: vec![1, 2],
            }],
            entry: 0,
        };
        assert!(needs_gosub_slot(&cfg));
    }

    #[test]
    fn needs_gosub_slot_false_without_one() {
        let cfg = Cfg {
            blocks: vec![BasicBlock {
                id: 0,
                statements: vec![],
                terminator: Terminator::ImplicitReturn,
                predecessors: vec![],
                successors: vec![],
            }],
            entry: 0,
        };
        assert!(!needs_gosub_slot(&cfg));
    }

    #[test]
    fn foreach_header_ids_collects_matching_blocks() {
        let cfg = Cfg {
            blocks: vec![
                BasicBlock {
                    id: 0,
                    statements: vec![],
                    terminator: Terminator::ForEachHeader {
                        var: "X".to_string(),
                        type_tag_var: None,
                        collection: Expr::Variable("L".to_string()),
                        body: 1,
                        merge: 2,
                    },
                    predecessors: vec![],
                    successors: vec![1, 2],
                },
                BasicBlock {
                    id: 1,
                    statements: vec![],
                    terminator: Terminator::ImplicitReturn,
                    predecessors: vec![0],
                    successors: vec![],
                },
            ],
            entry: 0,
        };
        assert_eq!(foreach_header_ids(&cfg), vec![0]);
    }

    #[test]
    fn lvalue_to_expr_preserves_field_chain() {
        let lv = LValue::Field {
            base: Box::new(LValue::Variable("REC".to_string())),
            field: "NAME".to_string(),
        };
        match lvalue_to_expr(&lv) {
            Expr::FieldAccess { base, field } => {
                assert_eq!(field, "NAME");
                assert!(matches!(*base, Expr::Variable(n) if n == "REC"));
            }
            other => panic!("unexpected lowering: {other:?}"),
        }
    }

    #[test]
    fn is_refcounted_true_for_class_instance() {
        assert!(is_refcounted(&TypeDescriptor::class("Dog".to_string())));
        assert!(!is_refcounted(&TypeDescriptor::simple(BaseType::Integer)));
    }
}
