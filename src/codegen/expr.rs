//! Expression lowering.
//!
//! Every call returns an operand string ready to drop straight into the
//! next instruction — either a fresh SSA temp (`%tN`) or, for literals,
//! an immediate QBE constant (`42`, `d_3.14`) or a global address (`$strN`)
//! — plus the `TypeDescriptor` the caller needs to pick the right opcode
//! suffix for whatever it does next.

use std::fmt::Write as _;

use super::{ir_store_suffix, ir_type, CodeGen, CodeGenError, Storage};
use crate::ast::{BinOp, CompareOp, Expr, UnaryOp};
use crate::types::{BaseType, TypeDescriptor};

impl<'a> CodeGen<'a> {
    pub(super) fn codegen_expr(&mut self, expr: &Expr) -> Result<(String, TypeDescriptor), CodeGenError> {
        match expr {
            Expr::NumberLiteral(n) => {
                let ty = TypeDescriptor::simple(BaseType::Double);
                Ok((format!("d_{n}"), ty))
            }
            Expr::StringLiteral(s) => {
                let symbol = self
                    .string_table
                    .get(s)
                    .cloned()
                    .ok_or_else(|| format!("string literal not interned: {s}"))?;
                Ok((format!("${symbol}"), TypeDescriptor::simple(BaseType::String)))
            }
            Expr::Variable(name) => self.load_variable(name),
            Expr::ArrayAccess { name, indices } => self.codegen_array_access(name, indices),
            Expr::FieldAccess { base, field } => self.codegen_field_access(base, field),
            Expr::Index { base, index } => {
                let (base_op, _) = self.codegen_expr(base)?;
                let (idx_op, _) = self.codegen_expr(index)?;
                let dest = self.fresh_temp();
                writeln!(
                    self.output,
                    "  %{dest} =l call $list_get(l {base_op}, l {idx_op})"
                )?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Object)))
            }
            Expr::Unary { op, expr } => self.codegen_unary(*op, expr),
            Expr::Binary { op, lhs, rhs } => self.codegen_binary(*op, lhs, rhs),
            Expr::Compare { op, lhs, rhs } => self.codegen_compare(*op, lhs, rhs),
            Expr::Call { name, args } => self.codegen_call(name, args),
            Expr::MethodCall { base, method, args } => self.codegen_method_call(base, method, args),
            Expr::SuperCall { method, args } => self.codegen_super_call(method, args),
            Expr::New { class_name, args } => self.codegen_new(class_name, args),
            Expr::IsNothing(inner) => {
                let (op, _) = self.codegen_expr(inner)?;
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =w ceql {op}, 0")?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)))
            }
            Expr::IsClass { expr, class_name } => {
                let (op, _) = self.codegen_expr(expr)?;
                let class_id = self
                    .table
                    .classes
                    .get(class_name)
                    .map(|c| c.class_id)
                    .ok_or_else(|| format!("unknown class {class_name}"))?;
                let dest = self.fresh_temp();
                writeln!(
                    self.output,
                    "  %{dest} =w call $class_is_instance(l {op}, w {class_id})"
                )?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)))
            }
            Expr::Nothing => Ok(("0".to_string(), TypeDescriptor::simple(BaseType::Object))),
        }
    }

    pub(super) fn load_variable(&mut self, name: &str) -> Result<(String, TypeDescriptor), CodeGenError> {
        let upper = name.to_ascii_uppercase();
        let (storage, ty) = self
            .vars
            .get(&upper)
            .cloned()
            .ok_or_else(|| format!("codegen: unresolved variable {name}"))?;
        let dest = self.fresh_temp();
        let t = ir_type(&ty);
        match storage {
            Storage::Local(slot) => writeln!(self.output, "  %{dest} ={t} load{t} %{slot}")?,
            Storage::Global(sym) => writeln!(self.output, "  %{dest} ={t} load{t} $g_{sym}")?,
        }
        Ok((format!("%{dest}"), ty))
    }

    /// The address of a variable's stack slot (or global symbol), without
    /// loading its value — used by `Assign` and by field/array addressing.
    pub(super) fn variable_address(&mut self, name: &str) -> Result<(String, TypeDescriptor), CodeGenError> {
        let upper = name.to_ascii_uppercase();
        let (storage, ty) = self
            .vars
            .get(&upper)
            .cloned()
            .ok_or_else(|| format!("codegen: unresolved variable {name}"))?;
        let addr = match storage {
            Storage::Local(slot) => format!("%{slot}"),
            Storage::Global(sym) => format!("$g_{sym}"),
        };
        Ok((addr, ty))
    }

    fn codegen_array_access(
        &mut self,
        name: &str,
        indices: &[Expr],
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
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
            // Dynamic shape: the slot holds a runtime array handle, not the
            // backing storage itself, so load the handle before dispatching
            // through the runtime descriptor.
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
            writeln!(
                self.output,
                "  %{dest} =l call $array_get(l %{handle}, l {flat_index})"
            )?;
            return Ok((format!("%{dest}"), elem_ty));
        }
        let elem_size = (elem_ty.bit_width() / 8).max(1);
        let offset = self.flat_offset(&dims, indices, elem_size)?;
        let addr = self.fresh_temp();
        writeln!(self.output, "  %{addr} =l add {base}, {offset}")?;
        let dest = self.fresh_temp();
        let t = ir_type(&elem_ty);
        writeln!(self.output, "  %{dest} ={t} load{t} %{addr}")?;
        Ok((format!("%{dest}"), elem_ty))
    }

    /// Mirror of `codegen_array_access`, writing `value_op` into the
    /// element instead of loading it.
    pub(super) fn codegen_array_store(
        &mut self,
        name: &str,
        indices: &[Expr],
        value_op: &str,
    ) -> Result<(), CodeGenError> {
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
            writeln!(
                self.output,
                "  call $array_set(l %{handle}, l {flat_index}, l {value_op})"
            )?;
            return Ok(());
        }
        let elem_size = (elem_ty.bit_width() / 8).max(1);
        let offset = self.flat_offset(&dims, indices, elem_size)?;
        let addr = self.fresh_temp();
        writeln!(self.output, "  %{addr} =l add {base}, {offset}")?;
        let t = ir_store_suffix(&elem_ty);
        writeln!(self.output, "  store{t} {value_op}, %{addr}")?;
        Ok(())
    }

    /// Byte offset of a statically-shaped array element: row-major strides
    /// over `dims`, each index multiplied by `elem_size` and the product
    /// of the remaining dimensions.
    pub(super) fn flat_offset(
        &mut self,
        dims: &[Option<u32>],
        indices: &[Expr],
        elem_size: u32,
    ) -> Result<String, CodeGenError> {
        let mut offset = "0".to_string();
        for (i, idx_expr) in indices.iter().enumerate() {
            let (idx_op, _) = self.codegen_expr(idx_expr)?;
            let stride: u32 = dims[i + 1..].iter().map(|d| d.unwrap_or(1)).product::<u32>() * elem_size;
            let scaled = self.fresh_temp();
            writeln!(self.output, "  %{scaled} =l mul {idx_op}, {stride}")?;
            let sum = self.fresh_temp();
            writeln!(self.output, "  %{sum} =l add {offset}, %{scaled}")?;
            offset = format!("%{sum}");
        }
        Ok(offset)
    }

    fn codegen_field_access(
        &mut self,
        base: &Expr,
        field: &str,
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        let (base_addr, base_ty) = self.field_base_address(base)?;
        let (offset, field_ty) = self.field_offset(&base_ty, field)?;
        let addr = self.fresh_temp();
        writeln!(self.output, "  %{addr} =l add {base_addr}, {offset}")?;
        let dest = self.fresh_temp();
        let t = ir_type(&field_ty);
        writeln!(self.output, "  %{dest} ={t} load{t} %{addr}")?;
        Ok((format!("%{dest}"), field_ty))
    }

    /// UDT values live inline in their owning slot, so a field access on a
    /// bare variable needs the slot's *address*, not its loaded value;
    /// anything else (a nested field, a `NEW` result) is already a pointer.
    pub(super) fn field_base_address(&mut self, base: &Expr) -> Result<(String, TypeDescriptor), CodeGenError> {
        match base {
            Expr::Variable(name) => self.variable_address(name),
            other => self.codegen_expr(other),
        }
    }

    pub(super) fn field_offset(&self, base_ty: &TypeDescriptor, field: &str) -> Result<(u32, TypeDescriptor), CodeGenError> {
        if let Some(udt_name) = &base_ty.udt_name {
            let udt = self
                .table
                .udts
                .get(udt_name)
                .ok_or_else(|| format!("unknown UDT {udt_name}"))?;
            let mut offset = 0u32;
            for (fname, fty) in &udt.fields {
                if fname.eq_ignore_ascii_case(field) {
                    return Ok((offset, fty.clone()));
                }
                offset += (fty.bit_width() / 8).max(1);
            }
            return Err(format!("unknown field {field} on {udt_name}").into());
        }
        if let Some(class_name) = &base_ty.class_name {
            let class = self
                .table
                .classes
                .get(class_name)
                .ok_or_else(|| format!("unknown class {class_name}"))?;
            let layout = class
                .find_field(field)
                .ok_or_else(|| format!("unknown field {field} on {class_name}"))?;
            return Ok((layout.offset, layout.ty.clone()));
        }
        Err(format!("field access on non-aggregate type {base_ty}").into())
    }

    fn codegen_unary(&mut self, op: UnaryOp, expr: &Expr) -> Result<(String, TypeDescriptor), CodeGenError> {
        let (val, ty) = self.codegen_expr(expr)?;
        let t = ir_type(&ty);
        match op {
            UnaryOp::Plus => Ok((val, ty)),
            UnaryOp::Neg => {
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} ={t} neg {val}")?;
                Ok((format!("%{dest}"), ty))
            }
            UnaryOp::Not => {
                let dest = self.fresh_temp();
                if self.table.options.overflow_mode == crate::options::OverflowMode::Bitwise {
                    writeln!(self.output, "  %{dest} ={t} xor {val}, -1")?;
                } else {
                    let cmp = self.fresh_temp();
                    writeln!(self.output, "  %{cmp} =w ceq{t} {val}, 0")?;
                    writeln!(self.output, "  %{dest} =w sub 0, %{cmp}")?;
                }
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)))
            }
        }
    }

    fn codegen_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        if matches!(op, BinOp::Add)
            && matches!(self.static_type(lhs), Some(t) if t.is_string())
        {
            let (l, _) = self.codegen_expr(lhs)?;
            let (r, _) = self.codegen_expr(rhs)?;
            let dest = self.fresh_temp();
            writeln!(self.output, "  %{dest} =l call $str_concat(l {l}, l {r})")?;
            return Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::String)));
        }
        let (l, lty) = self.codegen_expr(lhs)?;
        let (r, rty) = self.codegen_expr(rhs)?;
        let result_ty = wider(&lty, &rty);
        let t = ir_type(&result_ty);
        let dest = self.fresh_temp();
        let mnemonic = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::IntDiv => if result_ty.is_unsigned() { "udiv" } else { "div" },
            BinOp::Mod => if result_ty.is_unsigned() { "urem" } else { "rem" },
            BinOp::Pow => "call $math_pow",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Imp => "or",
            BinOp::Eqv => "xor",
        };
        if matches!(op, BinOp::Pow) {
            writeln!(self.output, "  %{dest} =d call $math_pow(d {l}, d {r})")?;
            return Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Double)));
        }
        writeln!(self.output, "  %{dest} ={t} {mnemonic} {l}, {r}")?;
        Ok((format!("%{dest}"), result_ty))
    }

    fn codegen_compare(
        &mut self,
        op: CompareOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        if matches!(self.static_type(lhs), Some(t) if t.is_string()) {
            let (l, _) = self.codegen_expr(lhs)?;
            let (r, _) = self.codegen_expr(rhs)?;
            let cmp = self.fresh_temp();
            writeln!(self.output, "  %{cmp} =w call $str_compare(l {l}, l {r})")?;
            let dest = self.fresh_temp();
            writeln!(self.output, "  %{dest} =w {} %{cmp}, 0", cmp_mnemonic(op, "w", true, false))?;
            return Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)));
        }
        let (l, lty) = self.codegen_expr(lhs)?;
        let (r, _) = self.codegen_expr(rhs)?;
        let t = ir_type(&lty);
        let dest = self.fresh_temp();
        writeln!(
            self.output,
            "  %{dest} =w {} {l}, {r}",
            cmp_mnemonic(op, t, !lty.is_unsigned(), lty.is_float())
        )?;
        Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)))
    }

    /// A shallow, purely-syntactic type guess good enough to pick string
    /// vs. numeric opcodes without re-running the full semantic pass;
    /// used only to choose `+`/comparison lowering.
    fn static_type(&self, expr: &Expr) -> Option<TypeDescriptor> {
        match expr {
            Expr::StringLiteral(_) => Some(TypeDescriptor::simple(BaseType::String)),
            Expr::Variable(name) => self.vars.get(&name.to_ascii_uppercase()).map(|(_, t)| t.clone()),
            Expr::Binary { op: BinOp::Add, lhs, .. } => self.static_type(lhs),
            _ => None,
        }
    }

    pub(super) fn codegen_call(&mut self, name: &str, args: &[Expr]) -> Result<(String, TypeDescriptor), CodeGenError> {
        let upper = name.to_ascii_uppercase();
        if let Some(builtin) = builtin_runtime_call(&upper) {
            let mut ops = Vec::with_capacity(args.len());
            for a in args {
                ops.push(self.codegen_expr(a)?);
            }
            let dest = self.fresh_temp();
            let arglist = ops
                .iter()
                .map(|(op, ty)| format!("{} {}", ir_type(ty), op))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(self.output, "  %{dest} ={ret_ty} call ${builtin}({arglist})", ret_ty = builtin_ret_type(&upper))?;
            return Ok((format!("%{dest}"), builtin_ret_descriptor(&upper)));
        }
        let sig = self
            .table
            .routines
            .get(&upper)
            .cloned()
            .ok_or_else(|| format!("unknown routine {name}"))?;
        let mut ops = Vec::with_capacity(args.len());
        for a in args {
            ops.push(self.codegen_expr(a)?);
        }
        let dest = self.fresh_temp();
        let ret_ty = sig.return_type.as_ref().map(ir_type).unwrap_or("w");
        let arglist = ops
            .iter()
            .map(|(op, ty)| format!("{} {}", ir_type(ty), op))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            self.output,
            "  %{dest} ={ret_ty} call ${}({arglist})",
            name.to_ascii_lowercase()
        )?;
        Ok((
            format!("%{dest}"),
            sig.return_type.unwrap_or(TypeDescriptor::simple(BaseType::Double)),
        ))
    }

    fn codegen_method_call(
        &mut self,
        base: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        let (this_op, this_ty) = self.codegen_expr(base)?;
        if this_ty.base == BaseType::Object {
            return self.codegen_container_method(&this_op, &this_ty, method, args);
        }
        let class_name = this_ty
            .class_name
            .clone()
            .ok_or_else(|| format!("method call {method} on non-class expression"))?;
        let class = self
            .table
            .classes
            .get(&class_name)
            .ok_or_else(|| format!("unknown class {class_name}"))?;
        let slot = class
            .find_method(method)
            .ok_or_else(|| format!("unknown method {method} on {class_name}"))?;
        let vtable_ptr = self.fresh_temp();
        writeln!(self.output, "  %{vtable_ptr} =l loadl {this_op}")?;
        let slot_addr = self.fresh_temp();
        writeln!(
            self.output,
            "  %{slot_addr} =l add %{vtable_ptr}, {}",
            slot.vtable_index * 8
        )?;
        let fn_ptr = self.fresh_temp();
        writeln!(self.output, "  %{fn_ptr} =l loadl %{slot_addr}")?;
        let mut ops = vec![(this_op, this_ty)];
        for a in args {
            ops.push(self.codegen_expr(a)?);
        }
        let dest = self.fresh_temp();
        let ret_ty = slot.return_type.as_ref().map(ir_type).unwrap_or("w");
        let arglist = ops
            .iter()
            .map(|(op, ty)| format!("{} {}", ir_type(ty), op))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(self.output, "  %{dest} ={ret_ty} call %{fn_ptr}({arglist})")?;
        Ok((
            format!("%{dest}"),
            slot.return_type.clone().unwrap_or(TypeDescriptor::simple(BaseType::Double)),
        ))
    }

    /// List/hashmap built-ins (`.APPEND`, `.GET`, `.HASKEY`, ...) aren't
    /// class methods — spec.md §6 wires them straight to the runtime's
    /// `list_*`/`hashmap_*` entry points rather than through a vtable.
    fn codegen_container_method(
        &mut self,
        this_op: &str,
        this_ty: &TypeDescriptor,
        method: &str,
        args: &[Expr],
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        let mut arg_ops = Vec::with_capacity(args.len());
        for a in args {
            arg_ops.push(self.codegen_expr(a)?.0);
        }
        let is_hashmap = this_ty.object_type_name.as_deref() == Some("HASHMAP");
        let elem_ty = this_ty
            .list_element
            .as_deref()
            .cloned()
            .unwrap_or_else(|| TypeDescriptor::simple(BaseType::Object));
        match method.to_ascii_uppercase().as_str() {
            "APPEND" => {
                let val = arg_ops.first().ok_or_else(|| "APPEND requires one argument".to_string())?;
                writeln!(self.output, "  call $list_append(l {this_op}, l {val})")?;
                Ok(("0".to_string(), TypeDescriptor::simple(BaseType::Void)))
            }
            "PREPEND" => {
                let val = arg_ops.first().ok_or_else(|| "PREPEND requires one argument".to_string())?;
                writeln!(self.output, "  call $list_prepend(l {this_op}, l {val})")?;
                Ok(("0".to_string(), TypeDescriptor::simple(BaseType::Void)))
            }
            "LENGTH" => {
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $list_length(l {this_op})")?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Long)))
            }
            "HEAD" => {
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $list_head(l {this_op})")?;
                Ok((format!("%{dest}"), elem_ty))
            }
            "TAIL" => {
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $list_tail(l {this_op})")?;
                Ok((format!("%{dest}"), this_ty.clone()))
            }
            "GET" if is_hashmap => {
                let key = arg_ops.first().ok_or_else(|| "GET requires a key argument".to_string())?;
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $hashmap_get(l {this_op}, l {key})")?;
                Ok((format!("%{dest}"), elem_ty))
            }
            "GET" => {
                let idx = arg_ops.first().ok_or_else(|| "GET requires an index argument".to_string())?;
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =l call $list_get(l {this_op}, l {idx})")?;
                Ok((format!("%{dest}"), elem_ty))
            }
            "SET" if is_hashmap => {
                let key = arg_ops.first().ok_or_else(|| "SET requires a key argument".to_string())?;
                let val = arg_ops.get(1).ok_or_else(|| "SET requires a value argument".to_string())?;
                writeln!(self.output, "  call $hashmap_set(l {this_op}, l {key}, l {val})")?;
                Ok(("0".to_string(), TypeDescriptor::simple(BaseType::Void)))
            }
            "SET" => {
                let idx = arg_ops.first().ok_or_else(|| "SET requires an index argument".to_string())?;
                let val = arg_ops.get(1).ok_or_else(|| "SET requires a value argument".to_string())?;
                writeln!(self.output, "  call $list_set(l {this_op}, l {idx}, l {val})")?;
                Ok(("0".to_string(), TypeDescriptor::simple(BaseType::Void)))
            }
            "HASKEY" => {
                let key = arg_ops.first().ok_or_else(|| "HASKEY requires a key argument".to_string())?;
                let dest = self.fresh_temp();
                writeln!(self.output, "  %{dest} =w call $hashmap_haskey(l {this_op}, l {key})")?;
                Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Integer)))
            }
            other => Err(format!("unknown container method `{other}`").into()),
        }
    }

    /// `SUPER.Method()` bypasses the vtable: it calls the parent's mangled
    /// name directly, per spec.md §9.
    fn codegen_super_call(
        &mut self,
        method: &str,
        args: &[Expr],
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        let class_name = self
            .current_function
            .as_deref()
            .and_then(|f| f.split("__").next())
            .ok_or_else(|| "SUPER used outside a method body".to_string())?
            .to_string();
        let class = self
            .table
            .classes
            .get(&class_name)
            .ok_or_else(|| format!("unknown class {class_name}"))?;
        let parent_name = class
            .parent
            .clone()
            .ok_or_else(|| format!("{class_name} has no parent for SUPER"))?;
        let (this_op, _) = self.variable_address("THIS")?;
        let this_val = self.fresh_temp();
        writeln!(self.output, "  %{this_val} =l loadl {this_op}")?;
        let mut ops = vec![(format!("%{this_val}"), TypeDescriptor::class(class_name.clone()))];
        for a in args {
            ops.push(self.codegen_expr(a)?);
        }
        let dest = self.fresh_temp();
        let mangled = super::runtime::mangle_method(&parent_name, method);
        let arglist = ops
            .iter()
            .map(|(op, ty)| format!("{} {}", ir_type(ty), op))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(self.output, "  %{dest} =l call ${mangled}({arglist})")?;
        Ok((format!("%{dest}"), TypeDescriptor::simple(BaseType::Double)))
    }

    fn codegen_new(&mut self, class_name: &str, args: &[Expr]) -> Result<(String, TypeDescriptor), CodeGenError> {
        let class = self
            .table
            .classes
            .get(class_name)
            .ok_or_else(|| format!("unknown class {class_name}"))?;
        let class_id = class.class_id;
        let size = class.instance_size;
        let dest = self.fresh_temp();
        writeln!(
            self.output,
            "  %{dest} =l call $class_new(w {class_id}, l {size})"
        )?;
        if class.has_constructor {
            let mut ops = vec![(format!("%{dest}"), TypeDescriptor::class(class_name.to_string()))];
            for a in args {
                ops.push(self.codegen_expr(a)?);
            }
            let arglist = ops
                .iter()
                .map(|(op, ty)| format!("{} {}", ir_type(ty), op))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                self.output,
                "  call ${}__CONSTRUCTOR({arglist})",
                class_name.to_ascii_uppercase()
            )?;
        }
        Ok((format!("%{dest}"), TypeDescriptor::class(class_name.to_string())))
    }
}

fn wider(a: &TypeDescriptor, b: &TypeDescriptor) -> TypeDescriptor {
    if a.bit_width() >= b.bit_width() {
        a.clone()
    } else {
        b.clone()
    }
}

pub(super) fn cmp_mnemonic(op: CompareOp, ty: &str, signed: bool, is_float: bool) -> String {
    let base = match op {
        CompareOp::Eq => "eq",
        CompareOp::Ne => "ne",
        CompareOp::Lt => if is_float { "lt" } else if signed { "slt" } else { "ult" },
        CompareOp::Le => if is_float { "le" } else if signed { "sle" } else { "ule" },
        CompareOp::Gt => if is_float { "gt" } else if signed { "sgt" } else { "ugt" },
        CompareOp::Ge => if is_float { "ge" } else if signed { "sge" } else { "uge" },
    };
    format!("c{base}{ty}")
}

/// Built-in library functions the constant evaluator also knows about
/// (spec.md §4.4), lowered here to direct runtime math calls when they
/// survive to codegen un-folded.
fn builtin_runtime_call(name: &str) -> Option<&'static str> {
    Some(match name {
        "ABS" => "math_abs",
        "SIN" => "math_sin",
        "COS" => "math_cos",
        "TAN" => "math_tan",
        "ATN" => "math_atan",
        "SQR" => "math_sqrt",
        "LOG" => "math_log",
        "EXP" => "math_exp",
        "INT" | "FIX" => "math_trunc",
        "SGN" => "math_sign",
        "CINT" | "CLNG" => "double_to_int",
        "CSNG" | "CDBL" => "int_to_double",
        "LEN" => "str_length",
        "LEFT$" => "str_left",
        "RIGHT$" => "str_right",
        "MID$" => "str_substr",
        "CHR$" => "chr_to_str",
        "STR$" => "double_to_str",
        "VAL" => "str_to_double",
        "MIN" => "math_min",
        "MAX" => "math_max",
        "RND" => "rnd",
        _ => return None,
    })
}

fn builtin_ret_type(name: &str) -> &'static str {
    match name {
        "LEN" | "CINT" | "CLNG" => "l",
        "LEFT$" | "RIGHT$" | "MID$" | "CHR$" | "STR$" => "l",
        "CSNG" => "s",
        "CDBL" | "VAL" | "RND" => "d",
        _ => "d",
    }
}

fn builtin_ret_descriptor(name: &str) -> TypeDescriptor {
    match name {
        "LEN" | "CINT" | "CLNG" => TypeDescriptor::simple(BaseType::Long),
        "LEFT$" | "RIGHT$" | "MID$" | "CHR$" | "STR$" => TypeDescriptor::simple(BaseType::String),
        "CSNG" => TypeDescriptor::simple(BaseType::Single),
        _ => TypeDescriptor::simple(BaseType::Double),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_runtime_call_maps_known_names() {
        assert_eq!(builtin_runtime_call("SQR"), Some("math_sqrt"));
        assert_eq!(builtin_runtime_call("MID$"), Some("str_substr"));
        assert_eq!(builtin_runtime_call("NOT_A_BUILTIN"), None);
    }

    #[test]
    fn builtin_ret_type_matches_descriptor_width() {
        assert_eq!(builtin_ret_type("LEN"), "l");
        assert_eq!(builtin_ret_type("CSNG"), "s");
        assert_eq!(builtin_ret_type("RND"), "d");
    }

    #[test]
    fn builtin_ret_descriptor_strings_for_substring_ops() {
        assert_eq!(builtin_ret_descriptor("LEFT$").base, BaseType::String);
        assert_eq!(builtin_ret_descriptor("SIN").base, BaseType::Double);
    }
}
