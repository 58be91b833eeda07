//! Two-pass semantic analyzer (C9)
//!
//! Pass 1 walks the whole program populating the symbol table (lines,
//! labels, types, classes, constants, routines, variables, arrays, timer
//! handlers) without looking at any statement's validity. Pass 2 walks every
//! statement body again, this time read-only against the table, resolving
//! names, checking coercions, and validating control-flow nesting. Splitting
//! the walk this way mirrors the teacher's `codegen/mod.rs`, which builds its
//! whole-program call graph before it starts typechecking any one word body.

use std::collections::{HashMap, HashSet};

use crate::ast::{
    CaseMatch, ClassDecl, Expr, ExitKind, LValue, MethodDecl, Program, RoutineKind, Statement,
};
use crate::const_eval::{self, ConstValue};
use crate::data_prep::DataSegment;
use crate::diagnostics::{CompileError, Warning};
use crate::options::CompileOptions;
use crate::symbols::{ArrayInfo, ClassInfo, ConstantInfo, Scope, SymbolTable, VariableInfo};
use crate::token::Location;
use crate::types::{check_coercion, BaseType, Coercion, TypeDescriptor};

/// Pseudo-routine name for top-level (unnamed `main`) code, used as the
/// `Scope::Function` key for variables declared outside any `SUB`/`FUNCTION`.
/// Contains a character (`$`) that can never appear in a mangled identifier,
/// so it can't collide with a user routine.
pub const MAIN_SCOPE: &str = "$MAIN";

pub struct SemanticOutput {
    pub table: SymbolTable,
    pub errors: Vec<CompileError>,
    pub warnings: Vec<Warning>,
}

pub fn analyze(program: &Program, options: CompileOptions, segment: DataSegment) -> SemanticOutput {
    let mut table = SymbolTable::new(options);
    table.data = segment;
    let mut errors = Vec::new();

    declare_lines_and_labels(program, &mut table, &mut errors);
    declare_types(program, &mut table, &mut errors);
    declare_classes(program, &mut table, &mut errors);
    declare_constants(program, &mut table, &mut errors);
    declare_routines(program, &mut table, &mut errors);

    let consts: HashMap<String, ConstValue> = table
        .constants
        .iter()
        .map(|(k, v)| (k.clone(), v.value.clone()))
        .collect();
    declare_variables(program, &mut table, &consts, &mut errors);
    collect_timer_handlers(program, &mut table);

    let for_each_vars = collect_for_each_vars(program);
    declare_implicit_variables(program, &mut table, &for_each_vars);

    let mut validator = Validator {
        table: &table,
        for_each_vars: &for_each_vars,
        current_class: None,
        errors,
        warnings: Vec::new(),
    };
    validator.validate_program(program);
    let errors = validator.errors;
    let warnings = validator.warnings;
    drop(validator);

    SemanticOutput {
        table,
        errors,
        warnings,
    }
}

// ---- generic statement-body walker (pass 1 collection helpers) --------

/// Visit `stmt` and every statement nested inside its bodies/arms, depth
/// first. Used by pass 1 passes that only need to *find* statements of a
/// given shape, not track scope while doing so.
fn for_each_body<'a>(stmts: &'a [Statement], f: &mut impl FnMut(&'a Statement)) {
    for s in stmts {
        f(s);
        match s {
            Statement::If {
                then_branch,
                else_ifs,
                else_branch,
                ..
            } => {
                for_each_body(then_branch, f);
                for (_, body) in else_ifs {
                    for_each_body(body, f);
                }
                if let Some(body) = else_branch {
                    for_each_body(body, f);
                }
            }
            Statement::For { body, .. }
            | Statement::ForEach { body, .. }
            | Statement::While { body, .. }
            | Statement::DoLoop { body, .. }
            | Statement::Repeat { body, .. } => for_each_body(body, f),
            Statement::SelectCase { arms, otherwise, .. } => {
                for arm in arms {
                    for_each_body(&arm.body, f);
                }
                if let Some(body) = otherwise {
                    for_each_body(body, f);
                }
            }
            Statement::MatchType { arms, .. } => {
                for arm in arms {
                    for_each_body(&arm.body, f);
                }
            }
            Statement::TryCatchFinally {
                try_body,
                catches,
                finally,
                ..
            } => {
                for_each_body(try_body, f);
                for catch in catches {
                    for_each_body(&catch.body, f);
                }
                if let Some(body) = finally {
                    for_each_body(body, f);
                }
            }
            _ => {}
        }
    }
}

fn program_bodies(program: &Program) -> Vec<(String, &[Statement])> {
    let mut out = Vec::new();
    for line in &program.lines {
        out.push((MAIN_SCOPE.to_string(), line.statements.as_slice()));
    }
    for routine in &program.routines {
        out.push((routine.name.to_ascii_uppercase(), routine.body.as_slice()));
    }
    for (scope, method) in class_method_items(program) {
        out.push((scope, method.body.as_slice()));
    }
    out
}

/// `Scope::Function` key a class method's own locals/params live under,
/// matching `codegen::emit_class_methods`'s `{CLASS}__{METHOD}` naming so
/// the two phases agree on where a method's variables are filed.
fn method_scope(class_name: &str, method_name: &str) -> String {
    format!("{}__{}", class_name.to_ascii_uppercase(), method_name.to_ascii_uppercase())
}

/// Every method body in the program (ordinary methods, constructor,
/// destructor) paired with its `Scope::Function` key.
fn class_method_items(program: &Program) -> Vec<(String, &MethodDecl)> {
    let mut out = Vec::new();
    for class in &program.classes {
        for method in &class.methods {
            out.push((method_scope(&class.name, &method.name), method));
        }
        if let Some(ctor) = &class.constructor {
            out.push((format!("{}__CONSTRUCTOR", class.name.to_ascii_uppercase()), ctor));
        }
        if let Some(dtor) = &class.destructor {
            out.push((format!("{}__DESTRUCTOR", class.name.to_ascii_uppercase()), dtor));
        }
    }
    out
}

// ---- pass 1: declarations ----------------------------------------------

fn declare_lines_and_labels(program: &Program, table: &mut SymbolTable, errors: &mut Vec<CompileError>) {
    for (idx, line) in program.lines.iter().enumerate() {
        if let Some(n) = line.number {
            if table.lines.contains_key(&n) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: line.location,
                    name: n.to_string(),
                });
            } else {
                table.register_line(n, idx);
            }
        }
        if let Some(label) = &line.label {
            let key = label.to_ascii_uppercase();
            if table.labels.contains_key(&key) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: line.location,
                    name: label.clone(),
                });
            } else {
                table.register_label(key, idx);
            }
        }
    }
}

fn declare_types(program: &Program, table: &mut SymbolTable, errors: &mut Vec<CompileError>) {
    for decl in &program.types {
        if table.udts.contains_key(&decl.name) {
            errors.push(CompileError::DuplicateDeclaration {
                location: decl.location,
                name: decl.name.clone(),
            });
            continue;
        }
        crate::symbols::register_type_decl(table, decl);
    }
}

fn declare_classes(program: &Program, table: &mut SymbolTable, errors: &mut Vec<CompileError>) {
    let class_names: HashSet<String> =
        program.classes.iter().map(|c| c.name.to_ascii_uppercase()).collect();
    let mut resolved: HashMap<String, ClassInfo> = HashMap::new();
    let mut pending: Vec<&ClassDecl> = program.classes.iter().collect();

    loop {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for decl in pending {
            let key = decl.name.to_ascii_uppercase();
            if resolved.contains_key(&key) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: decl.location,
                    name: decl.name.clone(),
                });
                continue;
            }
            match &decl.parent {
                None => {
                    let id = table.next_class_id();
                    resolved.insert(key, crate::symbols::layout_class(decl, None, id));
                    progressed = true;
                }
                Some(parent_name) => {
                    let pkey = parent_name.to_ascii_uppercase();
                    if let Some(parent_info) = resolved.get(&pkey) {
                        let adjusted = adjust_overrides(decl, parent_info, errors);
                        let id = table.next_class_id();
                        let info = crate::symbols::layout_class(&adjusted, Some(parent_info), id);
                        resolved.insert(key, info);
                        progressed = true;
                    } else if class_names.contains(&pkey) {
                        still_pending.push(decl);
                    } else {
                        errors.push(CompileError::ClassError {
                            location: decl.location,
                            message: format!("unknown parent class `{parent_name}`"),
                        });
                    }
                }
            }
        }
        if still_pending.is_empty() {
            break;
        }
        if !progressed {
            for decl in &still_pending {
                errors.push(CompileError::ClassError {
                    location: decl.location,
                    message: format!("circular inheritance involving `{}`", decl.name),
                });
            }
            break;
        }
        pending = still_pending;
    }

    table.classes = resolved;
}

/// Recompute `is_override` structurally (the parser always sets it `false`)
/// and flag overrides whose signature doesn't match the parent's slot.
fn adjust_overrides(decl: &ClassDecl, parent: &ClassInfo, errors: &mut Vec<CompileError>) -> ClassDecl {
    let mut adjusted = decl.clone();
    for method in &mut adjusted.methods {
        match parent.find_method(&method.name) {
            Some(slot) => {
                method.is_override = true;
                let param_types: Vec<TypeDescriptor> =
                    method.params.iter().map(|p| p.ty.clone()).collect();
                if param_types != slot.param_types || method.return_type != slot.return_type {
                    errors.push(CompileError::ClassError {
                        location: method.location,
                        message: format!(
                            "`{}` overrides `{}.{}` with a different signature",
                            method.name, slot.declaring_class, slot.name
                        ),
                    });
                }
            }
            None => method.is_override = false,
        }
    }
    adjusted
}

fn declare_constants(program: &Program, table: &mut SymbolTable, errors: &mut Vec<CompileError>) {
    let mut values: HashMap<String, ConstValue> = HashMap::new();
    let mut pending: Vec<_> = program.constants.iter().collect();

    loop {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for decl in pending {
            let key = decl.name.to_ascii_uppercase();
            if values.contains_key(&key) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: decl.location,
                    name: decl.name.clone(),
                });
                continue;
            }
            match const_eval::fold(&decl.value, &values) {
                Some(v) => {
                    values.insert(key, v);
                    progressed = true;
                }
                None => still_pending.push(decl),
            }
        }
        if still_pending.is_empty() {
            break;
        }
        if !progressed {
            for decl in &still_pending {
                errors.push(CompileError::TypeMismatch {
                    location: decl.location,
                    expected: "compile-time constant".to_string(),
                    found: "expression with a non-constant operand".to_string(),
                });
            }
            break;
        }
        pending = still_pending;
    }

    for decl in &program.constants {
        let key = decl.name.to_ascii_uppercase();
        if let Some(value) = values.get(&key) {
            table.declare_constant(ConstantInfo {
                name: decl.name.clone(),
                ty: value.type_descriptor(),
                value: value.clone(),
            });
        }
    }
}

fn declare_routines(program: &Program, table: &mut SymbolTable, errors: &mut Vec<CompileError>) {
    for routine in &program.routines {
        let key = routine.name.to_ascii_uppercase();
        if table.routines.contains_key(&key) {
            errors.push(CompileError::DuplicateDeclaration {
                location: routine.location,
                name: routine.name.clone(),
            });
            continue;
        }
        crate::symbols::register_routine(table, routine);
        for param in &routine.params {
            table.declare_variable(
                Scope::Function(key.clone()),
                VariableInfo {
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                    is_global: false,
                    is_array: false,
                    dimensions: vec![],
                },
            );
        }
        if matches!(routine.kind, RoutineKind::Function | RoutineKind::DefFn) {
            if let Some(rt) = &routine.return_type {
                table.declare_variable(
                    Scope::Function(key.clone()),
                    VariableInfo {
                        name: routine.name.clone(),
                        ty: rt.clone(),
                        is_global: false,
                        is_array: false,
                        dimensions: vec![],
                    },
                );
            }
        }
    }

    for (scope, method) in class_method_items(program) {
        for param in &method.params {
            table.declare_variable(
                Scope::Function(scope.clone()),
                VariableInfo {
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                    is_global: false,
                    is_array: false,
                    dimensions: vec![],
                },
            );
        }
        if let Some(rt) = &method.return_type {
            table.declare_variable(
                Scope::Function(scope.clone()),
                VariableInfo {
                    name: method.name.clone(),
                    ty: rt.clone(),
                    is_global: false,
                    is_array: false,
                    dimensions: vec![],
                },
            );
        }
    }
}

fn declare_variables(
    program: &Program,
    table: &mut SymbolTable,
    consts: &HashMap<String, ConstValue>,
    errors: &mut Vec<CompileError>,
) {
    for (scope_name, body) in program_bodies(program) {
        for_each_body(body, &mut |stmt| {
            declare_dim_stmt(stmt, &scope_name, table, consts, errors);
        });
    }
}

fn declare_dim_stmt(
    stmt: &Statement,
    scope_name: &str,
    table: &mut SymbolTable,
    consts: &HashMap<String, ConstValue>,
    errors: &mut Vec<CompileError>,
) {
    let Statement::Dim {
        specs,
        is_global,
        location,
    } = stmt
    else {
        return;
    };
    for spec in specs {
        let scope = if *is_global {
            Scope::Global
        } else {
            Scope::Function(scope_name.to_string())
        };
        if spec.dimensions.is_empty() {
            if table.variables.contains_key(&(spec.name.clone(), scope.clone())) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: *location,
                    name: spec.name.clone(),
                });
                continue;
            }
            table.declare_variable(
                scope,
                VariableInfo {
                    name: spec.name.clone(),
                    ty: spec.ty.clone(),
                    is_global: *is_global,
                    is_array: false,
                    dimensions: vec![],
                },
            );
        } else {
            if table.arrays.contains_key(&(spec.name.clone(), scope.clone())) {
                errors.push(CompileError::DuplicateDeclaration {
                    location: *location,
                    name: spec.name.clone(),
                });
                continue;
            }
            let dimensions = spec
                .dimensions
                .iter()
                .map(|d| {
                    d.as_ref()
                        .and_then(|e| const_eval::fold(e, consts))
                        .and_then(|v| match v {
                            ConstValue::Int(i) if i >= 0 => Some(i as u32),
                            ConstValue::Float(f) if f >= 0.0 => Some(f as u32),
                            _ => None,
                        })
                })
                .collect();
            table.declare_array(
                scope.clone(),
                ArrayInfo {
                    name: spec.name.clone(),
                    element_ty: spec.ty.clone(),
                    dimensions,
                    scope,
                },
            );
        }
    }
}

fn collect_timer_handlers(program: &Program, table: &mut SymbolTable) {
    for (_, body) in program_bodies(program) {
        for_each_body(body, &mut |stmt| {
            if let Statement::Timer { handler, .. } = stmt {
                if !table.timer_handlers.iter().any(|h| h.eq_ignore_ascii_case(handler)) {
                    table.timer_handlers.push(handler.clone());
                }
            }
        });
    }
}

/// `(scope, variable name)` pairs bound by `FOR EACH`/`FOR EACH ... , ... IN`
/// (and the `MATCH TYPE` arm binding, added during validation) — these are
/// legal to reference without a `DIM` even under `OPTION EXPLICIT`.
fn collect_for_each_vars(program: &Program) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    for (scope_name, body) in program_bodies(program) {
        for_each_body(body, &mut |stmt| match stmt {
            Statement::ForEach { var, type_tag_var, .. } => {
                out.insert((scope_name.clone(), var.to_ascii_uppercase()));
                if let Some(t) = type_tag_var {
                    out.insert((scope_name.clone(), t.to_ascii_uppercase()));
                }
            }
            Statement::MatchType { arms, .. } => {
                for arm in arms {
                    out.insert((scope_name.clone(), arm.binding.to_ascii_uppercase()));
                }
            }
            _ => {}
        });
    }
    out
}

/// Declares into `table.variables` every variable a correct compiler has to
/// accept without a preceding `DIM`: `FOR`/`FOR EACH` loop variables
/// (spec.md §3 invariant 7 — typed per `OPTION FOR INTEGER|LONG`, never from
/// a name suffix) and, outside `OPTION EXPLICIT`, any other scalar a
/// statement references before it's declared. Runs between pass 1's
/// declarations and pass 2's validation so codegen — which only allocates a
/// storage slot for what's in `table.variables` — always finds one for a
/// name pass 2 accepts as in scope.
fn declare_implicit_variables(program: &Program, table: &mut SymbolTable, for_each_vars: &HashSet<(String, String)>) {
    let for_loop_ty = TypeDescriptor::simple(match table.options.for_integer_width {
        crate::options::ForIntegerWidth::Integer => BaseType::Integer,
        crate::options::ForIntegerWidth::Long => BaseType::Long,
    });
    let explicit = table.options.explicit;

    for (scope_name, body) in program_bodies(program) {
        for_each_body(body, &mut |stmt| match stmt {
            Statement::For { var, .. } => {
                declare_implicit_scalar(table, &scope_name, var, for_loop_ty.clone());
            }
            Statement::ForEach { var, type_tag_var, .. } => {
                declare_implicit_scalar(table, &scope_name, var, inferred_type_from_name(var));
                if let Some(t) = type_tag_var {
                    declare_implicit_scalar(table, &scope_name, t, TypeDescriptor::simple(BaseType::Integer));
                }
            }
            Statement::MatchType { arms, .. } => {
                for arm in arms {
                    let ty = type_from_bound_name(&arm.bound_type, table);
                    declare_implicit_scalar(table, &scope_name, &arm.binding, ty);
                }
            }
            _ => {}
        });

        if explicit {
            continue;
        }
        for_each_body(body, &mut |stmt| {
            let mut refs = Vec::new();
            collect_variable_refs_stmt(stmt, &mut refs);
            for name in refs {
                if table.lookup_variable(&name, Some(&scope_name)).is_some() {
                    continue;
                }
                if for_each_vars.contains(&(scope_name.clone(), name.to_ascii_uppercase())) {
                    continue;
                }
                if table.lookup_constant(&name).is_some() {
                    continue;
                }
                let ty = inferred_type_from_name(&name);
                declare_implicit_scalar(table, &scope_name, &name, ty);
            }
        });
    }
}

fn declare_implicit_scalar(table: &mut SymbolTable, scope_name: &str, name: &str, ty: TypeDescriptor) {
    if table.lookup_variable(name, Some(scope_name)).is_some() {
        return;
    }
    table.declare_variable(
        Scope::Function(scope_name.to_string()),
        VariableInfo {
            name: name.to_string(),
            ty,
            is_global: false,
            is_array: false,
            dimensions: vec![],
        },
    );
}

fn collect_variable_refs_stmt(stmt: &Statement, out: &mut Vec<String>) {
    match stmt {
        Statement::Assign { target, value, .. } => {
            collect_variable_refs_lvalue(target, out);
            collect_variable_refs_expr(value, out);
        }
        Statement::Print { items, .. } => {
            for item in items {
                if let crate::ast::PrintItem::Expr(e) = item {
                    collect_variable_refs_expr(e, out);
                }
            }
        }
        Statement::Input { prompt, target, at, .. } => {
            if let Some(p) = prompt {
                collect_variable_refs_expr(p, out);
            }
            collect_variable_refs_lvalue(target, out);
            if let Some((r, c)) = at {
                collect_variable_refs_expr(r, out);
                collect_variable_refs_expr(c, out);
            }
        }
        Statement::CallStatement { args, .. } => args.iter().for_each(|e| collect_variable_refs_expr(e, out)),
        Statement::ExprStatement { expr, .. } => collect_variable_refs_expr(expr, out),
        Statement::If { condition, .. } => collect_variable_refs_expr(condition, out),
        Statement::For { start, end, step, .. } => {
            collect_variable_refs_expr(start, out);
            collect_variable_refs_expr(end, out);
            if let Some(s) = step {
                collect_variable_refs_expr(s, out);
            }
        }
        Statement::ForEach { collection, .. } => collect_variable_refs_expr(collection, out),
        Statement::While { condition, .. } => collect_variable_refs_expr(condition, out),
        Statement::DoLoop { pre_test, post_test, .. } => {
            if let Some((_, e)) = pre_test {
                collect_variable_refs_expr(e, out);
            }
            if let Some((_, e)) = post_test {
                collect_variable_refs_expr(e, out);
            }
        }
        Statement::Repeat { until, .. } => collect_variable_refs_expr(until, out),
        Statement::SelectCase { discriminant, arms, .. } => {
            collect_variable_refs_expr(discriminant, out);
            for arm in arms {
                for m in &arm.matches {
                    match m {
                        CaseMatch::Value(e) | CaseMatch::RelOp(_, e) => collect_variable_refs_expr(e, out),
                        CaseMatch::Range(lo, hi) => {
                            collect_variable_refs_expr(lo, out);
                            collect_variable_refs_expr(hi, out);
                        }
                    }
                }
            }
        }
        Statement::MatchType { discriminant, .. } => collect_variable_refs_expr(discriminant, out),
        Statement::Throw { code, .. } => collect_variable_refs_expr(code, out),
        Statement::OnGoto { selector, .. } | Statement::OnCall { selector, .. } => {
            collect_variable_refs_expr(selector, out)
        }
        Statement::Return { value, .. } => {
            if let Some(v) = value {
                collect_variable_refs_expr(v, out);
            }
        }
        Statement::Read { targets, .. } => targets.iter().for_each(|t| collect_variable_refs_lvalue(t, out)),
        Statement::Delete { target, .. } => collect_variable_refs_lvalue(target, out),
        Statement::Timer { duration, .. } => collect_variable_refs_expr(duration, out),
        Statement::Redim { dimensions, .. } => dimensions.iter().for_each(|e| collect_variable_refs_expr(e, out)),
        Statement::Dim { .. }
        | Statement::Goto { .. }
        | Statement::Gosub { .. }
        | Statement::Exit { .. }
        | Statement::Restore { .. }
        | Statement::Label { .. }
        | Statement::TryCatchFinally { .. } => {}
    }
}

fn collect_variable_refs_expr(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Variable(name) => out.push(name.clone()),
        Expr::ArrayAccess { indices, .. } => indices.iter().for_each(|e| collect_variable_refs_expr(e, out)),
        Expr::FieldAccess { base, .. } => collect_variable_refs_expr(base, out),
        Expr::Index { base, index } => {
            collect_variable_refs_expr(base, out);
            collect_variable_refs_expr(index, out);
        }
        Expr::Unary { expr, .. } => collect_variable_refs_expr(expr, out),
        Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } => {
            collect_variable_refs_expr(lhs, out);
            collect_variable_refs_expr(rhs, out);
        }
        Expr::Call { args, .. } | Expr::New { args, .. } | Expr::SuperCall { args, .. } => {
            args.iter().for_each(|e| collect_variable_refs_expr(e, out))
        }
        Expr::MethodCall { base, args, .. } => {
            collect_variable_refs_expr(base, out);
            args.iter().for_each(|e| collect_variable_refs_expr(e, out));
        }
        Expr::IsNothing(inner) | Expr::IsClass { expr: inner, .. } => collect_variable_refs_expr(inner, out),
        Expr::NumberLiteral(_) | Expr::StringLiteral(_) | Expr::Nothing => {}
    }
}

fn collect_variable_refs_lvalue(lv: &LValue, out: &mut Vec<String>) {
    match lv {
        LValue::Variable(name) => out.push(name.clone()),
        LValue::ArrayElement { indices, .. } => indices.iter().for_each(|e| collect_variable_refs_expr(e, out)),
        LValue::Field { base, .. } => collect_variable_refs_lvalue(base, out),
        LValue::Index { base, index } => {
            collect_variable_refs_expr(base, out);
            collect_variable_refs_expr(index, out);
        }
    }
}

// ---- pass 2: validation --------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopCtx {
    For,
    While,
    Do,
    Repeat,
}

struct Validator<'a> {
    table: &'a SymbolTable,
    for_each_vars: &'a HashSet<(String, String)>,
    current_class: Option<String>,
    errors: Vec<CompileError>,
    warnings: Vec<Warning>,
}

impl<'a> Validator<'a> {
    fn validate_program(&mut self, program: &Program) {
        for line in &program.lines {
            let mut loop_stack = Vec::new();
            self.validate_block(
                &line.statements,
                MAIN_SCOPE,
                &mut loop_stack,
                None,
                None,
                &HashMap::new(),
            );
        }
        for routine in &program.routines {
            let scope = routine.name.to_ascii_uppercase();
            let mut loop_stack = Vec::new();
            self.validate_block(
                &routine.body,
                &scope,
                &mut loop_stack,
                Some(routine.kind),
                routine.return_type.as_ref(),
                &HashMap::new(),
            );
        }
        self.validate_classes(program);
    }

    fn validate_classes(&mut self, program: &Program) {
        for class in &program.classes {
            let class_key = class.name.to_ascii_uppercase();
            for method in &class.methods {
                let scope = method_scope(&class_key, &method.name);
                self.validate_method(&class_key, &scope, method);
            }
            if let Some(ctor) = &class.constructor {
                self.validate_method(&class_key, &format!("{class_key}__CONSTRUCTOR"), ctor);
            }
            if let Some(dtor) = &class.destructor {
                self.validate_method(&class_key, &format!("{class_key}__DESTRUCTOR"), dtor);
            }
        }
    }

    fn validate_method(&mut self, class_key: &str, scope: &str, method: &MethodDecl) {
        let mut locals = HashMap::new();
        for p in &method.params {
            locals.insert(p.name.to_ascii_uppercase(), p.ty.clone());
        }
        let mut loop_stack = Vec::new();
        self.current_class = Some(class_key.to_string());
        self.validate_block(
            &method.body,
            &scope,
            &mut loop_stack,
            Some(RoutineKind::Function),
            method.return_type.as_ref(),
            &locals,
        );
        self.current_class = None;
    }

    fn validate_block(
        &mut self,
        stmts: &[Statement],
        scope: &str,
        loop_stack: &mut Vec<LoopCtx>,
        in_routine: Option<RoutineKind>,
        return_type: Option<&TypeDescriptor>,
        locals: &HashMap<String, TypeDescriptor>,
    ) {
        for stmt in stmts {
            self.validate_stmt(stmt, scope, loop_stack, in_routine, return_type, locals);
        }
    }

    fn validate_stmt(
        &mut self,
        stmt: &Statement,
        scope: &str,
        loop_stack: &mut Vec<LoopCtx>,
        in_routine: Option<RoutineKind>,
        return_type: Option<&TypeDescriptor>,
        locals: &HashMap<String, TypeDescriptor>,
    ) {
        let loc = stmt.location();
        match stmt {
            Statement::Dim { specs, .. } => {
                for spec in specs {
                    for dim in spec.dimensions.iter().flatten() {
                        self.infer_expr(dim, scope, locals, loc);
                    }
                }
            }
            Statement::Redim { name, dimensions, .. } => {
                if self.table.lookup_array(name, Some(scope)).is_none() {
                    self.errors.push(CompileError::UndeclaredVariable {
                        location: loc,
                        name: name.clone(),
                    });
                }
                for dim in dimensions {
                    self.infer_expr(dim, scope, locals, loc);
                }
            }
            Statement::Assign { target, value, .. } => {
                let value_ty = self.infer_expr(value, scope, locals, loc);
                let target_ty = self.resolve_lvalue(target, scope, locals, loc);
                if let (Some(vt), Some(tt)) = (value_ty, target_ty) {
                    self.check_assignment_coercion(&vt, &tt, loc);
                }
            }
            Statement::Print { items, .. } => {
                for item in items {
                    if let crate::ast::PrintItem::Expr(e) = item {
                        self.infer_expr(e, scope, locals, loc);
                    }
                }
            }
            Statement::Input { prompt, target, at, .. } => {
                if let Some(p) = prompt {
                    self.infer_expr(p, scope, locals, loc);
                }
                if let Some((row, col)) = at {
                    self.infer_expr(row, scope, locals, loc);
                    self.infer_expr(col, scope, locals, loc);
                }
                self.resolve_lvalue(target, scope, locals, loc);
            }
            Statement::CallStatement { name, args, .. } => {
                self.validate_call(name, args, scope, locals, loc);
            }
            Statement::ExprStatement { expr, .. } => {
                self.infer_expr(expr, scope, locals, loc);
            }
            Statement::If {
                condition,
                then_branch,
                else_ifs,
                else_branch,
                ..
            } => {
                self.infer_expr(condition, scope, locals, loc);
                self.validate_block(then_branch, scope, loop_stack, in_routine, return_type, locals);
                for (cond, body) in else_ifs {
                    self.infer_expr(cond, scope, locals, loc);
                    self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                }
                if let Some(body) = else_branch {
                    self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                }
            }
            Statement::For {
                var,
                start,
                end,
                step,
                body,
                ..
            } => {
                self.infer_expr(start, scope, locals, loc);
                self.infer_expr(end, scope, locals, loc);
                if let Some(s) = step {
                    self.infer_expr(s, scope, locals, loc);
                }
                let mut body_locals = locals.clone();
                body_locals
                    .entry(var.to_ascii_uppercase())
                    .or_insert_with(|| inferred_type_from_name(var));
                loop_stack.push(LoopCtx::For);
                self.validate_block(body, scope, loop_stack, in_routine, return_type, &body_locals);
                loop_stack.pop();
            }
            Statement::ForEach {
                var,
                type_tag_var,
                collection,
                body,
                ..
            } => {
                self.infer_expr(collection, scope, locals, loc);
                let mut body_locals = locals.clone();
                body_locals
                    .entry(var.to_ascii_uppercase())
                    .or_insert_with(|| inferred_type_from_name(var));
                if let Some(t) = type_tag_var {
                    body_locals
                        .entry(t.to_ascii_uppercase())
                        .or_insert_with(|| TypeDescriptor::simple(BaseType::Integer));
                }
                loop_stack.push(LoopCtx::For);
                self.validate_block(body, scope, loop_stack, in_routine, return_type, &body_locals);
                loop_stack.pop();
            }
            Statement::While { condition, body, .. } => {
                self.infer_expr(condition, scope, locals, loc);
                loop_stack.push(LoopCtx::While);
                self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                loop_stack.pop();
            }
            Statement::DoLoop {
                body,
                pre_test,
                post_test,
                ..
            } => {
                if let Some((_, e)) = pre_test {
                    self.infer_expr(e, scope, locals, loc);
                }
                loop_stack.push(LoopCtx::Do);
                self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                loop_stack.pop();
                if let Some((_, e)) = post_test {
                    self.infer_expr(e, scope, locals, loc);
                }
            }
            Statement::Repeat { body, until, .. } => {
                loop_stack.push(LoopCtx::Repeat);
                self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                loop_stack.pop();
                self.infer_expr(until, scope, locals, loc);
            }
            Statement::SelectCase {
                discriminant,
                arms,
                otherwise,
                ..
            } => {
                self.infer_expr(discriminant, scope, locals, loc);
                for arm in arms {
                    for m in &arm.matches {
                        match m {
                            CaseMatch::Value(e) => {
                                self.infer_expr(e, scope, locals, loc);
                            }
                            CaseMatch::Range(lo, hi) => {
                                self.infer_expr(lo, scope, locals, loc);
                                self.infer_expr(hi, scope, locals, loc);
                            }
                            CaseMatch::RelOp(_, e) => {
                                self.infer_expr(e, scope, locals, loc);
                            }
                        }
                    }
                    self.validate_block(&arm.body, scope, loop_stack, in_routine, return_type, locals);
                }
                if let Some(body) = otherwise {
                    self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                }
            }
            Statement::MatchType { discriminant, arms, .. } => {
                self.infer_expr(discriminant, scope, locals, loc);
                for arm in arms {
                    let mut body_locals = locals.clone();
                    body_locals.insert(
                        arm.binding.to_ascii_uppercase(),
                        type_from_bound_name(&arm.bound_type, self.table),
                    );
                    self.validate_block(
                        &arm.body,
                        scope,
                        loop_stack,
                        in_routine,
                        return_type,
                        &body_locals,
                    );
                }
            }
            Statement::TryCatchFinally {
                try_body,
                catches,
                finally,
                ..
            } => {
                if catches.is_empty() && finally.is_none() {
                    self.errors.push(CompileError::InvalidTryCatch {
                        location: loc,
                        message: "TRY has no CATCH and no FINALLY".to_string(),
                    });
                }
                let mut seen_codes: HashSet<i64> = HashSet::new();
                for (i, catch) in catches.iter().enumerate() {
                    if catch.codes.is_empty() && i != catches.len() - 1 {
                        self.errors.push(CompileError::InvalidTryCatch {
                            location: loc,
                            message: "catch-all CATCH must be the last clause".to_string(),
                        });
                    }
                    for code in &catch.codes {
                        if !seen_codes.insert(*code) {
                            self.errors.push(CompileError::InvalidTryCatch {
                                location: loc,
                                message: format!("error code {code} is caught more than once"),
                            });
                        }
                    }
                }
                self.validate_block(try_body, scope, loop_stack, in_routine, return_type, locals);
                for catch in catches {
                    self.validate_block(&catch.body, scope, loop_stack, in_routine, return_type, locals);
                }
                if let Some(body) = finally {
                    self.validate_block(body, scope, loop_stack, in_routine, return_type, locals);
                }
            }
            Statement::Throw { code, .. } => {
                self.infer_expr(code, scope, locals, loc);
                if let Some(ConstValue::Int(i)) = const_eval::fold(code, &self.constants_map()) {
                    if i <= 0 {
                        self.warnings.push(Warning {
                            location: loc,
                            message: format!("THROW with non-positive code {i} is reserved for the runtime"),
                        });
                    }
                }
            }
            Statement::Exit { kind, .. } => {
                let ok = match kind {
                    ExitKind::For => loop_stack.contains(&LoopCtx::For),
                    ExitKind::While => loop_stack.contains(&LoopCtx::While),
                    ExitKind::Do => loop_stack.contains(&LoopCtx::Do),
                    ExitKind::Repeat => loop_stack.contains(&LoopCtx::Repeat),
                    ExitKind::Sub => matches!(in_routine, Some(RoutineKind::Sub)),
                    ExitKind::Function => matches!(
                        in_routine,
                        Some(RoutineKind::Function) | Some(RoutineKind::DefFn)
                    ),
                };
                if !ok {
                    self.errors.push(CompileError::InvalidControlFlow {
                        location: loc,
                        message: format!("{kind:?} EXIT used outside a matching construct"),
                    });
                }
            }
            Statement::Goto { target, .. } | Statement::Gosub { target, .. } => {
                self.resolve_target(target, loc);
            }
            Statement::OnGoto { selector, targets, .. } => {
                self.infer_expr(selector, scope, locals, loc);
                for t in targets {
                    self.resolve_target(t, loc);
                }
            }
            Statement::OnCall { selector, targets, .. } => {
                self.infer_expr(selector, scope, locals, loc);
                for name in targets {
                    if !self.table.routines.contains_key(&name.to_ascii_uppercase()) {
                        self.errors.push(CompileError::UnknownRoutine {
                            location: loc,
                            name: name.clone(),
                        });
                    }
                }
            }
            Statement::Return { value, .. } => match (in_routine, value) {
                (Some(RoutineKind::Sub), Some(_)) | (Some(RoutineKind::TimerHandler), Some(_)) => {
                    self.errors.push(CompileError::InvalidControlFlow {
                        location: loc,
                        message: "RETURN with a value is only valid inside a FUNCTION".to_string(),
                    });
                }
                (_, Some(v)) => {
                    let vt = self.infer_expr(v, scope, locals, loc);
                    if let (Some(vt), Some(rt)) = (vt, return_type) {
                        self.check_assignment_coercion(&vt, rt, loc);
                    }
                }
                _ => {}
            },
            Statement::Restore { target, .. } => {
                if let Some(t) = target {
                    self.resolve_target(t, loc);
                }
            }
            Statement::Read { targets, .. } => {
                for t in targets {
                    self.resolve_lvalue(t, scope, locals, loc);
                }
            }
            Statement::Delete { target, .. } => {
                let ty = self.resolve_lvalue(target, scope, locals, loc);
                if self.table.options.samm {
                    self.warnings.push(Warning {
                        location: loc,
                        message: "DELETE is a no-op release-now hint under OPTION SAMM".to_string(),
                    });
                }
                if let Some(t) = ty {
                    if !t.is_class_instance() {
                        self.errors.push(CompileError::TypeMismatch {
                            location: loc,
                            expected: "class instance".to_string(),
                            found: t.to_string(),
                        });
                    }
                }
            }
            Statement::Timer { duration, handler, .. } => {
                let ty = self.infer_expr(duration, scope, locals, loc);
                if let Some(t) = ty {
                    if !t.is_numeric() {
                        self.errors.push(CompileError::TypeMismatch {
                            location: loc,
                            expected: "numeric duration".to_string(),
                            found: t.to_string(),
                        });
                    }
                }
                if !self.table.routines.contains_key(&handler.to_ascii_uppercase()) {
                    self.errors.push(CompileError::UnknownRoutine {
                        location: loc,
                        name: handler.clone(),
                    });
                }
            }
            Statement::Label { .. } => {}
        }
    }

    fn constants_map(&self) -> HashMap<String, ConstValue> {
        self.table
            .constants
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    fn resolve_target(&mut self, target: &crate::ast::GotoTarget, loc: Location) {
        use crate::ast::GotoTarget;
        let found = match target {
            GotoTarget::Number(n) => self.table.lines.contains_key(n),
            GotoTarget::Label(l) => self.table.labels.contains_key(&l.to_ascii_uppercase()),
        };
        if !found {
            let text = match target {
                GotoTarget::Number(n) => n.to_string(),
                GotoTarget::Label(l) => l.clone(),
            };
            self.errors.push(CompileError::UnknownTarget {
                location: loc,
                target: text,
            });
        }
    }

    fn validate_call(
        &mut self,
        name: &str,
        args: &[Expr],
        scope: &str,
        locals: &HashMap<String, TypeDescriptor>,
        loc: Location,
    ) {
        for a in args {
            self.infer_expr(a, scope, locals, loc);
        }
        match self.table.routines.get(&name.to_ascii_uppercase()) {
            Some(sig) => {
                if sig.param_types.len() != args.len() {
                    self.errors.push(CompileError::ArgumentMismatch {
                        location: loc,
                        routine: name.to_string(),
                        message: format!(
                            "expected {} argument(s), found {}",
                            sig.param_types.len(),
                            args.len()
                        ),
                    });
                }
            }
            None => {
                self.errors.push(CompileError::UnknownRoutine {
                    location: loc,
                    name: name.to_string(),
                });
            }
        }
    }

    fn check_assignment_coercion(&mut self, from: &TypeDescriptor, to: &TypeDescriptor, loc: Location) {
        match check_coercion(from, to) {
            Coercion::Identical | Coercion::ImplicitSafe => {}
            Coercion::ImplicitLossy => {
                self.warnings.push(Warning {
                    location: loc,
                    message: format!("assigning {from} to {to} narrows the value"),
                });
            }
            Coercion::ExplicitRequired | Coercion::Incompatible => {
                if from.is_class_instance() && to.is_class_instance() {
                    if !self.class_is_assignable(from, to) {
                        self.errors.push(CompileError::TypeMismatch {
                            location: loc,
                            expected: to.to_string(),
                            found: from.to_string(),
                        });
                    }
                } else {
                    self.errors.push(CompileError::TypeMismatch {
                        location: loc,
                        expected: to.to_string(),
                        found: from.to_string(),
                    });
                }
            }
        }
    }

    /// A class instance may be assigned to a variable typed as any of its
    /// ancestor classes (upcast without a conversion call).
    fn class_is_assignable(&self, from: &TypeDescriptor, to: &TypeDescriptor) -> bool {
        let (Some(from_name), Some(to_name)) = (&from.class_name, &to.class_name) else {
            return false;
        };
        let mut cursor = self.table.classes.get(&from_name.to_ascii_uppercase());
        while let Some(info) = cursor {
            if info.name.eq_ignore_ascii_case(to_name) {
                return true;
            }
            cursor = info
                .parent
                .as_ref()
                .and_then(|p| self.table.classes.get(&p.to_ascii_uppercase()));
        }
        false
    }

    fn resolve_lvalue(
        &mut self,
        lv: &LValue,
        scope: &str,
        locals: &HashMap<String, TypeDescriptor>,
        loc: Location,
    ) -> Option<TypeDescriptor> {
        match lv {
            LValue::Variable(name) => self.resolve_variable(name, scope, locals, loc),
            LValue::ArrayElement { name, indices } => {
                for idx in indices {
                    self.infer_expr(idx, scope, locals, loc);
                }
                match self.table.lookup_array(name, Some(scope)) {
                    Some(a) => Some(a.element_ty.clone()),
                    None => {
                        self.report_undeclared(name, loc);
                        None
                    }
                }
            }
            LValue::Field { base, field } => {
                let base_ty = self.resolve_lvalue(base, scope, locals, loc)?;
                self.resolve_field(&base_ty, field, loc)
            }
            LValue::Index { base, index } => {
                self.infer_expr(index, scope, locals, loc);
                let base_ty = self.infer_expr(base, scope, locals, loc)?;
                base_ty.list_element.map(|e| *e)
            }
        }
    }

    fn resolve_field(&mut self, base_ty: &TypeDescriptor, field: &str, loc: Location) -> Option<TypeDescriptor> {
        if let Some(class_name) = &base_ty.class_name {
            let mut cursor = self.table.classes.get(&class_name.to_ascii_uppercase());
            while let Some(info) = cursor {
                if let Some(f) = info.find_field(field) {
                    return Some(f.ty.clone());
                }
                cursor = info
                    .parent
                    .as_ref()
                    .and_then(|p| self.table.classes.get(&p.to_ascii_uppercase()));
            }
            self.errors.push(CompileError::ClassError {
                location: loc,
                message: format!("`{field}` is not a member of `{class_name}`"),
            });
            return None;
        }
        if let Some(udt_name) = &base_ty.udt_name {
            if let Some(udt) = self.table.udts.get(udt_name) {
                if let Some((_, ty)) = udt.fields.iter().find(|(n, _)| n.eq_ignore_ascii_case(field)) {
                    return Some(ty.clone());
                }
            }
            self.errors.push(CompileError::ClassError {
                location: loc,
                message: format!("`{field}` is not a member of `{udt_name}`"),
            });
        }
        None
    }

    fn resolve_variable(
        &mut self,
        name: &str,
        scope: &str,
        locals: &HashMap<String, TypeDescriptor>,
        loc: Location,
    ) -> Option<TypeDescriptor> {
        if let Some(t) = locals.get(&name.to_ascii_uppercase()) {
            return Some(t.clone());
        }
        if self.for_each_vars.contains(&(scope.to_string(), name.to_ascii_uppercase())) {
            return Some(inferred_type_from_name(name));
        }
        if let Some(v) = self.table.lookup_variable(name, Some(scope)) {
            return Some(v.ty.clone());
        }
        if let Some(c) = self.table.lookup_constant(name) {
            return Some(c.ty.clone());
        }
        self.report_undeclared(name, loc);
        if self.table.options.explicit {
            None
        } else {
            Some(inferred_type_from_name(name))
        }
    }

    fn report_undeclared(&mut self, name: &str, loc: Location) {
        if self.table.options.explicit {
            self.errors.push(CompileError::UndeclaredVariable {
                location: loc,
                name: name.to_string(),
            });
        }
    }

    fn infer_expr(
        &mut self,
        expr: &Expr,
        scope: &str,
        locals: &HashMap<String, TypeDescriptor>,
        loc: Location,
    ) -> Option<TypeDescriptor> {
        match expr {
            Expr::NumberLiteral(v) => {
                if v.fract() == 0.0 && v.abs() < (i32::MAX as f64) {
                    Some(TypeDescriptor::simple(BaseType::Integer))
                } else {
                    Some(TypeDescriptor::simple(BaseType::Double))
                }
            }
            Expr::StringLiteral(_) => Some(TypeDescriptor::simple(BaseType::String)),
            Expr::Variable(name) => self.resolve_variable(name, scope, locals, loc),
            Expr::ArrayAccess { name, indices } => {
                for idx in indices {
                    self.infer_expr(idx, scope, locals, loc);
                }
                if let Some(arr) = self.table.lookup_array(name, Some(scope)) {
                    return Some(arr.element_ty.clone());
                }
                if let Some(sig) = self.table.routines.get(&name.to_ascii_uppercase()).cloned() {
                    if sig.param_types.len() != indices.len() {
                        self.errors.push(CompileError::ArgumentMismatch {
                            location: loc,
                            routine: name.clone(),
                            message: format!(
                                "expected {} argument(s), found {}",
                                sig.param_types.len(),
                                indices.len()
                            ),
                        });
                    }
                    return sig.return_type;
                }
                self.report_undeclared(name, loc);
                if self.table.options.explicit {
                    None
                } else {
                    Some(inferred_type_from_name(name))
                }
            }
            Expr::FieldAccess { base, field } => {
                let base_ty = self.infer_expr(base, scope, locals, loc)?;
                self.resolve_field(&base_ty, field, loc)
            }
            Expr::Index { base, index } => {
                self.infer_expr(index, scope, locals, loc);
                let base_ty = self.infer_expr(base, scope, locals, loc)?;
                base_ty.list_element.map(|e| *e)
            }
            Expr::Unary { expr, .. } => self.infer_expr(expr, scope, locals, loc),
            Expr::Binary { lhs, rhs, .. } => {
                let l = self.infer_expr(lhs, scope, locals, loc);
                let r = self.infer_expr(rhs, scope, locals, loc);
                match (l, r) {
                    (Some(a), Some(b)) if a.is_float() || b.is_float() => {
                        Some(TypeDescriptor::simple(BaseType::Double))
                    }
                    (Some(a), _) if a.is_string() => Some(TypeDescriptor::simple(BaseType::String)),
                    _ => Some(TypeDescriptor::simple(BaseType::Long)),
                }
            }
            Expr::Compare { lhs, rhs, .. } => {
                self.infer_expr(lhs, scope, locals, loc);
                self.infer_expr(rhs, scope, locals, loc);
                Some(TypeDescriptor::simple(BaseType::Integer))
            }
            Expr::Call { name, args } => {
                for a in args {
                    self.infer_expr(a, scope, locals, loc);
                }
                if let Some(sig) = self.table.routines.get(&name.to_ascii_uppercase()).cloned() {
                    if sig.param_types.len() != args.len() {
                        self.errors.push(CompileError::ArgumentMismatch {
                            location: loc,
                            routine: name.clone(),
                            message: format!(
                                "expected {} argument(s), found {}",
                                sig.param_types.len(),
                                args.len()
                            ),
                        });
                    }
                    return sig.return_type;
                }
                // Builtin function: no signature recorded, no opinion on type.
                None
            }
            Expr::MethodCall { base, method, args } => {
                for a in args {
                    self.infer_expr(a, scope, locals, loc);
                }
                let base_ty = self.infer_expr(base, scope, locals, loc)?;
                let class_name = base_ty.class_name.as_ref()?;
                let mut cursor = self.table.classes.get(&class_name.to_ascii_uppercase());
                while let Some(info) = cursor {
                    if let Some(slot) = info.find_method(method) {
                        if slot.param_types.len() != args.len() {
                            self.errors.push(CompileError::ArgumentMismatch {
                                location: loc,
                                routine: method.clone(),
                                message: format!(
                                    "expected {} argument(s), found {}",
                                    slot.param_types.len(),
                                    args.len()
                                ),
                            });
                        }
                        return slot.return_type.clone();
                    }
                    cursor = info
                        .parent
                        .as_ref()
                        .and_then(|p| self.table.classes.get(&p.to_ascii_uppercase()));
                }
                self.errors.push(CompileError::ClassError {
                    location: loc,
                    message: format!("`{method}` is not a method of `{class_name}`"),
                });
                None
            }
            Expr::SuperCall { method, args } => {
                for a in args {
                    self.infer_expr(a, scope, locals, loc);
                }
                let class_key = self.current_class.clone()?;
                let class_info = self.table.classes.get(&class_key)?;
                let parent_key = class_info.parent.clone();
                let Some(parent_key) = parent_key else {
                    self.errors.push(CompileError::ClassError {
                        location: loc,
                        message: "SUPER used in a class with no parent".to_string(),
                    });
                    return None;
                };
                let parent = self.table.classes.get(&parent_key.to_ascii_uppercase())?;
                match parent.find_method(method) {
                    Some(slot) => {
                        if slot.param_types.len() != args.len() {
                            self.errors.push(CompileError::ArgumentMismatch {
                                location: loc,
                                routine: method.clone(),
                                message: format!(
                                    "expected {} argument(s), found {}",
                                    slot.param_types.len(),
                                    args.len()
                                ),
                            });
                        }
                        slot.return_type.clone()
                    }
                    None => {
                        self.errors.push(CompileError::ClassError {
                            location: loc,
                            message: format!("`{method}` is not a method of `{parent_key}`"),
                        });
                        None
                    }
                }
            }
            Expr::New { class_name, args } => {
                for a in args {
                    self.infer_expr(a, scope, locals, loc);
                }
                if !self.table.classes.contains_key(&class_name.to_ascii_uppercase()) {
                    self.errors.push(CompileError::ClassError {
                        location: loc,
                        message: format!("unknown class `{class_name}`"),
                    });
                    return None;
                }
                Some(TypeDescriptor::class(class_name.clone()))
            }
            Expr::IsNothing(inner) => {
                self.infer_expr(inner, scope, locals, loc);
                Some(TypeDescriptor::simple(BaseType::Integer))
            }
            Expr::IsClass { expr, class_name } => {
                self.infer_expr(expr, scope, locals, loc);
                if !self.table.classes.contains_key(&class_name.to_ascii_uppercase()) {
                    self.errors.push(CompileError::ClassError {
                        location: loc,
                        message: format!("unknown class `{class_name}`"),
                    });
                }
                Some(TypeDescriptor::simple(BaseType::Integer))
            }
            Expr::Nothing => Some(TypeDescriptor::simple(BaseType::Object)),
        }
    }
}

/// Type of a variable that's never `DIM`'d, inferred from its mangled type
/// suffix the same way the parser defaults an un-suffixed declaration: see
/// `parser.rs::type_from_suffix`.
fn inferred_type_from_name(name: &str) -> TypeDescriptor {
    let base = if name.ends_with("_LONG") {
        BaseType::Long
    } else if name.ends_with("_SHORT") {
        BaseType::Short
    } else if name.ends_with("_BYTE") {
        BaseType::Byte
    } else if name.ends_with("_FLOAT") {
        BaseType::Single
    } else if name.ends_with("_DOUBLE") {
        BaseType::Double
    } else if name.ends_with("_STRING") {
        BaseType::String
    } else {
        BaseType::Integer
    };
    TypeDescriptor::simple(base)
}

fn type_from_bound_name(name: &str, table: &SymbolTable) -> TypeDescriptor {
    match name.to_ascii_uppercase().as_str() {
        "BYTE" => TypeDescriptor::simple(BaseType::Byte),
        "SHORT" => TypeDescriptor::simple(BaseType::Short),
        "INTEGER" => TypeDescriptor::simple(BaseType::Integer),
        "LONG" => TypeDescriptor::simple(BaseType::Long),
        "SINGLE" => TypeDescriptor::simple(BaseType::Single),
        "DOUBLE" => TypeDescriptor::simple(BaseType::Double),
        "STRING" => TypeDescriptor::simple(BaseType::String),
        "UNICODE" => TypeDescriptor::simple(BaseType::Unicode),
        "OBJECT" => TypeDescriptor::simple(BaseType::Object),
        "LIST" => TypeDescriptor::list_of_any(),
        other => {
            if table.classes.contains_key(other) {
                TypeDescriptor::class(name)
            } else {
                TypeDescriptor::udt(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ConstantDecl, Line, RoutineDecl};
    use crate::data_prep::DataSegment;
    use crate::token::Location;
    use crate::types::BaseType;

    fn loc() -> Location {
        Location::new(1, 1)
    }

    #[test]
    fn duplicate_line_number_is_an_error() {
        let mut program = Program::new();
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![],
            location: loc(),
        });
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![],
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, CompileError::DuplicateDeclaration { .. })));
    }

    #[test]
    fn explicit_mode_flags_undeclared_variable() {
        let mut program = Program::new();
        let mut options = CompileOptions::default();
        options.explicit = true;
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![Statement::ExprStatement {
                expr: Expr::Variable("X".to_string()),
                location: loc(),
            }],
            location: loc(),
        });
        let out = analyze(&program, options, DataSegment::default());
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, CompileError::UndeclaredVariable { .. })));
    }

    #[test]
    fn implicit_mode_allows_undeclared_variable() {
        let mut program = Program::new();
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![Statement::ExprStatement {
                expr: Expr::Variable("X".to_string()),
                location: loc(),
            }],
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert!(out.errors.is_empty());
    }

    #[test]
    fn goto_to_unknown_line_is_an_error() {
        let mut program = Program::new();
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![Statement::Goto {
                target: crate::ast::GotoTarget::Number(999),
                location: loc(),
            }],
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, CompileError::UnknownTarget { .. })));
    }

    #[test]
    fn exit_for_outside_a_loop_is_invalid() {
        let mut program = Program::new();
        program.lines.push(Line {
            number: Some(10),
            label: None,
            statements: vec![Statement::Exit {
                kind: ExitKind::For,
                location: loc(),
            }],
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert!(out
            .errors
            .iter()
            .any(|e| matches!(e, CompileError::InvalidControlFlow { .. })));
    }

    #[test]
    fn constant_forward_reference_resolves() {
        let mut program = Program::new();
        program.constants.push(ConstantDecl {
            name: "A".to_string(),
            value: Expr::Variable("B".to_string()),
            location: loc(),
        });
        program.constants.push(ConstantDecl {
            name: "B".to_string(),
            value: Expr::NumberLiteral(5.0),
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert_eq!(
            out.table.lookup_constant("A").unwrap().value,
            ConstValue::Int(5)
        );
    }

    #[test]
    fn lossy_narrowing_assignment_is_only_a_warning() {
        let mut program = Program::new();
        program.routines.push(RoutineDecl {
            kind: RoutineKind::Sub,
            name: "MAIN".to_string(),
            params: vec![],
            return_type: None,
            body: vec![
                Statement::Dim {
                    specs: vec![crate::ast::DimSpec {
                        name: "A_LONG".to_string(),
                        ty: TypeDescriptor::simple(BaseType::Long),
                        dimensions: vec![],
                    }],
                    is_global: false,
                    location: loc(),
                },
                Statement::Dim {
                    specs: vec![crate::ast::DimSpec {
                        name: "B_INT".to_string(),
                        ty: TypeDescriptor::simple(BaseType::Integer),
                        dimensions: vec![],
                    }],
                    is_global: false,
                    location: loc(),
                },
                Statement::Assign {
                    target: LValue::Variable("B_INT".to_string()),
                    value: Expr::Variable("A_LONG".to_string()),
                    location: loc(),
                },
            ],
            location: loc(),
        });
        let out = analyze(&program, CompileOptions::default(), DataSegment::default());
        assert!(out.errors.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }
}
