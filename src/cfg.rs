//! CFG builder (C10)
//!
//! Converts the statement list of one executable unit — the implicit
//! `main`, a named `SUB`/`FUNCTION`, or a synthesized inline-timer body —
//! into a directed graph of `BasicBlock`s with explicit predecessor and
//! successor edges. Mirrors the teacher's `codegen/control_flow.rs` in
//! spirit (fresh block ids, an explicit merge block per construct) but
//! keeps the graph as its own data structure rather than interleaving it
//! with IR text emission, since the spec calls C10 and C11 out as separate
//! phases sharing nothing but the AST and symbol table.
//!
//! `GOTO`/`GOSUB`/`ON ... GOTO|GOSUB` targets are only resolvable at the
//! main-scope CFG, because `SymbolTable::lines`/`labels` are populated only
//! from `Program::lines` (spec.md §3 data model). A jump out of a `SUB`/
//! `FUNCTION` body to a top-level line is represented as `Terminator::Jump`
//! into a sentinel `EXTERNAL_TARGET` block id that codegen lowers to a
//! direct call into the main routine's generated label — see DESIGN.md.

use std::collections::HashMap;

use crate::ast::{
    CaseArm, CatchClause, Expr, ExitKind, GotoTarget, MatchTypeArm, Program, RoutineDecl,
    Statement, TimerKind,
};
use crate::symbols::SymbolTable;

pub type BlockId = usize;

/// Sentinel id recorded as the successor of a `GOTO`/`GOSUB` whose target
/// lives outside the CFG currently being built (a cross-routine jump).
pub const EXTERNAL_TARGET: BlockId = usize::MAX;

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    /// Placeholder used while a block is still being filled in; replaced
    /// before the builder returns.
    Unset,
    Jump(BlockId),
    CondBranch {
        cond: Expr,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// `FOR`/step back-edge is just a `Jump`; this variant is only used for
    /// the `FOR EACH` header, whose "any elements left?" test is a runtime
    /// iterator call rather than a plain boolean `Expr`.
    ForEachHeader {
        var: String,
        type_tag_var: Option<String>,
        collection: Expr,
        body: BlockId,
        merge: BlockId,
    },
    /// A counted `FOR` loop's test: `var` compared against `limit`, in the
    /// direction implied by `step`'s sign (ascending when `step` is absent
    /// or non-negative). Codegen lowers the comparison and the matching
    /// increment in the loop's step block from this one terminator, since
    /// the init/increment need the same `step` expression the header tests.
    ForHeader {
        var: String,
        limit: Expr,
        step: Option<Expr>,
        body: BlockId,
        merge: BlockId,
    },
    Switch {
        discriminant: Expr,
        arms: Vec<(Vec<crate::ast::CaseMatch>, BlockId)>,
        default: BlockId,
    },
    MatchType {
        discriminant: Expr,
        arms: Vec<(String, String, BlockId)>,
        default: BlockId,
    },
    /// A protected region: control enters `body`; on an exception the
    /// runtime dispatches to the first matching entry in `catches`; on
    /// normal or caught completion control flows into `finally` (if any)
    /// and then `after`.
    TryRegion {
        body: BlockId,
        catches: Vec<(CatchClause, BlockId)>,
        finally: Option<BlockId>,
        after: BlockId,
    },
    Gosub {
        target: BlockId,
        resume: BlockId,
    },
    /// `ON expr GOTO/GOSUB l1, l2, ...`; `resume` is `Some` only for the
    /// `GOSUB` form.
    OnGoto {
        selector: Expr,
        targets: Vec<BlockId>,
        is_gosub: bool,
        resume: Option<BlockId>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    /// Falls off the end of the routine with no explicit `RETURN`.
    ImplicitReturn,
}

#[derive(Debug)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
}

impl Cfg {
    /// Every non-entry block has at least one predecessor, every
    /// non-terminating block has at least one successor, and the two edge
    /// lists agree — the invariant spec.md §8 calls out for testing.
    pub fn check_integrity(&self) -> Result<(), String> {
        for block in &self.blocks {
            if block.id != self.entry && block.predecessors.is_empty() {
                return Err(format!("block {} has no predecessors", block.id));
            }
            if !matches!(
                block.terminator,
                Terminator::Return(_) | Terminator::Throw(_) | Terminator::ImplicitReturn
            ) && block.successors.is_empty()
            {
                return Err(format!("non-terminating block {} has no successors", block.id));
            }
            for &succ in &block.successors {
                if succ == EXTERNAL_TARGET {
                    continue;
                }
                let target = &self.blocks[succ];
                if !target.predecessors.contains(&block.id) {
                    return Err(format!(
                        "edge {} -> {} missing reciprocal predecessor",
                        block.id, succ
                    ));
                }
            }
        }
        Ok(())
    }
}

struct LoopCtx {
    kind_merge: HashMap<ExitForKind, BlockId>,
}

/// `EXIT` statements only name the four loop kinds plus `SUB`/`FUNCTION`;
/// this mirrors `ast::ExitKind` but excludes the routine-level variants,
/// which are handled separately via `Builder::routine_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ExitForKind {
    For,
    While,
    Do,
    Repeat,
}

fn exit_for_kind(kind: ExitKind) -> Option<ExitForKind> {
    match kind {
        ExitKind::For => Some(ExitForKind::For),
        ExitKind::While => Some(ExitForKind::While),
        ExitKind::Do => Some(ExitForKind::Do),
        ExitKind::Repeat => Some(ExitForKind::Repeat),
        ExitKind::Sub | ExitKind::Function => None,
    }
}

struct Builder {
    blocks: Vec<BasicBlock>,
    /// Resolves a `GotoTarget` to a block id in *this* CFG, or `None` if
    /// the target is only known at main scope (cross-routine jump).
    line_targets: HashMap<u32, BlockId>,
    label_targets: HashMap<String, BlockId>,
    loop_stack: Vec<LoopCtx>,
    /// Block every `EXIT SUB`/`EXIT FUNCTION` and fallthrough-off-the-end
    /// jumps to: the routine's single return point.
    routine_exit: BlockId,
}

impl Builder {
    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            statements: Vec::new(),
            terminator: Terminator::Unset,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if to == EXTERNAL_TARGET {
            self.blocks[from].successors.push(EXTERNAL_TARGET);
            return;
        }
        self.blocks[from].successors.push(to);
        self.blocks[to].predecessors.push(from);
    }

    fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block].terminator = term;
    }

    fn resolve(&self, target: &GotoTarget) -> BlockId {
        match target {
            GotoTarget::Number(n) => self.line_targets.get(n).copied().unwrap_or(EXTERNAL_TARGET),
            GotoTarget::Label(name) => self
                .label_targets
                .get(&name.to_ascii_uppercase())
                .copied()
                .unwrap_or(EXTERNAL_TARGET),
        }
    }

    /// Build `stmts` starting at `current`; returns the block that normal
    /// (non-branching) control falls through to next, or `None` if every
    /// path out of `stmts` already ended in a terminator.
    fn build_stmts(&mut self, stmts: &[Statement], mut current: BlockId) -> Option<BlockId> {
        for stmt in stmts {
            current = self.build_stmt(stmt, current)?;
        }
        Some(current)
    }

    fn build_stmt(&mut self, stmt: &Statement, current: BlockId) -> Option<BlockId> {
        match stmt {
            Statement::If {
                condition,
                then_branch,
                else_ifs,
                else_branch,
                ..
            } => {
                let merge = self.new_block();
                let mut test_block = current;
                let mut arms: Vec<(Expr, &[Statement])> = vec![(condition.clone(), then_branch)];
                for (cond, body) in else_ifs {
                    arms.push((cond.clone(), body));
                }
                let mut open_ends: Vec<BlockId> = Vec::new();
                for (i, (cond, body)) in arms.iter().enumerate() {
                    let then_entry = self.new_block();
                    let is_last = i + 1 == arms.len();
                    let else_entry = if is_last {
                        if else_branch.is_some() {
                            self.new_block()
                        } else {
                            merge
                        }
                    } else {
                        self.new_block()
                    };
                    self.set_terminator(
                        test_block,
                        Terminator::CondBranch {
                            cond: cond.clone(),
                            then_block: then_entry,
                            else_block: else_entry,
                        },
                    );
                    self.add_edge(test_block, then_entry);
                    self.add_edge(test_block, else_entry);
                    if let Some(end) = self.build_stmts(body, then_entry) {
                        open_ends.push(end);
                    }
                    test_block = else_entry;
                }
                if let Some(else_body) = else_branch {
                    if let Some(end) = self.build_stmts(else_body, test_block) {
                        open_ends.push(end);
                    }
                }
                for end in open_ends {
                    self.set_terminator(end, Terminator::Jump(merge));
                    self.add_edge(end, merge);
                }
                if self.blocks[merge].predecessors.is_empty() {
                    // every arm terminated (e.g. all branches RETURN)
                    None
                } else {
                    Some(merge)
                }
            }

            Statement::For {
                var,
                start,
                end,
                step,
                body,
                location,
            } => {
                self.blocks[current].statements.push(Statement::Assign {
                    target: crate::ast::LValue::Variable(var.clone()),
                    value: start.clone(),
                    location: *location,
                });
                let header = self.new_block();
                let step_block = self.new_block();
                let body_entry = self.new_block();
                let merge = self.new_block();
                self.set_terminator(current, Terminator::Jump(header));
                self.add_edge(current, header);
                self.set_terminator(
                    header,
                    Terminator::ForHeader {
                        var: var.clone(),
                        limit: end.clone(),
                        step: step.clone(),
                        body: body_entry,
                        merge,
                    },
                );
                self.add_edge(header, body_entry);
                self.add_edge(header, merge);
                self.loop_stack.push(LoopCtx {
                    kind_merge: HashMap::from([(ExitForKind::For, merge)]),
                });
                let body_end = self.build_stmts(body, body_entry);
                self.loop_stack.pop();
                if let Some(end) = body_end {
                    self.set_terminator(end, Terminator::Jump(step_block));
                    self.add_edge(end, step_block);
                }
                let step_value = step.clone().unwrap_or(Expr::NumberLiteral(1.0));
                self.blocks[step_block].statements.push(Statement::Assign {
                    target: crate::ast::LValue::Variable(var.clone()),
                    value: Expr::Binary {
                        op: crate::ast::BinOp::Add,
                        lhs: Box::new(Expr::Variable(var.clone())),
                        rhs: Box::new(step_value),
                    },
                    location: *location,
                });
                self.set_terminator(step_block, Terminator::Jump(header));
                self.add_edge(step_block, header);
                Some(merge)
            }

            Statement::ForEach {
                var,
                type_tag_var,
                collection,
                body,
                ..
            } => {
                let header = self.new_block();
                let body_entry = self.new_block();
                let merge = self.new_block();
                self.set_terminator(current, Terminator::Jump(header));
                self.add_edge(current, header);
                self.set_terminator(
                    header,
                    Terminator::ForEachHeader {
                        var: var.clone(),
                        type_tag_var: type_tag_var.clone(),
                        collection: collection.clone(),
                        body: body_entry,
                        merge,
                    },
                );
                self.add_edge(header, body_entry);
                self.add_edge(header, merge);
                self.loop_stack.push(LoopCtx {
                    kind_merge: HashMap::from([(ExitForKind::For, merge)]),
                });
                let body_end = self.build_stmts(body, body_entry);
                self.loop_stack.pop();
                if let Some(end) = body_end {
                    self.set_terminator(end, Terminator::Jump(header));
                    self.add_edge(end, header);
                }
                Some(merge)
            }

            Statement::While { condition, body, .. } => {
                let header = self.new_block();
                let body_entry = self.new_block();
                let merge = self.new_block();
                self.set_terminator(current, Terminator::Jump(header));
                self.add_edge(current, header);
                self.set_terminator(
                    header,
                    Terminator::CondBranch {
                        cond: condition.clone(),
                        then_block: body_entry,
                        else_block: merge,
                    },
                );
                self.add_edge(header, body_entry);
                self.add_edge(header, merge);
                self.loop_stack.push(LoopCtx {
                    kind_merge: HashMap::from([(ExitForKind::While, merge)]),
                });
                let body_end = self.build_stmts(body, body_entry);
                self.loop_stack.pop();
                if let Some(end) = body_end {
                    self.set_terminator(end, Terminator::Jump(header));
                    self.add_edge(end, header);
                }
                Some(merge)
            }

            Statement::Repeat { body, until, .. } => {
                let body_entry = self.new_block();
                let tail = self.new_block();
                let merge = self.new_block();
                self.set_terminator(current, Terminator::Jump(body_entry));
                self.add_edge(current, body_entry);
                self.loop_stack.push(LoopCtx {
                    kind_merge: HashMap::from([(ExitForKind::Repeat, merge)]),
                });
                let body_end = self.build_stmts(body, body_entry);
                self.loop_stack.pop();
                if let Some(end) = body_end {
                    self.set_terminator(end, Terminator::Jump(tail));
                    self.add_edge(end, tail);
                }
                self.set_terminator(
                    tail,
                    Terminator::CondBranch {
                        cond: until.clone(),
                        then_block: merge,
                        else_block: body_entry,
                    },
                );
                self.add_edge(tail, merge);
                self.add_edge(tail, body_entry);
                Some(merge)
            }

            Statement::DoLoop {
                body,
                pre_test,
                post_test,
                ..
            } => {
                let merge = self.new_block();
                if let Some((is_until, cond)) = pre_test {
                    let header = self.new_block();
                    let body_entry = self.new_block();
                    self.set_terminator(current, Terminator::Jump(header));
                    self.add_edge(current, header);
                    let (then_b, else_b) = if *is_until {
                        (merge, body_entry)
                    } else {
                        (body_entry, merge)
                    };
                    self.set_terminator(
                        header,
                        Terminator::CondBranch {
                            cond: cond.clone(),
                            then_block: then_b,
                            else_block: else_b,
                        },
                    );
                    self.add_edge(header, then_b);
                    self.add_edge(header, else_b);
                    self.loop_stack.push(LoopCtx {
                        kind_merge: HashMap::from([(ExitForKind::Do, merge)]),
                    });
                    let body_end = self.build_stmts(body, body_entry);
                    self.loop_stack.pop();
                    if let Some(end) = body_end {
                        self.set_terminator(end, Terminator::Jump(header));
                        self.add_edge(end, header);
                    }
                } else if let Some((is_until, cond)) = post_test {
                    let body_entry = self.new_block();
                    let tail = self.new_block();
                    self.set_terminator(current, Terminator::Jump(body_entry));
                    self.add_edge(current, body_entry);
                    self.loop_stack.push(LoopCtx {
                        kind_merge: HashMap::from([(ExitForKind::Do, merge)]),
                    });
                    let body_end = self.build_stmts(body, body_entry);
                    self.loop_stack.pop();
                    if let Some(end) = body_end {
                        self.set_terminator(end, Terminator::Jump(tail));
                        self.add_edge(end, tail);
                    }
                    let (then_b, else_b) = if *is_until {
                        (merge, body_entry)
                    } else {
                        (body_entry, merge)
                    };
                    self.set_terminator(
                        tail,
                        Terminator::CondBranch {
                            cond: cond.clone(),
                            then_block: then_b,
                            else_block: else_b,
                        },
                    );
                    self.add_edge(tail, then_b);
                    self.add_edge(tail, else_b);
                } else {
                    // infinite DO...LOOP with no test; only EXIT DO escapes.
                    let body_entry = self.new_block();
                    self.set_terminator(current, Terminator::Jump(body_entry));
                    self.add_edge(current, body_entry);
                    self.loop_stack.push(LoopCtx {
                        kind_merge: HashMap::from([(ExitForKind::Do, merge)]),
                    });
                    let body_end = self.build_stmts(body, body_entry);
                    self.loop_stack.pop();
                    if let Some(end) = body_end {
                        self.set_terminator(end, Terminator::Jump(body_entry));
                        self.add_edge(end, body_entry);
                    }
                }
                if self.blocks[merge].predecessors.is_empty() {
                    None
                } else {
                    Some(merge)
                }
            }

            Statement::SelectCase {
                discriminant,
                arms,
                otherwise,
                ..
            } => self.build_select_case(current, discriminant, arms, otherwise),

            Statement::MatchType {
                discriminant, arms, ..
            } => self.build_match_type(current, discriminant, arms),

            Statement::TryCatchFinally {
                try_body,
                catches,
                finally,
                ..
            } => self.build_try(current, try_body, catches, finally.as_deref()),

            Statement::Exit { kind, .. } => {
                if let Some(for_kind) = exit_for_kind(*kind) {
                    let target = self
                        .loop_stack
                        .iter()
                        .rev()
                        .find_map(|ctx| ctx.kind_merge.get(&for_kind).copied())
                        .unwrap_or(self.routine_exit);
                    self.set_terminator(current, Terminator::Jump(target));
                    self.add_edge(current, target);
                } else {
                    self.set_terminator(current, Terminator::Jump(self.routine_exit));
                    self.add_edge(current, self.routine_exit);
                }
                None
            }

            Statement::Goto { target, .. } => {
                let dest = self.resolve(target);
                self.set_terminator(current, Terminator::Jump(dest));
                self.add_edge(current, dest);
                None
            }

            Statement::Gosub { target, .. } => {
                let dest = self.resolve(target);
                let resume = self.new_block();
                self.set_terminator(
                    current,
                    Terminator::Gosub {
                        target: dest,
                        resume,
                    },
                );
                self.add_edge(current, dest);
                self.add_edge(current, resume);
                Some(resume)
            }

            Statement::OnGoto {
                selector,
                targets,
                is_gosub,
                ..
            } => {
                let dests: Vec<BlockId> = targets.iter().map(|t| self.resolve(t)).collect();
                let resume = if *is_gosub {
                    Some(self.new_block())
                } else {
                    None
                };
                for &d in &dests {
                    self.add_edge(current, d);
                }
                if let Some(r) = resume {
                    self.add_edge(current, r);
                }
                self.set_terminator(
                    current,
                    Terminator::OnGoto {
                        selector: selector.clone(),
                        targets: dests,
                        is_gosub: *is_gosub,
                        resume,
                    },
                );
                resume
            }

            Statement::Return { value, .. } => {
                self.set_terminator(current, Terminator::Return(value.clone()));
                None
            }

            Statement::Throw { code, .. } => {
                self.set_terminator(current, Terminator::Throw(code.clone()));
                None
            }

            // Simple, non-branching statements accumulate into the
            // current block.
            Statement::Dim { .. }
            | Statement::Redim { .. }
            | Statement::Assign { .. }
            | Statement::Print { .. }
            | Statement::Input { .. }
            | Statement::CallStatement { .. }
            | Statement::ExprStatement { .. }
            | Statement::OnCall { .. }
            | Statement::Restore { .. }
            | Statement::Read { .. }
            | Statement::Delete { .. }
            | Statement::Timer { .. }
            | Statement::Label { .. } => {
                self.blocks[current].statements.push(stmt.clone());
                Some(current)
            }
        }
    }

    fn build_select_case(
        &mut self,
        current: BlockId,
        discriminant: &Expr,
        arms: &[CaseArm],
        otherwise: &Option<Vec<Statement>>,
    ) -> Option<BlockId> {
        let merge = self.new_block();
        let default = if otherwise.is_some() {
            self.new_block()
        } else {
            merge
        };
        let mut arm_blocks = Vec::with_capacity(arms.len());
        for arm in arms {
            let entry = self.new_block();
            arm_blocks.push((arm.matches.clone(), entry));
            self.add_edge(current, entry);
            if let Some(end) = self.build_stmts(&arm.body, entry) {
                self.set_terminator(end, Terminator::Jump(merge));
                self.add_edge(end, merge);
            }
        }
        self.add_edge(current, default);
        if let Some(otherwise_body) = otherwise {
            if let Some(end) = self.build_stmts(otherwise_body, default) {
                self.set_terminator(end, Terminator::Jump(merge));
                self.add_edge(end, merge);
            }
        }
        self.set_terminator(
            current,
            Terminator::Switch {
                discriminant: discriminant.clone(),
                arms: arm_blocks,
                default,
            },
        );
        if self.blocks[merge].predecessors.is_empty() {
            None
        } else {
            Some(merge)
        }
    }

    fn build_match_type(
        &mut self,
        current: BlockId,
        discriminant: &Expr,
        arms: &[MatchTypeArm],
    ) -> Option<BlockId> {
        let merge = self.new_block();
        let mut arm_blocks = Vec::with_capacity(arms.len());
        for arm in arms {
            let entry = self.new_block();
            arm_blocks.push((arm.bound_type.clone(), arm.binding.clone(), entry));
            self.add_edge(current, entry);
            if let Some(end) = self.build_stmts(&arm.body, entry) {
                self.set_terminator(end, Terminator::Jump(merge));
                self.add_edge(end, merge);
            }
        }
        self.add_edge(current, merge);
        self.set_terminator(
            current,
            Terminator::MatchType {
                discriminant: discriminant.clone(),
                arms: arm_blocks,
                default: merge,
            },
        );
        if self.blocks[merge].predecessors.is_empty() {
            None
        } else {
            Some(merge)
        }
    }

    fn build_try(
        &mut self,
        current: BlockId,
        try_body: &[Statement],
        catches: &[CatchClause],
        finally: Option<&[Statement]>,
    ) -> Option<BlockId> {
        let body_entry = self.new_block();
        let finally_entry = finally.map(|_| self.new_block());
        let after = self.new_block();

        self.add_edge(current, body_entry);
        let mut open_ends = Vec::new();
        if let Some(end) = self.build_stmts(try_body, body_entry) {
            open_ends.push(end);
        }

        let mut catch_blocks = Vec::with_capacity(catches.len());
        for catch in catches {
            let entry = self.new_block();
            catch_blocks.push((catch.clone(), entry));
            self.add_edge(current, entry);
            if let Some(end) = self.build_stmts(&catch.body, entry) {
                open_ends.push(end);
            }
        }

        let land = finally_entry.unwrap_or(after);
        for end in open_ends {
            self.set_terminator(end, Terminator::Jump(land));
            self.add_edge(end, land);
        }
        if let (Some(fin_entry), Some(fin_body)) = (finally_entry, finally) {
            self.add_edge(current, fin_entry);
            if let Some(end) = self.build_stmts(fin_body, fin_entry) {
                self.set_terminator(end, Terminator::Jump(after));
                self.add_edge(end, after);
            }
        }

        self.set_terminator(
            current,
            Terminator::TryRegion {
                body: body_entry,
                catches: catch_blocks,
                finally: finally_entry,
                after,
            },
        );
        if self.blocks[after].predecessors.is_empty() {
            None
        } else {
            Some(after)
        }
    }

    /// Resolve `GOSUB`/`ON ... GOSUB` return edges after the whole body has
    /// been built: every bare `RETURN` (no value) reachable from the
    /// callee's entry is wired back to that call's resume block, per
    /// spec.md §4.5.
    fn wire_gosub_returns(&mut self) {
        let mut pending: Vec<(BlockId, BlockId)> = Vec::new();
        for block in &self.blocks {
            match &block.terminator {
                Terminator::Gosub { target, resume } => pending.push((*target, *resume)),
                Terminator::OnGoto {
                    targets,
                    is_gosub: true,
                    resume: Some(resume),
                    ..
                } => {
                    for &t in targets {
                        pending.push((t, *resume));
                    }
                }
                _ => {}
            }
        }
        for (target, resume) in pending {
            if target == EXTERNAL_TARGET {
                continue;
            }
            let reachable = self.reachable_from(target);
            for id in reachable {
                if matches!(self.blocks[id].terminator, Terminator::Return(None)) {
                    self.add_edge(id, resume);
                }
            }
        }
    }

    fn reachable_from(&self, start: BlockId) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![start];
        let mut out = Vec::new();
        while let Some(id) = stack.pop() {
            if id == EXTERNAL_TARGET || seen[id] {
                continue;
            }
            seen[id] = true;
            out.push(id);
            for &succ in &self.blocks[id].successors {
                if succ != EXTERNAL_TARGET && !seen[succ] {
                    stack.push(succ);
                }
            }
        }
        out
    }
}

/// Build the CFG for the implicit top-level `main` routine: one flattened
/// pass over `Program::lines`, with one pre-allocated entry block per
/// physical line so forward `GOTO`/`GOSUB` targets resolve on first sight.
pub fn build_main_cfg(program: &Program, table: &SymbolTable) -> Cfg {
    let mut builder = Builder {
        blocks: Vec::new(),
        line_targets: HashMap::new(),
        label_targets: HashMap::new(),
        loop_stack: Vec::new(),
        routine_exit: 0,
    };
    let entry = builder.new_block();
    let exit = builder.new_block();
    builder.routine_exit = exit;

    if program.lines.is_empty() {
        builder.set_terminator(entry, Terminator::Jump(exit));
        builder.add_edge(entry, exit);
        builder.set_terminator(exit, Terminator::ImplicitReturn);
        return Cfg {
            blocks: builder.blocks,
            entry,
        };
    }

    let mut line_entry: Vec<BlockId> = Vec::with_capacity(program.lines.len());
    for _ in &program.lines {
        line_entry.push(builder.new_block());
    }
    for (n, idx) in &table.lines {
        if let Some(&b) = line_entry.get(*idx) {
            builder.line_targets.insert(*n, b);
        }
    }
    for (label, idx) in &table.labels {
        if let Some(&b) = line_entry.get(*idx) {
            builder.label_targets.insert(label.clone(), b);
        }
    }

    builder.set_terminator(entry, Terminator::Jump(line_entry[0]));
    builder.add_edge(entry, line_entry[0]);

    let mut current = line_entry.first().copied();
    for (idx, line) in program.lines.iter().enumerate() {
        let this_block = line_entry[idx];
        if let Some(c) = current {
            if c != this_block {
                builder.set_terminator(c, Terminator::Jump(this_block));
                builder.add_edge(c, this_block);
            }
        }
        current = builder.build_stmts(&line.statements, this_block);
    }
    if let Some(c) = current {
        builder.set_terminator(c, Terminator::Jump(exit));
        builder.add_edge(c, exit);
    }
    builder.set_terminator(exit, Terminator::ImplicitReturn);

    builder.wire_gosub_returns();
    Cfg {
        blocks: builder.blocks,
        entry,
    }
}

/// Build the CFG for one `SUB`/`FUNCTION`/synthesized timer-handler body.
/// `GOTO`/`GOSUB` inside a routine can only target top-level lines/labels
/// (spec.md open question — preserved as a cross-routine jump, see module
/// doc comment), so `line_targets`/`label_targets` stay empty here.
pub fn build_routine_cfg(body: &[Statement]) -> Cfg {
    let mut builder = Builder {
        blocks: Vec::new(),
        line_targets: HashMap::new(),
        label_targets: HashMap::new(),
        loop_stack: Vec::new(),
        routine_exit: 0,
    };
    let entry = builder.new_block();
    let exit = builder.new_block();
    builder.routine_exit = exit;
    let end = builder.build_stmts(body, entry);
    if let Some(e) = end {
        builder.set_terminator(e, Terminator::Jump(exit));
        builder.add_edge(e, exit);
    }
    builder.set_terminator(exit, Terminator::ImplicitReturn);
    builder.wire_gosub_returns();
    Cfg {
        blocks: builder.blocks,
        entry,
    }
}

pub fn build_routine(decl: &RoutineDecl) -> Cfg {
    build_routine_cfg(&decl.body)
}

/// Build CFGs for every executable unit in the program: main plus every
/// `SUB`/`FUNCTION`/`DEF FN`/timer handler.
pub fn build_program(program: &Program, table: &SymbolTable) -> HashMap<String, Cfg> {
    let mut out = HashMap::new();
    out.insert("$MAIN".to_string(), build_main_cfg(program, table));
    for routine in &program.routines {
        out.insert(routine.name.to_ascii_uppercase(), build_routine(routine));
    }
    out
}

/// Lowercases a `TimerKind` into the runtime registration function name
/// (spec.md §6 external runtime interface); used by `codegen` but kept
/// here since it's purely a property of the statement shape `cfg` already
/// understands.
pub fn timer_runtime_fn(kind: TimerKind) -> &'static str {
    match kind {
        TimerKind::After => "timer_after",
        TimerKind::Every => "timer_every",
        TimerKind::AfterFrames => "timer_after_frames",
        TimerKind::EveryFrame => "timer_every_frame",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Location;

    fn loc() -> Location {
        Location::default()
    }

    #[test]
    fn straight_line_body_has_no_branches() {
        let body = vec![
            Statement::ExprStatement {
                expr: Expr::NumberLiteral(1.0),
                location: loc(),
            },
            Statement::ExprStatement {
                expr: Expr::NumberLiteral(2.0),
                location: loc(),
            },
        ];
        let cfg = build_routine_cfg(&body);
        cfg.check_integrity().unwrap();
        assert!(matches!(
            cfg.blocks[cfg.entry].terminator,
            Terminator::Jump(_)
        ));
    }

    #[test]
    fn if_without_else_has_merge_with_two_predecessors() {
        let body = vec![Statement::If {
            condition: Expr::NumberLiteral(1.0),
            then_branch: vec![Statement::ExprStatement {
                expr: Expr::NumberLiteral(1.0),
                location: loc(),
            }],
            else_ifs: vec![],
            else_branch: None,
            location: loc(),
        }];
        let cfg = build_routine_cfg(&body);
        cfg.check_integrity().unwrap();
        let branch_block = &cfg.blocks[cfg.entry];
        assert!(matches!(
            branch_block.terminator,
            Terminator::CondBranch { .. }
        ));
    }

    #[test]
    fn for_loop_produces_header_body_step_merge() {
        let body = vec![Statement::For {
            var: "I".to_string(),
            start: Expr::NumberLiteral(1.0),
            end: Expr::NumberLiteral(3.0),
            step: None,
            body: vec![Statement::ExprStatement {
                expr: Expr::Variable("I".to_string()),
                location: loc(),
            }],
            location: loc(),
        }];
        let cfg = build_routine_cfg(&body);
        cfg.check_integrity().unwrap();
        let header_block = cfg.blocks.iter().find(|b| {
            matches!(b.terminator, Terminator::ForHeader { .. }) && b.predecessors.len() == 2
        });
        assert!(header_block.is_some(), "expected a header with a back-edge");
    }

    #[test]
    fn exit_for_jumps_to_loop_merge_not_routine_exit() {
        let body = vec![Statement::For {
            var: "I".to_string(),
            start: Expr::NumberLiteral(1.0),
            end: Expr::NumberLiteral(3.0),
            step: None,
            body: vec![Statement::Exit {
                kind: ExitKind::For,
                location: loc(),
            }],
            location: loc(),
        }];
        let cfg = build_routine_cfg(&body);
        cfg.check_integrity().unwrap();
    }

    #[test]
    fn try_catch_finally_links_all_regions_into_after() {
        let body = vec![Statement::TryCatchFinally {
            try_body: vec![Statement::Throw {
                code: Expr::NumberLiteral(42.0),
                location: loc(),
            }],
            catches: vec![CatchClause {
                codes: vec![42],
                body: vec![Statement::ExprStatement {
                    expr: Expr::NumberLiteral(0.0),
                    location: loc(),
                }],
            }],
            finally: Some(vec![Statement::ExprStatement {
                expr: Expr::NumberLiteral(0.0),
                location: loc(),
            }]),
            location: loc(),
        }];
        let cfg = build_routine_cfg(&body);
        cfg.check_integrity().unwrap();
        assert!(cfg
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Terminator::TryRegion { .. })));
    }
}
