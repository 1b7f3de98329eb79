//! The statement/expression evaluator (spec.md §4.6, §6).
//!
//! Grounded on `original_source/analyser.py`'s `readblock`/`_analyseexpr`
//! and `types.py`'s `_analyseexpr`: walking the tree *is* the analysis —
//! there is no separate IR. Written once, generic over [`Ctx`], so the
//! same code evaluates a file's top-level statements against the global
//! [`crate::context::TypingContext`], a loop body against an
//! [`crate::context::AutoTypingContext`], and a function body against a
//! [`crate::context::LocalTypingContext`] — exactly how the teacher's
//! `TypeInferenceBuilder` is written once and reused across scope kinds.
//!
//! Two behaviours are deliberately redesigned relative to the original
//! (see DESIGN.md): `while` bodies are run through the same
//! [`crate::context::fixpoint`] machinery as `foreach` instead of being
//! evaluated exactly once in place, and `(prim)` casts actually produce a
//! cast type instead of silently discarding the operand's type.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{BinOp, BuiltinConst, ExprKind, ExprNode, FunctionDef, StmtKind, StmtNode, SwitchCase, UnOp};
use crate::analyser::IncludeLoader;
use crate::context::{fixpoint, AutoTypingContext, Ctx, ContextOverlay, LocalTypingContext, union_overlay_deltas};

/// Runs [`fixpoint`] and, on non-convergence, reports the resulting
/// [`crate::context::FixpointError`] through `warn` (mirroring it via
/// `tracing::warn!` inside `fixpoint` itself) before falling back to the
/// widened context it carries — a `while`/`foreach` body that never
/// stabilises still gets an answer, just a less precise one.
fn run_fixpoint(
    loop_ctx: &AutoTypingContext,
    warn: &WarnSink,
    arena: &mut ParamArena,
    max_iterations: usize,
) -> AutoTypingContext {
    match fixpoint(loop_ctx, warn, arena, max_iterations) {
        Ok(result) => result,
        Err(e) => {
            warn.warn(&e.to_string());
            e.widened
        }
    }
}
use crate::function::{apply_fun, FunType};
use crate::matching::array_elt;
use crate::types::{cast, join, mk_trusted, ParamArena, Prim, Type, VarId};
use crate::warn::WarnSink;
use crate::analyser::AnalyserConfig;

/// Everything evaluation needs besides the active [`Ctx`]: the mutable
/// registries an `Analyser` owns, plus the host's include resolver.
pub struct Env<'a, L: IncludeLoader> {
    pub arena: &'a mut ParamArena,
    pub funcs: &'a mut FxHashMap<String, FunType>,
    pub consts: &'a mut FxHashMap<String, Type>,
    pub included: &'a mut FxHashSet<String>,
    pub config: &'a AnalyserConfig,
    pub loader: &'a mut L,
}

/// How a statement finished: fell through normally, or unwound via
/// `return`/`break`/`continue`. `eval_block` stops at the first non-normal
/// result and propagates it to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Return,
    Break,
    Continue,
}

pub fn eval_block<L: IncludeLoader>(
    stmts: &[StmtNode],
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Flow {
    for s in stmts {
        let flow = eval_stmt(s, ctx, env, warn);
        if flow != Flow::Normal {
            return flow;
        }
    }
    Flow::Normal
}

pub fn eval_stmt<L: IncludeLoader>(
    stmt: &StmtNode,
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Flow {
    let located = warn.at_location(stmt.span);
    match &stmt.kind {
        StmtKind::Expr(e) => {
            // Bare expression-statements don't care about their result
            // and evaluate with warnings suppressed, matching the
            // original's trailing catch-all branch.
            eval_expr(e, ctx, env, &crate::warn::no_warn());
            Flow::Normal
        }
        StmtKind::Echo(e) => {
            // spec.md §4.6: echo only types its argument. Sinks like this
            // would be the natural point to assert html-escaping, but that
            // check isn't part of this lattice's current design.
            eval_expr(e, ctx, env, &located);
            Flow::Normal
        }
        StmtKind::Block(body) => eval_block(body, ctx, env, warn),
        StmtKind::If(cond, then_branch, else_branch) => {
            eval_expr(cond, ctx, env, &located);
            let then_delta = {
                let mut overlay = ContextOverlay::new(ctx);
                eval_stmt(then_branch, &mut overlay, env, warn);
                overlay.into_delta()
            };
            let else_delta = match else_branch {
                Some(eb) => {
                    let mut overlay = ContextOverlay::new(ctx);
                    eval_stmt(eb, &mut overlay, env, warn);
                    overlay.into_delta()
                }
                None => indexmap::IndexMap::new(),
            };
            let merged = union_overlay_deltas(&then_delta, &else_delta, ctx, env.arena);
            for (n, t) in merged {
                ctx.set(n, t, env.arena);
            }
            Flow::Normal
        }
        StmtKind::While(cond, body) => {
            eval_expr(cond, ctx, env, &located);
            if env.config.unify_while_with_fixpoint {
                let mut loop_ctx = AutoTypingContext::new();
                eval_stmt(body, &mut loop_ctx, env, warn);
                let result = run_fixpoint(&loop_ctx, warn, env.arena, env.config.max_fixpoint_iterations);
                result.apply_to(ctx, warn, env.arena);
            } else {
                eval_stmt(body, ctx, env, warn);
            }
            Flow::Normal
        }
        StmtKind::Foreach {
            array,
            key: _key,
            value,
            body,
        } => {
            let arr_t = eval_expr(array, ctx, env, &located);
            let elt = array_elt(&arr_t, env.arena, &located);
            ctx.set(VarId::Name(value.clone()), elt, env.arena);

            let mut loop_ctx = AutoTypingContext::new();
            eval_stmt(body, &mut loop_ctx, env, warn);
            let result = run_fixpoint(&loop_ctx, warn, env.arena, env.config.max_fixpoint_iterations);
            result.apply_to(ctx, warn, env.arena);
            Flow::Normal
        }
        StmtKind::For { init, test, step, body } => {
            for e in init {
                eval_expr(e, ctx, env, &located);
            }
            for e in test {
                eval_expr(e, ctx, env, &located);
            }
            for e in step {
                eval_expr(e, ctx, env, &located);
            }
            eval_stmt(body, ctx, env, warn);
            Flow::Normal
        }
        StmtKind::Return(e) => {
            let t = match e {
                Some(e) => eval_expr(e, ctx, env, &located),
                None => Type::Unset,
            };
            ctx.set(VarId::Return, t, env.arena);
            Flow::Return
        }
        StmtKind::GlobalDecl(names) => {
            ctx.mark_global(names);
            Flow::Normal
        }
        StmtKind::FunctionDecl(def) => {
            eval_function_decl(def, ctx, env, warn);
            Flow::Normal
        }
        StmtKind::Include(e) => {
            eval_expr(e, ctx, env, &located);
            if let ExprKind::StringLit(path) = &e.kind {
                load_and_run(path, ctx, env, warn, &located);
            }
            Flow::Normal
        }
        StmtKind::RequireOnce(e) => {
            eval_expr(e, ctx, env, &located);
            if let ExprKind::StringLit(path) = &e.kind {
                if env.included.insert(path.clone()) {
                    load_and_run(path, ctx, env, warn, &located);
                }
            }
            Flow::Normal
        }
        StmtKind::Switch(scrutinee, cases) => {
            eval_expr(scrutinee, ctx, env, &located);
            eval_switch(cases, ctx, env, warn)
        }
        StmtKind::Break => Flow::Break,
        StmtKind::Continue => Flow::Continue,
    }
}

fn eval_switch<L: IncludeLoader>(
    cases: &[SwitchCase],
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Flow {
    // PHP's switch falls through by default and each arm can affect the
    // enclosing scope differently depending on where control leaves, so
    // each case is modelled as its own branch overlay and the results
    // unioned, the same shape as if/else (spec.md §4.6 treats switch as a
    // sequence of conditionally-taken blocks).
    let mut deltas = Vec::with_capacity(cases.len());
    for case in cases {
        if let Some(test) = &case.test {
            eval_expr(test, ctx, env, &warn.on());
        }
        let mut overlay = ContextOverlay::new(ctx);
        eval_block(&case.body, &mut overlay, env, warn);
        deltas.push(overlay.into_delta());
    }
    let mut merged = indexmap::IndexMap::new();
    for delta in &deltas {
        merged = union_overlay_deltas(&merged, delta, ctx, env.arena);
    }
    for (n, t) in merged {
        ctx.set(n, t, env.arena);
    }
    Flow::Normal
}

fn load_and_run<L: IncludeLoader>(
    path: &str,
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
    located: &WarnSink,
) {
    match env.loader.load(path) {
        Ok(stmts) => {
            eval_block(&stmts, ctx, env, warn);
        }
        Err(e) => located.warn(&format!("{e}")),
    }
}

fn eval_function_decl<L: IncludeLoader>(
    def: &FunctionDef,
    _ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) {
    let mut local = LocalTypingContext::new(&def.params, def.name.clone(), env.arena);
    eval_block(&def.body, &mut local, env, warn);
    env.funcs.insert(def.name.clone(), local.as_function_type());
}

pub fn eval_expr<L: IncludeLoader>(
    expr: &ExprNode,
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Type {
    let located = warn.at_location(expr.span);
    match &expr.kind {
        ExprKind::Number(_) => mk_trusted(Type::Prim(Prim::Num)),
        ExprKind::StringLit(_) => mk_trusted(Type::Prim(Prim::Str)),
        ExprKind::BuiltinConstant(c) => eval_builtin_const(c),
        ExprKind::Variable(name) => ctx.get(&VarId::Name(name.clone()), &located.on(), env.arena),
        ExprKind::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx, env, &located),
        ExprKind::Unary(op, operand) => eval_unary(*op, operand, ctx, env, &located),
        ExprKind::Cast(prim, operand) => {
            let t = eval_expr(operand, ctx, env, &located);
            cast(&t, *prim, env.arena)
        }
        ExprKind::Ternary(cond, t, f) => {
            eval_expr(cond, ctx, env, &located);
            let a = eval_expr(t, ctx, env, &located);
            let b = eval_expr(f, ctx, env, &located);
            join(&a, &b, env.arena)
        }
        ExprKind::Call(name, args) => eval_call(name, args, ctx, env, &located),
        ExprKind::ArrayLiteral(elts) => {
            let mut acc = Type::Empty;
            for e in elts {
                let t = eval_expr(e, ctx, env, &located);
                acc = join(&acc, &t, env.arena);
            }
            Type::Arr(Box::new(acc))
        }
        ExprKind::ArrayAccess(container, index) => {
            let c = eval_expr(container, ctx, env, &located.on());
            eval_expr(index, ctx, env, &located.on());
            array_elt(&c, env.arena, &located.at("operator []"))
        }
    }
}

fn eval_builtin_const(c: &BuiltinConst) -> Type {
    match c {
        BuiltinConst::True | BuiltinConst::False => mk_trusted(Type::Prim(Prim::Bool)),
        BuiltinConst::Null => mk_trusted(Type::Prim(Prim::Null)),
        BuiltinConst::Magic(_) => mk_trusted(Type::Prim(Prim::Str)),
    }
}

fn eval_binary<L: IncludeLoader>(
    op: BinOp,
    lhs: &ExprNode,
    rhs: &ExprNode,
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Type {
    if op.is_assignment() {
        // spec.md §4.6: an assignment's l-value is never evaluated as a
        // read (that would only produce a spurious "may not have been
        // initialised" warning) — it stands in as `Mixed` wherever the
        // result type computation needs it.
        let rhs_t = eval_expr(rhs, ctx, env, warn);
        let result = if op == BinOp::Assign {
            rhs_t
        } else if op.is_numeric_assign() {
            numeric_result(&[Type::Mixed, rhs_t], env.arena)
        } else {
            // CatAssign
            string_result(&[Type::Mixed, rhs_t], env.arena)
        };
        if let ExprKind::Variable(name) = &lhs.kind {
            ctx.set(VarId::Name(name.clone()), result.clone(), env.arena);
        } else {
            warn.warn("unrecognised l-value, skipping assignment");
        }
        return result;
    }

    let a = eval_expr(lhs, ctx, env, warn);
    let b = eval_expr(rhs, ctx, env, warn);
    if op.is_numeric() {
        numeric_result(&[a, b], env.arena)
    } else if op.is_string() {
        string_result(&[a, b], env.arena)
    } else {
        Type::Mixed
    }
}

fn numeric_result(operands: &[Type], arena: &ParamArena) -> Type {
    operands.iter().fold(mk_trusted(Type::Prim(Prim::Num)), |acc, t| {
        join(&acc, &cast(t, Prim::Num, arena), arena)
    })
}

fn string_result(operands: &[Type], arena: &ParamArena) -> Type {
    operands.iter().fold(mk_trusted(Type::Prim(Prim::Str)), |acc, t| {
        join(&acc, &cast(t, Prim::Str, arena), arena)
    })
}

fn eval_unary<L: IncludeLoader>(
    _op: UnOp,
    operand: &ExprNode,
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Type {
    // spec.md §4.6: a unary operator recurses into its operand (for the
    // warnings/side effects that evaluation carries) but always reports
    // `Mixed` itself — the original doesn't assign this family a return
    // type at all (`_analyseexpr`'s unary-operator branch falls through to
    // its implicit-`None` catch-all, recovered as `Mixed` by every caller
    // that also reaches that catch-all for unrecognised heads).
    eval_expr(operand, ctx, env, warn);
    Type::Mixed
}

fn eval_call<L: IncludeLoader>(
    name: &str,
    args: &[ExprNode],
    ctx: &mut dyn Ctx,
    env: &mut Env<L>,
    warn: &WarnSink,
) -> Type {
    let ptypes: Vec<Type> = args.iter().map(|a| eval_expr(a, ctx, env, warn)).collect();

    match name {
        "exit" | "die" => Type::Empty,
        "define" => {
            if let (Some(ExprNode { kind: ExprKind::StringLit(cname), .. }), Some(t)) =
                (args.first(), ptypes.get(1))
            {
                env.consts.insert(cname.clone(), t.clone());
            } else {
                warn.warn("lhs of define() not a constant string, ignoring.");
            }
            Type::Unset
        }
        "array" => {
            let mut acc = Type::Empty;
            for t in &ptypes {
                acc = join(&acc, t, env.arena);
            }
            Type::Arr(Box::new(acc))
        }
        _ => {
            if let Some(fun) = env.funcs.get(name).cloned() {
                apply_fun(&fun, ctx, &ptypes, env.arena, warn)
            } else if let Some(t) = env.consts.get(name).cloned() {
                t
            } else {
                warn.warn(&format!("calling undefined function {name}."));
                Type::Error(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::{Analyser, AnalyserConfig, NoIncludes};
    use crate::span::Span;
    use crate::types::VarId;

    fn sp() -> Span {
        Span::new(1, 1)
    }

    fn var(name: &str) -> ExprNode {
        ExprNode::new(ExprKind::Variable(name.to_string()), sp())
    }

    fn num_lit() -> ExprNode {
        ExprNode::new(ExprKind::Number("1".to_string()), sp())
    }

    fn str_lit(s: &str) -> ExprNode {
        ExprNode::new(ExprKind::StringLit(s.to_string()), sp())
    }

    fn assign(name: &str, rhs: ExprNode) -> StmtNode {
        StmtNode::new(
            StmtKind::Expr(ExprNode::new(
                ExprKind::Binary(BinOp::Assign, Box::new(var(name)), Box::new(rhs)),
                sp(),
            )),
            sp(),
        )
    }

    fn analyse(stmts: Vec<StmtNode>) -> (Analyser, Vec<crate::warn::Warning>) {
        let mut analyser = Analyser::new(AnalyserConfig::default());
        let mut loader = NoIncludes;
        let warnings = analyser.analyse_program(&stmts, &mut loader);
        (analyser, warnings)
    }

    #[test]
    fn scenario_literal_assignment_is_trusted() {
        // spec.md §8 scenario 1
        let (analyser, warnings) = analyse(vec![assign("x", num_lit())]);
        assert!(warnings.is_empty());
        assert_eq!(
            analyser.global.peek(&VarId::Name("x".into())),
            mk_trusted(Type::Prim(Prim::Num))
        );
    }

    #[test]
    fn scenario_get_flows_untrusted_into_mysql_query_warns() {
        // spec.md §8 scenario 2-ish: $_GET is Arr(string) (not escaped), so
        // passing a raw array element straight to mysql_query should warn.
        let get_elt = ExprNode::new(
            ExprKind::ArrayAccess(Box::new(var("_GET")), Box::new(str_lit("id"))),
            sp(),
        );
        let call = ExprNode::new(
            ExprKind::Call("mysql_query".to_string(), vec![get_elt]),
            sp(),
        );
        let (_analyser, warnings) = analyse(vec![StmtNode::new(StmtKind::Expr(call), sp())]);
        assert!(warnings.iter().any(|w| w.message.contains("expected")));
    }

    #[test]
    fn escaping_before_mysql_query_silences_the_warning() {
        let get_elt = ExprNode::new(
            ExprKind::ArrayAccess(Box::new(var("_GET")), Box::new(str_lit("id"))),
            sp(),
        );
        let escaped = ExprNode::new(
            ExprKind::Call("mysql_real_escape_string".to_string(), vec![get_elt]),
            sp(),
        );
        let call = ExprNode::new(
            ExprKind::Call("mysql_query".to_string(), vec![escaped]),
            sp(),
        );
        let (_analyser, warnings) = analyse(vec![StmtNode::new(StmtKind::Expr(call), sp())]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn if_else_branch_join_widens_types() {
        // $x is num in one branch, string in the other -> Mixed after the join.
        let then_branch = StmtNode::new(StmtKind::Block(vec![assign("x", num_lit())]), sp());
        let else_branch = StmtNode::new(StmtKind::Block(vec![assign("x", str_lit("s"))]), sp());
        let if_stmt = StmtNode::new(
            StmtKind::If(
                num_lit(),
                Box::new(then_branch),
                Some(Box::new(else_branch)),
            ),
            sp(),
        );
        let (analyser, _warnings) = analyse(vec![if_stmt]);
        assert_eq!(analyser.global.peek(&VarId::Name("x".into())), Type::Mixed);
    }

    #[test]
    fn function_decl_records_callable_signature() {
        let body = vec![StmtNode::new(StmtKind::Return(Some(var("a"))), sp())];
        let def = FunctionDef {
            name: "identity".to_string(),
            params: vec!["a".to_string()],
            body,
        };
        let (analyser, _warnings) = analyse(vec![StmtNode::new(StmtKind::FunctionDecl(def), sp())]);
        assert!(analyser.funcs.contains_key("identity"));
    }

    #[test]
    fn define_populates_consts_registry() {
        let call = ExprNode::new(
            ExprKind::Call("define".to_string(), vec![str_lit("FOO"), num_lit()]),
            sp(),
        );
        let (analyser, _warnings) = analyse(vec![StmtNode::new(StmtKind::Expr(call), sp())]);
        assert!(analyser.consts.contains_key("FOO"));
    }

    #[test]
    fn bitwise_operators_evaluate_operands_and_return_mixed() {
        let expr = ExprNode::new(
            ExprKind::Binary(BinOp::BitAnd, Box::new(num_lit()), Box::new(num_lit())),
            sp(),
        );
        let (_analyser, warnings) = analyse(vec![StmtNode::new(StmtKind::Expr(expr), sp())]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn for_loop_types_init_test_step_and_body_in_place() {
        // for ($i = 1; $i; $i) { $x = "s"; } -- init/test/step are evaluated
        // once for side effects; the body runs once, in-place (no fixpoint).
        let for_stmt = StmtNode::new(
            StmtKind::For {
                init: vec![ExprNode::new(
                    ExprKind::Binary(BinOp::Assign, Box::new(var("i")), Box::new(num_lit())),
                    sp(),
                )],
                test: vec![var("i")],
                step: vec![var("i")],
                body: Box::new(StmtNode::new(
                    StmtKind::Block(vec![assign("x", str_lit("s"))]),
                    sp(),
                )),
            },
            sp(),
        );
        let (analyser, warnings) = analyse(vec![for_stmt]);
        assert!(warnings.is_empty());
        assert_eq!(
            analyser.global.peek(&VarId::Name("i".into())),
            mk_trusted(Type::Prim(Prim::Num))
        );
        assert_eq!(
            analyser.global.peek(&VarId::Name("x".into())),
            mk_trusted(Type::Prim(Prim::Str))
        );
    }
}
