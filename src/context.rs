//! Typing contexts (spec.md §3, §4.2).
//!
//! Grounded on `original_source/contexts.py`: `TypingContext` is a plain
//! name -> type map that warns on a missing read; `ContextOverlay` lets an
//! `if`/`else` branch simulate writes against a background context without
//! touching it until the branch is chosen or merged; `AutoTypingContext`
//! auto-initialises a variable to a fresh `Param` on first (warn-enabled)
//! read, which is what lets `applyto`/the fixpoint loop describe "whatever
//! this block needs as input" without the caller naming it up front;
//! `LocalTypingContext` is a function body's scope, splitting reads/writes
//! between `self.td` (locals, including parameters and the return slot)
//! and an inner `AutoTypingContext` for globals.
//!
//! The `Ctx` trait is this crate's generalisation over all four: the
//! evaluator (`crate::eval`) is written once, generic over `impl Ctx`,
//! exactly the way the teacher's `TypeInferenceBuilder` is written once and
//! reused across module-level and deferred (stub) inference passes.
//!
//! One adaptation from the Python original, driven by the borrow checker:
//! `ContextOverlay::bg` there is a plain shared reference two sibling
//! overlays (one per `if`/`else` branch) can both read and write through at
//! once. Rust won't allow two live `&mut` borrows of the same background,
//! so branches are evaluated sequentially instead: each overlay borrows
//! `bg` mutably for its own branch, is drained into a plain delta map via
//! [`ContextOverlay::into_delta`] (ending that borrow), and the two deltas
//! are merged by the free function [`union_overlay_deltas`] against a
//! final shared read of `bg`, before one last mutable reborrow applies the
//! merged delta. Net effect on the typing result is the same; only the
//! borrow shape differs.

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use rustc_hash::FxHashSet;

use crate::function::{FunType, Slot};
use crate::matching::match_type;
use crate::types::{instantiate, join, ParamArena, ParamId, Type, TypeMap, VarId};
use crate::warn::{no_warn, WarnSink};

/// The common read/write/peek surface every typing-context shape provides.
///
/// `get`/`set` are the "real" operations used while evaluating code: `get`
/// may warn (and, for [`AutoTypingContext`], may mint a fresh `Param`) and
/// takes `&mut self` because of that. `peek` is the no-warn, no-mutation
/// variant used internally by branch/loop merging, mirroring every call
/// site in the original that passes `reporting.noWarn`.
pub trait Ctx {
    fn get(&mut self, var: &VarId, warn: &WarnSink, arena: &mut ParamArena) -> Type;
    fn set(&mut self, var: VarId, t: Type, arena: &mut ParamArena);
    fn peek(&self, var: &VarId) -> Type;

    /// `markglobal`: declare `names` as referring to the enclosing global
    /// scope. Only [`LocalTypingContext`] gives this a real implementation;
    /// every other context shape is already at global scope, so a `global`
    /// declaration there is a no-op.
    fn mark_global(&mut self, _names: &[String]) {}
}

/// A plain scope: the top-level typing context, and the building block the
/// other three specialise.
#[derive(Clone, Debug, Default)]
pub struct TypingContext {
    pub(crate) td: IndexMap<VarId, Type>,
}

impl TypingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ctx for TypingContext {
    fn get(&mut self, var: &VarId, warn: &WarnSink, _arena: &mut ParamArena) -> Type {
        match self.td.get(var) {
            Some(t) => t.clone(),
            None => {
                warn.warn(&format!("{var} may not have been initialised."));
                Type::Unset
            }
        }
    }

    fn set(&mut self, var: VarId, t: Type, _arena: &mut ParamArena) {
        self.td.insert(var, t);
    }

    fn peek(&self, var: &VarId) -> Type {
        self.td.get(var).cloned().unwrap_or(Type::Unset)
    }
}

/// Simulates a branch's effect on `bg` without touching it until
/// [`ContextOverlay::apply`] or [`ContextOverlay::into_delta`] is called.
pub struct ContextOverlay<'a, C: Ctx + ?Sized> {
    bg: &'a mut C,
    td: IndexMap<VarId, Type>,
}

impl<'a, C: Ctx + ?Sized> ContextOverlay<'a, C> {
    pub fn new(bg: &'a mut C) -> Self {
        Self {
            bg,
            td: IndexMap::new(),
        }
    }

    /// Applies the accumulated delta to the background context.
    pub fn apply(self, arena: &mut ParamArena) {
        let ContextOverlay { bg, td } = self;
        for (n, t) in td {
            bg.set(n, t, arena);
        }
    }

    /// Drains this overlay's delta without touching the background,
    /// releasing the mutable borrow of `bg` so a sibling overlay (or the
    /// background itself) can be borrowed again.
    #[must_use]
    pub fn into_delta(self) -> IndexMap<VarId, Type> {
        self.td
    }
}

impl<'a, C: Ctx + ?Sized> Ctx for ContextOverlay<'a, C> {
    fn get(&mut self, var: &VarId, warn: &WarnSink, arena: &mut ParamArena) -> Type {
        if let Some(t) = self.td.get(var) {
            return t.clone();
        }
        self.bg.get(var, warn, arena)
    }

    fn set(&mut self, var: VarId, t: Type, _arena: &mut ParamArena) {
        self.td.insert(var, t);
    }

    fn peek(&self, var: &VarId) -> Type {
        self.td.get(var).cloned().unwrap_or_else(|| self.bg.peek(var))
    }
}

/// Merges two overlay deltas of the *same* background (per-key `join`,
/// falling back to the background's current value for a key only one
/// overlay touched), grounded on `ContextOverlay.__or__`. Apply the result
/// to the background with a fresh [`ContextOverlay`] (or `Ctx::set` in a
/// loop) once both branches have run.
#[must_use]
pub fn union_overlay_deltas<C: Ctx + ?Sized>(
    a: &IndexMap<VarId, Type>,
    b: &IndexMap<VarId, Type>,
    bg: &C,
    arena: &ParamArena,
) -> IndexMap<VarId, Type> {
    let mut out = IndexMap::new();
    for n in a.keys().chain(b.keys()).cloned().unique() {
        let av = a.get(&n).cloned().unwrap_or_else(|| bg.peek(&n));
        let bv = b.get(&n).cloned().unwrap_or_else(|| bg.peek(&n));
        out.insert(n, join(&av, &bv, arena));
    }
    out
}

/// A scope where referencing an unset variable mints a fresh [`Type::Param`]
/// instead of warning, so the scope's net effect on its caller can be
/// described as a function of "whatever came in". Used for loop bodies and
/// (via [`LocalTypingContext`]) for function bodies.
#[derive(Clone, Debug, Default)]
pub struct AutoTypingContext {
    pub(crate) td: IndexMap<VarId, Type>,
    pub(crate) itypes: IndexMap<VarId, ParamId>,
}

impl AutoTypingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality used by [`fixpoint`] to detect convergence. Deliberately
    /// compares only `td`, not `itypes`: two iterations that settled on the
    /// same observable variable types are the same fixpoint candidate even
    /// though each minted its own distinct `Param`s along the way (see
    /// DESIGN.md — the original's `ParamType` has no structural equality at
    /// all, which would make this convergence check never fire).
    fn converged_with(&self, other: &Self) -> bool {
        self.td == other.td
    }

    /// `applyto`: simulate running `self`'s recorded effects on top of
    /// `other`, mutating `other` in place. Generic over `Ctx` rather than
    /// pinned to `AutoTypingContext`: a `while`/`foreach` body's summary is
    /// applied to whatever scope the loop statement itself runs in (the
    /// global context, a function's locals, a branch overlay, ...), while
    /// [`fixpoint`] below applies a candidate onto another `AutoTypingContext`
    /// specifically during its own iteration.
    pub fn apply_to<C: Ctx + ?Sized>(&self, other: &mut C, warn: &WarnSink, arena: &mut ParamArena) {
        let mut typemap = TypeMap::new();
        for (n, pid) in &self.itypes {
            let actual = other.get(n, warn, arena);
            match_type(&Type::Param(*pid), &actual, &mut typemap, arena, warn);
        }
        let updates: Vec<(VarId, Type)> = self
            .td
            .iter()
            .map(|(n, t)| (n.clone(), instantiate(t, &typemap, arena)))
            .collect();
        for (n, t) in updates {
            other.set(n, t, arena);
        }
    }
}

impl Ctx for AutoTypingContext {
    fn get(&mut self, var: &VarId, warn: &WarnSink, arena: &mut ParamArena) -> Type {
        if warn.enabled() && !self.td.contains_key(var) {
            let pid = arena.fresh(var.to_string());
            self.itypes.insert(var.clone(), pid);
            self.td.insert(var.clone(), Type::Param(pid));
        }
        match self.td.get(var) {
            Some(t) => t.clone(),
            None => {
                warn.warn(&format!("{var} may not have been initialised."));
                Type::Unset
            }
        }
    }

    fn set(&mut self, var: VarId, t: Type, _arena: &mut ParamArena) {
        self.td.insert(var, t);
    }

    fn peek(&self, var: &VarId) -> Type {
        self.td.get(var).cloned().unwrap_or(Type::Unset)
    }
}

/// `AutoTypingContext.__or__`: union two auto-contexts, renaming each
/// side's minted `Param`s through a fresh shared one so neither input is
/// mutated and future narrowing on the result doesn't leak back into `a`
/// or `b`.
#[must_use]
pub fn union(a: &AutoTypingContext, b: &AutoTypingContext, arena: &mut ParamArena) -> AutoTypingContext {
    let mut r = AutoTypingContext::new();
    let mut parammap = TypeMap::new();

    let input_names: IndexSet<VarId> = a.itypes.keys().chain(b.itypes.keys()).cloned().collect();
    for n in input_names {
        let fresh = arena.fresh(n.to_string());
        if let Some(&old) = a.itypes.get(&n) {
            parammap.insert(old, Type::Param(fresh));
            arena.assign(fresh, Type::Param(old));
        }
        if let Some(&old) = b.itypes.get(&n) {
            parammap.insert(old, Type::Param(fresh));
            arena.assign(fresh, Type::Param(old));
        }
        r.itypes.insert(n.clone(), fresh);
        r.td.insert(n, Type::Param(fresh));
    }

    let output_names: IndexSet<VarId> = a.td.keys().chain(b.td.keys()).cloned().collect();
    for n in output_names {
        let joined = join(&a.peek(&n), &b.peek(&n), arena);
        r.td.insert(n, instantiate(&joined, &parammap, arena));
    }
    r
}

/// Raised when [`fixpoint`] exhausts `max_iterations` without converging.
/// Never fatal: the analyser recovers by widening every loop-carried
/// variable to `Mixed` (spec.md §5) and keeps going, but the error value is
/// still produced and logged so a host can tell an ordinary loop apart from
/// one that never stabilised (e.g. to flag the offending loop in a report).
#[derive(thiserror::Error, Debug)]
#[error("loop fixpoint did not converge after {max_iterations} iterations; widened to mixed")]
pub struct FixpointError {
    pub max_iterations: usize,
    /// The recovered context, every loop-carried variable widened to
    /// `Mixed`. Callers that don't need to distinguish this from ordinary
    /// convergence can use it unconditionally via [`Result::unwrap_or_else`].
    pub widened: AutoTypingContext,
}

/// `AutoTypingContext.loop`: the fixpoint of `ctx = ctx | ctx.applyto(ctx.copy())`,
/// used for both `while` and `foreach` (SPEC_FULL.md Open Question
/// Decision 1). Capped at `max_iterations`; on cap-out, returns
/// [`FixpointError`] alongside the widened-to-`Mixed` context rather than
/// looping forever or guessing wrong — callers that don't care can still
/// just take the widened context via [`Result::unwrap_or_else`].
pub fn fixpoint(
    ctx: &AutoTypingContext,
    warn: &WarnSink,
    arena: &mut ParamArena,
    max_iterations: usize,
) -> Result<AutoTypingContext, FixpointError> {
    let mut curr = ctx.clone();
    for i in 0..max_iterations {
        let mut applied = curr.clone();
        curr.apply_to(&mut applied, warn, arena);
        let next = union(&curr, &applied, arena);
        if next.converged_with(&curr) {
            tracing::debug!(iterations = i + 1, "loop fixpoint converged");
            return Ok(next);
        }
        curr = next;
    }
    let err = FixpointError { max_iterations, widened: widen_to_mixed(&curr) };
    tracing::warn!(max_iterations, "{err}");
    Err(err)
}

fn widen_to_mixed(ctx: &AutoTypingContext) -> AutoTypingContext {
    let mut widened = AutoTypingContext::new();
    for n in ctx.td.keys() {
        widened.td.insert(n.clone(), Type::Mixed);
    }
    widened
}

fn is_global(var: &VarId, globalnames: &FxHashSet<String>) -> bool {
    matches!(var, VarId::Name(n) if globalnames.contains(n))
}

/// A function body's scope: parameters and locals in `td`, superglobals and
/// any `global $x`-declared name routed through `globals` instead.
#[derive(Clone, Debug)]
pub struct LocalTypingContext {
    pub name: String,
    pub globals: AutoTypingContext,
    globalnames: FxHashSet<String>,
    /// Parameters in declaration order, paired with the `Param` minted for
    /// each at scope entry — needed in order by [`LocalTypingContext::as_function_type`].
    pitypes: Vec<(String, ParamId)>,
    td: IndexMap<VarId, Type>,
}

impl LocalTypingContext {
    pub fn new(pnames: &[String], name: impl Into<String>, arena: &mut ParamArena) -> Self {
        let mut pitypes = Vec::with_capacity(pnames.len());
        let mut td = IndexMap::new();
        for n in pnames {
            let pid = arena.fresh(format!("${n}"));
            pitypes.push((n.clone(), pid));
            td.insert(VarId::Name(n.clone()), Type::Param(pid));
        }
        let mut globalnames = FxHashSet::default();
        for superglobal in ["_GET", "_POST", "_SERVER"] {
            globalnames.insert(superglobal.to_string());
        }
        Self {
            name: name.into(),
            globals: AutoTypingContext::new(),
            globalnames,
            pitypes,
            td,
        }
    }

    /// `getfuntype`: the function type summarising this scope's contract
    /// once its body has been fully evaluated — parameters and referenced
    /// globals as inputs, the return value and any global writes as
    /// outputs.
    #[must_use]
    pub fn as_function_type(&self) -> FunType {
        let mut fun = FunType::new(self.name.clone());
        for (i, (_, pid)) in self.pitypes.iter().enumerate() {
            fun.inp.insert(Slot::Param(i), Type::Param(*pid));
        }
        for (n, pid) in &self.globals.itypes {
            if let VarId::Name(name) = n {
                fun.inp.insert(Slot::Global(name.clone()), Type::Param(*pid));
            }
        }
        if let Some(ret) = self.td.get(&VarId::Return) {
            fun.ret = Some(ret.clone());
        }
        for (n, t) in &self.globals.td {
            if let VarId::Name(name) = n {
                fun.out.insert(Slot::Global(name.clone()), t.clone());
            }
        }
        fun
    }
}

impl Ctx for LocalTypingContext {
    fn get(&mut self, var: &VarId, warn: &WarnSink, arena: &mut ParamArena) -> Type {
        if is_global(var, &self.globalnames) {
            return self.globals.get(var, warn, arena);
        }
        match self.td.get(var) {
            Some(t) => t.clone(),
            None => {
                warn.warn(&format!("{var} may not have been initialised."));
                Type::Unset
            }
        }
    }

    fn set(&mut self, var: VarId, t: Type, arena: &mut ParamArena) {
        if is_global(&var, &self.globalnames) {
            self.globals.set(var, t, arena);
        } else {
            self.td.insert(var, t);
        }
    }

    fn peek(&self, var: &VarId) -> Type {
        if is_global(var, &self.globalnames) {
            self.globals.peek(var)
        } else {
            self.td.get(var).cloned().unwrap_or(Type::Unset)
        }
    }

    fn mark_global(&mut self, names: &[String]) {
        self.globalnames.extend(names.iter().cloned());
    }
}
