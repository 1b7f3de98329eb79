//! Function types and the call-effect simulation (spec.md §4.3, §4.6).
//!
//! Grounded on `original_source/types.py`'s `FunType`: a function's type is
//! the pair of an input map (positional parameter index or global-variable
//! name -> required type) and an output map (same domain, plus the `-1`
//! return slot -> produced type). Calling a function of this type doesn't
//! run its body; it matches the caller's argument/global types against
//! `inp`, then instantiates `out` with whatever `Param`s that matching
//! learned, and applies the result to the caller's [`crate::context::Ctx`].

use rustc_hash::FxHashMap;

use crate::context::Ctx;
use crate::matching::match_type;
use crate::types::{instantiate, ParamArena, Type, TypeMap, VarId};
use crate::warn::WarnSink;

/// Either a positional parameter (by index) or a captured global variable
/// (by name) — the domain of [`FunType::inp`]/[`FunType::out`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Param(usize),
    Global(String),
}

/// A function's calling convention: required input types and the output
/// types it guarantees once those inputs are supplied.
#[derive(Clone, Debug, PartialEq)]
pub struct FunType {
    pub name: String,
    pub inp: FxHashMap<Slot, Type>,
    pub out: FxHashMap<Slot, Type>,
    pub ret: Option<Type>,
    /// Builtins such as `isset` accept an uninitialised argument without
    /// warning (SPEC_FULL.md §3). User-defined functions never set this.
    pub accepts_unset: bool,
}

impl FunType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inp: FxHashMap::default(),
            out: FxHashMap::default(),
            ret: None,
            accepts_unset: false,
        }
    }

    #[must_use]
    pub fn with_param(mut self, index: usize, required: Type) -> Self {
        self.inp.insert(Slot::Param(index), required);
        self
    }

    #[must_use]
    pub fn with_global_in(mut self, name: impl Into<String>, required: Type) -> Self {
        self.inp.insert(Slot::Global(name.into()), required);
        self
    }

    #[must_use]
    pub fn with_global_out(mut self, name: impl Into<String>, produced: Type) -> Self {
        self.out.insert(Slot::Global(name.into()), produced);
        self
    }

    #[must_use]
    pub fn with_return(mut self, t: Type) -> Self {
        self.ret = Some(t);
        self
    }

    #[must_use]
    pub fn accepting_unset(mut self) -> Self {
        self.accepts_unset = true;
        self
    }

    fn return_type(&self, warn: &WarnSink) -> Type {
        match &self.ret {
            Some(t) => t.clone(),
            None => {
                warn.warn("using return value of a function that doesn't have any");
                Type::Error(None)
            }
        }
    }
}

/// `FunType.apply`: simulate one call. `ptypes[i]` is the type of the
/// `i`th positional argument already evaluated by the caller; `ctx` is the
/// caller's scope, mutated in place with this function's declared global
/// side effects; returns the call's result type.
pub fn apply_fun(
    fun: &FunType,
    ctx: &mut dyn Ctx,
    ptypes: &[Type],
    arena: &mut ParamArena,
    warn: &WarnSink,
) -> Type {
    let mut typemap = TypeMap::new();
    for (slot, required) in &fun.inp {
        match slot {
            Slot::Global(name) => {
                let located = warn.on().at(&format!("global ${name}"));
                let actual = ctx.get(&VarId::Name(name.clone()), &located, arena);
                if fun.accepts_unset && actual == Type::Unset {
                    continue;
                }
                match_type(required, &actual, &mut typemap, arena, &located);
            }
            Slot::Param(i) => {
                let located = warn.at(&format!("parameter {} of function {}", i + 1, fun.name));
                match ptypes.get(*i) {
                    Some(actual) => {
                        if fun.accepts_unset && *actual == Type::Unset {
                            continue;
                        }
                        match_type(required, actual, &mut typemap, arena, &located);
                    }
                    None => located.warn("missing argument"),
                }
            }
        }
    }

    let outputs: Vec<(String, Type)> = fun
        .out
        .iter()
        .filter_map(|(slot, t)| match slot {
            Slot::Global(name) => Some((name.clone(), instantiate(t, &typemap, arena))),
            Slot::Param(_) => None,
        })
        .collect();
    for (name, t) in outputs {
        ctx.set(VarId::Name(name), t, arena);
    }

    instantiate(&fun.return_type(warn), &typemap, arena)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoTypingContext, Ctx};
    use crate::types::{mk_escaped, Prim};
    use crate::warn::no_warn;

    #[test]
    fn apply_matches_params_and_instantiates_return() {
        // A tiny "mysql_real_escape_string"-shaped builtin: string -> escaped(mysql, string).
        let fun = FunType::new("mysql_real_escape_string")
            .with_param(0, Type::Prim(Prim::Str))
            .with_return(mk_escaped("mysql", Type::Prim(Prim::Str)));
        let mut arena = ParamArena::new();
        let mut ctx = AutoTypingContext::new();
        let result = apply_fun(
            &fun,
            &mut ctx,
            &[Type::Prim(Prim::Str)],
            &mut arena,
            &no_warn(),
        );
        assert_eq!(result, mk_escaped("mysql", Type::Prim(Prim::Str)));
    }

    #[test]
    fn apply_propagates_global_side_effects() {
        let fun = FunType::new("touches_count")
            .with_global_out("count", Type::Prim(Prim::Num));
        let mut arena = ParamArena::new();
        let mut ctx = AutoTypingContext::new();
        apply_fun(&fun, &mut ctx, &[], &mut arena, &no_warn());
        assert_eq!(
            ctx.get(&VarId::Name("count".into()), &no_warn(), &mut arena),
            Type::Prim(Prim::Num)
        );
    }

    #[test]
    fn accepts_unset_skips_the_warning() {
        let fun = FunType::new("isset")
            .with_param(0, Type::Mixed)
            .with_return(Type::Prim(Prim::Bool))
            .accepting_unset();
        let mut arena = ParamArena::new();
        let mut ctx = AutoTypingContext::new();
        let warn = no_warn();
        let result = apply_fun(&fun, &mut ctx, &[Type::Unset], &mut arena, &warn);
        assert_eq!(result, Type::Prim(Prim::Bool));
    }
}
