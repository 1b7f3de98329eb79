//! The type lattice (spec.md §3, §4.1).
//!
//! Grounded on the teacher's `Type` enum (`src/types.rs` in
//! `red_knot_python_semantic`) and its `UnionBuilder`/`IntersectionBuilder`
//! smart constructors (`src/types/builder.rs`), which normalise away
//! degenerate shapes (single-element unions, `Never` absorbed into a union,
//! …) before ever constructing a `Type::Union`. We reuse exactly that idea
//! for [`mk_trusted`]/[`mk_escaped`]: a `Trusted`/`Escaped` wrapper around a
//! `Mixed` inner type carries no information over `Mixed` itself, so the
//! smart constructor collapses it rather than ever materialising e.g.
//! `Trusted(Mixed)` (see spec.md §8 scenario 5, where joining
//! `Trusted(num)` and `Trusted(string)` must widen all the way to `Mixed`,
//! not merely to `Trusted(Mixed)`).
//!
//! `Param` is modelled as an arena index rather than a reference-counted
//! interior-mutable cell (spec.md §9's "arena approach", preferred because
//! it sidesteps any ownership cycle between a `Param` and the type embedded
//! in its bound value).

use std::fmt;

use rustc_hash::FxHashMap;

use crate::function::FunType;

/// The primitive shapes this crate's target language distinguishes.
///
/// Closed per the decision recorded in SPEC_FULL.md §5.4 / DESIGN.md:
/// `original_source/types.py`'s builtin-type table and cast syntax name
/// `num`, `string` (here `Str`), `boolean`, `resource`, `array`, and `null`;
/// `array` stays a first-class lattice variant ([`Type::Arr`]) rather than a
/// `Prim` tag, per spec.md §3's own `Arr(e)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Prim {
    Num,
    Str,
    Bool,
    Resource,
    Null,
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Prim::Num => "num",
            Prim::Str => "string",
            Prim::Bool => "boolean",
            Prim::Resource => "resource",
            Prim::Null => "null",
        };
        f.write_str(s)
    }
}

/// A typing-context key: either a named variable or the reserved return
/// sentinel (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VarId {
    Name(String),
    Return,
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarId::Name(n) => write!(f, "${n}"),
            VarId::Return => f.write_str("<return>"),
        }
    }
}

/// Arena index for a [`Type::Param`]. Two `ParamId`s are never equal unless
/// they name the literal same unification variable — mirroring
/// `original_source/types.py`'s `ParamType`, which deliberately does not
/// override `__eq__` ("two paramtypes with the same name are *not* equal,
/// just like two PHP variables with the same name can be distinct").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

struct ParamSlot {
    name: String,
    value: Option<Type>,
}

/// Owns every [`Type::Param`] minted during one analysis. Kept on the
/// [`crate::analyser::Analyser`] aggregate rather than as a thread-local or
/// global, per spec.md §9.
#[derive(Default)]
pub struct ParamArena {
    slots: Vec<ParamSlot>,
}

impl ParamArena {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Mints a fresh, unbound parameter.
    pub fn fresh(&mut self, name: impl Into<String>) -> ParamId {
        self.slots.push(ParamSlot {
            name: name.into(),
            value: None,
        });
        ParamId(self.slots.len() - 1)
    }

    #[must_use]
    pub fn name(&self, id: ParamId) -> &str {
        &self.slots[id.0].name
    }

    #[must_use]
    pub fn value(&self, id: ParamId) -> Option<&Type> {
        self.slots[id.0].value.as_ref()
    }

    /// Narrows `id`'s bound via `meet` (spec.md §3: "mutated exactly once by
    /// `assign`... which itself takes a `meet`"). The first assignment to an
    /// unbound parameter simply sets the value, since `meet(x, x) = x` for
    /// any `x` unified against nothing.
    pub fn assign(&mut self, id: ParamId, t: Type) {
        let narrowed = match self.slots[id.0].value.take() {
            Some(existing) => meet(&existing, &t, self),
            None => t,
        };
        self.slots[id.0].value = Some(narrowed);
    }
}

/// A weakening map from [`ParamId`] to its learned instantiation, populated
/// by [`crate::matching::match_type`]. Entries are only added or widened via
/// `join`, never narrowed — the monotonicity spec.md §4.4 relies on for
/// fixpoint termination.
#[derive(Clone, Debug, Default)]
pub struct TypeMap {
    entries: FxHashMap<ParamId, Type>,
}

impl TypeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: ParamId) -> Option<&Type> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: ParamId, t: Type) {
        self.entries.insert(id, t);
    }
}

/// The type lattice itself (spec.md §3).
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    /// Top / unknown.
    Mixed,
    /// Bottom, e.g. the element type of `[]`.
    Empty,
    /// Variable never assigned; potentially attacker-controlled.
    Unset,
    /// Type inference failed on this expression.
    Error(Option<String>),
    Prim(Prim),
    /// Array whose elements all have the boxed type.
    Arr(Box<Type>),
    /// `inner`, sanitised against sink `tag` (e.g. `"mysql"`, `"html"`).
    Escaped(String, Box<Type>),
    /// Program-literal; implicitly escaped for every sink.
    Trusted(Box<Type>),
    Param(ParamId),
    /// A function signature, boxed because `FunType` carries two maps.
    Fun(Box<FunType>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Mixed => f.write_str("mixed"),
            Type::Empty => f.write_str("empty"),
            Type::Unset => f.write_str("unset"),
            Type::Error(Some(msg)) => write!(f, "error({msg})"),
            Type::Error(None) => f.write_str("error"),
            Type::Prim(p) => write!(f, "{p}"),
            Type::Arr(e) => write!(f, "array({e})"),
            Type::Escaped(tag, inner) => write!(f, "{tag}-escaped({inner})"),
            Type::Trusted(inner) => write!(f, "trusted({inner})"),
            Type::Param(id) => write!(f, "{{{}}}", id.0),
            Type::Fun(fun) => write!(f, "function {}", fun.name),
        }
    }
}

/// Smart constructor: a `Trusted` wrapper around `Mixed` carries no extra
/// information, so it collapses to `Mixed` (see module docs).
#[must_use]
pub fn mk_trusted(inner: Type) -> Type {
    if inner == Type::Mixed {
        Type::Mixed
    } else {
        Type::Trusted(Box::new(inner))
    }
}

/// Smart constructor, same reasoning as [`mk_trusted`].
#[must_use]
pub fn mk_escaped(tag: impl Into<String>, inner: Type) -> Type {
    if inner == Type::Mixed {
        Type::Mixed
    } else {
        Type::Escaped(tag.into(), Box::new(inner))
    }
}

/// `dereference`: chases a [`Type::Param`]'s bound value, recursively.
/// Unbound parameters dereference to themselves (spec.md §4.1).
#[must_use]
pub fn dereference(t: &Type, arena: &ParamArena) -> Type {
    match t {
        Type::Param(id) => match arena.value(*id) {
            Some(bound) => dereference(bound, arena),
            None => t.clone(),
        },
        _ => t.clone(),
    }
}

/// `drop_attrs`: strips every taint attribute, recursively through nested
/// `Trusted`/`Escaped` wrappers (spec.md §4.1).
#[must_use]
pub fn drop_attrs(t: &Type, arena: &ParamArena) -> Type {
    match t {
        Type::Trusted(inner) | Type::Escaped(_, inner) => drop_attrs(inner, arena),
        other => other.clone(),
    }
}

/// `join` (∨): least upper bound (spec.md §4.1). `Error` is treated as
/// symmetrically absorbent: spec.md §3's prose calls it "absorbent on the
/// left", but §8 asserts commutativity as a universal testable property of
/// `join`, and that property wins (see DESIGN.md).
#[must_use]
pub fn join(a: &Type, b: &Type, arena: &ParamArena) -> Type {
    let a = dereference(a, arena);
    let b = dereference(b, arena);
    if a == b {
        return a;
    }
    match (&a, &b) {
        (Type::Empty, _) => b,
        (_, Type::Empty) => a,
        (Type::Error(_), _) | (_, Type::Error(_)) => Type::Error(None),
        (Type::Prim(p1), Type::Prim(p2)) => {
            if p1 == p2 {
                a
            } else {
                Type::Mixed
            }
        }
        (Type::Arr(e1), Type::Arr(e2)) => Type::Arr(Box::new(join(e1, e2, arena))),
        (Type::Escaped(t1, i1), Type::Escaped(t2, i2)) if t1 == t2 => {
            mk_escaped(t1.clone(), join(i1, i2, arena))
        }
        (Type::Escaped(tag, inner), Type::Trusted(tinner))
        | (Type::Trusted(tinner), Type::Escaped(tag, inner)) => {
            mk_escaped(tag.clone(), join(inner, tinner, arena))
        }
        (Type::Trusted(i1), Type::Trusted(i2)) => mk_trusted(join(i1, i2, arena)),
        _ => {
            let da = drop_attrs(&a, arena);
            let db = drop_attrs(&b, arena);
            if da == a && db == b {
                // Neither side carried attributes: a genuine structural
                // mismatch (e.g. Prim vs Arr, or Unset vs Prim).
                Type::Mixed
            } else {
                join(&da, &db, arena)
            }
        }
    }
}

/// `meet` (∧): greatest lower bound, used to narrow parameter bounds
/// (spec.md §4.1).
#[must_use]
pub fn meet(a: &Type, b: &Type, arena: &ParamArena) -> Type {
    let a = dereference(a, arena);
    let b = dereference(b, arena);
    if a == Type::Mixed {
        return b;
    }
    if b == Type::Mixed {
        return a;
    }
    if a == b {
        return a;
    }
    let da = drop_attrs(&a, arena);
    let db = drop_attrs(&b, arena);
    if da == b {
        return a;
    }
    if db == a {
        return b;
    }
    if da == db {
        return mk_trusted(da);
    }
    Type::Empty
}

/// `cast(t, prim)`: language-level `(prim) expr` (spec.md §4.1).
#[must_use]
pub fn cast(t: &Type, prim: Prim, arena: &ParamArena) -> Type {
    match dereference(t, arena) {
        Type::Error(_) => Type::Error(None),
        Type::Trusted(_) => mk_trusted(Type::Prim(prim)),
        Type::Escaped(tag, inner) => {
            if drop_attrs(&inner, arena) == Type::Prim(prim) {
                mk_escaped(tag, *inner)
            } else {
                Type::Prim(prim)
            }
        }
        _ => Type::Prim(prim),
    }
}

/// `instantiate`: substitutes `Param` bindings found in `typemap` (or
/// already bound in `arena`) through `self`, recursing into `Arr`,
/// `Escaped`, and `Trusted` (spec.md §4.1).
#[must_use]
pub fn instantiate(t: &Type, typemap: &TypeMap, arena: &ParamArena) -> Type {
    match t {
        Type::Arr(e) => Type::Arr(Box::new(instantiate(e, typemap, arena))),
        Type::Escaped(tag, inner) => mk_escaped(tag.clone(), instantiate(inner, typemap, arena)),
        Type::Trusted(inner) => mk_trusted(instantiate(inner, typemap, arena)),
        Type::Param(id) => {
            if let Some(bound) = arena.value(*id) {
                instantiate(bound, typemap, arena)
            } else if let Some(learned) = typemap.get(*id) {
                instantiate(learned, typemap, arena)
            } else {
                t.clone()
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn num() -> Type {
        Type::Prim(Prim::Num)
    }
    fn string() -> Type {
        Type::Prim(Prim::Str)
    }

    #[test_case(num() ; "num reflexive")]
    #[test_case(Type::Mixed ; "mixed reflexive")]
    #[test_case(mk_trusted(num()) ; "trusted reflexive")]
    fn join_is_reflexive(a: Type) {
        let arena = ParamArena::new();
        assert_eq!(join(&a, &a.clone(), &arena), a);
    }

    #[test]
    fn join_commutative_on_sample_pairs() {
        let arena = ParamArena::new();
        let pairs = [
            (Type::Empty, num()),
            (Type::Error(None), num()),
            (num(), string()),
            (mk_trusted(num()), mk_escaped("mysql", num())),
            (Type::Mixed, mk_trusted(num())),
        ];
        for (a, b) in pairs {
            assert_eq!(
                join(&a, &b, &arena),
                join(&b, &a, &arena),
                "join({a}, {b}) should be commutative"
            );
        }
    }

    #[test]
    fn join_empty_is_identity() {
        let arena = ParamArena::new();
        assert_eq!(join(&Type::Empty, &num(), &arena), num());
        assert_eq!(join(&num(), &Type::Empty, &arena), num());
    }

    #[test]
    fn join_mixed_absorbs() {
        let arena = ParamArena::new();
        assert_eq!(join(&Type::Mixed, &num(), &arena), Type::Mixed);
    }

    #[test]
    fn meet_mixed_is_identity() {
        let arena = ParamArena::new();
        assert_eq!(meet(&Type::Mixed, &num(), &arena), num());
        assert_eq!(meet(&num(), &Type::Mixed, &arena), num());
    }

    #[test]
    fn meet_is_commutative_on_sample_pairs() {
        let arena = ParamArena::new();
        let pairs = [
            (num(), num()),
            (mk_trusted(num()), mk_escaped("mysql", num())),
            (mk_escaped("mysql", num()), mk_escaped("html", num())),
            (Type::Mixed, string()),
        ];
        for (a, b) in pairs {
            assert_eq!(meet(&a, &b, &arena), meet(&b, &a, &arena), "meet({a}, {b})");
        }
    }

    #[test]
    fn drop_attrs_peels_trusted_and_escaped() {
        let arena = ParamArena::new();
        assert_eq!(drop_attrs(&mk_trusted(num()), &arena), num());
        assert_eq!(drop_attrs(&mk_escaped("mysql", num()), &arena), num());
        assert_eq!(
            drop_attrs(&mk_escaped("mysql", mk_escaped("html", num())), &arena),
            num()
        );
    }

    #[test]
    fn cast_of_trusted_is_trusted_prim() {
        let arena = ParamArena::new();
        assert_eq!(
            cast(&mk_trusted(string()), Prim::Num, &arena),
            mk_trusted(num())
        );
    }

    #[test]
    fn cast_of_error_is_error() {
        let arena = ParamArena::new();
        assert_eq!(
            cast(&Type::Error(None), Prim::Num, &arena),
            Type::Error(None)
        );
    }

    #[test]
    fn scenario_branch_join_widens_to_mixed() {
        // spec.md §8 scenario 5: joining Trusted(num) and Trusted(string)
        // must widen all the way to Mixed, not to Trusted(Mixed).
        let arena = ParamArena::new();
        assert_eq!(
            join(&mk_trusted(num()), &mk_trusted(string()), &arena),
            Type::Mixed
        );
    }

    #[test]
    fn instantiate_substitutes_through_typemap() {
        let mut arena = ParamArena::new();
        let p = arena.fresh("$x");
        let mut typemap = TypeMap::new();
        typemap.insert(p, mk_trusted(num()));
        let arr = Type::Arr(Box::new(Type::Param(p)));
        assert_eq!(
            instantiate(&arr, &typemap, &arena),
            Type::Arr(Box::new(mk_trusted(num())))
        );
    }

    #[test]
    fn param_assign_narrows_via_meet() {
        let mut arena = ParamArena::new();
        let p = arena.fresh("$x");
        arena.assign(p, mk_escaped("mysql", string()));
        arena.assign(p, mk_escaped("html", string()));
        // Two distinct escapes of the same shape meet into Trusted(shape).
        assert_eq!(arena.value(p).cloned(), Some(mk_trusted(string())));
    }
}
