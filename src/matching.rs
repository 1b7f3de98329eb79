//! Structural subtyping / unification (spec.md §4.1, §4.4).
//!
//! Grounded on `original_source/types.py`'s `Type.match`/`_match`/
//! `instantiate` family and the teacher's `UnionBuilder`-style "smart
//! constructor" discipline for keeping normalised values. `expected.match
//! (actual)` there returns true when `actual` is included in `expected`,
//! weakening `typemap` (only ever widened, never narrowed) along the way;
//! unbound `Param`s encountered on the `actual` side get tightened via
//! [`crate::types::ParamArena::assign`] when the direct structural check
//! fails.
//!
//! One deliberate deviation from the original: there, `MixedType` (the top
//! type, used e.g. as `isset`'s accepted parameter type) does not override
//! `_match`, so it falls back to identity equality and would actually
//! *reject* any concretely-typed argument. That reads as an oversight
//! rather than an intended restriction — spec.md's lattice explicitly
//! treats `Mixed` as top, matching everything. [`structural_match`] makes
//! `Mixed` succeed unconditionally as the expected side.

use crate::types::{dereference, drop_attrs, join, ParamArena, ParamId, Type, TypeMap};
use crate::warn::{no_warn, WarnSink};

/// `expected.match(actual)`: does `actual` fit within `expected`, learning
/// `Param` instantiations into `typemap` (and narrowing unbound `Param`s
/// found directly in `actual` via [`ParamArena::assign`]) along the way?
pub fn match_type(
    expected: &Type,
    actual: &Type,
    typemap: &mut TypeMap,
    arena: &mut ParamArena,
    warn: &WarnSink,
) -> bool {
    let deref = dereference(actual, arena);
    if structural_match(expected, &deref, typemap, arena)
        || structural_match(expected, &drop_attrs(&deref, arena), typemap, arena)
    {
        return true;
    }
    if let Type::Param(id) = actual {
        arena.assign(*id, expected.clone());
        true
    } else {
        warn.warn(&format!("expected {expected}, got {deref}"));
        false
    }
}

/// The `_match` dispatch: structural comparison with no fallback to
/// assigning an unbound `Param` on the `other` side (that fallback lives in
/// [`match_type`], which calls this twice before giving up).
fn structural_match(
    expected: &Type,
    other: &Type,
    typemap: &mut TypeMap,
    arena: &mut ParamArena,
) -> bool {
    match expected {
        Type::Mixed | Type::Error(_) => true,
        Type::Param(id) => match_param(*id, other, typemap, arena),
        Type::Arr(e) => match other {
            Type::Arr(oe) => match_type(e, oe, typemap, arena, &no_warn()),
            _ => false,
        },
        Type::Escaped(tag, inner) => match other {
            Type::Trusted(_) => match_type(inner, other, typemap, arena, &no_warn()),
            Type::Escaped(otag, oinner) if otag == tag => {
                match_type(inner, oinner, typemap, arena, &no_warn())
            }
            _ => false,
        },
        Type::Trusted(inner) => match other {
            Type::Trusted(oinner) => match_type(inner, oinner, typemap, arena, &no_warn()),
            _ => false,
        },
        _ => *expected == *other,
    }
}

/// `ParamType._match`: if `id` already has a bound value, delegate to a
/// (silent) full match against that value; otherwise weaken `typemap[id]`
/// by joining in `other`.
fn match_param(id: ParamId, other: &Type, typemap: &mut TypeMap, arena: &mut ParamArena) -> bool {
    if let Some(bound) = arena.value(id).cloned() {
        return match_type(&bound, other, typemap, arena, &no_warn());
    }
    let widened = match typemap.get(id) {
        Some(existing) => join(existing, other, arena),
        None => other.clone(),
    };
    typemap.insert(id, widened);
    true
}

/// `Type.arrayelttype`: unify `container` against a fresh `array({x})`
/// pattern and report what `{x}` resolved to, or `Error` if `container`
/// can't be an array at all (spec.md §4.1/§4.6, the `[]` operator).
pub fn array_elt(container: &Type, arena: &mut ParamArena, warn: &WarnSink) -> Type {
    let x = arena.fresh("_");
    let mut typemap = TypeMap::new();
    let pattern = Type::Arr(Box::new(Type::Param(x)));
    let located = warn.at("operator []");
    if match_type(&pattern, container, &mut typemap, arena, &located) {
        typemap.get(x).cloned().unwrap_or(Type::Param(x))
    } else {
        Type::Error(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{mk_escaped, mk_trusted, Prim};

    fn num() -> Type {
        Type::Prim(Prim::Num)
    }

    #[test]
    fn mixed_expected_matches_anything() {
        let mut arena = ParamArena::new();
        let mut tm = TypeMap::new();
        assert!(match_type(&Type::Mixed, &num(), &mut tm, &mut arena, &no_warn()));
        assert!(match_type(
            &Type::Mixed,
            &Type::Unset,
            &mut tm,
            &mut arena,
            &no_warn()
        ));
    }

    #[test]
    fn unbound_param_expected_learns_typemap_entry() {
        let mut arena = ParamArena::new();
        let p = arena.fresh("$x");
        let mut tm = TypeMap::new();
        assert!(match_type(
            &Type::Param(p),
            &num(),
            &mut tm,
            &mut arena,
            &no_warn()
        ));
        assert_eq!(tm.get(p).cloned(), Some(num()));
    }

    #[test]
    fn param_on_actual_side_gets_assigned_when_mismatched() {
        let mut arena = ParamArena::new();
        let q = arena.fresh("$y");
        let mut tm = TypeMap::new();
        assert!(match_type(
            &mk_trusted(num()),
            &Type::Param(q),
            &mut tm,
            &mut arena,
            &no_warn()
        ));
        assert_eq!(arena.value(q).cloned(), Some(mk_trusted(num())));
    }

    #[test]
    fn trusted_matches_against_escaped_via_elttype_not_elttype_elttype() {
        let mut arena = ParamArena::new();
        let mut tm = TypeMap::new();
        let expected = mk_escaped("mysql", num());
        let actual = mk_trusted(num());
        assert!(match_type(&expected, &actual, &mut tm, &mut arena, &no_warn()));
    }

    #[test]
    fn escaped_does_not_match_different_tag() {
        let mut arena = ParamArena::new();
        let mut tm = TypeMap::new();
        let expected = mk_escaped("mysql", num());
        let actual = mk_escaped("html", num());
        assert!(!match_type(
            &expected,
            &actual,
            &mut tm,
            &mut arena,
            &no_warn()
        ));
    }

    #[test]
    fn array_elt_of_array_of_num_is_num() {
        let mut arena = ParamArena::new();
        let container = Type::Arr(Box::new(num()));
        assert_eq!(array_elt(&container, &mut arena, &no_warn()), num());
    }

    #[test]
    fn array_elt_of_non_array_is_error() {
        let mut arena = ParamArena::new();
        assert_eq!(array_elt(&num(), &mut arena, &no_warn()), Type::Error(None));
    }

    #[test]
    fn array_elt_of_unbound_param_binds_it_to_array_and_returns_fresh_var() {
        let mut arena = ParamArena::new();
        let p = arena.fresh("$arr");
        let result = array_elt(&Type::Param(p), &mut arena, &no_warn());
        // p got assigned array({x}) for some fresh x, and that x is what we get back.
        assert!(matches!(result, Type::Param(_)));
        assert!(matches!(arena.value(p), Some(Type::Arr(_))));
    }
}
