//! Seed tables for built-in functions and constants (spec.md §6,
//! SPEC_FULL.md §3).
//!
//! Grounded directly on `original_source/types.py`'s module-level `funcs`/
//! `consts` dictionaries. A host extends or overrides these through
//! [`crate::analyser::AnalyserConfig`] rather than this crate hard-coding
//! every function in the target language's standard library — spec.md §6
//! only asks for the handful needed to exercise the taint lattice
//! end-to-end.

use rustc_hash::FxHashMap;

use crate::function::FunType;
use crate::types::{mk_escaped, Prim, Type};

/// `isset`/`count`/the `mysql_*` trio, plus the `accepts_unset` builtins
/// named in SPEC_FULL.md §3.
#[must_use]
pub fn seed_funcs() -> FxHashMap<String, FunType> {
    let mut funcs = FxHashMap::default();

    funcs.insert(
        "isset".to_string(),
        FunType::new("isset")
            .with_param(0, Type::Mixed)
            .with_return(Type::Prim(Prim::Bool))
            .accepting_unset(),
    );
    funcs.insert(
        "empty".to_string(),
        FunType::new("empty")
            .with_param(0, Type::Mixed)
            .with_return(Type::Prim(Prim::Bool))
            .accepting_unset(),
    );
    funcs.insert(
        "is_array".to_string(),
        FunType::new("is_array")
            .with_param(0, Type::Mixed)
            .with_return(Type::Prim(Prim::Bool))
            .accepting_unset(),
    );
    funcs.insert(
        "count".to_string(),
        FunType::new("count")
            .with_param(0, Type::Mixed)
            .with_return(Type::Prim(Prim::Num)),
    );
    funcs.insert(
        "mysql_query".to_string(),
        FunType::new("mysql_query")
            .with_param(0, mk_escaped("mysql", Type::Prim(Prim::Str)))
            .with_return(Type::Prim(Prim::Resource)),
    );
    funcs.insert(
        "mysql_error".to_string(),
        FunType::new("mysql_error").with_return(Type::Prim(Prim::Str)),
    );
    funcs.insert(
        "mysql_real_escape_string".to_string(),
        FunType::new("mysql_real_escape_string")
            .with_param(0, Type::Prim(Prim::Str))
            .with_return(mk_escaped("mysql", Type::Prim(Prim::Str))),
    );

    funcs
}

/// `define()`d constants known ahead of time. Empty by default, as in the
/// original — `define()` calls encountered during analysis populate
/// `Analyser::consts` at runtime; this seed only covers constants a host
/// wants pre-declared (e.g. ones resolved across a file boundary it already
/// knows about).
#[must_use]
pub fn seed_consts() -> FxHashMap<String, Type> {
    FxHashMap::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isset_accepts_unset_without_reporting_it() {
        let funcs = seed_funcs();
        assert!(funcs["isset"].accepts_unset);
    }

    #[test]
    fn mysql_query_requires_mysql_escaped_input() {
        let funcs = seed_funcs();
        assert_eq!(
            funcs["mysql_query"].inp.len(),
            1,
            "mysql_query should declare exactly one required parameter"
        );
    }
}
