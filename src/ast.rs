//! The expression/statement tree this crate evaluates (spec.md §6).
//!
//! Lexing and parsing are out of scope (spec.md §1: the analyser consumes
//! an already-built tree). Node shape is a typed rendering of
//! `original_source/tokens.py`'s nested-tuple expressions and
//! `parser.py`'s statement forms — a host parser is expected to build this
//! tree directly rather than reusing the original's raw tuples.

use crate::types::Prim;
use crate::span::Span;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Assign,
    PlusAssign,
    MinusAssign,
    TimesAssign,
    CatAssign,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    Concat,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            BinOp::Plus | BinOp::Minus | BinOp::Times | BinOp::Divide | BinOp::Modulo
        )
    }

    #[must_use]
    pub fn is_numeric_assign(self) -> bool {
        matches!(self, BinOp::PlusAssign | BinOp::MinusAssign | BinOp::TimesAssign)
    }

    #[must_use]
    pub fn is_string(self) -> bool {
        matches!(self, BinOp::Concat | BinOp::CatAssign)
    }

    #[must_use]
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            BinOp::Assign
                | BinOp::PlusAssign
                | BinOp::MinusAssign
                | BinOp::TimesAssign
                | BinOp::CatAssign
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Negate,
    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
}

/// The built-in constants spec.md §3/SPEC_FULL.md §3 calls out as distinct
/// from ordinary literals: booleans and `null` carry `Trusted`-prim types,
/// the magic constants carry `Trusted(string)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuiltinConst {
    True,
    False,
    Null,
    Magic(String),
}

#[derive(Clone, Debug)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub span: Span,
}

impl ExprNode {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Number(String),
    StringLit(String),
    BuiltinConstant(BuiltinConst),
    Variable(String),
    Binary(BinOp, Box<ExprNode>, Box<ExprNode>),
    Unary(UnOp, Box<ExprNode>),
    Cast(Prim, Box<ExprNode>),
    Ternary(Box<ExprNode>, Box<ExprNode>, Box<ExprNode>),
    Call(String, Vec<ExprNode>),
    /// `array(...)` literal: the element type is the join of every given
    /// value (spec.md §4.6).
    ArrayLiteral(Vec<ExprNode>),
    ArrayAccess(Box<ExprNode>, Box<ExprNode>),
}

#[derive(Clone, Debug)]
pub struct StmtNode {
    pub kind: StmtKind,
    pub span: Span,
}

impl StmtNode {
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    /// `None` marks the `default:` arm.
    pub test: Option<ExprNode>,
    pub body: Vec<StmtNode>,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<StmtNode>,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Expr(ExprNode),
    /// Output to the client; only types the argument for side effects (no
    /// escaping is enforced — see DESIGN.md).
    Echo(ExprNode),
    Block(Vec<StmtNode>),
    If(ExprNode, Box<StmtNode>, Option<Box<StmtNode>>),
    While(ExprNode, Box<StmtNode>),
    /// `foreach ($arr as [$key =>] $value) { body }`.
    Foreach {
        array: ExprNode,
        key: Option<String>,
        value: String,
        body: Box<StmtNode>,
    },
    /// `for (init; test; step) body`. `original_source/analyser.py`'s
    /// `for` handling reads `init`, `test`, and `step` with the same
    /// `readexprseq` (a comma-separated expression sequence, same as
    /// `init`/`step`) rather than a single boolean test expression, and
    /// spec.md §4.6 says the same ("likewise `test` and `step`") — so all
    /// three are sequences, evaluated for side effects only.
    For {
        init: Vec<ExprNode>,
        test: Vec<ExprNode>,
        step: Vec<ExprNode>,
        body: Box<StmtNode>,
    },
    Return(Option<ExprNode>),
    GlobalDecl(Vec<String>),
    FunctionDecl(FunctionDef),
    /// `include`/`include_once` — no dedup against `Analyser::included`.
    Include(ExprNode),
    /// `require_once` — deduplicated against `Analyser::included` by
    /// string-literal path.
    RequireOnce(ExprNode),
    Switch(ExprNode, Vec<SwitchCase>),
    Break,
    Continue,
}
