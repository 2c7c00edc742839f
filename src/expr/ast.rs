//! Compiled expression AST (§4.1 "Compilation... returns... an opaque
//! compiled AST"). The tagged-variant-tree shape mirrors the donor's
//! `expression_engine::expressions::Expression` trait-object hierarchy, but
//! here the variants are a closed `enum` dispatched by a single evaluator
//! function (§9 "a tagged variant tree evaluated by a single dispatch
//! function... no inheritance required").

use super::lexer::Operator;

/// A compiled expression, produced only by `expr::parser::compile`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BoolLiteral(bool),
    /// A bare identifier, resolved against the data model (or `_event`).
    Identifier(String),
    /// `a.b` / `a['b']` — evaluated left-to-right; member access on
    /// `undefined` yields `undefined` rather than erroring.
    Member(Box<Expr>, String),
    /// `a[expr]` with a non-literal bracket expression.
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `In(stateId)` — the sole built-in function call in the grammar.
    In(Box<Expr>),
    /// `[e1, e2, ...]` — the one aggregate literal the grammar allows,
    /// needed so a `<data>` element can seed a list for `foreach` to walk.
    ArrayLiteral(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl TryFrom<Operator> for BinOp {
    type Error = ();

    fn try_from(op: Operator) -> Result<Self, Self::Error> {
        Ok(match op {
            Operator::Plus => BinOp::Add,
            Operator::Minus => BinOp::Sub,
            Operator::Multiply => BinOp::Mul,
            Operator::Divide => BinOp::Div,
            Operator::Modulus => BinOp::Mod,
            Operator::Equal => BinOp::Eq,
            Operator::NotEqual => BinOp::NotEq,
            Operator::Less => BinOp::Lt,
            Operator::LessEqual => BinOp::LtEq,
            Operator::Greater => BinOp::Gt,
            Operator::GreaterEqual => BinOp::GtEq,
            Operator::And => BinOp::And,
            Operator::Or => BinOp::Or,
            Operator::Not => return Err(()),
        })
    }
}

/// A location expression compiled into an ordered key path (§4.1 "compile a
/// location expression into an ordered key path of strings"). Unlike a
/// general `Expr`, a location is always a chain of identifier/member steps —
/// `a.b.c` or `a['b'].c` — never an arbitrary expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLocation {
    pub path: Vec<String>,
}

impl CompiledLocation {
    pub fn root(&self) -> &str {
        self.path[0].as_str()
    }
}
