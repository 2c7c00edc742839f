//! Recursive-descent parser over the lexer's token stream, producing a
//! compiled `Expr` or `CompiledLocation`. Grammar (§4.1, informal):
//!
//! ```text
//! expr       := or
//! or         := and (("||" | OR) and)*
//! and        := equality (("&&" | AND) equality)*
//! equality   := relational (("==" | "!=") relational)*
//! relational := additive (("<" | "<=" | ">" | ">=") additive)*
//! additive   := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary      := ("!" | "-")? postfix
//! postfix    := primary (("." identifier) | ("[" expr "]"))*
//! primary    := literal | "In" "(" expr ")" | identifier | "(" expr ")"
//!             | "[" (expr ("," expr)*)? "]"
//! ```

use super::ast::{BinOp, CompiledLocation, Expr, UnaryOp};
use super::lexer::{ExpressionLexer, NumericToken, Operator, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (at {})", self.message, self.position)
    }
}

struct Parser {
    lexer: ExpressionLexer,
    current: Token,
}

type PResult<T> = Result<T, CompileError>;

impl Parser {
    fn new(source: &str) -> Self {
        let mut lexer = ExpressionLexer::new(source);
        let current = lexer.next_token();
        Parser { lexer, current }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError {
            message: message.into(),
            position: self.lexer.position().0,
        }
    }

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    fn expect_bracket(&mut self, c: char) -> PResult<()> {
        match self.advance() {
            Token::Bracket(b) if b == c => Ok(()),
            other => Err(self.err(format!("expected '{}', found {}", c, other))),
        }
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let is_or = matches!(&self.current, Token::Operator(Operator::Or))
                || matches!(&self.current, Token::Identifier(id) if id == "OR");
            if !is_or {
                break;
            }
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        loop {
            let is_and = matches!(&self.current, Token::Operator(Operator::And))
                || matches!(&self.current, Token::Identifier(id) if id == "AND");
            if !is_and {
                break;
            }
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match &self.current {
                Token::Operator(Operator::Equal) => BinOp::Eq,
                Token::Operator(Operator::NotEqual) => BinOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match &self.current {
                Token::Operator(Operator::Less) => BinOp::Lt,
                Token::Operator(Operator::LessEqual) => BinOp::LtEq,
                Token::Operator(Operator::Greater) => BinOp::Gt,
                Token::Operator(Operator::GreaterEqual) => BinOp::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match &self.current {
                Token::Operator(Operator::Plus) => BinOp::Add,
                Token::Operator(Operator::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.current {
                Token::Operator(Operator::Multiply) => BinOp::Mul,
                Token::Operator(Operator::Divide) => BinOp::Div,
                Token::Operator(Operator::Modulus) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match &self.current {
            Token::Operator(Operator::Not) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Operator(Operator::Minus) => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.current {
                Token::Separator('.') => {
                    self.advance();
                    let name = match self.advance() {
                        Token::Identifier(id) => id,
                        other => return Err(self.err(format!("expected field name, found {}", other))),
                    };
                    expr = Expr::Member(Box::new(expr), name);
                }
                Token::Bracket('[') => {
                    self.advance();
                    // `a['key']` is equivalent to `a.key` (§4.1); a non-literal
                    // bracket expression becomes a dynamic Index node.
                    if let Token::TString(key) = self.current.clone() {
                        self.advance();
                        self.expect_bracket(']')?;
                        expr = Expr::Member(Box::new(expr), key);
                    } else {
                        let idx = self.parse_expr()?;
                        self.expect_bracket(']')?;
                        expr = Expr::Index(Box::new(expr), Box::new(idx));
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.advance() {
            Token::Number(NumericToken::Integer(i)) => Ok(Expr::IntLiteral(i)),
            Token::Number(NumericToken::Double(d)) => Ok(Expr::FloatLiteral(d)),
            Token::TString(s) => Ok(Expr::StringLiteral(s)),
            Token::Boolean(b) => Ok(Expr::BoolLiteral(b)),
            Token::Identifier(id) if id == "In" && matches!(self.current, Token::Bracket('(')) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_bracket(')')?;
                Ok(Expr::In(Box::new(inner)))
            }
            Token::Identifier(id) => Ok(Expr::Identifier(id)),
            Token::Bracket('(') => {
                let inner = self.parse_expr()?;
                self.expect_bracket(')')?;
                Ok(inner)
            }
            Token::Bracket('[') => {
                let mut items = Vec::new();
                if !matches!(self.current, Token::Bracket(']')) {
                    loop {
                        items.push(self.parse_expr()?);
                        if matches!(self.current, Token::Separator(',')) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect_bracket(']')?;
                Ok(Expr::ArrayLiteral(items))
            }
            other => Err(self.err(format!("unexpected token {}", other))),
        }
    }

    fn finish(self) -> PResult<()> {
        match self.current {
            Token::EOE => Ok(()),
            other => Err(CompileError {
                message: format!("trailing tokens after expression, starting at {}", other),
                position: self.lexer.position().0,
            }),
        }
    }
}

/// Compiles a value expression. Pure: never touches a data model.
pub fn compile(source: &str) -> Result<Expr, CompileError> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_expr()?;
    parser.finish()?;
    Ok(expr)
}

/// Compiles a location expression (assignment/foreach target) into an
/// ordered key path. Only identifier/member/literal-index chains are legal —
/// `a.b['c']`, never an arbitrary expression — since a location must denote
/// a concrete storage slot (§4.1).
pub fn compile_location(source: &str) -> Result<CompiledLocation, CompileError> {
    let mut parser = Parser::new(source);
    let root = match parser.advance() {
        Token::Identifier(id) => id,
        other => {
            return Err(CompileError {
                message: format!("location must start with an identifier, found {}", other),
                position: parser.lexer.position().0,
            })
        }
    };
    let mut path = vec![root];
    loop {
        match &parser.current {
            Token::Separator('.') => {
                parser.advance();
                match parser.advance() {
                    Token::Identifier(id) => path.push(id),
                    other => {
                        return Err(CompileError {
                            message: format!("expected field name in location, found {}", other),
                            position: parser.lexer.position().0,
                        })
                    }
                }
            }
            Token::Bracket('[') => {
                parser.advance();
                match parser.advance() {
                    Token::TString(key) => path.push(key),
                    other => {
                        return Err(CompileError {
                            message: format!(
                                "location index must be a string literal, found {}",
                                other
                            ),
                            position: parser.lexer.position().0,
                        })
                    }
                }
                parser.expect_bracket(']')?;
            }
            _ => break,
        }
    }
    parser.finish()?;
    Ok(CompiledLocation { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_arithmetic_with_precedence() {
        let e = compile("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::IntLiteral(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::IntLiteral(2)),
                    Box::new(Expr::IntLiteral(3))
                ))
            )
        );
    }

    #[test]
    fn compiles_member_and_bracket_access() {
        let e = compile("a.b['c']").unwrap();
        assert_eq!(
            e,
            Expr::Member(
                Box::new(Expr::Member(Box::new(Expr::Identifier("a".into())), "b".into())),
                "c".into()
            )
        );
    }

    #[test]
    fn compiles_array_literal() {
        let e = compile("[1, 2, a]").unwrap();
        assert_eq!(
            e,
            Expr::ArrayLiteral(vec![
                Expr::IntLiteral(1),
                Expr::IntLiteral(2),
                Expr::Identifier("a".into())
            ])
        );
        assert_eq!(compile("[]").unwrap(), Expr::ArrayLiteral(vec![]));
    }

    #[test]
    fn compiles_in_predicate() {
        let e = compile("In('stateA')").unwrap();
        assert_eq!(e, Expr::In(Box::new(Expr::StringLiteral("stateA".into()))));
    }

    #[test]
    fn compiles_logical_keywords_and_symbols() {
        assert_eq!(compile("true && false"), compile("true AND false"));
        assert_eq!(compile("true || false"), compile("true OR false"));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(compile("1 +").is_err());
        assert!(compile("1 2").is_err());
    }

    #[test]
    fn compiles_location_path() {
        let loc = compile_location("a.b['c']").unwrap();
        assert_eq!(loc.path, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_location_with_non_literal_index() {
        assert!(compile_location("a[b]").is_err());
    }
}
