// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hand-written recursive-descent parser for the expression language.
//!
//! Operators bind with conventional precedence; the ternary is
//! right-associative. Cast syntax is recognized only for primitive type
//! keywords and their `System.*` wrapper names; anything else in
//! parentheses parses as a grouped expression.

use crate::{
    error::{Error, Result},
    eval::{
        ast::{BinaryOp, Expr, UnaryOp},
        lexer::{tokenize, Token},
    },
};

/// Type names accepted in cast syntax.
const CAST_TYPE_NAMES: &[&str] = &[
    "bool", "char", "sbyte", "byte", "short", "ushort", "int", "uint", "long", "ulong", "float",
    "double", "System.Boolean", "System.Char", "System.SByte", "System.Byte", "System.Int16",
    "System.UInt16", "System.Int32", "System.UInt32", "System.Int64", "System.UInt64",
    "System.Single", "System.Double",
];

/// Parses an expression string into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Compile(format!(
            "unexpected trailing tokens after expression: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(Error::Compile(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let condition = self.parse_logical_or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then_branch = self.parse_expression()?;
        self.expect(&Token::Colon)?;
        // Right-associative: the else branch swallows any further ternary.
        let else_branch = self.parse_expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_logical_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_logical_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_or()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_bit_or()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_xor()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_bit_xor()?;
            left = binary(BinaryOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_and()?;
        while self.eat(&Token::Caret) {
            let right = self.parse_bit_and()?;
            left = binary(BinaryOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::Amp) {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_shift()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Shl) => BinaryOp::Shl,
                Some(Token::Shr) => BinaryOp::Shr,
                Some(Token::UShr) => BinaryOp::UShr,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Minus) => Some(UnaryOp::Minus),
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op, operand: Box::new(operand) });
        }

        if let Some(target) = self.try_parse_cast_target() {
            let operand = self.parse_unary()?;
            return Ok(Expr::Cast { target, operand: Box::new(operand) });
        }

        self.parse_postfix()
    }

    /// Recognizes `( type-name )` followed by the start of a unary
    /// expression. Restores the position and returns `None` when the
    /// parenthesized content is not a castable type name.
    fn try_parse_cast_target(&mut self) -> Option<String> {
        if self.peek() != Some(&Token::LParen) {
            return None;
        }
        let saved = self.pos;
        self.pos += 1;

        let mut name = match self.advance() {
            Some(Token::Ident(first)) => first,
            _ => {
                self.pos = saved;
                return None;
            }
        };
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Token::Ident(part)) => {
                    name.push('.');
                    name.push_str(&part);
                }
                _ => {
                    self.pos = saved;
                    return None;
                }
            }
        }

        if !self.eat(&Token::RParen) || !CAST_TYPE_NAMES.contains(&name.as_str()) {
            self.pos = saved;
            return None;
        }

        // A cast must be followed by something that starts an operand.
        match self.peek() {
            Some(
                Token::Ident(_) |
                Token::Int { .. } |
                Token::Float { .. } |
                Token::Char(_) |
                Token::Str(_) |
                Token::True |
                Token::False |
                Token::Null |
                Token::LParen |
                Token::Minus |
                Token::Plus |
                Token::Bang |
                Token::Tilde,
            ) => Some(name),
            _ => {
                self.pos = saved;
                None
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    other => {
                        return Err(Error::Compile(format!(
                            "expected member name after '.', found {other:?}"
                        )))
                    }
                };
                if self.eat(&Token::LParen) {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call { base: Some(Box::new(expr)), name, args };
                } else {
                    expr = Expr::Member { base: Box::new(expr), name };
                }
                continue;
            }
            if self.eat(&Token::LBracket) {
                let index = self.parse_expression()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index { base: Box::new(expr), index: Box::new(index) };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int { value, is_long }) => Ok(Expr::IntLiteral { value, is_long }),
            Some(Token::Float { value, is_single }) => Ok(Expr::FloatLiteral { value, is_single }),
            Some(Token::Char(c)) => Ok(Expr::CharLiteral(c)),
            Some(Token::Str(s)) => Ok(Expr::StringLiteral(s)),
            Some(Token::True) => Ok(Expr::BoolLiteral(true)),
            Some(Token::False) => Ok(Expr::BoolLiteral(false)),
            Some(Token::Null) => Ok(Expr::NullLiteral),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_call_args()?;
                    Ok(Expr::Call { base: None, name, args })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(Error::Compile(format!("unexpected token {other:?}"))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    fn int(value: u64) -> Expr {
        Expr::IntLiteral { value, is_long: false }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse("a + b * c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(ident("a")),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(ident("b")),
                    right: Box::new(ident("c")),
                }),
            }
        );
    }

    #[test]
    fn test_precedence_relational_over_logical() {
        let expr = parse("x > 0 && y < 5").unwrap();
        let Expr::Binary { op: BinaryOp::And, left, right } = expr else {
            panic!("expected &&");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Gt, .. }));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn test_bitwise_precedence_chain() {
        // & binds tighter than ^, which binds tighter than |.
        let expr = parse("a | b ^ c & d").unwrap();
        let Expr::Binary { op: BinaryOp::BitOr, right, .. } = expr else {
            panic!("expected |");
        };
        let Expr::Binary { op: BinaryOp::BitXor, right, .. } = *right else {
            panic!("expected ^");
        };
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::BitAnd, .. }));
    }

    #[test]
    fn test_ternary_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        let Expr::Conditional { else_branch, .. } = expr else {
            panic!("expected ternary");
        };
        assert!(matches!(*else_branch, Expr::Conditional { .. }));
    }

    #[test]
    fn test_member_index_call_chain() {
        let expr = parse("list.Items[0].Name").unwrap();
        let Expr::Member { base, name } = expr else { panic!("expected member") };
        assert_eq!(name, "Name");
        let Expr::Index { base, index } = *base else { panic!("expected index") };
        assert_eq!(*index, int(0));
        assert!(matches!(*base, Expr::Member { .. }));
    }

    #[test]
    fn test_method_call_with_args() {
        let expr = parse("s.Substring(1, n)").unwrap();
        let Expr::Call { base, name, args } = expr else { panic!("expected call") };
        assert!(base.is_some());
        assert_eq!(name, "Substring");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_cast_vs_parenthesized() {
        let cast = parse("(int) x").unwrap();
        assert!(matches!(cast, Expr::Cast { .. }));

        let grouped = parse("(x) + 1").unwrap();
        assert!(matches!(grouped, Expr::Binary { op: BinaryOp::Add, .. }));

        // An unknown type name stays a grouped expression.
        let grouped = parse("(foo)").unwrap();
        assert_eq!(grouped, ident("foo"));
    }

    #[test]
    fn test_cast_wrapper_name() {
        let expr = parse("(System.Int64) x").unwrap();
        let Expr::Cast { target, .. } = expr else { panic!("expected cast") };
        assert_eq!(target, "System.Int64");
    }

    #[test]
    fn test_unary_chain() {
        let expr = parse("-~x").unwrap();
        let Expr::Unary { op: UnaryOp::Minus, operand } = expr else {
            panic!("expected unary minus");
        };
        assert!(matches!(*operand, Expr::Unary { op: UnaryOp::BitNot, .. }));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(parse("x y"), Err(Error::Compile(_))));
        assert!(matches!(parse("(x"), Err(Error::Compile(_))));
    }

    #[test]
    fn test_shift_operators() {
        let expr = parse("x >>> 2").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::UShr, .. }));
    }
}
