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

//! Untyped expression AST produced by the parser.

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `!`
    Not,
    /// `~`
    BitNot,
}

/// Binary operators, in precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `&`
    BitAnd,
    /// `^`
    BitXor,
    /// `|`
    BitOr,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// One node of the untyped AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal.
    IntLiteral {
        /// Value bits.
        value: u64,
        /// `L` suffix present.
        is_long: bool,
    },
    /// Floating-point literal.
    FloatLiteral {
        /// Value.
        value: f64,
        /// `f` suffix present.
        is_single: bool,
    },
    /// Character literal.
    CharLiteral(char),
    /// String literal.
    StringLiteral(String),
    /// `true` / `false`.
    BoolLiteral(bool),
    /// `null`.
    NullLiteral,
    /// Identifier bound against the frame.
    Identifier(String),
    /// Unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `cond ? a : b`, right-associative.
    Conditional {
        /// Condition.
        condition: Box<Expr>,
        /// Value when true.
        then_branch: Box<Expr>,
        /// Value when false.
        else_branch: Box<Expr>,
    },
    /// Field or property access.
    Member {
        /// Base expression.
        base: Box<Expr>,
        /// Member name.
        name: String,
    },
    /// Array indexing.
    Index {
        /// Base expression.
        base: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Method invocation; `base` is `None` for bare calls binding against
    /// the enclosing class.
    Call {
        /// Receiver expression.
        base: Option<Box<Expr>>,
        /// Method name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Primitive type cast.
    Cast {
        /// Target type keyword or wrapper name.
        target: String,
        /// The operand.
        operand: Box<Expr>,
    },
}
