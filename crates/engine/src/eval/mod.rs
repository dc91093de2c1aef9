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

//! The condition and capture expression language: lexer, parser and the
//! typed compiler/evaluator binding against a stack frame.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod typed;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use parser::parse;
pub use typed::{CompiledExpression, EvalContext};

use crate::{
    error::Result,
    frame::StackFrame,
    symbols::SymbolStore,
    value::CaptureContext,
};

/// Parses and compiles an expression against a frame in one step.
pub fn compile_expression(
    text: &str,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<CompiledExpression> {
    let ast = parse(text)?;
    typed::compile(&ast, frame, symbols, ctx)
}
