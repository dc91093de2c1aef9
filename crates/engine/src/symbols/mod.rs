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

//! Parsed portable debug-symbol tables.
//!
//! The symbol parser itself is a collaborator: a [`SymbolProvider`] hands the
//! engine pre-parsed per-module tables (documents, methods, sequence points,
//! local scopes) and the [`SymbolStore`] keeps them paired with their runtime
//! modules for breakpoint arming and frame resolution.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::Result,
    runtime::{MethodToken, RuntimeModule},
};

/// Line number marking compiler-generated code in sequence points.
pub const HIDDEN_SEQUENCE_POINT_LINE: u32 = 0xfee_fee;

/// A source-file record inside a symbol file.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Document path as recorded by the compiler.
    pub path: String,
    /// Source language identifier, when recorded.
    pub language: String,
    /// Content hash, when recorded.
    pub hash: Vec<u8>,
}

/// A `(IL offset, source range)` pair of a method.
#[derive(Debug, Clone, Copy)]
pub struct SequencePoint {
    /// First source line covered.
    pub start_line: u32,
    /// Last source line covered.
    pub end_line: u32,
    /// First source column covered.
    pub start_col: u32,
    /// Last source column covered.
    pub end_col: u32,
    /// IL offset the range begins at.
    pub il_offset: u32,
    /// Whether this point marks compiler-generated code.
    pub is_hidden: bool,
}

/// A named local variable slot inside a scope.
#[derive(Debug, Clone)]
pub struct LocalVariableSymbol {
    /// Variable name.
    pub name: String,
    /// IL slot index.
    pub slot: u32,
    /// Whether the compiler marked the slot debugger-hidden.
    pub debugger_hidden: bool,
}

/// A local constant inside a scope.
#[derive(Debug, Clone)]
pub struct LocalConstantSymbol {
    /// Constant name.
    pub name: String,
}

/// An IL range with the locals it declares.
#[derive(Debug, Clone, Default)]
pub struct LocalScope {
    /// First IL offset of the scope.
    pub start_offset: u32,
    /// Scope length in IL bytes.
    pub length: u32,
    /// Variables declared in this scope.
    pub variables: Vec<LocalVariableSymbol>,
    /// Constants declared in this scope.
    pub constants: Vec<LocalConstantSymbol>,
}

impl LocalScope {
    /// Whether the scope covers the given IL offset.
    pub fn covers(&self, il_offset: u32) -> bool {
        self.start_offset <= il_offset && il_offset <= self.start_offset + self.length
    }
}

/// Debug information of one method.
#[derive(Debug, Clone, Default)]
pub struct MethodSymbols {
    /// Method-definition token as recorded in the symbol file.
    pub method_def: MethodToken,
    /// Index into the owning file's document table.
    pub document: usize,
    /// First source line of the method body.
    pub first_line: u32,
    /// Last source line of the method body.
    pub last_line: u32,
    /// Sequence points, ascending by IL offset.
    pub sequence_points: Vec<SequencePoint>,
    /// Local scopes.
    pub local_scopes: Vec<LocalScope>,
}

impl MethodSymbols {
    /// First non-hidden sequence point whose start line is at or past
    /// `line`. This is the arming point for a line breakpoint.
    pub fn sequence_point_for_line(&self, line: u32) -> Option<&SequencePoint> {
        self.sequence_points.iter().find(|sp| !sp.is_hidden && sp.start_line >= line)
    }

    /// The last non-hidden sequence point at or before `il_offset`; the
    /// source position a frame's instruction pointer maps to.
    pub fn sequence_point_for_offset(&self, il_offset: u32) -> Option<&SequencePoint> {
        self.sequence_points
            .iter()
            .filter(|sp| !sp.is_hidden && sp.il_offset <= il_offset)
            .max_by_key(|sp| sp.il_offset)
    }

    /// All local variables declared in scopes covering `il_offset`.
    pub fn locals_in_scope(&self, il_offset: u32) -> Vec<LocalVariableSymbol> {
        let mut locals = Vec::new();
        for scope in &self.local_scopes {
            if scope.covers(il_offset) {
                locals.extend(scope.variables.iter().cloned());
            }
        }
        locals
    }
}

/// Parsed symbol tables of one module.
#[derive(Debug, Clone, Default)]
pub struct SymbolFile {
    /// Module path these symbols belong to.
    pub module_name: String,
    /// Document table.
    pub documents: Vec<Document>,
    /// Method table.
    pub methods: Vec<MethodSymbols>,
}

impl SymbolFile {
    /// Methods belonging to one document.
    pub fn methods_of_document(&self, document: usize) -> impl Iterator<Item = &MethodSymbols> {
        self.methods.iter().filter(move |m| m.document == document)
    }

    /// Looks up a method's symbols by its method-definition token.
    pub fn method(&self, method_def: MethodToken) -> Option<&MethodSymbols> {
        self.methods.iter().find(|m| m.method_def == method_def)
    }
}

/// Symbol tables paired with the runtime module they describe.
pub struct ModuleSymbols {
    /// The runtime module.
    pub module: Arc<dyn RuntimeModule>,
    /// Its parsed symbol file.
    pub file: SymbolFile,
}

/// Collaborator that parses a module's portable PDB into tables.
///
/// Returns `Ok(None)` for modules without debug information (framework
/// assemblies, ReadyToRun images).
#[auto_impl::auto_impl(Arc)]
pub trait SymbolProvider: Send + Sync {
    /// Loads symbols for a freshly loaded module.
    fn load_symbols(&self, module: &Arc<dyn RuntimeModule>) -> Result<Option<SymbolFile>>;
}

/// All symbol files ingested so far, in module-load order.
#[derive(Default)]
pub struct SymbolStore {
    files: RwLock<Vec<Arc<ModuleSymbols>>>,
}

impl SymbolStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module's symbols.
    pub fn ingest(&self, module: Arc<dyn RuntimeModule>, file: SymbolFile) {
        debug!(
            module = %file.module_name,
            documents = file.documents.len(),
            methods = file.methods.len(),
            "ingested symbol file"
        );
        self.files.write().push(Arc::new(ModuleSymbols { module, file }));
    }

    /// Snapshot of all ingested symbol files.
    pub fn all(&self) -> Vec<Arc<ModuleSymbols>> {
        self.files.read().clone()
    }

    /// Number of ingested modules.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether no modules have been ingested.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(start_line: u32, il_offset: u32, hidden: bool) -> SequencePoint {
        SequencePoint {
            start_line,
            end_line: start_line,
            start_col: 1,
            end_col: 40,
            il_offset,
            is_hidden: hidden,
        }
    }

    #[test]
    fn test_sequence_point_for_line_skips_hidden() {
        let method = MethodSymbols {
            sequence_points: vec![
                seq(HIDDEN_SEQUENCE_POINT_LINE, 0, true),
                seq(10, 2, false),
                seq(12, 8, false),
            ],
            ..Default::default()
        };

        let sp = method.sequence_point_for_line(11).unwrap();
        assert_eq!(sp.start_line, 12);
        assert_eq!(sp.il_offset, 8);
    }

    #[test]
    fn test_sequence_point_for_line_exact() {
        let method = MethodSymbols {
            sequence_points: vec![seq(10, 2, false), seq(12, 8, false)],
            ..Default::default()
        };
        assert_eq!(method.sequence_point_for_line(10).unwrap().il_offset, 2);
        assert!(method.sequence_point_for_line(13).is_none());
    }

    #[test]
    fn test_sequence_point_for_offset_picks_largest_at_or_before() {
        let method = MethodSymbols {
            sequence_points: vec![seq(10, 0, false), seq(11, 4, false), seq(12, 12, false)],
            ..Default::default()
        };
        assert_eq!(method.sequence_point_for_offset(10).unwrap().start_line, 11);
        assert_eq!(method.sequence_point_for_offset(12).unwrap().start_line, 12);
        assert_eq!(method.sequence_point_for_offset(0).unwrap().start_line, 10);
    }

    #[test]
    fn test_locals_in_scope() {
        let method = MethodSymbols {
            local_scopes: vec![
                LocalScope {
                    start_offset: 0,
                    length: 20,
                    variables: vec![LocalVariableSymbol {
                        name: "outer".to_string(),
                        slot: 0,
                        debugger_hidden: false,
                    }],
                    constants: vec![],
                },
                LocalScope {
                    start_offset: 8,
                    length: 4,
                    variables: vec![LocalVariableSymbol {
                        name: "inner".to_string(),
                        slot: 1,
                        debugger_hidden: false,
                    }],
                    constants: vec![],
                },
            ],
            ..Default::default()
        };

        let at_10 = method.locals_in_scope(10);
        assert_eq!(at_10.len(), 2);
        let at_2 = method.locals_in_scope(2);
        assert_eq!(at_2.len(), 1);
        assert_eq!(at_2[0].name, "outer");
    }
}
