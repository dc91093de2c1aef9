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

//! Resolution of `(file, line)` requests against parsed symbol files.
//!
//! File-path matching is case-insensitive and separator-normalized: the
//! requested path is split on `/`, reversed, and matched segment-by-segment
//! against each document's reversed segments; the document with the highest
//! match count wins, ties preferring the first document in table order.
//! Within the document, the inner-most method whose line interval contains
//! the request wins (a lambda defined inside an outer method shadows it),
//! and within the method the first non-hidden sequence point at or past the
//! requested line provides the IL offset and the effective line.

use crate::{
    runtime::MethodToken,
    symbols::SymbolFile,
};

/// A resolved breakpoint location inside one symbol file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// Method-definition token owning the chosen sequence point.
    pub method_def: MethodToken,
    /// IL offset to arm at.
    pub il_offset: u32,
    /// Start line of the chosen sequence point.
    pub effective_line: u32,
}

/// Splits a path on `/` into lower-cased segments, reversed so file names
/// compare first.
pub fn split_file_path(path: &str) -> Vec<String> {
    let normalized = path.replace('\\', "/").to_lowercase();
    let mut segments: Vec<String> = normalized.split('/').map(str::to_string).collect();
    segments.reverse();
    segments
}

/// Finds the document of `file` that best matches the requested path
/// segments. Returns the document index, or `None` when nothing matches.
pub fn best_document_match(file: &SymbolFile, request_segments: &[String]) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut longest_match = 0usize;

    for (index, document) in file.documents.iter().enumerate() {
        let document_segments = split_file_path(&document.path);

        let mut matches = 0usize;
        for (request, doc) in request_segments.iter().zip(document_segments.iter()) {
            if request == doc {
                matches += 1;
            }
        }

        if matches > 0 && matches > longest_match {
            best = Some(index);
            longest_match = matches;
        }
    }

    best
}

/// Resolves a line request inside one symbol file.
pub fn resolve_in_file(
    file: &SymbolFile,
    request_segments: &[String],
    line: u32,
) -> Option<ResolvedLocation> {
    let document = best_document_match(file, request_segments)?;

    let mut resolved: Option<ResolvedLocation> = None;
    let mut best_first_line = 0u32;

    for method in file.methods_of_document(document) {
        if method.first_line > line || method.last_line < line {
            continue;
        }

        // A method starting later but still containing the line is nested
        // inside the current best; prefer it so locals resolve against the
        // inner-most body.
        if method.first_line > best_first_line || resolved.is_none() {
            if let Some(sequence_point) = method.sequence_point_for_line(line) {
                resolved = Some(ResolvedLocation {
                    method_def: method.method_def,
                    il_offset: sequence_point.il_offset,
                    effective_line: sequence_point.start_line,
                });
                best_first_line = method.first_line;
            }
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Document, MethodSymbols, SequencePoint};

    fn seq(start_line: u32, il_offset: u32) -> SequencePoint {
        SequencePoint {
            start_line,
            end_line: start_line,
            start_col: 1,
            end_col: 40,
            il_offset,
            is_hidden: false,
        }
    }

    fn file_with_documents(paths: &[&str]) -> SymbolFile {
        SymbolFile {
            module_name: "prog.dll".to_string(),
            documents: paths
                .iter()
                .map(|p| Document { path: p.to_string(), ..Default::default() })
                .collect(),
            methods: Vec::new(),
        }
    }

    #[test]
    fn test_split_reverses_and_lowercases() {
        assert_eq!(split_file_path("Src/App/Prog.cs"), vec!["prog.cs", "app", "src"]);
        assert_eq!(split_file_path(r"Src\App\Prog.cs"), vec!["prog.cs", "app", "src"]);
    }

    #[test]
    fn test_best_document_prefers_longest_suffix() {
        let file =
            file_with_documents(&["/home/app/src/Prog.cs", "/home/app/test/Prog.cs"]);
        let request = split_file_path("src/Prog.cs");
        assert_eq!(best_document_match(&file, &request), Some(0));
    }

    #[test]
    fn test_best_document_tie_prefers_first() {
        let file = file_with_documents(&["/a/Prog.cs", "/b/Prog.cs"]);
        let request = split_file_path("Prog.cs");
        assert_eq!(best_document_match(&file, &request), Some(0));
    }

    #[test]
    fn test_best_document_no_match() {
        let file = file_with_documents(&["/a/Other.cs"]);
        let request = split_file_path("Prog.cs");
        assert_eq!(best_document_match(&file, &request), None);
    }

    #[test]
    fn test_case_insensitive_match() {
        let file = file_with_documents(&["/App/PROG.CS"]);
        let request = split_file_path("prog.cs");
        assert_eq!(best_document_match(&file, &request), Some(0));
    }

    #[test]
    fn test_resolve_picks_sequence_point_at_or_past_line() {
        let mut file = file_with_documents(&["/app/Prog.cs"]);
        file.methods.push(MethodSymbols {
            method_def: 0x0600_0001,
            document: 0,
            first_line: 10,
            last_line: 20,
            sequence_points: vec![seq(10, 0), seq(14, 8), seq(18, 16)],
            local_scopes: vec![],
        });

        let request = split_file_path("Prog.cs");
        let resolved = resolve_in_file(&file, &request, 12).unwrap();
        assert_eq!(resolved.method_def, 0x0600_0001);
        assert_eq!(resolved.il_offset, 8);
        assert_eq!(resolved.effective_line, 14);
    }

    #[test]
    fn test_resolve_prefers_nested_method() {
        let mut file = file_with_documents(&["/app/Prog.cs"]);
        // Outer method spans 10..30; a lambda inside it spans 14..16.
        file.methods.push(MethodSymbols {
            method_def: 0x0600_0001,
            document: 0,
            first_line: 10,
            last_line: 30,
            sequence_points: vec![seq(10, 0), seq(15, 20), seq(28, 40)],
            local_scopes: vec![],
        });
        file.methods.push(MethodSymbols {
            method_def: 0x0600_0002,
            document: 0,
            first_line: 14,
            last_line: 16,
            sequence_points: vec![seq(15, 2)],
            local_scopes: vec![],
        });

        let request = split_file_path("Prog.cs");
        let resolved = resolve_in_file(&file, &request, 15).unwrap();
        assert_eq!(resolved.method_def, 0x0600_0002);
        assert_eq!(resolved.il_offset, 2);
    }

    #[test]
    fn test_resolve_deterministic() {
        let mut file = file_with_documents(&["/app/Prog.cs"]);
        file.methods.push(MethodSymbols {
            method_def: 0x0600_0001,
            document: 0,
            first_line: 1,
            last_line: 50,
            sequence_points: vec![seq(5, 0), seq(42, 12)],
            local_scopes: vec![],
        });

        let request = split_file_path("Prog.cs");
        let first = resolve_in_file(&file, &request, 42).unwrap();
        let second = resolve_in_file(&file, &request, 42).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_no_sequence_point_past_line() {
        let mut file = file_with_documents(&["/app/Prog.cs"]);
        file.methods.push(MethodSymbols {
            method_def: 0x0600_0001,
            document: 0,
            first_line: 10,
            last_line: 20,
            sequence_points: vec![seq(10, 0)],
            local_scopes: vec![],
        });

        let request = split_file_path("Prog.cs");
        assert!(resolve_in_file(&file, &request, 15).is_none());
    }
}
