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

//! Pure helper functions over runtime value handles: dereferencing, unboxing
//! and name plumbing shared by the value factory and the stack-frame capture.

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::MAXIMUM_REFERENCE_DEPTH,
    error::{Error, Result},
    runtime::{ClassToken, MetadataImport, RuntimeValue},
};

/// Follows reference hops until a non-reference value or a null reference is
/// reached. Returns the final value and whether the chain ended in null.
///
/// Chains longer than [`MAXIMUM_REFERENCE_DEPTH`] fail with
/// [`Error::TooManyIndirections`].
pub fn dereference(value: Arc<dyn RuntimeValue>) -> Result<(Arc<dyn RuntimeValue>, bool)> {
    let mut current = value;
    let mut depth = 0;

    loop {
        let Some(reference) = current.reference_info() else {
            return Ok((current, false));
        };

        if reference.is_null {
            return Ok((current, true));
        }

        if depth >= MAXIMUM_REFERENCE_DEPTH {
            warn!(depth, "dereference chain exceeded the hop limit");
            return Err(Error::TooManyIndirections(MAXIMUM_REFERENCE_DEPTH));
        }

        current = current.dereference()?;
        depth += 1;
    }
}

/// Removes one level of boxing; identity for values that are not boxed.
pub fn unbox(value: Arc<dyn RuntimeValue>) -> Result<Arc<dyn RuntimeValue>> {
    match value.unboxed()? {
        Some(inner) => Ok(inner),
        None => Ok(value),
    }
}

/// [`dereference`] followed by [`unbox`]; the usual first step when turning a
/// raw runtime handle into a model value.
pub fn dereference_and_unbox(
    value: Arc<dyn RuntimeValue>,
) -> Result<(Arc<dyn RuntimeValue>, bool)> {
    let (dereferenced, is_null) = dereference(value)?;
    if is_null {
        return Ok((dereferenced, true));
    }
    Ok((unbox(dereferenced)?, false))
}

/// Strips the directory part of a module path, handling both separator
/// conventions the runtime may report.
pub fn short_module_name(module_name: &str) -> &str {
    let after_backslash =
        module_name.rsplit_once('\\').map(|(_, tail)| tail).unwrap_or(module_name);
    after_backslash.rsplit_once('/').map(|(_, tail)| tail).unwrap_or(after_backslash)
}

/// Resolves a typedef-or-typeref token to a type name through the module's
/// metadata.
pub fn type_name_from_token(metadata: &dyn MetadataImport, token: u32) -> Result<String> {
    const TOKEN_KIND_MASK: u32 = 0xff00_0000;
    const TOKEN_TYPE_REF: u32 = 0x0100_0000;
    const TOKEN_TYPE_DEF: u32 = 0x0200_0000;

    match token & TOKEN_KIND_MASK {
        TOKEN_TYPE_DEF => Ok(metadata.type_def_props(token as ClassToken)?.name),
        TOKEN_TYPE_REF => metadata.type_ref_name(token),
        _ => Err(Error::Unresolvable(format!("unsupported token kind {token:#010x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeValue, TestRig};

    #[test]
    fn test_dereference_non_reference_is_identity() {
        let value = FakeValue::int32(42).into_arc();
        let (result, is_null) = dereference(value.clone()).unwrap();
        assert!(Arc::ptr_eq(&result, &value));
        assert!(!is_null);
    }

    #[test]
    fn test_dereference_null() {
        let value = FakeValue::null_reference("System.String").into_arc();
        let (_, is_null) = dereference(value).unwrap();
        assert!(is_null);
    }

    #[test]
    fn test_dereference_too_many_hops() {
        let mut value = FakeValue::int32(1).into_arc();
        for _ in 0..(MAXIMUM_REFERENCE_DEPTH + 1) {
            value = FakeValue::reference_to(value).into_arc();
        }
        let err = dereference(value).unwrap_err();
        assert!(matches!(err, Error::TooManyIndirections(_)));
    }

    #[test]
    fn test_dereference_within_limit() {
        let mut value = FakeValue::int32(7).into_arc();
        for _ in 0..MAXIMUM_REFERENCE_DEPTH {
            value = FakeValue::reference_to(value).into_arc();
        }
        let (result, is_null) = dereference(value).unwrap();
        assert!(!is_null);
        assert_eq!(result.primitive_bytes().unwrap(), 7i32.to_le_bytes());
    }

    #[test]
    fn test_unbox_identity() {
        let value = FakeValue::int32(3).into_arc();
        let result = unbox(value.clone()).unwrap();
        assert!(Arc::ptr_eq(&result, &value));
    }

    #[test]
    fn test_short_module_name() {
        assert_eq!(short_module_name("/app/bin/Prog.dll"), "Prog.dll");
        assert_eq!(short_module_name(r"C:\app\bin\Prog.dll"), "Prog.dll");
        assert_eq!(short_module_name("Prog.dll"), "Prog.dll");
    }

    #[test]
    fn test_type_name_from_token_kinds() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();
        let err = type_name_from_token(metadata.as_ref(), 0x0600_0001).unwrap_err();
        assert!(matches!(err, Error::Unresolvable(_)));
    }
}
