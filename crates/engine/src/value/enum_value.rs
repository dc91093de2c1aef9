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

//! Enum values rendered symbolically.
//!
//! The raw bits are matched against the exact constant values first, then
//! against an OR-composition of constants for `[Flags]`-style enums.
//! Constants covering zero bits are skipped unless the whole value is zero.

use std::sync::Arc;

use dashmap::DashMap;
use itertools::Itertools;

use crate::{
    error::{Error, Result},
    runtime::{signature::enum_underlying_type, ClassToken, ElementType, MetadataImport},
};

/// Name of the instance field carrying an enum's numeric value.
pub const ENUM_VALUE_FIELD: &str = "value__";

/// One declared enum constant.
pub type EnumConstant = (String, u64);

/// Process-wide cache of declared enum constants, keyed `(module, class)`.
/// Unlike the static member cache, constants never go stale, so this cache is
/// not cleared at snapshot boundaries.
#[derive(Default)]
pub struct EnumConstantCache {
    map: DashMap<(String, String), Arc<Vec<EnumConstant>>>,
}

impl EnumConstantCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached constants for a class, if present.
    pub fn get(&self, module: &str, class: &str) -> Option<Arc<Vec<EnumConstant>>> {
        self.map.get(&(module.to_string(), class.to_string())).map(|v| v.clone())
    }

    /// Caches the constants for a class.
    pub fn insert(&self, module: &str, class: &str, constants: Arc<Vec<EnumConstant>>) {
        self.map.insert((module.to_string(), class.to_string()), constants);
    }
}

/// An enum value.
pub struct EnumValue {
    /// Fully qualified enum type name.
    pub type_name: String,
    /// Underlying primitive element type.
    pub underlying: ElementType,
    /// Raw bits widened to 64 bits.
    pub raw: u64,
    /// Declared constants in declaration order.
    pub constants: Arc<Vec<EnumConstant>>,
}

impl EnumValue {
    /// Builds an enum value from the raw bytes of the instance and the
    /// metadata of its class.
    pub fn from_metadata(
        type_name: String,
        class_token: ClassToken,
        metadata: &dyn MetadataImport,
        bytes: &[u8],
        cached: Option<Arc<Vec<EnumConstant>>>,
    ) -> Result<(Self, Arc<Vec<EnumConstant>>)> {
        let fields = metadata.fields(class_token)?;

        let value_field = fields
            .iter()
            .find(|f| !f.is_static && f.name == ENUM_VALUE_FIELD)
            .ok_or_else(|| Error::Unresolvable(format!("enum {type_name} has no value__ field")))?;
        let underlying = enum_underlying_type(&value_field.signature)?;

        let constants = match cached {
            Some(constants) => constants,
            None => {
                let mut constants = Vec::new();
                for field in &fields {
                    if !field.is_static {
                        continue;
                    }
                    if let Some(default) = &field.default_value {
                        constants.push((field.name.clone(), default.as_u64()));
                    }
                }
                Arc::new(constants)
            }
        };

        let raw = extract_enum_bits(underlying, bytes);
        let value = Self { type_name, underlying, raw, constants: constants.clone() };
        Ok((value, constants))
    }

    /// Renders the value as a constant name, an OR-composition of constant
    /// names, or the raw number when nothing matches.
    pub fn render(&self) -> String {
        for (name, constant) in self.constants.iter() {
            if *constant == self.raw {
                return name.clone();
            }
        }

        // Compose from constants whose bits are still uncovered; each match
        // zeroes its bits so overlapping constants are not repeated.
        let mut remaining = self.raw;
        let mut parts = Vec::new();
        for (name, constant) in self.constants.iter() {
            if *constant == 0 || (constant & remaining) != *constant {
                continue;
            }
            remaining &= !constant;
            parts.push(name.as_str());
        }

        if parts.is_empty() {
            return self.raw.to_string();
        }
        parts.iter().join(" | ")
    }
}

/// Widens raw enum bytes to 64 bits, sign-extending signed underlying types.
pub fn extract_enum_bits(underlying: ElementType, bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    let raw = u64::from_le_bytes(buf);
    match underlying {
        ElementType::I1 => i64::from(raw as u8 as i8) as u64,
        ElementType::I2 => i64::from(raw as u16 as i16) as u64,
        ElementType::I4 => i64::from(raw as u32 as i32) as u64,
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_enum(raw: u64) -> EnumValue {
        EnumValue {
            type_name: "FileAccess".to_string(),
            underlying: ElementType::I4,
            raw,
            constants: Arc::new(vec![
                ("None".to_string(), 0),
                ("Read".to_string(), 1),
                ("Write".to_string(), 2),
                ("ReadWrite".to_string(), 3),
                ("Delete".to_string(), 4),
            ]),
        }
    }

    #[test]
    fn test_exact_match_wins_over_composition() {
        // 3 matches ReadWrite exactly even though Read | Write also covers it.
        assert_eq!(flags_enum(3).render(), "ReadWrite");
    }

    #[test]
    fn test_bitmask_composition() {
        assert_eq!(flags_enum(5).render(), "Read | Delete");
        assert_eq!(flags_enum(6).render(), "Write | Delete");
    }

    #[test]
    fn test_zero_value_uses_zero_constant() {
        assert_eq!(flags_enum(0).render(), "None");
    }

    #[test]
    fn test_zero_constant_skipped_in_composition() {
        let rendered = flags_enum(5).render();
        assert!(!rendered.contains("None"));
    }

    #[test]
    fn test_unmatched_bits_fall_back_to_number() {
        assert_eq!(flags_enum(64).render(), "64");
    }

    #[test]
    fn test_composition_roundtrip() {
        // Rendering then re-parsing by splitting on `|` yields the same set.
        let value = flags_enum(7);
        let rendered = value.render();
        let total: u64 = rendered
            .split('|')
            .map(str::trim)
            .map(|name| {
                value.constants.iter().find(|(n, _)| n == name).map(|(_, v)| *v).unwrap_or(0)
            })
            .fold(0, |acc, v| acc | v);
        assert_eq!(total, 7);
    }

    #[test]
    fn test_sign_extension() {
        let bits = extract_enum_bits(ElementType::I4, &(-1i32).to_le_bytes());
        assert_eq!(bits, u64::MAX);
    }
}
