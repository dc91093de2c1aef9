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

//! Condition/expression language coverage, compiled and evaluated against a
//! real captured frame with the fake runtime. These go through the same
//! compile-and-bind path the snapshot assembler uses; only getter/method
//! nodes need the coordinator, so everything here runs inline.

mod common;

use common::*;

use std::sync::Arc;

use sdb_common::Variable;
use sdb_engine::{
    error::Error,
    eval::{compile_expression, EvalContext},
    frame::StackFrame,
    runtime::ElementType,
    testing::{FakeType, FakeValue},
    Value,
};

/// Captures a frame in `Prog.M` and evaluates one expression against it.
fn eval_in_frame(
    scenario: &Scenario,
    locals: Vec<FakeValue>,
    arguments: Vec<FakeValue>,
    text: &str,
) -> Result<Arc<Value>, Error> {
    let raw = scenario.frame_in_m(locals, arguments).into_arc();
    let ctx = scenario.capture_context();
    let frame = StackFrame::from_runtime_frame(&raw, &scenario.symbols, true, &ctx)?;
    let compiled = compile_expression(text, &frame, &scenario.symbols, &ctx)?;
    let ectx = EvalContext { frame: &frame, ctx: &ctx, allow_method_call: false };
    compiled.evaluate(&ectx)
}

/// Renders a value the way a snapshot leaf would.
fn render(value: &Value) -> (String, String) {
    let mut var = Variable::default();
    value.populate_type(&mut var).expect("type renders");
    value.populate_value(&mut var).expect("value renders");
    (var.value, var.type_name)
}

fn eval_int(scenario: &Scenario, text: &str) -> (String, String) {
    let value = eval_in_frame(
        scenario,
        vec![FakeValue::int32(5)],
        vec![FakeValue::int32(7)],
        text,
    )
    .unwrap_or_else(|e| panic!("{text}: {e}"));
    render(&value)
}

#[test]
fn test_arithmetic_and_precedence() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "1 + 2 * 3"), ("7".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "(1 + 2) * 3"), ("9".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "10 / 3"), ("3".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "10 % 3"), ("1".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "-x"), ("-7".to_string(), "Int32".to_string()));
}

#[test]
fn test_frame_identifiers() {
    let scenario = scenario();
    // x binds to the argument, y to the local.
    assert_eq!(eval_int(&scenario, "x"), ("7".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "y"), ("5".to_string(), "Int32".to_string()));
    assert_eq!(eval_int(&scenario, "x + y"), ("12".to_string(), "Int32".to_string()));
}

#[test]
fn test_numeric_promotion() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "1 + 2L"), ("3".to_string(), "Int64".to_string()));
    assert_eq!(eval_int(&scenario, "1 + 0.5"), ("1.5".to_string(), "Double".to_string()));
    assert_eq!(eval_int(&scenario, "3000000000"), ("3000000000".to_string(), "Int64".to_string()));
}

#[test]
fn test_shifts_and_bitwise() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "1 << 4").0, "16");
    assert_eq!(eval_int(&scenario, "-8 >> 1").0, "-4");
    assert_eq!(eval_int(&scenario, "-8 >>> 28").0, "15");
    assert_eq!(eval_int(&scenario, "0x0f & 0x09").0, "9");
    assert_eq!(eval_int(&scenario, "0x0f ^ 0x09").0, "6");
    assert_eq!(eval_int(&scenario, "0x08 | 0x01").0, "9");
    assert_eq!(eval_int(&scenario, "~0").0, "-1");
}

#[test]
fn test_comparisons_and_logic() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "x > 5").0, "True");
    assert_eq!(eval_int(&scenario, "x <= 5").0, "False");
    assert_eq!(eval_int(&scenario, "x == 7 && y == 5").0, "True");
    assert_eq!(eval_int(&scenario, "x == 0 || y == 5").0, "True");
    assert_eq!(eval_int(&scenario, "!(x == 7)").0, "False");
    assert_eq!(eval_int(&scenario, "x != y").0, "True");
}

#[test]
fn test_short_circuit_skips_rhs_errors() {
    let scenario = scenario();
    // The right side would divide by zero; && must not evaluate it.
    assert_eq!(eval_int(&scenario, "false && 1 / 0 == 0").0, "False");
    assert_eq!(eval_int(&scenario, "true || 1 / 0 == 0").0, "True");
}

#[test]
fn test_ternary() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "x > 5 ? 1 : 2").0, "1");
    assert_eq!(eval_int(&scenario, "x > 9 ? 1 : 2").0, "2");
    // Right-associative nesting.
    assert_eq!(eval_int(&scenario, "x > 9 ? 1 : x > 5 ? 2 : 3").0, "2");
}

#[test]
fn test_casts() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "(long) x"), ("7".to_string(), "Int64".to_string()));
    assert_eq!(eval_int(&scenario, "(byte) 300"), ("44".to_string(), "Byte".to_string()));
    assert_eq!(eval_int(&scenario, "(double) x / 2"), ("3.5".to_string(), "Double".to_string()));
    assert_eq!(eval_int(&scenario, "(char) 65"), ("A".to_string(), "Char".to_string()));
}

#[test]
fn test_string_literals_and_equality() {
    let scenario = scenario();
    let value = eval_in_frame(
        &scenario,
        vec![FakeValue::string("hello")],
        vec![FakeValue::int32(7)],
        r#"y == "hello""#,
    )
    .unwrap();
    assert_eq!(render(&value).0, "True");

    let value = eval_in_frame(
        &scenario,
        vec![FakeValue::string("hello")],
        vec![FakeValue::int32(7)],
        r#"y == "world""#,
    )
    .unwrap();
    assert_eq!(render(&value).0, "False");
}

#[test]
fn test_null_comparison() {
    let scenario = scenario();
    let node_ty = FakeType::class(ElementType::Class, &scenario.module, TYPE_NODE, None);

    let value = eval_in_frame(
        &scenario,
        vec![FakeValue::null_of(node_ty.clone())],
        vec![FakeValue::int32(7)],
        "y == null",
    )
    .unwrap();
    assert_eq!(render(&value).0, "True");

    let node = FakeValue::object(node_ty.clone(), vec![(FIELD_NODE_VALUE, FakeValue::int32(3))]);
    let value = eval_in_frame(
        &scenario,
        vec![FakeValue::reference_to(node.into_arc())],
        vec![FakeValue::int32(7)],
        "y != null",
    )
    .unwrap();
    assert_eq!(render(&value).0, "True");
}

#[test]
fn test_array_indexing() {
    let scenario = scenario();
    let array = FakeValue::array(
        FakeType::primitive(ElementType::I4),
        vec![FakeValue::int32(10), FakeValue::int32(20), FakeValue::int32(30)],
    );

    let value = eval_in_frame(
        &scenario,
        vec![array],
        vec![FakeValue::int32(1)],
        "y[x] + 1",
    )
    .unwrap();
    assert_eq!(render(&value), ("21".to_string(), "Int32".to_string()));
}

#[test]
fn test_array_index_out_of_range() {
    let scenario = scenario();
    let array = FakeValue::array(FakeType::primitive(ElementType::I4), vec![FakeValue::int32(10)]);
    let err = eval_in_frame(&scenario, vec![array], vec![FakeValue::int32(5)], "y[x]").unwrap_err();
    assert!(matches!(err, Error::EvalException(_)));
}

#[test]
fn test_member_access_on_field() {
    let scenario = scenario();
    let node_ty = FakeType::class(ElementType::Class, &scenario.module, TYPE_NODE, None);
    let node = FakeValue::object(node_ty, vec![(FIELD_NODE_VALUE, FakeValue::int32(42))]);

    let value = eval_in_frame(
        &scenario,
        vec![FakeValue::reference_to(node.into_arc())],
        vec![FakeValue::int32(7)],
        "y.value + 1",
    )
    .unwrap();
    assert_eq!(render(&value), ("43".to_string(), "Int32".to_string()));
}

#[test]
fn test_division_by_zero_is_eval_exception() {
    let scenario = scenario();
    let err = eval_in_frame(
        &scenario,
        vec![FakeValue::int32(0)],
        vec![FakeValue::int32(7)],
        "x / y",
    )
    .unwrap_err();
    assert!(matches!(err, Error::EvalException(_)));
}

#[test]
fn test_unknown_identifier_fails_compile() {
    let scenario = scenario();
    let err = eval_in_frame(
        &scenario,
        vec![FakeValue::int32(5)],
        vec![FakeValue::int32(7)],
        "nonsense + 1",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
}

#[test]
fn test_boolean_operand_type_mismatch() {
    let scenario = scenario();
    let err = eval_in_frame(
        &scenario,
        vec![FakeValue::int32(5)],
        vec![FakeValue::int32(7)],
        "x && true",
    )
    .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)));
}

#[test]
fn test_condition_static_type_must_be_boolean() {
    let scenario = scenario();
    let raw = scenario
        .frame_in_m(vec![FakeValue::int32(5)], vec![FakeValue::int32(7)])
        .into_arc();
    let ctx = scenario.capture_context();
    let frame = StackFrame::from_runtime_frame(&raw, &scenario.symbols, true, &ctx).unwrap();

    // `x + 1` compiles fine but is Int32, which a condition must reject.
    let compiled = compile_expression("x + 1", &frame, &scenario.symbols, &ctx).unwrap();
    assert_eq!(compiled.signature().element_type, ElementType::I4);
    assert_ne!(compiled.signature().element_type, ElementType::Boolean);
}

#[test]
fn test_char_literals_compare() {
    let scenario = scenario();
    assert_eq!(eval_int(&scenario, "'A' < 'B'").0, "True");
    assert_eq!(eval_int(&scenario, "'\\n' == '\\u000a'").0, "True");
}
