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

//! Compilation of the untyped AST against a stack frame, and evaluation of
//! the resulting typed tree.
//!
//! Every typed node carries its static type signature. Compilation enforces
//! the usual widening promotions for binary numeric operands, allows
//! equality between reference types and the `null` literal, and re-binds
//! member access at each step using the static type of the left-hand side.
//! Evaluation goes through the coordinator whenever a property getter or
//! method must run in the debuggee; when method calls are disallowed (a
//! condition with method evaluation disabled) those nodes fail with
//! `EvaluationRequiresMethodCall` instead.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    eval::ast::{BinaryOp, Expr, UnaryOp},
    frame::{IdentifierBinding, StackFrame},
    runtime::{
        signature::{
            parse_field_type, parse_method_return_type, parse_property_type, TypeSignature,
        },
        ClassToken, ElementType, EvalCall, FieldProps, MetadataImport, MethodToken, PropertyProps,
        RuntimeClass, RuntimeModule,
    },
    symbols::SymbolStore,
    value::{
        collection::{
            DICTIONARY_CLASS_NAME, HASH_SET_CLASS_NAME, LIST_CLASS_NAME,
        },
        factory, CaptureContext, NullValue, PrimitiveKind, PrimitiveValue, StringValue, Value,
    },
};

/// Everything expression evaluation needs at runtime.
pub struct EvalContext<'a> {
    /// The frame identifiers were bound against.
    pub frame: &'a StackFrame,
    /// The surrounding capture context.
    pub ctx: &'a CaptureContext,
    /// Whether getter/method invocation is permitted.
    pub allow_method_call: bool,
}

/// A compiled expression: a typed tree plus its static type.
pub struct CompiledExpression {
    root: TypedExpr,
    signature: TypeSignature,
}

impl CompiledExpression {
    /// The static type of the whole expression.
    pub fn signature(&self) -> &TypeSignature {
        &self.signature
    }

    /// Evaluates the expression.
    pub fn evaluate(&self, ectx: &EvalContext<'_>) -> Result<Arc<Value>> {
        evaluate(&self.root, ectx)
    }

    /// Evaluates a condition to its boolean result.
    pub fn evaluate_condition(&self, ectx: &EvalContext<'_>) -> Result<bool> {
        let value = self.evaluate(ectx)?;
        match value.as_ref() {
            Value::Primitive(p) => p.as_bool(),
            _ => Err(Error::TypeMismatch("condition did not evaluate to Boolean".to_string())),
        }
    }
}

enum MemberBinding {
    Field { props: FieldProps },
    Property { props: PropertyProps, module: Arc<dyn RuntimeModule> },
    CollectionCount,
}

enum TypedExpr {
    Constant(PrimitiveValue),
    StringConstant(String),
    NullConstant,
    Identifier(IdentifierBinding),
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
        signature: TypeSignature,
    },
    Binary {
        op: BinaryOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
        signature: TypeSignature,
    },
    Conditional {
        condition: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Box<TypedExpr>,
    },
    Member {
        base: Box<TypedExpr>,
        binding: MemberBinding,
        signature: TypeSignature,
    },
    Index {
        base: Box<TypedExpr>,
        index: Box<TypedExpr>,
        element: TypeSignature,
    },
    Call {
        base: Option<Box<TypedExpr>>,
        module: Arc<dyn RuntimeModule>,
        method: MethodToken,
        is_static: bool,
        args: Vec<TypedExpr>,
        signature: TypeSignature,
    },
    Cast {
        operand: Box<TypedExpr>,
        target: ElementType,
    },
}

/// Compiles an AST against a frame, producing a typed expression tree.
pub fn compile(
    expr: &Expr,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<CompiledExpression> {
    let root = compile_node(expr, frame, symbols, ctx)?;
    let signature = signature_of(&root);
    Ok(CompiledExpression { root, signature })
}

fn compile_node(
    expr: &Expr,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<TypedExpr> {
    match expr {
        Expr::IntLiteral { value, is_long } => {
            let kind = if *is_long || *value > i32::MAX as u64 {
                PrimitiveKind::Int64(*value as i64)
            } else {
                PrimitiveKind::Int32(*value as i32)
            };
            Ok(TypedExpr::Constant(PrimitiveValue { kind }))
        }
        Expr::FloatLiteral { value, is_single } => {
            let kind = if *is_single {
                PrimitiveKind::Single(*value as f32)
            } else {
                PrimitiveKind::Double(*value)
            };
            Ok(TypedExpr::Constant(PrimitiveValue { kind }))
        }
        Expr::CharLiteral(c) => {
            Ok(TypedExpr::Constant(PrimitiveValue { kind: PrimitiveKind::Char(*c) }))
        }
        Expr::BoolLiteral(b) => {
            Ok(TypedExpr::Constant(PrimitiveValue { kind: PrimitiveKind::Boolean(*b) }))
        }
        Expr::StringLiteral(s) => Ok(TypedExpr::StringConstant(s.clone())),
        Expr::NullLiteral => Ok(TypedExpr::NullConstant),
        Expr::Identifier(name) => {
            let binding = frame
                .lookup_identifier(name, ctx)?
                .ok_or_else(|| Error::Compile(format!("unknown identifier {name}")))?;
            Ok(TypedExpr::Identifier(binding))
        }
        Expr::Unary { op, operand } => compile_unary(*op, operand, frame, symbols, ctx),
        Expr::Binary { op, left, right } => compile_binary(*op, left, right, frame, symbols, ctx),
        Expr::Conditional { condition, then_branch, else_branch } => {
            let condition = compile_node(condition, frame, symbols, ctx)?;
            if signature_of(&condition).element_type != ElementType::Boolean {
                return Err(Error::TypeMismatch(
                    "ternary condition must be Boolean".to_string(),
                ));
            }
            let then_branch = compile_node(then_branch, frame, symbols, ctx)?;
            let else_branch = compile_node(else_branch, frame, symbols, ctx)?;
            conditional_result_signature(&signature_of(&then_branch), &signature_of(&else_branch))?;
            Ok(TypedExpr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            })
        }
        Expr::Member { base, name } => compile_member(base, name, frame, symbols, ctx),
        Expr::Index { base, index } => {
            let base = compile_node(base, frame, symbols, ctx)?;
            let base_sig = signature_of(&base);
            if base_sig.array_rank == 0 {
                return Err(Error::TypeMismatch(format!(
                    "cannot index a value of type {}",
                    base_sig.type_string()
                )));
            }
            let element = base_sig
                .generic_args
                .first()
                .cloned()
                .unwrap_or_else(|| TypeSignature::primitive(ElementType::Object));
            let index = compile_node(index, frame, symbols, ctx)?;
            if promote_elements(
                signature_of(&index).element_type,
                ElementType::I4,
            )? != ElementType::I4
            {
                return Err(Error::TypeMismatch("array index must be an integer".to_string()));
            }
            Ok(TypedExpr::Index { base: Box::new(base), index: Box::new(index), element })
        }
        Expr::Call { base, name, args } => compile_call(base.as_deref(), name, args, frame, symbols, ctx),
        Expr::Cast { target, operand } => {
            let target_type = cast_target_element(target)
                .ok_or_else(|| Error::Compile(format!("unknown cast target {target}")))?;
            let operand = compile_node(operand, frame, symbols, ctx)?;
            let operand_sig = signature_of(&operand);
            if !operand_sig.is_primitive() {
                return Err(Error::TypeMismatch(format!(
                    "cannot cast {} to {target}",
                    operand_sig.type_string()
                )));
            }
            Ok(TypedExpr::Cast { operand: Box::new(operand), target: target_type })
        }
    }
}

fn compile_unary(
    op: UnaryOp,
    operand: &Expr,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<TypedExpr> {
    let operand = compile_node(operand, frame, symbols, ctx)?;
    let operand_sig = signature_of(&operand);
    let element = operand_sig.element_type;

    let result = match op {
        UnaryOp::Plus | UnaryOp::Minus => {
            if !element.is_primitive() || element == ElementType::Boolean {
                return Err(Error::TypeMismatch(format!(
                    "unary {op:?} needs a numeric operand"
                )));
            }
            TypeSignature::primitive(promote_elements(element, ElementType::I4)?)
        }
        UnaryOp::Not => {
            if element != ElementType::Boolean {
                return Err(Error::TypeMismatch("operator ! needs a Boolean operand".to_string()));
            }
            TypeSignature::boolean()
        }
        UnaryOp::BitNot => {
            let promoted = promote_elements(element, ElementType::I4)?;
            if !matches!(promoted, ElementType::I4 | ElementType::I8) {
                return Err(Error::TypeMismatch(
                    "operator ~ needs an integral operand".to_string(),
                ));
            }
            TypeSignature::primitive(promoted)
        }
    };

    Ok(TypedExpr::Unary { op, operand: Box::new(operand), signature: result })
}

fn compile_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<TypedExpr> {
    let left = compile_node(left, frame, symbols, ctx)?;
    let right = compile_node(right, frame, symbols, ctx)?;
    let ls = signature_of(&left);
    let rs = signature_of(&right);

    let signature = match op {
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Add | BinaryOp::Sub => {
            require_numeric(&ls, op)?;
            require_numeric(&rs, op)?;
            TypeSignature::primitive(promote_elements(ls.element_type, rs.element_type)?)
        }
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => {
            require_numeric(&ls, op)?;
            require_numeric(&rs, op)?;
            let promoted = promote_elements(ls.element_type, ElementType::I4)?;
            if matches!(promoted, ElementType::R4 | ElementType::R8) {
                return Err(Error::TypeMismatch("shift needs integral operands".to_string()));
            }
            TypeSignature::primitive(promoted)
        }
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            require_numeric(&ls, op)?;
            require_numeric(&rs, op)?;
            TypeSignature::boolean()
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            equality_signature(&left, &right, &ls, &rs)?;
            TypeSignature::boolean()
        }
        BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr => {
            if ls.element_type == ElementType::Boolean && rs.element_type == ElementType::Boolean {
                TypeSignature::boolean()
            } else {
                require_numeric(&ls, op)?;
                require_numeric(&rs, op)?;
                let promoted = promote_elements(ls.element_type, rs.element_type)?;
                if matches!(promoted, ElementType::R4 | ElementType::R8) {
                    return Err(Error::TypeMismatch(
                        "bitwise operator needs integral operands".to_string(),
                    ));
                }
                TypeSignature::primitive(promoted)
            }
        }
        BinaryOp::And | BinaryOp::Or => {
            if ls.element_type != ElementType::Boolean || rs.element_type != ElementType::Boolean {
                return Err(Error::TypeMismatch(format!(
                    "operator {op:?} needs Boolean operands"
                )));
            }
            TypeSignature::boolean()
        }
    };

    Ok(TypedExpr::Binary { op, left: Box::new(left), right: Box::new(right), signature })
}

fn compile_member(
    base: &Expr,
    name: &str,
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<TypedExpr> {
    let base = compile_node(base, frame, symbols, ctx)?;
    let base_sig = signature_of(&base);

    if matches!(
        base_sig.type_name.as_str(),
        LIST_CLASS_NAME | HASH_SET_CLASS_NAME | DICTIONARY_CLASS_NAME
    ) && name == "Count"
    {
        return Ok(TypedExpr::Member {
            base: Box::new(base),
            binding: MemberBinding::CollectionCount,
            signature: TypeSignature::primitive(ElementType::I4),
        });
    }

    if !matches!(base_sig.element_type, ElementType::Class | ElementType::ValueType) {
        return Err(Error::TypeMismatch(format!(
            "cannot access member {name} on {}",
            base_sig.type_string()
        )));
    }

    let (module, metadata, class_token) = resolve_class(&base_sig.type_name, frame, symbols)?;

    let field = match metadata.find_field(class_token, name)? {
        Some(field) => Some(field),
        None => metadata.find_field(class_token, &format!("<{name}>k__BackingField"))?,
    };
    if let Some(props) = field {
        let signature = parse_field_type(&props.signature, metadata.as_ref())?;
        return Ok(TypedExpr::Member {
            base: Box::new(base),
            binding: MemberBinding::Field { props },
            signature,
        });
    }

    if let Some(props) = metadata.find_property(class_token, name)? {
        let signature = parse_property_type(&props.signature, metadata.as_ref())?;
        return Ok(TypedExpr::Member {
            base: Box::new(base),
            binding: MemberBinding::Property { props, module },
            signature,
        });
    }

    Err(Error::Compile(format!("{} has no member {name}", base_sig.type_name)))
}

fn compile_call(
    base: Option<&Expr>,
    name: &str,
    args: &[Expr],
    frame: &StackFrame,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<TypedExpr> {
    let base = base.map(|b| compile_node(b, frame, symbols, ctx)).transpose()?;

    let receiver_type = match &base {
        Some(b) => signature_of(b).type_name,
        None => frame.class_name.clone(),
    };
    let (module, metadata, class_token) = resolve_class(&receiver_type, frame, symbols)?;

    let candidates = metadata.methods_with_name(class_token, name)?;
    if candidates.is_empty() {
        return Err(Error::Compile(format!("{receiver_type} has no method {name}")));
    }

    let mut compiled_args = Vec::with_capacity(args.len());
    for arg in args {
        compiled_args.push(compile_node(arg, frame, symbols, ctx)?);
    }

    // Pick the overload with a matching parameter count, falling back to the
    // first candidate.
    let mut chosen = candidates[0];
    for candidate in &candidates {
        if metadata.method_params(*candidate)?.len() == compiled_args.len() {
            chosen = *candidate;
            break;
        }
    }

    let props = metadata.method_props(chosen)?;
    let signature = parse_method_return_type(&props.signature, metadata.as_ref())?;

    Ok(TypedExpr::Call {
        base: base.map(Box::new),
        module,
        method: chosen,
        is_static: props.is_static(),
        args: compiled_args,
        signature,
    })
}

fn resolve_class(
    type_name: &str,
    frame: &StackFrame,
    symbols: &SymbolStore,
) -> Result<(Arc<dyn RuntimeModule>, Arc<dyn MetadataImport>, ClassToken)> {
    for module_symbols in symbols.all() {
        let Ok(metadata) = module_symbols.module.metadata() else { continue };
        if let Some(token) = metadata.find_type_def(type_name)? {
            return Ok((module_symbols.module.clone(), metadata, token));
        }
    }

    // The frame's own module may not have symbols.
    if let Ok(class) = frame.enclosing_class() {
        let module = class.module()?;
        let metadata = module.metadata()?;
        if let Some(token) = metadata.find_type_def(type_name)? {
            return Ok((module, metadata, token));
        }
    }

    Err(Error::ClassNotLoaded(type_name.to_string()))
}

fn signature_of(expr: &TypedExpr) -> TypeSignature {
    match expr {
        TypedExpr::Constant(p) => TypeSignature::primitive(p.element_type()),
        TypedExpr::StringConstant(_) => TypeSignature::primitive(ElementType::String),
        TypedExpr::NullConstant => TypeSignature::named(ElementType::Class, "null"),
        TypedExpr::Identifier(binding) => binding.signature().clone(),
        TypedExpr::Unary { signature, .. } |
        TypedExpr::Binary { signature, .. } |
        TypedExpr::Member { signature, .. } |
        TypedExpr::Call { signature, .. } => signature.clone(),
        TypedExpr::Conditional { then_branch, else_branch, .. } => {
            conditional_result_signature(
                &signature_of(then_branch),
                &signature_of(else_branch),
            )
            .unwrap_or_else(|_| signature_of(then_branch))
        }
        TypedExpr::Index { element, .. } => element.clone(),
        TypedExpr::Cast { target, .. } => TypeSignature::primitive(*target),
    }
}

fn require_numeric(sig: &TypeSignature, op: BinaryOp) -> Result<()> {
    if !sig.is_primitive() || sig.element_type == ElementType::Boolean {
        return Err(Error::TypeMismatch(format!(
            "operator {op:?} needs numeric operands, found {}",
            sig.type_string()
        )));
    }
    Ok(())
}

/// The usual binary numeric promotions: byte/short/char widen to int, mixed
/// int/long go to long, and any floating operand makes the result floating.
fn promote_elements(a: ElementType, b: ElementType) -> Result<ElementType> {
    use ElementType::*;
    let rank = |e: ElementType| -> Result<u8> {
        Ok(match e {
            R8 => 4,
            R4 => 3,
            I8 | U8 | I | U => 2,
            I4 | U4 | I1 | U1 | I2 | U2 | Char => 1,
            other => {
                return Err(Error::TypeMismatch(format!(
                    "{other:?} does not participate in numeric promotion"
                )))
            }
        })
    };
    Ok(match rank(a)?.max(rank(b)?) {
        4 => R8,
        3 => R4,
        2 => I8,
        _ => I4,
    })
}

fn equality_signature(
    left: &TypedExpr,
    right: &TypedExpr,
    ls: &TypeSignature,
    rs: &TypeSignature,
) -> Result<()> {
    let left_null = matches!(left, TypedExpr::NullConstant);
    let right_null = matches!(right, TypedExpr::NullConstant);

    if left_null || right_null {
        let other = if left_null { rs } else { ls };
        if left_null && right_null {
            return Ok(());
        }
        if other.is_reference() {
            return Ok(());
        }
        return Err(Error::TypeMismatch(format!(
            "cannot compare {} to null",
            other.type_string()
        )));
    }

    if ls.element_type == ElementType::String && rs.element_type == ElementType::String {
        return Ok(());
    }
    if ls.element_type == ElementType::Boolean && rs.element_type == ElementType::Boolean {
        return Ok(());
    }
    if ls.is_primitive() && rs.is_primitive() {
        promote_elements(ls.element_type, rs.element_type)?;
        return Ok(());
    }
    if ls.is_reference() && rs.is_reference() {
        return Ok(());
    }

    Err(Error::TypeMismatch(format!(
        "cannot compare {} to {}",
        ls.type_string(),
        rs.type_string()
    )))
}

fn conditional_result_signature(
    then_sig: &TypeSignature,
    else_sig: &TypeSignature,
) -> Result<TypeSignature> {
    if then_sig == else_sig {
        return Ok(then_sig.clone());
    }
    if then_sig.is_primitive() &&
        else_sig.is_primitive() &&
        then_sig.element_type != ElementType::Boolean &&
        else_sig.element_type != ElementType::Boolean
    {
        return Ok(TypeSignature::primitive(promote_elements(
            then_sig.element_type,
            else_sig.element_type,
        )?));
    }
    if then_sig.type_name == "null" && else_sig.is_reference() {
        return Ok(else_sig.clone());
    }
    if else_sig.type_name == "null" && then_sig.is_reference() {
        return Ok(then_sig.clone());
    }
    Err(Error::TypeMismatch(format!(
        "ternary branches have incompatible types {} and {}",
        then_sig.type_string(),
        else_sig.type_string()
    )))
}

fn cast_target_element(target: &str) -> Option<ElementType> {
    Some(match target {
        "bool" | "System.Boolean" => ElementType::Boolean,
        "char" | "System.Char" => ElementType::Char,
        "sbyte" | "System.SByte" => ElementType::I1,
        "byte" | "System.Byte" => ElementType::U1,
        "short" | "System.Int16" => ElementType::I2,
        "ushort" | "System.UInt16" => ElementType::U2,
        "int" | "System.Int32" => ElementType::I4,
        "uint" | "System.UInt32" => ElementType::U4,
        "long" | "System.Int64" => ElementType::I8,
        "ulong" | "System.UInt64" => ElementType::U8,
        "float" | "System.Single" => ElementType::R4,
        "double" | "System.Double" => ElementType::R8,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn evaluate(expr: &TypedExpr, ectx: &EvalContext<'_>) -> Result<Arc<Value>> {
    match expr {
        TypedExpr::Constant(p) => Ok(Arc::new(Value::Primitive(*p))),
        TypedExpr::StringConstant(s) => {
            Ok(Arc::new(Value::Str(StringValue::literal(s.clone()))))
        }
        TypedExpr::NullConstant => {
            Ok(Arc::new(Value::Null(NullValue { type_name: "null".to_string() })))
        }
        TypedExpr::Identifier(binding) => evaluate_identifier(binding, ectx),
        TypedExpr::Unary { op, operand, .. } => evaluate_unary(*op, operand, ectx),
        TypedExpr::Binary { op, left, right, signature } => {
            evaluate_binary(*op, left, right, signature, ectx)
        }
        TypedExpr::Conditional { condition, then_branch, else_branch } => {
            let cond = expect_primitive(&evaluate(condition, ectx)?)?.as_bool()?;
            if cond {
                evaluate(then_branch, ectx)
            } else {
                evaluate(else_branch, ectx)
            }
        }
        TypedExpr::Member { base, binding, .. } => evaluate_member(base, binding, ectx),
        TypedExpr::Index { base, index, .. } => {
            let base = evaluate(base, ectx)?;
            let index = expect_primitive(&evaluate(index, ectx)?)?
                .as_i64()
                .ok_or_else(|| Error::TypeMismatch("array index must be an integer".to_string()))?;
            let Value::Array(array) = base.as_ref() else {
                return Err(Error::TypeMismatch("indexed value is not an array".to_string()));
            };
            if index < 0 || index as u32 >= array.total_elements() {
                return Err(Error::EvalException(format!(
                    "index {index} out of range (length {})",
                    array.total_elements()
                )));
            }
            Ok(Arc::new(array.element_value(index as u32, ectx.ctx)?))
        }
        TypedExpr::Call { base, module, method, is_static, args, .. } => {
            evaluate_call(base.as_deref(), module, *method, *is_static, args, ectx)
        }
        TypedExpr::Cast { operand, target } => {
            let value = expect_primitive(&evaluate(operand, ectx)?)?;
            Ok(Arc::new(Value::Primitive(convert_primitive(&value, *target)?)))
        }
    }
}

fn evaluate_identifier(binding: &IdentifierBinding, ectx: &EvalContext<'_>) -> Result<Arc<Value>> {
    match binding {
        IdentifierBinding::Value { value, .. } => Ok(value.clone()),
        IdentifierBinding::Property { module, getter, this, .. } => {
            if !ectx.allow_method_call {
                return Err(Error::EvaluationRequiresMethodCall);
            }
            let call = EvalCall {
                module: module.clone(),
                method: *getter,
                this: this.clone(),
                args: vec![],
            };
            let raw = ectx.ctx.coordinator.evaluate(call, &ectx.ctx.config)?;
            let depth = ectx.ctx.config.object_eval_depth as i32;
            Ok(Arc::new(factory::create_value(raw, depth, ectx.ctx)?))
        }
    }
}

fn evaluate_member(
    base: &TypedExpr,
    binding: &MemberBinding,
    ectx: &EvalContext<'_>,
) -> Result<Arc<Value>> {
    let base_value = evaluate(base, ectx)?;
    if base_value.is_null() {
        return Err(Error::EvalException("member access on a null value".to_string()));
    }

    match binding {
        MemberBinding::CollectionCount => {
            let Value::Collection(collection) = base_value.as_ref() else {
                return Err(Error::TypeMismatch("Count needs a collection".to_string()));
            };
            Ok(Arc::new(Value::Primitive(PrimitiveValue {
                kind: PrimitiveKind::Int32(collection.count),
            })))
        }
        MemberBinding::Field { props } => {
            let Value::Class(class_value) = base_value.as_ref() else {
                return Err(Error::TypeMismatch(format!(
                    "cannot read field {} of a non-class value",
                    props.name
                )));
            };
            class_value.read_field(props, ectx.ctx)
        }
        MemberBinding::Property { props, .. } => {
            if !ectx.allow_method_call {
                return Err(Error::EvaluationRequiresMethodCall);
            }
            let Value::Class(class_value) = base_value.as_ref() else {
                return Err(Error::TypeMismatch(format!(
                    "cannot evaluate property {} of a non-class value",
                    props.name
                )));
            };
            class_value.eval_property(props, ectx.ctx)
        }
    }
}

fn evaluate_call(
    base: Option<&TypedExpr>,
    module: &Arc<dyn RuntimeModule>,
    method: MethodToken,
    is_static: bool,
    args: &[TypedExpr],
    ectx: &EvalContext<'_>,
) -> Result<Arc<Value>> {
    if !ectx.allow_method_call {
        return Err(Error::EvaluationRequiresMethodCall);
    }

    let this = if is_static {
        None
    } else {
        let receiver = match base {
            Some(base) => evaluate(base, ectx)?,
            None => match ectx.frame.lookup_identifier("this", ectx.ctx)? {
                Some(IdentifierBinding::Value { value, .. }) => value,
                _ => {
                    return Err(Error::TypeMismatch(
                        "cannot call an instance method without this".to_string(),
                    ))
                }
            },
        };
        Some(receiver.runtime_handle().ok_or_else(|| {
            Error::NotImplemented("method receiver has no runtime handle".to_string())
        })?)
    };

    let mut raw_args = Vec::with_capacity(args.len());
    for arg in args {
        let value = evaluate(arg, ectx)?;
        let handle = value.runtime_handle().ok_or_else(|| {
            Error::NotImplemented(
                "only reference-typed arguments are supported in method calls".to_string(),
            )
        })?;
        raw_args.push(handle);
    }

    let call = EvalCall { module: module.clone(), method, this, args: raw_args };
    let raw = ectx.ctx.coordinator.evaluate(call, &ectx.ctx.config)?;
    let depth = ectx.ctx.config.object_eval_depth as i32;
    Ok(Arc::new(factory::create_value(raw, depth, ectx.ctx)?))
}

fn evaluate_unary(op: UnaryOp, operand: &TypedExpr, ectx: &EvalContext<'_>) -> Result<Arc<Value>> {
    let value = expect_primitive(&evaluate(operand, ectx)?)?;
    let result = match op {
        UnaryOp::Plus => value,
        UnaryOp::Minus => match value.kind {
            PrimitiveKind::Double(v) => PrimitiveValue { kind: PrimitiveKind::Double(-v) },
            PrimitiveKind::Single(v) => PrimitiveValue { kind: PrimitiveKind::Single(-v) },
            PrimitiveKind::Int64(v) => {
                PrimitiveValue { kind: PrimitiveKind::Int64(v.wrapping_neg()) }
            }
            _ => {
                let v = value.as_i64().ok_or_else(|| {
                    Error::TypeMismatch("unary minus needs a numeric operand".to_string())
                })?;
                PrimitiveValue { kind: PrimitiveKind::Int32((v as i32).wrapping_neg()) }
            }
        },
        UnaryOp::Not => PrimitiveValue { kind: PrimitiveKind::Boolean(!value.as_bool()?) },
        UnaryOp::BitNot => match value.kind {
            PrimitiveKind::Int64(v) => PrimitiveValue { kind: PrimitiveKind::Int64(!v) },
            PrimitiveKind::UInt64(v) => PrimitiveValue { kind: PrimitiveKind::UInt64(!v) },
            _ => {
                let v = value.as_i64().ok_or_else(|| {
                    Error::TypeMismatch("operator ~ needs an integral operand".to_string())
                })?;
                PrimitiveValue { kind: PrimitiveKind::Int32(!(v as i32)) }
            }
        },
    };
    Ok(Arc::new(Value::Primitive(result)))
}

fn evaluate_binary(
    op: BinaryOp,
    left: &TypedExpr,
    right: &TypedExpr,
    signature: &TypeSignature,
    ectx: &EvalContext<'_>,
) -> Result<Arc<Value>> {
    // Logical operators short-circuit.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let lhs = expect_primitive(&evaluate(left, ectx)?)?.as_bool()?;
        let result = match op {
            BinaryOp::And => lhs && expect_primitive(&evaluate(right, ectx)?)?.as_bool()?,
            BinaryOp::Or => lhs || expect_primitive(&evaluate(right, ectx)?)?.as_bool()?,
            _ => unreachable!(),
        };
        return Ok(Arc::new(Value::Primitive(PrimitiveValue {
            kind: PrimitiveKind::Boolean(result),
        })));
    }

    if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
        let equal = evaluate_equality(left, right, ectx)?;
        let result = if op == BinaryOp::Eq { equal } else { !equal };
        return Ok(Arc::new(Value::Primitive(PrimitiveValue {
            kind: PrimitiveKind::Boolean(result),
        })));
    }

    let lhs = expect_primitive(&evaluate(left, ectx)?)?;
    let rhs = expect_primitive(&evaluate(right, ectx)?)?;

    // Boolean bitwise operators.
    if matches!(op, BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::BitOr) &&
        signature.element_type == ElementType::Boolean
    {
        let l = lhs.as_bool()?;
        let r = rhs.as_bool()?;
        let result = match op {
            BinaryOp::BitAnd => l & r,
            BinaryOp::BitXor => l ^ r,
            BinaryOp::BitOr => l | r,
            _ => unreachable!(),
        };
        return Ok(Arc::new(Value::Primitive(PrimitiveValue {
            kind: PrimitiveKind::Boolean(result),
        })));
    }

    if matches!(op, BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge) {
        let result = compare_numeric(op, &lhs, &rhs)?;
        return Ok(Arc::new(Value::Primitive(PrimitiveValue {
            kind: PrimitiveKind::Boolean(result),
        })));
    }

    if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr) {
        return Ok(Arc::new(Value::Primitive(evaluate_shift(op, &lhs, &rhs, signature)?)));
    }

    Ok(Arc::new(Value::Primitive(evaluate_arithmetic(op, &lhs, &rhs, signature)?)))
}

fn evaluate_equality(left: &TypedExpr, right: &TypedExpr, ectx: &EvalContext<'_>) -> Result<bool> {
    let lhs = evaluate(left, ectx)?;
    let rhs = evaluate(right, ectx)?;

    match (lhs.as_ref(), rhs.as_ref()) {
        (Value::Null(_), Value::Null(_)) => Ok(true),
        (Value::Null(_), other) | (other, Value::Null(_)) => Ok(other.is_null()),
        (Value::Str(l), Value::Str(r)) => Ok(l.text()? == r.text()?),
        (Value::Primitive(l), Value::Primitive(r)) => {
            if l.element_type() == ElementType::Boolean ||
                r.element_type() == ElementType::Boolean
            {
                return Ok(l.as_bool()? == r.as_bool()?);
            }
            if l.is_floating() || r.is_floating() {
                let (lf, rf) = (float_of(l)?, float_of(r)?);
                Ok(lf == rf)
            } else {
                Ok(int_of(l)? == int_of(r)?)
            }
        }
        // Reference equality: same debuggee address.
        (l, r) => {
            let laddr = l.runtime_handle().map(|h| h.address());
            let raddr = r.runtime_handle().map(|h| h.address());
            match (laddr, raddr) {
                (Some(l), Some(r)) => Ok(l == r && l != 0),
                _ => Err(Error::TypeMismatch("values are not comparable".to_string())),
            }
        }
    }
}

fn compare_numeric(op: BinaryOp, lhs: &PrimitiveValue, rhs: &PrimitiveValue) -> Result<bool> {
    if lhs.is_floating() || rhs.is_floating() {
        let (l, r) = (float_of(lhs)?, float_of(rhs)?);
        Ok(match op {
            BinaryOp::Lt => l < r,
            BinaryOp::Gt => l > r,
            BinaryOp::Le => l <= r,
            BinaryOp::Ge => l >= r,
            _ => unreachable!(),
        })
    } else {
        let (l, r) = (int_of(lhs)?, int_of(rhs)?);
        Ok(match op {
            BinaryOp::Lt => l < r,
            BinaryOp::Gt => l > r,
            BinaryOp::Le => l <= r,
            BinaryOp::Ge => l >= r,
            _ => unreachable!(),
        })
    }
}

fn evaluate_shift(
    op: BinaryOp,
    lhs: &PrimitiveValue,
    rhs: &PrimitiveValue,
    signature: &TypeSignature,
) -> Result<PrimitiveValue> {
    let shift = (int_of(rhs)? & 0x3f) as u32;
    let value = int_of(lhs)?;

    let kind = if signature.element_type == ElementType::I8 {
        let result = match op {
            BinaryOp::Shl => value.wrapping_shl(shift),
            BinaryOp::Shr => value.wrapping_shr(shift),
            BinaryOp::UShr => ((value as u64).wrapping_shr(shift)) as i64,
            _ => unreachable!(),
        };
        PrimitiveKind::Int64(result)
    } else {
        let value = value as i32;
        let shift = shift & 0x1f;
        let result = match op {
            BinaryOp::Shl => value.wrapping_shl(shift),
            BinaryOp::Shr => value.wrapping_shr(shift),
            BinaryOp::UShr => ((value as u32).wrapping_shr(shift)) as i32,
            _ => unreachable!(),
        };
        PrimitiveKind::Int32(result)
    };
    Ok(PrimitiveValue { kind })
}

fn evaluate_arithmetic(
    op: BinaryOp,
    lhs: &PrimitiveValue,
    rhs: &PrimitiveValue,
    signature: &TypeSignature,
) -> Result<PrimitiveValue> {
    let kind = match signature.element_type {
        ElementType::R8 => {
            let (l, r) = (float_of(lhs)?, float_of(rhs)?);
            PrimitiveKind::Double(apply_float(op, l, r))
        }
        ElementType::R4 => {
            let (l, r) = (float_of(lhs)?, float_of(rhs)?);
            PrimitiveKind::Single(apply_float(op, l, r) as f32)
        }
        ElementType::I8 => {
            let (l, r) = (int_of(lhs)?, int_of(rhs)?);
            PrimitiveKind::Int64(apply_int(op, l, r)?)
        }
        _ => {
            let (l, r) = (int_of(lhs)?, int_of(rhs)?);
            PrimitiveKind::Int32(apply_int(op, l, r)? as i32)
        }
    };
    Ok(PrimitiveValue { kind })
}

fn apply_float(op: BinaryOp, l: f64, r: f64) -> f64 {
    match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        _ => unreachable!(),
    }
}

fn apply_int(op: BinaryOp, l: i64, r: i64) -> Result<i64> {
    Ok(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => {
            if r == 0 {
                return Err(Error::EvalException("attempted to divide by zero".to_string()));
            }
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            if r == 0 {
                return Err(Error::EvalException("attempted to divide by zero".to_string()));
            }
            l.wrapping_rem(r)
        }
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitXor => l ^ r,
        BinaryOp::BitOr => l | r,
        _ => unreachable!(),
    })
}

fn expect_primitive(value: &Arc<Value>) -> Result<PrimitiveValue> {
    match value.as_ref() {
        Value::Primitive(p) => Ok(*p),
        Value::Enum(e) => Ok(PrimitiveValue { kind: PrimitiveKind::Int64(e.raw as i64) }),
        _ => Err(Error::TypeMismatch("expected a primitive value".to_string())),
    }
}

fn int_of(value: &PrimitiveValue) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::TypeMismatch("expected an integral value".to_string()))
}

fn float_of(value: &PrimitiveValue) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::TypeMismatch("expected a numeric value".to_string()))
}

fn convert_primitive(value: &PrimitiveValue, target: ElementType) -> Result<PrimitiveValue> {
    let kind = match target {
        ElementType::Boolean => PrimitiveKind::Boolean(value.as_bool()?),
        ElementType::R8 => PrimitiveKind::Double(float_of(value)?),
        ElementType::R4 => PrimitiveKind::Single(float_of(value)? as f32),
        ElementType::I8 => PrimitiveKind::Int64(numeric_i64(value)?),
        ElementType::U8 => PrimitiveKind::UInt64(numeric_i64(value)? as u64),
        ElementType::I4 => PrimitiveKind::Int32(numeric_i64(value)? as i32),
        ElementType::U4 => PrimitiveKind::UInt32(numeric_i64(value)? as u32),
        ElementType::I2 => PrimitiveKind::Int16(numeric_i64(value)? as i16),
        ElementType::U2 => PrimitiveKind::UInt16(numeric_i64(value)? as u16),
        ElementType::I1 => PrimitiveKind::SByte(numeric_i64(value)? as i8),
        ElementType::U1 => PrimitiveKind::Byte(numeric_i64(value)? as u8),
        ElementType::Char => {
            let code = numeric_i64(value)? as u32;
            PrimitiveKind::Char(char::from_u32(code & 0xffff).unwrap_or('\u{fffd}'))
        }
        other => {
            return Err(Error::NotImplemented(format!("cast to {other:?}")));
        }
    };
    Ok(PrimitiveValue { kind })
}

fn numeric_i64(value: &PrimitiveValue) -> Result<i64> {
    if value.is_floating() {
        Ok(float_of(value)? as i64)
    } else {
        int_of(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_elements() {
        assert_eq!(
            promote_elements(ElementType::U1, ElementType::I2).unwrap(),
            ElementType::I4
        );
        assert_eq!(promote_elements(ElementType::I4, ElementType::I8).unwrap(), ElementType::I8);
        assert_eq!(promote_elements(ElementType::I8, ElementType::R4).unwrap(), ElementType::R4);
        assert_eq!(promote_elements(ElementType::R4, ElementType::R8).unwrap(), ElementType::R8);
        assert!(promote_elements(ElementType::Boolean, ElementType::I4).is_err());
    }

    #[test]
    fn test_apply_int_divide_by_zero() {
        assert!(matches!(
            apply_int(BinaryOp::Div, 1, 0),
            Err(Error::EvalException(_))
        ));
        assert!(matches!(
            apply_int(BinaryOp::Mod, 1, 0),
            Err(Error::EvalException(_))
        ));
    }

    #[test]
    fn test_convert_primitive_narrowing() {
        let value = PrimitiveValue { kind: PrimitiveKind::Int32(300) };
        let byte = convert_primitive(&value, ElementType::U1).unwrap();
        assert_eq!(byte.kind, PrimitiveKind::Byte(44));
    }

    #[test]
    fn test_unsigned_shift() {
        let lhs = PrimitiveValue { kind: PrimitiveKind::Int32(-8) };
        let rhs = PrimitiveValue { kind: PrimitiveKind::Int32(1) };
        let sig = TypeSignature::primitive(ElementType::I4);

        let arithmetic = evaluate_shift(BinaryOp::Shr, &lhs, &rhs, &sig).unwrap();
        assert_eq!(arithmetic.kind, PrimitiveKind::Int32(-4));

        let logical = evaluate_shift(BinaryOp::UShr, &lhs, &rhs, &sig).unwrap();
        assert_eq!(logical.kind, PrimitiveKind::Int32(((-8i32 as u32) >> 1) as i32));
    }
}
