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

//! In-memory fakes of the runtime capability traits, for unit and
//! integration tests. No vendor bindings are involved: a [`TestRig`] builds
//! a module with metadata tables, scripted threads/frames and canned
//! function-evaluation results.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    runtime::{
        ArrayInfo, ClassToken, ElementType, EvalCall, FieldProps, FieldToken, MappingResult,
        MetadataImport, MethodProps, MethodToken, ParamProps, PendingEval, PropertyProps,
        ReferenceInfo, RuntimeBreakpoint, RuntimeClass, RuntimeFrame, RuntimeModule, RuntimeThread,
        RuntimeType, RuntimeValue, SignatureBlob, ThreadId, TypeDefProps,
    },
    symbols::{SymbolFile, SymbolProvider},
};

static NEXT_ADDRESS: AtomicU64 = AtomicU64::new(0x1000);

fn next_address() -> u64 {
    NEXT_ADDRESS.fetch_add(0x10, Ordering::Relaxed)
}

/// Field signature blob for a primitive element type.
pub fn field_signature(element_type: u8) -> SignatureBlob {
    SignatureBlob::new(vec![0x06, element_type])
}

/// Field signature blob for a class typedef token (low 3 bytes only).
pub fn class_field_signature(typedef_token: ClassToken) -> SignatureBlob {
    let coded = ((typedef_token & 0x00ff_ffff) << 2) as u8;
    SignatureBlob::new(vec![0x06, 0x12, coded])
}

/// Property signature blob (no parameters) for a primitive element type.
pub fn property_signature(element_type: u8) -> SignatureBlob {
    SignatureBlob::new(vec![0x08, 0x00, element_type])
}

/// Method signature blob (no parameters) returning a primitive element type.
pub fn method_signature(return_element_type: u8) -> SignatureBlob {
    SignatureBlob::new(vec![0x20, 0x00, return_element_type])
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Mutable metadata tables of a fake module.
#[derive(Default)]
pub struct FakeMetadata {
    types: Mutex<Vec<TypeDefProps>>,
    methods: Mutex<Vec<MethodProps>>,
    params: Mutex<HashMap<MethodToken, Vec<ParamProps>>>,
    fields: Mutex<HashMap<ClassToken, Vec<FieldProps>>>,
    properties: Mutex<HashMap<ClassToken, Vec<PropertyProps>>>,
    type_refs: Mutex<HashMap<u32, String>>,
}

impl FakeMetadata {
    /// Registers a type definition; `extends` is a raw typedef/typeref token
    /// or zero.
    pub fn add_type(&self, token: ClassToken, name: &str, extends: u32) {
        self.types.lock().push(TypeDefProps { token, name: name.to_string(), extends });
    }

    /// Registers a type reference.
    pub fn add_type_ref(&self, token: u32, name: &str) {
        self.type_refs.lock().insert(token, name.to_string());
    }

    /// Registers a method row.
    pub fn add_method(&self, props: MethodProps) {
        self.methods.lock().push(props);
    }

    /// Registers the parameter rows of a method.
    pub fn add_params(&self, method: MethodToken, names: &[&str]) {
        let params = names
            .iter()
            .enumerate()
            .map(|(i, name)| ParamProps { ordinal: i as u32 + 1, name: name.to_string() })
            .collect();
        self.params.lock().insert(method, params);
    }

    /// Registers a field row.
    pub fn add_field(&self, class: ClassToken, props: FieldProps) {
        self.fields.lock().entry(class).or_default().push(props);
    }

    /// Registers a property row.
    pub fn add_property(&self, class: ClassToken, props: PropertyProps) {
        self.properties.lock().entry(class).or_default().push(props);
    }
}

impl MetadataImport for FakeMetadata {
    fn method_props(&self, method: MethodToken) -> Result<MethodProps> {
        self.methods
            .lock()
            .iter()
            .find(|m| m.token == method)
            .cloned()
            .ok_or_else(|| Error::Runtime { operation: "GetMethodProps", code: 0x8013_1124 })
    }

    fn methods_with_name(&self, class: ClassToken, name: &str) -> Result<Vec<MethodToken>> {
        Ok(self
            .methods
            .lock()
            .iter()
            .filter(|m| m.class_token == class && m.name == name)
            .map(|m| m.token)
            .collect())
    }

    fn method_params(&self, method: MethodToken) -> Result<Vec<ParamProps>> {
        Ok(self.params.lock().get(&method).cloned().unwrap_or_default())
    }

    fn type_def_props(&self, token: ClassToken) -> Result<TypeDefProps> {
        self.types
            .lock()
            .iter()
            .find(|t| t.token == token)
            .cloned()
            .ok_or_else(|| Error::Runtime { operation: "GetTypeDefProps", code: 0x8013_1126 })
    }

    fn find_type_def(&self, name: &str) -> Result<Option<ClassToken>> {
        Ok(self.types.lock().iter().find(|t| t.name == name).map(|t| t.token))
    }

    fn type_ref_name(&self, token: u32) -> Result<String> {
        self.type_refs
            .lock()
            .get(&token)
            .cloned()
            .ok_or_else(|| Error::Runtime { operation: "GetTypeRefProps", code: 0x8013_1126 })
    }

    fn fields(&self, class: ClassToken) -> Result<Vec<FieldProps>> {
        Ok(self.fields.lock().get(&class).cloned().unwrap_or_default())
    }

    fn find_field(&self, class: ClassToken, name: &str) -> Result<Option<FieldProps>> {
        Ok(self
            .fields
            .lock()
            .get(&class)
            .and_then(|fields| fields.iter().find(|f| f.name == name).cloned()))
    }

    fn properties(&self, class: ClassToken) -> Result<Vec<PropertyProps>> {
        Ok(self.properties.lock().get(&class).cloned().unwrap_or_default())
    }

    fn find_property(&self, class: ClassToken, name: &str) -> Result<Option<PropertyProps>> {
        Ok(self
            .properties
            .lock()
            .get(&class)
            .and_then(|properties| properties.iter().find(|p| p.name == name).cloned()))
    }
}

// ---------------------------------------------------------------------------
// Module, class, breakpoint
// ---------------------------------------------------------------------------

struct ModuleInner {
    name: String,
    metadata: Arc<FakeMetadata>,
    statics: Mutex<HashMap<(ClassToken, FieldToken), Arc<dyn RuntimeValue>>>,
    armed: Mutex<Vec<Arc<FakeBreakpoint>>>,
}

/// A fake loaded module.
#[derive(Clone)]
pub struct FakeModule {
    inner: Arc<ModuleInner>,
}

impl FakeModule {
    /// Creates a module with empty metadata.
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(ModuleInner {
                name: name.to_string(),
                metadata: Arc::new(FakeMetadata::default()),
                statics: Mutex::new(HashMap::new()),
                armed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The module's metadata tables (builder access).
    pub fn fake_metadata(&self) -> Arc<FakeMetadata> {
        self.inner.metadata.clone()
    }

    /// The module's metadata as the engine sees it.
    pub fn metadata(&self) -> Result<Arc<dyn MetadataImport>> {
        Ok(self.inner.metadata.clone())
    }

    /// Sets the value of a static field.
    pub fn set_static_field(&self, class: ClassToken, field: FieldToken, value: FakeValue) {
        self.inner.statics.lock().insert((class, field), value.into_arc());
    }

    /// Breakpoints created against this module, in creation order.
    pub fn armed_breakpoints(&self) -> Vec<Arc<FakeBreakpoint>> {
        self.inner.armed.lock().clone()
    }

    /// Type-erased handle.
    pub fn into_arc(self) -> Arc<dyn RuntimeModule> {
        Arc::new(self)
    }
}

impl RuntimeModule for FakeModule {
    fn name(&self) -> Result<String> {
        Ok(self.inner.name.clone())
    }

    fn metadata(&self) -> Result<Arc<dyn MetadataImport>> {
        FakeModule::metadata(self)
    }

    fn class_from_token(&self, token: ClassToken) -> Result<Arc<dyn RuntimeClass>> {
        Ok(Arc::new(FakeClass { token, module: self.clone() }))
    }

    fn create_breakpoint(
        &self,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<Arc<dyn RuntimeBreakpoint>> {
        let breakpoint =
            Arc::new(FakeBreakpoint { method, il_offset, active: Mutex::new(false) });
        self.inner.armed.lock().push(breakpoint.clone());
        Ok(breakpoint)
    }
}

/// A fake loaded class.
pub struct FakeClass {
    token: ClassToken,
    module: FakeModule,
}

impl RuntimeClass for FakeClass {
    fn token(&self) -> ClassToken {
        self.token
    }

    fn module(&self) -> Result<Arc<dyn RuntimeModule>> {
        Ok(Arc::new(self.module.clone()))
    }

    fn static_field_value(
        &self,
        field: FieldToken,
        _frame: Option<&Arc<dyn RuntimeFrame>>,
    ) -> Result<Arc<dyn RuntimeValue>> {
        self.module
            .inner
            .statics
            .lock()
            .get(&(self.token, field))
            .cloned()
            .ok_or_else(|| Error::StaticFieldNotReady(format!("{field:#010x}")))
    }
}

/// A fake runtime breakpoint recording its armed state.
pub struct FakeBreakpoint {
    method: MethodToken,
    il_offset: u32,
    active: Mutex<bool>,
}

impl RuntimeBreakpoint for FakeBreakpoint {
    fn activate(&self, active: bool) -> Result<()> {
        *self.active.lock() = active;
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        Ok(*self.active.lock())
    }

    fn method_token(&self) -> MethodToken {
        self.method
    }

    fn il_offset(&self) -> u32 {
        self.il_offset
    }
}

// ---------------------------------------------------------------------------
// Types and values
// ---------------------------------------------------------------------------

/// A fake exact runtime type.
pub struct FakeType {
    /// Element type.
    pub element_type: ElementType,
    /// Backing class for `Class`/`ValueType` types.
    pub class: Option<(FakeModule, ClassToken)>,
    /// Base type.
    pub base: Option<Arc<FakeType>>,
    /// Generic arguments (and array element types).
    pub generics: Vec<Arc<FakeType>>,
}

impl FakeType {
    /// A primitive type.
    pub fn primitive(element_type: ElementType) -> Arc<Self> {
        Arc::new(Self { element_type, class: None, base: None, generics: Vec::new() })
    }

    /// A class or value type backed by a metadata typedef.
    pub fn class(
        element_type: ElementType,
        module: &FakeModule,
        token: ClassToken,
        base: Option<Arc<FakeType>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            element_type,
            class: Some((module.clone(), token)),
            base,
            generics: Vec::new(),
        })
    }

    /// An SZ array of the given element type.
    pub fn sz_array(element: Arc<FakeType>) -> Arc<Self> {
        Arc::new(Self {
            element_type: ElementType::SzArray,
            class: None,
            base: None,
            generics: vec![element],
        })
    }

    /// Adds generic arguments.
    pub fn with_generics(self: Arc<Self>, generics: Vec<Arc<FakeType>>) -> Arc<Self> {
        Arc::new(Self {
            element_type: self.element_type,
            class: self.class.clone(),
            base: self.base.clone(),
            generics,
        })
    }
}

impl RuntimeType for FakeType {
    fn element_type(&self) -> ElementType {
        self.element_type
    }

    fn type_class(&self) -> Result<Arc<dyn RuntimeClass>> {
        let (module, token) = self
            .class
            .as_ref()
            .ok_or_else(|| Error::NotImplemented("type has no class".to_string()))?;
        module.class_from_token(*token)
    }

    fn base(&self) -> Result<Option<Arc<dyn RuntimeType>>> {
        Ok(self.base.clone().map(|b| b as Arc<dyn RuntimeType>))
    }

    fn generic_args(&self) -> Result<Vec<Arc<dyn RuntimeType>>> {
        Ok(self.generics.iter().cloned().map(|g| g as Arc<dyn RuntimeType>).collect())
    }
}

enum FakeValueKind {
    Primitive { element_type: ElementType, bytes: Vec<u8> },
    Str { text: String },
    Array { elements: Mutex<Vec<Arc<dyn RuntimeValue>>>, dims: Vec<u32> },
    Object { fields: Mutex<HashMap<FieldToken, Arc<dyn RuntimeValue>>>, raw_bytes: Option<Vec<u8>> },
    Reference { target: Option<Arc<dyn RuntimeValue>> },
}

struct FakeValueInner {
    kind: FakeValueKind,
    exact_type: Option<Arc<FakeType>>,
    address: u64,
}

/// A fake runtime value handle.
#[derive(Clone)]
pub struct FakeValue {
    inner: Arc<FakeValueInner>,
}

impl FakeValue {
    fn new(kind: FakeValueKind, exact_type: Option<Arc<FakeType>>) -> Self {
        Self { inner: Arc::new(FakeValueInner { kind, exact_type, address: next_address() }) }
    }

    /// An `Int32` value.
    pub fn int32(value: i32) -> Self {
        Self::primitive(ElementType::I4, value.to_le_bytes().to_vec())
    }

    /// An `Int64` value.
    pub fn int64(value: i64) -> Self {
        Self::primitive(ElementType::I8, value.to_le_bytes().to_vec())
    }

    /// A `Boolean` value.
    pub fn boolean(value: bool) -> Self {
        Self::primitive(ElementType::Boolean, vec![u8::from(value)])
    }

    /// A `Double` value.
    pub fn double(value: f64) -> Self {
        Self::primitive(ElementType::R8, value.to_le_bytes().to_vec())
    }

    /// A primitive from raw bytes.
    pub fn primitive(element_type: ElementType, bytes: Vec<u8>) -> Self {
        Self::new(
            FakeValueKind::Primitive { element_type, bytes },
            Some(FakeType::primitive(element_type)),
        )
    }

    /// A string value.
    pub fn string(text: &str) -> Self {
        Self::new(
            FakeValueKind::Str { text: text.to_string() },
            Some(FakeType::primitive(ElementType::String)),
        )
    }

    /// An SZ array of the given values.
    pub fn array(element: Arc<FakeType>, values: Vec<FakeValue>) -> Self {
        let dims = vec![values.len() as u32];
        let elements = values.into_iter().map(FakeValue::into_arc).collect();
        Self::new(
            FakeValueKind::Array { elements: Mutex::new(elements), dims },
            Some(FakeType::sz_array(element)),
        )
    }

    /// An object of a class with the given instance field values.
    pub fn object(ty: Arc<FakeType>, fields: Vec<(FieldToken, FakeValue)>) -> Self {
        let fields = fields.into_iter().map(|(token, value)| (token, value.into_arc())).collect();
        Self::new(
            FakeValueKind::Object { fields: Mutex::new(fields), raw_bytes: None },
            Some(ty),
        )
    }

    /// A value-type object carrying raw bytes (enums).
    pub fn raw_object(ty: Arc<FakeType>, raw_bytes: Vec<u8>) -> Self {
        Self::new(
            FakeValueKind::Object { fields: Mutex::new(HashMap::new()), raw_bytes: Some(raw_bytes) },
            Some(ty),
        )
    }

    /// A non-null reference to a value; its type is the target's.
    pub fn reference_to(target: Arc<dyn RuntimeValue>) -> Self {
        Self::new(FakeValueKind::Reference { target: Some(target) }, None)
    }

    /// A null reference declared as a string (helper tests) or class type.
    pub fn null_reference(_declared: &str) -> Self {
        Self::new(
            FakeValueKind::Reference { target: None },
            Some(FakeType::primitive(ElementType::String)),
        )
    }

    /// A null reference of a given type.
    pub fn null_of(ty: Arc<FakeType>) -> Self {
        Self::new(FakeValueKind::Reference { target: None }, Some(ty))
    }

    /// Type-erased handle.
    pub fn into_arc(self) -> Arc<dyn RuntimeValue> {
        Arc::new(self)
    }
}

impl RuntimeValue for FakeValue {
    fn element_type(&self) -> Result<ElementType> {
        Ok(match &self.inner.kind {
            FakeValueKind::Primitive { element_type, .. } => *element_type,
            FakeValueKind::Str { .. } => ElementType::String,
            FakeValueKind::Array { .. } => ElementType::SzArray,
            FakeValueKind::Object { .. } => self
                .inner
                .exact_type
                .as_ref()
                .map(|t| t.element_type)
                .unwrap_or(ElementType::Class),
            FakeValueKind::Reference { target } => match target {
                Some(target) => target.element_type()?,
                None => self
                    .inner
                    .exact_type
                    .as_ref()
                    .map(|t| t.element_type)
                    .unwrap_or(ElementType::Class),
            },
        })
    }

    fn exact_type(&self) -> Result<Arc<dyn RuntimeType>> {
        match &self.inner.kind {
            FakeValueKind::Reference { target: Some(target) } => target.exact_type(),
            _ => self
                .inner
                .exact_type
                .clone()
                .map(|t| t as Arc<dyn RuntimeType>)
                .ok_or_else(|| Error::NotImplemented("value carries no exact type".to_string())),
        }
    }

    fn reference_info(&self) -> Option<ReferenceInfo> {
        match &self.inner.kind {
            FakeValueKind::Reference { target } => {
                Some(ReferenceInfo { is_null: target.is_none() })
            }
            _ => None,
        }
    }

    fn dereference(&self) -> Result<Arc<dyn RuntimeValue>> {
        match &self.inner.kind {
            FakeValueKind::Reference { target: Some(target) } => Ok(target.clone()),
            FakeValueKind::Reference { target: None } => {
                Err(Error::runtime("Dereference"))
            }
            _ => Err(Error::NotImplemented("value is not a reference".to_string())),
        }
    }

    fn primitive_bytes(&self) -> Result<Vec<u8>> {
        match &self.inner.kind {
            FakeValueKind::Primitive { bytes, .. } => Ok(bytes.clone()),
            FakeValueKind::Object { raw_bytes: Some(bytes), .. } => Ok(bytes.clone()),
            _ => Err(Error::NotImplemented("value is not primitive".to_string())),
        }
    }

    fn string_value(&self) -> Result<String> {
        match &self.inner.kind {
            FakeValueKind::Str { text } => Ok(text.clone()),
            _ => Err(Error::NotImplemented("value is not a string".to_string())),
        }
    }

    fn array_info(&self) -> Result<ArrayInfo> {
        match &self.inner.kind {
            FakeValueKind::Array { dims, .. } => {
                Ok(ArrayInfo { rank: dims.len() as u32, dimensions: dims.clone() })
            }
            _ => Err(Error::NotImplemented("value is not an array".to_string())),
        }
    }

    fn array_element(&self, index: u32) -> Result<Arc<dyn RuntimeValue>> {
        match &self.inner.kind {
            FakeValueKind::Array { elements, .. } => elements
                .lock()
                .get(index as usize)
                .cloned()
                .ok_or_else(|| Error::runtime("GetArrayElement")),
            _ => Err(Error::NotImplemented("value is not an array".to_string())),
        }
    }

    fn object_class(&self) -> Result<Arc<dyn RuntimeClass>> {
        let ty = self
            .inner
            .exact_type
            .as_ref()
            .ok_or_else(|| Error::NotImplemented("value is not an object".to_string()))?;
        let (module, token) = ty
            .class
            .as_ref()
            .ok_or_else(|| Error::NotImplemented("value is not an object".to_string()))?;
        module.class_from_token(*token)
    }

    fn field_value(&self, field: FieldToken) -> Result<Arc<dyn RuntimeValue>> {
        match &self.inner.kind {
            FakeValueKind::Object { fields, .. } => fields
                .lock()
                .get(&field)
                .cloned()
                .ok_or_else(|| Error::FieldOptimizedAway(format!("{field:#010x}"))),
            _ => Err(Error::NotImplemented("value is not an object".to_string())),
        }
    }

    fn create_strong_handle(&self) -> Result<Arc<dyn RuntimeValue>> {
        Ok(Arc::new(self.clone()))
    }

    fn address(&self) -> u64 {
        self.inner.address
    }
}

// ---------------------------------------------------------------------------
// Frames, threads, evals
// ---------------------------------------------------------------------------

struct FrameInner {
    is_il: bool,
    method_token: MethodToken,
    module: Option<FakeModule>,
    ip: (u32, MappingResult),
    locals: Vec<Arc<dyn RuntimeValue>>,
    arguments: Vec<Arc<dyn RuntimeValue>>,
    virtual_address: u32,
}

/// A fake stack frame.
#[derive(Clone)]
pub struct FakeFrame {
    inner: Arc<FrameInner>,
}

impl FakeFrame {
    /// An IL frame.
    pub fn il(
        module: &FakeModule,
        method_token: MethodToken,
        virtual_address: u32,
        ip_offset: u32,
        locals: Vec<FakeValue>,
        arguments: Vec<FakeValue>,
    ) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                is_il: true,
                method_token,
                module: Some(module.clone()),
                ip: (ip_offset, MappingResult::Exact),
                locals: locals.into_iter().map(FakeValue::into_arc).collect(),
                arguments: arguments.into_iter().map(FakeValue::into_arc).collect(),
                virtual_address,
            }),
        }
    }

    /// A native (undebuggable) frame.
    pub fn native() -> Self {
        Self {
            inner: Arc::new(FrameInner {
                is_il: false,
                method_token: 0,
                module: None,
                ip: (0, MappingResult::NoInfo),
                locals: Vec::new(),
                arguments: Vec::new(),
                virtual_address: 0,
            }),
        }
    }

    /// Type-erased handle.
    pub fn into_arc(self) -> Arc<dyn RuntimeFrame> {
        Arc::new(self)
    }
}

impl RuntimeFrame for FakeFrame {
    fn is_il(&self) -> bool {
        self.inner.is_il
    }

    fn method_token(&self) -> Result<MethodToken> {
        if !self.inner.is_il {
            return Err(Error::runtime("GetFunctionToken"));
        }
        Ok(self.inner.method_token)
    }

    fn module(&self) -> Result<Arc<dyn RuntimeModule>> {
        self.inner
            .module
            .clone()
            .map(|m| Arc::new(m) as Arc<dyn RuntimeModule>)
            .ok_or_else(|| Error::runtime("GetModuleFromFrame"))
    }

    fn ip_offset(&self) -> Result<(u32, MappingResult)> {
        Ok(self.inner.ip)
    }

    fn locals(&self) -> Result<Vec<Arc<dyn RuntimeValue>>> {
        Ok(self.inner.locals.clone())
    }

    fn local(&self, slot: u32) -> Result<Arc<dyn RuntimeValue>> {
        self.inner
            .locals
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| Error::FieldOptimizedAway(format!("local slot {slot}")))
    }

    fn arguments(&self) -> Result<Vec<Arc<dyn RuntimeValue>>> {
        Ok(self.inner.arguments.clone())
    }

    fn argument(&self, index: u32) -> Result<Arc<dyn RuntimeValue>> {
        self.inner
            .arguments
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::runtime("GetArgument"))
    }

    fn function_virtual_address(&self) -> Result<u32> {
        Ok(self.inner.virtual_address)
    }
}

/// Canned outcome of one function evaluation.
pub enum EvalOutcome {
    /// The evaluation completes immediately with this value.
    Value(FakeValue),
    /// The evaluation never completes (timeout testing).
    NeverCompletes,
}

struct FakePendingEval {
    result: Option<Arc<dyn RuntimeValue>>,
}

impl PendingEval for FakePendingEval {
    fn try_result(&self) -> Result<Option<Arc<dyn RuntimeValue>>> {
        Ok(self.result.clone())
    }
}

struct ThreadInner {
    id: ThreadId,
    frames: Mutex<Vec<Arc<dyn RuntimeFrame>>>,
    evals: Mutex<HashMap<MethodToken, EvalOutcome>>,
    eval_count: AtomicU64,
}

/// A fake managed thread with scripted frames and evaluation results.
#[derive(Clone)]
pub struct FakeThread {
    inner: Arc<ThreadInner>,
}

impl FakeThread {
    /// Creates a thread.
    pub fn new(id: ThreadId) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                frames: Mutex::new(Vec::new()),
                evals: Mutex::new(HashMap::new()),
                eval_count: AtomicU64::new(0),
            }),
        }
    }

    /// Scripts the stack, innermost first.
    pub fn set_frames(&self, frames: Vec<FakeFrame>) {
        *self.inner.frames.lock() = frames.into_iter().map(FakeFrame::into_arc).collect();
    }

    /// Scripts the outcome of evaluating one method.
    pub fn set_eval(&self, method: MethodToken, outcome: EvalOutcome) {
        self.inner.evals.lock().insert(method, outcome);
    }

    /// Number of evaluations started on this thread.
    pub fn eval_count(&self) -> u64 {
        self.inner.eval_count.load(Ordering::Relaxed)
    }

    /// Type-erased handle.
    pub fn into_arc(self) -> Arc<dyn RuntimeThread> {
        Arc::new(self)
    }
}

impl RuntimeThread for FakeThread {
    fn id(&self) -> ThreadId {
        self.inner.id
    }

    fn stack_walk(&self) -> Result<Vec<Arc<dyn RuntimeFrame>>> {
        Ok(self.inner.frames.lock().clone())
    }

    fn active_frame(&self) -> Result<Arc<dyn RuntimeFrame>> {
        self.inner
            .frames
            .lock()
            .first()
            .cloned()
            .ok_or_else(|| Error::runtime("GetActiveFrame"))
    }

    fn begin_eval(&self, call: EvalCall) -> Result<Arc<dyn PendingEval>> {
        self.inner.eval_count.fetch_add(1, Ordering::Relaxed);
        let evals = self.inner.evals.lock();
        match evals.get(&call.method) {
            Some(EvalOutcome::Value(value)) => {
                Ok(Arc::new(FakePendingEval { result: Some(value.clone().into_arc()) }))
            }
            Some(EvalOutcome::NeverCompletes) => Ok(Arc::new(FakePendingEval { result: None })),
            None => Err(Error::runtime("CreateEval")),
        }
    }
}

// ---------------------------------------------------------------------------
// Symbol provider and rig
// ---------------------------------------------------------------------------

/// Symbol provider backed by a name-keyed map of parsed files.
#[derive(Default)]
pub struct FakeSymbolProvider {
    files: Mutex<HashMap<String, SymbolFile>>,
}

impl FakeSymbolProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the symbols of a module by module name.
    pub fn add(&self, module_name: &str, file: SymbolFile) {
        self.files.lock().insert(module_name.to_string(), file);
    }
}

impl SymbolProvider for FakeSymbolProvider {
    fn load_symbols(&self, module: &Arc<dyn RuntimeModule>) -> Result<Option<SymbolFile>> {
        let name = module.name()?;
        Ok(self.files.lock().get(&name).cloned())
    }
}

/// A minimal fake runtime: one module with the collection typedefs
/// registered, enough for signature and helper tests. Scenario tests build
/// richer metadata on top via [`FakeModule::fake_metadata`].
pub struct TestRig {
    /// The module.
    pub module: FakeModule,
    /// Typedef token of `List<T>` in the module.
    pub list_typedef_token: ClassToken,
}

impl TestRig {
    /// Builds the minimal rig.
    pub fn minimal() -> Self {
        let module = FakeModule::new("/app/prog.dll");
        let metadata = module.fake_metadata();

        let list_typedef_token = 0x0200_0010;
        metadata.add_type(list_typedef_token, "System.Collections.Generic.List`1", 0);
        metadata.add_type(0x0200_0011, "System.Collections.Generic.HashSet`1", 0);
        metadata.add_type(0x0200_0012, "System.Collections.Generic.Dictionary`2", 0);

        Self { module, list_typedef_token }
    }
}
