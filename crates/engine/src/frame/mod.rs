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

//! Capture of one stack frame: names, locals, arguments and the identifier
//! lookup the expression evaluator binds against.

pub mod collection;

use std::{collections::VecDeque, sync::Arc};

use tracing::debug;

use sdb_common::{SourceLocation, StackFrame as WireStackFrame};

use crate::{
    error::{Error, Result},
    runtime::{
        helper,
        signature::{parse_field_type, parse_property_type, TypeSignature},
        ClassToken, MetadataImport, MethodToken, RuntimeClass, RuntimeFrame, RuntimeModule,
        RuntimeValue,
    },
    symbols::{LocalVariableSymbol, SymbolStore},
    value::{factory, perform_bfs, BfsItem, CaptureContext, Value, VariableArena},
};

/// Method-name marker for frames with no managed IL.
pub const UNDEBUGGABLE_CODE: &str = "Undebuggable code.";

type NamedValue = (String, std::result::Result<Arc<Value>, String>);

/// What an identifier resolved to at compile time.
///
/// Locals, arguments and fields are read immediately; property getters carry
/// their call target and stay unevaluated until the expression runs, so that
/// compiling a condition never perturbs the debuggee.
pub enum IdentifierBinding {
    /// A value read from the frame during binding.
    Value {
        /// The value.
        value: Arc<Value>,
        /// Its static type.
        signature: TypeSignature,
    },
    /// A property getter, invoked through the coordinator at evaluation
    /// time.
    Property {
        /// Property name, for diagnostics.
        name: String,
        /// Module owning the getter.
        module: Arc<dyn RuntimeModule>,
        /// Getter method token.
        getter: MethodToken,
        /// Receiver for instance properties.
        this: Option<Arc<dyn RuntimeValue>>,
        /// The property's static type.
        signature: TypeSignature,
    },
}

impl IdentifierBinding {
    /// The static type of the bound identifier.
    pub fn signature(&self) -> &TypeSignature {
        match self {
            Self::Value { signature, .. } | Self::Property { signature, .. } => signature,
        }
    }
}

/// One captured stack frame.
pub struct StackFrame {
    /// Short name of the frame's module.
    pub module_short_name: String,
    /// Name of the frame's class.
    pub class_name: String,
    /// Name of the frame's method.
    pub method_name: String,
    /// Source path resolved from symbols, empty when unresolved.
    pub file_path: String,
    /// Source line resolved from sequence points, zero when unresolved.
    pub line: u32,
    /// Token of the frame's method.
    pub method_token: MethodToken,
    /// Token of the frame's class.
    pub class_token: ClassToken,
    /// Whether the frame's method is static.
    pub is_static: bool,
    /// Relative virtual address of the frame's function.
    pub function_virtual_address: u32,
    /// True for frames with no managed IL; such frames are represented but
    /// inspected as undebuggable code.
    pub is_empty: bool,
    /// Whether IL-level locals and arguments were captured.
    pub is_processed_il: bool,

    locals: Vec<NamedValue>,
    arguments: Vec<NamedValue>,
    local_symbols: Vec<LocalVariableSymbol>,
    runtime_frame: Option<Arc<dyn RuntimeFrame>>,
    metadata: Option<Arc<dyn MetadataImport>>,
    module: Option<Arc<dyn RuntimeModule>>,
    object_depth: i32,
}

impl StackFrame {
    /// An empty frame standing in for native code.
    pub fn empty() -> Self {
        Self {
            module_short_name: String::new(),
            class_name: String::new(),
            method_name: String::new(),
            file_path: String::new(),
            line: 0,
            method_token: 0,
            class_token: 0,
            is_static: false,
            function_virtual_address: 0,
            is_empty: true,
            is_processed_il: false,
            locals: Vec::new(),
            arguments: Vec::new(),
            local_symbols: Vec::new(),
            runtime_frame: None,
            metadata: None,
            module: None,
            object_depth: 0,
        }
    }

    /// Captures a raw frame: resolves names, the source position, and (when
    /// `process_il` is set) the IL-level locals and arguments.
    pub fn from_runtime_frame(
        frame: &Arc<dyn RuntimeFrame>,
        symbols: &SymbolStore,
        process_il: bool,
        ctx: &CaptureContext,
    ) -> Result<Self> {
        if !frame.is_il() {
            return Ok(Self::empty());
        }

        let method_token = frame.method_token()?;
        let module = frame.module()?;
        let metadata = module.metadata()?;
        let method_props = metadata.method_props(method_token)?;
        let class_props = metadata.type_def_props(method_props.class_token)?;
        let module_short_name = helper::short_module_name(&module.name()?).to_string();

        let mut captured = Self {
            module_short_name,
            class_name: class_props.name,
            method_name: method_props.name.clone(),
            file_path: String::new(),
            line: 0,
            method_token,
            class_token: method_props.class_token,
            is_static: method_props.is_static(),
            function_virtual_address: method_props.virtual_address,
            is_empty: false,
            is_processed_il: false,
            locals: Vec::new(),
            arguments: Vec::new(),
            local_symbols: Vec::new(),
            runtime_frame: Some(frame.clone()),
            metadata: Some(metadata.clone()),
            module: Some(module),
            object_depth: ctx.config.object_eval_depth as i32,
        };

        captured.resolve_source_position(frame, symbols)?;

        if process_il {
            let (ip_offset, mapping) = frame.ip_offset()?;
            if mapping.is_usable() {
                captured.process_locals(frame, ip_offset, ctx)?;
                captured.process_arguments(frame, ctx)?;
                captured.is_processed_il = true;
            } else {
                debug!(method_token, "skipping IL variables, no usable IP mapping");
            }
        }

        Ok(captured)
    }

    /// Finds the symbol method whose virtual address matches this frame and
    /// records the document path, line and local-variable table.
    fn resolve_source_position(
        &mut self,
        frame: &Arc<dyn RuntimeFrame>,
        symbols: &SymbolStore,
    ) -> Result<()> {
        let (ip_offset, mapping) = frame.ip_offset()?;
        if !mapping.is_usable() {
            return Ok(());
        }

        for module_symbols in symbols.all() {
            let metadata = match module_symbols.module.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            for method in &module_symbols.file.methods {
                let Ok(props) = metadata.method_props(method.method_def) else { continue };
                if props.virtual_address != self.function_virtual_address {
                    continue;
                }

                if let Some(document) = module_symbols.file.documents.get(method.document) {
                    self.file_path = document.path.clone();
                }
                if let Some(sequence_point) = method.sequence_point_for_offset(ip_offset) {
                    self.line = sequence_point.start_line;
                    self.local_symbols = method.locals_in_scope(sequence_point.il_offset);
                }
                return Ok(());
            }
        }

        Ok(())
    }

    /// Enumerates local slots; hidden slots are skipped, unnamed slots get
    /// `variable_<i>` names.
    fn process_locals(
        &mut self,
        frame: &Arc<dyn RuntimeFrame>,
        _ip_offset: u32,
        ctx: &CaptureContext,
    ) -> Result<()> {
        let raw_locals = frame.locals()?;

        for (slot, raw) in raw_locals.into_iter().enumerate() {
            let symbol = self.local_symbols.iter().find(|s| s.slot == slot as u32);
            if symbol.is_some_and(|s| s.debugger_hidden) {
                continue;
            }
            let name = symbol
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("variable_{slot}"));

            let value = factory::create_value(raw, self.object_depth, ctx)
                .map(Arc::new)
                .map_err(|e| e.to_string());
            self.locals.push((name, value));
        }

        Ok(())
    }

    /// Enumerates arguments; instance methods get a synthetic `this` first,
    /// missing parameter names default to `method_argument<i>`.
    fn process_arguments(&mut self, frame: &Arc<dyn RuntimeFrame>, ctx: &CaptureContext) -> Result<()> {
        let metadata = self.metadata.as_ref().expect("IL frame carries metadata");
        let raw_arguments = frame.arguments()?;

        let mut names = Vec::new();
        if !self.is_static {
            names.push("this".to_string());
        }
        for param in metadata.method_params(self.method_token)? {
            names.push(param.name);
        }

        for (index, raw) in raw_arguments.into_iter().enumerate() {
            let name = names
                .get(index)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("method_argument{index}"));
            let value = factory::create_value(raw, self.object_depth, ctx)
                .map(Arc::new)
                .map_err(|e| e.to_string());
            self.arguments.push((name, value));
        }

        Ok(())
    }

    /// `module!Class.Method`, the display name of the frame.
    pub fn display_name(&self) -> String {
        if self.is_empty {
            return UNDEBUGGABLE_CODE.to_string();
        }
        format!("{}!{}.{}", self.module_short_name, self.class_name, self.method_name)
    }

    /// Renders locals and arguments into a wire frame under `frame_budget`
    /// bytes, expanding value trees breadth-first.
    pub fn populate_into(
        &self,
        proto: &mut WireStackFrame,
        frame_budget: usize,
        ctx: &CaptureContext,
        max_items: i32,
    ) -> Result<()> {
        proto.method_name = self.display_name();
        if self.is_empty {
            return Ok(());
        }
        if !self.file_path.is_empty() {
            proto.location =
                Some(SourceLocation { path: self.file_path.clone(), line: self.line, column: 0 });
        }

        let mut arena = VariableArena::new();
        let mut queue = VecDeque::new();
        let mut local_roots = Vec::new();
        let mut argument_roots = Vec::new();

        for (name, value) in &self.locals {
            let node = arena.new_root(name.clone());
            local_roots.push(node);
            match value {
                Ok(value) => queue.push_back(BfsItem { node, value: value.clone(), level: 0 }),
                Err(message) => arena.node_mut(node).set_error(message.clone()),
            }
        }
        for (name, value) in &self.arguments {
            let node = arena.new_root(name.clone());
            argument_roots.push(node);
            match value {
                Ok(value) => queue.push_back(BfsItem { node, value: value.clone(), level: 0 }),
                Err(message) => arena.node_mut(node).set_error(message.clone()),
            }
        }

        let terminate =
            move |arena: &VariableArena| arena.estimated_size() > frame_budget;
        match perform_bfs(&mut arena, &mut queue, &terminate, ctx, max_items) {
            Ok(()) => {}
            Err(Error::BudgetExceeded) => {
                debug!(frame_budget, "frame expansion stopped at the byte budget");
            }
            Err(err) => return Err(err),
        }

        proto.locals = local_roots.iter().map(|&id| arena.to_variable(id)).collect();
        proto.arguments = argument_roots.iter().map(|&id| arena.to_variable(id)).collect();
        Ok(())
    }

    /// Resolves an identifier the way the expression compiler binds against
    /// the frame: locals first, then arguments (`this` reserved for instance
    /// frames), then members of the enclosing class: a direct field, an
    /// auto-property backing field, and finally a property, whose getter is
    /// deferred until evaluation.
    ///
    /// Members inherited from base classes are not searched.
    pub fn lookup_identifier(
        &self,
        name: &str,
        ctx: &CaptureContext,
    ) -> Result<Option<IdentifierBinding>> {
        let Some(frame) = &self.runtime_frame else {
            return Err(Error::NotImplemented("identifier lookup on a native frame".to_string()));
        };

        // Locals by symbol name.
        if name != "this" {
            if let Some(symbol) = self.local_symbols.iter().find(|s| s.name == name) {
                let raw = frame.local(symbol.slot)?;
                let value = Arc::new(factory::create_value(raw, self.object_depth, ctx)?);
                let signature = value.type_signature();
                return Ok(Some(IdentifierBinding::Value { value, signature }));
            }
        }

        // `this` is argument zero of instance frames.
        if name == "this" {
            if self.is_static {
                return Err(Error::TypeMismatch(
                    "this is not available in a static frame".to_string(),
                ));
            }
            let raw = frame.argument(0)?;
            let value = Arc::new(factory::create_value(raw, self.object_depth, ctx)?);
            let signature = value.type_signature();
            return Ok(Some(IdentifierBinding::Value { value, signature }));
        }

        // Arguments by parameter name.
        let metadata = self.metadata.as_ref().expect("IL frame carries metadata");
        let mut argument_index: u32 = if self.is_static { 0 } else { 1 };
        for param in metadata.method_params(self.method_token)? {
            if param.name == name {
                let raw = frame.argument(argument_index)?;
                let value = Arc::new(factory::create_value(raw, self.object_depth, ctx)?);
                let signature = value.type_signature();
                return Ok(Some(IdentifierBinding::Value { value, signature }));
            }
            argument_index += 1;
        }

        // Members declared on the enclosing class.
        self.lookup_class_member(name, ctx)
    }

    fn lookup_class_member(
        &self,
        name: &str,
        ctx: &CaptureContext,
    ) -> Result<Option<IdentifierBinding>> {
        let metadata = self.metadata.as_ref().expect("IL frame carries metadata");
        let module = self.module.as_ref().expect("IL frame carries module");
        let frame = self.runtime_frame.as_ref().expect("IL frame carries runtime frame");

        let field = match metadata.find_field(self.class_token, name)? {
            Some(field) => Some(field),
            None => metadata.find_field(self.class_token, &format!("<{name}>k__BackingField"))?,
        };

        if let Some(field) = field {
            let signature = parse_field_type(&field.signature, metadata.as_ref())?;
            let class = module.class_from_token(self.class_token)?;
            let raw = if field.is_static {
                class.static_field_value(field.token, Some(frame))?
            } else {
                if self.is_static {
                    return Err(Error::TypeMismatch(format!(
                        "cannot read instance field {name} from a static frame"
                    )));
                }
                let this = frame.argument(0)?;
                let (target, is_null) = helper::dereference(this)?;
                if is_null {
                    return Err(Error::Unresolvable(format!(
                        "cannot read field {name} of a null this"
                    )));
                }
                target.field_value(field.token)?
            };
            let value = Arc::new(factory::create_value(raw, self.object_depth, ctx)?);
            return Ok(Some(IdentifierBinding::Value { value, signature }));
        }

        if let Some(property) = metadata.find_property(self.class_token, name)? {
            let getter = property.getter.ok_or_else(|| {
                Error::Unresolvable(format!("property {name} has no getter"))
            })?;
            let getter_props = metadata.method_props(getter)?;
            let this = if getter_props.is_static() {
                None
            } else {
                if self.is_static {
                    return Err(Error::TypeMismatch(format!(
                        "cannot evaluate instance property {name} from a static frame"
                    )));
                }
                Some(frame.argument(0)?)
            };
            let signature = parse_property_type(&property.signature, metadata.as_ref())?;
            return Ok(Some(IdentifierBinding::Property {
                name: name.to_string(),
                module: module.clone(),
                getter,
                this,
                signature,
            }));
        }

        Ok(None)
    }

    /// The class of the frame's method, for static member access.
    pub fn enclosing_class(&self) -> Result<Arc<dyn RuntimeClass>> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| Error::NotImplemented("native frame has no class".to_string()))?;
        module.class_from_token(self.class_token)
    }

    /// Captured locals (name and value or error), for tests and the
    /// assembler.
    pub fn locals(&self) -> &[NamedValue] {
        &self.locals
    }

    /// Captured arguments (name and value or error).
    pub fn arguments(&self) -> &[NamedValue] {
        &self.arguments
    }
}
