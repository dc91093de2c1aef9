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

//! Shared scenario rig for the engine integration tests: a fake `prog.dll`
//! with a `Prog.M(int x)` method, symbols for `prog.cs`, and the full
//! registry/coordinator/callback assembly writing into an in-memory sink.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use sdb_common::{BreakpointRequest, Snapshot, SourceLocation};
use sdb_engine::{
    breakpoints::{BreakpointRegistry, SnapshotSink},
    callback::{DebuggerCallback, DebuggerEvent},
    coordinator::EvalCoordinator,
    error::Result,
    runtime::{
        ConstantValue, ElementType, FieldProps, MethodProps, PropertyProps, RuntimeBreakpoint,
        SignatureBlob, MD_STATIC,
    },
    symbols::{
        Document, LocalScope, LocalVariableSymbol, MethodSymbols, SequencePoint, SymbolFile,
        SymbolStore,
    },
    testing::{
        class_field_signature, field_signature, method_signature, property_signature, FakeFrame,
        FakeModule, FakeSymbolProvider, FakeThread, FakeValue,
    },
    value::CaptureContext,
    Caches, EngineConfig,
};

/// Typedef token of the `Prog` class.
pub const TYPE_PROG: u32 = 0x0200_0002;
/// Typedef token of the `Node` linked-list class.
pub const TYPE_NODE: u32 = 0x0200_0003;
/// Typedef token of `List<T>`.
pub const TYPE_LIST: u32 = 0x0200_0010;
/// Typedef token of `Dictionary<K,V>`.
pub const TYPE_DICT: u32 = 0x0200_0012;
/// Typedef token of a dictionary entry struct.
pub const TYPE_ENTRY: u32 = 0x0200_0013;
/// Typedef token of `System.Enum`.
pub const TYPE_ENUM_BASE: u32 = 0x0200_0020;
/// Typedef token of the `Color` flags enum.
pub const TYPE_COLOR: u32 = 0x0200_0021;
/// Method token of `Prog.M`.
pub const METHOD_M: u32 = 0x0600_0001;
/// Getter token of the `Prog.P` property.
pub const METHOD_GET_P: u32 = 0x0600_0005;
/// Method token of the static `Prog.Twice` helper.
pub const METHOD_TWICE: u32 = 0x0600_0006;
/// Field token of `Node.value`.
pub const FIELD_NODE_VALUE: u32 = 0x0400_0031;
/// Field token of `Node.next`.
pub const FIELD_NODE_NEXT: u32 = 0x0400_0032;
/// Field token of `List._size`.
pub const FIELD_LIST_SIZE: u32 = 0x0400_0041;
/// Field token of `List._items`.
pub const FIELD_LIST_ITEMS: u32 = 0x0400_0042;
/// Field token of `Dictionary.count`.
pub const FIELD_DICT_COUNT: u32 = 0x0400_0043;
/// Field token of `Dictionary.entries`.
pub const FIELD_DICT_ENTRIES: u32 = 0x0400_0044;
/// Field token of `Entry.hashCode`.
pub const FIELD_ENTRY_HASH: u32 = 0x0400_0051;
/// Field token of `Entry.key`.
pub const FIELD_ENTRY_KEY: u32 = 0x0400_0052;
/// Field token of `Entry.value`.
pub const FIELD_ENTRY_VALUE: u32 = 0x0400_0053;
/// Field token of `Color.value__`.
pub const FIELD_COLOR_VALUE: u32 = 0x0400_0061;
/// Virtual address of `Prog.M`.
pub const RVA_M: u32 = 0x2050;

/// In-memory snapshot sink.
#[derive(Clone, Default)]
pub struct SnapshotCollector {
    snapshots: Arc<Mutex<Vec<Snapshot>>>,
}

impl SnapshotCollector {
    pub fn all(&self) -> Vec<Snapshot> {
        self.snapshots.lock().clone()
    }
}

impl SnapshotSink for SnapshotCollector {
    fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}

/// The assembled engine under test.
pub struct Scenario {
    pub module: FakeModule,
    pub thread: FakeThread,
    pub registry: Arc<BreakpointRegistry>,
    pub symbols: Arc<SymbolStore>,
    pub coordinator: Arc<EvalCoordinator>,
    pub callback: Arc<DebuggerCallback>,
    pub caches: Arc<Caches>,
    pub config: Arc<EngineConfig>,
    pub provider: Arc<FakeSymbolProvider>,
    pub sink: SnapshotCollector,
}

/// Builds the standard `prog.dll` scenario. Symbols are already ingested
/// unless `ingest_symbols` is false (module-load tests ingest via events).
pub fn scenario_with(config: EngineConfig, ingest_symbols: bool) -> Scenario {
    let module = FakeModule::new("/app/prog.dll");
    let metadata = module.fake_metadata();

    metadata.add_type(TYPE_PROG, "Prog", 0);
    metadata.add_type(TYPE_NODE, "Node", 0);

    metadata.add_method(MethodProps {
        token: METHOD_M,
        name: "M".to_string(),
        class_token: TYPE_PROG,
        flags: MD_STATIC,
        signature: method_signature(0x01),
        virtual_address: RVA_M,
    });
    metadata.add_params(METHOD_M, &["x"]);

    // A static Boolean property with no backing field; its getter must be
    // invoked to read it.
    metadata.add_method(MethodProps {
        token: METHOD_GET_P,
        name: "get_P".to_string(),
        class_token: TYPE_PROG,
        flags: MD_STATIC,
        signature: method_signature(0x02),
        virtual_address: 0x20f0,
    });
    metadata.add_property(
        TYPE_PROG,
        PropertyProps {
            token: 0x1700_0001,
            name: "P".to_string(),
            signature: property_signature(0x02),
            getter: Some(METHOD_GET_P),
        },
    );

    // A static Int32-returning helper method, callable from expressions.
    metadata.add_method(MethodProps {
        token: METHOD_TWICE,
        name: "Twice".to_string(),
        class_token: TYPE_PROG,
        flags: MD_STATIC,
        signature: method_signature(0x08),
        virtual_address: 0x2100,
    });

    metadata.add_field(
        TYPE_NODE,
        FieldProps {
            token: FIELD_NODE_VALUE,
            name: "value".to_string(),
            is_static: false,
            is_literal: false,
            signature: field_signature(0x08),
            default_value: None,
        },
    );
    metadata.add_field(
        TYPE_NODE,
        FieldProps {
            token: FIELD_NODE_NEXT,
            name: "next".to_string(),
            is_static: false,
            is_literal: false,
            signature: class_field_signature(TYPE_NODE),
            default_value: None,
        },
    );

    // Built-in collections: List<T> backed by _items/_size, Dictionary<K,V>
    // backed by entries/count with hashCode/key/value entry structs.
    metadata.add_type(TYPE_LIST, "System.Collections.Generic.List`1", 0);
    metadata.add_type(TYPE_DICT, "System.Collections.Generic.Dictionary`2", 0);
    metadata.add_type(TYPE_ENTRY, "System.Collections.Generic.Dictionary`2+Entry", 0);
    metadata.add_field(
        TYPE_LIST,
        FieldProps {
            token: FIELD_LIST_SIZE,
            name: "_size".to_string(),
            is_static: false,
            is_literal: false,
            signature: field_signature(0x08),
            default_value: None,
        },
    );
    metadata.add_field(
        TYPE_LIST,
        FieldProps {
            token: FIELD_LIST_ITEMS,
            name: "_items".to_string(),
            is_static: false,
            is_literal: false,
            signature: SignatureBlob::new(vec![0x06, 0x1d, 0x08]),
            default_value: None,
        },
    );
    metadata.add_field(
        TYPE_DICT,
        FieldProps {
            token: FIELD_DICT_COUNT,
            name: "count".to_string(),
            is_static: false,
            is_literal: false,
            signature: field_signature(0x08),
            default_value: None,
        },
    );
    metadata.add_field(
        TYPE_DICT,
        FieldProps {
            token: FIELD_DICT_ENTRIES,
            name: "entries".to_string(),
            is_static: false,
            is_literal: false,
            signature: SignatureBlob::new(vec![0x06, 0x1d, 0x08]),
            default_value: None,
        },
    );
    for (token, name, element) in [
        (FIELD_ENTRY_HASH, "hashCode", 0x08u8),
        (FIELD_ENTRY_KEY, "key", 0x0e),
        (FIELD_ENTRY_VALUE, "value", 0x08),
    ] {
        metadata.add_field(
            TYPE_ENTRY,
            FieldProps {
                token,
                name: name.to_string(),
                is_static: false,
                is_literal: false,
                signature: field_signature(element),
                default_value: None,
            },
        );
    }

    // A [Flags]-style enum with Red=1, Green=2, Blue=4.
    metadata.add_type(TYPE_ENUM_BASE, "System.Enum", 0);
    metadata.add_type(TYPE_COLOR, "Color", TYPE_ENUM_BASE);
    metadata.add_field(
        TYPE_COLOR,
        FieldProps {
            token: FIELD_COLOR_VALUE,
            name: "value__".to_string(),
            is_static: false,
            is_literal: false,
            signature: field_signature(0x08),
            default_value: None,
        },
    );
    for (i, (name, constant)) in [("Red", 1u64), ("Green", 2), ("Blue", 4)].iter().enumerate() {
        metadata.add_field(
            TYPE_COLOR,
            FieldProps {
                token: 0x0400_0062 + i as u32,
                name: name.to_string(),
                is_static: true,
                is_literal: true,
                signature: field_signature(0x08),
                default_value: Some(ConstantValue {
                    element_type: ElementType::I4,
                    bytes: (*constant as u32).to_le_bytes().to_vec(),
                }),
            },
        );
    }

    let provider = Arc::new(FakeSymbolProvider::new());
    provider.add("/app/prog.dll", prog_symbols());

    let config = Arc::new(config);
    let caches = Arc::new(Caches::new());
    let registry = Arc::new(BreakpointRegistry::new());
    let coordinator = Arc::new(EvalCoordinator::new(caches.clone()));
    let symbols = Arc::new(SymbolStore::new());
    let callback = Arc::new(DebuggerCallback::new(
        registry.clone(),
        coordinator.clone(),
        symbols.clone(),
        provider.clone(),
        config.clone(),
        caches.clone(),
    ));

    if ingest_symbols {
        symbols.ingest(Arc::new(module.clone()), prog_symbols());
    }

    let sink = SnapshotCollector::default();
    registry.set_writer(Box::new(sink.clone()));

    let thread = FakeThread::new(1);

    Scenario {
        module,
        thread,
        registry,
        symbols,
        coordinator,
        callback,
        caches,
        config,
        provider,
        sink,
    }
}

/// Builds the scenario with default test configuration (short eval timeout).
pub fn scenario() -> Scenario {
    scenario_with(test_config(), true)
}

/// Default test configuration: one-second eval timeout so timeout paths
/// don't stall the suite.
pub fn test_config() -> EngineConfig {
    EngineConfig { eval_timeout: Duration::from_secs(1), ..Default::default() }
}

/// Symbols of `prog.cs`: `Prog.M` spans lines 40..45 with sequence points at
/// 40/42/44 and one named local `y` in scope.
pub fn prog_symbols() -> SymbolFile {
    SymbolFile {
        module_name: "/app/prog.dll".to_string(),
        documents: vec![Document { path: "/app/src/prog.cs".to_string(), ..Default::default() }],
        methods: vec![MethodSymbols {
            method_def: METHOD_M,
            document: 0,
            first_line: 40,
            last_line: 45,
            sequence_points: vec![
                sequence_point(40, 0),
                sequence_point(42, 8),
                sequence_point(44, 16),
            ],
            local_scopes: vec![LocalScope {
                start_offset: 0,
                length: 20,
                variables: vec![LocalVariableSymbol {
                    name: "y".to_string(),
                    slot: 0,
                    debugger_hidden: false,
                }],
                constants: vec![],
            }],
        }],
    }
}

pub fn sequence_point(line: u32, il_offset: u32) -> SequencePoint {
    SequencePoint {
        start_line: line,
        end_line: line,
        start_col: 1,
        end_col: 60,
        il_offset,
        is_hidden: false,
    }
}

impl Scenario {
    /// A frame stopped inside `Prog.M` at IL offset 8 (line 42).
    pub fn frame_in_m(&self, locals: Vec<FakeValue>, arguments: Vec<FakeValue>) -> FakeFrame {
        FakeFrame::il(&self.module, METHOD_M, RVA_M, 8, locals, arguments)
    }

    /// Requests an active breakpoint at `prog.cs:line`.
    pub fn request(&self, id: &str, line: u32) -> BreakpointRequest {
        BreakpointRequest {
            id: id.to_string(),
            location: Some(SourceLocation {
                path: "prog.cs".to_string(),
                line,
                column: 0,
            }),
            activated: true,
            ..Default::default()
        }
    }

    /// The first runtime breakpoint armed against the module.
    pub fn armed_handle(&self) -> Arc<dyn RuntimeBreakpoint> {
        self.module.armed_breakpoints().first().cloned().expect("a breakpoint is armed")
    }

    /// Delivers a breakpoint hit on the scripted thread and waits for the
    /// capture task to finish.
    pub fn hit(&self) {
        let event = DebuggerEvent::Breakpoint {
            thread: self.thread.clone().into_arc(),
            breakpoint: self.armed_handle(),
        };
        self.callback.handle_event(event);
        self.coordinator.join_capture_tasks();
    }

    /// The capture context a task would see.
    pub fn capture_context(&self) -> CaptureContext {
        CaptureContext {
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
            caches: self.caches.clone(),
        }
    }
}
