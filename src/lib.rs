//! STAGEHAND - scriptable automation host runtime
//!
//! An embedded Lua scripting runtime for a game automation host: users drop
//! small scripts into a directory and the host runs their lifecycle hooks
//! from its control loop, with per-script sandboxing, fault isolation and
//! persistent storage.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod script;

pub use config::{Config, LimitsConfig, LoggingConfig, RuntimeConfig};
pub use error::{Result, StagehandError};
pub use host::{
    EntitySnapshot, InventorySnapshot, ItemSnapshot, ModuleSink, ModuleSpec, PlayerSnapshot,
    SnapshotHub, TaskRequest, TaskSink, Vec3, WorldSnapshot,
};
pub use script::{
    DataStore, DependencyManager, DependencyStats, ErrorHandler, ErrorKind, ErrorRecord,
    ScriptLoader, ScriptMetadata, ScriptRegistry, ScriptState, SyncResult, TickOutcome,
    TickSummary,
};
