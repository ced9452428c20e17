//! Host boundary types.
//!
//! The runtime never hands scripts a live reference into the host. Instead the
//! host publishes read-only snapshots through a [`SnapshotHub`], and scripts
//! hand work back through the [`TaskSink`] and [`ModuleSink`] queues. The task
//! executor and the on-screen menu system that consume those queues live
//! outside this crate.

pub mod modules;
pub mod snapshot;
pub mod tasks;

pub use modules::{ModuleSink, ModuleSpec};
pub use snapshot::{
    EntitySnapshot, InventorySnapshot, ItemSnapshot, PlayerSnapshot, SnapshotHub, Vec3,
    WorldSnapshot,
};
pub use tasks::{TaskRequest, TaskSink};
