//! `roc-support`: the stats, pooling, and batching primitives shared by
//! handlers and the connection runtime, but independent of socket I/O.

pub mod batch;
pub mod context;
pub mod fixed_map;
pub mod histogram;
pub mod listener;

pub use batch::{BatchField, BatchReader, BatchWriter, FrameCompressor, Lz4FrameCompressor};
pub use context::OpaqueContext;
pub use fixed_map::FixedMap;
pub use histogram::ByteCountHistogram;
pub use listener::{Listener, ListenerEvent, ListenerSet};
