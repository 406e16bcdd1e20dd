//! `roc-engine`: connection lifecycle, the request-on-connection
//! scheduler, and handler dispatch. Built on the framing and handshakes
//! `roc-wire` provides and the reusable pooling/histogram/batch types in
//! `roc-support`.

pub mod acceptor;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod free_list;
pub mod handler;
pub mod request_set;
pub mod resources;

pub use acceptor::TcpAcceptor;
pub use config::{EngineConfig, SocketTuning};
pub use connection::{run_connection, ConnectionContext};
pub use dispatcher::{new_roc, EventDispatcher, RocEntry, RocState};
pub use free_list::FreeList;
pub use handler::{
    DispatchOutcome, HandlerCounters, HandlerRegistry, HandlerRegistryBuilder, RequestHandler,
};
pub use request_set::{Evictable, RequestSet};
pub use resources::{ResourceAcquirer, ResourceHandle};
