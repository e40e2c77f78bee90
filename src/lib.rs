//! IvyDSM: distributed shared-memory page coherence with a primary/backup
//! central coordinator.

#[macro_use]
mod utils;

mod protocol;
mod transport;
mod registry;
mod coordinator;
mod client;


// Helper utilities, functions, and macros
pub use crate::utils::{DsmError, logger_init, tcp_bind_with_retry};

// Protocol data model and wire messages
pub use crate::protocol::{
    Access, ClientId, ClientPointer, CoordinatorRole, Envelope, Message,
    Metadata, NodeKind, Page, PageId, PageInfo, Purpose, Reply, Transfer,
    TransferKind,
};

// Transport and RPC serving
pub use crate::transport::{
    LocalTransport, MessageHandler, RpcServer, TcpTransport, Transport,
};

// Node registries
pub use crate::registry::{
    ClientRecord, CoordinatorRecord, FileRegistry, MemRegistry, Registry,
};

// Coordinator node
pub use crate::coordinator::{Coordinator, CoordinatorConfig, PulseOutcome};

// Client node and workload driver
pub use crate::client::{
    DsmClient, WorkloadConfig, WorkloadStats, run_random, seed_pages,
};
