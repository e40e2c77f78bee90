//! Point-to-point synchronous request/reply transport between nodes.
//!
//! Every failure along a call (cannot connect, connection dropped, remote
//! handler refused) collapses into a negative acknowledgement `Reply` on the
//! caller side; callers never see transport errors directly.

use std::net::SocketAddr;

use crate::protocol::{Message, NodeKind, Reply};

use async_trait::async_trait;

mod tcp;
mod local;

pub use tcp::{RpcServer, TcpTransport};
pub use local::LocalTransport;

/// Outbound side: issues one call and waits for its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `msg` to the node of given `kind` listening at `addr` and waits
    /// for the reply. Never fails; failures come back as `Reply::nack()`.
    async fn call(&self, kind: NodeKind, addr: SocketAddr, msg: Message)
        -> Reply;
}

/// Inbound side: implemented by every node type that serves calls.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Kind of node this handler is.
    fn kind(&self) -> NodeKind;

    /// Handles one inbound message and produces the reply. May be invoked
    /// concurrently for different calls.
    async fn handle_msg(&self, msg: Message) -> Reply;
}
