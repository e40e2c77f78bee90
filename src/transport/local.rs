//! In-process transport that routes calls straight to registered handlers.
//! Used to run whole clusters inside one process, e.g. in tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::protocol::{Message, NodeKind, Reply};
use crate::transport::{MessageHandler, Transport};

use async_trait::async_trait;

/// In-process address -> handler router.
#[derive(Default)]
pub struct LocalTransport {
    /// Registered nodes.
    nodes: RwLock<HashMap<SocketAddr, Arc<dyn MessageHandler>>>,

    /// Addresses currently simulated as crashed.
    down: RwLock<HashSet<SocketAddr>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler reachable at `addr`.
    pub fn register(&self, addr: SocketAddr, handler: Arc<dyn MessageHandler>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, handler);
    }

    /// Marks the node at `addr` as crashed (`true`) or back up (`false`).
    pub fn set_down(&self, addr: SocketAddr, down: bool) {
        let mut down_set =
            self.down.write().unwrap_or_else(PoisonError::into_inner);
        if down {
            down_set.insert(addr);
        } else {
            down_set.remove(&addr);
        }
    }

    /// Looks up a live handler at `addr`.
    fn live_handler(&self, addr: &SocketAddr) -> Option<Arc<dyn MessageHandler>> {
        if self
            .down
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(addr)
        {
            return None;
        }
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(
        &self,
        kind: NodeKind,
        addr: SocketAddr,
        msg: Message,
    ) -> Reply {
        match self.live_handler(&addr) {
            None => {
                pf_warn!("local"; "{} '{}' unreachable for msg '{}'",
                                  kind, addr, msg.kind_name());
                Reply::nack()
            }
            Some(handler)
                if handler.kind() != kind || msg.target_kind() != kind =>
            {
                pf_warn!("local"; "msg '{}' addressed to a {} refused by '{}'",
                                  msg.kind_name(), kind, addr);
                Reply::nack()
            }
            Some(handler) => handler.handle_msg(msg).await,
        }
    }
}
