//! Central coordinator: authoritative page ownership/copy-set metadata plus
//! the primary/backup failover controller. The same process runs both.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::utils::DsmError;
use crate::protocol::{
    CoordinatorRole, Message, Metadata, NodeKind, PageInfo, Reply,
};
use crate::registry::Registry;
use crate::transport::{MessageHandler, Transport};

use async_trait::async_trait;

use tokio::task::JoinHandle;

mod pagetable;
mod coherence;
mod failover;

pub use failover::PulseOutcome;

use pagetable::PageTable;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Interval between two heartbeat pulses of a backup, in millisecs.
    pub pulse_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            pulse_interval_ms: 2000,
        }
    }
}

/// A coordinator process.
pub struct Coordinator {
    /// My RPC address.
    addr: SocketAddr,

    /// Logging prefix.
    tag: String,

    /// Configuration parameters struct.
    config: CoordinatorConfig,

    /// Current role.
    role: Mutex<CoordinatorRole>,

    /// Page metadata table.
    pages: PageTable,

    /// Outbound calls to clients and coordinators.
    transport: Arc<dyn Transport>,

    /// Node discovery.
    registry: Arc<dyn Registry>,

    /// Join handle of the heartbeat thread, if running.
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,

    /// Weak self reference handed to the heartbeat thread.
    myself: Weak<Coordinator>,
}

impl Coordinator {
    /// Creates a new coordinator in the given role. Does not start the
    /// heartbeat loop; call `start_heartbeat()` for a backup.
    pub fn new_and_setup(
        addr: SocketAddr,
        role: CoordinatorRole,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
        config_str: Option<&str>,
    ) -> Result<Arc<Self>, DsmError> {
        let tag = format!("cm@{}", addr);
        let config = parsed_config!(config_str => CoordinatorConfig;
                                    pulse_interval_ms)?;
        if config.pulse_interval_ms == 0 {
            return logged_err!(tag; "invalid config.pulse_interval_ms '{}'",
                                    config.pulse_interval_ms);
        }

        pf_info!(tag; "coordinator created as {}", role);
        Ok(Arc::new_cyclic(|myself| Coordinator {
            addr,
            tag,
            config,
            role: Mutex::new(role),
            pages: PageTable::new(),
            transport,
            registry,
            heartbeat_handle: Mutex::new(None),
            myself: myself.clone(),
        }))
    }

    /// My RPC address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current role.
    pub fn role(&self) -> CoordinatorRole {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the role, returning the previous one.
    fn set_role(&self, role: CoordinatorRole) -> CoordinatorRole {
        let mut cur = self.role.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *cur, role)
    }

    /// Snapshot of all page metadata.
    pub fn metadata(&self) -> Metadata {
        self.pages.snapshot()
    }

    /// Metadata of one page, if it has ever been written.
    pub fn page_info(&self, page_id: &str) -> Option<PageInfo> {
        self.pages.get(page_id)
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    fn kind(&self) -> NodeKind {
        NodeKind::Coordinator
    }

    async fn handle_msg(&self, msg: Message) -> Reply {
        if let Message::Pulse { .. } = msg {
            pf_trace!(self.tag; "msg '{}' received", msg.kind_name());
        } else {
            pf_info!(self.tag; "msg '{}' received", msg.kind_name());
        }

        match msg {
            Message::Pulse { sender } => self.handle_pulse(sender),

            Message::Recovered { coordinator_addr } => {
                self.handle_recovered(coordinator_addr)
            }

            msg if self.role() == CoordinatorRole::Backup => {
                pf_debug!(self.tag; "backup drops msg '{}'", msg.kind_name());
                Reply::nack()
            }

            Message::ReadRequest { page_id, requester } => {
                self.handle_read_request(page_id, requester).await
            }

            Message::ReadConfirmation { page_id, requester } => {
                self.handle_read_confirmation(page_id, requester)
            }

            Message::WriteRequest {
                page_id,
                content,
                requester,
            } => self.handle_write_request(page_id, content, requester).await,

            Message::WriteConfirmation { page_id, writer } => {
                self.handle_write_confirmation(page_id, writer)
            }

            msg => {
                pf_warn!(self.tag; "msg '{}' is not for a coordinator",
                                   msg.kind_name());
                Reply::nack()
            }
        }
    }
}
