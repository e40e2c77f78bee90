//! Client node: holds local page copies and drives reads/writes through the
//! current primary coordinator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::protocol::{
    Access, ClientId, ClientPointer, Message, NodeKind, Page, PageId, Reply,
};
use crate::transport::{MessageHandler, Transport};

use async_trait::async_trait;

mod cache;
mod workload;

pub use workload::{WorkloadConfig, WorkloadStats, run_random, seed_pages};

/// A client node.
pub struct DsmClient {
    /// My ID and address.
    me: ClientPointer,

    /// Logging prefix.
    tag: String,

    /// Address of the coordinator requests go to.
    coordinator: RwLock<SocketAddr>,

    /// Local page copies.
    pages: Mutex<HashMap<PageId, Page>>,

    /// Outbound calls to coordinators and other clients.
    transport: Arc<dyn Transport>,
}

impl DsmClient {
    /// Creates a new client that sends its requests to `coordinator`.
    pub fn new(
        me: ClientPointer,
        coordinator: SocketAddr,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let tag = format!("c{}", me.id);
        pf_info!(tag; "client created at '{}', coordinator '{}'",
                      me.addr, coordinator);
        DsmClient {
            me,
            tag,
            coordinator: RwLock::new(coordinator),
            pages: Mutex::new(HashMap::new()),
            transport,
        }
    }

    pub fn id(&self) -> ClientId {
        self.me.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.me.addr
    }

    pub fn pointer(&self) -> ClientPointer {
        self.me
    }

    /// Address of the coordinator requests currently go to.
    pub fn coordinator_addr(&self) -> SocketAddr {
        *self
            .coordinator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of one local page.
    pub fn page(&self, page_id: &str) -> Option<Page> {
        self.local().get(page_id).cloned()
    }

    /// All local pages, sorted by page ID.
    pub fn pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = self.local().values().cloned().collect();
        pages.sort_by(|a, b| a.id.cmp(&b.id));
        pages
    }

    fn local(&self) -> MutexGuard<'_, HashMap<PageId, Page>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends a message to the current coordinator.
    async fn call_coordinator(&self, msg: Message) -> Reply {
        let coordinator = self.coordinator_addr();
        self.transport
            .call(NodeKind::Coordinator, coordinator, msg)
            .await
    }

    /// Asks the coordinator for a read copy of a page. Returns whether the
    /// coordinator acknowledged.
    pub async fn send_read_request(&self, page_id: &str) -> bool {
        let reply = self
            .call_coordinator(Message::ReadRequest {
                page_id: page_id.to_string(),
                requester: self.me,
            })
            .await;
        if !reply.ack {
            pf_error!(self.tag; "coordinator refused READ_REQUEST of page {}",
                                page_id);
        }
        reply.ack
    }

    /// Writes a page. A page already held as `ReadWrite` is updated in place;
    /// otherwise the coordinator is asked for ownership. Returns whether the
    /// write was applied locally or acknowledged by the coordinator.
    pub async fn send_write_request(&self, page_id: &str, content: &str) -> bool {
        {
            let mut local = self.local();
            match local.get_mut(page_id) {
                Some(page) if page.access == Access::ReadWrite => {
                    pf_info!(self.tag; "page {} held as {}; written in place",
                                       page_id, page.access);
                    page.content = content.to_string();
                    return true;
                }
                Some(page) => {
                    pf_debug!(self.tag; "page {} held as {}; asking for ownership",
                                        page_id, page.access);
                }
                None => {
                    pf_debug!(self.tag; "page {} not held; asking for ownership",
                                        page_id);
                }
            }
        }

        let reply = self
            .call_coordinator(Message::WriteRequest {
                page_id: page_id.to_string(),
                content: content.to_string(),
                requester: self.me,
            })
            .await;
        if !reply.ack {
            pf_error!(self.tag; "coordinator refused WRITE_REQUEST of page {}",
                                page_id);
        }
        reply.ack
    }
}

#[async_trait]
impl MessageHandler for DsmClient {
    fn kind(&self) -> NodeKind {
        NodeKind::Client
    }

    async fn handle_msg(&self, msg: Message) -> Reply {
        pf_info!(self.tag; "msg '{}' received", msg.kind_name());

        match msg {
            Message::ReadForward { page_id, requester } => {
                self.handle_read_forward(page_id, requester).await
            }

            Message::PageSend { purpose, page } => {
                self.handle_page_send(purpose, page).await
            }

            Message::InvalidateCopy { page_id } => {
                self.handle_invalidate_copy(page_id)
            }

            Message::WriteForward {
                page_id,
                content,
                requester,
            } => self.handle_write_forward(page_id, content, requester).await,

            Message::ChangeCoordinator { new_addr } => {
                self.handle_change_coordinator(new_addr)
            }

            msg => {
                pf_warn!(self.tag; "msg '{}' is not for a client",
                                   msg.kind_name());
                Reply::nack()
            }
        }
    }
}
