//! Client-side handlers of coordinator- and peer-initiated messages.

use std::net::SocketAddr;
use std::sync::PoisonError;

use crate::client::DsmClient;
use crate::protocol::{
    Access, ClientPointer, Message, NodeKind, Page, PageId, Purpose, Reply,
};

impl DsmClient {
    /// Handler of READ_FORWARD: ships my copy to the requester. My own copy
    /// is left untouched.
    pub(super) async fn handle_read_forward(
        &self,
        page_id: PageId,
        requester: ClientPointer,
    ) -> Reply {
        let Some(page) = self.page(&page_id) else {
            pf_error!(self.tag; "page {} not held; cannot serve read by client {}",
                                page_id, requester.id);
            return Reply::nack();
        };

        pf_info!(self.tag; "sending page {} to client {} for read",
                           page_id, requester.id);
        let reply = self
            .transport
            .call(
                NodeKind::Client,
                requester.addr,
                Message::PageSend {
                    purpose: Purpose::Read,
                    page,
                },
            )
            .await;
        if !reply.ack {
            pf_error!(self.tag; "client {} did not take page {}",
                                requester.id, page_id);
        }
        Reply::ack()
    }

    /// Handler of PAGE_SEND: installs the page with the access its purpose
    /// grants, then confirms to the coordinator. The copy stays installed
    /// even if the confirmation is refused.
    pub(super) async fn handle_page_send(
        &self,
        purpose: Purpose,
        mut page: Page,
    ) -> Reply {
        let page_id = page.id.clone();
        let confirmation = match purpose {
            Purpose::Read => {
                page.access = Access::Read;
                Message::ReadConfirmation {
                    page_id: page_id.clone(),
                    requester: self.me,
                }
            }
            Purpose::Write => {
                page.access = Access::ReadWrite;
                Message::WriteConfirmation {
                    page_id: page_id.clone(),
                    writer: self.me,
                }
            }
        };
        pf_info!(self.tag; "installed page {} as {}", page_id, page.access);
        self.local().insert(page_id.clone(), page);

        let name = confirmation.kind_name();
        let reply = self.call_coordinator(confirmation).await;
        if !reply.ack {
            pf_error!(self.tag; "coordinator refused {} of page {}",
                                name, page_id);
        }
        Reply::ack()
    }

    /// Handler of INVALIDATE_COPY: drops my access but keeps the content.
    pub(super) fn handle_invalidate_copy(&self, page_id: PageId) -> Reply {
        match self.local().get_mut(&page_id) {
            Some(page) => {
                page.access = Access::Nil;
                pf_info!(self.tag; "copy of page {} invalidated", page_id);
                Reply::ack()
            }
            None => {
                pf_error!(self.tag; "page {} not held; cannot invalidate",
                                    page_id);
                Reply::nack()
            }
        }
    }

    /// Handler of WRITE_FORWARD: takes the new content, gives up my access,
    /// and hands the page over to the writer.
    pub(super) async fn handle_write_forward(
        &self,
        page_id: PageId,
        content: String,
        requester: ClientPointer,
    ) -> Reply {
        let page = {
            let mut local = self.local();
            let page = local.entry(page_id.clone()).or_insert_with(|| {
                pf_warn!(self.tag; "page {} to hand over not held; placeholder installed",
                                   page_id);
                Page::new(page_id.clone(), String::new(), Access::Nil)
            });
            page.content = content;
            page.access = Access::Nil;
            page.clone()
        };

        pf_info!(self.tag; "handing page {} over to client {}",
                           page_id, requester.id);
        let reply = self
            .transport
            .call(
                NodeKind::Client,
                requester.addr,
                Message::PageSend {
                    purpose: Purpose::Write,
                    page,
                },
            )
            .await;
        if !reply.ack {
            pf_error!(self.tag; "client {} did not take page {}",
                                requester.id, page_id);
        }
        Reply::ack()
    }

    /// Handler of CHANGE_CM: later requests go to the new coordinator.
    pub(super) fn handle_change_coordinator(
        &self,
        new_addr: SocketAddr,
    ) -> Reply {
        let mut coordinator = self
            .coordinator
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        pf_info!(self.tag; "coordinator changed '{}' -> '{}'",
                           *coordinator, new_addr);
        *coordinator = new_addr;
        Reply::ack()
    }
}
