//! SWMR coherence handlers of the primary coordinator.

use crate::coordinator::Coordinator;
use crate::coordinator::pagetable::CopyInsert;
use crate::protocol::{
    Access, ClientPointer, Message, NodeKind, Page, PageId, Purpose, Reply,
    Transfer, TransferKind,
};

impl Coordinator {
    /// Clears a transfer marker left behind by an earlier cycle on this page
    /// whose confirmation never arrived.
    fn resolve_stalled(&self, page_id: &str) {
        if let Some(stalled) = self.pages.clear_transfer(page_id) {
            pf_warn!(self.tag; "resolved stalled {:?} transfer of page {} to client {}",
                               stalled.kind, page_id, stalled.requester.id);
        }
    }

    /// Called when a request cycle returns; a marker still set here means the
    /// confirmation has not arrived.
    fn check_stalled(&self, page_id: &str) {
        if let Some(pending) = self.pages.transfer(page_id) {
            pf_warn!(self.tag; "{:?} transfer of page {} to client {} not confirmed",
                               pending.kind, page_id, pending.requester.id);
        }
    }

    /// Resolves every stalled marker at once. Called on taking over primacy.
    pub(super) fn resolve_all_stalled(&self) {
        for (page_id, stalled) in self.pages.clear_all_transfers() {
            pf_warn!(self.tag; "resolved stalled {:?} transfer of page {} to client {}",
                               stalled.kind, page_id, stalled.requester.id);
        }
    }

    /// Handler of READ_REQUEST: forwards to the page's owner, which ships the
    /// page to the requester. A never-written page is denied.
    pub(super) async fn handle_read_request(
        &self,
        page_id: PageId,
        requester: ClientPointer,
    ) -> Reply {
        let guard = self.pages.lock_page(&page_id).await;

        let Some(info) = self.pages.get(&page_id) else {
            pf_warn!(self.tag; "page {} never written; read by client {} denied",
                               page_id, requester.id);
            self.pages.release_unknown(&page_id, guard);
            return Reply::ack();
        };
        self.resolve_stalled(&page_id);

        if info.owner == requester {
            pf_info!(self.tag; "client {} already owns page {}",
                               requester.id, page_id);
            return Reply::ack();
        }

        self.pages.begin_transfer(
            &page_id,
            Transfer {
                kind: TransferKind::Read,
                requester,
            },
        );
        pf_info!(self.tag; "forwarding read of page {} to owner {}",
                           page_id, info.owner);
        let reply = self
            .transport
            .call(
                NodeKind::Client,
                info.owner.addr,
                Message::ReadForward {
                    page_id: page_id.clone(),
                    requester,
                },
            )
            .await;
        if !reply.ack {
            pf_error!(self.tag; "owner {} refused READ_FORWARD of page {}",
                                info.owner, page_id);
        }

        self.check_stalled(&page_id);
        Reply::ack()
    }

    /// Handler of READ_CONFIRMATION: adds the requester to the copy set.
    pub(super) fn handle_read_confirmation(
        &self,
        page_id: PageId,
        requester: ClientPointer,
    ) -> Reply {
        match self.pages.add_copy(&page_id, requester) {
            CopyInsert::Added => {
                pf_info!(self.tag; "client {} added to copy set of page {}",
                                   requester.id, page_id);
                Reply::ack()
            }
            CopyInsert::Duplicate => {
                pf_debug!(self.tag; "client {} already in copy set of page {}",
                                    requester.id, page_id);
                Reply::ack()
            }
            CopyInsert::IsOwner => {
                pf_warn!(self.tag; "owner {} not added to its own copy set of page {}",
                                   requester.id, page_id);
                Reply::ack()
            }
            CopyInsert::Unknown => {
                pf_error!(self.tag; "read confirmation of unknown page {}",
                                    page_id);
                Reply::nack()
            }
        }
    }

    /// Handler of WRITE_REQUEST. A never-written page is created and sent
    /// straight back to the requester as its owner. Otherwise every copy is
    /// invalidated first, then the owner is told to hand the page over.
    pub(super) async fn handle_write_request(
        &self,
        page_id: PageId,
        content: String,
        requester: ClientPointer,
    ) -> Reply {
        let _guard = self.pages.lock_page(&page_id).await;

        let Some(info) = self.pages.get(&page_id) else {
            self.pages.create_owned(&page_id, requester);
            pf_info!(self.tag; "page {} created with owner {}",
                               page_id, requester);
            let page =
                Page::new(page_id.clone(), content, Access::ReadWrite);
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
                pf_error!(self.tag; "client {} refused new page {}",
                                    requester.id, page_id);
            }
            self.check_stalled(&page_id);
            return Reply::ack();
        };
        self.resolve_stalled(&page_id);

        self.pages.begin_transfer(
            &page_id,
            Transfer {
                kind: TransferKind::Write,
                requester,
            },
        );

        for holder in &info.copy_set {
            let reply = self
                .transport
                .call(
                    NodeKind::Client,
                    holder.addr,
                    Message::InvalidateCopy {
                        page_id: page_id.clone(),
                    },
                )
                .await;
            if !reply.ack {
                pf_error!(self.tag; "client {} refused invalidation of page {}; \
                                     write by client {} abandoned",
                                    holder.id, page_id, requester.id);
                self.check_stalled(&page_id);
                return Reply::ack();
            }
            self.pages.remove_copy(&page_id, holder);
            pf_debug!(self.tag; "copy of page {} at client {} invalidated",
                                page_id, holder.id);
        }

        pf_info!(self.tag; "forwarding write of page {} to owner {}",
                           page_id, info.owner);
        let reply = self
            .transport
            .call(
                NodeKind::Client,
                info.owner.addr,
                Message::WriteForward {
                    page_id: page_id.clone(),
                    content,
                    requester,
                },
            )
            .await;
        if !reply.ack {
            pf_error!(self.tag; "owner {} refused WRITE_FORWARD of page {}",
                                info.owner, page_id);
        }

        self.check_stalled(&page_id);
        Reply::ack()
    }

    /// Handler of WRITE_CONFIRMATION: the writer becomes the sole holder.
    pub(super) fn handle_write_confirmation(
        &self,
        page_id: PageId,
        writer: ClientPointer,
    ) -> Reply {
        if self.pages.set_owner(&page_id, writer) {
            pf_info!(self.tag; "client {} now owns page {}",
                               writer.id, page_id);
            Reply::ack()
        } else {
            pf_error!(self.tag; "write confirmation of unknown page {}",
                                page_id);
            Reply::nack()
        }
    }
}
