//! Page data model and the message schema spoken between clients and
//! coordinators.

mod page;
mod messages;

pub use page::{
    Access, ClientId, ClientPointer, CoordinatorRole, Metadata, Page, PageId,
    PageInfo, Transfer, TransferKind,
};
pub use messages::{Envelope, Message, NodeKind, Purpose, Reply};
