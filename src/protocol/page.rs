//! Page, client pointer, and coordinator-side page metadata types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Page identifier type, unique across the cluster.
pub type PageId = String;

/// Client node ID type.
pub type ClientId = u64;

/// Local access level a client has on its cached copy of a page.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize, Default,
)]
pub enum Access {
    /// Logically invalidated placeholder; content is stale.
    #[default]
    Nil,

    /// Read-only replica.
    Read,

    /// Sole owner with write permission.
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Access::Nil => write!(f, "NIL"),
            Access::Read => write!(f, "READ"),
            Access::ReadWrite => write!(f, "READWRITE"),
        }
    }
}

/// A client's local copy of a page.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Page ID.
    pub id: PageId,

    /// Page content.
    pub content: String,

    /// Local access level.
    pub access: Access,
}

impl Page {
    /// Creates a new page copy.
    pub fn new(
        id: impl Into<PageId>,
        content: impl Into<String>,
        access: Access,
    ) -> Self {
        Page {
            id: id.into(),
            content: content.into(),
            access,
        }
    }
}

/// Lightweight comparable reference to a client, used purely for addressing
/// and set membership.
#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
)]
pub struct ClientPointer {
    /// Client ID.
    pub id: ClientId,

    /// Client's RPC address.
    pub addr: SocketAddr,
}

impl ClientPointer {
    pub fn new(id: ClientId, addr: SocketAddr) -> Self {
        ClientPointer { id, addr }
    }
}

impl fmt::Display for ClientPointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Kind of page transfer a request cycle performs.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum TransferKind {
    Read,
    Write,
}

/// Transfer-in-progress marker of a page. Present while a request cycle on
/// the page has been issued but its confirmation has not been committed yet.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Transfer {
    /// Read or write cycle.
    pub kind: TransferKind,

    /// Client that issued the request.
    pub requester: ClientPointer,
}

/// Coordinator-side metadata of one page.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    /// Current owner; the only client allowed `ReadWrite` access.
    pub owner: ClientPointer,

    /// Clients holding a read-only replica. Never contains the owner.
    pub copy_set: BTreeSet<ClientPointer>,

    /// Transfer-in-progress marker, if any.
    pub transfer: Option<Transfer>,
}

impl PageInfo {
    /// Creates metadata for a page freshly owned by `owner`.
    pub fn owned_by(owner: ClientPointer) -> Self {
        PageInfo {
            owner,
            copy_set: BTreeSet::new(),
            transfer: None,
        }
    }
}

/// Full coordinator metadata snapshot, page ID -> page info.
pub type Metadata = BTreeMap<PageId, PageInfo>;

/// Role of a coordinator process.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum CoordinatorRole {
    Primary,
    Backup,
}

impl fmt::Display for CoordinatorRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod page_tests {
    use super::*;

    #[test]
    fn access_names() {
        assert_eq!(Access::Nil.to_string(), "NIL");
        assert_eq!(Access::Read.to_string(), "READ");
        assert_eq!(Access::ReadWrite.to_string(), "READWRITE");
        assert_eq!(Access::default(), Access::Nil);
    }

    #[test]
    fn pointer_set_membership() {
        let a = ClientPointer::new(1, "127.0.0.1:40001".parse().unwrap());
        let b = ClientPointer::new(2, "127.0.0.1:40002".parse().unwrap());
        let mut set = BTreeSet::new();
        assert!(set.insert(b));
        assert!(set.insert(a));
        assert!(!set.insert(a));
        assert_eq!(set.iter().next(), Some(&a));
        assert_eq!(a.to_string(), "1@127.0.0.1:40001");
    }
}
