//! Coherence and failover message schema.

use std::fmt;
use std::net::SocketAddr;

use crate::protocol::{ClientPointer, Metadata, Page, PageId};

use serde::{Deserialize, Serialize};

/// Kind of node a message is addressed to.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Client,
    Coordinator,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a page is being sent to a client.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Purpose {
    /// Install as a read-only replica.
    Read,

    /// Install as the new owner.
    Write,
}

/// Request message between nodes. Each variant carries exactly the payload of
/// its message type.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Client -> coordinator: wants a read copy of a page.
    ReadRequest {
        page_id: PageId,
        requester: ClientPointer,
    },

    /// Coordinator -> owner: send your copy to the requester.
    ReadForward {
        page_id: PageId,
        requester: ClientPointer,
    },

    /// Client -> client (or coordinator -> new owner): page transfer.
    PageSend { purpose: Purpose, page: Page },

    /// Client -> coordinator: read copy installed.
    ReadConfirmation {
        page_id: PageId,
        requester: ClientPointer,
    },

    /// Client -> coordinator: wants to write new content to a page.
    WriteRequest {
        page_id: PageId,
        content: String,
        requester: ClientPointer,
    },

    /// Coordinator -> copy holder: drop to no-access.
    InvalidateCopy { page_id: PageId },

    /// Coordinator -> owner: hand content and ownership to the requester.
    WriteForward {
        page_id: PageId,
        content: String,
        requester: ClientPointer,
    },

    /// Client -> coordinator: ownership taken over.
    WriteConfirmation {
        page_id: PageId,
        writer: ClientPointer,
    },

    /// Backup coordinator -> primary coordinator: liveness probe.
    Pulse { sender: SocketAddr },

    /// Coordinator -> client: use this coordinator address from now on.
    ChangeCoordinator { new_addr: SocketAddr },

    /// Restarted coordinator -> coordinators: reclaiming primacy.
    Recovered { coordinator_addr: SocketAddr },
}

impl Message {
    /// Upper-case type name of the message, used in log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::ReadRequest { .. } => "READ_REQUEST",
            Message::ReadForward { .. } => "READ_FORWARD",
            Message::PageSend { .. } => "PAGE_SEND",
            Message::ReadConfirmation { .. } => "READ_CONFIRMATION",
            Message::WriteRequest { .. } => "WRITE_REQUEST",
            Message::InvalidateCopy { .. } => "INVALIDATE_COPY",
            Message::WriteForward { .. } => "WRITE_FORWARD",
            Message::WriteConfirmation { .. } => "WRITE_CONFIRMATION",
            Message::Pulse { .. } => "PULSE",
            Message::ChangeCoordinator { .. } => "CHANGE_CM",
            Message::Recovered { .. } => "RECOVERED",
        }
    }

    /// Kind of node that handles this message.
    pub fn target_kind(&self) -> NodeKind {
        match self {
            Message::ReadForward { .. }
            | Message::PageSend { .. }
            | Message::InvalidateCopy { .. }
            | Message::WriteForward { .. }
            | Message::ChangeCoordinator { .. } => NodeKind::Client,

            Message::ReadRequest { .. }
            | Message::ReadConfirmation { .. }
            | Message::WriteRequest { .. }
            | Message::WriteConfirmation { .. }
            | Message::Pulse { .. }
            | Message::Recovered { .. } => NodeKind::Coordinator,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind_name())
    }
}

/// Reply to every call.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Positive or negative acknowledgement.
    pub ack: bool,

    /// Metadata snapshot; only populated on `Pulse` and `Recovered` replies.
    pub snapshot: Option<Metadata>,
}

impl Reply {
    pub fn ack() -> Self {
        Reply {
            ack: true,
            snapshot: None,
        }
    }

    pub fn nack() -> Self {
        Reply {
            ack: false,
            snapshot: None,
        }
    }

    pub fn with_snapshot(snapshot: Metadata) -> Self {
        Reply {
            ack: true,
            snapshot: Some(snapshot),
        }
    }

    /// Positive or negative acknowledgement from a boolean outcome.
    pub fn from_ack(ack: bool) -> Self {
        if ack {
            Self::ack()
        } else {
            Self::nack()
        }
    }
}

/// What actually travels on the wire for a request: the message plus the
/// kind of node the caller believes it is talking to.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: NodeKind,
    pub msg: Message,
}
