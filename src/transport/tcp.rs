//! TCP transport: one connection per call on the client side, and an
//! acceptor + per-connection servant threads on the server side.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::{
    DsmError, tcp_connect_with_retry, tcp_read_obj, tcp_write_obj,
};
use crate::protocol::{Envelope, Message, NodeKind, Reply};
use crate::transport::{MessageHandler, Transport};

use async_trait::async_trait;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Outbound TCP transport.
pub struct TcpTransport {
    /// Logging prefix of the owning node.
    tag: String,

    /// Number of connect retries per call; 0 means fail on the first refusal.
    connect_retries: u8,
}

impl TcpTransport {
    /// Creates a new TCP transport that does not retry.
    pub fn new(tag: impl Into<String>) -> Self {
        TcpTransport {
            tag: tag.into(),
            connect_retries: 0,
        }
    }

    /// Dials the target, sends the envelope, and reads back the reply.
    async fn try_call(
        &self,
        kind: NodeKind,
        addr: SocketAddr,
        msg: Message,
    ) -> Result<Reply, DsmError> {
        let mut stream =
            tcp_connect_with_retry(addr, self.connect_retries).await?;
        tcp_write_obj(&mut stream, &Envelope { kind, msg }).await?;
        tcp_read_obj(&mut stream).await
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(
        &self,
        kind: NodeKind,
        addr: SocketAddr,
        msg: Message,
    ) -> Reply {
        let name = msg.kind_name();
        pf_debug!(self.tag; "sending msg '{}' to {} '{}'", name, kind, addr);
        match self.try_call(kind, addr, msg).await {
            Ok(reply) => reply,
            Err(e) => {
                pf_warn!(self.tag; "error calling {} '{}' with msg '{}': {}",
                                   kind, addr, name, e);
                Reply::nack()
            }
        }
    }
}

/// Inbound RPC server that dispatches every request to a `MessageHandler`.
/// Dropping the server stops accepting new connections.
pub struct RpcServer {
    /// Address actually listened on.
    local_addr: SocketAddr,

    /// Join handle of the acceptor thread.
    acceptor_handle: JoinHandle<()>,
}

impl RpcServer {
    /// Spawns the acceptor thread on an already-bound listener.
    pub fn new_and_setup(
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
        tag: impl Into<String>,
    ) -> Result<Self, DsmError> {
        let local_addr = listener.local_addr()?;
        let acceptor_handle = tokio::spawn(Self::acceptor_thread(
            tag.into(),
            listener,
            handler,
        ));

        Ok(RpcServer {
            local_addr,
            acceptor_handle,
        })
    }

    /// Address this server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Acceptor thread function.
    async fn acceptor_thread(
        tag: String,
        listener: TcpListener,
        handler: Arc<dyn MessageHandler>,
    ) {
        pf_debug!(tag; "acceptor thread spawned");
        if let Ok(local_addr) = listener.local_addr() {
            pf_info!(tag; "accepting {} calls on '{}'", handler.kind(), local_addr);
        }

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(Self::servant_thread(
                        tag.clone(),
                        stream,
                        addr,
                        handler.clone(),
                    ));
                }
                Err(e) => {
                    pf_warn!(tag; "error accepting connection: {}", e);
                }
            }
        }
    }

    /// Per-connection servant thread function. Serves requests on the
    /// connection one after another until the caller hangs up.
    async fn servant_thread(
        tag: String,
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) {
        pf_trace!(tag; "servant thread for '{}' spawned", addr);

        loop {
            let envelope: Envelope = match tcp_read_obj(&mut stream).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    pf_trace!(tag; "connection from '{}' closed: {}", addr, e);
                    break;
                }
            };

            let reply = if envelope.kind != handler.kind()
                || envelope.msg.target_kind() != handler.kind()
            {
                pf_warn!(tag; "msg '{}' addressed to a {} refused",
                              envelope.msg.kind_name(), envelope.kind);
                Reply::nack()
            } else {
                handler.handle_msg(envelope.msg).await
            };

            if let Err(e) = tcp_write_obj(&mut stream, &reply).await {
                pf_warn!(tag; "error replying to '{}': {}", addr, e);
                break;
            }
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.acceptor_handle.abort();
    }
}

#[cfg(test)]
mod tcp_tests {
    use super::*;
    use crate::protocol::ClientPointer;
    use crate::utils::tcp_bind_with_retry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Acks every `InvalidateCopy` for page "P1", nacks everything else.
    struct PickyClient;

    #[async_trait]
    impl MessageHandler for PickyClient {
        fn kind(&self) -> NodeKind {
            NodeKind::Client
        }

        async fn handle_msg(&self, msg: Message) -> Reply {
            match msg {
                Message::InvalidateCopy { page_id } if page_id == "P1" => {
                    Reply::ack()
                }
                _ => Reply::nack(),
            }
        }
    }

    async fn picky_server() -> Result<RpcServer, DsmError> {
        let listener = tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        RpcServer::new_and_setup(listener, Arc::new(PickyClient), "srv")
    }

    #[tokio::test]
    async fn call_and_reply() -> Result<(), DsmError> {
        let server = picky_server().await?;
        let transport = TcpTransport::new("cli");

        let reply = transport
            .call(
                NodeKind::Client,
                server.local_addr(),
                Message::InvalidateCopy {
                    page_id: "P1".into(),
                },
            )
            .await;
        assert_eq!(reply, Reply::ack());

        let reply = transport
            .call(
                NodeKind::Client,
                server.local_addr(),
                Message::InvalidateCopy {
                    page_id: "P2".into(),
                },
            )
            .await;
        assert_eq!(reply, Reply::nack());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_node_kind_refused() -> Result<(), DsmError> {
        let server = picky_server().await?;
        let transport = TcpTransport::new("cli");
        let reply = transport
            .call(
                NodeKind::Coordinator,
                server.local_addr(),
                Message::InvalidateCopy {
                    page_id: "P1".into(),
                },
            )
            .await;
        assert!(!reply.ack);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_envelope_refused() -> Result<(), DsmError> {
        let server = picky_server().await?;
        let mut stream = TcpStream::connect(server.local_addr()).await?;

        // right node kind, but a message only coordinators handle
        let envelope = Envelope {
            kind: NodeKind::Client,
            msg: Message::Pulse {
                sender: "127.0.0.1:1".parse()?,
            },
        };
        tcp_write_obj(&mut stream, &envelope).await?;
        let reply: Reply = tcp_read_obj(&mut stream).await?;
        assert_eq!(reply, Reply::nack());

        // same connection keeps serving
        let envelope = Envelope {
            kind: NodeKind::Client,
            msg: Message::InvalidateCopy {
                page_id: "P1".into(),
            },
        };
        tcp_write_obj(&mut stream, &envelope).await?;
        let reply: Reply = tcp_read_obj(&mut stream).await?;
        assert_eq!(reply, Reply::ack());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_is_nack() -> Result<(), DsmError> {
        let listener = tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let transport = TcpTransport::new("cli");
        let reply = transport
            .call(
                NodeKind::Coordinator,
                addr,
                Message::ReadRequest {
                    page_id: "P1".into(),
                    requester: ClientPointer::new(1, "127.0.0.1:1".parse()?),
                },
            )
            .await;
        assert!(!reply.ack);
        Ok(())
    }

    #[tokio::test]
    async fn junk_length_closes_only_that_conn() -> Result<(), DsmError> {
        let server = picky_server().await?;

        let mut junk = TcpStream::connect(server.local_addr()).await?;
        junk.write_u64(1 << 44).await?;
        junk.flush().await?;
        // servant gives up on the frame and hangs up
        let mut buf = [0u8; 8];
        assert_eq!(junk.read(&mut buf).await?, 0);

        let reply = TcpTransport::new("cli")
            .call(
                NodeKind::Client,
                server.local_addr(),
                Message::InvalidateCopy {
                    page_id: "P1".into(),
                },
            )
            .await;
        assert_eq!(reply, Reply::ack());
        Ok(())
    }
}
