//! TCP bind/connect/read/write helper functions.

use std::net::SocketAddr;

use crate::utils::DsmError;

use serde::Serialize;
use serde::de::DeserializeOwned;

use rmp_serde::encode::to_vec as encode_to_vec;
use rmp_serde::decode::from_slice as decode_from_slice;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

/// Largest object length accepted from the wire.
pub(crate) const MAX_OBJ_LEN: u64 = 64 * 1024 * 1024;

/// Receives an object of type `T` from TCP readable connection `conn_read`.
/// The first 8 bytes on the wire are the big-endian length of the object, and
/// the rest are its MessagePack encoding.
pub(crate) async fn tcp_read_obj<T, Conn>(
    conn_read: &mut Conn,
) -> Result<T, DsmError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let obj_len = conn_read.read_u64().await?; // receive length first
    if obj_len > MAX_OBJ_LEN {
        return Err(DsmError::msg(format!(
            "object length {} exceeds limit {}",
            obj_len, MAX_OBJ_LEN
        )));
    }
    let obj_len = usize::try_from(obj_len)
        .map_err(|e| DsmError::msg(format!("object too large: {}", e)))?;
    let mut obj_buf: Vec<u8> = vec![0; obj_len];
    conn_read.read_exact(&mut obj_buf[..]).await?;
    let obj = decode_from_slice(&obj_buf)?;
    Ok(obj)
}

/// Sends an object of type `T` to TCP writable connection `conn_write`,
/// prefixed by its length.
pub(crate) async fn tcp_write_obj<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), DsmError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Wrapper over tokio `TcpSocket::listen()` that provides a retrying logic.
/// Binding to port 0 picks any free port; use `local_addr()` on the returned
/// listener to learn it.
pub async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, DsmError> {
    loop {
        let socket = if bind_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_nodelay(true)?;

        let attempt = socket.bind(bind_addr).and_then(|_| socket.listen(1024));
        match attempt {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, DsmError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    enum TestObj {
        Hello { who: String },
        Bye,
    }

    #[tokio::test]
    async fn read_write_objs() -> Result<(), DsmError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await?;
            let first: TestObj = tcp_read_obj(&mut stream).await?;
            let second: TestObj = tcp_read_obj(&mut stream).await?;
            Ok::<_, DsmError>((first, second))
        });

        let mut stream = tcp_connect_with_retry(addr, 3).await?;
        tcp_write_obj(&mut stream, &TestObj::Hello { who: "ivy".into() })
            .await?;
        tcp_write_obj(&mut stream, &TestObj::Bye).await?;

        let (first, second) = peer.await??;
        assert_eq!(first, TestObj::Hello { who: "ivy".into() });
        assert_eq!(second, TestObj::Bye);
        Ok(())
    }

    #[tokio::test]
    async fn read_from_closed_conn() -> Result<(), DsmError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await?;
            let res: Result<TestObj, DsmError> =
                tcp_read_obj(&mut stream).await;
            Ok::<_, DsmError>(res.is_err())
        });

        let stream = tcp_connect_with_retry(addr, 3).await?;
        drop(stream);
        assert!(peer.await??);
        Ok(())
    }

    #[tokio::test]
    async fn read_oversized_length() -> Result<(), DsmError> {
        let listener =
            tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await?;
            let res: Result<TestObj, DsmError> =
                tcp_read_obj(&mut stream).await;
            Ok::<_, DsmError>(res)
        });

        let mut stream = tcp_connect_with_retry(addr, 3).await?;
        stream.write_u64(MAX_OBJ_LEN + 1).await?;
        stream.flush().await?;
        let res = peer.await??;
        assert!(res.is_err_and(|e| e.0.contains("exceeds limit")));
        Ok(())
    }
}
