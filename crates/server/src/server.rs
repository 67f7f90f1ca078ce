//! TCP accept loop and per-connection tasks.
//!
//! The engine is synchronous; every command runs on the blocking thread
//! pool so a blocked BLPOP/XREAD never stalls the reactor. Replies are
//! written back in arrival order per connection (commands on one
//! connection are serial, as the protocol requires).

use crate::dispatch::{dispatch, Handles};
use crate::resp::{self, Frame};
use bytes::BytesMut;
use quartz_engine::Database;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, db: Arc<Database>) -> io::Result<()> {
    let handles = Handles::new(db);
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let handles = handles.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, handles).await {
                debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(mut socket: TcpStream, handles: Handles) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(4 * 1024);
    loop {
        let args = loop {
            match resp::decode_command(&mut buf) {
                Ok(Some(args)) => break args,
                Ok(None) => {
                    if socket.read_buf(&mut buf).await? == 0 {
                        return Ok(()); // clean disconnect
                    }
                }
                Err(e) => {
                    // Malformed input: report and drop the connection, as
                    // the stream position is no longer trustworthy.
                    warn!(error = %e, "protocol error");
                    let mut out = Vec::new();
                    resp::encode(&Frame::Error(format!("ERR {}", e)), &mut out);
                    let _ = socket.write_all(&out).await;
                    return Ok(());
                }
            }
        };

        let quit = args
            .first()
            .map(|c| c.eq_ignore_ascii_case(b"QUIT"))
            .unwrap_or(false);

        // Engine calls are synchronous (and may block on BLPOP/XREAD).
        let h = handles.clone();
        let reply = tokio::task::spawn_blocking(move || dispatch(&h, &args))
            .await
            .unwrap_or_else(|e| Frame::Error(format!("ERR internal error: {}", e)));

        let mut out = Vec::new();
        resp::encode(&reply, &mut out);
        socket.write_all(&out).await?;
        if quit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn start() -> (TempDir, std::net::SocketAddr) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, db));
        (dir, addr)
    }

    async fn roundtrip(addr: std::net::SocketAddr, request: &[u8], expect: &[u8]) {
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(request).await.unwrap();
        let mut reply = vec![0u8; expect.len()];
        socket.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, expect);
    }

    #[tokio::test]
    async fn test_ping_over_tcp() {
        let (_dir, addr) = start().await;
        roundtrip(addr, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get_over_tcp() {
        let (_dir, addr) = start().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        let mut ok = [0u8; 5];
        socket.read_exact(&mut ok).await.unwrap();
        assert_eq!(&ok, b"+OK\r\n");
        socket
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let mut value = [0u8; 7];
        socket.read_exact(&mut value).await.unwrap();
        assert_eq!(&value, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_inline_command() {
        let (_dir, addr) = start().await;
        roundtrip(addr, b"PING\r\n", b"+PONG\r\n").await;
    }
}
