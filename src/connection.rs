use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::resp::{RespParser, RespValue};
use crate::server::Server;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection state.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub addr: SocketAddr,
    /// Database selected with SELECT; 0 on connect.
    pub db_index: usize,
    pub should_close: bool,
}

impl Session {
    pub fn new(addr: SocketAddr) -> Self {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            db_index: 0,
            should_close: false,
        }
    }
}

/// The read-parse-execute-write loop for one client.
///
/// Protocol errors produce one error reply and reset the parse buffer;
/// the session continues. I/O errors, EOF, the idle timeout and server
/// shutdown all end the session. Replies are written with `write_all`,
/// so a write either completes or kills the session; a half-written
/// reply would desynchronize the client.
pub async fn handle_connection(
    server: Arc<Server>,
    mut stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut session = Session::new(addr);
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        // Drain every complete frame already buffered.
        loop {
            match RespParser::parse(&mut buf) {
                Ok(Some(value)) => {
                    let line = match value.into_cmdline() {
                        Some(line) if !line.is_empty() => line,
                        Some(_) => continue, // blank inline line
                        None => {
                            debug!(client = session.id, "ignoring non multi-bulk frame");
                            continue;
                        }
                    };
                    let reply = server.exec(&mut session, line).await;
                    stream.write_all(&reply.to_bytes()).await?;
                    if session.should_close {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Reply, then drop everything buffered: the next byte
                    // read is presumed to start a fresh message.
                    let reply = RespValue::error(format!("ERR {e}"));
                    stream.write_all(&reply.to_bytes()).await?;
                    buf.clear();
                }
            }
        }

        tokio::select! {
            read = read_more(&mut stream, &mut buf, server.config().timeout) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(client = session.id, addr = %session.addr, "closing for shutdown");
                    session.should_close = true;
                    return Ok(());
                }
            }
        }
    }
}

/// Read more bytes, treating an idle timeout as EOF.
async fn read_more(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    timeout_secs: u64,
) -> std::io::Result<usize> {
    if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), stream.read_buf(buf)).await {
            Ok(result) => result,
            Err(_) => Ok(0),
        }
    } else {
        stream.read_buf(buf).await
    }
}
