//! Bidirectional byte splicing between two connected sockets.
//!
//! The payload is opaque: after the initial prelude nothing is inspected
//! or rewritten. Each direction owns an independent buffer; a read EOF in
//! one direction shuts down the peer's write half so half-closed
//! connections drain correctly, and the copy ends only when both
//! directions are done. An I/O error in either direction aborts both.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Per-direction copy buffer size.
pub const COPY_BUF_LEN: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum SpliceError {
    /// The prelude could not be delivered to the backend.
    #[error("prelude write failed: {0}")]
    Prelude(io::Error),

    #[error("{0}")]
    Io(io::Error),
}

/// Splice `client` and `backend` together until both directions close.
///
/// `prelude` is delivered to the backend before any client bytes, so the
/// backend sees the prelude followed by the client stream. Returns the
/// byte counts copied toward the backend (prelude excluded) and toward
/// the client.
pub async fn splice(
    client: &mut TcpStream,
    backend: &mut TcpStream,
    prelude: &[u8],
) -> Result<(u64, u64), SpliceError> {
    if !prelude.is_empty() {
        backend
            .write_all(prelude)
            .await
            .map_err(SpliceError::Prelude)?;
    }

    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let client_to_backend = async {
        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut total = 0u64;
        loop {
            let n = client_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            backend_write.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        backend_write.shutdown().await?;
        Ok::<u64, io::Error>(total)
    };

    let backend_to_client = async {
        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut total = 0u64;
        loop {
            let n = backend_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            client_write.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        client_write.shutdown().await?;
        Ok::<u64, io::Error>(total)
    };

    // try_join drops the healthy direction as soon as the other errors;
    // the caller closing both sockets finishes the teardown.
    tokio::try_join!(client_to_backend, backend_to_client).map_err(SpliceError::Io)
}
