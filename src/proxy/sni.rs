//! SNI extraction from the TLS ClientHello.
//!
//! Reads exactly one TLS record from the start of a connection, validates
//! that it is a ClientHello, and pulls the `server_name` host out of its
//! extensions. The consumed bytes are retained so the caller can replay
//! them verbatim to the backend; nothing past the first record is read.
//!
//! TLS record layout:
//! - byte 0: content type (0x16 = handshake)
//! - bytes 1-2: record version
//! - bytes 3-4: record length
//! - bytes 5+: handshake message
//!
//! ClientHello body after the 4-byte handshake header:
//! - 2 bytes legacy version, 32 bytes random
//! - session ID (u8 length), cipher suites (u16 length),
//!   compression methods (u8 length)
//! - extensions (u16 length): each `{type: u16, length: u16, data}`;
//!   `server_name` (type 0) holds a list of `{type: u8, length: u16, name}`
//!   entries, host names having type 0.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXT_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST: u8 = 0;

/// A TLS record payload never exceeds 2^14 bytes.
pub const MAX_RECORD_LEN: usize = 16384;

/// Default wall-clock bound on reading the ClientHello.
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PeekError {
    /// The first bytes are not a TLS 1.0+ handshake record.
    #[error("not a TLS handshake")]
    NotTls,
    /// EOF or deadline expiry before the ClientHello completed.
    #[error("connection ended before the ClientHello completed")]
    Truncated,
    /// A well-formed ClientHello without a host name.
    #[error("ClientHello carries no server_name")]
    NoSni,
    /// A length field disagrees with the data.
    #[error("malformed ClientHello: {0}")]
    Malformed(&'static str),
    #[error("read failed: {0}")]
    Io(io::Error),
}

/// The peeked ClientHello: the SNI host and every byte consumed from the
/// client, for replay to the backend.
#[derive(Debug, Clone)]
pub struct ClientHello {
    /// Lowercased `server_name` host.
    pub host: String,
    /// The complete record, header included.
    pub raw: Vec<u8>,
}

/// Read the initial TLS record and extract the SNI host.
///
/// `deadline` bounds the whole read; expiry maps to [`PeekError::Truncated`].
pub async fn peek_client_hello<R: AsyncRead + Unpin>(
    stream: &mut R,
    deadline: Duration,
) -> Result<ClientHello, PeekError> {
    let raw = timeout(deadline, read_record(stream))
        .await
        .map_err(|_| PeekError::Truncated)??;
    let host = parse_client_hello(&raw[RECORD_HEADER_LEN..])?;
    Ok(ClientHello { host, raw })
}

async fn read_record<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, PeekError> {
    let mut raw = vec![0u8; RECORD_HEADER_LEN];
    read_full(stream, &mut raw).await?;

    if raw[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(PeekError::NotTls);
    }
    // Record version must be TLS 1.0 (0x0301) or later.
    if raw[1] != 3 || raw[2] == 0 {
        return Err(PeekError::NotTls);
    }

    let record_len = u16::from_be_bytes([raw[3], raw[4]]) as usize;
    if record_len == 0 || record_len > MAX_RECORD_LEN {
        return Err(PeekError::Malformed("record length out of range"));
    }

    raw.resize(RECORD_HEADER_LEN + record_len, 0);
    read_full(stream, &mut raw[RECORD_HEADER_LEN..]).await?;
    Ok(raw)
}

async fn read_full<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<(), PeekError> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(PeekError::Truncated),
        Err(e) => Err(PeekError::Io(e)),
    }
}

/// Walk the record payload and return the lowercased host name.
fn parse_client_hello(payload: &[u8]) -> Result<String, PeekError> {
    let mut r = Reader::new(payload);

    if r.u8().ok_or(PeekError::Malformed("handshake header"))? != HANDSHAKE_CLIENT_HELLO {
        return Err(PeekError::Malformed("handshake is not a ClientHello"));
    }
    let handshake_len = r.u24().ok_or(PeekError::Malformed("handshake header"))?;
    if handshake_len != r.remaining() {
        return Err(PeekError::Malformed("handshake length mismatch"));
    }

    r.take(2 + 32).ok_or(PeekError::Malformed("version and random"))?;

    let session_id_len = r.u8().ok_or(PeekError::Malformed("session_id"))? as usize;
    r.take(session_id_len).ok_or(PeekError::Malformed("session_id"))?;

    let cipher_suites_len = r.u16().ok_or(PeekError::Malformed("cipher_suites"))? as usize;
    r.take(cipher_suites_len)
        .ok_or(PeekError::Malformed("cipher_suites"))?;

    let compression_len = r.u8().ok_or(PeekError::Malformed("compression_methods"))? as usize;
    r.take(compression_len)
        .ok_or(PeekError::Malformed("compression_methods"))?;

    if r.remaining() == 0 {
        // Extensions are optional; without them there is no SNI.
        return Err(PeekError::NoSni);
    }
    let extensions_len = r.u16().ok_or(PeekError::Malformed("extensions"))? as usize;
    if extensions_len != r.remaining() {
        return Err(PeekError::Malformed("extensions length mismatch"));
    }

    while r.remaining() > 0 {
        let ext_type = r.u16().ok_or(PeekError::Malformed("extension header"))?;
        let ext_len = r.u16().ok_or(PeekError::Malformed("extension header"))? as usize;
        let data = r.take(ext_len).ok_or(PeekError::Malformed("extension data"))?;
        if ext_type == EXT_SERVER_NAME {
            return parse_server_name(data);
        }
    }

    Err(PeekError::NoSni)
}

fn parse_server_name(data: &[u8]) -> Result<String, PeekError> {
    let mut r = Reader::new(data);
    let list_len = r.u16().ok_or(PeekError::Malformed("server_name list"))? as usize;
    let list = r.take(list_len).ok_or(PeekError::Malformed("server_name list"))?;

    let mut r = Reader::new(list);
    while r.remaining() > 0 {
        let name_type = r.u8().ok_or(PeekError::Malformed("server_name entry"))?;
        let name_len = r.u16().ok_or(PeekError::Malformed("server_name entry"))? as usize;
        let name = r.take(name_len).ok_or(PeekError::Malformed("server_name entry"))?;
        if name_type == NAME_TYPE_HOST {
            let host = std::str::from_utf8(name)
                .map_err(|_| PeekError::Malformed("server_name is not UTF-8"))?;
            return Ok(host.to_ascii_lowercase());
        }
    }

    Err(PeekError::NoSni)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}
