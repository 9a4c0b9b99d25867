//! The identity record exchanged on every stream.
//!
//! A record travels as a single JSON object with no extra framing: the reader
//! accumulates bytes until they hold one complete value. Exactly one record is
//! written and one is read per stream direction.

use crate::error::WireError;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum encoded record size (64 KB).
pub const MAX_RECORD_SIZE: u32 = 64 * 1024;

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 512;

/// The one application message: the sender's identifier for the stream it
/// was written on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Stream identifier on the sending side.
    pub id: String,
}

impl IdentityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.id)
    }
}

/// Encode a record as JSON.
pub fn encode_record(record: &IdentityRecord) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

/// Decode the first JSON value in `buf`.
///
/// Returns `Ok(None)` while `buf` holds only whitespace or an incomplete
/// value. Bytes after the first value are ignored.
pub fn decode_record(buf: &[u8]) -> Result<Option<IdentityRecord>, serde_json::Error> {
    match serde_json::Deserializer::from_slice(buf)
        .into_iter::<IdentityRecord>()
        .next()
    {
        None => Ok(None),
        Some(Ok(record)) => Ok(Some(record)),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(e),
    }
}

/// Write one record with a single write call.
pub async fn write_record<W>(writer: &mut W, record: &IdentityRecord) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_record(record)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one record, waiting until it arrives or the stream ends.
///
/// Reads in chunks, so bytes the peer sent after the record are consumed and
/// dropped. The protocol never sends more than one record per direction.
pub async fn read_record<R>(reader: &mut R) -> Result<IdentityRecord, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.iter().all(u8::is_ascii_whitespace) {
                return Err(WireError::StreamClosed);
            }
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a record",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(record) = decode_record(&buf)? {
            return Ok(record);
        }
        if buf.len() > MAX_RECORD_SIZE as usize {
            return Err(WireError::RecordTooLarge {
                size: u32::try_from(buf.len()).unwrap_or(u32::MAX),
                max: MAX_RECORD_SIZE,
            });
        }
    }
}
