//! Exchange session: the one-shot identity exchange on a stream.
//!
//! The write half sends an [`IdentityRecord`] carrying the stream's own
//! identifier; the read half waits for the peer's record. The halves run
//! concurrently and fail independently: a broken writer never stops the
//! reader and vice versa. Once both are done the stream is closed.

use crate::message::{read_record, write_record, IdentityRecord};
use crate::peer::{PeerStream, StreamDirection};
use futures::io::{ReadHalf, WriteHalf};
use futures::{AsyncReadExt, AsyncWriteExt};
use libp2p::PeerId;
use tracing::{debug, info, warn};

/// Result of one exchange, reported when both halves finished.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Local identifier of the stream (the value we sent).
    pub stream_id: String,
    /// Remote peer.
    pub peer: PeerId,
    pub direction: StreamDirection,
    /// Write half result.
    pub sent: Result<(), String>,
    /// Read half result: the peer's record.
    pub received: Result<IdentityRecord, String>,
}

impl SessionOutcome {
    /// Both halves succeeded.
    pub fn is_complete(&self) -> bool {
        self.sent.is_ok() && self.received.is_ok()
    }
}

/// Owns a stream for the duration of one identity exchange.
pub struct ExchangeSession {
    stream: PeerStream,
}

impl ExchangeSession {
    pub fn new(stream: PeerStream) -> Self {
        Self { stream }
    }

    pub fn stream_id(&self) -> &str {
        self.stream.id()
    }

    pub fn peer(&self) -> PeerId {
        self.stream.peer()
    }

    pub fn direction(&self) -> StreamDirection {
        self.stream.direction()
    }

    /// Run both halves to completion, then close the stream.
    pub async fn run(self) -> SessionOutcome {
        let stream_id = self.stream.id().to_string();
        let peer = self.stream.peer();
        let direction = self.stream.direction();

        let (reader, writer) = self.stream.split();
        let ((writer, sent), (reader, received)) = tokio::join!(
            write_half(writer, &stream_id, peer),
            read_half(reader, &stream_id, peer),
        );

        if let Ok(mut stream) = reader.reunite(writer) {
            if let Err(e) = stream.close().await {
                debug!(peer = %peer, stream_id = %stream_id, error = %e, "Stream close failed");
            }
        }

        SessionOutcome {
            stream_id,
            peer,
            direction,
            sent,
            received,
        }
    }
}

async fn write_half(
    mut writer: WriteHalf<PeerStream>,
    stream_id: &str,
    peer: PeerId,
) -> (WriteHalf<PeerStream>, Result<(), String>) {
    let record = IdentityRecord::new(stream_id);
    let result = match write_record(&mut writer, &record).await {
        Ok(()) => {
            debug!(peer = %peer, stream_id = %stream_id, "Sent identity record");
            Ok(())
        }
        Err(e) => {
            warn!(peer = %peer, stream_id = %stream_id, error = %e, "Failed to send identity record");
            Err(e.to_string())
        }
    };
    (writer, result)
}

async fn read_half(
    mut reader: ReadHalf<PeerStream>,
    stream_id: &str,
    peer: PeerId,
) -> (ReadHalf<PeerStream>, Result<IdentityRecord, String>) {
    let result = match read_record(&mut reader).await {
        Ok(record) => {
            info!(peer = %peer, stream_id = %stream_id, record = %record, "Received identity record");
            Ok(record)
        }
        Err(e) => {
            warn!(peer = %peer, stream_id = %stream_id, error = %e, "Failed to read identity record");
            Err(e.to_string())
        }
    };
    (reader, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::encode_record;
    use crate::testing::{peer_stream, MemoryStream};
    use std::sync::atomic::Ordering;

    fn records_in(bytes: &[u8]) -> Vec<IdentityRecord> {
        serde_json::Deserializer::from_slice(bytes)
            .into_iter::<IdentityRecord>()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[tokio::test]
    async fn test_exchange_sends_stream_id_and_reads_remote() {
        let remote = IdentityRecord::new("remote-7");
        let io = MemoryStream::with_record(&remote);
        let written = io.written();
        let closed = io.closed_flag();
        let stream = peer_stream(PeerId::random(), StreamDirection::Inbound, io);
        let stream_id = stream.id().to_string();

        let outcome = ExchangeSession::new(stream).run().await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.stream_id, stream_id);
        assert_eq!(outcome.received.unwrap(), remote);
        assert_eq!(records_in(&written.lock().unwrap()), vec![IdentityRecord::new(stream_id)]);
        assert!(closed.load(Ordering::SeqCst), "stream should be closed after the exchange");
    }

    #[tokio::test]
    async fn test_broken_writer_does_not_stop_reader() {
        let remote = IdentityRecord::new("remote-1");
        let io = MemoryStream::with_record(&remote).broken_writes();
        let stream = peer_stream(PeerId::random(), StreamDirection::Outbound, io);

        let outcome = ExchangeSession::new(stream).run().await;

        assert!(outcome.sent.is_err());
        assert!(outcome.sent.unwrap_err().contains("broken stream"));
        assert_eq!(outcome.received.unwrap(), remote);
    }

    #[tokio::test]
    async fn test_closed_reader_does_not_stop_writer() {
        let io = MemoryStream::empty();
        let written = io.written();
        let stream = peer_stream(PeerId::random(), StreamDirection::Inbound, io);
        let stream_id = stream.id().to_string();

        let outcome = ExchangeSession::new(stream).run().await;

        assert!(outcome.sent.is_ok());
        assert_eq!(outcome.received.unwrap_err(), "Stream closed");
        assert_eq!(records_in(&written.lock().unwrap()), vec![IdentityRecord::new(stream_id)]);
    }

    #[tokio::test]
    async fn test_exactly_one_record_written_per_stream() {
        let io = MemoryStream::with_record(&IdentityRecord::new("x"));
        let written = io.written();
        let stream = peer_stream(PeerId::random(), StreamDirection::Outbound, io);
        let expected = encode_record(&IdentityRecord::new(stream.id())).unwrap();

        ExchangeSession::new(stream).run().await;

        assert_eq!(*written.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_two_streams_are_independent_exchanges() {
        let peer = PeerId::random();
        let io_a = MemoryStream::with_record(&IdentityRecord::new("ra"));
        let io_b = MemoryStream::with_record(&IdentityRecord::new("rb"));
        let (written_a, written_b) = (io_a.written(), io_b.written());
        let a = peer_stream(peer, StreamDirection::Inbound, io_a);
        let b = peer_stream(peer, StreamDirection::Inbound, io_b);

        let (out_a, out_b) = tokio::join!(
            ExchangeSession::new(a).run(),
            ExchangeSession::new(b).run()
        );

        assert_ne!(out_a.stream_id, out_b.stream_id);
        assert_eq!(out_a.received.unwrap().id, "ra");
        assert_eq!(out_b.received.unwrap().id, "rb");
        assert_eq!(
            records_in(&written_a.lock().unwrap()),
            vec![IdentityRecord::new(out_a.stream_id.clone())]
        );
        assert_eq!(
            records_in(&written_b.lock().unwrap()),
            vec![IdentityRecord::new(out_b.stream_id.clone())]
        );
    }
}
