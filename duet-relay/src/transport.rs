//! Byte transport abstraction for the relay.
//!
//! The relay never looks at payloads. It pulls chunks from a [`ByteSource`]
//! and pushes them into a [`ByteSink`], one chunk at a time, so a slow sink
//! holds back the source.
//!
//! # Adapters
//!
//! - [`ReadSource`] wraps a tokio `AsyncRead`.
//! - [`StreamSource`] wraps a stream of `Bytes` results (an HTTP request body).
//! - [`ChannelSink`] feeds a bounded channel whose receiver becomes a
//!   streaming HTTP response body (through `tokio_stream`'s
//!   `ReceiverStream`); the channel capacity is the backpressure window.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Where relayed bytes come from.
#[async_trait]
pub trait ByteSource: Send {
    /// Next chunk, or `None` at end of stream.
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Where relayed bytes go.
#[async_trait]
pub trait ByteSink: Send {
    /// Write one chunk, waiting until the consumer has room for it.
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Signal end of stream.
    async fn finish(&mut self) -> io::Result<()>;
}

/// Boxed source as queued by the relay.
pub type BoxSource = Box<dyn ByteSource>;

/// Boxed sink as queued by the relay.
pub type BoxSink = Box<dyn ByteSink>;

/// Source over any tokio reader.
#[derive(Debug)]
pub struct ReadSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R> ReadSource<R> {
    /// Read at most `chunk_size` bytes per chunk.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl<R> ByteSource for ReadSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let n = self.reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }
}

/// Source over a stream of byte chunks, such as an HTTP request body.
pub struct StreamSource<St> {
    stream: St,
}

impl<St> StreamSource<St> {
    /// Wrap a stream.
    pub fn new(stream: St) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<St, E> ByteSource for StreamSource<St>
where
    St: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(io::Error::new(io::ErrorKind::Other, e)),
            None => Ok(None),
        }
    }
}

/// Item type carried by a [`ChannelSink`].
pub type ChunkResult = io::Result<Bytes>;

/// Sink feeding a bounded channel.
///
/// Writes wait while the channel is full. Dropping the sink (or calling
/// `finish`) ends the stream once every sender clone is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ChunkResult>,
}

impl ChannelSink {
    /// Create a sink with room for `capacity` chunks in flight.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChunkResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Push an error into the stream so the consumer sees a failed body
    /// instead of a clean end.
    pub async fn fail(&self, error: io::Error) {
        // Receiver gone means nobody is left to tell.
        let _ = self.tx.send(Err(error)).await;
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collect everything a [`ChannelSink`] receiver yields.
///
/// Stops at the first error.
pub async fn collect_channel(mut rx: mpsc::Receiver<ChunkResult>) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.extend_from_slice(&item?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_source_chunks_and_ends() {
        let mut source = ReadSource::new(&b"abcdefg"[..], 3);

        let mut collected = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            assert!(chunk.len() <= 3);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"abcdefg");
    }

    #[tokio::test]
    async fn stream_source_maps_errors_to_io() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut source = StreamSource::new(futures_util::stream::iter(items));

        assert_eq!(
            source.next_chunk().await.unwrap(),
            Some(Bytes::from_static(b"ok"))
        );
        assert!(source.next_chunk().await.is_err());
    }

    #[tokio::test]
    async fn channel_sink_applies_backpressure() {
        let (mut sink, mut rx) = ChannelSink::new(1);
        sink.write_chunk(Bytes::from_static(b"1")).await.unwrap();

        // Channel is full: the second write must wait for the reader
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            sink.write_chunk(Bytes::from_static(b"2")),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"1"));
        sink.write_chunk(Bytes::from_static(b"3")).await.unwrap();
    }

    #[tokio::test]
    async fn channel_sink_errors_when_receiver_dropped() {
        let (mut sink, rx) = ChannelSink::new(1);
        drop(rx);
        let err = sink
            .write_chunk(Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn fail_surfaces_as_stream_error() {
        let (mut sink, rx) = ChannelSink::new(4);
        let handle = sink.clone();
        sink.write_chunk(Bytes::from_static(b"part")).await.unwrap();
        drop(sink);
        handle
            .fail(io::Error::new(io::ErrorKind::Other, "timeout"))
            .await;
        drop(handle);

        assert!(collect_channel(rx).await.is_err());
    }

}
