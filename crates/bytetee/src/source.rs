#![forbid(unsafe_code)]

//! Source-side read contract and the two stock adapters.
//!
//! The coordinator reads upstream bytes through [`ByteSource`], a
//! fill-and-consume contract in the shape of [`std::io::BufRead`]: bytes stay
//! buffered inside the source until explicitly consumed, so the coordinator
//! can inspect a run, hand it to every branch, and only then discard it.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

/// How much to request from the underlying reader per read call.
const READ_CHUNK: usize = 8 * 1024;

/// View of a source's unconsumed bytes.
#[derive(Debug)]
pub struct SourceView<'a> {
    /// All bytes buffered and not yet consumed, oldest first.
    pub bytes: &'a [u8],
    /// True once the upstream has ended; no further bytes will ever arrive
    /// beyond the ones in `bytes`.
    pub exhausted: bool,
}

/// Async pull contract for the upstream byte source.
///
/// Normative:
/// - `fill(min)` waits until at least `min` unconsumed bytes are buffered OR
///   the source is exhausted, then returns the whole unconsumed run without
///   copying. A view shorter than `min` therefore implies `exhausted`.
/// - Bytes remain buffered across calls: a repeated `fill` returns at least
///   the same prefix, plus anything that arrived in between.
/// - `consume(n)` discards the first `n` unconsumed bytes. Only consumed
///   bytes are gone; everything else must be returned again.
/// - `fill(0)` behaves like `fill(1)`: wait for any byte or the end.
#[async_trait]
pub trait ByteSource: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn fill(&mut self, min: usize) -> Result<SourceView<'_>, Self::Error>;

    /// Discard the first `n` unconsumed bytes.
    ///
    /// # Panics
    ///
    /// May panic if `n` exceeds the length of the last returned view.
    fn consume(&mut self, n: usize);
}

#[async_trait]
impl<S: ByteSource> ByteSource for &mut S {
    type Error = S::Error;

    async fn fill(&mut self, min: usize) -> Result<SourceView<'_>, Self::Error> {
        (**self).fill(min).await
    }

    fn consume(&mut self, n: usize) {
        (**self).consume(n);
    }
}

/// [`ByteSource`] over any [`AsyncRead`].
///
/// Accumulates reads in an internal buffer until the requested minimum is
/// reached. Passing the reader by value drops (and thereby closes) it on
/// teardown; to keep it alive, pass `&mut reader` instead and reclaim it
/// afterwards, or call [`into_inner`](Self::into_inner).
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    buf: BytesMut,
    exhausted: bool,
}

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Hand the underlying reader back.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R> ByteSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    type Error = std::io::Error;

    async fn fill(&mut self, min: usize) -> Result<SourceView<'_>, Self::Error> {
        let min = min.max(1);
        while !self.exhausted && self.buf.len() < min {
            self.buf.reserve(READ_CHUNK);
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                trace!(buffered = self.buf.len(), "reader source reached EOF");
                self.exhausted = true;
            }
        }
        Ok(SourceView {
            bytes: &self.buf,
            exhausted: self.exhausted,
        })
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

/// [`ByteSource`] over a stream of byte chunks.
///
/// This is the adapter for sources that already arrive chunked, e.g. a
/// network body exposed as `Stream<Item = Result<Bytes, E>>`. Empty chunks
/// are tolerated and skipped.
#[derive(Debug)]
pub struct ChunkStreamSource<St> {
    stream: St,
    buf: BytesMut,
    exhausted: bool,
}

impl<St> ChunkStreamSource<St> {
    pub fn new(stream: St) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            exhausted: false,
        }
    }
}

#[async_trait]
impl<St, E> ByteSource for ChunkStreamSource<St>
where
    St: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    async fn fill(&mut self, min: usize) -> Result<SourceView<'_>, Self::Error> {
        let min = min.max(1);
        while !self.exhausted && self.buf.len() < min {
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        warn!("chunk stream yielded an empty chunk");
                        continue;
                    }
                    self.buf.extend_from_slice(&chunk);
                }
                Some(Err(e)) => return Err(e),
                None => self.exhausted = true,
            }
        }
        Ok(SourceView {
            bytes: &self.buf,
            exhausted: self.exhausted,
        })
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use rstest::rstest;
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("chunk error")]
    struct ChunkError;

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn reader_source_accumulates_to_minimum() {
        let data: &[u8] = b"abcdefgh";
        let mut src = ReaderSource::new(data);

        let view = src.fill(4).await.unwrap();
        assert!(view.bytes.len() >= 4);
        assert_eq!(&view.bytes[..4], b"abcd");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn reader_source_reports_exhaustion_with_leftover() {
        let data: &[u8] = b"abc";
        let mut src = ReaderSource::new(data);

        let view = src.fill(10).await.unwrap();
        assert_eq!(view.bytes, b"abc");
        assert!(view.exhausted);

        src.consume(3);
        let view = src.fill(1).await.unwrap();
        assert!(view.bytes.is_empty());
        assert!(view.exhausted);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn repeated_fill_returns_same_prefix() {
        let data: &[u8] = b"hello world";
        let mut src = ReaderSource::new(data);

        let first = src.fill(5).await.unwrap().bytes.to_vec();
        let second = src.fill(5).await.unwrap().bytes.to_vec();
        assert_eq!(second[..first.len()], first[..]);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn chunk_stream_source_coalesces_chunks() {
        let chunks: Vec<Result<Bytes, ChunkError>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
            Ok(Bytes::from_static(b"ef")),
        ];
        let mut src = ChunkStreamSource::new(stream::iter(chunks));

        let view = src.fill(4).await.unwrap();
        assert_eq!(&view.bytes[..4], b"abcd");
        assert!(!view.exhausted);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn chunk_stream_source_skips_empty_chunks() {
        let chunks: Vec<Result<Bytes, ChunkError>> = vec![
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"xy")),
        ];
        let mut src = ChunkStreamSource::new(stream::iter(chunks));

        let view = src.fill(2).await.unwrap();
        assert_eq!(view.bytes, b"xy");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn chunk_stream_source_surfaces_stream_error() {
        let chunks: Vec<Result<Bytes, ChunkError>> =
            vec![Ok(Bytes::from_static(b"ab")), Err(ChunkError)];
        let mut src = ChunkStreamSource::new(stream::iter(chunks));

        let err = src.fill(4).await.unwrap_err();
        assert_eq!(err.to_string(), "chunk error");
    }
}
