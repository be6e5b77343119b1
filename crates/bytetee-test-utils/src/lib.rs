//! In-memory byte sources for exercising the fan-out coordinator.

#![forbid(unsafe_code)]

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use bytetee::{ByteSource, SourceView};
use tokio::sync::Semaphore;

/// Error type for scripted sources.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ScriptedError(pub String);

/// Source whose whole payload is available immediately.
pub struct MemorySource {
    data: Bytes,
    pos: usize,
}

impl MemorySource {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    /// Bytes not yet handed out via `consume`.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    type Error = ScriptedError;

    async fn fill(&mut self, _min: usize) -> Result<SourceView<'_>, Self::Error> {
        Ok(SourceView {
            bytes: &self.data[self.pos..],
            exhausted: true,
        })
    }

    fn consume(&mut self, n: usize) {
        assert!(self.pos + n <= self.data.len(), "consumed past the view");
        self.pos += n;
    }
}

/// Hand-operated release valve for a gated [`ScriptedSource`].
///
/// Each released permit lets the source reveal one more scheduled chunk. A
/// `fill` call that needs an unreleased chunk parks until the test releases
/// it, which pins the caller at a known suspension point without timing
/// games.
pub struct SourceGate {
    sem: Arc<Semaphore>,
}

impl SourceGate {
    /// Allow the source to reveal `chunks` more scheduled chunks.
    pub fn release(&self, chunks: usize) {
        self.sem.add_permits(chunks);
    }
}

/// Source that reveals a predetermined chunk schedule.
///
/// Each `fill` uncovers only as many scheduled chunks as the requested
/// minimum demands, so tests can observe how the caller coalesces small
/// arrivals. An optional trailing failure replaces end-of-stream, and
/// [`gated`](Self::gated) puts every chunk behind an explicit release.
pub struct ScriptedSource {
    script: VecDeque<Result<Bytes, ScriptedError>>,
    buf: BytesMut,
    exhausted: bool,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        Self {
            script: chunks.into_iter().map(|c| Ok(c.into())).collect(),
            buf: BytesMut::new(),
            exhausted: false,
            gate: None,
        }
    }

    /// Like [`new`](Self::new), but the source fails with `message` after
    /// yielding every chunk instead of completing.
    #[must_use]
    pub fn failing_after<I>(chunks: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let mut source = Self::new(chunks);
        source
            .script
            .push_back(Err(ScriptedError(message.into())));
        source
    }

    /// Put every scheduled chunk behind the returned gate.
    ///
    /// The source starts with no permits: `fill` parks before revealing each
    /// chunk until [`SourceGate::release`] grants one. A chunk that is never
    /// released stalls the source indefinitely.
    #[must_use]
    pub fn gated(mut self) -> (Self, SourceGate) {
        let sem = Arc::new(Semaphore::new(0));
        self.gate = Some(sem.clone());
        (self, SourceGate { sem })
    }

    /// Scheduled chunks not yet revealed by `fill`.
    #[must_use]
    pub fn unrevealed(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl ByteSource for ScriptedSource {
    type Error = ScriptedError;

    async fn fill(&mut self, min: usize) -> Result<SourceView<'_>, Self::Error> {
        let min = min.max(1);
        while !self.exhausted && self.buf.len() < min {
            if let Some(gate) = &self.gate {
                if !self.script.is_empty() {
                    gate.acquire()
                        .await
                        .expect("gate semaphore is never closed")
                        .forget();
                }
            }
            match self.script.pop_front() {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
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
