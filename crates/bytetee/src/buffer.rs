#![forbid(unsafe_code)]

//! Per-branch bounded byte pipe with high/low watermark flow control.
//!
//! Each branch gets exactly one pipe: the coordinator holds the write end,
//! the consumer task holds the read end. The producer is admitted while an
//! append stays at or below `block_after`; once an append would cross it, the
//! producer is held back until the reader drains the backlog to
//! `resume_after`. Bytes read are exactly the concatenation of bytes written.

use std::{collections::VecDeque, fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::TeeError;

/// Result of a producer-side write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// The chunk was appended; the producer may keep writing.
    Accepted,
    /// The read end is gone; the chunk was dropped and the producer must stop.
    ReaderClosed,
}

struct PipeState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    /// Set once by the first close; `Err` outranks queued data on read.
    done: Option<Result<(), TeeError>>,
    reader_gone: bool,
}

struct PipeShared {
    state: Mutex<PipeState>,
    /// Producer waits here for the backlog to drain.
    space: Notify,
    /// Reader waits here for data or close.
    data: Notify,
}

/// Create a pipe pair for one branch.
pub(crate) fn branch_pipe(block_after: usize, resume_after: usize) -> (BranchWriter, BranchReader) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            chunks: VecDeque::new(),
            buffered: 0,
            done: None,
            reader_gone: false,
        }),
        space: Notify::new(),
        data: Notify::new(),
    });
    (
        BranchWriter {
            shared: shared.clone(),
            block_after,
            resume_after,
        },
        BranchReader { shared },
    )
}

/// Producer end, held by the coordinator.
pub(crate) struct BranchWriter {
    shared: Arc<PipeShared>,
    block_after: usize,
    resume_after: usize,
}

impl BranchWriter {
    /// Append `chunk`, waiting out the watermark window if necessary.
    ///
    /// Admission rule: an append that keeps the backlog at or below
    /// `block_after` goes through immediately; otherwise the producer is
    /// paused and re-admitted only once the backlog has drained to
    /// `resume_after` (or the reader goes away).
    pub(crate) async fn write(&self, chunk: Bytes) -> WriteOutcome {
        let len = chunk.len();
        let mut paused = false;
        loop {
            // Register interest before checking state, so a drain that lands
            // in between cannot be missed.
            let drained = self.shared.space.notified();
            tokio::pin!(drained);
            {
                let mut st = self.shared.state.lock();
                if st.reader_gone {
                    return WriteOutcome::ReaderClosed;
                }
                let admit = if paused {
                    st.buffered <= self.resume_after
                } else {
                    st.buffered + len <= self.block_after
                };
                if admit {
                    st.buffered += len;
                    st.chunks.push_back(chunk);
                    drop(st);
                    self.shared.data.notify_one();
                    return WriteOutcome::Accepted;
                }
            }
            if !paused {
                paused = true;
                trace!(len, "append would cross high watermark; producer paused");
            }
            drained.await;
        }
    }

    /// Signal end-of-stream. First close wins; later closes are ignored.
    pub(crate) fn close_ok(&self) {
        let mut st = self.shared.state.lock();
        if st.done.is_none() {
            st.done = Some(Ok(()));
        }
        drop(st);
        self.shared.data.notify_waiters();
    }

    /// Signal end-of-stream carrying `err`. First close wins.
    pub(crate) fn close_err(&self, err: TeeError) {
        let mut st = self.shared.state.lock();
        if st.done.is_none() {
            st.done = Some(Err(err));
        }
        drop(st);
        self.shared.data.notify_waiters();
    }
}

impl fmt::Debug for BranchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchWriter")
            .field("block_after", &self.block_after)
            .field("resume_after", &self.resume_after)
            .finish_non_exhaustive()
    }
}

/// Read end of a branch pipe, handed to the consumer closure.
///
/// Dropping the reader tells the producer to stop sending; this is the
/// normal way for a consumer to quit early.
pub struct BranchReader {
    shared: Arc<PipeShared>,
}

impl BranchReader {
    /// Next sequential chunk.
    ///
    /// Returns `Ok(None)` once the write end closed cleanly and the backlog
    /// is drained. Returns `Err` as soon as the write end closed with a
    /// failure, even if undrained chunks remain queued.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TeeError> {
        loop {
            let incoming = self.shared.data.notified();
            tokio::pin!(incoming);
            {
                let mut st = self.shared.state.lock();
                if let Some(Err(e)) = &st.done {
                    return Err(e.clone());
                }
                if let Some(chunk) = st.chunks.pop_front() {
                    st.buffered -= chunk.len();
                    drop(st);
                    self.shared.space.notify_one();
                    return Ok(Some(chunk));
                }
                if matches!(st.done, Some(Ok(()))) {
                    return Ok(None);
                }
            }
            incoming.await;
        }
    }

    /// Drain the pipe into one contiguous buffer.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, TeeError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Bytes currently queued and unread.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffered
    }
}

impl Drop for BranchReader {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.reader_gone = true;
        st.chunks.clear();
        st.buffered = 0;
        drop(st);
        self.shared.space.notify_waiters();
    }
}

impl fmt::Debug for BranchReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchReader")
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}
