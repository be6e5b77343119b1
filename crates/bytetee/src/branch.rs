#![forbid(unsafe_code)]

//! Branch definition and lifecycle.
//!
//! A [`Branch`] bundles the user's consumer closure, an optional error hook
//! and the branch's flow-control options. The crate-private [`BranchState`]
//! owns the running side: the pipe's write end, the spawned consumer task,
//! the remaining byte quota and the eventual result.

use std::{fmt, future::Future};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    buffer::{BranchReader, BranchWriter, WriteOutcome, branch_pipe},
    config::BranchOptions,
    error::{BoxedError, TeeError, TeeResult},
};

type ConsumerFn<R> =
    Box<dyn FnOnce(BranchReader, CancellationToken) -> BoxFuture<'static, Result<R, BoxedError>> + Send>;
type ErrorHook = Box<dyn FnOnce(&TeeError) + Send>;

/// One downstream consumer of the fanned-out byte stream.
///
/// The consumer closure receives the read end of the branch's pipe and the
/// call-wide cancellation token. Returning `Ok` completes the branch with a
/// result; returning `Err` fails the whole fan-out. Dropping the reader
/// before end-of-stream is a normal early exit, not an error.
pub struct Branch<R> {
    pub(crate) opts: BranchOptions,
    pub(crate) consumer: ConsumerFn<R>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl<R> Branch<R> {
    pub fn new<F, Fut>(consumer: F) -> Self
    where
        F: FnOnce(BranchReader, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, BoxedError>> + Send + 'static,
    {
        Self {
            opts: BranchOptions::default(),
            consumer: Box::new(move |reader, cancel| Box::pin(consumer(reader, cancel))),
            on_error: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, opts: BranchOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Hook invoked with the wrapped failure when the fan-out fails globally.
    #[must_use]
    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&TeeError) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }
}

impl<R> fmt::Debug for Branch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

/// Running state of one branch, owned by the coordinator.
pub(crate) struct BranchState<R> {
    index: usize,
    writer: BranchWriter,
    task: Option<JoinHandle<Result<R, BoxedError>>>,
    remaining: Option<u64>,
    on_error: Option<ErrorHook>,
    completed: bool,
    result: Option<R>,
}

impl<R: Send + 'static> BranchState<R> {
    /// Build the pipe and spawn the consumer task immediately, so the
    /// consumer is ready when the first bytes arrive.
    pub(crate) fn launch(index: usize, branch: Branch<R>, cancel: CancellationToken) -> Self {
        let (writer, reader) = branch_pipe(branch.opts.block_after, branch.opts.resume_after);
        let task = tokio::spawn((branch.consumer)(reader, cancel));
        debug!(index, opts = ?branch.opts, "branch consumer launched");
        Self {
            index,
            writer,
            task: Some(task),
            remaining: branch.opts.max_bytes,
            on_error: branch.on_error,
            completed: false,
            result: None,
        }
    }

    /// Deliver `chunk` to this branch.
    ///
    /// Returns `Ok(false)` when the branch wants no further bytes (already
    /// completed, consumer finished early, reader dropped, or quota spent);
    /// the coordinator then finalizes it with [`complete_ok`](Self::complete_ok).
    /// Returns `Err` when the consumer task turns out to have failed.
    pub(crate) async fn write(&mut self, chunk: &Bytes) -> TeeResult<bool> {
        if self.completed {
            return Ok(false);
        }

        // Harvest a finished task before writing: a fault must fan out, a
        // voluntary finish just ends this branch.
        if self.task.as_ref().is_some_and(JoinHandle::is_finished) {
            self.harvest().await?;
            return Ok(false);
        }

        let take = match self.remaining {
            Some(quota) => chunk
                .len()
                .min(usize::try_from(quota).unwrap_or(usize::MAX)),
            None => chunk.len(),
        };
        let clipped = if take == chunk.len() {
            chunk.clone()
        } else {
            chunk.slice(..take)
        };

        match self.writer.write(clipped).await {
            WriteOutcome::ReaderClosed => Ok(false),
            WriteOutcome::Accepted => {
                if let Some(quota) = &mut self.remaining {
                    *quota -= take as u64;
                    if *quota == 0 {
                        trace!(index = self.index, "branch quota spent");
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Finish the branch normally: close the write end, await the consumer
    /// and keep its result. Idempotent. A consumer error surfacing here
    /// propagates so the caller can fan it out.
    pub(crate) async fn complete_ok(&mut self) -> TeeResult<()> {
        if self.completed {
            return Ok(());
        }
        self.writer.close_ok();
        self.harvest().await?;
        self.completed = true;
        debug!(index = self.index, "branch completed");
        Ok(())
    }

    /// Finish the branch as part of a global failure: close the write end
    /// with the wrapped error so the consumer observes it on its next read,
    /// await the consumer, then fire the error hook. Never fails; a no-op on
    /// branches that already completed normally.
    pub(crate) async fn complete_err(&mut self, err: &TeeError) {
        if self.completed {
            return;
        }
        self.writer.close_err(err.clone());
        if let Err(secondary) = self.harvest().await {
            // Only the first failure defines the fan-out; later consumer
            // errors are dropped.
            warn!(index = self.index, err = %secondary, "branch consumer error during failure fan-out");
        }
        if let Some(hook) = self.on_error.take() {
            hook(err);
        }
        self.completed = true;
        debug!(index = self.index, "branch completed with error");
    }

    /// Await the consumer task, storing its result or returning its failure.
    async fn harvest(&mut self) -> TeeResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(Ok(result)) => {
                self.result = Some(result);
                Ok(())
            }
            Ok(Err(e)) => Err(TeeError::consumer(e)),
            Err(join_err) => Err(TeeError::consumer(Box::new(join_err))),
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn take_result(&mut self) -> Option<R> {
        self.result.take()
    }
}

impl<R> fmt::Debug for BranchState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchState")
            .field("index", &self.index)
            .field("remaining", &self.remaining)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::error::FailureKind;

    fn collector() -> Branch<Vec<u8>> {
        Branch::new(|mut reader, _cancel| async move {
            let data = reader.read_to_end().await?;
            Ok(data)
        })
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn complete_ok_is_idempotent() {
        let mut state = BranchState::launch(0, collector(), CancellationToken::new());

        assert!(state.write(&Bytes::from_static(b"data")).await.unwrap());
        state.complete_ok().await.unwrap();
        state.complete_ok().await.unwrap();

        assert_eq!(state.take_result().unwrap(), b"data");
        assert!(state.take_result().is_none());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn complete_err_after_ok_is_noop() {
        let hooked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let branch = collector().on_error({
            let hooked = hooked.clone();
            move |_err| hooked.store(true, std::sync::atomic::Ordering::SeqCst)
        });
        let mut state = BranchState::launch(0, branch, CancellationToken::new());

        state.complete_ok().await.unwrap();
        state
            .complete_err(&TeeError::consumer("late".to_string().into()))
            .await;

        assert!(!hooked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn quota_clips_the_written_chunk() {
        let branch = collector().with_options(BranchOptions {
            max_bytes: Some(4),
            ..BranchOptions::default()
        });
        let mut state = BranchState::launch(0, branch, CancellationToken::new());

        let can_keep = state.write(&Bytes::from_static(b"Test Value")).await.unwrap();
        assert!(!can_keep);
        state.complete_ok().await.unwrap();

        assert_eq!(state.take_result().unwrap(), b"Test");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn failing_consumer_surfaces_on_completion() {
        let branch: Branch<()> =
            Branch::new(|_reader, _cancel| async move { Err("consumer exploded".into()) });
        let mut state = BranchState::launch(0, branch, CancellationToken::new());

        let err = state.complete_ok().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Consumer);
        assert_eq!(err.cause().to_string(), "consumer exploded");
    }
}
