#![forbid(unsafe_code)]

//! The read/fan-out coordinator and the public entry point.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    branch::{Branch, BranchState},
    config::{self, TeeOptions},
    error::{TeeError, TeeResult},
    source::ByteSource,
};

/// Read `source` exactly once and deliver the identical byte sequence to
/// every branch concurrently.
///
/// Consumer tasks are spawned before the first read, so they are ready when
/// bytes arrive, and are always awaited before this function returns. The
/// result vector is positionally aligned with `branches`; a slot is `None`
/// when that branch never produced a result (it failed, or the fan-out
/// failed before it finished).
///
/// # Errors
///
/// Invalid options are rejected up front with
/// [`FailureKind::InvalidConfig`](crate::FailureKind::InvalidConfig). At
/// runtime the first failure (source read, consumer fault, cancellation) is
/// wrapped once into a [`TeeError`] and fanned out to every branch; the call
/// then returns that error when `bubble_errors` is set, and the partial
/// results otherwise.
pub async fn tee<S, R>(
    mut source: S,
    opts: TeeOptions,
    branches: Vec<Branch<R>>,
) -> TeeResult<Vec<Option<R>>>
where
    S: ByteSource,
    R: Send + 'static,
{
    config::validate(&opts, branches.iter().map(|b| &b.opts))?;

    let mut states: Vec<BranchState<R>> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| BranchState::launch(index, branch, opts.cancel.clone()))
        .collect();

    match drive(&mut source, &opts, &mut states).await {
        Ok(()) => Ok(collect_results(&mut states)),
        Err(err) => {
            debug!(kind = ?err.kind(), %err, "fan-out failed; notifying every branch");
            for state in &mut states {
                state.complete_err(&err).await;
            }
            if opts.bubble_errors {
                Err(err)
            } else {
                Ok(collect_results(&mut states))
            }
        }
    }
}

/// The steady-state loop: fill, fan out to each live branch in declared
/// order, consume, repeat until the source ends or every branch is done.
async fn drive<S, R>(
    source: &mut S,
    opts: &TeeOptions,
    states: &mut [BranchState<R>],
) -> TeeResult<()>
where
    S: ByteSource,
    R: Send + 'static,
{
    let cancel = &opts.cancel;
    let min_fill = opts.min_fill.unwrap_or(1);
    let mut live = states.len();

    loop {
        let (chunk, exhausted) = tokio::select! {
            () = cancel.cancelled() => return Err(TeeError::cancelled()),
            filled = source.fill(min_fill) => {
                let view = filled.map_err(TeeError::source_failure)?;
                if view.bytes.is_empty() && view.exhausted {
                    break;
                }
                // Materialized once; branches share it by refcount.
                (Bytes::copy_from_slice(view.bytes), view.exhausted)
            }
        };
        trace!(len = chunk.len(), exhausted, "forwarding run to branches");

        for state in states.iter_mut() {
            if state.is_completed() {
                continue;
            }
            let can_keep = tokio::select! {
                () = cancel.cancelled() => return Err(TeeError::cancelled()),
                res = state.write(&chunk) => res?,
            };
            if !can_keep {
                state.complete_ok().await?;
                live -= 1;
            }
        }

        if live == 0 {
            debug!("every branch completed; stopping source reads early");
            break;
        }

        source.consume(chunk.len());
    }

    for state in states.iter_mut() {
        if !state.is_completed() {
            state.complete_ok().await?;
        }
    }
    Ok(())
}

fn collect_results<R: Send + 'static>(states: &mut [BranchState<R>]) -> Vec<Option<R>> {
    states.iter_mut().map(BranchState::take_result).collect()
}
