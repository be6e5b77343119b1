#![forbid(unsafe_code)]

//! Options for the fan-out call and for individual branches.

use tokio_util::sync::CancellationToken;

use crate::error::{TeeError, TeeResult};

/// Default minimum run size forwarded mid-stream.
pub const DEFAULT_MIN_FILL: usize = 4096;
/// Default per-branch high watermark.
pub const DEFAULT_BLOCK_AFTER: usize = 32 * 1024;
/// Default per-branch low watermark.
pub const DEFAULT_RESUME_AFTER: usize = 16 * 1024;

/// Call-wide options.
#[derive(Debug, Clone)]
pub struct TeeOptions {
    /// Minimum number of bytes to accumulate before forwarding a run to the
    /// branches. Only the final run before the source ends may be shorter.
    /// `None` disables coalescing: runs are forwarded as soon as any byte
    /// exists.
    pub min_fill: Option<usize>,
    /// When true, the call returns the wrapped failure; when false, it
    /// returns whatever partial results the branches produced.
    pub bubble_errors: bool,
    /// Passed unchanged to every consumer and honored by the coordinator's
    /// own waits.
    pub cancel: CancellationToken,
}

impl Default for TeeOptions {
    fn default() -> Self {
        Self {
            min_fill: Some(DEFAULT_MIN_FILL),
            bubble_errors: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Per-branch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchOptions {
    /// High watermark: an append that would push the branch backlog past
    /// this pauses the producer for this branch.
    pub block_after: usize,
    /// Low watermark: a paused producer resumes once the backlog drains to
    /// this. Must not exceed `block_after`.
    pub resume_after: usize,
    /// Per-branch byte quota; reaching it completes the branch normally.
    /// `None` is unlimited.
    pub max_bytes: Option<u64>,
}

impl Default for BranchOptions {
    fn default() -> Self {
        Self {
            block_after: DEFAULT_BLOCK_AFTER,
            resume_after: DEFAULT_RESUME_AFTER,
            max_bytes: None,
        }
    }
}

/// Reject invalid configuration before any consumer task is spawned.
pub(crate) fn validate<'a, I>(opts: &TeeOptions, branch_opts: I) -> TeeResult<()>
where
    I: ExactSizeIterator<Item = &'a BranchOptions>,
{
    if branch_opts.len() == 0 {
        return Err(TeeError::invalid_config("at least one branch is required"));
    }
    if opts.min_fill == Some(0) {
        return Err(TeeError::invalid_config(
            "min_fill must be positive when set",
        ));
    }
    for (index, branch) in branch_opts.enumerate() {
        if branch.block_after == 0 {
            return Err(TeeError::invalid_config(format!(
                "branch {index}: block_after must be positive"
            )));
        }
        if branch.resume_after > branch.block_after {
            return Err(TeeError::invalid_config(format!(
                "branch {index}: resume_after {} exceeds block_after {}",
                branch.resume_after, branch.block_after
            )));
        }
        if branch.max_bytes == Some(0) {
            return Err(TeeError::invalid_config(format!(
                "branch {index}: max_bytes must be positive when set"
            )));
        }
    }
    Ok(())
}
