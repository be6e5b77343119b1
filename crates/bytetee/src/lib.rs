//! `bytetee`
//!
//! Single-producer byte fan-out: read an upstream source exactly once and
//! deliver the identical byte sequence to N independent consumers, each
//! processing at its own pace behind its own bounded buffer.
//!
//! ## Design goals
//! - One coordinator task reads; one spawned task per branch consumes. The
//!   whole source is never buffered: in-flight bytes are bounded by the sum
//!   of the branches' high watermarks.
//! - Each source run is materialized once as [`bytes::Bytes`] and shared
//!   across branches by refcount.
//! - A branch may stop early (byte quota, voluntary exit) without stalling
//!   its siblings.
//! - A failure anywhere is wrapped once into [`TeeError`] and surfaced to
//!   every other branch through its own reader handle, so peer consumers get
//!   a chance to observe it before shutdown.
//! - Sources plug in through the minimal [`ByteSource`] fill-and-consume
//!   contract; adapters exist for [`tokio::io::AsyncRead`] and for streams
//!   of byte chunks.

#![forbid(unsafe_code)]

mod branch;
mod buffer;
mod config;
mod error;
mod fanout;
mod source;

pub use branch::Branch;
pub use buffer::BranchReader;
pub use config::{
    BranchOptions, DEFAULT_BLOCK_AFTER, DEFAULT_MIN_FILL, DEFAULT_RESUME_AFTER, TeeOptions,
};
pub use error::{BoxedError, FailureKind, Interrupted, TeeError, TeeResult};
pub use fanout::tee;
pub use source::{ByteSource, ChunkStreamSource, ReaderSource, SourceView};
