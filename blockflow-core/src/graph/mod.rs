//! Dataflow Graph
//!
//! This module implements the block tree and the machinery that decides when
//! block functions run.
//!
//! # Overview
//!
//! - A [`Block`] is a node holding named properties. Its `#is` property names
//!   a function from the registry; changes to the function's inputs mark the
//!   block dirty.
//! - A [`Job`] is a block that also owns a run loop, the priority queue dirty
//!   blocks wait in. Every block belongs to exactly one job.
//! - A [`Root`] is the top-level job. Its flushes are requested from a
//!   [`FlushScheduler`] supplied by the host.
//!
//! # Scheduling
//!
//! 1. A change to a function input enqueues the block in its job's queue at
//!    the block's priority. A block already queued is not queued twice.
//! 2. The first enqueue on an idle job requests a flush: from the host for the
//!    root, from the parent job for an attached job, from the hosting block
//!    for a nested job.
//! 3. A flush drains the queue, lowest priority number first and FIFO within
//!    a level, until it is empty. Runs that dirty other blocks extend the same
//!    drain.
//!
//! Snapshots (save/load) and watches are implemented as extra `impl Block`
//! blocks in their own files.

mod block;
mod job;
mod scheduler;
mod snapshot;
mod watch;

pub use block::{Block, BlockId, BlockMode, TypeState, WeakBlock};
pub use job::{Job, Root};
pub use scheduler::{FlushScheduler, LoopState, ManualFlush, TokioFlush};
pub use snapshot::Snapshot;
pub use watch::{ChangeSet, Watch};
