//! Run Loop
//!
//! The loop is the queue a job keeps its dirty blocks in, plus the state
//! machine that decides when the queue gets drained.
//!
//! # Algorithm
//!
//! 1. A dirty block is pushed onto the level matching its priority (0..=3).
//!    A block already waiting in the queue is not pushed again.
//! 2. The first push on an `Idle` loop moves it to `Queued` and requests a
//!    flush through the loop's trigger. Further pushes in the same burst
//!    only append.
//! 3. The flush moves the loop to `Running` and pops blocks, always from the
//!    lowest non-empty level, FIFO within a level. A block dirtied during the
//!    drain is appended to the same drain.
//! 4. When every level is empty the loop returns to `Idle`.
//!
//! The drain itself lives on [`Job`](super::Job); this module only holds the
//! queue, the state and the trigger.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::PRIORITY_LEVELS;

use super::block::{Block, WeakBlock};

/// Where a loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Nothing queued, no flush requested.
    Idle,
    /// Blocks are queued and a flush has been requested.
    Queued,
    /// The queue is being drained.
    Running,
}

/// Host hook that runs deferred flushes for a root job.
///
/// The flush must run later, never inside `schedule`, so that a burst of
/// synchronous writes coalesces into a single drain.
pub trait FlushScheduler {
    fn schedule(&self, flush: Box<dyn FnOnce()>);
}

/// Collects flushes until the host runs them.
///
/// Useful for tests and for hosts that step the graph explicitly.
#[derive(Default)]
pub struct ManualFlush {
    pending: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl ManualFlush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flushes waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Run waiting flushes, including ones requested while running.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some(flush) => {
                    flush();
                    count += 1;
                }
                None => return count,
            }
        }
    }
}

impl FlushScheduler for ManualFlush {
    fn schedule(&self, flush: Box<dyn FnOnce()>) {
        self.pending.borrow_mut().push_back(flush);
    }
}

/// Runs each flush as a local task on the next tick of the current
/// [`tokio::task::LocalSet`].
///
/// Scheduling outside a `LocalSet` panics, as `spawn_local` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFlush;

impl FlushScheduler for TokioFlush {
    fn schedule(&self, flush: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move {
            flush();
        });
    }
}

/// Who to ask when an idle loop gets its first block.
pub(crate) enum FlushTrigger {
    /// Root job: defer to the host.
    Host(Rc<dyn FlushScheduler>),
    /// Job attached under another job: enqueue in that job.
    Parent(WeakBlock),
    /// Job owned by a nested-job function: re-run the hosting block.
    HostBlock(WeakBlock),
}

/// A job's priority queue and state.
pub(crate) struct Loop {
    queues: RefCell<[VecDeque<Block>; PRIORITY_LEVELS]>,
    state: Cell<LoopState>,
    trigger: FlushTrigger,
}

impl Loop {
    pub(crate) fn new(trigger: FlushTrigger) -> Self {
        Self {
            queues: RefCell::new(Default::default()),
            state: Cell::new(LoopState::Idle),
            trigger,
        }
    }

    pub(crate) fn state(&self) -> LoopState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.state.set(state);
    }

    pub(crate) fn trigger(&self) -> &FlushTrigger {
        &self.trigger
    }

    pub(crate) fn push(&self, block: Block, priority: u8) {
        let level = usize::from(priority).min(PRIORITY_LEVELS - 1);
        self.queues.borrow_mut()[level].push_back(block);
    }

    /// Next block to run, clearing its queued flag.
    pub(crate) fn pop(&self) -> Option<Block> {
        let block = self
            .queues
            .borrow_mut()
            .iter_mut()
            .find_map(VecDeque::pop_front)?;
        block.set_queued(false);
        Some(block)
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.borrow().iter().map(VecDeque::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queues.borrow().iter().all(VecDeque::is_empty)
    }

    /// Drop everything queued.
    pub(crate) fn clear(&self) {
        let dropped: Vec<Block> = self
            .queues
            .borrow_mut()
            .iter_mut()
            .flat_map(|queue| queue.drain(..))
            .collect();
        for block in dropped {
            block.set_queued(false);
        }
    }
}
