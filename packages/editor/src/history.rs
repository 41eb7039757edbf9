//! # History
//!
//! Undo/redo over serialized report snapshots.
//!
//! ## Design
//!
//! - A snapshot is taken at session start and after a quiet period following
//!   report changes
//! - A snapshot equal to the top of the undo stack is not pushed
//! - Both stacks are capped; the oldest entry is dropped
//! - Pushing a snapshot clears the redo stack
//! - After undo/redo the top of the stack mirrors the live document
//!
//! Undo and redo are mirror images, see [`History::step`].

use crate::debounce::Debounce;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct History {
    undo: Vec<String>,
    redo: Vec<String>,
    cap: usize,
    pending: Debounce<()>,
    suspended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Undo,
    Redo,
}

impl History {
    pub fn new(cap: usize, delay: Duration) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            cap: cap.max(1),
            pending: Debounce::new(delay),
            suspended: false,
        }
    }

    /// Drop everything and start over from `snapshot`
    pub fn reset(&mut self, snapshot: String) {
        self.undo.clear();
        self.redo.clear();
        self.pending.cancel();
        self.undo.push(snapshot);
    }

    /// Record a snapshot. Returns false when it equals the current top.
    pub fn push(&mut self, snapshot: String) -> bool {
        if self.undo.last() == Some(&snapshot) {
            return false;
        }
        push_capped(&mut self.undo, snapshot, self.cap);
        self.redo.clear();
        tracing::debug!(undo = self.undo.len(), "history snapshot");
        true
    }

    /// The report changed; snapshot once it has been quiet for the delay
    pub fn schedule(&mut self) {
        if !self.suspended {
            self.pending.schedule(());
        }
    }

    /// Whether a scheduled snapshot is due now
    pub fn take_due(&mut self, now: Instant) -> bool {
        self.pending.take_due(now).is_some()
    }

    /// Cancel the scheduled snapshot; true when one was pending
    pub fn flush(&mut self) -> bool {
        self.pending.cancel().is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.deadline()
    }

    /// Stop scheduling snapshots while the document is replaced
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.pending.cancel();
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Snapshot to load for an undo, or `None` when there is nothing to undo
    pub fn undo(&mut self, live: &str) -> Option<String> {
        self.step(Step::Undo, live)
    }

    /// Snapshot to load for a redo, or `None` when there is nothing to redo
    pub fn redo(&mut self, live: &str) -> Option<String> {
        self.step(Step::Redo, live)
    }

    /// Pop from one stack. An entry equal to `live` is the snapshot of the
    /// current state, so it moves to the other stack and the next entry is
    /// the target. Otherwise `live` itself moves to the other stack. The
    /// target is pushed back so the top keeps mirroring the live document.
    fn step(&mut self, step: Step, live: &str) -> Option<String> {
        let cap = self.cap;
        let (from, to) = match step {
            Step::Undo => (&mut self.undo, &mut self.redo),
            Step::Redo => (&mut self.redo, &mut self.undo),
        };

        let first = from.pop()?;
        let target = if first == live {
            match from.pop() {
                Some(target) => {
                    push_dedup(to, first, cap);
                    target
                }
                None => {
                    from.push(first);
                    return None;
                }
            }
        } else {
            push_dedup(to, live.to_string(), cap);
            first
        };

        from.push(target.clone());
        tracing::debug!(?step, undo = self.undo.len(), redo = self.redo.len(), "history step");
        Some(target)
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn can_undo(&self, live: &str) -> bool {
        match self.undo.as_slice() {
            [] => false,
            [only] => only != live,
            _ => true,
        }
    }

    pub fn can_redo(&self, live: &str) -> bool {
        match self.redo.as_slice() {
            [] => false,
            [only] => only != live,
            _ => true,
        }
    }
}

fn push_capped(stack: &mut Vec<String>, entry: String, cap: usize) {
    stack.push(entry);
    if stack.len() > cap {
        let excess = stack.len() - cap;
        stack.drain(..excess);
    }
}

fn push_dedup(stack: &mut Vec<String>, entry: String, cap: usize) {
    if stack.last() != Some(&entry) {
        push_capped(stack, entry, cap);
    }
}
