//! Contexts waiting for their next attempt.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::context::FileContext;

struct Scheduled {
    due: Instant,
    seq: u64,
    ctx: FileContext,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Due-time ordered queue. Entries with equal due times leave in insertion order.
#[derive(Default)]
pub struct RetryQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryQueue")
            .field("len", &self.heap.len())
            .field("next_due", &self.next_due())
            .finish()
    }
}

impl RetryQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `ctx` to run at `due`.
    pub fn push(&mut self, due: Instant, ctx: FileContext) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled { due, seq, ctx }));
    }

    /// Remove the earliest context whose due time is not after `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<FileContext> {
        if self.heap.peek().is_some_and(|Reverse(next)| next.due <= now) {
            self.heap.pop().map(|Reverse(entry)| entry.ctx)
        } else {
            None
        }
    }

    /// Earliest due time.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(next)| next.due)
    }

    /// Number of waiting contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every waiting context.
    pub fn drain(&mut self) -> Vec<FileContext> {
        let mut drained: Vec<_> = self.heap.drain().map(|Reverse(entry)| entry).collect();
        drained.sort();
        drained.into_iter().map(|entry| entry.ctx).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn contexts_leave_in_due_order() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let env = fixture.env(&[fixture.folder(false, false)])?;
        let now = Instant::now();
        let mut queue = RetryQueue::new();
        queue.push(now + Duration::from_secs(5), fixture.discover(&env, "late.txt", "a")?);
        queue.push(now, fixture.discover(&env, "first.txt", "b")?);
        queue.push(now, fixture.discover(&env, "second.txt", "c")?);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_due(), Some(now));
        let first = queue.pop_due(now).map(|ctx| ctx.original_file().to_path_buf());
        let second = queue.pop_due(now).map(|ctx| ctx.original_file().to_path_buf());
        assert_eq!(first, Some(fixture.input.join("first.txt")));
        assert_eq!(second, Some(fixture.input.join("second.txt")));
        assert!(queue.pop_due(now).is_none());
        assert_eq!(queue.len(), 1);

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
        Ok(())
    }
}
