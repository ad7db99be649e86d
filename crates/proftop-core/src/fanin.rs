//! Completion-order fan-in.
//!
//! [`fan_in`] takes a batch of operations that run independently and yields
//! their outcomes in the order they settle, not the order they were handed
//! in. A consumer can start working on the fastest response while slower
//! ones are still in flight.
//!
//! Each outcome is yielded exactly once, tagged with the index of the
//! operation that produced it. A failed operation is just another outcome:
//! siblings keep running and iteration continues. Dropping the [`FanIn`]
//! before it is exhausted abandons whatever is still pending; for spawned
//! tasks that means detaching their `JoinHandle`s.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, FuturesUnordered, Stream, StreamExt};

/// The outcome of one operation, tagged with its input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled<T> {
    pub index: usize,
    pub output: T,
}

struct Tagged<F> {
    index: usize,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Tagged<F> {
    type Output = Settled<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        self.inner
            .as_mut()
            .poll(cx)
            .map(|output| Settled { index, output })
    }
}

/// Lazy, non-restartable stream of settled outcomes in completion order.
///
/// Built by [`fan_in`]. The pending set only ever shrinks; once every
/// operation has been yielded the stream keeps returning `None`.
#[must_use = "streams do nothing unless polled"]
pub struct FanIn<F> {
    pending: FuturesUnordered<Tagged<F>>,
    total: usize,
}

/// Race a batch of operations, yielding each outcome as it settles.
///
/// An empty batch produces a stream that ends immediately.
pub fn fan_in<I>(operations: I) -> FanIn<I::Item>
where
    I: IntoIterator,
    I::Item: Future,
{
    let pending: FuturesUnordered<_> = operations
        .into_iter()
        .enumerate()
        .map(|(index, op)| Tagged {
            index,
            inner: Box::pin(op),
        })
        .collect();
    let total = pending.len();
    FanIn { pending, total }
}

impl<F: Future> FanIn<F> {
    /// Number of operations handed in.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of operations that have not been yielded yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<F: Future> Stream for FanIn<F> {
    type Item = Settled<F::Output>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.pending.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.pending.len();
        (n, Some(n))
    }
}

impl<F: Future> FusedStream for FanIn<F> {
    fn is_terminated(&self) -> bool {
        self.pending.is_terminated()
    }
}
