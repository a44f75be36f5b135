//! Bounded-concurrency scheduler for per-feed update work.
//!
//! An explicit task source + fixed-size in-flight set + completion-driven
//! refill loop: while the source has URLs and the in-flight set has
//! capacity, the next URL is submitted; whenever any task completes its
//! result is yielded immediately and one slot is refilled. Results are
//! therefore unordered with respect to submission.
//!
//! The produced stream is lazy. If the consumer stops pulling, no new
//! work is submitted; tasks already in flight are spawned on the
//! runtime and run to completion rather than being preempted, so a
//! half-finished feed update is never torn down mid-write.

use std::future::Future;

use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use tokio::task::JoinHandle;

/// Runs `worker` over `source` with at most `max_workers` tasks in
/// flight, yielding results as they complete.
pub(crate) fn map_unordered<I, T, F, Fut>(
    source: I,
    max_workers: usize,
    worker: F,
) -> impl Stream<Item = T>
where
    I: IntoIterator<Item = String>,
    F: Fn(String) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let max_workers = max_workers.max(1);
    let state = PoolState {
        source: source.into_iter(),
        in_flight: FuturesUnordered::new(),
        worker,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            while state.in_flight.len() < max_workers {
                match state.source.next() {
                    Some(url) => state.in_flight.push(tokio::spawn((state.worker)(url))),
                    None => break,
                }
            }

            match state.in_flight.next().await {
                Some(Ok(result)) => return Some((result, state)),
                Some(Err(err)) => {
                    // A worker panicking is a bug in the worker, not
                    // something to swallow; surface it on the consumer.
                    if err.is_panic() {
                        std::panic::resume_unwind(err.into_panic());
                    }
                    // Cancelled task (runtime shutdown): skip the slot.
                    continue;
                }
                None => return None,
            }
        }
    })
}

struct PoolState<I, F, T> {
    source: I,
    in_flight: FuturesUnordered<JoinHandle<T>>,
    worker: F,
}
