//! Chunked pagination over storage queries.
//!
//! Large result sets (bulk stale-entry scans, entry listings) are streamed
//! in bounded chunks behind a single logical sequence, so the database is
//! never asked to materialize everything at once and write locks are not
//! held for the whole iteration.

use std::future::Future;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};

/// Streams items from a chunked query as one flat sequence.
///
/// `fetch_chunk(size, cursor)` returns up to `size` items, each paired
/// with its sort key; the key of the last item returned becomes the cursor
/// for the next call. Iteration stops when a chunk comes back shorter than
/// requested, or when `limit` items have been requested in total
/// (`limit = 0` means no limit).
///
/// `chunk_size = 0` disables chunking: a single call fetches everything,
/// trading memory and lock-hold time for fewer round trips.
///
/// The sequence is restartable: passing the key of the last item seen as
/// `start` resumes right after it.
pub fn paginate<T, C, E, F, Fut>(
    fetch_chunk: F,
    chunk_size: usize,
    start: Option<C>,
    limit: usize,
) -> impl Stream<Item = Result<T, E>>
where
    C: Clone,
    F: FnMut(usize, Option<C>) -> Fut,
    Fut: Future<Output = Result<Vec<(T, C)>, E>>,
{
    let state = PageState {
        fetch_chunk,
        cursor: start,
        chunk_size,
        remaining: limit,
        limited: limit != 0,
        done: false,
    };

    stream::try_unfold(state, |mut st| async move {
        if st.done {
            return Ok(None);
        }

        // chunk_size 0: one unbounded call, constrained only by the limit.
        if st.chunk_size == 0 {
            st.done = true;
            let size = if st.limited { st.remaining } else { 0 };
            let page = (st.fetch_chunk)(size, st.cursor.take()).await?;
            return Ok(Some((strip_keys(page), st)));
        }

        let to_get = if st.limited {
            if st.remaining == 0 {
                return Ok(None);
            }
            let to_get = st.remaining.min(st.chunk_size);
            st.remaining -= to_get;
            to_get
        } else {
            st.chunk_size
        };

        let page = (st.fetch_chunk)(to_get, st.cursor.clone()).await?;
        if page.is_empty() {
            return Ok(None);
        }
        if page.len() < to_get {
            st.done = true;
        }
        if let Some((_, key)) = page.last() {
            st.cursor = Some(key.clone());
        }

        Ok(Some((strip_keys(page), st)))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
}

struct PageState<F, C> {
    fetch_chunk: F,
    cursor: Option<C>,
    chunk_size: usize,
    remaining: usize,
    limited: bool,
    done: bool,
}

fn strip_keys<T, C>(page: Vec<(T, C)>) -> Vec<T> {
    page.into_iter().map(|(item, _)| item).collect()
}
