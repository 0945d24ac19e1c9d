//! Drain-until-empty page sequence.
//!
//! [`drain_pages`] turns a page-fetch function into a finite stream of
//! [`DrainStep`]s. The stream keeps fetching while pages come back non-empty
//! and ends after the first empty page, the first error, or when one of the
//! optional [`DrainLimits`] is hit. A short page never ends it: SQS may return
//! fewer messages than requested while more are still waiting.
//!
//! [`collect_batch`] folds the stream into a [`Batch`].

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::time::Instant;
use tracing::debug;

use crate::batch::{Batch, DrainStop};
use crate::client::{QueueClient, QueueMessage};
use crate::error::{BatchError, QueueError};

/// Bounds for a single drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainLimits {
    /// Messages requested per fetch.
    pub page_size: u32,
    /// Stop once this many messages are drained. `None` drains the whole backlog.
    pub max_messages: Option<usize>,
    /// Stop fetching once this much time has passed. Checked before each
    /// fetch, so the last fetch may run past it.
    pub max_duration: Option<Duration>,
}

impl DrainLimits {
    pub fn unbounded(page_size: u32) -> Self {
        Self {
            page_size,
            max_messages: None,
            max_duration: None,
        }
    }
}

/// One element of the drain sequence.
#[derive(Debug)]
pub enum DrainStep {
    /// A non-empty page, in fetch order.
    Page(Vec<QueueMessage>),
    /// The sequence is finished.
    Done(DrainStop),
}

struct DrainState<F> {
    fetch: F,
    limits: DrainLimits,
    fetched: usize,
    started: Instant,
    finished: bool,
}

impl<F> DrainState<F> {
    fn limit_reached(&self) -> Option<DrainStop> {
        if let Some(max) = self.limits.max_messages {
            if self.fetched >= max {
                return Some(DrainStop::MaxMessages);
            }
        }
        if let Some(max) = self.limits.max_duration {
            if self.started.elapsed() >= max {
                return Some(DrainStop::MaxDuration);
            }
        }
        None
    }

    /// Page request size, shrunk so a capped drain never over-fetches.
    fn next_request(&self) -> u32 {
        match self.limits.max_messages {
            Some(max) => {
                let remaining = max.saturating_sub(self.fetched);
                self.limits.page_size.min(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            None => self.limits.page_size,
        }
    }
}

/// Build the drain sequence over an injected page-fetch function.
///
/// Each call of `fetch` receives the number of messages to request. The
/// returned stream is finite and yields exactly one terminal item: either
/// `Ok(DrainStep::Done(_))` or an `Err`.
pub fn drain_pages<F, Fut>(
    fetch: F,
    limits: DrainLimits,
) -> impl Stream<Item = Result<DrainStep, QueueError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<QueueMessage>, QueueError>>,
{
    let state = DrainState {
        fetch,
        limits,
        fetched: 0,
        started: Instant::now(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if let Some(stop) = state.limit_reached() {
            state.finished = true;
            return Some((Ok(DrainStep::Done(stop)), state));
        }

        let request = state.next_request();
        match (state.fetch)(request).await {
            Ok(page) if page.is_empty() => {
                state.finished = true;
                Some((Ok(DrainStep::Done(DrainStop::EmptyPage)), state))
            }
            Ok(page) => {
                state.fetched += page.len();
                debug!(page = page.len(), drained = state.fetched, "Drained page");
                Some((Ok(DrainStep::Page(page)), state))
            }
            Err(e) => {
                state.finished = true;
                Some((Err(e), state))
            }
        }
    })
}

/// Fold a drain sequence into a [`Batch`].
///
/// On a fetch error the partial batch is dropped: none of it has been
/// processed, so none of it may be deleted.
pub async fn collect_batch<S>(pages: S) -> Result<Batch, BatchError>
where
    S: Stream<Item = Result<DrainStep, QueueError>>,
{
    futures::pin_mut!(pages);

    let mut batch = Batch::new();
    while let Some(step) = pages.next().await {
        match step {
            Ok(DrainStep::Page(page)) => batch.push(page),
            Ok(DrainStep::Done(stop)) => {
                batch.set_stop(stop);
                break;
            }
            Err(source) => {
                return Err(BatchError::Fetch {
                    fetched: batch.len(),
                    source,
                });
            }
        }
    }
    Ok(batch)
}

/// Drain `client` into a batch.
pub async fn drain<Q>(client: &Q, limits: DrainLimits) -> Result<Batch, BatchError>
where
    Q: QueueClient + ?Sized,
{
    collect_batch(drain_pages(move |n| client.poll_batch(n), limits)).await
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::batch::tests::make_page;

    /// Fetch function replaying scripted page sizes, then empty pages forever.
    /// Records every requested size.
    fn scripted<'a>(
        sizes: &[usize],
        requests: &'a RefCell<Vec<u32>>,
    ) -> impl FnMut(u32) -> futures::future::Ready<Result<Vec<QueueMessage>, QueueError>> + 'a {
        let mut pages: VecDeque<Vec<QueueMessage>> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| make_page(&format!("p{i}"), *n))
            .collect();
        move |n| {
            requests.borrow_mut().push(n);
            futures::future::ready(Ok(pages.pop_front().unwrap_or_default()))
        }
    }

    fn ids(batch: &Batch) -> Vec<String> {
        batch.iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_batch_is_concatenation_of_pages() {
        let scripts: &[&[usize]] = &[&[10, 10, 10], &[1], &[3, 10, 1, 7], &[10; 12]];
        for sizes in scripts {
            let requests = RefCell::new(Vec::new());
            let batch = collect_batch(drain_pages(scripted(sizes, &requests), DrainLimits::unbounded(10)))
                .await
                .unwrap();

            let expected: Vec<String> = sizes
                .iter()
                .enumerate()
                .flat_map(|(i, n)| (0..*n).map(move |j| format!("p{i}-{j}")))
                .collect();
            assert_eq!(ids(&batch), expected);
            assert_eq!(batch.pages(), sizes.len());
            assert_eq!(batch.stop(), DrainStop::EmptyPage);
            // One fetch per page plus the terminating empty one.
            assert_eq!(requests.borrow().len(), sizes.len() + 1);
        }
    }

    #[tokio::test]
    async fn test_short_page_does_not_end_drain() {
        let requests = RefCell::new(Vec::new());
        let batch = collect_batch(drain_pages(scripted(&[10, 3, 7], &requests), DrainLimits::unbounded(10)))
            .await
            .unwrap();
        assert_eq!(batch.len(), 20);
        assert_eq!(*requests.borrow(), vec![10, 10, 10, 10]);
    }

    #[tokio::test]
    async fn test_first_page_empty_gives_empty_batch() {
        let requests = RefCell::new(Vec::new());
        let batch = collect_batch(drain_pages(scripted(&[], &requests), DrainLimits::unbounded(10)))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.stop(), DrainStop::EmptyPage);
        assert_eq!(requests.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_ends_drain() {
        let mut calls = 0;
        let fetch = |n: u32| {
            calls += 1;
            let result = if calls == 3 {
                Err(QueueError::Connection("boom".into()))
            } else {
                Ok(make_page(&format!("c{calls}"), n as usize))
            };
            futures::future::ready(result)
        };

        let err = collect_batch(drain_pages(fetch, DrainLimits::unbounded(10)))
            .await
            .unwrap_err();
        match err {
            BatchError::Fetch { fetched, .. } => assert_eq!(fetched, 20),
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_max_messages_caps_requests() {
        let requests = RefCell::new(Vec::new());
        let fetch = |n: u32| {
            requests.borrow_mut().push(n);
            futures::future::ready(Ok(make_page("x", n as usize)))
        };
        let limits = DrainLimits {
            page_size: 10,
            max_messages: Some(25),
            max_duration: None,
        };

        let batch = collect_batch(drain_pages(fetch, limits)).await.unwrap();
        assert_eq!(batch.len(), 25);
        assert_eq!(batch.stop(), DrainStop::MaxMessages);
        assert_eq!(*requests.borrow(), vec![10, 10, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_stops_fetching() {
        let fetch = |n: u32| async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            Ok::<_, QueueError>(make_page("slow", n as usize))
        };
        let limits = DrainLimits {
            page_size: 10,
            max_messages: None,
            max_duration: Some(Duration::from_secs(10)),
        };

        let batch = collect_batch(drain_pages(fetch, limits)).await.unwrap();
        // Fetches start at t=0, 4 and 8; the check at t=12 stops the drain.
        assert_eq!(batch.pages(), 3);
        assert_eq!(batch.len(), 30);
        assert_eq!(batch.stop(), DrainStop::MaxDuration);
    }

    #[tokio::test]
    async fn test_sequence_restarts_per_drain() {
        let requests = RefCell::new(Vec::new());
        let mut fetch = scripted(&[2, 2], &requests);

        let first = collect_batch(drain_pages(&mut fetch, DrainLimits::unbounded(10)))
            .await
            .unwrap();
        assert_eq!(first.len(), 4);

        // Script exhausted: a fresh drain sees only the empty page.
        let second = collect_batch(drain_pages(&mut fetch, DrainLimits::unbounded(10)))
            .await
            .unwrap();
        assert!(second.is_empty());
    }
}
