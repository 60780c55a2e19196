//! Region splitting ahead of ingestion.
//!
//! Split keys come out of the planner in ascending order. The splitter cuts
//! them into chunks of at most `max_split_keys_once` keys and keeps a bounded
//! number of chunks in flight against the split/scatter client.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::codec::format_key;
use crate::restorer::RestoreCancelled;

/// Destination-side split and scatter.
#[async_trait]
pub trait SplitClient: Send + Sync + 'static {
    /// Split the destination keyspace at every key of `keys` (ascending) and
    /// scatter the resulting regions across stores.
    async fn split_and_scatter(
        &self,
        cancel: &CancellationToken,
        keys: Vec<Vec<u8>>,
    ) -> anyhow::Result<()>;
}

/// Bounded fan-out of split keys over a [`SplitClient`].
#[derive(Clone)]
pub struct RegionSplitter {
    client: Arc<dyn SplitClient>,
    max_split_keys_once: usize,
    concurrency: usize,
}

impl std::fmt::Debug for RegionSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSplitter")
            .field("max_split_keys_once", &self.max_split_keys_once)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl RegionSplitter {
    pub fn new(client: Arc<dyn SplitClient>, max_split_keys_once: usize, concurrency: usize) -> Self {
        Self {
            client,
            max_split_keys_once: max_split_keys_once.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Split at every key of `keys`.
    ///
    /// Inputs:
    /// - `keys`: strictly ascending split keys.
    /// - `on_split`: called with the chunk length after each chunk finishes.
    ///
    /// Output:
    /// - `Ok(())` once every chunk was split and scattered.
    /// - Error on non-ascending input, on the first failing chunk, or
    ///   `RestoreCancelled` when `cancel` fires; chunks still in flight are
    ///   dropped.
    pub async fn execute_sorted_keys(
        &self,
        cancel: &CancellationToken,
        keys: Vec<Vec<u8>>,
        on_split: &(dyn Fn(usize) + Send + Sync),
    ) -> anyhow::Result<()> {
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] >= pair[1]) {
            anyhow::bail!(
                "split keys are not strictly ascending: {} then {}",
                format_key(&pair[0]),
                format_key(&pair[1])
            );
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut pending = VecDeque::new();
        let mut keys = keys.into_iter();
        loop {
            let chunk = keys
                .by_ref()
                .take(self.max_split_keys_once)
                .collect::<Vec<_>>();
            if chunk.is_empty() {
                break;
            }
            pending.push_back(chunk);
        }
        tracing::debug!(
            chunks = pending.len(),
            concurrency = self.concurrency,
            "split region keys"
        );

        let inflight_limit = self.concurrency.min(pending.len());
        let mut inflight = FuturesUnordered::<BoxFuture<'_, (usize, anyhow::Result<()>)>>::new();
        let launch = |inflight: &mut FuturesUnordered<_>, chunk: Vec<Vec<u8>>| {
            let client = self.client.clone();
            let len = chunk.len();
            inflight.push(Box::pin(async move {
                (len, client.split_and_scatter(cancel, chunk).await)
            }) as BoxFuture<'_, _>);
        };

        // Prime pipeline up to the in-flight bound.
        while inflight.len() < inflight_limit {
            let Some(chunk) = pending.pop_front() else {
                break;
            };
            launch(&mut inflight, chunk);
        }

        // Refill as chunks complete until everything is drained.
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RestoreCancelled.into()),
                next = inflight.next() => next,
            };
            let Some((len, res)) = next else {
                break;
            };
            res?;
            on_split(len);
            while inflight.len() < inflight_limit {
                let Some(chunk) = pending.pop_front() else {
                    break;
                };
                launch(&mut inflight, chunk);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        chunks: Mutex<Vec<Vec<Vec<u8>>>>,
        inflight: AtomicUsize,
        max_inflight: AtomicUsize,
        fail_on_call: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SplitClient for RecordingClient {
        async fn split_and_scatter(
            &self,
            _cancel: &CancellationToken,
            keys: Vec<Vec<u8>>,
        ) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                anyhow::bail!("split failed on call {call}");
            }
            self.chunks.lock().expect("chunks lock").push(keys);
            Ok(())
        }
    }

    fn keys(n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![b'k', i]).collect()
    }

    #[tokio::test]
    async fn keys_are_chunked_and_reported() {
        let client = Arc::new(RecordingClient::default());
        let splitter = RegionSplitter::new(client.clone(), 3, 2);
        let reported = AtomicUsize::new(0);

        splitter
            .execute_sorted_keys(&CancellationToken::new(), keys(8), &|n| {
                reported.fetch_add(n, Ordering::SeqCst);
            })
            .await
            .expect("split");

        assert_eq!(reported.load(Ordering::SeqCst), 8);
        let mut chunks = client.chunks.lock().expect("chunks lock").clone();
        chunks.sort();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 8);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 3));
        assert!(client.max_inflight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_key_list_is_a_no_op() {
        let client = Arc::new(RecordingClient::default());
        let splitter = RegionSplitter::new(client.clone(), 3, 2);
        splitter
            .execute_sorted_keys(&CancellationToken::new(), Vec::new(), &|_| {})
            .await
            .expect("split");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsorted_keys_are_rejected_before_splitting() {
        let client = Arc::new(RecordingClient::default());
        let splitter = RegionSplitter::new(client.clone(), 3, 2);
        let err = splitter
            .execute_sorted_keys(
                &CancellationToken::new(),
                vec![b"b".to_vec(), b"a".to_vec()],
                &|_| {},
            )
            .await
            .expect_err("descending keys");
        assert!(err.to_string().contains("not strictly ascending"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_failure_aborts() {
        let client = Arc::new(RecordingClient {
            fail_on_call: Some(0),
            ..RecordingClient::default()
        });
        let splitter = RegionSplitter::new(client.clone(), 1, 1);
        let err = splitter
            .execute_sorted_keys(&CancellationToken::new(), keys(4), &|_| {})
            .await
            .expect_err("first chunk fails");
        assert!(err.to_string().contains("split failed"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_an_error() {
        let client = Arc::new(RecordingClient::default());
        let splitter = RegionSplitter::new(client, 1, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = splitter
            .execute_sorted_keys(&cancel, keys(4), &|_| {})
            .await
            .expect_err("cancelled");
        assert!(err.downcast_ref::<RestoreCancelled>().is_some());
    }
}
