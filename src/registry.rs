// src/registry.rs
//! Request registry (single-flight)
//!
//! When several callers request the same gene concurrently, only the first
//! submission hands a job to the worker. Later callers join the waiter list
//! of the in-flight request, receive its progress reports and get the same
//! terminal result.
//!
//! Completion removes the entry before delivering the result, so a caller
//! that submits afterwards starts a fresh fetch.

use crate::cache::GeneContent;
use crate::error::{Error, Result};
use crate::hash::GeneHash;
use crate::identity::UniqueGeneIdentifier;
use crate::progress::{GeneProgress, ProgressCallback};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Work item handed to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneJob {
    pub id: UniqueGeneIdentifier,
    /// Known content hash, if the caller already resolved it
    pub hash: Option<GeneHash>,
}

/// Destination of new jobs
pub trait JobSink: Send + Sync {
    fn enqueue(&self, job: GeneJob) -> Result<()>;
}

impl JobSink for mpsc::UnboundedSender<GeneJob> {
    fn enqueue(&self, job: GeneJob) -> Result<()> {
        self.send(job)
            .map_err(|e| Error::Internal(format!("worker is not accepting jobs ({})", e.0.id)))
    }
}

/// Pending result of a submitted request
pub type GeneResultReceiver = oneshot::Receiver<Result<GeneContent>>;

struct Waiter {
    progress: Option<ProgressCallback>,
    result: oneshot::Sender<Result<GeneContent>>,
}

/// Single-flight map from gene identity to waiting callers
pub struct RequestRegistry {
    pending: DashMap<UniqueGeneIdentifier, Vec<Waiter>>,
    sink: Arc<dyn JobSink>,
    /// Count of requests that joined an in-flight fetch
    coalesced_count: AtomicU64,
}

impl RequestRegistry {
    pub fn new(sink: Arc<dyn JobSink>) -> Self {
        Self {
            pending: DashMap::new(),
            sink,
            coalesced_count: AtomicU64::new(0),
        }
    }

    /// Register a caller for `id`, starting a fetch if none is in flight
    pub fn submit(
        &self,
        id: &UniqueGeneIdentifier,
        hash: Option<GeneHash>,
        progress: Option<ProgressCallback>,
    ) -> GeneResultReceiver {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { progress, result: tx };

        let start = match self.pending.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(waiter);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![waiter]);
                true
            }
        };

        if start {
            debug!("Starting fetch of {}", id);
            let job = GeneJob {
                id: id.clone(),
                hash,
            };
            if let Err(e) = self.sink.enqueue(job) {
                self.complete(id, Err(e));
            }
        } else {
            debug!("Joining in-flight fetch of {}", id);
            self.coalesced_count.fetch_add(1, Ordering::Relaxed);
        }

        rx
    }

    /// Submit and wait for the terminal result
    pub async fn request(
        &self,
        id: &UniqueGeneIdentifier,
        hash: Option<GeneHash>,
        progress: Option<ProgressCallback>,
    ) -> Result<GeneContent> {
        self.submit(id, hash, progress)
            .await
            .map_err(|_| Error::Internal(format!("request for {id} was dropped")))?
    }

    /// Fan a progress report out to every current waiter of `id`
    pub fn report_progress(&self, id: &UniqueGeneIdentifier, progress: GeneProgress) {
        let callbacks: Vec<ProgressCallback> = match self.pending.get(id) {
            Some(waiters) => waiters.iter().filter_map(|w| w.progress.clone()).collect(),
            None => return,
        };

        for callback in callbacks {
            callback(progress);
        }
    }

    /// Deliver the terminal result of `id` to every waiter
    ///
    /// Returns the number of callers notified.
    pub fn complete(&self, id: &UniqueGeneIdentifier, result: Result<GeneContent>) -> usize {
        let Some((_, waiters)) = self.pending.remove(id) else {
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.result.send(result.clone());
        }
        debug!("Completed {} for {} caller(s)", id, count);
        count
    }

    /// Fail every pending request with `error`
    pub fn fail_all(&self, error: Error) -> usize {
        let ids: Vec<UniqueGeneIdentifier> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .map(|id| self.complete(id, Err(error.clone())))
            .sum()
    }

    /// Get the count of requests that joined an in-flight fetch
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced_count.load(Ordering::Relaxed)
    }

    /// Get the number of genes currently being fetched
    pub fn inflight_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingSink {
        jobs: Mutex<Vec<GeneJob>>,
    }

    impl JobSink for RecordingSink {
        fn enqueue(&self, job: GeneJob) -> Result<()> {
            self.jobs.lock().push(job);
            Ok(())
        }
    }

    struct ClosedSink;

    impl JobSink for ClosedSink {
        fn enqueue(&self, _job: GeneJob) -> Result<()> {
            Err(Error::Internal("closed".to_string()))
        }
    }

    fn gene(s: &str) -> UniqueGeneIdentifier {
        UniqueGeneIdentifier::parse(s).unwrap()
    }

    fn content(id: &UniqueGeneIdentifier) -> GeneContent {
        GeneContent {
            id: id.clone(),
            hash: GeneHash::compute(b"x"),
            path: PathBuf::from("/cache/x"),
            size: 1,
        }
    }

    #[tokio::test]
    async fn test_concurrent_submissions_share_one_job() {
        let sink = Arc::new(RecordingSink::default());
        let registry = RequestRegistry::new(sink.clone());
        let id = gene("fodder::gene:acme/app/1.0:tool");

        let receivers: Vec<_> = (0..4).map(|_| registry.submit(&id, None, None)).collect();
        assert_eq!(sink.jobs.lock().len(), 1);
        assert_eq!(registry.coalesced_count(), 3);
        assert_eq!(registry.inflight_count(), 1);

        assert_eq!(registry.complete(&id, Ok(content(&id))), 4);
        for rx in receivers {
            assert_eq!(rx.await.unwrap().unwrap(), content(&id));
        }
        assert_eq!(registry.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_errors_fan_out_identically() {
        let registry = RequestRegistry::new(Arc::new(RecordingSink::default()));
        let id = gene("volume::gene:acme/app/1.0:sda");

        let a = registry.submit(&id, None, None);
        let b = registry.submit(&id, None, None);
        let error = Error::NotFound("geneset acme/app/1.0".to_string());
        registry.complete(&id, Err(error.clone()));

        assert_eq!(a.await.unwrap(), Err(error.clone()));
        assert_eq!(b.await.unwrap(), Err(error));
    }

    #[tokio::test]
    async fn test_submit_after_completion_starts_new_fetch() {
        let sink = Arc::new(RecordingSink::default());
        let registry = RequestRegistry::new(sink.clone());
        let id = gene("fodder::gene:acme/app/1.0:tool");

        let first = registry.submit(&id, None, None);
        registry.complete(&id, Ok(content(&id)));
        first.await.unwrap().unwrap();

        let _second = registry.submit(&id, None, None);
        assert_eq!(sink.jobs.lock().len(), 2);
        assert_eq!(registry.coalesced_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_reaches_every_waiter() {
        let registry = RequestRegistry::new(Arc::new(RecordingSink::default()));
        let id = gene("volume::gene:acme/app/1.0:sda");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let calls = calls.clone();
            let callback: ProgressCallback = Arc::new(move |_: GeneProgress| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            receivers.push(registry.submit(&id, None, Some(callback)));
        }
        // A waiter without callback is skipped
        receivers.push(registry.submit(&id, None, None));

        registry.report_progress(&id, GeneProgress { done: 1, total: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        registry.complete(&id, Ok(content(&id)));
        registry.report_progress(&id, GeneProgress { done: 2, total: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_enqueue_failure_completes_request() {
        let registry = RequestRegistry::new(Arc::new(ClosedSink));
        let id = gene("fodder::gene:acme/app/1.0:tool");

        let result = registry.request(&id, None, None).await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(registry.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let registry = RequestRegistry::new(Arc::new(RecordingSink::default()));
        let a = registry.submit(&gene("fodder::gene:acme/app/1.0:a"), None, None);
        let b = registry.submit(&gene("fodder::gene:acme/app/1.0:b"), None, None);

        assert_eq!(registry.fail_all(Error::Cancelled), 2);
        assert_eq!(a.await.unwrap(), Err(Error::Cancelled));
        assert_eq!(b.await.unwrap(), Err(Error::Cancelled));
    }
}
