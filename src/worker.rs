// src/worker.rs

//! Worker loop
//!
//! Pulls [`GeneJob`]s off the registry's queue and runs each through the
//! resolver, up to `concurrency` distinct genes at a time. Every job ends in
//! exactly one `RequestRegistry::complete` call: a panicking job is reported
//! as an `Internal` error instead of taking the loop down with it.

use crate::error::Error;
use crate::progress::{GeneProgress, ProgressCallback};
use crate::registry::{GeneJob, RequestRegistry};
use crate::resolution::GeneResolver;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default number of genes processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 2;

pub struct GeneWorker {
    resolver: GeneResolver,
    registry: Arc<RequestRegistry>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl GeneWorker {
    pub fn new(
        resolver: GeneResolver,
        registry: Arc<RequestRegistry>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            registry,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Process jobs until the queue closes or the token is cancelled
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<GeneJob>) {
        info!("Gene worker started (concurrency {})", self.concurrency);
        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.registry.complete(&job.id, Err(Error::Cancelled));
                    break;
                }
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.registry.complete(&job.id, Err(Error::Cancelled));
                        break;
                    }
                },
            };

            while tasks.try_join_next().is_some() {}
            tasks.spawn(process(
                self.resolver.clone(),
                self.registry.clone(),
                self.cancel.clone(),
                job,
                permit,
            ));
        }

        // Running jobs observe the token themselves
        while tasks.join_next().await.is_some() {}

        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            self.registry.complete(&job.id, Err(Error::Cancelled));
        }
        info!("Gene worker stopped");
    }
}

/// Run one job on its own task and deliver whatever it ends with
async fn process(
    resolver: GeneResolver,
    registry: Arc<RequestRegistry>,
    cancel: CancellationToken,
    job: GeneJob,
    permit: OwnedSemaphorePermit,
) {
    let GeneJob { id, hash } = job;
    debug!("Processing {}", id);

    let progress: ProgressCallback = {
        let registry = registry.clone();
        let id = id.clone();
        Arc::new(move |p: GeneProgress| registry.report_progress(&id, p))
    };

    let task = {
        let id = id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            resolver.provide(&id, hash, Some(progress), &cancel).await
        })
    };

    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("Job for {} aborted: {}", id, e);
            Err(Error::Internal(format!("job for {id} aborted: {e}")))
        }
    };

    if let Err(e) = &result {
        debug!("{} failed: {}", id, e);
    }
    registry.complete(&id, result);
}
