// src/resolution/mod.rs

//! Gene resolution engine
//!
//! Turns a logical gene identifier into merged content on local disk:
//!
//! 1. resolve the geneset (following references) - [`geneset`]
//! 2. look up the gene hash in the resolved manifest
//! 3. make sure every part is downloaded and verified - [`gene`]
//! 4. merge the parts into the cache
//!
//! Repositories are queried in configured order. A client error from any of
//! them aborts the search; not-found and transient answers move on to the
//! next repository.

mod gene;
mod geneset;

use crate::cache::LocalGenePool;
use crate::error::{Error, Result};
use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::repository::{GeneRepository, PartDownloadOptions, DEFAULT_REQUEST_TIMEOUT};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded retry of missing parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Download rounds in total, including the first one
    pub rounds: u32,
    /// Pause between rounds; skipped when URLs only needed a refresh
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rounds: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Resolver tunables
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    pub retry: RetryPolicy,
    pub part: PartDownloadOptions,
    /// Upper bound for a single manifest request to one repository
    pub request_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            part: PartDownloadOptions::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Outcome of querying every repository in turn
enum Lookup<T> {
    Found {
        repository: Arc<dyn GeneRepository>,
        value: T,
    },
    Exhausted {
        failures: Vec<String>,
        errors: usize,
    },
}

/// Error to report when no repository produced the resource
///
/// Plain not-found answers stay `NotFound`; any failure among them makes the
/// result an aggregate listing every repository.
fn exhausted_error(subject: &str, failures: Vec<String>, errors: usize) -> Error {
    if failures.is_empty() {
        Error::NotFound(format!("{subject} (no repositories configured)"))
    } else if errors == 0 {
        Error::NotFound(subject.to_string())
    } else {
        Error::AllRepositoriesFailed {
            subject: subject.to_string(),
            failures,
        }
    }
}

/// Resolves genes against the local cache and an ordered list of repositories
#[derive(Clone)]
pub struct GeneResolver {
    store: LocalGenePool,
    repositories: Arc<Vec<Arc<dyn GeneRepository>>>,
    options: ResolverOptions,
}

impl GeneResolver {
    pub fn new(
        store: LocalGenePool,
        repositories: Vec<Arc<dyn GeneRepository>>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            store,
            repositories: Arc::new(repositories),
            options,
        }
    }

    pub fn store(&self) -> &LocalGenePool {
        &self.store
    }

    pub fn repositories(&self) -> &[Arc<dyn GeneRepository>] {
        &self.repositories
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Run a cache operation on the blocking pool
    pub(crate) async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&LocalGenePool) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| Error::Internal(format!("cache task failed: {e}")))?
    }

    /// Ask each repository in order until one has the resource
    async fn query_repositories<T, F, Fut>(
        &self,
        subject: &str,
        cancel: &CancellationToken,
        query: F,
    ) -> Result<Lookup<T>>
    where
        F: Fn(Arc<dyn GeneRepository>) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let mut failures = Vec::new();
        let mut errors = 0;

        for repository in self.repositories.iter() {
            let name = repository.name().to_string();
            let call = tokio::time::timeout(self.options.request_timeout, query(repository.clone()));

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = call => outcome.unwrap_or_else(|_| {
                    Err(Error::transient(&name, format!(
                        "no answer within {}s",
                        self.options.request_timeout.as_secs()
                    )))
                }),
            };

            match outcome {
                Ok(Some(value)) => {
                    debug!("[{}] found {}", name, subject);
                    return Ok(Lookup::Found {
                        repository: repository.clone(),
                        value,
                    });
                }
                Ok(None) => {
                    debug!("[{}] does not have {}", name, subject);
                    failures.push(format!("{name}: not found"));
                }
                Err(e) if e.is_client_error() => {
                    warn!("[{}] rejected request for {}: {}", name, subject, e);
                    return Err(e);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("[{}] failed for {}: {}", name, subject, e);
                    failures.push(format!("{name}: {e}"));
                    errors += 1;
                }
            }
        }

        Ok(Lookup::Exhausted { failures, errors })
    }
}

/// Sleep for `delay` unless cancelled first
async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
