//! Bucket orchestrator
//!
//! Runs named chains ("buckets") one after another against a single shared
//! context. A failing bucket stops the sequence; if an error bucket is
//! registered it gets a chance to recover the run.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::FutureExt;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::domain::chain::{Chain, ChainError, ExecutionContext, RunArgs, RunFuture};

/// Run arguments handed to the error bucket
#[derive(Debug, Clone)]
pub struct Recovery<A> {
    /// Failure that stopped the bucket sequence
    pub error: ChainError,
    /// Arguments the failed run was started with
    pub args: A,
}

struct Buckets<A> {
    ordered: Vec<(String, Chain<A>)>,
    error: Option<(String, Chain<Recovery<A>>)>,
}

/// Ordered collection of named chains sharing one context per run
pub struct BucketChain<A = ()> {
    buckets: Arc<RwLock<Buckets<A>>>,
}

impl<A> Clone for BucketChain<A> {
    fn clone(&self) -> Self {
        Self {
            buckets: Arc::clone(&self.buckets),
        }
    }
}

impl<A> fmt::Debug for BucketChain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.read();
        f.debug_struct("BucketChain")
            .field(
                "buckets",
                &buckets.ordered.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("error_bucket", &buckets.error.as_ref().map(|(name, _)| name))
            .finish()
    }
}

impl<A: RunArgs> Default for BucketChain<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RunArgs> BucketChain<A> {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(RwLock::new(Buckets {
                ordered: Vec::new(),
                error: None,
            })),
        }
    }

    /// Create a bucket at the end of the sequence
    ///
    /// An existing bucket with the same name is replaced by a fresh chain and
    /// keeps its position.
    pub fn bucket(&self, name: impl Into<String>) -> Chain<A> {
        let name = name.into();
        let chain = Chain::named(name.clone());
        let mut buckets = self.write();

        match buckets.ordered.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => {
                debug!(bucket = %name, "Replacing bucket");
                *slot = chain.clone();
            }
            None => {
                debug!(bucket = %name, position = buckets.ordered.len(), "Registering bucket");
                buckets.ordered.push((name, chain.clone()));
            }
        }

        chain
    }

    /// Create (or replace) the chain that runs when a bucket fails
    pub fn error_bucket(&self, name: impl Into<String>) -> Chain<Recovery<A>> {
        let name = name.into();
        let chain = Chain::named(name.clone());
        debug!(bucket = %name, "Registering error bucket");
        self.write().error = Some((name, chain.clone()));
        chain
    }

    /// Run every bucket against a fresh context
    pub fn run(&self, args: A) -> RunFuture {
        self.run_with(ExecutionContext::new(), args)
    }

    /// Run every bucket against an existing context
    ///
    /// The bucket list is captured when this is called.
    pub fn run_with(&self, ctx: ExecutionContext, args: A) -> RunFuture {
        let (ordered, error_bucket) = {
            let buckets = self.read();
            (buckets.ordered.clone(), buckets.error.clone())
        };
        let span = debug_span!("bucket_run", run_id = %ctx.id(), buckets = ordered.len());

        async move {
            for (name, chain) in ordered {
                debug!(bucket = %name, "Running bucket");

                let error = match chain.run_with(ctx.clone(), args.clone()).await {
                    Ok(_) => continue,
                    Err(error) => error,
                };

                warn!(bucket = %name, error = %error, "Bucket failed");

                let Some((recovery_name, recovery)) = error_bucket else {
                    return Err(error);
                };

                ctx.clear_cancellation();
                info!(bucket = %recovery_name, failed = %name, "Running error bucket");

                let recovered = recovery.run_with(ctx, Recovery { error, args }).await;
                if recovered.is_ok() {
                    info!(bucket = %recovery_name, "Recovered from bucket failure");
                }
                return recovered;
            }

            Ok(ctx)
        }
        .instrument(span)
        .boxed()
    }

    /// Empty one bucket by name, or every bucket and the error bucket
    ///
    /// Buckets stay registered; handles held by callers see the reset.
    /// Returns `false` when `name` matches no bucket.
    pub fn clear(&self, name: Option<&str>) -> bool {
        let buckets = self.read();

        match name {
            Some(name) => {
                if let Some((_, chain)) = buckets.ordered.iter().find(|(existing, _)| existing == name) {
                    chain.clear();
                    return true;
                }

                match &buckets.error {
                    Some((existing, chain)) if existing == name => {
                        chain.clear();
                        true
                    }
                    _ => false,
                }
            }
            None => {
                for (_, chain) in &buckets.ordered {
                    chain.clear();
                }
                if let Some((_, chain)) = &buckets.error {
                    chain.clear();
                }
                true
            }
        }
    }
}

impl<A> BucketChain<A> {
    pub fn get(&self, name: &str) -> Option<Chain<A>> {
        self.read()
            .ordered
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, chain)| chain.clone())
    }

    pub fn get_error_bucket(&self) -> Option<Chain<Recovery<A>>> {
        self.read().error.as_ref().map(|(_, chain)| chain.clone())
    }

    /// Bucket names in execution order, error bucket excluded
    pub fn bucket_names(&self) -> Vec<String> {
        self.read()
            .ordered
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().ordered.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Buckets<A>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets<A>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}
