//! Conditional sub-chains
//!
//! A branch is a nested [`Chain`] gated by a [`Predicate`] and registered as a
//! single link of its parent. A failing sub-chain does not reject the parent
//! directly: the failure becomes the context's cancellation signal, which the
//! parent observes before its next dispatch.

use std::fmt;
use std::sync::Arc;

use futures::future::FutureExt;
use tracing::{debug, trace};

use super::context::ExecutionContext;
use super::continuation::Next;
use super::entity::Chain;
use super::link::{ChainLink, Invocation, RunArgs};

/// Condition deciding whether a sub-chain runs
///
/// Sub-chain reuse is keyed by reference identity: clones of one `Predicate`
/// address the same branch, while two predicates built from identical
/// closures address two different branches. Use
/// [`Chain::when_keyed`](super::Chain::when_keyed) for an explicit key.
pub struct Predicate<A> {
    check: Arc<dyn Fn(&ExecutionContext, &A) -> bool + Send + Sync>,
}

impl<A> Predicate<A> {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&ExecutionContext, &A) -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext, args: &A) -> bool {
        (self.check)(ctx, args)
    }

    /// Whether both handles refer to the same predicate
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.check, &other.check)
    }
}

impl<A> Clone for Predicate<A> {
    fn clone(&self) -> Self {
        Self {
            check: Arc::clone(&self.check),
        }
    }
}

impl<A> fmt::Debug for Predicate<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("id", &Arc::as_ptr(&self.check).cast::<()>())
            .finish()
    }
}

/// Identity of a branch within its parent chain
pub(crate) enum BranchKey<A> {
    Predicate(Predicate<A>),
    Named(String),
}

impl<A> BranchKey<A> {
    pub(crate) fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Predicate(a), Self::Predicate(b)) => a.same_as(b),
            (Self::Named(a), Self::Named(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) struct BranchSlot<A> {
    pub(crate) key: BranchKey<A>,
    pub(crate) chain: Chain<A>,
}

/// Link that runs a sub-chain when its predicate holds
pub(crate) struct Branch<A> {
    predicate: Predicate<A>,
    chain: Chain<A>,
}

impl<A> Branch<A> {
    pub(crate) fn new(predicate: Predicate<A>, chain: Chain<A>) -> Self {
        Self { predicate, chain }
    }
}

impl<A: RunArgs> ChainLink<A> for Branch<A> {
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        if !self.predicate.evaluate(&ctx, &args) {
            trace!(branch = self.chain.label(), "Predicate false, skipping sub-chain");
            next.proceed();
            return Invocation::Returned(Ok(()));
        }

        let branch = self.chain.label().to_string();
        let run = self.chain.run_with(ctx.clone(), args);

        Invocation::Awaiting(
            async move {
                if let Err(error) = run.await {
                    debug!(branch = %branch, error = %error, "Sub-chain failed, deferring cancellation");
                    ctx.cancel(error);
                }
                Ok(())
            }
            .boxed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_identity() {
        let a = Predicate::<()>::new(|_, _| true);
        let b = Predicate::<()>::new(|_, _| true);

        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_predicate_evaluate() {
        let predicate = Predicate::<String>::new(|ctx, path| {
            ctx.get("enabled").is_some() && path == "/foo"
        });
        let ctx = ExecutionContext::new();

        assert!(!predicate.evaluate(&ctx, &"/foo".to_string()));
        ctx.set("enabled", true);
        assert!(predicate.evaluate(&ctx, &"/foo".to_string()));
        assert!(!predicate.evaluate(&ctx, &"/bla".to_string()));
    }

    #[test]
    fn test_branch_key_matching() {
        let predicate = Predicate::<()>::new(|_, _| true);
        let same = BranchKey::Predicate(predicate.clone());
        let other = BranchKey::Predicate(Predicate::new(|_, _| true));

        assert!(BranchKey::Predicate(predicate).matches(&same));
        assert!(!same.matches(&other));
        assert!(BranchKey::<()>::Named("admin".into()).matches(&BranchKey::Named("admin".into())));
        assert!(!BranchKey::<()>::Named("admin".into()).matches(&same));
    }
}
