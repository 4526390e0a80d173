//! Link adapters
//!
//! Every unit of work is normalized into [`ChainLink`], whose single `invoke`
//! method starts the work and reports how it will signal completion. The
//! calling convention is chosen once, when the [`Link`] is built.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;

use super::context::ExecutionContext;
use super::continuation::Next;
use super::error::{ChainError, LinkType, RegistrationError};

/// Bounds required of the arguments passed to every link of a run
pub trait RunArgs: Clone + Send + Sync + 'static {}

impl<T> RunArgs for T where T: Clone + Send + Sync + 'static {}

/// What a link returned when invoked
pub enum Invocation {
    /// The link body ran to completion synchronously
    ///
    /// `Ok` does not advance the chain; the link must have called
    /// `proceed()` or `exit()` itself.
    Returned(Result<(), ChainError>),

    /// The link is still running; successful settlement continues the chain
    /// unless it was already advanced.
    Awaiting(BoxFuture<'static, Result<(), ChainError>>),
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned(result) => f.debug_tuple("Returned").field(result).finish(),
            Self::Awaiting(_) => f.write_str("Awaiting"),
        }
    }
}

/// A unit of work executed by a chain
pub trait ChainLink<A>: Send + Sync {
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation;
}

/// Struct-based asynchronous link
#[async_trait]
pub trait LinkHandler<A>: Send + Sync + 'static
where
    A: RunArgs,
{
    async fn handle(&self, ctx: ExecutionContext, args: A, next: Next) -> Result<(), ChainError>;
}

/// Calling convention a link was registered with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Callback,
    Coroutine,
    Future,
    Branch,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Callback => "callback",
            Self::Coroutine => "coroutine",
            Self::Future => "future",
            Self::Branch => "branch",
        };
        f.write_str(name)
    }
}

struct Callback<F>(F);

impl<A, F> ChainLink<A> for Callback<F>
where
    F: Fn(ExecutionContext, A, Next) -> Result<(), ChainError> + Send + Sync,
{
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        Invocation::Returned((self.0)(ctx, args, next))
    }
}

struct Deferred<F>(F);

impl<A, F, Fut> ChainLink<A> for Deferred<F>
where
    F: Fn(ExecutionContext, A, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ChainError>> + Send + 'static,
{
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        Invocation::Awaiting((self.0)(ctx, args, next).boxed())
    }
}

struct Coroutine<F>(F);

impl<A, F, S> ChainLink<A> for Coroutine<F>
where
    F: Fn(ExecutionContext, A, Next) -> S + Send + Sync,
    S: Stream<Item = Result<(), ChainError>> + Send + 'static,
{
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        let steps = (self.0)(ctx, args, next);

        Invocation::Awaiting(
            async move {
                let mut steps = Box::pin(steps);
                while let Some(step) = steps.next().await {
                    step?;
                }
                Ok(())
            }
            .boxed(),
        )
    }
}

struct Handler<H>(Arc<H>);

impl<A, H> ChainLink<A> for Handler<H>
where
    A: RunArgs,
    H: LinkHandler<A>,
{
    fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        let handler = Arc::clone(&self.0);
        Invocation::Awaiting(async move { handler.handle(ctx, args, next).await }.boxed())
    }
}

/// A registered unit of work
pub struct Link<A> {
    kind: LinkKind,
    inner: Arc<dyn ChainLink<A>>,
}

impl<A> Clone for Link<A> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Link<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("kind", &self.kind).finish()
    }
}

impl<A: RunArgs> Link<A> {
    /// Synchronous callback; it must call `proceed()` or `exit()` to move on
    ///
    /// Returning `Err` rejects the run immediately.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(ExecutionContext, A, Next) -> Result<(), ChainError> + Send + Sync + 'static,
    {
        Self::from_parts(LinkKind::Callback, Arc::new(Callback(f)))
    }

    /// Future-returning function; resolving `Ok` continues the chain
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(ExecutionContext, A, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ChainError>> + Send + 'static,
    {
        Self::from_parts(LinkKind::Future, Arc::new(Deferred(f)))
    }

    /// Suspend/resume function expressed as a stream of steps
    ///
    /// Each item is one resume point. The adapter drives the stream until it
    /// ends, which continues the chain, or until a step yields `Err`, which
    /// rejects the run.
    pub fn coroutine<F, S>(f: F) -> Self
    where
        F: Fn(ExecutionContext, A, Next) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<(), ChainError>> + Send + 'static,
    {
        Self::from_parts(LinkKind::Coroutine, Arc::new(Coroutine(f)))
    }

    /// Struct-based asynchronous link
    pub fn handler<H>(handler: Arc<H>) -> Self
    where
        H: LinkHandler<A>,
    {
        Self::from_parts(LinkKind::Future, Arc::new(Handler(handler)))
    }

    pub(crate) fn from_parts(kind: LinkKind, inner: Arc<dyn ChainLink<A>>) -> Self {
        Self { kind, inner }
    }
}

impl<A> Link<A> {
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub(crate) fn invoke(&self, ctx: ExecutionContext, args: A, next: Next) -> Invocation {
        self.inner.invoke(ctx, args, next)
    }
}

/// A value offered for registration as a link
///
/// Only [`LinkEntry::Link`] is accepted; dynamic values (for example read from
/// configuration) are rejected with a [`RegistrationError`] naming their type.
#[derive(Debug)]
pub enum LinkEntry<A> {
    Link(Link<A>),
    Value(Value),
    Undefined,
}

impl<A> LinkEntry<A> {
    pub fn link_type(&self) -> LinkType {
        match self {
            Self::Link(_) => LinkType::Function,
            Self::Value(value) => LinkType::of_value(value),
            Self::Undefined => LinkType::Undefined,
        }
    }

    pub fn into_link(self) -> Result<Link<A>, RegistrationError> {
        match self {
            Self::Link(link) => Ok(link),
            other => Err(RegistrationError::unsupported(other.link_type())),
        }
    }
}

impl<A> From<Link<A>> for LinkEntry<A> {
    fn from(link: Link<A>) -> Self {
        Self::Link(link)
    }
}

impl<A> From<Option<Link<A>>> for LinkEntry<A> {
    fn from(link: Option<Link<A>>) -> Self {
        link.map_or(Self::Undefined, Self::Link)
    }
}

impl<A> From<Value> for LinkEntry<A> {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::domain::chain::continuation::{ExitSignal, Gate};
    use futures::channel::oneshot;

    fn detached_next() -> Next {
        let (trigger_tx, _) = oneshot::channel();
        let (_, done_rx) = oneshot::channel();
        let (exit_tx, _) = oneshot::channel();
        Next::new(
            Arc::new(Gate::new(trigger_tx, done_rx)),
            Arc::new(ExitSignal::new(exit_tx)),
        )
    }

    struct Stamp;

    #[async_trait]
    impl LinkHandler<()> for Stamp {
        async fn handle(&self, ctx: ExecutionContext, _args: (), _next: Next) -> Result<(), ChainError> {
            ctx.set("stamped", true);
            Ok(())
        }
    }

    #[test]
    fn test_link_kinds() {
        let callback = Link::<()>::callback(|_, _, _| Ok(()));
        let future = Link::<()>::future(|_, _, _| async { Ok(()) });
        let coroutine = Link::<()>::coroutine(|_, _, _| futures::stream::empty());
        let handler = Link::<()>::handler(Arc::new(Stamp));

        assert_eq!(callback.kind(), LinkKind::Callback);
        assert_eq!(future.kind(), LinkKind::Future);
        assert_eq!(coroutine.kind(), LinkKind::Coroutine);
        assert_eq!(handler.kind(), LinkKind::Future);
        assert_eq!(LinkKind::Branch.to_string(), "branch");
    }

    #[test]
    fn test_callback_returns_synchronously() {
        let link = Link::<()>::callback(|ctx, _, _| {
            ctx.set("one", "one");
            Err(ChainError::failed("after write"))
        });
        let ctx = ExecutionContext::new();

        match link.invoke(ctx.clone(), (), detached_next()) {
            Invocation::Returned(result) => {
                assert_eq!(result, Err(ChainError::failed("after write")))
            }
            other => panic!("unexpected invocation: {:?}", other),
        }
        assert_eq!(ctx.get("one"), Some(json!("one")));
    }

    #[tokio::test]
    async fn test_coroutine_runs_every_step() {
        let link = Link::<u32>::coroutine(|ctx, limit, _| {
            futures::stream::iter(0..limit).map(move |step| {
                ctx.append("steps", step);
                Ok(())
            })
        });
        let ctx = ExecutionContext::new();

        let Invocation::Awaiting(pending) = link.invoke(ctx.clone(), 3, detached_next()) else {
            panic!("coroutine should be awaited");
        };
        assert_eq!(pending.await, Ok(()));
        assert_eq!(ctx.get("steps"), Some(json!([0, 1, 2])));
    }

    #[tokio::test]
    async fn test_coroutine_stops_on_error_step() {
        let link = Link::<()>::coroutine(|ctx, _, _| {
            futures::stream::iter(vec![
                Ok(()),
                Err(ChainError::failed("step two")),
                Ok(()),
            ])
            .inspect(move |_| ctx.append("resumed", true))
        });
        let ctx = ExecutionContext::new();

        let Invocation::Awaiting(pending) = link.invoke(ctx.clone(), (), detached_next()) else {
            panic!("coroutine should be awaited");
        };
        assert_eq!(pending.await, Err(ChainError::failed("step two")));
        assert_eq!(ctx.get("resumed"), Some(json!([true, true])));
    }

    #[tokio::test]
    async fn test_handler_is_awaited() {
        let link = Link::<()>::handler(Arc::new(Stamp));
        let ctx = ExecutionContext::new();

        let Invocation::Awaiting(pending) = link.invoke(ctx.clone(), (), detached_next()) else {
            panic!("handler should be awaited");
        };
        assert_eq!(pending.await, Ok(()));
        assert_eq!(ctx.get("stamped"), Some(json!(true)));
    }

    #[test]
    fn test_entry_link_types() {
        let cases: Vec<(LinkEntry<()>, &str)> = vec![
            (json!("foo").into(), "string"),
            (json!(123).into(), "number"),
            (json!(false).into(), "boolean"),
            (json!(null).into(), "null"),
            (json!({}).into(), "object"),
            (json!([]).into(), "array"),
            (Option::<Link<()>>::None.into(), "undefined"),
            (Link::<()>::callback(|_, _, _| Ok(())).into(), "function"),
        ];

        for (entry, expected) in cases {
            assert_eq!(entry.link_type().as_str(), expected);
        }
    }

    #[test]
    fn test_entry_into_link() {
        let entry: LinkEntry<()> = Link::<()>::callback(|_, _, _| Ok(())).into();
        assert!(entry.into_link().is_ok());

        let entry: LinkEntry<()> = json!("foo").into();
        assert_eq!(
            entry.into_link().unwrap_err(),
            RegistrationError::unsupported(LinkType::String)
        );
    }
}
