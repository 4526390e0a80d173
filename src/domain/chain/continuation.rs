//! Continuation handles delivered to every link

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use super::error::ChainError;

type Downstream = Shared<oneshot::Receiver<Result<(), ChainError>>>;

/// One-shot advance gate for a single dispatched link
///
/// The first of an explicit `proceed()` or the engine's implicit continuation
/// opens the gate; every later attempt is a no-op. `exit()` closes it.
pub(crate) struct Gate {
    trigger: Mutex<Option<oneshot::Sender<()>>>,
    opened: AtomicBool,
    watchers: AtomicUsize,
    downstream: Downstream,
}

impl Gate {
    pub(crate) fn new(
        trigger: oneshot::Sender<()>,
        downstream: oneshot::Receiver<Result<(), ChainError>>,
    ) -> Self {
        Self {
            trigger: Mutex::new(Some(trigger)),
            opened: AtomicBool::new(false),
            watchers: AtomicUsize::new(0),
            downstream: downstream.shared(),
        }
    }

    /// Open the gate; returns `false` when it was already opened or closed
    pub(crate) fn open(&self) -> bool {
        match self.take() {
            Some(trigger) => {
                self.opened.store(true, Ordering::SeqCst);
                let _ = trigger.send(());
                true
            }
            None => false,
        }
    }

    /// Close the gate; returns `true` when it was still pending
    pub(crate) fn close(&self) -> bool {
        self.take().is_some()
    }

    pub(crate) fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Whether a [`Proceed`] for this gate is still held
    pub(crate) fn is_watched(&self) -> bool {
        self.watchers.load(Ordering::SeqCst) > 0
    }

    fn take(&self) -> Option<oneshot::Sender<()>> {
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_pending(&self) -> bool {
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("pending", &self.is_pending())
            .field("opened", &self.is_opened())
            .field("watchers", &self.watchers.load(Ordering::SeqCst))
            .finish()
    }
}

/// Settles a whole run successfully, once
pub(crate) struct ExitSignal {
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

impl ExitSignal {
    pub(crate) fn new(sender: oneshot::Sender<()>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub(crate) fn fire(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitSignal").finish_non_exhaustive()
    }
}

/// Continuation handle passed to a link
///
/// Call [`Next::proceed`] to continue with the remainder of the chain or
/// [`Next::exit`] to settle the run immediately. A callback link that calls
/// neither leaves its run suspended.
#[derive(Debug, Clone)]
pub struct Next {
    gate: Arc<Gate>,
    exit: Arc<ExitSignal>,
}

impl Next {
    pub(crate) fn new(gate: Arc<Gate>, exit: Arc<ExitSignal>) -> Self {
        Self { gate, exit }
    }

    /// Continue with the remainder of the chain
    ///
    /// The remainder is driven by the engine whether or not the returned
    /// future is awaited. Awaiting it resolves once every downstream link has
    /// completed, with the downstream failure if there was one. Calling
    /// `proceed` again, or after the link's future has settled, does not
    /// advance the chain a second time.
    ///
    /// Holding the returned [`Proceed`] marks the link as wrapping its
    /// downstream: the run stays open until the link's own future settles.
    /// Dropping it hands off, and a link future still pending when the run
    /// settles is left to finish on its own.
    pub fn proceed(&self) -> Proceed {
        self.gate.open();
        Proceed::watch(Arc::clone(&self.gate))
    }

    /// Settle the current run successfully with the context as it stands
    ///
    /// Remaining links, main and final, are discarded. The current run is
    /// the one this handle was delivered by: inside a sub-chain registered
    /// with [`Chain::when`](super::Chain::when) only the sub-chain ends and
    /// the parent continues with its next link; inside a bucket only that
    /// bucket ends and the next bucket runs.
    pub fn exit(&self) {
        self.gate.close();
        self.exit.fire();
    }
}

/// Completion of the remainder of a chain, returned by [`Next::proceed`]
pub struct Proceed {
    gate: Arc<Gate>,
    downstream: Downstream,
}

impl Proceed {
    fn watch(gate: Arc<Gate>) -> Self {
        gate.watchers.fetch_add(1, Ordering::SeqCst);
        let downstream = gate.downstream.clone();
        Self { gate, downstream }
    }
}

impl Clone for Proceed {
    fn clone(&self) -> Self {
        Self::watch(Arc::clone(&self.gate))
    }
}

impl Drop for Proceed {
    fn drop(&mut self) {
        self.gate.watchers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Proceed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proceed").finish_non_exhaustive()
    }
}

impl Future for Proceed {
    type Output = Result<(), ChainError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.downstream
            .poll_unpin(cx)
            .map(|outcome| outcome.unwrap_or(Err(ChainError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_with_channels() -> (
        Next,
        oneshot::Receiver<()>,
        oneshot::Sender<Result<(), ChainError>>,
        oneshot::Receiver<()>,
    ) {
        let (trigger_tx, trigger_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let next = Next::new(
            Arc::new(Gate::new(trigger_tx, done_rx)),
            Arc::new(ExitSignal::new(exit_tx)),
        );
        (next, trigger_rx, done_tx, exit_rx)
    }

    #[tokio::test]
    async fn test_proceed_opens_gate_once() {
        let (next, trigger_rx, done_tx, _exit_rx) = next_with_channels();

        let first = next.proceed();
        let second = next.proceed();
        assert!(trigger_rx.await.is_ok());
        assert!(!next.gate.open());

        done_tx.send(Ok(())).unwrap();
        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
    }

    #[tokio::test]
    async fn test_proceed_reports_downstream_failure() {
        let (next, _trigger_rx, done_tx, _exit_rx) = next_with_channels();

        let downstream = next.proceed();
        done_tx.send(Err(ChainError::failed("C failed"))).unwrap();
        assert_eq!(downstream.await, Err(ChainError::failed("C failed")));
    }

    #[tokio::test]
    async fn test_proceed_abandoned_when_remainder_dropped() {
        let (next, _trigger_rx, done_tx, _exit_rx) = next_with_channels();

        let downstream = next.proceed();
        drop(done_tx);
        assert_eq!(downstream.await, Err(ChainError::Abandoned));
    }

    #[test]
    fn test_gate_tracks_opening_and_closing() {
        let (trigger_tx, _trigger_rx) = oneshot::channel();
        let (_done_tx, done_rx) = oneshot::channel();
        let gate = Gate::new(trigger_tx, done_rx);

        assert!(!gate.is_opened());
        assert!(gate.open());
        assert!(gate.is_opened());
        assert!(!gate.close());

        let (trigger_tx, _trigger_rx) = oneshot::channel();
        let (_done_tx, done_rx) = oneshot::channel();
        let gate = Gate::new(trigger_tx, done_rx);

        assert!(gate.close());
        assert!(!gate.open());
        assert!(!gate.is_opened());
    }

    #[test]
    fn test_held_proceed_watches_gate() {
        let (next, _trigger_rx, _done_tx, _exit_rx) = next_with_channels();
        assert!(!next.gate.is_watched());

        let held = next.proceed();
        let copy = held.clone();
        next.proceed();
        assert!(next.gate.is_watched());

        drop(held);
        assert!(next.gate.is_watched());
        drop(copy);
        assert!(!next.gate.is_watched());
    }

    #[tokio::test]
    async fn test_exit_closes_gate() {
        let (next, trigger_rx, _done_tx, exit_rx) = next_with_channels();

        next.exit();
        assert!(exit_rx.await.is_ok());

        let _ = next.proceed();
        assert!(trigger_rx.await.is_err());
        assert!(!next.exit.fire());
    }
}
