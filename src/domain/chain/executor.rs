//! Chain execution engine
//!
//! A run owns a snapshot of the effective link sequence and an explicit
//! cursor. [`Driver::advance`] is the single step loop: it checks the
//! cancellation signal, takes the link at the cursor, advances the cursor and
//! invokes the link, then waits until the link's gate opens, either through
//! `proceed()` or, for awaited links, through successful settlement,
//! whichever comes first.
//!
//! Link futures still in flight are polled next to the loop, never nested in
//! one another, so a run costs the same stack depth at any chain length. When
//! the cursor passes the end, [`Driver::unwind`] resolves each link's
//! `Proceed` innermost-first, waiting for links that wrap their downstream.

use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{Instrument, debug, debug_span, trace, warn};

use super::context::ExecutionContext;
use super::continuation::{ExitSignal, Gate, Next};
use super::entity::Chain;
use super::error::ChainError;
use super::link::{Invocation, Link, RunArgs};

/// Settles with the run's context, or with the error that terminated it
pub type RunFuture = BoxFuture<'static, Result<ExecutionContext, ChainError>>;

type Settling = BoxFuture<'static, (usize, Result<(), ChainError>)>;

/// Engine-owned execution record of one run
struct RunState<A> {
    links: Vec<Link<A>>,
    ctx: ExecutionContext,
    args: A,
    cursor: usize,
    exit: Arc<ExitSignal>,
}

/// Settlement of one dispatched link's own future
enum Settlement {
    /// Callback links have nothing left to settle
    Immediate,
    Pending,
    Done(Result<(), ChainError>),
}

struct Frame {
    gate: Arc<Gate>,
    done: oneshot::Sender<Result<(), ChainError>>,
    settlement: Settlement,
}

enum Event {
    Opened,
    Closed,
    Settled(usize, Result<(), ChainError>),
    Exited,
}

enum Halt {
    Finished(Result<(), ChainError>),
    Exited,
}

struct Driver<A> {
    run: RunState<A>,
    exit_rx: oneshot::Receiver<()>,
    frames: Vec<Frame>,
    inflight: FuturesUnordered<Settling>,
}

impl<A: RunArgs> Chain<A> {
    /// Run the chain against a fresh context
    pub fn run(&self, args: A) -> RunFuture {
        self.run_with(ExecutionContext::new(), args)
    }

    /// Run the chain against an existing context
    ///
    /// The effective sequence (`main ++ final`) is captured when this is
    /// called; the returned future drives it.
    pub fn run_with(&self, ctx: ExecutionContext, args: A) -> RunFuture {
        let links = self.effective_links();
        let span = debug_span!(
            "chain_run",
            chain = self.label(),
            run_id = %ctx.id(),
            links = links.len()
        );

        let (exit_tx, exit_rx) = oneshot::channel();
        let driver = Driver {
            run: RunState {
                links,
                ctx: ctx.clone(),
                args,
                cursor: 0,
                exit: Arc::new(ExitSignal::new(exit_tx)),
            },
            exit_rx,
            frames: Vec::new(),
            inflight: FuturesUnordered::new(),
        };

        async move {
            match driver.drive().await {
                Ok(()) => {
                    debug!("Chain run completed");
                    Ok(ctx)
                }
                Err(error) => {
                    debug!(error = %error, "Chain run failed");
                    Err(error)
                }
            }
        }
        .instrument(span)
        .boxed()
    }
}

impl<A: RunArgs> Driver<A> {
    async fn drive(mut self) -> Result<(), ChainError> {
        let halt = match self.advance().await {
            Halt::Finished(outcome) => self.unwind(outcome).await,
            Halt::Exited => Halt::Exited,
        };

        let outcome = match halt {
            Halt::Finished(outcome) => outcome,
            Halt::Exited => {
                debug!("Chain exited early");
                Ok(())
            }
        };

        self.detach();
        outcome
    }

    /// Dispatch links one at a time until the sequence ends, fails or exits
    async fn advance(&mut self) -> Halt {
        loop {
            if let Some(signal) = self.run.ctx.cancellation() {
                debug!(signal = %signal, "Cancellation signal observed");
                return Halt::Finished(Err(signal));
            }

            let cursor = self.run.cursor;
            let Some(link) = self.run.links.get(cursor).cloned() else {
                return Halt::Finished(Ok(()));
            };
            self.run.cursor += 1;

            trace!(cursor, kind = %link.kind(), "Dispatching link");

            let (trigger_tx, trigger_rx) = oneshot::channel::<()>();
            let (done_tx, done_rx) = oneshot::channel::<Result<(), ChainError>>();
            let gate = Arc::new(Gate::new(trigger_tx, done_rx));
            let next = Next::new(Arc::clone(&gate), Arc::clone(&self.run.exit));

            let invocation = link.invoke(self.run.ctx.clone(), self.run.args.clone(), next);
            let (settlement, failure) = match invocation {
                Invocation::Returned(Ok(())) => (Settlement::Immediate, None),
                Invocation::Returned(Err(error)) => (Settlement::Immediate, Some(error)),
                Invocation::Awaiting(pending) => {
                    self.inflight
                        .push(pending.map(move |result| (cursor, result)).boxed());
                    (Settlement::Pending, None)
                }
            };

            self.frames.push(Frame {
                gate: Arc::clone(&gate),
                done: done_tx,
                settlement,
            });

            if let Some(error) = failure {
                gate.close();
                return Halt::Finished(Err(error));
            }

            let mut trigger = Some(trigger_rx);
            loop {
                match self.next_event(&mut trigger).await {
                    Event::Opened => break,
                    Event::Exited => return Halt::Exited,
                    // exit() closed the gate; its signal follows
                    Event::Closed => trigger = None,
                    Event::Settled(settled, result) if settled == cursor => match result {
                        Ok(()) => {
                            if gate.open() {
                                trace!(cursor, "Link settled, continuing implicitly");
                            }
                            self.record(settled, Ok(()));
                        }
                        Err(error) if gate.close() => {
                            self.record(settled, Err(error.clone()));
                            return Halt::Finished(Err(error));
                        }
                        Err(error) => {
                            debug!(cursor, error = %error, "Link failed after continuing");
                            self.record(settled, Err(error));
                        }
                    },
                    Event::Settled(settled, result) => {
                        if let Err(error) = &result {
                            debug!(cursor = settled, error = %error, "Link failed after continuing");
                        }
                        self.record(settled, result);
                    }
                }
            }
        }
    }

    /// Resolve every dispatched link's downstream, innermost first
    ///
    /// `outcome` is what the remainder after the last dispatched link came to.
    /// A failure of any link future observed while the run is open joins the
    /// outcome of every link before it, unless an earlier failure already did.
    async fn unwind(&mut self, mut outcome: Result<(), ChainError>) -> Halt {
        while let Some(frame) = self.frames.pop() {
            let cursor = self.frames.len();
            let wraps = matches!(frame.settlement, Settlement::Pending) && frame.gate.is_watched();

            let _ = frame.done.send(outcome.clone());

            match frame.settlement {
                Settlement::Done(result) => absorb(&mut outcome, result),
                Settlement::Pending if wraps => {
                    trace!(cursor, "Waiting for wrapping link to settle");
                    loop {
                        match self.next_event(&mut None).await {
                            Event::Exited => return Halt::Exited,
                            Event::Settled(settled, result) if settled == cursor => {
                                absorb(&mut outcome, result);
                                break;
                            }
                            Event::Settled(settled, result) if settled < cursor => {
                                self.record(settled, result)
                            }
                            Event::Settled(_, result) => absorb(&mut outcome, result),
                            Event::Opened | Event::Closed => {}
                        }
                    }
                }
                Settlement::Pending | Settlement::Immediate => {}
            }
        }

        Halt::Finished(outcome)
    }

    async fn next_event(&mut self, trigger: &mut Option<oneshot::Receiver<()>>) -> Event {
        let has_inflight = !self.inflight.is_empty();

        tokio::select! {
            biased;

            Ok(()) = &mut self.exit_rx => Event::Exited,
            opened = async {
                match trigger.as_mut() {
                    Some(rx) => rx.await,
                    None => future::pending().await,
                }
            } => match opened {
                Ok(()) => Event::Opened,
                Err(_) => Event::Closed,
            },
            Some((cursor, result)) = self.inflight.next(), if has_inflight => {
                Event::Settled(cursor, result)
            }
        }
    }

    fn record(&mut self, cursor: usize, result: Result<(), ChainError>) {
        if let Some(frame) = self.frames.get_mut(cursor) {
            frame.settlement = Settlement::Done(result);
        }
    }

    /// Hand link futures still running to the runtime so they finish undisturbed
    fn detach(&mut self) {
        if self.inflight.is_empty() {
            return;
        }

        let mut inflight = std::mem::take(&mut self.inflight);
        let pending = inflight.len();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(pending, "Detaching links still running after the run settled");
                handle.spawn(
                    async move {
                        while let Some((cursor, result)) = inflight.next().await {
                            if let Err(error) = result {
                                warn!(cursor, error = %error, "Detached link failed");
                            }
                        }
                    }
                    .in_current_span(),
                );
            }
            Err(_) => {
                warn!(pending, "No runtime to finish detached links, dropping them");
            }
        }
    }
}

fn absorb(outcome: &mut Result<(), ChainError>, result: Result<(), ChainError>) {
    if outcome.is_ok() {
        if let Err(error) = result {
            *outcome = Err(error);
        }
    }
}
