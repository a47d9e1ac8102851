//! Cancellable event streams and the first-wins race.
//!
//! Both the key store and the exchange channel report changes through a
//! [`Subscription`]: an unbounded receiver paired with a cancel hook that
//! tells the producer to stop delivering. [`first_wins`] waits on two
//! subscriptions at once and tears both down when either produces an
//! accepted event.

use std::{fmt, future::Future};

use tokio::sync::mpsc;

type CancelHook = Box<dyn FnOnce() + Send>;

/// A stream of events that can be cancelled.
///
/// # Invariants
///
/// - The cancel hook runs at most once, on [`Subscription::cancel`] or drop
/// - After cancellation [`Subscription::next`] only drains already buffered
///   events, then returns `None`
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelHook>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver with a hook that unregisters the producer.
    pub fn new(events: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { events, cancel: Some(Box::new(cancel)) }
    }

    /// A subscription with no cancel hook, plus the sender feeding it.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { events: rx, cancel: None })
    }

    /// A subscription that has already ended.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { events: rx, cancel: None }
    }

    /// Next event, or `None` once the producer is gone or this was cancelled.
    pub async fn next(&mut self) -> Option<T> {
        self.events.recv().await
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(hook) = self.cancel.take() {
            hook();
        }
        self.events.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("cancelled", &self.cancel.is_none()).finish()
    }
}

/// How a [`first_wins`] race ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race<A, B> {
    /// The first subscription produced an accepted event
    First(A),
    /// The second subscription produced an accepted event
    Second(B),
    /// Both subscriptions ended without an accepted event
    Closed,
    /// The deadline fired first
    TimedOut,
}

/// Wait for the first accepted event from either subscription.
///
/// Events rejected by their predicate are skipped. Both subscriptions are
/// cancelled exactly once before this returns, whichever way the race ends,
/// so the losing side never delivers afterwards.
pub async fn first_wins<A, B, FA, FB, D>(
    mut first: Subscription<A>,
    mut accept_first: FA,
    mut second: Subscription<B>,
    mut accept_second: FB,
    deadline: D,
) -> Race<A, B>
where
    FA: FnMut(&A) -> bool,
    FB: FnMut(&B) -> bool,
    D: Future<Output = ()>,
{
    tokio::pin!(deadline);
    let mut first_open = true;
    let mut second_open = true;

    let outcome = loop {
        if !first_open && !second_open {
            break Race::Closed;
        }

        tokio::select! {
            event = first.next(), if first_open => match event {
                Some(event) if accept_first(&event) => break Race::First(event),
                Some(_) => {},
                None => first_open = false,
            },
            event = second.next(), if second_open => match event {
                Some(event) if accept_second(&event) => break Race::Second(event),
                Some(_) => {},
                None => second_open = false,
            },
            () = &mut deadline => break Race::TimedOut,
        }
    };

    first.cancel();
    second.cancel();
    outcome
}
