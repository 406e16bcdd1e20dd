//! The request-on-connection (RoC) state machine and its event
//! dispatcher (spec.md §4.4): the only interface through which a
//! request handler may suspend.
//!
//! Stackful fibers in the original design become one `tokio::task` per
//! RoC here, per spec.md §9's translation guidance. Each suspension
//! primitive parks the task on a single-shot channel rather than a
//! generic `suspend(token)`/`resume(token)` pair; the channel itself is
//! the token, so a resume can only ever satisfy the suspension that
//! created it.

use bytes::Bytes;
use roc_core::error::{EngineError, Result};
use roc_wire::RequestId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// The lifecycle of one request-on-connection, spec.md §4.4.
///
/// # Why
/// A RoC is a cooperative fiber that never runs concurrently with
/// itself: it is either driving its handler forward (`Running`), parked
/// on exactly one of the four suspension primitives, or done. Modelling
/// that as an enum rather than a handful of independent booleans makes
/// "suspended on two things at once" unrepresentable, which matches the
/// single-`PendingWaiter`-slot invariant the dispatcher relies on.
///
/// # Transitions
/// - `Fresh` -> `Running`: the handler task starts.
/// - `Running` -> `Suspended*`: a handler calls `send`, `receive`,
///   `yield_now`, or `await_user_resume`.
/// - `Suspended*` -> `Running`: the matching resume fires.
/// - any state -> `Terminated`: handler completion, eviction, or
///   connection shutdown; terminal and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RocState {
    Fresh,
    Running,
    SuspendedSend,
    SuspendedReceive,
    SuspendedYield,
    SuspendedUser,
    Terminated,
}

enum ResumeOutcome {
    SendAccepted,
    Payload(Bytes),
    UserCode(i64),
    Error(EngineError),
}

enum PendingWaiter {
    None,
    Send {
        producer: Box<dyn FnOnce() -> Vec<Bytes> + Send>,
        ack: oneshot::Sender<ResumeOutcome>,
    },
    Receive {
        ack: oneshot::Sender<ResumeOutcome>,
    },
    User {
        ack: oneshot::Sender<ResumeOutcome>,
    },
}

struct RocShared {
    id: RequestId,
    state: Mutex<RocState>,
    waiter: Mutex<PendingWaiter>,
    queued_for_send: AtomicBool,
    evicted: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl RocShared {
    fn set_state(&self, state: RocState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Handle stored in the `RequestSet`. Exposes just enough to implement
/// `Evictable` and to resume the RoC from connection-level code
/// (shutdown fan-out, eviction) without reaching into its task.
pub struct RocEntry {
    shared: Arc<RocShared>,
}

impl RocEntry {
    pub fn id(&self) -> RequestId {
        self.shared.id
    }

    pub fn state(&self) -> RocState {
        *self.shared.state.lock().unwrap()
    }

    /// Hands a just-arrived payload to this RoC if it is suspended in
    /// `receive()`. Returns `false` (caller should discard the frame)
    /// if it is not currently waiting for one.
    pub fn deliver_payload(&self, payload: Bytes) -> bool {
        let mut waiter = self.shared.waiter.lock().unwrap();
        if matches!(*waiter, PendingWaiter::Receive { .. }) {
            if let PendingWaiter::Receive { ack } = std::mem::replace(&mut *waiter, PendingWaiter::None) {
                let _ = ack.send(ResumeOutcome::Payload(payload));
                return true;
            }
        }
        false
    }

    /// Called by the connection's sender loop once it has popped this
    /// id off the send queue. Returns the registered producer so the
    /// sender can frame and write it, plus the ack handle to resume the
    /// waiting task once the write completes; `None` if the RoC is not
    /// (or no longer) waiting to send.
    pub fn take_send_producer(&self) -> Option<(Box<dyn FnOnce() -> Vec<Bytes> + Send>, SendAck)> {
        let mut waiter = self.shared.waiter.lock().unwrap();
        if matches!(*waiter, PendingWaiter::Send { .. }) {
            self.shared.queued_for_send.store(false, Ordering::SeqCst);
            if let PendingWaiter::Send { producer, ack } =
                std::mem::replace(&mut *waiter, PendingWaiter::None)
            {
                return Some((producer, SendAck(ack)));
            }
        }
        None
    }

    /// Resumes whatever suspension is currently active with an error,
    /// used for shutdown fan-out and eviction. A no-op if the RoC is
    /// not suspended (e.g. it is still `Running` or already
    /// `Terminated`).
    pub fn resume_with_error(&self, err: EngineError) {
        let mut waiter = self.shared.waiter.lock().unwrap();
        let prev = std::mem::replace(&mut *waiter, PendingWaiter::None);
        match prev {
            PendingWaiter::Send { ack, .. } => {
                let _ = ack.send(ResumeOutcome::Error(err));
            }
            PendingWaiter::Receive { ack } | PendingWaiter::User { ack } => {
                let _ = ack.send(ResumeOutcome::Error(err));
            }
            PendingWaiter::None => {}
        }
    }

    pub fn resume_with_code(&self, code: i64) {
        let mut waiter = self.shared.waiter.lock().unwrap();
        if let PendingWaiter::User { .. } = &*waiter {
            if let PendingWaiter::User { ack } = std::mem::replace(&mut *waiter, PendingWaiter::None)
            {
                let _ = ack.send(ResumeOutcome::UserCode(code));
            }
        }
    }

    /// Marks this RoC `Terminated`, the terminal state spec.md §4.4
    /// requires on every exit path: normal handler completion, eviction,
    /// and shutdown fan-out alike.
    pub fn mark_terminated(&self) {
        self.shared.set_state(RocState::Terminated);
    }
}

/// Resumes a send suspension exactly once, either because the sender
/// loop wrote the framed payload or because it failed to.
pub struct SendAck(oneshot::Sender<ResumeOutcome>);

impl SendAck {
    pub fn accept(self) {
        let _ = self.0.send(ResumeOutcome::SendAccepted);
    }

    pub fn fail(self, err: EngineError) {
        let _ = self.0.send(ResumeOutcome::Error(err));
    }
}

/// The per-request-handler view: id plus the four suspension
/// primitives. Handlers never touch a socket or the send queue
/// directly, only through this.
///
/// # Contract
/// - Each suspension method checks `evicted` twice: once before
///   allocating the oneshot ack, once again after acquiring the waiter
///   lock. Eviction can land in the gap between the two, and once a
///   `RequestSet` drops an entry nothing will ever fire the ack, so the
///   second check is what turns that race into a fast `Err` instead of
///   a hang.
/// - Every suspension method leaves `state()` as `Running` again on
///   successful resume; only `mark_terminated` moves it to the
///   terminal state.
pub struct EventDispatcher {
    shared: Arc<RocShared>,
    send_queue_tx: mpsc::UnboundedSender<RequestId>,
}

impl EventDispatcher {
    pub fn id(&self) -> RequestId {
        self.shared.id
    }

    pub fn state(&self) -> RocState {
        *self.shared.state.lock().unwrap()
    }

    /// Registers on the connection's send queue and suspends until the
    /// sender loop invokes `producer` and writes its output. Re-calling
    /// `send` while already queued is a no-op on the queue (the RoC
    /// stays queued once), matching spec.md §4.2's "re-registering while
    /// queued is a no-op".
    pub async fn send(&self, producer: impl FnOnce() -> Vec<Bytes> + Send + 'static) -> Result<()> {
        if self.shared.evicted.load(Ordering::SeqCst) {
            return Err(EngineError::too_many_requests());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut waiter = self.shared.waiter.lock().unwrap();
            // Re-check under the lock: eviction may have landed between
            // the check above and acquiring it, and once a `RequestSet`
            // drops an entry nothing will ever deliver this waiter's ack.
            if self.shared.evicted.load(Ordering::SeqCst) {
                return Err(EngineError::too_many_requests());
            }
            *waiter = PendingWaiter::Send {
                producer: Box::new(producer),
                ack: ack_tx,
            };
        }
        self.shared.set_state(RocState::SuspendedSend);
        if !self.shared.queued_for_send.swap(true, Ordering::SeqCst) {
            let _ = self.send_queue_tx.send(self.shared.id);
        }
        let outcome = ack_rx
            .await
            .map_err(|_| EngineError::shutdown_requested())?;
        self.shared.set_state(RocState::Running);
        match outcome {
            ResumeOutcome::SendAccepted => Ok(()),
            ResumeOutcome::Error(err) => Err(err),
            _ => Err(EngineError::protocol("dispatcher.mismatched_resume", "send suspension resumed with a non-send outcome")),
        }
    }

    /// Suspends until the receiver loop delivers the next payload
    /// addressed to this id.
    pub async fn receive(&self) -> Result<Bytes> {
        if self.shared.evicted.load(Ordering::SeqCst) {
            return Err(EngineError::too_many_requests());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut waiter = self.shared.waiter.lock().unwrap();
            if self.shared.evicted.load(Ordering::SeqCst) {
                return Err(EngineError::too_many_requests());
            }
            *waiter = PendingWaiter::Receive { ack: ack_tx };
        }
        self.shared.set_state(RocState::SuspendedReceive);
        let outcome = ack_rx
            .await
            .map_err(|_| EngineError::shutdown_requested())?;
        self.shared.set_state(RocState::Running);
        match outcome {
            ResumeOutcome::Payload(bytes) => Ok(bytes),
            ResumeOutcome::Error(err) => Err(err),
            _ => Err(EngineError::protocol("dispatcher.mismatched_resume", "receive suspension resumed with a non-payload outcome")),
        }
    }

    /// Voluntarily yields to other RoCs on the connection. Tokio's own
    /// scheduler is the "global yielded-RoC resumer" spec.md §4.4
    /// describes.
    pub async fn yield_now(&self) {
        self.shared.set_state(RocState::SuspendedYield);
        tokio::task::yield_now().await;
        self.shared.set_state(RocState::Running);
    }

    /// Suspends waiting for an external resume (a timer firing, an
    /// out-of-band abort) to deliver a user code.
    pub async fn await_user_resume(&self) -> Result<i64> {
        if self.shared.evicted.load(Ordering::SeqCst) {
            return Err(EngineError::too_many_requests());
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut waiter = self.shared.waiter.lock().unwrap();
            if self.shared.evicted.load(Ordering::SeqCst) {
                return Err(EngineError::too_many_requests());
            }
            *waiter = PendingWaiter::User { ack: ack_tx };
        }
        self.shared.set_state(RocState::SuspendedUser);
        let outcome = ack_rx
            .await
            .map_err(|_| EngineError::shutdown_requested())?;
        self.shared.set_state(RocState::Running);
        match outcome {
            ResumeOutcome::UserCode(code) => Ok(code),
            ResumeOutcome::Error(err) => Err(err),
            _ => Err(EngineError::protocol("dispatcher.mismatched_resume", "user suspension resumed with an unexpected outcome")),
        }
    }

    /// Marks this RoC `Terminated`; called once the handler task has
    /// run to completion, the counterpart of `RocEntry::mark_terminated`
    /// for the shutdown/eviction paths.
    pub fn mark_terminated(&self) {
        self.shared.set_state(RocState::Terminated);
    }
}

/// Creates a fresh RoC: the `RocEntry` half lives in the `RequestSet`,
/// the `EventDispatcher` half is moved into the task that runs the
/// handler.
pub fn new_roc(id: RequestId, send_queue_tx: mpsc::UnboundedSender<RequestId>, now: Instant) -> (RocEntry, EventDispatcher) {
    let shared = Arc::new(RocShared {
        id,
        state: Mutex::new(RocState::Fresh),
        waiter: Mutex::new(PendingWaiter::None),
        queued_for_send: AtomicBool::new(false),
        evicted: AtomicBool::new(false),
        last_activity: Mutex::new(now),
    });
    (
        RocEntry { shared: shared.clone() },
        EventDispatcher {
            shared,
            send_queue_tx,
        },
    )
}

impl crate::request_set::Evictable for RocEntry {
    fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock().unwrap()
    }

    fn touch(&mut self, now: Instant) {
        *self.shared.last_activity.lock().unwrap() = now;
    }

    fn notify_evicted(&mut self) {
        // Set before resuming: a `Running` RoC has no registered waiter
        // right now (the resume below is then a no-op), but it may call
        // `send`/`receive`/`await_user_resume` later, after `RequestSet`
        // has already dropped this entry — with nothing left to deliver
        // an ack to, that call must fail fast instead of registering a
        // waiter no one will ever resume.
        self.shared.evicted.store(true, Ordering::SeqCst);
        self.shared.set_state(RocState::Terminated);
        self.resume_with_error(EngineError::too_many_requests());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_suspends_until_sender_loop_consumes_it() {
        let (send_tx, mut send_rx) = mpsc::unbounded_channel();
        let (entry, dispatcher) = new_roc(RequestId(1), send_tx, Instant::now());

        let handler = tokio::spawn(async move { dispatcher.send(|| vec![Bytes::from_static(b"hi")]).await });

        let queued_id = send_rx.recv().await.unwrap();
        assert_eq!(queued_id, RequestId(1));
        assert_eq!(entry.state(), RocState::SuspendedSend);

        let (producer, ack) = entry.take_send_producer().unwrap();
        let chunks = producer();
        assert_eq!(&chunks[0][..], b"hi");
        ack.accept();

        handler.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receive_suspends_until_payload_delivered() {
        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let (entry, dispatcher) = new_roc(RequestId(2), send_tx, Instant::now());

        let handler = tokio::spawn(async move { dispatcher.receive().await });
        tokio::task::yield_now().await;
        assert!(entry.deliver_payload(Bytes::from_static(b"payload")));

        let payload = handler.await.unwrap().unwrap();
        assert_eq!(&payload[..], b"payload");
    }

    #[tokio::test]
    async fn shutdown_resumes_a_suspended_receive_with_an_error() {
        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let (entry, dispatcher) = new_roc(RequestId(3), send_tx, Instant::now());

        let handler = tokio::spawn(async move { dispatcher.receive().await });
        tokio::task::yield_now().await;
        entry.resume_with_error(EngineError::shutdown_requested());

        let err = handler.await.unwrap().unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::Shutdown);
    }

    #[test]
    fn mark_terminated_is_visible_through_both_halves() {
        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let (entry, dispatcher) = new_roc(RequestId(5), send_tx, Instant::now());
        assert_eq!(entry.state(), RocState::Fresh);
        dispatcher.mark_terminated();
        assert_eq!(entry.state(), RocState::Terminated);
    }

    /// Reproduces the eviction race: a `Running` RoC (no registered
    /// waiter) is evicted, `RequestSet` drops its entry, and the RoC
    /// only later calls `send`. Before the `evicted` flag this would
    /// register a waiter and queue an id that `RequestSet::get` can
    /// never find again, hanging the task forever; now it fails fast.
    #[tokio::test]
    async fn send_after_eviction_fails_fast_instead_of_hanging() {
        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let (mut entry, dispatcher) = new_roc(RequestId(6), send_tx, Instant::now());

        // Simulate `RequestSet::get_or_create`'s eviction path: the RoC
        // is currently `Running`, so this is the no-op branch of
        // `resume_with_error`.
        crate::request_set::Evictable::notify_evicted(&mut entry);

        let err = dispatcher.send(|| vec![]).await.unwrap_err();
        assert_eq!(err.category(), roc_core::error::ErrorCategory::TooManyRequests);
    }

    #[tokio::test]
    async fn re_registering_send_while_queued_does_not_requeue() {
        let (send_tx, mut send_rx) = mpsc::unbounded_channel();
        let (entry, dispatcher) = new_roc(RequestId(4), send_tx, Instant::now());

        let d = Arc::new(dispatcher);
        let first = {
            let d = d.clone();
            tokio::spawn(async move { d.send(|| vec![Bytes::from_static(b"first")]).await })
        };
        tokio::task::yield_now().await;

        // Still queued (nothing has popped id 4 off the send queue yet):
        // a second `send` call must overwrite the pending producer in
        // place rather than pushing a second queue entry.
        let second = {
            let d = d.clone();
            tokio::spawn(async move { d.send(|| vec![Bytes::from_static(b"second")]).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(send_rx.recv().await.unwrap(), RequestId(4));
        assert!(send_rx.try_recv().is_err());

        // Only the second call's producer is still registered; the
        // first's waiter was silently overwritten, so its oneshot
        // sender was dropped and it resolves to a shutdown error
        // instead of ever being accepted.
        let (producer, ack) = entry.take_send_producer().unwrap();
        assert_eq!(&producer()[0][..], b"second");
        ack.accept();

        second.await.unwrap().unwrap();
        assert!(first.await.unwrap().is_err());
    }
}
