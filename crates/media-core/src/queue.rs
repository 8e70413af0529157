//! Operation Queue
//!
//! An ordered list of pending Operations plus the cooperative drain loop
//! shared by [`ContainerProxy`](crate::ContainerProxy) and
//! [`BufferProxy`](crate::BufferProxy).
//!
//! The loop processes one Operation at a time. It suspends when the proxy
//! reports a blocking condition (not attached, pending error, call in
//! flight) or when a barrier Operation asks to be put back at the head.
//! Every resume path (submission, resource event) re-enters [`drain`]; a
//! trigger that arrives while a drain is already running only asks the
//! running loop to take another pass.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{MediaSourceError, Result};

/// Future returned for every submitted Operation
///
/// Settles exactly once, when the drain loop resolves the Operation. If the
/// owning proxy is dropped first it settles with
/// [`MediaSourceError::Abandoned`].
#[must_use = "the operation result is only observable through this future"]
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Settlement half of an Operation's future
///
/// Consumed by `succeed`/`fail`, so an Operation can only be resolved once.
#[derive(Debug)]
pub(crate) struct Settle<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Settle<T> {
    pub(crate) fn channel() -> (Settle<T>, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (Settle { tx }, Pending { rx })
    }

    pub(crate) fn succeed(self, value: T) {
        self.settle(Ok(value));
    }

    pub(crate) fn fail(self, error: MediaSourceError) {
        self.settle(Err(error));
    }

    pub(crate) fn settle(self, result: Result<T>) {
        // The caller may have dropped the future; nothing to report then.
        let _ = self.tx.send(result);
    }
}

/// A queued request that the error path can fail without dispatching it
pub(crate) trait Operation {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Settle the failure path
    fn fail(self, error: MediaSourceError);
}

/// What became of an Operation handed to [`Driver::dispatch`]
pub(crate) enum Dispatched<Op> {
    /// The Operation no longer occupies the queue; keep draining
    Released,
    /// The Operation was issued and is waiting for a completion event
    InFlight,
    /// A barrier is not satisfied yet; the Operation goes back to the head
    Requeue(Op),
}

/// Proxy-specific half of the drain algorithm
pub(crate) trait Driver: Sized {
    type Op: Operation;

    fn queue(&self) -> &OperationQueue<Self::Op>;

    /// Reason the head must not be dispatched right now, if any
    fn blocked(&self) -> Option<&'static str>;

    /// Issue `op` to the underlying resource
    fn dispatch(this: &Rc<Self>, op: Self::Op) -> Dispatched<Self::Op>;
}

/// FIFO of pending Operations owned by one proxy
pub(crate) struct OperationQueue<Op> {
    label: &'static str,
    ops: RefCell<VecDeque<Op>>,
    draining: Cell<bool>,
    rerun: Cell<bool>,
}

impl<Op: Operation> OperationQueue<Op> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            ops: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            rerun: Cell::new(false),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }

    fn push_back(&self, op: Op) {
        self.ops.borrow_mut().push_back(op);
    }

    fn push_front(&self, op: Op) {
        self.ops.borrow_mut().push_front(op);
    }

    fn pop_front(&self) -> Option<Op> {
        self.ops.borrow_mut().pop_front()
    }

    /// Fail every queued Operation in submission order until the queue is empty
    ///
    /// Operations pushed while this runs are failed too.
    pub(crate) fn fail_all(&self, error: &MediaSourceError) -> usize {
        let mut failed = 0;
        while let Some(op) = self.pop_front() {
            trace!("{}: failing queued {} operation", self.label, op.name());
            op.fail(error.clone());
            failed += 1;
        }
        failed
    }
}

/// Append `op` to the tail and attempt a drain
pub(crate) fn submit<D: Driver>(driver: &Rc<D>, op: D::Op) {
    trace!("{}: queued {} operation", driver.queue().label, op.name());
    driver.queue().push_back(op);
    drain(driver);
}

/// Run the drain loop until the queue empties or a suspend condition holds
///
/// Idempotent and reentrant-safe: a call made while a drain is running on the
/// same queue returns immediately after asking for another pass.
pub(crate) fn drain<D: Driver>(driver: &Rc<D>) {
    let queue = driver.queue();
    if queue.draining.replace(true) {
        queue.rerun.set(true);
        return;
    }

    loop {
        queue.rerun.set(false);
        drain_pass(driver);
        if !queue.rerun.get() {
            break;
        }
    }

    queue.draining.set(false);
}

fn drain_pass<D: Driver>(driver: &Rc<D>) {
    let queue = driver.queue();
    while !queue.is_empty() {
        if let Some(reason) = driver.blocked() {
            trace!("{}: drain suspended ({})", queue.label, reason);
            return;
        }

        let Some(op) = queue.pop_front() else {
            return;
        };
        debug!("{}: dispatching {} operation", queue.label, op.name());

        match D::dispatch(driver, op) {
            Dispatched::Released | Dispatched::InFlight => {}
            Dispatched::Requeue(op) => {
                trace!("{}: {} operation waiting at head", queue.label, op.name());
                queue.push_front(op);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    enum Step {
        Sync(u32),
        Async(u32),
        Reject,
        Barrier(u32),
    }

    struct TestOp {
        step: Step,
        done: Settle<u32>,
    }

    impl Operation for TestOp {
        fn name(&self) -> &'static str {
            "test"
        }

        fn fail(self, error: MediaSourceError) {
            self.done.fail(error);
        }
    }

    struct TestDriver {
        queue: OperationQueue<TestOp>,
        ready: Cell<bool>,
        barrier_open: Cell<bool>,
        in_flight: RefCell<Option<TestOp>>,
        dispatched: RefCell<Vec<u32>>,
    }

    impl TestDriver {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                queue: OperationQueue::new("test"),
                ready: Cell::new(true),
                barrier_open: Cell::new(false),
                in_flight: RefCell::new(None),
                dispatched: RefCell::new(Vec::new()),
            })
        }

        fn push(this: &Rc<Self>, step: Step) -> Pending<u32> {
            let (done, pending) = Settle::channel();
            submit(this, TestOp { step, done });
            pending
        }

        fn complete(this: &Rc<Self>) {
            let op = this.in_flight.borrow_mut().take();
            if let Some(TestOp { step: Step::Async(v), done }) = op {
                done.succeed(v);
            }
            drain(this);
        }
    }

    impl Driver for TestDriver {
        type Op = TestOp;

        fn queue(&self) -> &OperationQueue<TestOp> {
            &self.queue
        }

        fn blocked(&self) -> Option<&'static str> {
            if !self.ready.get() {
                Some("not ready")
            } else if self.in_flight.borrow().is_some() {
                Some("in flight")
            } else {
                None
            }
        }

        fn dispatch(this: &Rc<Self>, op: TestOp) -> Dispatched<TestOp> {
            match op.step {
                Step::Sync(v) => {
                    this.dispatched.borrow_mut().push(v);
                    op.done.succeed(v);
                    Dispatched::Released
                }
                Step::Async(v) => {
                    this.dispatched.borrow_mut().push(v);
                    *this.in_flight.borrow_mut() = Some(op);
                    Dispatched::InFlight
                }
                Step::Reject => {
                    op.done.fail(MediaSourceError::invalid_argument("rejected"));
                    Dispatched::Released
                }
                Step::Barrier(v) => {
                    if this.barrier_open.get() {
                        this.dispatched.borrow_mut().push(v);
                        op.done.succeed(v);
                        Dispatched::Released
                    } else {
                        Dispatched::Requeue(op)
                    }
                }
            }
        }
    }

    #[test]
    fn test_sync_operations_settle_in_order() {
        let driver = TestDriver::new();
        let mut a = task::spawn(TestDriver::push(&driver, Step::Sync(1)));
        let mut b = task::spawn(TestDriver::push(&driver, Step::Reject));
        let mut c = task::spawn(TestDriver::push(&driver, Step::Sync(3)));

        assert_eq!(assert_ready_ok!(a.poll()), 1);
        assert_ready_err!(b.poll());
        assert_eq!(assert_ready_ok!(c.poll()), 3);
        assert!(driver.queue.is_empty());
        assert_eq!(*driver.dispatched.borrow(), vec![1, 3]);
    }

    #[test]
    fn test_in_flight_blocks_later_operations() {
        let driver = TestDriver::new();
        let mut a = task::spawn(TestDriver::push(&driver, Step::Async(1)));
        let mut b = task::spawn(TestDriver::push(&driver, Step::Sync(2)));

        assert_pending!(a.poll());
        assert_pending!(b.poll());
        assert_eq!(*driver.dispatched.borrow(), vec![1]);
        assert_eq!(driver.queue.len(), 1);

        TestDriver::complete(&driver);
        assert_eq!(assert_ready_ok!(a.poll()), 1);
        assert_eq!(assert_ready_ok!(b.poll()), 2);
        assert_eq!(*driver.dispatched.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_not_ready_keeps_head_queued() {
        let driver = TestDriver::new();
        driver.ready.set(false);
        let mut a = task::spawn(TestDriver::push(&driver, Step::Sync(1)));
        assert_pending!(a.poll());
        assert_eq!(driver.queue.len(), 1);

        driver.ready.set(true);
        drain(&driver);
        assert_eq!(assert_ready_ok!(a.poll()), 1);
    }

    #[test]
    fn test_barrier_requeues_at_head() {
        let driver = TestDriver::new();
        let mut a = task::spawn(TestDriver::push(&driver, Step::Barrier(1)));
        let mut b = task::spawn(TestDriver::push(&driver, Step::Sync(2)));
        assert_pending!(a.poll());
        assert_pending!(b.poll());
        assert_eq!(driver.queue.len(), 2);

        driver.barrier_open.set(true);
        drain(&driver);
        assert_eq!(assert_ready_ok!(a.poll()), 1);
        assert_eq!(assert_ready_ok!(b.poll()), 2);
    }

    #[test]
    fn test_reentrant_drain_is_deferred() {
        let driver = TestDriver::new();
        driver.queue.draining.set(true);
        let mut a = task::spawn(TestDriver::push(&driver, Step::Sync(1)));
        assert_pending!(a.poll());
        assert!(driver.queue.rerun.get());

        driver.queue.draining.set(false);
        drain(&driver);
        assert_eq!(assert_ready_ok!(a.poll()), 1);
    }

    #[test]
    fn test_fail_all_empties_queue() {
        let driver = TestDriver::new();
        driver.ready.set(false);
        let mut a = task::spawn(TestDriver::push(&driver, Step::Sync(1)));
        let mut b = task::spawn(TestDriver::push(&driver, Step::Sync(2)));

        assert_eq!(driver.queue.fail_all(&MediaSourceError::Aborted), 2);
        assert_eq!(assert_ready_err!(a.poll()), MediaSourceError::Aborted);
        assert_eq!(assert_ready_err!(b.poll()), MediaSourceError::Aborted);
        assert!(driver.queue.is_empty());
    }

    #[test]
    fn test_dropped_settle_abandons_future() {
        let (done, pending) = Settle::<()>::channel();
        drop(done);
        let mut pending = task::spawn(pending);
        assert_eq!(assert_ready_err!(pending.poll()), MediaSourceError::Abandoned);
    }
}
