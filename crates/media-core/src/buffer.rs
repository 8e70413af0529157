//! BufferProxy
//!
//! Serializes content operations (configure, append, remove a range, change
//! type) against one child buffer resource. Appends and removals stay in
//! flight until the resource emits update-complete; everything else settles
//! during dispatch.
//!
//! An error event from the resource, or a call to [`BufferProxy::abort`],
//! fails the in-flight Operation and every queued one, in submission order.
//! After the container removes the buffer every Operation fails with
//! `InvalidState`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{MediaSourceError, Result};
use crate::queue::{self, Dispatched, Driver, Operation, OperationQueue, Pending, Settle};
use crate::resource::{BufferHandle, BufferResource};
use crate::types::{BufferOptions, TimeRanges, TrackInfo};

/// Content operation kinds
#[derive(Debug)]
pub(crate) enum BufferOpKind {
    Configure(BufferOptions),
    Append(Bytes),
    RemoveRange { start: f64, end: f64 },
    ChangeType(String),
}

impl BufferOpKind {
    fn name(&self) -> &'static str {
        match self {
            BufferOpKind::Configure(_) => "CONFIGURE",
            BufferOpKind::Append(_) => "APPEND",
            BufferOpKind::RemoveRange { .. } => "REMOVE_RANGE",
            BufferOpKind::ChangeType(_) => "CHANGE_TYPE",
        }
    }
}

pub(crate) struct BufferOp {
    kind: BufferOpKind,
    done: Settle<()>,
}

impl Operation for BufferOp {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn fail(self, error: MediaSourceError) {
        self.done.fail(error);
    }
}

/// The Operation currently issued to the resource
struct InFlight {
    id: u64,
    name: &'static str,
    done: Settle<()>,
}

pub(crate) struct BufferInner {
    resource: BufferHandle,
    queue: OperationQueue<BufferOp>,
    current: RefCell<Option<InFlight>>,
    pending_error: RefCell<Option<MediaSourceError>>,
    next_id: Cell<u64>,
    /// Set once by a successful REMOVE_BUFFER; never cleared
    removed: Cell<bool>,
}

/// Proxy in front of one child buffer resource
///
/// Cloning yields another handle to the same proxy. Operations still queued
/// when the last handle is dropped settle with
/// [`MediaSourceError::Abandoned`].
#[derive(Clone)]
pub struct BufferProxy {
    inner: Rc<BufferInner>,
}

impl BufferProxy {
    /// Wrap a child buffer resource created by ADD_BUFFER
    pub(crate) fn new(resource: BufferHandle) -> Self {
        let inner = Rc::new(BufferInner {
            resource,
            queue: OperationQueue::new("buffer"),
            current: RefCell::new(None),
            pending_error: RefCell::new(None),
            next_id: Cell::new(0),
            removed: Cell::new(false),
        });
        BufferInner::arm_error_listener(&inner);
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<BufferInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<BufferInner> {
        Rc::downgrade(&self.inner)
    }

    /// Called by the container once the resource has removed this buffer
    pub(crate) fn mark_removed(&self) {
        self.inner.removed.set(true);
        queue::drain(&self.inner);
    }

    /// Apply the set fields of `options`; settles during dispatch
    pub fn configure(&self, options: BufferOptions) -> Pending<()> {
        self.submit(BufferOpKind::Configure(options))
    }

    /// Queue a CONFIGURE that only sets the timestamp offset
    pub fn set_timestamp_offset(&self, offset: f64) -> Pending<()> {
        self.configure(BufferOptions::new().with_timestamp_offset(offset))
    }

    /// Queue a CONFIGURE that sets both ends of the append window
    pub fn set_append_window(&self, start: f64, end: f64) -> Pending<()> {
        self.configure(BufferOptions::new().with_append_window(start, end))
    }

    /// Append `data`; settles when the resource reports the update complete
    pub fn append(&self, data: impl Into<Bytes>) -> Pending<()> {
        self.submit(BufferOpKind::Append(data.into()))
    }

    /// Remove buffered media in `[start, end)`; settles on update-complete
    pub fn remove_range(&self, start: f64, end: f64) -> Pending<()> {
        self.submit(BufferOpKind::RemoveRange { start, end })
    }

    /// Change the content type used by subsequent appends
    pub fn change_type(&self, content_type: impl Into<String>) -> Pending<()> {
        self.submit(BufferOpKind::ChangeType(content_type.into()))
    }

    /// Cancel every outstanding Operation on this buffer
    ///
    /// Not queued. The in-flight Operation and all queued ones fail with
    /// [`MediaSourceError::Aborted`], the abort is forwarded to the resource,
    /// and the proxy accepts new submissions afterwards. If the buffer is
    /// already draining a resource error, only the raw abort is forwarded.
    pub fn abort(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.removed.get() {
            return Err(removed_error());
        }
        if inner.pending_error.borrow().is_some() {
            debug!("buffer: error pending, forwarding raw abort");
            return inner.resource.abort();
        }

        let failed = BufferInner::fail_outstanding(inner, MediaSourceError::Aborted);
        info!("buffer: aborted {} outstanding operations", failed);

        let result = inner.resource.abort();

        {
            let mut pending = inner.pending_error.borrow_mut();
            if matches!(*pending, Some(MediaSourceError::Aborted)) {
                *pending = None;
            }
        }
        queue::drain(inner);
        result
    }

    /// Buffered time ranges, read straight from the resource
    pub fn buffered(&self) -> Result<TimeRanges> {
        self.inner.resource.buffered()
    }

    pub fn audio_tracks(&self) -> Vec<TrackInfo> {
        self.inner.resource.audio_tracks()
    }

    pub fn video_tracks(&self) -> Vec<TrackInfo> {
        self.inner.resource.video_tracks()
    }

    /// True while the underlying buffer is processing a call
    pub fn is_updating(&self) -> bool {
        self.inner.resource.is_busy()
    }

    /// Number of Operations waiting behind the in-flight one
    pub fn pending_operations(&self) -> usize {
        self.inner.queue.len()
    }

    /// True if an Operation is issued and awaiting its completion event
    pub fn has_operation_in_flight(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// The wrapped child buffer resource
    pub fn resource(&self) -> &BufferHandle {
        &self.inner.resource
    }

    /// True once the container has removed this buffer
    pub fn is_removed(&self) -> bool {
        self.inner.removed.get()
    }

    /// True if both handles refer to the same proxy
    pub fn ptr_eq(&self, other: &BufferProxy) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn submit(&self, kind: BufferOpKind) -> Pending<()> {
        let (done, pending) = Settle::channel();
        queue::submit(&self.inner, BufferOp { kind, done });
        pending
    }
}

impl fmt::Debug for BufferProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferProxy")
            .field("in_flight", &self.inner.current.borrow().as_ref().map(|op| op.name))
            .field("pending_operations", &self.inner.queue.len())
            .field("pending_error", &*self.inner.pending_error.borrow())
            .field("removed", &self.inner.removed.get())
            .finish()
    }
}

fn removed_error() -> MediaSourceError {
    MediaSourceError::invalid_state("source buffer has been removed from its container")
}

impl BufferInner {
    fn arm_error_listener(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        this.resource.on_error(Box::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                BufferInner::arm_error_listener(&inner);
                BufferInner::on_resource_error(&inner, error);
            }
        }));
    }

    fn on_resource_error(this: &Rc<Self>, error: MediaSourceError) {
        warn!("buffer: resource reported error: {}", error);
        let failed = Self::fail_outstanding(this, error);
        debug!("buffer: error drained {} operations", failed);

        if this.resource.is_busy() {
            // The error's trailing update-complete lifts the condition.
            let weak = Rc::downgrade(this);
            this.resource.on_update_complete(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.pending_error.borrow_mut().take();
                    queue::drain(&inner);
                }
            }));
        } else {
            this.pending_error.borrow_mut().take();
            queue::drain(this);
        }
    }

    /// Record `error`, then fail the in-flight Operation and the whole queue
    fn fail_outstanding(this: &Rc<Self>, error: MediaSourceError) -> usize {
        *this.pending_error.borrow_mut() = Some(error.clone());

        let mut failed = 0;
        let current = this.current.borrow_mut().take();
        if let Some(op) = current {
            op.done.fail(error.clone());
            failed += 1;
        }
        failed + this.queue.fail_all(&error)
    }

    fn on_update_complete(this: &Rc<Self>, id: u64) {
        if !this.is_current(id) {
            queue::drain(this);
            return;
        }
        if this.resource.is_busy() {
            // Stale event from an update this proxy did not arm; wait for ours.
            Self::arm_update_listener(this, id);
            return;
        }

        let finished = this.current.borrow_mut().take();
        if let Some(op) = finished {
            debug!("buffer: {} operation complete", op.name);
            op.done.succeed(());
        }
        queue::drain(this);
    }

    fn is_current(&self, id: u64) -> bool {
        self.current.borrow().as_ref().map_or(false, |op| op.id == id)
    }

    fn arm_update_listener(this: &Rc<Self>, id: u64) {
        let weak = Rc::downgrade(this);
        this.resource.on_update_complete(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                BufferInner::on_update_complete(&inner, id);
            }
        }));
    }

    /// Issue an asynchronous call and keep `done` in flight until it completes
    fn issue_async(
        this: &Rc<Self>,
        name: &'static str,
        done: Settle<()>,
        call: impl FnOnce(&dyn BufferResource) -> Result<()>,
    ) -> Dispatched<BufferOp> {
        let id = this.next_id.get();
        this.next_id.set(id + 1);
        *this.current.borrow_mut() = Some(InFlight { id, name, done });
        Self::arm_update_listener(this, id);

        if let Err(e) = call(this.resource.as_ref()) {
            let rejected = if this.is_current(id) {
                this.current.borrow_mut().take()
            } else {
                None
            };
            if let Some(op) = rejected {
                debug!("buffer: {} rejected: {}", name, e);
                op.done.fail(e);
            }
            return Dispatched::Released;
        }
        Dispatched::InFlight
    }

    fn apply_options(resource: &dyn BufferResource, options: &BufferOptions) -> Result<()> {
        if let Some(mode) = options.mode {
            resource.set_mode(mode)?;
        }
        if let Some(offset) = options.timestamp_offset {
            resource.set_timestamp_offset(offset)?;
        }
        match (options.append_window_start, options.append_window_end) {
            (Some(start), Some(end)) => {
                if !(start < end) {
                    return Err(MediaSourceError::invalid_argument(format!(
                        "append window start {} must be before end {}",
                        start, end
                    )));
                }
                // Either order can be rejected against the current window.
                if resource.set_append_window_start(start).is_err() {
                    resource.set_append_window_end(end)?;
                    resource.set_append_window_start(start)?;
                } else {
                    resource.set_append_window_end(end)?;
                }
            }
            (Some(start), None) => resource.set_append_window_start(start)?,
            (None, Some(end)) => resource.set_append_window_end(end)?,
            (None, None) => {}
        }
        Ok(())
    }
}

impl Driver for BufferInner {
    type Op = BufferOp;

    fn queue(&self) -> &OperationQueue<BufferOp> {
        &self.queue
    }

    fn blocked(&self) -> Option<&'static str> {
        if self.pending_error.borrow().is_some() {
            Some("error pending")
        } else if self.current.borrow().is_some() {
            Some("operation in flight")
        } else {
            None
        }
    }

    fn dispatch(this: &Rc<Self>, op: BufferOp) -> Dispatched<BufferOp> {
        let BufferOp { kind, done } = op;
        let name = kind.name();

        if this.removed.get() {
            debug!("buffer: {} on a removed buffer", name);
            done.fail(removed_error());
            return Dispatched::Released;
        }
        if this.resource.is_busy() {
            warn!("buffer: resource busy outside proxy control, failing {}", name);
            done.fail(MediaSourceError::invalid_state(
                "buffer is updating outside of this proxy",
            ));
            return Dispatched::Released;
        }

        match kind {
            BufferOpKind::Configure(options) => {
                done.settle(Self::apply_options(this.resource.as_ref(), &options));
                Dispatched::Released
            }
            BufferOpKind::ChangeType(content_type) => {
                done.settle(this.resource.change_type(&content_type));
                Dispatched::Released
            }
            BufferOpKind::Append(data) => {
                Self::issue_async(this, name, done, move |resource| resource.append(data))
            }
            BufferOpKind::RemoveRange { start, end } => {
                if !(start >= 0.0 && start < end) {
                    done.fail(MediaSourceError::invalid_argument(format!(
                        "invalid removal range [{}, {})",
                        start, end
                    )));
                    return Dispatched::Released;
                }
                Self::issue_async(this, name, done, move |resource| {
                    resource.remove_range(start, end)
                })
            }
        }
    }
}
