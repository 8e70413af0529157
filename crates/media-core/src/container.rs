//! ContainerProxy
//!
//! Serializes structural operations (add a buffer, remove a buffer, mark end
//! of stream) against the top-level container resource. Nothing is
//! dispatched until the container has reported attachment at least once.
//!
//! END_OF_STREAM is a barrier: it stays at the head of the queue until every
//! child buffer the resource lists is idle, rescanning from the first buffer
//! each time one of them finishes an update. Buffers whose proxy has been
//! dropped still count.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::buffer::{BufferInner, BufferProxy};
use crate::error::{MediaSourceError, Result};
use crate::queue::{self, Dispatched, Driver, Operation, OperationQueue, Pending, Settle};
use crate::resource::ContainerResource;
use crate::types::{AttachmentState, EndOfStreamError};

pub(crate) enum ContainerOp {
    AddBuffer {
        content_type: String,
        done: Settle<BufferProxy>,
    },
    RemoveBuffer {
        buffer: BufferProxy,
        done: Settle<()>,
    },
    EndOfStream {
        error: Option<EndOfStreamError>,
        done: Settle<()>,
    },
}

impl Operation for ContainerOp {
    fn name(&self) -> &'static str {
        match self {
            ContainerOp::AddBuffer { .. } => "ADD_BUFFER",
            ContainerOp::RemoveBuffer { .. } => "REMOVE_BUFFER",
            ContainerOp::EndOfStream { .. } => "END_OF_STREAM",
        }
    }

    fn fail(self, error: MediaSourceError) {
        match self {
            ContainerOp::AddBuffer { done, .. } => done.fail(error),
            ContainerOp::RemoveBuffer { done, .. } => done.fail(error),
            ContainerOp::EndOfStream { done, .. } => done.fail(error),
        }
    }
}

pub(crate) struct ContainerInner {
    resource: Rc<dyn ContainerResource>,
    opened: Cell<bool>,
    queue: OperationQueue<ContainerOp>,
    /// Non-owning references to the buffer proxies created by ADD_BUFFER
    buffers: RefCell<Vec<Weak<BufferInner>>>,
}

/// Proxy in front of a container resource
///
/// Cloning yields another handle to the same proxy.
#[derive(Clone)]
pub struct ContainerProxy {
    inner: Rc<ContainerInner>,
}

impl ContainerProxy {
    /// Wrap a container resource
    ///
    /// If the resource is already attached the proxy starts opened; otherwise
    /// it waits for the resource's attach signal.
    pub fn new(resource: Rc<dyn ContainerResource>) -> Self {
        let already_attached = resource.attachment_state() != AttachmentState::Unattached;
        let inner = Rc::new(ContainerInner {
            resource,
            opened: Cell::new(already_attached),
            queue: OperationQueue::new("container"),
            buffers: RefCell::new(Vec::new()),
        });

        if !already_attached {
            let weak = Rc::downgrade(&inner);
            inner.resource.on_attached(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    ContainerInner::on_attached(&inner);
                }
            }));
        }

        inner.resource.on_detached(Box::new(|| {
            warn!("container: detached from its consumer");
        }));

        Self { inner }
    }

    /// Create a child buffer for `content_type`; resolves with its proxy
    pub fn add_buffer(&self, content_type: impl Into<String>) -> Pending<BufferProxy> {
        let (done, pending) = Settle::channel();
        queue::submit(
            &self.inner,
            ContainerOp::AddBuffer {
                content_type: content_type.into(),
                done,
            },
        );
        pending
    }

    /// Remove the child buffer behind `buffer`
    ///
    /// Once this resolves every later Operation on `buffer` fails with
    /// [`MediaSourceError::InvalidState`].
    pub fn remove_buffer(&self, buffer: &BufferProxy) -> Pending<()> {
        let (done, pending) = Settle::channel();
        queue::submit(
            &self.inner,
            ContainerOp::RemoveBuffer {
                buffer: buffer.clone(),
                done,
            },
        );
        pending
    }

    /// Mark the end of the stream once every buffer is idle
    ///
    /// Resolves when the resource confirms the stream has fully ended.
    pub fn end_of_stream(&self, error: Option<EndOfStreamError>) -> Pending<()> {
        let (done, pending) = Settle::channel();
        queue::submit(&self.inner, ContainerOp::EndOfStream { error, done });
        pending
    }

    /// True once the resource has reported attachment
    pub fn is_opened(&self) -> bool {
        self.inner.opened.get()
    }

    pub fn attachment_state(&self) -> AttachmentState {
        self.inner.resource.attachment_state()
    }

    pub fn is_type_supported(&self, content_type: &str) -> bool {
        self.inner.resource.is_type_supported(content_type)
    }

    pub fn set_live_seekable_range(&self, start: f64, end: f64) -> Result<()> {
        self.inner.resource.set_live_seekable_range(start, end)
    }

    pub fn clear_live_seekable_range(&self) -> Result<()> {
        self.inner.resource.clear_live_seekable_range()
    }

    /// Number of Operations waiting in the queue
    pub fn pending_operations(&self) -> usize {
        self.inner.queue.len()
    }

    /// Live buffer proxies created by this container
    pub fn buffers(&self) -> Vec<BufferProxy> {
        self.inner.live_buffers()
    }

    /// The wrapped container resource, e.g. to attach it to a consumer
    pub fn resource(&self) -> &Rc<dyn ContainerResource> {
        &self.inner.resource
    }
}

impl fmt::Debug for ContainerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerProxy")
            .field("opened", &self.inner.opened.get())
            .field("pending_operations", &self.inner.queue.len())
            .field("buffers", &self.inner.buffers.borrow().len())
            .finish()
    }
}

impl ContainerInner {
    fn on_attached(this: &Rc<Self>) {
        info!("container: attached, resuming queued operations");
        this.opened.set(true);
        queue::drain(this);
    }

    /// Upgrade the weak buffer list, pruning proxies that no longer exist
    fn live_buffers(&self) -> Vec<BufferProxy> {
        let mut buffers = self.buffers.borrow_mut();
        buffers.retain(|weak| weak.strong_count() > 0);
        buffers
            .iter()
            .filter_map(Weak::upgrade)
            .map(BufferProxy::from_inner)
            .collect()
    }

    /// Arm a retry on the first busy child buffer; true if one was found
    fn wait_for_busy_buffer(this: &Rc<Self>) -> bool {
        let children = this.resource.child_buffers();
        let Some(busy) = children.iter().find(|child| child.is_busy()) else {
            return false;
        };

        debug!("container: end of stream waiting for a buffer to go idle");
        let weak = Rc::downgrade(this);
        busy.on_update_complete(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                queue::drain(&inner);
            }
        }));
        true
    }

    fn end_of_stream(
        this: &Rc<Self>,
        error: Option<EndOfStreamError>,
        done: Settle<()>,
    ) -> Dispatched<ContainerOp> {
        if Self::wait_for_busy_buffer(this) {
            return Dispatched::Requeue(ContainerOp::EndOfStream { error, done });
        }

        // Armed before the call so a synchronous confirmation is not missed.
        let slot = Rc::new(RefCell::new(Some(done)));
        let listener_slot = Rc::clone(&slot);
        this.resource.on_fully_ended(Box::new(move || {
            if let Some(done) = listener_slot.borrow_mut().take() {
                info!("container: stream fully ended");
                done.succeed(());
            }
        }));

        if let Err(e) = this.resource.end_of_stream(error) {
            let done = slot.borrow_mut().take();
            if let Some(done) = done {
                debug!("container: end of stream rejected: {}", e);
                done.fail(e);
            }
        }
        Dispatched::Released
    }
}

impl Driver for ContainerInner {
    type Op = ContainerOp;

    fn queue(&self) -> &OperationQueue<ContainerOp> {
        &self.queue
    }

    fn blocked(&self) -> Option<&'static str> {
        if self.opened.get() {
            None
        } else {
            Some("waiting for attachment")
        }
    }

    fn dispatch(this: &Rc<Self>, op: ContainerOp) -> Dispatched<ContainerOp> {
        match op {
            ContainerOp::AddBuffer { content_type, done } => {
                match this.resource.add_child_buffer(&content_type) {
                    Ok(handle) => {
                        let proxy = BufferProxy::new(handle);
                        this.buffers.borrow_mut().push(proxy.downgrade());
                        info!("container: added buffer for {}", content_type);
                        done.succeed(proxy);
                    }
                    Err(e) => {
                        debug!("container: add buffer for {} rejected: {}", content_type, e);
                        done.fail(e);
                    }
                }
                Dispatched::Released
            }
            ContainerOp::RemoveBuffer { buffer, done } => {
                let result = this.resource.remove_child_buffer(buffer.resource());
                if result.is_ok() {
                    let removed = buffer.downgrade();
                    this.buffers
                        .borrow_mut()
                        .retain(|weak| weak.strong_count() > 0 && !weak.ptr_eq(&removed));
                    buffer.mark_removed();
                    info!("container: removed buffer");
                }
                done.settle(result);
                Dispatched::Released
            }
            ContainerOp::EndOfStream { error, done } => Self::end_of_stream(this, error, done),
        }
    }
}
