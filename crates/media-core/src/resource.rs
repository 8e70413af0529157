//! Capability traits for the external media resources
//!
//! The proxies never talk to a concrete media stack. They consume a container
//! resource and its child buffer resources through these traits, which model
//! a strict call/event protocol: mutating calls either fail synchronously or
//! start work whose completion is reported later through one-shot listeners.
//!
//! # Contract
//!
//! - A listener fires at most once. Listeners armed while an event is being
//!   emitted wait for the next occurrence of that event.
//! - A child buffer reports `is_busy()` from the moment an asynchronous call
//!   (`append`, `remove_range`) is accepted until it emits update-complete.
//! - An error event on a child buffer is followed by update-complete once the
//!   buffer leaves its busy state.
//! - `abort()` on a busy child buffer ends the update and emits
//!   update-complete.
//! - Once a child buffer has been removed from its container, every mutating
//!   call on it fails with `InvalidState`. Removing a busy buffer reports an
//!   `InvalidState` error event on it.

use std::rc::Rc;

use bytes::Bytes;

use crate::error::{MediaSourceError, Result};
use crate::types::{AppendMode, AttachmentState, EndOfStreamError, TimeRanges, TrackInfo};

/// One-shot listener for events without payload
pub type Listener = Box<dyn FnOnce()>;

/// One-shot listener for error events
pub type ErrorListener = Box<dyn FnOnce(MediaSourceError)>;

/// Shared handle to a child buffer resource
pub type BufferHandle = Rc<dyn BufferResource>;

/// Top-level media resource presented to a playback consumer
pub trait ContainerResource {
    /// Create a child buffer for `content_type`
    fn add_child_buffer(&self, content_type: &str) -> Result<BufferHandle>;

    /// Detach `buffer` from this container
    fn remove_child_buffer(&self, buffer: &BufferHandle) -> Result<()>;

    /// Signal that no more media will be appended
    fn end_of_stream(&self, error: Option<EndOfStreamError>) -> Result<()>;

    /// Current attachment state
    fn attachment_state(&self) -> AttachmentState;

    /// Child buffers currently attached to this container
    fn child_buffers(&self) -> Vec<BufferHandle>;

    /// Whether `content_type` could be used with `add_child_buffer`
    fn is_type_supported(&self, content_type: &str) -> bool;

    /// Set the seekable range reported for live streams
    fn set_live_seekable_range(&self, start: f64, end: f64) -> Result<()>;

    /// Clear the live seekable range
    fn clear_live_seekable_range(&self) -> Result<()>;

    /// Fires when the container becomes attached to a consumer
    fn on_attached(&self, listener: Listener);

    /// Fires when the container is detached from its consumer
    fn on_detached(&self, listener: Listener);

    /// Fires when end-of-stream has fully taken effect
    fn on_fully_ended(&self, listener: Listener);
}

/// One content-typed buffer attached to a container
pub trait BufferResource {
    /// Start appending `data`; completion is reported by update-complete
    fn append(&self, data: Bytes) -> Result<()>;

    /// Start removing `[start, end)`; completion is reported by update-complete
    fn remove_range(&self, start: f64, end: f64) -> Result<()>;

    /// Change the content type used for subsequent appends
    fn change_type(&self, content_type: &str) -> Result<()>;

    fn set_timestamp_offset(&self, offset: f64) -> Result<()>;

    fn set_append_window_start(&self, start: f64) -> Result<()>;

    fn set_append_window_end(&self, end: f64) -> Result<()>;

    fn set_mode(&self, mode: AppendMode) -> Result<()>;

    /// True while an asynchronous call is being processed
    fn is_busy(&self) -> bool;

    /// Cancel whatever the buffer is doing
    fn abort(&self) -> Result<()>;

    /// Buffered time ranges
    fn buffered(&self) -> Result<TimeRanges>;

    fn audio_tracks(&self) -> Vec<TrackInfo>;

    fn video_tracks(&self) -> Vec<TrackInfo>;

    /// Fires when the current asynchronous call finishes
    fn on_update_complete(&self, listener: Listener);

    /// Fires when the current asynchronous call fails
    fn on_error(&self, listener: ErrorListener);
}
