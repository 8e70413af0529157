//! Simulated container and buffer resources for integration testing
//!
//! These memory-backed resources follow the call/event contract described in
//! [`crate::resource`] without a real media stack. Events never fire on their
//! own: the test or demo drives them explicitly with [`SimulatedMediaSource::attach`],
//! [`SimulatedBuffer::complete_update`], [`SimulatedBuffer::fail_update`],
//! [`SimulatedMediaSource::finish_end_of_stream`] and friends.
//!
//! Every accepted call is recorded so tests can assert on dispatch order, and
//! calls that arrive while a buffer is busy are counted as overlaps.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{MediaSourceError, Result};
use crate::resource::{BufferHandle, BufferResource, ContainerResource, ErrorListener, Listener};
use crate::types::{AppendMode, AttachmentState, EndOfStreamError, TimeRanges, TrackInfo, TrackKind};

/// Content types accepted by [`SimulatedMediaSource::new`]
pub const DEFAULT_SUPPORTED_TYPES: &[&str] = &[
    "video/mp4",
    "audio/mp4",
    "video/webm",
    "audio/webm",
    "audio/mpeg",
    "audio/wav",
];

/// Default media duration produced per appended byte
pub const DEFAULT_SECONDS_PER_BYTE: f64 = 1.0 / 100_000.0;

/// A call accepted by a [`SimulatedBuffer`]
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Append(usize),
    RemoveRange(f64, f64),
    ChangeType(String),
    SetTimestampOffset(f64),
    SetAppendWindowStart(f64),
    SetAppendWindowEnd(f64),
    SetMode(AppendMode),
    Abort,
}

/// Work the buffer is busy with
#[derive(Debug, Clone, Copy)]
enum Update {
    Append { start: f64, end: f64 },
    Remove { start: f64, end: f64 },
    Foreign,
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

struct BufferState {
    content_type: String,
    update: Option<Update>,
    removed: bool,
    timestamp_offset: f64,
    append_window_start: f64,
    append_window_end: f64,
    mode: AppendMode,
    next_segment_start: f64,
    buffered: TimeRanges,
    seconds_per_byte: f64,
    quota_bytes: Option<usize>,
    calls: Vec<SimCall>,
    overlapping_calls: usize,
    update_listeners: Vec<Listener>,
    error_listeners: Vec<ErrorListener>,
}

impl BufferState {
    fn check_mutable(&mut self) -> Result<()> {
        if self.removed {
            return Err(MediaSourceError::invalid_state(
                "source buffer has been removed from its parent",
            ));
        }
        if self.update.is_some() {
            self.overlapping_calls += 1;
            return Err(MediaSourceError::invalid_state("source buffer is updating"));
        }
        Ok(())
    }

    fn buffered_bytes(&self) -> usize {
        let seconds: f64 = self.buffered.iter().map(|(s, e)| e - s).sum();
        (seconds / self.seconds_per_byte).round() as usize
    }
}

/// In-memory child buffer
pub struct SimulatedBuffer {
    parent: Rc<Cell<AttachmentState>>,
    state: RefCell<BufferState>,
}

impl SimulatedBuffer {
    fn new(content_type: &str, parent: Rc<Cell<AttachmentState>>) -> Self {
        Self {
            parent,
            state: RefCell::new(BufferState {
                content_type: content_type.to_string(),
                update: None,
                removed: false,
                timestamp_offset: 0.0,
                append_window_start: 0.0,
                append_window_end: f64::INFINITY,
                mode: AppendMode::Segments,
                next_segment_start: 0.0,
                buffered: TimeRanges::new(),
                seconds_per_byte: DEFAULT_SECONDS_PER_BYTE,
                quota_bytes: None,
                calls: Vec::new(),
                overlapping_calls: 0,
                update_listeners: Vec::new(),
                error_listeners: Vec::new(),
            }),
        }
    }

    /// Finish the current update successfully and emit update-complete
    ///
    /// Returns false if the buffer was idle.
    pub fn complete_update(&self) -> bool {
        {
            let mut st = self.state.borrow_mut();
            match st.update {
                Some(Update::Append { start, end }) => {
                    let window = (st.append_window_start, st.append_window_end);
                    st.buffered.add(start.max(window.0), end.min(window.1));
                }
                Some(Update::Remove { start, end }) => st.buffered.subtract(start, end),
                Some(Update::Foreign) => {}
                None => return false,
            }
        }
        self.finish_update();
        true
    }

    /// Fail the current update: emit `error`, then update-complete
    ///
    /// Returns false if the buffer was idle.
    pub fn fail_update(&self, error: MediaSourceError) -> bool {
        if !self.report_error(error) {
            return false;
        }
        self.finish_update();
        true
    }

    /// Emit `error` but stay busy until [`complete_update`](Self::complete_update)
    ///
    /// Returns false if the buffer was idle.
    pub fn report_error(&self, error: MediaSourceError) -> bool {
        let listeners = {
            let mut st = self.state.borrow_mut();
            if st.update.is_none() {
                return false;
            }
            std::mem::take(&mut st.error_listeners)
        };
        trace!("simulated buffer: emitting error {}", error);
        for listener in listeners {
            listener(error.clone());
        }
        true
    }

    /// Make the buffer busy as if another caller had started an append
    pub fn start_foreign_update(&self) {
        self.state.borrow_mut().update = Some(Update::Foreign);
    }

    /// Calls accepted so far, in order
    pub fn calls(&self) -> Vec<SimCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of appended payloads accepted so far
    pub fn append_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, SimCall::Append(_)))
            .count()
    }

    /// Calls rejected because another update was still running
    pub fn overlapping_calls(&self) -> usize {
        self.state.borrow().overlapping_calls
    }

    pub fn content_type(&self) -> String {
        self.state.borrow().content_type.clone()
    }

    pub fn timestamp_offset(&self) -> f64 {
        self.state.borrow().timestamp_offset
    }

    pub fn append_window(&self) -> (f64, f64) {
        let st = self.state.borrow();
        (st.append_window_start, st.append_window_end)
    }

    pub fn mode(&self) -> AppendMode {
        self.state.borrow().mode
    }

    /// Limit buffered media to `bytes`; appends beyond it fail with `QuotaExceeded`
    pub fn set_quota(&self, bytes: Option<usize>) {
        self.state.borrow_mut().quota_bytes = bytes;
    }

    pub fn set_seconds_per_byte(&self, seconds: f64) {
        self.state.borrow_mut().seconds_per_byte = seconds;
    }

    fn finish_update(&self) {
        let listeners = {
            let mut st = self.state.borrow_mut();
            st.update = None;
            std::mem::take(&mut st.update_listeners)
        };
        for listener in listeners {
            listener();
        }
    }

    fn detach_from_parent(&self) {
        let busy = {
            let mut st = self.state.borrow_mut();
            st.removed = true;
            st.update.is_some()
        };
        if busy {
            self.fail_update(MediaSourceError::invalid_state(
                "source buffer removed while updating",
            ));
        }
    }

    /// Reopen an ended parent, reject a detached one
    fn touch_parent(&self) -> Result<()> {
        match self.parent.get() {
            AttachmentState::Unattached => {
                Err(MediaSourceError::invalid_state("media source is not open"))
            }
            AttachmentState::Ended => {
                self.parent.set(AttachmentState::Attached);
                Ok(())
            }
            AttachmentState::Attached => Ok(()),
        }
    }

    fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo> {
        let st = self.state.borrow();
        if st.removed {
            return Vec::new();
        }
        let prefix = match kind {
            TrackKind::Video => "video/",
            TrackKind::Audio => "audio/",
        };
        if !st.content_type.starts_with(prefix) {
            return Vec::new();
        }
        vec![TrackInfo {
            id: "1".to_string(),
            kind,
            label: String::new(),
            language: "und".to_string(),
            enabled: true,
        }]
    }
}

impl BufferResource for SimulatedBuffer {
    fn append(&self, data: Bytes) -> Result<()> {
        self.state.borrow_mut().check_mutable()?;
        self.touch_parent()?;

        let mut st = self.state.borrow_mut();
        if let Some(quota) = st.quota_bytes {
            if st.buffered_bytes() + data.len() > quota {
                return Err(MediaSourceError::quota_exceeded(format!(
                    "{} bytes buffered, {} more requested, quota {}",
                    st.buffered_bytes(),
                    data.len(),
                    quota
                )));
            }
        }

        let duration = data.len() as f64 * st.seconds_per_byte;
        let start = st.next_segment_start + st.timestamp_offset;
        st.next_segment_start += duration;
        st.update = Some(Update::Append { start, end: start + duration });
        st.calls.push(SimCall::Append(data.len()));
        Ok(())
    }

    fn remove_range(&self, start: f64, end: f64) -> Result<()> {
        self.state.borrow_mut().check_mutable()?;
        if !(start >= 0.0 && start < end) {
            return Err(MediaSourceError::invalid_argument(format!(
                "invalid removal range [{}, {})",
                start, end
            )));
        }
        self.touch_parent()?;

        let mut st = self.state.borrow_mut();
        st.update = Some(Update::Remove { start, end });
        st.calls.push(SimCall::RemoveRange(start, end));
        Ok(())
    }

    fn change_type(&self, content_type: &str) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check_mutable()?;
        if essence(content_type).is_empty() {
            return Err(MediaSourceError::invalid_argument("empty content type"));
        }
        st.content_type = content_type.to_string();
        st.calls.push(SimCall::ChangeType(content_type.to_string()));
        Ok(())
    }

    fn set_timestamp_offset(&self, offset: f64) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check_mutable()?;
        st.timestamp_offset = offset;
        st.calls.push(SimCall::SetTimestampOffset(offset));
        Ok(())
    }

    fn set_append_window_start(&self, start: f64) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check_mutable()?;
        if !(start >= 0.0 && start < st.append_window_end) {
            return Err(MediaSourceError::invalid_argument(format!(
                "append window start {} outside [0, {})",
                start, st.append_window_end
            )));
        }
        st.append_window_start = start;
        st.calls.push(SimCall::SetAppendWindowStart(start));
        Ok(())
    }

    fn set_append_window_end(&self, end: f64) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check_mutable()?;
        if !(end > st.append_window_start) {
            return Err(MediaSourceError::invalid_argument(format!(
                "append window end {} not after start {}",
                end, st.append_window_start
            )));
        }
        st.append_window_end = end;
        st.calls.push(SimCall::SetAppendWindowEnd(end));
        Ok(())
    }

    fn set_mode(&self, mode: AppendMode) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.check_mutable()?;
        st.mode = mode;
        st.calls.push(SimCall::SetMode(mode));
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.state.borrow().update.is_some()
    }

    fn abort(&self) -> Result<()> {
        let busy = {
            let mut st = self.state.borrow_mut();
            if st.removed {
                return Err(MediaSourceError::invalid_state(
                    "source buffer has been removed from its parent",
                ));
            }
            st.calls.push(SimCall::Abort);
            st.append_window_start = 0.0;
            st.append_window_end = f64::INFINITY;
            st.update.is_some()
        };
        if busy {
            // The aborted work is discarded; only the event is emitted.
            self.finish_update();
        }
        Ok(())
    }

    fn buffered(&self) -> Result<TimeRanges> {
        let st = self.state.borrow();
        if st.removed {
            return Err(MediaSourceError::invalid_state(
                "source buffer has been removed from its parent",
            ));
        }
        Ok(st.buffered.clone())
    }

    fn audio_tracks(&self) -> Vec<TrackInfo> {
        self.tracks(TrackKind::Audio)
    }

    fn video_tracks(&self) -> Vec<TrackInfo> {
        self.tracks(TrackKind::Video)
    }

    fn on_update_complete(&self, listener: Listener) {
        self.state.borrow_mut().update_listeners.push(listener);
    }

    fn on_error(&self, listener: ErrorListener) {
        self.state.borrow_mut().error_listeners.push(listener);
    }
}

struct SourceState {
    supported_types: Vec<String>,
    buffers: Vec<Rc<SimulatedBuffer>>,
    ending: bool,
    end_of_stream_calls: Vec<Option<EndOfStreamError>>,
    live_seekable_range: Option<(f64, f64)>,
    attached_listeners: Vec<Listener>,
    detached_listeners: Vec<Listener>,
    ended_listeners: Vec<Listener>,
}

/// In-memory container resource
pub struct SimulatedMediaSource {
    attachment: Rc<Cell<AttachmentState>>,
    state: RefCell<SourceState>,
}

impl SimulatedMediaSource {
    /// Create an unattached source accepting [`DEFAULT_SUPPORTED_TYPES`]
    pub fn new() -> Rc<Self> {
        Self::with_supported_types(DEFAULT_SUPPORTED_TYPES)
    }

    /// Create an unattached source accepting the given type essences
    pub fn with_supported_types(types: &[&str]) -> Rc<Self> {
        Rc::new(Self {
            attachment: Rc::new(Cell::new(AttachmentState::Unattached)),
            state: RefCell::new(SourceState {
                supported_types: types.iter().map(|t| essence(t)).collect(),
                buffers: Vec::new(),
                ending: false,
                end_of_stream_calls: Vec::new(),
                live_seekable_range: None,
                attached_listeners: Vec::new(),
                detached_listeners: Vec::new(),
                ended_listeners: Vec::new(),
            }),
        })
    }

    /// Connect to a consumer and emit the attach event
    pub fn attach(&self) {
        self.attachment.set(AttachmentState::Attached);
        let listeners = std::mem::take(&mut self.state.borrow_mut().attached_listeners);
        trace!("simulated source: attached, {} listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }

    /// Disconnect from the consumer; every child buffer is removed
    pub fn detach(&self) {
        self.attachment.set(AttachmentState::Unattached);
        let (buffers, listeners) = {
            let mut st = self.state.borrow_mut();
            st.ending = false;
            (
                std::mem::take(&mut st.buffers),
                std::mem::take(&mut st.detached_listeners),
            )
        };
        for buffer in buffers {
            buffer.detach_from_parent();
        }
        for listener in listeners {
            listener();
        }
    }

    /// Confirm a pending end-of-stream and emit the fully-ended event
    ///
    /// Returns false if end-of-stream was not requested.
    pub fn finish_end_of_stream(&self) -> bool {
        let listeners = {
            let mut st = self.state.borrow_mut();
            if !st.ending {
                return false;
            }
            st.ending = false;
            std::mem::take(&mut st.ended_listeners)
        };
        for listener in listeners {
            listener();
        }
        true
    }

    /// Complete the current update of every live buffer; returns how many
    pub fn complete_all_updates(&self) -> usize {
        let buffers = self.state.borrow().buffers.clone();
        buffers.iter().filter(|b| b.complete_update()).count()
    }

    /// Live buffer at `index` in creation order
    pub fn buffer(&self, index: usize) -> Option<Rc<SimulatedBuffer>> {
        self.state.borrow().buffers.get(index).cloned()
    }

    pub fn buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    /// Arguments of every accepted end-of-stream call
    pub fn end_of_stream_calls(&self) -> Vec<Option<EndOfStreamError>> {
        self.state.borrow().end_of_stream_calls.clone()
    }

    pub fn live_seekable_range(&self) -> Option<(f64, f64)> {
        self.state.borrow().live_seekable_range
    }

    fn require_open(&self) -> Result<()> {
        if self.attachment.get() == AttachmentState::Attached {
            Ok(())
        } else {
            Err(MediaSourceError::invalid_state("media source is not open"))
        }
    }
}

impl ContainerResource for SimulatedMediaSource {
    fn add_child_buffer(&self, content_type: &str) -> Result<BufferHandle> {
        if essence(content_type).is_empty() {
            return Err(MediaSourceError::invalid_argument("empty content type"));
        }
        if !self.is_type_supported(content_type) {
            return Err(MediaSourceError::not_supported(content_type));
        }
        self.require_open()?;

        let buffer = Rc::new(SimulatedBuffer::new(content_type, Rc::clone(&self.attachment)));
        self.state.borrow_mut().buffers.push(Rc::clone(&buffer));
        Ok(buffer)
    }

    fn remove_child_buffer(&self, buffer: &BufferHandle) -> Result<()> {
        let target = Rc::as_ptr(buffer) as *const ();
        let removed = {
            let mut st = self.state.borrow_mut();
            let index = st
                .buffers
                .iter()
                .position(|b| Rc::as_ptr(b) as *const () == target)
                .ok_or_else(|| {
                    MediaSourceError::invalid_state("buffer does not belong to this media source")
                })?;
            st.buffers.remove(index)
        };
        removed.detach_from_parent();
        Ok(())
    }

    fn end_of_stream(&self, error: Option<EndOfStreamError>) -> Result<()> {
        self.require_open()?;
        let mut st = self.state.borrow_mut();
        if st.buffers.iter().any(|b| b.is_busy()) {
            return Err(MediaSourceError::invalid_state("a source buffer is updating"));
        }
        self.attachment.set(AttachmentState::Ended);
        st.ending = true;
        st.end_of_stream_calls.push(error);
        Ok(())
    }

    fn attachment_state(&self) -> AttachmentState {
        self.attachment.get()
    }

    fn child_buffers(&self) -> Vec<BufferHandle> {
        self.state
            .borrow()
            .buffers
            .iter()
            .map(|b| Rc::clone(b) as BufferHandle)
            .collect()
    }

    fn is_type_supported(&self, content_type: &str) -> bool {
        let essence = essence(content_type);
        self.state.borrow().supported_types.iter().any(|t| *t == essence)
    }

    fn set_live_seekable_range(&self, start: f64, end: f64) -> Result<()> {
        self.require_open()?;
        if !(start >= 0.0 && start <= end) {
            return Err(MediaSourceError::invalid_argument(format!(
                "invalid seekable range [{}, {}]",
                start, end
            )));
        }
        self.state.borrow_mut().live_seekable_range = Some((start, end));
        Ok(())
    }

    fn clear_live_seekable_range(&self) -> Result<()> {
        self.require_open()?;
        self.state.borrow_mut().live_seekable_range = None;
        Ok(())
    }

    fn on_attached(&self, listener: Listener) {
        self.state.borrow_mut().attached_listeners.push(listener);
    }

    fn on_detached(&self, listener: Listener) {
        self.state.borrow_mut().detached_listeners.push(listener);
    }

    fn on_fully_ended(&self, listener: Listener) {
        self.state.borrow_mut().ended_listeners.push(listener);
    }
}
