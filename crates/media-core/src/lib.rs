//! # MSE2 Media Core
//!
//! Request/response front-end for event-driven media buffering resources.
//!
//! The underlying resource permits one mutation at a time per buffer, rejects
//! calls until it is attached to a consumer, and reports completion through
//! one-shot events. This crate hides that protocol behind two proxies whose
//! methods return futures:
//!
//! - [`ContainerProxy`] queues structural operations (add a buffer, remove a
//!   buffer, end of stream) and holds them until the container is attached.
//! - [`BufferProxy`] queues content operations (configure, append, remove a
//!   range, change type) and fails the whole queue on error or
//!   [`abort`](BufferProxy::abort).
//!
//! Operations on one proxy complete in submission order and never overlap.
//! Everything runs on a single thread; the proxies are `!Send`.
//!
//! ## Example
//!
//! ```
//! use mse2_media_core::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let source = SimulatedMediaSource::new();
//! let container = ContainerProxy::new(source.clone());
//!
//! let added = container.add_buffer("video/mp4; codecs=\"avc1.4D4041\"");
//! source.attach();
//! let buffer = added.await?;
//!
//! let appended = buffer.append(vec![0u8; 1024]);
//! source.complete_all_updates();
//! appended.await?;
//! # Ok::<(), MediaSourceError>(())
//! # }).unwrap();
//! ```

pub mod buffer;
pub mod container;
pub mod error;
pub mod queue;
pub mod resource;
pub mod simulated;
pub mod types;

pub use buffer::BufferProxy;
pub use container::ContainerProxy;
pub use error::{MediaSourceError, Result};
pub use queue::Pending;
pub use resource::{BufferHandle, BufferResource, ContainerResource, ErrorListener, Listener};
pub use types::{
    AppendMode, AttachmentState, BufferOptions, EndOfStreamError, TimeRanges, TrackInfo, TrackKind,
};

/// Commonly used types
pub mod prelude {
    pub use crate::buffer::BufferProxy;
    pub use crate::container::ContainerProxy;
    pub use crate::error::{MediaSourceError, Result};
    pub use crate::queue::Pending;
    pub use crate::resource::{BufferHandle, BufferResource, ContainerResource};
    pub use crate::simulated::{SimulatedBuffer, SimulatedMediaSource};
    pub use crate::types::{
        AppendMode, AttachmentState, BufferOptions, EndOfStreamError, TimeRanges,
    };
}
