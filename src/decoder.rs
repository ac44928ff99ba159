//! The incremental decoder contract driven by [`LoadContext`](crate::LoadContext).
//!
//! A decode runs in two phases. The transfer phase walks the encoded
//! container one chunk per [`iterate`](IncrementalDecoder::iterate) call
//! (a PNG chunk, a JPEG marker segment, a farbfeld row). The processing
//! phase produces pixels, a bounded number of chunks per
//! [`process`](IncrementalDecoder::process) call.

use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::error::LoadError;

/// Non-error outcome of a processing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Work remains; call `process` again to continue from where it stopped.
    MorePending,
    /// The image is fully decoded.
    Done,
}

/// A format decoder that can be advanced in bounded increments.
///
/// Every method must return promptly; none may wait on I/O.
pub trait IncrementalDecoder {
    /// Validate the format signature of `data` and prime decode state.
    ///
    /// An error here is fatal for the load.
    fn start(&mut self, data: Arc<[u8]>) -> Result<(), LoadError>;

    /// Consume one transfer-phase chunk.
    ///
    /// Returns `false` once input is exhausted. Structural damage found
    /// here also ends the phase; it is reported by `process`.
    fn iterate(&mut self) -> bool;

    /// Perform up to `chunks` processing-phase chunks.
    ///
    /// Calling again after [`ProcessStatus::MorePending`] resumes where the
    /// previous call stopped. Calling after `Done` returns `Done` again.
    fn process(&mut self, chunks: usize) -> Result<ProcessStatus, LoadError>;

    /// Dimensions, once the header has been processed.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Move the decoded RGBA8 bitmap out. `None` until processing is done.
    fn take_bitmap(&mut self) -> Option<Bitmap>;

    /// Release all decoder-owned memory. Safe on a partially started decoder
    /// and safe to call twice.
    fn free(&mut self);
}
