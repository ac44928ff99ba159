//! # zenload
//!
//! Non-blocking, incrementally resumable image loading for interactive
//! render loops.
//!
//! A load reads its file a bounded block at a time, then decodes it in
//! bounded chunks, one [`LoadContext::step`] per poll. Nothing ever waits:
//! a large wallpaper decode is spread across as many frames as it needs.
//!
//! ## Phases
//!
//! 1. **Transfer**: buffer the file, then walk the encoded container one
//!    chunk at a time (PNG chunks, JPEG marker segments, farbfeld rows).
//!    A container the walk finds damaged fails before any pixel buffer
//!    is allocated.
//! 2. **TransferParse**: parse the header and size the output.
//! 3. **ProcessTransfer**: decode pixels, a bounded number of chunks per step.
//! 4. **ProcessTransferParse**: convert to the requested output layout.
//!
//! Per-step work is tied to the buffered size: `max(1, len / 2)` transfer
//! chunks and `max(1, len / 4)` processing chunks per step.
//!
//! ## Supported Formats
//!
//! Selected by file extension (case-insensitive):
//!
//! - **PNG** (`.png`, `png` feature): all color types and bit depths,
//!   expanded to RGBA8. An interlaced frame is deinterlaced within one
//!   step; its rows are then expanded one per chunk.
//! - **JPEG** (`.jpg`, `.jpeg`, `jpeg` feature): grayscale, RGB and CMYK.
//!   The entropy-coded scan decodes within one step; rows are then
//!   expanded one per chunk.
//! - **farbfeld** (`.ff`): always available.
//!
//! Any other extension loads the raw bytes without decoding.
//!
//! ## Non-Goals
//!
//! - Decoding on worker threads (drive contexts from any thread you like,
//!   one context per thread at a time)
//! - Animated formats
//! - Color management
//!
//! ## Usage
//!
//! ```no_run
//! use zenload::{Purpose, TaskQueue};
//!
//! let mut queue = TaskQueue::new();
//! queue.request_load("menu/wallpaper.png", Purpose::Wallpaper, |outcome| {
//!     match outcome.result {
//!         Ok(output) => {
//!             if let Some(bitmap) = output.bitmap() {
//!                 println!("{}x{}", bitmap.width, bitmap.height);
//!             }
//!         }
//!         Err(e) => eprintln!("{}: {e}", outcome.path.display()),
//!     }
//! })?;
//!
//! // Once per frame:
//! while queue.poll() > 0 {
//!     // render...
//! }
//! # Ok::<(), zenload::LoadError>(())
//! ```

#![forbid(unsafe_code)]

mod bitmap;
mod context;
mod decoder;
mod error;
mod farbfeld;
mod format;
mod limits;
mod pixel;
mod reader;
mod request;
mod task;

#[cfg(feature = "png")]
mod png;

#[cfg(feature = "jpeg")]
mod jpeg;

// Re-exports
#[cfg(feature = "rgb")]
pub use bitmap::BitmapPixel;
pub use bitmap::{Bitmap, LoadOutput};
pub use context::{ChunkBudget, FinalStatus, LoadContext, LoadStats, Phase};
pub use decoder::{IncrementalDecoder, ProcessStatus};
pub use enough::{Stop, StopReason, Unstoppable};
pub use error::LoadError;
pub use farbfeld::FarbfeldDecoder;
pub use format::ImageFormat;
#[cfg(feature = "jpeg")]
pub use self::jpeg::JpegDecoder;
pub use limits::Limits;
pub use pixel::PixelLayout;
#[cfg(feature = "png")]
pub use self::png::PngDecoder;
pub use reader::{AsyncReader, DEFAULT_READ_BLOCK, FileReader, MemoryReader};
pub use request::{LoadRequest, Purpose};
pub use task::{CancelToken, TaskId, TaskOutcome, TaskQueue};
