//! The per-load state machine.
//!
//! A [`LoadContext`] owns one reader and (for recognized formats) one
//! decoder. Each [`step`](LoadContext::step) performs at most one phase's
//! worth of bounded work and reports whether another poll is needed.
//!
//! ```text
//! Transfer ──iterate exhausted──▶ TransferParse ──header──▶ ProcessTransfer
//!    │ (reader still filling)                              │ more pending: stay
//!    ▼                                                     ▼ done / error
//!  poll reader, start decoder                       ProcessTransferParse
//!                                                          │ finalize
//!                                                          ▼
//!                                                        Poll ──free──▶ Released
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use enough::Stop;

use crate::bitmap::{Bitmap, LoadOutput};
use crate::decoder::{IncrementalDecoder, ProcessStatus};
use crate::error::LoadError;
use crate::pixel::{PixelLayout, swap_red_blue};
use crate::reader::AsyncReader;
use crate::request::Purpose;

// ── Phase ───────────────────────────────────────────────────────────

/// Where a context is in its load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Filling the read buffer, then walking the container chunks.
    Transfer,
    /// Container walked; parse the header and size the output.
    TransferParse,
    /// Producing pixels, a bounded number of chunks per step.
    ProcessTransfer,
    /// Finalizing: color conversion and hand-off preparation.
    ProcessTransferParse,
    /// Idle. No further work happens in this phase.
    Poll,
    /// Resources released by [`LoadContext::free`].
    Released,
}

/// Outcome recorded once processing stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalStatus {
    Pending,
    Ok,
    Error,
}

// ── ChunkBudget ─────────────────────────────────────────────────────

/// Per-step work bounds derived from the bytes handed to the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkBudget {
    /// `iterate` calls per transfer step.
    pub transfer: usize,
    /// Chunks per `process` call.
    pub process: usize,
}

impl ChunkBudget {
    /// `max(1, len / 2)` transfer chunks and `max(1, len / 4)` processing chunks.
    pub fn from_available(len: usize) -> Self {
        Self {
            transfer: (len / 2).max(1),
            process: (len / 4).max(1),
        }
    }
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self::from_available(0)
    }
}

/// Counters for one load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// `step` calls that did work.
    pub steps: u64,
    /// Transfer-phase batches run.
    pub transfer_rounds: u32,
    /// Processing-phase batches run.
    pub process_rounds: u32,
}

// ── LoadContext ─────────────────────────────────────────────────────

/// State of one image load, driven by repeated calls to [`step`](Self::step).
///
/// Created by [`LoadRequest::begin`](crate::LoadRequest::begin). A context
/// is never shared: the driver owns it and steps it from one thread at a
/// time, so independent contexts never observe each other.
pub struct LoadContext {
    name: PathBuf,
    purpose: Purpose,
    output_layout: PixelLayout,
    reader: Option<Box<dyn AsyncReader>>,
    decoder: Option<Box<dyn IncrementalDecoder>>,
    phase: Phase,
    budget: ChunkBudget,
    reader_finished: bool,
    decoder_finished: bool,
    blocking_on_processing: bool,
    final_status: FinalStatus,
    error: Option<LoadError>,
    output: Option<LoadOutput>,
    result: Option<Result<LoadOutput, LoadError>>,
    terminal: bool,
    stats: LoadStats,
}

impl LoadContext {
    pub(crate) fn new(
        name: PathBuf,
        purpose: Purpose,
        output_layout: PixelLayout,
        reader: Box<dyn AsyncReader>,
        decoder: Option<Box<dyn IncrementalDecoder>>,
    ) -> Self {
        Self {
            name,
            purpose,
            output_layout,
            reader: Some(reader),
            decoder,
            phase: Phase::Transfer,
            budget: ChunkBudget::default(),
            reader_finished: false,
            decoder_finished: false,
            blocking_on_processing: false,
            final_status: FinalStatus::Pending,
            error: None,
            output: None,
            result: None,
            terminal: false,
            stats: LoadStats::default(),
        }
    }

    /// Advance the load by one bounded unit of work.
    ///
    /// Returns `true` while another poll is needed and `false` once the
    /// load is terminal: succeeded, failed, or cancelled through `stop`.
    /// The outcome is then available from [`take_result`](Self::take_result).
    pub fn step(&mut self, stop: &dyn Stop) -> bool {
        if self.terminal || self.phase == Phase::Released {
            return false;
        }
        if let Err(reason) = stop.check() {
            log::debug!("{}: cancelled in {:?}", self.name.display(), self.phase);
            self.release();
            self.output = None;
            self.finish(Err(LoadError::Cancelled(reason)));
            return false;
        }
        self.stats.steps += 1;

        match self.phase {
            Phase::Transfer => self.transfer(),
            Phase::TransferParse => self.transfer_parse(),
            Phase::ProcessTransfer => self.process_transfer(),
            Phase::ProcessTransferParse => self.process_transfer_parse(),
            Phase::Poll | Phase::Released => {}
        }

        self.complete_if_finished()
    }

    /// Take the terminal outcome. `None` until `step` has returned `false`,
    /// and after the outcome has been taken once.
    pub fn take_result(&mut self) -> Option<Result<LoadOutput, LoadError>> {
        self.result.take()
    }

    /// Release the reader and decoder and reset the round counters.
    ///
    /// Safe to call at any point, and any number of times; only the first
    /// call releases anything.
    pub fn free(&mut self) {
        if self.phase == Phase::Released {
            return;
        }
        self.release();
        self.output = None;
        self.stats.transfer_rounds = 0;
        self.stats.process_rounds = 0;
        self.phase = Phase::Released;
        log::trace!("{}: released", self.name.display());
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn budget(&self) -> ChunkBudget {
        self.budget
    }

    pub fn final_status(&self) -> FinalStatus {
        self.final_status
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// The path (or name) this load was requested for.
    pub fn name(&self) -> &Path {
        &self.name
    }

    pub fn reader_finished(&self) -> bool {
        self.reader_finished
    }

    pub fn decoder_finished(&self) -> bool {
        self.decoder_finished
    }

    /// Whether the header is known and pixel processing must run before
    /// anything else.
    pub fn is_blocking_on_processing(&self) -> bool {
        self.blocking_on_processing
    }

    /// Whether the reader handle is still held.
    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether the decoder handle is still held.
    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    // ── phases ──────────────────────────────────────────────────────

    fn transfer(&mut self) {
        if !self.reader_finished {
            self.poll_reader();
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let exhausted = (0..self.budget.transfer).any(|_| !decoder.iterate());
        self.stats.transfer_rounds += 1;
        if exhausted {
            self.set_phase(Phase::TransferParse);
        }
    }

    fn poll_reader(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        let polled = reader.poll().map(|n| {
            if n > 0 {
                log::trace!(
                    "{}: {n} bytes read, {} buffered",
                    self.name.display(),
                    reader.available().len()
                );
            }
            reader.is_complete().then(|| reader.take())
        });
        match polled {
            Ok(None) => {}
            Ok(Some(data)) => {
                self.reader_finished = true;
                self.begin_decode(data);
            }
            Err(e) => self.fail(e),
        }
    }

    /// The whole file is buffered: size the chunk budget and start the decoder.
    fn begin_decode(&mut self, data: Vec<u8>) {
        self.budget = ChunkBudget::from_available(data.len());
        log::trace!(
            "{}: {} bytes buffered, budget {:?}",
            self.name.display(),
            data.len(),
            self.budget
        );
        let Some(decoder) = self.decoder.as_mut() else {
            self.output = Some(LoadOutput::Raw(data));
            self.final_status = FinalStatus::Ok;
            self.decoder_finished = true;
            self.set_phase(Phase::Poll);
            return;
        };
        let data: Arc<[u8]> = data.into();
        if let Err(e) = decoder.start(data) {
            self.fail(e);
        }
    }

    fn transfer_parse(&mut self) {
        let Some(decoder) = self.decoder.as_mut() else {
            self.set_phase(Phase::Poll);
            return;
        };
        match decoder.process(1) {
            Ok(status) => {
                if let Some((w, h)) = decoder.dimensions() {
                    log::trace!("{}: header parsed, {w}x{h}", self.name.display());
                }
                self.blocking_on_processing = true;
                if status == ProcessStatus::Done {
                    self.final_status = FinalStatus::Ok;
                }
            }
            Err(e) => self.record_error(e),
        }
        if self.blocking_on_processing {
            self.set_phase(Phase::ProcessTransfer);
        } else {
            self.set_phase(Phase::ProcessTransferParse);
        }
    }

    fn process_transfer(&mut self) {
        if self.final_status != FinalStatus::Pending {
            self.set_phase(Phase::ProcessTransferParse);
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            self.record_error(LoadError::DecodeProcessFailed("decoder released".into()));
            self.set_phase(Phase::ProcessTransferParse);
            return;
        };
        self.stats.process_rounds += 1;
        match decoder.process(self.budget.process) {
            Ok(ProcessStatus::MorePending) => {}
            Ok(ProcessStatus::Done) => {
                self.final_status = FinalStatus::Ok;
                self.set_phase(Phase::ProcessTransferParse);
            }
            Err(e) => {
                self.record_error(e);
                self.set_phase(Phase::ProcessTransferParse);
            }
        }
    }

    fn process_transfer_parse(&mut self) {
        match self.final_status {
            FinalStatus::Pending => return,
            FinalStatus::Error => {}
            FinalStatus::Ok => match self.decoder.as_mut().and_then(|d| d.take_bitmap()) {
                Some(mut bitmap) => {
                    self.finalize(&mut bitmap);
                    self.output = Some(LoadOutput::Bitmap(bitmap));
                }
                None => self.record_error(LoadError::DecodeProcessFailed(
                    "decoder finished without a bitmap".into(),
                )),
            },
        }
        self.release_decoder();
        self.decoder_finished = true;
        self.set_phase(Phase::Poll);
    }

    /// Convert the decoded RGBA8 bitmap to the requested output layout.
    fn finalize(&self, bitmap: &mut Bitmap) {
        if self.output_layout == PixelLayout::Bgra8 && bitmap.layout == PixelLayout::Rgba8 {
            swap_red_blue(bitmap.pixels_mut());
            bitmap.layout = PixelLayout::Bgra8;
        }
    }

    // ── completion ──────────────────────────────────────────────────

    fn complete_if_finished(&mut self) -> bool {
        if !(self.reader_finished && self.decoder_finished) {
            return true;
        }
        let result = match self.final_status {
            FinalStatus::Pending => return true,
            FinalStatus::Ok => self.output.take().ok_or_else(|| {
                LoadError::DecodeProcessFailed("load finished without output".into())
            }),
            FinalStatus::Error => Err(self.error.take().unwrap_or_else(|| {
                LoadError::DecodeProcessFailed("load failed without an error".into())
            })),
        };
        self.finish(result);
        false
    }

    fn finish(&mut self, result: Result<LoadOutput, LoadError>) {
        match &result {
            Ok(LoadOutput::Bitmap(b)) => log::debug!(
                "{}: loaded {}x{} {:?} for {:?} in {} steps",
                self.name.display(),
                b.width,
                b.height,
                b.layout,
                self.purpose,
                self.stats.steps
            ),
            Ok(LoadOutput::Raw(bytes)) => log::debug!(
                "{}: loaded {} raw bytes for {:?}",
                self.name.display(),
                bytes.len(),
                self.purpose
            ),
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::warn!("{}: load failed: {e}", self.name.display()),
        }
        self.result = Some(result);
        self.terminal = true;
        if self.phase != Phase::Released {
            self.set_phase(Phase::Poll);
        }
    }

    // ── errors and release ──────────────────────────────────────────

    fn record_error(&mut self, e: LoadError) {
        self.final_status = FinalStatus::Error;
        self.error = Some(e);
    }

    /// Terminal failure outside the processing phase: nothing left to finalize.
    fn fail(&mut self, e: LoadError) {
        self.record_error(e);
        self.release_decoder();
        self.reader_finished = true;
        self.decoder_finished = true;
        self.set_phase(Phase::Poll);
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.free();
        }
    }

    fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.cancel();
        }
        self.release_decoder();
    }

    fn set_phase(&mut self, next: Phase) {
        if self.phase != next {
            log::trace!("{}: {:?} -> {:?}", self.name.display(), self.phase, next);
            self.phase = next;
        }
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        self.free();
    }
}

impl core::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("purpose", &self.purpose)
            .field("phase", &self.phase)
            .field("budget", &self.budget)
            .field("reader_finished", &self.reader_finished)
            .field("decoder_finished", &self.decoder_finished)
            .field("final_status", &self.final_status)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
