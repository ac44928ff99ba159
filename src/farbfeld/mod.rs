//! Farbfeld adapter (always available).
//!
//! Farbfeld is a simple lossless format: 8-byte magic ("farbfeld"),
//! width/height as u32 big-endian, then RGBA u16 big-endian pixels.
//! One row is both the transfer chunk and the processing chunk: the
//! transfer walk counts complete rows, and processing decodes only rows
//! the walk has seen.

pub(crate) mod decode;

use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::decoder::{IncrementalDecoder, ProcessStatus};
use crate::error::LoadError;
use crate::limits::Limits;
use crate::pixel::PixelLayout;

/// Incremental farbfeld decoder producing RGBA8.
#[derive(Debug, Default)]
pub struct FarbfeldDecoder {
    limits: Limits,
    data: Option<Arc<[u8]>>,
    width: u32,
    height: u32,
    rows_seen: u32,
    rows_decoded: u32,
    pixels: Option<Vec<u8>>,
    done: bool,
}

impl FarbfeldDecoder {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    /// Complete rows found by the transfer walk.
    pub fn rows_seen(&self) -> u32 {
        self.rows_seen
    }
}

impl IncrementalDecoder for FarbfeldDecoder {
    fn start(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        let (width, height) = decode::parse_header(&data)?;
        let expected = decode::encoded_len(width, height).map_err(|_| {
            LoadError::DecodeStartFailed(format!("farbfeld {width}x{height} is too large"))
        })?;
        if data.len() < expected {
            return Err(LoadError::DecodeStartFailed(format!(
                "farbfeld {width}x{height} needs {expected} bytes, file has {}",
                data.len()
            )));
        }
        self.width = width;
        self.height = height;
        self.data = Some(data);
        Ok(())
    }

    fn iterate(&mut self) -> bool {
        let Some(data) = self.data.as_deref() else {
            return false;
        };
        if self.rows_seen >= self.height
            || decode::row_range(data.len(), self.width, self.rows_seen).is_none()
        {
            return false;
        }
        self.rows_seen += 1;
        true
    }

    fn process(&mut self, chunks: usize) -> Result<ProcessStatus, LoadError> {
        if self.done {
            return Ok(ProcessStatus::Done);
        }
        let data = self
            .data
            .clone()
            .ok_or_else(|| LoadError::DecodeProcessFailed("decoder not started".into()))?;
        if self.pixels.is_none() {
            self.pixels = Some(self.limits.alloc_rgba8(self.width, self.height)?);
        }
        let Some(pixels) = self.pixels.as_mut() else {
            return Err(LoadError::DecodeProcessFailed("pixel buffer missing".into()));
        };
        let stride = self.width as usize * 4;

        for _ in 0..chunks {
            if self.rows_decoded == self.height {
                break;
            }
            let y = self.rows_decoded;
            if y >= self.rows_seen {
                return Err(LoadError::DecodeProcessFailed(format!(
                    "farbfeld row {y} was not transferred"
                )));
            }
            let range = decode::row_range(data.len(), self.width, y).ok_or_else(|| {
                LoadError::DecodeProcessFailed(format!("farbfeld data ends before row {y}"))
            })?;
            let start = y as usize * stride;
            decode::decode_row(&data[range], &mut pixels[start..start + stride]);
            self.rows_decoded += 1;
        }

        if self.rows_decoded == self.height {
            self.done = true;
            Ok(ProcessStatus::Done)
        } else {
            Ok(ProcessStatus::MorePending)
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.data.as_ref().map(|_| (self.width, self.height))
    }

    fn take_bitmap(&mut self) -> Option<Bitmap> {
        if !self.done {
            return None;
        }
        let pixels = self.pixels.take()?;
        Some(Bitmap::new(
            pixels,
            self.width,
            self.height,
            PixelLayout::Rgba8,
        ))
    }

    fn free(&mut self) {
        self.data = None;
        self.pixels = None;
        self.rows_seen = 0;
        self.rows_decoded = 0;
    }
}
