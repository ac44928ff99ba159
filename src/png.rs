//! PNG adapter (requires the `png` feature).
//!
//! Transfer phase: one container chunk (length, type, data, CRC) per
//! `iterate`, stopping at `IEND`. The walk records the `IHDR` dimensions,
//! the image data chunks, and any structural damage; processing refuses to
//! start on a container the walk rejected.
//!
//! Processing phase: the first chunk checks limits against the walked
//! header, parses it and allocates the output; each later chunk decodes
//! one scanline. Interlaced images are deinterlaced in one chunk (Adam7
//! passes do not map to output rows), then expanded one row per chunk.

use std::io::Cursor;
use std::sync::Arc;

use crate::bitmap::Bitmap;
use crate::decoder::{IncrementalDecoder, ProcessStatus};
use crate::error::LoadError;
use crate::limits::{Limits, try_zeroed};
use crate::pixel::{PixelLayout, expand_row_to_rgba8};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Chunk lengths above this are invalid.
const MAX_CHUNK_LEN: usize = 0x7FFF_FFFF;

type PngReader = png::Reader<Cursor<Arc<[u8]>>>;

/// What the transfer walk learned about the container.
#[derive(Debug, Default)]
struct Walk {
    header: Option<(u32, u32)>,
    data_chunks: usize,
    end_seen: bool,
    fault: Option<String>,
}

/// Incremental PNG decoder producing RGBA8.
pub struct PngDecoder {
    limits: Limits,
    data: Option<Arc<[u8]>>,
    /// Offset of the next container chunk.
    cursor: usize,
    chunks_seen: usize,
    transfer_done: bool,
    walk: Walk,
    reader: Option<PngReader>,
    source_layout: PixelLayout,
    width: u32,
    height: u32,
    /// Deinterlaced frame and its line size, for Adam7 images.
    frame: Option<(Vec<u8>, usize)>,
    rows_decoded: u32,
    pixels: Option<Vec<u8>>,
    done: bool,
}

impl PngDecoder {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            data: None,
            cursor: 0,
            chunks_seen: 0,
            transfer_done: false,
            walk: Walk::default(),
            reader: None,
            source_layout: PixelLayout::Rgba8,
            width: 0,
            height: 0,
            frame: None,
            rows_decoded: 0,
            pixels: None,
            done: false,
        }
    }

    /// Container chunks walked during the transfer phase.
    pub fn chunks_seen(&self) -> usize {
        self.chunks_seen
    }

    /// Dimensions from the walked `IHDR` chunk.
    fn walked_header(&self) -> Result<(u32, u32), LoadError> {
        let walk = &self.walk;
        if let Some(fault) = &walk.fault {
            return Err(LoadError::DecodeProcessFailed(fault.clone()));
        }
        let header = walk
            .header
            .ok_or_else(|| LoadError::DecodeProcessFailed("PNG container was not walked".into()))?;
        if walk.data_chunks == 0 {
            return Err(LoadError::DecodeProcessFailed("PNG has no image data".into()));
        }
        if !walk.end_seen {
            return Err(LoadError::DecodeProcessFailed("PNG ends before IEND".into()));
        }
        Ok(header)
    }

    fn end_walk(&mut self, fault: Option<String>) -> bool {
        self.transfer_done = true;
        if fault.is_some() {
            self.walk.fault = fault;
        }
        false
    }

    fn read_header(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        let (walked_w, walked_h) = self.walked_header()?;
        self.limits.check_rgba8(walked_w, walked_h)?;

        let mut decoder = match self.limits.max_memory_bytes {
            Some(bytes) => png::Decoder::new_with_limits(
                Cursor::new(data),
                png::Limits {
                    bytes: usize::try_from(bytes).unwrap_or(usize::MAX),
                },
            ),
            None => png::Decoder::new(Cursor::new(data)),
        };
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let reader = decoder.read_info().map_err(process_error)?;

        let info = reader.info();
        let (width, height) = (info.width, info.height);
        self.source_layout = match reader.output_color_type().0 {
            png::ColorType::Grayscale => PixelLayout::Gray8,
            png::ColorType::GrayscaleAlpha => PixelLayout::GrayAlpha8,
            png::ColorType::Rgb => PixelLayout::Rgb8,
            png::ColorType::Rgba => PixelLayout::Rgba8,
            png::ColorType::Indexed => {
                return Err(LoadError::DecodeProcessFailed(
                    "palette was not expanded".into(),
                ));
            }
        };
        self.pixels = Some(self.limits.alloc_rgba8(width, height)?);
        self.width = width;
        self.height = height;
        self.reader = Some(reader);
        log::trace!("png header: {width}x{height} {:?}", self.source_layout);
        Ok(())
    }

    fn decode_rows(&mut self, chunks: usize) -> Result<(), LoadError> {
        let (Some(reader), Some(pixels)) = (self.reader.as_mut(), self.pixels.as_mut()) else {
            return Err(LoadError::DecodeProcessFailed("decoder not started".into()));
        };
        let stride = self.width as usize * 4;
        let mut budget = chunks;

        if reader.info().interlaced && self.frame.is_none() {
            if budget == 0 {
                return Ok(());
            }
            let mut frame = try_zeroed(reader.output_buffer_size(), self.width, self.height)?;
            let out = reader.next_frame(&mut frame).map_err(process_error)?;
            self.frame = Some((frame, out.line_size));
            budget -= 1;
        }

        for _ in 0..budget {
            if self.rows_decoded == self.height {
                break;
            }
            let y = self.rows_decoded as usize;
            let dst = &mut pixels[y * stride..(y + 1) * stride];
            match &self.frame {
                Some((frame, line_size)) => {
                    let line = frame
                        .get(y * line_size..(y + 1) * line_size)
                        .ok_or_else(|| {
                            LoadError::DecodeProcessFailed(format!("interlaced frame lacks row {y}"))
                        })?;
                    expand_row_to_rgba8(self.source_layout, line, dst);
                }
                None => {
                    let row = reader.next_row().map_err(process_error)?.ok_or_else(|| {
                        LoadError::DecodeProcessFailed(format!("image data ends before row {y}"))
                    })?;
                    expand_row_to_rgba8(self.source_layout, row.data(), dst);
                }
            }
            self.rows_decoded += 1;
        }
        Ok(())
    }
}

impl IncrementalDecoder for PngDecoder {
    fn start(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        if data.len() < SIGNATURE.len() + 8 || data[..8] != SIGNATURE {
            return Err(LoadError::DecodeStartFailed("missing PNG signature".into()));
        }
        if &data[12..16] != b"IHDR" {
            return Err(LoadError::DecodeStartFailed(
                "first PNG chunk is not IHDR".into(),
            ));
        }
        self.cursor = SIGNATURE.len();
        self.data = Some(data);
        Ok(())
    }

    fn iterate(&mut self) -> bool {
        if self.transfer_done {
            return false;
        }
        let Some(data) = self.data.clone() else {
            return false;
        };
        let at = self.cursor;
        let Some(header) = data.get(at..at + 8) else {
            // clean end of data; a missing IEND is reported by processing
            return self.end_walk(None);
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = [header[4], header[5], header[6], header[7]];
        if len > MAX_CHUNK_LEN {
            return self.end_walk(Some(format!("PNG chunk at offset {at} has invalid length {len}")));
        }
        // length + type + data + crc
        let Some(next) = (at + 12).checked_add(len).filter(|&n| n <= data.len()) else {
            return self.end_walk(Some(format!("PNG chunk at offset {at} runs past end of file")));
        };
        self.cursor = next;
        self.chunks_seen += 1;

        match &kind {
            b"IHDR" if len >= 8 => {
                let body = &data[at + 8..at + 16];
                let width = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let height = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                self.walk.header = Some((width, height));
            }
            b"IHDR" => return self.end_walk(Some("PNG IHDR chunk is too short".into())),
            b"IDAT" => self.walk.data_chunks += 1,
            b"IEND" => {
                self.walk.end_seen = true;
                return self.end_walk(None);
            }
            _ => {}
        }
        true
    }

    fn process(&mut self, chunks: usize) -> Result<ProcessStatus, LoadError> {
        if self.done {
            return Ok(ProcessStatus::Done);
        }
        let mut budget = chunks;
        if self.reader.is_none() {
            let data = self
                .data
                .clone()
                .ok_or_else(|| LoadError::DecodeProcessFailed("decoder not started".into()))?;
            self.read_header(data)?;
            budget = budget.saturating_sub(1);
        }
        self.decode_rows(budget)?;

        if self.rows_decoded == self.height {
            self.done = true;
            self.reader = None;
            self.frame = None;
            Ok(ProcessStatus::Done)
        } else {
            Ok(ProcessStatus::MorePending)
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels.as_ref().map(|_| (self.width, self.height))
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
        self.reader = None;
        self.data = None;
        self.frame = None;
        self.pixels = None;
        self.walk = Walk::default();
        self.cursor = 0;
        self.rows_decoded = 0;
    }
}

fn process_error(e: png::DecodingError) -> LoadError {
    match e {
        png::DecodingError::LimitsExceeded => {
            LoadError::LimitExceeded("png decoder memory limit".into())
        }
        other => LoadError::DecodeProcessFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(w: u32, h: u32, color: png::ColorType, data: &[u8]) -> Arc<[u8]> {
        let mut out = Vec::new();
        {
            let mut enc = png::Encoder::new(&mut out, w, h);
            enc.set_color(color);
            enc.set_depth(png::BitDepth::Eight);
            let mut writer = enc.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out.into()
    }

    #[test]
    fn walks_chunks_to_iend() {
        let data = encode(2, 2, png::ColorType::Rgba, &[7u8; 16]);
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(data).unwrap();
        while dec.iterate() {}
        // IHDR, IDAT, IEND
        assert_eq!(dec.chunks_seen(), 3);
        assert!(!dec.iterate());
    }

    #[test]
    fn header_chunk_then_rows() {
        let rgb: Vec<u8> = (0..3 * 3 * 3).map(|i| i as u8).collect();
        let data = encode(3, 3, png::ColorType::Rgb, &rgb);
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(data).unwrap();
        while dec.iterate() {}

        assert_eq!(dec.process(1).unwrap(), ProcessStatus::MorePending);
        assert_eq!(dec.dimensions(), Some((3, 3)));
        assert_eq!(dec.process(2).unwrap(), ProcessStatus::MorePending);
        assert_eq!(dec.process(1).unwrap(), ProcessStatus::Done);

        let bmp = dec.take_bitmap().unwrap();
        assert_eq!(bmp.pixels().len(), 3 * 3 * 4);
        assert_eq!(&bmp.pixels()[..8], &[0, 1, 2, 255, 3, 4, 5, 255]);
    }

    #[test]
    fn gray_expands_to_rgba() {
        let data = encode(2, 1, png::ColorType::Grayscale, &[10, 20]);
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(data).unwrap();
        while dec.iterate() {}
        assert_eq!(dec.process(8).unwrap(), ProcessStatus::Done);
        let bmp = dec.take_bitmap().unwrap();
        assert_eq!(bmp.pixels(), &[10, 10, 10, 255, 20, 20, 20, 255]);
    }

    #[test]
    fn missing_iend_fails_before_decoding() {
        let full = encode(2, 2, png::ColorType::Rgba, &[1u8; 16]);
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(Arc::from(&full[..full.len() - 12])).unwrap();
        while dec.iterate() {}
        let err = dec.process(1).unwrap_err();
        assert!(err.to_string().contains("IEND"), "{err}");
        assert!(dec.dimensions().is_none());
    }

    #[test]
    fn truncated_chunk_is_recorded_by_walk() {
        let full = encode(2, 2, png::ColorType::Rgba, &[1u8; 16]);
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(Arc::from(&full[..45])).unwrap();
        assert!(dec.iterate());
        assert!(!dec.iterate());
        assert_eq!(dec.chunks_seen(), 1);
        let err = dec.process(4).unwrap_err();
        assert!(err.to_string().contains("past end of file"), "{err}");
    }

    #[test]
    fn walked_header_limits_checked_first() {
        let data = encode(4, 4, png::ColorType::Rgba, &[0u8; 64]);
        let limits = Limits {
            max_height: Some(2),
            ..Default::default()
        };
        let mut dec = PngDecoder::new(limits);
        dec.start(data).unwrap();
        while dec.iterate() {}
        assert!(matches!(dec.process(1), Err(LoadError::LimitExceeded(_))));
        assert!(dec.reader.is_none());
    }

    #[test]
    fn bad_signature_fails_start() {
        let mut dec = PngDecoder::new(Limits::default());
        let err = dec.start(Arc::from(&b"GIF89a-not-a-png-at-all"[..])).unwrap_err();
        assert!(matches!(err, LoadError::DecodeStartFailed(_)));
        dec.free();
    }

    #[test]
    fn corrupt_idat_fails_process() {
        let good = encode(4, 4, png::ColorType::Rgba, &[200u8; 64]);
        let mut bytes = good.to_vec();
        // IDAT payload starts after signature (8) + IHDR chunk (25) + IDAT length/type (8)
        for b in &mut bytes[41..45] {
            *b ^= 0xFF;
        }
        let mut dec = PngDecoder::new(Limits::default());
        dec.start(bytes.into()).unwrap();
        while dec.iterate() {}
        let result = (0..8).try_for_each(|_| dec.process(4).map(|_| ()));
        assert!(matches!(result, Err(LoadError::DecodeProcessFailed(_))));
    }
}
