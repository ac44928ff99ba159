//! JPEG adapter (requires the `jpeg` feature).
//!
//! Transfer phase: one marker segment per `iterate`, stopping at the first
//! start-of-scan. The walk records the frame header and any structural
//! damage; processing refuses to start on a stream the walk rejected.
//!
//! Processing phase: the first chunk checks limits against the walked frame
//! header, reads it and allocates the output. The second decodes the
//! entropy-coded data in one go, as `jpeg-decoder` does not resume
//! mid-scan. Each later chunk expands one row to RGBA8.

use std::io::Cursor;
use std::sync::Arc;

use jpeg_decoder::PixelFormat;

use crate::bitmap::Bitmap;
use crate::decoder::{IncrementalDecoder, ProcessStatus};
use crate::error::LoadError;
use crate::limits::Limits;
use crate::pixel::{PixelLayout, expand_row_to_rgba8};

const SOI: [u8; 2] = [0xFF, 0xD8];
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;

type JpegReader = jpeg_decoder::Decoder<Cursor<Arc<[u8]>>>;

/// What the transfer walk learned about the stream.
#[derive(Debug, Default)]
struct Walk {
    frame: Option<(u32, u32)>,
    scan_found: bool,
    fault: Option<String>,
}

/// Incremental JPEG decoder producing RGBA8.
pub struct JpegDecoder {
    limits: Limits,
    data: Option<Arc<[u8]>>,
    cursor: usize,
    segments_seen: usize,
    transfer_done: bool,
    walk: Walk,
    reader: Option<JpegReader>,
    source_layout: PixelLayout,
    width: u32,
    height: u32,
    /// Decoded scan in the source layout.
    decoded: Option<Vec<u8>>,
    rows_expanded: u32,
    pixels: Option<Vec<u8>>,
    done: bool,
}

impl JpegDecoder {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            data: None,
            cursor: 0,
            segments_seen: 0,
            transfer_done: false,
            walk: Walk::default(),
            reader: None,
            source_layout: PixelLayout::Rgb8,
            width: 0,
            height: 0,
            decoded: None,
            rows_expanded: 0,
            pixels: None,
            done: false,
        }
    }

    /// Marker segments walked during the transfer phase.
    pub fn segments_seen(&self) -> usize {
        self.segments_seen
    }

    fn end_walk(&mut self, fault: Option<String>) -> bool {
        self.transfer_done = true;
        if fault.is_some() {
            self.walk.fault = fault;
        }
        false
    }

    /// Dimensions from the walked frame header.
    fn walked_frame(&self) -> Result<(u32, u32), LoadError> {
        let walk = &self.walk;
        if let Some(fault) = &walk.fault {
            return Err(LoadError::DecodeProcessFailed(fault.clone()));
        }
        if !walk.scan_found {
            return Err(LoadError::DecodeProcessFailed(
                "JPEG stream was not walked to its first scan".into(),
            ));
        }
        walk.frame
            .ok_or_else(|| LoadError::DecodeProcessFailed("JPEG scan has no frame header".into()))
    }

    fn read_header(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        let (walked_w, walked_h) = self.walked_frame()?;
        self.limits.check_rgba8(walked_w, walked_h)?;

        let mut reader = jpeg_decoder::Decoder::new(Cursor::new(data));
        if let Some(bytes) = self.limits.max_memory_bytes {
            reader.set_max_decoding_buffer_size(usize::try_from(bytes).unwrap_or(usize::MAX));
        }
        reader.read_info().map_err(process_error)?;
        let info = reader
            .info()
            .ok_or_else(|| LoadError::DecodeProcessFailed("missing JPEG frame header".into()))?;
        self.source_layout = match info.pixel_format {
            PixelFormat::L8 => PixelLayout::Gray8,
            PixelFormat::RGB24 => PixelLayout::Rgb8,
            PixelFormat::CMYK32 => PixelLayout::Cmyk8,
            other => {
                return Err(LoadError::DecodeProcessFailed(format!(
                    "unsupported JPEG pixel format {other:?}"
                )));
            }
        };
        let (width, height) = (u32::from(info.width), u32::from(info.height));
        self.pixels = Some(self.limits.alloc_rgba8(width, height)?);
        self.width = width;
        self.height = height;
        self.reader = Some(reader);
        log::trace!("jpeg header: {width}x{height} {:?}", self.source_layout);
        Ok(())
    }

    fn decode_scan(&mut self) -> Result<(), LoadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(LoadError::DecodeProcessFailed("decoder not started".into()));
        };
        let decoded = reader.decode().map_err(process_error)?;
        let src_stride = self.width as usize * self.source_layout.bytes_per_pixel();
        if decoded.len() < src_stride * self.height as usize {
            return Err(LoadError::DecodeProcessFailed(
                "JPEG scan produced too few rows".into(),
            ));
        }
        self.reader = None;
        self.decoded = Some(decoded);
        Ok(())
    }

    fn expand_rows(&mut self, chunks: usize) {
        let (Some(src), Some(pixels)) = (self.decoded.as_ref(), self.pixels.as_mut()) else {
            return;
        };
        let src_stride = self.width as usize * self.source_layout.bytes_per_pixel();
        let dst_stride = self.width as usize * 4;
        for _ in 0..chunks {
            if self.rows_expanded == self.height {
                break;
            }
            let y = self.rows_expanded as usize;
            expand_row_to_rgba8(
                self.source_layout,
                &src[y * src_stride..(y + 1) * src_stride],
                &mut pixels[y * dst_stride..(y + 1) * dst_stride],
            );
            self.rows_expanded += 1;
        }
    }
}

impl IncrementalDecoder for JpegDecoder {
    fn start(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        if data.len() < 4 || data[..2] != SOI || data[2] != 0xFF {
            return Err(LoadError::DecodeStartFailed("missing JPEG SOI marker".into()));
        }
        self.cursor = SOI.len();
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
        if data.get(at) != Some(&0xFF) {
            let fault = match data.get(at) {
                Some(_) => format!("JPEG marker expected at offset {at}"),
                None => "JPEG ends before its first scan".to_string(),
            };
            return self.end_walk(Some(fault));
        }
        let mut pos = at;
        // fill bytes
        while data.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let Some(&marker) = data.get(pos) else {
            return self.end_walk(Some("JPEG ends inside a marker".into()));
        };
        pos += 1;
        self.segments_seen += 1;

        match marker {
            EOI => self.end_walk(Some("JPEG ends before its first scan".into())),
            // standalone markers: TEM, RSTn, SOI
            0x01 | 0xD0..=0xD8 => {
                self.cursor = pos;
                true
            }
            _ => {
                let next = data
                    .get(pos..pos + 2)
                    .map(|len| pos + usize::from(u16::from_be_bytes([len[0], len[1]])))
                    .filter(|&n| n <= data.len());
                let Some(next) = next else {
                    return self.end_walk(Some(format!(
                        "JPEG segment at offset {at} runs past end of file"
                    )));
                };
                match marker {
                    SOS => {
                        self.walk.scan_found = true;
                        return self.end_walk(None);
                    }
                    // SOFn, excluding DHT (C4), JPG (C8) and DAC (CC)
                    0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                        let Some(body) = data.get(pos + 3..pos + 7) else {
                            return self.end_walk(Some("JPEG frame header is too short".into()));
                        };
                        let height = u16::from_be_bytes([body[0], body[1]]);
                        let width = u16::from_be_bytes([body[2], body[3]]);
                        self.walk.frame = Some((u32::from(width), u32::from(height)));
                    }
                    _ => {}
                }
                self.cursor = next;
                true
            }
        }
    }

    fn process(&mut self, chunks: usize) -> Result<ProcessStatus, LoadError> {
        if self.done {
            return Ok(ProcessStatus::Done);
        }
        let mut budget = chunks;
        if self.pixels.is_none() {
            let data = self
                .data
                .clone()
                .ok_or_else(|| LoadError::DecodeProcessFailed("decoder not started".into()))?;
            self.read_header(data)?;
            budget = budget.saturating_sub(1);
        }
        if self.decoded.is_none() {
            if budget == 0 {
                return Ok(ProcessStatus::MorePending);
            }
            self.decode_scan()?;
            budget -= 1;
        }
        self.expand_rows(budget);

        if self.rows_expanded == self.height {
            self.decoded = None;
            self.done = true;
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
        self.decoded = None;
        self.pixels = None;
        self.walk = Walk::default();
        self.cursor = 0;
        self.rows_expanded = 0;
    }
}

fn process_error(e: jpeg_decoder::Error) -> LoadError {
    LoadError::DecodeProcessFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, marker];
        v.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    /// 16x8 grayscale baseline JPEG: left block 128, right block 192.
    const GRAY_JPEG: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0xFF,
        0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x10, 0x01, 0x01, 0x11, 0x00,
        0xFF, 0xC4, 0x00, 0x1F, 0x00, 0x00, 0x01, 0x05, 0x01, 0x01, 0x01, 0x01,
        0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02,
        0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0xFF, 0xC4, 0x00,
        0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xDA, 0x00, 0x08, 0x01,
        0x01, 0x00, 0x00, 0x3F, 0x00, 0x1F, 0xD0, 0x03, 0xFF, 0xD9,
    ];

    #[test]
    fn walks_segments_to_scan() {
        let mut data = SOI.to_vec();
        data.extend(segment(0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
        data.extend(segment(0xDB, &[0u8; 65]));
        data.extend([0xFF, 0xFF]); // fill
        data.extend(segment(SOS, &[1, 2, 3, 4]));
        data.extend([0x12, 0x34, 0xFF, EOI]);

        let mut dec = JpegDecoder::new(Limits::default());
        dec.start(data.into()).unwrap();
        assert!(dec.iterate());
        assert!(dec.iterate());
        assert!(!dec.iterate());
        assert_eq!(dec.segments_seen(), 3);
        assert!(!dec.iterate());
        assert!(dec.walk.scan_found);
        // a scan without a frame header is refused before decoding
        let err = dec.process(1).unwrap_err();
        assert!(err.to_string().contains("frame header"), "{err}");
    }

    #[test]
    fn walk_records_frame_dimensions() {
        let mut dec = JpegDecoder::new(Limits::default());
        dec.start(Arc::from(GRAY_JPEG)).unwrap();
        while dec.iterate() {}
        assert_eq!(dec.segments_seen(), 5);
        assert_eq!(dec.walk.frame, Some((16, 8)));
        assert!(dec.walk.fault.is_none());
    }

    #[test]
    fn scan_decodes_then_rows_expand_per_chunk() {
        let mut dec = JpegDecoder::new(Limits::default());
        dec.start(Arc::from(GRAY_JPEG)).unwrap();
        while dec.iterate() {}

        assert_eq!(dec.process(1).unwrap(), ProcessStatus::MorePending);
        assert_eq!(dec.dimensions(), Some((16, 8)));
        assert_eq!(dec.process(1).unwrap(), ProcessStatus::MorePending);
        assert!(dec.decoded.is_some());
        assert_eq!(dec.rows_expanded, 0);
        assert_eq!(dec.process(3).unwrap(), ProcessStatus::MorePending);
        assert_eq!(dec.rows_expanded, 3);
        assert_eq!(dec.process(5).unwrap(), ProcessStatus::Done);
        assert!(dec.decoded.is_none());

        let bitmap = dec.take_bitmap().unwrap();
        let px = bitmap.pixels();
        assert_eq!(px.len(), 16 * 8 * 4);
        assert!(px[0].abs_diff(128) <= 1, "{}", px[0]);
        assert!(px[15 * 4].abs_diff(192) <= 1, "{}", px[15 * 4]);
        assert_eq!(px[3], 0xFF);
    }

    #[test]
    fn walked_frame_limits_checked_first() {
        let limits = Limits {
            max_width: Some(8),
            ..Default::default()
        };
        let mut dec = JpegDecoder::new(limits);
        dec.start(Arc::from(GRAY_JPEG)).unwrap();
        while dec.iterate() {}
        assert!(matches!(dec.process(1), Err(LoadError::LimitExceeded(_))));
        assert!(dec.pixels.is_none());
    }

    #[test]
    fn truncated_segment_ends_transfer() {
        let mut data = SOI.to_vec();
        data.extend([0xFF, 0xE1, 0x40, 0x00, 1, 2, 3]);
        let mut dec = JpegDecoder::new(Limits::default());
        dec.start(data.into()).unwrap();
        assert!(!dec.iterate());
        let err = dec.process(8).unwrap_err();
        assert!(err.to_string().contains("past end of file"), "{err}");
    }

    #[test]
    fn missing_soi_fails_start() {
        let mut dec = JpegDecoder::new(Limits::default());
        assert!(matches!(
            dec.start(Arc::from(&b"\x89PNG\r\n\x1a\n"[..])),
            Err(LoadError::DecodeStartFailed(_))
        ));
        dec.free();
        dec.free();
    }

    #[test]
    fn end_before_scan_fails_process() {
        let mut data = SOI.to_vec();
        data.extend(segment(0xE0, &[0u8; 14]));
        data.extend([0xFF, EOI]);
        let mut dec = JpegDecoder::new(Limits::default());
        dec.start(data.into()).unwrap();
        while dec.iterate() {}
        let result = dec.process(1);
        assert!(matches!(result, Err(LoadError::DecodeProcessFailed(_))));
    }
}
