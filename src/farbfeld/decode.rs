//! Farbfeld header and row decoding.
//!
//! Header handling follows zune-farbfeld 0.5.2 by Caleb Etemesi
//! (MIT/Apache-2.0/Zlib); rows are decoded one at a time so the caller can
//! bound work per poll.

use crate::error::LoadError;

pub(crate) const HEADER_LEN: usize = 16;

/// Parse farbfeld header, returning (width, height).
pub(crate) fn parse_header(data: &[u8]) -> Result<(u32, u32), LoadError> {
    if data.len() < HEADER_LEN {
        return Err(LoadError::DecodeStartFailed(
            "farbfeld header truncated".into(),
        ));
    }
    if &data[0..8] != b"farbfeld" {
        return Err(LoadError::DecodeStartFailed(
            "missing farbfeld magic".into(),
        ));
    }
    let width = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let height = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);

    if width == 0 {
        return Err(LoadError::DecodeStartFailed("farbfeld width is zero".into()));
    }
    if height == 0 {
        return Err(LoadError::DecodeStartFailed("farbfeld height is zero".into()));
    }
    Ok((width, height))
}

/// Encoded byte length of one row (4 channels × 2 bytes).
pub(crate) fn row_bytes(width: u32) -> Result<usize, LoadError> {
    (width as usize)
        .checked_mul(8)
        .ok_or(LoadError::DimensionsTooLarge { width, height: 0 })
}

/// Total encoded length for a `width`×`height` image, header included.
pub(crate) fn encoded_len(width: u32, height: u32) -> Result<usize, LoadError> {
    row_bytes(width)?
        .checked_mul(height as usize)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or(LoadError::DimensionsTooLarge { width, height })
}

/// Byte range of row `y` within the file, if present.
pub(crate) fn row_range(data_len: usize, width: u32, y: u32) -> Option<core::ops::Range<usize>> {
    let row = row_bytes(width).ok()?;
    let start = (y as usize).checked_mul(row)?.checked_add(HEADER_LEN)?;
    let end = start.checked_add(row)?;
    (end <= data_len).then_some(start..end)
}

/// Decode one row of big-endian RGBA16 into RGBA8 (high byte of each sample).
pub(crate) fn decode_row(src: &[u8], dst: &mut [u8]) {
    for (sample, out) in src.chunks_exact(2).zip(dst.iter_mut()) {
        *out = sample[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(w: u32, h: u32) -> Vec<u8> {
        let mut v = b"farbfeld".to_vec();
        v.extend_from_slice(&w.to_be_bytes());
        v.extend_from_slice(&h.to_be_bytes());
        v
    }

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_header(&header(3, 7)).unwrap(), (3, 7));
    }

    #[test]
    fn rejects_zero_and_bad_magic() {
        assert!(parse_header(&header(0, 1)).is_err());
        assert!(parse_header(&header(1, 0)).is_err());
        let mut bad = header(1, 1);
        bad[0] = b'g';
        assert!(parse_header(&bad).is_err());
        assert!(parse_header(b"farb").is_err());
    }

    #[test]
    fn encoded_len_counts_header_and_rows() {
        assert_eq!(encoded_len(2, 3).unwrap(), 16 + 3 * 16);
    }

    #[test]
    fn row_range_bounds() {
        // 2 px wide: 16 bytes per row
        assert_eq!(row_range(48, 2, 0), Some(16..32));
        assert_eq!(row_range(48, 2, 1), Some(32..48));
        assert_eq!(row_range(48, 2, 2), None);
    }

    #[test]
    fn decode_row_takes_high_bytes() {
        let src = [0xAB, 0xCD, 0x12, 0x34, 0x00, 0xFF, 0xFF, 0x00];
        let mut dst = [0u8; 4];
        decode_row(&src, &mut dst);
        assert_eq!(dst, [0xAB, 0x12, 0x00, 0xFF]);
    }
}
