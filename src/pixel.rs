/// Pixel memory layout.
///
/// Decoders produce rows in one of the source layouts; every decoded
/// bitmap leaves the loader as [`Rgba8`](PixelLayout::Rgba8) or
/// [`Bgra8`](PixelLayout::Bgra8).
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Single channel, 8-bit grayscale.
    Gray8,
    /// 2 channels, 8-bit grayscale + alpha.
    GrayAlpha8,
    /// 3 channels, 8-bit RGB.
    Rgb8,
    /// 4 channels, 8-bit RGBA.
    Rgba8,
    /// 4 channels, 8-bit BGRA (ARGB32 in little-endian memory).
    Bgra8,
    /// 4 channels, 8-bit CMYK. Source only; converted to RGB on expansion.
    Cmyk8,
}

impl PixelLayout {
    /// Bytes per pixel for this layout.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::GrayAlpha8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Bgra8 | Self::Cmyk8 => 4,
        }
    }
}

/// Expand one row of `src` pixels into RGBA8.
///
/// `dst` must hold exactly `src.len() / src_layout.bytes_per_pixel()` RGBA
/// pixels; extra trailing input bytes are ignored.
pub(crate) fn expand_row_to_rgba8(src_layout: PixelLayout, src: &[u8], dst: &mut [u8]) {
    let bpp = src_layout.bytes_per_pixel();
    let pixels = src.chunks_exact(bpp).zip(dst.chunks_exact_mut(4));
    match src_layout {
        PixelLayout::Gray8 => pixels.for_each(|(s, d)| {
            d.copy_from_slice(&[s[0], s[0], s[0], 0xFF]);
        }),
        PixelLayout::GrayAlpha8 => pixels.for_each(|(s, d)| {
            d.copy_from_slice(&[s[0], s[0], s[0], s[1]]);
        }),
        PixelLayout::Rgb8 => pixels.for_each(|(s, d)| {
            d.copy_from_slice(&[s[0], s[1], s[2], 0xFF]);
        }),
        PixelLayout::Rgba8 => pixels.for_each(|(s, d)| d.copy_from_slice(s)),
        PixelLayout::Bgra8 => pixels.for_each(|(s, d)| {
            d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
        }),
        PixelLayout::Cmyk8 => pixels.for_each(|(s, d)| {
            let k = 255 - u16::from(s[3]);
            let ink = |v: u8| ((255 - u16::from(v)) * k / 255) as u8;
            d.copy_from_slice(&[ink(s[0]), ink(s[1]), ink(s[2]), 0xFF]);
        }),
    }
}

/// Swap R and B in place (RGBA8 ↔ BGRA8).
pub(crate) fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_expands_to_opaque_rgba() {
        let mut out = [0u8; 8];
        expand_row_to_rgba8(PixelLayout::Gray8, &[10, 200], &mut out);
        assert_eq!(out, [10, 10, 10, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn gray_alpha_keeps_alpha() {
        let mut out = [0u8; 4];
        expand_row_to_rgba8(PixelLayout::GrayAlpha8, &[77, 9], &mut out);
        assert_eq!(out, [77, 77, 77, 9]);
    }

    #[test]
    fn rgb_gets_opaque_alpha() {
        let mut out = [0u8; 4];
        expand_row_to_rgba8(PixelLayout::Rgb8, &[1, 2, 3], &mut out);
        assert_eq!(out, [1, 2, 3, 255]);
    }

    #[test]
    fn cmyk_converts_to_opaque_rgb() {
        let mut out = [0u8; 12];
        let src = [0, 0, 0, 0, 255, 255, 255, 0, 0, 255, 255, 51];
        expand_row_to_rgba8(PixelLayout::Cmyk8, &src, &mut out);
        assert_eq!(out, [255, 255, 255, 255, 0, 0, 0, 255, 204, 0, 0, 255]);
    }

    #[test]
    fn swap_is_an_involution() {
        let mut px = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_red_blue(&mut px);
        assert_eq!(px, [3, 2, 1, 4, 7, 6, 5, 8]);
        swap_red_blue(&mut px);
        assert_eq!(px, [1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
