#[cfg(feature = "rgb")]
use rgb::AsPixels as _;

use crate::pixel::PixelLayout;

/// A decoded image: an owned pixel buffer plus its dimensions.
///
/// Handed to the consumer once a load completes successfully. The loader
/// keeps no alias to the buffer after hand-off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl Bitmap {
    pub(crate) fn new(pixels: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            pixels,
            width,
            height,
            layout,
        }
    }

    /// Access the pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Take ownership of the pixel data.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Reinterpret pixel data as typed pixel slice.
    ///
    /// Returns [`crate::LoadError::DecodeProcessFailed`] if the pixel layout
    /// doesn't match `P`.
    #[cfg(feature = "rgb")]
    pub fn as_pixels<P: crate::BitmapPixel>(&self) -> Result<&[P], crate::LoadError>
    where
        [u8]: rgb::AsPixels<P>,
    {
        if self.layout != P::layout() {
            return Err(crate::LoadError::DecodeProcessFailed(format!(
                "pixel layout mismatch: expected {:?}, got {:?}",
                P::layout(),
                self.layout
            )));
        }
        Ok(self.pixels().as_pixels())
    }

    /// Zero-copy view as an [`imgref::ImgRef`] of typed pixels.
    #[cfg(feature = "imgref")]
    pub fn as_imgref<P: crate::BitmapPixel>(
        &self,
    ) -> Result<imgref::ImgRef<'_, P>, crate::LoadError>
    where
        [u8]: rgb::AsPixels<P>,
    {
        let pixels: &[P] = self.as_pixels()?;
        Ok(imgref::ImgRef::new(
            pixels,
            self.width as usize,
            self.height as usize,
        ))
    }
}

/// Typed pixels a [`Bitmap`] can be viewed as.
#[cfg(feature = "rgb")]
pub trait BitmapPixel: Copy {
    fn layout() -> PixelLayout;
}

#[cfg(feature = "rgb")]
impl BitmapPixel for rgb::RGBA8 {
    fn layout() -> PixelLayout {
        PixelLayout::Rgba8
    }
}

#[cfg(feature = "rgb")]
impl BitmapPixel for rgb::alt::BGRA8 {
    fn layout() -> PixelLayout {
        PixelLayout::Bgra8
    }
}

/// What a successful load attaches to its task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutput {
    /// A decoded image.
    Bitmap(Bitmap),
    /// Raw file bytes, for files whose suffix selects no decoder.
    Raw(Vec<u8>),
}

impl LoadOutput {
    /// The decoded bitmap, if this load decoded one.
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            LoadOutput::Bitmap(b) => Some(b),
            LoadOutput::Raw(_) => None,
        }
    }

    pub fn into_bitmap(self) -> Option<Bitmap> {
        match self {
            LoadOutput::Bitmap(b) => Some(b),
            LoadOutput::Raw(_) => None,
        }
    }

    /// The undecoded bytes of a pass-through load.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            LoadOutput::Raw(bytes) => Some(bytes),
            LoadOutput::Bitmap(_) => None,
        }
    }
}
