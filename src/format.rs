use std::path::Path;

use crate::decoder::IncrementalDecoder;
use crate::farbfeld::FarbfeldDecoder;
use crate::limits::Limits;

/// Image format selected from a file's suffix.
///
/// A path whose suffix maps to no format is loaded as raw bytes.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// `.png`
    #[cfg(feature = "png")]
    Png,
    /// `.jpg`, `.jpeg`
    #[cfg(feature = "jpeg")]
    Jpeg,
    /// `.ff`
    Farbfeld,
}

impl ImageFormat {
    /// Look up the format for a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    /// Look up the format for a lowercase extension without the dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            #[cfg(feature = "png")]
            "png" => Some(Self::Png),
            #[cfg(feature = "jpeg")]
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "ff" => Some(Self::Farbfeld),
            _ => None,
        }
    }

    /// Allocate the decoder adapter for this format.
    pub fn decoder(self, limits: &Limits) -> Box<dyn IncrementalDecoder> {
        match self {
            #[cfg(feature = "png")]
            Self::Png => Box::new(crate::png::PngDecoder::new(limits.clone())),
            #[cfg(feature = "jpeg")]
            Self::Jpeg => Box::new(crate::jpeg::JpegDecoder::new(limits.clone())),
            Self::Farbfeld => Box::new(FarbfeldDecoder::new(limits.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_lookup() {
        #[cfg(feature = "png")]
        assert_eq!(
            ImageFormat::from_path(Path::new("menu/bg.PNG")),
            Some(ImageFormat::Png)
        );
        #[cfg(feature = "jpeg")]
        {
            assert_eq!(
                ImageFormat::from_path(Path::new("a.jpeg")),
                Some(ImageFormat::Jpeg)
            );
            assert_eq!(
                ImageFormat::from_path(Path::new("thumbs/b.jpg")),
                Some(ImageFormat::Jpeg)
            );
        }
        assert_eq!(
            ImageFormat::from_path(Path::new("c.ff")),
            Some(ImageFormat::Farbfeld)
        );
        assert_eq!(ImageFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(ImageFormat::from_path(Path::new("png")), None);
        assert_eq!(ImageFormat::from_path(Path::new("archive.png.bak")), None);
    }
}
