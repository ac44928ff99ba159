use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::context::LoadContext;
use crate::error::LoadError;
use crate::format::ImageFormat;
use crate::limits::Limits;
use crate::pixel::PixelLayout;
use crate::reader::{AsyncReader, DEFAULT_READ_BLOCK, FileReader};

/// What the loaded image is for. Carried through to the completion callback.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Full-screen menu background.
    #[default]
    Wallpaper,
    /// Content thumbnail.
    Thumbnail,
}

impl FromStr for Purpose {
    type Err = LoadError;

    /// Accepts `wallpaper`/`thumbnail` and the `cb_menu_*` callback tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallpaper" | "cb_menu_wallpaper" => Ok(Purpose::Wallpaper),
            "thumbnail" | "cb_menu_thumbnail" => Ok(Purpose::Thumbnail),
            other => Err(LoadError::UnknownPurpose(other.into())),
        }
    }
}

/// Builder for one image load.
///
/// ```no_run
/// use zenload::{LoadRequest, Purpose, Unstoppable};
///
/// let mut ctx = LoadRequest::new("menu/wallpaper.png")
///     .with_purpose(Purpose::Wallpaper)
///     .begin()?;
/// while ctx.step(&Unstoppable) {
///     // yield to the render loop between steps
/// }
/// let bitmap = ctx.take_result().unwrap()?.into_bitmap();
/// # Ok::<(), zenload::LoadError>(())
/// ```
#[derive(Clone, Debug)]
pub struct LoadRequest {
    path: PathBuf,
    purpose: Purpose,
    limits: Limits,
    output_layout: PixelLayout,
    read_block_size: usize,
    format: Option<Option<ImageFormat>>,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            purpose: Purpose::default(),
            limits: Limits::default(),
            output_layout: PixelLayout::Rgba8,
            read_block_size: DEFAULT_READ_BLOCK,
            format: None,
        }
    }

    pub fn with_purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Layout of the delivered bitmap: `Rgba8` (default) or `Bgra8`.
    ///
    /// Other layouts are ignored; decoded bitmaps are always 4 bytes per pixel.
    pub fn with_output_layout(mut self, layout: PixelLayout) -> Self {
        if matches!(layout, PixelLayout::Rgba8 | PixelLayout::Bgra8) {
            self.output_layout = layout;
        }
        self
    }

    /// Bytes read from the file per step while buffering.
    pub fn with_read_block_size(mut self, bytes: usize) -> Self {
        self.read_block_size = bytes.max(1);
        self
    }

    /// Override suffix lookup. `None` loads raw bytes without decoding.
    pub fn with_format(mut self, format: Option<ImageFormat>) -> Self {
        self.format = Some(format);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// The format this request resolves to.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format.unwrap_or_else(|| ImageFormat::from_path(&self.path))
    }

    /// Open the file and create the load context.
    ///
    /// Fails with [`LoadError::IoOpenFailed`] if the file cannot be opened
    /// and [`LoadError::ContextAllocFailed`] if its buffer cannot be
    /// reserved. No bytes are read until the first step.
    pub fn begin(self) -> Result<LoadContext, LoadError> {
        let reader = FileReader::open(&self.path, self.read_block_size)
            .and_then(|reader| {
                self.limits.check_file_size(reader.expected_len())?;
                Ok(reader)
            })
            .inspect_err(|e| log::warn!("[image load] {e}"))?;
        Ok(self.begin_with(reader))
    }

    /// Create the load context over an already open reader.
    ///
    /// The request path is used for format lookup and logging only.
    pub fn begin_with(self, reader: impl AsyncReader + 'static) -> LoadContext {
        let format = self.format();
        log::debug!(
            "{}: load requested for {:?} as {:?}",
            self.path.display(),
            self.purpose,
            format
        );
        let decoder = format.map(|f| f.decoder(&self.limits));
        LoadContext::new(
            self.path,
            self.purpose,
            self.output_layout,
            Box::new(reader),
            decoder,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_tags() {
        assert_eq!("cb_menu_wallpaper".parse::<Purpose>().unwrap(), Purpose::Wallpaper);
        assert_eq!("thumbnail".parse::<Purpose>().unwrap(), Purpose::Thumbnail);
        assert!("cb_menu_music".parse::<Purpose>().is_err());
    }

    #[test]
    fn format_override_beats_suffix() {
        let req = LoadRequest::new("x.ff");
        assert_eq!(req.format(), Some(ImageFormat::Farbfeld));
        let req = req.with_format(None);
        assert_eq!(req.format(), None);
    }

    #[test]
    fn output_layout_rejects_non_rgba() {
        let req = LoadRequest::new("x.ff").with_output_layout(PixelLayout::Gray8);
        assert_eq!(req.output_layout, PixelLayout::Rgba8);
        let req = req.with_output_layout(PixelLayout::Bgra8);
        assert_eq!(req.output_layout, PixelLayout::Bgra8);
    }
}
