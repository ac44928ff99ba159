use crate::error::LoadError;

/// Resource limits applied while a load runs.
///
/// All fields default to `None` (no limit).
#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    /// Maximum pixel count (width * height).
    pub max_pixels: Option<u64>,
    /// Maximum bytes for the decoded pixel buffer.
    pub max_memory_bytes: Option<u64>,
    /// Maximum size of the source file, checked when the load is requested.
    pub max_file_bytes: Option<u64>,
}

impl Limits {
    /// Check dimensions against limits. Returns Ok(()) or LimitExceeded error.
    pub(crate) fn check(&self, width: u32, height: u32) -> Result<(), LoadError> {
        if let Some(max_w) = self.max_width {
            if u64::from(width) > max_w {
                return Err(LoadError::LimitExceeded(format!(
                    "width {width} exceeds limit {max_w}"
                )));
            }
        }
        if let Some(max_h) = self.max_height {
            if u64::from(height) > max_h {
                return Err(LoadError::LimitExceeded(format!(
                    "height {height} exceeds limit {max_h}"
                )));
            }
        }
        if let Some(max_px) = self.max_pixels {
            let pixels = u64::from(width) * u64::from(height);
            if pixels > max_px {
                return Err(LoadError::LimitExceeded(format!(
                    "pixel count {pixels} exceeds limit {max_px}"
                )));
            }
        }
        Ok(())
    }

    /// Check that an allocation size is within memory limits.
    pub(crate) fn check_memory(&self, bytes: usize) -> Result<(), LoadError> {
        if let Some(max_mem) = self.max_memory_bytes {
            if bytes as u64 > max_mem {
                return Err(LoadError::LimitExceeded(format!(
                    "allocation {bytes} bytes exceeds memory limit {max_mem}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn check_file_size(&self, bytes: u64) -> Result<(), LoadError> {
        if let Some(max_file) = self.max_file_bytes {
            if bytes > max_file {
                return Err(LoadError::LimitExceeded(format!(
                    "file size {bytes} bytes exceeds limit {max_file}"
                )));
            }
        }
        Ok(())
    }

    /// Check dimensions, then compute and check the RGBA8 buffer size.
    ///
    /// Returns the byte length of the output buffer.
    pub(crate) fn check_rgba8(&self, width: u32, height: u32) -> Result<usize, LoadError> {
        self.check(width, height)?;
        let bytes = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(4))
            .ok_or(LoadError::DimensionsTooLarge { width, height })?;
        self.check_memory(bytes)?;
        Ok(bytes)
    }

    /// Check limits, then allocate the zeroed RGBA8 output buffer.
    pub(crate) fn alloc_rgba8(&self, width: u32, height: u32) -> Result<Vec<u8>, LoadError> {
        let bytes = self.check_rgba8(width, height)?;
        try_zeroed(bytes, width, height)
    }
}

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed(bytes: usize, width: u32, height: u32) -> Result<Vec<u8>, LoadError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| LoadError::DimensionsTooLarge { width, height })?;
    buf.resize(bytes, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limits_accept_anything() {
        let limits = Limits::default();
        assert!(limits.check(u32::MAX, u32::MAX).is_ok());
        assert!(limits.check_file_size(u64::MAX).is_ok());
    }

    #[test]
    fn rgba8_size_checked_against_memory() {
        let limits = Limits {
            max_memory_bytes: Some(64),
            ..Default::default()
        };
        assert_eq!(limits.check_rgba8(4, 4).unwrap(), 64);
        assert!(matches!(
            limits.check_rgba8(4, 5),
            Err(LoadError::LimitExceeded(_))
        ));
    }

    #[test]
    fn pixel_count_limit() {
        let limits = Limits {
            max_pixels: Some(3),
            ..Default::default()
        };
        assert!(limits.check(3, 1).is_ok());
        assert!(limits.check(2, 2).is_err());
    }

    #[test]
    fn impossible_allocation_is_an_error() {
        let err = try_zeroed(usize::MAX, u32::MAX, u32::MAX).unwrap_err();
        assert!(matches!(err, LoadError::DimensionsTooLarge { .. }));
        assert_eq!(Limits::default().alloc_rgba8(2, 3).unwrap(), vec![0u8; 24]);
    }
}
