//! Reader configuration.

use std::path::{Path, PathBuf};

/// Directory used for persisted results when none is configured.
pub const DEFAULT_CACHE_DIR: &str = "_bmcache_";

/// How spike waveform samples are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveformScaling {
    /// Multiply every sample by the electrode's digitization factor.
    #[default]
    Scaled,
    /// Widen samples to `i32` and leave them unscaled.
    Raw,
}

/// Options shared by NSx and NEV sessions.
///
/// # Example
///
/// ```
/// use blackrock_core::{ReaderOptions, WaveformScaling};
///
/// let options = ReaderOptions::default()
///     .without_cache()
///     .with_waveform_scaling(WaveformScaling::Raw);
/// assert!(options.cache_dir.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Where decoded results are persisted; `None` turns the cache off.
    pub cache_dir: Option<PathBuf>,
    pub waveform_scaling: WaveformScaling,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            cache_dir: Some(PathBuf::from(DEFAULT_CACHE_DIR)),
            waveform_scaling: WaveformScaling::default(),
        }
    }
}

impl ReaderOptions {
    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_dir = None;
        self
    }

    pub fn with_waveform_scaling(mut self, scaling: WaveformScaling) -> Self {
        self.waveform_scaling = scaling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ReaderOptions::default();
        assert_eq!(options.cache_dir, Some(PathBuf::from("_bmcache_")));
        assert_eq!(options.waveform_scaling, WaveformScaling::Scaled);
    }

    #[test]
    fn test_builder_methods() {
        let options = ReaderOptions::default()
            .with_cache_dir("/tmp/blackrock")
            .with_waveform_scaling(WaveformScaling::Raw);
        assert_eq!(options.cache_dir, Some(PathBuf::from("/tmp/blackrock")));
        assert_eq!(options.waveform_scaling, WaveformScaling::Raw);
        assert_eq!(options.without_cache().cache_dir, None);
    }
}
