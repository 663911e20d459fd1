//! Source validation ahead of planning

use crate::error::{TranscodeError, TranscodeResult};
use crate::probe::AssetInfo;

/// Checks that an inspected source can be transcoded
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetValidator;

impl AssetValidator {
    /// Validate that the source can feed the pipeline
    pub fn validate(&self, asset: &AssetInfo) -> TranscodeResult<()> {
        if asset.video.coded_size.is_empty() {
            return Err(TranscodeError::setup(format!(
                "video track reports an empty frame size ({})",
                asset.video.coded_size
            )));
        }

        if asset.audio.sample_rate == 0 || asset.audio.channels == 0 {
            return Err(TranscodeError::setup(format!(
                "audio track reports {} Hz with {} channels",
                asset.audio.sample_rate, asset.audio.channels
            )));
        }

        if asset.file_size == 0 {
            return Err(TranscodeError::setup("source file is empty"));
        }

        Ok(())
    }
}
