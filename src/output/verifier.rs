//! Output verification implementation

use std::path::Path;

use tracing::{info, warn};

use crate::domain::model::Size;
use crate::engine::JobPlan;
use crate::error::TranscodeResult;
use crate::output::{VerificationCheck, VerificationReport};
use crate::probe::{AssetInfo, AssetInspector};

/// What a finished job should have produced
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub size: Size,
    pub duration: f64,
    pub frame_rate: f64,
    pub sample_rate: u32,
}

impl Expectation {
    pub fn from_plan(plan: &JobPlan) -> Self {
        Self {
            size: plan.output_size,
            duration: plan.trim.duration,
            frame_rate: plan.asset.video.frame_rate,
            sample_rate: plan.encoding.audio_sample_rate,
        }
    }

    /// Allowed duration error: one frame interval plus one padded AAC frame.
    ///
    /// The measured duration is the container's, so it includes the audio tail.
    pub fn duration_tolerance(&self) -> f64 {
        let frame = if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            0.0
        };
        let aac_frame = if self.sample_rate > 0 {
            1024.0 / self.sample_rate as f64
        } else {
            0.0
        };
        frame + aac_frame
    }
}

/// Re-inspects a produced file and checks it against an [`Expectation`]
#[derive(Debug, Default)]
pub struct OutputVerifier {
    inspector: AssetInspector,
}

impl OutputVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify the file at `path`
    pub fn verify(&self, path: &Path, expected: &Expectation) -> TranscodeResult<VerificationReport> {
        info!("Verifying output file: {}", path.display());
        let info = self.inspector.inspect(path)?;
        let report = Self::check(&info, expected);

        if report.success {
            info!("Verification passed");
        } else {
            for check in report.failures() {
                warn!("Verification check failed: {}: {}", check.check_type, check.details);
            }
        }
        Ok(report)
    }

    /// Run every check against already-inspected metadata
    pub fn check(info: &AssetInfo, expected: &Expectation) -> VerificationReport {
        let video_size = info.video.coded_size;
        let duration_error = (info.duration - expected.duration).abs();
        let tolerance = expected.duration_tolerance();

        let checks = vec![
            VerificationCheck::new("video codec", info.video.codec == "h264", &info.video.codec),
            VerificationCheck::new("audio codec", info.audio.codec == "aac", &info.audio.codec),
            VerificationCheck::new(
                "audio channels",
                info.audio.channels == 2,
                format!("expected 2, found {}", info.audio.channels),
            ),
            VerificationCheck::new(
                "audio sample rate",
                info.audio.sample_rate == expected.sample_rate,
                format!("expected {} Hz, found {} Hz", expected.sample_rate, info.audio.sample_rate),
            ),
            VerificationCheck::new(
                "dimensions",
                video_size == expected.size,
                format!("expected {}, found {}", expected.size, video_size),
            ),
            VerificationCheck::new(
                "duration",
                duration_error <= tolerance,
                format!(
                    "expected {:.3}s, found {:.3}s (tolerance {:.3}s)",
                    expected.duration, info.duration, tolerance
                ),
            ),
        ];

        VerificationReport {
            path: info.path.clone(),
            success: checks.iter().all(|check| check.success),
            duration: info.duration,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::model::Timebase;
    use crate::domain::transform::AffineTransform;
    use crate::probe::{AudioTrackInfo, VideoTrackInfo};

    fn produced(size: Size, duration: f64) -> AssetInfo {
        let time_base = Timebase { num: 1, den: 15360 };
        AssetInfo {
            path: PathBuf::from("out.mp4"),
            container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            file_size: 120_000,
            duration,
            bit_rate: None,
            video: VideoTrackInfo {
                index: 0,
                codec: "h264".to_string(),
                coded_size: size,
                natural_size: size,
                frame_rate: 30.0,
                bit_rate: None,
                time_base,
                intrinsic_transform: AffineTransform::IDENTITY,
            },
            audio: AudioTrackInfo {
                index: 1,
                codec: "aac".to_string(),
                sample_rate: 44_100,
                channels: 2,
                bit_rate: None,
                time_base: Timebase { num: 1, den: 44_100 },
            },
        }
    }

    fn expectation() -> Expectation {
        Expectation {
            size: Size::new(640, 360),
            duration: 10.0,
            frame_rate: 30.0,
            sample_rate: 44_100,
        }
    }

    #[test]
    fn test_matching_output_passes() {
        let report = OutputVerifier::check(&produced(Size::new(640, 360), 10.02), &expectation());
        assert!(report.success, "{:?}", report.checks);
    }

    #[test]
    fn test_duration_outside_tolerance_fails() {
        let report = OutputVerifier::check(&produced(Size::new(640, 360), 10.5), &expectation());
        assert!(!report.success);
        let failed: Vec<_> = report.failures().map(|c| c.check_type.clone()).collect();
        assert_eq!(failed, vec!["duration".to_string()]);
    }

    #[test]
    fn test_wrong_dimensions_fail() {
        let report = OutputVerifier::check(&produced(Size::new(360, 640), 10.0), &expectation());
        assert!(!report.success);
        assert!(report.failures().any(|c| c.check_type == "dimensions"));
    }
}
