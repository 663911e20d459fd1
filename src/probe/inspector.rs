//! Source inspection over libavformat

use std::path::Path;

use ffmpeg_next::{codec, ffi, format, media};
use tracing::{debug, info};

use crate::domain::model::{Size, Timebase};
use crate::domain::transform::AffineTransform;
use crate::error::{TrackKind, TranscodeError, TranscodeResult};
use crate::probe::{AssetInfo, AudioTrackInfo, VideoTrackInfo};

/// Frame rate assumed when the container reports none
const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Inspector that extracts the metadata a transcode needs
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetInspector;

impl AssetInspector {
    /// Create a new asset inspector
    pub fn new() -> Self {
        Self
    }

    /// Inspect a source file
    pub fn inspect(&self, path: &Path) -> TranscodeResult<AssetInfo> {
        info!("Inspecting source file: {}", path.display());

        if !path.exists() {
            return Err(TranscodeError::InputFileNotFound {
                path: path.display().to_string(),
            });
        }

        let file_size = std::fs::metadata(path)?.len();

        let ictx = format::input(&path).map_err(|e| {
            TranscodeError::setup(format!("could not open '{}': {}", path.display(), e))
        })?;

        let video_stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or(TranscodeError::TrackMissing {
                kind: TrackKind::Video,
            })?;
        let audio_stream = ictx
            .streams()
            .best(media::Type::Audio)
            .ok_or(TranscodeError::TrackMissing {
                kind: TrackKind::Audio,
            })?;

        let video = Self::video_track(&video_stream)?;
        let audio = Self::audio_track(&audio_stream)?;

        let duration = if ictx.duration() > 0 {
            ictx.duration() as f64 / ffi::AV_TIME_BASE as f64
        } else {
            video.time_base.pts_to_seconds(video_stream.duration().max(0))
        };

        let container_bit_rate = positive(ictx.bit_rate());
        let bit_rate = video.bit_rate.or(container_bit_rate);

        let asset = AssetInfo {
            path: path.to_path_buf(),
            container: ictx.format().name().to_string(),
            file_size,
            duration,
            bit_rate,
            video,
            audio,
        };

        info!(
            "Source {}: {} {} ({} natural) @ {:.3} fps, {} {} Hz x{}, {:.3}s",
            path.display(),
            asset.video.codec,
            asset.video.coded_size,
            asset.video.natural_size,
            asset.video.frame_rate,
            asset.audio.codec,
            asset.audio.sample_rate,
            asset.audio.channels,
            asset.duration
        );
        Ok(asset)
    }

    fn video_track(stream: &format::stream::Stream) -> TranscodeResult<VideoTrackInfo> {
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| TranscodeError::setup(format!("video decoder: {}", e)))?;

        let coded_size = Size::new(decoder.width(), decoder.height());
        let intrinsic_transform = display_matrix(stream).unwrap_or_default();
        let natural_size = intrinsic_transform
            .without_translation()
            .transformed_size(coded_size);

        let frame_rate = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .filter(|r| r.numerator() > 0 && r.denominator() > 0)
            .map(f64::from)
            .next()
            .unwrap_or(FALLBACK_FRAME_RATE);

        debug!(
            "Video stream {}: intrinsic transform {}",
            stream.index(),
            intrinsic_transform
        );

        Ok(VideoTrackInfo {
            index: stream.index(),
            codec: decoder.id().name().to_string(),
            coded_size,
            natural_size,
            frame_rate,
            bit_rate: positive(decoder.bit_rate() as i64),
            time_base: Timebase::from(stream.time_base()),
            intrinsic_transform,
        })
    }

    fn audio_track(stream: &format::stream::Stream) -> TranscodeResult<AudioTrackInfo> {
        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().audio())
            .map_err(|e| TranscodeError::setup(format!("audio decoder: {}", e)))?;

        Ok(AudioTrackInfo {
            index: stream.index(),
            codec: decoder.id().name().to_string(),
            sample_rate: decoder.rate(),
            channels: decoder.channels(),
            bit_rate: positive(decoder.bit_rate() as i64),
            time_base: Timebase::from(stream.time_base()),
        })
    }
}

fn positive(value: i64) -> Option<u64> {
    (value > 0).then_some(value as u64)
}

/// Read the display matrix from the stream's coded side data
///
/// ffmpeg-next exposes no safe accessor for codec parameter side data.
fn display_matrix(stream: &format::stream::Stream) -> Option<AffineTransform> {
    let params = stream.parameters();
    // SAFETY: `params` borrows the stream's AVCodecParameters, which outlive this
    // block. `av_packet_side_data_get` returns null or an entry of that array. The
    // entry is used only when non-null and at least nine i32 long, and the
    // payload is read unaligned since side data carries no alignment guarantee.
    unsafe {
        let par = params.as_ptr();
        let side_data = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null()
            || (*side_data).data.is_null()
            || (*side_data).size < 9 * std::mem::size_of::<i32>()
        {
            return None;
        }
        let payload = (*side_data).data as *const [i32; 9];
        let matrix = std::ptr::read_unaligned(payload);
        Some(AffineTransform::from_display_matrix(&matrix))
    }
}
