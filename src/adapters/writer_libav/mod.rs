//! Multiplexing writer: H.264 and AAC into an MP4 or MOV container
//!
//! The container is written to a hidden temporary file next to the
//! destination and only renamed into place once the trailer is written.
//! A cancelled or failed job never leaves a file at the destination.

use std::path::{Path, PathBuf};

use ffmpeg_next::channel_layout::ChannelLayout;
use ffmpeg_next::format::sample::{Sample as SampleFormat, Type as SampleType};
use ffmpeg_next::software::resampling;
use ffmpeg_next::{codec, encoder, format, frame, Dictionary, Packet, Rational};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::adapters::render_libav::OUTPUT_FORMAT;
use crate::config::EngineSettings;
use crate::domain::model::{EncodingConfig, Size, Timebase, Timestamp};
use crate::engine::JobPlan;
use crate::error::{TranscodeError, TranscodeResult};
use crate::ports::{Sample, SampleWriter, WriterStatus};

/// Time base used when the source video reports none
const FALLBACK_VIDEO_TIME_BASE: Timebase = Timebase { num: 1, den: 90_000 };

/// AAC frame size when the encoder does not report one
const DEFAULT_AAC_FRAME_SIZE: usize = 1024;

/// Encoder-facing audio format
const AUDIO_FORMAT: SampleFormat = SampleFormat::F32(SampleType::Planar);

/// Stereo float samples waiting for a full encoder frame
#[derive(Debug, Default)]
struct StereoFifo {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl StereoFifo {
    fn len(&self) -> usize {
        self.left.len()
    }

    /// Append a planar float frame. Mono input is duplicated to both channels.
    fn push(&mut self, audio: &frame::Audio) {
        let samples = audio.samples();
        if samples == 0 {
            return;
        }
        let right_plane = if audio.planes() > 1 { 1 } else { 0 };
        extend_from_plane(&mut self.left, audio.data(0), samples);
        extend_from_plane(&mut self.right, audio.data(right_plane), samples);
    }

    /// Pop `size` samples as one encoder frame, zero-padding a short tail
    fn pop_frame(&mut self, size: usize, rate: u32, pts: i64) -> frame::Audio {
        let available = self.len().min(size);
        let mut audio = frame::Audio::new(AUDIO_FORMAT, size, ChannelLayout::STEREO);
        audio.set_rate(rate);
        audio.set_pts(Some(pts));

        fill_plane(audio.data_mut(0), &self.left[..available], size);
        fill_plane(audio.data_mut(1), &self.right[..available], size);

        self.left.drain(..available);
        self.right.drain(..available);
        audio
    }
}

fn extend_from_plane(samples: &mut Vec<f32>, plane: &[u8], count: usize) {
    samples.extend(
        plane
            .chunks_exact(4)
            .take(count)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
    );
}

fn fill_plane(plane: &mut [u8], samples: &[f32], size: usize) {
    for (i, chunk) in plane.chunks_exact_mut(4).take(size).enumerate() {
        let value = samples.get(i).copied().unwrap_or(0.0);
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
}

/// Opened H.264 encoder and its output stream
struct VideoOutput {
    encoder: encoder::Video,
    stream: usize,
    time_base: Rational,
    stream_time_base: Rational,
    last_pts: Option<i64>,
    frames: u64,
}

/// Opened AAC encoder, its resampler and FIFO
struct AudioOutput {
    encoder: encoder::Audio,
    stream: usize,
    rate: u32,
    frame_size: usize,
    stream_time_base: Rational,
    resampler: Option<resampling::Context>,
    fifo: StereoFifo,
    next_sample: Option<i64>,
}

/// Writer for one job's destination
pub struct LibavWriter {
    destination: PathBuf,
    output_size: Size,
    encoding: EncodingConfig,
    settings: EngineSettings,
    frame_rate: f64,
    video_time_base: Timebase,
    h264: Option<codec::Codec>,
    aac: Option<codec::Codec>,
    temp: Option<TempPath>,
    output: Option<format::context::Output>,
    video: Option<VideoOutput>,
    audio: Option<AudioOutput>,
    session_start: Option<Timestamp>,
    video_finished: bool,
    audio_finished: bool,
    status: WriterStatus,
}

impl LibavWriter {
    /// Bind a writer to the plan's destination. Nothing is created on disk yet.
    pub fn create(plan: &JobPlan) -> TranscodeResult<Self> {
        let directory = destination_dir(&plan.destination);
        if !directory.is_dir() {
            return Err(TranscodeError::setup(format!(
                "output directory '{}' does not exist",
                directory.display()
            )));
        }

        let time_base = plan.asset.video.time_base;
        let video_time_base = if time_base.num > 0 && time_base.den > 0 {
            time_base
        } else {
            FALLBACK_VIDEO_TIME_BASE
        };

        Ok(Self {
            destination: plan.destination.clone(),
            output_size: plan.output_size,
            encoding: plan.encoding.clone(),
            settings: plan.settings.clone(),
            frame_rate: plan.asset.video.frame_rate,
            video_time_base,
            h264: None,
            aac: None,
            temp: None,
            output: None,
            video: None,
            audio: None,
            session_start: None,
            video_finished: false,
            audio_finished: false,
            status: WriterStatus::Unknown,
        })
    }

    fn fail(&mut self, message: String) -> TranscodeError {
        warn!("Writer failed: {}", message);
        self.status = WriterStatus::Failed(message.clone());
        TranscodeError::writer(message)
    }

    fn session_open(&self) -> bool {
        self.status == WriterStatus::Writing && self.output.is_some()
    }

    fn open_video(&self, output: &mut format::context::Output) -> TranscodeResult<VideoOutput> {
        let codec = self
            .h264
            .ok_or_else(|| TranscodeError::setup("video input is not attached"))?;
        let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);
        let stream = output
            .add_stream(codec)
            .map_err(|e| TranscodeError::setup(format!("add video stream: {}", e)))?
            .index();

        let time_base: Rational = self.video_time_base.into();
        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| TranscodeError::setup(format!("video encoder context: {}", e)))?;
        context.set_width(self.output_size.width);
        context.set_height(self.output_size.height);
        context.set_format(OUTPUT_FORMAT);
        context.set_time_base(time_base);
        if self.frame_rate > 0.0 {
            context.set_frame_rate(Some(Rational::from(self.frame_rate)));
        }
        context.set_bit_rate(self.encoding.video_bitrate as usize);
        context.set_max_bit_rate(self.encoding.video_bitrate as usize);
        context.set_gop(self.encoding.max_keyframe_interval);
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let profile = &self.encoding.profile_level;
        let mut options = Dictionary::new();
        options.set("preset", &self.settings.preset);
        options.set("profile", profile.profile.as_str());
        if let Some(level) = profile.level_string() {
            options.set("level", &level);
        }
        options.set("maxrate", &self.encoding.video_bitrate.to_string());
        options.set("bufsize", &(self.encoding.video_bitrate * 2).to_string());
        options.set("threads", &self.settings.threads.to_string());

        let encoder = context
            .open_as_with(codec, options)
            .map_err(|e| TranscodeError::setup(format!("open H.264 encoder ({}): {}", profile, e)))?;

        output
            .stream_mut(stream)
            .ok_or_else(|| TranscodeError::setup("video stream vanished"))?
            .set_parameters(&encoder);

        debug!(
            "H.264 {} {} at {} bps, key frame every {} frames",
            profile, self.output_size, self.encoding.video_bitrate, self.encoding.max_keyframe_interval
        );

        Ok(VideoOutput {
            encoder,
            stream,
            time_base,
            stream_time_base: time_base,
            last_pts: None,
            frames: 0,
        })
    }

    fn open_audio(&self, output: &mut format::context::Output) -> TranscodeResult<AudioOutput> {
        let codec = self
            .aac
            .ok_or_else(|| TranscodeError::setup("audio input is not attached"))?;
        let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);
        let stream = output
            .add_stream(codec)
            .map_err(|e| TranscodeError::setup(format!("add audio stream: {}", e)))?
            .index();

        let rate = self.encoding.audio_sample_rate;
        let mut context = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| TranscodeError::setup(format!("audio encoder context: {}", e)))?;
        context.set_rate(rate as i32);
        context.set_channel_layout(ChannelLayout::STEREO);
        context.set_format(AUDIO_FORMAT);
        context.set_bit_rate(self.encoding.audio_bitrate as usize);
        context.set_time_base(Rational::new(1, rate as i32));
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let encoder = context
            .open_as_with(codec, Dictionary::new())
            .map_err(|e| TranscodeError::setup(format!("open AAC encoder: {}", e)))?;
        let frame_size = match encoder.frame_size() as usize {
            0 => DEFAULT_AAC_FRAME_SIZE,
            size => size,
        };

        output
            .stream_mut(stream)
            .ok_or_else(|| TranscodeError::setup("audio stream vanished"))?
            .set_parameters(&encoder);

        debug!(
            "AAC stereo {} Hz at {} bps, {} samples per frame",
            rate, self.encoding.audio_bitrate, frame_size
        );

        Ok(AudioOutput {
            encoder,
            stream,
            rate,
            frame_size,
            stream_time_base: Rational::new(1, rate as i32),
            resampler: None,
            fifo: StereoFifo::default(),
            next_sample: None,
        })
    }

    fn encode_audio(&mut self, sample: Sample<frame::Audio>) -> Result<(), String> {
        let start = self.session_start.map(|t| t.seconds()).unwrap_or(0.0);
        let (Some(audio), Some(output)) = (self.audio.as_mut(), self.output.as_mut()) else {
            return Err("audio input is not open".to_string());
        };

        if audio.next_sample.is_none() {
            let offset = (sample.pts.seconds() - start).max(0.0);
            audio.next_sample = Some((offset * audio.rate as f64).round() as i64);
        }

        let source = &sample.payload;
        if audio.resampler.is_none() {
            let layout = if source.channel_layout().is_empty() {
                ChannelLayout::default(source.channels() as i32)
            } else {
                source.channel_layout()
            };
            let resampler = resampling::Context::get(
                source.format(),
                layout,
                source.rate(),
                AUDIO_FORMAT,
                ChannelLayout::STEREO,
                audio.rate,
            )
            .map_err(|e| format!("audio resampler: {}", e))?;
            audio.resampler = Some(resampler);
        }

        let mut converted = frame::Audio::empty();
        if let Some(resampler) = audio.resampler.as_mut() {
            resampler
                .run(source, &mut converted)
                .map_err(|e| format!("resampling audio: {}", e))?;
        }
        audio.fifo.push(&converted);
        audio.drain_fifo(output, false)
    }

    fn encode_video(&mut self, rendered: &mut frame::Video, pts: Timestamp) -> Result<(), String> {
        let start = self.session_start.unwrap_or(Timestamp::new(0, pts.timebase));
        let (Some(video), Some(output)) = (self.video.as_mut(), self.output.as_mut()) else {
            return Err("video input is not open".to_string());
        };

        let encoder_time_base = Timebase::from(video.time_base);
        let relative = pts.in_timebase(encoder_time_base) - start.in_timebase(encoder_time_base);
        let mut next = relative.max(0);
        if let Some(last) = video.last_pts {
            if next <= last {
                next = last + 1;
            }
        }
        video.last_pts = Some(next);
        rendered.set_pts(Some(next));

        video
            .encoder
            .send_frame(rendered)
            .map_err(|e| format!("encoding frame at {:.3}s: {}", pts.seconds(), e))?;
        video.frames += 1;
        video.drain_packets(output)
    }
}

impl VideoOutput {
    fn drain_packets(&mut self, output: &mut format::context::Output) -> Result<(), String> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream);
            packet.rescale_ts(self.time_base, self.stream_time_base);
            packet
                .write_interleaved(output)
                .map_err(|e| format!("writing video packet: {}", e))?;
        }
        Ok(())
    }
}

impl AudioOutput {
    /// Encode every full frame in the FIFO, and the padded tail when flushing
    fn drain_fifo(&mut self, output: &mut format::context::Output, flush: bool) -> Result<(), String> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let pts = self.next_sample.unwrap_or(0);
            let audio = self.fifo.pop_frame(self.frame_size, self.rate, pts);
            self.next_sample = Some(pts + self.frame_size as i64);
            self.encoder
                .send_frame(&audio)
                .map_err(|e| format!("encoding audio: {}", e))?;
            self.drain_packets(output)?;
        }
        Ok(())
    }

    fn drain_packets(&mut self, output: &mut format::context::Output) -> Result<(), String> {
        let time_base = Rational::new(1, self.rate as i32);
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream);
            packet.rescale_ts(time_base, self.stream_time_base);
            packet
                .write_interleaved(output)
                .map_err(|e| format!("writing audio packet: {}", e))?;
        }
        Ok(())
    }

    fn finish(&mut self, output: &mut format::context::Output) -> Result<(), String> {
        if let Some(resampler) = self.resampler.as_mut() {
            let mut tail = frame::Audio::empty();
            if resampler.flush(&mut tail).is_ok() {
                self.fifo.push(&tail);
            }
        }
        self.drain_fifo(output, true)?;
        self.encoder
            .send_eof()
            .map_err(|e| format!("flushing audio encoder: {}", e))?;
        self.drain_packets(output)
    }
}

fn destination_dir(destination: &Path) -> PathBuf {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl SampleWriter for LibavWriter {
    type Frame = frame::Video;
    type Audio = frame::Audio;

    fn attach_inputs(&mut self) -> TranscodeResult<()> {
        self.h264 = Some(
            encoder::find(codec::Id::H264)
                .ok_or_else(|| TranscodeError::setup("no H.264 encoder available"))?,
        );
        self.aac = Some(
            encoder::find(codec::Id::AAC)
                .ok_or_else(|| TranscodeError::setup("no AAC encoder available"))?,
        );
        Ok(())
    }

    fn start_writing(&mut self) -> TranscodeResult<()> {
        if self.h264.is_none() || self.aac.is_none() {
            return Err(TranscodeError::setup("writer inputs are not attached"));
        }
        let temp = tempfile::Builder::new()
            .prefix(".vidpress-")
            .suffix(&format!(".{}", self.settings.container))
            .tempfile_in(destination_dir(&self.destination))
            .map_err(|e| TranscodeError::setup(format!("temporary output: {}", e)))?
            .into_temp_path();
        debug!("Writing to {}", temp.display());

        self.temp = Some(temp);
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: Timestamp) -> TranscodeResult<()> {
        let temp = self
            .temp
            .as_ref()
            .ok_or_else(|| TranscodeError::setup("writer has not started"))?;
        let mut output = format::output_as(temp, &self.settings.container).map_err(|e| {
            TranscodeError::setup(format!("open {} output: {}", self.settings.container, e))
        })?;

        let mut video = self.open_video(&mut output)?;
        let mut audio = self.open_audio(&mut output)?;

        let mut options = Dictionary::new();
        if self.settings.faststart {
            options.set("movflags", "faststart");
        }
        output
            .write_header_with(options)
            .map_err(|e| TranscodeError::setup(format!("write container header: {}", e)))?;

        // The muxer may pick its own stream time bases while writing the header
        if let Some(stream) = output.stream(video.stream) {
            video.stream_time_base = stream.time_base();
        }
        if let Some(stream) = output.stream(audio.stream) {
            audio.stream_time_base = stream.time_base();
        }

        self.output = Some(output);
        self.video = Some(video);
        self.audio = Some(audio);
        self.session_start = Some(at);
        Ok(())
    }

    fn status(&self) -> WriterStatus {
        self.status.clone()
    }

    fn video_ready(&self) -> bool {
        self.session_open() && !self.video_finished
    }

    fn audio_ready(&self) -> bool {
        self.session_open() && !self.audio_finished
    }

    fn append_video(&mut self, frame: &mut frame::Video, pts: Timestamp) -> TranscodeResult<()> {
        if !self.video_ready() {
            return Err(TranscodeError::writer("video input is not accepting frames"));
        }
        self.encode_video(frame, pts).map_err(|message| self.fail(message))
    }

    fn append_audio(&mut self, sample: Sample<frame::Audio>) -> TranscodeResult<()> {
        if !self.audio_ready() {
            return Err(TranscodeError::writer("audio input is not accepting samples"));
        }
        self.encode_audio(sample).map_err(|message| self.fail(message))
    }

    fn finish_video(&mut self) -> TranscodeResult<()> {
        if self.video_finished {
            return Ok(());
        }
        self.video_finished = true;
        let flushed = match (self.video.as_mut(), self.output.as_mut()) {
            (Some(video), Some(output)) => {
                debug!("Flushing video encoder after {} frames", video.frames);
                video
                    .encoder
                    .send_eof()
                    .map_err(|e| format!("flushing video encoder: {}", e))
                    .and_then(|_| video.drain_packets(output))
            }
            _ => Ok(()),
        };
        flushed.map_err(|message| self.fail(message))
    }

    fn finish_audio(&mut self) -> TranscodeResult<()> {
        if self.audio_finished {
            return Ok(());
        }
        self.audio_finished = true;
        let flushed = match (self.audio.as_mut(), self.output.as_mut()) {
            (Some(audio), Some(output)) => audio.finish(output),
            _ => Ok(()),
        };
        flushed.map_err(|message| self.fail(message))
    }

    fn finish_writing(&mut self) -> TranscodeResult<PathBuf> {
        if let WriterStatus::Failed(message) = &self.status {
            return Err(TranscodeError::writer(message.clone()));
        }
        self.finish_video()?;
        self.finish_audio()?;

        let mut output = self
            .output
            .take()
            .ok_or_else(|| TranscodeError::writer("no session to finish"))?;
        if let Err(e) = output.write_trailer() {
            return Err(self.fail(format!("write container trailer: {}", e)));
        }
        // Closes the file before it is moved
        drop(output);
        self.video = None;
        self.audio = None;

        let temp = self
            .temp
            .take()
            .ok_or_else(|| TranscodeError::writer("temporary output missing"))?;
        if let Err(e) = temp.persist(&self.destination) {
            return Err(self.fail(format!(
                "move output into '{}': {}",
                self.destination.display(),
                e.error
            )));
        }

        self.status = WriterStatus::Completed;
        info!("Wrote {}", self.destination.display());
        Ok(self.destination.clone())
    }

    fn cancel_writing(&mut self) {
        if matches!(self.status, WriterStatus::Unknown | WriterStatus::Writing) {
            self.status = WriterStatus::Cancelled;
        }
        self.video = None;
        self.audio = None;
        self.output = None;
        if let Some(temp) = self.temp.take() {
            if let Err(e) = temp.close() {
                debug!("Removing temporary output: {}", e);
            }
        }
    }
}
