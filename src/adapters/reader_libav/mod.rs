//! Demultiplexing reader over libavformat and libavcodec
//!
//! Packets are pulled on demand. Each call to `next_video` or `next_audio`
//! reads until that track has a decoded frame queued, holding frames of the
//! other track for its own turn.

use std::collections::VecDeque;
use std::ops::DerefMut;
use std::path::PathBuf;

use ffmpeg_next::{codec, decoder, format, frame, Packet};
use tracing::{debug, trace, warn};

use crate::domain::model::{Timebase, Timestamp};
use crate::engine::JobPlan;
use crate::error::{TrackKind, TranscodeError, TranscodeResult};
use crate::ports::{ReaderStatus, Sample, SampleReader};

/// Audio frames are windowed by their full span with no extra slack
const AUDIO_TOLERANCE: f64 = 0.0;

/// How far short of the trim end the video may stop before the source counts as truncated
const TRUNCATION_SLACK: f64 = 1.0;

/// Frame types the reader decodes into
trait DecodedFrame: DerefMut<Target = frame::Frame> + Sized {
    fn empty() -> Self;

    /// Length of the frame in seconds, zero for pictures
    fn span(&self) -> f64;
}

impl DecodedFrame for frame::Video {
    fn empty() -> Self {
        frame::Video::empty()
    }

    fn span(&self) -> f64 {
        0.0
    }
}

impl DecodedFrame for frame::Audio {
    fn empty() -> Self {
        frame::Audio::empty()
    }

    fn span(&self) -> f64 {
        if self.rate() > 0 {
            self.samples() as f64 / self.rate() as f64
        } else {
            0.0
        }
    }
}

/// One source track: its decoder, trim window and queue of decoded frames
struct Track<F> {
    kind: TrackKind,
    index: usize,
    time_base: Timebase,
    decoder: Option<decoder::Opened>,
    start: f64,
    end: f64,
    tolerance: f64,
    pending: VecDeque<Sample<F>>,
    done: bool,
    skipped: u64,
    /// Latest decoded presentation time, in seconds
    last_seen: Option<f64>,
    reached_end: bool,
}

impl<F: DecodedFrame> Track<F> {
    fn new(kind: TrackKind, index: usize, time_base: Timebase, plan: &JobPlan, tolerance: f64) -> Self {
        Self {
            kind,
            index,
            time_base,
            decoder: None,
            start: plan.trim.start,
            end: plan.trim.end(),
            tolerance,
            pending: VecDeque::new(),
            done: false,
            skipped: 0,
            last_seen: None,
            reached_end: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.done && self.pending.is_empty()
    }

    fn decode(&mut self, packet: &Packet) -> Result<(), ffmpeg_next::Error> {
        if self.done {
            return Ok(());
        }
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.send_packet(packet)?;
        }
        self.receive();
        Ok(())
    }

    /// Drain the decoder after the last packet and close the track
    fn flush(&mut self) {
        if !self.done {
            if let Some(decoder) = self.decoder.as_mut() {
                if let Err(e) = decoder.send_eof() {
                    debug!("Flushing {} decoder: {}", self.kind, e);
                }
            }
            self.receive();
        }
        self.close();
    }

    fn receive(&mut self) {
        loop {
            let Some(decoder) = self.decoder.as_mut() else {
                break;
            };
            let mut decoded = F::empty();
            if decoder.receive_frame(&mut decoded).is_err() {
                break;
            }
            self.accept(decoded);
        }
    }

    /// Queue a frame that falls inside the trim window
    fn accept(&mut self, decoded: F) {
        let Some(pts) = decoded.timestamp().or_else(|| decoded.pts()) else {
            trace!("Skipping {} frame without a timestamp", self.kind);
            return;
        };

        let begins = self.time_base.pts_to_seconds(pts);
        self.last_seen = Some(self.last_seen.map_or(begins, |seen| seen.max(begins)));
        if begins + decoded.span() + self.tolerance <= self.start {
            self.skipped += 1;
            return;
        }
        if begins >= self.end - self.tolerance {
            debug!(
                "{} reached trim end at {:.3}s, {} leading frames skipped",
                self.kind, begins, self.skipped
            );
            self.reached_end = true;
            self.close();
            return;
        }

        self.pending
            .push_back(Sample::new(Timestamp::new(pts, self.time_base), decoded));
    }

    /// Describe how the source fell short if it ended well before the trim end
    fn shortfall(&self) -> Option<String> {
        if self.reached_end {
            return None;
        }
        let last = self.last_seen.unwrap_or(self.start);
        (last + TRUNCATION_SLACK < self.end).then(|| {
            format!(
                "{} ends at {:.3}s, expected data up to {:.3}s",
                self.kind, last, self.end
            )
        })
    }

    fn close(&mut self) {
        self.done = true;
        self.decoder = None;
    }

    fn discard(&mut self) {
        self.close();
        self.pending.clear();
    }
}

/// Reader for one job's trimmed range of the source
pub struct LibavReader {
    source: PathBuf,
    input: Option<format::context::Input>,
    video: Track<frame::Video>,
    audio: Track<frame::Audio>,
    status: ReaderStatus,
}

impl LibavReader {
    /// Open the source container. Decoders are attached separately.
    pub fn open(plan: &JobPlan) -> TranscodeResult<Self> {
        let input = format::input(&plan.source).map_err(|e| {
            TranscodeError::setup(format!(
                "could not open '{}' for reading: {}",
                plan.source.display(),
                e
            ))
        })?;

        // Half a frame either side so rounding never drops the boundary frame
        let half_frame = plan.asset.frame_interval() / 2.0;

        Ok(Self {
            source: plan.source.clone(),
            input: Some(input),
            video: Track::new(
                TrackKind::Video,
                plan.asset.video.index,
                plan.asset.video.time_base,
                plan,
                half_frame,
            ),
            audio: Track::new(
                TrackKind::Audio,
                plan.asset.audio.index,
                plan.asset.audio.time_base,
                plan,
                AUDIO_TOLERANCE,
            ),
            status: ReaderStatus::Unknown,
        })
    }

    fn open_decoder(&self, kind: TrackKind, index: usize) -> TranscodeResult<decoder::Opened> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| TranscodeError::setup("reader input already closed"))?;
        let stream = input
            .stream(index)
            .ok_or(TranscodeError::TrackMissing { kind })?;

        let context = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| TranscodeError::setup(format!("{} decoder parameters: {}", kind, e)))?;
        context
            .decoder()
            .open()
            .map_err(|e| TranscodeError::setup(format!("could not open {} decoder: {}", kind, e)))
    }

    /// Read and decode one packet. Returns false when nothing more can be produced.
    fn pump(&mut self) -> bool {
        if self.status != ReaderStatus::Reading {
            return false;
        }
        if self.video.done && self.audio.done {
            return false;
        }
        let Some(input) = self.input.as_mut() else {
            return false;
        };

        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => {
                let index = packet.stream();
                if packet.is_corrupt() && (index == self.video.index || index == self.audio.index) {
                    self.fail(format!("corrupt packet in stream {}", index));
                    return false;
                }
                let decoded = if index == self.video.index {
                    self.video.decode(&packet)
                } else if index == self.audio.index {
                    self.audio.decode(&packet)
                } else {
                    Ok(())
                };
                if let Err(e) = decoded {
                    self.fail(format!("decoding stream {}: {}", index, e));
                    return false;
                }
                true
            }
            Err(ffmpeg_next::Error::Eof) => {
                debug!("End of {}", self.source.display());
                self.video.flush();
                self.audio.flush();
                self.input = None;
                if let Some(shortfall) = self.video.shortfall() {
                    self.fail(format!("{} is truncated: {}", self.source.display(), shortfall));
                    return false;
                }
                true
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                true
            }
            Err(e) => {
                self.fail(format!("reading {}: {}", self.source.display(), e));
                false
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!("Reader failed: {}", message);
        self.status = ReaderStatus::Failed(message);
        self.video.discard();
        self.audio.discard();
        self.input = None;
    }
}

impl SampleReader for LibavReader {
    type Video = frame::Video;
    type Audio = frame::Audio;

    fn attach_outputs(&mut self) -> TranscodeResult<()> {
        self.video.decoder = Some(self.open_decoder(TrackKind::Video, self.video.index)?);
        self.audio.decoder = Some(self.open_decoder(TrackKind::Audio, self.audio.index)?);
        Ok(())
    }

    fn start_reading(&mut self) -> TranscodeResult<()> {
        if self.video.decoder.is_none() || self.audio.decoder.is_none() {
            return Err(TranscodeError::setup("reader outputs are not attached"));
        }
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| TranscodeError::setup("reader input already closed"))?;

        if self.video.start > 0.0 {
            // Lands on the key frame at or before the start, leading frames are skipped on decode
            let target = Timebase::av_time_base().seconds_to_pts(self.video.start);
            input
                .seek(target, ..=target)
                .map_err(|e| TranscodeError::setup(format!("seek to {:.3}s: {}", self.video.start, e)))?;
            debug!("Seeked to {:.3}s", self.video.start);
        }

        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn status(&self) -> ReaderStatus {
        if self.status == ReaderStatus::Reading && self.video.exhausted() && self.audio.exhausted() {
            ReaderStatus::Completed
        } else {
            self.status.clone()
        }
    }

    fn next_video(&mut self) -> Option<Sample<frame::Video>> {
        loop {
            if let Some(sample) = self.video.pending.pop_front() {
                return Some(sample);
            }
            if self.video.done || !self.pump() {
                return None;
            }
        }
    }

    fn next_audio(&mut self) -> Option<Sample<frame::Audio>> {
        loop {
            if let Some(sample) = self.audio.pending.pop_front() {
                return Some(sample);
            }
            if self.audio.done || !self.pump() {
                return None;
            }
        }
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.status = ReaderStatus::Cancelled;
        }
        self.video.discard();
        self.audio.discard();
        self.input = None;
    }
}
