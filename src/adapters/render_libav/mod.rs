//! Render context over libswscale
//!
//! Identity jobs scale straight to the encoder's YUV 4:2:0 format. Everything
//! else goes through RGBA: the source is converted, warped onto the canvas and
//! scaled down to the output size.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use ffmpeg_next::software::scaling::{Context as Scaler, Flags};
use tracing::debug;

use crate::domain::model::Size;
use crate::error::{TranscodeError, TranscodeResult};
use crate::ports::{RenderContext, RenderTarget};
use crate::utils::warp::{warp_rgba, RgbaPlane, RgbaPlaneMut};

/// Pixel format the H.264 encoder consumes
pub const OUTPUT_FORMAT: Pixel = Pixel::YUV420P;

/// Warp stage for non-identity transforms
struct WarpStage {
    to_rgba: Scaler,
    source: frame::Video,
    canvas: frame::Video,
}

/// Per-job pixel buffers, allocated once from the first decoded frame
pub struct LibavRenderer {
    target: RenderTarget,
    input_format: Pixel,
    input_size: Size,
    warp: Option<WarpStage>,
    to_output: Scaler,
    output: frame::Video,
}

impl LibavRenderer {
    fn scaler(from: Pixel, from_size: Size, to: Pixel, to_size: Size) -> TranscodeResult<Scaler> {
        Scaler::get(
            from,
            from_size.width,
            from_size.height,
            to,
            to_size.width,
            to_size.height,
            Flags::BILINEAR,
        )
        .map_err(|e| {
            TranscodeError::setup(format!(
                "no scaler from {:?} {} to {:?} {}: {}",
                from, from_size, to, to_size, e
            ))
        })
    }

    /// A frame with its pixel planes allocated, or an error if libav could not allocate them
    fn buffer(format: Pixel, size: Size) -> TranscodeResult<frame::Video> {
        let frame = frame::Video::new(format, size.width, size.height);
        // SAFETY: `as_ptr` points at the AVFrame owned by `frame`, alive for this read
        let missing = unsafe { (*frame.as_ptr()).data[0].is_null() };
        if missing {
            return Err(TranscodeError::setup(format!(
                "could not allocate a {:?} {} frame",
                format, size
            )));
        }
        Ok(frame)
    }

    fn warp_into_canvas(stage: &mut WarpStage, target: &RenderTarget) {
        let source = RgbaPlane {
            data: stage.source.data(0),
            stride: stage.source.stride(0),
            width: stage.source.width(),
            height: stage.source.height(),
        };
        let width = stage.canvas.width();
        let height = stage.canvas.height();
        let stride = stage.canvas.stride(0);
        let mut canvas = RgbaPlaneMut {
            data: stage.canvas.data_mut(0),
            stride,
            width,
            height,
        };
        warp_rgba(&source, &mut canvas, &target.transform.transform);
    }
}

impl RenderContext for LibavRenderer {
    type Frame = frame::Video;
    type Output = frame::Video;

    fn allocate(first: &frame::Video, target: &RenderTarget) -> TranscodeResult<Self> {
        let input_format = first.format();
        let input_size = Size::new(first.width(), first.height());
        if input_size.is_empty() || target.output_size.is_empty() {
            return Err(TranscodeError::setup(format!(
                "cannot render {} frames to {}",
                input_size, target.output_size
            )));
        }

        let (warp, to_output) = if target.transform.is_identity() {
            let to_output = Self::scaler(input_format, input_size, OUTPUT_FORMAT, target.output_size)?;
            (None, to_output)
        } else {
            let canvas_size = target.transform.canvas;
            let stage = WarpStage {
                to_rgba: Self::scaler(input_format, input_size, Pixel::RGBA, input_size)?,
                source: Self::buffer(Pixel::RGBA, input_size)?,
                canvas: Self::buffer(Pixel::RGBA, canvas_size)?,
            };
            let to_output = Self::scaler(Pixel::RGBA, canvas_size, OUTPUT_FORMAT, target.output_size)?;
            (Some(stage), to_output)
        };

        debug!(
            "Render buffers: {:?} {} -> {} ({})",
            input_format,
            input_size,
            target.output_size,
            if warp.is_some() { "warped" } else { "scaled" }
        );

        Ok(Self {
            target: *target,
            input_format,
            input_size,
            warp,
            to_output,
            output: Self::buffer(OUTPUT_FORMAT, target.output_size)?,
        })
    }

    fn render(&mut self, frame: &frame::Video) -> TranscodeResult<&mut frame::Video> {
        if frame.format() != self.input_format
            || frame.width() != self.input_size.width
            || frame.height() != self.input_size.height
        {
            return Err(TranscodeError::writer(format!(
                "source frame changed from {:?} {} to {:?} {}x{} mid-stream",
                self.input_format,
                self.input_size,
                frame.format(),
                frame.width(),
                frame.height()
            )));
        }

        match self.warp.as_mut() {
            None => self
                .to_output
                .run(frame, &mut self.output)
                .map_err(|e| TranscodeError::writer(format!("scaling frame: {}", e)))?,
            Some(stage) => {
                stage
                    .to_rgba
                    .run(frame, &mut stage.source)
                    .map_err(|e| TranscodeError::writer(format!("converting frame to RGBA: {}", e)))?;
                Self::warp_into_canvas(stage, &self.target);
                self.to_output
                    .run(&stage.canvas, &mut self.output)
                    .map_err(|e| TranscodeError::writer(format!("scaling canvas: {}", e)))?;
            }
        }

        Ok(&mut self.output)
    }
}
