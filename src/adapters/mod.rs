// Adapters - FFmpeg implementations of the media ports

pub mod reader_libav;
pub mod render_libav;
pub mod writer_libav;

use std::path::Path;

use ffmpeg_next::frame;

use crate::engine::JobPlan;
use crate::error::TranscodeResult;
use crate::ports::MediaBackend;
use crate::probe::{AssetInfo, AssetInspector};

pub use reader_libav::LibavReader;
pub use render_libav::LibavRenderer;
pub use writer_libav::LibavWriter;

/// Media backend over the linked FFmpeg libraries
#[derive(Debug, Default)]
pub struct LibavBackend {
    inspector: AssetInspector,
}

impl LibavBackend {
    /// Initialize FFmpeg and build the backend
    pub fn new() -> TranscodeResult<Self> {
        crate::init()?;
        Ok(Self {
            inspector: AssetInspector::new(),
        })
    }
}

impl MediaBackend for LibavBackend {
    type VideoFrame = frame::Video;
    type AudioFrame = frame::Audio;
    type Rendered = frame::Video;
    type Reader = LibavReader;
    type Writer = LibavWriter;
    type Renderer = LibavRenderer;

    fn inspect(&self, path: &Path) -> TranscodeResult<AssetInfo> {
        self.inspector.inspect(path)
    }

    fn open_reader(&self, plan: &JobPlan) -> TranscodeResult<Self::Reader> {
        LibavReader::open(plan)
    }

    fn open_writer(&self, plan: &JobPlan) -> TranscodeResult<Self::Writer> {
        LibavWriter::create(plan)
    }
}
