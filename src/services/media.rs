//! Faststart normalization and aspect classification.
//!
//! Both steps shell out to the ffmpeg suite. They sit behind single-method
//! traits so the pipeline can be exercised with in-process fakes.

use async_trait::async_trait;
use serde::Deserialize;
use std::{
    ffi::OsStr,
    io::{self, ErrorKind, SeekFrom},
    path::Path,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::models::aspect::AspectBucket;
pub use crate::services::process::{ProcessError, Tool};

/// Rewrites a video container so its index precedes the media data.
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Stream-copy `input` into `output` with the index moved to the front.
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), ProcessError>;
}

/// Reports the elementary streams of a media file.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<Vec<StreamInfo>, ProcessError>;
}

/// One elementary stream as reported by ffprobe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "codec_type", default)]
    pub codec_type: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<StreamInfo>,
}

/// Parse `ffprobe -print_format json -show_streams` output.
pub fn parse_probe_output(stdout: &[u8]) -> Result<Vec<StreamInfo>, ProcessError> {
    serde_json::from_slice::<ProbeOutput>(stdout)
        .map(|out| out.streams)
        .map_err(|e| ProcessError::Parse("ffprobe".into(), e))
}

/// Bucket for the first video stream; `Other` when there is none.
pub fn bucket_for_streams(streams: &[StreamInfo]) -> AspectBucket {
    streams
        .iter()
        .find(|s| s.codec_type == "video")
        .map(|s| AspectBucket::from_dimensions(s.width, s.height))
        .unwrap_or(AspectBucket::Other)
}

/// Probe `input` and classify its geometry.
pub async fn classify_aspect(prober: &dyn Prober, input: &Path) -> Result<AspectBucket, ProcessError> {
    let streams = prober.probe(input).await?;
    let bucket = bucket_for_streams(&streams);
    if bucket == AspectBucket::Other {
        tracing::debug!(streams = streams.len(), "no landscape or portrait video stream");
    }
    Ok(bucket)
}

/// `ffmpeg -c copy -movflags faststart`.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    tool: Tool,
}

impl FfmpegRemuxer {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), ProcessError> {
        let mut args: Vec<&OsStr> = ["-y", "-v", "error", "-i"].map(OsStr::new).to_vec();
        args.push(input.as_os_str());
        args.extend(["-c", "copy", "-movflags", "faststart", "-f", "mp4"].map(OsStr::new));
        args.push(output.as_os_str());
        self.tool.run(&args).await?;

        let mut file = tokio::fs::File::open(output)
            .await
            .map_err(ProcessError::Other)?;
        let len = file.metadata().await.map_err(ProcessError::Other)?.len();
        if len == 0 {
            return Err(ProcessError::EmptyOutput(self.tool.program.clone()));
        }
        if !is_faststart(&mut file).await.map_err(ProcessError::Other)? {
            return Err(ProcessError::NotFaststart);
        }
        Ok(())
    }
}

/// `ffprobe -show_streams` as JSON.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    tool: Tool,
}

impl FfprobeProber {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, input: &Path) -> Result<Vec<StreamInfo>, ProcessError> {
        let mut args: Vec<&OsStr> = ["-v", "error", "-print_format", "json", "-show_streams"]
            .map(OsStr::new)
            .to_vec();
        args.push(input.as_os_str());
        let stdout = self.tool.run(&args).await?;
        parse_probe_output(&stdout)
    }
}

/// Whether an ISO-BMFF file has its `moov` box before its `mdat` box.
///
/// Only top-level box headers are read.
pub async fn is_faststart<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut offset = reader.seek(SeekFrom::Start(0)).await?;
    loop {
        let mut header = [0u8; 8];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let box_type = &header[4..8];

        match box_type {
            b"moov" => return Ok(true),
            b"mdat" => return Ok(false),
            _ => {}
        }

        let size = match size32 {
            // Box runs to end of file.
            0 => return Ok(false),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large).await?;
                u64::from_be_bytes(large)
            }
            n => u64::from(n),
        };
        let header_len = if size32 == 1 { 16 } else { 8 };
        if size < header_len {
            return Err(io::Error::new(ErrorKind::InvalidData, "box size smaller than header"));
        }
        offset = offset
            .checked_add(size)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "box size overflow"))?;
        reader.seek(SeekFrom::Start(offset)).await?;
    }
}
