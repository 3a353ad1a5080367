//! Frame extraction from uploaded videos
//!
//! Decoding is delegated to the `ffmpeg`/`ffprobe` binaries: a probe pass
//! collects [`VideoInfo`], then an `image2pipe` MJPEG stream is read from
//! a child process and split into individual JPEGs on their SOI markers.
//! The extractor yields one frame every `max(1, round(fps * Δ))` source
//! frames, lazily and exactly once.
//!
//! The [`FrameSource`] trait is the seam between decoding and the
//! pipeline; tests feed scripted frames through the same interface.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::types::{format_timestamp, Frame, VideoInfo};

/// MJPEG quantizer roughly matching JPEG quality 80.
const JPEG_QUANTIZER: &str = "5";

/// Read chunk size for the ffmpeg stdout pipe.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Anything shorter than this between SOI markers is codec noise, not a frame.
const MIN_FRAME_BYTES: usize = 100;

/// JPEG start-of-image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];

/// The container could not be opened or probed.
#[derive(Debug, thiserror::Error)]
#[error("could not open video: {0}")]
pub struct DecodeError(pub String);

/// Anything that can hand the pipeline a finite sequence of frames.
#[async_trait]
pub trait FrameSource: Send {
    fn info(&self) -> &VideoInfo;

    /// Next sampled frame, or `None` at end of stream. Non-restartable.
    async fn next_frame(&mut self) -> Option<Frame>;
}

// ============================================================================
// Probing
// ============================================================================

/// Collect container metadata with `ffprobe`.
pub async fn probe(path: &Path) -> Result<VideoInfo, DecodeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate,nb_frames,width,height,duration",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| DecodeError(format!("ffprobe unavailable: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DecodeError(format!(
            "ffprobe failed: {}",
            stderr.trim().chars().take(200).collect::<String>()
        )));
    }

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| DecodeError(format!("unreadable ffprobe output: {e}")))?;

    let stream = doc
        .get("streams")
        .and_then(|s| s.get(0))
        .ok_or_else(|| DecodeError("no video stream found".to_string()))?;

    let fps = stream
        .get("r_frame_rate")
        .and_then(serde_json::Value::as_str)
        .and_then(parse_rate)
        .unwrap_or(0.0);
    if fps <= 0.0 {
        return Err(DecodeError("invalid frame rate".to_string()));
    }

    let duration_seconds = number_field(stream, "duration")
        .or_else(|| doc.get("format").and_then(|f| number_field(f, "duration")))
        .unwrap_or(0.0);

    let total_frames = number_field(stream, "nb_frames")
        .map(|n| n as u64)
        .unwrap_or_else(|| (duration_seconds * fps).round() as u64);

    Ok(VideoInfo {
        fps,
        total_frames,
        duration_seconds,
        width: number_field(stream, "width").unwrap_or(0.0) as u32,
        height: number_field(stream, "height").unwrap_or(0.0) as u32,
        duration_formatted: format_timestamp(duration_seconds),
    })
}

/// Parse an ffprobe rational like `"30000/1001"`.
fn parse_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => raw.trim().parse().ok(),
    }
}

/// ffprobe reports numbers as JSON strings; accept either.
fn number_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Lazy sampled-frame reader over an ffmpeg MJPEG pipe.
pub struct FrameExtractor {
    info: VideoInfo,
    frame_interval: u64,
    extracted: u64,
    max_frames: Option<u64>,
    child: Child,
    stdout: Option<ChildStdout>,
    carry: Vec<u8>,
    finished: bool,
}

impl FrameExtractor {
    /// Open a video for sampled extraction.
    ///
    /// Fails only when the container cannot be probed or the decoder
    /// cannot be spawned; decode failures after that terminate the
    /// sequence cleanly instead of erroring.
    pub async fn open(
        path: &Path,
        interval_seconds: f64,
        max_frames: Option<u64>,
    ) -> Result<Self, DecodeError> {
        let info = probe(path).await?;
        let frame_interval = ((info.fps * interval_seconds).round() as u64).max(1);

        let sampler = format!("select=not(mod(n\\,{frame_interval}))");
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args([
                "-vf",
                sampler.as_str(),
                "-vsync",
                "vfr",
                "-f",
                "image2pipe",
                "-c:v",
                "mjpeg",
                "-q:v",
                JPEG_QUANTIZER,
                "-an",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DecodeError(format!("ffmpeg unavailable: {e}")))?;

        let stdout = child.stdout.take();
        debug!(
            fps = info.fps,
            frame_interval, "Frame extraction started"
        );

        Ok(Self {
            info,
            frame_interval,
            extracted: 0,
            max_frames,
            child,
            stdout,
            carry: Vec::with_capacity(READ_BUFFER_SIZE),
            finished: false,
        })
    }

    fn build_frame(&mut self, jpeg: Vec<u8>) -> Frame {
        let frame_number = self.extracted * self.frame_interval;
        self.extracted += 1;
        let timestamp_seconds = frame_number as f64 / self.info.fps;
        Frame {
            frame_number,
            timestamp: format_timestamp(timestamp_seconds),
            timestamp_seconds,
            image_base64: format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg)),
        }
    }
}

#[async_trait]
impl FrameSource for FrameExtractor {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        if self.finished || self.max_frames.is_some_and(|max| self.extracted >= max) {
            return None;
        }
        let mut stdout = self.stdout.take()?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if let Some(jpeg) = split_complete_frame(&mut self.carry) {
                self.stdout = Some(stdout);
                return Some(self.build_frame(jpeg));
            }

            match stdout.read(&mut buf).await {
                Ok(0) => {
                    // EOF: flush the trailing frame, then stop for good.
                    self.finished = true;
                    let _ = self.child.wait().await;
                    let tail = std::mem::take(&mut self.carry);
                    if tail.len() >= MIN_FRAME_BYTES && tail.starts_with(&SOI) {
                        return Some(self.build_frame(tail));
                    }
                    return None;
                }
                Ok(n) => self.carry.extend_from_slice(&buf[..n]),
                Err(e) => {
                    // Mid-stream decode failure ends the sequence cleanly.
                    warn!(error = %e, "Frame pipe read failed, ending extraction");
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

/// Pop one complete JPEG off the front of `carry`.
///
/// A frame is complete once the SOI marker of the *next* frame appears.
/// Fragments shorter than [`MIN_FRAME_BYTES`] are discarded as noise.
fn split_complete_frame(carry: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        if carry.len() < 2 {
            return None;
        }
        let boundary = carry[1..]
            .windows(2)
            .position(|w| w == SOI)
            .map(|pos| pos + 1)?;

        let rest = carry.split_off(boundary);
        let frame = std::mem::replace(carry, rest);
        if frame.len() >= MIN_FRAME_BYTES && frame.starts_with(&SOI) {
            return Some(frame);
        }
        // Dropped leading garbage; keep scanning from the new SOI.
    }
}

// ============================================================================
// Tests
// ============================================================================
