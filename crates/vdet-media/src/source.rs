//! Streaming frame sources.
//!
//! A frame source exposes header metadata up front and then yields decoded
//! frames lazily, in decode order, until the stream ends. Opening the same
//! path again restarts the sequence from the first frame.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::probe_video;

/// Trailing decoder log kept for error reports.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Header metadata of an opened source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub path: PathBuf,
    /// Frame count as reported by the header; may be inaccurate
    pub total_frames: u64,
    /// Frames per second, 0 when unknown
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Ordered, finite sequence of decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Header metadata, available before the first frame is read.
    fn info(&self) -> &SourceInfo;

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Opens frame sources for video paths.
#[async_trait]
pub trait FrameSourceOpener: Send + Sync {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>>;
}

/// Frame source backed by an `ffmpeg` rawvideo pipe.
pub struct FfmpegFrameSource {
    info: SourceInfo,
    child: Child,
    stdout: BufReader<ChildStdout>,
    /// Drains stderr while frames stream and yields its tail
    stderr: Option<JoinHandle<String>>,
    frame_len: usize,
    frames_read: u64,
    finished: bool,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding it.
    pub async fn open(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let probe = probe_video(path).await?;

        if probe.width == 0 || probe.height == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "{} has no frame dimensions",
                path.display()
            )));
        }

        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0", "-vsync", "passthrough", "-pix_fmt", "rgb24", "-f", "rawvideo", "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg: {}", e), None, None)
        })?;

        let info = SourceInfo {
            path: path.to_path_buf(),
            total_frames: probe.frame_count,
            fps: probe.fps,
            width: probe.width,
            height: probe.height,
        };

        info!(
            path = %path.display(),
            total_frames = info.total_frames,
            fps = info.fps,
            width = info.width,
            height = info.height,
            "Opened FFmpeg frame source"
        );

        Self::from_child(info, child)
    }

    /// Wrap a running decoder that writes rawvideo frames to stdout.
    fn from_child(info: SourceInfo, mut child: Child) -> MediaResult<Self> {
        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None)
        })?;
        let stderr = child.stderr.take().map(drain_stderr);

        Ok(Self {
            frame_len: Frame::byte_len(info.width, info.height),
            info,
            child,
            stdout: BufReader::new(stdout),
            stderr,
            frames_read: 0,
            finished: false,
        })
    }

    /// Fill one frame buffer. Returns the number of bytes read (0 at EOF).
    async fn fill(&mut self, buf: &mut [u8]) -> MediaResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Reap the decoder once stdout is exhausted and surface its failure, if any.
    async fn finish(&mut self) -> MediaResult<()> {
        self.finished = true;

        let status = self.child.wait().await.map_err(|e| {
            MediaError::ffmpeg_failed(format!("FFmpeg process error: {}", e), None, None)
        })?;

        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!("FFmpeg stderr reader failed: {}", e);
                String::new()
            }),
            None => String::new(),
        };

        if status.success() {
            debug!(frames = self.frames_read, "FFmpeg decoder finished");
            return Ok(());
        }

        Err(MediaError::ffmpeg_failed(
            format!("FFmpeg exited after {} frames", self.frames_read),
            Some(stderr),
            status.code(),
        ))
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        let filled = self.fill(&mut buf).await?;

        if filled == 0 {
            self.finish().await?;
            return Ok(None);
        }

        if filled < self.frame_len {
            self.finished = true;
            return Err(MediaError::TruncatedFrame {
                expected: self.frame_len,
                actual: filled,
            });
        }

        self.frames_read += 1;
        Ok(Some(Frame {
            width: self.info.width,
            height: self.info.height,
            data: buf,
        }))
    }
}

/// Read a decoder's stderr to the end, keeping only the last few KiB.
///
/// The pipe must be drained while frames stream; a full stderr pipe stalls
/// the decoder's stdout.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut tail: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
                Err(e) => {
                    warn!("Failed to read FFmpeg stderr: {}", e);
                    break;
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Opens `FfmpegFrameSource`s.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSourceOpener;

#[async_trait]
impl FrameSourceOpener for FfmpegSourceOpener {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let source = FfmpegFrameSource::open(path).await?;
        Ok(Box::new(source))
    }
}
