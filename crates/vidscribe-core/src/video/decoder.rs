use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::frame::Frame;
use super::FrameSource;
use crate::error::{Error, Result};

/// Video metadata obtained by probing with ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProbeResult {
    width: u32,
    height: u32,
    fps: f64,
}

fn probe(path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            Error::ResourceUnavailable(format!("failed to run ffprobe, is ffmpeg installed? ({e})"))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        return Err(Error::ResourceUnavailable(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let info = parse_probe_output(&stdout)?;

    if info.fps <= 0.0 {
        warn!(fps = info.fps, ?path, "video has non-positive fps");
    }

    info!(width = info.width, height = info.height, fps = info.fps, "probe completed");
    Ok(info)
}

/// Parse ffprobe's `width,height,num/den` line.
fn parse_probe_output(stdout: &str) -> Result<ProbeResult> {
    let bad = |what: &str| Error::ResourceUnavailable(format!("{what} in ffprobe output {stdout:?}"));

    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        error!(%stdout, "unexpected ffprobe output format, expected width,height,fps");
        return Err(bad("missing fields"));
    }

    let width: u32 = parts[0].parse().map_err(|_| bad("bad width"))?;
    let height: u32 = parts[1].parse().map_err(|_| bad("bad height"))?;
    if width == 0 || height == 0 {
        return Err(bad("zero dimensions"));
    }

    let fps = if let Some((num, den)) = parts[2].split_once('/') {
        let num: f64 = num.parse().map_err(|_| bad("bad fps numerator"))?;
        let den: f64 = den.parse().map_err(|_| bad("bad fps denominator"))?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        parts[2].parse().map_err(|_| bad("bad fps"))?
    };

    Ok(ProbeResult { width, height, fps })
}

/// Amount of ffmpeg's stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Drain a child's stderr on a background thread so a chatty decoder never
/// blocks on a full pipe. Only the last `STDERR_TAIL_BYTES` are kept.
fn drain_stderr<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut tail: Vec<u8> = Vec::with_capacity(STDERR_TAIL_BYTES);
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(%e, "failed to read ffmpeg stderr");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
///
/// The child process is the decoding resource; it is killed and reaped when
/// the decoder is dropped, however sampling ends.
pub struct VideoDecoder {
    child: Child,
    stderr_tail: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u32,
    frame_bytes: usize,
    finished: bool,
}

impl VideoDecoder {
    /// Open a video file for decoding.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ResourceUnavailable(format!(
                "video file does not exist: {}",
                path.display()
            )));
        }

        let info = probe(path)?;

        info!(?path, "spawning ffmpeg decoder process");

        let mut command = Command::new("ffmpeg");
        command
            .args(["-i"])
            .arg(path)
            .args([
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-v", "error",
                "pipe:1",
            ]);

        Self::spawn(command, info)
    }

    /// Start a decoder process that writes raw RGB24 frames to stdout.
    fn spawn(mut command: Command, info: ProbeResult) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ResourceUnavailable(format!("failed to spawn ffmpeg, is it installed? ({e})"))
            })?;

        let stderr_tail = child.stderr.take().map(drain_stderr);
        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;

        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            stderr_tail,
            width: info.width,
            height: info.height,
            fps: info.fps,
            frame_count: 0,
            frame_bytes,
            finished: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn collect_stderr(&mut self) -> String {
        match self.stderr_tail.take().map(JoinHandle::join) {
            Some(Ok(tail)) => tail,
            Some(Err(_)) => {
                warn!("ffmpeg stderr reader panicked");
                String::new()
            }
            None => String::new(),
        }
    }

    /// Called on a clean EOF. A non-zero ffmpeg exit means the stream was cut
    /// short by a decoding error rather than by the end of the video.
    fn finish(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        self.finished = true;
        let stderr = self.collect_stderr();

        if !status.success() {
            error!(%status, %stderr, frame = self.frame_count, "ffmpeg exited with failure");
            return Err(Error::Decode(format!(
                "ffmpeg exited with {status} after {} frames: {}",
                self.frame_count,
                stderr.trim()
            )));
        }

        info!(total_frames = self.frame_count, "video stream ended");
        Ok(())
    }
}

impl FrameSource for VideoDecoder {
    fn fps(&self) -> f64 {
        self.fps
    }

    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| Error::Decode("ffmpeg stdout not available".into()))?;

        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;
        let mut ended = false;

        while read < self.frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        ended = true;
                        break;
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    return Err(Error::Decode(format!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes)",
                        self.frame_bytes,
                    )));
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(Error::Decode(format!("failed to read from ffmpeg pipe: {e}")));
                }
            }
        }

        if ended {
            self.finish()?;
            return Ok(None);
        }

        let image = RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| Error::Decode("raw frame does not match probed dimensions".into()))?;

        let frame = Frame::new(image, self.frame_count, self.fps);
        self.frame_count += 1;

        debug!(
            frame_number = frame.frame_number,
            timestamp_seconds = frame.timestamp_seconds,
            "decoded frame"
        );

        Ok(Some(frame))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(total_frames = self.frame_count, "closing video decoder");
        if !self.finished {
            let _ = self.child.kill();
            if let Err(e) = self.child.wait() {
                warn!(%e, "failed to reap ffmpeg process");
            }
        }
        self.collect_stderr();
    }
}
