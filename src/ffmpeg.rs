use crate::error::{Result, SubreelError};
use crate::recovery::{ConcatenationTool, Manifest};

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| SubreelError::ToolNotFound {
        tool: name.to_string(),
    })
}

fn run(mut command: Command) -> Result<Output> {
    debug!("Running {:?}", command);
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;
    Ok(output)
}

fn stderr_excerpt(output: &Output) -> String {
    excerpt(output.status, &String::from_utf8_lossy(&output.stderr))
}

fn excerpt(status: ExitStatus, stderr: &str) -> String {
    let excerpt: String = stderr.trim().chars().take(500).collect();
    format!("{} ({})", status, excerpt)
}

/// Reads the encoder's stderr while it runs, otherwise a chatty ffmpeg
/// fills the pipe and stops reading frames.
fn drain(stderr: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut log = String::new();
        for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
            debug!("[ffmpeg] {}", line);
            log.push_str(&line);
            log.push('\n');
        }
        log
    })
}

/// Stream-copy concatenation through ffmpeg's concat demuxer.
pub struct FfmpegConcat {
    ffmpeg: PathBuf,
}

impl FfmpegConcat {
    pub fn new(ffmpeg: PathBuf) -> Self {
        FfmpegConcat { ffmpeg }
    }
}

impl ConcatenationTool for FfmpegConcat {
    fn concatenate(&self, manifest: &Manifest, output: &Path) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&manifest.path)
            .args(["-c", "copy"])
            .arg(output)
            .args(["-y", "-loglevel", "warning"]);
        let result = run(command)?;
        if !result.status.success() {
            return Err(SubreelError::tool_failed("ffmpeg", stderr_excerpt(&result)));
        }
        Ok(())
    }
}

/// Duration of a media file in seconds, as reported by ffprobe.
pub fn probe_duration(ffprobe: &Path, media: &Path) -> Result<f64> {
    let mut command = Command::new(ffprobe);
    command
        .args(["-v", "error", "-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(media);
    let result = run(command)?;
    if !result.status.success() {
        return Err(SubreelError::tool_failed("ffprobe", stderr_excerpt(&result)));
    }
    parse_duration(&String::from_utf8_lossy(&result.stdout))
}

fn parse_duration(stdout: &str) -> Result<f64> {
    let text = stdout.trim();
    match text.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(SubreelError::tool_failed(
            "ffprobe",
            format!("unexpected duration output: '{}'", text),
        )),
    }
}

/// Puts `audio` under the silent `video`. Returns whether the muxed file was
/// produced; failure here leaves the silent video usable.
pub fn mux(ffmpeg: &Path, video: &Path, audio: &Path, output: &Path) -> Result<bool> {
    info!(
        "Combining audio {} with video {}",
        audio.display(),
        video.display()
    );
    let mut command = Command::new(ffmpeg);
    command
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-c:v", "copy", "-c:a", "aac"])
        .arg(output)
        .args(["-y", "-loglevel", "warning"]);
    let result = run(command)?;
    if result.status.success() && output.exists() {
        info!("Created final video: {}", output.display());
        Ok(true)
    } else {
        warn!("Failed to combine audio and video: {}", stderr_excerpt(&result));
        Ok(false)
    }
}

/// Encoder settings for segment files.
#[derive(Debug, Clone)]
pub struct SegmentEncoder {
    pub ffmpeg: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u32,
    pub preset: String,
}

/// An ffmpeg process reading raw rgb24 frames from its stdin.
pub struct SegmentWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    path: PathBuf,
}

impl SegmentEncoder {
    pub fn start(&self, path: &Path) -> Result<SegmentWriter> {
        let size = format!("{}x{}", self.width, self.height);
        let fps = self.fps.to_string();
        let crf = self.crf.to_string();
        let mut child = Command::new(&self.ffmpeg)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                size.as_str(),
                "-r",
                fps.as_str(),
                "-i",
                "-",
                "-an",
                "-c:v",
                "libx264",
                "-preset",
                self.preset.as_str(),
                "-crf",
                crf.as_str(),
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(path)
            .args(["-y", "-loglevel", "warning"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(drain);
        Ok(SegmentWriter {
            child,
            stdin,
            stderr,
            path: path.to_path_buf(),
        })
    }
}

impl SegmentWriter {
    pub fn write_frame(&mut self, rgb: &[u8]) -> Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(rgb).map_err(|e| {
                SubreelError::backend(format!("writing frame to {}: {}", self.path.display(), e))
            }),
            None => Err(SubreelError::backend("segment writer already closed")),
        }
    }

    fn collect_stderr(&mut self) -> String {
        match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(log)) => log,
            _ => String::new(),
        }
    }

    /// Closes the pipe and waits for the encoder to finish the file.
    pub fn finish(mut self) -> Result<PathBuf> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let log = self.collect_stderr();
        if !status.success() {
            let _ = std::fs::remove_file(&self.path);
            return Err(SubreelError::tool_failed("ffmpeg", excerpt(status, &log)));
        }
        Ok(self.path)
    }

    /// Kills the encoder and removes the half-written segment, so recovery
    /// never picks it up.
    pub fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.collect_stderr();
        let _ = std::fs::remove_file(&self.path);
    }
}
