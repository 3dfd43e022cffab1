use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};
use crate::job::{ConversionRequest, OutputType};

const STDERR_TAIL_LINES: usize = 5;
const MAX_OUTPUT_SUFFIX: u32 = 999;

/// Runs one conversion to completion.
///
/// Progress is reported as a percentage through `progress`; dropping the
/// sender is fine once the encoder has nothing more to say.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        request: &ConversionRequest,
        progress: watch::Sender<f32>,
    ) -> Result<PathBuf>;
}

/// Encoder backed by an `ffmpeg` executable
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `<folder>/<stem>_converted.<format>`, folder defaulting to the input's
    pub fn planned_output(request: &ConversionRequest) -> PathBuf {
        let folder = request
            .output_folder
            .clone()
            .or_else(|| request.file_path.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let stem = request
            .file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.id.clone());
        folder.join(format!("{}_converted.{}", stem, request.output_format))
    }

    /// Argument list for a request; trimming seeks on the input side
    pub fn build_args(request: &ConversionRequest, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-nostats", "-progress", "pipe:1"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let trim = request.trim();
        if let Some((start, _)) = trim {
            args.extend(["-ss".to_string(), format_seconds(start)]);
        }
        args.extend(["-i".to_string(), request.file_path.display().to_string()]);
        if let Some((_, duration)) = trim {
            args.extend(["-t".to_string(), format_seconds(duration)]);
        }

        let s = &request.settings;
        match request.output_type {
            OutputType::Video => {
                push_opt(&mut args, "-c:v", s.video_codec.clone());
                push_opt(&mut args, "-b:v", s.video_bitrate.clone());
                push_opt(&mut args, "-crf", s.quality.map(|q| q.to_string()));
                push_opt(&mut args, "-s", s.resolution.clone());
                push_opt(&mut args, "-r", s.fps.map(|fps| fps.to_string()));
                push_opt(&mut args, "-c:a", s.audio_codec.clone());
                push_opt(&mut args, "-b:a", s.audio_bitrate.clone());
            }
            OutputType::Audio => {
                args.push("-vn".to_string());
                push_opt(&mut args, "-c:a", s.audio_codec.clone());
                push_opt(&mut args, "-b:a", s.audio_bitrate.clone());
            }
            OutputType::Image => {
                args.extend(["-frames:v".to_string(), "1".to_string()]);
                push_opt(&mut args, "-q:v", s.quality.map(|q| q.to_string()));
                push_opt(&mut args, "-s", s.resolution.clone());
            }
        }

        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &ConversionRequest,
        progress: watch::Sender<f32>,
    ) -> Result<PathBuf> {
        let output = unique_output(FfmpegEncoder::planned_output(request)).await?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = Self::build_args(request, &output);
        debug!(job_id = %request.id, binary = ?self.binary, ?args, "Spawning encoder");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConvertError::Spawn(format!("{}: {}", self.binary.display(), e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let duration = request.trim().map(|(_, d)| d);
        let _ = progress.send(0.0);
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(pct) = parse_progress(&line, duration) {
                    let _ = progress.send(pct);
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let tail = stderr_tail(&stderr);
            warn!(job_id = %request.id, %status, "Encoder exited with failure");
            return Err(ConvertError::EncoderFailed(format!("{status}: {tail}")));
        }

        let _ = progress.send(100.0);
        info!(job_id = %request.id, output = ?output, "Conversion finished");
        Ok(output)
    }
}

/// Avoid clobbering earlier results: `name.ext`, `name_1.ext`, ...
async fn unique_output(planned: PathBuf) -> Result<PathBuf> {
    pick_output(planned, MAX_OUTPUT_SUFFIX).await
}

async fn pick_output(planned: PathBuf, max_suffix: u32) -> Result<PathBuf> {
    if !tokio::fs::try_exists(&planned).await? {
        return Ok(planned);
    }
    let stem = planned
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = planned
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    for n in 1..=max_suffix {
        let candidate = planned.with_file_name(format!("{stem}_{n}.{ext}"));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(ConvertError::InvalidRequest(format!(
        "no free output name next to {}",
        planned.display()
    )))
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<String>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value);
    }
}

fn format_seconds(secs: f64) -> String {
    format!("{:.3}", secs)
}

/// Read a `-progress` key/value line into a percentage
fn parse_progress(line: &str, duration_secs: Option<f64>) -> Option<f32> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "progress" if value == "end" => Some(100.0),
        "out_time_us" | "out_time_ms" => {
            let total = duration_secs.filter(|d| *d > 0.0)?;
            let micros: f64 = value.parse().ok()?;
            let pct = (micros / 1_000_000.0 / total * 100.0).clamp(0.0, 99.0);
            Some(pct as f32)
        }
        _ => None,
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
