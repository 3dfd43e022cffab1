use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConvertError, Result};

/// What the encoder should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Video,
    Audio,
    Image,
}

/// Optional encoder knobs; unset fields keep the encoder's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionSettings {
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate: Option<String>,
    pub audio_bitrate: Option<String>,
    /// `WIDTHxHEIGHT`
    pub resolution: Option<String>,
    pub fps: Option<u32>,
    pub quality: Option<u8>,
}

/// A conversion as submitted by the shell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub id: String,
    pub file_path: PathBuf,
    pub output_format: String,
    pub output_type: OutputType,
    #[serde(default)]
    pub settings: ConversionSettings,
    #[serde(default)]
    pub output_folder: Option<PathBuf>,
    /// Seconds from the start of the input
    #[serde(default)]
    pub trim_start: Option<f64>,
    #[serde(default)]
    pub trim_end: Option<f64>,
}

impl ConversionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ConvertError::InvalidRequest("job id is empty".into()));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(ConvertError::InvalidRequest("input path is empty".into()));
        }
        if self.output_format.is_empty()
            || !self.output_format.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConvertError::InvalidRequest(format!(
                "unsupported output format {:?}",
                self.output_format
            )));
        }
        if let Some(res) = &self.settings.resolution {
            let valid = res
                .split_once('x')
                .is_some_and(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok());
            if !valid {
                return Err(ConvertError::InvalidRequest(format!(
                    "resolution must be WIDTHxHEIGHT, got {res:?}"
                )));
            }
        }
        match (self.trim_start, self.trim_end) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) if start >= 0.0 && start < end => Ok(()),
            (Some(_), Some(_)) => Err(ConvertError::InvalidRequest(
                "trim range must satisfy 0 <= start < end".into(),
            )),
            _ => Err(ConvertError::InvalidRequest(
                "trim start and end must be given together".into(),
            )),
        }
    }

    /// `(start, duration)` in seconds when the job is trimmed
    pub fn trim(&self) -> Option<(f64, f64)> {
        match (self.trim_start, self.trim_end) {
            (Some(start), Some(end)) => Some((start, end - start)),
            _ => None,
        }
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed {
        #[serde(rename = "outputPath")]
        output_path: PathBuf,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

/// A request plus its progress through the queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub request: ConversionRequest,
    #[serde(flatten)]
    pub status: JobStatus,
    /// 0 to 100
    pub progress: f32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Position in the queue; a resubmitted id gets a new one
    #[serde(skip)]
    pub(crate) submission: u64,
}

impl ConversionJob {
    pub fn new(request: ConversionRequest) -> Self {
        Self {
            request,
            status: JobStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            submission: 0,
        }
    }
}
