//! Media format conversion queue
//!
//! Jobs run one at a time, in submission order, through an [`Encoder`].
//! Each job moves `pending → processing → completed | failed`; pending
//! jobs may be cancelled.

mod encoder;
mod error;
mod job;
mod queue;

pub use encoder::{Encoder, FfmpegEncoder};
pub use error::{ConvertError, Result};
pub use job::{ConversionJob, ConversionRequest, ConversionSettings, JobStatus, OutputType};
pub use queue::ConversionQueue;
