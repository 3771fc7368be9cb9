//! Usage features and quantity metrics recorded per completed job.

use serde::{Deserialize, Serialize};

use crate::message::JobType;

/// The billable feature a usage event is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageFeature {
    ChatCompletion,
    ImageGeneration,
    VideoGeneration,
    SlidesGeneration,
    CvExport,
}

impl UsageFeature {
    /// The `event_type` column value for this feature.
    pub fn event_type(self) -> &'static str {
        match self {
            UsageFeature::ChatCompletion => "chat_completion",
            UsageFeature::ImageGeneration => "image_generation",
            UsageFeature::VideoGeneration => "video_generation",
            UsageFeature::SlidesGeneration => "slides_generation",
            UsageFeature::CvExport => "cv_export",
        }
    }
}

impl From<JobType> for UsageFeature {
    fn from(job_type: JobType) -> Self {
        match job_type {
            JobType::Chat => UsageFeature::ChatCompletion,
            JobType::Image => UsageFeature::ImageGeneration,
            JobType::Video => UsageFeature::VideoGeneration,
            JobType::Slides => UsageFeature::SlidesGeneration,
            JobType::Cv => UsageFeature::CvExport,
        }
    }
}

/// Quantities consumed by one job. Each field maps onto one quota counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub tokens: i64,
    pub images: i32,
    pub videos: i32,
    pub video_seconds: i32,
    pub slides: i32,
    pub cvs: i32,
}

impl UsageMetrics {
    /// One generated video of `seconds` length.
    pub fn video(seconds: u32) -> Self {
        Self {
            videos: 1,
            video_seconds: i32::try_from(seconds).unwrap_or(i32::MAX),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
