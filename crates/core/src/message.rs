//! The durable-queue payload and the closed sets it is routed by.
//!
//! `job_type` and `provider` stay plain strings on the wire so that a
//! message naming an unknown type still deserializes; routing resolves
//! them into [`JobType`] / [`ProviderKind`] once, at dispatch time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, UserId};

// ---------------------------------------------------------------------------
// JobMessage
// ---------------------------------------------------------------------------

/// A job to be executed, as enqueued by the request-serving API.
///
/// Written once at enqueue time and delivered at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub user_id: UserId,
    pub job_type: String,
    pub provider: String,
    #[serde(default)]
    pub prompt: String,
    /// Requested output length in seconds (video jobs).
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub style: Option<String>,
    /// Provider-specific parameters passed through untouched.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl JobMessage {
    /// Parse a raw queue body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Serialize for enqueueing.
    pub fn to_body(&self) -> String {
        // A struct of strings, numbers and a JSON value cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// JobType
// ---------------------------------------------------------------------------

/// Every kind of generation job the product knows about.
///
/// Only [`JobType::Video`] runs through the asynchronous pipeline; the
/// rest complete synchronously in the request-serving API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Chat,
    Image,
    Video,
    Slides,
    Cv,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Chat => "chat",
            JobType::Image => "image",
            JobType::Video => "video",
            JobType::Slides => "slides",
            JobType::Cv => "cv",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(JobType::Chat),
            "image" => Ok(JobType::Image),
            "video" => Ok(JobType::Video),
            "slides" => Ok(JobType::Slides),
            "cv" => Ok(JobType::Cv),
            _ => Err(UnknownKey(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Remote generation providers the worker can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Runway,
    Pika,
    Mock,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Runway => "runway",
            ProviderKind::Pika => "pika",
            ProviderKind::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "runway" => Ok(ProviderKind::Runway),
            "pika" => Ok(ProviderKind::Pika),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(UnknownKey(s.to_string())),
        }
    }
}

/// A string key that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key: {0:?}")]
pub struct UnknownKey(pub String);
