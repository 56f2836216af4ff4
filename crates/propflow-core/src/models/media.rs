use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::classification::{Classification, RoomLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaType::Photo => write!(f, "photo"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "photo" => Ok(MediaType::Photo),
            "video" => Ok(MediaType::Video),
            _ => Err(anyhow::anyhow!("Invalid media type: {}", s)),
        }
    }
}

/// Migration status of a single media item.
///
/// Owned by the scheduler. Forward transitions are
/// `pending -> processing -> processed | error`; the only ways back are
/// `error -> pending` (explicit retry) and `processing -> pending`
/// (crash recovery, or a pipeline-level fatal error that must not be blamed
/// on the item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Pending,
    Processing,
    Processed,
    Error,
}

impl MediaStatus {
    pub const ALL: [MediaStatus; 4] = [
        MediaStatus::Pending,
        MediaStatus::Processing,
        MediaStatus::Processed,
        MediaStatus::Error,
    ];

    /// Statuses an item may be in immediately before moving to `self`.
    pub fn allowed_predecessors(self) -> &'static [MediaStatus] {
        match self {
            MediaStatus::Pending => &[MediaStatus::Error, MediaStatus::Processing],
            MediaStatus::Processing => &[MediaStatus::Pending],
            MediaStatus::Processed => &[MediaStatus::Processing],
            MediaStatus::Error => &[MediaStatus::Processing],
        }
    }

    pub fn can_transition_to(self, next: MediaStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

impl Display for MediaStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaStatus::Pending => write!(f, "pending"),
            MediaStatus::Processing => write!(f, "processing"),
            MediaStatus::Processed => write!(f, "processed"),
            MediaStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for MediaStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MediaStatus::Pending),
            "processing" => Ok(MediaStatus::Processing),
            "processed" => Ok(MediaStatus::Processed),
            "error" => Ok(MediaStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid media status: {}", s)),
        }
    }
}

/// One externally sourced property photo moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: Uuid,
    /// Original asset: an http(s) URL, a `gdrive:<id>` reference or a local path.
    pub source_ref: String,
    pub media_type: MediaType,
    pub status: MediaStatus,
    pub processed_path: Option<String>,
    /// Convenience copy of the last issued URL. Not durable truth; reissue from
    /// `processed_path` when it has expired.
    pub processed_url: Option<String>,
    pub ai_primary_label: Option<RoomLabel>,
    #[serde(default)]
    pub ai_labels: Vec<RoomLabel>,
    pub ai_confidence: Option<f32>,
    pub ai_description: Option<String>,
    /// Number of times the item has been dispatched.
    #[serde(default)]
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaItem {
    pub fn new_photo(source_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.into(),
            media_type: MediaType::Photo,
            status: MediaStatus::Pending,
            processed_path: None,
            processed_url: None,
            ai_primary_label: None,
            ai_labels: Vec::new(),
            ai_confidence: None,
            ai_description: None,
            attempts: 0,
            last_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change and its accompanying fields.
    ///
    /// Timestamps never move backwards even if the wall clock does.
    pub fn apply(&mut self, status: MediaStatus, update: ItemUpdate, now: DateTime<Utc>) {
        let now = monotonic_after(self.updated_at, now);

        if status == MediaStatus::Processing {
            self.attempts += 1;
        }
        if let Some(path) = update.processed_path {
            self.processed_path = Some(path);
        }
        if let Some(url) = update.processed_url {
            self.processed_url = Some(url);
        }
        if let Some(classification) = update.classification {
            self.ai_primary_label = Some(classification.primary_label);
            self.ai_labels = classification.labels;
            self.ai_confidence = Some(classification.confidence);
            self.ai_description = classification.description;
        }
        match status {
            MediaStatus::Processed => {
                self.last_error = None;
                self.processed_at = Some(match self.processed_at {
                    Some(prev) => monotonic_after(prev, now),
                    None => now,
                });
            }
            MediaStatus::Error => {
                self.last_error = update.last_error;
            }
            _ => {}
        }

        self.status = status;
        self.updated_at = now;
    }
}

/// Fields written alongside a status change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdate {
    pub processed_path: Option<String>,
    pub processed_url: Option<String>,
    pub classification: Option<Classification>,
    pub last_error: Option<String>,
}

impl ItemUpdate {
    pub fn processed(path: String, url: String, classification: Option<Classification>) -> Self {
        Self {
            processed_path: Some(path),
            processed_url: Some(url),
            classification,
            last_error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            last_error: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Number of photo items in each status, as read from the item store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub processed: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.processed + self.error
    }

    pub fn add(&mut self, status: MediaStatus, n: i64) {
        match status {
            MediaStatus::Pending => self.pending += n,
            MediaStatus::Processing => self.processing += n,
            MediaStatus::Processed => self.processed += n,
            MediaStatus::Error => self.error += n,
        }
    }
}

fn monotonic_after(prev: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > prev {
        now
    } else {
        prev + Duration::microseconds(1)
    }
}
