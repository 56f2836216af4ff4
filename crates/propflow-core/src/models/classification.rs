use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Closed room-type vocabulary. Anything a classifier returns outside this
/// set is stored as [`RoomLabel::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomLabel {
    LivingRoom,
    Bedroom,
    Kitchen,
    Bathroom,
    DiningRoom,
    Office,
    Exterior,
    Garden,
    Pool,
    Garage,
    Balcony,
    Hallway,
    Laundry,
    Other,
}

impl RoomLabel {
    pub const ALL: [RoomLabel; 14] = [
        RoomLabel::LivingRoom,
        RoomLabel::Bedroom,
        RoomLabel::Kitchen,
        RoomLabel::Bathroom,
        RoomLabel::DiningRoom,
        RoomLabel::Office,
        RoomLabel::Exterior,
        RoomLabel::Garden,
        RoomLabel::Pool,
        RoomLabel::Garage,
        RoomLabel::Balcony,
        RoomLabel::Hallway,
        RoomLabel::Laundry,
        RoomLabel::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoomLabel::LivingRoom => "living_room",
            RoomLabel::Bedroom => "bedroom",
            RoomLabel::Kitchen => "kitchen",
            RoomLabel::Bathroom => "bathroom",
            RoomLabel::DiningRoom => "dining_room",
            RoomLabel::Office => "office",
            RoomLabel::Exterior => "exterior",
            RoomLabel::Garden => "garden",
            RoomLabel::Pool => "pool",
            RoomLabel::Garage => "garage",
            RoomLabel::Balcony => "balcony",
            RoomLabel::Hallway => "hallway",
            RoomLabel::Laundry => "laundry",
            RoomLabel::Other => "other",
        }
    }

    /// Map a label from an external service into the vocabulary.
    ///
    /// Case, surrounding whitespace and space/hyphen separators are
    /// normalized; unknown labels become `Other`.
    pub fn from_untrusted(raw: &str) -> RoomLabel {
        let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
        RoomLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == normalized)
            .unwrap_or(RoomLabel::Other)
    }
}

impl Display for RoomLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Classifier output exactly as the external service returned it.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RawClassification {
    #[serde(default, alias = "primaryLabel")]
    pub primary_label: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Classification result clamped into the known domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub primary_label: RoomLabel,
    pub labels: Vec<RoomLabel>,
    pub confidence: f32,
    pub description: Option<String>,
}

impl Classification {
    pub fn from_raw(raw: RawClassification) -> Self {
        let primary_label = RoomLabel::from_untrusted(&raw.primary_label);

        let mut labels: Vec<RoomLabel> = Vec::with_capacity(raw.labels.len() + 1);
        for label in raw.labels.iter().map(|l| RoomLabel::from_untrusted(l)) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        if !labels.contains(&primary_label) {
            labels.insert(0, primary_label);
        }

        // NaN from a confused model counts as no confidence at all.
        let confidence = if raw.confidence.is_nan() {
            0.0
        } else {
            raw.confidence.clamp(0.0, 1.0) as f32
        };

        let description = raw
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Self {
            primary_label,
            labels,
            confidence,
            description,
        }
    }
}
