use std::{
    collections::{HashMap, hash_map},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// A single tracked point as produced by the external pose/hand detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    /// Strictly above the threshold, unlike frame filtering which keeps equality.
    pub fn is_visible(&self, threshold: f64) -> bool {
        self.visibility > threshold
    }
}

/// A frame value. Anything that does not carry numeric `x`/`y` is kept
/// verbatim so it can pass through smoothing untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameEntry {
    Landmark(Landmark),
    Other(serde_json::Value),
}

impl FrameEntry {
    pub fn as_landmark(&self) -> Option<&Landmark> {
        match self {
            FrameEntry::Landmark(lm) => Some(lm),
            FrameEntry::Other(_) => None,
        }
    }
}

impl From<Landmark> for FrameEntry {
    fn from(value: Landmark) -> Self {
        FrameEntry::Landmark(value)
    }
}

/// All landmarks observed at one instant, keyed by point key such as
/// `pose_0` or `hand_0_4`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkFrame {
    entries: HashMap<String, FrameEntry>,
}

impl LandmarkFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, landmark: Landmark) {
        self.entries.insert(key.into(), FrameEntry::Landmark(landmark));
    }

    pub fn insert_entry(&mut self, key: impl Into<String>, entry: FrameEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn with(mut self, key: impl Into<String>, landmark: Landmark) -> Self {
        self.insert(key, landmark);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FrameEntry> {
        self.entries.get(key)
    }

    pub fn landmark(&self, key: &str) -> Option<&Landmark> {
        self.entries.get(key).and_then(FrameEntry::as_landmark)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, FrameEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, FrameEntry)> for LandmarkFrame {
    fn from_iter<T: IntoIterator<Item = (String, FrameEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for LandmarkFrame {
    type Item = (String, FrameEntry);
    type IntoIter = hash_map::IntoIter<String, FrameEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Frame as delivered by the capture side, with an optional capture time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub landmarks: LandmarkFrame,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Fingertip subset of one tracked hand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HandPoints {
    pub wrist: Option<Landmark>,
    pub thumb_tip: Option<Landmark>,
    pub index_tip: Option<Landmark>,
    pub middle_tip: Option<Landmark>,
}

impl HandPoints {
    pub fn is_empty(&self) -> bool {
        self.wrist.is_none()
            && self.thumb_tip.is_none()
            && self.index_tip.is_none()
            && self.middle_tip.is_none()
    }
}

/// Named semantic view of a filtered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct KeyPointSet {
    pub nose: Option<Landmark>,
    pub left_shoulder: Option<Landmark>,
    pub right_shoulder: Option<Landmark>,
    pub left_elbow: Option<Landmark>,
    pub right_elbow: Option<Landmark>,
    pub left_wrist: Option<Landmark>,
    pub right_wrist: Option<Landmark>,
    pub left_hip: Option<Landmark>,
    pub right_hip: Option<Landmark>,
    pub hand_0: Option<HandPoints>,
    pub hand_1: Option<HandPoints>,
}

impl KeyPointSet {
    pub fn wrist(&self, side: Side) -> Option<Landmark> {
        match side {
            Side::Left => self.left_wrist,
            Side::Right => self.right_wrist,
        }
    }

    pub fn shoulder(&self, side: Side) -> Option<Landmark> {
        match side {
            Side::Left => self.left_shoulder,
            Side::Right => self.right_shoulder,
        }
    }

    pub fn elbow(&self, side: Side) -> Option<Landmark> {
        match side {
            Side::Left => self.left_elbow,
            Side::Right => self.right_elbow,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureLabel {
    None,
    RaiseLeftHand,
    RaiseRightHand,
    BothHandsUp,
    Clap,
    PointLeft,
    PointRight,
    HandsClose,
    WaveLeft,
    WaveRight,
    CircleRight,
}

impl GestureLabel {
    pub const ALL: [GestureLabel; 11] = [
        GestureLabel::None,
        GestureLabel::RaiseLeftHand,
        GestureLabel::RaiseRightHand,
        GestureLabel::BothHandsUp,
        GestureLabel::Clap,
        GestureLabel::PointLeft,
        GestureLabel::PointRight,
        GestureLabel::HandsClose,
        GestureLabel::WaveLeft,
        GestureLabel::WaveRight,
        GestureLabel::CircleRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::None => "none",
            GestureLabel::RaiseLeftHand => "raise_left_hand",
            GestureLabel::RaiseRightHand => "raise_right_hand",
            GestureLabel::BothHandsUp => "both_hands_up",
            GestureLabel::Clap => "clap",
            GestureLabel::PointLeft => "point_left",
            GestureLabel::PointRight => "point_right",
            GestureLabel::HandsClose => "hands_close",
            GestureLabel::WaveLeft => "wave_left",
            GestureLabel::WaveRight => "wave_right",
            GestureLabel::CircleRight => "circle_right",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GestureLabel::None => "No gesture",
            GestureLabel::RaiseLeftHand => "Left hand raised",
            GestureLabel::RaiseRightHand => "Right hand raised",
            GestureLabel::BothHandsUp => "Both hands up",
            GestureLabel::Clap => "Clap",
            GestureLabel::PointLeft => "Pointing left",
            GestureLabel::PointRight => "Pointing right",
            GestureLabel::HandsClose => "Hands close together",
            GestureLabel::WaveLeft => "Left hand wave",
            GestureLabel::WaveRight => "Right hand wave",
            GestureLabel::CircleRight => "Right hand circle",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GestureLabel::None)
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown gesture label `{0}`")]
pub struct UnknownGesture(pub String);

impl FromStr for GestureLabel {
    type Err = UnknownGesture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GestureLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| UnknownGesture(s.to_string()))
    }
}

/// Classifier output: a label from the closed vocabulary and how much the
/// inspected points could be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Gesture {
    pub label: GestureLabel,
    pub confidence: f64,
}

impl Gesture {
    pub fn none() -> Self {
        Self {
            label: GestureLabel::None,
            confidence: 0.0,
        }
    }

    pub fn new(label: GestureLabel, confidence: f64) -> Self {
        if label.is_none() {
            return Self::none();
        }
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}
