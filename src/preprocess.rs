//! Landmark filtering, temporal smoothing and feature extraction.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::{
    config::PreprocessConfig,
    types::{FrameEntry, HandPoints, KeyPointSet, Landmark, LandmarkFrame},
};

/// Number of values produced by [`LandmarkPreprocessor::extract_features`]
/// whenever the reference points are present.
pub const FEATURE_COUNT: usize = 9;

/// Lower bound for shoulder width when it is used as a divisor.
const MIN_SHOULDER_WIDTH: f64 = 1e-3;

const HAND_KEYS: [&str; 2] = ["hand_0", "hand_1"];
const TRACKED_KEYS: [&str; 5] = ["pose_0", "pose_11", "pose_12", "pose_15", "pose_16"];

pub type FeatureVector = Vec<f64>;

pub fn distance(a: &Landmark, b: &Landmark) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
}

/// Bounded FIFO of the most recent raw samples of one point.
#[derive(Clone, Debug)]
pub struct SmoothingBuffer {
    samples: VecDeque<Landmark>,
    capacity: usize,
}

impl SmoothingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Landmark) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn mean(&self) -> Option<Landmark> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let sum = self
            .samples
            .iter()
            .fold(Landmark::default(), |acc, s| Landmark {
                x: acc.x + s.x,
                y: acc.y + s.y,
                z: acc.z + s.z,
                visibility: acc.visibility + s.visibility,
            });
        Some(Landmark {
            x: sum.x / n,
            y: sum.y / n,
            z: sum.z / n,
            visibility: sum.visibility / n,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-session preprocessing state. Smoothing buffers are keyed by point key
/// and live as long as the preprocessor.
#[derive(Clone, Debug)]
pub struct LandmarkPreprocessor {
    smoothing_window: usize,
    visibility_threshold: f64,
    buffers: HashMap<String, SmoothingBuffer>,
}

impl Default for LandmarkPreprocessor {
    fn default() -> Self {
        Self::from_config(&PreprocessConfig::default())
    }
}

impl LandmarkPreprocessor {
    pub fn new(smoothing_window: usize, visibility_threshold: f64) -> Self {
        Self {
            smoothing_window: smoothing_window.max(1),
            visibility_threshold,
            buffers: HashMap::new(),
        }
    }

    pub fn from_config(config: &PreprocessConfig) -> Self {
        Self::new(config.smoothing_window, config.visibility_threshold)
    }

    /// Keeps landmark entries with `visibility >= threshold`. Entries that are
    /// not landmark-shaped have no visibility and are dropped.
    pub fn filter(&self, frame: &LandmarkFrame, threshold: Option<f64>) -> LandmarkFrame {
        filter_frame(frame, threshold.unwrap_or(self.visibility_threshold))
    }

    /// Moving average over the last `smoothing_window` samples of each key.
    pub fn smooth(&mut self, frame: &LandmarkFrame) -> LandmarkFrame {
        let window = self.smoothing_window;
        frame
            .iter()
            .map(|(key, entry)| {
                let smoothed = match entry {
                    FrameEntry::Landmark(raw) => {
                        let buffer = self
                            .buffers
                            .entry(key.clone())
                            .or_insert_with(|| SmoothingBuffer::new(window));
                        buffer.push(*raw);
                        FrameEntry::Landmark(buffer.mean().unwrap_or(*raw))
                    }
                    other => other.clone(),
                };
                (key.clone(), smoothed)
            })
            .collect()
    }

    pub fn extract_key_points(&self, frame: &LandmarkFrame) -> KeyPointSet {
        key_points(frame, self.visibility_threshold)
    }

    /// Shoulder-normalised distances and raw offsets, in a fixed order:
    ///
    /// 0. left wrist to left shoulder
    /// 1. right wrist to right shoulder
    /// 2. left wrist to nose
    /// 3. right wrist to nose
    /// 4. left wrist y minus nose y (raw)
    /// 5. right wrist y minus nose y (raw)
    /// 6. left wrist to right wrist
    /// 7. left wrist x minus left shoulder x (raw)
    /// 8. right wrist x minus right shoulder x (raw)
    ///
    /// Empty unless nose and both shoulders survive filtering; any other
    /// missing point yields `0.0` in its slot.
    pub fn extract_features(&self, frame: &LandmarkFrame) -> FeatureVector {
        let kp = self.extract_key_points(frame);
        let (Some(nose), Some(left_shoulder), Some(right_shoulder)) =
            (kp.nose, kp.left_shoulder, kp.right_shoulder)
        else {
            return Vec::new();
        };

        let shoulder_width = distance(&left_shoulder, &right_shoulder).max(MIN_SHOULDER_WIDTH);
        let normalized = |a: Option<Landmark>, b: Option<Landmark>| match (a, b) {
            (Some(a), Some(b)) => distance(&a, &b) / shoulder_width,
            _ => 0.0,
        };
        let left_wrist = kp.left_wrist;
        let right_wrist = kp.right_wrist;

        vec![
            normalized(left_wrist, Some(left_shoulder)),
            normalized(right_wrist, Some(right_shoulder)),
            normalized(left_wrist, Some(nose)),
            normalized(right_wrist, Some(nose)),
            left_wrist.map_or(0.0, |w| w.y - nose.y),
            right_wrist.map_or(0.0, |w| w.y - nose.y),
            normalized(left_wrist, right_wrist),
            left_wrist.map_or(0.0, |w| w.x - left_shoulder.x),
            right_wrist.map_or(0.0, |w| w.x - right_shoulder.x),
        ]
    }

    /// Per-key displacement between two frames for the nose, shoulders and
    /// wrists. Empty without a previous frame.
    pub fn track_movement(
        &self,
        current: &LandmarkFrame,
        previous: Option<&LandmarkFrame>,
    ) -> BTreeMap<String, f64> {
        let Some(previous) = previous else {
            return BTreeMap::new();
        };
        TRACKED_KEYS
            .iter()
            .filter_map(|key| {
                let curr = current.landmark(key)?;
                let prev = previous.landmark(key)?;
                Some((key.to_string(), distance(curr, prev)))
            })
            .collect()
    }

    pub fn buffered_samples(&self, key: &str) -> usize {
        self.buffers.get(key).map_or(0, SmoothingBuffer::len)
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
    }
}

pub(crate) fn filter_frame(frame: &LandmarkFrame, threshold: f64) -> LandmarkFrame {
    frame
        .iter()
        .filter(|(_, entry)| {
            entry
                .as_landmark()
                .is_some_and(|lm| lm.visibility >= threshold)
        })
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect()
}

/// Maps MediaPipe pose and hand indices to semantic names after filtering.
pub(crate) fn key_points(frame: &LandmarkFrame, threshold: f64) -> KeyPointSet {
    let filtered = filter_frame(frame, threshold);
    let pose = |idx: u8| filtered.landmark(&format!("pose_{idx}")).copied();
    let hand = |hand_key: &str| {
        let point = |idx: u8| filtered.landmark(&format!("{hand_key}_{idx}")).copied();
        let points = HandPoints {
            wrist: point(0),
            thumb_tip: point(4),
            index_tip: point(8),
            middle_tip: point(12),
        };
        (!points.is_empty()).then_some(points)
    };

    KeyPointSet {
        nose: pose(0),
        left_shoulder: pose(11),
        right_shoulder: pose(12),
        left_elbow: pose(13),
        right_elbow: pose(14),
        left_wrist: pose(15),
        right_wrist: pose(16),
        left_hip: pose(23),
        right_hip: pose(24),
        hand_0: hand(HAND_KEYS[0]),
        hand_1: hand(HAND_KEYS[1]),
    }
}
