use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    config::RecognitionConfig,
    preprocess::{distance, key_points},
    types::{Gesture, GestureLabel, KeyPointSet, Landmark, LandmarkFrame, Side},
};

const VISIBILITY_GATE: &str = "visibility_gate";

/// Tunable geometry for the decision list. Distances are in shoulder widths
/// unless noted; vertical and horizontal offsets are raw frame units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Key points at or above this survive filtering; gated points must exceed it.
    pub visibility: f64,
    /// How far above the nose a wrist must be to count as raised.
    pub raise_offset: f64,
    pub clap_distance: f64,
    pub clap_z_diff: f64,
    pub point_extension: f64,
    pub point_extension_min: f64,
    /// Wrist-to-shoulder over elbow-to-shoulder ratio of a straight arm.
    pub elbow_extension_ratio: f64,
    pub hands_close_distance: f64,
    pub hands_close_y_diff: f64,
    pub hands_close_z_diff: f64,
    /// Pose a hand must hold before its motion history counts.
    pub motion_gate: MotionGate,
    pub wave_movement: f64,
    pub circle_window: usize,
    pub circle_movement: f64,
    pub fallback_shoulder_width: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            visibility: 0.5,
            raise_offset: 0.15,
            clap_distance: 0.12,
            clap_z_diff: 0.08,
            point_extension: 0.15,
            point_extension_min: 0.10,
            elbow_extension_ratio: 1.15,
            hands_close_distance: 0.20,
            hands_close_y_diff: 0.10,
            hands_close_z_diff: 0.15,
            motion_gate: MotionGate::default(),
            wave_movement: 0.05,
            circle_window: 10,
            circle_movement: 0.08,
            fallback_shoulder_width: 0.3,
        }
    }
}

/// Height condition for the wave and circle rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionGate {
    /// Wrist above the raise line. The raise rules are evaluated first and
    /// claim every such frame, so motion gestures never fire.
    #[default]
    Raised,
    /// Wrist above its own shoulder.
    Lifted,
}

/// Recent horizontal wrist positions per side, used by the dynamic rules.
#[derive(Clone, Debug)]
pub struct MotionHistory {
    left: VecDeque<f64>,
    right: VecDeque<f64>,
    capacity: usize,
}

impl MotionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            left: VecDeque::with_capacity(capacity),
            right: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, side: Side, x: f64) {
        let capacity = self.capacity;
        let buffer = self.side_mut(side);
        if buffer.len() == capacity {
            buffer.pop_front();
        }
        buffer.push_back(x);
    }

    pub fn samples(&self, side: Side) -> &VecDeque<f64> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn len(&self, side: Side) -> usize {
        self.samples(side).len()
    }

    pub fn is_full(&self, side: Side) -> bool {
        self.len(side) == self.capacity
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    fn side_mut(&mut self, side: Side) -> &mut VecDeque<f64> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Geometry derived once per frame after the visibility gate passed.
struct Scene<'a> {
    points: KeyPointSet,
    nose: Landmark,
    shoulder_width: f64,
    left_up: bool,
    right_up: bool,
    thresholds: &'a Thresholds,
}

impl<'a> Scene<'a> {
    fn build(points: KeyPointSet, thresholds: &'a Thresholds) -> Option<Self> {
        let visible = |p: Option<Landmark>| p.filter(|lm| lm.is_visible(thresholds.visibility));
        let nose = visible(points.nose)?;
        let left_shoulder = visible(points.left_shoulder)?;
        let right_shoulder = visible(points.right_shoulder)?;

        let mut shoulder_width = distance(&left_shoulder, &right_shoulder);
        if shoulder_width <= f64::EPSILON {
            shoulder_width = thresholds.fallback_shoulder_width;
        }

        let mut scene = Self {
            points,
            nose,
            shoulder_width,
            left_up: false,
            right_up: false,
            thresholds,
        };
        scene.left_up = scene.above_nose(Side::Left);
        scene.right_up = scene.above_nose(Side::Right);
        Some(scene)
    }

    fn visible(&self, point: Option<Landmark>) -> Option<Landmark> {
        point.filter(|lm| lm.is_visible(self.thresholds.visibility))
    }

    fn wrist(&self, side: Side) -> Option<Landmark> {
        self.visible(self.points.wrist(side))
    }

    fn both_wrists(&self) -> Option<(Landmark, Landmark)> {
        Some((self.wrist(Side::Left)?, self.wrist(Side::Right)?))
    }

    fn above_nose(&self, side: Side) -> bool {
        self.wrist(side)
            .is_some_and(|w| w.y < self.nose.y - self.thresholds.raise_offset)
    }

    fn raised(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_up,
            Side::Right => self.right_up,
        }
    }

    fn motion_pose(&self, side: Side) -> bool {
        match self.thresholds.motion_gate {
            MotionGate::Raised => self.raised(side),
            MotionGate::Lifted => {
                match (self.wrist(side), self.visible(self.points.shoulder(side))) {
                    (Some(wrist), Some(shoulder)) => wrist.y < shoulder.y,
                    _ => false,
                }
            }
        }
    }

    fn normalized(&self, a: &Landmark, b: &Landmark) -> f64 {
        distance(a, b) / self.shoulder_width
    }

    fn confidence(&self) -> f64 {
        let inspected = [
            Some(self.nose),
            self.points.left_shoulder,
            self.points.right_shoulder,
            self.wrist(Side::Left),
            self.wrist(Side::Right),
        ];
        let (sum, count) = inspected
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(sum, count), lm| (sum + lm.visibility, count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

/// One guarded entry of the decision list.
struct Rule {
    name: &'static str,
    evaluate: fn(&Scene<'_>, &mut MotionHistory) -> Option<GestureLabel>,
}

/// Evaluated top to bottom, first match wins. Static and cheaper checks come
/// before the history-dependent ones, and raises come before pointing so an
/// extended raised arm cannot match twice.
const DECISION_LIST: &[Rule] = &[
    Rule {
        name: "both_hands_up",
        evaluate: both_hands_up,
    },
    Rule {
        name: "single_hand_raise",
        evaluate: single_hand_raise,
    },
    Rule {
        name: "clap",
        evaluate: clap,
    },
    Rule {
        name: "point",
        evaluate: point,
    },
    Rule {
        name: "hands_close",
        evaluate: hands_close,
    },
    Rule {
        name: "wave",
        evaluate: wave,
    },
    Rule {
        name: "circle_right",
        evaluate: circle_right,
    },
];

/// Rule-based classifier for one recognition session. Not meant to be shared
/// between sessions: the motion history belongs to a single user.
pub struct GestureClassifier {
    thresholds: Thresholds,
    history: MotionHistory,
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::from_config(&RecognitionConfig::default())
    }
}

impl GestureClassifier {
    pub fn new(history_size: usize, thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            history: MotionHistory::new(history_size),
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.history_size, config.thresholds.clone())
    }

    /// Rule names in evaluation order.
    pub fn rule_names() -> impl Iterator<Item = &'static str> {
        std::iter::once(VISIBILITY_GATE).chain(DECISION_LIST.iter().map(|rule| rule.name))
    }

    pub fn classify(&mut self, frame: &LandmarkFrame) -> Gesture {
        if frame.is_empty() {
            return Gesture::none();
        }

        let points = key_points(frame, self.thresholds.visibility);
        let Some(scene) = Scene::build(points, &self.thresholds) else {
            return Gesture::none();
        };

        for rule in DECISION_LIST {
            if let Some(label) = (rule.evaluate)(&scene, &mut self.history) {
                log::trace!("rule {} matched {}", rule.name, label);
                return Gesture::new(label, scene.confidence());
            }
        }

        Gesture::none()
    }

    /// Classifies frames in order without resetting history between them and
    /// returns the recognised labels with their frame index.
    pub fn classify_sequence(&mut self, frames: &[LandmarkFrame]) -> Vec<(GestureLabel, usize)> {
        frames
            .iter()
            .enumerate()
            .filter_map(|(idx, frame)| {
                let gesture = self.classify(frame);
                (!gesture.label.is_none()).then_some((gesture.label, idx))
            })
            .collect()
    }

    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &MotionHistory {
        &self.history
    }
}

fn both_hands_up(scene: &Scene<'_>, _: &mut MotionHistory) -> Option<GestureLabel> {
    (scene.left_up && scene.right_up).then_some(GestureLabel::BothHandsUp)
}

fn single_hand_raise(scene: &Scene<'_>, _: &mut MotionHistory) -> Option<GestureLabel> {
    if scene.right_up {
        Some(GestureLabel::RaiseRightHand)
    } else if scene.left_up {
        Some(GestureLabel::RaiseLeftHand)
    } else {
        None
    }
}

fn clap(scene: &Scene<'_>, _: &mut MotionHistory) -> Option<GestureLabel> {
    let (left, right) = scene.both_wrists()?;
    let t = scene.thresholds;
    let close = scene.normalized(&left, &right) < t.clap_distance;
    let level = (left.z - right.z).abs() < t.clap_z_diff;
    (close && level).then_some(GestureLabel::Clap)
}

fn point(scene: &Scene<'_>, _: &mut MotionHistory) -> Option<GestureLabel> {
    if is_pointing(scene, Side::Left) {
        Some(GestureLabel::PointLeft)
    } else if is_pointing(scene, Side::Right) {
        Some(GestureLabel::PointRight)
    } else {
        None
    }
}

fn is_pointing(scene: &Scene<'_>, side: Side) -> bool {
    let t = scene.thresholds;
    let Some(wrist) = scene.wrist(side) else {
        return false;
    };
    let Some(shoulder) = scene.visible(scene.points.shoulder(side)) else {
        return false;
    };

    let extension = horizontal_extension(side, &wrist, &shoulder);
    if extension <= t.point_extension_min || scene.raised(side) {
        return false;
    }

    match scene.visible(scene.points.elbow(side)) {
        Some(elbow) => {
            let straight_arm =
                distance(&wrist, &shoulder) > distance(&elbow, &shoulder) * t.elbow_extension_ratio;
            straight_arm || extension > t.point_extension
        }
        None => extension > t.point_extension,
    }
}

fn hands_close(scene: &Scene<'_>, _: &mut MotionHistory) -> Option<GestureLabel> {
    let (left, right) = scene.both_wrists()?;
    let t = scene.thresholds;
    let gap = scene.normalized(&left, &right);
    let close = t.clap_distance < gap && gap < t.hands_close_distance;
    let same_depth = (left.z - right.z).abs() < t.hands_close_z_diff;
    let same_height = (left.y - right.y).abs() < t.hands_close_y_diff;
    let lowered = !scene.left_up && !scene.right_up;
    (close && same_depth && same_height && lowered).then_some(GestureLabel::HandsClose)
}

fn wave(scene: &Scene<'_>, history: &mut MotionHistory) -> Option<GestureLabel> {
    let t = scene.thresholds;
    for (side, label) in [
        (Side::Right, GestureLabel::WaveRight),
        (Side::Left, GestureLabel::WaveLeft),
    ] {
        let Some(wrist) = scene.wrist(side) else {
            continue;
        };
        history.push(side, wrist.x);
        if history.is_full(side)
            && scene.motion_pose(side)
            && std_dev(history.samples(side).iter().copied()) > t.wave_movement
        {
            return Some(label);
        }
    }
    None
}

/// Horizontal spread of the latest right-wrist samples. Only a proxy for a
/// circular path: neither closure nor rotation direction is checked.
fn circle_right(scene: &Scene<'_>, history: &mut MotionHistory) -> Option<GestureLabel> {
    let t = scene.thresholds;
    scene.wrist(Side::Right)?;
    let samples = history.samples(Side::Right);
    if samples.len() < t.circle_window || !scene.motion_pose(Side::Right) {
        return None;
    }
    let recent = samples.iter().skip(samples.len() - t.circle_window).copied();
    (std_dev(recent) > t.circle_movement).then_some(GestureLabel::CircleRight)
}

/// How far the wrist reaches outward past its shoulder along x.
fn horizontal_extension(side: Side, wrist: &Landmark, shoulder: &Landmark) -> f64 {
    match side {
        Side::Left => shoulder.x - wrist.x,
        Side::Right => wrist.x - shoulder.x,
    }
}

/// Population standard deviation.
fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (sum, count) = values
        .clone()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    variance.sqrt()
}
