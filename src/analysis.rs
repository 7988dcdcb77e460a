//! Offline analysis over recorded frame sequences.

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::Settings,
    gesture::GestureClassifier,
    preprocess::{FeatureVector, LandmarkPreprocessor},
    session::RecognitionSession,
    types::{FramePayload, GestureLabel, LandmarkFrame},
};

const EXCELLENT_DEVIATION: f64 = 0.15;
const GOOD_DEVIATION: f64 = 0.25;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognizedGesture {
    pub gesture: GestureLabel,
    pub frame_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchSummary {
    pub recognized_gestures: Vec<RecognizedGesture>,
    pub total_frames: usize,
    pub gestures_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub avg_deviation: f64,
    pub max_deviation: f64,
    pub min_deviation: f64,
    pub progress_note: String,
    pub details: Vec<f64>,
    pub recognized_gestures: Vec<RecognizedGesture>,
    pub recommendations: Vec<String>,
}

/// Smooths and classifies the frames in order with one fresh session and
/// keeps everything that is not `none`.
pub fn recognize_batch(frames: &[FramePayload], settings: &Settings) -> BatchSummary {
    let mut session = RecognitionSession::new(settings);
    let recognized_gestures: Vec<_> = frames
        .iter()
        .enumerate()
        .filter_map(|(frame_index, payload)| {
            let gesture = session.observe(&payload.landmarks);
            (!gesture.label.is_none()).then_some(RecognizedGesture {
                gesture: gesture.label,
                frame_index,
                timestamp: payload.timestamp,
            })
        })
        .collect();

    BatchSummary {
        gestures_count: recognized_gestures.len(),
        recognized_gestures,
        total_frames: frames.len(),
    }
}

/// Scores how consistently a movement was performed, either against a
/// reference recording or against the sequence's own average pose.
/// `None` when no frame yields a feature vector.
pub fn analyze_sequence(
    sequence: &[LandmarkFrame],
    reference: Option<&[LandmarkFrame]>,
    settings: &Settings,
) -> Option<AnalysisReport> {
    let preprocessor = LandmarkPreprocessor::from_config(&settings.preprocess);
    let features = sequence_features(&preprocessor, sequence);
    if features.is_empty() {
        return None;
    }

    let baseline = match reference.map(|frames| sequence_features(&preprocessor, frames)) {
        Some(reference_features) if !reference_features.is_empty() => {
            mean_vector(&reference_features)
        }
        _ if features.len() > 1 => mean_vector(&features),
        _ => None,
    };

    let deviations: Vec<f64> = baseline
        .map(|baseline| {
            features
                .iter()
                .filter(|f| f.len() == baseline.len())
                .map(|f| mean_abs_diff(f, &baseline))
                .collect()
        })
        .unwrap_or_default();

    let avg = if deviations.is_empty() {
        0.0
    } else {
        deviations.iter().sum::<f64>() / deviations.len() as f64
    };
    let max = deviations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let min = deviations.iter().copied().reduce(f64::min).unwrap_or(0.0);

    let (progress_note, recommendations) = assess(avg);
    let recognized_gestures = GestureClassifier::from_config(&settings.recognition)
        .classify_sequence(sequence)
        .into_iter()
        .map(|(gesture, frame_index)| RecognizedGesture {
            gesture,
            frame_index,
            timestamp: None,
        })
        .collect();

    Some(AnalysisReport {
        avg_deviation: round4(avg),
        max_deviation: round4(max),
        min_deviation: round4(min),
        progress_note: progress_note.to_string(),
        details: deviations.into_iter().map(round4).collect(),
        recognized_gestures,
        recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
    })
}

/// Feature extraction is stateless, so frames are processed in parallel.
fn sequence_features(
    preprocessor: &LandmarkPreprocessor,
    frames: &[LandmarkFrame],
) -> Vec<FeatureVector> {
    frames
        .par_iter()
        .filter(|frame| !preprocessor.filter(frame, None).is_empty())
        .map(|frame| preprocessor.extract_features(frame))
        .filter(|features| !features.is_empty())
        .collect()
}

fn mean_vector(vectors: &[FeatureVector]) -> Option<FeatureVector> {
    let len = vectors.first()?.len();
    let same_len: Vec<_> = vectors.iter().filter(|v| v.len() == len).collect();
    let count = same_len.len() as f64;
    let mut mean = vec![0.0; len];
    for vector in same_len {
        for (acc, value) in mean.iter_mut().zip(vector) {
            *acc += value;
        }
    }
    mean.iter_mut().for_each(|v| *v /= count);
    Some(mean)
}

fn mean_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64
}

fn assess(avg_deviation: f64) -> (&'static str, &'static [&'static str]) {
    if avg_deviation < EXCELLENT_DEVIATION {
        ("Excellent technique", &["Keep it up"])
    } else if avg_deviation < GOOD_DEVIATION {
        (
            "Good technique with minor deviations",
            &[
                "Pay attention to the symmetry of your movements",
                "Try to keep the motion smooth",
            ],
        )
    } else {
        (
            "Technique needs improvement",
            &[
                "Try performing the movement more slowly",
                "Focus on correct form",
                "Repeat the exercise several times",
            ],
        )
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;
    use approx::assert_relative_eq;

    fn pose(left_wrist_x: f64) -> LandmarkFrame {
        LandmarkFrame::new()
            .with("pose_0", Landmark::new(0.5, 0.3, 0.0, 0.9))
            .with("pose_11", Landmark::new(0.6, 0.5, 0.0, 0.9))
            .with("pose_12", Landmark::new(0.4, 0.5, 0.0, 0.9))
            .with("pose_15", Landmark::new(left_wrist_x, 0.7, 0.0, 0.9))
    }

    #[test]
    fn batch_skips_none_and_counts_frames() {
        let raised = pose(0.6).with("pose_16", Landmark::new(0.4, 0.05, 0.0, 0.9));
        let frames = vec![
            FramePayload {
                landmarks: LandmarkFrame::new(),
                timestamp: Some(0.0),
            },
            FramePayload {
                landmarks: raised,
                timestamp: Some(0.1),
            },
        ];

        let summary = recognize_batch(&frames, &Settings::default());
        assert_eq!(summary.total_frames, 2);
        assert_eq!(summary.gestures_count, 1);
        assert_eq!(summary.recognized_gestures[0].frame_index, 1);
        assert_eq!(summary.recognized_gestures[0].timestamp, Some(0.1));
    }

    #[test]
    fn identical_frames_have_no_deviation() {
        let sequence = vec![pose(0.65); 4];
        let report = analyze_sequence(&sequence, None, &Settings::default()).unwrap();
        assert_eq!(report.details, vec![0.0; 4]);
        assert_eq!(report.avg_deviation, 0.0);
        assert_eq!(report.progress_note, "Excellent technique");
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn single_frame_without_reference_has_no_details() {
        let report = analyze_sequence(&[pose(0.65)], None, &Settings::default()).unwrap();
        assert!(report.details.is_empty());
        assert_eq!(report.max_deviation, 0.0);
    }

    #[test]
    fn deviation_is_measured_against_reference_mean() {
        let reference = vec![pose(0.6), pose(0.6)];
        let sequence = vec![pose(0.6), pose(1.6)];
        let report = analyze_sequence(&sequence, Some(&reference), &Settings::default()).unwrap();

        assert_eq!(report.details.len(), 2);
        assert_eq!(report.details[0], 0.0);
        assert!(report.details[1] > GOOD_DEVIATION);
        assert_relative_eq!(report.min_deviation, 0.0);
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn sequence_without_features_yields_nothing() {
        let frames = vec![LandmarkFrame::new().with("pose_0", Landmark::new(0.5, 0.3, 0.0, 0.9))];
        assert!(analyze_sequence(&frames, None, &Settings::default()).is_none());
    }

    #[test]
    fn rounding_keeps_four_decimals() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(assess(0.2).1.len(), 2);
    }
}
