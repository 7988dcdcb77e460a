//! One recognition session: the stateful preprocess → classify pair for a
//! single client, plus the streaming worker that feeds it.

use std::thread;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::{
    config::Settings,
    dispatch::{ActionDispatcher, DispatchJob},
    error::Result,
    gesture::GestureClassifier,
    interpret::{ActionContext, ActionInterpreter, ActionResult},
    preprocess::LandmarkPreprocessor,
    types::{FramePayload, Gesture, GestureLabel, LandmarkFrame},
};

/// Response for a single classified frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub gesture: GestureLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub action: ActionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Per-frame report of the streaming worker. Actions are reported
/// separately by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub frame_index: u64,
    pub gesture: GestureLabel,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

pub struct RecognitionSession {
    preprocessor: LandmarkPreprocessor,
    classifier: GestureClassifier,
}

impl RecognitionSession {
    pub fn new(settings: &Settings) -> Self {
        Self {
            preprocessor: LandmarkPreprocessor::from_config(&settings.preprocess),
            classifier: GestureClassifier::from_config(&settings.recognition),
        }
    }

    /// Smooths and classifies without dispatching anything.
    pub fn observe(&mut self, frame: &LandmarkFrame) -> Gesture {
        let smoothed = self.preprocessor.smooth(frame);
        self.classifier.classify(&smoothed)
    }

    /// Request/response path: the mapped action runs inline.
    pub fn process(
        &mut self,
        frame: &LandmarkFrame,
        timestamp: Option<f64>,
        interpreter: &ActionInterpreter,
    ) -> RecognitionResult {
        let smoothed = self.preprocessor.smooth(frame);
        let gesture = self.classifier.classify(&smoothed);
        let context = ActionContext {
            timestamp,
            landmarks: Some(smoothed),
            ..Default::default()
        };
        let action = interpreter.execute(gesture.label, &context);
        log::debug!(
            "recognised {} ({:.2}), action {}",
            gesture.label,
            gesture.confidence,
            action.status()
        );

        RecognitionResult {
            gesture: gesture.label,
            confidence: Some(gesture.confidence),
            action,
            timestamp,
        }
    }

    pub fn reset(&mut self) {
        self.preprocessor.reset();
        self.classifier.reset_history();
    }

    pub fn preprocessor(&self) -> &LandmarkPreprocessor {
        &self.preprocessor
    }

    pub fn classifier(&self) -> &GestureClassifier {
        &self.classifier
    }
}

/// Streams frames through a fresh session until `frame_rx` closes. Every
/// frame is processed in order since motion history depends on all of them.
/// Recognised gestures go to the dispatcher, which is shut down on exit.
pub fn spawn_session_worker(
    settings: &Settings,
    frame_rx: Receiver<FramePayload>,
    outcome_tx: Sender<FrameOutcome>,
    dispatcher: ActionDispatcher,
) -> Result<thread::JoinHandle<()>> {
    let session = RecognitionSession::new(settings);
    let handle = thread::Builder::new()
        .name("recognition-session".to_string())
        .spawn(move || run_session_loop(session, frame_rx, outcome_tx, dispatcher))?;
    Ok(handle)
}

fn run_session_loop(
    mut session: RecognitionSession,
    frame_rx: Receiver<FramePayload>,
    outcome_tx: Sender<FrameOutcome>,
    dispatcher: ActionDispatcher,
) {
    log::info!("recognition session started");
    let mut frame_index = 0u64;

    while let Ok(payload) = frame_rx.recv() {
        let smoothed = session.preprocessor.smooth(&payload.landmarks);
        let gesture = session.classifier.classify(&smoothed);

        if !gesture.label.is_none() {
            log::debug!(
                "frame {frame_index}: {}",
                gesture.label.display_name()
            );
            dispatcher.submit(DispatchJob {
                frame_index,
                gesture: gesture.label,
                context: ActionContext {
                    timestamp: payload.timestamp,
                    landmarks: Some(smoothed),
                    ..Default::default()
                },
            });
        }

        let outcome = FrameOutcome {
            frame_index,
            gesture: gesture.label,
            confidence: gesture.confidence,
            timestamp: payload.timestamp,
        };
        if outcome_tx.send(outcome).is_err() {
            log::warn!("frame outcome receiver dropped, ending session");
            break;
        }
        frame_index += 1;
    }

    dispatcher.shutdown();
    log::info!("recognition session ended after {frame_index} frames");
}
