//! Runs mapped actions on a worker thread so slow callbacks never hold up
//! frame classification.

use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::{
    error::Result,
    interpret::{ActionContext, ActionInterpreter, ActionResult},
    types::GestureLabel,
};

#[derive(Clone, Debug)]
pub struct DispatchJob {
    pub frame_index: u64,
    pub gesture: GestureLabel,
    pub context: ActionContext,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub frame_index: u64,
    pub gesture: GestureLabel,
    pub result: ActionResult,
}

#[derive(Debug)]
pub struct ActionDispatcher {
    job_tx: Option<Sender<DispatchJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ActionDispatcher {
    /// Starts the worker. Outcomes are delivered on the returned receiver;
    /// if nobody keeps up with it they are dropped rather than queued.
    pub fn spawn(
        interpreter: ActionInterpreter,
        queue: usize,
    ) -> Result<(Self, Receiver<DispatchOutcome>)> {
        let (job_tx, job_rx) = crossbeam_channel::bounded(queue.max(1));
        let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(queue.max(1));

        let handle = thread::Builder::new()
            .name("action-dispatch".to_string())
            .spawn(move || run_dispatch_loop(interpreter, job_rx, outcome_tx))?;

        Ok((
            Self {
                job_tx: Some(job_tx),
                handle: Some(handle),
            },
            outcome_rx,
        ))
    }

    /// Never blocks. Returns false when the job was dropped.
    pub fn submit(&self, job: DispatchJob) -> bool {
        let Some(tx) = &self.job_tx else {
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::warn!(
                    "dispatch queue full, dropping {} from frame {}",
                    job.gesture,
                    job.frame_index
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("action dispatcher is no longer running");
                false
            }
        }
    }

    /// Lets queued jobs finish, then joins the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.job_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_dispatch_loop(
    interpreter: ActionInterpreter,
    job_rx: Receiver<DispatchJob>,
    outcome_tx: Sender<DispatchOutcome>,
) {
    while let Ok(job) = job_rx.recv() {
        let result = interpreter.execute(job.gesture, &job.context);
        let outcome = DispatchOutcome {
            frame_index: job.frame_index,
            gesture: job.gesture,
            result,
        };
        if outcome_tx.try_send(outcome).is_err() {
            log::debug!("dispatch outcome for frame {} not observed", job.frame_index);
        }
    }
    log::debug!("action dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        time::Duration,
    };

    use serde_json::Value;

    use super::*;
    use crate::{
        interpret::CallbackTransport,
        mapping::{ActionSpec, Mapping, MappingStore, MemoryMappings},
    };

    struct GatedTransport {
        gate: Arc<Barrier>,
    }

    impl CallbackTransport for GatedTransport {
        fn post_json(&self, _: &str, _: &Value) -> Result<u16> {
            self.gate.wait();
            Ok(200)
        }
    }

    fn interpreter(transport: Arc<dyn CallbackTransport>) -> ActionInterpreter {
        let mapping = Mapping::from([
            (
                GestureLabel::WaveRight,
                ActionSpec::callback("http://hooks.local/wave", "wave"),
            ),
            (GestureLabel::Clap, ActionSpec::log("clap", "media")),
        ]);
        let store = MappingStore::open(MemoryMappings::with(mapping));
        ActionInterpreter::new(store.into_shared(), transport)
    }

    fn job(frame_index: u64, gesture: GestureLabel) -> DispatchJob {
        DispatchJob {
            frame_index,
            gesture,
            context: ActionContext::default(),
        }
    }

    #[test]
    fn outcomes_arrive_in_submission_order() {
        let gate = Arc::new(Barrier::new(1));
        let (dispatcher, outcomes) =
            ActionDispatcher::spawn(interpreter(Arc::new(GatedTransport { gate })), 4).unwrap();

        assert!(dispatcher.submit(job(1, GestureLabel::Clap)));
        assert!(dispatcher.submit(job(2, GestureLabel::WaveRight)));
        dispatcher.shutdown();

        let received: Vec<_> = outcomes.iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].frame_index, 1);
        assert_eq!(received[0].result.status(), "logged");
        assert_eq!(received[1].result.status(), "callback_sent");
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Barrier::new(2));
        let (dispatcher, outcomes) = ActionDispatcher::spawn(
            interpreter(Arc::new(GatedTransport { gate: gate.clone() })),
            1,
        )
        .unwrap();

        // The worker takes the first job and parks on the gate.
        assert!(dispatcher.submit(job(1, GestureLabel::WaveRight)));
        let mut accepted = 1;
        for i in 2..10 {
            if dispatcher.submit(job(i, GestureLabel::Clap)) {
                accepted += 1;
            }
        }
        assert!(accepted < 9);

        gate.wait();
        let first = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.frame_index, 1);
        dispatcher.shutdown();
    }
}
