//! Turns recognised gestures into actions via the shared mapping store.

use std::{sync::Arc, sync::PoisonError, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::Result,
    mapping::{ActionSpec, SharedMappings},
    types::{GestureLabel, LandmarkFrame},
};

/// Extra data forwarded to callback actions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionContext {
    pub timestamp: Option<f64>,
    pub landmarks: Option<LandmarkFrame>,
    pub extra: Map<String, Value>,
}

impl ActionContext {
    pub fn at(timestamp: Option<f64>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    fn callback_payload(&self, gesture: GestureLabel) -> Value {
        let mut payload = Map::new();
        payload.insert("gesture".to_string(), Value::from(gesture.as_str()));
        payload.insert(
            "timestamp".to_string(),
            self.timestamp.map_or(Value::Null, Value::from),
        );
        if let Some(landmarks) = &self.landmarks {
            payload.insert(
                "landmarks".to_string(),
                serde_json::to_value(landmarks).unwrap_or(Value::Null),
            );
        }
        for (key, value) in &self.extra {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(payload)
    }
}

/// Outcome of executing (or declining to execute) a mapped action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    NoAction {
        message: String,
    },
    NoMapping {
        message: String,
    },
    Logged {
        message: String,
        gesture: GestureLabel,
    },
    CallbackSent {
        code: u16,
        gesture: GestureLabel,
    },
    CallbackError {
        error: String,
        gesture: GestureLabel,
    },
    NotImplemented {
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        gesture: GestureLabel,
    },
    UnknownType {
        kind: String,
        gesture: GestureLabel,
    },
    Error {
        error: String,
        gesture: GestureLabel,
    },
}

impl ActionResult {
    pub fn status(&self) -> &'static str {
        match self {
            ActionResult::NoAction { .. } => "no_action",
            ActionResult::NoMapping { .. } => "no_mapping",
            ActionResult::Logged { .. } => "logged",
            ActionResult::CallbackSent { .. } => "callback_sent",
            ActionResult::CallbackError { .. } => "callback_error",
            ActionResult::NotImplemented { .. } => "not_implemented",
            ActionResult::UnknownType { .. } => "unknown_type",
            ActionResult::Error { .. } => "error",
        }
    }
}

/// Outbound side of callback actions.
pub trait CallbackTransport: Send + Sync {
    /// POSTs `payload` as JSON and returns the response status code.
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Upper bound on a whole callback request, connect included.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl CallbackTransport for HttpTransport {
    fn post_json(&self, url: &str, payload: &Value) -> Result<u16> {
        let response = self.client.post(url).json(payload).send()?;
        Ok(response.status().as_u16())
    }
}

#[derive(Clone)]
pub struct ActionInterpreter {
    mappings: SharedMappings,
    transport: Arc<dyn CallbackTransport>,
}

impl ActionInterpreter {
    pub fn new(mappings: SharedMappings, transport: Arc<dyn CallbackTransport>) -> Self {
        Self {
            mappings,
            transport,
        }
    }

    pub fn with_http(mappings: SharedMappings, timeout: Duration) -> Result<Self> {
        let transport = HttpTransport::new(timeout)?;
        log::debug!("callback timeout {:?}", transport.timeout());
        Ok(Self::new(mappings, Arc::new(transport)))
    }

    pub fn mappings(&self) -> &SharedMappings {
        &self.mappings
    }

    /// Every label/mapping combination yields a result; failures are
    /// reported as variants, never returned as errors.
    pub fn execute(&self, gesture: GestureLabel, context: &ActionContext) -> ActionResult {
        if gesture.is_none() {
            return ActionResult::NoAction {
                message: "No gesture recognised".to_string(),
            };
        }

        // Clone out so the store is not locked across a network call.
        let spec = self
            .mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(gesture)
            .cloned();
        let Some(spec) = spec else {
            log::debug!("no mapping for gesture {gesture}");
            return ActionResult::NoMapping {
                message: format!("Gesture '{gesture}' has no assigned action"),
            };
        };

        match spec {
            ActionSpec::Log { message, .. } => {
                let message = message.unwrap_or_else(|| format!("Action for gesture {gesture}"));
                log::info!("gesture action: {message}");
                ActionResult::Logged { message, gesture }
            }
            ActionSpec::Callback { url, .. } => self.callback(gesture, &url, context),
            ActionSpec::Keyboard { key, .. } => {
                log::info!("keyboard action `{key}` for {gesture} is not implemented");
                ActionResult::NotImplemented {
                    kind: "keyboard".to_string(),
                    key: Some(key),
                    action: None,
                    gesture,
                }
            }
            ActionSpec::Mouse { action, .. } => {
                log::info!("mouse action `{action}` for {gesture} is not implemented");
                ActionResult::NotImplemented {
                    kind: "mouse".to_string(),
                    key: None,
                    action: Some(action),
                    gesture,
                }
            }
            ActionSpec::Other { kind, .. } => {
                log::warn!("unknown action type `{kind}` for {gesture}");
                ActionResult::UnknownType { kind, gesture }
            }
        }
    }

    fn callback(&self, gesture: GestureLabel, url: &str, context: &ActionContext) -> ActionResult {
        if url.trim().is_empty() {
            return ActionResult::Error {
                error: "callback mapping has no url".to_string(),
                gesture,
            };
        }

        let payload = context.callback_payload(gesture);
        match self.transport.post_json(url, &payload) {
            Ok(code) => {
                log::debug!("callback for {gesture} answered {code}");
                ActionResult::CallbackSent { code, gesture }
            }
            Err(err) => {
                log::warn!("callback for {gesture} to {url} failed: {err}");
                ActionResult::CallbackError {
                    error: err.to_string(),
                    gesture,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex};

    use super::*;
    use crate::{
        error::Error,
        mapping::{ActionParams, Mapping, MappingStore, MemoryMappings},
    };

    #[derive(Default)]
    struct RecordingTransport {
        fail: bool,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl CallbackTransport for RecordingTransport {
        fn post_json(&self, url: &str, payload: &Value) -> Result<u16> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            if self.fail {
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "operation timed out",
                )))
            } else {
                Ok(202)
            }
        }
    }

    fn interpreter(mapping: Mapping, transport: Arc<RecordingTransport>) -> ActionInterpreter {
        let store = MappingStore::open(MemoryMappings::with(mapping));
        ActionInterpreter::new(store.into_shared(), transport)
    }

    fn single(label: GestureLabel, spec: ActionSpec) -> Mapping {
        Mapping::from([(label, spec)])
    }

    #[test]
    fn none_and_unmapped_labels() {
        let interp = interpreter(Mapping::new(), Arc::default());
        let ctx = ActionContext::default();
        assert_eq!(interp.execute(GestureLabel::None, &ctx).status(), "no_action");
        assert_eq!(interp.execute(GestureLabel::Clap, &ctx).status(), "no_mapping");
    }

    #[test]
    fn log_action_falls_back_to_generic_message() {
        let spec = ActionSpec::Log {
            message: None,
            description: None,
        };
        let interp = interpreter(single(GestureLabel::Clap, spec), Arc::default());
        let result = interp.execute(GestureLabel::Clap, &ActionContext::default());
        assert_eq!(
            result,
            ActionResult::Logged {
                message: "Action for gesture clap".to_string(),
                gesture: GestureLabel::Clap,
            }
        );
    }

    #[test]
    fn callback_carries_gesture_and_context() {
        let transport = Arc::new(RecordingTransport::default());
        let spec = ActionSpec::callback("http://hooks.local/wave", "wave");
        let interp = interpreter(single(GestureLabel::WaveRight, spec), transport.clone());

        let mut ctx = ActionContext::at(Some(12.5));
        ctx.extra.insert("session".to_string(), Value::from("abc"));
        let result = interp.execute(GestureLabel::WaveRight, &ctx);

        assert_eq!(
            result,
            ActionResult::CallbackSent {
                code: 202,
                gesture: GestureLabel::WaveRight,
            }
        );
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://hooks.local/wave");
        assert_eq!(calls[0].1["gesture"], "wave_right");
        assert_eq!(calls[0].1["timestamp"], 12.5);
        assert_eq!(calls[0].1["session"], "abc");
    }

    #[test]
    fn transport_failure_becomes_callback_error() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let spec = ActionSpec::callback("http://hooks.local/up", "up");
        let interp = interpreter(single(GestureLabel::BothHandsUp, spec), transport);

        let result = interp.execute(GestureLabel::BothHandsUp, &ActionContext::default());
        match result {
            ActionResult::CallbackError { error, gesture } => {
                assert_eq!(gesture, GestureLabel::BothHandsUp);
                assert!(error.contains("timed out"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn callback_without_url_is_an_error_result() {
        let transport = Arc::new(RecordingTransport::default());
        let spec = ActionSpec::from_parts("callback", ActionParams::default());
        let interp = interpreter(single(GestureLabel::Clap, spec), transport.clone());

        let result = interp.execute(GestureLabel::Clap, &ActionContext::default());
        assert_eq!(result.status(), "error");
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn input_emulation_is_reported_as_not_implemented() {
        let mapping = Mapping::from([
            (
                GestureLabel::PointLeft,
                ActionSpec::Keyboard {
                    key: "left".to_string(),
                    description: None,
                },
            ),
            (
                GestureLabel::PointRight,
                ActionSpec::Mouse {
                    action: "click".to_string(),
                    description: None,
                },
            ),
        ]);
        let interp = interpreter(mapping, Arc::default());
        let ctx = ActionContext::default();

        let keyboard = interp.execute(GestureLabel::PointLeft, &ctx);
        let json = serde_json::to_value(&keyboard).unwrap();
        assert_eq!(json["status"], "not_implemented");
        assert_eq!(json["kind"], "keyboard");
        assert_eq!(json["key"], "left");
        assert!(json.get("action").is_none());

        let mouse = interp.execute(GestureLabel::PointRight, &ctx);
        assert_eq!(interp.execute(GestureLabel::PointRight, &ctx), mouse);
        assert_eq!(mouse.status(), "not_implemented");
    }

    #[test]
    fn unknown_kind_is_reported() {
        let spec = ActionSpec::from_parts("shell", ActionParams::default());
        let interp = interpreter(single(GestureLabel::HandsClose, spec), Arc::default());
        assert_eq!(
            interp.execute(GestureLabel::HandsClose, &ActionContext::default()),
            ActionResult::UnknownType {
                kind: "shell".to_string(),
                gesture: GestureLabel::HandsClose,
            }
        );
    }

    #[test]
    fn configured_timeout_reaches_the_http_client() {
        let config = crate::config::InterpretConfig::default();
        assert_eq!(config.callback_timeout(), Duration::from_secs(5));
        let transport = HttpTransport::new(config.callback_timeout()).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn silent_callback_server_times_out_as_callback_error() {
        // Connections queue in the backlog and never get an answer.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let store = MappingStore::open(MemoryMappings::with(single(
            GestureLabel::WaveRight,
            ActionSpec::callback(url, "wave"),
        )));
        let interp =
            ActionInterpreter::with_http(store.into_shared(), Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let result = interp.execute(GestureLabel::WaveRight, &ActionContext::default());
        assert_eq!(result.status(), "callback_error");
        assert!(started.elapsed() < Duration::from_secs(3));
        drop(listener);
    }
}
