//! Gesture → action mappings and their persistence seam.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::GestureLabel,
};

pub type Mapping = BTreeMap<GestureLabel, ActionSpec>;

/// Store shared by every session; read-mostly, last writer wins.
pub type SharedMappings = Arc<RwLock<MappingStore>>;

/// What to do when a gesture is recognised. Each kind carries only the
/// fields it needs; unknown kinds are kept so they survive a save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawActionSpec", into = "RawActionSpec")]
pub enum ActionSpec {
    Log {
        message: Option<String>,
        description: Option<String>,
    },
    Callback {
        url: String,
        description: Option<String>,
    },
    Keyboard {
        key: String,
        description: Option<String>,
    },
    Mouse {
        action: String,
        description: Option<String>,
    },
    /// A kind this build cannot execute. Its fields are kept as loaded.
    Other { kind: String, params: ActionParams },
}

/// Loose parameters as they arrive from a form or command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionParams {
    pub message: Option<String>,
    pub url: Option<String>,
    pub key: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

impl ActionSpec {
    pub fn from_parts(kind: &str, params: ActionParams) -> Self {
        match kind {
            "log" => ActionSpec::Log {
                message: params.message,
                description: params.description,
            },
            "callback" => ActionSpec::Callback {
                url: params.url.unwrap_or_default(),
                description: params.description,
            },
            "keyboard" => ActionSpec::Keyboard {
                key: params.key.unwrap_or_default(),
                description: params.description,
            },
            "mouse" => ActionSpec::Mouse {
                action: params.action.unwrap_or_default(),
                description: params.description,
            },
            other => ActionSpec::Other {
                kind: other.to_string(),
                params,
            },
        }
    }

    pub fn log(message: impl Into<String>, description: impl Into<String>) -> Self {
        ActionSpec::Log {
            message: Some(message.into()),
            description: Some(description.into()),
        }
    }

    pub fn callback(url: impl Into<String>, description: impl Into<String>) -> Self {
        ActionSpec::Callback {
            url: url.into(),
            description: Some(description.into()),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ActionSpec::Log { .. } => "log",
            ActionSpec::Callback { .. } => "callback",
            ActionSpec::Keyboard { .. } => "keyboard",
            ActionSpec::Mouse { .. } => "mouse",
            ActionSpec::Other { kind, .. } => kind.as_str(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            ActionSpec::Log { description, .. }
            | ActionSpec::Callback { description, .. }
            | ActionSpec::Keyboard { description, .. }
            | ActionSpec::Mouse { description, .. } => description.as_deref(),
            ActionSpec::Other { params, .. } => params.description.as_deref(),
        }
    }
}

/// On-disk shape: `{type, message?, url?, key?, action?, description?}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RawActionSpec {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn default_kind() -> String {
    "log".to_string()
}

impl From<RawActionSpec> for ActionSpec {
    fn from(raw: RawActionSpec) -> Self {
        ActionSpec::from_parts(
            &raw.kind,
            ActionParams {
                message: raw.message,
                url: raw.url,
                key: raw.key,
                action: raw.action,
                description: raw.description,
            },
        )
    }
}

impl From<ActionSpec> for RawActionSpec {
    fn from(spec: ActionSpec) -> Self {
        let kind = spec.kind().to_string();
        let mut raw = RawActionSpec {
            kind,
            ..Default::default()
        };
        match spec {
            ActionSpec::Log {
                message,
                description,
            } => {
                raw.message = message;
                raw.description = description;
            }
            ActionSpec::Callback { url, description } => {
                raw.url = Some(url);
                raw.description = description;
            }
            ActionSpec::Keyboard { key, description } => {
                raw.key = Some(key);
                raw.description = description;
            }
            ActionSpec::Mouse {
                action,
                description,
            } => {
                raw.action = Some(action);
                raw.description = description;
            }
            ActionSpec::Other { params, .. } => {
                raw.message = params.message;
                raw.url = params.url;
                raw.key = params.key;
                raw.action = params.action;
                raw.description = params.description;
            }
        }
        raw
    }
}

/// Loads and saves the mapping resource on behalf of the store.
pub trait MappingPersistence: Send + Sync {
    /// `Ok(None)` when the resource does not exist yet.
    fn load(&self) -> Result<Option<Mapping>>;
    fn save(&self, mapping: &Mapping) -> Result<()>;
}

/// YAML mapping file, keyed by gesture label.
#[derive(Clone, Debug)]
pub struct YamlMappingFile {
    path: PathBuf,
}

impl YamlMappingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl YamlMappingFile {
    fn read_document(&self) -> Result<Option<BTreeMap<String, serde_yaml_ng::Value>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Some(BTreeMap::new()));
        }
        Ok(Some(serde_yaml_ng::from_str(&content)?))
    }
}

impl MappingPersistence for YamlMappingFile {
    /// Keys that are not gesture labels are skipped with a warning. A bad
    /// entry under a known label fails the whole load.
    fn load(&self) -> Result<Option<Mapping>> {
        let Some(document) = self.read_document()? else {
            return Ok(None);
        };
        let mut mapping = Mapping::new();
        for (key, value) in document {
            match key.parse::<GestureLabel>() {
                Ok(label) => {
                    mapping.insert(label, serde_yaml_ng::from_value(value)?);
                }
                Err(err) => log::warn!("{}: skipping entry: {err}", self.path.display()),
            }
        }
        Ok(Some(mapping))
    }

    /// Entries under unknown keys are written back untouched.
    fn save(&self, mapping: &Mapping) -> Result<()> {
        let mut document: BTreeMap<String, serde_yaml_ng::Value> = match self.read_document() {
            Ok(existing) => existing
                .unwrap_or_default()
                .into_iter()
                .filter(|(key, _)| key.parse::<GestureLabel>().is_err())
                .collect(),
            Err(_) => BTreeMap::new(),
        };
        for (label, spec) in mapping {
            document.insert(label.to_string(), serde_yaml_ng::to_value(spec)?);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_yaml_ng::to_string(&document)?)?;
        Ok(())
    }
}

/// Process-local resource. Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryMappings {
    slot: Arc<Mutex<Option<Mapping>>>,
}

impl MemoryMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mapping: Mapping) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(mapping))),
        }
    }

    pub fn snapshot(&self) -> Option<Mapping> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MappingPersistence for MemoryMappings {
    fn load(&self) -> Result<Option<Mapping>> {
        Ok(self.snapshot())
    }

    fn save(&self, mapping: &Mapping) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(mapping.clone());
        Ok(())
    }
}

pub struct MappingStore {
    mappings: Mapping,
    persistence: Box<dyn MappingPersistence>,
    /// Set while defaults stand in for a resource that failed to load.
    fallback: bool,
}

impl MappingStore {
    /// Never fails: an absent resource is seeded with the defaults, an
    /// unreadable one is left alone and the defaults are served from memory.
    /// Edits made while serving those defaults stay in memory only.
    pub fn open(persistence: impl MappingPersistence + 'static) -> Self {
        let mut store = Self {
            mappings: Mapping::new(),
            persistence: Box::new(persistence),
            fallback: false,
        };
        store.reload();
        store
    }

    pub fn reload(&mut self) {
        match self.persistence.load() {
            Ok(Some(mappings)) => {
                log::info!("loaded {} gesture mappings", mappings.len());
                self.mappings = mappings;
                self.fallback = false;
            }
            Ok(None) => {
                self.mappings = default_mappings();
                self.fallback = false;
                match self.persistence.save(&self.mappings) {
                    Ok(()) => log::info!("seeded mapping resource with defaults"),
                    Err(err) => log::error!("failed to persist default mappings: {err}"),
                }
            }
            Err(err) => {
                log::error!("failed to load gesture mappings, using defaults: {err}");
                self.mappings = default_mappings();
                self.fallback = true;
            }
        }
    }

    pub fn into_shared(self) -> SharedMappings {
        Arc::new(RwLock::new(self))
    }

    pub fn get(&self, label: GestureLabel) -> Option<&ActionSpec> {
        self.mappings.get(&label)
    }

    pub fn get_all(&self) -> Mapping {
        self.mappings.clone()
    }

    /// Replaces any existing entry. The in-memory update stands even when
    /// persisting it fails.
    pub fn add(&mut self, label: GestureLabel, spec: ActionSpec) -> Result<()> {
        log::info!(
            "mapping {label} -> {} ({})",
            spec.kind(),
            spec.description().unwrap_or("no description")
        );
        self.mappings.insert(label, spec);
        self.persist()
    }

    /// Returns whether the label had a mapping.
    pub fn remove(&mut self, label: GestureLabel) -> Result<bool> {
        if self.mappings.remove(&label).is_none() {
            return Ok(false);
        }
        log::info!("removed mapping for {label}");
        self.persist()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    fn persist(&self) -> Result<()> {
        if self.fallback {
            log::warn!("not saving gesture mappings over a resource that failed to load");
            return Err(Error::Config(
                "mapping resource failed to load; not overwriting it".to_string(),
            ));
        }
        self.persistence.save(&self.mappings).inspect_err(|err| {
            log::error!("failed to save gesture mappings: {err}");
        })
    }
}

pub fn default_mappings() -> Mapping {
    use GestureLabel::*;

    Mapping::from([
        (
            RaiseRightHand,
            ActionSpec::log("Right hand raised - next page", "Navigate forward"),
        ),
        (
            RaiseLeftHand,
            ActionSpec::log("Left hand raised - previous page", "Navigate back"),
        ),
        (
            BothHandsUp,
            ActionSpec::callback(
                "http://example.com/webhook/both_hands_up",
                "Both hands up - special action",
            ),
        ),
        (
            Clap,
            ActionSpec::log("Clap - play/pause", "Media control"),
        ),
        (
            PointLeft,
            ActionSpec::log("Pointing left - move left", "Navigation"),
        ),
        (
            PointRight,
            ActionSpec::log("Pointing right - move right", "Navigation"),
        ),
        (
            HandsClose,
            ActionSpec::log("Hands close - select/confirm", "Select item"),
        ),
        (
            WaveRight,
            ActionSpec::callback("http://example.com/webhook/wave", "Right hand wave"),
        ),
        (
            WaveLeft,
            ActionSpec::log("Left hand wave", "Greeting"),
        ),
        (
            CircleRight,
            ActionSpec::log("Right hand circle", "Special action"),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct BrokenResource;

    impl MappingPersistence for BrokenResource {
        fn load(&self) -> Result<Option<Mapping>> {
            Err(Error::Config("resource unavailable".to_string()))
        }

        fn save(&self, _: &Mapping) -> Result<()> {
            Err(Error::Config("resource unavailable".to_string()))
        }
    }

    #[test]
    fn absent_resource_is_seeded_with_defaults() {
        let resource = MemoryMappings::new();
        let store = MappingStore::open(resource.clone());

        assert_eq!(store.len(), 10);
        assert_eq!(resource.snapshot(), Some(default_mappings()));
    }

    #[test]
    fn load_failure_serves_defaults() {
        let mut store = MappingStore::open(BrokenResource);
        assert_eq!(store.get_all(), default_mappings());

        // Memory still takes the write even though saving fails.
        let spec = ActionSpec::log("hi", "greeting");
        assert!(store.add(GestureLabel::Clap, spec.clone()).is_err());
        assert_eq!(store.get(GestureLabel::Clap), Some(&spec));
    }

    #[test]
    fn add_then_get_and_remove() {
        let mut store = MappingStore::open(MemoryMappings::with(Mapping::new()));
        assert!(store.is_empty());

        let spec = ActionSpec::from_parts(
            "keyboard",
            ActionParams {
                key: Some("space".to_string()),
                ..Default::default()
            },
        );
        store.add(GestureLabel::Clap, spec.clone()).unwrap();
        assert_eq!(store.get(GestureLabel::Clap), Some(&spec));

        let replacement = ActionSpec::log("clap", "media");
        store.add(GestureLabel::Clap, replacement.clone()).unwrap();
        assert_eq!(store.get(GestureLabel::Clap), Some(&replacement));

        assert!(store.remove(GestureLabel::Clap).unwrap());
        assert!(store.get(GestureLabel::Clap).is_none());
        assert!(!store.remove(GestureLabel::Clap).unwrap());
    }

    #[test]
    fn get_all_is_a_copy() {
        let store = MappingStore::open(MemoryMappings::new());
        let mut copy = store.get_all();
        copy.clear();
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn yaml_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("configs").join("mappings.yaml");

        let mut store = MappingStore::open(YamlMappingFile::new(&path));
        assert!(path.exists());
        store
            .add(
                GestureLabel::HandsClose,
                ActionSpec::from_parts("macro", ActionParams::default()),
            )
            .unwrap();
        store
            .add(
                GestureLabel::WaveLeft,
                ActionSpec::from_parts(
                    "mouse",
                    ActionParams {
                        action: Some("click".to_string()),
                        description: Some("left click".to_string()),
                        ..Default::default()
                    },
                ),
            )
            .unwrap();

        let reloaded = MappingStore::open(YamlMappingFile::new(&path));
        assert_eq!(reloaded.get_all(), store.get_all());
        assert_eq!(
            reloaded.get(GestureLabel::HandsClose).map(ActionSpec::kind),
            Some("macro")
        );
    }

    #[test]
    fn yaml_schema_matches_resource_format() {
        let yaml = r#"
clap:
  type: callback
  url: http://localhost:9000/clap
point_left:
  message: going left
"#;
        let mapping: Mapping = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(
            mapping[&GestureLabel::Clap],
            ActionSpec::Callback {
                url: "http://localhost:9000/clap".to_string(),
                description: None,
            }
        );
        assert_eq!(mapping[&GestureLabel::PointLeft].kind(), "log");
    }

    #[test]
    fn unknown_keys_are_skipped_and_kept_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.yaml");
        fs::write(
            &path,
            "clap:\n  type: callback\n  url: http://my.host/clap\nswipe_up:\n  type: log\n",
        )
        .unwrap();

        let mut store = MappingStore::open(YamlMappingFile::new(&path));
        assert!(!store.is_fallback());
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(GestureLabel::Clap),
            Some(&ActionSpec::Callback {
                url: "http://my.host/clap".to_string(),
                description: None,
            })
        );

        store
            .add(GestureLabel::WaveLeft, ActionSpec::log("bye", "greeting"))
            .unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("http://my.host/clap"));
        assert!(written.contains("swipe_up"));

        let reloaded = MappingStore::open(YamlMappingFile::new(&path));
        assert_eq!(reloaded.get_all(), store.get_all());
    }

    #[test]
    fn edits_on_fallback_defaults_stay_in_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.yaml");
        fs::write(&path, "clap: 42\n").unwrap();

        let mut store = MappingStore::open(YamlMappingFile::new(&path));
        assert!(store.is_fallback());
        let spec = ActionSpec::log("bye", "greeting");
        assert!(store.add(GestureLabel::WaveLeft, spec.clone()).is_err());
        assert!(store.remove(GestureLabel::Clap).is_err());
        assert_eq!(store.get(GestureLabel::WaveLeft), Some(&spec));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "clap: 42\n"
        );
    }

    #[test]
    fn unknown_kind_keeps_all_fields_through_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.yaml");
        let spec = ActionSpec::from_parts(
            "macro",
            ActionParams {
                message: Some("run".to_string()),
                url: Some("http://my.host/macro".to_string()),
                key: Some("ctrl+k".to_string()),
                action: Some("double_click".to_string()),
                description: Some("custom".to_string()),
            },
        );

        let mut store = MappingStore::open(YamlMappingFile::new(&path));
        store.add(GestureLabel::CircleRight, spec.clone()).unwrap();

        let reloaded = MappingStore::open(YamlMappingFile::new(&path));
        assert_eq!(reloaded.get(GestureLabel::CircleRight), Some(&spec));
        assert_eq!(spec.description(), Some("custom"));
    }

    #[test]
    fn unreadable_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.yaml");
        fs::write(&path, "clap: [not, a, mapping").unwrap();

        let store = MappingStore::open(YamlMappingFile::new(&path));
        assert_eq!(store.get_all(), default_mappings());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "clap: [not, a, mapping"
        );
    }
}
