use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::PoisonError,
    thread,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use serde::Serialize;

use gesture_relay::{
    analysis,
    config::Settings,
    dispatch::ActionDispatcher,
    interpret::ActionInterpreter,
    mapping::{ActionParams, ActionSpec, MappingStore, SharedMappings, YamlMappingFile},
    session::{self, RecognitionSession},
    types::{FramePayload, GestureLabel, LandmarkFrame},
};

#[derive(Parser, Debug)]
#[command(name = "gesture-relay", version, about = "Recognise gestures from landmark frames")]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream JSON-lines frames through a live session
    Stream {
        /// Read frames from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Recognise a single frame payload and run its action
    Recognize { payload: PathBuf },
    /// Recognise an ordered list of frame payloads
    Batch { payloads: PathBuf },
    /// Analyse a recorded sequence, optionally against a reference
    Analyze {
        sequence: PathBuf,
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Inspect or edit gesture mappings
    Mappings {
        #[command(subcommand)]
        action: MappingsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum MappingsCommand {
    List,
    Get {
        gesture: GestureLabel,
    },
    Set {
        gesture: GestureLabel,
        /// log, callback, keyboard or mouse
        kind: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Remove {
        gesture: GestureLabel,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let settings = Settings::load_or_default(cli.config.as_deref())
        .context("failed to load settings")?;
    let mappings =
        MappingStore::open(YamlMappingFile::new(&settings.interpret.mappings_file)).into_shared();

    match cli.command {
        Command::Stream { input } => run_stream(&settings, mappings, input.as_deref()),
        Command::Recognize { payload } => {
            let payload: FramePayload = read_json(&payload)?;
            let interpreter = interpreter(&settings, mappings)?;
            let mut session = RecognitionSession::new(&settings);
            let result = session.process(&payload.landmarks, payload.timestamp, &interpreter);
            print_json(&result)
        }
        Command::Batch { payloads } => {
            let payloads: Vec<FramePayload> = read_json(&payloads)?;
            print_json(&analysis::recognize_batch(&payloads, &settings))
        }
        Command::Analyze {
            sequence,
            reference,
        } => {
            let sequence: Vec<LandmarkFrame> = read_json(&sequence)?;
            let reference: Option<Vec<LandmarkFrame>> =
                reference.as_deref().map(read_json).transpose()?;
            let report = analysis::analyze_sequence(&sequence, reference.as_deref(), &settings)
                .ok_or_else(|| anyhow!("no features could be extracted from the sequence"))?;
            print_json(&report)
        }
        Command::Mappings { action } => run_mappings(mappings, action),
    }
}

fn interpreter(settings: &Settings, mappings: SharedMappings) -> Result<ActionInterpreter> {
    ActionInterpreter::with_http(mappings, settings.interpret.callback_timeout())
        .context("failed to build callback client")
}

fn run_stream(settings: &Settings, mappings: SharedMappings, input: Option<&Path>) -> Result<()> {
    let interpreter = interpreter(settings, mappings)?;
    let (dispatcher, action_rx) =
        ActionDispatcher::spawn(interpreter, settings.interpret.dispatch_queue)?;
    let (frame_tx, frame_rx) = bounded::<FramePayload>(1);
    let (outcome_tx, outcome_rx) = bounded(16);
    let worker = session::spawn_session_worker(settings, frame_rx, outcome_tx, dispatcher)?;

    let reader: Box<dyn BufRead + Send> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    // Frame acquisition stays off the classification thread.
    let feeder = thread::spawn(move || {
        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::error!("failed to read frame input: {err}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FramePayload>(&line) {
                Ok(payload) => {
                    if frame_tx.send(payload).is_err() {
                        break;
                    }
                }
                Err(err) => log::warn!("skipping malformed frame on line {}: {err}", line_no + 1),
            }
        }
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let idle = crossbeam_channel::never();
    let mut actions_open = true;
    loop {
        let actions = if actions_open { &action_rx } else { &idle };
        crossbeam_channel::select! {
            recv(outcome_rx) -> msg => match msg {
                Ok(outcome) => emit(&mut out, &outcome)?,
                Err(_) => break,
            },
            recv(actions) -> msg => match msg {
                Ok(outcome) => emit(&mut out, &outcome)?,
                Err(_) => actions_open = false,
            },
        }
    }
    // The session has ended; whatever the dispatcher finished is still buffered.
    for outcome in action_rx.iter() {
        emit(&mut out, &outcome)?;
    }

    feeder
        .join()
        .map_err(|_| anyhow!("frame reader thread panicked"))?;
    worker
        .join()
        .map_err(|_| anyhow!("recognition session thread panicked"))?;
    Ok(())
}

fn run_mappings(mappings: SharedMappings, action: MappingsCommand) -> Result<()> {
    let mut store = mappings.write().unwrap_or_else(PoisonError::into_inner);
    if store.is_fallback() {
        log::warn!("mapping file could not be read; built-in defaults are shown and edits are not saved");
    }
    match action {
        MappingsCommand::List => print_json(&store.get_all()),
        MappingsCommand::Get { gesture } => match store.get(gesture) {
            Some(spec) => print_json(spec),
            None => bail!("gesture '{gesture}' has no mapping"),
        },
        MappingsCommand::Set {
            gesture,
            kind,
            message,
            url,
            key,
            action,
            description,
        } => {
            let spec = ActionSpec::from_parts(
                &kind,
                ActionParams {
                    message,
                    url,
                    key,
                    action,
                    description,
                },
            );
            store
                .add(gesture, spec)
                .with_context(|| format!("failed to save mapping for {gesture}"))?;
            print_json(&store.get(gesture))
        }
        MappingsCommand::Remove { gesture } => {
            if !store.remove(gesture).context("failed to save mappings")? {
                bail!("gesture '{gesture}' has no mapping");
            }
            println!("removed {gesture}");
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn emit<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
