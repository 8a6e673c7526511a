use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use waav_live::{
    AudioDevices, ClientConfig, ControlPlane, EntityDirectory, GeminiLiveTransport,
    HomeAssistantClient, LiveResult, SessionEvent, SessionManager,
    core::live::{AudioInput, AudioOutput, PacedOutput, PlayedChunk, WavFileInput, spawn_wav_recorder},
};

/// WaaV Live - voice sessions for a smart home
#[derive(Parser, Debug)]
#[command(name = "waav-live")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one live session, using a WAV file as the microphone
    Run {
        /// WAV file streamed as microphone input
        #[arg(short = 'm', long = "mic", value_name = "WAV")]
        mic: PathBuf,

        /// Write the assistant's speech to this WAV file
        #[arg(short = 'r', long = "record", value_name = "WAV")]
        record: Option<PathBuf>,

        /// Entity directory (overrides the configured path)
        #[arg(short = 'e', long = "entities", value_name = "FILE")]
        entities: Option<PathBuf>,

        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,
    },

    /// Print the tool declarations advertised to the assistant
    Tools {
        /// Entity directory (overrides the configured path)
        #[arg(short = 'e', long = "entities", value_name = "FILE")]
        entities: Option<PathBuf>,
    },

    /// Query the current state of one entity
    State {
        /// Entity id, for example `light.kitchen`
        entity_id: String,
    },
}

/// Devices backed by files: a WAV file as microphone and a clock-paced
/// speaker that can record to disk.
struct FileDevices {
    mic: PathBuf,
    recorder: Option<mpsc::UnboundedSender<PlayedChunk>>,
}

impl AudioDevices for FileDevices {
    fn microphone(&self) -> LiveResult<Box<dyn AudioInput>> {
        Ok(Box::new(WavFileInput::new(&self.mic)))
    }

    fn speaker(&self, sample_rate: u32) -> LiveResult<Box<dyn AudioOutput>> {
        let output = PacedOutput::new(sample_rate);
        Ok(match &self.recorder {
            Some(sink) => Box::new(output.with_sink(sink.clone())),
            None => Box::new(output),
        })
    }
}

fn load_directory(config: &ClientConfig, path: Option<&Path>) -> anyhow::Result<EntityDirectory> {
    let path = path.or(config.entity_directory_path.as_deref());
    match path {
        Some(path) => {
            let directory = EntityDirectory::from_file(path)
                .map_err(|e| anyhow!("Failed to load entity directory: {}", e))?;
            info!("Loaded {} entities from {}", directory.len(), path.display());
            Ok(directory)
        }
        None => Ok(EntityDirectory::default()),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("[state] {state}"),
        SessionEvent::UserTranscript { fragment, .. } => println!("[you] {fragment}"),
        SessionEvent::AssistantText(text) => println!("[assistant] {text}"),
        SessionEvent::AssistantThought(text) => println!("[thinking] {text}"),
        SessionEvent::AssistantTranscript(text) => println!("[assistant said] {text}"),
        SessionEvent::ToolCallStarted {
            id,
            name,
            duplicate,
        } => {
            if *duplicate {
                println!("[tool] {name} ({id}) already executed");
            } else {
                println!("[tool] {name} ({id})");
            }
        }
        SessionEvent::ToolCallFinished { id, name, success } => {
            let status = if *success { "ok" } else { "failed" };
            println!("[tool] {name} ({id}) {status}");
        }
        SessionEvent::Interrupted => println!("[interrupted]"),
        SessionEvent::TurnComplete => println!("[turn complete]"),
        SessionEvent::GoAway { time_left } => {
            println!(
                "[go away] {}",
                time_left.as_deref().unwrap_or("closing soon")
            );
        }
        SessionEvent::Disconnected(reason) => println!("{}", reason.status_message()),
    }
}

async fn run_session(
    config: &ClientConfig,
    control_plane: Arc<dyn ControlPlane>,
    directory: EntityDirectory,
    mic: PathBuf,
    record: Option<PathBuf>,
    muted: bool,
) -> anyhow::Result<()> {
    let (recorder, recorder_thread) = match &record {
        Some(path) => {
            let (sink, handle) = spawn_wav_recorder(path, config.output_sample_rate)
                .map_err(|e| anyhow!(e.to_string()))?;
            (Some(sink), Some(handle))
        }
        None => (None, None),
    };

    let devices = Arc::new(FileDevices { mic, recorder });
    let transport = Arc::new(GeminiLiveTransport::new(config.live_url.clone()));
    let mut manager = SessionManager::new(config.live_config(), transport, control_plane, devices)
        .with_directory(directory);
    manager.set_muted(muted);

    let mut events = manager
        .take_events()
        .ok_or_else(|| anyhow!("Session events already taken"))?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    if let Err(e) = manager.start().await {
        return Err(anyhow!(e.user_message()));
    }

    let reason = tokio::select! {
        reason = manager.wait() => reason,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping session");
            manager.stop().await
        }
    };

    // Dropping the manager closes the event stream and the recorder sink
    drop(manager);
    let _ = printer.await;
    if let Some(handle) = recorder_thread {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        if let Some(path) = record {
            println!("Assistant audio written to {}", path.display());
        }
    }

    match reason.and_then(|r| r.as_error()) {
        Some(error) => Err(anyhow!(error.user_message())),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Commands::Tools { entities } => {
            let directory = load_directory(&config, entities.as_deref())?;
            let tools = serde_json::to_string_pretty(&directory.tools())?;
            println!("{tools}");
            Ok(())
        }
        Commands::State { entity_id } => {
            let ha_config = config
                .home_assistant_config()
                .map_err(|e| anyhow!(e.to_string()))?;
            let client = HomeAssistantClient::new(ha_config)?;
            let state = client.get_state(&entity_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Run {
            mic,
            record,
            entities,
            muted,
        } => {
            let directory = load_directory(&config, entities.as_deref())?;
            let ha_config = config
                .home_assistant_config()
                .map_err(|e| anyhow!(e.to_string()))?;
            let control_plane: Arc<dyn ControlPlane> = Arc::new(HomeAssistantClient::new(ha_config)?);
            info!(
                "Control plane at {}, voice {}",
                config.home_assistant_url, config.live_voice
            );
            run_session(&config, control_plane, directory, mic, record, muted).await
        }
    }
}
