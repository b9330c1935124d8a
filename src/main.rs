use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use natiq_live::audio::{AudioBackendFactory, CaptureSource, RenderSink};
use natiq_live::session::{ConversationController, SessionEvent, SessionFactory, SessionParts, VoiceName};
use natiq_live::{create_router, AppState, Config, Credential, GeminiLiveTransport, LiveTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "natiq-live", about = "Real-time voice conversation with a Gemini Live model", version)]
struct Cli {
    /// Config file (without extension)
    #[arg(short, long, default_value = "config/natiq-live")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control API.
    Serve,
    /// Hold one conversation in the terminal.
    Talk {
        /// Stream a 16kHz mono WAV file instead of the microphone.
        #[arg(long)]
        wav: Option<PathBuf>,
        /// Discard model speech instead of playing it.
        #[arg(long)]
        no_speaker: bool,
        /// Override the configured voice.
        #[arg(long)]
        voice: Option<VoiceName>,
        /// Override the configured system instruction.
        #[arg(long)]
        instruction: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Natiq Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Remote model: {}", cfg.remote.model);

    if cfg.credential().is_none() {
        warn!(
            "{} is not set; conversations will fail until it is",
            cfg.remote.api_key_env
        );
    }

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Talk {
            wav,
            no_speaker,
            voice,
            instruction,
        } => {
            let source = wav.map(CaptureSource::File).unwrap_or(CaptureSource::Microphone);
            let sink = if no_speaker { RenderSink::Null } else { RenderSink::Speaker };
            talk(cfg, source, sink, voice, instruction).await
        }
    }
}

/// Builds devices and a Gemini transport for every new session
fn session_factory(cfg: &Config, source: CaptureSource, sink: RenderSink) -> Arc<dyn SessionFactory> {
    let audio = cfg.audio.backend.clone();
    let api_key_env = cfg.remote.api_key_env.clone();
    let transport: Arc<dyn LiveTransport> = Arc::new(GeminiLiveTransport::new(cfg.remote.clone()));

    Arc::new(move || -> natiq_live::error::Result<SessionParts> {
        Ok(SessionParts {
            capture: AudioBackendFactory::capture(source.clone(), audio.clone()),
            render: AudioBackendFactory::render(sink),
            transport: Arc::clone(&transport),
            // Read per session so a key exported after startup is picked up
            credential: Credential::from_env(&api_key_env).ok(),
        })
    })
}

async fn serve(cfg: Config) -> Result<()> {
    let factory = session_factory(&cfg, CaptureSource::Microphone, RenderSink::Speaker);
    let controller = Arc::new(ConversationController::new(cfg.session(), factory));
    let app = create_router(AppState::new(Arc::clone(&controller)));

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("HTTP server failed")?;

    controller.shutdown().await;

    Ok(())
}

async fn talk(
    cfg: Config,
    source: CaptureSource,
    sink: RenderSink,
    voice: Option<VoiceName>,
    instruction: Option<String>,
) -> Result<()> {
    let mut persona = cfg.persona.clone();
    if let Some(voice) = voice {
        persona.voice = voice;
    }
    if let Some(instruction) = instruction {
        persona.system_instruction = instruction;
    }

    let controller = ConversationController::new(cfg.session(), session_factory(&cfg, source, sink));
    let session = controller
        .start(&persona)
        .await
        .context("Failed to start conversation")?;

    let mut events = session.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!("Connected as {}. Type 'm' + Enter to toggle mute, 'q' + Enter to quit.", persona.voice);

    // The remote may hang up before we subscribe
    while !session.state().is_terminal() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::AudioScheduled { sequence, start, duration }) => {
                    debug!("Chunk {} at {:.3}s ({:.3}s)", sequence, start, duration);
                }
                Ok(SessionEvent::TurnComplete) => info!("Model turn complete"),
                Ok(SessionEvent::Interrupted) => info!("Interrupted"),
                Ok(SessionEvent::Closed) => {
                    println!("Conversation closed");
                    break;
                }
                Ok(SessionEvent::Error { kind }) => {
                    println!("Conversation ended with a {} error", kind);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => debug!("Missed {} session events", skipped),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "m" => {
                        let muted = !session.is_muted();
                        session.set_muted(muted);
                        println!("{}", if muted { "Muted" } else { "Unmuted" });
                    }
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command '{}'", other),
                },
                // Keep talking until the remote ends it or Ctrl-C
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await;

    let stats = session.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
