use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use atelier_studio::api::{ApiServerBuilder, ApiState};
use atelier_studio::audio::{
    AudioBuffer, CpalBackend, CpalMicrophone, CpalOutputContext, DeviceContext, MicrophoneStream,
    OUTPUT_SAMPLE_RATE, OutputContext,
};
use atelier_studio::{
    Config, CreativeActionService, GeminiImageClient, GeminiLiveTransport, ImageArtifact,
    StudioEvent, StudioStore, ToolCallDispatcher, VoiceController,
};

/// Atelier - voice-driven image studio
#[derive(Parser)]
#[command(name = "atelier", version, about)]
struct Cli {
    /// Port for the local API
    #[arg(long)]
    port: Option<u16>,

    /// Prebuilt voice for the realtime model
    #[arg(long)]
    voice: Option<String>,

    /// Directory with the browser UI
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local API and studio (default)
    Serve,
    /// Run a voice session in the terminal until Ctrl-C
    Voice,
    /// Generate an image from a prompt
    Generate {
        prompt: String,
        /// Output file (defaults to a name derived from the image id)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Edit an existing image file
    Edit {
        /// Source image (png, jpeg or webp)
        image: PathBuf,
        instruction: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,atelier_studio=info",
        1 => "info,atelier_studio=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    if let Some(voice) = cli.voice {
        config.realtime.voice = voice;
    }
    if cli.static_dir.is_some() {
        config.api_server.static_dir = cli.static_dir;
    }
    tracing::debug!(
        realtime_model = %config.realtime.model,
        image_model = %config.image.model,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Voice => voice(&config).await,
        Command::Generate { prompt, out } => generate(&config, &prompt, out).await,
        Command::Edit {
            image,
            instruction,
            out,
        } => edit(&config, &image, &instruction, out).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

fn creative_service(
    config: &Config,
    store: Arc<StudioStore>,
) -> anyhow::Result<CreativeActionService> {
    let mut client = GeminiImageClient::new(config.require_api_key()?, &config.image.model)?;
    if let Some(endpoint) = &config.image.endpoint {
        client = client.with_endpoint(endpoint);
    }

    Ok(CreativeActionService::new(Arc::new(client), store)
        .with_quality_qualifier(&config.image.quality_qualifier))
}

fn voice_controller(
    config: &Config,
    service: &Arc<CreativeActionService>,
) -> anyhow::Result<Arc<VoiceController>> {
    let mut transport = GeminiLiveTransport::new(config.require_api_key()?);
    if let Some(endpoint) = &config.realtime.endpoint {
        transport = transport.with_endpoint(endpoint);
    }

    Ok(VoiceController::new(
        Arc::new(CpalBackend),
        Arc::new(transport),
        Arc::clone(service.store()),
        ToolCallDispatcher::new(Arc::clone(service)),
        config.session_config(),
    ))
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(StudioStore::new());
    let service = Arc::new(creative_service(config, store)?);
    let voice = voice_controller(config, &service)?;

    tracing::info!(
        port = config.api_server.port,
        realtime_model = %config.realtime.model,
        image_model = %config.image.model,
        "starting atelier studio"
    );

    let state = ApiState::new(service, Arc::clone(&voice));
    let server = ApiServerBuilder::new(state, config.api_server.port)
        .static_dir(config.api_server.static_dir.clone())
        .build();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    voice.stop().await;
    Ok(())
}

async fn voice(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(StudioStore::new());
    let service = Arc::new(creative_service(config, Arc::clone(&store))?);
    let voice = voice_controller(config, &service)?;

    let mut events = store.subscribe();
    let outcome = voice.toggle().await?;
    println!("Voice session {outcome:?}. Talk to the studio; Ctrl-C to stop.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(StudioEvent::TranscriptChanged { text: Some(text) }) => println!("ai: {text}"),
                Ok(StudioEvent::StatusChanged { status, voice_active }) => {
                    println!("[{status:?}]");
                    if !voice_active && voice.current_generation().is_none() {
                        break;
                    }
                }
                Ok(StudioEvent::ImageChanged { image }) => {
                    let path = save_artifact(&image, None)?;
                    println!("image saved to {}", path.display());
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    voice.stop().await;
    println!("\nVoice session ended.");
    Ok(())
}

async fn generate(config: &Config, prompt: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let service = creative_service(config, Arc::new(StudioStore::new()))?;

    println!("Generating: \"{prompt}\"");
    let artifact = service.generate(prompt).await?;
    let path = save_artifact(&artifact, out)?;
    println!("Saved to {}", path.display());
    Ok(())
}

async fn edit(
    config: &Config,
    image: &Path,
    instruction: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let service = creative_service(config, Arc::new(StudioStore::new()))?;

    let bytes = std::fs::read(image)?;
    let mime_type = mime_for_path(image)
        .ok_or_else(|| anyhow::anyhow!("unsupported image type: {}", image.display()))?;
    service.upload(&bytes, mime_type).await?;

    println!("Editing {}: \"{instruction}\"", image.display());
    let artifact = service
        .edit(instruction)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no image to edit"))?;
    let path = save_artifact(&artifact, out)?;
    println!("Saved to {}", path.display());
    Ok(())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn save_artifact(artifact: &ImageArtifact, out: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = out.unwrap_or_else(|| {
        let ext = artifact
            .mime_type
            .strip_prefix("image/")
            .unwrap_or("png")
            .replace("jpeg", "jpg");
        PathBuf::from(format!("atelier-{}.{ext}", artifact.id))
    });

    std::fs::write(&path, STANDARD.decode(&artifact.data)?)?;
    Ok(path)
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = CpalMicrophone::open().await?;
    let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let tap_buffer = Arc::clone(&buffer);
    microphone.set_tap(Some(Box::new(move |samples: &[f32]| {
        if let Ok(mut buffer) = tap_buffer.lock() {
            buffer.extend_from_slice(samples);
        }
    })));

    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = buffer
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    microphone.stop_tracks();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = CpalOutputContext::open(OUTPUT_SAMPLE_RATE).await?;

    let frequency = 440.0_f32;
    let num_samples = OUTPUT_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {num_samples} samples at {OUTPUT_SAMPLE_RATE} Hz...");

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let buffer = Arc::new(AudioBuffer::new(samples, OUTPUT_SAMPLE_RATE, 1));
    let _source = output.start_source(
        buffer,
        output.current_time(),
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    )?;

    // Cap the wait in case the device never drains
    let _ = tokio::time::timeout(Duration::from_secs(5), done_rx).await;
    output.close()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
