use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use live_tutor::config::file;
use live_tutor::session::SessionOptions;
use live_tutor::voice::{
    AudioPlayback, AudioSource, CHUNK_FRAMES, DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE,
    MicrophoneSource, SAMPLE_RATE, Speaker, SpeechOutput, TextToSpeech, pronunciation_score,
};
use live_tutor::{
    Config, EventSender, Overrides, Reporter, SessionProtocol, THEMES, transport, tutor_prompt,
};

/// Live Tutor - real-time spoken-English practice
#[derive(Parser)]
#[command(name = "live-tutor", version, about)]
struct Cli {
    /// Practice theme (business, travel, daily life, social); omit to choose by voice
    #[arg(short, long, env = "LIVE_TUTOR_THEME")]
    theme: Option<String>,

    /// Streaming model name
    #[arg(short, long, env = "LIVE_TUTOR_MODEL")]
    model: Option<String>,

    /// HTTP proxy to tunnel the connection through
    #[arg(long, env = "HTTP_PROXY")]
    proxy: Option<String>,

    /// Print replies only, never speak them
    #[arg(long, env = "LIVE_TUTOR_NO_VOICE")]
    no_voice: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! Let's practice some English together.")]
        text: String,
    },
    /// List practice themes
    Themes,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,live_tutor=info",
        1 => "info,live_tutor=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(io::stderr)
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("crypto provider already installed");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::Themes => {
                list_themes();
                Ok(())
            }
        };
    }

    let overrides = Overrides {
        theme: cli.theme,
        model: cli.model,
        proxy: cli.proxy,
        no_voice: cli.no_voice,
    };

    // Load configuration
    let config = Config::load(&overrides)?;
    tracing::debug!(?config, "loaded configuration");

    let options = SessionOptions {
        model: config.model.clone(),
        prompt: tutor_prompt(config.theme.as_deref())?,
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
            }
        });
    }

    // Open the microphone before connecting so a missing device fails fast
    let source = MicrophoneSource::open(config.audio.sample_rate, config.audio.chunk_frames)?;
    let speaker = build_speaker(&config, &shutdown);

    let (events, rx) = EventSender::channel();
    let reporter = tokio::spawn(Reporter::new(io::stdout()).run(rx));

    let outcome = converse(&config, options, source, speaker, events, &shutdown).await;

    // Stops any playback still running on the blocking pool
    shutdown.cancel();
    match reporter.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "terminal output failed"),
        Err(e) => tracing::warn!(error = %e, "reporter task failed"),
    }

    outcome?;
    Ok(())
}

/// Connect and run one session
async fn converse(
    config: &Config,
    options: SessionOptions,
    source: MicrophoneSource,
    speaker: Option<Arc<dyn Speaker>>,
    events: EventSender,
    shutdown: &CancellationToken,
) -> live_tutor::Result<()> {
    tracing::info!(
        model = %options.model,
        theme = ?config.theme,
        proxy = config.proxy.is_some(),
        "connecting to tutor"
    );

    let target = config.transport()?;
    let (sink, stream) = tokio::select! {
        connected = transport::connect(&target) => connected?,
        () = shutdown.cancelled() => return Ok(()),
    };

    let mut session = SessionProtocol::new(options, Box::new(sink), Box::new(stream), events);
    if let Some(speaker) = speaker {
        session = session.with_speaker(speaker);
    }

    session.run(Box::new(source), shutdown).await
}

/// Build the reply speaker, or `None` for text-only mode
fn build_speaker(config: &Config, shutdown: &CancellationToken) -> Option<Arc<dyn Speaker>> {
    if !config.speech_enabled() {
        if config.voice.enabled {
            tracing::warn!("voice mode off, ELEVENLABS_API_KEY not set");
        } else {
            tracing::info!("voice mode off");
        }
        return None;
    }
    let api_key = config.voice.api_key.clone().unwrap_or_default();

    let tts = match TextToSpeech::new(
        api_key,
        config.voice.voice_id.clone(),
        config.voice.model.clone(),
    ) {
        Ok(tts) => tts,
        Err(e) => {
            tracing::warn!(error = %e, "voice mode off");
            return None;
        }
    };

    let playback = match AudioPlayback::new() {
        Ok(playback) => playback.with_cancellation(shutdown.clone()),
        Err(e) => {
            tracing::warn!(error = %e, "voice mode off");
            return None;
        }
    };

    tracing::info!(
        device = playback.device_name(),
        voice = tts.voice_id(),
        model = tts.model(),
        "voice mode on"
    );
    Some(Arc::new(SpeechOutput::new(tts, playback)))
}

/// List practice themes
fn list_themes() {
    for theme in THEMES {
        println!("{:<12} {}", theme.name, theme.scenarios.join(", "));
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut source = MicrophoneSource::open(SAMPLE_RATE, CHUNK_FRAMES)?;

    println!("Sample rate: {SAMPLE_RATE} Hz, {CHUNK_FRAMES} frames per chunk");
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut loudest = 0.0f32;
        let mut voiced = 0usize;
        let mut chunks = 0usize;
        let mut score = 0u8;

        while let Ok(chunk) = tokio::time::timeout_at(deadline, source.read_chunk()).await {
            let chunk = chunk?;
            chunks += 1;
            loudest = loudest.max(chunk.loudness());
            if chunk.is_voiced() {
                voiced += 1;
                score = score.max(pronunciation_score(&chunk));
            }
        }

        // Visual meter, the voice threshold sits at five marks
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (loudest / 40.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] Loudness: {:7.1} | Voiced: {voiced:3}/{chunks:3} | Score: {score:3} | [{meter}]",
            i + 1,
            loudest,
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If loudness stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!(
        "Playing {} samples at {} Hz on {}...",
        samples.len(),
        sample_rate,
        playback.device_name()
    );

    playback.play(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output via `ElevenLabs`
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let fc = file::load_config_file();
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

    let api_key = env("ELEVENLABS_API_KEY")
        .or(fc.api_keys.elevenlabs)
        .ok_or_else(|| anyhow::anyhow!("ELEVENLABS_API_KEY is not set"))?;
    let voice_id = env("ELEVENLABS_VOICE_ID")
        .or(fc.voice.voice_id)
        .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string());
    let model = env("ELEVENLABS_MODEL")
        .or(fc.voice.model)
        .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string());

    let tts = TextToSpeech::new(api_key, voice_id, model)?;

    println!("Synthesizing speech...");
    let mp3_data = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    // Check MP3 header
    if let [a, b, c, d, ..] = mp3_data.as_slice() {
        println!("First 4 bytes: {a:02x} {b:02x} {c:02x} {d:02x}");
    }

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    playback.play_mp3(mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
