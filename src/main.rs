use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use barista_buddy::config::file::load_config_from;
use barista_buddy::session::{CaptureWorker, LineCapture, MicrophoneCapture, UtteranceSource};
use barista_buddy::voice::{
    AudioCapture, AudioPlayback, ConsoleSpeaker, PLAYBACK_SAMPLE_RATE, Speaker, SpeechToText,
    SttProvider, TextToSpeech, Transcriber, TtsProvider, VadConfig, VoiceSpeaker,
    calculate_energy,
};
use barista_buddy::{
    Assistant, AssistantData, BatchCase, Capabilities, Config, Persona, SessionController,
};

/// Barista Buddy - voice-driven coffee question answering
#[derive(Parser)]
#[command(name = "barista", version, about)]
struct Cli {
    /// Input/output mode for the interactive session
    #[arg(short, long, value_enum, env = "BARISTA_MODE", default_value = "voice")]
    mode: Mode,

    /// Config file (defaults to ~/.config/barista-buddy/config.toml)
    #[arg(short, long, env = "BARISTA_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Microphone in, synthesized speech out
    Voice,
    /// Lines from stdin in, console out
    Text,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the fixed self-test queries and print a summary
    Batch {
        /// JSON list of cases (defaults to the built-in list)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Answer a single query and exit
    Ask {
        /// The question
        query: String,
    },
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
        #[arg(default_value = "Hello! I'm Barista Buddy. How can I help you?")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,barista_buddy=info",
        1 => "info,barista_buddy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::from_sources(load_config_from(path), |key| std::env::var(key).ok())?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Batch { file } => cmd_batch(&config, file).await,
            Command::Ask { query } => cmd_ask(&config, &query).await,
            Command::TestMic { duration } => test_mic(duration).await.map(|()| ExitCode::SUCCESS),
            Command::TestSpeaker => test_speaker().await.map(|()| ExitCode::SUCCESS),
            Command::TestTts { text } => test_tts(&config, &text).await.map(|()| ExitCode::SUCCESS),
        };
    }

    run_session(&config, cli.mode).await
}

async fn build_assistant(config: &Config) -> anyhow::Result<Assistant> {
    let data = AssistantData::load(&config.data)?;
    let capabilities = Capabilities::from_config(config)?;
    let assistant = Assistant::build(
        data,
        capabilities,
        &config.thresholds,
        config.llm.fallback_policy(),
    )
    .await?;
    Ok(assistant)
}

/// Run the continuous listening session until stopped
async fn run_session(config: &Config, mode: Mode) -> anyhow::Result<ExitCode> {
    let assistant = build_assistant(config).await?;
    let persona = assistant.persona();
    let console = ConsoleSpeaker::new(persona.name());

    let source: Box<dyn UtteranceSource>;
    let speaker: Arc<dyn Speaker>;
    let mut transcriber: Option<Arc<dyn Transcriber>> = None;

    match mode {
        Mode::Text => {
            let worker = CaptureWorker::spawn("barista-stdin", || {
                Ok(LineCapture::new(std::io::stdin().lock()).with_prompt("You: "))
            })
            .await?;
            source = Box::new(worker);
            speaker = Arc::new(console);
        }
        Mode::Voice => {
            let vad = VadConfig::from_durations(config.voice.energy_threshold, config.voice.silence);
            let window = config.voice.max_capture;
            let worker =
                CaptureWorker::spawn("barista-mic", move || MicrophoneCapture::open(vad, window))
                    .await?;
            source = Box::new(worker);
            speaker = Arc::new(VoiceSpeaker::new(build_tts(config, persona)?).with_echo(console));
            let stt: Arc<dyn Transcriber> = Arc::new(build_stt(config, persona)?);
            transcriber = Some(stt);
        }
    }

    let mut session = SessionController::new(
        assistant.pipeline(),
        source,
        speaker,
        assistant.session_config(&config.session),
    );
    if let Some(transcriber) = transcriber {
        session = session.with_transcriber(transcriber);
    }

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stop.stop();
        }
    });

    match mode {
        Mode::Voice => tracing::info!(persona = %persona.name(), "listening, say \"goodbye\" to stop"),
        Mode::Text => tracing::info!(persona = %persona.name(), "ready, type \"exit\" to stop"),
    }

    let report = session.run().await;
    if report.stop_reason.is_error() {
        anyhow::bail!("session stopped: {}", report.stop_reason);
    }
    Ok(ExitCode::SUCCESS)
}

fn build_stt(config: &Config, persona: &Persona) -> anyhow::Result<SpeechToText> {
    let model = config.voice.stt_model.clone();
    let stt = match config.voice.stt_provider {
        SttProvider::Whisper => SpeechToText::new_whisper(config.api_keys.openai(), model)?,
        SttProvider::Deepgram => SpeechToText::new_deepgram(config.api_keys.deepgram(), model)?,
    };
    Ok(stt.with_language(persona.stt_language()))
}

fn build_tts(config: &Config, persona: &Persona) -> anyhow::Result<TextToSpeech> {
    let voice = config.voice.voice_for(persona).to_string();
    let model = config.voice.tts_model.clone();
    let tts = match config.voice.tts_provider {
        TtsProvider::OpenAi => TextToSpeech::new_openai(
            config.api_keys.openai(),
            voice,
            config.voice.speed_for(persona),
            model,
        )?,
        TtsProvider::ElevenLabs => {
            TextToSpeech::new_elevenlabs(config.api_keys.elevenlabs(), voice, model)?
        }
    };
    Ok(tts)
}

/// Run the batch self-test
async fn cmd_batch(config: &Config, file: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let path = file.or_else(|| config.data.batch_queries.clone());
    let cases = BatchCase::load(path.as_deref())?;
    let assistant = build_assistant(config).await?;

    let report = barista_buddy::batch::run(&assistant.pipeline(), cases).await;
    print!("{}", report.render());

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Answer one query
async fn cmd_ask(config: &Config, query: &str) -> anyhow::Result<ExitCode> {
    let assistant = build_assistant(config).await?;
    let resolution = assistant.ask(query).await;

    if resolution.query.was_corrected() {
        tracing::info!(corrected = %resolution.query.text, "query normalized");
    }
    println!("[{}] {}", resolution.response.source, resolution.response.text);
    Ok(ExitCode::SUCCESS)
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    // The capture stream is not Send; keep it on a blocking thread
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut capture = AudioCapture::new()?;
        println!("Device: {}", capture.device_name());
        println!("---");
        capture.start()?;

        for i in 0..duration {
            std::thread::sleep(Duration::from_secs(1));

            let samples = capture.take_buffer();
            let energy = calculate_energy(&samples);
            let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
        }

        capture.stop();
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE * duration_secs)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play(samples)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let persona = AssistantData::load(&config.data)?.persona;
    let tts = build_tts(config, &persona)?;

    println!("Synthesizing and playing speech...");
    VoiceSpeaker::new(tts).speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
