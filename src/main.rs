use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use jarvis_client::config::Service;
use jarvis_client::http::build_client;
use jarvis_client::voice::{
    AudioClip, CaptureController, CaptureState, MicrophoneDevice, PlaybackController, PlaybackEvent,
    PlaybackEventKind, SpeakerSink, SynthesisClient, Synthesizer, Transcriber,
    TranscriptionClient, samples_to_wav,
};
use jarvis_client::{
    Config, ConsoleNotifier, Orchestrator, Role, SpeechOutcome, TurnOutcome, VoiceOutcome,
    health,
};

/// How often the chat loop drains microphone audio while recording
const CAPTURE_PUMP_INTERVAL: Duration = Duration::from_millis(200);

/// Jarvis - talk to your assistant by typing or speaking
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "JARVIS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and speak the answer
    Ask {
        /// Question text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Transcribe a WAV file
    Transcribe {
        /// Path to the WAV file
        file: PathBuf,
    },
    /// Synthesize and play text
    Say {
        /// Text to speak
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Check the backend services
    Health,
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
        0 => "warn,jarvis_client=info",
        1 => "info,jarvis_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config).await,
        Command::Ask { text } => ask(&config, &text.join(" ")).await,
        Command::Transcribe { file } => transcribe(&config, &file).await,
        Command::Say { text } => say(&config, &text.join(" ")).await,
        Command::Health => check_health(&config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Interactive chat loop
#[allow(clippy::future_not_send)]
async fn chat(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, Arc::new(ConsoleNotifier))?;

    println!("Jarvis chat. Type a message, or:");
    println!("  /mic      start/stop voice input (empty line also stops)");
    println!("  /cancel   discard the current recording");
    println!("  /reset    clear the conversation");
    println!("  /history  show the conversation");
    println!("  /quit     exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(CAPTURE_PUMP_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                let recording = orchestrator.status().capture == CaptureState::Recording;

                match line {
                    "/quit" | "/exit" => break,
                    "/mic" => handle_voice(&orchestrator).await,
                    "" if recording => handle_voice(&orchestrator).await,
                    "" => {}
                    "/cancel" => {
                        if orchestrator.cancel_recording() {
                            println!("(recording discarded)");
                        }
                    }
                    "/reset" => {
                        if orchestrator.reset() {
                            println!("(conversation cleared)");
                        } else {
                            println!("(cannot reset while busy or recording)");
                        }
                    }
                    "/history" => print_history(&orchestrator),
                    text if recording => {
                        tracing::debug!(text, "input ignored while recording");
                        println!("(recording - press enter or /mic to stop)");
                    }
                    text => {
                        println!("(thinking...)");
                        let outcome = orchestrator.send_text(text).await;
                        print_turn(&outcome);
                    }
                }
            }
            _ = ticker.tick() => {
                if let Some(level) = orchestrator.pump_capture() {
                    tracing::trace!(level, "microphone level");
                }
            }
        }
    }

    orchestrator.playback().stop();
    Ok(())
}

#[allow(clippy::future_not_send)]
async fn handle_voice(orchestrator: &Orchestrator) {
    match orchestrator.send_voice().await {
        VoiceOutcome::Recording => println!("(recording - press enter or /mic to stop)"),
        VoiceOutcome::Turn(outcome) => print_turn(&outcome),
        VoiceOutcome::Ignored | VoiceOutcome::Failed(_) => {}
    }
}

fn print_turn(outcome: &TurnOutcome) {
    if let TurnOutcome::Answered { result, speech } = outcome {
        print!("{}", result.render_tool_calls());
        println!("jarvis> {}", result.response_text);
        if matches!(speech, SpeechOutcome::Playing(_)) {
            println!("(speaking)");
        }
    }
}

fn print_history(orchestrator: &Orchestrator) {
    let history = orchestrator.history();
    if history.is_empty() {
        println!("(no messages)");
    }
    for message in history {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "jarvis",
        };
        println!("{who}> {}", message.content);
    }
}

/// Ask one question and wait for the spoken answer
#[allow(clippy::future_not_send)]
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, Arc::new(ConsoleNotifier))?;
    let mut events = orchestrator.playback().subscribe();

    let outcome = orchestrator.send_text(text).await;
    match &outcome {
        TurnOutcome::Ignored => anyhow::bail!("nothing to ask"),
        TurnOutcome::Aborted(e) => anyhow::bail!("{e}"),
        TurnOutcome::Answered { speech, .. } => {
            print_turn(&outcome);
            if let SpeechOutcome::Playing(utterance) = speech
                && let Some(message) = wait_for_playback(&mut events, *utterance).await
            {
                anyhow::bail!("playback failed: {message}");
            }
        }
    }
    Ok(())
}

/// Transcribe a WAV file
async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file).await?;
    let clip = AudioClip::from_wav(bytes)?;
    println!("Transcribing {} ({} samples)...", file.display(), clip.frames());

    let client = build_client(config.request_timeout)?;
    let transcriber = TranscriptionClient::new(client, config.endpoints.url(Service::Transcription));
    let result = transcriber.transcribe(&clip).await?;

    println!("{}", result.text);
    match result.duration_seconds {
        Some(secs) => println!("(language: {}, {secs:.1}s)", result.language),
        None => println!("(language: {})", result.language),
    }
    Ok(())
}

/// Synthesize and play text
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let client = build_client(config.request_timeout)?;
    let synthesizer = SynthesisClient::new(
        client,
        config.endpoints.url(Service::Synthesis),
        config.voice.tts_speed,
    );

    println!("Synthesizing speech...");
    let audio = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    play_and_wait(audio).await
}

/// Probe the backend services
async fn check_health(config: &Config) -> anyhow::Result<()> {
    let client = build_client(config.request_timeout)?;
    let report = health::check_services(&client, &config.endpoints).await;

    for service in &report {
        println!("{service}");
    }

    let unhealthy = report.iter().filter(|s| !s.is_healthy()).count();
    if unhealthy > 0 {
        anyhow::bail!("{unhealthy} service(s) unhealthy");
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CaptureController::new(Box::new(MicrophoneDevice::new()));
    capture.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let energy = capture.pump().unwrap_or_default();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {:.4} | [{}]", i + 1, energy, meter);
    }

    let clip = capture.stop().await?;

    println!("\n---");
    println!("Captured {} samples ({} bytes WAV)", clip.frames(), clip.bytes().len());
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

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    play_and_wait(samples_to_wav(&samples, sample_rate)?).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

async fn play_and_wait(audio: Vec<u8>) -> anyhow::Result<()> {
    let playback = PlaybackController::new(Arc::new(SpeakerSink::new()));
    let mut events = playback.subscribe();
    let handle = playback.play(audio);

    match wait_for_playback(&mut events, handle.utterance()).await {
        Some(message) => anyhow::bail!("playback failed: {message}"),
        None => Ok(()),
    }
}

/// Wait until an utterance ends, returning its error message if it failed
async fn wait_for_playback(
    events: &mut broadcast::Receiver<PlaybackEvent>,
    utterance: u64,
) -> Option<String> {
    loop {
        match events.recv().await {
            Ok(event) if event.utterance == utterance => match event.kind {
                PlaybackEventKind::Started => {}
                PlaybackEventKind::Ended => return None,
                PlaybackEventKind::Error(message) => return Some(message),
            },
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}
