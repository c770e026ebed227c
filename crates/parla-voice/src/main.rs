//! `parla` - hands-free voice assistant on the default microphone and speaker.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parla_voice::{
    run_concurrent, CpalSource, Providers, RunMode, SpeechFilter, StopSignal, TurnPipeline,
    VoiceAssistant, VoiceConfig, VoiceResult,
};

/// Parla - talk to a local assistant, one turn at a time
#[derive(Parser)]
#[command(name = "parla", version, about)]
struct Cli {
    /// Config file (TOML); defaults to config/parla.toml when present
    #[arg(short, long, env = "PARLA_CONFIG")]
    config: Option<PathBuf>,

    /// Language profile code (e.g. en, it)
    #[arg(short, long)]
    language: Option<String>,

    /// Run capture and turn processing sequentially or on separate threads
    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, parla_voice=trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Non-speech frames tolerated before a turn ends
    #[arg(long)]
    silence_threshold: Option<u32>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List available language profiles and exit
    #[arg(long)]
    list_languages: bool,
}

impl Cli {
    fn apply(&self, config: &mut VoiceConfig) {
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(threshold) = self.silence_threshold {
            config.silence_threshold = Some(threshold);
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => VoiceConfig::load_from(Some(path)),
        None => VoiceConfig::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);
    init_tracing(&config.log_level);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    if cli.list_devices {
        return match CpalSource::list_input_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("{}", device);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to list input devices: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let registry = match config.profiles() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to load language profiles: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.list_languages {
        for code in registry.codes() {
            println!("{}", code);
        }
        return ExitCode::SUCCESS;
    }

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if stop.request() {
                    warn!("Second Ctrl-C, exiting without cleanup");
                    std::process::exit(130);
                }
                info!("Ctrl-C received, shutting down after the current step (again to force)");
            }
        });
    }

    let profile = registry.resolve(&config.language).clone();
    info!(language = %profile.code, mode = ?config.mode, "Starting parla");

    // Providers hold device handles that cannot cross threads, so they are
    // built on the blocking thread that runs the loop.
    let outcome = tokio::task::spawn_blocking(move || run(config, profile, &stop)).await;

    match outcome {
        Ok(Ok(())) => {
            info!("Goodbye");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(stage = e.stage(), "Voice loop failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Voice loop task panicked: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(
    config: VoiceConfig,
    profile: parla_voice::LanguageProfile,
    stop: &StopSignal,
) -> VoiceResult<()> {
    match config.mode {
        RunMode::Sequential => {
            let providers = Providers {
                audio: config.build_audio()?,
                detector: config.build_detector()?,
                transcriber: config.build_transcriber(&profile)?,
                generator: config.build_generator()?,
                sanitizer: Box::new(SpeechFilter::new()?),
                synthesizer: config.build_synthesizer()?,
            };
            let mut assistant = VoiceAssistant::new(providers, profile, config.assistant_config())?;
            assistant.run_until_stopped(stop)
        }
        RunMode::Concurrent => {
            let pipeline = TurnPipeline::new(
                config.build_transcriber(&profile)?,
                config.build_generator()?,
                Box::new(SpeechFilter::new()?),
                config.build_synthesizer()?,
                profile,
            )
            .with_speak_not_understood(config.speak_not_understood);
            let turn = config.turn_config();
            let capture_config = config.clone();
            let turns =
                run_concurrent(move || capture_config.build_capture(), pipeline, turn, stop)?;
            info!(turns, "Concurrent loop finished");
            Ok(())
        }
    }
}
