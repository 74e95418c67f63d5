use std::{path::PathBuf, thread, time::Instant};

use aura_core::{
    generator, AudioClock, AudioDevice, BasicVoicing, EngineConfig, InstantClock, ManualClock,
    NoteQueue, PlaybackController, PlaybackState, SchedulerEvent, SongGenerator,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> aura_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Generate { seed } => run_generate(&config, seed.as_deref()),
        Commands::Share { seed } => {
            println!("{}", generator::share_fragment(&seed));
            Ok(())
        }
        Commands::Simulate(args) => run_simulate(&config, &args),
        Commands::Play { seed, seconds } => run_play(&config, seed.as_deref(), seconds),
    }
}

fn load_config(path: Option<&PathBuf>) -> aura_core::Result<EngineConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            EngineConfig::from_json_file(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn run_generate(config: &EngineConfig, seed: Option<&str>) -> aura_core::Result<()> {
    let song = SongGenerator::new(config.generator.clone()).generate(seed.unwrap_or_default());
    println!("{}", serde_json::to_string_pretty(&song)?);
    Ok(())
}

fn run_simulate(config: &EngineConfig, args: &SimulateArgs) -> aura_core::Result<()> {
    let clock = ManualClock::new();
    let device = AudioDevice::open(clock.clone(), &config.audio)?;
    let mut controller =
        PlaybackController::new(config, device, NoteQueue::new(), Box::new(BasicVoicing::new()));

    let song = controller.start_seed(args.seed.as_deref())?;
    tracing::info!(seed = %song.seed, tempo = song.tempo, "simulating");

    let step = controller.wake_interval().as_secs_f64();
    let mut elapsed = 0.0;
    let mut paused = false;
    let mut resumed = false;
    let mut skipped = false;

    while elapsed < args.seconds {
        if !paused && args.pause_at.is_some_and(|at| elapsed >= at) {
            paused = true;
            controller.pause();
            print_control("pause", elapsed, clock.now());
        }
        if paused && !resumed && args.resume_at.is_some_and(|at| elapsed >= at) {
            resumed = true;
            controller.resume()?;
            print_control("resume", elapsed, clock.now());
        }
        if !skipped && args.skip_at.is_some_and(|at| elapsed >= at) {
            skipped = true;
            let song = controller.skip_seed(args.skip_seed.as_deref())?;
            tracing::info!(seed = %song.seed, "skipped");
            print_control("skip", elapsed, clock.now());
        }

        for event in controller.tick()? {
            println!("{}", event_json(&event));
        }
        let now = clock.now();
        for note in controller.sink_mut().drain_due(now) {
            println!("{}", json!({ "kind": "note", "note": note }));
        }

        let skip_pending = !skipped && args.skip_at.is_some();
        if controller.state() == PlaybackState::Stopped && !skip_pending {
            break;
        }
        clock.advance(step);
        elapsed += step;
    }

    tracing::info!(
        generation = controller.generation(),
        position = ?controller.musical_position(),
        "simulation finished"
    );
    Ok(())
}

fn run_play(config: &EngineConfig, seed: Option<&str>, seconds: f64) -> aura_core::Result<()> {
    let device = AudioDevice::open(InstantClock::start(), &config.audio)?;
    let mut controller =
        PlaybackController::new(config, device, NoteQueue::new(), Box::new(BasicVoicing::new()));

    let song = controller.start_seed(seed)?;
    tracing::info!(
        seed = %song.seed,
        key = %song.key,
        scale = %song.scale_name,
        tempo = song.tempo,
        share = %generator::share_fragment(&song.seed),
        "now playing"
    );

    let started = Instant::now();
    let wake = controller.wake_interval();
    while started.elapsed().as_secs_f64() < seconds {
        for event in controller.tick()? {
            log_event(&event);
        }
        let now = controller.device().now();
        for note in controller.sink_mut().drain_due(now) {
            tracing::trace!(instrument = %note.instrument, pitch = note.pitch, "note");
        }
        if controller.state() == PlaybackState::Stopped {
            break;
        }
        thread::sleep(wake);
    }

    controller.stop();
    Ok(())
}

fn log_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::SectionChange { section, .. } => tracing::info!(
            section = %section.name,
            bars = section.duration_bars,
            intensity = section.intensity,
            "section"
        ),
        SchedulerEvent::ChordChange { chord, .. } => {
            tracing::info!(chord = %chord.symbol(), "chord")
        }
        SchedulerEvent::Beat(context) => {
            tracing::debug!(bar = context.bar, beat = context.beat, "beat")
        }
        SchedulerEvent::SongEnd { .. } => tracing::info!("song finished"),
    }
}

fn event_json(event: &SchedulerEvent) -> serde_json::Value {
    match event {
        SchedulerEvent::SectionChange {
            generation,
            time,
            section_index,
            section,
        } => json!({
            "kind": "section",
            "generation": generation,
            "time": time,
            "index": section_index,
            "section": section,
        }),
        SchedulerEvent::ChordChange {
            generation,
            time,
            chord_index,
            chord,
        } => json!({
            "kind": "chord",
            "generation": generation,
            "time": time,
            "index": chord_index,
            "chord": chord,
            "symbol": chord.symbol(),
        }),
        SchedulerEvent::Beat(context) => json!({
            "kind": "beat",
            "generation": context.generation,
            "time": context.time,
            "beatIndex": context.beat_index,
            "bar": context.bar,
            "beat": context.beat,
            "chordIndex": context.chord_index,
            "section": context.section,
            "intensity": context.intensity,
        }),
        SchedulerEvent::SongEnd { generation, time } => json!({
            "kind": "end",
            "generation": generation,
            "time": time,
        }),
    }
}

fn print_control(action: &str, elapsed: f64, clock: f64) {
    println!(
        "{}",
        json!({ "kind": "control", "action": action, "elapsed": elapsed, "clock": clock })
    );
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Seeded generative music engine", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing sections use their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the song a seed maps to as JSON.
    Generate {
        /// Seed to derive the song from. A fresh one is drawn when omitted.
        #[arg(short, long)]
        seed: Option<String>,
    },
    /// Print the shareable fragment for a seed.
    Share {
        #[arg(short, long)]
        seed: String,
    },
    /// Drive playback against a simulated clock and print every event as a
    /// JSON line.
    Simulate(SimulateArgs),
    /// Drive playback in real time, logging events as they are scheduled.
    Play {
        #[arg(short, long)]
        seed: Option<String>,
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 60.0)]
        seconds: f64,
    },
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(short, long)]
    seed: Option<String>,
    /// Simulated seconds to run for.
    #[arg(long, default_value_t = 30.0)]
    seconds: f64,
    /// Pause after this many simulated seconds.
    #[arg(long)]
    pause_at: Option<f64>,
    /// Resume after this many simulated seconds.
    #[arg(long, requires = "pause_at")]
    resume_at: Option<f64>,
    /// Skip to a new song after this many simulated seconds.
    #[arg(long)]
    skip_at: Option<f64>,
    /// Seed for the song skipped to. A fresh one is drawn when omitted.
    #[arg(long, requires = "skip_at")]
    skip_seed: Option<String>,
}
