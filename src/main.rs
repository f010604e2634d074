use std::{
    fs,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand, arg};
use image::{Rgba, RgbaImage};
use log::{debug, error, info, warn};
use rand::{SeedableRng, rngs::StdRng};
use taller::{
    GameConfig, InMemoryStore, OrchestratorEvent, OrchestratorPhase, RaceOrchestrator,
    RegistrationSession, RngSource, SegmentationCanvas, SeriesFormat, SessionEvent, SessionState,
    TallerError,
    scenario::{ScenarioEntry, load_scenario},
    segmentation::{decode_and_scale, parse_lasso},
    writer,
};

const FRAME_MS: u64 = 16;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register every car of a scenario file and race them on a simulated track
    Simulate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        seed: Option<u64>,

        /// Race best of three with pit stops in between
        #[arg(long)]
        best_of: bool,

        /// Pace the simulation at display speed
        #[arg(long)]
        realtime: bool,
    },
    /// Cut a car out of a photo
    Cutout {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, requires = "seed_y")]
        seed_x: Option<u32>,

        #[arg(long, requires = "seed_x")]
        seed_y: Option<u32>,

        #[arg(short, long)]
        tolerance: Option<u32>,

        /// Polygon to keep, as space separated x,y pairs
        #[arg(short, long)]
        lasso: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write the configuration to the local config file
        #[arg(long)]
        save: bool,
    },
}

fn load_config() -> GameConfig {
    GameConfig::from_local_file().unwrap_or_default()
}

/// A plain car on a white background, used when a participant has no photo.
fn placeholder_car(height: u32, name: &str) -> RgbaImage {
    let width = height * 2;
    let hue = name.bytes().fold(0u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    let body = Rgba([hue, 255 - hue, 160, 255]);
    let white = Rgba([255, 255, 255, 255]);
    RgbaImage::from_fn(width, height, |x, y| {
        let in_body = x > width / 8 && x < width * 7 / 8 && y > height / 3 && y < height * 5 / 6;
        let in_cabin = x > width / 3 && x < width * 2 / 3 && y > height / 6 && y <= height / 3;
        if in_body || in_cabin { body } else { white }
    })
}

fn register(
    session: &mut RegistrationSession<InMemoryStore>,
    entry: &ScenarioEntry,
    config: &GameConfig,
) -> Result<String, TallerError> {
    session.set_name(&entry.name)?;
    match &entry.image {
        Some(path) => {
            let bytes = fs::read(path).map_err(|e| TallerError::ImageIOError { source: e })?;
            session.load_photo(&bytes)?;
        }
        None => session.load_image(placeholder_car(config.image_height_px, &entry.name))?,
    }
    if let Some(canvas) = session.canvas_mut() {
        canvas.flood_erase(0, 0, config.default_tolerance);
    }

    session.start_minigame();
    for _ in 0..entry.taps(&config.level_thresholds) {
        session.tap()?;
    }
    for _ in 0..config.minigame_duration_s {
        session.tick(Duration::from_secs(1))?;
    }
    session.submit()
}

fn print_event(event: &OrchestratorEvent) {
    match event {
        OrchestratorEvent::Paired { p1, p2 } => println!("{} vs {}", p1, p2),
        OrchestratorEvent::Countdown { label } => println!("  {}", label),
        OrchestratorEvent::RoundStarted { round, boosts } => {
            println!("  Round {} (boosts {:?})", round, boosts)
        }
        OrchestratorEvent::Positions { .. } => {}
        OrchestratorEvent::RoundWon {
            round,
            winner,
            score,
        } => println!("  {} takes round {} ({}-{})", winner, round, score[0], score[1]),
        OrchestratorEvent::PitStopOpened { .. } => println!("  PIT STOP"),
        OrchestratorEvent::PitStopClosed { boosts } => println!("  Boosts {:?}", boosts),
        OrchestratorEvent::RaceWon { winner, loser } => {
            println!("  WINNER: {} (beat {})", winner, loser)
        }
        OrchestratorEvent::Released => println!("  Track clear"),
    }
}

fn simulate(
    input: &Path,
    output: Option<PathBuf>,
    seed: Option<u64>,
    best_of: bool,
    realtime: bool,
) -> Result<(), TallerError> {
    let mut config = load_config();
    if best_of {
        config.series_format = SeriesFormat::BestOf { wins_needed: 2 };
    }
    let entries = load_scenario(input)?;

    let store = InMemoryStore::new();
    let random = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut orchestrator = RaceOrchestrator::new(store.clone(), RngSource(random), config.clone())?;

    let mut participants = Vec::new();
    for entry in &entries {
        let mut session = RegistrationSession::new(store.clone(), config.clone());
        match register(&mut session, entry, &config) {
            Ok(id) => {
                debug!("{} registered as {}", entry.name, id);
                participants.push((entry, session));
            }
            Err(e) if e.is_user_input() => warn!("Skipping {}: {}", entry.name, e),
            Err(e) => error!("Could not register {}: {}", entry.name, e),
        }
    }

    // events also go to the output file when there is one
    let (event_tx, writer_handle) = match output {
        Some(output_file) => {
            let (tx, rx) = mpsc::channel::<OrchestratorEvent>();
            let handle = thread::spawn(move || writer::write_events(&output_file, rx));
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let frame = Duration::from_millis(FRAME_MS);
    loop {
        for event in orchestrator.tick(frame)? {
            print_event(&event);
            if let Some(tx) = &event_tx
                && tx.send(event).is_err()
            {
                warn!("Event writer stopped, events are no longer recorded");
            }
        }

        for (entry, session) in participants.iter_mut() {
            for event in session.tick(frame)? {
                debug!("{}: {:?}", entry.name, event);
                if event == SessionEvent::PitStopOpened {
                    for _ in 0..entry.boost_taps {
                        session.tap()?;
                    }
                }
            }
        }

        let on_track = participants.iter().any(|(_, session)| {
            matches!(
                session.state(),
                SessionState::Racing { .. }
                    | SessionState::Boost { .. }
                    | SessionState::Releasing { .. }
            )
        });
        if orchestrator.phase() == OrchestratorPhase::Lobby
            && orchestrator.waiting().len() < 2
            && !on_track
        {
            break;
        }
        if realtime {
            thread::sleep(frame);
        }
    }

    if let Some(car) = orchestrator.waiting().first() {
        println!("{} is still waiting for a rival", car.name);
    }
    println!("Recent results:");
    for result in orchestrator.history() {
        println!("  {} beat {}", result.winner.name, result.loser.name);
    }

    drop(event_tx);
    if let Some(handle) = writer_handle {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => warn!("Event writer thread panicked"),
        }
    }
    Ok(())
}

fn cutout(
    input: &Path,
    output: &Path,
    seed: Option<(u32, u32)>,
    tolerance: Option<u32>,
    lasso: Option<&str>,
) -> Result<(), TallerError> {
    let config = load_config();
    let bytes = fs::read(input).map_err(|e| TallerError::ImageIOError { source: e })?;
    let image = decode_and_scale(&bytes, config.image_height_px, config.image_max_width_px)?;
    let mut canvas = SegmentationCanvas::new(image, config.undo_depth);

    if let Some(path) = lasso {
        let polygon = parse_lasso(path)?;
        if !canvas.lasso_cut(&polygon) {
            warn!("Lasso needs at least 3 points, skipping it");
        }
    }
    if let Some((x, y)) = seed {
        let tolerance = tolerance.unwrap_or(config.default_tolerance);
        if !canvas.flood_erase(x, y, tolerance) {
            warn!("Nothing to erase at {},{}", x, y);
        }
    }

    canvas
        .image()
        .save(output)
        .map_err(|e| TallerError::ImageEncode { source: e })?;
    info!("Wrote {:?}", output);
    Ok(())
}

fn config(save: bool) -> Result<(), TallerError> {
    let config = load_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| TallerError::ConfigSerializeError { source: e })?;
    println!("{}", json);
    if save {
        config.save()?;
    }
    Ok(())
}

fn main() {
    let cli = Args::parse();

    if cli.verbose {
        colog::default_builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        #[cfg(debug_assertions)]
        colog::init();
    }

    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    match &cli.command {
        Commands::Simulate {
            input,
            output,
            seed,
            best_of,
            realtime,
        } => simulate(input, output.clone(), *seed, *best_of, *realtime)
            .expect("Error while running simulation"),
        Commands::Cutout {
            input,
            output,
            seed_x,
            seed_y,
            tolerance,
            lasso,
        } => cutout(
            input,
            output,
            seed_x.zip(*seed_y),
            *tolerance,
            lasso.as_deref(),
        )
        .expect("Error while cutting out image"),
        Commands::Config { save } => config(*save).expect("Error while handling config"),
    };
}
