mod config;
mod detector;
mod scene;
mod source;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use facegate_tracker::config::{load_config, LoggingConfig};
use facegate_tracker::messaging::{AttendanceApiClient, AttendanceSink};
use facegate_tracker::storage::{EmbeddingKind, MemoryStore, Store};
use facegate_tracker::{Collaborators, TrackerSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{SimulationSettings, SimulatorConfig};
use detector::{identity_embedding, SimulatedDetectorFactory};
use scene::Scene;
use source::SimulatedSource;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives the face tracker with synthetic cameras and walkers")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/simulator.yaml")]
    config: String,

    /// Log level, overriding `tracker.logging.level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Overrides the configured run time
    #[arg(short, long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config: SimulatorConfig = load_config(&args.config, "FACEGATE")?;
    init_logging(log_level(args.log_level.as_deref(), &config.tracker.logging))?;

    if let Some(duration) = args.duration_secs {
        config.simulation.duration_secs = duration;
    }
    config.tracker.pipeline.embedding_dim = config.simulation.embedding_dim;

    let runtime = tokio::runtime::Runtime::new()?;
    let store = Arc::new(seed_store(&config.simulation)?);
    let scene = Arc::new(Scene::new(&config.simulation));

    let attendance = if config.tracker.attendance_api.enabled {
        let client: Arc<dyn AttendanceSink> =
            Arc::new(AttendanceApiClient::new(config.tracker.attendance_api.clone())?);
        Some((client, runtime.handle().clone()))
    } else {
        None
    };

    let tracker = TrackerSupervisor::new(
        config.tracker.clone(),
        Collaborators {
            store: store.clone(),
            frame_source: Arc::new(SimulatedSource::new(Arc::clone(&scene))),
            detectors: Arc::new(SimulatedDetectorFactory::new(scene, &config.simulation)),
            attendance,
        },
    )?;

    let started = tracker.start_all();
    info!(
        started,
        duration_secs = config.simulation.duration_secs,
        index_size = tracker.index_size(),
        "Simulation running"
    );

    runtime.block_on(run_until_done(&tracker, Duration::from_secs(config.simulation.duration_secs)));

    tracker.shutdown();
    print_report(&tracker, store.as_ref(), &config.simulation)?;
    Ok(())
}

fn log_level<'a>(cli: Option<&'a str>, configured: &'a LoggingConfig) -> &'a str {
    cli.unwrap_or(&configured.level)
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))?;
    Ok(())
}

/// Builds the store the tracker starts from: cameras, tuning settings and
/// one enrollment embedding per person.
fn seed_store(settings: &SimulationSettings) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    for camera in &settings.cameras {
        store.add_camera(camera.clone())?;
    }
    for (key, value) in &settings.settings {
        store.set_setting(key, value.clone());
    }
    for person in &settings.people {
        let user_id = store.add_user(&person.identity, &person.name);
        let reference = identity_embedding(settings.seed, &person.identity, settings.embedding_dim);
        store.add_face_embedding(user_id, &reference, EmbeddingKind::Enrollment)?;
    }
    Ok(store)
}

async fn run_until_done(tracker: &TrackerSupervisor, duration: Duration) {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Interrupted");
                break;
            }
            _ = progress.tick() => log_progress(tracker),
        }
    }
}

fn log_progress(tracker: &TrackerSupervisor) {
    for camera_id in tracker.camera_ids() {
        let Some(snapshot) = tracker.latest_tracking_snapshot(camera_id) else {
            continue;
        };
        info!(camera_id, faces = snapshot.len(), identities = ?snapshot.identities, "Tracking");
    }
}

fn print_report(tracker: &TrackerSupervisor, store: &MemoryStore, settings: &SimulationSettings) -> Result<()> {
    println!("\n=== Attendance ===");
    for person in &settings.people {
        let Some(user) = store.find_user(&person.identity)? else {
            continue;
        };
        let records = store.attendance_for_user(user.user_id, 20)?;
        println!("{} ({}): {} events", person.name, person.identity, records.len());
        for record in records.iter().rev() {
            println!(
                "  {}  camera {}  {:<9}  {}",
                record.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                record.camera_id,
                record.event_type.as_str(),
                record.tripwire
            );
        }
    }

    println!("\n=== Metrics ===");
    print!("{}", tracker.metrics_text()?);
    Ok(())
}
