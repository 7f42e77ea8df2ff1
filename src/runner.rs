//! Application runner: headless playback loop driven from the CLI
//!
//! Builds a timeline from the input files (sequences play back to back on
//! one track), then refreshes the session at the configured rate until the
//! run ends, logging cache state every stats interval.

use anyhow::{bail, Context, Result};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::Args;
use crate::core::clock::{EndBehavior, FrameRate};
use crate::core::event_bus::{FrameFailedEvent, FrameReadyEvent};
use crate::core::frame_cache::{CacheState, EntryState};
use crate::core::session::PlaybackSession;
use crate::core::stats::Metronome;
use crate::core::workers::Workers;
use crate::entities::frame::Frame;
use crate::entities::loader::SequenceLoader;
use crate::entities::timeline::{Timeline, Track};
use crate::paths::{self, PathConfig};
use crate::settings::{PlaybackSettings, SETTINGS_FILE};
use crate::utils::sequences::detect_sequences;

/// What a run did, logged at the end
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    /// Frame changes of the clock
    pub frames: u64,
    /// Ticks where some layer had nothing to show yet
    pub starved_ticks: u64,
    pub loaded: u64,
    pub failed: u64,
    pub final_frame: i64,
    pub elapsed_secs: f64,
}

/// Run flipbook with given arguments
pub fn run_app(args: Args) -> Result<RunSummary> {
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        warn!("Failed to create application directories: {:#}", e);
    }

    let settings_path = paths::config_file(SETTINGS_FILE, &path_config);
    info!("Config path: {}", settings_path.display());
    trace!("Command-line args: {:?}", args);

    let mut settings = PlaybackSettings::load(&settings_path)?;
    apply_args(&mut settings, &args)?;
    if args.save_settings {
        settings.save(&settings_path)?;
    }
    debug!("Effective settings: {:?}", settings);

    let files = args.all_files();
    if files.is_empty() {
        bail!("No input files given");
    }
    let sequences = detect_sequences(files).context("Sequence detection failed")?;
    if sequences.is_empty() {
        bail!("No playable image files among the inputs");
    }

    let loader = Arc::new(SequenceLoader::new());
    let mut track = Track::new("main");
    for seq in sequences {
        let name = seq.pattern();
        let (stream, start) = loader.append_to_track(&mut track, seq);
        info!("Clip {} at frame {} (stream {})", name, start, stream);
    }
    let mut timeline = Timeline::new();
    timeline.add_track(track);

    let workers = Arc::new(Workers::new(settings.worker_threads()));
    let config = settings.session_config(args.start_frame)?;
    let mut session = PlaybackSession::<Frame>::new(Arc::new(timeline), loader, workers, config)
        .context("Cannot start playback session")?;

    let summary = play(&mut session, &settings, &args);

    let mut state = CacheState::default();
    session.dump_state(&mut state);
    info!("Final state: {}", state);
    info!(
        "Played {} frames in {:.2}s ({} ticks, {} starved), loaded={} failed={}",
        summary.frames,
        summary.elapsed_secs,
        summary.ticks,
        summary.starved_ticks,
        summary.loaded,
        summary.failed
    );

    if let Some(path) = &args.dump_state {
        let json = serde_json::to_string_pretty(&state).context("Failed to serialize cache state")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state dump: {}", path.display()))?;
        info!("Cache state written to {}", path.display());
    }

    Ok(summary)
}

/// CLI flags override persisted settings
pub fn apply_args(settings: &mut PlaybackSettings, args: &Args) -> Result<()> {
    if let Some(fps) = args.fps {
        let rate = FrameRate::from_fps(fps).with_context(|| format!("Invalid --fps {}", fps))?;
        settings.fps_num = rate.num;
        settings.fps_den = rate.den;
    }
    if let Some(speed) = args.speed {
        settings.speed = speed;
    }
    if let Some(window) = args.window {
        settings.window = window;
    }
    if let Some(workers) = args.workers {
        settings.workers = workers.max(1);
    }
    if let Some(hz) = args.refresh {
        settings.refresh_hz = hz;
    }
    if let Some(percent) = args.mem_percent {
        settings.budget.mem_percent = percent;
        settings.budget.bytes = None;
        settings.budget.entries = None;
    }
    if let Some(mb) = args.budget_mb {
        settings.budget.bytes = Some(mb * 1024 * 1024);
        settings.budget.entries = None;
    }
    if let Some(frames) = args.budget_frames {
        settings.budget.entries = Some(frames);
    }
    if args.stop_at_end {
        settings.end = EndBehavior::Stop;
    }
    Ok(())
}

/// Refresh loop. Without `--duration` it runs one pass over the range,
/// or until the playhead settles when paused.
fn play(session: &mut PlaybackSession<Frame>, settings: &PlaybackSettings, args: &Args) -> RunSummary {
    let refresh = settings.refresh_interval();
    let stats_interval = settings.stats_interval();
    let limit = args.duration.map(Duration::from_secs_f64);
    let pass = session.range().frame_count() as f64;

    let loaded = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    {
        let loaded = Arc::clone(&loaded);
        session.events().subscribe::<FrameReadyEvent, _>(move |_| {
            loaded.fetch_add(1, Ordering::Relaxed);
        });
        let failed = Arc::clone(&failed);
        session.events().subscribe::<FrameFailedEvent, _>(move |e| {
            failed.fetch_add(1, Ordering::Relaxed);
            warn!("Frame {} failed: {}", e.frame, e.error);
        });
    }

    let mut vblank = Metronome::new("vblank");
    let mut shown = Metronome::new("frame");
    let mut loads = Metronome::new("load");
    let mut loads_seen = 0u64;
    let mut state = CacheState::default();
    let mut summary = RunSummary::default();

    let start = Instant::now();
    let mut last_stats = start;
    let mut last_advance = start;

    loop {
        let tick_start = Instant::now();
        let out = session.tick();
        vblank.tick();
        summary.ticks += 1;
        if out.missing() > 0 {
            summary.starved_ticks += 1;
        }
        if out.first_frame_ready {
            info!("First frame ready at {} after {:.1} ms", out.frame, start.elapsed().as_secs_f64() * 1000.0);
        }

        if last_stats.elapsed() >= stats_interval {
            let total = loaded.load(Ordering::Relaxed);
            loads.add(total - loads_seen);
            loads_seen = total;
            session.dump_state(&mut state);
            info!(
                "frame {} | {} | {}: {:.1}/s {}: {:.1}/s {}: {:.1}/s",
                out.frame,
                state,
                vblank.name(),
                vblank.compute(),
                shown.name(),
                shown.compute(),
                loads.name(),
                loads.compute()
            );
            last_stats = Instant::now();
        }

        let done = match limit {
            Some(limit) => start.elapsed() >= limit,
            None if session.speed() == 0 => out.layers.iter().all(|l| l.state != EntryState::Loading),
            // One pass of media time, which also ends single-frame loops
            None => session.clock().playback_time().abs() * session.clock().rate().fps() >= pass,
        };
        if done {
            break;
        }

        std::thread::sleep(refresh.saturating_sub(tick_start.elapsed()));

        let now = Instant::now();
        let step = if args.unlimited {
            session.clock().frame_duration()
        } else {
            now - last_advance
        };
        last_advance = now;
        if session.advance(step) {
            shown.tick();
            summary.frames += 1;
        }
    }

    summary.loaded = loaded.load(Ordering::Relaxed);
    summary.failed = failed.load(Ordering::Relaxed);
    summary.final_frame = session.display_index();
    summary.elapsed_secs = start.elapsed().as_secs_f64();
    summary
}
