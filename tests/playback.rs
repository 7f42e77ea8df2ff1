//! End-to-end playback over real PNG sequences and worker threads

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use flipbook::cli::Args;
use flipbook::core::event_bus::{FrameFailedEvent, FirstFrameReadyEvent};
use flipbook::core::session::SessionConfig;
use flipbook::entities::timeline::Track;
use flipbook::runner::run_app;
use flipbook::utils::sequences::detect_sequences;
use flipbook::{
    Budget, CacheState, EntryState, EventBus, Frame, FrameCache, FrameError, FrameLoader, FrameReference,
    PlaybackSession, SequenceLoader, StreamId, Timeline, Workers,
};

fn write_sequence(dir: &Path, name: &str, count: u64) -> Vec<PathBuf> {
    (0..count)
        .map(|n| {
            let path = dir.join(format!("{}.{:04}.png", name, n));
            RgbaImage::from_pixel(16, 8, Rgba([n as u8, 128, 0, 255]))
                .save(&path)
                .unwrap();
            path
        })
        .collect()
}

fn build(paths: Vec<PathBuf>, config: SessionConfig) -> (PlaybackSession<Frame>, StreamId) {
    let loader = Arc::new(SequenceLoader::new());
    let seq = detect_sequences(paths).unwrap().remove(0);
    let mut track = Track::new("main");
    let (stream, _) = loader.append_to_track(&mut track, seq);
    let mut timeline = Timeline::new();
    timeline.add_track(track);

    let workers = Arc::new(Workers::new(2));
    let session = PlaybackSession::<Frame>::new(Arc::new(timeline), loader, workers, config).unwrap();
    (session, stream)
}

/// Tick until `cond` holds or five seconds pass
fn tick_until(session: &mut PlaybackSession<Frame>, cond: impl Fn(&PlaybackSession<Frame>) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        session.tick();
        if cond(session) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn forward_playback_stays_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_sequence(dir.path(), "plate", 30);
    let config = SessionConfig {
        budget: Budget::Entries(8),
        window: 4,
        speed: 1,
        ..Default::default()
    };
    let (mut session, stream) = build(vec![paths[0].clone()], config);

    let first = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&first);
    session.events().subscribe::<FirstFrameReadyEvent, _>(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let frame_step = session.clock().frame_duration();
    for expected in 0..12i64 {
        assert!(tick_until(&mut session, |s| {
            s.cache().status(&FrameReference::new(stream, expected as u64)) == EntryState::Ready
        }));
        let out = session.tick();
        assert_eq!(out.frame, expected);
        assert!(out.layers[0].resource.is_some());

        let mut state = CacheState::default();
        session.dump_state(&mut state);
        assert!(state.used <= state.limit);
        assert!(state.ready + state.loading <= 8);

        assert!(session.advance(frame_step));
    }

    assert_eq!(first.load(Ordering::SeqCst), 1);
    // Early frames were evicted to make room
    assert_eq!(session.cache().status(&FrameReference::new(stream, 0)), EntryState::Empty);
}

#[test]
fn reverse_playback_prefetches_backward() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_sequence(dir.path(), "rev", 25);
    let config = SessionConfig {
        budget: Budget::Entries(16),
        window: 4,
        start_frame: Some(20),
        speed: -1,
        ..Default::default()
    };
    let (mut session, stream) = build(paths, config);

    let ready = |s: &PlaybackSession<Frame>| {
        (17..=20).all(|i| s.cache().status(&FrameReference::new(stream, i)) == EntryState::Ready)
    };
    assert!(tick_until(&mut session, ready));
    assert_eq!(session.cache().status(&FrameReference::new(stream, 21)), EntryState::Empty);
}

#[test]
fn corrupt_frame_fails_without_stalling() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_sequence(dir.path(), "bad", 6);
    std::fs::write(&paths[2], b"garbage").unwrap();

    let config = SessionConfig {
        budget: Budget::Bytes(1 << 20),
        window: 6,
        ..Default::default()
    };
    let (mut session, stream) = build(paths, config);

    let failures = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&failures);
    session.events().subscribe::<FrameFailedEvent, _>(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let broken = FrameReference::new(stream, 2);
    assert!(tick_until(&mut session, |s| {
        // Paused: window grows both ways from frame 0, so it covers 0..=3
        s.cache().status(&broken) == EntryState::Failed
            && s.cache().status(&FrameReference::new(stream, 3)) == EntryState::Ready
    }));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(session.cache().error(&broken).is_some());

    // Failed entries are not retried while they stay in the window
    for _ in 0..5 {
        session.tick();
    }
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    session.cue(2);
    let out = session.tick();
    assert_eq!(out.layers[0].state, EntryState::Failed);
    assert!(out.layers[0].resource.is_none());
}

#[test]
fn cue_moves_window_and_bumps_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_sequence(dir.path(), "seek", 40);
    let config = SessionConfig {
        budget: Budget::Entries(10),
        window: 5,
        ..Default::default()
    };
    let (mut session, stream) = build(paths, config);

    assert!(tick_until(&mut session, |s| {
        s.cache().status(&FrameReference::new(stream, 0)) == EntryState::Ready
    }));
    assert_eq!(session.cue(30), 30);
    assert!(tick_until(&mut session, |s| {
        (28..=32).all(|i| s.cache().status(&FrameReference::new(stream, i)) == EntryState::Ready)
    }));

    let mut state = CacheState::default();
    session.dump_state(&mut state);
    assert_eq!(state.epoch, 1);
    assert!(state.used <= state.limit);
}

/// Loader that holds every decode until the test opens the gate
struct GatedLoader {
    entered: Mutex<Sender<u64>>,
    gate: Mutex<Receiver<()>>,
}

impl FrameLoader for GatedLoader {
    type Resource = Frame;

    fn estimate_bytes(&self, _frame: &FrameReference) -> usize {
        8 * 8 * 4
    }

    fn load(&self, frame: &FrameReference) -> Result<Frame, FrameError> {
        self.entered.lock().unwrap().send(frame.index).ok();
        self.gate
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .map_err(|e| FrameError::Io(e.to_string()))?;
        Ok(Frame::placeholder(8, 8))
    }
}

#[test]
fn get_does_not_wait_for_decode_in_progress() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let loader = Arc::new(GatedLoader {
        entered: Mutex::new(entered_tx),
        gate: Mutex::new(gate_rx),
    });
    let cache = FrameCache::new(Budget::Entries(4), loader, Arc::new(Workers::new(1)), EventBus::new()).unwrap();

    let frame = FrameReference::new(StreamId::new(), 7);
    cache.prepare(&[frame]);
    assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);

    // A worker is inside load() now
    for _ in 0..100 {
        let start = Instant::now();
        assert!(cache.get(&frame).is_none());
        assert_eq!(cache.status(&frame), EntryState::Loading);
        cache.prepare(&[frame]);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    gate_tx.send(()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while cache.status(&frame) != EntryState::Ready && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(cache.get(&frame).is_some());
}

#[test]
fn headless_run_writes_state_and_settings() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_sequence(dir.path(), "run", 5);
    let config_dir = dir.path().join("config");
    let dump = dir.path().join("state.json");

    let args = Args {
        inputs: vec![paths[0].clone()],
        unlimited: true,
        refresh: Some(500.0),
        budget_frames: Some(8),
        workers: Some(2),
        dump_state: Some(dump.clone()),
        config_dir: Some(config_dir.clone()),
        save_settings: true,
        ..Default::default()
    };
    let summary = run_app(args).unwrap();

    assert!(summary.frames >= 5);
    assert!(config_dir.join("flipbook.json").exists());

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&dump).unwrap()).unwrap();
    assert_eq!(json["limit"], 8);
    assert_eq!(json["unit"], "entries");
}

#[test]
fn headless_run_without_inputs_fails() {
    let dir = tempfile::tempdir().unwrap();
    let args = Args {
        config_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    assert!(run_app(args).is_err());
}
