use clap::Parser;
use std::path::PathBuf;

// Build version with decoder info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Decode: image 0.25 (PNG, JPEG, TIFF, TGA, EXR, HDR)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless image sequence playback: prefetch, cache and clock
#[derive(Parser, Debug, Default)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Image files or sequence members to play (sequences play back to back)
    #[arg(value_name = "FILE")]
    pub inputs: Vec<PathBuf>,

    /// Additional files to load (can be specified multiple times)
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Frame rate, e.g. 24, 25, 29.97
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Initial playback speed (0 = paused, negative = reverse)
    #[arg(long = "speed", value_name = "N", allow_hyphen_values = true)]
    pub speed: Option<i32>,

    /// Prefetch window in frames
    #[arg(long = "window", value_name = "N")]
    pub window: Option<usize>,

    /// Start frame
    #[arg(long = "frame", value_name = "N", allow_hyphen_values = true)]
    pub start_frame: Option<i64>,

    /// Cache budget in megabytes
    #[arg(long = "budget-mb", value_name = "MB", conflicts_with = "budget_frames")]
    pub budget_mb: Option<usize>,

    /// Cache budget in frames
    #[arg(long = "budget-frames", value_name = "N")]
    pub budget_frames: Option<usize>,

    /// Cache budget as percent of available memory
    #[arg(long = "mem", value_name = "PERCENT")]
    pub mem_percent: Option<f64>,

    /// Loader threads (default: 3/4 of CPU cores)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Stop after this many seconds of wall time (default: one pass over the timeline)
    #[arg(long = "duration", value_name = "SECS")]
    pub duration: Option<f64>,

    /// Refresh rate of the playback loop in Hz
    #[arg(long = "refresh", value_name = "HZ")]
    pub refresh: Option<f64>,

    /// Advance exactly one frame per refresh instead of following wall time
    #[arg(long = "unlimited")]
    pub unlimited: bool,

    /// Stop at the end of the range instead of looping
    #[arg(long = "stop-at-end")]
    pub stop_at_end: bool,

    /// Write the final cache state as JSON to this file
    #[arg(long = "dump-state", value_name = "FILE")]
    pub dump_state: Option<PathBuf>,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the merged settings back to flipbook.json
    #[arg(long = "save-settings")]
    pub save_settings: bool,

    /// Enable logging to file (default: flipbook.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    /// Positional inputs followed by `-f` files
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.inputs.iter().chain(self.files.iter()).cloned().collect()
    }
}
