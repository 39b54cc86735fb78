//! gridsense command-line interface.
//!
//! Replays a byte stream (a capture file or stdin) through the
//! streaming engine with the full conditioning and tracking stack, and
//! prints pose output as it is produced. Transports (BLE, serial) live
//! outside this tool: anything that can write bytes to a pipe can feed
//! it.
//!
//! # Usage
//!
//! ```bash
//! # List the available trackers and their parameters
//! gridsense --list-trackers
//!
//! # Replay a capture with EMA smoothing and the brute-force tracker
//! gridsense capture.txt --ema 0.2 --tracker BruteForce_16x2
//!
//! # Live serial session via a pipe, with mains notch and CSV recording
//! cat /dev/ttyUSB0 | gridsense - --sync --notch 60 --csv out.csv
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gridsense_engine::{EngineEvent, SessionOptions, StreamEngine, WeightsStatus};
use gridsense_signal::PipelineConfig;
use gridsense_tracking::registry;

/// Replay a gridsense byte stream through the conditioning pipeline and
/// position trackers.
#[derive(Parser, Debug)]
#[command(name = "gridsense")]
#[command(author, version, about)]
pub struct Cli {
    /// Input byte stream: a capture file, or '-' for stdin.
    #[arg(required_unless_present = "list_trackers")]
    pub input: Option<String>,

    /// Bytes per chunk handed to the engine.
    #[arg(long, default_value_t = 512, value_name = "BYTES")]
    pub chunk_bytes: usize,

    /// Discard everything before the first line terminator (serial
    /// streams commonly open mid-line).
    #[arg(long)]
    pub sync: bool,

    /// Enable the moving-average filter with this window length.
    #[arg(long, value_name = "WINDOW")]
    pub ma: Option<usize>,

    /// Enable the EMA filter with this coefficient.
    #[arg(long, value_name = "ALPHA")]
    pub ema: Option<f32>,

    /// Enable the notch filter at this centre frequency in Hz.
    #[arg(long, value_name = "HZ")]
    pub notch: Option<f64>,

    /// Stream sampling rate in Hz (notch design).
    #[arg(long, default_value_t = 200.0, value_name = "HZ")]
    pub fs: f64,

    /// Notch quality factor.
    #[arg(long, default_value_t = 30.0)]
    pub q: f64,

    /// Subtract the stored bias from conditioned frames.
    #[arg(long)]
    pub bias: bool,

    /// Frames to average when capturing a bias.
    #[arg(long, default_value_t = 200, value_name = "FRAMES")]
    pub bias_frames: usize,

    /// Capture a bias over the first `--bias-frames` frames of the
    /// stream.
    #[arg(long)]
    pub capture_bias: bool,

    /// Write the captured bias to this CSV when the replay ends.
    #[arg(long, value_name = "PATH")]
    pub save_bias: Option<PathBuf>,

    /// Evaluate the linear scoring head per frame.
    #[arg(long)]
    pub model: bool,

    /// Scalar bias of the linear head.
    #[arg(long, default_value_t = 0.0, value_name = "B")]
    pub model_bias: f32,

    /// One-line CSV of linear-head weights.
    #[arg(long, value_name = "PATH")]
    pub weights: Option<PathBuf>,

    /// Record conditioned frames to this CSV.
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Tracker to run, by registry id.
    #[arg(long, value_name = "ID")]
    pub tracker: Option<String>,

    /// Tracker parameter values, in schema order.
    #[arg(long, value_name = "V", num_args = 1.., allow_negative_numbers = true)]
    pub tracker_params: Vec<f64>,

    /// List the registered trackers and exit.
    #[arg(long)]
    pub list_trackers: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ma_enabled: self.ma.is_some(),
            ma_window: self.ma.unwrap_or(5),
            ema_enabled: self.ema.is_some(),
            ema_alpha: self.ema.unwrap_or(0.2),
            notch_enabled: self.notch.is_some(),
            sample_rate_hz: self.fs,
            notch_freq_hz: self.notch.unwrap_or(60.0),
            notch_q: self.q,
            bias_enabled: self.bias,
            model_enabled: self.model || self.weights.is_some(),
            model_bias: self.model_bias,
        }
    }
}

fn print_tracker_listing() {
    for info in registry::list() {
        println!("{} (N={}, M={})", info.id, info.channels, info.window);
        for (spec, default) in info.params.iter().zip(&info.defaults) {
            println!(
                "    {:<16} {:<20} [{} .. {}] default {}",
                spec.key, spec.label, spec.min, spec.max, default
            );
        }
    }
}

/// Run the CLI to completion.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.list_trackers {
        print_tracker_listing();
        return Ok(());
    }

    let input = cli.input.as_deref().context("no input stream given")?;

    let engine = StreamEngine::new();
    engine.set_pipeline_config(cli.pipeline_config());

    if let Some(id) = &cli.tracker {
        engine
            .select_tracker(id)
            .with_context(|| format!("tracker {id:?} is not registered"))?;
        if !cli.tracker_params.is_empty() {
            engine.set_tracker_params(&cli.tracker_params);
        }
    }

    engine.subscribe(|event| match event {
        EngineEvent::Pose(pose) => {
            let out = &pose.output;
            println!(
                "pose x={:+.4} y={:+.4} z={:+.4} conf={:.3} q1={:+.3e} q2={:+.3e} err={:.3e}{}{}",
                out.x,
                out.y,
                out.z,
                out.confidence,
                out.q1,
                out.q2,
                out.err,
                if out.quiet { " quiet" } else { "" },
                if out.valid { "" } else { " invalid" },
            );
        }
        EngineEvent::Stats(stats) if stats.total_samples > 0 => {
            info!(
                total = stats.total_samples,
                elapsed_secs = format!("{:.3}", stats.elapsed_secs),
                rate_1s = stats.last_second,
                dt_ms = format!("{:.3}", stats.last_dt_secs * 1e3),
                "stream"
            );
        }
        EngineEvent::Counters { ok, bad } if *bad > 0 => {
            info!(ok, bad, "frame counters");
        }
        EngineEvent::Status(text) => info!("{text}"),
        _ => {}
    });

    engine.open_session(SessionOptions {
        discard_first_line: cli.sync,
    });

    if let Some(path) = &cli.weights {
        match engine
            .load_weights(path)
            .with_context(|| format!("failed to load weights from {}", path.display()))?
        {
            WeightsStatus::Applied => info!("weights applied"),
            WeightsStatus::Pending => info!("weights pending until the stream latches"),
        }
    }

    if let Some(path) = &cli.csv {
        engine
            .start_csv(path)
            .with_context(|| format!("failed to open CSV sink {}", path.display()))?;
    }

    let mut reader: Box<dyn Read> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(input).with_context(|| format!("failed to open input {input:?}"))?)
    };

    let mut buf = vec![0_u8; cli.chunk_bytes.max(1)];
    let mut capture_pending = cli.capture_bias;
    loop {
        let n = reader.read(&mut buf).context("input read failed")?;
        if n == 0 {
            break;
        }
        engine.push_chunk(&buf[..n]);

        if capture_pending && engine.channel_count() > 0 {
            engine.begin_bias_capture(cli.bias_frames)?;
            capture_pending = false;
        }
    }

    engine.stop_csv();

    if let Some(path) = &cli.save_bias {
        engine
            .save_bias(path)
            .with_context(|| format!("failed to save bias to {}", path.display()))?;
        info!(path = %path.display(), "bias saved");
    }

    let (ok, bad) = engine.counters();
    engine.close_session();
    info!(ok, bad, "replay finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_mirrors_the_flags() {
        let cli = Cli::parse_from([
            "gridsense", "in.txt", "--ma", "8", "--notch", "50", "--fs", "250", "--bias",
        ]);
        let cfg = cli.pipeline_config();
        assert!(cfg.ma_enabled);
        assert_eq!(cfg.ma_window, 8);
        assert!(!cfg.ema_enabled);
        assert!(cfg.notch_enabled);
        assert_eq!(cfg.notch_freq_hz, 50.0);
        assert_eq!(cfg.sample_rate_hz, 250.0);
        assert!(cfg.bias_enabled);
        assert!(!cfg.model_enabled);
    }

    #[test]
    fn weights_flag_enables_the_model() {
        let cli = Cli::parse_from(["gridsense", "in.txt", "--weights", "w.csv"]);
        assert!(cli.pipeline_config().model_enabled);
    }

    #[test]
    fn input_is_required_without_list_trackers() {
        assert!(Cli::try_parse_from(["gridsense"]).is_err());
        assert!(Cli::try_parse_from(["gridsense", "--list-trackers"]).is_ok());
    }

    #[test]
    fn replay_runs_end_to_end() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        for i in 0..20 {
            let mut fields = Vec::new();
            for ch in 0..16 {
                fields.push(format!("{}", (i * ch) % 7));
            }
            writeln!(input, "{}", fields.join(",")).unwrap();
        }

        let csv = tempfile::NamedTempFile::new().unwrap();
        let cli = Cli::parse_from([
            "gridsense",
            input.path().to_str().unwrap(),
            "--ema",
            "0.5",
            "--tracker",
            "ExampleAlgo_16x1",
            "--csv",
            csv.path().to_str().unwrap(),
        ]);
        run(cli).unwrap();

        let text = std::fs::read_to_string(csv.path()).unwrap();
        assert!(text.starts_with("t,ch0,"));
        assert_eq!(text.lines().count(), 21); // header + 20 frames
    }

    #[test]
    fn unknown_tracker_fails() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "1,2,3").unwrap();
        let cli = Cli::parse_from([
            "gridsense",
            input.path().to_str().unwrap(),
            "--tracker",
            "NoSuchTracker",
        ]);
        assert!(run(cli).is_err());
    }
}
