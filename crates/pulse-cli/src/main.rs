use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_lib::{
    config::PipelineConfig,
    detectors::{ppg::extract_hrv_from_ppg, respiration::estimate_respiration_rate},
    driver::{replay, Recording},
    io::text as text_io,
    metrics::{
        amplitude::{estimate_ia, AmplitudeInput, BandAmplitudes},
        hrv::{bpm_from_rr, hrv_time, lf_hf_ratio, rmssd, session_heart_rate, HRVTime},
    },
    outcome::Estimate,
    signal::{RRSeries, TimeSeries},
    stress::{
        determine_stress_state, estimate_stress_level, validate_value, Quadrant, StressLevel,
        StressState,
    },
};
use serde::Serialize;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "Heart rate, HRV, respiration and stress estimation from PPG and audio"
)]
struct Cli {
    /// TOML file overriding pipeline defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session (PPG CSV plus optional audio amplitudes) and print the assessment
    Analyze {
        /// CSV with a `timestamp_ms,value` header
        #[arg(long)]
        ppg: PathBuf,
        /// Newline-delimited audio amplitudes at the respiration polling cadence
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Stop this many ms after the first PPG sample (capped by auto-stop)
        #[arg(long)]
        stop_at_ms: Option<u64>,
        /// Leave the scatter trail out of the output
        #[arg(long)]
        no_scatter: bool,
    },
    /// Extract RR intervals and HRV from uniformly sampled PPG read from stdin or --input file
    PpgRr {
        #[arg(long, default_value_t = 30.0)]
        fs: f64,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Heart rate, HRV and LF/HF amplitudes from newline-delimited RR intervals (ms)
    RrMetrics {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Breathing rate from newline-delimited audio amplitudes
    Respiration {
        #[arg(long)]
        interval_ms: Option<f64>,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Classify LF/HF amplitudes, heart rate and RMSSD into stress state and level
    Classify {
        #[arg(long)]
        lf: f64,
        #[arg(long)]
        hf: f64,
        #[arg(long)]
        hr: f64,
        #[arg(long)]
        rmssd: f64,
        /// Signal quality score in [0, 1]
        #[arg(long)]
        quality: Option<f64>,
    },
    /// Print the effective pipeline configuration as TOML
    PrintConfig,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = match cli.config.as_deref() {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    match cli.command {
        Commands::Analyze {
            ppg,
            audio,
            stop_at_ms,
            no_scatter,
        } => cmd_analyze(&cfg, &ppg, audio.as_deref(), stop_at_ms, no_scatter)?,
        Commands::PpgRr { fs, input } => cmd_ppg_rr(&cfg, fs, input.as_deref())?,
        Commands::RrMetrics { input } => cmd_rr_metrics(&cfg, input.as_deref())?,
        Commands::Respiration { interval_ms, input } => {
            cmd_respiration(&cfg, interval_ms, input.as_deref())?
        }
        Commands::Classify {
            lf,
            hf,
            hr,
            rmssd,
            quality,
        } => cmd_classify(&cfg, lf, hf, hr, rmssd, quality)?,
        Commands::PrintConfig => print!("{}", cfg.to_toml_string()?),
    }
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_f64_series(&buf)
        }
    }
}

fn cmd_analyze(
    cfg: &PipelineConfig,
    ppg: &Path,
    audio: Option<&Path>,
    stop_at_ms: Option<u64>,
    no_scatter: bool,
) -> Result<()> {
    let recording = Recording {
        ppg: text_io::read_ppg_csv(ppg)?,
        audio: match audio {
            Some(path) => text_io::read_f64_series(path)?,
            None => Vec::new(),
        },
    };
    log::info!(
        "replaying {} ppg and {} audio samples",
        recording.ppg.len(),
        recording.audio.len()
    );
    let mut outcome = replay(&recording, cfg, stop_at_ms).context("session failed")?;
    if no_scatter {
        outcome.scatter.clear();
    }
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

fn cmd_ppg_rr(cfg: &PipelineConfig, fs: f64, input: Option<&Path>) -> Result<()> {
    if !(fs.is_finite() && fs > 0.0) {
        anyhow::bail!("--fs must be positive, got {fs}");
    }
    let ts = TimeSeries::new(fs, read_samples(input)?);
    let result = extract_hrv_from_ppg(&ts, &cfg.offline);
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

#[derive(Serialize)]
struct RrMetrics {
    hrv: HRVTime,
    rmssd_ms: Estimate<u32>,
    heart_rate_bpm: Estimate<u32>,
    ia: Estimate<BandAmplitudes>,
    lf_hf_ratio: Estimate<f64>,
}

fn cmd_rr_metrics(cfg: &PipelineConfig, input: Option<&Path>) -> Result<()> {
    let rr = RRSeries::new(read_samples(input)?);
    let bpm: Vec<u32> = rr.rr.iter().filter_map(|&r| bpm_from_rr(r)).collect();
    let ia = estimate_ia(AmplitudeInput::RrIntervals(&rr.rr), &cfg.amplitude);
    let amplitudes = ia.value();
    let metrics = RrMetrics {
        hrv: hrv_time(&rr),
        rmssd_ms: rmssd(&rr.rr),
        heart_rate_bpm: session_heart_rate(&bpm),
        lf_hf_ratio: lf_hf_ratio(amplitudes.lf, amplitudes.hf),
        ia,
    };
    println!("{}", serde_json::to_string(&metrics)?);
    Ok(())
}

#[derive(Serialize)]
struct RespirationOutput {
    samples: usize,
    respiration_rate: pulse_lib::detectors::respiration::RespirationRate,
}

fn cmd_respiration(
    cfg: &PipelineConfig,
    interval_ms: Option<f64>,
    input: Option<&Path>,
) -> Result<()> {
    let audio = read_samples(input)?;
    let mut rcfg = cfg.respiration;
    if let Some(ms) = interval_ms {
        rcfg.interval_ms = ms;
    }
    let out = RespirationOutput {
        samples: audio.len(),
        respiration_rate: estimate_respiration_rate(&audio, &rcfg),
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

#[derive(Serialize)]
struct Classification {
    lf: f64,
    hf: f64,
    lf_hf_ratio: f64,
    quadrant: Quadrant,
    stress_state: StressState,
    stress_level: StressLevel,
    label: &'static str,
}

fn cmd_classify(
    cfg: &PipelineConfig,
    lf: f64,
    hf: f64,
    hr: f64,
    rmssd: f64,
    quality: Option<f64>,
) -> Result<()> {
    let t = &cfg.stress;
    let lf = validate_value(lf, &t.lf).value();
    let hf = validate_value(hf, &t.hf).value();
    let hr = validate_value(hr, &t.heart_rate).value();
    let rmssd = validate_value(rmssd, &t.rmssd).value();
    let ratio = lf_hf_ratio(lf, hf).value();
    let stress_level = estimate_stress_level(rmssd, ratio, lf, hf, quality, t);
    let out = Classification {
        lf,
        hf,
        lf_hf_ratio: ratio,
        quadrant: Quadrant::classify(lf, hf, t),
        stress_state: determine_stress_state(lf, hf, hr, rmssd, t),
        label: stress_level.label(),
        stress_level,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}
