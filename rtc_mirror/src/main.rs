//! # RTC Mirror Harness
//!
//! Runs the actuator dispatch engine against the simulated DAC.
//!
//! Reads one TOML file holding the `[mirror]` open arguments and a
//! `[params]` parameter table, streams a ramp of demand vectors at a fixed
//! rate until `--frames` is reached or Ctrl-C, then closes the engine and
//! logs the dispatch statistics.
//!
//! ```toml
//! nacts = 4
//! channels = 32
//! adapter = "pd2ao"
//!
//! [logging]
//! level = "info"
//!
//! [mirror]
//! priority = 0
//!
//! [params]
//! nacts = { int = 4 }
//! nactPdao32 = { int = 4 }
//! actMin = { ushort = [0, 0, 0, 0] }
//! actMax = { ushort = [1000, 1000, 1000, 1000] }
//! # actInit, actMapping, actOffset, actScale, actSource and
//! # nactInitPdao32 must be present; empty arrays disable them.
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use rtc_common::config::{ConfigError, ConfigLoader, LoggingConfig};
use rtc_common::error_sink::ErrorLog;
use rtc_common::param::ParamBuffer;
use rtc_common::rt::{AbsoluteTimer, secs_to_ns};
use rtc_mirror::{AdapterModel, MirrorArgs, MirrorContext, MirrorEngine, SimulatedDac};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// RTC Mirror - actuator dispatch harness
#[derive(Parser, Debug)]
#[command(name = "rtc_mirror")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Streams synthetic demand through the actuator dispatch engine")]
struct Args {
    /// Harness configuration TOML.
    #[arg(long, value_name = "FILE", default_value = "config/mirror.toml")]
    config: PathBuf,

    /// Stop after this many frames (default: run until Ctrl-C).
    #[arg(long)]
    frames: Option<u64>,

    /// Demand frames per second.
    #[arg(long, default_value_t = 100.0)]
    rate_hz: f32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct HarnessConfig {
    #[serde(default)]
    logging: LoggingConfig,
    /// Demand vector length.
    nacts: usize,
    /// Simulated DAC channels.
    #[serde(default = "default_channels")]
    channels: u16,
    #[serde(default = "default_adapter")]
    adapter: AdapterModel,
    /// Module prefix sent to the socket peer.
    #[serde(default = "default_prefix")]
    prefix: String,
    #[serde(default)]
    mirror: MirrorArgs,
    params: ParamBuffer,
}

fn default_channels() -> u16 {
    32
}

fn default_adapter() -> AdapterModel {
    AdapterModel::Pd2Ao
}

fn default_prefix() -> String {
    "mirror".into()
}

impl HarnessConfig {
    /// Checks serde cannot express. Parameter contents are left to the
    /// engine.
    fn validate(&self, rate_hz: f32) -> Result<(), ConfigError> {
        if self.nacts == 0 {
            return Err(ConfigError::invalid("nacts", "must be at least 1"));
        }
        if self.channels == 0 {
            return Err(ConfigError::invalid("channels", "must be at least 1"));
        }
        if rate_hz.is_nan() || rate_hz <= 0.0 {
            return Err(ConfigError::invalid("rate_hz", format!("must be positive, got {rate_hz}")));
        }
        Ok(())
    }
}

fn main() {
    let args = Args::parse();
    let config = HarnessConfig::load(&args.config);
    setup_tracing(&args, config.as_ref().ok().map(|c| &c.logging));

    info!("RTC Mirror v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(|e| -> Box<dyn std::error::Error> {
            match e {
                ConfigError::NotFound(_) | ConfigError::Read { .. } => e.into(),
                e => format!("{}: {e}", args.config.display()).into(),
            }
        })
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("RTC Mirror shutdown complete");
}

fn run(args: &Args, config: HarnessConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate(args.rate_hz)?;
    let period_ns = secs_to_ns(1.0 / args.rate_hz);

    let dac = SimulatedDac::new(config.adapter, config.channels);
    let probe = dac.probe();
    let errors = Arc::new(ErrorLog::new());
    let ctx = MirrorContext {
        errors: errors.clone(),
        recorder: None,
        prefix: config.prefix,
    };
    let engine = MirrorEngine::open(
        &config.mirror,
        Box::new(dac),
        &config.params,
        ctx,
        config.nacts,
        0,
    )?;
    let active = engine.config();
    info!(
        dim = active.dim,
        hw_count = active.hw_count,
        stages = ?active.stages(),
        rate_hz = args.rate_hz,
        "streaming demand"
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let started = Instant::now();
    let mut timer = AbsoluteTimer::start()?;
    let mut demand = vec![0.0f32; config.nacts];
    let mut frame_no: u32 = 0;
    let mut sent: u64 = 0;
    let mut clipped: u64 = 0;

    while running.load(Ordering::SeqCst) && args.frames.is_none_or(|n| sent < n) {
        ramp(&mut demand, sent);
        match engine.send(&demand, frame_no, started.elapsed().as_secs_f64(), false, false) {
            Ok(n) => clipped += n as u64,
            Err(e) => warn!(frame_no, "{e}"),
        }
        sent += 1;
        frame_no = frame_no.wrapping_add(1);
        timer.sleep_for(period_ns)?;
    }

    engine.close();
    let stats = engine.stats();
    info!(
        frames = sent,
        clipped,
        dispatches = stats.dispatch_count,
        min_ns = if stats.dispatch_count > 0 { stats.min_ns } else { 0 },
        avg_ns = stats.avg_ns(),
        max_ns = stats.max_ns,
        dac_writes = probe.write_count(),
        reported_errors = errors.total(),
        "run complete"
    );
    if let Some(last) = errors.latest() {
        debug!(frame = last.frame, "last reported error: {}", last.message);
    }
    Ok(())
}

/// Sawtooth per actuator, phase-shifted by index.
fn ramp(demand: &mut [f32], frame: u64) {
    const PERIOD: u64 = 100;
    const STEP: f32 = 10.0;
    for (i, d) in demand.iter_mut().enumerate() {
        *d = ((frame + i as u64) % PERIOD) as f32 * STEP;
    }
}

fn setup_tracing(args: &Args, logging: Option<&LoggingConfig>) {
    let logging = logging.cloned().unwrap_or_default();
    let level = logging.effective_level(args.verbose);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if args.json || logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
