//! Fab telemetry simulation.
//!
//! Generates realistic wafer-process telemetry for the three production
//! lines and emits it as intake frames, either on stdout (pipe mode) or
//! over TCP to subscribed gateways (broker mode).
//!
//! # Usage
//! ```bash
//! # Pipe mode
//! fabsentry-simulate --count 50 --interval-ms 200 | fabsentry --stdin
//!
//! # Broker mode
//! fabsentry-simulate --serve 127.0.0.1:1883 &
//! fabsentry --intake 127.0.0.1:1883
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};

use fabsentry::config::IntakeConfig;
use fabsentry::types::{ProductionLine, TelemetryEvent};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fabsentry-simulate")]
#[command(about = "Wafer telemetry simulation for FabSentry testing")]
#[command(version)]
struct Args {
    /// Wafers to emit per production line (0 = run until interrupted)
    #[arg(short, long, default_value = "20")]
    count: u64,

    /// Delay between rounds of frames, one frame per line per round
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Fraction of wafers generated with a defect signature
    #[arg(long, default_value = "0.08")]
    defect_rate: f64,

    /// Random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Serve frames over TCP at this address instead of stdout
    #[arg(long, value_name = "HOST:PORT")]
    serve: Option<String>,

    /// Occasionally emit malformed payloads (decoder robustness testing)
    #[arg(long)]
    with_garbage: bool,
}

// ============================================================================
// Per-line process profiles
// ============================================================================

/// Nominal operating point for one production line's tool. Readings are
/// sampled around these with Gaussian noise; a defect signature pushes
/// the contamination-sensitive channels off-nominal.
struct LineProfile {
    line: ProductionLine,
    chamber_temperature: f64,
    gas_flow_rate: f64,
    rf_power: f64,
    etch_depth: f64,
    rotation_speed: f64,
    vacuum_pressure: f64,
    uv_exposure_intensity: f64,
}

impl LineProfile {
    fn for_line(line: ProductionLine) -> Self {
        match line {
            ProductionLine::Lithography => Self {
                line,
                chamber_temperature: 68.0,
                gas_flow_rate: 95.0,
                rf_power: 1200.0,
                etch_depth: 1.2,
                rotation_speed: 2400.0,
                vacuum_pressure: 0.0018,
                uv_exposure_intensity: 420.0,
            },
            ProductionLine::Etching => Self {
                line,
                chamber_temperature: 72.5,
                gas_flow_rate: 118.0,
                rf_power: 1480.0,
                etch_depth: 2.9,
                rotation_speed: 3050.0,
                vacuum_pressure: 0.0021,
                uv_exposure_intensity: 15.0,
            },
            ProductionLine::Deposition => Self {
                line,
                chamber_temperature: 81.0,
                gas_flow_rate: 140.0,
                rf_power: 1650.0,
                etch_depth: 0.4,
                rotation_speed: 2800.0,
                vacuum_pressure: 0.0012,
                uv_exposure_intensity: 8.0,
            },
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

struct TelemetryGenerator {
    rng: StdRng,
    defect_rate: f64,
    sequence: u64,
}

impl TelemetryGenerator {
    fn new(seed: Option<u64>, defect_rate: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            defect_rate,
            sequence: 0,
        }
    }

    fn noisy(&mut self, mean: f64, sd: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + sd * z
    }

    fn next_event(&mut self, profile: &LineProfile) -> TelemetryEvent {
        self.sequence += 1;
        let defective = self.rng.gen_bool(self.defect_rate);

        // Defect signatures show up as contamination and mechanical drift,
        // not wholesale process failure.
        let particle_count = if defective {
            (self.noisy(120.0, 30.0).max(60.0)) as i64
        } else {
            (self.noisy(12.0, 5.0).max(0.0)) as i64
        };
        let stage_alignment_error = if defective {
            self.noisy(0.085, 0.02).max(0.05)
        } else {
            self.noisy(0.012, 0.004).abs()
        };
        let vibration_level = if defective {
            self.noisy(1.8, 0.4).max(1.0)
        } else {
            self.noisy(0.4, 0.1).abs()
        };
        let join_status = if defective && self.rng.gen_bool(0.5) {
            "Rework"
        } else {
            "OK"
        };

        TelemetryEvent {
            process_id: format!("P-{:05}", self.sequence),
            timestamp: Utc::now(),
            production_line: profile.line,
            wafer_id: format!(
                "W{}-{:04}",
                profile.line.as_str().chars().next().unwrap_or('X'),
                self.sequence
            ),
            chamber_temperature: self.noisy(profile.chamber_temperature, 1.5),
            gas_flow_rate: self.noisy(profile.gas_flow_rate, 4.0),
            rf_power: self.noisy(profile.rf_power, 35.0),
            etch_depth: self.noisy(profile.etch_depth, 0.08).abs(),
            rotation_speed: self.noisy(profile.rotation_speed, 60.0),
            vacuum_pressure: self.noisy(profile.vacuum_pressure, 0.0002).abs(),
            stage_alignment_error,
            vibration_level,
            uv_exposure_intensity: self.noisy(profile.uv_exposure_intensity, 10.0).abs(),
            particle_count,
            join_status: join_status.to_string(),
            actual_defect: Some(defective),
        }
    }
}

/// Wire form of one frame: `PUB <topic> <json>`.
fn render_frame(topic: &str, event: &TelemetryEvent) -> Result<String> {
    let payload = serde_json::to_string(event).context("serialize event")?;
    Ok(format!("PUB {topic} {payload}"))
}

// ============================================================================
// Output modes
// ============================================================================

async fn run_stdout(args: &Args, topics: &IntakeConfig) -> Result<()> {
    let mut gen = TelemetryGenerator::new(args.seed, args.defect_rate);
    let profiles: Vec<LineProfile> = ProductionLine::ALL
        .into_iter()
        .map(LineProfile::for_line)
        .collect();
    let stdout = std::io::stdout();

    let mut round = 0u64;
    loop {
        if args.count > 0 && round >= args.count {
            break;
        }
        round += 1;

        let mut out = stdout.lock();
        for profile in &profiles {
            let Some(topic) = topics.topic_for_line(profile.line) else {
                continue;
            };
            let event = gen.next_event(profile);
            writeln!(out, "{}", render_frame(topic, &event)?)?;
        }
        if args.with_garbage && round % 10 == 0 {
            writeln!(out, "PUB factory/line9/unknown {{\"process_id\": 1}}")?;
        }
        out.flush()?;
        drop(out);

        if args.interval_ms > 0 {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    eprintln!("✅ Simulation complete: {} rounds emitted", round);
    Ok(())
}

async fn run_broker(args: &Args, addr: &str, topics: &IntakeConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind broker to {addr}"))?;
    eprintln!("📡 Broker listening on {addr} — waiting for SUBSCRIBE");

    loop {
        let (stream, peer) = listener.accept().await?;
        eprintln!("🔌 Gateway connected from {peer}");
        if let Err(e) = serve_client(args, stream, topics).await {
            eprintln!("⚠️  Gateway session ended: {e}");
        }
        if args.count > 0 {
            // One full run per connection in bounded mode.
            break;
        }
    }
    Ok(())
}

async fn serve_client(
    args: &Args,
    stream: tokio::net::TcpStream,
    topics: &IntakeConfig,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let subscribe = lines
        .next_line()
        .await?
        .context("connection closed before SUBSCRIBE")?;
    let subscribed: Vec<String> = subscribe
        .strip_prefix("SUBSCRIBE ")
        .with_context(|| format!("expected SUBSCRIBE, got {subscribe:?}"))?
        .split(',')
        .map(|t| t.trim().to_string())
        .collect();
    eprintln!("   Subscribed to {} topics", subscribed.len());

    let mut gen = TelemetryGenerator::new(args.seed, args.defect_rate);
    let profiles: Vec<LineProfile> = ProductionLine::ALL
        .into_iter()
        .map(LineProfile::for_line)
        .collect();

    let mut round = 0u64;
    loop {
        if args.count > 0 && round >= args.count {
            break;
        }
        round += 1;

        for profile in &profiles {
            let Some(topic) = topics.topic_for_line(profile.line) else {
                continue;
            };
            if !subscribed.iter().any(|t| t == topic) {
                continue;
            }
            let event = gen.next_event(profile);
            let frame = render_frame(topic, &event)?;
            write_half.write_all(frame.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
        }
        write_half.flush().await?;

        if args.interval_ms > 0 {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.defect_rate),
        "--defect-rate must be in [0, 1]"
    );

    // Topic layout matches the gateway's defaults.
    let topics = IntakeConfig::default();

    match args.serve.clone() {
        Some(addr) => run_broker(&args, &addr, &topics).await,
        None => run_stdout(&args, &topics).await,
    }
}
