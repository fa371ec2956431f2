use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use can_transport as can;
use kwp2000::{CanTransport, FieldList, Scalar, SimulatedEcu, Transport};
use live_logger::{
    load_field_list, EngineConfig, LogWriter, LoggerMetrics, PollingEngine, RunSummary, Sample,
    SampleObserver,
};

#[derive(Parser, Debug)]
#[command(
    name = "kwp-logger",
    version,
    about = "Log live ECU data over KWP2000 on CAN"
)]
struct Args {
    /// Field list (JSON, or YAML for any other extension)
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log file, created if missing and appended to
    #[arg(long, default_value = "mylog.t7l")]
    log_file: PathBuf,

    /// CAN backend
    #[arg(long, value_enum, default_value_t = Backend::Slcan)]
    backend: Backend,

    /// Serial port of the SLCAN adapter (e.g. /dev/ttyUSB0)
    #[arg(long)]
    device: Option<String>,

    /// CAN bitrate for SLCAN
    #[arg(long, value_enum, default_value_t = Bitrate::B500k)]
    bitrate: Bitrate,

    /// Serial baud rate towards the SLCAN adapter
    #[arg(long, default_value_t = can::DEFAULT_PORT_BAUD)]
    port_baud: u32,

    /// Record reads per second (1 to 1000)
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=1000))]
    freq: u32,

    /// Bound on every request in milliseconds
    #[arg(long, default_value_t = 150)]
    timeout_ms: u64,

    /// Redraw a per-field table on every sample
    #[arg(long, action = ArgAction::SetTrue)]
    live: bool,

    /// Print prometheus metrics on exit
    #[arg(long, action = ArgAction::SetTrue)]
    metrics: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    /// In-process simulated ECU
    Mock,
    Slcan,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Bitrate {
    #[value(name = "10k")]
    B10k,
    #[value(name = "20k")]
    B20k,
    #[value(name = "50k")]
    B50k,
    #[value(name = "100k")]
    B100k,
    #[value(name = "125k")]
    B125k,
    #[value(name = "250k")]
    B250k,
    #[value(name = "500k")]
    B500k,
    #[value(name = "800k")]
    B800k,
    #[value(name = "1m")]
    B1M,
}

impl Bitrate {
    fn into_transport(self) -> can::SlcanBitrate {
        match self {
            Bitrate::B10k => can::SlcanBitrate::B10k,
            Bitrate::B20k => can::SlcanBitrate::B20k,
            Bitrate::B50k => can::SlcanBitrate::B50k,
            Bitrate::B100k => can::SlcanBitrate::B100k,
            Bitrate::B125k => can::SlcanBitrate::B125k,
            Bitrate::B250k => can::SlcanBitrate::B250k,
            Bitrate::B500k => can::SlcanBitrate::B500k,
            Bitrate::B800k => can::SlcanBitrate::B800k,
            Bitrate::B1M => can::SlcanBitrate::B1M,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let args = Args::parse();

    let fields = load_field_list(&args.config)?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening log file: {}", args.log_file.display()))?;
    info!(log = %args.log_file.display(), backend = ?args.backend, "kwp-logger starting");

    let metrics = LoggerMetrics::new().context("metrics init")?;
    let config = EngineConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        ..EngineConfig::with_frequency(args.freq)
    };

    let summary = match args.backend {
        Backend::Mock => {
            let bus = SimulatedEcu::for_fields(&fields).into_bus();
            run(CanTransport::new(bus), fields, log, config, &args, metrics.clone()).await?
        }
        Backend::Slcan => {
            let device = args
                .device
                .as_deref()
                .context("--device is required with --backend slcan")?;
            let bus = can::SlcanBus::open_with(
                device,
                args.port_baud,
                Some(args.bitrate.into_transport()),
            )
            .with_context(|| format!("opening SLCAN adapter {device}"))?;
            run(CanTransport::new(bus), fields, log, config, &args, metrics.clone()).await?
        }
    };

    info!(
        samples = summary.samples,
        records = summary.records_written,
        transport_errors = summary.transport_errors,
        decode_errors = summary.decode_errors,
        leftover_records = summary.leftover_records,
        "done"
    );
    if args.metrics {
        print!("{}", metrics.encode_text());
    }
    Ok(())
}

async fn run<T: Transport, W: Write>(
    transport: T,
    fields: FieldList,
    log: W,
    config: EngineConfig,
    args: &Args,
    metrics: LoggerMetrics,
) -> Result<RunSummary> {
    let mut engine = PollingEngine::new(fields.clone(), LogWriter::new(log), config)
        .with_metrics(metrics);
    if args.live {
        engine = engine.with_observer(LiveDisplay::new(&fields));
    }
    engine
        .start(transport)
        .await
        .context("ECU setup failed, nothing was logged")?;
    let summary = engine.run(shutdown_signal()).await?;
    Ok(summary)
}

fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler failed: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
}

/// Console table of the latest values, redrawn per sample.
struct LiveDisplay {
    last: Vec<Option<Scalar>>,
}

impl LiveDisplay {
    fn new(fields: &FieldList) -> Self {
        Self {
            last: vec![None; fields.len()],
        }
    }
}

impl SampleObserver for LiveDisplay {
    fn on_sample(&mut self, sample: &Sample<'_>) {
        let mut out = String::from("\x1b[2J\x1b[H");
        out.push_str(&format!("frame {}\n", sample.seq));
        for (i, field) in sample.fields.iter().enumerate() {
            let now = sample.readings.get(i).and_then(|r| r.scalar());
            let shown = match (now, self.last.get(i).copied().flatten()) {
                (Some(v), _) => {
                    if let Some(slot) = self.last.get_mut(i) {
                        *slot = Some(v);
                    }
                    v.to_string()
                }
                (None, Some(stale)) => format!("ERR (last {stale})"),
                (None, None) => "ERR".to_string(),
            };
            out.push_str(&format!("{:<32} {}\n", field.name, shown));
        }
        if let Some(leftover) = sample.leftover {
            out.push_str(&format!("warning: {leftover}\n"));
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(out.as_bytes());
        let _ = stdout.flush();
    }
}
