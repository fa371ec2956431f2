//! live-logger: fixed-rate KWP2000 record polling into an append-only log
//!
//! The engine opens the diagnostic session, binds the configured fields,
//! then reads, decodes and appends one line per tick until shut down.

mod error;
pub use error::StartupError;

mod config;
pub use config::{load_field_list, parse_json, parse_yaml};

mod writer;
pub use writer::{format_line, format_timestamp, now, LogWriter, FAILED_MARKER, TRAILER};

mod metrics;
pub use metrics::LoggerMetrics;

mod engine;
pub use engine::{
    EngineConfig, EngineState, PollingEngine, RunSummary, Sample, SampleObserver, MIN_PERIOD,
};
