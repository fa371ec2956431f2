//! Fixed-rate polling of the aggregate record.
//!
//! `Idle -> Running -> Stopping -> Closed`. One record read and decode runs at
//! a time; timer events that fall inside a running cycle are skipped, not
//! queued. Shutdown wins over a timer event when both are ready.

use crate::error::StartupError;
use crate::metrics::LoggerMetrics;
use crate::writer::{self, LogWriter};
use kwp2000::{
    decode_record, Error, FieldList, LayoutMismatch, Reading, Registrar, Session, Transport,
    DEFAULT_TIMEOUT, RECORD_LOCAL_ID,
};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Time between record reads.
    pub period: Duration,
    /// Bound on every request, handshake included.
    pub timeout: Duration,
    pub local_id: u8,
}

/// Shortest period the ticker is given.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl EngineConfig {
    /// Period for `hz` reads per second, kept within `MIN_PERIOD..=1s`.
    pub fn with_frequency(hz: u32) -> Self {
        let hz = hz.max(1);
        Self {
            period: (Duration::from_secs(1) / hz).max(MIN_PERIOD),
            ..Self::default()
        }
    }

    /// Samples between two progress lines, about one per second.
    pub fn progress_every(&self) -> u64 {
        let period = self.period.max(MIN_PERIOD).as_millis();
        u64::try_from(1000 / period).unwrap_or(1).max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(20),
            timeout: DEFAULT_TIMEOUT,
            local_id: RECORD_LOCAL_ID,
        }
    }
}

/// One decoded tick, handed to the observer.
#[derive(Debug)]
pub struct Sample<'a> {
    pub seq: u64,
    pub fields: &'a FieldList,
    pub readings: &'a [Reading],
    pub leftover: Option<&'a LayoutMismatch>,
}

/// Receives every decoded sample, e.g. for a live console view.
pub trait SampleObserver {
    fn on_sample(&mut self, sample: &Sample<'_>);
}

impl<F: FnMut(&Sample<'_>)> SampleObserver for F {
    fn on_sample(&mut self, sample: &Sample<'_>) {
        self(sample)
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: u64,
    pub records_written: u64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub leftover_records: u64,
}

pub struct PollingEngine<T, W> {
    fields: FieldList,
    config: EngineConfig,
    writer: LogWriter<W>,
    session: Option<Session<T>>,
    state: EngineState,
    metrics: Option<LoggerMetrics>,
    observer: Option<Box<dyn SampleObserver>>,
    summary: RunSummary,
}

impl<T: Transport, W: Write> PollingEngine<T, W> {
    pub fn new(fields: FieldList, writer: LogWriter<W>, config: EngineConfig) -> Self {
        Self {
            fields,
            config,
            writer,
            session: None,
            state: EngineState::Idle,
            metrics: None,
            observer: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: LoggerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_observer(mut self, observer: impl SampleObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn writer(&self) -> &LogWriter<W> {
        &self.writer
    }

    /// Open the session and bind every field. Any failure here is fatal: the
    /// session is closed again (best effort) and no sample is ever taken.
    pub async fn start(&mut self, transport: T) -> Result<(), StartupError> {
        if self.state != EngineState::Idle {
            return Err(StartupError::InvalidState(self.state, EngineState::Idle));
        }
        let mut session = match Session::open(transport, self.config.timeout).await {
            Ok(session) => session,
            Err(e) => {
                self.state = EngineState::Closed;
                return Err(e.into());
            }
        };
        let registered = Registrar::new(&mut session, self.config.local_id)
            .register_all(&self.fields)
            .await;
        if let Err(e) = registered {
            error!("{e}");
            if let Err((_, close)) = session.close().await {
                warn!("session close failed: {close}");
            }
            self.state = EngineState::Closed;
            return Err(e.into());
        }
        if let Some(m) = &self.metrics {
            m.fields_registered.set(self.fields.len() as i64);
        }
        self.session = Some(session);
        self.state = EngineState::Running;
        info!(
            fields = self.fields.len(),
            period_ms = self.config.period.as_millis() as u64,
            "polling started"
        );
        Ok(())
    }

    /// Poll until `shutdown` resolves, then close the session.
    pub async fn run<S>(&mut self, shutdown: S) -> Result<RunSummary, StartupError>
    where
        S: Future<Output = ()>,
    {
        let Some(mut session) = self.session.take() else {
            return Err(StartupError::InvalidState(self.state, EngineState::Running));
        };
        let mut ticker = tokio::time::interval(self.config.period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.state = EngineState::Stopping;
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle(&mut session).await;
                }
            }
        }

        info!(
            samples = self.summary.samples,
            records = self.summary.records_written,
            "stopping"
        );
        if let Err((_, e)) = session.close().await {
            warn!("session close failed: {e}");
        }
        self.state = EngineState::Closed;
        Ok(self.summary)
    }

    /// One read, decode and append.
    async fn cycle(&mut self, session: &mut Session<T>) {
        self.summary.samples += 1;
        let seq = self.summary.samples;
        if let Some(m) = &self.metrics {
            m.samples.inc();
        }

        let record = match session.read_local_identifier(self.config.local_id).await {
            Ok(record) => record,
            Err(e) => {
                self.summary.transport_errors += 1;
                if let Some(m) = &self.metrics {
                    m.transport_errors.inc();
                }
                warn!(seq, "{}", Error::Transport(e));
                return;
            }
        };

        let decoded = decode_record(&self.fields, &record);
        for e in &decoded.errors {
            warn!(seq, "{e}");
        }
        self.summary.decode_errors += decoded.errors.len() as u64;
        if let Some(m) = &self.metrics {
            m.decode_errors.inc_by(decoded.errors.len() as u64);
        }
        if let Some(leftover) = &decoded.leftover {
            self.summary.leftover_records += 1;
            if let Some(m) = &self.metrics {
                m.leftover_records.inc();
            }
            warn!(seq, "{leftover}");
        }

        match self
            .writer
            .write(writer::now(), &self.fields, &decoded.readings)
        {
            Ok(()) => self.summary.records_written += 1,
            Err(e) => error!(seq, "log write failed: {e}"),
        }
        debug!(seq, bytes = record.len(), "sample");
        if seq % self.config.progress_every() == 0 {
            info!(
                frames = seq,
                records = self.summary.records_written,
                transport_errors = self.summary.transport_errors,
                decode_errors = self.summary.decode_errors,
                "capturing"
            );
        }

        if let Some(observer) = self.observer.as_mut() {
            observer.on_sample(&Sample {
                seq,
                fields: &self.fields,
                readings: &decoded.readings,
                leftover: decoded.leftover.as_ref(),
            });
        }
    }
}
