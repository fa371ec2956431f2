use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct LoggerMetrics {
    pub registry: Registry,
    pub samples: IntCounter,
    pub transport_errors: IntCounter,
    pub decode_errors: IntCounter,
    pub leftover_records: IntCounter,
    pub fields_registered: IntGauge,
}

impl LoggerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let samples = IntCounter::new("kwp_samples_total", "Poll ticks handled")?;
        let transport_errors = IntCounter::new(
            "kwp_transport_errors_total",
            "Record reads that failed or timed out",
        )?;
        let decode_errors =
            IntCounter::new("kwp_decode_errors_total", "Fields that failed to decode")?;
        let leftover_records = IntCounter::new(
            "kwp_leftover_records_total",
            "Records with bytes left after the last field",
        )?;
        let fields_registered =
            IntGauge::new("kwp_fields_registered", "Fields bound to the record")?;
        registry.register(Box::new(samples.clone()))?;
        registry.register(Box::new(transport_errors.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(leftover_records.clone()))?;
        registry.register(Box::new(fields_registered.clone()))?;
        Ok(Self {
            registry,
            samples,
            transport_errors,
            decode_errors,
            leftover_records,
            fields_registered,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
