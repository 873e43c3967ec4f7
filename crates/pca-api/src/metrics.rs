//! Prometheus metrics served at `/metrics`
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

use pca_engine::RunReport;

pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    steps: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("pca_requests_total", "Requests by final state"),
            &["outcome"],
        )?;
        let steps = IntCounterVec::new(
            Opts::new("pca_steps_total", "Executed steps by status"),
            &["status"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new("pca_request_duration_seconds", "End-to-end request latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(steps.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            registry,
            requests,
            steps,
            duration,
        })
    }

    /// Count one finished request
    pub fn observe(&self, report: &RunReport) {
        self.requests
            .with_label_values(&[report.state().as_str()])
            .inc();
        for result in report.results() {
            self.steps
                .with_label_values(&[result.status.as_str()])
                .inc();
        }
        self.duration.observe(report.elapsed.as_secs_f64());
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        encode(&self.registry)
    }
}

pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}
