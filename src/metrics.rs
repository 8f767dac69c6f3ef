use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus instruments describing prediction traffic.
///
/// Cloning is cheap and every clone records into the same registry. Gauges
/// are last-write-wins per label combination, concurrent requests carrying
/// identical labels simply overwrite each other.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    request_count: IntCounterVec,
    request_latency: GaugeVec,
    request_tl_time: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_count = IntCounterVec::new(
            Opts::new("request_count", "Total number of requests"),
            &["client_ip"],
        )?;
        let request_latency = GaugeVec::new(
            Opts::new("request_latency", "Latency of requests"),
            &["client_ip", "input_length"],
        )?;
        let request_tl_time = GaugeVec::new(
            Opts::new(
                "request_tl_time",
                "Effective processing time per input value",
            ),
            &["client_ip", "input_length"],
        )?;

        registry.register(Box::new(request_count.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(request_tl_time.clone()))?;
        register_process_metrics(&registry)?;

        Ok(Self {
            registry: Arc::new(registry),
            request_count,
            request_latency,
            request_tl_time,
        })
    }

    /// Records one completed prediction
    pub fn record_prediction(&self, client_ip: &str, input_length: usize, latency: Duration) {
        let latency = latency.as_secs_f64();
        let input_length_label = input_length.to_string();
        let labels = [client_ip, input_length_label.as_str()];

        self.request_count.with_label_values(&[client_ip]).inc();
        self.request_latency.with_label_values(&labels).set(latency);
        if input_length > 0 {
            self.request_tl_time
                .with_label_values(&labels)
                .set(latency * 1000.0 / input_length as f64);
        }
    }

    /// Renders every instrument in the Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn request_count(&self, client_ip: &str) -> u64 {
        self.request_count.with_label_values(&[client_ip]).get()
    }
}

/// CPU, memory, file descriptors, threads and start time of this process.
/// They are unlabeled, so the exposition is never empty.
#[cfg(target_os = "linux")]
fn register_process_metrics(registry: &Registry) -> prometheus::Result<()> {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    registry.register(Box::new(collector))
}

// The process collector only reads procfs; elsewhere only the start time is known
#[cfg(not(target_os = "linux"))]
fn register_process_metrics(registry: &Registry) -> prometheus::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let start_time = prometheus::Gauge::new(
        "process_start_time_seconds",
        "Start time of the process since unix epoch in seconds.",
    )?;
    start_time.set(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );
    registry.register(Box::new(start_time))
}
