use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::labels::{LabelKeys, LabelSet};

pub const NAMESPACE: &str = "pcap";

/// Prometheus sink the workers aggregate into.
///
/// Each instance owns its registry, so independent pipelines (and tests) never
/// share counters.
pub struct Metrics {
    registry: Registry,

    /// Bytes seen per label set.
    pub bytes_transferred: GaugeVec,
    /// Fill state of the packet queue.
    pub buffer_len: Gauge,
    /// Packets read from the capture source.
    pub packets_seen: Gauge,
    /// Accumulated seconds spent in reverse lookups.
    pub dns_query_duration: Gauge,
}

impl Metrics {
    /// Creates the metrics, with `bytes_transferred` dimensioned by `keys`.
    pub fn new(keys: &LabelKeys) -> Result<Self> {
        let registry = Registry::new();

        let bytes_transferred = GaugeVec::new(
            Opts::new("bytes_transfered", "Amount of bytes transfered").namespace(NAMESPACE),
            &keys.names(),
        )
        .context("creating bytes_transfered")?;
        let buffer_len = Gauge::with_opts(
            Opts::new("buffer_len", "Fill state of the internal buffer").namespace(NAMESPACE),
        )?;
        let packets_seen = Gauge::with_opts(
            Opts::new("packages_seen", "Amount of packages seen").namespace(NAMESPACE),
        )?;
        let dns_query_duration = Gauge::with_opts(
            Opts::new("dns_query_duration", "Duration in seconds per DNS query")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(bytes_transferred.clone()))?;
        registry.register(Box::new(buffer_len.clone()))?;
        registry.register(Box::new(packets_seen.clone()))?;
        registry.register(Box::new(dns_query_duration.clone()))?;

        Ok(Self {
            registry,
            bytes_transferred,
            buffer_len,
            packets_seen,
            dns_query_duration,
        })
    }

    /// Adds `bytes` under exactly `labels`.
    pub fn add_bytes(&self, labels: &LabelSet, bytes: f64) {
        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        match self.bytes_transferred.get_metric_with(&labels) {
            Ok(gauge) => gauge.add(bytes),
            Err(e) => warn!(error = %e, "label set does not match registered keys"),
        }
    }

    /// Current value under `labels`, zero if never added. Reading never
    /// creates a series.
    pub fn bytes(&self, labels: &LabelSet) -> f64 {
        self.bytes_transferred
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == labels.len()
                    && pairs.iter().all(|pair| {
                        labels.get(pair.get_name()).map(String::as_str) == Some(pair.get_value())
                    })
            })
            .map(|metric| metric.get_gauge().get_value())
            .unwrap_or(0.0)
    }

    pub fn set_buffer_len(&self, len: usize) {
        self.buffer_len.set(len as f64);
    }

    pub fn inc_packets_seen(&self) {
        self.packets_seen.inc();
    }

    pub fn add_dns_duration(&self, elapsed: Duration) {
        self.dns_query_duration.add(elapsed.as_secs_f64());
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("encoding metrics")?;
        String::from_utf8(buffer).context("converting metrics to string")
    }
}
