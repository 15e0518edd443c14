//! Prometheus metrics for flowsyncd.

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::Result;

/// Metrics collector shared between the control core and the exporter.
#[derive(Clone)]
pub struct MetricsCollector {
    /// OpenFlow messages queued to the switch.
    pub messages_sent_total: IntCounter,
    /// Flow mods emitted by the reconciler, by command.
    pub flow_adds_total: IntCounter,
    pub flow_modifies_total: IntCounter,
    pub flow_deletes_total: IntCounter,
    /// Group mods emitted by the reconciler.
    pub group_adds_total: IntCounter,
    pub group_deletes_total: IntCounter,
    /// Completed connection handshakes (first connect included).
    pub reconnects_total: IntCounter,
    /// Duplicate flows reported by producers.
    pub duplicate_flows_total: IntCounter,
    /// Inbound frames dropped because they failed to decode.
    pub decode_failures_total: IntCounter,
    /// Reconcile passes skipped while messages were outstanding.
    pub backpressure_deferrals_total: IntCounter,

    /// Current size of the desired flow table.
    pub desired_flows: Gauge,
    /// Current size of the installed flow table.
    pub installed_flows: Gauge,
    /// Connection status (1 = handshake complete).
    pub switch_connected: Gauge,

    /// Duration of reconcile passes.
    pub reconcile_seconds: Histogram,

    registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_sent_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_messages_sent_total",
            "Total OpenFlow messages queued to the switch",
        ))?;
        registry.register(Box::new(messages_sent_total.clone()))?;

        let flow_adds_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_flow_adds_total",
            "Total flow add messages emitted",
        ))?;
        registry.register(Box::new(flow_adds_total.clone()))?;

        let flow_modifies_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_flow_modifies_total",
            "Total flow modify messages emitted",
        ))?;
        registry.register(Box::new(flow_modifies_total.clone()))?;

        let flow_deletes_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_flow_deletes_total",
            "Total flow delete messages emitted",
        ))?;
        registry.register(Box::new(flow_deletes_total.clone()))?;

        let group_adds_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_group_adds_total",
            "Total group add messages emitted",
        ))?;
        registry.register(Box::new(group_adds_total.clone()))?;

        let group_deletes_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_group_deletes_total",
            "Total group delete messages emitted",
        ))?;
        registry.register(Box::new(group_deletes_total.clone()))?;

        let reconnects_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_reconnects_total",
            "Completed switch connection handshakes",
        ))?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let duplicate_flows_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_duplicate_flows_total",
            "Duplicate flows submitted by producers",
        ))?;
        registry.register(Box::new(duplicate_flows_total.clone()))?;

        let decode_failures_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_decode_failures_total",
            "Inbound frames dropped due to decode failures",
        ))?;
        registry.register(Box::new(decode_failures_total.clone()))?;

        let backpressure_deferrals_total = IntCounter::with_opts(Opts::new(
            "flowsyncd_backpressure_deferrals_total",
            "Reconcile passes deferred due to outstanding messages",
        ))?;
        registry.register(Box::new(backpressure_deferrals_total.clone()))?;

        let desired_flows = Gauge::with_opts(Opts::new(
            "flowsyncd_desired_flows",
            "Current desired flow table size",
        ))?;
        registry.register(Box::new(desired_flows.clone()))?;

        let installed_flows = Gauge::with_opts(Opts::new(
            "flowsyncd_installed_flows",
            "Current installed flow table size",
        ))?;
        registry.register(Box::new(installed_flows.clone()))?;

        let switch_connected = Gauge::with_opts(Opts::new(
            "flowsyncd_switch_connected",
            "Switch connection status (1=connected, 0=disconnected)",
        ))?;
        registry.register(Box::new(switch_connected.clone()))?;

        let reconcile_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "flowsyncd_reconcile_seconds",
                "Duration of reconcile passes in seconds",
            )
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )?;
        registry.register(Box::new(reconcile_seconds.clone()))?;

        Ok(Self {
            messages_sent_total,
            flow_adds_total,
            flow_modifies_total,
            flow_deletes_total,
            group_adds_total,
            group_deletes_total,
            reconnects_total,
            duplicate_flows_total,
            decode_failures_total,
            backpressure_deferrals_total,
            desired_flows,
            installed_flows,
            switch_connected,
            reconcile_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
