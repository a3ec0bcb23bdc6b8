//! Prometheus metrics exported by the simulation runner.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters shared by every node of a simulation run.
pub struct SimulationMetrics {
    registry: Registry,
    /// Ordered blocks handed to the output sink, by provenance.
    pub blocks_ordered: IntCounterVec,
    /// Remote protocol violations, by kind.
    pub non_compliance: IntCounterVec,
    /// Messages that left a node.
    pub messages_sent: IntCounter,
    /// Inbound messages the wire codec rejected.
    pub parse_failures: IntCounter,
}

impl SimulationMetrics {
    /// Create and register the counters.
    pub fn new() -> Self {
        let registry = Registry::new();
        let blocks_ordered = IntCounterVec::new(
            Opts::new("ordered_blocks_total", "Blocks emitted to the output sink"),
            &["provenance"],
        )
        .expect("valid metric definition");
        let non_compliance = IntCounterVec::new(
            Opts::new(
                "consensus_non_compliance_total",
                "Protocol violations by remote peers",
            ),
            &["kind"],
        )
        .expect("valid metric definition");
        let messages_sent = IntCounter::new("messages_sent_total", "Messages sent between nodes")
            .expect("valid metric definition");
        let parse_failures =
            IntCounter::new("parse_failures_total", "Wire messages that failed to parse")
                .expect("valid metric definition");

        registry
            .register(Box::new(blocks_ordered.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(non_compliance.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(messages_sent.clone()))
            .expect("unique metric");
        registry
            .register(Box::new(parse_failures.clone()))
            .expect("unique metric");

        Self {
            registry,
            blocks_ordered,
            non_compliance,
            messages_sent,
            parse_failures,
        }
    }

    /// The underlying registry, for scraping in tests.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Sum of non-compliance reports with the given kind label.
    pub fn non_compliance_count(&self, kind: &str) -> u64 {
        self.non_compliance.with_label_values(&[kind]).get()
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
