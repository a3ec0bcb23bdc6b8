//! Simulated network with deterministic latency, packet loss, and partitions.

use crate::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way message latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Probability that any given message is dropped.
    pub packet_loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
        }
    }
}

/// Deterministic message-delivery decisions.
///
/// Supports latency with seeded jitter, probabilistic (but reproducible)
/// packet loss, and directional partitions.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned pairs. `(a, b)` present means messages from `a` to `b`
    /// are dropped; insert both directions for a full partition.
    partitions: HashSet<(NodeIndex, NodeIndex)>,
}

impl SimulatedNetwork {
    /// Create a network.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
        }
    }

    // ─── Partition management ───

    /// Whether messages from `from` to `to` are currently dropped.
    pub fn is_partitioned(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.partitions.contains(&(from, to))
    }

    /// Cut both directions between `a` and `b`.
    pub fn partition_bidirectional(&mut self, a: NodeIndex, b: NodeIndex) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    /// Cut `node` off from every other node.
    pub fn isolate_node(&mut self, node: NodeIndex, all_nodes: usize) {
        for other in 0..all_nodes as NodeIndex {
            if other != node {
                self.partition_bidirectional(node, other);
            }
        }
    }

    /// Restore both directions between `a` and `b`.
    pub fn heal_bidirectional(&mut self, a: NodeIndex, b: NodeIndex) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    /// Restore full connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    // ─── Delivery decision ───

    /// Decide delivery of one message. `None` means dropped (partition or
    /// loss); `Some(latency)` schedules the arrival.
    pub fn should_deliver(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        rng: &mut ChaCha8Rng,
    ) -> Option<Duration> {
        if self.is_partitioned(from, to) {
            return None;
        }
        if self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate {
            return None;
        }
        Some(self.sample_latency(rng))
    }

    fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        if self.config.jitter_fraction <= 0.0 {
            return self.config.latency;
        }
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = rng.gen_range(-jitter_range..jitter_range);
        Duration::from_secs_f64((base + jitter).max(0.0005))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn partitions_drop_messages_until_healed() {
        let mut network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        network.partition_bidirectional(0, 1);
        assert!(network.should_deliver(0, 1, &mut rng).is_none());
        assert!(network.should_deliver(1, 0, &mut rng).is_none());
        assert!(network.should_deliver(0, 2, &mut rng).is_some());
        network.heal_all();
        assert!(network.should_deliver(0, 1, &mut rng).is_some());
    }

    #[test]
    fn same_seed_same_latencies() {
        let network = SimulatedNetwork::new(NetworkConfig::default());
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..32 {
            assert_eq!(
                network.should_deliver(0, 1, &mut a),
                network.should_deliver(0, 1, &mut b)
            );
        }
    }
}
