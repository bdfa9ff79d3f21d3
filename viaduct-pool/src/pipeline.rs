//! Deterministic construction of the per-origin-channel handler chain.
//!
//! The original design builds this as an object-oriented handler
//! inheritance tree; per §9's design note this is instead an explicit
//! ordered list of trait-object stages, each a seam a production wiring can
//! replace (real codec, real idle timer) without touching the pool.

use crate::connection::OriginConnection;
use std::sync::Arc;

/// One stage of the outbound, per-origin-channel pipeline. Stages run in a
/// fixed order on every acquire so the idle timer (stage 2) always measures
/// idleness-since-last-use: the pool removes and reinstalls it every time a
/// connection is handed out, not just once at connect time.
pub trait OutboundStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Invoked by the pool's on-acquire hook, once per acquisition, in
    /// pipeline order. Stages that don't care about acquisition (e.g. the
    /// codec stage, which is wired once at connect time by the real HTTP
    /// codec — out of scope here) can leave this blank.
    fn on_acquire(&self, _conn: &OriginConnection) {}
}

/// Codec stage placeholder. The real HTTP codec is an external
/// collaborator (§1); this stage exists so the chain's position and
/// ordering relative to the others is fixed and visible, matching the
/// spec's "codec, idle handler, lifecycle handler, metrics, pool handler"
/// list.
struct CodecStage;
impl OutboundStage for CodecStage {
    fn name(&self) -> &'static str {
        "codec"
    }
}

/// Idle-timeout stage: reinstalled on every acquire (§5 resource policy) so
/// the timer starts counting from the moment a connection goes back into
/// service, not from when the underlying channel was first opened.
struct IdleStage;
impl OutboundStage for IdleStage {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn on_acquire(&self, conn: &OriginConnection) {
        conn.record_acquisition();
    }
}

/// Lifecycle stage: the origin-side analog of the client lifecycle
/// handlers — tracks request start/stop timing for this connection.
struct LifecycleStage;
impl OutboundStage for LifecycleStage {
    fn name(&self) -> &'static str {
        "lifecycle"
    }
}

/// Metrics stage: placeholder seam for per-connection metrics a production
/// wiring would attach here (request latency histograms keyed by origin
/// connection, not pool-wide counters — those live in the pool itself).
struct MetricsStage;
impl OutboundStage for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }
}

/// Pool handler stage: marks the channel as belonging to this pool so a
/// channel-level `Complete`/inactive event can find its way back to
/// `PerServerConnectionPool::remove`. Wiring that linkage is a production
/// concern (it needs the pool's `Arc`); this stage is the fixed slot for it.
struct PoolHandlerStage;
impl OutboundStage for PoolHandlerStage {
    fn name(&self) -> &'static str {
        "pool_handler"
    }
}

/// Builds and holds the fixed-order stage chain, then drives `on_acquire`
/// across all stages for a given connection.
pub struct OutboundPipelineInitializer {
    stages: Vec<Arc<dyn OutboundStage>>,
}

impl OutboundPipelineInitializer {
    /// The default chain, in the order the design mandates: codec, idle,
    /// lifecycle, metrics, pool handler.
    #[must_use]
    pub fn default_chain() -> Self {
        Self {
            stages: vec![
                Arc::new(CodecStage),
                Arc::new(IdleStage),
                Arc::new(LifecycleStage),
                Arc::new(MetricsStage),
                Arc::new(PoolHandlerStage),
            ],
        }
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the on-acquire hook across every stage, in chain order.
    pub fn on_acquire(&self, conn: &OriginConnection) {
        for stage in &self.stages {
            stage.on_acquire(conn);
        }
    }
}

impl Default for OutboundPipelineInitializer {
    fn default() -> Self {
        Self::default_chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionPoolConfig;
    use viaduct_core::channel::testing::FakeChannel;

    #[test]
    fn default_chain_is_in_fixed_order() {
        let pipeline = OutboundPipelineInitializer::default_chain();
        assert_eq!(
            pipeline.stage_names(),
            vec!["codec", "idle", "lifecycle", "metrics", "pool_handler"]
        );
    }

    #[test]
    fn on_acquire_bumps_usage_count_via_idle_stage() {
        let pipeline = OutboundPipelineInitializer::default_chain();
        let ch = FakeChannel::new();
        let conn = OriginConnection::new(ch, ConnectionPoolConfig::builder("o").build_arc());
        pipeline.on_acquire(&conn);
        assert_eq!(conn.usage_count(), 1);
    }
}
