//! Transport metrics
//!
//! Lock-free counters sampled by health surfaces and tests. The connection
//! gauge is incremented on accept and decremented exactly once on close.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters owned by the WebSocket transport
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    ws_connections: AtomicI64,
    operations_started: AtomicU64,
    operations_completed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ws_connections: i64,
    pub operations_started: u64,
    pub operations_completed: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.ws_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn operation_started(&self) {
        self.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_completed(&self) {
        self.operations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
            operations_started: self.operations_started.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
        }
    }
}
