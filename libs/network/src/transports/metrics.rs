//! Link Metrics
//!
//! Lock-free counters updated by a link's reader and writer tasks.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Traffic counters for one link
#[derive(Clone, Default)]
pub struct LinkMetrics {
    messages_sent: Arc<AtomicU64>,
    messages_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    descriptors_sent: Arc<AtomicU64>,
    descriptors_received: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,

    /// Error category tracking
    error_types: Arc<RwLock<HashMap<&'static str, u64>>>,

    last_activity: Arc<RwLock<Option<Instant>>>,
}

/// Point-in-time copy of `LinkMetrics`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub descriptors_sent: u64,
    pub descriptors_received: u64,
    pub errors: u64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_send(&self, bytes: usize, descriptors: usize) {
        self.messages_sent.fetch_add(1, Ordering::Release);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Release);
        self.descriptors_sent
            .fetch_add(descriptors as u64, Ordering::Release);
        *self.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize, descriptors: usize) {
        self.messages_received.fetch_add(1, Ordering::Release);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Release);
        self.descriptors_received
            .fetch_add(descriptors as u64, Ordering::Release);
        *self.last_activity.write() = Some(Instant::now());
    }

    /// Record an error under its category
    pub fn record_error(&self, category: &'static str) {
        self.errors.fetch_add(1, Ordering::Release);
        if let Some(mut types) = self.error_types.try_write() {
            *types.entry(category).or_insert(0) += 1;
        }
    }

    /// Errors recorded under `category`
    pub fn errors_of(&self, category: &str) -> u64 {
        self.error_types.read().get(category).copied().unwrap_or(0)
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.read()
    }

    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            bytes_sent: self.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            descriptors_sent: self.descriptors_sent.load(Ordering::Acquire),
            descriptors_received: self.descriptors_received.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for LinkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LinkMetrics").field(&self.snapshot()).finish()
    }
}
