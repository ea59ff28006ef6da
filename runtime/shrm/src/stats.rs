//! Transport counters

use core::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated from any thread
#[derive(Debug, Default)]
pub struct ShrmStats {
    tx_messages: AtomicU64,
    tx_bytes: AtomicU64,
    rx_messages: AtomicU64,
    rx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
    read_notifications: AtomicU64,
    wake_timeouts: AtomicU64,
    resets: AtomicU64,
}

/// Point-in-time copy of [`ShrmStats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tx_messages: u64,
    pub tx_bytes: u64,
    pub rx_messages: u64,
    pub rx_bytes: u64,
    /// Messages discarded for an unknown L2 header or too large to stage
    pub rx_dropped: u64,
    pub read_notifications: u64,
    pub wake_timeouts: u64,
    pub resets: u64,
}

impl ShrmStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_tx(&self, payload_len: usize) {
        self.tx_messages.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rx(&self, payload_len: usize) {
        self.rx_messages.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_notification(&self) {
        self.read_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wake_timeout(&self) {
        self.wake_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_messages: self.tx_messages.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_messages: self.rx_messages.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            read_notifications: self.read_notifications.load(Ordering::Relaxed),
            wake_timeouts: self.wake_timeouts.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = ShrmStats::new();
        stats.record_tx(10);
        stats.record_tx(5);
        stats.record_rx(7);
        stats.record_dropped();
        stats.record_reset();

        let snap = stats.snapshot();
        assert_eq!(snap.tx_messages, 2);
        assert_eq!(snap.tx_bytes, 15);
        assert_eq!(snap.rx_messages, 1);
        assert_eq!(snap.rx_bytes, 7);
        assert_eq!(snap.rx_dropped, 1);
        assert_eq!(snap.resets, 1);
        assert_eq!(snap.read_notifications, 0);
    }
}
