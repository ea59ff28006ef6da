//! SHRM - Shared memory IPC between the application processor and the modem
//!
//! # Purpose
//! Moves variable-length messages between the application processor (AP)
//! and the cellular modem (CMT) through four ring buffers living in one
//! shared memory segment, with doorbell interrupts for signalling and a
//! wake/sleep negotiation so neither side touches the segment while the
//! other is powered down.
//!
//! # Integration Points
//! - Depends on: host platform (shared segment, doorbell register, IRQ
//!   delivery, suspend blocking)
//! - Provides to: character device readers, the phonet network device,
//!   modem state reporting (`MsrCallbacks`)
//! - Doorbells: GOP register bits, see [`gop::GopBits`]
//!
//! # Architecture
//! ```text
//!   write_msg ──► frame ──► AC FIFO ──commit──► msg-pending doorbell ──► modem
//!   modem ──► CA FIFO ──► msg-pending IRQ ──► worker drain ──► channel queue ──► reader
//! ```
//! Interrupt handlers run in two phases: [`IrqLine::fire`] records the
//! event and queues work without blocking, dedicated worker threads do the
//! FIFO draining, register toggling and power negotiation.
//!
//! # Testing Strategy
//! - Unit tests: ring arithmetic, framing, queues, state machines
//! - Integration tests: full context against [`mock::MockModem`]
//! - Benchmarks: frame write/read throughput (criterion)

use std::sync::{Condvar, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod boot;
pub mod channel;
pub mod config;
pub mod context;
pub mod fifo;
pub mod frame;
pub mod gop;
pub mod layout;
pub mod power;
pub mod stats;
mod worker;

#[cfg(feature = "mock")]
pub mod mock;

pub use boot::{BootHandshake, BootInfo, BootState};
pub use channel::{Channel, MessageQueue, Multiplexer, PhysChannel, QueueElement, ReceivedMessage};
pub use config::{FifoSizes, ShrmConfig};
pub use context::{IrqLine, MsrCallbacks, NoopCallbacks, PlatformHooks, ShrmContext};
pub use fifo::{FifoReader, FifoWriter, PendingFrame};
pub use frame::{Message, MessageHeader, HEADER_LEN, MAX_PAYLOAD};
pub use gop::{Doorbell, GopBits, GopRegister, Irq};
pub use layout::{FifoId, SharedFifo, SharedSegment};
pub use power::{NoopBlocker, PowerState, SuspendBlocker, WakeState};
pub use stats::{ShrmStats, StatsSnapshot};

/// Error types for SHRM operations
#[derive(Debug, Error)]
pub enum ShrmError {
    #[error("insufficient space in {fifo:?} FIFO: need {needed} bytes, {available} available")]
    InsufficientSpace {
        fifo: FifoId,
        needed: usize,
        available: usize,
    },

    #[error("{fifo:?} FIFO holds {available} unread bytes, {needed} requested")]
    InsufficientData {
        fifo: FifoId,
        needed: usize,
        available: usize,
    },

    #[error("payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unknown L2 header {0:#04x}")]
    UnknownChannel(u8),

    #[error("corrupt frame header {header:#010x} in {fifo:?} FIFO")]
    CorruptFrame { fifo: FifoId, header: u32 },

    #[error("modem not ready (boot state {0:?})")]
    NotReady(BootState),

    #[error("unexpected boot info word {0:#010x}")]
    BadBootInfo(u32),

    #[error("modem protocol version {modem} below minimum {minimum}")]
    VersionMismatch { modem: u8, minimum: u8 },

    #[error("receive queue for {channel:?} is full")]
    QueueFull { channel: Channel },

    #[error("{len} byte message exceeds the {capacity} byte {channel:?} receive queue")]
    MessageTooLarge {
        channel: Channel,
        len: usize,
        capacity: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker {0} is not running")]
    WorkerStopped(&'static str),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl ShrmError {
    /// Whether the caller may retry the same operation later
    ///
    /// FIFO space, unread data and boot progress all change as the modem
    /// makes progress; everything else is permanent for this call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShrmError::InsufficientSpace { .. }
                | ShrmError::InsufficientData { .. }
                | ShrmError::NotReady(_)
                | ShrmError::QueueFull { .. }
                | ShrmError::Timeout(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, ShrmError>;

/// Lock a mutex, recovering the guard if another thread panicked while
/// holding it. All SHRM mutexes guard plain bookkeeping data.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Deadline `timeout` from now; `None` if it lies beyond what `Instant`
/// can represent, which callers treat as no deadline at all
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Wait on `condvar` until notified or `deadline` passes
///
/// Hands the guard back as `Err` once the deadline has passed, without
/// waiting again.
pub(crate) fn wait_deadline<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
) -> core::result::Result<MutexGuard<'a, T>, MutexGuard<'a, T>> {
    match deadline {
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return Err(guard);
            }
            Ok(condvar
                .wait_timeout(guard, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0))
        }
        None => Ok(condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let full = ShrmError::InsufficientSpace {
            fifo: FifoId::AcCommon,
            needed: 10,
            available: 3,
        };
        assert!(full.is_transient());
        assert!(ShrmError::NotReady(BootState::Init).is_transient());
        assert!(!ShrmError::UnknownChannel(0x42).is_transient());
        assert!(!ShrmError::BadBootInfo(0).is_transient());
        assert!(!ShrmError::MessageTooLarge {
            channel: Channel::Isi,
            len: 100,
            capacity: 64,
        }
        .is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ShrmError::UnknownChannel(0x42);
        assert_eq!(err.to_string(), "unknown L2 header 0x42");

        let err = ShrmError::CorruptFrame {
            fifo: FifoId::CaAudio,
            header: 0xFFFF_0002,
        };
        assert_eq!(err.to_string(), "corrupt frame header 0xffff0002 in CaAudio FIFO");
    }
}
