//! Shared memory segment layout
//!
//! The segment is split into four FIFOs. Each FIFO has a byte array and a
//! header pair of 32-bit pointers: the write pointer is only ever stored
//! by the producer, the read pointer only by the consumer.
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │ AC common    │ AC audio     │ CA common    │ CA audio     │
//! │ AP → CMT     │ AP → CMT     │ CMT → AP     │ CMT → AP     │
//! └──────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! Bytes are held in `AtomicU8` cells and pointers in `AtomicU32`, so both
//! processors (or the mock modem thread) can reach the segment through a
//! shared reference. Pointer publication uses `Release`, observation uses
//! `Acquire`; that pairing is what orders the payload bytes ahead of the
//! pointer the remote side polls.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::channel::PhysChannel;
use crate::config::FifoSizes;
use crate::{Result, ShrmError};

/// One of the four FIFOs in the segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FifoId {
    /// AP → CMT, common traffic
    AcCommon,
    /// AP → CMT, audio traffic
    AcAudio,
    /// CMT → AP, common traffic
    CaCommon,
    /// CMT → AP, audio traffic
    CaAudio,
}

impl FifoId {
    pub const ALL: [FifoId; 4] = [
        FifoId::AcCommon,
        FifoId::AcAudio,
        FifoId::CaCommon,
        FifoId::CaAudio,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            FifoId::AcCommon => 0,
            FifoId::AcAudio => 1,
            FifoId::CaCommon => 2,
            FifoId::CaAudio => 3,
        }
    }

    /// Physical channel this FIFO belongs to
    pub fn phys(self) -> PhysChannel {
        match self {
            FifoId::AcCommon | FifoId::CaCommon => PhysChannel::Common,
            FifoId::AcAudio | FifoId::CaAudio => PhysChannel::Audio,
        }
    }

    /// True for FIFOs the AP produces into
    pub fn is_ap_to_modem(self) -> bool {
        matches!(self, FifoId::AcCommon | FifoId::AcAudio)
    }
}

/// A single FIFO inside the shared segment
pub struct SharedFifo {
    id: FifoId,
    data: Box<[AtomicU8]>,
    write_ptr: AtomicU32,
    read_ptr: AtomicU32,
}

impl SharedFifo {
    fn new(id: FifoId, capacity: usize) -> Self {
        Self {
            id,
            data: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            write_ptr: AtomicU32::new(0),
            read_ptr: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> FifoId {
        self.id
    }

    /// Size of the byte array. One slot always stays free, so at most
    /// `capacity() - 1` bytes are ever in flight.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Shared write pointer as last published by the producer
    pub fn shared_write_ptr(&self) -> usize {
        self.write_ptr.load(Ordering::Acquire) as usize
    }

    /// Shared read pointer as last published by the consumer
    pub fn shared_read_ptr(&self) -> usize {
        self.read_ptr.load(Ordering::Acquire) as usize
    }

    /// Bytes published but not yet consumed, from the shared pointers alone
    pub fn available_to_read(&self) -> usize {
        distance(self.shared_read_ptr(), self.shared_write_ptr(), self.capacity())
    }

    /// Bytes a producer could still publish, from the shared pointers alone
    pub fn available_to_write(&self) -> usize {
        self.capacity() - 1 - self.available_to_read()
    }

    pub(crate) fn store(&self, offset: usize, byte: u8) {
        self.data[offset].store(byte, Ordering::Relaxed);
    }

    pub(crate) fn load(&self, offset: usize) -> u8 {
        self.data[offset].load(Ordering::Relaxed)
    }

    pub(crate) fn publish_write_ptr(&self, ptr: usize) {
        debug_assert!(ptr < self.capacity());
        self.write_ptr.store(ptr as u32, Ordering::Release);
    }

    pub(crate) fn publish_read_ptr(&self, ptr: usize) {
        debug_assert!(ptr < self.capacity());
        self.read_ptr.store(ptr as u32, Ordering::Release);
    }

    /// Zero both shared pointers. Only used while neither side is moving
    /// data (attach and modem reset).
    pub(crate) fn reset(&self) {
        self.write_ptr.store(0, Ordering::Release);
        self.read_ptr.store(0, Ordering::Release);
    }
}

impl core::fmt::Debug for SharedFifo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedFifo")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("write_ptr", &self.shared_write_ptr())
            .field("read_ptr", &self.shared_read_ptr())
            .finish()
    }
}

/// The whole shared memory segment
#[derive(Debug)]
pub struct SharedSegment {
    fifos: [SharedFifo; 4],
}

impl SharedSegment {
    /// Allocate a segment with the given FIFO sizes
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any FIFO is too small to hold a header
    /// plus one byte, or too large for a 32-bit pointer.
    pub fn new(sizes: &FifoSizes) -> Result<Arc<Self>> {
        sizes.validate()?;
        Ok(Arc::new(Self {
            fifos: [
                SharedFifo::new(FifoId::AcCommon, sizes.ac_common),
                SharedFifo::new(FifoId::AcAudio, sizes.ac_audio),
                SharedFifo::new(FifoId::CaCommon, sizes.ca_common),
                SharedFifo::new(FifoId::CaAudio, sizes.ca_audio),
            ],
        }))
    }

    pub fn fifo(&self, id: FifoId) -> &SharedFifo {
        &self.fifos[id.index()]
    }

    /// Total bytes of FIFO storage in the segment
    pub fn size(&self) -> usize {
        self.fifos.iter().map(SharedFifo::capacity).sum()
    }

    pub(crate) fn reset(&self) {
        for fifo in &self.fifos {
            fifo.reset();
        }
    }
}

/// Forward distance from `from` to `to` on a ring of `capacity` bytes
pub(crate) fn distance(from: usize, to: usize, capacity: usize) -> usize {
    if to >= from {
        to - from
    } else {
        capacity - from + to
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> ShrmError {
    ShrmError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(n: usize) -> FifoSizes {
        FifoSizes {
            ac_common: n,
            ac_audio: n,
            ca_common: n,
            ca_audio: n,
        }
    }

    #[test]
    fn test_segment_allocation() {
        let segment = SharedSegment::new(&sizes(64)).unwrap();
        assert_eq!(segment.size(), 256);
        for id in FifoId::ALL {
            let fifo = segment.fifo(id);
            assert_eq!(fifo.id(), id);
            assert_eq!(fifo.capacity(), 64);
            assert_eq!(fifo.available_to_read(), 0);
            assert_eq!(fifo.available_to_write(), 63);
        }
    }

    #[test]
    fn test_segment_rejects_tiny_fifo() {
        let mut s = sizes(64);
        s.ca_audio = 4;
        assert!(matches!(
            SharedSegment::new(&s),
            Err(ShrmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(10, 20, 64), 10);
        assert_eq!(distance(60, 4, 64), 8);
        assert_eq!(distance(7, 7, 64), 0);
    }

    #[test]
    fn test_shared_pointer_accounting() {
        let segment = SharedSegment::new(&sizes(64)).unwrap();
        let fifo = segment.fifo(FifoId::AcCommon);
        fifo.publish_write_ptr(50);
        fifo.publish_read_ptr(10);
        assert_eq!(fifo.available_to_read(), 40);
        assert_eq!(fifo.available_to_read() + fifo.available_to_write(), 63);

        fifo.publish_write_ptr(5);
        fifo.publish_read_ptr(60);
        assert_eq!(fifo.available_to_read(), 9);
        assert_eq!(fifo.available_to_read() + fifo.available_to_write(), 63);

        segment.reset();
        assert_eq!(fifo.shared_write_ptr(), 0);
        assert_eq!(fifo.shared_read_ptr(), 0);
    }

    #[test]
    fn test_fifo_direction() {
        assert!(FifoId::AcCommon.is_ap_to_modem());
        assert!(!FifoId::CaAudio.is_ap_to_modem());
        assert_eq!(FifoId::CaAudio.phys(), PhysChannel::Audio);
        assert_eq!(FifoId::AcCommon.phys(), PhysChannel::Common);
    }
}
