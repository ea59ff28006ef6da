//! Channel multiplexer
//!
//! Logical channels are identified by the L2 header byte of each frame.
//! They share two physical FIFO pairs:
//!
//! | L2 id | channel          | physical |
//! |-------|------------------|----------|
//! | 0x00  | ISI              | common   |
//! | 0x01  | RPC              | common   |
//! | 0x02  | AUDIO            | audio    |
//! | 0x03  | SECURITY         | common   |
//! | 0xC0  | common loopback  | common   |
//! | 0x80  | audio loopback   | audio    |
//! | 0xC3  | CIQ              | common   |
//! | 0xC8  | RTC calibration  | common   |
//!
//! Received messages are copied out of the shared FIFO into a per-channel
//! staging ring so the shared read pointer can be released immediately.
//! A [`QueueElement`] records where each message sits in that ring.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::{debug, trace};

use crate::layout::FifoId;
use crate::{deadline_after, lock, wait_deadline, Result, ShrmError};

/// Logical channel, by L2 header id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Isi = 0x00,
    Rpc = 0x01,
    Audio = 0x02,
    Security = 0x03,
    CommonLoopback = 0xC0,
    AudioLoopback = 0x80,
    Ciq = 0xC3,
    RtcCal = 0xC8,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Isi,
        Channel::Rpc,
        Channel::Audio,
        Channel::Security,
        Channel::CommonLoopback,
        Channel::AudioLoopback,
        Channel::Ciq,
        Channel::RtcCal,
    ];

    pub fn l2(self) -> u8 {
        self as u8
    }

    /// Physical FIFO pair carrying this channel
    pub fn phys(self) -> PhysChannel {
        match self {
            Channel::Audio | Channel::AudioLoopback => PhysChannel::Audio,
            _ => PhysChannel::Common,
        }
    }

    fn index(self) -> usize {
        match self {
            Channel::Isi => 0,
            Channel::Rpc => 1,
            Channel::Audio => 2,
            Channel::Security => 3,
            Channel::CommonLoopback => 4,
            Channel::AudioLoopback => 5,
            Channel::Ciq => 6,
            Channel::RtcCal => 7,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = ShrmError;

    fn try_from(l2: u8) -> Result<Self> {
        Channel::ALL
            .into_iter()
            .find(|c| c.l2() == l2)
            .ok_or(ShrmError::UnknownChannel(l2))
    }
}

/// Physical channel: one FIFO in each direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysChannel {
    Common = 0,
    Audio = 1,
}

impl PhysChannel {
    pub const ALL: [PhysChannel; 2] = [PhysChannel::Common, PhysChannel::Audio];

    /// FIFO the AP writes into
    pub fn ac_fifo(self) -> FifoId {
        match self {
            PhysChannel::Common => FifoId::AcCommon,
            PhysChannel::Audio => FifoId::AcAudio,
        }
    }

    /// FIFO the AP reads from
    pub fn ca_fifo(self) -> FifoId {
        match self {
            PhysChannel::Common => FifoId::CaCommon,
            PhysChannel::Audio => FifoId::CaAudio,
        }
    }
}

/// Location of one received message in its channel's staging ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueElement {
    /// Offset into the staging ring
    pub offset: usize,
    pub size: usize,
    /// Sequence number within the channel, starting at 0
    pub no: u64,
}

/// A message handed to a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub channel: Channel,
    pub element: QueueElement,
    pub payload: Vec<u8>,
}

struct QueueInner {
    staging: Vec<u8>,
    write_offset: usize,
    used: usize,
    elements: VecDeque<QueueElement>,
    next_no: u64,
}

impl QueueInner {
    fn copy_in(&mut self, payload: &[u8]) -> usize {
        let capacity = self.staging.len();
        let start = self.write_offset;
        let first = payload.len().min(capacity - start);
        self.staging[start..start + first].copy_from_slice(&payload[..first]);
        self.staging[..payload.len() - first].copy_from_slice(&payload[first..]);
        self.write_offset = (start + payload.len()) % capacity;
        self.used += payload.len();
        start
    }

    fn copy_out(&self, element: &QueueElement) -> Vec<u8> {
        let capacity = self.staging.len();
        let first = element.size.min(capacity - element.offset);
        let mut payload = Vec::with_capacity(element.size);
        payload.extend_from_slice(&self.staging[element.offset..element.offset + first]);
        payload.extend_from_slice(&self.staging[..element.size - first]);
        payload
    }
}

/// Receive queue for one logical channel
pub struct MessageQueue {
    channel: Channel,
    inner: Mutex<QueueInner>,
    readable: Condvar,
}

impl MessageQueue {
    pub fn new(channel: Channel, capacity: usize) -> Self {
        Self {
            channel,
            inner: Mutex::new(QueueInner {
                staging: vec![0; capacity],
                write_offset: 0,
                used: 0,
                elements: VecDeque::new(),
                next_no: 0,
            }),
            readable: Condvar::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Copy a received payload in and wake any blocked reader
    ///
    /// # Errors
    /// - `MessageTooLarge` if the payload is bigger than the whole ring
    /// - `QueueFull` if the ring cannot take the payload right now; the
    ///   queue is left untouched so the caller can retry after a reader
    ///   drains it
    pub fn enqueue_received(&self, payload: &[u8]) -> Result<QueueElement> {
        let mut inner = lock(&self.inner);
        if payload.len() > inner.staging.len() {
            return Err(ShrmError::MessageTooLarge {
                channel: self.channel,
                len: payload.len(),
                capacity: inner.staging.len(),
            });
        }
        if inner.staging.len() - inner.used < payload.len() {
            return Err(ShrmError::QueueFull {
                channel: self.channel,
            });
        }

        let offset = inner.copy_in(payload);
        let element = QueueElement {
            offset,
            size: payload.len(),
            no: inner.next_no,
        };
        inner.next_no += 1;
        inner.elements.push_back(element);
        trace!("{:?}: queued #{} ({} bytes)", self.channel, element.no, element.size);
        drop(inner);

        self.readable.notify_all();
        Ok(element)
    }

    /// Pop the oldest message, if any
    pub fn dequeue_received(&self) -> Option<ReceivedMessage> {
        let mut inner = lock(&self.inner);
        self.pop(&mut inner)
    }

    /// Pop the oldest message, blocking up to `timeout` for one to arrive
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<ReceivedMessage> {
        let deadline = deadline_after(timeout);
        let mut inner = lock(&self.inner);
        loop {
            if let Some(msg) = self.pop(&mut inner) {
                return Some(msg);
            }
            inner = wait_deadline(&self.readable, inner, deadline).ok()?;
        }
    }

    fn pop(&self, inner: &mut QueueInner) -> Option<ReceivedMessage> {
        let element = inner.elements.pop_front()?;
        let payload = inner.copy_out(&element);
        inner.used -= element.size;
        if inner.elements.is_empty() {
            // Realign so the next burst starts contiguous
            inner.write_offset = 0;
        }
        Some(ReceivedMessage {
            channel: self.channel,
            element,
            payload,
        })
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        lock(&self.inner).elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held in the staging ring
    pub fn used(&self) -> usize {
        lock(&self.inner).used
    }

    /// Discard every queued message; returns how many were dropped
    pub fn drain(&self) -> usize {
        let mut inner = lock(&self.inner);
        let dropped = inner.elements.len();
        inner.elements.clear();
        inner.used = 0;
        inner.write_offset = 0;
        dropped
    }
}

/// All receive queues, one per logical channel
pub struct Multiplexer {
    queues: Vec<MessageQueue>,
}

impl Multiplexer {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queues: Channel::ALL
                .into_iter()
                .map(|c| MessageQueue::new(c, queue_capacity))
                .collect(),
        }
    }

    pub fn queue(&self, channel: Channel) -> &MessageQueue {
        &self.queues[channel.index()]
    }

    /// Route a received message to its channel queue
    pub fn enqueue_received(&self, channel: Channel, payload: &[u8]) -> Result<QueueElement> {
        self.queue(channel).enqueue_received(payload)
    }

    pub fn dequeue_received(&self, channel: Channel) -> Option<ReceivedMessage> {
        self.queue(channel).dequeue_received()
    }

    /// Discard all pending messages on every channel
    pub fn drain_all(&self) -> usize {
        let dropped: usize = self.queues.iter().map(MessageQueue::drain).sum();
        if dropped > 0 {
            debug!("drained {} queued messages", dropped);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_channel_ids() {
        assert_eq!(Channel::try_from(0x00).unwrap(), Channel::Isi);
        assert_eq!(Channel::try_from(0xC8).unwrap(), Channel::RtcCal);
        assert!(matches!(
            Channel::try_from(0x42),
            Err(ShrmError::UnknownChannel(0x42))
        ));
        for c in Channel::ALL {
            assert_eq!(Channel::try_from(c.l2()).unwrap(), c);
        }
    }

    #[test]
    fn test_routing() {
        assert_eq!(Channel::Audio.phys(), PhysChannel::Audio);
        assert_eq!(Channel::AudioLoopback.phys(), PhysChannel::Audio);
        for c in [Channel::Isi, Channel::Rpc, Channel::Security, Channel::CommonLoopback] {
            assert_eq!(c.phys(), PhysChannel::Common);
        }
        assert_eq!(PhysChannel::Audio.ac_fifo(), FifoId::AcAudio);
        assert_eq!(PhysChannel::Common.ca_fifo(), FifoId::CaCommon);
    }

    #[test]
    fn test_queue_order_and_numbering() {
        let queue = MessageQueue::new(Channel::Rpc, 64);
        let a = queue.enqueue_received(b"first").unwrap();
        let b = queue.enqueue_received(b"second").unwrap();
        assert_eq!((a.no, a.offset, a.size), (0, 0, 5));
        assert_eq!((b.no, b.offset, b.size), (1, 5, 6));

        let msg = queue.dequeue_received().unwrap();
        assert_eq!(msg.payload, b"first");
        assert_eq!(msg.element, a);
        assert_eq!(queue.dequeue_received().unwrap().payload, b"second");
        assert!(queue.dequeue_received().is_none());
    }

    #[test]
    fn test_staging_wraps() {
        let queue = MessageQueue::new(Channel::Isi, 16);
        queue.enqueue_received(&[1; 10]).unwrap();
        queue.enqueue_received(&[2; 4]).unwrap();
        queue.dequeue_received().unwrap();

        // 12 bytes free, split across the end of the ring
        let el = queue.enqueue_received(&[3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(el.offset, 14);
        assert_eq!(queue.dequeue_received().unwrap().payload, [2; 4]);
        assert_eq!(queue.dequeue_received().unwrap().payload, [3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_queue_full_is_not_destructive() {
        let queue = MessageQueue::new(Channel::Security, 8);
        queue.enqueue_received(&[9; 6]).unwrap();
        assert!(matches!(
            queue.enqueue_received(&[1; 3]),
            Err(ShrmError::QueueFull { channel: Channel::Security })
        ));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.used(), 6);
    }

    #[test]
    fn test_oversized_payload_never_fits() {
        let queue = MessageQueue::new(Channel::Isi, 8);
        assert!(matches!(
            queue.enqueue_received(&[0; 9]),
            Err(ShrmError::MessageTooLarge {
                channel: Channel::Isi,
                len: 9,
                capacity: 8,
            })
        ));
        // Exactly the ring size still fits an empty queue
        queue.enqueue_received(&[1; 8]).unwrap();
        assert!(matches!(
            queue.enqueue_received(&[2; 1]),
            Err(ShrmError::QueueFull { .. })
        ));
    }

    #[test]
    fn test_dequeue_without_deadline() {
        let queue = Arc::new(MessageQueue::new(Channel::Isi, 16));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.enqueue_received(b"late").unwrap();
            })
        };

        let msg = queue.dequeue_timeout(Duration::MAX).unwrap();
        assert_eq!(msg.payload, b"late");
        producer.join().unwrap();
    }

    #[test]
    fn test_blocking_dequeue_wakes() {
        let queue = Arc::new(MessageQueue::new(Channel::Audio, 64));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.enqueue_received(b"pcm").unwrap();
            })
        };

        let msg = queue.dequeue_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.payload, b"pcm");
        producer.join().unwrap();

        assert!(queue.dequeue_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_drain_all() {
        let mux = Multiplexer::new(128);
        mux.enqueue_received(Channel::Isi, b"a").unwrap();
        mux.enqueue_received(Channel::Isi, b"b").unwrap();
        mux.enqueue_received(Channel::Audio, b"c").unwrap();
        assert_eq!(mux.drain_all(), 3);
        assert!(mux.dequeue_received(Channel::Isi).is_none());
        assert!(mux.queue(Channel::Audio).is_empty());
        assert_eq!(mux.queue(Channel::Isi).used(), 0);
    }
}
